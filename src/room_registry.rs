//! Process-wide room registry
//!
//! Rooms are created on the first `/join` to an unseen name and destroyed
//! as soon as their last member leaves. Lock order everywhere: registry
//! lock, then a room lock, then a session lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::message::{Envelope, END_OF_LIST};
use crate::room::{Room, DEFAULT_QUEUE_CAPACITY};
use crate::session::Session;
use crate::types::is_valid_name;

/// Sentinel listing when no room exists
pub const NO_ROOMS: &str = "There are currently no rooms. Use /join to create one!";

/// Registry of live rooms, keyed by name
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Mutex<BTreeMap<String, Arc<Room>>>,
    queue_capacity: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl RoomRegistry {
    /// Create an empty registry whose rooms buffer `queue_capacity` envelopes
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(BTreeMap::new()),
            queue_capacity,
        }
    }

    /// Put `session` into room `room_name`, creating the room if needed
    ///
    /// A session sitting in another room leaves it first. The registry lock
    /// is held from lookup through the new member's insertion, so two
    /// concurrent first joins never create two rooms with the same name.
    /// The newcomer's banner is delivered after every lock is released.
    pub async fn join_or_create(&self, session: &Arc<Session>, room_name: &str) -> Result<(), AppError> {
        if !is_valid_name(room_name) {
            return Err(AppError::InvalidRoomName(room_name.to_string()));
        }
        if let Some(current) = session.current_room().await {
            if current.name() == room_name {
                return Err(AppError::AlreadyInRoom(room_name.to_string()));
            }
            self.depart(session, &current).await;
        }

        let arrival = {
            let mut rooms = self.rooms.lock().await;
            let existing = rooms.get(room_name).cloned();
            if let Some(room) = existing {
                room.add_member(session).await.ok_or(AppError::SessionClosed)?
            } else {
                // A new room only enters the registry once it has its member
                let room = Room::spawn(room_name, self.queue_capacity);
                let Some(arrival) = room.add_member(session).await else {
                    room.lock().await.destroy();
                    return Err(AppError::SessionClosed);
                };
                rooms.insert(room_name.to_string(), room);
                info!("Room {} created", room_name);
                arrival
            }
        };
        info!("{} joined room {}", session.display_name(), room_name);

        // No lock held from here on
        arrival.deliver(session).await;
        Ok(())
    }

    /// Take `session` out of whatever room it is in
    pub async fn leave(&self, session: &Arc<Session>) {
        if let Some(room) = session.current_room().await {
            self.depart(session, &room).await;
        }
    }

    /// Take `session` out of `room`, destroying the room if it empties
    ///
    /// Used directly by teardown, where the session no longer reports a
    /// current room.
    pub async fn depart(&self, session: &Arc<Session>, room: &Arc<Room>) {
        let mut rooms = self.rooms.lock().await;
        let mut state = room.lock().await;

        if !room.remove_member(&mut state, session).await {
            debug!("{} was not in room {}", session.display_name(), room.name());
            return;
        }
        info!("{} left room {}", session.display_name(), room.name());

        if state.is_empty() {
            if rooms.get(room.name()).is_some_and(|r| Arc::ptr_eq(r, room)) {
                rooms.remove(room.name());
            }
            state.destroy();
            info!("Room {} destroyed (empty)", room.name());
        } else {
            let left = state.announce(Envelope::left(session));
            drop(state);
            drop(rooms);
            left.send().await;
        }
    }

    /// All rooms with their member counts, alphabetically
    pub async fn listing(&self) -> String {
        let rooms = self.rooms.lock().await;
        if rooms.is_empty() {
            return NO_ROOMS.to_string();
        }
        let mut out = String::from("Active rooms are:\n");
        for (name, room) in rooms.iter() {
            let count = room.member_count().await;
            out.push_str(&format!("{} ({})\n", name, count));
        }
        out.push_str(END_OF_LIST);
        out
    }

    /// Look up a live room by name
    pub async fn get(&self, room_name: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(room_name).cloned()
    }

    /// Number of live rooms
    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mailbox::{Inbox, Mailbox};

    async fn member(name: &str) -> (Arc<Session>, Inbox) {
        let (mailbox, inbox) = Mailbox::channel(64);
        let session = Arc::new(Session::new(mailbox));
        assert!(session.assume_name(name).await);
        (session, inbox)
    }

    async fn next(inbox: &mut Inbox) -> String {
        tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("mailbox closed")
    }

    #[tokio::test]
    async fn test_bad_room_name_has_no_side_effects() {
        let registry = RoomRegistry::default();
        let (alice, _inbox) = member("alice").await;

        let result = registry.join_or_create(&alice, "not ok!").await;
        assert!(matches!(result, Err(AppError::InvalidRoomName(_))));
        assert!(registry.is_empty().await);
        assert!(alice.current_room().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_create_one_room() {
        let registry = Arc::new(RoomRegistry::default());
        let mut sessions = Vec::new();
        let mut inboxes = Vec::new();
        for i in 0..16 {
            let (session, inbox) = member(&format!("user{i}")).await;
            sessions.push(session);
            inboxes.push(inbox);
        }

        let mut tasks = Vec::new();
        for session in &sessions {
            let registry = Arc::clone(&registry);
            let session = Arc::clone(session);
            tasks.push(tokio::spawn(async move {
                registry.join_or_create(&session, "lobby").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.len().await, 1);
        let room = registry.get("lobby").await.unwrap();
        assert_eq!(room.member_count().await, 16);
        for session in &sessions {
            assert!(Arc::ptr_eq(&session.current_room().await.unwrap(), &room));
        }
    }

    #[tokio::test]
    async fn test_room_removed_exactly_when_empty() {
        let registry = RoomRegistry::default();
        let (alice, mut alice_in) = member("alice").await;
        let (bob, _bob_in) = member("bob").await;

        registry.join_or_create(&alice, "lobby").await.unwrap();
        registry.join_or_create(&bob, "lobby").await.unwrap();
        next(&mut alice_in).await;
        next(&mut alice_in).await;
        assert_eq!(next(&mut alice_in).await, "* new user joined chat: bob");

        registry.leave(&bob).await;
        assert_eq!(next(&mut alice_in).await, "* user has left chat: bob");
        assert_eq!(registry.len().await, 1);
        assert!(bob.current_room().await.is_none());

        registry.leave(&alice).await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.listing().await, NO_ROOMS);
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let registry = RoomRegistry::default();
        let (alice, mut alice_in) = member("alice").await;

        registry.leave(&alice).await;
        assert!(registry.is_empty().await);
        assert!(alice_in.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_joining_another_room_leaves_the_first() {
        let registry = RoomRegistry::default();
        let (alice, _alice_in) = member("alice").await;

        registry.join_or_create(&alice, "lobby").await.unwrap();
        registry.join_or_create(&alice, "games").await.unwrap();

        assert!(registry.get("lobby").await.is_none());
        assert_eq!(alice.current_room().await.unwrap().name(), "games");

        let again = registry.join_or_create(&alice, "games").await;
        assert!(matches!(again, Err(AppError::AlreadyInRoom(_))));
    }

    #[tokio::test]
    async fn test_listing_is_sorted_with_counts() {
        let registry = RoomRegistry::default();
        let (alice, _a) = member("alice").await;
        let (bob, _b) = member("bob").await;
        let (carol, _c) = member("carol").await;

        registry.join_or_create(&alice, "zoo").await.unwrap();
        registry.join_or_create(&bob, "attic").await.unwrap();
        registry.join_or_create(&carol, "zoo").await.unwrap();

        assert_eq!(
            registry.listing().await,
            "Active rooms are:\nattic (1)\nzoo (2)\nend of list"
        );
    }

    #[tokio::test]
    async fn test_destroyed_session_does_not_leak_a_room() {
        let registry = RoomRegistry::default();
        let (alice, _inbox) = member("alice").await;
        alice.retire().await;

        let result = registry.join_or_create(&alice, "lobby").await;
        assert!(matches!(result, Err(AppError::SessionClosed)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stalled_joiner_does_not_block_other_rooms() {
        let registry = Arc::new(RoomRegistry::default());
        let (mailbox, _stalled_in) = Mailbox::channel(1);
        let stalled = Arc::new(Session::new(mailbox));
        assert!(stalled.assume_name("zed").await);
        assert!(stalled.deliver("fills the mailbox").await);

        // zed never reads, so this join waits on its own banner forever
        let joining = {
            let registry = Arc::clone(&registry);
            let stalled = Arc::clone(&stalled);
            tokio::spawn(async move { registry.join_or_create(&stalled, "lobby").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!joining.is_finished());

        let (bob, mut bob_in) = member("bob").await;
        tokio::time::timeout(Duration::from_secs(1), registry.join_or_create(&bob, "games"))
            .await
            .expect("join in another room hung")
            .unwrap();
        assert_eq!(next(&mut bob_in).await, "entering room: games");

        let listing = tokio::time::timeout(Duration::from_secs(1), registry.listing())
            .await
            .expect("room listing hung");
        assert_eq!(listing, "Active rooms are:\ngames (1)\nlobby (1)\nend of list");

        tokio::time::timeout(Duration::from_secs(1), registry.leave(&bob))
            .await
            .expect("leave hung");
        assert!(registry.get("games").await.is_none());

        joining.abort();
    }
}

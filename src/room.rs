//! Chat room with a serialized fan-out loop
//!
//! Each room owns a bounded envelope queue drained by its own task. The
//! task fans every envelope out to all current members before taking the
//! next one, so members see a room's messages in submission order.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::debug;

use crate::message::{name_listing, Envelope};
use crate::session::Session;

/// Default number of envelopes a room buffers before senders wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Member set and queue handle, guarded by the room lock
#[derive(Debug)]
pub struct RoomState {
    /// Members keyed by display name
    members: BTreeMap<String, Arc<Session>>,
    /// Fan-out queue; None once the room is destroyed
    outbox: Option<mpsc::Sender<Envelope>>,
}

/// A named broadcast group
#[derive(Debug)]
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
}

impl Room {
    /// Create an empty room and start its fan-out task
    pub fn spawn(name: impl Into<String>, queue_capacity: usize) -> Arc<Room> {
        let (outbox, queue) = mpsc::channel(queue_capacity);
        let room = Arc::new(Room {
            name: name.into(),
            state: Mutex::new(RoomState {
                members: BTreeMap::new(),
                outbox: Some(outbox),
            }),
        });
        tokio::spawn(Self::fan_out(Arc::downgrade(&room), queue));
        room
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the room lock for a compound operation
    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    /// Add a logged-in session to the room
    ///
    /// Returns what the newcomer and the room are owed: the entry banner
    /// and member listing for the newcomer, a join announcement for the
    /// rest. Nothing is delivered here, so the caller may hold any lock.
    /// Returns None, changing nothing, if the session is anonymous or
    /// already destroyed.
    pub async fn add_member(self: &Arc<Self>, session: &Arc<Session>) -> Option<Arrival> {
        let mut state = self.state.lock().await;
        let name = session.name()?;
        if !session.attach(self).await {
            return None;
        }
        state.members.insert(name.to_string(), Arc::clone(session));

        Some(Arrival {
            banner: format!("entering room: {}", self.name),
            listing: state.listing(name),
            joined: state.announce(Envelope::joined(session)),
        })
    }

    /// Remove a member; the caller holds the room lock
    ///
    /// Also clears the session's room reference. Returns false if the
    /// session was not a member.
    pub async fn remove_member(self: &Arc<Self>, state: &mut RoomState, session: &Arc<Session>) -> bool {
        let Some(name) = session.name() else {
            return false;
        };
        match state.members.get(name) {
            Some(member) if Arc::ptr_eq(member, session) => {}
            _ => return false,
        }
        session.detach(self).await;
        state.members.remove(name);
        true
    }

    /// Submit an envelope to the fan-out queue
    pub async fn broadcast(&self, envelope: Envelope) {
        let outbox = self.state.lock().await.outbox.clone();
        match outbox {
            Some(outbox) => {
                if outbox.send(envelope).await.is_err() {
                    debug!("Room {} fan-out already stopped", self.name);
                }
            }
            None => debug!("Dropped message for destroyed room {}", self.name),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Fan-out loop: runs until the room is destroyed (or dropped) and the
    /// queue drains
    async fn fan_out(room: Weak<Room>, mut queue: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = queue.recv().await {
            let Some(room) = room.upgrade() else {
                break;
            };
            let recipients: Vec<Arc<Session>> = {
                let state = room.state.lock().await;
                state
                    .members
                    .values()
                    .filter(|member| envelope.is_for(member))
                    .cloned()
                    .collect()
            };
            let line = envelope.render();
            for member in recipients {
                member.deliver(line.clone()).await;
            }
        }
        debug!("Room fan-out stopped");
    }
}

/// Lines owed after a session joins a room
#[must_use]
#[derive(Debug)]
pub struct Arrival {
    banner: String,
    listing: String,
    joined: Announcement,
}

impl Arrival {
    /// Greet the newcomer, then tell the room; call with no locks held
    pub async fn deliver(self, newcomer: &Session) {
        newcomer.deliver(self.banner).await;
        newcomer.deliver(self.listing).await;
        self.joined.send().await;
    }
}

/// An envelope bound for a room's fan-out queue
#[must_use]
#[derive(Debug)]
pub struct Announcement {
    outbox: Option<mpsc::Sender<Envelope>>,
    envelope: Envelope,
}

impl Announcement {
    pub async fn send(self) {
        if let Some(outbox) = self.outbox {
            let _ = outbox.send(self.envelope).await;
        }
    }
}

impl RoomState {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether this exact session is a member
    pub fn contains(&self, session: &Arc<Session>) -> bool {
        session
            .name()
            .and_then(|name| self.members.get(name))
            .is_some_and(|member| Arc::ptr_eq(member, session))
    }

    /// Member listing with `viewer` flagged
    pub fn listing(&self, viewer: &str) -> String {
        name_listing(None, self.members.keys().map(String::as_str), viewer)
    }

    /// Prepare an announcement under the room lock
    ///
    /// The fan-out task takes the room lock for every envelope, so the
    /// returned value must be sent after the lock is released.
    pub fn announce(&self, envelope: Envelope) -> Announcement {
        Announcement {
            outbox: self.outbox.clone(),
            envelope,
        }
    }

    /// Close the fan-out queue, ending the room's task
    ///
    /// Only the room registry calls this, holding both its own lock and
    /// the room lock, on an empty room.
    pub fn destroy(&mut self) {
        debug_assert!(self.members.is_empty());
        self.outbox = None;
    }

    pub fn is_destroyed(&self) -> bool {
        self.outbox.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mailbox::{Inbox, Mailbox};

    async fn member(name: &str) -> (Arc<Session>, Inbox) {
        let (mailbox, inbox) = Mailbox::channel(32);
        let session = Arc::new(Session::new(mailbox));
        assert!(session.assume_name(name).await);
        (session, inbox)
    }

    async fn enter(room: &Arc<Room>, session: &Arc<Session>) {
        room.add_member(session)
            .await
            .expect("session should be admitted")
            .deliver(session)
            .await;
    }

    async fn next(inbox: &mut Inbox) -> String {
        tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("mailbox closed")
    }

    #[tokio::test]
    async fn test_first_member_sees_banner_and_listing() {
        let room = Room::spawn("lobby", 16);
        let (alice, mut alice_in) = member("alice").await;

        enter(&room, &alice).await;

        assert_eq!(next(&mut alice_in).await, "entering room: lobby");
        assert_eq!(
            next(&mut alice_in).await,
            "* alice (** this is you)\nend of list"
        );
        assert_eq!(room.member_count().await, 1);
        assert!(Arc::ptr_eq(&alice.current_room().await.unwrap(), &room));
    }

    #[tokio::test]
    async fn test_join_is_announced_to_others() {
        let room = Room::spawn("lobby", 16);
        let (alice, mut alice_in) = member("alice").await;
        let (bob, mut bob_in) = member("bob").await;

        enter(&room, &alice).await;
        next(&mut alice_in).await;
        next(&mut alice_in).await;

        enter(&room, &bob).await;
        assert_eq!(next(&mut bob_in).await, "entering room: lobby");
        assert_eq!(
            next(&mut bob_in).await,
            "* alice\n* bob (** this is you)\nend of list"
        );
        assert_eq!(next(&mut alice_in).await, "* new user joined chat: bob");
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_but_sender() {
        let room = Room::spawn("lobby", 16);
        let mut inboxes = Vec::new();
        let mut sessions = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let (session, inbox) = member(name).await;
            enter(&room, &session).await;
            sessions.push(session);
            inboxes.push(inbox);
        }
        // Let the join announcements drain
        tokio::time::sleep(Duration::from_millis(50)).await;
        for inbox in inboxes.iter_mut() {
            while inbox.try_recv().is_some() {}
        }

        room.broadcast(Envelope::chat(&sessions[0], "hi")).await;

        assert_eq!(next(&mut inboxes[1]).await, "alice: hi");
        assert_eq!(next(&mut inboxes[2]).await, "alice: hi");
        assert!(inboxes[0].try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order() {
        let room = Room::spawn("lobby", 4);
        let (alice, _alice_in) = member("alice").await;
        let (bob, mut bob_in) = member("bob").await;
        enter(&room, &alice).await;
        enter(&room, &bob).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        while bob_in.try_recv().is_some() {}

        for i in 0..10 {
            room.broadcast(Envelope::chat(&alice, format!("msg {i}"))).await;
        }
        for i in 0..10 {
            assert_eq!(next(&mut bob_in).await, format!("alice: msg {i}"));
        }
    }

    #[tokio::test]
    async fn test_remove_member_clears_room_reference() {
        let room = Room::spawn("lobby", 16);
        let (alice, _alice_in) = member("alice").await;
        enter(&room, &alice).await;

        let mut state = room.lock().await;
        assert!(state.contains(&alice));
        assert!(room.remove_member(&mut state, &alice).await);
        assert!(!room.remove_member(&mut state, &alice).await);
        assert!(state.is_empty());
        state.destroy();
        assert!(state.is_destroyed());
        drop(state);

        assert!(alice.current_room().await.is_none());
    }

    #[tokio::test]
    async fn test_destroyed_session_is_not_added() {
        let room = Room::spawn("lobby", 16);
        let (alice, _alice_in) = member("alice").await;
        alice.retire().await;

        assert!(room.add_member(&alice).await.is_none());
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_member_delivers_nothing_until_asked() {
        let room = Room::spawn("lobby", 16);
        let (alice, mut alice_in) = member("alice").await;

        let arrival = room.add_member(&alice).await.unwrap();
        assert!(alice_in.try_recv().is_none());
        assert_eq!(room.member_count().await, 1);

        arrival.deliver(&alice).await;
        assert_eq!(next(&mut alice_in).await, "entering room: lobby");
    }

    #[tokio::test]
    async fn test_stalled_member_holds_only_its_own_deliveries() {
        let room = Room::spawn("lobby", 16);
        let (mailbox, _stalled_in) = Mailbox::channel(1);
        let stalled = Arc::new(Session::new(mailbox));
        assert!(stalled.assume_name("zed").await);
        assert!(stalled.deliver("fills the mailbox").await);

        let arrival = tokio::time::timeout(Duration::from_secs(1), room.add_member(&stalled))
            .await
            .expect("adding a stalled member must not wait on its mailbox");
        assert!(arrival.is_some());

        let (bob, mut bob_in) = member("bob").await;
        tokio::time::timeout(Duration::from_secs(1), enter(&room, &bob))
            .await
            .expect("room lock should be free");
        assert_eq!(next(&mut bob_in).await, "entering room: lobby");
    }
}

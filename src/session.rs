//! Server-side state of one connection
//!
//! A session starts anonymous, gains a name exactly once on login and ends
//! in the terminal `Destroyed` state. Once destroyed it holds no mailbox,
//! so nothing can be delivered to it again.

use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::Mutex;
use tracing::debug;

use crate::mailbox::Mailbox;
use crate::message::private_line;
use crate::room::Room;
use crate::types::SessionId;

/// State held while the connection is alive
#[derive(Debug)]
pub struct Presence {
    /// Outbound queue to the connection writer
    pub mailbox: Mailbox,
    /// Room the session currently sits in (never owning)
    pub room: Weak<Room>,
    /// Who last sent us a private message (`/r`)
    pub last_sender: Option<String>,
    /// Who we last sent a private message to (`/rm`)
    pub last_recipient: Option<String>,
}

#[derive(Debug)]
enum Lifecycle {
    Live(Presence),
    Destroyed,
}

/// One connected client
///
/// Shared as `Arc<Session>` between the connection, the user registry and
/// the room it sits in. The user registry is the owner of record.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    name: OnceLock<String>,
    state: Mutex<Lifecycle>,
}

impl Session {
    /// Create an anonymous session speaking through `mailbox`
    pub fn new(mailbox: Mailbox) -> Self {
        Self {
            id: SessionId::new(),
            name: OnceLock::new(),
            state: Mutex::new(Lifecycle::Live(Presence {
                mailbox,
                room: Weak::new(),
                last_sender: None,
                last_recipient: None,
            })),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Display name, once logged in
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Name for log lines
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("(anonymous)")
    }

    pub fn is_authenticated(&self) -> bool {
        self.name.get().is_some()
    }

    pub async fn is_live(&self) -> bool {
        matches!(*self.state.lock().await, Lifecycle::Live(_))
    }

    /// Queue a line for this session
    ///
    /// Returns false if the session is destroyed or its connection is gone.
    /// The session lock is released before waiting on a full mailbox, so a
    /// stalled reader never blocks teardown of its own session.
    pub async fn deliver(&self, line: impl Into<String>) -> bool {
        let mailbox = match &*self.state.lock().await {
            Lifecycle::Live(presence) => presence.mailbox.clone(),
            Lifecycle::Destroyed => return false,
        };
        match mailbox.deliver(line).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Delivery to {} failed: {}", self.id, e);
                false
            }
        }
    }

    /// Take `name` as this session's display name
    ///
    /// Fails if the session is destroyed or already named. Only the user
    /// registry calls this, while holding its own lock.
    pub(crate) async fn assume_name(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        if !matches!(*state, Lifecycle::Live(_)) {
            return false;
        }
        self.name.set(name.to_string()).is_ok()
    }

    /// Point the session at `room`; false if the session is destroyed
    pub(crate) async fn attach(&self, room: &Arc<Room>) -> bool {
        match &mut *self.state.lock().await {
            Lifecycle::Live(presence) => {
                presence.room = Arc::downgrade(room);
                true
            }
            Lifecycle::Destroyed => false,
        }
    }

    /// Clear the room reference if it still points at `room`
    pub(crate) async fn detach(&self, room: &Arc<Room>) {
        if let Lifecycle::Live(presence) = &mut *self.state.lock().await {
            if Weak::ptr_eq(&presence.room, &Arc::downgrade(room)) {
                presence.room = Weak::new();
            }
        }
    }

    /// Room the session currently sits in
    pub async fn current_room(&self) -> Option<Arc<Room>> {
        match &*self.state.lock().await {
            Lifecycle::Live(presence) => presence.room.upgrade(),
            Lifecycle::Destroyed => None,
        }
    }

    /// Accept a private message from `sender`
    ///
    /// Records the sender for `/r`. Returns false if the session is gone.
    pub(crate) async fn receive_private(&self, sender: &str, text: &str) -> bool {
        let mailbox = match &mut *self.state.lock().await {
            Lifecycle::Live(presence) => {
                presence.last_sender = Some(sender.to_string());
                presence.mailbox.clone()
            }
            Lifecycle::Destroyed => return false,
        };
        mailbox.deliver(private_line(sender, text)).await.is_ok()
    }

    pub(crate) async fn set_last_recipient(&self, recipient: &str) {
        if let Lifecycle::Live(presence) = &mut *self.state.lock().await {
            presence.last_recipient = Some(recipient.to_string());
        }
    }

    pub async fn last_sender(&self) -> Option<String> {
        match &*self.state.lock().await {
            Lifecycle::Live(presence) => presence.last_sender.clone(),
            Lifecycle::Destroyed => None,
        }
    }

    pub async fn last_recipient(&self) -> Option<String> {
        match &*self.state.lock().await {
            Lifecycle::Live(presence) => presence.last_recipient.clone(),
            Lifecycle::Destroyed => None,
        }
    }

    /// Move to the terminal state, handing back what the session held
    ///
    /// Only the first caller gets `Some`; every later call returns `None`.
    pub(crate) async fn retire(&self) -> Option<Presence> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, Lifecycle::Destroyed) {
            Lifecycle::Live(presence) => Some(presence),
            Lifecycle::Destroyed => None,
        }
    }
}

//! Process-wide registry of logged-in users
//!
//! Maps each claimed name to its session. Name uniqueness and private
//! message addressing both go through here.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::message::name_listing;
use crate::session::Session;

/// Registry of logged-in sessions, keyed by name
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Mutex<BTreeMap<String, Arc<Session>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `proposed` for `session`
    ///
    /// The session's name is set while the registry lock is held, so the
    /// name and the registry key never disagree. Fails with `NameTaken` if
    /// another live session holds the name.
    pub async fn claim(&self, session: &Arc<Session>, proposed: &str) -> Result<(), AppError> {
        let mut users = self.users.lock().await;
        if users.contains_key(proposed) {
            return Err(AppError::NameTaken);
        }
        if !session.assume_name(proposed).await {
            return Err(AppError::SessionClosed);
        }
        users.insert(proposed.to_string(), Arc::clone(session));
        info!("Session {} logged in as '{}'", session.id(), proposed);
        Ok(())
    }

    /// Send a private message from `sender` to the user named `recipient`
    ///
    /// The registry lock only covers the lookup; delivery happens after it
    /// is released so a slow recipient cannot stall everyone else's
    /// private messages. Errors are for the sender's eyes only and leave
    /// all state untouched.
    pub async fn private_message(
        &self,
        sender: &Arc<Session>,
        recipient: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let Some(sender_name) = sender.name() else {
            return Err(AppError::SessionClosed);
        };
        if sender_name == recipient {
            return Err(AppError::TalkingToYourself);
        }

        let target = self.users.lock().await.get(recipient).cloned();
        let Some(target) = target else {
            return Err(AppError::UserNotFound(recipient.to_string()));
        };
        if !target.receive_private(sender_name, text).await {
            return Err(AppError::UserNotFound(recipient.to_string()));
        }
        sender.set_last_recipient(recipient).await;
        debug!("Private message {} -> {}", sender_name, recipient);
        Ok(())
    }

    /// Drop the entry for `session`; a no-op when it holds none
    pub async fn remove(&self, session: &Arc<Session>) {
        let Some(name) = session.name() else {
            return;
        };
        let mut users = self.users.lock().await;
        if users.get(name).is_some_and(|s| Arc::ptr_eq(s, session)) {
            users.remove(name);
            info!("User '{}' removed", name);
        }
    }

    /// Logged-in users, alphabetically, with `viewer` flagged
    pub async fn listing(&self, viewer: &Session) -> String {
        let users = self.users.lock().await;
        name_listing(
            Some("Logged in users"),
            users.keys().map(String::as_str),
            viewer.name().unwrap_or_default(),
        )
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.users.lock().await.contains_key(name)
    }

    /// Number of logged-in users
    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

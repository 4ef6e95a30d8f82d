//! ChatServer: the shared state and command dispatch
//!
//! Owns the user and room registries. Every decoded line of every
//! connection passes through `handle_line`, which drives the session state
//! machine: anonymous lines are login attempts, logged-in lines are chat or
//! commands, and `disconnect` moves a session to its terminal state.

use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{Command, Input};
use crate::config::Config;
use crate::error::AppError;
use crate::mailbox::{Inbox, Mailbox};
use crate::message::{self, Envelope, GOODBYE, UNRECOGNIZED_NOTICE};
use crate::room_registry::RoomRegistry;
use crate::session::Session;
use crate::types::is_valid_name;
use crate::user_registry::UserRegistry;

/// What the connection should do after a line is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading
    Continue,
    /// The session is destroyed; stop reading
    Quit,
}

/// Shared chat state
#[derive(Debug)]
pub struct ChatServer {
    config: Config,
    users: UserRegistry,
    rooms: RoomRegistry,
}

impl ChatServer {
    /// Create a ChatServer with empty registries
    pub fn new(config: Config) -> Self {
        let rooms = RoomRegistry::new(config.room_queue_capacity);
        Self {
            config,
            users: UserRegistry::new(),
            rooms,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Create an anonymous session and the inbox its writer drains
    pub fn open_session(&self) -> (Arc<Session>, Inbox) {
        let (mailbox, inbox) = Mailbox::channel(self.config.mailbox_capacity);
        (Arc::new(Session::new(mailbox)), inbox)
    }

    /// Banner sent on connect
    pub fn welcome(&self) -> String {
        message::welcome(self.config.max_line_bytes, self.config.idle_timeout())
    }

    /// Process one decoded input line
    pub async fn handle_line(&self, session: &Arc<Session>, line: &str) -> Flow {
        if !session.is_live().await {
            return Flow::Quit;
        }
        if line.is_empty() {
            return Flow::Continue;
        }
        if !session.is_authenticated() {
            self.login(session, line).await;
            return Flow::Continue;
        }

        let result = match Input::parse(line) {
            Input::Chat(text) => self.chat(session, text).await,
            Input::Command(Command::Quit) => {
                self.disconnect(session).await;
                return Flow::Quit;
            }
            Input::Command(cmd) => self.execute(session, cmd).await,
        };

        if let Err(e) = result {
            self.report(session, e).await;
        }
        Flow::Continue
    }

    /// Treat the line as a proposed name
    async fn login(&self, session: &Arc<Session>, proposed: &str) {
        let result = if is_valid_name(proposed) {
            self.users.claim(session, proposed).await
        } else {
            Err(AppError::InvalidName)
        };

        match result {
            Ok(()) => {
                session.deliver(message::greeting(proposed)).await;
            }
            Err(e) => self.report(session, e).await,
        }
    }

    /// Send chat text to the session's room
    async fn chat(&self, session: &Arc<Session>, text: String) -> Result<(), AppError> {
        let room = session.current_room().await.ok_or(AppError::NotInRoom)?;
        room.broadcast(Envelope::chat(session, text)).await;
        Ok(())
    }

    /// Run a post-login command
    async fn execute(&self, session: &Arc<Session>, cmd: Command) -> Result<(), AppError> {
        debug!("{} -> {:?}", session.display_name(), cmd);

        match cmd {
            Command::Join(room) => self.rooms.join_or_create(session, &room).await?,
            Command::Rooms => {
                session.deliver(self.rooms.listing().await).await;
            }
            Command::Leave => self.rooms.leave(session).await,
            Command::Message { to, text } => {
                self.users.private_message(session, &to, &text).await?;
            }
            Command::Reply(text) => {
                let to = session.last_sender().await.ok_or(AppError::NoReplyTarget)?;
                self.users.private_message(session, &to, &text).await?;
            }
            Command::Remessage(text) => {
                let to = session
                    .last_recipient()
                    .await
                    .ok_or(AppError::NoRemessageTarget)?;
                self.users.private_message(session, &to, &text).await?;
            }
            Command::Users => {
                session.deliver(self.users.listing(session).await).await;
            }
            Command::Help => {
                session.deliver(message::help()).await;
            }
            Command::Unknown => {
                session.deliver(UNRECOGNIZED_NOTICE).await;
                session.deliver(message::help()).await;
            }
            Command::Quit => {
                self.disconnect(session).await;
            }
        }
        Ok(())
    }

    /// Show a business error to the session that caused it
    async fn report(&self, session: &Arc<Session>, err: AppError) {
        if matches!(err, AppError::SessionClosed) {
            return;
        }
        session.deliver(err.to_notice()).await;
    }

    /// Destroy a session: leave its room, free its name, say goodbye and
    /// close its mailbox
    ///
    /// Safe to call from several places at once; only the first call does
    /// anything and gets `true`.
    pub async fn disconnect(&self, session: &Arc<Session>) -> bool {
        self.hang_up(session, None).await
    }

    /// Destroy a session, sending `notice` just before the final `Bye`
    pub async fn hang_up(&self, session: &Arc<Session>, notice: Option<&str>) -> bool {
        let Some(presence) = session.retire().await else {
            return false;
        };
        // Releases room fan-outs and private messages stuck on this mailbox
        presence.mailbox.shut();

        if let Some(room) = presence.room.upgrade() {
            self.rooms.depart(session, &room).await;
        }
        self.users.remove(session).await;

        let farewell: Vec<&str> = notice.into_iter().chain([GOODBYE]).collect();
        presence
            .mailbox
            .close_with(&farewell, self.config.linger())
            .await;

        info!(
            "Session {} ({}) destroyed",
            session.id(),
            session.display_name()
        );
        true
    }
}

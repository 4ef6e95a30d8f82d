//! Protocol text and in-flight room messages
//!
//! Every line a client ever sees is produced here: fixed notices, the
//! welcome banner, the help text, listing conventions and the rendering of
//! room envelopes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::AppError;
use crate::session::Session;

/// Final line sent on destruction
pub const GOODBYE: &str = "Bye";

/// Sent before an idle connection is torn down
pub const IDLE_NOTICE: &str = "Disconnected for being idle";

/// Sent before an oversized line forces a disconnect
pub const FLOOD_NOTICE: &str = "You are sending too many messages and will be disconnected";

/// Sent for a line that does not end in `\r\n`
pub const UNTERMINATED_NOTICE: &str = "Please end all messages in a newline";

/// Last line of every listing
pub const END_OF_LIST: &str = "end of list";

/// Suffix marking the viewer in a listing
pub const THIS_IS_YOU: &str = " (** this is you)";

/// Answer to chat text sent outside of a room
pub const NOT_IN_ROOM_NOTICE: &str =
    "* You need to join a room to chat. You can still private message users";

/// Prefix for an unknown `/command`, followed by the help text
pub const UNRECOGNIZED_NOTICE: &str = "* Unrecognized command";

/// Re-prompt appended to failed login attempts
const LOGIN_PROMPT: &str = "Login?";

/// Render the banner sent on connect
pub fn welcome(max_line_bytes: usize, idle_timeout: Duration) -> String {
    let limit = if max_line_bytes % 1024 == 0 {
        format!("{}kb", max_line_bytes / 1024)
    } else {
        format!("{} bytes", max_line_bytes)
    };
    let secs = idle_timeout.as_secs();
    let idle = if secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} seconds", secs)
    };
    format!(
        "Welcome to the Weeby chat server\n\
         Messages are limited to {limit}\n\
         You will be disconnected after {idle} idle\n\
         Type /help for a list of commands after logging in\n\
         {LOGIN_PROMPT}"
    )
}

/// Greeting after a successful login
pub fn greeting(name: &str) -> String {
    format!("Welcome {}!", name)
}

/// Private message line as seen by the recipient
pub fn private_line(sender: &str, text: &str) -> String {
    format!("(pm {}) {}", sender, text)
}

/// Help text, also the fallback for malformed commands
pub fn help() -> &'static str {
    "* Available commands:\n\
     * /help Display this help message.\n\
     * /leave Leave the room you are currently in. You will need to join another room to continue chatting.\n\
     * /m [user] [message] send a private message to the specified user\n\
     * /join [room] you will join the specified room\n\
     * /quit leave the server and disconnect\n\
     * /r [message] reply to the user who last messaged you\n\
     * /rooms list all available chat rooms\n\
     * /rm [message] send a message to the user you last messaged\n\
     * /users list all logged in users"
}

/// Render a `* name` listing, sorted by the caller, ending in `end of list`
pub fn name_listing<'a>(
    header: Option<&str>,
    names: impl IntoIterator<Item = &'a str>,
    viewer: &str,
) -> String {
    let mut out = String::new();
    if let Some(header) = header {
        out.push_str(header);
        out.push('\n');
    }
    for name in names {
        out.push_str("* ");
        out.push_str(name);
        if name == viewer {
            out.push_str(THIS_IS_YOU);
        }
        out.push('\n');
    }
    out.push_str(END_OF_LIST);
    out
}

impl AppError {
    /// Notice line shown to the user who caused a business error
    pub fn to_notice(&self) -> String {
        match self {
            AppError::InvalidName => format!(
                "Names must be 1-10 letters, digits or underscores\n{LOGIN_PROMPT}"
            ),
            AppError::NameTaken => format!("Sorry, name taken.\n{LOGIN_PROMPT}"),
            AppError::InvalidRoomName(_) => {
                "Room names must be 1-10 letters, digits or underscores".to_string()
            }
            AppError::AlreadyInRoom(room) => format!("* You are already in room: {}", room),
            AppError::NotInRoom => NOT_IN_ROOM_NOTICE.to_string(),
            AppError::TalkingToYourself => "* talking to yourself?".to_string(),
            AppError::UserNotFound(name) => format!("* Could not find user: {}", name),
            AppError::NoReplyTarget => {
                "* You need to receive a message to send a reply".to_string()
            }
            AppError::NoRemessageTarget => {
                "* You need to send a message to re-message a user".to_string()
            }
            // Fatal errors are not shown to users (the connection closes)
            _ => "* Internal error".to_string(),
        }
    }
}

/// Kind of a room envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Ordinary chat, prefixed with the sender's name
    Chat,
    /// System notice, delivered unprefixed
    Announcement,
}

/// A message in flight through a room's fan-out queue
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Session excluded from delivery
    origin: Weak<Session>,
    /// Name shown in front of chat text
    sender: String,
    text: String,
    kind: EnvelopeKind,
}

impl Envelope {
    /// Chat text from a member
    pub fn chat(sender: &Arc<Session>, text: impl Into<String>) -> Self {
        Self {
            origin: Arc::downgrade(sender),
            sender: sender.display_name().to_string(),
            text: text.into(),
            kind: EnvelopeKind::Chat,
        }
    }

    /// Announcement about `subject`, who is not sent a copy
    pub fn announce_about(subject: &Arc<Session>, text: impl Into<String>) -> Self {
        Self {
            origin: Arc::downgrade(subject),
            sender: subject.display_name().to_string(),
            text: text.into(),
            kind: EnvelopeKind::Announcement,
        }
    }

    /// "<name> joined" notice
    pub fn joined(subject: &Arc<Session>) -> Self {
        let text = format!("* new user joined chat: {}", subject.display_name());
        Self::announce_about(subject, text)
    }

    /// "<name> left" notice
    pub fn left(subject: &Arc<Session>) -> Self {
        let text = format!("* user has left chat: {}", subject.display_name());
        Self::announce_about(subject, text)
    }

    /// Whether `member` should receive a copy
    ///
    /// Compares session identity, so a later session reusing the sender's
    /// name still gets the message.
    pub fn is_for(&self, member: &Arc<Session>) -> bool {
        !std::ptr::eq(self.origin.as_ptr(), Arc::as_ptr(member))
    }

    /// The line members see
    pub fn render(&self) -> String {
        match self.kind {
            EnvelopeKind::Chat => format!("{}: {}", self.sender, self.text),
            EnvelopeKind::Announcement => self.text.clone(),
        }
    }
}

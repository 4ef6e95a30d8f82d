//! Error types for the chat server
//!
//! Defines application-level errors and mailbox delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection or startup termination) and
/// business errors (reported to the offending user as a notice line).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("JSON configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration value rejected
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Proposed user name does not follow the name rule
    #[error("Invalid user name")]
    InvalidName,

    /// Proposed user name already belongs to a live session
    #[error("Name taken")]
    NameTaken,

    /// The session was torn down while the request was in flight
    #[error("Session closed")]
    SessionClosed,

    /// Proposed room name does not follow the name rule
    #[error("Invalid room name: {0}")]
    InvalidRoomName(String),

    /// Session already sits in the requested room
    #[error("Already in room: {0}")]
    AlreadyInRoom(String),

    /// Chat text sent outside of any room
    #[error("Not in room")]
    NotInRoom,

    /// Private message addressed to the sender
    #[error("Talking to yourself")]
    TalkingToYourself,

    /// Private message recipient is not logged in
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// `/r` before any private message was received
    #[error("No one to reply to")]
    NoReplyTarget,

    /// `/rm` before any private message was sent
    #[error("No one to re-message")]
    NoRemessageTarget,
}

/// Mailbox delivery errors
///
/// Occurs when a line is delivered to a session whose mailbox has been closed.
#[derive(Debug, Error)]
pub enum SendError {
    /// The reading end of the mailbox is gone
    #[error("Mailbox closed")]
    MailboxClosed,
}

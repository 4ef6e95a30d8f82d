//! Multi-room TCP Chat Server Library
//!
//! A line-oriented chat server built on tokio. Clients connect over TCP,
//! pick a unique name, join named rooms, chat with room members and send
//! private messages to any logged-in user.
//!
//! # Features
//! - `\r\n` line protocol with a per-line size cap
//! - Unique user names, claimed at login
//! - Rooms created on first join, destroyed when the last member leaves
//! - Private messages with `/r` and `/rm` reply shortcuts
//! - Idle disconnect
//!
//! # Architecture
//! Shared state lives in two registries guarded by tokio mutexes:
//! - `UserRegistry` maps names to sessions
//! - `RoomRegistry` maps names to rooms
//! - Each `Room` runs its own fan-out task fed by a bounded queue
//! - Each `Session` speaks to its connection only through its `Mailbox`
//!
//! Locks are always taken in the order room registry, room, session.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use weeby_chat::{serve, ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(config.bind_addr()).await.unwrap();
//!     serve(listener, Arc::new(ChatServer::new(config))).await;
//! }
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod message;
pub mod room;
pub mod room_registry;
pub mod server;
pub mod session;
pub mod types;
pub mod user_registry;

// Re-export main types for convenience
pub use codec::{Inbound, LineCodec};
pub use command::{Command, Input};
pub use config::Config;
pub use error::{AppError, SendError};
pub use handler::{handle_connection, serve, Hangup};
pub use mailbox::{Inbox, Mailbox};
pub use message::Envelope;
pub use room::Room;
pub use room_registry::RoomRegistry;
pub use server::{ChatServer, Flow};
pub use session::Session;
pub use types::SessionId;
pub use user_registry::UserRegistry;

//! Basic type definitions for the chat server
//!
//! Provides:
//! - `SessionId`: UUID-based identifier used to tell connections apart in logs
//! - the name rule shared by user names and room names

use uuid::Uuid;

/// Longest accepted user or room name
pub const NAME_MAX_LEN: usize = 10;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4. A session has an id from the moment its connection is
/// accepted, long before it has a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check a proposed user or room name
///
/// Names are 1 to 10 characters drawn from ASCII letters, digits and `_`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_MAX_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

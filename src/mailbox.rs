//! Per-session outbound delivery queue
//!
//! A `Mailbox` is the only way any part of the server speaks to a user.
//! It is a bounded FIFO: when the reader falls behind, `deliver` waits
//! instead of dropping lines.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;

/// Default number of lines a mailbox buffers before senders wait
pub const DEFAULT_CAPACITY: usize = 128;

/// Sending half, owned by the session
///
/// Clones share one gate: once any handle is shut, every clone refuses
/// further lines and senders waiting on a full queue give up.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<String>,
    gate: Arc<Gate>,
}

#[derive(Debug, Default)]
struct Gate {
    closed: Mutex<bool>,
    shut: CancellationToken,
}

/// Receiving half, owned by the connection writer
#[derive(Debug)]
pub struct Inbox {
    receiver: mpsc::Receiver<String>,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` undelivered lines
    pub fn channel(capacity: usize) -> (Mailbox, Inbox) {
        let (sender, receiver) = mpsc::channel(capacity);
        let mailbox = Mailbox {
            sender,
            gate: Arc::new(Gate::default()),
        };
        (mailbox, Inbox { receiver })
    }

    /// Queue a line, waiting while the mailbox is full
    ///
    /// Returns an error if the mailbox is shut or the inbox has been
    /// dropped (connection gone).
    pub async fn deliver(&self, line: impl Into<String>) -> Result<(), SendError> {
        let permit = tokio::select! {
            biased;
            _ = self.gate.shut.cancelled() => return Err(SendError::MailboxClosed),
            permit = self.sender.reserve() => permit.map_err(|_| SendError::MailboxClosed)?,
        };
        self.admit(permit, line.into())
    }

    fn admit(&self, permit: mpsc::Permit<'_, String>, line: String) -> Result<(), SendError> {
        let closed = self.gate.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(SendError::MailboxClosed);
        }
        permit.send(line);
        Ok(())
    }

    /// Refuse further lines on every handle
    ///
    /// Lines already queued still drain. Senders blocked on a full queue
    /// return `MailboxClosed`.
    pub fn shut(&self) {
        *self.gate.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.gate.shut.cancel();
    }

    pub fn is_shut(&self) -> bool {
        self.gate.shut.is_cancelled()
    }

    /// Shut the mailbox and queue `farewell` as its last lines
    ///
    /// Gives up on whatever does not fit within `grace`.
    pub async fn close_with(self, farewell: &[&str], grace: Duration) {
        self.shut();
        let deadline = tokio::time::Instant::now() + grace;
        for line in farewell {
            let sent = tokio::time::timeout_at(deadline, self.sender.send(line.to_string())).await;
            if !matches!(sent, Ok(Ok(()))) {
                break;
            }
        }
    }

    /// Shut the mailbox and give up this handle; the inbox ends once the
    /// queued lines have drained
    pub fn close(self) {
        self.shut();
    }
}

impl Inbox {
    /// Next queued line, or None once the mailbox is closed and drained
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Next queued line without waiting
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

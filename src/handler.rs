//! TCP connection handler
//!
//! Handles individual client connections: line decoding, the idle
//! timeout, and bidirectional communication with the ChatServer.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{Inbound, LineCodec};
use crate::error::AppError;
use crate::message::{FLOOD_NOTICE, IDLE_NOTICE, UNTERMINATED_NOTICE};
use crate::server::{ChatServer, Flow};
use crate::session::Session;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hangup {
    /// The peer closed the stream
    Closed,
    /// The user sent `/quit`
    Quit,
    /// Nothing was received within the idle timeout
    Idle,
    /// A line exceeded the size limit
    Flood,
}

/// Accept connections forever, one task per connection
pub async fn serve(listener: TcpListener, server: Arc<ChatServer>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let server = Arc::clone(&server);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, server).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Which part of a connection ended it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    Reader,
    Writer,
    Idle,
}

/// Handle a new TCP connection
///
/// Sends the welcome banner, runs the reader and writer tasks, and tears
/// the session down exactly once however the connection ends. The idle
/// countdown runs here, outside the reader, so it keeps running while the
/// reader waits on a full mailbox or room queue.
pub async fn handle_connection(stream: TcpStream, server: Arc<ChatServer>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (reader, writer) = stream.into_split();
    let (session, mut inbox) = server.open_session();
    info!("Session {} connected from {}", session.id(), peer_addr);

    session.deliver(server.welcome()).await;

    // Spawn write task (mailbox -> socket)
    let session_id = session.id();
    let max_line_bytes = server.config().max_line_bytes;
    let mut write_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, LineCodec::new(max_line_bytes));
        while let Some(line) = inbox.recv().await {
            if let Err(e) = sink.send(line).await {
                debug!("Write failed for {}: {}", session_id, e);
                break;
            }
        }
        let _ = sink.close().await;
        debug!("Write task ended for {}", session_id);
    });

    // Spawn read task (socket -> ChatServer)
    let (activity, heard) = watch::channel(());
    let mut read_task = tokio::spawn(read_lines(
        reader,
        Arc::clone(&session),
        Arc::clone(&server),
        activity,
    ));

    let (ended, hangup) = tokio::select! {
        outcome = &mut read_task => {
            let hangup = match outcome {
                Ok(Ok(hangup)) => hangup,
                Ok(Err(e)) => {
                    warn!("Read error for {}: {}", session.id(), e);
                    Hangup::Closed
                }
                Err(e) => {
                    error!("Read task for {} failed: {}", session.id(), e);
                    Hangup::Closed
                }
            };
            (Ended::Reader, hangup)
        }
        _ = &mut write_task => {
            debug!("Write task completed first for {}", session.id());
            (Ended::Writer, Hangup::Closed)
        }
        _ = idle_expired(heard, server.config().idle_timeout()) => (Ended::Idle, Hangup::Idle),
    };

    server.hang_up(&session, farewell(&session, hangup)).await;

    // Let the other side finish: the writer flushes the final lines, the
    // reader notices the session is gone or sees the peer's close
    let linger = server.config().linger();
    if ended != Ended::Writer {
        finish(&mut write_task, linger, "Writer", &session).await;
    }
    if ended != Ended::Reader {
        finish(&mut read_task, linger, "Reader", &session).await;
    }

    info!("Session {} disconnected", session.id());
    Ok(())
}

/// Wait up to `linger` for a task, aborting it after that
async fn finish<T>(task: &mut JoinHandle<T>, linger: Duration, what: &str, session: &Session) {
    if tokio::time::timeout(linger, &mut *task).await.is_err() {
        debug!("{} for {} did not finish in time", what, session.id());
        task.abort();
    }
}

/// Resolves once `idle` passes without any read activity
async fn idle_expired(mut heard: watch::Receiver<()>, idle: Duration) {
    loop {
        match tokio::time::timeout(idle, heard.changed()).await {
            Ok(Ok(())) => {}
            // Reader is gone; its own outcome ends the connection
            Ok(Err(_)) => std::future::pending::<()>().await,
            Err(_) => return,
        }
    }
}

/// The notice that goes with a hangup reason, if any
fn farewell(session: &Session, hangup: Hangup) -> Option<&'static str> {
    match hangup {
        Hangup::Idle => {
            info!("Session {} idle, disconnecting", session.id());
            Some(IDLE_NOTICE)
        }
        Hangup::Flood => {
            warn!("Session {} sent an oversized line, disconnecting", session.id());
            Some(FLOOD_NOTICE)
        }
        Hangup::Closed | Hangup::Quit => {
            debug!("Session {} ended: {:?}", session.id(), hangup);
            None
        }
    }
}

/// Read and dispatch lines until the connection should end
///
/// Every successful read, complete line or not, is reported on `activity`
/// to restart the idle countdown.
async fn read_lines(
    mut reader: OwnedReadHalf,
    session: Arc<Session>,
    server: Arc<ChatServer>,
    activity: watch::Sender<()>,
) -> Result<Hangup, AppError> {
    let mut codec = LineCodec::new(server.config().max_line_bytes);
    let mut buf = BytesMut::with_capacity(2 * server.config().max_line_bytes);

    loop {
        if reader.read_buf(&mut buf).await? == 0 {
            return Ok(Hangup::Closed);
        }
        activity.send_replace(());

        while let Some(frame) = codec.decode(&mut buf)? {
            match frame {
                Inbound::Line(line) => {
                    if server.handle_line(&session, &line).await == Flow::Quit {
                        return Ok(Hangup::Quit);
                    }
                }
                Inbound::Blank => {}
                Inbound::Unterminated => {
                    session.deliver(UNTERMINATED_NOTICE).await;
                }
                Inbound::Oversized => return Ok(Hangup::Flood),
            }
        }
    }
}

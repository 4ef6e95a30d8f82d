#![allow(dead_code)]

//! Test helpers for end-to-end tests.
//!
//! Provides a TestClient speaking the line protocol and a helper that
//! starts a server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use weeby_chat::{serve, ChatServer, Config};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server on 127.0.0.1 with an ephemeral port.
pub async fn start_server(config: Config) -> (SocketAddr, Arc<ChatServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(ChatServer::new(config));
    tokio::spawn(serve(listener, Arc::clone(&server)));
    (addr, server)
}

/// Poll `check` until it holds or the default timeout passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Test client for connecting to the chat server.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect to the server at the given address.
    pub async fn connect(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Connect, wait for the welcome banner and log in as `name`.
    pub async fn login(addr: SocketAddr, name: &str) -> Result<Self, std::io::Error> {
        let mut client = Self::connect(addr).await?;
        client.recv_until("Login?").await?;
        client.send_line(name).await?;
        client.recv_until(&format!("Welcome {}!", name)).await?;
        Ok(client)
    }

    /// Send raw bytes to the server.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        self.writer.write_all(data).await?;
        self.writer.flush().await
    }

    /// Send a line terminated with `\r\n`.
    pub async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.send_raw(format!("{}\r\n", line).as_bytes()).await
    }

    /// Receive one line (without its `\n`); None at end of stream.
    pub async fn recv_line(&mut self) -> Result<Option<String>, std::io::Error> {
        let mut line = String::new();
        let read = timeout(DEFAULT_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "recv timed out"))??;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches('\n').to_string()))
    }

    /// Receive lines until one contains `pattern`; returns that line.
    pub async fn recv_until(&mut self, pattern: &str) -> Result<String, std::io::Error> {
        loop {
            match self.recv_line().await? {
                Some(line) if line.contains(pattern) => return Ok(line),
                Some(_) => continue,
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("stream ended before {:?}", pattern),
                    ))
                }
            }
        }
    }

    /// Read until the server closes the connection.
    pub async fn recv_to_end(&mut self) -> Result<Vec<String>, std::io::Error> {
        let mut lines = Vec::new();
        while let Some(line) = self.recv_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }
}

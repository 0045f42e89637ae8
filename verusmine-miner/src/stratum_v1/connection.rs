//! TCP connection management with line-delimited I/O.
//!
//! Stratum v1 uses newline-delimited JSON over TCP. This module provides
//! a wrapper around tokio's TCP stream that handles buffered reading and
//! writing of complete JSON-RPC messages, with a hard 64 KiB cap on line
//! length. The [`Transport`] trait abstracts message I/O, allowing
//! channel-based mocks for deterministic testing.

use async_trait::async_trait;

use super::error::{StratumError, StratumResult};
use super::messages::JsonRpcMessage;
use crate::tracing::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Hard limit on a single protocol line; anything longer disconnects.
const MAX_LINE: usize = 64 * 1024;

/// Message-level I/O for Stratum protocol.
///
/// Abstracts reading and writing JSON-RPC messages so the client can
/// run over TCP (production) or channels (tests).
#[async_trait]
pub trait Transport: Send {
    /// Read one complete JSON-RPC message.
    ///
    /// Returns `None` on clean connection close (EOF).
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>>;

    /// Write a JSON-RPC message.
    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()>;
}

/// Buffered TCP connection for Stratum protocol.
///
/// Wraps a TCP stream with buffered readers/writers optimized for
/// line-delimited JSON messages. Messages are automatically serialized
/// and deserialized, with newlines added/stripped.
pub struct Connection {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages
    writer: BufWriter<OwnedWriteHalf>,

    /// Line buffer for reading messages
    line_buf: String,
}

impl Connection {
    /// Create a new connection from a TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        // Shares wait on submit round-trips; trade bandwidth for latency.
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();

        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::with_capacity(4096),
        }
    }

    /// Connect to a Stratum pool.
    pub async fn connect(host: &str, port: u16) -> StratumResult<Self> {
        debug!(host, port, "Connecting to pool");

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StratumError::ConnectionFailed(e.to_string()))?;

        debug!("Connected to pool");

        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for Connection {
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>> {
        loop {
            // The line buffer is only cleared once a complete line has
            // been consumed: if this future is dropped mid-read (the
            // client races reads against submit commands), the partial
            // line stays buffered and is completed by the next call.
            //
            // A reader capped just above the line limit turns a hostile
            // or corrupt peer into a LineTooLong instead of unbounded
            // buffering.
            let mut limited = (&mut self.reader).take((MAX_LINE + 1) as u64);
            let n = limited
                .read_line(&mut self.line_buf)
                .await
                .map_err(StratumError::Io)?;

            if n == 0 {
                // EOF - connection closed
                return Ok(None);
            }

            if self.line_buf.len() > MAX_LINE {
                self.line_buf.clear();
                return Err(StratumError::LineTooLong);
            }

            if self.line_buf.trim().is_empty() {
                // Empty line, skip and read next
                self.line_buf.clear();
                continue;
            }

            trace!(rx = %self.line_buf.trim(), "Received message");

            let msg = serde_json::from_str(self.line_buf.trim()).map_err(|e| {
                StratumError::InvalidMessage(format!(
                    "Failed to parse JSON: {e}, line: {}",
                    self.line_buf.trim()
                ))
            });
            self.line_buf.clear();

            return msg.map(Some);
        }
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()> {
        let json = serde_json::to_string(msg)?;
        trace!(tx = %json, "Sending message");

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Channel-based transport for deterministic testing.
///
/// Backed by tokio mpsc channels rather than TCP. Create a pair with
/// [`MockTransport::pair()`]; the transport is the client's side, the
/// handle is the test's side.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage>,
    tx: tokio::sync::mpsc::UnboundedSender<JsonRpcMessage>,
}

/// Test-side handle for a [`MockTransport`].
///
/// Use `send()` to feed messages to the client and `recv()` to read
/// messages the client wrote.
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: tokio::sync::mpsc::UnboundedSender<JsonRpcMessage>,
    rx: tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a linked (transport, handle) pair.
    pub fn pair() -> (Self, MockTransportHandle) {
        let (client_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, client_rx) = tokio::sync::mpsc::unbounded_channel();

        let transport = MockTransport {
            rx: client_rx,
            tx: client_tx,
        };
        let handle = MockTransportHandle {
            tx: handle_tx,
            rx: handle_rx,
        };
        (transport, handle)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>> {
        match self.rx.recv().await {
            Some(msg) => Ok(Some(msg)),
            None => Ok(None),
        }
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Send a message to the client.
    pub fn send(&self, msg: JsonRpcMessage) {
        self.tx.send(msg).expect("transport dropped");
    }

    /// Receive a message the client wrote.
    pub async fn recv(&mut self) -> JsonRpcMessage {
        self.rx.recv().await.expect("transport dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn message_roundtrip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket);
            while let Ok(Some(msg)) = conn.read_message().await {
                conn.write_message(&msg).await.unwrap();
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        let request = JsonRpcMessage::request(1, "test.method", json!(["param1", "param2"]));
        conn.write_message(&request).await.unwrap();

        let response = conn.read_message().await.unwrap().unwrap();
        assert_eq!(response.id(), Some(1));
        assert_eq!(response.method(), Some("test.method"));
    }

    #[tokio::test]
    async fn overlong_line_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut half = socket;
            let garbage = vec![b'a'; MAX_LINE + 512];
            tokio::io::AsyncWriteExt::write_all(&mut half, &garbage)
                .await
                .unwrap();
            tokio::io::AsyncWriteExt::write_all(&mut half, b"\n")
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);
        match conn.read_message().await {
            Err(StratumError::LineTooLong) => {}
            other => panic!("expected LineTooLong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_lines_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::io::AsyncWriteExt::write_all(
                &mut socket,
                b"\n\n{\"id\":null,\"method\":\"m\",\"params\":[]}\n",
            )
            .await
            .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);
        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg.method(), Some("m"));
    }
}

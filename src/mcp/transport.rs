//! MCP transport layer implementations.
//!
//! A transport turns some byte stream into a [`MessageChannel`]: an ordered
//! stream of inbound messages plus a [`MessageSink`] for outbound ones. The
//! stdio transport lives here; the SSE transport is built in `crate::http`
//! on top of [`MessageChannel::pair`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Longest accepted line on a line-delimited transport.
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// Default outbound queue depth.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default ceiling for delivering one outbound message.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A message that can be sent or received.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }
}

/// Parse one frame into a message, classifying it by which fields are present.
pub fn parse_message(text: &str) -> std::result::Result<Message, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "message must be a JSON object".to_string())?;

    let has_method = object.contains_key("method");
    let has_id = object.get("id").is_some_and(|id| !id.is_null());

    let message = if has_method && has_id {
        Message::Request(serde_json::from_value(value).map_err(|e| e.to_string())?)
    } else if has_method {
        Message::Notification(serde_json::from_value(value).map_err(|e| e.to_string())?)
    } else if object.contains_key("result") || object.contains_key("error") {
        Message::Response(serde_json::from_value(value).map_err(|e| e.to_string())?)
    } else {
        return Err("message is neither a request, notification nor response".to_string());
    };

    Ok(message)
}

/// Outbound half of a session channel.
///
/// Every failed or timed-out delivery is reported as [`Error::ChannelClosed`].
#[derive(Debug, Clone)]
pub struct MessageSink {
    tx: mpsc::Sender<Message>,
    send_timeout: Duration,
}

impl MessageSink {
    pub fn new(tx: mpsc::Sender<Message>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }

    /// Queue a message for delivery.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Resolves once the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An established bidirectional message stream for one client.
#[derive(Debug)]
pub struct MessageChannel {
    pub incoming: mpsc::Receiver<Message>,
    pub sink: MessageSink,
}

/// The far end of an in-memory [`MessageChannel`].
#[derive(Debug)]
pub struct ChannelPeer {
    /// Messages sent here arrive on the channel's `incoming`.
    pub tx: mpsc::Sender<Message>,
    /// Messages written to the channel's sink arrive here.
    pub rx: mpsc::Receiver<Message>,
}

impl MessageChannel {
    /// Create an in-memory channel and the peer that drives it.
    pub fn pair(capacity: usize, send_timeout: Duration) -> (Self, ChannelPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let channel = Self {
            incoming: in_rx,
            sink: MessageSink::new(out_tx, send_timeout),
        };
        let peer = ChannelPeer {
            tx: in_tx,
            rx: out_rx,
        };
        (channel, peer)
    }
}

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send {
    /// Start the transport, returning the channel for its one session.
    async fn start(&mut self) -> Result<MessageChannel>;

    /// Stop the transport.
    async fn stop(&mut self) -> Result<()>;
}

/// Newline-delimited JSON over any async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    capacity: usize,
    send_timeout: Duration,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

/// Stdio transport for MCP.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Create a transport over the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            capacity: DEFAULT_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            reader_task: None,
            writer_task: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<MessageChannel> {
        let (reader, writer) = match (self.reader.take(), self.writer.take()) {
            (Some(reader), Some(writer)) => (reader, writer),
            _ => return Err(Error::Internal("transport already started".to_string())),
        };

        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(self.capacity);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(self.capacity);
        let sink = MessageSink::new(outgoing_tx, self.send_timeout);

        // Parse errors are answered on the outbound lane directly.
        let replies = sink.clone();
        self.reader_task = Some(tokio::spawn(async move {
            let mut lines =
                FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

            while let Some(frame) = lines.next().await {
                let reply = match frame {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!("Received: {}", trimmed);

                        match parse_message(trimmed) {
                            Ok(message) => {
                                if incoming_tx.send(message).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                            Err(e) => {
                                warn!("Failed to parse message: {}", e);
                                JsonRpcResponse::parse_error(e)
                            }
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        warn!("Discarding message longer than {} bytes", MAX_LINE_LENGTH);
                        JsonRpcResponse::parse_error("message exceeds maximum length")
                    }
                    Err(LinesCodecError::Io(e)) => {
                        error!("Error reading input: {}", e);
                        break;
                    }
                };

                if replies.send(Message::Response(reply)).await.is_err() {
                    break;
                }
            }

            debug!("Input closed, stopping transport reader");
        }));

        self.writer_task = Some(tokio::spawn(async move {
            let mut frames = FramedWrite::new(writer, LinesCodec::new());

            while let Some(message) = outgoing_rx.recv().await {
                match message.to_json() {
                    Ok(line) => {
                        trace!("Sending: {}", line);
                        if let Err(e) = frames.send(line).await {
                            error!("Error writing output: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error serializing message: {}", e);
                    }
                }
            }

            debug!("Output closed, stopping transport writer");
        }));

        Ok(MessageChannel {
            incoming: incoming_rx,
            sink,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        // Let queued output drain once every sink clone is gone.
        if let Some(writer) = self.writer_task.take() {
            if tokio::time::timeout(Duration::from_secs(1), writer)
                .await
                .is_err()
            {
                debug!("Transport writer still busy at shutdown");
            }
        }
        Ok(())
    }
}

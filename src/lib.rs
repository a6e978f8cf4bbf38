#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod audio;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use audio::{
    AudioFrame, CaptureDevice, CaptureEncoder, CaptureFeed, CaptureFormat, ChannelPlaybackSink,
    ManualClock, MonotonicClock, NullSink, PlaybackClock, PlaybackCommand, PlaybackScheduler,
    PlaybackSink, PlaybackUnit, PushCaptureDevice, VolumeMeter,
};
#[cfg(feature = "cpal")]
pub use audio::{CpalCaptureDevice, CpalPlaybackSink};
pub use error::{Error, Result, ServerError};
pub use protocol::client_events::ClientMessage;
pub use protocol::models::{
    AudioFormat, Blob, Content, FunctionCall, FunctionDeclaration, FunctionResponse,
    INPUT_SAMPLE_RATE, Modality, OUTPUT_SAMPLE_RATE, Part, Role, SetupConfig, ToolDeclaration,
};
pub use protocol::server_events::ServerEvent;
pub use sdk::{
    AgentMode, Channel, Connector, EventHandlers, EventStream, LiveAgent, LiveBuilder, LiveConfig,
    Message, Session, SessionEvent, SessionState, SessionView, Speaker, Suggestion,
    ToolDispatcher, ToolInvocation, TranscriptAssembler, Transport,
};

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use transport::ws::WsStream;

use crate::protocol::server_events::parse_server_frame;

const TRACE_LOG_MAX_BYTES: usize = 1024;
const MAX_MEDIA_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// WebSocket client for the live inference service.
///
/// One inbound frame can carry several events; they are queued and handed out
/// one at a time, in order.
#[must_use]
pub struct LiveClient {
    stream: WsStream,
    pending: VecDeque<ServerEvent>,
    closed: bool,
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl LiveClient {
    /// Connect to the service. `base_url` overrides the default endpoint.
    ///
    /// # Errors
    /// Returns an error if the key is empty, the URL is invalid or the
    /// handshake fails.
    pub async fn connect(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        let stream = transport::ws::connect(api_key, base_url).await?;
        Ok(Self {
            stream,
            pending: VecDeque::new(),
            closed: false,
        })
    }

    /// Validate, serialize and send one message.
    ///
    /// # Errors
    /// Returns an error if validation or serialization fails or the socket is gone.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = encode_client_message(message)?;
        self.stream.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    /// Receive the next server event. A close frame yields
    /// [`ServerEvent::Closed`] once, then `None`.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] for an undecodable frame (the connection is
    /// still usable) or a transport error.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.closed {
                return Ok(None);
            }
            let Some(frame) = self.stream.next().await else {
                self.closed = true;
                return Ok(None);
            };
            match frame? {
                WsMessage::Text(text) => self.queue_frame(text.as_str())?,
                WsMessage::Binary(bytes) => {
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|e| Error::Protocol(format!("binary frame is not UTF-8: {e}")))?;
                    self.queue_frame(text)?;
                }
                WsMessage::Close(frame) => {
                    tracing::info!("WebSocket connection closed by server");
                    self.closed = true;
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_string())
                    });
                    return Ok(Some(ServerEvent::Closed { code, reason }));
                }
                WsMessage::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.send(WsMessage::Pong(payload)).await?;
                }
                _ => (),
            }
        }
    }

    fn queue_frame(&mut self, text: &str) -> Result<()> {
        tracing::trace!("Received frame: {}", safe_truncate(text, TRACE_LOG_MAX_BYTES));
        let events = decode_frame(text)?;
        self.pending.extend(events);
        Ok(())
    }

    /// Close the socket politely.
    ///
    /// # Errors
    /// Returns an error if the close frame cannot be sent.
    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stream.close(None).await?;
        }
        Ok(())
    }

    /// Split the client into a sender and a receiver for concurrent usage.
    pub fn split(self) -> (LiveSender, LiveReceiver) {
        let (write, read) = self.stream.split();
        (LiveSender { write }, LiveReceiver { read })
    }
}

fn decode_frame(text: &str) -> Result<Vec<ServerEvent>> {
    parse_server_frame(text).map_err(|err| {
        tracing::warn!("Undecodable server frame: {err}");
        Error::Protocol(err.to_string())
    })
}

fn encode_client_message(message: &ClientMessage) -> Result<String> {
    validate_client_message(message)?;
    let json = serde_json::to_string(message)?;
    tracing::trace!(
        kind = message.kind(),
        "Sending message: {}",
        safe_truncate(&json, TRACE_LOG_MAX_BYTES)
    );
    Ok(json)
}

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

/// The sending half of a split `LiveClient`.
pub struct LiveSender {
    write: futures::stream::SplitSink<WsStream, WsMessage>,
}

impl std::fmt::Debug for LiveSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSender").finish_non_exhaustive()
    }
}

impl LiveSender {
    /// # Errors
    /// Returns an error if validation, serialization or sending fails.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = encode_client_message(message)?;
        self.write.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }
}

/// The receiving half of a split `LiveClient`.
pub struct LiveReceiver {
    read: futures::stream::SplitStream<WsStream>,
}

impl std::fmt::Debug for LiveReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReceiver").finish_non_exhaustive()
    }
}

impl LiveReceiver {
    /// Stream of decoded events. Errors are preserved; control frames are
    /// skipped.
    #[must_use]
    pub fn try_into_stream(self) -> BoxStream<'static, Result<ServerEvent>> {
        self.read
            .map(|res| res.map_err(Error::from))
            .flat_map(|res| {
                let batch: Vec<Result<ServerEvent>> = match res {
                    Ok(WsMessage::Text(text)) => match decode_frame(text.as_str()) {
                        Ok(events) => events.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Ok(WsMessage::Close(frame)) => vec![Ok(ServerEvent::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default(),
                    })],
                    Ok(_) => Vec::new(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(batch)
            })
            .boxed()
    }
}

/// Reject messages the service would refuse, before they hit the wire.
///
/// # Errors
/// Returns [`Error::InvalidClientMessage`] describing the first problem found.
#[allow(clippy::result_large_err)]
pub fn validate_client_message(message: &ClientMessage) -> Result<()> {
    match message {
        ClientMessage::Setup(setup) => {
            if setup.model.trim().is_empty() {
                return Err(Error::InvalidClientMessage("setup.model is empty".to_string()));
            }
            for tool in &setup.tools {
                for decl in &tool.function_declarations {
                    if decl.name.is_empty() {
                        return Err(Error::InvalidClientMessage(
                            "function declaration without a name".to_string(),
                        ));
                    }
                }
            }
        }
        ClientMessage::RealtimeInput(input) => {
            if input.media_chunks.is_empty() {
                return Err(Error::InvalidClientMessage(
                    "realtimeInput has no media chunks".to_string(),
                ));
            }
            for chunk in &input.media_chunks {
                AudioFormat::from_mime_type(&chunk.mime_type)
                    .ok_or_else(|| {
                        Error::InvalidClientMessage(format!(
                            "unsupported mime type {}",
                            chunk.mime_type
                        ))
                    })?
                    .validate()?;
                let size = estimate_base64_decoded_len(&chunk.data)?;
                if size > MAX_MEDIA_CHUNK_BYTES {
                    return Err(Error::InvalidClientMessage(format!(
                        "media chunk exceeds 15MB ({size} bytes)",
                    )));
                }
            }
        }
        ClientMessage::ClientContent(content) => {
            let has_text = content
                .turns
                .iter()
                .flat_map(|turn| &turn.parts)
                .any(|part| part.text.as_deref().is_some_and(|t| !t.trim().is_empty()));
            if !has_text {
                return Err(Error::InvalidClientMessage(
                    "clientContent carries no text".to_string(),
                ));
            }
        }
        ClientMessage::ToolResponse(response) => {
            if response.function_responses.is_empty() {
                return Err(Error::InvalidClientMessage(
                    "toolResponse has no function responses".to_string(),
                ));
            }
            if response.function_responses.iter().any(|r| r.id.is_empty()) {
                return Err(Error::InvalidClientMessage(
                    "toolResponse without a call id".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn estimate_base64_decoded_len(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidClientMessage(
            "media chunk has invalid base64 length".to_string(),
        ));
    }

    let mut padding = 0;
    let mut seen_padding = false;
    for &b in bytes {
        if b == b'=' {
            seen_padding = true;
            padding += 1;
            continue;
        }
        if seen_padding {
            return Err(Error::InvalidClientMessage(
                "media chunk has invalid base64 padding".to_string(),
            ));
        }
        if !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/') {
            return Err(Error::InvalidClientMessage(
                "media chunk has invalid base64 character".to_string(),
            ));
        }
    }

    if padding > 2 {
        return Err(Error::InvalidClientMessage(
            "media chunk has invalid base64 padding length".to_string(),
        ));
    }

    Ok(bytes.len() / 4 * 3 - padding)
}

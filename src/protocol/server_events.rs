use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::models::{ArbitraryJson, Content, FunctionCall, Transcription};
use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Raw inbound frame. One frame may carry several logical events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallMessage>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

/// Normalized inbound event, in the order the session must process it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Base64 PCM chunk with its announced mime type.
    AudioChunk { mime_type: String, data: String },
    /// Text part of a model turn (text modality or inline commentary).
    ModelText { text: String },
    InputTranscription { text: String },
    OutputTranscription { text: String },
    TurnComplete,
    Interrupted,
    ToolCall { calls: Vec<FunctionCall> },
    ToolCallCancellation { ids: Vec<String> },
    GoAway { time_left: Option<String> },
    /// The connection was closed by the peer.
    Closed { code: Option<u16>, reason: String },
    Error { error: ServerError },
    Unknown(ArbitraryJson),
}

impl ServerEvent {
    /// Wire-level name, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setupComplete",
            Self::AudioChunk { .. } => "audioChunk",
            Self::ModelText { .. } => "modelText",
            Self::InputTranscription { .. } => "inputTranscription",
            Self::OutputTranscription { .. } => "outputTranscription",
            Self::TurnComplete => "turnComplete",
            Self::Interrupted => "interrupted",
            Self::ToolCall { .. } => "toolCall",
            Self::ToolCallCancellation { .. } => "toolCallCancellation",
            Self::GoAway { .. } => "goAway",
            Self::Closed { .. } => "closed",
            Self::Error { .. } => "error",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl ServerMessage {
    /// Flatten a frame into events. Transcriptions and audio come before the
    /// turn signals of the same frame so a trailing `turnComplete` flushes
    /// text that arrived alongside it.
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }
        if let Some(content) = self.server_content {
            push_content_events(content, &mut events);
        }
        if let Some(call) = self.tool_call.filter(|c| !c.function_calls.is_empty()) {
            events.push(ServerEvent::ToolCall {
                calls: call.function_calls,
            });
        }
        if let Some(cancel) = self.tool_call_cancellation {
            events.push(ServerEvent::ToolCallCancellation { ids: cancel.ids });
        }
        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }
        if let Some(error) = self.error {
            events.push(ServerEvent::Error { error });
        }
        events
    }
}

fn push_content_events(content: ServerContent, events: &mut Vec<ServerEvent>) {
    if let Some(text) = non_empty(content.input_transcription.and_then(|t| t.text)) {
        events.push(ServerEvent::InputTranscription { text });
    }
    if let Some(text) = non_empty(content.output_transcription.and_then(|t| t.text)) {
        events.push(ServerEvent::OutputTranscription { text });
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                events.push(ServerEvent::AudioChunk {
                    mime_type: blob.mime_type,
                    data: blob.data,
                });
            }
            if let Some(text) = non_empty(part.text) {
                events.push(ServerEvent::ModelText { text });
            }
        }
    }
    if content.interrupted {
        events.push(ServerEvent::Interrupted);
    }
    if content.turn_complete {
        events.push(ServerEvent::TurnComplete);
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}

/// Parse one inbound text frame. Well-formed JSON that matches no known
/// shape is preserved as [`ServerEvent::Unknown`].
///
/// # Errors
/// Returns an error if the frame is not valid JSON.
pub fn parse_server_frame(text: &str) -> crate::Result<Vec<ServerEvent>> {
    let value: Value = serde_json::from_str(text)?;
    match ServerMessage::deserialize(&value) {
        Ok(message) => {
            let events = message.into_events();
            if events.is_empty() {
                tracing::debug!("Unrecognized server frame");
                Ok(vec![ServerEvent::Unknown(value)])
            } else {
                Ok(events)
            }
        }
        Err(err) => {
            tracing::debug!("Failed to parse ServerMessage: {err}");
            Ok(vec![ServerEvent::Unknown(value)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_with_text_and_turn_complete_orders_text_first() {
        let frame = json!({
            "serverContent": {
                "outputTranscription": { "text": "Hi" },
                "turnComplete": true
            }
        })
        .to_string();
        let events = parse_server_frame(&frame).unwrap();
        assert_eq!(
            events,
            vec![
                ServerEvent::OutputTranscription { text: "Hi".into() },
                ServerEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn unknown_frame_is_preserved() {
        let events = parse_server_frame(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(matches!(events.as_slice(), [ServerEvent::Unknown(_)]));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_server_frame("{not json").is_err());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::models::{AudioFormat, Blob, Content, FunctionResponse, SetupConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Outbound messages. Externally tagged, so `Setup` goes out as
/// `{"setup": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Box<SetupConfig>),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// One encoded PCM frame.
    #[must_use]
    pub fn audio(format: AudioFormat, base64_pcm: String) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: format.mime_type(),
                data: base64_pcm,
            }],
        })
    }

    /// A complete user text turn.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content::user_text(text)],
            turn_complete: true,
        })
    }

    /// A context or instruction update that should not by itself trigger a reply.
    #[must_use]
    pub fn context_note(text: impl Into<String>) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content::user_text(text)],
            turn_complete: false,
        })
    }

    #[must_use]
    pub fn tool_response(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: id.into(),
                name: name.into(),
                response,
            }],
        })
    }

    /// Wire tag, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ClientContent(_) => "clientContent",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::modes::AgentMode;
use super::tools::Suggestion;
use super::transcript::Message;

/// Session lifecycle. `Closed` and `Error` stay put until the next connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Everything the application renders, published through a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub is_connected: bool,
    pub is_speaking: bool,
    pub messages: Vec<Message>,
    pub live_input_text: String,
    pub live_output_text: String,
    pub pending_suggestion: Option<Suggestion>,
    pub mode: AgentMode,
    /// Short, user-facing reason for the last failure.
    pub last_error: Option<String>,
}

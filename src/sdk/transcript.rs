//! Per-channel accumulation of streamed transcription deltas.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_MAX_TRANSCRIPT_CHARS: usize = 16_384;

/// Which side of the conversation a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Input,
    Output,
}

impl Channel {
    #[must_use]
    pub const fn speaker(self) -> Speaker {
        match self {
            Self::Input => Speaker::User,
            Self::Output => Speaker::Agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
    System,
}

/// One entry of the durable conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
}

impl Message {
    #[must_use]
    pub fn new(role: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            structured_data: None,
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Speaker::System, text)
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.structured_data = Some(data);
        self
    }
}

#[derive(Debug, Default)]
struct TranscriptBuffer {
    text: String,
    finalized: bool,
}

impl TranscriptBuffer {
    fn append(&mut self, delta: &str) {
        if self.finalized {
            self.text.clear();
            self.finalized = false;
        }
        self.text.push_str(delta);
    }

    fn take(&mut self) -> Option<String> {
        self.finalized = true;
        if self.text.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.text))
        }
    }

    fn clear(&mut self) {
        self.text.clear();
        self.finalized = false;
    }
}

/// Builds conversation messages out of transcription deltas.
///
/// Deltas are appended verbatim. A turn boundary flushes each non-empty
/// buffer (input first) and an interruption drops both without recording.
/// A buffer that reaches the character cap is flushed early.
#[derive(Debug)]
pub struct TranscriptAssembler {
    input: TranscriptBuffer,
    output: TranscriptBuffer,
    max_chars: usize,
}

impl Default for TranscriptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSCRIPT_CHARS)
    }
}

impl TranscriptAssembler {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            input: TranscriptBuffer::default(),
            output: TranscriptBuffer::default(),
            max_chars: max_chars.max(1),
        }
    }

    const fn buffer_mut(&mut self, channel: Channel) -> &mut TranscriptBuffer {
        match channel {
            Channel::Input => &mut self.input,
            Channel::Output => &mut self.output,
        }
    }

    /// Append a delta. Returns a message if the cap forced an early flush.
    pub fn append_delta(&mut self, channel: Channel, delta: &str) -> Option<Message> {
        if delta.is_empty() {
            return None;
        }
        let max_chars = self.max_chars;
        let buffer = self.buffer_mut(channel);
        buffer.append(delta);
        if buffer.text.chars().count() < max_chars {
            return None;
        }
        tracing::debug!(?channel, max_chars, "Transcript buffer full, flushing early");
        buffer
            .take()
            .map(|text| Message::new(channel.speaker(), text))
    }

    /// Flush both buffers at a turn boundary.
    pub fn turn_complete(&mut self) -> Vec<Message> {
        [Channel::Input, Channel::Output]
            .into_iter()
            .filter_map(|channel| {
                self.buffer_mut(channel)
                    .take()
                    .map(|text| Message::new(channel.speaker(), text))
            })
            .collect()
    }

    /// Drop partial text on both channels without recording it.
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    /// Text accumulated so far for the current turn.
    #[must_use]
    pub fn live_text(&self, channel: Channel) -> &str {
        let buffer = match channel {
            Channel::Input => &self.input,
            Channel::Output => &self.output,
        };
        if buffer.finalized { "" } else { &buffer.text }
    }
}

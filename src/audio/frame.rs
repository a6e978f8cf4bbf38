use std::time::{Duration, Instant};

use super::pcm;
use crate::protocol::client_events::ClientMessage;
use crate::protocol::models::AudioFormat;

/// Samples per hardware buffer fill.
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// One captured buffer, quantized to 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
    pub captured_at: Instant,
}

impl AudioFrame {
    #[must_use]
    pub fn from_float(raw: &[f32], sample_rate_hz: u32) -> Self {
        Self {
            samples: pcm::float_to_pcm16(raw),
            sample_rate_hz,
            captured_at: Instant::now(),
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate_hz))
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        AudioFormat {
            rate: self.sample_rate_hz,
        }
    }

    /// Consume the frame into its wire message.
    #[must_use]
    pub fn into_message(self) -> ClientMessage {
        ClientMessage::audio(self.format(), pcm::encode_base64(&self.samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::client_events::RealtimeInput;

    #[test]
    fn frame_becomes_realtime_input() {
        let frame = AudioFrame::from_float(&[0.0; 1600], 16_000);
        assert_eq!(frame.duration(), Duration::from_millis(100));
        match frame.into_message() {
            ClientMessage::RealtimeInput(RealtimeInput { media_chunks }) => {
                assert_eq!(media_chunks.len(), 1);
                assert_eq!(media_chunks[0].mime_type, "audio/pcm;rate=16000");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

use serde::{Deserialize, Serialize};

/// Capture rate expected by the service for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the PCM the service streams back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Fixed wire format: 16-bit little-endian mono PCM at a given rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
}

impl AudioFormat {
    #[must_use]
    pub const fn pcm_16khz() -> Self {
        Self { rate: INPUT_SAMPLE_RATE }
    }

    #[must_use]
    pub const fn pcm_24khz() -> Self {
        Self { rate: OUTPUT_SAMPLE_RATE }
    }

    /// Mime type announced alongside each media chunk.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{PCM_MIME_PREFIX};rate={}", self.rate)
    }

    /// Parse a mime type such as `audio/pcm;rate=24000`. A bare `audio/pcm`
    /// falls back to the output rate.
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';').map(str::trim);
        if parts.next()? != PCM_MIME_PREFIX {
            return None;
        }
        let rate = parts
            .find_map(|p| p.strip_prefix("rate="))
            .map_or(Some(OUTPUT_SAMPLE_RATE), |r| r.parse().ok())?;
        if rate == 0 {
            return None;
        }
        Some(Self { rate })
    }

    /// # Errors
    /// Returns an error if the rate is zero.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.rate == 0 {
            return Err(crate::error::Error::InvalidClientMessage(
                "audio/pcm rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_round_trip() {
        let fmt = AudioFormat::pcm_16khz();
        assert_eq!(fmt.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(AudioFormat::from_mime_type(&fmt.mime_type()), Some(fmt));
    }

    #[test]
    fn bare_pcm_defaults_to_output_rate() {
        assert_eq!(AudioFormat::from_mime_type("audio/pcm"), Some(AudioFormat::pcm_24khz()));
        assert_eq!(AudioFormat::from_mime_type("audio/ogg"), None);
        assert_eq!(AudioFormat::from_mime_type("audio/pcm;rate=abc"), None);
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload reported by the remote service, either inside a message body
/// or as the close reason of the underlying connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    pub code: Option<u16>,
    pub message: String,
    pub status: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    /// The capture device could not be acquired (permission or hardware).
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The transport failed or the service went away. Terminal for the session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A malformed or unrecognized message. Logged and skipped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session was torn down by a local `disconnect()`. Returned by
    /// commands issued afterwards.
    #[error("Session cancelled")]
    Cancelled,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service error: {0:?}")]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Invalid client message: {0}")]
    InvalidClientMessage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the condition ends the session. Protocol errors are skipped,
    /// everything on the wire or device side is terminal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Protocol(_) | Self::InvalidClientMessage(_) | Self::Base64(_)
        )
    }

    /// Short reason string suitable for the application layer. Codec and wire
    /// detail stays in the logs.
    #[must_use]
    pub fn user_reason(&self) -> String {
        match self {
            Self::DeviceUnavailable(_) => "microphone unavailable".to_string(),
            Self::Cancelled => "disconnected".to_string(),
            Self::Api(err) => err.message.clone(),
            Self::Protocol(_) | Self::InvalidClientMessage(_) | Self::Base64(_) => {
                "unexpected message from service".to_string()
            }
            Self::Config(msg) => msg.clone(),
            _ => "connection lost".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_not_fatal() {
        assert!(!Error::Protocol("bad".into()).is_fatal());
        assert!(Error::Transport("gone".into()).is_fatal());
        assert!(Error::DeviceUnavailable("denied".into()).is_fatal());
        assert!(Error::Cancelled.is_fatal());
    }

    #[test]
    fn user_reason_hides_codec_detail() {
        let err = Error::Transport("tls handshake eof at byte 1234".into());
        assert_eq!(err.user_reason(), "connection lost");
    }
}

//! Error types for the tutor session

use thiserror::Error;

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a tutor session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// The service answered the initial prompt without the `OK` acknowledgement
    #[error("handshake rejected: {0:?}")]
    HandshakeRejected(String),

    /// Connection, send or receive failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Capture or playback device failure
    #[error("device error: {0}")]
    Device(String),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// A supervised flow died without returning an error
    #[error("flow failure: {0}")]
    Flow(String),

    /// Malformed inbound message
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the session can carry on after this error
    ///
    /// Synthesis and decode failures only affect one turn or one message;
    /// everything else tears the session down.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Synthesis(_) | Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Synthesis("quota".into()).is_recoverable());
        assert!(Error::Decode("bad json".into()).is_recoverable());
        assert!(!Error::Transport("closed".into()).is_recoverable());
        assert!(!Error::HandshakeRejected("Sorry".into()).is_recoverable());
        assert!(!Error::Device("no input device".into()).is_recoverable());
    }

    #[test]
    fn test_handshake_message_quotes_reply() {
        let err = Error::HandshakeRejected("Sorry, error".into());
        assert_eq!(err.to_string(), "handshake rejected: \"Sorry, error\"");
    }
}

use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the STOMP gateway.
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport: {0}")]
    Transport(String),

    #[error("bus: {0}")]
    Bus(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Frame-level protocol violations.
///
/// `MalformedFrame` is recoverable at the session level (an ERROR frame is
/// sent, the connection stays open). The other variants are fatal for the
/// connection or handshake.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame size exceeds configured limit ({limit} bytes)")]
    BufferOverflow { limit: usize },

    #[error("unsupported STOMP version: {0}")]
    UnsupportedVersion(String),

    #[error("decoder reused while holding a partial frame")]
    DecoderReuse,
}

impl ProtocolError {
    /// Whether the session must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::MalformedFrame(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_recoverable() {
        assert!(!ProtocolError::MalformedFrame("x".into()).is_fatal());
        assert!(ProtocolError::BufferOverflow { limit: 10 }.is_fatal());
        assert!(ProtocolError::DecoderReuse.is_fatal());
    }
}

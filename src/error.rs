use thiserror::Error;

/// Failures raised by the realtime transport.
///
/// The receive loop only escalates the network class immediately; see
/// [`TransportError::is_network`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("timed out")]
    TimedOut,
    #[error("network unreachable: {0}")]
    Unreachable(String),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Lost connection, timeout or no route to the service.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost | TransportError::TimedOut | TransportError::Unreachable(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use std::io::ErrorKind;
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionLost,
            WsError::Io(io) => match io.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::TimedOut,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => TransportError::ConnectionLost,
                _ => TransportError::Unreachable(io.to_string()),
            },
            WsError::Tls(tls) => TransportError::Unreachable(tls.to_string()),
            WsError::Http(response) => {
                TransportError::Handshake(format!("HTTP {}", response.status()))
            }
            WsError::HttpFormat(e) => TransportError::Handshake(e.to_string()),
            WsError::Url(e) => TransportError::Handshake(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Why an outbound message did not reach the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio payload is empty")]
    Empty,
    #[error("unsupported audio container: {0}")]
    UnsupportedContainer(String),
    #[error("failed to download audio: {0}")]
    Download(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("persist failed: {0}")]
    Persist(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_class() {
        assert!(TransportError::ConnectionLost.is_network());
        assert!(TransportError::TimedOut.is_network());
        assert!(TransportError::Unreachable("dns".into()).is_network());
        assert!(!TransportError::Protocol("bad frame".into()).is_network());
        assert!(!TransportError::Handshake("HTTP 401".into()).is_network());
    }

    #[test]
    fn io_errors_map_to_network_class() {
        let err = tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(TransportError::from(err), TransportError::ConnectionLost);
    }
}

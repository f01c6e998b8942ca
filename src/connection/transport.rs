use async_trait::async_trait;

use crate::error::TransportError;

/// Close code for a clean server-side shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code sent on manual disconnect
pub const GOING_AWAY: u16 = 1001;

/// Handshake shapes the service has been seen to accept.
///
/// Tried in order by the analysis flow until one yields `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeVariant {
    /// Bearer auth, `X-Model` and `Content-Type` headers, `?model=`
    Standard,
    /// Bearer auth only, `?model=`
    Minimal,
    /// Bearer auth, `?model=&format=json`
    QueryFormat,
}

impl HandshakeVariant {
    pub const ALL: [HandshakeVariant; 3] = [
        HandshakeVariant::Standard,
        HandshakeVariant::Minimal,
        HandshakeVariant::QueryFormat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HandshakeVariant::Standard => "standard",
            HandshakeVariant::Minimal => "minimal",
            HandshakeVariant::QueryFormat => "query-format",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping(Vec<u8>),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    /// Close frame with its code, if the peer sent one
    Close(Option<u16>),
}

#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportStream: Send {
    /// `None` once the stream has ended without a close frame
    async fn next(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// Both halves of one open transport
pub struct Transport {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

/// Opens transports to the realtime service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, variant: HandshakeVariant) -> Result<Transport, TransportError>;
}

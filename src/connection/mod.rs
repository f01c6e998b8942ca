//! Connection lifecycle: transport seam, state machine and the driver that
//! ties them to tokio tasks and timers.

pub mod connection;
pub mod state;
pub mod transport;
pub mod ws;

pub use connection::RealtimeConnection;
pub use state::{AttemptDecision, ConnectionState, ConnectionStatus, FailureAction, ReconnectPolicy};
pub use transport::{
    Connector, HandshakeVariant, InboundFrame, OutboundFrame, Transport, TransportSink,
    TransportStream, GOING_AWAY, NORMAL_CLOSURE,
};
pub use ws::WsConnector;

use crate::protocol::ServerEvent;

/// Consumes parsed server events, one at a time in arrival order.
///
/// Called from the connection's receive task; must not block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: ServerEvent);
}

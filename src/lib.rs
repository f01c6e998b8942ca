pub mod analysis;
pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod observer;
pub mod protocol;
pub mod session;
pub mod storage;

pub use analysis::{
    AnalysisAudio, AnalysisInput, AnalysisJob, AnalysisOutcome, AnalysisResult, Analyzer,
    AudioType, ResultSource,
};
pub use audio::{AudioCapture, AudioChunk, BufferCapture, CaptureConfig};
pub use config::Config;
pub use connection::{Connector, ConnectionStatus, HandshakeVariant, RealtimeConnection, WsConnector};
pub use error::{AudioError, SendError, StorageError, TransportError};
pub use http::{create_router, AppState};
pub use observer::{EngineListener, Notifier, NoopListener};
pub use protocol::{ClientEvent, ServerEvent, SessionConfiguration};
pub use session::{LiveSession, SessionConfig, SessionStats, TranscriptSegment};
pub use storage::{AnalysisRecord, InMemoryStorage, Storage};

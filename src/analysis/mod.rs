//! Reply parsing, result reconciliation and the post-hoc analysis flow.

pub mod analyzer;
pub mod audio_type;
pub mod dispatcher;
pub mod fallback;
pub mod parser;
pub mod request;

pub use analyzer::{
    AnalysisAudio, AnalysisInput, AnalysisJob, AnalysisOutcome, Analyzer, CancelHandle,
    FALLBACK_CONFIDENCE, REALTIME_CONFIDENCE,
};
pub use audio_type::AudioType;
pub use dispatcher::EventDispatcher;
pub use parser::{parse_response, strip_end_markers, ParsedResponse, ResponseFormat};
pub use request::{AnalysisRequest, AnalysisResult, Completion, ResponseOutcome, ResultSource};

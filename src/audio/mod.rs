pub mod capture;
pub mod chunk;
pub mod file;

pub use capture::{AudioCapture, BufferCapture, CaptureConfig};
pub use chunk::{encode_append_frames, pcm16_duration_secs, stereo_to_mono, AudioChunk};
pub use file::normalize_pcm16;

use base64::Engine;
use uuid::Uuid;

/// Linear PCM16 mono audio at a fixed sample rate.
///
/// Chunks are produced continuously by an [`AudioCapture`](super::AudioCapture)
/// and handed over to the engine, which base64-encodes and sends them as
/// `input_audio_buffer.append` messages. A chunk is never resent on its own.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Correlation id, also used as the append message's `event_id`
    pub id: Uuid,
    /// Raw samples (i16 PCM, mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Offset in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioChunk {
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            samples,
            sample_rate,
            timestamp_ms,
        }
    }

    /// Build a mono chunk from float samples in `[-1.0, 1.0]`, downmixing
    /// interleaved stereo when `channels == 2`.
    pub fn from_f32(samples: &[f32], channels: u16, sample_rate: u32, timestamp_ms: u64) -> Self {
        let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_pcm16(s)).collect();
        let mono = if channels == 2 { stereo_to_mono(&pcm) } else { pcm };
        Self::from_samples(mono, sample_rate, timestamp_ms)
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Little-endian PCM16 bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_le_bytes())
    }
}

pub fn f32_to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32767.0, 32767.0) as i16
}

/// Average interleaved `[L, R, L, R, ...]` into mono.
pub fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
        .collect()
}

/// Base64-encode `pcm` once and split it into append-sized frames of at most
/// `chunk_chars` characters.
///
/// Base64 output is ASCII, so splitting on byte offsets is always a valid
/// character boundary.
pub fn encode_append_frames(pcm: &[u8], chunk_chars: usize) -> Vec<String> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(pcm);
    if encoded.is_empty() {
        return Vec::new();
    }

    let chunk_chars = chunk_chars.max(1);
    encoded
        .as_bytes()
        .chunks(chunk_chars)
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .collect()
}

/// Seconds of audio in a PCM16 mono buffer.
pub fn pcm16_duration_secs(pcm: &[u8], sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    (pcm.len() / 2) as f64 / sample_rate as f64
}

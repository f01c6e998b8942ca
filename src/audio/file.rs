use crate::error::AudioError;
use hound::WavReader;
use std::io::Cursor;
use tracing::{info, warn};

/// Canonical WAV header size assumed when the container cannot be parsed.
pub const WAV_HEADER_LEN: usize = 44;

/// Turn an uploaded asset into raw little-endian PCM16.
///
/// A `RIFF` container is decoded with hound; if its header is not something
/// hound accepts, the fixed 44-byte header is stripped instead. Anything else
/// is assumed to already be raw PCM16.
pub fn normalize_pcm16(bytes: &[u8]) -> Result<Vec<u8>, AudioError> {
    if bytes.is_empty() {
        return Err(AudioError::Empty);
    }

    if !bytes.starts_with(b"RIFF") {
        return Ok(bytes.to_vec());
    }

    match decode_wav(bytes) {
        Ok(pcm) => Ok(pcm),
        Err(e) => {
            warn!("WAV header not decodable ({}), stripping {} bytes", e, WAV_HEADER_LEN);
            if bytes.len() <= WAV_HEADER_LEN {
                return Err(AudioError::UnsupportedContainer(
                    "RIFF container without audio data".to_string(),
                ));
            }
            Ok(bytes[WAV_HEADER_LEN..].to_vec())
        }
    }
}

fn decode_wav(bytes: &[u8]) -> Result<Vec<u8>, AudioError> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| AudioError::UnsupportedContainer(e.to_string()))?;

    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(AudioError::UnsupportedContainer(format!(
            "{}-bit {:?} samples",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AudioError::UnsupportedContainer(e.to_string()))?;

    let samples = if spec.channels == 2 {
        super::chunk::stereo_to_mono(&samples)
    } else {
        samples
    };

    info!(
        "Decoded WAV: {}Hz, {} channels, {} samples",
        spec.sample_rate,
        spec.channels,
        samples.len()
    );

    Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_pcm_passes_through() {
        let raw = vec![1u8, 2, 3, 4];
        assert_eq!(normalize_pcm16(&raw).unwrap(), raw);
    }

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(normalize_pcm16(&[]), Err(AudioError::Empty)));
    }

    #[test]
    fn malformed_riff_strips_fixed_header() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend(std::iter::repeat(0u8).take(WAV_HEADER_LEN - 4));
        bytes.extend([9u8, 8, 7, 6]);
        assert_eq!(normalize_pcm16(&bytes).unwrap(), vec![9, 8, 7, 6]);
    }
}

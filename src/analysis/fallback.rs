//! Deterministic placeholder results for when the realtime path fails.

use super::audio_type::AudioType;
use super::request::{AnalysisResult, ResultSource};

/// Time-of-day label for a local hour (0–23)
pub fn time_bucket(hour: u32) -> &'static str {
    match hour {
        6..=8 => "晨间",
        9..=11 => "上午",
        12..=13 => "午间",
        14..=17 => "下午",
        18..=21 => "晚间",
        _ => "夜间",
    }
}

/// Length label for a recording duration
pub fn duration_bucket(duration_secs: u32) -> &'static str {
    match duration_secs {
        0..=29 => "简短",
        30..=179 => "常规",
        180..=599 => "详细",
        _ => "长篇",
    }
}

/// Audio type guess from duration alone
pub fn duration_audio_type(duration_secs: u32) -> AudioType {
    match duration_secs {
        0..=14 => AudioType::HumanVoice,
        15..=59 => AudioType::Conversation,
        60..=299 => AudioType::HumanVoice,
        _ => AudioType::Conversation,
    }
}

pub fn placeholder_transcription(duration_secs: u32) -> String {
    format!("音频内容记录 ({}秒)", duration_secs)
}

/// Emoji summary for the duration bucket
pub fn summary(hour: u32, duration_secs: u32) -> String {
    let time = time_bucket(hour);
    let length = duration_bucket(duration_secs);
    match duration_secs {
        0..=14 => format!("🎤:{}语音", time),
        15..=59 => format!("💬:{}对话", time),
        60..=179 => format!("📝:{}录音", length),
        180..=599 => format!("🏢:{}会议", time),
        _ => format!("📞:{}通话", time),
    }
}

pub fn synthesize(hour: u32, duration_secs: u32) -> AnalysisResult {
    AnalysisResult {
        summary: summary(hour, duration_secs),
        transcription: placeholder_transcription(duration_secs),
        audio_type: duration_audio_type(duration_secs),
        source: ResultSource::Fallback,
    }
}

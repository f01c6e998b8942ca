//! Recovers `(summary, AudioType)` from the service's reply.
//!
//! The reply format drifts between model versions, so several layouts are
//! tried in priority order and the last one always succeeds.

use super::audio_type::{
    classify_any, classify_emoji, classify_environment, classify_text, is_short_emoji, AudioType,
};

/// End-of-turn markers the model sometimes leaks into its text
pub const END_MARKERS: &[&str] = &["<|EOT|>", "<|eot|>"];

/// Summary length limit for `emoji:summary` replies, in chars
pub const MAX_SUMMARY_CHARS: usize = 8;

/// Prefix length used when no layout is recognised
pub const FALLBACK_PREFIX_CHARS: usize = 12;

const EMPTY_SUMMARY: &str = "音频内容";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    EmojiSummary,
    StatusLine,
    Structured,
    LabeledField,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub summary: String,
    pub audio_type: AudioType,
    pub format: ResponseFormat,
}

pub fn strip_end_markers(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in END_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned.trim().to_string()
}

pub fn parse_response(text: &str) -> ParsedResponse {
    let cleaned = strip_end_markers(text);

    parse_emoji_summary(&cleaned)
        .or_else(|| parse_status_line(&cleaned))
        .or_else(|| parse_structured(&cleaned))
        .or_else(|| parse_labeled_field(&cleaned))
        .unwrap_or_else(|| parse_prefix(&cleaned))
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let idx = line.find([':', '：'])?;
    let sep_len = line[idx..].chars().next().map(char::len_utf8).unwrap_or(1);
    Some((line[..idx].trim(), line[idx + sep_len..].trim()))
}

fn emoji_line(line: &str) -> Option<ParsedResponse> {
    let line = line.trim();
    let line = line
        .strip_prefix("emoji:")
        .filter(|rest| rest.contains([':', '：']))
        .unwrap_or(line);
    let (emoji, summary) = split_label(line)?;
    if !is_short_emoji(emoji) || summary.is_empty() {
        return None;
    }

    let summary = clip(summary, MAX_SUMMARY_CHARS);
    let audio_type = classify_emoji(emoji).unwrap_or_else(|| classify_text(&summary));
    Some(ParsedResponse {
        summary: format!("{}:{}", emoji, summary),
        audio_type,
        format: ResponseFormat::EmojiSummary,
    })
}

fn parse_emoji_summary(text: &str) -> Option<ParsedResponse> {
    emoji_line(text).or_else(|| text.lines().find_map(emoji_line))
}

fn parse_status_line(text: &str) -> Option<ParsedResponse> {
    text.lines().find_map(|line| {
        let line = line.trim();
        let rest = line
            .strip_prefix("状态：")
            .or_else(|| line.strip_prefix("状态:"))?
            .trim();
        if rest.is_empty() {
            return None;
        }
        Some(ParsedResponse {
            summary: rest.to_string(),
            audio_type: classify_any(rest),
            format: ResponseFormat::StatusLine,
        })
    })
}

#[derive(Default)]
struct Fields<'a> {
    summary: Option<&'a str>,
    expression: Option<&'a str>,
    emotion: Option<&'a str>,
    feature: Option<&'a str>,
    sound: Option<&'a str>,
    count: usize,
}

fn collect_fields(text: &str) -> Fields<'_> {
    let mut fields = Fields::default();
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
        let Some((label, value)) = split_label(line) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let slot = match label {
            "总结" => &mut fields.summary,
            "表达" => &mut fields.expression,
            "情感" => &mut fields.emotion,
            "特征" => &mut fields.feature,
            "声音" => &mut fields.sound,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
            fields.count += 1;
        }
    }
    fields
}

fn parse_structured(text: &str) -> Option<ParsedResponse> {
    let fields = collect_fields(text);
    if fields.count < 2 {
        return None;
    }

    if let Some(summary) = fields.summary {
        let hints: Vec<&str> = [fields.expression, fields.emotion, fields.feature, Some(summary)]
            .into_iter()
            .flatten()
            .collect();
        return Some(ParsedResponse {
            summary: summary.to_string(),
            audio_type: classify_text(&hints.join(" ")),
            format: ResponseFormat::Structured,
        });
    }

    let sound = fields.sound?;
    let description = match fields.feature {
        Some(feature) => format!("{} {}", sound, feature),
        None => sound.to_string(),
    };
    Some(ParsedResponse {
        summary: sound.to_string(),
        audio_type: classify_environment(&description),
        format: ResponseFormat::Structured,
    })
}

fn after_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    [":", "："].iter().find_map(|sep| {
        let needle = format!("{}{}", label, sep);
        let idx = text.find(&needle)?;
        let rest = text[idx + needle.len()..].lines().next()?.trim();
        (!rest.is_empty()).then_some(rest)
    })
}

fn parse_labeled_field(text: &str) -> Option<ParsedResponse> {
    if let Some(summary) = after_label(text, "总结") {
        return Some(ParsedResponse {
            summary: summary.to_string(),
            audio_type: classify_text(summary),
            format: ResponseFormat::LabeledField,
        });
    }
    let sound = after_label(text, "声音")?;
    Some(ParsedResponse {
        summary: sound.to_string(),
        audio_type: classify_environment(sound),
        format: ResponseFormat::LabeledField,
    })
}

fn parse_prefix(text: &str) -> ParsedResponse {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let summary = if flat.is_empty() {
        EMPTY_SUMMARY.to_string()
    } else {
        clip(&flat, FALLBACK_PREFIX_CHARS)
    };
    ParsedResponse {
        summary,
        audio_type: classify_any(&flat),
        format: ResponseFormat::Prefix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_stripped() {
        assert_eq!(strip_end_markers(" 🎵:歌<|EOT|> "), "🎵:歌");
        assert_eq!(strip_end_markers("a<|eot|>"), "a");
    }

    #[test]
    fn emoji_summary_is_clipped() {
        let parsed = parse_response("💬:这是一段非常非常长的对话总结内容");
        assert_eq!(parsed.format, ResponseFormat::EmojiSummary);
        assert_eq!(parsed.summary, "💬:这是一段非常非常");
        assert_eq!(parsed.audio_type, AudioType::Conversation);
    }

    #[test]
    fn emoji_prefix_label_is_tolerated() {
        let parsed = parse_response("emoji:🌧️:雨声环境");
        assert_eq!(parsed.summary, "🌧️:雨声环境");
        assert_eq!(parsed.audio_type, AudioType::Nature);
    }

    #[test]
    fn emoji_line_inside_longer_reply() {
        let parsed = parse_response("分析完成\n🎤:独白练习");
        assert_eq!(parsed.summary, "🎤:独白练习");
        assert_eq!(parsed.audio_type, AudioType::HumanVoice);
    }

    #[test]
    fn unknown_emoji_falls_back_to_keywords() {
        let parsed = parse_response("🦄:钢琴演奏");
        assert_eq!(parsed.format, ResponseFormat::EmojiSummary);
        assert_eq!(parsed.audio_type, AudioType::Music);
    }

    #[test]
    fn empty_reply_still_has_summary() {
        let parsed = parse_response("<|EOT|>");
        assert_eq!(parsed.summary, EMPTY_SUMMARY);
        assert_eq!(parsed.format, ResponseFormat::Prefix);
    }
}

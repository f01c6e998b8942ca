use serde::{Deserialize, Serialize};

/// Category of a recording, derived from the service's free-text reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioType {
    HumanVoice,
    Music,
    Nature,
    Mechanical,
    Conversation,
    Singing,
    Noise,
    Unknown,
}

impl AudioType {
    pub fn display_name(&self) -> &'static str {
        match self {
            AudioType::HumanVoice => "人声",
            AudioType::Music => "音乐",
            AudioType::Nature => "自然音",
            AudioType::Mechanical => "机械音",
            AudioType::Conversation => "对话",
            AudioType::Singing => "歌声",
            AudioType::Noise => "噪音",
            AudioType::Unknown => "未知",
        }
    }
}

impl std::fmt::Display for AudioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

const VARIATION_SELECTOR: char = '\u{FE0F}';
const ZERO_WIDTH_JOINER: char = '\u{200D}';

/// Emoji table, keyed without variation selectors
const EMOJI_TYPES: &[(&str, AudioType)] = &[
    ("🎵", AudioType::Singing),
    ("🎶", AudioType::Singing),
    ("🏢", AudioType::Conversation),
    ("📞", AudioType::Conversation),
    ("💬", AudioType::Conversation),
    ("📢", AudioType::HumanVoice),
    ("📚", AudioType::HumanVoice),
    ("📖", AudioType::HumanVoice),
    ("🤫", AudioType::HumanVoice),
    ("🎤", AudioType::HumanVoice),
    ("🎙", AudioType::HumanVoice),
    ("📝", AudioType::HumanVoice),
    ("🌧", AudioType::Nature),
    ("🌪", AudioType::Nature),
    ("🌊", AudioType::Nature),
    ("🌨", AudioType::Nature),
    ("❄", AudioType::Nature),
    ("☀", AudioType::Nature),
    ("🐦", AudioType::Nature),
    ("🔧", AudioType::Mechanical),
    ("⚙", AudioType::Mechanical),
    ("🚗", AudioType::Mechanical),
    ("✈", AudioType::Mechanical),
    ("🎹", AudioType::Music),
    ("🎸", AudioType::Music),
    ("🎻", AudioType::Music),
    ("🥁", AudioType::Music),
    ("🔊", AudioType::Noise),
    ("😊", AudioType::Conversation),
    ("😠", AudioType::Conversation),
    ("😡", AudioType::Conversation),
    ("🤧", AudioType::Conversation),
    ("😤", AudioType::Conversation),
    ("😮", AudioType::Conversation),
    ("😯", AudioType::Conversation),
    ("😲", AudioType::Conversation),
    ("😱", AudioType::Conversation),
    ("🤔", AudioType::Conversation),
    ("😎", AudioType::Conversation),
    ("🥺", AudioType::Conversation),
    ("😭", AudioType::Conversation),
    ("🤭", AudioType::Conversation),
    ("🙄", AudioType::Conversation),
];

/// Keyword rules, first match wins
const KEYWORD_TYPES: &[(&[&str], AudioType)] = &[
    (&["唱", "歌", "sing", "song"], AudioType::Singing),
    (
        &["会议", "对话", "聊天", "交谈", "通话", "讨论", "meeting", "chat", "conversation"],
        AudioType::Conversation,
    ),
    (
        &["演讲", "发言", "朗读", "朗诵", "讲话", "speech", "lecture"],
        AudioType::HumanVoice,
    ),
    (
        &["雨", "风声", "雷", "雪", "海浪", "流水", "鸟", "自然", "rain", "wind", "thunder"],
        AudioType::Nature,
    ),
    (
        &["音乐", "乐器", "钢琴", "吉他", "music", "piano", "guitar"],
        AudioType::Music,
    ),
    (
        &["机器", "设备", "引擎", "马达", "machine", "engine"],
        AudioType::Mechanical,
    ),
    (&["噪", "杂", "嘈", "吵", "noise"], AudioType::Noise),
];

/// Rules for ambient-sound descriptions. Broader than `KEYWORD_TYPES`:
/// single characters such as 机, 电 and 车 are enough here because a voice
/// reading is never on the table.
const ENVIRONMENT_TYPES: &[(&[&str], AudioType)] = &[
    (
        &["音乐", "歌", "乐器", "钢琴", "吉他", "music", "piano", "guitar"],
        AudioType::Music,
    ),
    (
        &[
            "风", "雨", "雪", "雷", "海浪", "流水", "溪水", "瀑布", "鸟", "虫", "蛙", "动物",
            "树叶", "自然", "森林", "海洋", "rain", "wind", "bird",
        ],
        AudioType::Nature,
    ),
    (
        &[
            "机", "电", "车", "引擎", "设备", "工具", "马达", "空调", "engine", "machine",
        ],
        AudioType::Mechanical,
    ),
    (&["噪", "杂", "嘈", "吵", "noise"], AudioType::Noise),
];

fn is_modifier(c: char) -> bool {
    c == VARIATION_SELECTOR
        || c == ZERO_WIDTH_JOINER
        || ('\u{1F3FB}'..='\u{1F3FF}').contains(&c)
}

/// Pictographic code points; deliberately excludes ASCII digits and `#`.
pub fn is_emoji_char(c: char) -> bool {
    matches!(c,
        '\u{1F000}'..='\u{1FAFF}'
        | '\u{2600}'..='\u{27BF}'
        | '\u{2300}'..='\u{23FF}'
        | '\u{2B00}'..='\u{2BFF}'
        | '\u{2190}'..='\u{21FF}'
        | '\u{3030}' | '\u{303D}' | '\u{3297}' | '\u{3299}'
        | '\u{00A9}' | '\u{00AE}' | '\u{203C}' | '\u{2049}' | '\u{2122}' | '\u{2139}'
    )
}

/// 1–2 emoji, ignoring variation selectors, skin tones and joiners
pub fn is_short_emoji(s: &str) -> bool {
    let mut count = 0;
    for c in s.chars() {
        if is_modifier(c) {
            continue;
        }
        if !is_emoji_char(c) {
            return false;
        }
        count += 1;
    }
    (1..=2).contains(&count)
}

fn strip_modifiers(s: &str) -> String {
    s.chars().filter(|c| !is_modifier(*c)).collect()
}

/// Category for a leading emoji, if it is one we know
pub fn classify_emoji(emoji: &str) -> Option<AudioType> {
    let key = strip_modifiers(emoji);
    EMOJI_TYPES
        .iter()
        .find(|(e, _)| key == *e || key.starts_with(e))
        .map(|(_, t)| *t)
}

fn keyword_match(table: &[(&[&str], AudioType)], text: &str) -> Option<AudioType> {
    let lower = text.to_lowercase();
    table
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, t)| *t)
}

/// Keyword classifier; `HumanVoice` when nothing matches
pub fn classify_text(text: &str) -> AudioType {
    keyword_match(KEYWORD_TYPES, text).unwrap_or(AudioType::HumanVoice)
}

/// Emoji anywhere in `text` first, then keywords
pub fn classify_any(text: &str) -> AudioType {
    let stripped = strip_modifiers(text);
    for (i, c) in stripped.char_indices() {
        if is_emoji_char(c) {
            if let Some(t) = classify_emoji(&stripped[i..]) {
                return t;
            }
        }
    }
    classify_text(text)
}

/// Classifier for ambient-sound descriptions. Voices are never assumed;
/// anything unrecognised is `Unknown`, or `Noise` when there is barely any
/// description.
pub fn classify_environment(description: &str) -> AudioType {
    match keyword_match(ENVIRONMENT_TYPES, description) {
        Some(t) => t,
        None if description.trim().chars().count() <= 2 => AudioType::Noise,
        None => AudioType::Unknown,
    }
}

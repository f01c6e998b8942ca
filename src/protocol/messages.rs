use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioChunk;

/// Instruction prompt for the live recording session
pub const LIVE_INSTRUCTIONS: &str = "你是专业的实时音频分析助手。任务：

**音频分类**：
1. 人声内容 - 对话、独白、歌声等
2. 环境音 - 音乐、自然声、机械声、噪音等

**处理规则**：
- 检测到人声：转录内容 + 5-10字总结
- 检测到环境音：识别声音类型 + 5字描述
- 混合声音：优先识别主要声源

**输出格式**：
emoji:summary（emoji只能1个，summary限5-8个字）

**响应要求**：
- 保持简洁准确
- 中文回复";

/// Terse single-shot prompt for post-hoc analysis
pub const ANALYSIS_INSTRUCTIONS: &str = "分析音频，只输出：
emoji:summary

规则：
1. emoji只能1个
2. summary限5-8个字
3. 不要加任何标记或符号
4. 唱歌优先识别为🎵
5. 不要输出<|EOT|>或其他结束标记

示例：
🎵:军歌嘹亮
😊:开心聊天
🌧️:雨声环境";

/// Audio encoding on both directions of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm16,
}

/// Server-side voice-activity detection policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

impl TurnDetection {
    /// Low threshold and long silence so ambient sound is picked up too
    pub fn ambient_sensitive() -> Self {
        TurnDetection::ServerVad {
            threshold: 0.3,
            prefix_padding_ms: 200,
            silence_duration_ms: 1000,
        }
    }
}

/// Parameters negotiated once per successful connection.
///
/// `turn_detection: None` serializes as `null`, which disables VAD for the
/// analysis-only flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: Option<TurnDetection>,
}

impl SessionConfiguration {
    pub fn live(voice: &str) -> Self {
        Self {
            model: None,
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: LIVE_INSTRUCTIONS.to_string(),
            voice: voice.to_string(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            turn_detection: Some(TurnDetection::ambient_sensitive()),
        }
    }

    pub fn analysis(model: &str, voice: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: ANALYSIS_INSTRUCTIONS.to_string(),
            voice: voice.to_string(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            turn_detection: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

/// Every message the engine sends to the realtime service.
///
/// Avoid logging `InputAudioBufferAppend` with `Debug`; use
/// [`ClientEvent::event_type`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: SessionConfiguration,
    },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { event_id: String, audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit { event_id: String },

    #[serde(rename = "response.create")]
    ResponseCreate { event_id: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        event_id: String,
        item: ConversationItem,
    },
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

impl ClientEvent {
    pub fn session_update(session: SessionConfiguration) -> Self {
        ClientEvent::SessionUpdate {
            event_id: new_event_id(),
            session,
        }
    }

    /// Append one base64 frame
    pub fn audio_append(audio: String) -> Self {
        ClientEvent::InputAudioBufferAppend {
            event_id: new_event_id(),
            audio,
        }
    }

    /// Append a captured chunk, reusing its correlation id as `event_id`
    pub fn audio_chunk(chunk: &AudioChunk) -> Self {
        ClientEvent::InputAudioBufferAppend {
            event_id: chunk.id.to_string(),
            audio: chunk.to_base64(),
        }
    }

    pub fn audio_commit() -> Self {
        ClientEvent::InputAudioBufferCommit {
            event_id: new_event_id(),
        }
    }

    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate {
            event_id: new_event_id(),
        }
    }

    /// A user text message in the conversation
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            event_id: new_event_id(),
            item: ConversationItem {
                id: new_event_id(),
                kind: "message".to_string(),
                role: "user".to_string(),
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ClientEvent::SessionUpdate { event_id, .. }
            | ClientEvent::InputAudioBufferAppend { event_id, .. }
            | ClientEvent::InputAudioBufferCommit { event_id }
            | ClientEvent::ResponseCreate { event_id }
            | ClientEvent::ConversationItemCreate { event_id, .. } => event_id,
        }
    }

    /// The wire `type` string
    pub const fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit { .. } => "input_audio_buffer.commit",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

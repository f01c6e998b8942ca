use serde::Deserialize;

/// An inbound message from the realtime service, reduced to what the engine
/// acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SessionCreated,
    SessionUpdated,
    SpeechStarted,
    SpeechStopped,
    TranscriptionCompleted { text: String },
    ResponseDelta { text: String },
    ResponseDone { text: String },
    ContentPartDone { text: String },
    ErrorEvent { message: String },
    /// Any other `type`, or a known type missing its payload
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    transcript: Option<String>,
    delta: Option<String>,
    text: Option<String>,
    part: Option<RawPart>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    transcript: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    message: Option<String>,
}

impl ServerEvent {
    /// Parse one text frame. Frames that are not JSON objects with a string
    /// `type` are an error; unrecognised types are `Unknown`.
    pub fn parse(frame: &str) -> serde_json::Result<Self> {
        let raw: RawEvent = serde_json::from_str(frame)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawEvent) -> Self {
        let RawEvent {
            kind,
            transcript,
            delta,
            text,
            part,
            error,
        } = raw;

        let event = match kind.as_str() {
            "session.created" => Some(ServerEvent::SessionCreated),
            "session.updated" => Some(ServerEvent::SessionUpdated),
            "input_audio_buffer.speech_started" => Some(ServerEvent::SpeechStarted),
            "input_audio_buffer.speech_stopped" => Some(ServerEvent::SpeechStopped),
            "conversation.item.input_audio_transcription.completed" => {
                transcript.map(|text| ServerEvent::TranscriptionCompleted { text })
            }
            "response.audio_transcript.delta" | "response.text.delta" => {
                delta.map(|text| ServerEvent::ResponseDelta { text })
            }
            "response.audio_transcript.done" => {
                transcript.map(|text| ServerEvent::ResponseDone { text })
            }
            "response.text.done" => text.map(|text| ServerEvent::ResponseDone { text }),
            "response.content_part.done" => part
                .and_then(|p| p.transcript.or(p.text))
                .map(|text| ServerEvent::ContentPartDone { text }),
            "error" => Some(ServerEvent::ErrorEvent {
                message: error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            }),
            _ => None,
        };

        event.unwrap_or(ServerEvent::Unknown(kind))
    }

    /// `ResponseDone` or `ContentPartDone`, whichever the server variant sends
    pub fn terminal_text(&self) -> Option<&str> {
        match self {
            ServerEvent::ResponseDone { text } | ServerEvent::ContentPartDone { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_type_without_payload_is_unknown() {
        let event =
            ServerEvent::parse(r#"{"type":"conversation.item.input_audio_transcription.completed"}"#)
                .unwrap();
        assert_eq!(
            event,
            ServerEvent::Unknown("conversation.item.input_audio_transcription.completed".into())
        );
    }

    #[test]
    fn content_part_reads_nested_transcript() {
        let event = ServerEvent::parse(
            r#"{"type":"response.content_part.done","part":{"type":"audio","transcript":"🎵:军歌嘹亮"}}"#,
        )
        .unwrap();
        assert_eq!(event.terminal_text(), Some("🎵:军歌嘹亮"));
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(ServerEvent::parse("not json").is_err());
        assert!(ServerEvent::parse(r#"{"no_type":1}"#).is_err());
    }
}

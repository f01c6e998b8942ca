// Integration tests for post-hoc analysis
//
// Each test drives the server side of the dedicated analysis connection by
// hand and checks what the caller and the listener end up with.

mod common;

use common::{
    drain_heard, settle, summaries, Heard, RecordingListener, ScriptedConnector, ServerEnd, Step,
};
use memo_realtime::analysis::{
    AnalysisAudio, AnalysisInput, AnalysisOutcome, AnalysisResult, FALLBACK_CONFIDENCE,
    REALTIME_CONFIDENCE,
};
use memo_realtime::connection::{OutboundFrame, GOING_AWAY};
use memo_realtime::{
    Analyzer, AudioType, Config, HandshakeVariant, InMemoryStorage, Notifier, ResultSource,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

fn analyzer(connector: Arc<ScriptedConnector>) -> (Analyzer, mpsc::UnboundedReceiver<Heard>) {
    let (listener, heard) = RecordingListener::new();
    let analyzer = Analyzer::new(&Config::default(), connector, Notifier::spawn(listener))
        .with_hour_source(|| 10);
    (analyzer, heard)
}

/// Silent 16 kHz PCM16
fn pcm(secs: usize) -> Vec<u8> {
    vec![0u8; secs * 16000 * 2]
}

fn input(secs: usize, duration_secs: u32) -> AnalysisInput {
    AnalysisInput {
        audio: AnalysisAudio::Bytes(pcm(secs)),
        duration_secs,
        asset_ref: None,
    }
}

fn reply(text: &str) -> Value {
    json!({"type": "response.audio_transcript.done", "transcript": text})
}

fn transcript(text: &str) -> Value {
    json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": text
    })
}

async fn until_response_requested(server: &mut ServerEnd) {
    server.expect_event("response.create").await;
}

#[tokio::test(start_paused = true)]
async fn test_streams_then_resolves_with_late_transcript() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (analyzer, mut heard) = analyzer(connector.clone());

    let job = analyzer.start(input(1, 12));
    let mut server = servers.recv().await.unwrap();

    let session = server.expect_event("session.update").await;
    assert!(session["session"]["turn_detection"].is_null());
    assert_eq!(session["session"]["model"], "step-audio-2-mini");

    // 32000 bytes -> 42668 base64 chars -> 11 frames of <= 4096
    let mut appends = 0;
    loop {
        let event = server.next_event().await.unwrap();
        match event["type"].as_str().unwrap() {
            "input_audio_buffer.append" => {
                assert!(event["audio"].as_str().unwrap().len() <= 4096);
                appends += 1;
            }
            "input_audio_buffer.commit" => break,
            other => panic!("unexpected {} while streaming", other),
        }
    }
    assert_eq!(appends, 11);
    until_response_requested(&mut server).await;

    server.push_event(reply("🎵:军歌嘹亮<|EOT|>"));
    server.push_event(transcript("向前向前向前"));

    let outcome = job.outcome().await;
    assert_eq!(
        outcome,
        AnalysisOutcome::Completed(AnalysisResult {
            summary: "🎵:军歌嘹亮".to_string(),
            transcription: "向前向前向前".to_string(),
            audio_type: AudioType::Singing,
            source: ResultSource::Realtime,
        })
    );

    settle().await;
    let heard = drain_heard(&mut heard);
    assert_eq!(
        summaries(&heard),
        vec![("🎵:军歌嘹亮".to_string(), AudioType::Singing)]
    );
    assert!(heard.contains(&Heard::Transcription("向前向前向前".to_string())));
    assert!(heard.contains(&Heard::AudioType(AudioType::Singing)));
}

#[tokio::test(start_paused = true)]
async fn test_transcript_before_reply_resolves_immediately() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (analyzer, _heard) = analyzer(connector.clone());

    let job = analyzer.start(input(1, 12));
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;

    let start = Instant::now();
    server.push_event(transcript("大家好"));
    server.push_event(json!({
        "type": "response.content_part.done",
        "part": {"transcript": "😊:开心聊天"}
    }));

    match job.outcome().await {
        AnalysisOutcome::Completed(result) => {
            assert_eq!(result.summary, "😊:开心聊天");
            assert_eq!(result.transcription, "大家好");
            assert_eq!(result.audio_type, AudioType::Conversation);
        }
        other => panic!("{:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_reply_without_transcript_resolves_after_wait() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (analyzer, mut heard) = analyzer(connector.clone());

    let job = analyzer.start(input(1, 12));
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;

    let start = Instant::now();
    server.push_event(reply("😊:开心聊天"));

    match job.outcome().await {
        AnalysisOutcome::Completed(result) => {
            assert_eq!(result.summary, "😊:开心聊天");
            // The reply text stands in for the missing transcription
            assert_eq!(result.transcription, "😊:开心聊天");
            assert_eq!(result.source, ResultSource::Realtime);
        }
        other => panic!("{:?}", other),
    }
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));

    settle().await;
    assert_eq!(summaries(&drain_heard(&mut heard)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back_exactly_once() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let (analyzer, mut heard) = analyzer(connector.clone());

    let start = Instant::now();
    let job = analyzer.start(input(1, 20));
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;

    let outcome = job.outcome().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(33));
    assert_eq!(
        outcome,
        AnalysisOutcome::Completed(AnalysisResult {
            summary: "💬:上午对话".to_string(),
            transcription: "音频内容记录 (20秒)".to_string(),
            audio_type: AudioType::Conversation,
            source: ResultSource::Fallback,
        })
    );

    // A straggling reply changes nothing
    server.push_event(reply("🎵:迟到的歌"));
    server.push_event(transcript("迟到"));
    settle().await;

    assert_eq!(
        summaries(&drain_heard(&mut heard)),
        vec![("💬:上午对话".to_string(), AudioType::Conversation)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_wedged_sink_falls_back_within_deadline() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    connector.set_write_delay(Duration::from_secs(10));
    let (analyzer, mut heard) = analyzer(connector.clone());

    let start = Instant::now();
    let job = analyzer.start(input(1, 20));
    let _server = servers.recv().await.unwrap();

    let outcome = job.outcome().await;
    assert!(start.elapsed() < Duration::from_secs(31), "took {:?}", start.elapsed());
    match outcome {
        AnalysisOutcome::Completed(result) => {
            assert_eq!(result.source, ResultSource::Fallback);
            assert_eq!(result.summary, "💬:上午对话");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    settle().await;
    assert_eq!(summaries(&drain_heard(&mut heard)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_stream_is_cut_off_at_overall_timeout() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    // Every write completes, but 21 of them cannot finish inside 30s
    connector.set_write_delay(Duration::from_secs(2));
    let (analyzer, mut heard) = analyzer(connector.clone());

    let start = Instant::now();
    let job = analyzer.start(input(2, 20));
    let mut server = servers.recv().await.unwrap();

    let outcome = job.outcome().await;
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(34),
        "took {:?}",
        elapsed
    );
    assert_eq!(
        outcome,
        AnalysisOutcome::Completed(AnalysisResult {
            summary: "💬:上午对话".to_string(),
            transcription: "音频内容记录 (20秒)".to_string(),
            audio_type: AudioType::Conversation,
            source: ResultSource::Fallback,
        })
    );

    let kinds: Vec<String> = server
        .drain()
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Text(text) => serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v["type"].as_str().map(str::to_string)),
            _ => None,
        })
        .collect();
    assert!(!kinds.iter().any(|k| k == "response.create"));

    settle().await;
    assert_eq!(summaries(&drain_heard(&mut heard)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_alternative_handshakes_are_tried_in_order() {
    let (connector, mut servers) =
        ScriptedConnector::new([Step::Refuse, Step::Refuse], Step::Accept);
    let (analyzer, _heard) = analyzer(connector.clone());

    let job = analyzer.start(input(1, 12));
    let mut server = servers.recv().await.unwrap();
    assert_eq!(server.variant, HandshakeVariant::QueryFormat);
    until_response_requested(&mut server).await;
    server.push_event(transcript("测试"));
    server.push_event(reply("🎤:独白练习"));

    match job.outcome().await {
        AnalysisOutcome::Completed(result) => assert_eq!(result.source, ResultSource::Realtime),
        other => panic!("{:?}", other),
    }
    assert_eq!(connector.variants(), HandshakeVariant::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_service_falls_back() {
    let (connector, _servers) = ScriptedConnector::new([], Step::Refuse);
    let (analyzer, mut heard) = analyzer(connector.clone());

    let outcome = analyzer.start(input(1, 5)).outcome().await;
    assert_eq!(
        outcome,
        AnalysisOutcome::Completed(AnalysisResult {
            summary: "🎤:上午语音".to_string(),
            transcription: "音频内容记录 (5秒)".to_string(),
            audio_type: AudioType::HumanVoice,
            source: ResultSource::Fallback,
        })
    );
    assert_eq!(connector.connects(), 3);

    // No stray reconnects after giving up
    sleep(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(connector.connects(), 3);
    assert_eq!(summaries(&drain_heard(&mut heard)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_audio_falls_back_without_connecting() {
    let (connector, _servers) = ScriptedConnector::accepting();
    let (analyzer, _heard) = analyzer(connector.clone());

    let outcome = analyzer
        .start(AnalysisInput {
            audio: AnalysisAudio::Bytes(Vec::new()),
            duration_secs: 200,
            asset_ref: None,
        })
        .outcome()
        .await;

    match outcome {
        AnalysisOutcome::Completed(result) => {
            assert_eq!(result.source, ResultSource::Fallback);
            assert_eq!(result.summary, "🏢:上午会议");
        }
        other => panic!("{:?}", other),
    }
    assert_eq!(connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_streaming_and_reports_nothing() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    connector.set_write_delay(Duration::from_millis(100));
    let (analyzer, mut heard) = analyzer(connector.clone());

    // 2s of audio -> 21 append frames at 100ms each
    let job = analyzer.start(input(2, 2));
    let mut server = servers.recv().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    job.cancel();
    assert_eq!(job.outcome().await, AnalysisOutcome::Cancelled);

    // The sink is dropped on teardown, which ends this loop
    let mut frames = Vec::new();
    while let Some(frame) = server.frames.recv().await {
        frames.push(frame);
    }

    let kinds: Vec<String> = frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Text(text) => serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v["type"].as_str().map(str::to_string)),
            _ => None,
        })
        .collect();
    let appends = kinds.iter().filter(|k| *k == "input_audio_buffer.append").count();
    assert!(appends > 0 && appends < 21, "sent {} appends", appends);
    assert!(!kinds.iter().any(|k| k == "input_audio_buffer.commit"));
    assert!(!kinds.iter().any(|k| k == "response.create"));
    assert!(frames
        .iter()
        .any(|f| matches!(f, OutboundFrame::Close { code, .. } if *code == GOING_AWAY)));

    settle().await;
    assert!(summaries(&drain_heard(&mut heard)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_is_not_a_timeout() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let storage = Arc::new(InMemoryStorage::default());
    let (analyzer, mut heard) = analyzer(connector.clone());
    let analyzer = analyzer.with_storage(storage.clone());

    let job = analyzer.start(AnalysisInput {
        asset_ref: Some("memo-cancelled".to_string()),
        ..input(1, 20)
    });
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;

    let start = Instant::now();
    job.cancel();
    assert_eq!(job.outcome().await, AnalysisOutcome::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(1));

    server.push_event(transcript("太晚了"));
    server.push_event(reply("🎵:太晚了"));
    sleep(Duration::from_secs(60)).await;
    settle().await;

    assert!(summaries(&drain_heard(&mut heard)).is_empty());
    assert!(storage.stored_record("memo-cancelled").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_result_is_persisted_and_reused() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let storage = Arc::new(InMemoryStorage::default());
    let (analyzer, mut heard) = analyzer(connector.clone());
    let analyzer = analyzer.with_storage(storage.clone());

    let memo = || AnalysisInput {
        asset_ref: Some("memo-1".to_string()),
        ..input(1, 45)
    };

    let job = analyzer.start(memo());
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;
    server.push_event(transcript("今天的会议讨论预算"));
    server.push_event(reply("状态：会议讨论"));

    let first = job.outcome().await;
    let record = storage.stored_record("memo-1").await.unwrap();
    assert_eq!(record.summary, "会议讨论");
    assert_eq!(record.audio_type, AudioType::Conversation);
    assert_eq!(record.confidence, REALTIME_CONFIDENCE);

    // Second run is served from storage without a connection
    let second = analyzer.start(memo()).outcome().await;
    assert_eq!(first, second);
    assert_eq!(connector.connects(), 1);

    settle().await;
    assert_eq!(summaries(&drain_heard(&mut heard)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_is_persisted_with_low_confidence() {
    let (connector, _servers) = ScriptedConnector::new([], Step::Refuse);
    let storage = Arc::new(InMemoryStorage::default());
    let (analyzer, _heard) = analyzer(connector);
    let analyzer = analyzer.with_storage(storage.clone());

    analyzer
        .start(AnalysisInput {
            asset_ref: Some("memo-2".to_string()),
            ..input(1, 700)
        })
        .outcome()
        .await;

    let record = storage.stored_record("memo-2").await.unwrap();
    assert_eq!(record.source, ResultSource::Fallback);
    assert_eq!(record.summary, "📞:上午通话");
    assert_eq!(record.confidence, FALLBACK_CONFIDENCE);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_does_not_change_result() {
    let (connector, mut servers) = ScriptedConnector::accepting();
    let storage = Arc::new(InMemoryStorage::default());
    storage.set_fail_persist(true);
    let (analyzer, _heard) = analyzer(connector);
    let analyzer = analyzer.with_storage(storage.clone());

    let job = analyzer.start(AnalysisInput {
        asset_ref: Some("memo-3".to_string()),
        ..input(1, 12)
    });
    let mut server = servers.recv().await.unwrap();
    until_response_requested(&mut server).await;
    server.push_event(transcript("下雨了"));
    server.push_event(reply("🌧️:雨声环境"));

    match job.outcome().await {
        AnalysisOutcome::Completed(result) => {
            assert_eq!(result.source, ResultSource::Realtime);
            assert_eq!(result.audio_type, AudioType::Nature);
        }
        other => panic!("{:?}", other),
    }
    assert!(storage.stored_record("memo-3").await.is_none());
    assert!(storage.cached_record("memo-3").await.is_some());
}

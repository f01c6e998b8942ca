use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memo_realtime::analysis::{AnalysisAudio, AnalysisInput, AnalysisOutcome};
use memo_realtime::audio::pcm16_duration_secs;
use memo_realtime::{
    create_router, AppState, Analyzer, AudioType, Config, ConnectionStatus, EngineListener,
    InMemoryStorage, LiveSession, Notifier, SessionConfig, WsConnector,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memo-realtime", version, about = "Realtime transcription and summary engine")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/memo-realtime")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Analyze one recording and print the result as JSON
    Analyze {
        /// WAV or raw PCM16 file
        file: String,
        /// Recording length in seconds (estimated from the audio if omitted)
        #[arg(long)]
        duration: Option<u32>,
    },
}

/// Logs every engine notification
struct LogListener;

impl EngineListener for LogListener {
    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        info!("Connection: {}", status.label());
    }

    fn on_transcription_update(&self, text: &str) {
        info!("Transcription: {}", text);
    }

    fn on_summary_generated(&self, summary: &str, audio_type: AudioType) {
        info!("Summary: {} ({})", summary, audio_type);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    if cfg.realtime.api_key.is_empty() {
        warn!("No API key configured (MEMO_REALTIME__REALTIME__API_KEY)");
    }

    let connector = Arc::new(WsConnector::new(&cfg.realtime));
    let notifier = Notifier::spawn(Arc::new(LogListener));

    match cli.command {
        Command::Serve => {
            let storage = Arc::new(InMemoryStorage::new(&cfg.storage));
            let analyzer = Analyzer::new(&cfg, connector.clone(), notifier.clone())
                .with_storage(storage);

            let live = Arc::new(LiveSession::new(
                SessionConfig::from_config(&cfg),
                cfg.connection.clone(),
                connector,
                notifier,
            ));
            if !cfg.realtime.api_key.is_empty() {
                live.connect();
            }

            let app = create_router(AppState::with_limits(
                Arc::new(analyzer),
                Some(live.clone()),
                &cfg.http,
            ));
            let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("HTTP API listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .context("HTTP server failed")?;

            live.disconnect().await;
        }
        Command::Analyze { file, duration } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let duration_secs = match duration {
                Some(secs) => secs,
                None => {
                    let pcm = memo_realtime::audio::normalize_pcm16(&bytes)?;
                    pcm16_duration_secs(&pcm, cfg.analysis.sample_rate).round() as u32
                }
            };

            let analyzer = Analyzer::new(&cfg, connector, notifier);
            let job = analyzer.start(AnalysisInput {
                audio: AnalysisAudio::Bytes(bytes),
                duration_secs,
                asset_ref: None,
            });

            match job.outcome().await {
                AnalysisOutcome::Completed(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                AnalysisOutcome::Cancelled => warn!("Analysis cancelled"),
            }
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    pub connection: ConnectionConfig,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "memo-realtime".to_string(),
        }
    }
}

/// Remote realtime service endpoint and credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
    /// Mandatory `model` query parameter
    pub model: String,
    pub api_key: String,
    pub voice: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.stepfun.com/v1/realtime".to_string(),
            model: "step-audio-2-mini".to_string(),
            api_key: String::new(),
            voice: "qingchunshaonv".to_string(),
        }
    }
}

/// Connection lifecycle policy (timeouts, backoff, circuit breaker)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_cap_secs: u64,
    pub max_reconnect_attempts: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
    pub failed_unlock_secs: u64,
    pub send_retries: u32,
    pub send_retry_delay_ms: u64,
    /// How long one frame may sit in the writer before the write counts as failed
    pub write_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            health_check_interval_secs: 15,
            reconnect_base_secs: 2,
            reconnect_cap_secs: 30,
            max_reconnect_attempts: 5,
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
            failed_unlock_secs: 30,
            send_retries: 3,
            send_retry_delay_ms: 1000,
            write_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub overall_timeout_secs: u64,
    pub transcription_wait_secs: u64,
    /// Base64 characters per `input_audio_buffer.append` frame
    pub chunk_chars: usize,
    pub sample_rate: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: 30,
            transcription_wait_secs: 3,
            chunk_chars: 4096,
            sample_rate: 16000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Finished analyses are forgotten this long after they finish
    pub job_retention_secs: u64,
    /// Upper bound on finished analyses kept for polling
    pub max_finished_jobs: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8088,
            job_retention_secs: 600,
            max_finished_jobs: 256,
        }
    }
}

impl HttpConfig {
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands, optional) layered
    /// with `MEMO_REALTIME__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("MEMO_REALTIME").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_secs)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_cap_secs)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn failed_unlock(&self) -> Duration {
        Duration::from_secs(self.failed_unlock_secs)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl AnalysisConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn transcription_wait(&self) -> Duration {
        Duration::from_secs(self.transcription_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_policy() {
        let cfg = Config::default();
        assert_eq!(cfg.connection.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.connection.max_reconnect_attempts, 5);
        assert_eq!(cfg.connection.circuit_failure_threshold, 3);
        assert_eq!(cfg.analysis.overall_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.analysis.transcription_wait(), Duration::from_secs(3));
        assert_eq!(cfg.analysis.chunk_chars, 4096);
        assert_eq!(cfg.realtime.model, "step-audio-2-mini");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/memo-realtime").unwrap();
        assert_eq!(cfg.http.port, 8088);
    }
}

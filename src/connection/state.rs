use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ConnectionConfig;

/// Published connection status (the only coupling to a UI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionStatus {
    /// Status string shown to the user
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "已断开",
            ConnectionStatus::Connecting => "连接中",
            ConnectionStatus::Connected => "已连接",
            ConnectionStatus::Reconnecting => "重连中",
            ConnectionStatus::Failed => "连接失败",
        }
    }
}

/// Backoff and circuit-breaker limits
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl ReconnectPolicy {
    /// `min(base * attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.cap)
    }
}

impl From<&ConnectionConfig> for ReconnectPolicy {
    fn from(cfg: &ConnectionConfig) -> Self {
        Self {
            base: cfg.reconnect_base(),
            cap: cfg.reconnect_cap(),
            max_attempts: cfg.max_reconnect_attempts,
            failure_threshold: cfg.circuit_failure_threshold,
            cooldown: cfg.circuit_cooldown(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// Open a transport tagged with this generation
    Proceed { generation: u64 },
    /// Already connecting or connected
    AlreadyActive,
    /// Breaker is open; nothing may be opened before `until`
    CircuitOpen { until: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Manual disconnect, stale generation, or the failure is already handled
    Ignored,
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted; status is now `Failed`
    GiveUp,
}

/// Connection lifecycle bookkeeping.
///
/// Pure state: the owner performs I/O and timers and reports back through
/// these transitions. Every opened transport gets a fresh `generation`;
/// reports carrying an older generation are stale and ignored.
#[derive(Debug)]
pub struct ConnectionState {
    policy: ReconnectPolicy,
    status: ConnectionStatus,
    attempt_count: u32,
    consecutive_failures: u32,
    circuit_open_until: Option<Instant>,
    manual_disconnect: bool,
    generation: u64,
}

impl ConnectionState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            status: ConnectionStatus::Disconnected,
            attempt_count: 0,
            consecutive_failures: 0,
            circuit_open_until: None,
            manual_disconnect: false,
            generation: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn circuit_open_until(&self) -> Option<Instant> {
        self.circuit_open_until
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.manual_disconnect
    }

    /// A caller asked for a connection; re-enables automatic reconnection.
    pub fn request_connect(&mut self) {
        self.manual_disconnect = false;
    }

    pub fn begin_attempt(&mut self, now: Instant) -> AttemptDecision {
        if matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            return AttemptDecision::AlreadyActive;
        }

        if let Some(until) = self.circuit_open_until {
            if now < until {
                return AttemptDecision::CircuitOpen { until };
            }
            self.circuit_open_until = None;
            self.consecutive_failures = 0;
        }

        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        AttemptDecision::Proceed {
            generation: self.generation,
        }
    }

    /// The transport for `generation` opened. Returns false when stale.
    pub fn mark_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.status != ConnectionStatus::Connecting {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.attempt_count = 0;
        self.consecutive_failures = 0;
        self.circuit_open_until = None;
        true
    }

    /// Transport-level failure (handshake, timeout, close, receive, send or
    /// health check) for `generation`.
    pub fn record_failure(&mut self, generation: u64, now: Instant) -> FailureAction {
        if !self.is_current(generation)
            || !matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            return FailureAction::Ignored;
        }
        self.fail(now)
    }

    /// A send was attempted with no live transport. While an attempt or a
    /// retry is in flight this is already being handled; after `Failed` or a
    /// server-side close it starts a new reconnect cycle.
    pub fn record_send_without_transport(&mut self, now: Instant) -> FailureAction {
        if self.manual_disconnect
            || !matches!(
                self.status,
                ConnectionStatus::Failed | ConnectionStatus::Disconnected
            )
        {
            return FailureAction::Ignored;
        }
        self.fail(now)
    }

    fn fail(&mut self, now: Instant) -> FailureAction {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.policy.failure_threshold {
            self.circuit_open_until = Some(now + self.policy.cooldown);
        }

        if self.attempt_count < self.policy.max_attempts {
            self.attempt_count += 1;
            self.status = ConnectionStatus::Reconnecting;
            FailureAction::Retry {
                attempt: self.attempt_count,
                delay: self.policy.delay_for(self.attempt_count),
            }
        } else {
            self.status = ConnectionStatus::Failed;
            self.attempt_count = 0;
            FailureAction::GiveUp
        }
    }

    /// A scheduled retry for `generation` came due. Stale or cancelled
    /// retries report `AlreadyActive`.
    pub fn retry_due(&mut self, generation: u64, now: Instant) -> AttemptDecision {
        if !self.is_current(generation) || self.status != ConnectionStatus::Reconnecting {
            return AttemptDecision::AlreadyActive;
        }
        self.begin_attempt(now)
    }

    /// Server closed with the normal close code: no reconnect.
    pub fn mark_closed_normally(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.generation += 1;
        self.status = ConnectionStatus::Disconnected;
        self.attempt_count = 0;
        true
    }

    /// Manual disconnect. Returns false when the status was already
    /// `Disconnected`.
    pub fn mark_disconnected(&mut self) -> bool {
        let changed = self.status != ConnectionStatus::Disconnected;
        self.manual_disconnect = true;
        self.status = ConnectionStatus::Disconnected;
        self.attempt_count = 0;
        self.generation += 1;
        changed
    }

    /// Delayed unlock after `Failed`: forget failures and close the breaker.
    pub fn clear_failures(&mut self, generation: u64) {
        if self.generation != generation {
            return;
        }
        self.consecutive_failures = 0;
        self.circuit_open_until = None;
    }
}

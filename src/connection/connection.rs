use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::state::{AttemptDecision, ConnectionState, ConnectionStatus, FailureAction, ReconnectPolicy};
use super::transport::{
    Connector, HandshakeVariant, InboundFrame, OutboundFrame, Transport, TransportSink,
    TransportStream, GOING_AWAY, NORMAL_CLOSURE,
};
use super::EventHandler;
use crate::config::ConnectionConfig;
use crate::error::{SendError, TransportError};
use crate::observer::Notifier;
use crate::protocol::{ClientEvent, ServerEvent, SessionConfiguration};

const WRITE_QUEUE: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);
/// Consecutive non-network receive errors tolerated before giving up
const MAX_RECEIVE_HICCUPS: u32 = 3;

struct WriteRequest {
    frame: OutboundFrame,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Retry,
}

#[derive(Default)]
struct Tasks {
    attempt: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    configure: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    unlock: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_transport(&mut self) {
        for handle in [
            self.attempt.take(),
            self.reader.take(),
            self.writer.take(),
            self.health.take(),
            self.configure.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    fn abort_timers(&mut self) {
        for handle in [self.retry.take(), self.unlock.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

struct Shared {
    state: ConnectionState,
    variant: HandshakeVariant,
    writer: Option<mpsc::Sender<WriteRequest>>,
    tasks: Tasks,
}

struct Inner {
    name: String,
    config: ConnectionConfig,
    session: SessionConfiguration,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn EventHandler>,
    notifier: Notifier,
    status_tx: watch::Sender<ConnectionStatus>,
    shared: Mutex<Shared>,
}

/// One logical connection to the realtime service.
///
/// Owns the transport, the reconnect and unlock timers, and the health-check
/// ticker. Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct RealtimeConnection {
    inner: Arc<Inner>,
}

impl RealtimeConnection {
    pub fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        session: SessionConfiguration,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
        notifier: Notifier,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let policy = ReconnectPolicy::from(&config);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                session,
                connector,
                handler,
                notifier,
                status_tx,
                shared: Mutex::new(Shared {
                    state: ConnectionState::new(policy),
                    variant: HandshakeVariant::Standard,
                    writer: None,
                    tasks: Tasks::default(),
                }),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().state.consecutive_failures()
    }

    pub fn circuit_open_until(&self) -> Option<Instant> {
        self.inner.lock().state.circuit_open_until()
    }

    /// Connect with the last used handshake variant
    pub fn connect(&self) {
        let variant = self.inner.lock().variant;
        self.connect_with(variant);
    }

    pub fn connect_with(&self, variant: HandshakeVariant) {
        let mut shared = self.inner.lock();
        shared.state.request_connect();
        shared.variant = variant;
        let decision = shared.state.begin_attempt(Instant::now());
        self.inner.act_on(&mut shared, decision, Trigger::Manual);
    }

    /// Tear down everything and stay down until the next `connect()`.
    pub async fn disconnect(&self) {
        let (writer, writer_task) = {
            let mut shared = self.inner.lock();
            let changed = shared.state.mark_disconnected();
            let writer = shared.writer.take();
            let writer_task = shared.tasks.writer.take();
            shared.tasks.abort_transport();
            shared.tasks.abort_timers();
            if changed {
                info!("[{}] Disconnecting", self.inner.name);
                self.inner.publish(ConnectionStatus::Disconnected);
            }
            (writer, writer_task)
        };

        if let Some(writer) = writer {
            let close = OutboundFrame::Close {
                code: GOING_AWAY,
                reason: "client disconnect".to_string(),
            };
            if let Err(e) = write_frame(&writer, close, CLOSE_GRACE).await {
                debug!("[{}] Close frame not acknowledged: {}", self.inner.name, e);
            }
        }
        if let Some(task) = writer_task {
            task.abort();
        }
    }

    /// Wait for the current attempt to settle. `true` only on `Connected`.
    pub async fn wait_until_connected(&self, limit: Duration) -> bool {
        let mut rx = self.subscribe_status();
        let settled = async {
            loop {
                match *rx.borrow_and_update() {
                    ConnectionStatus::Connected => return true,
                    ConnectionStatus::Connecting => {}
                    _ => return false,
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        timeout(limit, settled).await.unwrap_or(false)
    }

    /// Serialize and transmit `event`, retrying transport errors locally
    /// before escalating to a connection failure.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), SendError> {
        let text = event.to_json().map_err(|e| {
            error!(
                "[{}] Failed to serialize {}: {}",
                self.inner.name,
                event.event_type(),
                e
            );
            SendError::Serialization(e)
        })?;

        let retries = self.inner.config.send_retries;
        let mut last_error = TransportError::Closed;
        let mut generation = None;

        for attempt in 0..=retries {
            let (writer, current) = match self.inner.writer() {
                Some(pair) => pair,
                None if generation.is_some() => break,
                None => {
                    warn!(
                        "[{}] Cannot send {}: not connected ({:?})",
                        self.inner.name,
                        event.event_type(),
                        self.status()
                    );
                    self.inner.on_send_without_transport();
                    return Err(SendError::NotConnected);
                }
            };
            generation = Some(current);

            let limit = self.inner.config.write_timeout();
            match write_frame(&writer, OutboundFrame::Text(text.clone()), limit).await {
                Ok(()) => {
                    debug!(
                        "[{}] Sent {} ({} bytes)",
                        self.inner.name,
                        event.event_type(),
                        text.len()
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "[{}] Send {} failed (attempt {}/{}): {}",
                        self.inner.name,
                        event.event_type(),
                        attempt + 1,
                        retries + 1,
                        e
                    );
                    last_error = e;
                    if attempt < retries {
                        sleep(self.inner.config.send_retry_delay()).await;
                    }
                }
            }
        }

        if let Some(generation) = generation {
            self.inner.on_failure(generation, &last_error);
        }
        Err(SendError::Transport(last_error))
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
        self.notifier.connection_status(status);
    }

    fn writer(&self) -> Option<(mpsc::Sender<WriteRequest>, u64)> {
        let shared = self.lock();
        if shared.state.status() != ConnectionStatus::Connected {
            return None;
        }
        let generation = shared.state.generation();
        shared.writer.clone().map(|w| (w, generation))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().state.is_current(generation)
    }

    fn act_on(self: &Arc<Self>, shared: &mut Shared, decision: AttemptDecision, trigger: Trigger) {
        match decision {
            AttemptDecision::AlreadyActive => {
                debug!("[{}] Connect ignored: already {:?}", self.name, shared.state.status());
            }
            AttemptDecision::CircuitOpen { until } => {
                let wait = until.saturating_duration_since(Instant::now());
                if trigger == Trigger::Manual {
                    warn!(
                        "[{}] Circuit open, connect skipped ({:.1}s remaining)",
                        self.name,
                        wait.as_secs_f64()
                    );
                    return;
                }
                info!(
                    "[{}] Circuit open, retry deferred by {:.1}s",
                    self.name,
                    wait.as_secs_f64()
                );
                let generation = shared.state.generation();
                let inner = Arc::clone(self);
                shared.tasks.retry = Some(tokio::spawn(async move {
                    sleep_until(until).await;
                    inner.retry_due(generation);
                }));
            }
            AttemptDecision::Proceed { generation } => {
                shared.tasks.abort_transport();
                shared.writer = None;
                if trigger == Trigger::Manual {
                    shared.tasks.abort_timers();
                } else if let Some(unlock) = shared.tasks.unlock.take() {
                    unlock.abort();
                }

                let variant = shared.variant;
                info!(
                    "[{}] Connecting ({} handshake, generation {})",
                    self.name,
                    variant.name(),
                    generation
                );
                self.publish(ConnectionStatus::Connecting);

                let inner = Arc::clone(self);
                let connect_timeout = self.config.connect_timeout();
                shared.tasks.attempt = Some(tokio::spawn(async move {
                    match timeout(connect_timeout, inner.connector.connect(variant)).await {
                        Ok(Ok(transport)) => inner.on_open(generation, transport),
                        Ok(Err(e)) => inner.on_failure(generation, &e),
                        Err(_) => inner.on_failure(generation, &TransportError::TimedOut),
                    }
                }));
            }
        }
    }

    fn retry_due(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();
        match shared.state.retry_due(generation, Instant::now()) {
            AttemptDecision::AlreadyActive => {
                debug!("[{}] Stale retry for generation {}", self.name, generation);
            }
            decision => self.act_on(&mut shared, decision, Trigger::Retry),
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, transport: Transport) {
        let mut shared = self.lock();
        if !shared.state.mark_open(generation) {
            debug!("[{}] Dropping stale transport {}", self.name, generation);
            return;
        }
        shared.tasks.attempt = None;

        let Transport { sink, stream } = transport;
        let (tx, rx) = mpsc::channel(WRITE_QUEUE);

        let configured = match ClientEvent::session_update(self.session.clone()).to_json() {
            Ok(text) => {
                let (ack, done) = oneshot::channel();
                match tx.try_send(WriteRequest {
                    frame: OutboundFrame::Text(text),
                    ack,
                }) {
                    Ok(()) => Some(done),
                    Err(_) => {
                        warn!("[{}] Could not queue session configuration", self.name);
                        None
                    }
                }
            }
            Err(e) => {
                error!("[{}] Failed to serialize session configuration: {}", self.name, e);
                None
            }
        };
        if let Some(done) = configured {
            shared.tasks.configure = Some(tokio::spawn(await_session_ack(
                Arc::clone(self),
                generation,
                done,
            )));
        }

        shared.writer = Some(tx);
        shared.tasks.writer = Some(tokio::spawn(writer_loop(sink, rx)));
        shared.tasks.reader = Some(tokio::spawn(reader_loop(
            Arc::clone(self),
            generation,
            stream,
        )));
        shared.tasks.health = Some(tokio::spawn(health_loop(Arc::clone(self), generation)));

        info!("[{}] Connected (generation {})", self.name, generation);
        self.publish(ConnectionStatus::Connected);
    }

    fn on_failure(self: &Arc<Self>, generation: u64, reason: &TransportError) {
        let mut shared = self.lock();
        let action = shared.state.record_failure(generation, Instant::now());
        self.apply_failure(&mut shared, action, reason);
    }

    fn on_send_without_transport(self: &Arc<Self>) {
        let mut shared = self.lock();
        let action = shared.state.record_send_without_transport(Instant::now());
        self.apply_failure(&mut shared, action, &TransportError::Closed);
    }

    fn apply_failure(self: &Arc<Self>, shared: &mut Shared, action: FailureAction, reason: &TransportError) {
        match action {
            FailureAction::Ignored => {
                debug!("[{}] Failure ignored: {}", self.name, reason);
            }
            FailureAction::Retry { attempt, delay } => {
                shared.tasks.abort_transport();
                shared.writer = None;
                warn!(
                    "[{}] Connection failure ({}); retry {} in {:.1}s ({} consecutive failures)",
                    self.name,
                    reason,
                    attempt,
                    delay.as_secs_f64(),
                    shared.state.consecutive_failures()
                );
                self.publish(ConnectionStatus::Reconnecting);

                let generation = shared.state.generation();
                let inner = Arc::clone(self);
                if let Some(old) = shared.tasks.retry.replace(tokio::spawn(async move {
                    sleep(delay).await;
                    inner.retry_due(generation);
                })) {
                    old.abort();
                }
            }
            FailureAction::GiveUp => {
                shared.tasks.abort_transport();
                shared.writer = None;
                error!(
                    "[{}] Connection failed ({}); giving up after {} attempts",
                    self.name, reason, self.config.max_reconnect_attempts
                );
                self.publish(ConnectionStatus::Failed);

                let generation = shared.state.generation();
                let unlock_after = self.config.failed_unlock();
                let inner = Arc::clone(self);
                if let Some(old) = shared.tasks.unlock.replace(tokio::spawn(async move {
                    sleep(unlock_after).await;
                    inner.lock().state.clear_failures(generation);
                    info!("[{}] Failure state cleared", inner.name);
                })) {
                    old.abort();
                }
            }
        }
    }

    fn on_normal_close(&self, generation: u64) {
        let mut shared = self.lock();
        if !shared.state.mark_closed_normally(generation) {
            return;
        }
        shared.tasks.abort_transport();
        shared.writer = None;
        info!("[{}] Server closed the connection normally", self.name);
        self.publish(ConnectionStatus::Disconnected);
    }

    fn dispatch(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => self.handler.handle(event),
            Err(e) => warn!("[{}] Ignoring unparseable frame: {}", self.name, e),
        }
    }
}

/// Queue `frame` and wait for the writer's ack. A sink that does not take the
/// frame within `limit` counts as timed out.
async fn write_frame(
    writer: &mpsc::Sender<WriteRequest>,
    frame: OutboundFrame,
    limit: Duration,
) -> Result<(), TransportError> {
    let (ack, done) = oneshot::channel();
    let written = async {
        writer
            .send(WriteRequest { frame, ack })
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    };
    timeout(limit, written)
        .await
        .unwrap_or(Err(TransportError::TimedOut))
}

/// The session configuration is the first write on every transport; if the
/// sink rejects it the transport is unusable.
async fn await_session_ack(
    inner: Arc<Inner>,
    generation: u64,
    done: oneshot::Receiver<Result<(), TransportError>>,
) {
    let result = match timeout(inner.config.write_timeout(), done).await {
        Ok(Ok(written)) => written,
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => Err(TransportError::TimedOut),
    };
    match result {
        Ok(()) => debug!("[{}] Session configuration sent", inner.name),
        Err(e) => {
            warn!("[{}] Session configuration not sent: {}", inner.name, e);
            inner.on_failure(generation, &e);
        }
    }
}

async fn writer_loop(mut sink: Box<dyn TransportSink>, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(request) = rx.recv().await {
        let closing = matches!(request.frame, OutboundFrame::Close { .. });
        let result = sink.send(request.frame).await;
        let _ = request.ack.send(result);
        if closing {
            break;
        }
    }
}

async fn reader_loop(inner: Arc<Inner>, generation: u64, mut stream: Box<dyn TransportStream>) {
    let mut hiccups = 0;
    loop {
        match stream.next().await {
            Some(Ok(frame)) => {
                hiccups = 0;
                match frame {
                    InboundFrame::Text(text) => inner.dispatch(&text),
                    InboundFrame::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => inner.dispatch(&text),
                        Err(_) => warn!("[{}] Ignoring non-UTF-8 binary frame", inner.name),
                    },
                    InboundFrame::Ping | InboundFrame::Pong => {}
                    InboundFrame::Close(Some(NORMAL_CLOSURE)) => {
                        inner.on_normal_close(generation);
                        return;
                    }
                    InboundFrame::Close(code) => {
                        let reason = TransportError::Protocol(format!("closed with code {:?}", code));
                        inner.on_failure(generation, &reason);
                        return;
                    }
                }
            }
            Some(Err(e)) if e.is_network() => {
                inner.on_failure(generation, &e);
                return;
            }
            Some(Err(e)) => {
                hiccups += 1;
                if !inner.is_current(generation) {
                    return;
                }
                if hiccups > MAX_RECEIVE_HICCUPS {
                    inner.on_failure(generation, &e);
                    return;
                }
                warn!("[{}] Receive error, continuing: {}", inner.name, e);
            }
            None => {
                inner.on_failure(generation, &TransportError::ConnectionLost);
                return;
            }
        }
    }
}

async fn health_loop(inner: Arc<Inner>, generation: u64) {
    let period = inner.config.health_check_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let writer = match inner.writer() {
            Some((writer, current)) if current == generation => writer,
            _ => return,
        };
        let limit = inner.config.write_timeout();
        if let Err(e) = write_frame(&writer, OutboundFrame::Ping(Vec::new()), limit).await {
            warn!("[{}] Health check failed: {}", inner.name, e);
            inner.on_failure(generation, &e);
            return;
        }
        debug!("[{}] Health check ok", inner.name);
    }
}

//! Stream connection manager.
//!
//! The [`ConnectionManager`] owns the single active SSE connection. It runs
//! the connection on a spawned task that only sends [`TransportEvent`]s;
//! the controller consumes them in delivery order.
//!
//! # Retry behavior
//!
//! Until the stream has delivered at least one decoded event other than
//! `error`, failures are retried with exponential delay up to
//! `max_attempts`, after which a terminal [`TransportEvent::ConnectionLost`]
//! is sent. After that first event, errors and end-of-stream are treated as
//! normal completion. A server `close` event always ends the stream
//! gracefully.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::config::{ConfigError, ServerSettings, StreamSettings};
use crate::providers::sse::{DecodeError, SseError, SseFrame, SseStream, StreamEvent};

/// Errors that end a single connection attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream endpoint returned HTTP {0}")]
    Status(u16),

    #[error(transparent)]
    Stream(#[from] SseError),

    #[error("server reported an error: {0}")]
    Server(String),

    #[error("stream ended before any events arrived")]
    EndedEarly,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A framed event stream for one connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseFrame, SseError>> + Send>>;

/// State of the stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection, either never started or finished normally.
    #[default]
    Disconnected,
    /// An attempt is in progress.
    Connecting,
    /// The stream is open.
    Connected,
    /// The server ended the stream with a `close` event.
    ClosedByServer,
    /// Retries were exhausted.
    Error,
}

impl ConnectionState {
    /// Label used by the status line.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ClosedByServer => "closed",
            Self::Error => "connection lost",
        }
    }
}

/// How a finished connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The server sent `close`.
    Closed { message: Option<String> },
    /// The stream ended, or failed after delivering events.
    Completed,
}

/// Messages from the transport task to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded stream event.
    Event(StreamEvent),
    /// Retries were exhausted before the stream initialized.
    ConnectionLost { attempts: u32, last_error: String },
    /// The connection finished without needing a retry.
    Finished(Termination),
}

/// Bounded exponential retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Minimum spacing between the starts of two attempts.
    pub cooldown: Duration,
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for ReconnectPolicy {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            cooldown: Duration::from_millis(settings.cooldown_ms),
        }
    }
}

/// Opens stream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Opens one connection and returns its framed events.
    async fn open(&self) -> TransportResult<EventStream>;
}

/// [`StreamConnector`] over HTTP.
pub struct HttpConnector {
    client: reqwest::Client,
    url: Url,
}

impl HttpConnector {
    /// Creates a connector for the configured stream endpoint.
    ///
    /// `days` is forwarded as the `days` query parameter.
    pub fn new(server: &ServerSettings, days: Option<u32>) -> TransportResult<Self> {
        // No overall timeout: the stream is long-lived.
        let client = reqwest::Client::builder()
            .connect_timeout(server.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: server.stream_url(days)?,
        })
    }

    /// Stream URL this connector opens.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn open(&self) -> TransportResult<EventStream> {
        tracing::debug!(url = %self.url, "Opening event stream");
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        Ok(Box::pin(SseStream::new(Box::pin(response.bytes_stream()))))
    }
}

/// Manages the single active stream connection.
///
/// # Example
///
/// ```ignore
/// let mut manager = ConnectionManager::new(Arc::new(connector), policy);
/// let (tx, mut rx) = mpsc::channel(64);
/// manager.connect(tx);
/// while let Some(event) = rx.recv().await { /* ... */ }
/// ```
pub struct ConnectionManager {
    connector: Arc<dyn StreamConnector>,
    policy: ReconnectPolicy,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Start time of the most recent attempt, shared with the running task.
    last_attempt: Arc<Mutex<Option<Instant>>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Creates a manager; nothing connects until [`connect`](Self::connect).
    pub fn new(connector: Arc<dyn StreamConnector>, policy: ReconnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            state_tx: Arc::new(state_tx),
            last_attempt: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Retry schedule in use.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Starts a connection, aborting any prior one first.
    pub fn connect(&mut self, events: mpsc::Sender<TransportEvent>) {
        self.abort_task();

        let connection = Connection {
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            state_tx: Arc::clone(&self.state_tx),
            last_attempt: Arc::clone(&self.last_attempt),
            events,
        };
        self.task = Some(tokio::spawn(connection.run()));
    }

    /// Aborts the active connection, if any.
    pub fn close(&mut self) {
        if self.abort_task() {
            tracing::info!("Event stream closed by client");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Returns true while a connection task is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort_task(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                was_running
            }
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// How one attempt ended.
enum Outcome {
    Closed(Option<String>),
    Ended,
    Failed(TransportError),
    ReceiverGone,
}

/// State moved into the connection task.
struct Connection {
    connector: Arc<dyn StreamConnector>,
    policy: ReconnectPolicy,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    last_attempt: Arc<Mutex<Option<Instant>>>,
    events: mpsc::Sender<TransportEvent>,
}

impl Connection {
    async fn run(self) {
        let mut initialized = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.wait_for_cooldown().await;
            self.set_state(ConnectionState::Connecting);

            let outcome = match self.connector.open().await {
                Ok(stream) => {
                    tracing::info!(attempt, "Event stream connected");
                    self.set_state(ConnectionState::Connected);
                    self.pump(stream, &mut initialized).await
                }
                Err(e) => Outcome::Failed(e),
            };

            let error = match outcome {
                Outcome::ReceiverGone => {
                    tracing::debug!("Event receiver dropped; stopping stream");
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Outcome::Closed(message) => {
                    tracing::info!(message = ?message, "Server closed the event stream");
                    self.set_state(ConnectionState::ClosedByServer);
                    self.finish(TransportEvent::Finished(Termination::Closed { message }))
                        .await;
                    return;
                }
                Outcome::Ended if initialized => {
                    tracing::info!("Event stream completed");
                    self.set_state(ConnectionState::Disconnected);
                    self.finish(TransportEvent::Finished(Termination::Completed))
                        .await;
                    return;
                }
                Outcome::Failed(e) if initialized => {
                    tracing::info!(error = %e, "Event stream ended after delivering events");
                    self.set_state(ConnectionState::Disconnected);
                    self.finish(TransportEvent::Finished(Termination::Completed))
                        .await;
                    return;
                }
                Outcome::Ended => TransportError::EndedEarly,
                Outcome::Failed(e) => e,
            };

            if attempt >= self.policy.max_attempts {
                tracing::error!(attempts = attempt, error = %error, "Giving up on event stream");
                self.set_state(ConnectionState::Error);
                self.finish(TransportEvent::ConnectionLost {
                    attempts: attempt,
                    last_error: error.to_string(),
                })
                .await;
                return;
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Event stream failed, retrying"
            );
            self.set_state(ConnectionState::Connecting);
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(&self, mut stream: EventStream, initialized: &mut bool) -> Outcome {
        while let Some(item) = stream.next().await {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => return Outcome::Failed(e.into()),
            };

            match StreamEvent::from_frame(&frame) {
                Ok(StreamEvent::Error { message }) => {
                    return Outcome::Failed(TransportError::Server(
                        message.unwrap_or_else(|| "unspecified stream error".to_string()),
                    ));
                }
                Ok(StreamEvent::Close { message }) => return Outcome::Closed(message),
                Ok(event) => {
                    tracing::debug!(event = event.name(), "Stream event");
                    *initialized = true;
                    if self.events.send(TransportEvent::Event(event)).await.is_err() {
                        return Outcome::ReceiverGone;
                    }
                }
                Err(DecodeError::Unknown(name)) => {
                    tracing::debug!(event = %name, "Ignoring unknown stream event");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed stream event");
                }
            }
        }
        Outcome::Ended
    }

    async fn wait_for_cooldown(&self) {
        let wait = {
            let mut last = match self.last_attempt.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let start = match *last {
                Some(previous) => (previous + self.policy.cooldown).max(now),
                None => now,
            };
            *last = Some(start);
            start - now
        };

        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting for connection cooldown");
            tokio::time::sleep(wait).await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn finish(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped before final transport event");
        }
    }
}

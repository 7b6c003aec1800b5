//! Sync agent runtime — keeps a [`SyncState`] current against one server.
//!
//! LIFECYCLE
//! =========
//! 1. Connect to `/ws`; the attempt is bounded by `connect_timeout` and only
//!    succeeds once the SNAPSHOT has arrived
//! 2. Apply DELTA messages until the channel ends, a version gap appears, or
//!    nothing arrives for `read_timeout` (the server pings well inside it)
//! 3. On loss: mark disconnected, pull `GET /api/spaces` (at most once per
//!    `poll_interval`), sleep with jittered exponential back-off, go to 1
//!
//! A version gap skips the pull and back-off and reconnects immediately.
//! State is published on a `watch` channel after every applied event.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use wire::{ClientMessage, ServerMessage, Space, SpaceType};

use super::state::{ApplyOutcome, SpaceFilter, SyncEvent, SyncState};
use crate::api::ApiClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Three server ping intervals.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const HINT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for snapshot")]
    Timeout,
    #[error("message decode failed: {0}")]
    Decode(#[from] wire::CodecError),
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// `http://` or `https://` origin of the server.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub poll_interval: Duration,
    /// Silence on an open channel longer than this counts as a lost connection.
    pub read_timeout: Duration,
}

impl AgentConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Map an HTTP origin to the live channel URL.
///
/// # Errors
///
/// Returns [`AgentError::InvalidBaseUrl`] for schemes other than http/https.
pub fn ws_url(base_url: &str) -> Result<String, AgentError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }

    Err(AgentError::InvalidBaseUrl(base_url.to_owned()))
}

// =============================================================================
// BACKOFF
// =============================================================================

/// Exponential back-off with up to 25% additive jitter, capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, current: min }
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Delay for this attempt; doubles the base for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = base.saturating_mul(2).min(self.max);
        let jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        (base + jitter).min(self.max)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Handle to a running sync agent. Dropping it stops the agent.
pub struct SyncHandle {
    state: watch::Receiver<SyncState>,
    hints: mpsc::Sender<ClientMessage>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// A clone of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receiver notified after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.state.borrow().connected()
    }

    #[must_use]
    pub fn get_by_id(&self, space_id: i64) -> Option<Space> {
        self.state.borrow().get_by_id(space_id).cloned()
    }

    #[must_use]
    pub fn get_by_type(&self, kind: SpaceType) -> Vec<Space> {
        self.state.borrow().get_by_type(kind).into_iter().cloned().collect()
    }

    #[must_use]
    pub fn filter(&self, filter: &SpaceFilter) -> Vec<Space> {
        self.state.borrow().filter(filter).into_iter().cloned().collect()
    }

    /// Send an optimistic HINT. Returns `false` (and sends nothing) while
    /// disconnected or when the hint queue is full. Local state is unchanged.
    pub fn report_local_change(&self, space_id: i64, available_seats: i32) -> bool {
        if !self.connected() {
            return false;
        }
        self.hints.try_send(ClientMessage::Hint { space_id, available_seats }).is_ok()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start an agent on the current Tokio runtime.
///
/// # Errors
///
/// Returns [`AgentError::InvalidBaseUrl`] if `config.base_url` is not http(s).
pub fn spawn(config: AgentConfig) -> Result<SyncHandle, AgentError> {
    let url = ws_url(&config.base_url)?;
    let api = ApiClient::new(config.base_url.clone());
    let (state_tx, state_rx) = watch::channel(SyncState::default());
    let (hint_tx, hint_rx) = mpsc::channel(HINT_QUEUE_CAPACITY);
    let task = tokio::spawn(run(config, url, api, state_tx, hint_rx));
    Ok(SyncHandle { state: state_rx, hints: hint_tx, task })
}

// =============================================================================
// LOOP
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum LiveExit {
    Closed,
    Error(String),
    Resync,
}

async fn run(
    config: AgentConfig,
    url: String,
    api: ApiClient,
    state_tx: watch::Sender<SyncState>,
    mut hints: mpsc::Receiver<ClientMessage>,
) {
    let mut backoff = Backoff::new(config.min_backoff, config.max_backoff);
    let mut last_pull: Option<Instant> = None;

    loop {
        match connect(&url, config.connect_timeout).await {
            Ok((stream, snapshot)) => {
                backoff.reset();
                let version = snapshot.version();
                publish(&state_tx, snapshot.into());
                info!(version, "sync: live channel open");

                let exit = run_live(stream, config.read_timeout, &state_tx, &mut hints).await;
                publish(&state_tx, SyncEvent::ChannelLost);
                if exit == LiveExit::Resync {
                    info!("sync: version gap; resyncing");
                    continue;
                }
                warn!(?exit, "sync: live channel lost");
            }
            Err(e) => debug!(error = %e, "sync: connect failed"),
        }

        while hints.try_recv().is_ok() {}

        if last_pull.is_none_or(|at| at.elapsed() >= config.poll_interval) {
            pull(&api, &state_tx).await;
            last_pull = Some(Instant::now());
        }

        tokio::time::sleep(backoff.next_delay()).await;
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<(WsStream, ServerMessage), AgentError> {
    let fut = async {
        let (mut stream, _) = connect_async(url).await.map_err(|e| AgentError::WsConnect(Box::new(e)))?;
        loop {
            let Some(message) = stream.next().await else {
                return Err(AgentError::WsClosed);
            };
            match message.map_err(|e| AgentError::WsConnect(Box::new(e)))? {
                Message::Text(text) => {
                    let message = wire::decode_server_message(text.as_str())?;
                    if matches!(message, ServerMessage::Snapshot { .. }) {
                        return Ok((stream, message));
                    }
                }
                Message::Close(_) => return Err(AgentError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| AgentError::Timeout)?
}

async fn run_live(
    stream: WsStream,
    read_timeout: Duration,
    state_tx: &watch::Sender<SyncState>,
    hints: &mut mpsc::Receiver<ClientMessage>,
) -> LiveExit {
    let (mut write, mut read) = stream.split();
    let silence = tokio::time::sleep(read_timeout);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            () = &mut silence => {
                return LiveExit::Error(format!("no frame for {}ms", read_timeout.as_millis()));
            }
            frame = read.next() => {
                silence.as_mut().reset(Instant::now() + read_timeout);
                let message = match frame {
                    None | Some(Ok(Message::Close(_))) => return LiveExit::Closed,
                    Some(Err(e)) => return LiveExit::Error(e.to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                match wire::decode_server_message(message.as_str()) {
                    Ok(message) => {
                        if publish(state_tx, message.into()) == ApplyOutcome::Resync {
                            return LiveExit::Resync;
                        }
                    }
                    Err(e) => warn!(error = %e, "sync: dropping undecodable message"),
                }
            }
            Some(hint) = hints.recv() => {
                let text = match wire::encode_message(&hint) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "sync: failed to encode hint");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    return LiveExit::Error(e.to_string());
                }
            }
        }
    }
}

async fn pull(api: &ApiClient, state_tx: &watch::Sender<SyncState>) {
    match api.list_spaces().await {
        Ok((spaces, version)) => {
            debug!(?version, count = spaces.len(), "sync: pulled spaces");
            publish(state_tx, SyncEvent::Pulled { version, spaces });
        }
        Err(e) => debug!(error = %e, "sync: pull failed"),
    }
}

/// Apply an event and notify subscribers only if the state changed.
fn publish(state_tx: &watch::Sender<SyncState>, event: SyncEvent) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::Ignored;
    state_tx.send_if_modified(|state| {
        outcome = state.apply(event);
        outcome == ApplyOutcome::Applied
    });
    outcome
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;

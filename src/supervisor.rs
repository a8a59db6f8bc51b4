//! Connection supervisor: owns the WebSocket session lifecycle
//!
//! `start()` spawns one receive loop per session. The loop connects, reads
//! assembled messages, decodes them, and pushes events onto the shared
//! `EventQueue` until the peer closes, `stop()` cancels it, or the transport
//! fails. Every exit path ends with the same teardown: state `Closed`, a
//! "stopped" notification, and finally the running flag cleared.

use crate::config::BridgeConfig;
use crate::decoder::EventDecoder;
use crate::error::{BridgeError, Result};
use crate::frame::{Assembled, FrameAssembler, FrameSource};
use crate::notify::Notifier;
use crate::queue::EventQueue;
use crate::transport::{Connector, WsConnector};
use crate::types::ConnectionState;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const TAG: &str = "bsevent";

/// Upper bound on the close handshake when a session is cancelled
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The live socket task plus its cancellation handle
struct Session {
    id: Uuid,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

/// How a receive loop ended without a fault
enum Exit {
    Cancelled,
    PeerClosed,
}

/// Manages at most one live WebSocket session at a time
pub struct ConnectionSupervisor {
    url: String,
    max_fragments: usize,
    decoder: EventDecoder,
    connector: Arc<dyn Connector>,
    queue: Arc<EventQueue>,
    notifier: Notifier,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<Mutex<Option<Session>>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor using the tokio-tungstenite connector
    pub fn new(config: &BridgeConfig, queue: Arc<EventQueue>, notifier: Notifier) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        Self::with_connector(config, connector, queue, notifier)
    }

    /// Create a supervisor with a custom connector
    pub fn with_connector(
        config: &BridgeConfig,
        connector: Arc<dyn Connector>,
        queue: Arc<EventQueue>,
        notifier: Notifier,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            url: config.endpoint().to_string(),
            max_fragments: config.max_fragments,
            decoder: EventDecoder::new(config.forward_status),
            connector,
            queue,
            notifier,
            state: Arc::new(state),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn a new session
    ///
    /// Any existing session, live or stale, is force-reset first: it is
    /// cancelled and the new session waits for its task to finish before
    /// connecting, so two sockets never coexist. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::Config(format!("start requires a tokio runtime: {}", e)))?;

        let mut slot = self.lock_session()?;

        let previous = slot.take().and_then(|stale| {
            tracing::warn!(
                session = %stale.id,
                "Previous session was not cleared, invoking force reset"
            );
            stale.cancel.cancel();
            stale.task
        });

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let ctx = SessionContext {
            id,
            url: self.url.clone(),
            max_fragments: self.max_fragments,
            decoder: self.decoder.clone(),
            connector: self.connector.clone(),
            queue: self.queue.clone(),
            notifier: self.notifier.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
            running: running.clone(),
            slot: self.session.clone(),
        };
        let session_slot = self.session.clone();

        let task = runtime.spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::warn!(session = %id, error = %e, "Previous session task ended abnormally");
                }
            }
            ctx.run().await;
            release_session(&session_slot, id);
        });

        tracing::debug!(session = %id, url = %self.url, "Session spawned");

        *slot = Some(Session {
            id,
            cancel,
            running,
            task: Some(task),
        });
        Ok(())
    }

    /// Request cancellation of the live session; returns immediately
    ///
    /// Returns `false` when there was no session to stop.
    pub fn stop(&self) -> bool {
        match self.lock_session() {
            Ok(slot) => match slot.as_ref() {
                Some(session) => {
                    tracing::debug!(session = %session.id, "Stop requested");
                    session.cancel.cancel();
                    true
                }
                None => false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to stop session");
                false
            }
        }
    }

    /// Whether a receive loop is still running
    pub fn is_running(&self) -> bool {
        self.lock_session()
            .map(|slot| {
                slot.as_ref()
                    .map(|s| s.running.load(Ordering::SeqCst))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Cancel the current session; safe to call repeatedly
    ///
    /// The session keeps its slot until its task has torn down, so
    /// `is_running` stays true during cleanup and a following `start` waits
    /// for the old socket to close before connecting.
    pub fn dispose(&self) {
        let slot = match self.session.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(session) = slot.as_ref() {
            if !session.cancel.is_cancelled() {
                tracing::debug!(session = %session.id, "Disposing session");
                session.cancel.cancel();
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<Session>>> {
        self.session
            .lock()
            .map_err(|e| BridgeError::Session(format!("Failed to acquire session lock: {}", e)))
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Clear the slot if it still holds session `id`
fn release_session(slot: &Mutex<Option<Session>>, id: Uuid) {
    let mut slot = match slot.lock() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    if slot.as_ref().is_some_and(|s| s.id == id) {
        *slot = None;
        tracing::debug!(session = %id, "Session released");
    }
}

/// Everything a receive loop needs, owned by its task
struct SessionContext {
    id: Uuid,
    url: String,
    max_fragments: usize,
    decoder: EventDecoder,
    connector: Arc<dyn Connector>,
    queue: Arc<EventQueue>,
    notifier: Notifier,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<Session>>>,
}

impl SessionContext {
    async fn run(self) {
        self.notifier.info(TAG, "WebSocket loop started");

        match AssertUnwindSafe(self.receive_loop()).catch_unwind().await {
            Ok(Ok(Exit::Cancelled)) => {
                tracing::info!(session = %self.id, "WebSocket loop cancelled");
            }
            Ok(Ok(Exit::PeerClosed)) => {
                tracing::info!(session = %self.id, "WebSocket closed by peer");
            }
            Ok(Err(e)) if e.is_transport() => {
                self.set_state(ConnectionState::Faulted);
                self.notifier
                    .error(&format!("{}::transport", TAG), &e.to_string());
                tracing::error!(
                    session = %self.id,
                    url = %self.url,
                    error = ?e,
                    "WebSocket loop stopped with transport error"
                );
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Faulted);
                self.notifier.error(
                    &format!("{}::unexpected", TAG),
                    &format!("Unexpected error, see log for more detail ({})", e),
                );
                tracing::error!(
                    session = %self.id,
                    error = ?e,
                    "WebSocket loop stopped with unexpected error"
                );
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                self.set_state(ConnectionState::Faulted);
                self.notifier.error(
                    &format!("{}::unexpected", TAG),
                    &format!("Unexpected error, see log for more detail ({})", reason),
                );
                tracing::error!(
                    session = %self.id,
                    panic = %reason,
                    "WebSocket loop stopped with unexpected error"
                );
            }
        }

        self.set_state(ConnectionState::Closed);
        self.notifier.info(TAG, "WebSocket loop stopped");
        self.running.store(false, Ordering::SeqCst);
    }

    async fn receive_loop(&self) -> Result<Exit> {
        if self.cancel.is_cancelled() {
            return Ok(Exit::Cancelled);
        }
        self.set_state(ConnectionState::Connecting);

        let mut source = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Exit::Cancelled),
            source = self.connector.connect(&self.url) => source?,
        };

        self.set_state(ConnectionState::Open);
        let mut assembler = FrameAssembler::new(self.max_fragments);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                assembled = assembler.next_message(source.as_mut()) => Some(assembled),
            };

            match next {
                None => {
                    self.set_state(ConnectionState::Closing);
                    self.close_quietly(source.as_mut()).await;
                    return Ok(Exit::Cancelled);
                }
                Some(assembled) => match assembled? {
                    Assembled::Closed => {
                        self.set_state(ConnectionState::Closing);
                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = self.close_quietly(source.as_mut()) => {}
                        }
                        return Ok(Exit::PeerClosed);
                    }
                    Assembled::Text(text) => {
                        if let Some(event) = self.decoder.decode_or_log(&text) {
                            tracing::trace!(session = %self.id, event = %event.name(), "Event queued");
                            self.queue.push(event)?;
                        }
                    }
                    Assembled::Incomplete => continue,
                },
            }
        }
    }

    /// Best-effort close handshake, bounded by `CLOSE_TIMEOUT`
    async fn close_quietly(&self, source: &mut dyn FrameSource) {
        match tokio::time::timeout(CLOSE_TIMEOUT, source.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(session = %self.id, error = %e, "Close handshake failed"),
            Err(_) => tracing::debug!(session = %self.id, "Close handshake timed out"),
        }
    }

    /// Whether this session still owns the supervisor's slot
    fn is_current(&self) -> bool {
        let slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().is_some_and(|s| s.id == self.id)
    }

    /// Publish a state change; a replaced session stays silent
    fn set_state(&self, next: ConnectionState) {
        if !self.is_current() {
            tracing::debug!(session = %self.id, to = %next, "Replaced session, state not published");
            return;
        }
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(session = %self.id, from = %prev, to = %next, "Connection state changed");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

//! Connection manager with automatic reconnect
//!
//! `ConnectionManager` keeps at most one push session alive. A background task
//! drives the transport: it retries failed attempts with exponential backoff,
//! feeds server events to the `EventDispatcher`, and publishes every state
//! change on a `watch` channel.

use super::transport::PushTransport;
use super::types::{
    ConnectionSnapshot, ConnectionStatus, Credentials, ExternalChannelStatus, TransportSignal,
};
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::events::{EventKind, SyncEvent};
use crate::settings::{EventCatalog, ReconnectPolicy};
use crate::Error;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Shared {
    transport: Arc<dyn PushTransport>,
    url: String,
    policy: ReconnectPolicy,
    catalog: EventCatalog,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionSnapshot>,
}

struct Session {
    id: u64,
    task: JoinHandle<()>,
}

/// Why a link ended
enum LinkEnd {
    /// The handshake never completed
    Failed,
    /// The link was up and went away
    Lost,
}

/// Handle to a running push session
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    session_id: u64,
    state: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionHandle {
    /// Identifier of the session this handle refers to
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Current connection state
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state.borrow().clone()
    }

    /// Wait until the channel is connected or reconnecting gave up
    ///
    /// Returns `true` if connected.
    pub async fn connected(&mut self) -> bool {
        match self
            .state
            .wait_for(|s| s.is_connected() || s.exhausted)
            .await
        {
            Ok(snapshot) => snapshot.is_connected(),
            Err(_) => false,
        }
    }
}

/// Owner of the push channel
///
/// `connect` must be called from within a Tokio runtime.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager for the push channel at `url`
    pub fn new(
        transport: Arc<dyn PushTransport>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
        catalog: EventCatalog,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                url: url.into(),
                policy,
                catalog,
                dispatcher: EventDispatcher::new(),
                state,
            }),
            session: Mutex::new(None),
            next_session: AtomicU64::new(0),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A session counts as live until its driver ends or gives up
    fn is_live(&self, session: &Session) -> bool {
        !session.task.is_finished() && !self.shared.state.borrow().exhausted
    }

    fn is_running(&self) -> bool {
        self.session().as_ref().is_some_and(|session| self.is_live(session))
    }

    fn handle(&self, session_id: u64) -> ConnectionHandle {
        ConnectionHandle {
            session_id,
            state: self.shared.state.subscribe(),
        }
    }

    /// Start the push session
    ///
    /// Without credentials (or with an empty token) nothing is attempted, the
    /// state is `Disconnected` and `None` is returned. While a session is
    /// running, further calls return a handle to that same session. After
    /// reconnecting gave up, a call starts a fresh session.
    pub fn connect(&self, credentials: Option<&Credentials>) -> Option<ConnectionHandle> {
        let Some(token) = credentials
            .map(|c| c.token.as_str())
            .filter(|token| !token.is_empty())
        else {
            if self.is_running() {
                warn!("No credentials, leaving the running push session untouched");
            } else {
                warn!("No credentials, push channel stays disconnected");
                self.shared.state.send_modify(|s| s.status = ConnectionStatus::Disconnected);
            }
            return None;
        };

        let mut session = self.session();
        if let Some(existing) = session.as_ref() {
            if self.is_live(existing) {
                debug!("Push session {} already running", existing.id);
                return Some(self.handle(existing.id));
            }
        }

        if let Some(previous) = session.take() {
            previous.task.abort();
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Starting push session {} to {}", id, self.shared.url);
        self.shared.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.attempts = 0;
            s.exhausted = false;
        });

        let task = tokio::spawn(drive(self.shared.clone(), id, token.to_string()));
        *session = Some(Session { id, task });
        Some(self.handle(id))
    }

    /// Tear the push session down
    ///
    /// Idempotent. Every handler registered on the dispatcher is dropped, so
    /// no handler from this session runs after this returns.
    pub async fn disconnect(&self) {
        let session = self.session().take();
        if let Some(session) = session {
            info!("Stopping push session {}", session.id);
            session.task.abort();
            let _ = session.task.await;
            self.shared.transport.close().await;
        }
        self.shared.dispatcher.clear();
        self.shared.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.presence.clear();
            s.qr_code = None;
            s.attempts = 0;
        });
    }

    /// Send a client-initiated event
    ///
    /// Only sent while connected; returns whether the event went out.
    pub async fn emit(&self, event: &str, payload: Value) -> bool {
        if !self.shared.state.borrow().is_connected() {
            warn!("Not connected, dropping outgoing '{}'", event);
            return false;
        }
        match self.shared.transport.emit(event, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to emit '{}': {}", event, e);
                false
            }
        }
    }

    /// Register a handler for a backend event name
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(event, handler)
    }

    /// Watch connection state changes
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.state.subscribe()
    }

    /// Current connection state
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Whether the push channel is up
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// The dispatcher events are delivered through
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Backend event names
    pub fn catalog(&self) -> &EventCatalog {
        &self.shared.catalog
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session().take() {
            session.task.abort();
        }
    }
}

/// Run one push session until it is aborted or gives up
async fn drive(shared: Arc<Shared>, session_id: u64, token: String) {
    let mut failures: u32 = 0;

    loop {
        shared.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.attempts = failures;
        });

        let attempt = tokio::time::timeout(
            shared.policy.connect_timeout(),
            shared.transport.connect(&shared.url, &token),
        )
        .await
        .unwrap_or_else(|_| Err(Error::Transport("connect timed out".to_string())));

        match attempt {
            Ok(mut signals) => match shared.pump(&mut signals, &mut failures).await {
                LinkEnd::Lost => {}
                LinkEnd::Failed => failures += 1,
            },
            Err(e) => {
                warn!("Push session {} connect failed: {}", session_id, e);
                failures += 1;
            }
        }

        if failures >= shared.policy.max_attempts {
            error!(
                "Push session {} gave up after {} attempts",
                session_id, failures
            );
            shared.state.send_modify(|s| {
                s.status = ConnectionStatus::Disconnected;
                s.attempts = failures;
                s.exhausted = true;
            });
            return;
        }

        shared.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.attempts = failures;
        });
        let delay = shared.policy.delay_for(failures.max(1));
        debug!("Reconnecting in {:?} (attempt {})", delay, failures + 1);
        tokio::time::sleep(delay).await;
    }
}

impl Shared {
    /// Consume signals from one link until it ends
    async fn pump(
        &self,
        signals: &mut mpsc::Receiver<TransportSignal>,
        failures: &mut u32,
    ) -> LinkEnd {
        let mut established = false;

        while let Some(signal) = signals.recv().await {
            match signal {
                TransportSignal::Connected => {
                    established = true;
                    *failures = 0;
                    self.state.send_modify(|s| {
                        s.status = ConnectionStatus::Connected;
                        s.attempts = 0;
                        s.epoch += 1;
                    });
                    info!("Push channel connected");
                }
                TransportSignal::ConnectError { message } => {
                    warn!("Push channel handshake failed: {}", message);
                    return LinkEnd::Failed;
                }
                TransportSignal::Disconnected { reason } => {
                    info!("Push channel lost: {}", reason);
                    break;
                }
                TransportSignal::Event { name, payload } => {
                    self.observe(&name, &payload);
                    self.dispatcher.dispatch(&name, &payload);
                }
            }
        }

        if established {
            LinkEnd::Lost
        } else {
            LinkEnd::Failed
        }
    }

    /// Fold connection-scoped events into the snapshot
    fn observe(&self, name: &str, payload: &Value) {
        let Some(kind) = self.catalog.kind(name).filter(EventKind::is_connection_scoped) else {
            return;
        };
        let event = match SyncEvent::decode(kind, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring '{}': {}", name, e);
                return;
            }
        };

        self.state.send_modify(|s| match event {
            SyncEvent::PresenceUpdate(agents) => s.presence = agents,
            SyncEvent::ExternalChannelStatus(status) => {
                s.external_channel = status;
                if status == ExternalChannelStatus::Connected {
                    s.qr_code = None;
                }
            }
            SyncEvent::ExternalChannelQrCode(qr) => {
                s.external_channel = ExternalChannelStatus::AwaitingQr;
                s.qr_code = Some(qr);
            }
            _ => {}
        });
    }
}

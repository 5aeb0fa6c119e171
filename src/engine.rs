//! Synchronization engine
//!
//! `SyncEngine` owns the conversation list and the active window and keeps
//! them consistent with the REST API and the push channel:
//! - REST results are applied through tickets, so a late response for a
//!   superseded request is discarded
//! - push events are decoded and run through the reconciliation rules
//! - every new `Connected` epoch of the push channel triggers a full resync
//!
//! All cache mutations happen under one lock and never across an `.await`, so
//! readers always see a consistent state.

use crate::api::ChatApi;
use crate::cache::{ActiveWindow, Applied, ConversationList, LiveAppend};
use crate::connection::ConnectionManager;
use crate::dispatcher::Subscription;
use crate::events::{EventKind, SyncEvent};
use crate::model::{Conversation, ConversationPatch, LoadState, Message, Note};
use crate::reconcile::{self, Effects};
use crate::settings::SyncSettings;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use crate::reconcile::Notice;

#[derive(Default)]
struct State {
    list: ConversationList,
    list_load: LoadState,
    list_token: u64,
    list_page: u32,
    window: ActiveWindow,
}

struct Inner {
    api: Arc<dyn ChatApi>,
    settings: SyncSettings,
    state: Mutex<State>,
    notices: broadcast::Sender<Notice>,
}

/// Client-side synchronization core
///
/// Cheap to clone; clones share the same caches.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Create an engine with empty caches
    pub fn new(api: Arc<dyn ChatApi>, settings: SyncSettings) -> Self {
        let (notices, _) = broadcast::channel(settings.notice_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                state: Mutex::new(State {
                    list_page: 1,
                    ..State::default()
                }),
                notices,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Settings the engine was created with
    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Receive notices raised by push events
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Fetch conversation list page `page` and replace the cached page with it
    ///
    /// Only the most recent request is applied; an older response arriving
    /// later is dropped and reported as success.
    pub async fn refresh_list(&self, page: u32) -> Result<()> {
        let token = {
            let mut state = self.state();
            state.list_token += 1;
            state.list_load = LoadState::Pending;
            state.list_token
        };

        let result = self
            .inner
            .api
            .list_conversations(page, self.inner.settings.conversation_page_size)
            .await;

        let mut state = self.state();
        if state.list_token != token {
            debug!("Discarding stale conversation page {}", page);
            return Ok(());
        }
        match result {
            Ok(fetched) => {
                debug!("Conversation page {}: {} items", page, fetched.items.len());
                state.list.replace_page(fetched.items, fetched.meta);
                state.list_page = page;
                state.list_load = LoadState::Idle;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversation page {}: {}", page, e);
                state.list_load = LoadState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Fetch the list page currently shown again
    pub async fn reload_list(&self) -> Result<()> {
        let page = self.state().list_page;
        self.refresh_list(page).await
    }

    /// Open a conversation, replacing the active window
    ///
    /// History (page `page`, or the newest when `None`) and notes are fetched
    /// together. If another `open` starts before this one resolves, this result
    /// is discarded and `Applied::Stale` is returned. Opening resets the
    /// conversation's unread counter locally.
    pub async fn open(&self, conversation_id: &str, page: Option<u32>) -> Result<Applied> {
        let ticket = {
            let mut state = self.state();
            let details = state.list.get(conversation_id).cloned();
            state.list.reset_unread(conversation_id);
            state.window.begin_open(conversation_id, page, details)
        };
        debug!("Opening {} (request {})", conversation_id, ticket.token());

        let api = &self.inner.api;
        let (messages, notes) = tokio::join!(
            api.list_messages(
                conversation_id,
                page,
                self.inner.settings.message_page_size
            ),
            api.fetch_notes(conversation_id),
        );
        let notes = notes.unwrap_or_else(|e| {
            warn!("Failed to load notes for {}: {}", conversation_id, e);
            Vec::new()
        });

        let mut state = self.state();
        match messages {
            Ok(messages) => Ok(state.window.complete_open(&ticket, messages, notes)),
            Err(e) => match state.window.fail_open(&ticket, e.to_string()) {
                Applied::Stale => Ok(Applied::Stale),
                Applied::Accepted { .. } => {
                    warn!("Failed to open {}: {}", conversation_id, e);
                    Err(e)
                }
            },
        }
    }

    /// Prepend the next older page of the open conversation
    ///
    /// Returns `None` without fetching when nothing is open, an open or an
    /// older-page fetch is still in flight, or there is no older history.
    pub async fn load_older(&self) -> Result<Option<Applied>> {
        let Some(ticket) = self.state().window.begin_load_older() else {
            return Ok(None);
        };

        let result = self
            .inner
            .api
            .list_messages(
                ticket.conversation_id(),
                Some(ticket.page()),
                self.inner.settings.message_page_size,
            )
            .await;

        let mut state = self.state();
        match result {
            Ok(page) => Ok(Some(state.window.complete_load_older(&ticket, page))),
            Err(e) => match state.window.fail_load_older(&ticket, e.to_string()) {
                Applied::Stale => Ok(Some(Applied::Stale)),
                Applied::Accepted { .. } => Err(e),
            },
        }
    }

    /// Close the active window
    pub fn close(&self) {
        self.state().window.close();
    }

    /// Mark a conversation read on the server, then locally
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.inner.api.mark_read(conversation_id).await?;
        let mut state = self.state();
        state.list.reset_unread(conversation_id);
        state.window.mark_read(conversation_id, Utc::now());
        Ok(())
    }

    /// Assign a conversation to `agent_id`, or to this agent when `None`
    pub async fn assign(&self, conversation_id: &str, agent_id: Option<&str>) -> Result<()> {
        let confirmed = self.inner.api.assign(conversation_id, agent_id).await?;
        self.apply_confirmed(confirmed);
        Ok(())
    }

    /// Release a conversation back to the queue
    pub async fn release(&self, conversation_id: &str) -> Result<()> {
        let confirmed = self.inner.api.release(conversation_id).await?;
        self.apply_confirmed(confirmed);
        Ok(())
    }

    /// Remove the assignee of a conversation
    pub async fn unassign(&self, conversation_id: &str) -> Result<()> {
        let confirmed = self.inner.api.unassign(conversation_id).await?;
        self.apply_confirmed(confirmed);
        Ok(())
    }

    fn apply_confirmed(&self, confirmed: Option<ConversationPatch>) {
        let Some(patch) = confirmed else {
            return;
        };
        let mut state = self.state();
        state.list.merge(&patch);
        state.window.update_details(&patch);
    }

    /// Send a text message and add the confirmed message to the caches
    ///
    /// The server's push echo of the same message is then a duplicate.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let message = self.inner.api.send_message(conversation_id, content).await?;

        let mut state = self.state();
        let mut patch = ConversationPatch::new(conversation_id);
        patch.last_message_preview = Some(message.preview());
        state.list.upsert_from_event(&patch, Utc::now());
        if let LiveAppend::Duplicate = state.window.append_live(message.clone()) {
            debug!("Sent message {} already in history", message.id);
        }
        Ok(message)
    }

    /// Add an internal note and show it if the conversation is open
    pub async fn create_note(&self, conversation_id: &str, content: &str) -> Result<Note> {
        let note = self.inner.api.create_note(conversation_id, content).await?;
        self.state().window.append_note(note.clone());
        Ok(note)
    }

    /// Decode and apply a push event by its backend name
    ///
    /// Unknown names are ignored. Connection-scoped events (presence, external
    /// channel) leave the caches untouched.
    ///
    /// # Errors
    /// Returns `Error::Payload` when the payload cannot be decoded; the caches
    /// are left unchanged.
    pub fn handle_event(&self, name: &str, payload: &Value) -> Result<Effects> {
        match self.inner.settings.events.kind(name) {
            Some(kind) => self.handle_kind(kind, payload),
            None => {
                debug!("Ignoring unknown event '{}'", name);
                Ok(Effects::default())
            }
        }
    }

    fn handle_kind(&self, kind: EventKind, payload: &Value) -> Result<Effects> {
        let event = SyncEvent::decode(kind, payload)?;
        let effects = {
            let mut state = self.state();
            let state = &mut *state;
            reconcile::apply(event, &mut state.list, &mut state.window, Utc::now())
        };

        for notice in &effects.notices {
            if self.inner.notices.send(notice.clone()).is_err() {
                debug!("No notice receivers, {:?} dropped", notice);
            }
        }
        if effects.reload_list {
            self.spawn_reload();
        }
        Ok(effects)
    }

    fn spawn_reload(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime, list reload skipped");
            return;
        };
        let engine = self.clone();
        runtime.spawn(async move {
            if let Err(e) = engine.reload_list().await {
                warn!("List reload failed: {}", e);
            }
        });
    }

    /// Re-pull authoritative state after a reconnect
    ///
    /// Replaces the list with page 1 and, if a conversation is open, reopens
    /// it with fresh history. The reopen is skipped when the window was
    /// reopened or closed while the list was loading. Both run even if one
    /// fails; the first error is returned.
    pub async fn resync(&self) -> Result<()> {
        info!("Resynchronizing after reconnect");
        let open = {
            let state = self.state();
            state
                .window
                .conversation_id()
                .map(|id| (id.to_string(), state.window.token()))
        };

        let listed = self.refresh_list(1).await;
        let reopened = match open {
            Some((conversation_id, token)) if self.still_open(&conversation_id, token) => {
                self.open(&conversation_id, None).await.map(|_| ())
            }
            Some((conversation_id, _)) => {
                debug!("Window moved on from {} during resync", conversation_id);
                Ok(())
            }
            None => Ok(()),
        };
        listed.and(reopened)
    }

    /// Whether the window still shows `conversation_id` from the open that
    /// produced `token`
    fn still_open(&self, conversation_id: &str, token: u64) -> bool {
        let state = self.state();
        state.window.token() == token && state.window.is_open_for(conversation_id)
    }

    /// Route the push channel's events into this engine
    ///
    /// Installs one handler per cache-relevant event and a watcher that calls
    /// `resync` whenever the channel enters a new `Connected` epoch. Binding
    /// before `connect()` makes the first connection perform the initial load.
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self, manager: &ConnectionManager) -> Binding {
        let subscriptions = EventKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_connection_scoped())
            .map(|kind| {
                let engine = self.clone();
                manager.subscribe(manager.catalog().name(kind), move |payload| {
                    engine.handle_kind(kind, payload)?;
                    Ok(())
                })
            })
            .collect();

        let mut state = manager.watch();
        let engine = self.clone();
        let watcher = tokio::spawn(async move {
            let mut epoch = state.borrow_and_update().epoch;
            while state.changed().await.is_ok() {
                let current = state.borrow_and_update().epoch;
                if current == epoch {
                    continue;
                }
                epoch = current;
                if let Err(e) = engine.resync().await {
                    warn!("Resync failed: {}", e);
                }
            }
        });

        Binding {
            subscriptions,
            watcher,
        }
    }

    /// Read both caches under one lock
    pub fn read<R>(&self, f: impl FnOnce(&ConversationList, &ActiveWindow) -> R) -> R {
        let state = self.state();
        f(&state.list, &state.window)
    }

    /// Cached conversations, front first
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().list.as_slice().to_vec()
    }

    /// One cached conversation
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state().list.get(conversation_id).cloned()
    }

    /// Id of the open conversation
    pub fn open_conversation(&self) -> Option<String> {
        self.state().window.conversation_id().map(str::to_string)
    }

    /// History of the open conversation, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.state().window.messages().to_vec()
    }

    /// Notes of the open conversation
    pub fn notes(&self) -> Vec<Note> {
        self.state().window.notes().to_vec()
    }

    /// State of the last list fetch
    pub fn list_state(&self) -> LoadState {
        self.state().list_load.clone()
    }

    /// State of the open fetch of the active window
    pub fn open_state(&self) -> LoadState {
        self.state().window.load_state()
    }

    /// State of the older-page fetch of the active window
    pub fn older_state(&self) -> LoadState {
        self.state().window.older_state()
    }
}

/// Event routing installed by `SyncEngine::bind`
///
/// Dropping it removes the handlers and stops the resync watcher.
pub struct Binding {
    subscriptions: Vec<Subscription>,
    watcher: JoinHandle<()>,
}

impl Binding {
    /// Whether every handler is still registered
    ///
    /// Becomes `false` after the connection manager disconnects.
    pub fn is_active(&self) -> bool {
        self.subscriptions.iter().all(Subscription::is_active)
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.watcher.abort();
    }
}

//! In-memory push transport
//!
//! `LoopbackTransport` implements `PushTransport` without a network. The same
//! value acts as the "server side": it can refuse connect attempts, deliver
//! events, drop the link, and records what the client emitted.

use super::transport::PushTransport;
use super::types::TransportSignal;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Buffered signals per link
const LINK_BUFFER_SIZE: usize = 64;

#[derive(Default)]
struct LoopbackState {
    link: Option<mpsc::Sender<TransportSignal>>,
    refusals: u32,
    attempts: u32,
    tokens: Vec<String>,
    emitted: Vec<(String, Value)>,
}

/// In-memory push channel with a scriptable server side
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    notify: Arc<Notify>,
}

impl LoopbackTransport {
    /// Create a transport that accepts every connect attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connect attempts
    pub async fn refuse_next(&self, count: u32) {
        self.state.lock().await.refusals = count;
    }

    /// Deliver a server event on the current link
    ///
    /// Returns `false` if no link is up.
    pub async fn deliver(&self, name: &str, payload: Value) -> bool {
        let link = self.state.lock().await.link.clone();
        match link {
            Some(link) => link
                .send(TransportSignal::Event {
                    name: name.to_string(),
                    payload,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the current link as if the network went away
    pub async fn drop_link(&self, reason: &str) {
        let link = self.state.lock().await.link.take();
        if let Some(link) = link {
            let _ = link
                .send(TransportSignal::Disconnected {
                    reason: reason.to_string(),
                })
                .await;
        }
        self.notify.notify_waiters();
    }

    /// Whether a link is currently up
    pub async fn is_linked(&self) -> bool {
        self.state
            .lock()
            .await
            .link
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    /// Number of connect attempts seen so far
    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    /// Tokens presented by each connect attempt
    pub async fn tokens(&self) -> Vec<String> {
        self.state.lock().await.tokens.clone()
    }

    /// Events the client emitted
    pub async fn emitted(&self) -> Vec<(String, Value)> {
        self.state.lock().await.emitted.clone()
    }

    /// Wait until at least `count` connect attempts happened
    pub async fn wait_for_attempts(&self, count: u32) {
        loop {
            let notified = self.notify.notified();
            if self.attempts().await >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl PushTransport for LoopbackTransport {
    async fn connect(&self, _url: &str, token: &str) -> Result<mpsc::Receiver<TransportSignal>> {
        let result = {
            let mut state = self.state.lock().await;
            state.attempts += 1;
            state.tokens.push(token.to_string());

            if state.refusals > 0 {
                state.refusals -= 1;
                Err(Error::Transport("connection refused".to_string()))
            } else {
                let (tx, rx) = mpsc::channel(LINK_BUFFER_SIZE);
                tx.try_send(TransportSignal::Connected)
                    .map_err(|e| Error::Transport(format!("Failed to signal handshake: {}", e)))?;
                state.link = Some(tx);
                Ok(rx)
            }
        };
        self.notify.notify_waiters();
        result
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.link.is_none() {
            return Err(Error::Transport("not linked".to_string()));
        }
        state.emitted.push((event.to_string(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.link = None;
        self.notify.notify_waiters();
    }
}

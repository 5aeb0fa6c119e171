//! Push channel collaborator interface

use super::types::TransportSignal;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A bidirectional push channel to the backend
///
/// One `connect` call is one attempt. On success the transport returns a
/// receiver on which it first reports `Connected` (or `ConnectError`), then
/// server events in delivery order, and finally `Disconnected` or a closed
/// channel when the link goes away. Reconnecting is the caller's job.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open the channel to `url`, authenticating with `token`
    async fn connect(&self, url: &str, token: &str) -> Result<mpsc::Receiver<TransportSignal>>;

    /// Send a client-initiated event
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Tear down the current link, if any, without emitting a signal
    async fn close(&self);
}

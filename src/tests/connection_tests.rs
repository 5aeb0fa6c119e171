use super::support::{fast_settings, within};
use crate::connection::{
    ConnectionManager, ConnectionStatus, Credentials, ExternalChannelStatus, LoopbackTransport,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manager() -> (ConnectionManager, LoopbackTransport) {
    let transport = LoopbackTransport::new();
    let settings = fast_settings();
    let manager = ConnectionManager::new(
        Arc::new(transport.clone()),
        settings.socket_url,
        settings.reconnect,
        settings.events,
    );
    (manager, transport)
}

fn credentials() -> Credentials {
    Credentials::new("token-1")
}

#[tokio::test]
async fn test_connect_without_credentials_stays_disconnected() {
    let (manager, transport) = manager();

    assert!(manager.connect(None).is_none());
    assert!(manager.connect(Some(&Credentials::new(""))).is_none());

    assert_eq!(manager.snapshot().status, ConnectionStatus::Disconnected);
    assert_eq!(transport.attempts().await, 0);
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let (manager, transport) = manager();

    let mut handle = manager.connect(Some(&credentials())).unwrap();

    assert!(within(handle.connected()).await);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.epoch, 1);
    assert_eq!(transport.tokens().await, vec!["token-1"]);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (manager, transport) = manager();

    let mut first = manager.connect(Some(&credentials())).unwrap();
    within(first.connected()).await;
    let second = manager.connect(Some(&credentials())).unwrap();

    assert_eq!(first.session_id(), second.session_id());
    assert_eq!(transport.attempts().await, 1);
    assert_eq!(manager.snapshot().epoch, 1);
}

#[tokio::test]
async fn test_connect_without_credentials_keeps_running_session() {
    let (manager, transport) = manager();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    manager.subscribe("newChat", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;

    assert!(manager.connect(None).is_none());

    assert_eq!(manager.snapshot().status, ConnectionStatus::Connected);
    assert!(manager.is_connected());
    assert!(transport.is_linked().await);
    assert!(manager.emit("typing", json!({ "chatId": 1 })).await);
    assert!(transport.deliver("newChat", json!({ "id": 1 })).await);
    super::support::eventually(|| seen.load(Ordering::SeqCst) == 1).await;
    assert_eq!(transport.attempts().await, 1);
}

#[tokio::test]
async fn test_events_reach_subscribers() {
    let (manager, transport) = manager();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    manager.subscribe("newChat", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;
    assert!(transport.deliver("newChat", json!({ "id": 1 })).await);

    super::support::eventually(|| seen.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_presence_and_external_channel_are_tracked() {
    let (manager, transport) = manager();
    let mut state = manager.watch();
    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;

    transport.deliver("presenceUpdate", json!([{ "id": 4 }, { "id": 9 }])).await;
    let snapshot = within(state.wait_for(|s| !s.presence.is_empty())).await.unwrap().clone();
    assert_eq!(snapshot.presence.into_iter().collect::<Vec<_>>(), vec!["4", "9"]);

    transport.deliver("admin:qr", json!({ "qr": "2@pairing" })).await;
    let snapshot = within(state.wait_for(|s| s.qr_code.is_some())).await.unwrap().clone();
    assert_eq!(snapshot.external_channel, ExternalChannelStatus::AwaitingQr);

    transport.deliver("admin:status", json!({ "status": "connected" })).await;
    let snapshot = within(state.wait_for(|s| s.qr_code.is_none())).await.unwrap().clone();
    assert_eq!(snapshot.external_channel, ExternalChannelStatus::Connected);
}

#[tokio::test]
async fn test_reconnect_after_link_loss_bumps_epoch() {
    let (manager, transport) = manager();
    let mut state = manager.watch();
    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;

    transport.drop_link("network down").await;

    let snapshot = within(state.wait_for(|s| s.epoch == 2)).await.unwrap().clone();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(transport.attempts().await, 2);
}

#[tokio::test]
async fn test_refused_attempts_are_retried() {
    let (manager, transport) = manager();
    transport.refuse_next(2).await;

    let mut handle = manager.connect(Some(&credentials())).unwrap();

    assert!(within(handle.connected()).await);
    assert_eq!(transport.attempts().await, 3);
    assert_eq!(manager.snapshot().attempts, 0);
}

#[tokio::test]
async fn test_exhausted_attempts_are_terminal() {
    let (manager, transport) = manager();
    transport.refuse_next(100).await;

    let mut handle = manager.connect(Some(&credentials())).unwrap();

    assert!(!within(handle.connected()).await);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(snapshot.exhausted);
    assert_eq!(snapshot.attempts, 3);
    assert_eq!(transport.attempts().await, 3);

    // A caller-initiated retry starts a new session
    transport.refuse_next(0).await;
    let mut retry = manager.connect(Some(&credentials())).unwrap();
    assert_ne!(retry.session_id(), handle.session_id());
    assert!(within(retry.connected()).await);
}

#[tokio::test]
async fn test_disconnect_clears_handlers() {
    let (manager, transport) = manager();
    let subscription = manager.subscribe("newMessage", |_| Ok(()));
    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;

    manager.disconnect().await;
    manager.disconnect().await;

    assert!(!subscription.is_active());
    assert_eq!(manager.dispatcher().handler_count("newMessage"), 0);
    assert_eq!(manager.snapshot().status, ConnectionStatus::Disconnected);
    assert!(manager.snapshot().presence.is_empty());
    assert!(!transport.is_linked().await);
}

#[tokio::test]
async fn test_emit_only_while_connected() {
    let (manager, transport) = manager();

    assert!(!manager.emit("chat:typing", json!({ "chatId": 1 })).await);

    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;
    assert!(manager.emit("chat:typing", json!({ "chatId": 1 })).await);

    manager.disconnect().await;
    assert!(!manager.emit("chat:typing", json!({ "chatId": 2 })).await);

    let emitted = transport.emitted().await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, "chat:typing");
}

#[tokio::test]
async fn test_reconnect_after_disconnect_needs_new_subscriptions() {
    let (manager, transport) = manager();
    let mut handle = manager.connect(Some(&credentials())).unwrap();
    within(handle.connected()).await;
    manager.disconnect().await;

    let mut handle = manager.connect(Some(&Credentials::new("token-2"))).unwrap();
    within(handle.connected()).await;

    assert_eq!(manager.dispatcher().handler_count("newMessage"), 0);
    assert_eq!(transport.tokens().await, vec!["token-1", "token-2"]);
    assert_eq!(manager.snapshot().epoch, 2);
}

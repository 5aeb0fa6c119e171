use crate::dispatcher::{DispatchReport, EventDispatcher};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_handlers_run_in_registration_order() {
    let dispatcher = EventDispatcher::new();
    let log = recorder();

    for label in ["first", "second", "third"] {
        let log = log.clone();
        dispatcher.subscribe("newMessage", move |_| {
            log.lock().unwrap().push(label.to_string());
            Ok(())
        });
    }

    let report = dispatcher.dispatch("newMessage", &json!({}));

    assert_eq!(report, DispatchReport { handled: 3, failed: 0 });
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_failing_handler_does_not_block_siblings() {
    let dispatcher = EventDispatcher::new();
    let log = recorder();

    dispatcher.subscribe("newChat", |_| Err(anyhow::anyhow!("malformed payload")));
    dispatcher.subscribe("newChat", |_| panic!("handler bug"));
    let after = log.clone();
    dispatcher.subscribe("newChat", move |payload: &Value| {
        after.lock().unwrap().push(payload["id"].to_string());
        Ok(())
    });

    let report = dispatcher.dispatch("newChat", &json!({ "id": 7 }));

    assert_eq!(report, DispatchReport { handled: 1, failed: 2 });
    assert_eq!(*log.lock().unwrap(), vec!["7"]);
}

#[test]
fn test_dispatch_without_handlers_is_noop() {
    let dispatcher = EventDispatcher::new();
    assert_eq!(dispatcher.dispatch("unknown", &Value::Null), DispatchReport::default());
}

#[test]
fn test_unsubscribe_is_idempotent() {
    let dispatcher = EventDispatcher::new();
    let first = dispatcher.subscribe("messagesRead", |_| Ok(()));
    let second = dispatcher.subscribe("messagesRead", |_| Ok(()));

    first.unsubscribe();
    first.unsubscribe();

    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(dispatcher.handler_count("messagesRead"), 1);
}

#[test]
fn test_clear_invalidates_earlier_subscriptions() {
    let dispatcher = EventDispatcher::new();
    let stale = dispatcher.subscribe("assignedChat", |_| Ok(()));

    dispatcher.clear();
    assert_eq!(dispatcher.generation(), 1);
    assert!(!stale.is_active());

    let fresh = dispatcher.subscribe("assignedChat", |_| Ok(()));
    stale.unsubscribe();

    assert!(fresh.is_active());
    assert_eq!(dispatcher.dispatch("assignedChat", &json!({})).handled, 1);
}

#[test]
fn test_handler_may_subscribe_during_dispatch() {
    let dispatcher = EventDispatcher::new();
    let inner = dispatcher.clone();

    dispatcher.subscribe("presenceUpdate", move |_| {
        inner.subscribe("presenceUpdate", |_| Ok(()));
        Ok(())
    });

    assert_eq!(dispatcher.dispatch("presenceUpdate", &json!([])).handled, 1);
    assert_eq!(dispatcher.handler_count("presenceUpdate"), 2);
}

#[test]
fn test_subscription_outlives_dispatcher() {
    let subscription = {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe("admin:qr", |_| Ok(()))
    };
    assert!(!subscription.is_active());
    subscription.unsubscribe();
    assert_eq!(subscription.event(), "admin:qr");
}

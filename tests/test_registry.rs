//! Registry behavior: connection lifecycle, fan-out, the unsubscribe
//! matrix, and failure isolation. These tests verify that:
//!
//! - At most one connection exists per endpoint, including under
//!   concurrent cold-start races.
//! - Every subscriber of a (endpoint, command) pair receives each inbound
//!   event; removals are scoped exactly as requested (tag / command /
//!   endpoint / everything).
//! - A subscriber's own failure never suppresses delivery to its
//!   siblings.
//! - Torn-down endpoints come back with a fresh connection on next use.

mod common;

use common::{wait_for, MockFactory, RecordingListener};
use relay_link::{RelayLinkError, SocketConnection, SocketRegistry, TaskPoster};
use std::sync::Arc;
use std::time::Duration;

const EP: &str = "ws://gateway:9000";

#[test]
fn test_empty_endpoint_fails_synchronously() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let listener = RecordingListener::new();

    assert!(matches!(
        registry.send("", "cmd", 1, "{}", listener.clone()),
        Err(RelayLinkError::InvalidTarget(_))
    ));
    assert!(matches!(
        registry.on("", "cmd", 1, listener),
        Err(RelayLinkError::InvalidTarget(_))
    ));
    assert_eq!(factory.created(), 0);
}

#[test]
fn test_send_connects_forwards_and_subscribes() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let listener = RecordingListener::new();

    registry
        .send(EP, "login", 1, "{\"user\":\"a\"}", listener.clone())
        .unwrap();

    let connection = factory.connection(0);
    assert_eq!(factory.created(), 1);
    assert_eq!(connection.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(connection.is_connected());
    assert_eq!(connection.sent(), vec!["{\"user\":\"a\"}".to_string()]);

    // Every send implicitly subscribes to the response channel.
    connection.emit_result("login", "ok");
    assert_eq!(listener.results(), vec!["ok".to_string()]);
}

#[test]
fn test_concurrent_cold_start_creates_one_connection() {
    let factory = MockFactory::new();
    let registry = Arc::new(SocketRegistry::new(factory.clone()));

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            let listener = RecordingListener::new();
            match i % 3 {
                0 => registry.connect(EP).unwrap(),
                1 => registry.on(EP, "push", i + 1, listener).unwrap(),
                _ => registry.send(EP, "req", i + 1, "{}", listener).unwrap(),
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(factory.created(), 1);
    assert_eq!(registry.connection_count(), 1);
}

#[test]
fn test_normalized_endpoints_share_a_connection() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());

    registry.connect("ws://gateway:9000/").unwrap();
    registry
        .on("ws://gateway:9000", "push", 1, RecordingListener::new())
        .unwrap();

    assert_eq!(factory.created(), 1);
    assert_eq!(factory.connection(0).endpoint, "ws://gateway:9000");
}

#[test]
fn test_fanout_reaches_every_tag_and_off_is_tag_scoped() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let first = RecordingListener::new();
    let second = RecordingListener::new();

    registry.on(EP, "push", 1, first.clone()).unwrap();
    registry.on(EP, "push", 2, second.clone()).unwrap();

    let connection = factory.connection(0);
    connection.emit_result("push", "v1");
    assert_eq!(first.results(), vec!["v1".to_string()]);
    assert_eq!(second.results(), vec!["v1".to_string()]);

    registry.off(EP, "push", 1).unwrap();
    connection.emit_result("push", "v2");
    assert_eq!(first.results(), vec!["v1".to_string()]);
    assert_eq!(
        second.results(),
        vec!["v1".to_string(), "v2".to_string()]
    );
}

#[test]
fn test_single_adapter_reaches_late_subscribers() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let early = RecordingListener::new();

    registry.on(EP, "push", 1, early.clone()).unwrap();
    let connection = factory.connection(0);
    connection.emit_result("push", "v1");

    // Registering another tag must not install a second adapter, and the
    // existing adapter must pick the late subscriber up.
    let late = RecordingListener::new();
    registry.on(EP, "push", 2, late.clone()).unwrap();
    assert_eq!(connection.listener_count(), 1);

    connection.emit_result("push", "v2");
    assert_eq!(early.results(), vec!["v1".to_string(), "v2".to_string()]);
    assert_eq!(late.results(), vec!["v2".to_string()]);
}

#[test]
fn test_error_events_fan_out_to_error_callbacks() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let listener = RecordingListener::new();

    registry.on(EP, "push", 1, listener.clone()).unwrap();
    factory.connection(0).emit_error("push", "stream reset");

    assert!(listener.results().is_empty());
    assert_eq!(listener.errors(), vec!["stream reset".to_string()]);
}

#[test]
fn test_failing_success_callback_is_isolated() {
    common::init_logging();
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let broken = RecordingListener::failing_results();
    let healthy = RecordingListener::new();

    registry.on(EP, "push", 1, broken.clone()).unwrap();
    registry.on(EP, "push", 2, healthy.clone()).unwrap();

    factory.connection(0).emit_result("push", "v1");

    // The sibling is unaffected.
    assert_eq!(healthy.results(), vec!["v1".to_string()]);
    assert!(healthy.errors().is_empty());
    // The broken subscriber got its own failure back as an error delivery.
    assert_eq!(broken.errors(), vec!["choked on: v1".to_string()]);
}

#[test]
fn test_failing_error_delivery_is_swallowed() {
    common::init_logging();
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let hopeless = RecordingListener::failing_results();
    hopeless
        .fail_errors
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let healthy = RecordingListener::new();

    registry.on(EP, "push", 1, hopeless).unwrap();
    registry.on(EP, "push", 2, healthy.clone()).unwrap();

    // Must not panic or skip the sibling even though both deliveries to
    // tag 1 fail.
    factory.connection(0).emit_result("push", "v1");
    assert_eq!(healthy.results(), vec!["v1".to_string()]);
}

#[test]
fn test_off_with_empty_command_tears_endpoint_down() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let listener = RecordingListener::new();

    registry.on(EP, "push", 1, listener.clone()).unwrap();
    registry.off(EP, "", 0).unwrap();

    let old = factory.connection(0);
    assert_eq!(old.disconnect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(registry.connection_count(), 0);
    assert_eq!(registry.subscriber_count(EP, "push"), 0);

    // A torn-down endpoint must come back with a fresh connection, not a
    // reused disconnected one.
    registry
        .send(EP, "req", 1, "{}", RecordingListener::new())
        .unwrap();
    assert_eq!(factory.created(), 2);
    assert!(factory.connection(1).is_connected());
    assert!(old.sent().is_empty());
}

#[test]
fn test_off_with_tag_zero_clears_command_but_keeps_connection() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let pushed = RecordingListener::new();
    let other = RecordingListener::new();

    registry.on(EP, "push", 1, RecordingListener::new()).unwrap();
    registry.on(EP, "push", 2, pushed.clone()).unwrap();
    registry.on(EP, "other", 9, other.clone()).unwrap();

    registry.off(EP, "push", 0).unwrap();

    let connection = factory.connection(0);
    assert_eq!(connection.disconnect_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(connection.off_commands(), vec!["push".to_string()]);
    assert_eq!(registry.subscriber_count(EP, "push"), 0);
    assert_eq!(registry.subscriber_count(EP, "other"), 1);

    // Other commands on the same connection stay live.
    connection.emit_result("other", "still here");
    assert_eq!(other.results(), vec!["still here".to_string()]);
    assert!(pushed.results().is_empty());
}

#[test]
fn test_off_all_resets_the_registry() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());

    registry.on(EP, "a", 1, RecordingListener::new()).unwrap();
    registry
        .on("ws://other:9000", "b", 1, RecordingListener::new())
        .unwrap();
    assert_eq!(registry.connection_count(), 2);

    registry.off_all();

    assert_eq!(registry.connection_count(), 0);
    assert_eq!(registry.subscriber_count(EP, "a"), 0);
    assert_eq!(registry.subscriber_count("ws://other:9000", "b"), 0);
    assert_eq!(factory.connection(0).disconnect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(factory.connection(1).disconnect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Behaves as freshly constructed afterwards.
    let listener = RecordingListener::new();
    registry.on(EP, "a", 1, listener.clone()).unwrap();
    assert_eq!(factory.created(), 3);
    factory.connection(2).emit_result("a", "back");
    assert_eq!(listener.results(), vec!["back".to_string()]);
}

#[test]
fn test_dropped_link_reconnects_in_place() {
    let factory = MockFactory::new();
    let registry = SocketRegistry::new(factory.clone());
    let listener = RecordingListener::new();

    registry.on(EP, "push", 1, listener.clone()).unwrap();
    let connection = factory.connection(0);
    connection.drop_link();

    registry.send(EP, "req", 2, "{}", listener.clone()).unwrap();

    // Same instance reconnected, so the existing subscription stays valid.
    assert_eq!(factory.created(), 1);
    assert_eq!(connection.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    connection.emit_result("push", "after reconnect");
    assert_eq!(listener.results(), vec!["after reconnect".to_string()]);
}

#[test]
fn test_poster_backed_delivery_keeps_order_and_thread_affinity() {
    let factory = MockFactory::new();
    let poster = Arc::new(TaskPoster::new());
    let registry = SocketRegistry::with_poster(factory.clone(), poster);
    let listener = RecordingListener::new();

    registry.on(EP, "push", 1, listener.clone()).unwrap();
    let connection = factory.connection(0);
    connection.emit_result("push", "v1");
    connection.emit_result("push", "v2");
    connection.emit_result("push", "v3");

    assert!(wait_for(
        || listener.results().len() == 3,
        Duration::from_secs(2)
    ));
    assert_eq!(
        listener.results(),
        vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]
    );

    // Deliveries ran on the poster's dispatch thread, not the emitter's.
    let threads = listener.delivery_threads();
    assert!(threads.iter().all(|id| *id != std::thread::current().id()));
    assert!(threads.windows(2).all(|pair| pair[0] == pair[1]));
}

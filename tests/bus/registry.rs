//! Registry tests - start, stop, lookup and naming rules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;

use serde_json::json;
use service_bus::{
    BusError, ListenerError, OverflowPolicy, Registry, RuntimeConfig, ServiceKind,
    ServiceOptions,
};

use crate::support::{eventually, registry, Recorder, PATIENCE};

// ============================================================================
// Test 1: start is idempotent by name
// ============================================================================

#[test]
fn start_is_idempotent_by_name() {
    let registry = registry();
    let first = registry.start("kbd", "Keyboard").unwrap();
    let second = registry.start("kbd", "Keyboard").unwrap();

    first.publish("keyPressed", vec![json!("a")]).unwrap();
    let next = second.publish("keyPressed", vec![json!("b")]).unwrap();

    // Both handles drive the same service, so numbering is shared.
    assert_eq!(next.sequence, 2);
    assert_eq!(registry.len(), 1);
}

// ============================================================================
// Test 2: starting an existing name with another kind returns the original
// ============================================================================

#[test]
fn start_with_different_kind_returns_existing_service() {
    let registry = registry();
    registry.start("kbd", "Keyboard").unwrap();
    let again = registry.start("kbd", "Sink").unwrap();
    assert_eq!(again.kind(), "Keyboard");
}

// ============================================================================
// Test 3: unknown kinds are rejected and nothing is registered
// ============================================================================

#[test]
fn unknown_kind_is_rejected() {
    let registry = registry();
    match registry.start("x", "Nope") {
        Err(BusError::UnknownServiceKind(kind)) => assert_eq!(kind, "Nope"),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(!registry.contains("x"));
}

// ============================================================================
// Test 4: malformed names are rejected
// ============================================================================

#[test]
fn malformed_names_are_rejected() {
    let registry = registry();
    for name in ["", "a/b", "two words", "line\nbreak"] {
        assert!(
            matches!(
                registry.start(name, "Keyboard"),
                Err(BusError::InvalidName { .. })
            ),
            "{:?} should be rejected",
            name
        );
    }
    assert!(registry.is_empty());
}

// ============================================================================
// Test 5: stop and lookup of a missing name
// ============================================================================

#[test]
fn missing_names_are_not_found() {
    let registry = registry();
    assert!(matches!(registry.stop("ghost"), Err(BusError::NotFound(_))));
    assert!(matches!(registry.lookup("ghost"), Err(BusError::NotFound(_))));
    assert_eq!(registry.stop_if_present("ghost").unwrap(), None);
}

// ============================================================================
// Test 6: stop releases the name; a restart begins a fresh sequence
// ============================================================================

#[test]
fn stop_releases_the_name() {
    let registry = registry();
    let kbd = registry.start("kbd", "Keyboard").unwrap();
    kbd.publish("keyPressed", vec![json!("a")]).unwrap();

    registry.stop("kbd").unwrap();
    assert!(!registry.contains("kbd"));
    assert!(!kbd.is_running());

    let kbd = registry.start("kbd", "Keyboard").unwrap();
    let msg = kbd.publish("keyPressed", vec![json!("b")]).unwrap();
    assert_eq!(msg.sequence, 1);
}

// ============================================================================
// Test 7: handles to a stopped service report it
// ============================================================================

#[test]
fn stale_handles_report_service_stopped() {
    let registry = registry();
    let kbd = registry.start("kbd", "Keyboard").unwrap();
    registry.start("py", "Sink").unwrap();
    kbd.stop().unwrap();

    assert!(matches!(
        kbd.publish("keyPressed", vec![json!("a")]),
        Err(BusError::ServiceStopped(name)) if name == "kbd"
    ));
    assert!(matches!(
        kbd.subscribe("py", "anything"),
        Err(BusError::ServiceStopped(_))
    ));

    // A restart under the same name is a different service.
    let fresh = registry.start("kbd", "Keyboard").unwrap();
    let py = registry.lookup("py").unwrap();
    py.subscribe("kbd", "keyPressed").unwrap();

    assert!(matches!(kbd.stop(), Err(BusError::ServiceStopped(name)) if name == "kbd"));
    assert!(matches!(
        kbd.unsubscribe("py", "anything"),
        Err(BusError::ServiceStopped(_))
    ));
    assert!(fresh.is_running());
    assert!(registry.contains("kbd"));
    assert_eq!(registry.subscribers("kbd", "keyPressed").unwrap(), vec!["py"]);
}

// ============================================================================
// Test 8: stop drains already-queued messages and returns the final stats
// ============================================================================

#[test]
fn stop_drains_queued_messages() {
    let registry = registry();
    let kbd = registry.start("kbd", "Keyboard").unwrap();
    let py = registry.start("py", "Sink").unwrap();
    let recorder = Recorder::new();
    py.add_listener("keyPressed", recorder.callback()).unwrap();
    py.subscribe("kbd", "keyPressed").unwrap();

    for key in ["a", "b", "c"] {
        kbd.publish("keyPressed", vec![json!(key)]).unwrap();
    }
    let stats = registry.stop("py").unwrap();

    assert_eq!(stats.handled, 3);
    assert_eq!(recorder.first_args(), vec![json!("a"), json!("b"), json!("c")]);
}

// ============================================================================
// Test 9: a failing start hook aborts the start
// ============================================================================

#[test]
fn failing_start_hook_aborts_start() {
    let registry = registry();
    registry.kind(
        ServiceKind::new("Device").on_start(|_| Err(ListenerError::rejected("no device attached"))),
    );

    match registry.start("dev", "Device") {
        Err(BusError::StartFailed { name, reason }) => {
            assert_eq!(name, "dev");
            assert!(reason.contains("no device attached"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(!registry.contains("dev"));
}

// ============================================================================
// Test 10: the stop hook runs exactly once
// ============================================================================

#[test]
fn stop_hook_runs_once() {
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stops);

    let registry = registry();
    registry.kind(ServiceKind::new("Tracked").on_stop(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    registry.start("t", "Tracked").unwrap();
    registry.stop("t").unwrap();
    assert_eq!(registry.stop_if_present("t").unwrap(), None);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Test 11: introspection lists services sorted by name
// ============================================================================

#[test]
fn introspection_is_sorted() {
    let registry = registry();
    registry.start("py", "Sink").unwrap();
    registry.start("kbd", "Keyboard").unwrap();

    assert_eq!(registry.names(), vec!["kbd", "py"]);
    let kinds: Vec<String> = registry
        .services()
        .iter()
        .map(|svc| svc.kind().to_string())
        .collect();
    assert_eq!(kinds, vec!["Keyboard", "Sink"]);
    assert!(registry.kinds().contains(&"Keyboard".to_string()));
}

// ============================================================================
// Test 12: stop_all_except keeps the named services
// ============================================================================

#[test]
fn stop_all_except_keeps_named_services() {
    let registry = registry();
    for name in ["a", "b", "c"] {
        registry.start(name, "Sink").unwrap();
    }
    let stopped: Vec<String> = registry
        .stop_all_except(&["b"])
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    assert_eq!(stopped, vec!["a", "c"]);
    assert_eq!(registry.names(), vec!["b"]);
}

// ============================================================================
// Test 13: dropping the registry stops every service
// ============================================================================

#[test]
fn dropping_the_registry_stops_services() {
    let registry = registry();
    let kbd = registry.start("kbd", "Keyboard").unwrap();
    drop(registry);
    assert!(!kbd.is_running());
    assert!(kbd.publish("keyPressed", vec![json!("a")]).is_err());
}

// ============================================================================
// Test 14: per-service options override the registry defaults
// ============================================================================

#[test]
fn start_with_overrides_mailbox_settings() {
    let registry = Registry::with_config(
        RuntimeConfig::default()
            .with_lifecycle_events(false)
            .with_mailbox_capacity(8),
    )
    .unwrap();
    registry.kind(ServiceKind::new("Sink"));

    let svc = registry
        .start_with(
            "tiny",
            "Sink",
            ServiceOptions::new()
                .mailbox_capacity(2)
                .overflow(OverflowPolicy::DropNewest),
        )
        .unwrap();

    let dump = registry.dump().unwrap();
    assert_eq!(dump["services"][0]["name"], "tiny");
    assert_eq!(dump["services"][0]["capacity"], 2);
    assert!(svc.is_running());
}

// ============================================================================
// Test 15: an invalid configuration is refused
// ============================================================================

#[test]
fn invalid_config_is_refused() {
    let err = Registry::with_config(RuntimeConfig::default().with_mailbox_capacity(0)).unwrap_err();
    assert!(matches!(err, BusError::Config(_)));
}

// ============================================================================
// Test 16: a listener stopping its own service while an external stop joins it
// ============================================================================

#[test]
fn self_stop_during_external_stop_does_not_hang() {
    let registry = Arc::new(registry());
    let svc = registry.start("svc", "Sink").unwrap();
    let outcome = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&outcome);
    svc.add_listener("quit", move |me, _| {
        // Hold the worker until the external stop has retired the service.
        eventually(|| !me.is_running());
        *seen.lock().unwrap() = Some(me.stop());
        Ok(())
    })
    .unwrap();

    svc.publish("quit", vec![]).unwrap();

    let (done_tx, done) = mpsc::channel();
    let stopper = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let _ = done_tx.send(registry.stop("svc"));
        })
    };
    let stats = done
        .recv_timeout(PATIENCE)
        .expect("external stop returned")
        .unwrap();
    stopper.join().unwrap();

    assert_eq!(stats.handled, 1);
    assert!(matches!(
        outcome.lock().unwrap().take(),
        Some(Err(BusError::ServiceStopped(_)))
    ));
}

// ============================================================================
// Test 17: dropping the registry while a service stops itself
// ============================================================================

#[test]
fn drop_during_self_stop_does_not_hang() {
    let registry = registry();
    let svc = registry.start("svc", "Sink").unwrap();
    svc.add_listener("quit", |me, _| {
        eventually(|| !me.is_running());
        let _ = me.stop();
        Ok(())
    })
    .unwrap();
    svc.publish("quit", vec![]).unwrap();

    let (done_tx, done) = mpsc::channel();
    let dropper = thread::spawn(move || {
        drop(registry);
        let _ = done_tx.send(());
    });
    assert!(done.recv_timeout(PATIENCE).is_ok());
    dropper.join().unwrap();
    assert!(!svc.is_running());
}

// ============================================================================
// Test 18: two services stopping each other at the same time
// ============================================================================

#[test]
fn services_can_stop_each_other() {
    let registry = registry();
    let left = registry.start("left", "Sink").unwrap();
    let right = registry.start("right", "Sink").unwrap();
    let both = Arc::new(Barrier::new(2));
    let (result_tx, results) = mpsc::channel();
    let result_tx = Arc::new(Mutex::new(result_tx));

    for (me, other) in [(&left, &right), (&right, &left)] {
        let other = other.clone();
        let both = Arc::clone(&both);
        let result_tx = Arc::clone(&result_tx);
        me.add_listener("go", move |svc, _| {
            both.wait();
            let stopped = other.stop();
            let _ = result_tx
                .lock()
                .unwrap()
                .send((svc.name().to_string(), stopped.is_ok()));
            Ok(())
        })
        .unwrap();
    }

    left.publish("go", vec![]).unwrap();
    right.publish("go", vec![]).unwrap();

    let mut outcomes = vec![
        results.recv_timeout(PATIENCE).expect("first stop returned"),
        results.recv_timeout(PATIENCE).expect("second stop returned"),
    ];
    outcomes.sort();
    assert_eq!(
        outcomes,
        vec![("left".to_string(), true), ("right".to_string(), true)]
    );
    assert!(eventually(|| registry.is_empty()));
    registry.shutdown().unwrap();
}

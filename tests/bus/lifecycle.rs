//! Lifecycle event tests - the built-in runtime service.

use std::collections::HashMap;
use std::thread;

use serde_json::json;
use service_bus::{RuntimeConfig, WaitOptions, RUNTIME_KIND};

use crate::support::{registry, registry_with, Recorder, PATIENCE};

// ============================================================================
// Test 1: registered/released reach subscribers of the runtime service
// ============================================================================

#[test]
fn lifecycle_events_reach_subscribers() {
    let registry = registry_with(RuntimeConfig::default());
    let watcher = registry.start("watcher", "Sink").unwrap();
    let recorder = Recorder::new();
    for topic in ["registered", "released"] {
        watcher.add_listener(topic, recorder.callback()).unwrap();
        watcher.subscribe("runtime", topic).unwrap();
    }

    registry.start("kbd", "Keyboard").unwrap();
    registry.stop("kbd").unwrap();
    registry.stop("watcher").unwrap();

    let events: Vec<(String, Vec<serde_json::Value>)> = recorder
        .messages()
        .into_iter()
        .map(|m| (m.topic, m.args))
        .collect();
    assert_eq!(
        events,
        vec![
            ("registered".to_string(), vec![json!("kbd"), json!("Keyboard")]),
            ("released".to_string(), vec![json!("kbd")]),
        ]
    );
}

// ============================================================================
// Test 2: an idempotent start does not announce again
// ============================================================================

#[test]
fn repeated_start_is_announced_once() {
    let registry = registry_with(RuntimeConfig::default());
    registry.start("watcher", "Sink").unwrap();
    let watcher = registry.lookup("watcher").unwrap();
    let recorder = Recorder::new();
    watcher.add_listener("registered", recorder.callback()).unwrap();
    watcher.subscribe("runtime", "registered").unwrap();

    registry.start("kbd", "Keyboard").unwrap();
    registry.start("kbd", "Keyboard").unwrap();
    registry.stop("watcher").unwrap();

    assert_eq!(recorder.len(), 1);
}

// ============================================================================
// Test 3: the runtime service can be waited on like any other
// ============================================================================

#[test]
fn runtime_events_can_be_awaited() {
    let registry = registry_with(RuntimeConfig::default());
    registry.start("watcher", "Sink").unwrap();
    let runtime = registry.lookup("runtime").unwrap();
    assert_eq!(runtime.kind(), RUNTIME_KIND);

    let wait = runtime
        .prepare_wait("registered", WaitOptions::timeout(PATIENCE))
        .unwrap();
    registry.start("kbd", "Keyboard").unwrap();

    let msg = wait.wait().into_message().expect("registered event");
    assert_eq!(msg.args, vec![json!("kbd"), json!("Keyboard")]);
}

// ============================================================================
// Test 4: the runtime service name is configurable
// ============================================================================

#[test]
fn runtime_name_is_configurable() {
    let config = RuntimeConfig::from_json(r#"{ "runtime_name": "sys" }"#).unwrap();
    let registry = registry_with(config);
    registry.start("kbd", "Keyboard").unwrap();
    assert_eq!(registry.names(), vec!["kbd", "sys"]);
}

// ============================================================================
// Test 5: lifecycle events can be switched off from the environment
// ============================================================================

#[test]
fn lifecycle_can_be_disabled_by_environment() {
    let vars: HashMap<&str, &str> = [("SERVICE_BUS_LIFECYCLE_EVENTS", "false")]
        .into_iter()
        .collect();
    let config = RuntimeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

    let registry = registry_with(config);
    registry.start("kbd", "Keyboard").unwrap();
    assert_eq!(registry.names(), vec!["kbd"]);
    assert!(registry.lookup("runtime").is_err());
}

// ============================================================================
// Test 6: the quiet test registry has no runtime service
// ============================================================================

#[test]
fn quiet_registry_has_no_runtime_service() {
    let registry = registry();
    registry.start("runtime", "Sink").unwrap();
    assert_eq!(registry.lookup("runtime").unwrap().kind(), "Sink");
}

// ============================================================================
// Test 7: dump reports the runtime service alongside user services
// ============================================================================

#[test]
fn dump_includes_runtime_service() {
    let registry = registry_with(RuntimeConfig::default());
    let kbd = registry.start("kbd", "Keyboard").unwrap();
    kbd.publish("keyPressed", vec![json!("a")]).unwrap();

    let dump = registry.dump().unwrap();
    let names: Vec<&str> = dump["services"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|svc| svc["name"].as_str())
        .collect();
    assert_eq!(names, vec!["kbd", "runtime"]);
    assert!(dump["uptime_ms"].is_u64());
}

// ============================================================================
// Test 8: racing start and stop of one name keep registered/released paired
// ============================================================================

#[test]
fn racing_start_and_stop_announce_in_order() {
    let registry = registry_with(RuntimeConfig::default());
    let watcher = registry.start("watcher", "Sink").unwrap();
    let recorder = Recorder::new();
    for topic in ["registered", "released"] {
        watcher.add_listener(topic, recorder.callback()).unwrap();
        watcher.subscribe("runtime", topic).unwrap();
    }

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                registry.start("kbd", "Keyboard").unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..50 {
                registry.stop_if_present("kbd").unwrap();
            }
        });
    });
    registry.stop_if_present("kbd").unwrap();
    registry.stop("watcher").unwrap();

    let topics: Vec<String> = recorder.messages().into_iter().map(|m| m.topic).collect();
    assert!(!topics.is_empty());
    for (i, topic) in topics.iter().enumerate() {
        let expected = if i % 2 == 0 { "registered" } else { "released" };
        assert_eq!(topic, expected, "event {} out of order: {:?}", i, topics);
    }
    assert_eq!(topics.len() % 2, 0);
}

//! Simulated keyboard driving a script-like consumer.
//!
//! A `Keyboard` service publishes synthetic key events from a typist thread.
//! A `Python` service reacts to them through a kind method, and the main
//! thread reads keys synchronously with `wait_for`, like a blocking
//! `readKey()` call.
//!
//! Run with `RUST_LOG=debug cargo run --example keyboard` to see dispatch.

use std::mem;
use std::thread;
use std::time::Duration;

use service_bus::{
    json, observability, Arity, BusResult, Registry, RuntimeConfig, ServiceKind, WaitOptions,
    WaitOutcome,
};
use tracing::info;

fn main() -> BusResult<()> {
    observability::init();

    let registry = Registry::with_config(RuntimeConfig::from_env()?)?;
    registry
        .kind(
            ServiceKind::new("Keyboard")
                .publishes("keyPressed", Arity::Exact(1))
                .publishes("keyMoved", Arity::Exact(2))
                .strict(),
        )
        .kind(
            ServiceKind::new("Python")
                .method("keyPressed", Arity::Exact(1), |svc, msg| {
                    let key: String = msg.arg(0)?;
                    info!(service = svc.name(), key = %key, "script saw key");
                    if key == "!" {
                        svc.publish("shout", vec![json!("bang")])?;
                    }
                    Ok(())
                })
                .on_start(|svc| {
                    info!(service = svc.name(), "script loaded");
                    Ok(())
                }),
        );

    let kbd = registry.start("kbd", "Keyboard")?;
    let py = registry.start("py", "Python")?;
    py.subscribe("kbd", "keyPressed")?;
    py.add_listener("shout", |svc, msg| {
        info!(service = svc.name(), args = ?msg.args, "listener heard itself");
        Ok(())
    })?;

    // readKey(): single-consumer waits hand each key to the oldest reader, and
    // the next read is registered before blocking on the current one, so a
    // key typed between two reads is not lost.
    let read_key = || {
        kbd.prepare_wait(
            "keyPressed",
            WaitOptions::timeout(Duration::from_secs(2)).single_consumer(),
        )
    };
    let mut current = read_key()?;

    let typist = {
        let kbd = kbd.clone();
        thread::spawn(move || -> BusResult<()> {
            for key in ["h", "i", "!"] {
                thread::sleep(Duration::from_millis(50));
                kbd.publish("keyPressed", vec![json!(key)])?;
            }
            kbd.publish("keyMoved", vec![json!(3), json!(4)])?;
            Ok(())
        })
    };

    for _ in 0..3 {
        let next = read_key()?;
        match mem::replace(&mut current, next).wait() {
            WaitOutcome::Received(msg) => info!(key = ?msg.args[0], seq = msg.sequence, "readKey"),
            WaitOutcome::TimedOut => info!("readKey timed out"),
            WaitOutcome::Canceled => break,
        }
    }
    current.canceller().cancel();

    if let Ok(result) = typist.join() {
        result?;
    }

    let stats = registry.stop("py")?;
    info!(handled = stats.handled, faults = stats.faults, "python stopped");

    if let Ok(dump) = serde_json::to_string_pretty(&registry.dump()?) {
        println!("{}", dump);
    }
    registry.shutdown()
}

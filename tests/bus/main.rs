//! Service bus integration tests.
//!
//! Exercises the runtime end to end through the public API:
//! - Registry start/stop/lookup semantics
//! - Publish/subscribe routing and contracts
//! - Listeners and fault containment on service workers
//! - Blocking waits: timeout, cancellation, delivery modes
//! - Concurrent publishers, overflow and lifecycle events

mod support;

mod lifecycle;
mod registry;

use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bus::{Directory, Dispatcher, Message, Subscription, SubscriptionTable};
use crate::config::{RuntimeConfig, ServiceOptions};
use crate::error::{BusError, BusResult, ListenerError};
use crate::service::{
    on_worker_thread, spawn_worker, Arity, ServiceCell, ServiceHandle, ServiceKind, ServiceStats,
};

use super::name_lock::NameLocks;
use super::naming::{validate_name, validate_topic};

/// Kind of the built-in lifecycle service.
pub const RUNTIME_KIND: &str = "Runtime";

fn runtime_kind() -> ServiceKind {
    ServiceKind::new(RUNTIME_KIND)
        .publishes("registered", Arity::Exact(2))
        .publishes("released", Arity::Exact(1))
        .strict()
}

type Services = HashMap<String, Arc<ServiceCell>>;

enum Started {
    Running(ServiceHandle),
    /// Retired after a failed spawn or start hook; its worker still needs joining.
    Failed(Arc<ServiceCell>, BusError),
}

/// Shared state behind a [`Registry`]; every [`ServiceHandle`] holds a
/// reference to it.
pub(crate) struct RegistryInner {
    config: RuntimeConfig,
    kinds: RwLock<HashMap<String, Arc<ServiceKind>>>,
    services: RwLock<Services>,
    subscriptions: SubscriptionTable,
    name_locks: NameLocks,
    /// Workers of services stopped from a worker thread, joined by `stop_all`.
    detached: Mutex<Vec<(String, JoinHandle<()>)>>,
    created: Instant,
}

impl RegistryInner {
    fn new(config: RuntimeConfig) -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(RUNTIME_KIND.to_string(), Arc::new(runtime_kind()));
        Self {
            config,
            kinds: RwLock::new(kinds),
            services: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionTable::new(),
            name_locks: NameLocks::new(),
            detached: Mutex::new(Vec::new()),
            created: Instant::now(),
        }
    }

    fn services_read(&self) -> BusResult<RwLockReadGuard<'_, Services>> {
        self.services
            .read()
            .map_err(|_| BusError::LockPoisoned("service table"))
    }

    fn services_write(&self) -> BusResult<RwLockWriteGuard<'_, Services>> {
        self.services
            .write()
            .map_err(|_| BusError::LockPoisoned("service table"))
    }

    fn cell(&self, name: &str) -> BusResult<Option<Arc<ServiceCell>>> {
        Ok(self.services_read()?.get(name).cloned())
    }

    fn is_runtime(&self, name: &str) -> bool {
        self.config.lifecycle_events && name == self.config.runtime_name
    }

    // ========================================================================
    // Kinds
    // ========================================================================

    fn register_kind(&self, kind: ServiceKind) {
        let name = kind.name().to_string();
        if name == RUNTIME_KIND {
            warn!(kind = %name, "kind name is reserved; ignoring");
            return;
        }
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        if kinds.insert(name.clone(), Arc::new(kind)).is_some() {
            debug!(kind = %name, "kind replaced; running services keep the old one");
        }
    }

    fn resolve_kind(&self, kind: &str) -> BusResult<Arc<ServiceKind>> {
        self.kinds
            .read()
            .map_err(|_| BusError::LockPoisoned("kind catalog"))?
            .get(kind)
            .cloned()
            .ok_or_else(|| BusError::UnknownServiceKind(kind.to_string()))
    }

    fn kind_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    // ========================================================================
    // Start / stop
    // ========================================================================

    /// Run `f` holding `name`'s lock, then forget the lock if nobody else
    /// is waiting on it.
    fn with_name_lock<T>(&self, name: &str, f: impl FnOnce() -> BusResult<T>) -> BusResult<T> {
        let result = {
            let lock = self.name_locks.get(name)?;
            let _guard = lock
                .lock()
                .map_err(|_| BusError::LockPoisoned("service name lock"))?;
            f()
        };
        self.name_locks.release(name);
        result
    }

    fn is_current(&self, cell: &Arc<ServiceCell>) -> BusResult<bool> {
        Ok(self
            .services_read()?
            .get(&cell.name)
            .is_some_and(|current| Arc::ptr_eq(current, cell)))
    }

    fn start(
        self: &Arc<Self>,
        name: &str,
        kind: &str,
        options: ServiceOptions,
    ) -> BusResult<ServiceHandle> {
        validate_name(name)?;
        if self.is_runtime(name) && kind != RUNTIME_KIND {
            return Err(BusError::invalid_name(name, "reserved for the runtime service"));
        }
        let kind = self.resolve_kind(kind)?;

        if self.config.lifecycle_events && !self.is_runtime(name) {
            self.ensure_runtime()?;
        }
        self.start_named(name, &kind, options)
    }

    fn ensure_runtime(self: &Arc<Self>) -> BusResult<()> {
        let name = self.config.runtime_name.as_str();
        if self.cell(name)?.is_some() {
            return Ok(());
        }
        let kind = self.resolve_kind(RUNTIME_KIND)?;
        self.start_named(name, &kind, ServiceOptions::new())?;
        Ok(())
    }

    fn start_named(
        self: &Arc<Self>,
        name: &str,
        kind: &Arc<ServiceKind>,
        options: ServiceOptions,
    ) -> BusResult<ServiceHandle> {
        match self.with_name_lock(name, || self.start_locked(name, kind, options))? {
            Started::Running(handle) => Ok(handle),
            Started::Failed(cell, err) => {
                self.finish(&cell);
                Err(err)
            }
        }
    }

    /// Create the service unless `name` is already running. Caller holds the
    /// name lock; `registered` is published before it is released.
    fn start_locked(
        self: &Arc<Self>,
        name: &str,
        kind: &Arc<ServiceKind>,
        options: ServiceOptions,
    ) -> BusResult<Started> {
        if let Some(existing) = self.cell(name)? {
            if existing.kind.name() != kind.name() {
                warn!(
                    service = name,
                    running = existing.kind.name(),
                    requested = kind.name(),
                    "service already running with a different kind"
                );
            }
            return Ok(Started::Running(ServiceHandle::new(Arc::clone(self), existing)));
        }

        let options = options.or(self.config.service_options());
        let cell = Arc::new(ServiceCell::new(
            name,
            Arc::clone(kind),
            options,
            self.config.fault_history,
        ));
        let handle = ServiceHandle::new(Arc::clone(self), Arc::clone(&cell));

        self.services_write()?
            .insert(name.to_string(), Arc::clone(&cell));
        match spawn_worker(handle.clone()) {
            Ok(worker) => cell.set_worker(worker),
            Err(err) => {
                self.retire(&cell)?;
                return Ok(Started::Failed(cell, err));
            }
        }

        if let Some(hook) = kind.start_hook() {
            if let Err(reason) = run_hook(&hook, &handle) {
                warn!(service = name, error = %reason, "start hook failed");
                self.retire(&cell)?;
                let err = BusError::StartFailed {
                    name: name.to_string(),
                    reason,
                };
                return Ok(Started::Failed(cell, err));
            }
        }

        info!(
            service = name,
            kind = kind.name(),
            capacity = cell.mailbox.capacity(),
            "service started"
        );
        if !self.is_runtime(name) {
            self.announce("registered", vec![json!(name), json!(kind.name())]);
        }
        Ok(Started::Running(handle))
    }

    /// Stop whatever service currently holds `name`.
    pub(crate) fn stop(self: &Arc<Self>, name: &str) -> BusResult<ServiceStats> {
        let cell = self.with_name_lock(name, || {
            let cell = self.cell(name)?.ok_or_else(|| BusError::not_found(name))?;
            self.stop_locked(&cell)?;
            Ok(cell)
        })?;
        Ok(self.finish(&cell))
    }

    /// Stop exactly `cell`. Fails with `ServiceStopped` once it has stopped,
    /// even if a newer service has taken the name since.
    pub(crate) fn stop_service(self: &Arc<Self>, cell: &Arc<ServiceCell>) -> BusResult<ServiceStats> {
        let stopped = || BusError::ServiceStopped(cell.name.clone());
        if !cell.is_running() {
            return Err(stopped());
        }
        self.with_name_lock(&cell.name, || {
            if !cell.is_running() || !self.is_current(cell)? {
                return Err(stopped());
            }
            self.stop_locked(cell)
        })?;
        Ok(self.finish(cell))
    }

    /// Run the stop hook, retire the service and publish `released`. Caller
    /// holds the name lock.
    fn stop_locked(self: &Arc<Self>, cell: &Arc<ServiceCell>) -> BusResult<()> {
        if let Some(hook) = cell.kind.stop_hook() {
            let handle = ServiceHandle::new(Arc::clone(self), Arc::clone(cell));
            if let Err(reason) = run_hook(&hook, &handle) {
                warn!(service = %cell.name, error = %reason, "stop hook failed");
            }
        }
        self.retire(cell)?;
        if !self.is_runtime(&cell.name) {
            self.announce("released", vec![json!(cell.name)]);
        }
        Ok(())
    }

    /// Unregister `cell`, drop its subscriptions, cancel its waits and close
    /// its mailbox. The worker keeps draining what is already queued.
    fn retire(&self, cell: &Arc<ServiceCell>) -> BusResult<()> {
        cell.mark_stopped();
        {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            if services
                .get(&cell.name)
                .is_some_and(|current| Arc::ptr_eq(current, cell))
            {
                services.remove(&cell.name);
            }
        }
        let removed = self.subscriptions.remove_service(&cell.name);
        let canceled = cell.gate.close();
        cell.mailbox.close();

        let removed = removed?;
        debug!(
            service = %cell.name,
            subscriptions = removed,
            waits_canceled = canceled,
            "service retired"
        );
        Ok(())
    }

    /// Wait for a retired service's worker to drain. Runs without the name
    /// lock. On a worker thread the join is deferred to the next `stop_all`,
    /// since two workers stopping each other would otherwise wait forever.
    fn finish(&self, cell: &ServiceCell) -> ServiceStats {
        if let Some(worker) = cell.take_worker() {
            if on_worker_thread() {
                debug!(service = %cell.name, "stopped from a worker thread; join deferred");
                self.detached
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((cell.name.clone(), worker));
            } else {
                join_worker(&cell.name, worker);
            }
        }

        let stats = cell.stats.snapshot();
        info!(
            service = %cell.name,
            handled = stats.handled,
            faults = stats.faults,
            dropped = stats.dropped,
            "service stopped"
        );
        stats
    }

    /// Join workers whose stop was issued from a worker thread.
    fn reap_detached(&self) {
        if on_worker_thread() {
            return;
        }
        let workers = mem::take(&mut *self.detached.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, worker) in workers {
            join_worker(&name, worker);
        }
    }

    fn stop_all_except(self: &Arc<Self>, keep: &[&str]) -> BusResult<Vec<(String, ServiceStats)>> {
        let mut names = self.names();
        // The runtime service goes last so it can announce every release.
        names.sort_by_key(|name| self.is_runtime(name));

        let mut stopped = Vec::with_capacity(names.len());
        let mut failure = None;
        for name in names {
            if keep.contains(&name.as_str()) {
                continue;
            }
            match self.stop(&name) {
                Ok(stats) => stopped.push((name, stats)),
                Err(BusError::NotFound(_)) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        self.reap_detached();
        match failure {
            Some(err) => Err(err),
            None => Ok(stopped),
        }
    }

    fn announce(&self, topic: &str, args: Vec<Value>) {
        if !self.config.lifecycle_events {
            return;
        }
        let Ok(Some(runtime)) = self.cell(&self.config.runtime_name) else {
            return;
        };
        if let Err(err) = self.publish(&runtime, topic, args) {
            debug!(topic, error = %err, "lifecycle event not published");
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    pub(crate) fn publish(
        &self,
        cell: &ServiceCell,
        topic: &str,
        args: Vec<Value>,
    ) -> BusResult<Arc<Message>> {
        Dispatcher::new(self, &self.subscriptions).publish(cell, topic, args)
    }

    /// Both ends must be live. The service table stays read-locked while the
    /// subscription is inserted, so a concurrent stop cannot leave it behind.
    pub(crate) fn subscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<bool> {
        validate_topic(topic)?;
        let services = self.services_read()?;
        let sub = services
            .get(subscriber)
            .ok_or_else(|| BusError::not_found(subscriber))?;
        let publ = services
            .get(publisher)
            .ok_or_else(|| BusError::not_found(publisher))?;

        publ.kind.check_topic(topic)?;
        if let (Some(expected), Some(offered)) =
            (sub.kind.method_arity(topic), publ.kind.contract(topic))
        {
            if !expected.compatible(&offered) {
                return Err(BusError::ArityMismatch {
                    topic: topic.to_string(),
                    expected,
                    found: offered,
                });
            }
        }

        let added = self.subscriptions.subscribe(subscriber, publisher, topic)?;
        drop(services);
        if added {
            debug!(subscriber, publisher, topic, "subscribed");
        }
        Ok(added)
    }

    pub(crate) fn unsubscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<bool> {
        let removed = self.subscriptions.unsubscribe(subscriber, publisher, topic)?;
        if removed {
            debug!(subscriber, publisher, topic, "unsubscribed");
        }
        Ok(removed)
    }

    pub(crate) fn subscriptions_of(&self, subscriber: &str) -> BusResult<Vec<Subscription>> {
        self.subscriptions.subscriptions_of(subscriber)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    fn dump(&self) -> BusResult<Value> {
        let services: Vec<Value> = {
            let services = self.services_read()?;
            let mut cells: Vec<&Arc<ServiceCell>> = services.values().collect();
            cells.sort_by(|a, b| a.name.cmp(&b.name));
            cells
                .into_iter()
                .map(|cell| {
                    json!({
                        "name": cell.name,
                        "kind": cell.kind.name(),
                        "started_at": cell.started_at,
                        "queued": cell.mailbox.len(),
                        "capacity": cell.mailbox.capacity(),
                        "listeners": cell.listeners.topics(),
                        "listener_count": cell.listeners.len(),
                        "pending_waits": cell.gate.pending(),
                        "stats": cell.stats.snapshot(),
                    })
                })
                .collect()
        };

        Ok(json!({
            "uptime_ms": u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX),
            "kinds": self.kind_names(),
            "services": services,
            "subscriptions": self.subscriptions.all()?,
        }))
    }
}

impl Directory for RegistryInner {
    fn resolve(&self, names: &[String]) -> BusResult<Vec<Arc<ServiceCell>>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let services = self.services_read()?;
        Ok(names
            .iter()
            .filter_map(|name| services.get(name).cloned())
            .collect())
    }
}

fn join_worker(name: &str, worker: JoinHandle<()>) {
    if worker.join().is_err() {
        warn!(service = name, "worker thread panicked");
    }
}

/// Run a lifecycle hook on the calling thread, turning a panic into an error.
fn run_hook(
    hook: &Arc<dyn Fn(&ServiceHandle) -> Result<(), ListenerError> + Send + Sync>,
    handle: &ServiceHandle,
) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| hook(handle))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("hook panicked".to_string()),
    }
}

/// Table of live services and the catalog of kinds they are started from.
///
/// The registry owns every service it starts. Dropping it stops them all
/// (equivalent to [`shutdown`](Self::shutdown)); handles held elsewhere stay
/// usable but report [`BusError::ServiceStopped`].
///
/// Operations on different names proceed independently; start and stop of
/// the same name are serialized.
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Registry with [`RuntimeConfig::default`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner::new(RuntimeConfig::default())),
        }
    }

    pub fn with_config(config: RuntimeConfig) -> BusResult<Self> {
        Ok(Self {
            inner: Arc::new(RegistryInner::new(config.validate()?)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Add (or replace) a kind in the catalog. Returns `self` for chaining.
    pub fn kind(&self, kind: ServiceKind) -> &Self {
        self.inner.register_kind(kind);
        self
    }

    /// Names of every registered kind, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.inner.kind_names()
    }

    /// Start `name` from `kind`, or return the running service of that name.
    pub fn start(&self, name: &str, kind: &str) -> BusResult<ServiceHandle> {
        self.inner.start(name, kind, ServiceOptions::new())
    }

    /// [`start`](Self::start) with per-service mailbox settings.
    pub fn start_with(
        &self,
        name: &str,
        kind: &str,
        options: ServiceOptions,
    ) -> BusResult<ServiceHandle> {
        self.inner.start(name, kind, options)
    }

    /// Stop `name`: cancel its waits, remove its subscriptions, drain its
    /// mailbox and join its worker. Returns the final statistics.
    ///
    /// The name lock is released before the join, so a listener of the
    /// stopping service may itself call `stop`; it gets
    /// [`BusError::ServiceStopped`].
    pub fn stop(&self, name: &str) -> BusResult<ServiceStats> {
        self.inner.stop(name)
    }

    /// Like [`stop`](Self::stop), but a missing name is not an error.
    pub fn stop_if_present(&self, name: &str) -> BusResult<Option<ServiceStats>> {
        match self.inner.stop(name) {
            Ok(stats) => Ok(Some(stats)),
            Err(BusError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stop every service; the runtime service is stopped last.
    pub fn stop_all(&self) -> BusResult<Vec<(String, ServiceStats)>> {
        self.inner.stop_all_except(&[])
    }

    pub fn stop_all_except(&self, keep: &[&str]) -> BusResult<Vec<(String, ServiceStats)>> {
        self.inner.stop_all_except(keep)
    }

    pub fn shutdown(&self) -> BusResult<()> {
        let stopped = self.inner.stop_all_except(&[])?;
        if !stopped.is_empty() {
            info!(services = stopped.len(), "registry shut down");
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> BusResult<ServiceHandle> {
        self.inner
            .cell(name)?
            .map(|cell| ServiceHandle::new(Arc::clone(&self.inner), cell))
            .ok_or_else(|| BusError::not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.inner.cell(name), Ok(Some(_)))
    }

    /// Names of running services, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.names()
    }

    /// Handles to every running service, sorted by name.
    pub fn services(&self) -> Vec<ServiceHandle> {
        self.names()
            .iter()
            .filter_map(|name| self.lookup(name).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uptime(&self) -> Duration {
        self.inner.created.elapsed()
    }

    /// Subscribe `subscriber` to `publisher`'s `topic`. Idempotent.
    pub fn subscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<()> {
        self.inner.subscribe(subscriber, publisher, topic)?;
        Ok(())
    }

    pub fn unsubscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<()> {
        self.inner.unsubscribe(subscriber, publisher, topic)?;
        Ok(())
    }

    /// Current subscribers of `(publisher, topic)`, sorted.
    pub fn subscribers(&self, publisher: &str, topic: &str) -> BusResult<Vec<String>> {
        self.inner.subscriptions.snapshot(publisher, topic)
    }

    pub fn subscriptions_of(&self, subscriber: &str) -> BusResult<Vec<Subscription>> {
        self.inner.subscriptions_of(subscriber)
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn remove_all_subscriptions(&self) -> BusResult<usize> {
        let removed = self.inner.subscriptions.clear()?;
        debug!(removed, "all subscriptions removed");
        Ok(removed)
    }

    /// Diagnostic JSON snapshot of kinds, services and subscriptions.
    pub fn dump(&self) -> BusResult<Value> {
        self.inner.dump()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Err(err) = self.inner.stop_all_except(&[]) {
            warn!(error = %err, "registry shutdown incomplete");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.names())
            .field("kinds", &self.kinds())
            .finish()
    }
}

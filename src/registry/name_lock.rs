use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{BusError, BusResult};

/// Per-name mutexes serializing start/stop of the same service name.
///
/// Locks are created on first use. While anyone holds a name's `Arc`, every
/// caller for that name gets the same one; [`release`](NameLocks::release)
/// forgets entries nobody holds.
#[derive(Default)]
pub(crate) struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, name: &str) -> BusResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| BusError::LockPoisoned("name lock table"))?;
        Ok(Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Drop the entry for `name` if the table holds the only reference.
    ///
    /// A lock nobody holds an `Arc` to cannot be locked, so a later `get`
    /// creating a fresh one is indistinguishable from reusing it.
    pub(crate) fn release(&self, name: &str) -> bool {
        let Ok(mut locks) = self.locks.lock() else {
            return false;
        };
        match locks.get(name) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(name);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

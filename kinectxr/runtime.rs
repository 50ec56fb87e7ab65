/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The process-wide state store. One [`HandleMap`] per entity kind hands
//! out stable opaque handles; handles are never reused within a process
//! lifetime and lookups never expose raw pointers.

use crate::instance::Instance;
use crate::session::Session;
use crate::space::Space;
use crate::swapchain::Swapchain;

use once_cell::sync::Lazy;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A per-kind registry: monotonic handle allocation plus O(1) lookup.
///
/// The map mutex is held only for the lookup itself; callers receive a
/// cloned `Arc` and lock the entity afterwards. Nested locking across
/// kinds is not permitted (lock order: device < motor < cache < per-kind
/// < event queue).
pub struct HandleMap<T> {
    next: AtomicU64,
    map: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> HandleMap<T> {
    fn new() -> HandleMap<T> {
        HandleMap {
            // Handle 0 is reserved as the null handle.
            next: AtomicU64::new(1),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, value: T) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.map
            .lock()
            .expect("handle map poisoned")
            .insert(handle, Arc::new(value));
        handle
    }

    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        self.map
            .lock()
            .expect("handle map poisoned")
            .get(&handle)
            .cloned()
    }

    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        self.map
            .lock()
            .expect("handle map poisoned")
            .remove(&handle)
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.map
            .lock()
            .expect("handle map poisoned")
            .contains_key(&handle)
    }

    /// Remove every entity matching `pred`, returning the removed values
    /// so the caller can tear them down outside the map lock.
    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        let mut map = self.map.lock().expect("handle map poisoned");
        let doomed: Vec<u64> = map
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(&handle, _)| handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| map.remove(&handle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("handle map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every entity the runtime owns, by kind.
pub struct Runtime {
    pub instances: HandleMap<Mutex<Instance>>,
    pub sessions: HandleMap<Mutex<Session>>,
    pub spaces: HandleMap<Space>,
    pub swapchains: HandleMap<Mutex<Swapchain>>,
    next_system_id: AtomicU64,
}

impl Runtime {
    fn new() -> Runtime {
        Runtime {
            instances: HandleMap::new(),
            sessions: HandleMap::new(),
            spaces: HandleMap::new(),
            swapchains: HandleMap::new(),
            next_system_id: AtomicU64::new(1),
        }
    }

    /// System ids share the never-reused property of handles.
    pub fn allocate_system_id(&self) -> u64 {
        self.next_system_id.fetch_add(1, Ordering::Relaxed)
    }
}

static RUNTIME: Lazy<Runtime> = Lazy::new(Runtime::new);

/// The registry, constructed when the first entry point runs.
pub fn runtime() -> &'static Runtime {
    &RUNTIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_reused() {
        let map: HandleMap<u32> = HandleMap::new();
        let first = map.insert(1);
        map.remove(first);
        let second = map.insert(2);
        assert_ne!(first, second);
        assert!(!map.contains(first));
        assert!(map.contains(second));
    }

    #[test]
    fn remove_where_returns_the_removed_values() {
        let map: HandleMap<u32> = HandleMap::new();
        map.insert(1);
        map.insert(2);
        map.insert(3);
        let removed = map.remove_where(|&value| value != 2);
        assert_eq!(removed.len(), 2);
        assert_eq!(map.len(), 1);
    }
}

//! Resource registry - the controller's in-memory table of tracked resources
//!
//! Records are read and written under a short-lived lock and never across an
//! await. Serialization of whole lifecycle operations is done with per-name
//! async locks handed out by [`Registry::lock`].

use crate::record::ResourceRecord;
use crate::state::ResourceState;
use harbor_foundation::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

pub type NameGuard = OwnedMutexGuard<()>;

pub struct Registry {
    records: RwLock<HashMap<String, ResourceRecord>>,
    /// Names being created; they count against capacity
    reserved: Mutex<HashSet<String>>,
    /// One async lock per name ever seen
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generation: Mutex<u64>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
            locks: Mutex::new(HashMap::new()),
            generation: Mutex::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ========================================================================
    // Per-name mutual exclusion
    // ========================================================================

    /// Exclusive access to `name` for the lifetime of the guard
    pub async fn lock(&self, name: &str) -> NameGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Lock two names in a fixed order so crossed calls cannot deadlock
    pub async fn lock_pair(&self, a: &str, b: &str) -> (NameGuard, NameGuard) {
        if a <= b {
            let first = self.lock(a).await;
            let second = self.lock(b).await;
            (first, second)
        } else {
            let second = self.lock(b).await;
            let first = self.lock(a).await;
            (first, second)
        }
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Claim `name` for a resource about to be created
    ///
    /// Checked against live records and pending reservations, not against the
    /// underlying runtime.
    pub fn reserve(&self, name: &str) -> Result<Reservation<'_>> {
        let records = self.records.read();
        let mut reserved = self.reserved.lock();

        if records.contains_key(name) || reserved.contains(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if records.len() + reserved.len() >= self.capacity {
            return Err(Error::CapacityExceeded(self.capacity));
        }
        reserved.insert(name.to_string());

        Ok(Reservation {
            registry: self,
            name: name.to_string(),
        })
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<ResourceRecord> {
        self.records.read().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<ResourceRecord> {
        self.get(name)
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.read().contains_key(name)
    }

    /// Atomically mutate one record, returning the updated copy
    pub fn update<F>(&self, name: &str, f: F) -> Result<ResourceRecord>
    where
        F: FnOnce(&mut ResourceRecord),
    {
        let mut records = self.records.write();
        let record = records
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))?;
        f(record);
        Ok(record.clone())
    }

    pub fn remove(&self, name: &str) -> Option<ResourceRecord> {
        self.records.write().remove(name)
    }

    /// Snapshot sorted by name
    pub fn list(&self) -> Vec<ResourceRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn count_by_state(&self) -> HashMap<ResourceState, usize> {
        let mut counts = HashMap::new();
        for record in self.records.read().values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }
}

/// A claimed name; released on drop unless committed
pub struct Reservation<'a> {
    registry: &'a Registry,
    name: String,
}

impl Reservation<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store the record under the reserved name
    pub fn commit(self, mut record: ResourceRecord) -> ResourceRecord {
        record.name = self.name.clone();
        record.generation = self.registry.next_generation();
        self.registry
            .records
            .write()
            .insert(self.name.clone(), record.clone());
        record
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.reserved.lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_foundation::{ResourceKind, ResourceLimits};
    use std::time::Duration;

    fn record(name: &str) -> ResourceRecord {
        ResourceRecord::new(
            name,
            ResourceKind::Container,
            "alpine:latest",
            ResourceLimits::default(),
            format!("h-{}", name),
        )
    }

    #[test]
    fn test_reserve_and_commit() {
        let registry = Registry::new(2);
        let r = registry.reserve("a").unwrap();
        assert!(matches!(registry.reserve("a"), Err(Error::AlreadyExists(_))));
        let committed = r.commit(record("a"));
        assert_eq!(committed.generation, 1);
        assert!(registry.contains("a"));
        assert!(matches!(registry.reserve("a"), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_capacity_counts_pending_reservations() {
        let registry = Registry::new(2);
        registry.reserve("a").unwrap().commit(record("a"));
        let pending = registry.reserve("b").unwrap();
        assert!(matches!(
            registry.reserve("c"),
            Err(Error::CapacityExceeded(2))
        ));

        // Dropping an uncommitted reservation frees the slot
        drop(pending);
        assert!(registry.reserve("c").is_ok());
    }

    #[test]
    fn test_update_and_remove() {
        let registry = Registry::new(4);
        registry.reserve("a").unwrap().commit(record("a"));

        let updated = registry
            .update("a", |r| r.set_state(ResourceState::Running))
            .unwrap();
        assert_eq!(updated.state, ResourceState::Running);
        assert_eq!(registry.count_by_state()[&ResourceState::Running], 1);

        assert!(registry.remove("a").is_some());
        assert!(matches!(
            registry.update("a", |_| {}),
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_generation_increases_on_reinsert() {
        let registry = Registry::new(4);
        let first = registry.reserve("a").unwrap().commit(record("a"));
        registry.remove("a");
        let second = registry.reserve("a").unwrap().commit(record("a"));
        assert!(second.generation > first.generation);
    }

    #[tokio::test]
    async fn test_name_lock_serializes() {
        let registry = Arc::new(Registry::new(4));
        let guard = registry.lock("a").await;

        let contender = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _g = registry.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other names are independent
        let _other = registry.lock("b").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_pair_in_either_order() {
        let registry = Registry::new(4);
        {
            let _pair = registry.lock_pair("x", "y").await;
        }
        let _pair = registry.lock_pair("y", "x").await;
    }
}

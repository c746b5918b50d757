// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The used-serials cache (spec.md §4.2).
//!
//! A bounded set of `(coordinator, serial)` pairs, each carrying its
//! order-expiration. Insertion of a key already present fails with
//! `AlreadyExists` -- that's the replay check. When the cache would grow
//! past its configured memory cap, an existing entry is evicted at random
//! rather than by any notion of age: random eviction is simple and avoids
//! pathological behavior under adversarial bursts (spec.md §9).

use std::{
    collections::HashMap,
    sync::Mutex,
    time::SystemTime,
};

use piece_crypto::NodeId;
use rand::Rng;

use crate::limit::SerialNumber;

type Key = (NodeId, SerialNumber);

/// Rough per-entry overhead accounted against `max_size_bytes`: the key
/// (node id + serial) plus the expiry timestamp plus hash-map bookkeeping.
const ENTRY_SIZE_ESTIMATE: usize = 32 + 16 + 8 + 32;

pub struct UsedSerials {
    inner: Mutex<HashMap<Key, SystemTime>>,
    max_entries: usize,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("serial number already used")]
pub struct AlreadyExists;

impl UsedSerials {
    /// `max_size_bytes` is the configured memory cap (`max-used-serials-size`
    /// in spec.md §6); it is converted to an entry-count budget up front
    /// using a fixed per-entry size estimate.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_entries: (max_size_bytes / ENTRY_SIZE_ESTIMATE).max(1),
        }
    }

    /// Insert `(coordinator, serial)` with the given expiry. Fails with
    /// [`AlreadyExists`] if the (unexpired) pair is already present.
    ///
    /// Expired entries are purged lazily: any entry found to be expired
    /// during this call's scan is dropped rather than being taken to
    /// conflict with the new insertion.
    pub fn insert(
        &self,
        coordinator: NodeId,
        serial: SerialNumber,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<(), AlreadyExists> {
        let mut map = self.inner.lock().unwrap();
        let key = (coordinator, serial);

        if let Some(existing_expiry) = map.get(&key) {
            if *existing_expiry > now {
                return Err(AlreadyExists);
            }
            map.remove(&key);
        }

        if map.len() >= self.max_entries {
            evict_one(&mut map);
        }

        map.insert(key, expires_at);
        Ok(())
    }

    /// Number of entries currently tracked (tests only need this; the
    /// invariant it is checked against is "never exceeds the configured
    /// cap").
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_one(map: &mut HashMap<Key, SystemTime>) {
    if map.is_empty() {
        return;
    }
    let idx = rand::thread_rng().gen_range(0..map.len());
    if let Some(key) = map.keys().nth(idx).copied() {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piece_crypto::PublicKey;
    use std::time::Duration;

    fn node(b: u8) -> NodeId {
        NodeId::from(PublicKey::from([b; 32]))
    }

    fn serial(b: u8) -> SerialNumber {
        SerialNumber::from([b; 16])
    }

    #[test]
    fn rejects_replay_before_expiry() {
        let cache = UsedSerials::new(1 << 20);
        let now = SystemTime::now();
        let expiry = now + Duration::from_secs(60);

        cache.insert(node(1), serial(1), expiry, now).unwrap();
        let err = cache.insert(node(1), serial(1), expiry, now).unwrap_err();
        assert_eq!(err, AlreadyExists);
    }

    #[test]
    fn allows_reuse_after_expiry() {
        let cache = UsedSerials::new(1 << 20);
        let now = SystemTime::now();
        let expiry = now + Duration::from_secs(1);

        cache.insert(node(1), serial(1), expiry, now).unwrap();

        let later = now + Duration::from_secs(2);
        cache
            .insert(node(1), serial(1), later + Duration::from_secs(60), later)
            .unwrap();
    }

    #[test]
    fn evicts_when_over_capacity() {
        // Budget for exactly 2 entries.
        let cache = UsedSerials::new(2 * ENTRY_SIZE_ESTIMATE);
        let now = SystemTime::now();
        let expiry = now + Duration::from_secs(60);

        cache.insert(node(1), serial(1), expiry, now).unwrap();
        cache.insert(node(2), serial(2), expiry, now).unwrap();
        cache.insert(node(3), serial(3), expiry, now).unwrap();

        assert!(cache.len() <= 2);
    }

    #[test]
    fn distinct_coordinators_do_not_collide() {
        let cache = UsedSerials::new(1 << 20);
        let now = SystemTime::now();
        let expiry = now + Duration::from_secs(60);

        cache.insert(node(1), serial(1), expiry, now).unwrap();
        cache.insert(node(2), serial(1), expiry, now).unwrap();
        assert_eq!(cache.len(), 2);
    }
}

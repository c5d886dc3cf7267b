//! Derived field key cache.
//!
//! PBKDF2 is deliberately slow, so each key version's field key is derived
//! once and kept for the lifetime of the key ring generation. Derivation is
//! single-flight per version id: concurrent callers asking for the same id
//! wait for one derivation, callers asking for different ids do not block
//! each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use courier_crypto::{CryptoError, FieldKey};

use crate::key_version::KeyVersion;

type Slot = Arc<Mutex<Option<Arc<FieldKey>>>>;

/// Memoized `version id -> field key` map.
#[derive(Default)]
pub struct DerivedKeyCache {
    slots: Mutex<HashMap<u32, Slot>>,
    derivations: AtomicUsize,
}

impl DerivedKeyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the field key of `version`, deriving it on first use.
    pub fn get_or_derive(&self, version: &KeyVersion) -> Result<Arc<FieldKey>, CryptoError> {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(version.id()).or_default())
        };

        let mut entry = lock(&slot);
        if let Some(key) = entry.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = Arc::new(FieldKey::derive(version.passphrase(), version.salt())?);
        self.derivations.fetch_add(1, Ordering::Relaxed);
        *entry = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Number of field keys currently cached.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| lock(slot).is_some())
            .count()
    }

    /// Whether no field key is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of PBKDF2 derivations performed so far.
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DerivedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyCache")
            .field("cached", &self.len())
            .field("derivations", &self.derivations())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn version(id: u32) -> KeyVersion {
        KeyVersion::new(id, format!("pass-{id}"), vec![id as u8; 16], false)
    }

    #[test]
    fn test_derives_once_per_version() {
        let cache = DerivedKeyCache::new();
        let v1 = version(1);

        let a = cache.get_or_derive(&v1).unwrap();
        let b = cache.get_or_derive(&v1).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.derivations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_matches_direct_derivation() {
        let cache = DerivedKeyCache::new();
        let v = version(4);

        let cached = cache.get_or_derive(&v).unwrap();
        let direct = FieldKey::derive(v.passphrase(), v.salt()).unwrap();
        assert_eq!(cached.as_bytes(), direct.as_bytes());
    }

    #[test]
    fn test_versions_have_distinct_keys() {
        let cache = DerivedKeyCache::new();

        let a = cache.get_or_derive(&version(1)).unwrap();
        let b = cache.get_or_derive(&version(2)).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(cache.derivations(), 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_derivation() {
        let cache = DerivedKeyCache::new();
        let v = version(7);

        let keys: Vec<Arc<FieldKey>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| cache.get_or_derive(&v).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.derivations(), 1);
        assert!(keys.iter().all(|k| Arc::ptr_eq(k, &keys[0])));
    }

    #[test]
    fn test_pending_version_does_not_block_others() {
        let cache = DerivedKeyCache::new();

        // Hold version 1's slot as an in-flight derivation would.
        let slot = Arc::clone(lock(&cache.slots).entry(1).or_default());

        std::thread::scope(|scope| {
            let held = lock(&slot);
            let (tx, rx) = std::sync::mpsc::channel();
            let cache = &cache;
            scope.spawn(move || {
                let _ = tx.send(cache.get_or_derive(&version(2)).is_ok());
            });

            let derived = rx.recv_timeout(std::time::Duration::from_secs(5));
            drop(held);
            assert_eq!(derived, Ok(true), "version 2 waited on version 1");
        });

        assert_eq!(cache.derivations(), 1);
        cache.get_or_derive(&version(1)).unwrap();
        assert_eq!(cache.derivations(), 2);
    }

    #[test]
    fn test_concurrent_distinct_versions_derive_once_each() {
        let cache = DerivedKeyCache::new();
        let versions: Vec<KeyVersion> = (1..=8).map(version).collect();

        std::thread::scope(|scope| {
            for v in &versions {
                for _ in 0..4 {
                    let cache = &cache;
                    scope.spawn(move || cache.get_or_derive(v).unwrap());
                }
            }
        });

        assert_eq!(cache.derivations(), versions.len());
        assert_eq!(cache.len(), versions.len());
        for v in &versions {
            let direct = FieldKey::derive(v.passphrase(), v.salt()).unwrap();
            assert_eq!(cache.get_or_derive(v).unwrap().as_bytes(), direct.as_bytes());
        }
        assert_eq!(cache.derivations(), versions.len());
    }

    #[test]
    fn test_failed_derivation_is_not_cached() {
        let cache = DerivedKeyCache::new();
        let broken = KeyVersion::new(3, "", vec![1u8; 16], false);

        assert!(matches!(
            cache.get_or_derive(&broken),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.derivations(), 0);
    }
}

//! Cached key ring.
//!
//! The ring holds one *generation* at a time: the resolved key set plus the
//! field keys derived from it. The key set is resolved lazily on first use,
//! single-flight, and kept until [`KeyRing::invalidate`] swaps in a fresh
//! generation. Swapping replaces the key set and the derived keys in one
//! step, so a reader never pairs a derived key with a key set it was not
//! derived from.
//!
//! ```text
//! Uninitialized ──first use──► Loading ──ok──► Ready
//!        ▲                        │
//!        │                        └──error──► Failed ──next use──► Loading
//!        └────────── invalidate (new generation) ◄── any state
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info};

use courier_crypto::{CryptoError, FieldKey};

use crate::derived::DerivedKeyCache;
use crate::error::KeyringError;
use crate::key_version::KeyVersion;
use crate::resolver::{KeyResolver, KeySource, ResolvedKeySet};

/// Lifecycle state of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum KeyRingState {
    /// Nothing resolved yet.
    Uninitialized = 0,
    /// A resolution is in flight.
    Loading = 1,
    /// Key versions are cached.
    Ready = 2,
    /// The last resolution failed; the next use retries.
    Failed = 3,
}

impl KeyRingState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }
}

/// Diagnostic view of the key ring. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRingStatus {
    /// Lifecycle state.
    pub state: KeyRingState,
    /// Generation number, bumped on every invalidation.
    pub generation: u64,
    /// Source that satisfied resolution, once ready.
    pub source: Option<KeySource>,
    /// Active key version id, once ready.
    pub active_key_version: Option<u32>,
    /// Known key version ids in stored order.
    pub key_versions: Vec<u32>,
    /// Number of field keys derived in this generation.
    pub derived_keys: usize,
}

struct Generation {
    id: u64,
    keys: OnceCell<Arc<ResolvedKeySet>>,
    derived: DerivedKeyCache,
    /// Outcome of the last finished resolution: never `Loading`.
    state: AtomicU8,
    /// Resolutions currently running for this generation.
    in_flight: AtomicUsize,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            keys: OnceCell::new(),
            derived: DerivedKeyCache::new(),
            state: AtomicU8::new(KeyRingState::Uninitialized as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> KeyRingState {
        if self.keys.initialized() {
            KeyRingState::Ready
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            KeyRingState::Loading
        } else {
            KeyRingState::from_u8(self.state.load(Ordering::Acquire))
        }
    }

    fn set_state(&self, state: KeyRingState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Marks a resolution as running until dropped, including when the caller
/// abandons the future mid-resolution.
struct InFlight<'a>(&'a Generation);

impl<'a> InFlight<'a> {
    fn enter(generation: &'a Generation) -> Self {
        generation.in_flight.fetch_add(1, Ordering::AcqRel);
        Self(generation)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A consistent view of one generation: its key set and its derived keys.
#[derive(Clone)]
pub struct KeySnapshot {
    keys: Arc<ResolvedKeySet>,
    generation: Arc<Generation>,
}

impl KeySnapshot {
    /// The resolved key set.
    pub fn keys(&self) -> &ResolvedKeySet {
        &self.keys
    }

    /// The active key version.
    pub fn active(&self) -> &KeyVersion {
        self.keys.active()
    }

    /// Field key of `version`, derived at most once per generation.
    pub fn derived_key(&self, version: &KeyVersion) -> Result<Arc<FieldKey>, CryptoError> {
        self.generation.derived.get_or_derive(version)
    }

    /// Generation this snapshot belongs to.
    pub fn generation(&self) -> u64 {
        self.generation.id
    }
}

impl std::fmt::Debug for KeySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySnapshot")
            .field("generation", &self.generation.id)
            .field("source", &self.keys.source())
            .field("active_key_version", &self.keys.active().id())
            .finish()
    }
}

/// Lazily resolved, explicitly invalidated key ring.
pub struct KeyRing {
    resolver: KeyResolver,
    current: RwLock<Arc<Generation>>,
    next_generation: AtomicU64,
}

impl KeyRing {
    /// Creates a ring. Nothing is resolved until first use.
    pub fn new(resolver: KeyResolver) -> Self {
        Self {
            resolver,
            current: RwLock::new(Arc::new(Generation::new(0))),
            next_generation: AtomicU64::new(1),
        }
    }

    /// The resolver backing this ring.
    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Returns the current generation, resolving its key set on first use.
    ///
    /// Concurrent first callers share one resolution. A failed resolution
    /// leaves the generation empty so the next call retries.
    pub async fn snapshot(&self) -> Result<KeySnapshot, KeyringError> {
        let generation = self.current();

        if let Some(keys) = generation.keys.get() {
            return Ok(KeySnapshot {
                keys: Arc::clone(keys),
                generation,
            });
        }

        let pending = &generation;
        let resolver = &self.resolver;
        let keys = generation
            .keys
            .get_or_try_init(|| async move {
                let _in_flight = InFlight::enter(pending);
                match resolver.resolve().await {
                    Ok(set) => {
                        pending.set_state(KeyRingState::Ready);
                        Ok(Arc::new(set))
                    }
                    Err(e) => {
                        pending.set_state(KeyRingState::Failed);
                        error!(generation = pending.id, error = %e, "Key resolution failed");
                        Err(e)
                    }
                }
            })
            .await
            .map(Arc::clone)?;

        Ok(KeySnapshot { keys, generation })
    }

    /// The active key version.
    pub async fn active_key(&self) -> Result<KeyVersion, KeyringError> {
        Ok(self.snapshot().await?.active().clone())
    }

    /// All key versions in stored order.
    pub async fn all_keys(&self) -> Result<Vec<KeyVersion>, KeyringError> {
        Ok(self.snapshot().await?.keys().versions().to_vec())
    }

    /// Drops the cached key set and derived keys together.
    ///
    /// The next use resolves again. Snapshots taken earlier stay valid but
    /// keep referring to the old generation.
    pub fn invalidate(&self) {
        let id = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(Generation::new(id));

        let previous = {
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *current, fresh)
        };

        info!(
            previous_generation = previous.id,
            generation = id,
            "Key ring invalidated"
        );
    }

    /// Current diagnostic view. Never triggers resolution.
    pub fn status(&self) -> KeyRingStatus {
        let generation = self.current();
        let keys = generation.keys.get();

        KeyRingStatus {
            state: generation.state(),
            generation: generation.id,
            source: keys.map(|k| k.source()),
            active_key_version: keys.map(|k| k.active().id()),
            key_versions: keys.map(|k| k.ids()).unwrap_or_default(),
            derived_keys: generation.derived.len(),
        }
    }

    fn current(&self) -> Arc<Generation> {
        let current = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&*current)
    }
}

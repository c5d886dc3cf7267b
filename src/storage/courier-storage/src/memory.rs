//! In-memory key material store.
//!
//! Implements both [`SecretStore`] and [`KeyVersionStore`]. Counts every read
//! so callers can verify how often the keyring actually hits its sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{KeyVersionRow, KeyVersionStore, SecretStore};
use crate::error::StorageError;

/// In-memory store for key material.
#[derive(Default)]
pub struct MemoryKeyStore {
    secrets: RwLock<HashMap<String, String>>,
    rows: RwLock<Vec<KeyVersionRow>>,
    bulk_unsupported: bool,
    unavailable: bool,
    latency: Option<Duration>,
    secret_reads: AtomicUsize,
    bulk_queries: AtomicUsize,
    single_queries: AtomicUsize,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`KeyVersionStore::list_key_versions`] report `Unsupported`.
    pub fn without_bulk_query(mut self) -> Self {
        self.bulk_unsupported = true;
        self
    }

    /// Makes every read fail with `ConnectionFailed`.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Delays every read by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stores a secret payload.
    pub fn put_secret(&self, name: impl Into<String>, payload: impl Into<String>) {
        write(&self.secrets).insert(name.into(), payload.into());
    }

    /// Removes a secret payload.
    pub fn remove_secret(&self, name: &str) {
        write(&self.secrets).remove(name);
    }

    /// Appends a key version row.
    pub fn push_key_version(&self, row: KeyVersionRow) {
        write(&self.rows).push(row);
    }

    /// Removes the row with `id`.
    pub fn remove_key_version(&self, id: u32) {
        write(&self.rows).retain(|row| row.id != id);
    }

    /// Flags `id` as the only active row.
    pub fn set_active(&self, id: u32) {
        for row in write(&self.rows).iter_mut() {
            row.active = row.id == id;
        }
    }

    /// Number of secret reads served.
    pub fn secret_reads(&self) -> usize {
        self.secret_reads.load(Ordering::SeqCst)
    }

    /// Number of bulk queries served.
    pub fn bulk_queries(&self) -> usize {
        self.bulk_queries.load(Ordering::SeqCst)
    }

    /// Number of single-row queries served.
    pub fn single_queries(&self) -> usize {
        self.single_queries.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> Result<(), StorageError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable {
            return Err(StorageError::ConnectionFailed("store unavailable".into()));
        }
        Ok(())
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SecretStore for MemoryKeyStore {
    async fn read_secret(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.secret_reads.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        Ok(read(&self.secrets).get(name).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl KeyVersionStore for MemoryKeyStore {
    async fn list_key_versions(&self) -> Result<Vec<KeyVersionRow>, StorageError> {
        self.bulk_queries.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        if self.bulk_unsupported {
            return Err(StorageError::Unsupported("bulk key version query".into()));
        }
        Ok(read(&self.rows).clone())
    }

    async fn active_key_version(&self) -> Result<Option<KeyVersionRow>, StorageError> {
        self.single_queries.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let rows = read(&self.rows);
        Ok(rows
            .iter()
            .find(|row| row.active)
            .or_else(|| rows.first())
            .cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

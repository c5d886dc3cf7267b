//! Key version resolution across external stores.
//!
//! Sources are tried in order, each bounded by the configured timeout:
//!
//! 1. the secret store (JSON payload, array or single object)
//! 2. the relational store's bulk query
//! 3. the relational store's single-row query
//!
//! A source that times out, errors, or yields no usable key versions is
//! skipped. If every source comes up empty the result is a configuration
//! error.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use courier_storage::{KeyVersionStore, SecretStore, StorageError};

use crate::config::KeyRingConfig;
use crate::error::KeyringError;
use crate::key_version::{parse_secret_payload, KeyVersion};

/// Source that satisfied a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySource {
    /// Secret store payload.
    SecretStore,
    /// Relational store, bulk query.
    DatabaseBulk,
    /// Relational store, single-row query.
    DatabaseSingle,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SecretStore => "secret-store",
            Self::DatabaseBulk => "database-bulk",
            Self::DatabaseSingle => "database-single",
        };
        f.write_str(name)
    }
}

/// The full set of known key versions and the active one.
#[derive(Debug)]
pub struct ResolvedKeySet {
    versions: Vec<KeyVersion>,
    active_index: usize,
    source: KeySource,
}

impl ResolvedKeySet {
    /// Builds a key set from usable versions in stored order.
    ///
    /// The active version is the first one flagged active, or the first
    /// version if none is flagged. Returns `None` for an empty list.
    pub fn new(versions: Vec<KeyVersion>, source: KeySource) -> Option<Self> {
        if versions.is_empty() {
            return None;
        }

        let flagged: Vec<u32> = versions
            .iter()
            .filter(|v| v.is_active())
            .map(KeyVersion::id)
            .collect();
        if flagged.len() > 1 {
            warn!(
                source = %source,
                active_versions = ?flagged,
                "Several key versions flagged active, using the first"
            );
        }

        let active_index = versions.iter().position(KeyVersion::is_active).unwrap_or(0);

        Some(Self {
            versions,
            active_index,
            source,
        })
    }

    /// The active key version.
    pub fn active(&self) -> &KeyVersion {
        &self.versions[self.active_index]
    }

    /// All key versions in stored order.
    pub fn versions(&self) -> &[KeyVersion] {
        &self.versions
    }

    /// Every version except the active one, in stored order.
    pub fn others(&self) -> impl Iterator<Item = &KeyVersion> {
        let active = self.active_index;
        self.versions
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != active)
            .map(|(_, v)| v)
    }

    /// Looks up a version by id.
    pub fn get(&self, id: u32) -> Option<&KeyVersion> {
        self.versions.iter().find(|v| v.id() == id)
    }

    /// Version ids in stored order.
    pub fn ids(&self) -> Vec<u32> {
        self.versions.iter().map(KeyVersion::id).collect()
    }

    /// Source that produced this set.
    pub fn source(&self) -> KeySource {
        self.source
    }
}

/// Resolves key versions from the configured stores.
pub struct KeyResolver {
    secret_store: Option<Arc<dyn SecretStore>>,
    key_store: Option<Arc<dyn KeyVersionStore>>,
    config: KeyRingConfig,
}

impl KeyResolver {
    /// Creates a resolver with no stores attached.
    pub fn new(config: KeyRingConfig) -> Self {
        Self {
            secret_store: None,
            key_store: None,
            config,
        }
    }

    /// Attaches the primary secret store.
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    /// Attaches the fallback relational store.
    pub fn with_key_store(mut self, store: Arc<dyn KeyVersionStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Resolver configuration.
    pub fn config(&self) -> &KeyRingConfig {
        &self.config
    }

    /// Walks the sources in order and returns the first usable key set.
    ///
    /// # Errors
    ///
    /// [`KeyringError::Configuration`] when no source yields a usable key
    /// version. The message lists what each source reported.
    pub async fn resolve(&self) -> Result<ResolvedKeySet, KeyringError> {
        let mut attempts: Vec<String> = Vec::new();

        if let Some(store) = &self.secret_store {
            match self.from_secret_store(store.as_ref()).await {
                Ok(Some(set)) => return Ok(resolved(set)),
                Ok(None) => attempts.push(format!("{}: no usable key versions", KeySource::SecretStore)),
                Err(e) => attempts.push(format!("{}: {e}", KeySource::SecretStore)),
            }
        } else {
            attempts.push(format!("{}: not configured", KeySource::SecretStore));
        }

        if let Some(store) = &self.key_store {
            match self.bounded(store.list_key_versions()).await {
                Ok(rows) => {
                    let versions: Vec<KeyVersion> = rows.iter().map(KeyVersion::from).collect();
                    let versions = usable(versions, KeySource::DatabaseBulk);
                    if let Some(set) = ResolvedKeySet::new(versions, KeySource::DatabaseBulk) {
                        return Ok(resolved(set));
                    }
                    attempts.push(format!("{}: no usable key versions", KeySource::DatabaseBulk));
                }
                Err(StorageError::Unsupported(reason)) => {
                    debug!(store = store.name(), reason = %reason, "Bulk key query unsupported");
                    attempts.push(format!("{}: unsupported", KeySource::DatabaseBulk));
                }
                Err(e) => {
                    warn!(store = store.name(), error = %e, "Bulk key query failed");
                    attempts.push(format!("{}: {e}", KeySource::DatabaseBulk));
                }
            }

            match self.bounded(store.active_key_version()).await {
                Ok(row) => {
                    let versions: Vec<KeyVersion> = row.iter().map(KeyVersion::from).collect();
                    let versions = usable(versions, KeySource::DatabaseSingle);
                    if let Some(set) = ResolvedKeySet::new(versions, KeySource::DatabaseSingle) {
                        return Ok(resolved(set));
                    }
                    attempts.push(format!("{}: no usable key versions", KeySource::DatabaseSingle));
                }
                Err(e) => {
                    warn!(store = store.name(), error = %e, "Single-row key query failed");
                    attempts.push(format!("{}: {e}", KeySource::DatabaseSingle));
                }
            }
        } else {
            attempts.push("database: not configured".to_string());
        }

        Err(KeyringError::Configuration(format!(
            "no usable key material ({})",
            attempts.join("; ")
        )))
    }

    async fn from_secret_store(
        &self,
        store: &dyn SecretStore,
    ) -> Result<Option<ResolvedKeySet>, KeyringError> {
        let name = self.config.secret_name.as_str();

        let payload = match self.bounded(store.read_secret(name)).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(store = store.name(), secret = %name, "Key secret not found");
                return Ok(None);
            }
            Err(e) => {
                warn!(store = store.name(), secret = %name, error = %e, "Key secret unavailable");
                return Err(KeyringError::Configuration(e.to_string()));
            }
        };

        let versions = parse_secret_payload(&payload).map_err(|e| {
            warn!(store = store.name(), secret = %name, error = %e, "Key secret is malformed");
            e
        })?;

        Ok(ResolvedKeySet::new(
            usable(versions, KeySource::SecretStore),
            KeySource::SecretStore,
        ))
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let limit = self.config.source_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(StorageError::Timeout(limit)))
    }
}

fn resolved(set: ResolvedKeySet) -> ResolvedKeySet {
    info!(
        source = %set.source(),
        versions = set.versions().len(),
        active_version = set.active().id(),
        "Key versions resolved"
    );
    set
}

/// Drops versions with an empty passphrase or salt, and repeated ids.
fn usable(versions: Vec<KeyVersion>, source: KeySource) -> Vec<KeyVersion> {
    let mut seen = HashSet::new();
    versions
        .into_iter()
        .filter(|v| {
            if !v.is_usable() {
                warn!(source = %source, key_version = v.id(), "Skipping key version without passphrase or salt");
                return false;
            }
            if !seen.insert(v.id()) {
                warn!(source = %source, key_version = v.id(), "Skipping duplicate key version");
                return false;
            }
            true
        })
        .collect()
}

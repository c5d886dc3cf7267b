//! Integration tests for Courier field protection.
//!
//! These tests drive the keyring against real per-tenant SQLite key stores:
//! resolution, encryption, rotation, reload and rewrap end to end.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tempfile::TempDir;

use courier_crypto::random::generate_salt;
use courier_keyring::{FieldProtector, KeyResolver, KeyRingConfig};
use courier_storage::KeyVersionRow;
use courier_storage_sqlite::SqliteBackend;

// ============================================================================
// Test Tenant
// ============================================================================

/// A tenant key store in its own temporary data directory.
pub struct TestTenant {
    pub store: Arc<SqliteBackend>,
    _data_dir: Option<TempDir>,
}

impl TestTenant {
    /// Creates a tenant in a fresh temporary directory.
    pub async fn create(tenant: &str) -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;
        let store = SqliteBackend::open(data_dir.path(), tenant).await?;

        Ok(Self {
            store: Arc::new(store),
            _data_dir: Some(data_dir),
        })
    }

    /// Opens a tenant inside a directory owned by the caller.
    pub async fn open_in(base: &Path, tenant: &str) -> Result<Self> {
        let store = SqliteBackend::open(base, tenant).await?;

        Ok(Self {
            store: Arc::new(store),
            _data_dir: None,
        })
    }

    /// Adds a key version with a random salt.
    pub async fn add_key(&self, id: u32, passphrase: &str, active: bool) -> Result<()> {
        let row = KeyVersionRow::new(id, passphrase, generate_salt(), false);
        self.store.insert_key_version(&row).await?;
        if active {
            self.store.set_active_key_version(id).await?;
        }
        Ok(())
    }

    /// A protector reading this tenant's secrets and key versions.
    pub fn protector(&self) -> FieldProtector {
        self.protector_with(KeyRingConfig::default())
    }

    /// A protector with a custom configuration.
    pub fn protector_with(&self, config: KeyRingConfig) -> FieldProtector {
        FieldProtector::new(
            KeyResolver::new(config)
                .with_secret_store(self.store.clone())
                .with_key_store(self.store.clone()),
        )
    }
}

/// Flips one bit in the decoded envelope and re-encodes it.
pub fn tamper(envelope: &str, position: usize) -> String {
    let mut sealed = BASE64.decode(envelope).unwrap_or_default();
    if let Some(byte) = sealed.get_mut(position) {
        *byte ^= 0x80;
    }
    BASE64.encode(sealed)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use courier_crypto::is_encrypted_format;
    use courier_keyring::{KeyRingState, KeySource, KeyringError, Recovered};
    use std::time::Duration;

    #[tokio::test]
    async fn test_alice_end_to_end() {
        let tenant = TestTenant::create("acme").await.unwrap();
        tenant.add_key(1, "correct-horse", true).await.unwrap();
        let protector = tenant.protector();

        let envelope = protector.encrypt("alice@example.com").await.unwrap();

        assert!(envelope.len() >= 40);
        assert!(is_encrypted_format(&envelope));
        assert_eq!(protector.decrypt(&envelope).await.unwrap(), "alice@example.com");

        let status = protector.status();
        assert_eq!(status.state, KeyRingState::Ready);
        assert_eq!(status.source, Some(KeySource::DatabaseBulk));
        assert_eq!(status.active_key_version, Some(1));
    }

    #[tokio::test]
    async fn test_empty_tenant_is_configuration_error() {
        let tenant = TestTenant::create("empty").await.unwrap();
        let protector = tenant.protector();

        assert!(matches!(
            protector.encrypt("alice@example.com").await,
            Err(KeyringError::Configuration(_))
        ));
        assert_eq!(protector.status().state, KeyRingState::Failed);
    }

    #[tokio::test]
    async fn test_secret_payload_takes_precedence() {
        let tenant = TestTenant::create("vaulted").await.unwrap();
        tenant.add_key(1, "database-key", true).await.unwrap();
        tenant
            .store
            .put_secret(
                "courier-encryption-keys",
                r#"[
                    {"Id": 7, "Passphrase": "retired", "Salt": "AAECAwQFBgcICQoLDA0ODw==", "IsActive": false},
                    {"Id": 8, "Passphrase": "current", "Salt": "EBESExQVFhcYGRobHB0eHw==", "IsActive": true}
                ]"#,
            )
            .await
            .unwrap();

        let protector = tenant.protector();
        assert_eq!(protector.active_key_version_id().await.unwrap(), 8);

        let status = protector.status();
        assert_eq!(status.source, Some(KeySource::SecretStore));
        assert_eq!(status.key_versions, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_custom_secret_name() {
        let tenant = TestTenant::create("custom").await.unwrap();
        tenant
            .store
            .put_secret(
                "acme-field-keys",
                r#"{"id": 3, "passphrase": "p", "salt": "c2FsdHNhbHRzYWx0c2FsdA==", "active": true}"#,
            )
            .await
            .unwrap();

        let default_name = tenant.protector();
        let custom_name =
            tenant.protector_with(KeyRingConfig::new().with_secret_name("acme-field-keys"));

        assert!(default_name.warm_up().await.is_err());
        assert_eq!(custom_name.active_key_version_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rotation_reload_and_fallback() {
        let tenant = TestTenant::create("rotating").await.unwrap();
        tenant.add_key(1, "generation-one", true).await.unwrap();
        let protector = tenant.protector();

        let old = protector.encrypt("bob@example.com").await.unwrap();

        // Rotate out of band; the cached ring still sees version 1.
        tenant.add_key(2, "generation-two", true).await.unwrap();
        assert_eq!(protector.active_key_version_id().await.unwrap(), 1);

        protector.reload();
        assert_eq!(protector.active_key_version_id().await.unwrap(), 2);

        let recovered = protector.decrypt_or_default(&old, "integration", "user-1").await.unwrap();
        assert_eq!(
            recovered,
            Recovered::Decrypted {
                plaintext: "bob@example.com".to_string(),
                key_version: 1
            }
        );
        assert!(matches!(
            protector.decrypt(&old).await,
            Err(KeyringError::Decryption { key_version: 2, .. })
        ));

        let new = protector.encrypt("bob@example.com").await.unwrap();
        assert_eq!(protector.decrypt(&new).await.unwrap(), "bob@example.com");
    }

    #[tokio::test]
    async fn test_rewrap_after_rotation() {
        let tenant = TestTenant::create("migrating").await.unwrap();
        tenant.add_key(1, "generation-one", true).await.unwrap();
        let protector = tenant.protector();

        let values = ["a@example.com", "b@example.com", "c@example.com"];
        let mut envelopes = Vec::new();
        for value in values {
            envelopes.push(protector.encrypt(value).await.unwrap());
        }

        tenant.add_key(2, "generation-two", true).await.unwrap();
        protector.reload();

        for (value, envelope) in values.iter().zip(&envelopes) {
            let rewrapped = protector.rewrap(envelope, "migration", value).await.unwrap();
            assert_eq!(rewrapped.from_version, 1);
            assert_eq!(rewrapped.to_version, 2);
            assert_eq!(protector.decrypt(&rewrapped.envelope).await.unwrap(), *value);
        }

        // Envelopes that were not rewrapped are lost with version 1.
        tenant.store.delete_key_version(1).await.unwrap();
        protector.reload();
        let rewrapped = protector.rewrap(&envelopes[0], "migration", "a").await;
        assert!(matches!(rewrapped, Err(KeyringError::Orphaned { .. })));
    }

    #[tokio::test]
    async fn test_deleted_key_orphans_data() {
        let tenant = TestTenant::create("orphans").await.unwrap();
        tenant.add_key(1, "doomed", true).await.unwrap();
        let protector = tenant.protector();
        let envelope = protector.encrypt("carol@example.com").await.unwrap();

        tenant.add_key(2, "survivor", true).await.unwrap();
        tenant.store.delete_key_version(1).await.unwrap();
        protector.reload();

        let recovered = protector
            .decrypt_or_default(&envelope, "UserRepository.find", "user-42")
            .await
            .unwrap();
        assert_eq!(recovered, Recovered::Orphaned(envelope));
    }

    #[tokio::test]
    async fn test_tampering_rejected_everywhere() {
        let tenant = TestTenant::create("tamper").await.unwrap();
        tenant.add_key(1, "k1", false).await.unwrap();
        tenant.add_key(2, "k2", true).await.unwrap();
        let protector = tenant.protector();
        let envelope = protector.encrypt("dave@example.com").await.unwrap();

        for position in [0, 11, 12, 20, 43] {
            let tampered = tamper(&envelope, position);
            assert!(protector.decrypt(&tampered).await.is_err());
            assert!(protector
                .decrypt_or_default(&tampered, "integration", "user-2")
                .await
                .unwrap()
                .is_orphaned());
        }
    }

    #[tokio::test]
    async fn test_blind_index_lookup_column() {
        let tenant = TestTenant::create("lookup").await.unwrap();
        tenant.add_key(1, "k1", true).await.unwrap();
        let protector = tenant.protector();

        let stored = protector.blind_index("Alice@Example.com").await.unwrap();
        let probe = protector.blind_index("  alice@example.com  ").await.unwrap();
        assert_eq!(stored, probe);

        tenant.add_key(2, "k2", true).await.unwrap();
        protector.reload();
        assert_ne!(protector.blind_index("alice@example.com").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let base = TempDir::new().unwrap();
        let acme = TestTenant::open_in(base.path(), "acme").await.unwrap();
        let globex = TestTenant::open_in(base.path(), "globex").await.unwrap();
        acme.add_key(1, "acme-secret", true).await.unwrap();
        globex.add_key(1, "globex-secret", true).await.unwrap();

        let acme_protector = acme.protector();
        let globex_protector = globex.protector();

        let envelope = acme_protector.encrypt("eve@example.com").await.unwrap();
        assert!(globex_protector.decrypt(&envelope).await.is_err());
        assert!(globex_protector
            .decrypt_or_default(&envelope, "integration", "user-3")
            .await
            .unwrap()
            .is_orphaned());

        assert_ne!(
            acme_protector.blind_index("eve@example.com").await.unwrap(),
            globex_protector.blind_index("eve@example.com").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_legacy_plaintext_coexists() {
        let tenant = TestTenant::create("legacy").await.unwrap();
        tenant.add_key(1, "k1", true).await.unwrap();
        let protector = tenant.protector();

        let rows = vec![
            "legacy@example.com".to_string(),
            protector.encrypt("modern@example.com").await.unwrap(),
            String::new(),
        ];

        let mut read = Vec::new();
        for row in &rows {
            let recovered = protector.decrypt_or_default(row, "integration", "row").await.unwrap();
            read.push(recovered.into_string());
        }

        assert_eq!(read, vec!["legacy@example.com", "modern@example.com", ""]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_protector_under_concurrency() {
        let tenant = TestTenant::create("busy").await.unwrap();
        tenant.add_key(1, "k1", true).await.unwrap();
        let protector = Arc::new(
            tenant.protector_with(KeyRingConfig::new().with_source_timeout(Duration::from_secs(5))),
        );

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let protector = Arc::clone(&protector);
                tokio::spawn(async move {
                    let plaintext = format!("user-{i}@example.com");
                    let envelope = protector.encrypt(&plaintext).await.unwrap();
                    assert_eq!(protector.decrypt(&envelope).await.unwrap(), plaintext);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let status = protector.status();
        assert_eq!(status.derived_keys, 1);
        assert_eq!(status.generation, 0);
    }
}

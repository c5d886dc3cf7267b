//! # Courier Storage - SQLite Backend
//!
//! SQLite key material store with tenant isolation.
//! Each tenant gets its own database file holding its secret payloads and
//! key version rows.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use courier_storage::{KeyVersionRow, KeyVersionStore, SecretStore, StorageError};

type RawKeyVersion = (i64, String, Vec<u8>, i64);

/// SQLite key material store with tenant isolation.
///
/// Each tenant gets its own database file at `{base_path}/{tenant}.db`.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Opens or creates a SQLite database for a tenant.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where tenant databases are stored
    /// * `tenant` - Tenant identifier (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Tenant name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, tenant: &str) -> Result<Self, StorageError> {
        Self::validate_tenant(tenant)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{tenant}.db"));
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        debug!(tenant = %tenant, path = %db_path.display(), "Opening SQLite key store");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self { pool, db_path };

        backend.migrate().await?;

        info!(tenant = %tenant, "SQLite key store ready");

        Ok(backend)
    }

    /// Path of the tenant database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Validates that a tenant name is safe.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_tenant(tenant: &str) -> Result<(), StorageError> {
        if tenant.is_empty() {
            return Err(StorageError::InvalidInput("tenant cannot be empty".into()));
        }

        if tenant.len() > 64 {
            return Err(StorageError::InvalidInput("tenant name too long".into()));
        }

        let valid = tenant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "tenant must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Runs database migrations.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                name       TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS key_versions (
                id         INTEGER PRIMARY KEY,
                passphrase TEXT NOT NULL,
                salt       BLOB NOT NULL,
                active     INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_key_versions_active ON key_versions (active)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        debug!("Migrations complete");

        Ok(())
    }

    /// Returns the current Unix timestamp.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    /// Stores (or replaces) a secret payload.
    pub async fn put_secret(&self, name: &str, payload: &str) -> Result<(), StorageError> {
        let now = Self::now();

        sqlx::query(
            r#"
            INSERT INTO secrets (name, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Inserts a key version row. Existing rows are never modified.
    pub async fn insert_key_version(&self, row: &KeyVersionRow) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO key_versions (id, passphrase, salt, active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(i64::from(row.id))
        .bind(row.passphrase.as_str())
        .bind(row.salt.as_slice())
        .bind(i64::from(row.active))
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Flags `id` as the only active key version.
    pub async fn set_active_key_version(&self, id: u32) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let updated = sqlx::query("UPDATE key_versions SET active = (id = ?)")
            .bind(i64::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM key_versions WHERE id = ?")
            .bind(i64::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if exists.is_none() {
            return Err(StorageError::NotFound(format!("key version {id}")));
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!(id, rows = updated.rows_affected(), "Active key version changed");

        Ok(())
    }

    /// Deletes a key version row.
    pub async fn delete_key_version(&self, id: u32) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM key_versions WHERE id = ?")
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    fn to_row((id, passphrase, salt, active): RawKeyVersion) -> Result<KeyVersionRow, StorageError> {
        let id = u32::try_from(id)
            .map_err(|_| StorageError::Serialization(format!("key version id out of range: {id}")))?;
        Ok(KeyVersionRow::new(id, passphrase, salt, active != 0))
    }
}

#[async_trait]
impl SecretStore for SqliteBackend {
    async fn read_secret(&self, name: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM secrets WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|(payload,)| payload))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[async_trait]
impl KeyVersionStore for SqliteBackend {
    async fn list_key_versions(&self) -> Result<Vec<KeyVersionRow>, StorageError> {
        let rows: Vec<RawKeyVersion> =
            sqlx::query_as("SELECT id, passphrase, salt, active FROM key_versions ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.into_iter().map(Self::to_row).collect()
    }

    async fn active_key_version(&self) -> Result<Option<KeyVersionRow>, StorageError> {
        let row: Option<RawKeyVersion> = sqlx::query_as(
            "SELECT id, passphrase, salt, active FROM key_versions ORDER BY active DESC, id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(Self::to_row).transpose()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

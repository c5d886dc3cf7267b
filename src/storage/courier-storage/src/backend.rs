//! Key material store traits.

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StorageError;

/// One key version as stored, before validation by the keyring.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyVersionRow {
    /// Version identifier.
    #[zeroize(skip)]
    pub id: u32,
    /// Passphrase the field key is derived from.
    pub passphrase: String,
    /// Salt for key derivation and blind indexing.
    pub salt: Vec<u8>,
    /// Whether this version encrypts new data.
    #[zeroize(skip)]
    pub active: bool,
}

impl KeyVersionRow {
    /// Creates a row.
    pub fn new(id: u32, passphrase: impl Into<String>, salt: impl Into<Vec<u8>>, active: bool) -> Self {
        Self {
            id,
            passphrase: passphrase.into(),
            salt: salt.into(),
            active,
        }
    }
}

impl std::fmt::Debug for KeyVersionRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVersionRow")
            .field("id", &self.id)
            .field("passphrase", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .field("active", &self.active)
            .finish()
    }
}

/// A named-secret store (vault, key vault, secret manager).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Reads the payload stored under `name`, if any.
    async fn read_secret(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Returns the name of this store for logging/debugging.
    fn name(&self) -> &'static str;
}

/// A relational store holding one row per key version.
#[async_trait]
pub trait KeyVersionStore: Send + Sync {
    /// Returns every key version in stored order.
    ///
    /// Stores without a bulk query return [`StorageError::Unsupported`].
    async fn list_key_versions(&self) -> Result<Vec<KeyVersionRow>, StorageError> {
        Err(StorageError::Unsupported("bulk key version query".into()))
    }

    /// Returns the single current key version, if any.
    async fn active_key_version(&self) -> Result<Option<KeyVersionRow>, StorageError>;

    /// Returns the name of this store for logging/debugging.
    fn name(&self) -> &'static str;
}

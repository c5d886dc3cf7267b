//! Key versions and the secret store payload format.
//!
//! A secret store holds either a JSON array of key versions or a single
//! object:
//!
//! ```json
//! [
//!   { "id": 1, "passphrase": "...", "salt": "<base64>", "active": false },
//!   { "id": 2, "passphrase": "...", "salt": "<base64>", "active": true }
//! ]
//! ```
//!
//! PascalCase field names (`Id`, `Passphrase`, `Salt`, `IsActive`) are
//! accepted as well.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use courier_storage::KeyVersionRow;

use crate::error::KeyringError;

/// One immutable generation of field key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyVersion {
    #[zeroize(skip)]
    id: u32,
    passphrase: String,
    salt: Vec<u8>,
    #[zeroize(skip)]
    active: bool,
}

impl KeyVersion {
    /// Creates a key version.
    pub fn new(id: u32, passphrase: impl Into<String>, salt: impl Into<Vec<u8>>, active: bool) -> Self {
        Self {
            id,
            passphrase: passphrase.into(),
            salt: salt.into(),
            active,
        }
    }

    /// Version identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Passphrase the field key is derived from.
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Salt used for key derivation and as the blind index key.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Whether the store flags this version as active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// A version is usable when both passphrase and salt are non-empty.
    pub fn is_usable(&self) -> bool {
        !self.passphrase.is_empty() && !self.salt.is_empty()
    }
}

impl std::fmt::Debug for KeyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVersion")
            .field("id", &self.id)
            .field("passphrase", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .field("active", &self.active)
            .finish()
    }
}

impl From<&KeyVersionRow> for KeyVersion {
    fn from(row: &KeyVersionRow) -> Self {
        Self::new(row.id, row.passphrase.clone(), row.salt.clone(), row.active)
    }
}

#[derive(Deserialize)]
struct KeyVersionDocument {
    #[serde(alias = "Id", alias = "keyVersion", alias = "KeyVersion")]
    id: u32,
    #[serde(alias = "Passphrase")]
    passphrase: String,
    #[serde(alias = "Salt")]
    salt: String,
    #[serde(default, alias = "Active", alias = "isActive", alias = "IsActive")]
    active: bool,
}

impl KeyVersionDocument {
    fn into_key_version(self) -> Result<KeyVersion, KeyringError> {
        let Self {
            id,
            passphrase,
            salt,
            active,
        } = self;
        let passphrase = Zeroizing::new(passphrase);
        let salt = Zeroizing::new(salt);

        let salt = BASE64.decode(salt.trim()).map_err(|_| {
            KeyringError::Configuration(format!("key version {id} has a non-base64 salt"))
        })?;
        Ok(KeyVersion::new(id, passphrase.as_str(), salt, active))
    }
}

/// Parses a secret store payload into key versions, in payload order.
///
/// The payload is an array when its trimmed form starts with `[`, otherwise a
/// single object.
pub fn parse_secret_payload(payload: &str) -> Result<Vec<KeyVersion>, KeyringError> {
    let trimmed = payload.trim();

    let documents: Vec<KeyVersionDocument> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
    } else {
        serde_json::from_str(trimmed).map(|doc| vec![doc])
    }
    .map_err(|e| {
        // serde_json messages name positions and types, not values.
        KeyringError::Configuration(format!("invalid key version payload: {e}"))
    })?;

    documents
        .into_iter()
        .map(KeyVersionDocument::into_key_version)
        .collect()
}

//! Secure key types with automatic memory zeroization.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;
use crate::kdf::derive_field_key;
use crate::random::generate_key;

/// A 256-bit field encryption key with automatic zeroization.
///
/// Usually derived from a key version with [`FieldKey::derive`]; the raw bytes
/// never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey {
    bytes: [u8; KEY_SIZE],
}

impl FieldKey {
    /// Generates a new random key.
    pub fn generate() -> Self {
        let key = generate_key();
        Self { bytes: *key }
    }

    /// Derives the key of a key version from its passphrase and salt.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let key = derive_field_key(passphrase, salt)?;
        Ok(Self { bytes: *key })
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);

        Ok(Self { bytes: key_bytes })
    }

    /// Returns the raw key bytes.
    ///
    /// Use with caution - the returned slice is not zeroized automatically.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

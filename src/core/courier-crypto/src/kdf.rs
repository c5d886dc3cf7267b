//! Key derivation functions.
//!
//! Derives the data-encryption key of a key version from its passphrase and
//! salt with PBKDF2-HMAC-SHA256 (RFC 8018).
//!
//! The iteration count is low on purpose: one long-lived key is derived per
//! key version per process and then cached. Login password hashing is a
//! different concern and does not use this module.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;

/// PBKDF2 iteration count for field keys.
pub const FIELD_KEY_ITERATIONS: u32 = 1000;

/// Derives `length` bytes with PBKDF2-HMAC-SHA256.
///
/// # Arguments
///
/// * `password` - Secret input
/// * `salt` - Per key-version salt
/// * `iterations` - Round count (must be > 0)
/// * `length` - Desired output length in bytes (must be > 0)
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if length == 0 {
        return Err(CryptoError::InvalidInput(
            "output length must be > 0".to_string(),
        ));
    }

    if iterations == 0 {
        return Err(CryptoError::InvalidInput(
            "iteration count must be > 0".to_string(),
        ));
    }

    let mut okm = Zeroizing::new(vec![0u8; length]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut okm);

    Ok(okm)
}

/// Derives the AES-256 field key of a key version.
///
/// Deterministic in `(passphrase, salt)`: PBKDF2-HMAC-SHA256, 1000
/// iterations, 32-byte output, passphrase taken as UTF-8.
pub fn derive_field_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidKey("empty passphrase".to_string()));
    }
    if salt.is_empty() {
        return Err(CryptoError::InvalidKey("empty salt".to_string()));
    }

    let derived = derive_key(passphrase.as_bytes(), salt, FIELD_KEY_ITERATIONS, KEY_SIZE)?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&derived);

    Ok(key)
}

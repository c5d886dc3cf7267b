//! AES-256-GCM authenticated encryption.
//!
//! Byte-level AEAD used by the field envelope. Every call to [`encrypt`]
//! draws a fresh random nonce; the output layout is
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random::generate_nonce;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed sealed payload (empty plaintext).
pub const MIN_SEALED_LEN: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts plaintext using AES-256-GCM.
///
/// The nonce is generated from the OS CSPRNG and prepended to the output.
///
/// # Arguments
///
/// * `key` - 32-byte encryption key
/// * `plaintext` - Data to encrypt
///
/// # Returns
///
/// `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts and verifies a payload produced by [`encrypt`].
///
/// The first 12 bytes are the nonce, the last 16 the tag, the middle the
/// ciphertext. Nothing is returned unless the tag verifies.
///
/// # Errors
///
/// * [`CryptoError::Format`] if the payload is shorter than 28 bytes
/// * [`CryptoError::Authentication`] on tag mismatch
pub fn decrypt(key: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }

    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::Format(format!(
            "sealed payload is {} bytes, minimum is {}",
            sealed.len(),
            MIN_SEALED_LEN
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let (nonce, encrypted) = sealed.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), encrypted)
        .map_err(|_| CryptoError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}

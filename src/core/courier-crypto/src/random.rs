//! Randomness for nonces, field keys and new key versions.
//!
//! Everything is drawn from the operating system's CSPRNG.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};

/// Salt length for new key versions.
pub const SALT_SIZE: usize = 16;

/// Entropy behind a generated passphrase, in bytes.
const PASSPHRASE_ENTROPY: usize = 32;

/// A random 256-bit key, zeroized on drop.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// A fresh AES-GCM nonce. Drawn for every encryption, never reused.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// A salt for a new key version.
///
/// The salt doubles as the blind index key, so it is as secret as the
/// passphrase.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// A passphrase for a new key version: 256 random bits, base64 encoded.
pub fn generate_passphrase() -> Zeroizing<String> {
    let mut entropy = Zeroizing::new([0u8; PASSPHRASE_ENTROPY]);
    OsRng.fill_bytes(&mut *entropy);
    Zeroizing::new(BASE64.encode(*entropy))
}

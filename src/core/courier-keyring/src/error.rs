//! Keyring error types.

use courier_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur while protecting fields.
///
/// Messages carry key version ids only; never ciphertext, plaintext or key
/// material.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// No usable key material could be resolved. Nothing can be encrypted or
    /// decrypted until the stores are fixed and the keyring reloaded.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Strict encryption failed.
    #[error("encryption failed with key version {key_version}")]
    Encryption {
        /// Key version used.
        key_version: u32,
        /// Underlying cause.
        #[source]
        source: CryptoError,
    },

    /// Strict decryption failed (malformed envelope or authentication).
    #[error("decryption failed with key version {key_version}")]
    Decryption {
        /// Key version tried.
        key_version: u32,
        /// Underlying cause.
        #[source]
        source: CryptoError,
    },

    /// Blind index computation failed.
    #[error("blind index failed with key version {key_version}")]
    BlindIndex {
        /// Key version whose salt was used.
        key_version: u32,
        /// Underlying cause.
        #[source]
        source: CryptoError,
    },

    /// The value is not in envelope format.
    #[error("value is not an encrypted envelope")]
    NotEncrypted,

    /// No known key version decrypts the value.
    #[error("no known key version decrypts the value ({versions_tried} tried)")]
    Orphaned {
        /// Number of key versions tried.
        versions_tried: usize,
    },
}

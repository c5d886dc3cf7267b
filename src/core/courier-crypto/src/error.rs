//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Malformed envelope (bad base64, too short, undecodable plaintext).
    #[error("malformed envelope: {0}")]
    Format(String),

    /// AEAD tag verification failed: tampered data or wrong key.
    #[error("authentication failed")]
    Authentication,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

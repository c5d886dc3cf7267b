//! # Courier Crypto
//!
//! Field-level cryptographic primitives for the Courier dispatch platform.
//!
//! This crate provides the synchronous, CPU-bound building blocks used to
//! protect sensitive columns (owner emails, app secrets, SMTP servers, email
//! bodies):
//! - Authenticated encryption (AES-256-GCM) and the base64 field envelope
//! - Key derivation from a key version's passphrase and salt (PBKDF2)
//! - Blind indexes (HMAC-SHA256) for exact-match lookup of encrypted values
//! - A format sniffer telling envelopes apart from legacy plaintext
//! - Secure random generation
//!
//! Nothing here resolves or caches key material; see `courier-keyring`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod blind_index;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod sniff;

pub use blind_index::blind_index;
pub use error::CryptoError;
pub use keys::FieldKey;
pub use sniff::is_encrypted_format;

//! # Courier Keyring
//!
//! Resolves versioned key material from external stores, caches it, and
//! exposes the field protection entry points business services call.
//!
//! ## Features
//!
//! - Key versions resolved once from a secret store, falling back to a
//!   relational store (bulk query, then single-row query)
//! - Derived field keys cached per key version with single-flight derivation
//! - Strict encrypt/decrypt under the active key version
//! - Best-effort decryption that falls back across retired key versions
//! - Blind indexes for exact-match lookup of encrypted columns
//! - Explicit reload after an out-of-band key rotation
//!
//! ## Example
//!
//! ```ignore
//! let resolver = KeyResolver::new(KeyRingConfig::default())
//!     .with_secret_store(vault)
//!     .with_key_store(database);
//! let protector = FieldProtector::new(resolver);
//!
//! let envelope = protector.encrypt("alice@example.com").await?;
//! let lookup = protector.blind_index("Alice@Example.com").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod derived;
pub mod error;
pub mod key_version;
pub mod keyring;
pub mod protector;
pub mod resolver;

pub use config::KeyRingConfig;
pub use derived::DerivedKeyCache;
pub use error::KeyringError;
pub use key_version::KeyVersion;
pub use keyring::{KeyRing, KeyRingState, KeyRingStatus, KeySnapshot};
pub use protector::{FieldProtector, Recovered, Rewrapped};
pub use resolver::{KeyResolver, KeySource, ResolvedKeySet};

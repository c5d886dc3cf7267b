//! # Courier Storage
//!
//! Abstractions over the external stores that hold key material.
//!
//! Key versions live outside this workspace, either as a JSON payload in a
//! secret store or as rows in a relational store. This crate defines the
//! read-only traits the keyring resolves them through, the raw row type, and
//! an in-memory implementation for tests and embedding.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{KeyVersionRow, KeyVersionStore, SecretStore};
pub use error::StorageError;
pub use memory::MemoryKeyStore;

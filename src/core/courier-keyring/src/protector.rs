//! Field protection entry points.
//!
//! [`FieldProtector`] is what business services hold (usually behind an
//! `Arc`) to encrypt, decrypt and blind-index sensitive columns. It owns the
//! [`KeyRing`]; there is no process-wide state.
//!
//! Two decryption paths exist:
//!
//! - [`FieldProtector::decrypt`] is strict: active key only, any failure is
//!   an error.
//! - [`FieldProtector::decrypt_or_default`] is best-effort: legacy plaintext
//!   passes through, retired key versions are tried after the active one,
//!   and undecryptable values come back as [`Recovered::Orphaned`].

use courier_crypto::envelope;
use courier_crypto::{blind_index, is_encrypted_format, CryptoError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::key_version::KeyVersion;
use crate::keyring::{KeyRing, KeyRingStatus, KeySnapshot};
use crate::resolver::KeyResolver;

/// Outcome of a best-effort decryption.
#[derive(Clone, PartialEq, Eq)]
pub enum Recovered {
    /// The value was not an envelope and is returned as is.
    Plain(String),
    /// The value was decrypted.
    Decrypted {
        /// Recovered plaintext.
        plaintext: String,
        /// Key version that opened the envelope.
        key_version: u32,
    },
    /// No known key version opens the envelope. Holds the original text,
    /// which must never be persisted or displayed as if decrypted.
    Orphaned(String),
}

impl Recovered {
    /// The best-effort text: plaintext when decrypted, the input otherwise.
    pub fn into_string(self) -> String {
        match self {
            Self::Plain(text) | Self::Orphaned(text) => text,
            Self::Decrypted { plaintext, .. } => plaintext,
        }
    }

    /// Whether the value could not be decrypted.
    pub fn is_orphaned(&self) -> bool {
        matches!(self, Self::Orphaned(_))
    }

    /// Key version that decrypted the value, if any.
    pub fn key_version(&self) -> Option<u32> {
        match self {
            Self::Decrypted { key_version, .. } => Some(*key_version),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Recovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.debug_tuple("Plain").field(&"[REDACTED]").finish(),
            Self::Decrypted { key_version, .. } => f
                .debug_struct("Decrypted")
                .field("plaintext", &"[REDACTED]")
                .field("key_version", key_version)
                .finish(),
            Self::Orphaned(text) => f
                .debug_struct("Orphaned")
                .field("len", &text.len())
                .finish(),
        }
    }
}

/// A value re-encrypted under the active key version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrapped {
    /// New envelope.
    pub envelope: String,
    /// Key version that opened the old envelope.
    pub from_version: u32,
    /// Active key version the new envelope is sealed with.
    pub to_version: u32,
}

impl Rewrapped {
    /// Whether the value moved to a different key version.
    pub fn changed_version(&self) -> bool {
        self.from_version != self.to_version
    }
}

/// Encrypts, decrypts and blind-indexes field values.
pub struct FieldProtector {
    ring: KeyRing,
}

impl FieldProtector {
    /// Wires the protector to its key sources. Nothing is resolved until the
    /// first operation or [`FieldProtector::warm_up`].
    pub fn new(resolver: KeyResolver) -> Self {
        Self {
            ring: KeyRing::new(resolver),
        }
    }

    /// The underlying key ring.
    pub fn key_ring(&self) -> &KeyRing {
        &self.ring
    }

    /// Resolves key versions and derives the active field key now, so the
    /// first request does not pay for it.
    pub async fn warm_up(&self) -> Result<(), KeyringError> {
        let snapshot = self.ring.snapshot().await?;
        let active = snapshot.active();
        snapshot.derived_key(active).map_err(|e| {
            KeyringError::Configuration(format!(
                "key version {} cannot derive a field key: {e}",
                active.id()
            ))
        })?;
        Ok(())
    }

    /// Encrypts `plaintext` under the active key version.
    ///
    /// # Errors
    ///
    /// [`KeyringError::Configuration`] without key material,
    /// [`KeyringError::Encryption`] if sealing fails.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, KeyringError> {
        let snapshot = self.ring.snapshot().await?;
        let active = snapshot.active();

        let sealed = snapshot
            .derived_key(active)
            .and_then(|key| envelope::seal(plaintext, &key));

        sealed.map_err(|source| KeyringError::Encryption {
            key_version: active.id(),
            source,
        })
    }

    /// Decrypts `text` with the active key version only.
    ///
    /// # Errors
    ///
    /// [`KeyringError::Decryption`] carrying a [`CryptoError::Format`] or
    /// [`CryptoError::Authentication`] cause. Never falls back to retired
    /// key versions.
    pub async fn decrypt(&self, text: &str) -> Result<String, KeyringError> {
        let snapshot = self.ring.snapshot().await?;
        let active = snapshot.active();

        open_with(&snapshot, active, text).map_err(|source| KeyringError::Decryption {
            key_version: active.id(),
            source,
        })
    }

    /// Best-effort decryption across every known key version.
    ///
    /// `caller` and `subject_id` only feed the orphaned-value warning.
    ///
    /// # Errors
    ///
    /// Only [`KeyringError::Configuration`]; cryptographic failures are
    /// reported through [`Recovered::Orphaned`].
    pub async fn decrypt_or_default(
        &self,
        text: &str,
        caller: &str,
        subject_id: &str,
    ) -> Result<Recovered, KeyringError> {
        if text.is_empty() || !is_encrypted_format(text) {
            return Ok(Recovered::Plain(text.to_string()));
        }

        let snapshot = self.ring.snapshot().await?;

        match recover(&snapshot, text, caller, subject_id) {
            Ok((plaintext, key_version)) => Ok(Recovered::Decrypted {
                plaintext: plaintext.to_string(),
                key_version,
            }),
            Err(_) => Ok(Recovered::Orphaned(text.to_string())),
        }
    }

    /// Blind index of `value` under the active key version's salt.
    pub async fn blind_index(&self, value: &str) -> Result<String, KeyringError> {
        let snapshot = self.ring.snapshot().await?;
        let active = snapshot.active();

        blind_index(value, active.salt()).map_err(|source| KeyringError::BlindIndex {
            key_version: active.id(),
            source,
        })
    }

    /// Id of the active key version, recorded alongside new envelopes.
    pub async fn active_key_version_id(&self) -> Result<u32, KeyringError> {
        Ok(self.ring.snapshot().await?.active().id())
    }

    /// Re-encrypts an envelope under the active key version.
    ///
    /// # Errors
    ///
    /// [`KeyringError::NotEncrypted`] for non-envelope input,
    /// [`KeyringError::Orphaned`] when no key version opens it.
    pub async fn rewrap(
        &self,
        text: &str,
        caller: &str,
        subject_id: &str,
    ) -> Result<Rewrapped, KeyringError> {
        if !is_encrypted_format(text) {
            return Err(KeyringError::NotEncrypted);
        }

        let snapshot = self.ring.snapshot().await?;
        let (plaintext, from_version) = recover(&snapshot, text, caller, subject_id)?;

        let active = snapshot.active();
        let envelope = snapshot
            .derived_key(active)
            .and_then(|key| envelope::seal(&plaintext, &key))
            .map_err(|source| KeyringError::Encryption {
                key_version: active.id(),
                source,
            })?;

        debug!(
            caller = %caller,
            subject_id = %subject_id,
            from_version,
            to_version = active.id(),
            "Rewrapped encrypted value"
        );

        Ok(Rewrapped {
            envelope,
            from_version,
            to_version: active.id(),
        })
    }

    /// Drops cached key versions and derived keys. Call after an
    /// out-of-band key rotation.
    pub fn reload(&self) {
        self.ring.invalidate();
    }

    /// Diagnostic view of the key ring.
    pub fn status(&self) -> KeyRingStatus {
        self.ring.status()
    }
}

fn open_with(snapshot: &KeySnapshot, version: &KeyVersion, text: &str) -> Result<String, CryptoError> {
    let key = snapshot.derived_key(version)?;
    envelope::open(text, &key)
}

/// Tries the active key version, then every other one in stored order.
fn recover(
    snapshot: &KeySnapshot,
    text: &str,
    caller: &str,
    subject_id: &str,
) -> Result<(Zeroizing<String>, u32), KeyringError> {
    let keys = snapshot.keys();
    let active_id = keys.active().id();
    let mut versions_tried = 0;

    for version in std::iter::once(keys.active()).chain(keys.others()) {
        versions_tried += 1;
        match open_with(snapshot, version, text) {
            Ok(plaintext) => {
                if version.id() != active_id {
                    info!(
                        caller = %caller,
                        subject_id = %subject_id,
                        key_version = version.id(),
                        active_key_version = active_id,
                        "Decrypted with a retired key version"
                    );
                }
                return Ok((Zeroizing::new(plaintext), version.id()));
            }
            Err(e) => {
                debug!(key_version = version.id(), error = %e, "Key version did not open envelope");
            }
        }
    }

    warn!(
        caller = %caller,
        subject_id = %subject_id,
        ciphertext_len = text.len(),
        versions_tried,
        "Orphaned encrypted value: no known key version decrypts it"
    );

    Err(KeyringError::Orphaned { versions_tried })
}

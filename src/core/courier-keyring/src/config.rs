//! Keyring configuration.

use std::time::Duration;

/// Default name of the secret holding the key version payload.
pub const DEFAULT_SECRET_NAME: &str = "courier-encryption-keys";

/// Default bound on each external source call.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for key resolution.
#[derive(Debug, Clone)]
pub struct KeyRingConfig {
    /// Name of the secret holding the key version payload.
    pub secret_name: String,
    /// Upper bound on each source call; a slower source is skipped.
    pub source_timeout: Duration,
}

impl Default for KeyRingConfig {
    fn default() -> Self {
        Self {
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }
}

impl KeyRingConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the secret name.
    pub fn with_secret_name(mut self, name: impl Into<String>) -> Self {
        self.secret_name = name.into();
        self
    }

    /// Sets the per-source timeout.
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }
}

//! Blind indexes for exact-match lookup of encrypted values.
//!
//! A blind index is `base64(HMAC-SHA256(salt, normalize(value)))`, stored in
//! an indexed column next to the envelope. It is deterministic and one-way,
//! so equality lookups work without the column ever holding plaintext or
//! anything decryptable.
//!
//! The HMAC key is the active key version's salt, never the derived cipher
//! key. Rotating the active version changes every token.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Normalizes a value before hashing: trimmed and lowercased.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Computes the blind index of `value` under `salt`.
///
/// `"User@Example.com "` and `"user@example.com"` produce the same token.
pub fn blind_index(value: &str, salt: &[u8]) -> Result<String, CryptoError> {
    if salt.is_empty() {
        return Err(CryptoError::InvalidKey("blind index salt is empty".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(salt)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(normalize(value).as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_rfc4231_case_2() {
        // Key "Jefe", data "what do ya want for nothing?" (already normalized).
        let token = blind_index("what do ya want for nothing?", b"Jefe").unwrap();
        assert_eq!(token, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_known_answer_for_email() {
        let salt: Vec<u8> = (0u8..16).collect();
        let token = blind_index("user@example.com", &salt).unwrap();
        assert_eq!(token, "SJ8fmEVvPbPQD6RVHPSRRX+o2Ed1vJuQZNgkwq4hBm8=");
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let salt = b"tenant-salt-0001";

        let a = blind_index("User@Example.com ", salt).unwrap();
        let b = blind_index("user@example.com", salt).unwrap();
        let c = blind_index("\tUSER@EXAMPLE.COM\n", salt).unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_different_values_differ() {
        let salt = b"tenant-salt-0001";

        let a = blind_index("alice@example.com", salt).unwrap();
        let b = blind_index("bob@example.com", salt).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_changes_token() {
        let a = blind_index("alice@example.com", b"salt-version-one").unwrap();
        let b = blind_index("alice@example.com", b"salt-version-two").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_token_does_not_contain_value() {
        let token = blind_index("alice@example.com", b"tenant-salt-0001").unwrap();
        assert!(!token.contains("alice"));
        assert_eq!(token.len(), 44);
    }

    #[test]
    fn test_empty_salt_rejected() {
        let result = blind_index("alice@example.com", b"");
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }
}

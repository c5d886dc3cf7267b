//! Field envelope codec.
//!
//! An envelope is the single string stored in place of a sensitive column:
//!
//! ```text
//! base64( nonce (12) || ciphertext || tag (16) )
//! ```
//!
//! Plaintext is encrypted as UTF-16 little-endian code units so that values
//! written by earlier deployments of the platform round-trip byte for byte.
//! Decoded envelopes are at least 28 bytes long, so the shortest envelope
//! string is 40 characters.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::Zeroizing;

use crate::aead::{self, MIN_SEALED_LEN};
use crate::error::CryptoError;
use crate::keys::FieldKey;

/// Length of the base64 encoding of the smallest envelope.
pub const MIN_ENVELOPE_LEN: usize = 40;

/// Encrypts `plaintext` into an envelope string.
///
/// A fresh nonce is drawn on every call, so sealing the same value twice
/// yields two different envelopes.
pub fn seal(plaintext: &str, key: &FieldKey) -> Result<String, CryptoError> {
    let encoded = encode_utf16le(plaintext);
    let sealed = aead::encrypt(key.as_bytes(), &encoded)?;
    Ok(BASE64.encode(sealed))
}

/// Decrypts and verifies an envelope string.
///
/// # Errors
///
/// * [`CryptoError::Format`] for invalid base64, a decoded payload shorter
///   than 28 bytes, or a verified plaintext that is not valid UTF-16LE
/// * [`CryptoError::Authentication`] if the tag does not verify
pub fn open(envelope: &str, key: &FieldKey) -> Result<String, CryptoError> {
    let sealed = BASE64
        .decode(envelope)
        .map_err(|e| CryptoError::Format(format!("invalid base64: {e}")))?;

    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::Format(format!(
            "decoded envelope is {} bytes, minimum is {}",
            sealed.len(),
            MIN_SEALED_LEN
        )));
    }

    let plaintext = aead::decrypt(key.as_bytes(), &sealed)?;
    decode_utf16le(&plaintext)
}

fn encode_utf16le(text: &str) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(text.len() * 2));
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn decode_utf16le(bytes: &[u8]) -> Result<String, CryptoError> {
    if bytes.len() % 2 != 0 {
        return Err(CryptoError::Format(
            "plaintext is not a whole number of UTF-16 code units".to_string(),
        ));
    }

    let units: Zeroizing<Vec<u16>> = Zeroizing::new(
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    );

    String::from_utf16(&units)
        .map_err(|_| CryptoError::Format("plaintext is not valid UTF-16".to_string()))
}

//! Envelope format sniffing.
//!
//! Encrypted and legacy plaintext values share the same columns. The sniffer
//! decides which is which from the shape of the string alone. It is a
//! heuristic: a plaintext that happens to be valid base64 of at least 40
//! characters is indistinguishable from an envelope.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::envelope::MIN_ENVELOPE_LEN;

/// Returns true if `text` looks like a field envelope.
///
/// All of the following must hold:
/// - length is a multiple of 4
/// - length is at least 40
/// - no whitespace
/// - decodes as standard base64
pub fn is_encrypted_format(text: &str) -> bool {
    if text.len() % 4 != 0 || text.len() < MIN_ENVELOPE_LEN {
        return false;
    }

    if text.chars().any(char::is_whitespace) {
        return false;
    }

    BASE64.decode(text).is_ok()
}

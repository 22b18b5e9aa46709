//! Index-safe primary keys derived from provenance identifiers.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{RagError, Result};

/// Characters of the seed content used when a raw id is empty.
const FALLBACK_PREFIX_CHARS: usize = 50;

/// Encode an arbitrary id as URL-safe base64 without padding.
///
/// The mapping is reversible, so distinct ids always give distinct keys.
pub fn encode(raw_id: &str) -> Result<String> {
    if raw_id.is_empty() {
        return Err(RagError::InvalidKey(String::new()));
    }
    Ok(URL_SAFE_NO_PAD.encode(raw_id.as_bytes()))
}

/// Encode `raw_id`, or a seed built from the content prefix and batch offset
/// when `raw_id` is empty.
pub fn encode_with_fallback(raw_id: &str, content: &str, offset: usize) -> Result<String> {
    if !raw_id.is_empty() {
        return encode(raw_id);
    }
    let prefix: String = content.chars().take(FALLBACK_PREFIX_CHARS).collect();
    encode(&format!("{prefix}{offset}"))
}

/// Whether `key` is non-empty and uses only letters, digits, `-` and `_`.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Recover the raw id from a key produced by [`encode`].
pub fn decode(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

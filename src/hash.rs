//! Content fingerprinting for document identity.
//!
//! The digest is SHA-256 over the UTF-8 bytes of the trimmed text, encoded
//! as URL-safe base64 without padding (43 characters). It is stable across
//! runs and platforms, which is what makes hash-derived document ids
//! idempotent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Number of hash characters used in a derived document id.
const DOC_ID_HASH_CHARS: usize = 16;

/// Compute the content hash of already-trimmed text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Derive a document id from a content hash: `doc_` + first 16 characters.
pub fn derive_doc_id(hash: &str) -> String {
    let prefix: String = hash.chars().take(DOC_ID_HASH_CHARS).collect();
    format!("doc_{}", prefix)
}

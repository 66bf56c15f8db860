use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a document's raw bytes. Used as the `cheap hash`
/// fallback when a connector has no server-side checksum, and as the stored
/// `content_hash` compared across re-syncs to short-circuit unchanged documents.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of chunk text, used to detect which segments within an
/// otherwise-changed document are themselves unchanged (the diff engine,
/// §4.9, only re-embeds segments whose hash differs from the stored one).
pub fn hash_chunk(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

//! Content-addressed store: a session-lifetime map from `sha256:<hex>`
//! keys to immutable byte blobs.
//!
//! The store is shared between the asset-exchange engine (the only writer)
//! and the viewer (a reader resolving manifest chunks), so it carries its
//! own interior lock and is handed around as `Arc<Cas>`. Insertion is
//! idempotent and unverified: the producer computes the key once at ingest
//! via [`Cas::hash_of`], and re-putting an existing key is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Prefix every content key carries.
pub const HASH_PREFIX: &str = "sha256:";

/// A sha-256-keyed blob map. No eviction; entries live for the session.
#[derive(Default)]
pub struct Cas {
    entries: RwLock<BTreeMap<String, Arc<[u8]>>>,
}

impl Cas {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the content key for a blob: `"sha256:" + hex(sha256(bytes))`.
    #[must_use]
    pub fn hash_of(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        format!("{HASH_PREFIX}{}", hex::encode(digest))
    }

    /// Idempotent insert. The caller guarantees `hash` matches the payload;
    /// the store performs no verification. A second write to the same key
    /// leaves the first value in place.
    pub fn put(&self, hash: &str, bytes: &[u8]) {
        let mut entries = self.entries.write();
        entries
            .entry(hash.to_owned())
            .or_insert_with(|| Arc::from(bytes));
    }

    /// Membership test.
    #[must_use]
    pub fn has(&self, hash: &str) -> bool {
        self.entries.read().contains_key(hash)
    }

    /// Retrieves a blob by key. The returned `Arc` shares storage with the
    /// store; no copy is made.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<Arc<[u8]>> {
        self.entries.read().get(hash).cloned()
    }

    /// Hashes a blob, stores it, and returns its key. The producer-side
    /// ingest path.
    pub fn ingest(&self, bytes: &[u8]) -> String {
        let hash = Self::hash_of(bytes);
        self.put(&hash, bytes);
        hash
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for Cas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cas").field("len", &self.len()).finish()
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_matches_sha256_hex() {
        // sha256("") is the well-known empty digest.
        assert_eq!(
            Cas::hash_of(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            Cas::hash_of(b"abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn put_then_get_roundtrips() {
        let cas = Cas::new();
        let hash = Cas::hash_of(b"payload");
        assert!(!cas.has(&hash));
        cas.put(&hash, b"payload");
        assert!(cas.has(&hash));
        assert_eq!(cas.get(&hash).unwrap().as_ref(), b"payload");
    }

    #[test]
    fn put_is_idempotent() {
        let cas = Cas::new();
        cas.put("sha256:key", b"first");
        cas.put("sha256:key", b"second");
        assert_eq!(cas.len(), 1);
        // First write wins; equivalent to a single write.
        assert_eq!(cas.get("sha256:key").unwrap().as_ref(), b"first");
    }

    #[test]
    fn ingest_stores_under_computed_key() {
        let cas = Cas::new();
        let hash = cas.ingest(b"sprite sheet bytes");
        assert_eq!(hash, Cas::hash_of(b"sprite sheet bytes"));
        assert!(cas.has(&hash));
    }

    #[test]
    fn get_missing_is_none() {
        let cas = Cas::new();
        assert!(cas.get("sha256:absent").is_none());
    }
}

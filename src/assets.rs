//! Asset bundle descriptions: manifests, chunk records, and the sprite
//! atlas payload.
//!
//! A [`Manifest`] enumerates the content-addressed chunks of one bundle.
//! It travels as UTF-8 JSON inside a wire frame, so the types here derive
//! serde with field names matching the wire schema exactly (`type` for the
//! bundle kind, camelCase atlas fields).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cas::{Cas, HASH_PREFIX};

/// Meta key naming the atlas chunk of a sprite bundle.
pub const META_ATLAS: &str = "atlas";

/// What kind of bundle a manifest describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    /// A mesh bundle (the default when the field is absent).
    #[default]
    Mesh,
    /// A sprite bundle; requires `meta.atlas` to name a chunk.
    Sprite,
}

/// One content-addressed chunk of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Content key, formatted `sha256:<64 hex chars>`.
    pub hash: String,
    /// Payload length in bytes.
    pub size: u64,
    /// MIME type of the payload.
    pub mime: String,
}

/// A typed description of an asset bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Bundle identifier, chosen by the sender.
    pub id: String,
    /// Bundle kind; defaults to mesh when absent from the JSON.
    #[serde(rename = "type", default)]
    pub kind: BundleKind,
    /// The entry chunk's hash (the main payload the viewer loads first).
    pub entry: String,
    /// Every chunk in the bundle.
    pub chunks: Vec<ChunkEntry>,
    /// Free-form string metadata. Sprites store the atlas chunk hash
    /// under [`META_ATLAS`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// Why a manifest failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ManifestError {
    /// A chunk hash is not `sha256:` plus 64 hex characters.
    MalformedHash {
        /// The offending hash string.
        hash: String,
    },
    /// A sprite manifest has no `meta.atlas` entry.
    MissingAtlasMeta,
    /// `meta.atlas` names a hash that is not in the chunk list.
    AtlasNotListed {
        /// The atlas hash from `meta`.
        hash: String,
    },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHash { hash } => write!(f, "malformed chunk hash {hash:?}"),
            Self::MissingAtlasMeta => write!(f, "sprite manifest missing meta.atlas"),
            Self::AtlasNotListed { hash } => {
                write!(f, "meta.atlas {hash:?} does not name a listed chunk")
            }
        }
    }
}

impl std::error::Error for ManifestError {}

impl Manifest {
    /// Checks the structural invariants: every hash is well-formed, and a
    /// sprite's `meta.atlas` names one of the listed chunks.
    ///
    /// Size mismatches are not checked here; sizes describe payloads this
    /// peer may not hold yet.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for chunk in &self.chunks {
            if !is_well_formed_hash(&chunk.hash) {
                return Err(ManifestError::MalformedHash {
                    hash: chunk.hash.clone(),
                });
            }
        }
        if self.kind == BundleKind::Sprite {
            let atlas = self
                .meta
                .get(META_ATLAS)
                .ok_or(ManifestError::MissingAtlasMeta)?;
            if !self.chunks.iter().any(|c| &c.hash == atlas) {
                return Err(ManifestError::AtlasNotListed {
                    hash: atlas.clone(),
                });
            }
        }
        Ok(())
    }

    /// The chunk hashes not yet present in `cas`, in manifest order.
    #[must_use]
    pub fn missing_from(&self, cas: &Cas) -> Vec<String> {
        self.chunks
            .iter()
            .filter(|c| !cas.has(&c.hash))
            .map(|c| c.hash.clone())
            .collect()
    }

    /// Whether the bundle is fully assembled: every chunk is in `cas`,
    /// and for sprites the atlas chunk as well.
    #[must_use]
    pub fn is_assembled(&self, cas: &Cas) -> bool {
        if !self.chunks.iter().all(|c| cas.has(&c.hash)) {
            return false;
        }
        match self.kind {
            BundleKind::Mesh => true,
            BundleKind::Sprite => self
                .meta
                .get(META_ATLAS)
                .is_some_and(|atlas| cas.has(atlas)),
        }
    }
}

fn is_well_formed_hash(hash: &str) -> bool {
    hash.strip_prefix(HASH_PREFIX)
        .is_some_and(|hex_part| hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Builds a manifest from raw payloads, ingesting each into the store.
///
/// The producer path behind the operator's "send asset" control: every
/// `(bytes, mime)` pair becomes one chunk keyed by its content hash. The
/// first part is the entry chunk. For sprites, `atlas_index` selects which
/// part is recorded under `meta.atlas`.
pub fn build_bundle(
    cas: &Cas,
    id: &str,
    kind: BundleKind,
    parts: &[(&[u8], &str)],
    atlas_index: Option<usize>,
) -> Manifest {
    let mut chunks = Vec::with_capacity(parts.len());
    for (bytes, mime) in parts {
        let hash = cas.ingest(bytes);
        chunks.push(ChunkEntry {
            hash,
            size: bytes.len() as u64,
            mime: (*mime).to_owned(),
        });
    }
    let entry = chunks.first().map(|c| c.hash.clone()).unwrap_or_default();
    let mut meta = BTreeMap::new();
    if let Some(index) = atlas_index {
        if let Some(chunk) = chunks.get(index) {
            meta.insert(META_ATLAS.to_owned(), chunk.hash.clone());
        }
    }
    Manifest {
        id: id.to_owned(),
        kind,
        entry,
        chunks,
        meta,
    }
}

/// One animation strip inside a sprite atlas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtlasAnim {
    /// First cell index, inclusive.
    pub from: u32,
    /// Last cell index, inclusive.
    pub to: u32,
    /// Playback rate in cells per second.
    pub fps: u32,
    /// Whether playback loops.
    #[serde(rename = "loop")]
    pub looped: bool,
}

/// The decoded sprite-atlas JSON: cell geometry plus named animations.
/// This is viewer-facing data; the simulation only ever sees animation
/// name hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasSpec {
    /// Cell width in pixels.
    pub cell_width: u32,
    /// Cell height in pixels.
    pub cell_height: u32,
    /// Animations by name.
    pub anims: BTreeMap<String, AtlasAnim>,
}

impl AtlasSpec {
    /// Decodes the atlas JSON payload of an atlas chunk.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
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

    fn hash_of(n: u8) -> String {
        Cas::hash_of(&[n])
    }

    fn sprite_manifest() -> Manifest {
        let atlas = hash_of(2);
        Manifest {
            id: "ryu".to_owned(),
            kind: BundleKind::Sprite,
            entry: hash_of(1),
            chunks: vec![
                ChunkEntry {
                    hash: hash_of(1),
                    size: 1,
                    mime: "image/png".to_owned(),
                },
                ChunkEntry {
                    hash: atlas.clone(),
                    size: 1,
                    mime: "application/json".to_owned(),
                },
            ],
            meta: BTreeMap::from([(META_ATLAS.to_owned(), atlas)]),
        }
    }

    #[test]
    fn kind_defaults_to_mesh_in_json() {
        let json = r#"{"id":"a","entry":"sha256:00","chunks":[]}"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.kind, BundleKind::Mesh);
        assert!(manifest.meta.is_empty());
    }

    #[test]
    fn kind_serializes_as_type_field() {
        let manifest = sprite_manifest();
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains(r#""type":"sprite""#));
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn validate_accepts_a_good_sprite() {
        assert_eq!(sprite_manifest().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_malformed_hashes() {
        let mut manifest = sprite_manifest();
        manifest.chunks[0].hash = "sha256:not-hex".to_owned();
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::MalformedHash { .. })
        ));
    }

    #[test]
    fn validate_rejects_sprite_without_atlas_meta() {
        let mut manifest = sprite_manifest();
        manifest.meta.clear();
        assert_eq!(manifest.validate(), Err(ManifestError::MissingAtlasMeta));
    }

    #[test]
    fn validate_rejects_unlisted_atlas() {
        let mut manifest = sprite_manifest();
        manifest
            .meta
            .insert(META_ATLAS.to_owned(), hash_of(99));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::AtlasNotListed { .. })
        ));
    }

    #[test]
    fn missing_from_tracks_cas_contents() {
        let cas = Cas::new();
        let manifest = sprite_manifest();
        assert_eq!(manifest.missing_from(&cas).len(), 2);
        cas.put(&manifest.chunks[0].hash, &[1]);
        assert_eq!(manifest.missing_from(&cas), vec![manifest.chunks[1].hash.clone()]);
        cas.put(&manifest.chunks[1].hash, &[2]);
        assert!(manifest.missing_from(&cas).is_empty());
        assert!(manifest.is_assembled(&cas));
    }

    #[test]
    fn sprite_assembly_requires_the_atlas_chunk() {
        let cas = Cas::new();
        let mut manifest = sprite_manifest();
        cas.put(&manifest.chunks[0].hash, &[1]);
        cas.put(&manifest.chunks[1].hash, &[2]);
        assert!(manifest.is_assembled(&cas));
        // An atlas meta pointing at an absent hash blocks assembly even
        // with every listed chunk present.
        manifest
            .meta
            .insert(META_ATLAS.to_owned(), hash_of(50));
        assert!(!manifest.is_assembled(&cas));
    }

    #[test]
    fn build_bundle_ingests_and_links() {
        let cas = Cas::new();
        let manifest = build_bundle(
            &cas,
            "ken",
            BundleKind::Sprite,
            &[(b"sheet", "image/png"), (b"{}", "application/json")],
            Some(1),
        );
        assert_eq!(manifest.chunks.len(), 2);
        assert_eq!(manifest.entry, manifest.chunks[0].hash);
        assert_eq!(manifest.meta[META_ATLAS], manifest.chunks[1].hash);
        assert_eq!(manifest.chunks[0].size, 5);
        assert!(manifest.is_assembled(&cas));
        assert_eq!(manifest.validate(), Ok(()));
    }

    #[test]
    fn atlas_spec_decodes_the_wire_schema() {
        let json = br#"{
            "cellWidth": 64,
            "cellHeight": 64,
            "anims": {
                "walk": {"from": 0, "to": 5, "fps": 12, "loop": true},
                "hit":  {"from": 6, "to": 8, "fps": 24, "loop": false}
            }
        }"#;
        let atlas = AtlasSpec::from_bytes(json).unwrap();
        assert_eq!(atlas.cell_width, 64);
        assert_eq!(atlas.anims["walk"].to, 5);
        assert!(atlas.anims["walk"].looped);
        assert!(!atlas.anims["hit"].looped);
    }
}

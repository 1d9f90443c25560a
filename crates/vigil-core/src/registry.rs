//! Known-identity registry.
//!
//! Built once at startup from a directory of reference photos: the filename
//! stem becomes the identity name. Each photo is decoded, face-detected and
//! encoded into a signature; matching is first-match-wins over the entries
//! in name order with a fixed verification threshold.

use crate::detector::FaceDetector;
use crate::encoder::SignatureEncoder;
use crate::types::Signature;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PHOTO_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot read photo directory {dir}: {source}")]
    UnreadableDir {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// One registered household member, backed by a single reference photo.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    pub name: String,
    pub photo_path: PathBuf,
    pub signature: Signature,
}

/// Immutable registry of known identities.
pub struct IdentityRegistry {
    entries: Vec<KnownIdentity>,
    threshold: f32,
}

impl IdentityRegistry {
    /// Build a registry from pre-computed entries. Entries keep the given
    /// order; names are expected to be unique.
    pub fn from_entries(entries: Vec<KnownIdentity>, threshold: f32) -> Self {
        Self { entries, threshold }
    }

    /// Scan a photo directory and encode one signature per photo.
    ///
    /// Non-photo files are ignored. Photos that fail to decode, contain no
    /// detectable face, or fail encoding are logged and skipped — a degraded
    /// registry is preferable to refusing to start.
    pub fn load(
        dir: &Path,
        detector: &mut FaceDetector,
        encoder: &mut SignatureEncoder,
        threshold: f32,
    ) -> Result<Self, RegistryError> {
        let read = std::fs::read_dir(dir).map_err(|source| RegistryError::UnreadableDir {
            dir: dir.to_path_buf(),
            source,
        })?;

        let mut photos: Vec<(String, PathBuf)> = read
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_photo(path))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                Some((stem, path))
            })
            .collect();

        // Deterministic iteration order; directory listing order is not.
        photos.sort_by(|a, b| a.0.cmp(&b.0));
        photos.dedup_by(|a, b| a.0 == b.0);

        let mut entries = Vec::with_capacity(photos.len());
        for (name, path) in photos {
            match encode_photo(&path, detector, encoder) {
                Ok(signature) => {
                    tracing::info!(name = %name, path = %path.display(), "registered identity");
                    entries.push(KnownIdentity {
                        name,
                        photo_path: path,
                        signature,
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        name = %name,
                        path = %path.display(),
                        reason = %reason,
                        "skipping reference photo"
                    );
                }
            }
        }

        if entries.is_empty() {
            tracing::warn!(dir = %dir.display(), "identity registry is empty; every face will be unrecognized");
        }

        Ok(Self { entries, threshold })
    }

    /// Match a probe signature against the registry.
    ///
    /// One-to-one comparison per entry in registry order; the first entry
    /// whose similarity reaches the threshold wins and the search stops.
    pub fn match_signature(&self, probe: &Signature) -> Option<&str> {
        for entry in &self.entries {
            let similarity = probe.similarity(&entry.signature);
            if similarity >= self.threshold {
                tracing::debug!(name = %entry.name, similarity, "identity verified");
                return Some(&entry.name);
            }
        }
        None
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            PHOTO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decode a reference photo and produce the signature of its best face.
fn encode_photo(
    path: &Path,
    detector: &mut FaceDetector,
    encoder: &mut SignatureEncoder,
) -> Result<Signature, String> {
    let gray = image::open(path)
        .map_err(|e| format!("decode failed: {e}"))?
        .to_luma8();
    let (width, height) = (gray.width(), gray.height());
    let pixels = gray.into_raw();

    let faces = detector
        .detect(&pixels, width, height)
        .map_err(|e| format!("detection failed: {e}"))?;
    let face = faces
        .first()
        .ok_or_else(|| "no face detected in photo".to_string())?;

    encoder
        .extract(&pixels, width, height, face)
        .map_err(|e| format!("encoding failed: {e}"))
}

//! Build cache: (parent image, instruction fingerprint) → image.
//!
//! Entries are small JSON files keyed by a digest of the composite key.
//! A lookup miss is the distinguishable `CacheMiss` error so the engine
//! falls through to building; entries are best-effort and never locked.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    parent: Option<Digest>,
    fingerprint: String,
    image: Digest,
}

/// Persistent instruction cache.
#[derive(Debug, Clone)]
pub struct BuildCache {
    dir: PathBuf,
}

impl BuildCache {
    pub fn new(dir: &Path) -> Result<Self> {
        skiff_core::config::ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Look up the image built for `fingerprint` on top of `parent`.
    pub fn get(&self, parent: Option<&Digest>, fingerprint: &str) -> Result<Digest> {
        let path = self.entry_path(parent, fingerprint);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SkiffError::CacheMiss(fingerprint.to_string()))
            }
            Err(e) => {
                return Err(SkiffError::Other(format!(
                    "read cache entry {}: {e}",
                    path.display()
                )))
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            // A mangled entry is equivalent to no entry.
            Err(_) => return Err(SkiffError::CacheMiss(fingerprint.to_string())),
        };
        Ok(entry.image)
    }

    /// Record the image built for `fingerprint` on top of `parent`.
    pub fn put(&self, parent: Option<&Digest>, fingerprint: &str, image: &Digest) -> Result<()> {
        let entry = CacheEntry {
            parent: parent.cloned(),
            fingerprint: fingerprint.to_string(),
            image: image.clone(),
        };
        let path = self.entry_path(parent, fingerprint);
        let data = serde_json::to_vec_pretty(&entry)?;
        std::fs::write(&path, data).map_err(|e| {
            SkiffError::Other(format!("write cache entry {}: {e}", path.display()))
        })?;
        tracing::debug!(fingerprint, image = %image, "cached build step");
        Ok(())
    }

    fn entry_path(&self, parent: Option<&Digest>, fingerprint: &str) -> PathBuf {
        let mut key = Vec::new();
        if let Some(parent) = parent {
            key.extend_from_slice(parent.to_string().as_bytes());
        }
        key.push(0);
        key.extend_from_slice(fingerprint.as_bytes());
        self.dir
            .join(format!("{}.json", Digest::sha256_of(&key).hex()))
    }
}

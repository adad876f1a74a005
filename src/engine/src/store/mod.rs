//! Store wiring.
//!
//! One store directory holds everything:
//!
//! ```text
//! <storeDir>/
//!   blobs/<algo>/<hex>        blobs
//!   .fsspec/<algo>/<hex>      fs-spec blobs
//!   image-repos/<repo>/<tag>  manifest digest pointers
//!   image-ids/<algo>/<hex>    image-by-id index
//!   .rofs-cache/<id>/rootfs   materialised rootfs cache
//!   .build-cache/             build cache entries
//!   .temp/                    atomic-write staging
//!   bundles/<id>/             runtime bundles
//! ```

pub mod blob;
pub mod fsspec;

use std::path::Path;

use skiff_core::error::{Context, Result, SkiffError};

use crate::build::BuildCache;
use crate::bundle::BundleStore;
use crate::image::ImageStore;

/// The top-level store handle: image and bundle stores plus the build
/// cache, sharing one directory.
#[derive(Debug, Clone)]
pub struct Store {
    images: ImageStore,
    bundles: BundleStore,
    build_cache: BuildCache,
}

impl Store {
    /// Open (creating if necessary) the store at `dir`.
    pub fn open(dir: &Path, rootless: bool) -> Result<Self> {
        let result = (|| {
            if dir.as_os_str().is_empty() {
                return Err(SkiffError::InvalidInput(
                    "no store directory provided".to_string(),
                ));
            }
            let dir = std::path::absolute(dir)
                .map_err(|e| SkiffError::Other(format!("resolve store dir: {e}")))?;
            Ok(Self {
                images: ImageStore::new(&dir, rootless)?,
                bundles: BundleStore::new(&dir.join("bundles"))?,
                build_cache: BuildCache::new(&dir.join(".build-cache"))?,
            })
        })();
        result.context("init store")
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn bundles(&self) -> &BundleStore {
        &self.bundles
    }

    pub fn build_cache(&self) -> &BuildCache {
        &self.build_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let _store = Store::open(&store_dir, true).unwrap();

        for sub in [
            "blobs",
            ".fsspec",
            "image-repos",
            "image-ids",
            ".rofs-cache",
            ".build-cache",
            ".temp",
            "bundles",
        ] {
            assert!(store_dir.join(sub).is_dir(), "{sub} missing");
        }
    }

    #[test]
    fn test_open_empty_dir_fails() {
        let err = Store::open(Path::new(""), true).unwrap_err();
        assert!(matches!(err, SkiffError::InvalidInput(_)));
    }

    #[test]
    fn test_reopen_existing_store() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        drop(Store::open(&store_dir, true).unwrap());
        let _reopened = Store::open(&store_dir, true).unwrap();
    }
}

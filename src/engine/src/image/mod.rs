//! Images: manifest, config and name resolution.

mod store;

pub use store::{ImageStore, LockedImageStore, TaggedImage};

use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;
use crate::oci::{ImageConfig, ImageManifest};

/// Manifest annotation carrying the fs-spec digest of the image's
/// flattened rootfs, so layer commits diff without re-walking parents.
pub const ANNOTATION_FSSPEC: &str = "org.skiff.image.fsspec";

/// A loaded image: manifest digest, manifest and configuration.
#[derive(Debug, Clone)]
pub struct Image {
    id: Digest,
    manifest: ImageManifest,
    config: ImageConfig,
}

impl Image {
    pub fn new(id: Digest, manifest: ImageManifest, config: ImageConfig) -> Self {
        Self {
            id,
            manifest,
            config,
        }
    }

    /// The image id: its manifest digest.
    pub fn id(&self) -> &Digest {
        &self.id
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Total size of the referenced blobs.
    pub fn size(&self) -> u64 {
        self.manifest.config.size
            + self
                .manifest
                .layers
                .iter()
                .map(|l| l.size)
                .sum::<u64>()
    }

    /// The fs-spec digest recorded for this image's rootfs, if any.
    pub fn fsspec_digest(&self) -> Option<Digest> {
        self.manifest
            .annotations
            .get(ANNOTATION_FSSPEC)
            .and_then(|v| Digest::parse(v).ok())
    }
}

/// A `name:tag` image name. The tag defaults to `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub repo: String,
    pub tag: String,
}

impl ImageName {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SkiffError::InvalidInput("empty image name".to_string()));
        }
        // The tag separator is the last ':' after the last '/', so
        // registry ports stay part of the repo.
        let split_at = match name.rfind('/') {
            Some(slash) => name[slash..].rfind(':').map(|i| slash + i),
            None => name.rfind(':'),
        };
        let (repo, tag) = match split_at {
            Some(i) => (&name[..i], &name[i + 1..]),
            None => (name, "latest"),
        };
        if repo.is_empty() || tag.is_empty() {
            return Err(SkiffError::InvalidInput(format!(
                "malformed image name {name:?}"
            )));
        }
        if repo.contains("..") {
            return Err(SkiffError::InvalidInput(format!(
                "image repo must not contain '..': {repo:?}"
            )));
        }
        Ok(Self {
            repo: repo.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repo, self.tag)
    }
}

/// External transport adapter: fetches an image from elsewhere into the
/// locked store. Registry clients are out of scope; tests and embedders
/// provide implementations.
pub trait ImageImporter {
    fn import(&self, store: &LockedImageStore, reference: &str) -> Result<Image>;
}

/// Importer used when no transport is configured.
pub struct NoImporter;

impl ImageImporter for NoImporter {
    fn import(&self, _store: &LockedImageStore, reference: &str) -> Result<Image> {
        Err(SkiffError::NotFound(format!(
            "image {reference} is not in the local store and no import transport is configured"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name_defaults_to_latest() {
        let name = ImageName::parse("alpine").unwrap();
        assert_eq!(name.repo, "alpine");
        assert_eq!(name.tag, "latest");
        assert_eq!(name.to_string(), "alpine:latest");
    }

    #[test]
    fn test_image_name_with_tag() {
        let name = ImageName::parse("alpine:3.7").unwrap();
        assert_eq!(name.repo, "alpine");
        assert_eq!(name.tag, "3.7");
    }

    #[test]
    fn test_image_name_with_registry_port() {
        let name = ImageName::parse("localhost:5000/team/app:v2").unwrap();
        assert_eq!(name.repo, "localhost:5000/team/app");
        assert_eq!(name.tag, "v2");
    }

    #[test]
    fn test_image_name_rejects_garbage() {
        assert!(ImageName::parse("").is_err());
        assert!(ImageName::parse(":tag").is_err());
        assert!(ImageName::parse("repo:").is_err());
        assert!(ImageName::parse("../escape:x").is_err());
    }
}

//! Bundle creation, lookup and garbage collection.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use skiff_core::error::{Context, Result, SkiffError};

use crate::image::{Image, ImageStore};
use crate::store::fsspec::FsSpec;

use super::{Bundle, LockedBundle, SpecBuilder};

/// Creates, locates and garbage-collects bundles under one directory.
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
}

impl BundleStore {
    pub fn new(dir: &Path) -> Result<Self> {
        skiff_core::config::ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Create a bundle, optionally materialising `image` into its
    /// rootfs, and write the runtime spec produced by `builder`.
    ///
    /// The returned handle holds the bundle's exclusive lock. A caller
    /// supplied id that already exists fails with `AlreadyExists`.
    pub fn create(
        &self,
        id: Option<&str>,
        image: Option<&Image>,
        images: &ImageStore,
        builder: &mut SpecBuilder,
    ) -> Result<LockedBundle> {
        let id = match id {
            Some(id) => validate_id(id)?.to_string(),
            None => generate_id(),
        };
        let dir = self.dir.join(&id);
        if dir.exists() {
            return Err(SkiffError::AlreadyExists(format!("bundle {id}")));
        }
        skiff_core::config::ensure_dir(&dir)?;

        let locked = Bundle::open(id.clone(), dir.clone()).try_lock()?;
        let result = self.populate(&locked, image, images, builder);
        if let Err(e) = result {
            drop(locked);
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e.context(&format!("create bundle {id}")));
        }

        tracing::info!(bundle = %id, "created bundle");
        Ok(locked)
    }

    fn populate(
        &self,
        bundle: &LockedBundle,
        image: Option<&Image>,
        images: &ImageStore,
        builder: &mut SpecBuilder,
    ) -> Result<()> {
        let rootfs = bundle.rootfs();
        skiff_core::config::ensure_dir(&rootfs)?;

        match image {
            Some(image) => {
                let cached = images.materialize_rootfs(image)?;
                copy_tree(&cached, &rootfs).context("copy rootfs")?;
                let spec = images.image_fsspec(image)?;
                bundle.set_parent(image.id(), &images.fsspecs().put(&spec)?)?;
            }
            None => {
                bundle.set_fsspec(&images.fsspecs().put(&FsSpec::empty())?)?;
            }
        }

        let spec = builder.build(&rootfs)?;
        bundle.set_spec(&spec)
    }

    /// Look up a bundle by id.
    pub fn bundle(&self, id: &str) -> Result<Bundle> {
        let id = validate_id(id)?;
        let dir = self.dir.join(id);
        if !dir.is_dir() {
            return Err(SkiffError::NotFound(format!("bundle {id}")));
        }
        Ok(Bundle::open(id.to_string(), dir))
    }

    /// All bundles, sorted by id.
    pub fn bundles(&self) -> Result<Vec<Bundle>> {
        let mut bundles = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(bundles),
            Err(e) => {
                return Err(SkiffError::Other(format!(
                    "read bundle dir {}: {e}",
                    self.dir.display()
                )))
            }
        };
        for entry in entries {
            let entry =
                entry.map_err(|e| SkiffError::Other(format!("read bundle dir entry: {e}")))?;
            if entry.path().is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                bundles.push(Bundle::open(id, entry.path()));
            }
        }
        bundles.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(bundles)
    }

    /// Delete bundles created before `before` that are not locked.
    ///
    /// Returns the ids of the collected bundles.
    pub fn gc(&self, before: SystemTime) -> Result<Vec<String>> {
        let mut collected = Vec::new();
        for bundle in self.bundles()? {
            let created = match bundle.created() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if created >= before {
                continue;
            }
            let id = bundle.id().to_string();
            match bundle.try_lock() {
                Ok(locked) => {
                    locked.delete()?;
                    tracing::info!(bundle = %id, "collected bundle");
                    collected.push(id);
                }
                Err(SkiffError::Locked(_)) => {
                    tracing::debug!(bundle = %id, "skipping locked bundle");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(collected)
    }
}

fn validate_id(id: &str) -> Result<&str> {
    if id.is_empty()
        || !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(SkiffError::InvalidInput(format!("invalid bundle id {id:?}")));
    }
    Ok(id)
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Copy a materialised rootfs into a bundle.
///
/// Modes are preserved; ownership follows the caller (the cache was
/// unpacked through the same id mapping). Hardlinks are re-linked when
/// both sides live in the copied tree, otherwise degraded to copies.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut inodes: std::collections::HashMap<(u64, u64), PathBuf> =
        std::collections::HashMap::new();
    copy_tree_inner(src, dst, &mut inodes)
}

fn copy_tree_inner(
    src: &Path,
    dst: &Path,
    inodes: &mut std::collections::HashMap<(u64, u64), PathBuf>,
) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    std::fs::create_dir_all(dst)
        .map_err(|e| SkiffError::Other(format!("create {}: {e}", dst.display())))?;
    let src_meta = std::fs::metadata(src)
        .map_err(|e| SkiffError::Other(format!("stat {}: {e}", src.display())))?;
    std::fs::set_permissions(dst, src_meta.permissions())
        .map_err(|e| SkiffError::Other(format!("chmod {}: {e}", dst.display())))?;

    for entry in std::fs::read_dir(src)
        .map_err(|e| SkiffError::Other(format!("read dir {}: {e}", src.display())))?
    {
        let entry = entry.map_err(|e| SkiffError::Other(format!("read dir entry: {e}")))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&src_path)
            .map_err(|e| SkiffError::Other(format!("stat {}: {e}", src_path.display())))?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            copy_tree_inner(&src_path, &dst_path, inodes)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&src_path)
                .map_err(|e| SkiffError::Other(format!("readlink {}: {e}", src_path.display())))?;
            std::os::unix::fs::symlink(&target, &dst_path).map_err(|e| {
                SkiffError::Other(format!("symlink {}: {e}", dst_path.display()))
            })?;
        } else if file_type.is_file() {
            let key = (meta.dev(), meta.ino());
            if meta.nlink() > 1 {
                if let Some(first) = inodes.get(&key) {
                    std::fs::hard_link(first, &dst_path).map_err(|e| {
                        SkiffError::Other(format!("hardlink {}: {e}", dst_path.display()))
                    })?;
                    continue;
                }
                inodes.insert(key, dst_path.clone());
            }
            std::fs::copy(&src_path, &dst_path).map_err(|e| {
                SkiffError::Other(format!(
                    "copy {} to {}: {e}",
                    src_path.display(),
                    dst_path.display()
                ))
            })?;
        }
        // Devices and fifos in the cache are placeholders; skipped.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageStore;
    use skiff_core::idmap::IdMap;
    use tempfile::TempDir;

    fn stores(tmp: &TempDir) -> (ImageStore, BundleStore) {
        let images = ImageStore::new(tmp.path(), true).unwrap();
        let bundles = BundleStore::new(&tmp.path().join("bundles")).unwrap();
        (images, bundles)
    }

    fn base_image(images: &ImageStore) -> Image {
        let rootfs = TempDir::new().unwrap();
        std::fs::create_dir_all(rootfs.path().join("bin")).unwrap();
        std::fs::write(rootfs.path().join("bin/sh"), "#!x\n").unwrap();
        let locked = images.open_locked().unwrap();
        let (image, _) = locked
            .add_image_layer(rootfs.path(), None, &FsSpec::empty(), None, "base")
            .unwrap();
        image
    }

    #[test]
    fn test_create_bundle_from_image() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);
        let image = base_image(&images);

        let mut builder = SpecBuilder::new();
        builder.apply_image(image.config());
        builder.to_rootless();
        let locked = bundles
            .create(Some("test-bundle"), Some(&image), &images, &mut builder)
            .unwrap();

        assert_eq!(locked.id(), "test-bundle");
        assert!(locked.rootfs().join("bin/sh").is_file());
        assert!(locked.dir().join("config.json").is_file());
        assert_eq!(locked.parent_image().unwrap().as_ref(), Some(image.id()));

        // Snapshot matches the materialised rootfs.
        let snapshot = images.fsspecs().get(&locked.fsspec_digest().unwrap()).unwrap();
        let scanned = FsSpec::scan(&locked.rootfs(), &IdMap::rootless()).unwrap();
        assert_eq!(snapshot.digest(), scanned.digest());
    }

    #[test]
    fn test_create_empty_bundle() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let locked = bundles.create(None, None, &images, &mut builder).unwrap();

        assert!(locked.rootfs().is_dir());
        assert_eq!(locked.parent_image().unwrap(), None);
        let snapshot = images.fsspecs().get(&locked.fsspec_digest().unwrap()).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let first = bundles
            .create(Some("dup"), None, &images, &mut builder)
            .unwrap();
        drop(first);

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let err = bundles
            .create(Some("dup"), None, &images, &mut builder)
            .unwrap_err();
        assert!(matches!(err, SkiffError::AlreadyExists(_)));
    }

    #[test]
    fn test_bundle_lookup_and_listing() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let created = bundles
            .create(Some("findme"), None, &images, &mut builder)
            .unwrap();
        drop(created);

        assert_eq!(bundles.bundle("findme").unwrap().id(), "findme");
        assert!(bundles.bundle("missing").unwrap_err().is_not_found());
        assert_eq!(bundles.bundles().unwrap().len(), 1);
    }

    #[test]
    fn test_gc_skips_locked_and_fresh_bundles() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let held = bundles
            .create(Some("held"), None, &images, &mut builder)
            .unwrap();

        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let idle = bundles
            .create(Some("idle"), None, &images, &mut builder)
            .unwrap();
        drop(idle);

        // Everything is newer than the epoch; nothing is collected.
        let collected = bundles.gc(SystemTime::UNIX_EPOCH).unwrap();
        assert!(collected.is_empty());

        // With a future cutoff the idle bundle goes, the held one stays.
        let future = SystemTime::now() + std::time::Duration::from_secs(3600);
        let collected = bundles.gc(future).unwrap();
        assert_eq!(collected, vec!["idle".to_string()]);
        assert!(bundles.bundle("held").is_ok());
        drop(held);
    }

    #[test]
    fn test_invalid_bundle_id_rejected() {
        let tmp = TempDir::new().unwrap();
        let (images, bundles) = stores(&tmp);
        let mut builder = SpecBuilder::new();
        let err = bundles
            .create(Some("../escape"), None, &images, &mut builder)
            .unwrap_err();
        assert!(matches!(err, SkiffError::InvalidInput(_)));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 12);
    }
}

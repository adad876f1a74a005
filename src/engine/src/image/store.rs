//! Image store: tag and id indices over the blob store, image commits,
//! and the materialised-rootfs cache.
//!
//! Reads work through an unlocked handle and see an internally
//! consistent snapshot. All writes require [`LockedImageStore`], which
//! holds the store lock for its lifetime.

use std::path::{Path, PathBuf};

use skiff_core::error::{Context, Result, SkiffError};
use skiff_core::idmap::IdMap;

use crate::digest::Digest;
use crate::lock::{LockFile, LockGuard};
use crate::oci::{
    Descriptor, History, ImageConfig, ImageManifest, now_rfc3339, MEDIA_TYPE_CONFIG,
    MEDIA_TYPE_LAYER, MEDIA_TYPE_LAYER_GZIP,
};
use crate::store::blob::BlobStore;
use crate::store::fsspec::{FsSpec, FsSpecStore};
use crate::tar::{pack_layer, unpack_layer, unpack_layer_gz};

use super::{Image, ImageImporter, ImageName, ANNOTATION_FSSPEC};

/// Docker's compressed layer media type, accepted on import.
const MEDIA_TYPE_DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// A tag entry: name plus the image it points at.
#[derive(Debug, Clone)]
pub struct TaggedImage {
    pub name: ImageName,
    pub image: Image,
}

/// Read-side image store handle.
#[derive(Debug, Clone)]
pub struct ImageStore {
    repos_dir: PathBuf,
    ids_dir: PathBuf,
    rofs_dir: PathBuf,
    blobs: BlobStore,
    fsspecs: FsSpecStore,
    lock: LockFile,
    idmap: IdMap,
}

impl ImageStore {
    /// Open (creating if necessary) the image store inside `store_dir`.
    pub fn new(store_dir: &Path, rootless: bool) -> Result<Self> {
        let blobs = BlobStore::new(&store_dir.join("blobs"), &store_dir.join(".temp"))?;
        let fsspecs = FsSpecStore::new(&store_dir.join(".fsspec"))?;
        let repos_dir = store_dir.join("image-repos");
        let ids_dir = store_dir.join("image-ids");
        let rofs_dir = store_dir.join(".rofs-cache");
        skiff_core::config::ensure_dir(&repos_dir)?;
        skiff_core::config::ensure_dir(&ids_dir)?;
        skiff_core::config::ensure_dir(&rofs_dir)?;
        Ok(Self {
            repos_dir,
            ids_dir,
            rofs_dir,
            blobs,
            fsspecs,
            lock: LockFile::new(store_dir.join(".lock")),
            idmap: if rootless {
                IdMap::rootless()
            } else {
                IdMap::identity()
            },
        })
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn fsspecs(&self) -> &FsSpecStore {
        &self.fsspecs
    }

    pub fn idmap(&self) -> &IdMap {
        &self.idmap
    }

    /// Resolve a `name:tag` to an image.
    pub fn image_by_name(&self, name: &str) -> Result<Image> {
        let parsed = ImageName::parse(name)?;
        let tag_path = self.tag_path(&parsed);
        let content = std::fs::read_to_string(&tag_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("image {parsed}"))
            } else {
                SkiffError::Other(format!("read tag {}: {e}", tag_path.display()))
            }
        })?;
        let digest = Digest::parse(content.trim())
            .map_err(|_| SkiffError::Corrupt(format!("tag {parsed} holds a malformed digest")))?;
        self.image(&digest)
            .map_err(|e| e.context(&format!("resolve {parsed}")))
    }

    /// Load an image by id (manifest digest).
    pub fn image(&self, id: &Digest) -> Result<Image> {
        let manifest_data = self.blobs.read(id).map_err(|e| {
            if e.is_not_found() {
                SkiffError::NotFound(format!("image {id}"))
            } else {
                e
            }
        })?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_data)
            .map_err(|e| SkiffError::Corrupt(format!("manifest {id}: {e}")))?;
        let config_data = self.blobs.read(&manifest.config.digest).map_err(|e| {
            if e.is_not_found() {
                SkiffError::Corrupt(format!(
                    "manifest {id} references missing config {}",
                    manifest.config.digest
                ))
            } else {
                e
            }
        })?;
        let config: ImageConfig = serde_json::from_slice(&config_data)
            .map_err(|e| SkiffError::Corrupt(format!("config of image {id}: {e}")))?;
        if manifest.layers.len() != config.rootfs.diff_ids.len() {
            return Err(SkiffError::Corrupt(format!(
                "image {id}: {} layers but {} diff ids",
                manifest.layers.len(),
                config.rootfs.diff_ids.len()
            )));
        }
        Ok(Image::new(id.clone(), manifest, config))
    }

    /// All tagged images, sorted by name. Broken tags are skipped.
    pub fn images(&self) -> Result<Vec<TaggedImage>> {
        let mut result = Vec::new();
        let mut stack = vec![self.repos_dir.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SkiffError::Other(format!(
                        "read repo dir {}: {e}",
                        dir.display()
                    )))
                }
            };
            for entry in entries {
                let entry =
                    entry.map_err(|e| SkiffError::Other(format!("read repo dir entry: {e}")))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.repos_dir) else {
                    continue;
                };
                let name = rel.to_string_lossy().into_owned();
                // A tag file sits at <repo>/<tag>; a bare file directly
                // under the repos dir is not a valid tag.
                let Some((repo, tag)) = name.rsplit_once('/') else {
                    continue;
                };
                let parsed = ImageName {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                };
                match self.image_by_name(&parsed.to_string()) {
                    Ok(image) => result.push(TaggedImage {
                        name: parsed,
                        image,
                    }),
                    Err(e) => {
                        tracing::warn!(name = %parsed, error = %e, "skipping broken tag");
                    }
                }
            }
        }
        result.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));
        Ok(result)
    }

    /// Acquire the store lock for read-write access.
    pub fn open_locked(&self) -> Result<LockedImageStore> {
        let guard = self.lock.lock().context("open image store rw")?;
        Ok(LockedImageStore {
            store: self.clone(),
            _guard: guard,
        })
    }

    /// Path of the materialised rootfs for `image`, unpacking the layer
    /// stack into the read-only cache on first use.
    pub fn materialize_rootfs(&self, image: &Image) -> Result<PathBuf> {
        let cache_dir = self.rofs_dir.join(image.id().hex());
        let rootfs = cache_dir.join("rootfs");
        if rootfs.is_dir() {
            return Ok(rootfs);
        }

        let staging = self
            .rofs_dir
            .join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let staging_rootfs = staging.join("rootfs");
        skiff_core::config::ensure_dir(&staging_rootfs)?;

        let result = self.unpack_layers(image, &staging_rootfs);
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e.context(&format!("materialize rootfs of {}", image.id())));
        }

        // Record the fs-spec of the materialised tree for incremental
        // commits on top of imported images.
        let spec = FsSpec::scan(&staging_rootfs, &self.idmap)?;
        let spec_digest = self.fsspecs.put(&spec)?;
        std::fs::write(staging.join("fsspec"), format!("{spec_digest}\n"))
            .map_err(|e| SkiffError::Other(format!("write rootfs cache fsspec: {e}")))?;

        match std::fs::rename(&staging, &cache_dir) {
            Ok(()) => {}
            Err(_) if rootfs.is_dir() => {
                // Lost the race against a concurrent materialisation.
                let _ = std::fs::remove_dir_all(&staging);
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(SkiffError::Other(format!(
                    "rename rootfs cache {}: {e}",
                    cache_dir.display()
                )));
            }
        }
        tracing::debug!(image = %image.id(), path = %rootfs.display(), "materialized rootfs");
        Ok(rootfs)
    }

    /// The fs-spec of an image's flattened rootfs.
    pub fn image_fsspec(&self, image: &Image) -> Result<FsSpec> {
        if let Some(digest) = image.fsspec_digest() {
            return self.fsspecs.get(&digest);
        }
        // Imported images carry no annotation; the rootfs cache records
        // a spec as a side effect.
        self.materialize_rootfs(image)?;
        let sidecar = self.rofs_dir.join(image.id().hex()).join("fsspec");
        let content = std::fs::read_to_string(&sidecar)
            .map_err(|e| SkiffError::Other(format!("read {}: {e}", sidecar.display())))?;
        let digest = Digest::parse(content.trim())
            .map_err(|_| SkiffError::Corrupt("rootfs cache fsspec sidecar".to_string()))?;
        self.fsspecs.get(&digest)
    }

    fn unpack_layers(&self, image: &Image, rootfs: &Path) -> Result<()> {
        for layer in &image.manifest().layers {
            let reader = self.blobs.get(&layer.digest)?;
            match layer.media_type.as_str() {
                MEDIA_TYPE_LAYER_GZIP | MEDIA_TYPE_DOCKER_LAYER_GZIP => {
                    unpack_layer_gz(reader, rootfs, &self.idmap)
                        .map_err(|e| e.context(&format!("unpack layer {}", layer.digest)))?
                }
                MEDIA_TYPE_LAYER => unpack_layer(reader, rootfs, &self.idmap)
                    .map_err(|e| e.context(&format!("unpack layer {}", layer.digest)))?,
                other => {
                    return Err(SkiffError::InvalidInput(format!(
                        "unsupported layer media type {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn tag_path(&self, name: &ImageName) -> PathBuf {
        self.repos_dir.join(&name.repo).join(&name.tag)
    }

    fn id_marker_path(&self, id: &Digest) -> PathBuf {
        self.ids_dir.join(id.store_path())
    }
}

/// Exclusive read-write handle on the image store.
pub struct LockedImageStore {
    store: ImageStore,
    _guard: LockGuard,
}

impl std::ops::Deref for LockedImageStore {
    type Target = ImageStore;

    fn deref(&self) -> &ImageStore {
        &self.store
    }
}

impl LockedImageStore {
    /// Point `name` at an existing image. Tags are mutable; an existing
    /// tag is moved.
    pub fn tag_image(&self, id: &Digest, name: &str) -> Result<Image> {
        let image = self.store.image(id)?;
        let parsed = ImageName::parse(name)?;
        let tag_path = self.store.tag_path(&parsed);
        if let Some(parent) = tag_path.parent() {
            skiff_core::config::ensure_dir(parent)?;
        }
        std::fs::write(&tag_path, format!("{id}\n"))
            .map_err(|e| SkiffError::Other(format!("write tag {}: {e}", tag_path.display())))?;
        tracing::info!(name = %parsed, image = %id, "tagged image");
        Ok(image)
    }

    /// Remove a tag. The blobs stay until garbage collection.
    pub fn untag(&self, name: &str) -> Result<()> {
        let parsed = ImageName::parse(name)?;
        let tag_path = self.store.tag_path(&parsed);
        std::fs::remove_file(&tag_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("image {parsed}"))
            } else {
                SkiffError::Other(format!("remove tag {}: {e}", tag_path.display()))
            }
        })?;
        // Trim now-empty repo directories.
        let mut dir = tag_path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.store.repos_dir || std::fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    /// Fetch an image through the external transport adapter and load it.
    pub fn import_image(&self, importer: &dyn ImageImporter, reference: &str) -> Result<Image> {
        importer
            .import(self, reference)
            .map_err(|e| e.context(&format!("import {reference}")))
    }

    /// Commit a configuration change: a new config and manifest reusing
    /// the parent's layers (no new layer).
    pub fn add_image_config(
        &self,
        config: ImageConfig,
        parent: Option<&Image>,
    ) -> Result<Image> {
        let layers = parent
            .map(|p| p.manifest().layers.clone())
            .unwrap_or_default();
        let mut annotations = std::collections::BTreeMap::new();
        if let Some(fsspec) = parent.and_then(|p| p.fsspec_digest()) {
            annotations.insert(ANNOTATION_FSSPEC.to_string(), fsspec.to_string());
        }
        self.commit(config, layers, annotations)
            .map_err(|e| e.context("commit config"))
    }

    /// Commit the diff between `prior` and the current state of
    /// `rootfs` as a new layer on top of `parent`.
    ///
    /// Returns the new image and the fs-spec of `rootfs`, which becomes
    /// the caller's next snapshot.
    pub fn add_image_layer(
        &self,
        rootfs: &Path,
        parent: Option<&Image>,
        prior: &FsSpec,
        author: Option<&str>,
        comment: &str,
    ) -> Result<(Image, FsSpec)> {
        let result = (|| {
            let current = FsSpec::scan(rootfs, &self.store.idmap)?;
            let diff = prior.diff(&current);

            let mut writer = self.store.blobs.writer()?;
            let diff_id = pack_layer(rootfs, &diff, &mut writer).context("pack tarball")?;
            let (layer_digest, layer_size) = writer.commit()?;

            let mut config = parent
                .map(|p| p.config().clone())
                .unwrap_or_default();
            config.created = Some(now_rfc3339());
            config.rootfs.diff_ids.push(diff_id);
            config.history.push(History {
                created: Some(now_rfc3339()),
                author: author.map(str::to_string),
                created_by: None,
                comment: Some(comment.to_string()),
                empty_layer: None,
            });

            let mut layers = parent
                .map(|p| p.manifest().layers.clone())
                .unwrap_or_default();
            layers.push(Descriptor {
                media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
                digest: layer_digest,
                size: layer_size,
            });

            let spec_digest = self.store.fsspecs.put(&current)?;
            let mut annotations = std::collections::BTreeMap::new();
            annotations.insert(ANNOTATION_FSSPEC.to_string(), spec_digest.to_string());

            let image = self.commit(config, layers, annotations)?;
            Ok((image, current))
        })();
        result.context("commit layer")
    }

    /// Write config and manifest blobs plus the id marker.
    fn commit(
        &self,
        mut config: ImageConfig,
        layers: Vec<Descriptor>,
        annotations: std::collections::BTreeMap<String, String>,
    ) -> Result<Image> {
        if config.created.is_none() {
            config.created = Some(now_rfc3339());
        }
        let config_data = serde_json::to_vec(&config)?;
        let (config_digest, config_size) = self.store.blobs.put_bytes(&config_data)?;

        let mut manifest = ImageManifest::new(
            Descriptor {
                media_type: MEDIA_TYPE_CONFIG.to_string(),
                digest: config_digest,
                size: config_size,
            },
            layers,
        );
        manifest.annotations = annotations;

        let manifest_data = serde_json::to_vec(&manifest)?;
        let (manifest_digest, _) = self.store.blobs.put_bytes(&manifest_data)?;

        let marker = self.store.id_marker_path(&manifest_digest);
        if let Some(parent) = marker.parent() {
            skiff_core::config::ensure_dir(parent)?;
        }
        std::fs::write(&marker, b"")
            .map_err(|e| SkiffError::Other(format!("write id marker: {e}")))?;

        tracing::debug!(image = %manifest_digest, "committed image");
        Ok(Image::new(manifest_digest, manifest, config))
    }

    /// Delete blobs unreachable from any tag, along with stale id
    /// markers and rootfs cache entries.
    pub fn gc(&self) -> Result<Vec<Digest>> {
        let mut reachable = std::collections::HashSet::new();
        for tagged in self.store.images()? {
            reachable.insert(tagged.image.id().clone());
            reachable.insert(tagged.image.manifest().config.digest.clone());
            for layer in &tagged.image.manifest().layers {
                reachable.insert(layer.digest.clone());
            }
        }

        let mut removed = Vec::new();
        for digest in self.store.blobs.list()? {
            if !reachable.contains(&digest) {
                self.store.blobs.delete(&digest)?;
                removed.push(digest);
            }
        }

        for digest in &removed {
            let marker = self.store.id_marker_path(digest);
            if marker.is_file() {
                let _ = std::fs::remove_file(&marker);
            }
            let cache_dir = self.store.rofs_dir.join(digest.hex());
            if cache_dir.is_dir() {
                let _ = std::fs::remove_dir_all(&cache_dir);
            }
        }

        tracing::info!(removed = removed.len(), "collected unreachable blobs");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir) -> ImageStore {
        ImageStore::new(tmp.path(), true).unwrap()
    }

    /// Build a single-layer base image from a scratch rootfs.
    fn base_image(store: &LockedImageStore, files: &[(&str, &str)]) -> Image {
        let rootfs = TempDir::new().unwrap();
        for (path, content) in files {
            let dest = rootfs.path().join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(dest, content).unwrap();
        }
        let (image, _) = store
            .add_image_layer(rootfs.path(), None, &FsSpec::empty(), None, "base layer")
            .unwrap();
        image
    }

    #[test]
    fn test_commit_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();

        let image = base_image(&locked, &[("etc/os-release", "ID=skiff\n")]);
        drop(locked);

        let loaded = store.image(image.id()).unwrap();
        assert_eq!(loaded.manifest(), image.manifest());
        assert_eq!(loaded.config(), image.config());
        assert_eq!(loaded.config().rootfs.diff_ids.len(), 1);
    }

    #[test]
    fn test_tag_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let image = base_image(&locked, &[("f", "x")]);

        locked.tag_image(image.id(), "myapp:v1").unwrap();
        drop(locked);

        let resolved = store.image_by_name("myapp:v1").unwrap();
        assert_eq!(resolved.id(), image.id());
        // Default tag resolution.
        assert!(store.image_by_name("myapp").unwrap_err().is_not_found());
    }

    #[test]
    fn test_untag() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let image = base_image(&locked, &[("f", "x")]);
        locked.tag_image(image.id(), "gone:v1").unwrap();
        locked.untag("gone:v1").unwrap();
        assert!(store.image_by_name("gone:v1").unwrap_err().is_not_found());
        assert!(locked.untag("gone:v1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_config_commit_shares_layers() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let parent = base_image(&locked, &[("f", "x")]);

        let mut config = parent.config().clone();
        config.config.set_env("FOO", "bar");
        let child = locked.add_image_config(config, Some(&parent)).unwrap();

        assert_ne!(child.id(), parent.id());
        assert_eq!(child.manifest().layers, parent.manifest().layers);
        assert_eq!(
            child.config().rootfs.diff_ids,
            parent.config().rootfs.diff_ids
        );
        assert_eq!(child.config().config.env_value("FOO"), Some("bar"));
        // The rootfs fs-spec annotation survives config-only commits.
        assert_eq!(child.fsspec_digest(), parent.fsspec_digest());
    }

    #[test]
    fn test_layer_commit_appends_diff_id_and_history() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let parent = base_image(&locked, &[("base", "1")]);

        let rootfs = TempDir::new().unwrap();
        std::fs::write(rootfs.path().join("base"), "1").unwrap();
        std::fs::write(rootfs.path().join("added"), "2").unwrap();
        let prior = store.image_fsspec(&parent).unwrap();

        let (child, new_spec) = locked
            .add_image_layer(rootfs.path(), Some(&parent), &prior, Some("tester"), "RUN add")
            .unwrap();

        assert_eq!(child.config().rootfs.diff_ids.len(), 2);
        assert_eq!(child.manifest().layers.len(), 2);
        assert_eq!(
            child.config().history.len(),
            parent.config().history.len() + 1
        );
        assert_eq!(new_spec.get("added").unwrap().size, 1);

        // Diff id matches the decompressed top layer.
        let top = child.manifest().layers.last().unwrap();
        let blob = store.blobs().read(&top.digest).unwrap();
        let mut uncompressed = Vec::new();
        std::io::Read::read_to_end(
            &mut flate2::read::GzDecoder::new(&blob[..]),
            &mut uncompressed,
        )
        .unwrap();
        assert_eq!(
            *child.config().rootfs.diff_ids.last().unwrap(),
            Digest::sha256_of(&uncompressed)
        );
    }

    #[test]
    fn test_materialize_rootfs_applies_layer_stack() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let parent = base_image(&locked, &[("etc/version", "1")]);

        let rootfs = TempDir::new().unwrap();
        std::fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        std::fs::write(rootfs.path().join("etc/version"), "2").unwrap();
        let prior = store.image_fsspec(&parent).unwrap();
        let (child, _) = locked
            .add_image_layer(rootfs.path(), Some(&parent), &prior, None, "update")
            .unwrap();
        drop(locked);

        let materialized = store.materialize_rootfs(&child).unwrap();
        assert_eq!(
            std::fs::read_to_string(materialized.join("etc/version")).unwrap(),
            "2"
        );
        // Second call hits the cache.
        assert_eq!(store.materialize_rootfs(&child).unwrap(), materialized);
    }

    #[test]
    fn test_image_fsspec_round_trips_through_cache() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let image = base_image(&locked, &[("a/b", "content")]);
        drop(locked);

        let spec = store.image_fsspec(&image).unwrap();
        assert!(spec.get("a/b").is_some());

        let materialized = store.materialize_rootfs(&image).unwrap();
        let rescanned = FsSpec::scan(&materialized, store.idmap()).unwrap();
        assert_eq!(rescanned.digest(), spec.digest());
    }

    #[test]
    fn test_images_listing() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();
        let image = base_image(&locked, &[("f", "x")]);
        locked.tag_image(image.id(), "app:v1").unwrap();
        locked.tag_image(image.id(), "app:v2").unwrap();
        locked.tag_image(image.id(), "registry.example/ns/app:v1").unwrap();
        drop(locked);

        let names: Vec<String> = store
            .images()
            .unwrap()
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["app:v1", "app:v2", "registry.example/ns/app:v1"]
        );
    }

    #[test]
    fn test_gc_removes_unreachable_blobs() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let locked = store.open_locked().unwrap();

        let kept = base_image(&locked, &[("kept", "1")]);
        locked.tag_image(kept.id(), "kept:latest").unwrap();
        let doomed = base_image(&locked, &[("doomed", "2")]);

        let removed = locked.gc().unwrap();
        assert!(removed.contains(doomed.id()));
        assert!(store.image(kept.id()).is_ok());
        assert!(store.image(doomed.id()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_image_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let err = store.image(&Digest::sha256_of(b"missing")).unwrap_err();
        assert!(err.is_not_found());
        assert!(store
            .image_by_name("ghost:latest")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_corrupt_tag_is_detected() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let tag_dir = tmp.path().join("image-repos/bad");
        std::fs::create_dir_all(&tag_dir).unwrap();
        std::fs::write(tag_dir.join("latest"), "not-a-digest\n").unwrap();

        let err = store.image_by_name("bad:latest").unwrap_err();
        assert!(matches!(err, SkiffError::Corrupt(_)));
    }
}

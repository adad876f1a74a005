//! Runtime bundles: a directory with an OCI runtime spec and a rootfs.

mod store;
pub mod seccomp;
pub mod spec;

pub use spec::SpecBuilder;
pub use store::BundleStore;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use oci_spec::runtime::Spec;
use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;
use crate::lock::{LockFile, LockGuard};

/// Sidecar recording the digest of the image the bundle was created
/// from (and updated to by layer commits).
const PARENT_FILE: &str = "parent";
/// Sidecar recording the fs-spec digest snapshot of `rootfs/`.
const FSSPEC_FILE: &str = "fsspec";
/// Advisory lock file.
const LOCK_FILE: &str = "lock";
/// The OCI runtime spec.
const CONFIG_FILE: &str = "config.json";

/// An existing bundle directory.
#[derive(Debug, Clone)]
pub struct Bundle {
    id: String,
    dir: PathBuf,
}

impl Bundle {
    pub(crate) fn open(id: String, dir: PathBuf) -> Self {
        Self { id, dir }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rootfs(&self) -> PathBuf {
        self.dir.join("rootfs")
    }

    /// Read the runtime spec.
    pub fn spec(&self) -> Result<Spec> {
        let path = self.dir.join(CONFIG_FILE);
        let data = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("bundle {} has no config.json", self.id))
            } else {
                SkiffError::Other(format!("read {}: {e}", path.display()))
            }
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| SkiffError::Corrupt(format!("bundle {} config.json: {e}", self.id)))
    }

    /// The image this bundle was created from, if any.
    pub fn parent_image(&self) -> Result<Option<Digest>> {
        let path = self.dir.join(PARENT_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Digest::parse(trimmed).map_err(|_| {
                        SkiffError::Corrupt(format!("bundle {} parent sidecar", self.id))
                    })?))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SkiffError::Other(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    /// The fs-spec digest snapshot taken at creation (or the last
    /// layer commit).
    pub fn fsspec_digest(&self) -> Result<Digest> {
        let path = self.dir.join(FSSPEC_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("bundle {} has no fs-spec snapshot", self.id))
            } else {
                SkiffError::Other(format!("read {}: {e}", path.display()))
            }
        })?;
        Digest::parse(content.trim())
            .map_err(|_| SkiffError::Corrupt(format!("bundle {} fsspec sidecar", self.id)))
    }

    /// Creation time, from the bundle directory.
    pub fn created(&self) -> Result<SystemTime> {
        let meta = std::fs::metadata(&self.dir)
            .map_err(|e| SkiffError::Other(format!("stat {}: {e}", self.dir.display())))?;
        meta.modified()
            .map_err(|e| SkiffError::Other(format!("bundle mtime: {e}")))
    }

    fn lockfile(&self) -> LockFile {
        LockFile::new(self.dir.join(LOCK_FILE))
    }

    /// Acquire exclusive access, blocking.
    pub fn lock(self) -> Result<LockedBundle> {
        let guard = self.lockfile().lock()?;
        Ok(LockedBundle {
            bundle: self,
            _guard: guard,
        })
    }

    /// Acquire exclusive access or fail with `Locked`.
    pub fn try_lock(self) -> Result<LockedBundle> {
        let guard = self.lockfile().try_lock()?;
        Ok(LockedBundle {
            bundle: self,
            _guard: guard,
        })
    }
}

/// A bundle under exclusive control; the lock is held for the life of
/// the handle and released on drop.
#[derive(Debug)]
pub struct LockedBundle {
    bundle: Bundle,
    _guard: LockGuard,
}

impl LockedBundle {
    pub fn id(&self) -> &str {
        self.bundle.id()
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }

    pub fn rootfs(&self) -> PathBuf {
        self.bundle.rootfs()
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn spec(&self) -> Result<Spec> {
        self.bundle.spec()
    }

    /// Write the runtime spec.
    pub fn set_spec(&self, spec: &Spec) -> Result<()> {
        let path = self.bundle.dir.join(CONFIG_FILE);
        let data = serde_json::to_vec_pretty(spec)?;
        std::fs::write(&path, data)
            .map_err(|e| SkiffError::Other(format!("write {}: {e}", path.display())))
    }

    pub fn parent_image(&self) -> Result<Option<Digest>> {
        self.bundle.parent_image()
    }

    pub fn fsspec_digest(&self) -> Result<Digest> {
        self.bundle.fsspec_digest()
    }

    /// Update the parent image and fs-spec snapshot, so operations
    /// after a layer commit see correct history.
    pub fn set_parent(&self, image: &Digest, fsspec: &Digest) -> Result<()> {
        std::fs::write(self.bundle.dir.join(PARENT_FILE), format!("{image}\n"))
            .map_err(|e| SkiffError::Other(format!("write parent sidecar: {e}")))?;
        self.set_fsspec(fsspec)
    }

    pub(crate) fn set_fsspec(&self, fsspec: &Digest) -> Result<()> {
        std::fs::write(self.bundle.dir.join(FSSPEC_FILE), format!("{fsspec}\n"))
            .map_err(|e| SkiffError::Other(format!("write fsspec sidecar: {e}")))
    }

    /// Release the lock. Equivalent to dropping the handle.
    pub fn close(self) {}

    /// Delete the bundle directory and release the lock.
    pub fn delete(self) -> Result<()> {
        std::fs::remove_dir_all(self.bundle.dir()).map_err(|e| {
            SkiffError::Other(format!(
                "delete bundle {}: {e}",
                self.bundle.dir().display()
            ))
        })
    }
}

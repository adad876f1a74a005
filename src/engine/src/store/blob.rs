//! Content-addressed blob storage.
//!
//! Blobs live at `blobs/<algorithm>/<hex>`. Writes stream into the
//! store's `.temp` directory while the digest is computed and are
//! renamed into place on success, so readers never observe a partial
//! blob and concurrent writers of the same content are safe.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use skiff_core::error::{Result, SkiffError};

use crate::digest::{Digest, HashingWriter};

/// Content-addressed store of opaque byte blobs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    blob_dir: PathBuf,
    temp_dir: PathBuf,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store.
    pub fn new(blob_dir: &Path, temp_dir: &Path) -> Result<Self> {
        skiff_core::config::ensure_dir(blob_dir)?;
        skiff_core::config::ensure_dir(temp_dir)?;
        Ok(Self {
            blob_dir: blob_dir.to_path_buf(),
            temp_dir: temp_dir.to_path_buf(),
        })
    }

    /// Store everything readable from `reader`.
    pub fn put(&self, mut reader: impl Read) -> Result<(Digest, u64)> {
        let mut writer = self.writer()?;
        std::io::copy(&mut reader, &mut writer)
            .map_err(|e| SkiffError::Other(format!("write blob: {e}")))?;
        writer.commit()
    }

    /// Store a byte slice.
    pub fn put_bytes(&self, data: &[u8]) -> Result<(Digest, u64)> {
        self.put(data)
    }

    /// Begin a streaming blob write.
    pub fn writer(&self) -> Result<BlobWriter> {
        let temp_path = self
            .temp_dir
            .join(format!("blob-{}", uuid::Uuid::new_v4().simple()));
        let file = File::create(&temp_path).map_err(|e| {
            SkiffError::Other(format!("create temp blob {}: {e}", temp_path.display()))
        })?;
        Ok(BlobWriter {
            store: self.clone(),
            temp_path: Some(temp_path),
            inner: Some(HashingWriter::new(BufWriter::new(file))),
        })
    }

    /// Open a blob for reading.
    pub fn get(&self, digest: &Digest) -> Result<File> {
        let path = self.blob_path(digest);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("blob {digest}"))
            } else {
                SkiffError::Other(format!("open blob {}: {e}", path.display()))
            }
        })
    }

    /// Read a blob fully into memory.
    pub fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.get(digest)?
            .read_to_end(&mut data)
            .map_err(|e| SkiffError::Other(format!("read blob {digest}: {e}")))?;
        Ok(data)
    }

    /// Size of a stored blob in bytes.
    pub fn stat(&self, digest: &Digest) -> Result<u64> {
        let path = self.blob_path(digest);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SkiffError::NotFound(format!("blob {digest}")))
            }
            Err(e) => Err(SkiffError::Other(format!(
                "stat blob {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Remove a blob. Missing blobs are not an error.
    pub fn delete(&self, digest: &Digest) -> Result<()> {
        let path = self.blob_path(digest);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SkiffError::Other(format!(
                "delete blob {}: {e}",
                path.display()
            ))),
        }
    }

    /// All stored digests. Files with unparseable names are skipped.
    pub fn list(&self) -> Result<Vec<Digest>> {
        let mut digests = Vec::new();
        let algo_dirs = match std::fs::read_dir(&self.blob_dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(digests),
            Err(e) => {
                return Err(SkiffError::Other(format!(
                    "read blob dir {}: {e}",
                    self.blob_dir.display()
                )))
            }
        };
        for algo_dir in algo_dirs {
            let algo_dir = algo_dir
                .map_err(|e| SkiffError::Other(format!("read blob dir entry: {e}")))?;
            let algo = algo_dir.file_name();
            if !algo_dir.path().is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(algo_dir.path())
                .map_err(|e| SkiffError::Other(format!("read blob dir entry: {e}")))?
            {
                let entry =
                    entry.map_err(|e| SkiffError::Other(format!("read blob dir entry: {e}")))?;
                let name = entry.file_name();
                let combined = format!(
                    "{}:{}",
                    algo.to_string_lossy(),
                    name.to_string_lossy()
                );
                if let Ok(digest) = Digest::parse(&combined) {
                    digests.push(digest);
                }
            }
        }
        digests.sort_by(|a, b| a.hex().cmp(b.hex()));
        Ok(digests)
    }

    /// Verify a blob's content against its name.
    pub fn verify(&self, digest: &Digest) -> Result<()> {
        let file = self.get(digest)?;
        let (actual, _) = Digest::sha256_of_reader(file)?;
        if actual != *digest {
            return Err(SkiffError::Corrupt(format!(
                "blob {digest} hashes to {actual}"
            )));
        }
        Ok(())
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blob_dir.join(digest.store_path())
    }
}

/// In-flight blob write. Uncommitted temp files are removed on drop.
pub struct BlobWriter {
    store: BlobStore,
    temp_path: Option<PathBuf>,
    inner: Option<HashingWriter<BufWriter<File>>>,
}

impl BlobWriter {
    /// Finish the write and move the blob into place.
    ///
    /// Storing content that already exists is a no-op apart from the
    /// rename, which atomically replaces identical bytes.
    pub fn commit(mut self) -> Result<(Digest, u64)> {
        let mut inner = self.inner.take().expect("blob writer already committed");
        inner
            .flush()
            .map_err(|e| SkiffError::Other(format!("flush blob: {e}")))?;
        let temp_path = self.temp_path.take().expect("blob writer already committed");
        let (digest, size, _) = inner.finish();

        let final_path = self.store.blob_path(&digest);
        if let Some(parent) = final_path.parent() {
            skiff_core::config::ensure_dir(parent)?;
        }
        std::fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            SkiffError::Other(format!(
                "rename blob into place {}: {e}",
                final_path.display()
            ))
        })?;

        tracing::debug!(digest = %digest, size, "stored blob");
        Ok((digest, size))
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .as_mut()
            .expect("blob writer already committed")
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner
            .as_mut()
            .expect("blob writer already committed")
            .flush()
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if let Some(temp_path) = self.temp_path.take() {
            let _ = std::fs::remove_file(temp_path);
        }
    }
}

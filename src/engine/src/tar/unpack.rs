//! Layer unpacking.
//!
//! Applies a layer tar stream to a rootfs directory: whiteouts remove
//! lower-layer entries, everything else is created in place. Entry
//! paths are resolved through [`super::resolve_safe`], so no entry and
//! no intermediate symlink can reach outside the rootfs.

use std::io::Read;
use std::os::unix::fs::{chown, lchown, symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use nix::errno::Errno;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::mkfifo;
use skiff_core::error::{Result, SkiffError};
use skiff_core::idmap::IdMap;

use super::{resolve_safe, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};

/// Unpack a gzip-compressed layer into `rootfs`.
pub fn unpack_layer_gz(reader: impl Read, rootfs: &Path, idmap: &IdMap) -> Result<()> {
    unpack_layer(GzDecoder::new(reader), rootfs, idmap)
}

/// Unpack an uncompressed layer tar stream into `rootfs`.
pub fn unpack_layer(reader: impl Read, rootfs: &Path, idmap: &IdMap) -> Result<()> {
    skiff_core::config::ensure_dir(rootfs)?;
    let mut archive = tar::Archive::new(reader);

    for entry in archive
        .entries()
        .map_err(|e| SkiffError::Other(format!("read layer: {e}")))?
    {
        let entry = entry.map_err(|e| SkiffError::Other(format!("read layer entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| SkiffError::Other(format!("read entry path: {e}")))?
            .into_owned();

        let file_name = match entry_path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };

        if file_name == OPAQUE_WHITEOUT {
            let parent = entry_path.parent().unwrap_or(Path::new(""));
            let dir = resolve_safe(rootfs, parent)?;
            apply_opaque_whiteout(&dir)
                .map_err(|e| e.context(&format!("opaque whiteout {}", entry_path.display())))?;
            continue;
        }

        if let Some(victim) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let parent = entry_path.parent().unwrap_or(Path::new(""));
            let target = resolve_safe(rootfs, &parent.join(victim))?;
            apply_whiteout(&target)
                .map_err(|e| e.context(&format!("whiteout {}", entry_path.display())))?;
            continue;
        }

        create_entry(entry, rootfs, idmap)
            .map_err(|e| e.context(&format!("unpack {}", entry_path.display())))?;
    }
    Ok(())
}

/// Saved directory timestamps, restored after whiteout deletions so
/// removals from a lower layer leave the parent's times untouched.
struct SavedTimes {
    atime: filetime::FileTime,
    mtime: filetime::FileTime,
}

impl SavedTimes {
    fn capture(path: &Path) -> Option<Self> {
        let meta = std::fs::symlink_metadata(path).ok()?;
        Some(Self {
            atime: filetime::FileTime::from_unix_time(meta.atime(), meta.atime_nsec() as u32),
            mtime: filetime::FileTime::from_unix_time(meta.mtime(), meta.mtime_nsec() as u32),
        })
    }

    fn restore(&self, path: &Path) {
        let _ = filetime::set_symlink_file_times(path, self.atime, self.mtime);
    }
}

/// Remove all children of `dir`, keeping the directory and its metadata.
fn apply_opaque_whiteout(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let saved = SavedTimes::capture(dir);
    for child in std::fs::read_dir(dir)
        .map_err(|e| SkiffError::Other(format!("read dir {}: {e}", dir.display())))?
    {
        let child = child.map_err(|e| SkiffError::Other(format!("read dir entry: {e}")))?;
        remove_any(&child.path())?;
    }
    if let Some(saved) = saved {
        saved.restore(dir);
    }
    Ok(())
}

/// Remove the entry a `.wh.` whiteout names, restoring parent times.
fn apply_whiteout(target: &Path) -> Result<()> {
    let saved = target.parent().and_then(SavedTimes::capture);
    remove_any(target)?;
    if let (Some(saved), Some(parent)) = (saved, target.parent()) {
        saved.restore(parent);
    }
    Ok(())
}

fn remove_any(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(SkiffError::Other(format!(
                "stat {}: {e}",
                path.display()
            )))
        }
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| SkiffError::Other(format!("remove {}: {e}", path.display())))
}

fn create_entry<R: Read>(
    mut entry: tar::Entry<'_, R>,
    rootfs: &Path,
    idmap: &IdMap,
) -> Result<()> {
    let entry_path = entry
        .path()
        .map_err(|e| SkiffError::Other(format!("read entry path: {e}")))?
        .into_owned();
    let dest = resolve_safe(rootfs, &entry_path)?;
    debug_assert!(dest.starts_with(rootfs));

    if let Some(parent) = dest.parent() {
        // Missing parents appear with mode 0755 and the caller's ids.
        std::fs::create_dir_all(parent)
            .map_err(|e| SkiffError::Other(format!("create parent {}: {e}", parent.display())))?;
    }

    let header = entry.header();
    let kind = header.entry_type();
    let mode = header
        .mode()
        .map_err(|e| SkiffError::Other(format!("read mode: {e}")))?;
    let uid = header
        .uid()
        .map_err(|e| SkiffError::Other(format!("read uid: {e}")))? as u32;
    let gid = header
        .gid()
        .map_err(|e| SkiffError::Other(format!("read gid: {e}")))? as u32;
    let mtime = header
        .mtime()
        .map_err(|e| SkiffError::Other(format!("read mtime: {e}")))?;
    let device_major = header.device_major().ok().flatten().unwrap_or(0);
    let device_minor = header.device_minor().ok().flatten().unwrap_or(0);

    // Collect xattrs before consuming the entry body.
    let mut xattrs: Vec<(String, Vec<u8>)> = Vec::new();
    if let Ok(Some(extensions)) = entry.pax_extensions() {
        for ext in extensions.flatten() {
            if let (Ok(key), value) = (ext.key(), ext.value_bytes()) {
                if let Some(name) = key.strip_prefix("SCHILY.xattr.") {
                    xattrs.push((name.to_string(), value.to_vec()));
                }
            }
        }
    }

    match kind {
        tar::EntryType::Directory => {
            if dest.is_file() || dest.is_symlink() {
                remove_any(&dest)?;
            }
            if !dest.is_dir() {
                std::fs::create_dir(&dest).map_err(|e| {
                    SkiffError::Other(format!("create dir {}: {e}", dest.display()))
                })?;
            }
            set_mode(&dest, mode)?;
        }
        tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
            if dest.is_dir() || dest.is_symlink() {
                remove_any(&dest)?;
            }
            let mut file = std::fs::File::create(&dest).map_err(|e| {
                SkiffError::Other(format!("create file {}: {e}", dest.display()))
            })?;
            std::io::copy(&mut entry, &mut file)
                .map_err(|e| SkiffError::Other(format!("write {}: {e}", dest.display())))?;
            set_mode(&dest, mode)?;
        }
        tar::EntryType::Symlink => {
            let target = entry
                .link_name()
                .map_err(|e| SkiffError::Other(format!("read link name: {e}")))?
                .ok_or_else(|| {
                    SkiffError::Corrupt(format!("symlink entry {} without target", dest.display()))
                })?;
            remove_any(&dest)?;
            symlink(&target, &dest).map_err(|e| {
                SkiffError::Other(format!("create symlink {}: {e}", dest.display()))
            })?;
        }
        tar::EntryType::Link => {
            let target = entry
                .link_name()
                .map_err(|e| SkiffError::Other(format!("read link name: {e}")))?
                .ok_or_else(|| {
                    SkiffError::Corrupt(format!("hardlink entry {} without target", dest.display()))
                })?;
            let source = resolve_safe(rootfs, &target)?;
            remove_any(&dest)?;
            std::fs::hard_link(&source, &dest).map_err(|e| {
                SkiffError::Other(format!(
                    "hardlink {} -> {}: {e}",
                    dest.display(),
                    source.display()
                ))
            })?;
        }
        tar::EntryType::Char | tar::EntryType::Block => {
            let (major, minor) = (device_major, device_minor);
            let flag = if kind == tar::EntryType::Char {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            remove_any(&dest)?;
            match mknod(
                &dest,
                flag,
                Mode::from_bits_truncate(mode),
                makedev(major as u64, minor as u64),
            ) {
                Ok(()) => {}
                Err(Errno::EPERM) => {
                    // Rootless: devices cannot be created; leave a
                    // placeholder so the path exists.
                    std::fs::File::create(&dest).map_err(|e| {
                        SkiffError::Other(format!(
                            "create device placeholder {}: {e}",
                            dest.display()
                        ))
                    })?;
                }
                Err(e) => {
                    return Err(SkiffError::Other(format!(
                        "mknod {}: {e}",
                        dest.display()
                    )))
                }
            }
        }
        tar::EntryType::Fifo => {
            remove_any(&dest)?;
            mkfifo(&dest, Mode::from_bits_truncate(mode)).map_err(|e| {
                SkiffError::Other(format!("mkfifo {}: {e}", dest.display()))
            })?;
        }
        // PAX/GNU metadata entries carry no filesystem object.
        _ => return Ok(()),
    }

    apply_ownership(&dest, uid, gid, idmap)?;
    for (name, value) in &xattrs {
        // Best effort: privileged namespaces are refused rootless.
        let _ = xattr::set(&dest, name, value);
    }
    if !dest.is_symlink() {
        let time = filetime::FileTime::from_unix_time(mtime as i64, 0);
        let _ = filetime::set_file_times(&dest, time, time);
    }

    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| SkiffError::Other(format!("chmod {}: {e}", path.display())))
}

/// Map the header's container-side ids to the host and chown.
///
/// Unmapped ids and EPERM (rootless without the matching mapping) are
/// skipped: the file stays owned by the caller.
fn apply_ownership(path: &Path, uid: u32, gid: u32, idmap: &IdMap) -> Result<()> {
    let (host_uid, host_gid) = match (idmap.host_uid(uid), idmap.host_gid(gid)) {
        (Some(u), Some(g)) => (u, g),
        _ => return Ok(()),
    };
    let result = if path.is_symlink() {
        lchown(path, Some(host_uid), Some(host_gid))
    } else {
        chown(path, Some(host_uid), Some(host_gid))
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_eperm()) => {
            tracing::debug!(path = %path.display(), uid, gid, "skipping chown without privileges");
            Ok(())
        }
        Err(e) => Err(SkiffError::Other(format!(
            "chown {}: {e}",
            path.display()
        ))),
    }
}

fn libc_eperm() -> i32 {
    Errno::EPERM as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    struct LayerBuilder {
        builder: tar::Builder<GzEncoder<Vec<u8>>>,
    }

    impl LayerBuilder {
        fn new() -> Self {
            let gz = GzEncoder::new(Vec::new(), Compression::default());
            Self {
                builder: tar::Builder::new(gz),
            }
        }

        fn file(mut self, path: &str, content: &[u8]) -> Self {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(content.len() as u64);
            header.set_mtime(1234567890);
            self.builder.append_data(&mut header, path, content).unwrap();
            self
        }

        fn dir(mut self, path: &str) -> Self {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(0);
            self.builder
                .append_data(&mut header, path, std::io::empty())
                .unwrap();
            self
        }

        fn symlink(mut self, path: &str, target: &str) -> Self {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(0o777);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(0);
            self.builder.append_link(&mut header, path, target).unwrap();
            self
        }

        fn finish(self) -> Vec<u8> {
            self.builder.into_inner().unwrap().finish().unwrap()
        }
    }

    fn unpack(layer: &[u8], rootfs: &Path) {
        unpack_layer_gz(layer, rootfs, &IdMap::identity()).unwrap();
    }

    #[test]
    fn test_unpack_files_and_dirs() {
        let tmp = TempDir::new().unwrap();
        let layer = LayerBuilder::new()
            .dir("etc/")
            .file("etc/hostname", b"skiff\n")
            .finish();
        unpack(&layer, tmp.path());
        assert_eq!(
            std::fs::read(tmp.path().join("etc/hostname")).unwrap(),
            b"skiff\n"
        );
    }

    #[test]
    fn test_unpack_creates_missing_parents() {
        let tmp = TempDir::new().unwrap();
        let layer = LayerBuilder::new().file("a/b/c/file", b"deep").finish();
        unpack(&layer, tmp.path());

        assert!(tmp.path().join("a/b/c/file").is_file());
        let mode = std::fs::metadata(tmp.path().join("a/b"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    /// Write an entry with a raw header name, sidestepping the path
    /// validation of the tar builder API.
    fn hostile_layer(name: &[u8], content: &[u8]) -> Vec<u8> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(content.len() as u64);
        header.set_cksum();
        builder.append(&header, content).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_path_escape_is_contained() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        let layer = hostile_layer(b"../../etc/hosts", b"owned");
        unpack(&layer, &rootfs);
        // Written inside the rootfs, not into the host /etc.
        assert_eq!(std::fs::read(rootfs.join("etc/hosts")).unwrap(), b"owned");
        assert!(!tmp.path().join("etc/hosts").exists());
    }

    #[test]
    fn test_absolute_path_is_contained() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        let layer = hostile_layer(b"/../etc/passwd", b"inside");
        unpack(&layer, &rootfs);
        assert_eq!(
            std::fs::read(rootfs.join("etc/passwd")).unwrap(),
            b"inside"
        );
    }

    #[test]
    fn test_symlinked_parent_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        std::os::unix::fs::symlink("/", rootfs.join("escape")).unwrap();

        let layer = LayerBuilder::new()
            .file("escape/tmp/pwned", b"contained")
            .finish();
        unpack(&layer, &rootfs);
        assert!(rootfs.join("tmp/pwned").is_file());
        assert!(!Path::new("/tmp/pwned").exists());
    }

    #[test]
    fn test_whiteout_removes_file() {
        let tmp = TempDir::new().unwrap();
        let lower = LayerBuilder::new()
            .dir("etc/")
            .file("etc/doomed", b"x")
            .file("etc/kept", b"y")
            .finish();
        unpack(&lower, tmp.path());

        let upper = LayerBuilder::new().file("etc/.wh.doomed", b"").finish();
        unpack(&upper, tmp.path());

        assert!(!tmp.path().join("etc/doomed").exists());
        assert!(tmp.path().join("etc/kept").is_file());
    }

    #[test]
    fn test_whiteout_removes_directory_recursively() {
        let tmp = TempDir::new().unwrap();
        let lower = LayerBuilder::new()
            .dir("opt/")
            .dir("opt/app/")
            .file("opt/app/bin", b"x")
            .finish();
        unpack(&lower, tmp.path());

        let upper = LayerBuilder::new().file("opt/.wh.app", b"").finish();
        unpack(&upper, tmp.path());

        assert!(!tmp.path().join("opt/app").exists());
        assert!(tmp.path().join("opt").is_dir());
    }

    #[test]
    fn test_whiteout_preserves_parent_times() {
        let tmp = TempDir::new().unwrap();
        let lower = LayerBuilder::new()
            .dir("etc/")
            .file("etc/doomed", b"x")
            .finish();
        unpack(&lower, tmp.path());

        let before = std::fs::metadata(tmp.path().join("etc")).unwrap();
        let (atime_before, mtime_before) = (before.atime(), before.mtime());

        let upper = LayerBuilder::new().file("etc/.wh.doomed", b"").finish();
        unpack(&upper, tmp.path());

        let after = std::fs::metadata(tmp.path().join("etc")).unwrap();
        assert_eq!(after.atime(), atime_before);
        assert_eq!(after.mtime(), mtime_before);
    }

    #[test]
    fn test_opaque_whiteout_empties_directory() {
        let tmp = TempDir::new().unwrap();
        let lower = LayerBuilder::new()
            .dir("data/")
            .file("data/old1", b"x")
            .file("data/old2", b"y")
            .finish();
        unpack(&lower, tmp.path());

        let upper = LayerBuilder::new()
            .file("data/.wh..wh..opq", b"")
            .file("data/fresh", b"z")
            .finish();
        unpack(&upper, tmp.path());

        assert!(!tmp.path().join("data/old1").exists());
        assert!(!tmp.path().join("data/old2").exists());
        assert!(tmp.path().join("data/fresh").is_file());
    }

    #[test]
    fn test_upper_layer_overwrites_lower() {
        let tmp = TempDir::new().unwrap();
        unpack(
            &LayerBuilder::new().file("config", b"v1").finish(),
            tmp.path(),
        );
        unpack(
            &LayerBuilder::new().file("config", b"v2").finish(),
            tmp.path(),
        );
        assert_eq!(std::fs::read(tmp.path().join("config")).unwrap(), b"v2");
    }

    #[test]
    fn test_unpack_symlink_entry() {
        let tmp = TempDir::new().unwrap();
        let layer = LayerBuilder::new()
            .file("bin/sh", b"#!x")
            .symlink("bin/ash", "sh")
            .finish();
        unpack(&layer, tmp.path());
        let link = tmp.path().join("bin/ash");
        assert!(link.is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("sh"));
    }

    #[test]
    fn test_unpack_applies_mode() {
        let tmp = TempDir::new().unwrap();
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o750);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(4);
        builder.append_data(&mut header, "script", &b"#!sh"[..]).unwrap();
        let layer = builder.into_inner().unwrap().finish().unwrap();

        unpack(&layer, tmp.path());
        let mode = std::fs::metadata(tmp.path().join("script"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o750);
    }

    #[test]
    fn test_unpack_dir_replacing_file() {
        let tmp = TempDir::new().unwrap();
        unpack(&LayerBuilder::new().file("node", b"file").finish(), tmp.path());
        unpack(&LayerBuilder::new().dir("node/").finish(), tmp.path());
        assert!(tmp.path().join("node").is_dir());
    }
}

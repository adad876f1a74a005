//! Layer tarball packing and unpacking.
//!
//! Layers are gzip-compressed tar streams encoding a filesystem diff:
//! OCI whiteouts (`.wh.NAME`) mark removals, `.wh..wh..opq` marks an
//! opaque directory. Unpacking never follows a path outside the rootfs.

mod pack;
mod unpack;

pub use pack::pack_layer;
pub use unpack::{unpack_layer, unpack_layer_gz};

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use skiff_core::error::{Result, SkiffError};

/// Prefix of a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// Basename of an opaque-directory whiteout.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Upper bound on symlink traversals while resolving one entry path.
const MAX_SYMLINK_HOPS: u32 = 40;

/// Resolve a tar entry path to a host path strictly inside `rootfs`.
///
/// The path is lexically cleaned (leading `/` and `..` clamp to the
/// rootfs), then walked component by component. Intermediate symlinks
/// are followed with the rootfs treated as the filesystem root: an
/// absolute target restarts at the rootfs, `..` never climbs above it.
/// The final component is not followed, so the caller decides what to
/// do with an existing entry at the destination.
pub(crate) fn resolve_safe(rootfs: &Path, entry_path: &Path) -> Result<PathBuf> {
    let mut work: VecDeque<OsString> = VecDeque::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(c) => work.push_back(c.to_os_string()),
            Component::ParentDir => work.push_back("..".into()),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    let mut current = rootfs.to_path_buf();
    let mut hops = 0u32;

    while let Some(component) = work.pop_front() {
        if component == ".." {
            if current != rootfs {
                current.pop();
            }
            continue;
        }

        let candidate = current.join(&component);
        if work.is_empty() {
            // Final component: never followed.
            return Ok(candidate);
        }

        let is_symlink = std::fs::symlink_metadata(&candidate)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(SkiffError::PathEscape(format!(
                    "too many symlinks resolving {}",
                    entry_path.display()
                )));
            }
            let target = std::fs::read_link(&candidate).map_err(|e| {
                SkiffError::Other(format!("readlink {}: {e}", candidate.display()))
            })?;
            let mut replacement: Vec<OsString> = Vec::new();
            for c in target.components() {
                match c {
                    Component::Normal(n) => replacement.push(n.to_os_string()),
                    Component::ParentDir => replacement.push("..".into()),
                    Component::RootDir => {
                        // Absolute target: restart at the rootfs.
                        replacement.clear();
                        current = rootfs.to_path_buf();
                    }
                    Component::CurDir | Component::Prefix(_) => {}
                }
            }
            for c in replacement.into_iter().rev() {
                work.push_front(c);
            }
        } else {
            current = candidate;
        }
    }

    // Entry path resolved to the rootfs itself (e.g. "./" or "/").
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_plain_path() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_safe(tmp.path(), Path::new("etc/hosts")).unwrap();
        assert_eq!(resolved, tmp.path().join("etc/hosts"));
    }

    #[test]
    fn test_resolve_clamps_leading_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_safe(tmp.path(), Path::new("../../etc/hosts")).unwrap();
        assert_eq!(resolved, tmp.path().join("etc/hosts"));
    }

    #[test]
    fn test_resolve_clamps_absolute_with_parent() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_safe(tmp.path(), Path::new("/../etc/passwd")).unwrap();
        assert_eq!(resolved, tmp.path().join("etc/passwd"));
    }

    #[test]
    fn test_resolve_interior_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_safe(tmp.path(), Path::new("a/b/../c")).unwrap();
        assert_eq!(resolved, tmp.path().join("a/c"));
    }

    #[test]
    fn test_resolve_through_relative_symlink() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("real")).unwrap();
        symlink("real", tmp.path().join("alias")).unwrap();

        let resolved = resolve_safe(tmp.path(), Path::new("alias/file")).unwrap();
        assert_eq!(resolved, tmp.path().join("real/file"));
    }

    #[test]
    fn test_resolve_absolute_symlink_stays_in_rootfs() {
        let tmp = TempDir::new().unwrap();
        symlink("/etc", tmp.path().join("escape")).unwrap();

        let resolved = resolve_safe(tmp.path(), Path::new("escape/passwd")).unwrap();
        assert_eq!(resolved, tmp.path().join("etc/passwd"));
    }

    #[test]
    fn test_resolve_parent_symlink_stays_in_rootfs() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("dir")).unwrap();
        symlink("../../..", tmp.path().join("dir/up")).unwrap();

        let resolved = resolve_safe(tmp.path(), Path::new("dir/up/etc/hosts")).unwrap();
        assert_eq!(resolved, tmp.path().join("etc/hosts"));
    }

    #[test]
    fn test_resolve_symlink_cycle_fails() {
        let tmp = TempDir::new().unwrap();
        symlink("b", tmp.path().join("a")).unwrap();
        symlink("a", tmp.path().join("b")).unwrap();

        let err = resolve_safe(tmp.path(), Path::new("a/file")).unwrap_err();
        assert!(matches!(err, SkiffError::PathEscape(_)));
    }

    #[test]
    fn test_resolve_final_symlink_not_followed() {
        let tmp = TempDir::new().unwrap();
        symlink("/etc/passwd", tmp.path().join("link")).unwrap();

        let resolved = resolve_safe(tmp.path(), Path::new("link")).unwrap();
        assert_eq!(resolved, tmp.path().join("link"));
    }
}

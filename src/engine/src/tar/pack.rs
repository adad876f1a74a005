//! Layer packing.
//!
//! Serialises a filesystem diff into a gzip-compressed tar stream.
//! Entries are emitted in lexicographic order with zeroed timestamps so
//! identical diffs produce identical layers; removals become `.wh.`
//! whiteout entries that sort ahead of their siblings.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use skiff_core::error::{Result, SkiffError};

use crate::digest::{Digest, HashingWriter};
use crate::store::fsspec::{FsDiff, FsEntry, FsEntryKind};

use super::WHITEOUT_PREFIX;

enum Item<'a> {
    Entry(&'a FsEntry),
    Whiteout,
}

/// Pack `diff` (computed against the current state of `rootfs`) into
/// `writer` as a gzip-compressed layer.
///
/// Returns the diff id: the digest of the uncompressed tar stream.
/// Entry ownership comes from the diff's fs-spec entries, which carry
/// container-side ids already.
pub fn pack_layer(rootfs: &Path, diff: &FsDiff, writer: impl Write) -> Result<Digest> {
    let mut items: Vec<(String, Item)> = Vec::new();
    for entry in &diff.changed {
        items.push((entry.path.clone(), Item::Entry(entry)));
    }
    for removed in &diff.removed {
        items.push((whiteout_name(removed), Item::Whiteout));
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let gz = GzEncoder::new(writer, Compression::default());
    let hashing = HashingWriter::new(gz);
    let mut builder = tar::Builder::new(hashing);
    builder.follow_symlinks(false);

    for (name, item) in &items {
        match item {
            Item::Entry(entry) => append_entry(&mut builder, rootfs, entry)
                .map_err(|e| e.context(&format!("pack entry {name:?}")))?,
            Item::Whiteout => append_whiteout(&mut builder, name)
                .map_err(|e| e.context(&format!("pack whiteout {name:?}")))?,
        }
    }

    let hashing = builder
        .into_inner()
        .map_err(|e| SkiffError::Other(format!("finish layer tar: {e}")))?;
    let (diff_id, _, gz) = hashing.finish();
    gz.finish()
        .map_err(|e| SkiffError::Other(format!("finish layer compression: {e}")))?;

    Ok(diff_id)
}

/// Whiteout tar name for a removed path: `.wh.` prefixed basename.
fn whiteout_name(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, base)) => format!("{parent}/{WHITEOUT_PREFIX}{base}"),
        None => format!("{WHITEOUT_PREFIX}{path}"),
    }
}

fn base_header(entry: &FsEntry) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mode(entry.mode);
    header.set_uid(entry.uid as u64);
    header.set_gid(entry.gid as u64);
    header.set_mtime(0);
    header.set_size(0);
    header
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    rootfs: &Path,
    entry: &FsEntry,
) -> Result<()> {
    if !entry.xattrs.is_empty() {
        let extensions = entry
            .xattrs
            .iter()
            .map(|(name, value)| (format!("SCHILY.xattr.{name}"), value.as_slice()));
        let pairs: Vec<(String, &[u8])> = extensions.collect();
        builder
            .append_pax_extensions(pairs.iter().map(|(k, v)| (k.as_str(), *v)))
            .map_err(|e| SkiffError::Other(format!("append xattrs: {e}")))?;
    }

    let mut header = base_header(entry);
    match entry.kind {
        FsEntryKind::Dir => {
            header.set_entry_type(tar::EntryType::Directory);
            builder
                .append_data(&mut header, format!("{}/", entry.path), std::io::empty())
                .map_err(|e| SkiffError::Other(format!("append dir: {e}")))?;
        }
        FsEntryKind::File => {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.size);
            let host_path = rootfs.join(&entry.path);
            let file = std::fs::File::open(&host_path).map_err(|e| {
                SkiffError::Other(format!("open {}: {e}", host_path.display()))
            })?;
            builder
                .append_data(&mut header, &entry.path, file)
                .map_err(|e| SkiffError::Other(format!("append file: {e}")))?;
        }
        FsEntryKind::Symlink => {
            header.set_entry_type(tar::EntryType::Symlink);
            let target = entry.link.as_deref().ok_or_else(|| {
                SkiffError::Corrupt(format!("symlink {} without target", entry.path))
            })?;
            builder
                .append_link(&mut header, &entry.path, target)
                .map_err(|e| SkiffError::Other(format!("append symlink: {e}")))?;
        }
        FsEntryKind::Hardlink => {
            header.set_entry_type(tar::EntryType::Link);
            let target = entry.link.as_deref().ok_or_else(|| {
                SkiffError::Corrupt(format!("hardlink {} without target", entry.path))
            })?;
            builder
                .append_link(&mut header, &entry.path, target)
                .map_err(|e| SkiffError::Other(format!("append hardlink: {e}")))?;
        }
        FsEntryKind::CharDevice | FsEntryKind::BlockDevice => {
            header.set_entry_type(if entry.kind == FsEntryKind::CharDevice {
                tar::EntryType::Char
            } else {
                tar::EntryType::Block
            });
            let (major, minor) = entry.rdev.unwrap_or((0, 0));
            header
                .set_device_major(major as u32)
                .map_err(|e| SkiffError::Other(format!("set device major: {e}")))?;
            header
                .set_device_minor(minor as u32)
                .map_err(|e| SkiffError::Other(format!("set device minor: {e}")))?;
            builder
                .append_data(&mut header, &entry.path, std::io::empty())
                .map_err(|e| SkiffError::Other(format!("append device: {e}")))?;
        }
        FsEntryKind::Fifo => {
            header.set_entry_type(tar::EntryType::Fifo);
            builder
                .append_data(&mut header, &entry.path, std::io::empty())
                .map_err(|e| SkiffError::Other(format!("append fifo: {e}")))?;
        }
    }
    Ok(())
}

fn append_whiteout<W: Write>(builder: &mut tar::Builder<W>, name: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(0);
    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| SkiffError::Other(format!("append whiteout: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fsspec::FsSpec;
    use flate2::read::GzDecoder;
    use skiff_core::idmap::IdMap;
    use tempfile::TempDir;

    fn tar_names(layer: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(layer));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_pack_full_tree() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("etc")).unwrap();
        std::fs::write(tmp.path().join("etc/hostname"), "skiff\n").unwrap();

        let spec = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();
        let diff = FsSpec::empty().diff(&spec);

        let mut layer = Vec::new();
        pack_layer(tmp.path(), &diff, &mut layer).unwrap();

        assert_eq!(tar_names(&layer), vec!["etc/", "etc/hostname"]);
    }

    #[test]
    fn test_diff_id_is_uncompressed_digest() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("file"), "content").unwrap();

        let spec = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();
        let diff = FsSpec::empty().diff(&spec);

        let mut layer = Vec::new();
        let diff_id = pack_layer(tmp.path(), &diff, &mut layer).unwrap();

        let mut uncompressed = Vec::new();
        std::io::Read::read_to_end(&mut GzDecoder::new(&layer[..]), &mut uncompressed).unwrap();
        assert_eq!(diff_id, Digest::sha256_of(&uncompressed));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("a")).unwrap();
        std::fs::write(tmp.path().join("a/f"), "data").unwrap();

        let spec = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();
        let diff = FsSpec::empty().diff(&spec);

        let mut first = Vec::new();
        let id1 = pack_layer(tmp.path(), &diff, &mut first).unwrap();
        let mut second = Vec::new();
        let id2 = pack_layer(tmp.path(), &diff, &mut second).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_pack_emits_whiteouts_for_removals() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("etc")).unwrap();
        std::fs::write(tmp.path().join("etc/doomed"), "x").unwrap();
        let before = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();

        std::fs::remove_file(tmp.path().join("etc/doomed")).unwrap();
        let after = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();

        let diff = before.diff(&after);
        let mut layer = Vec::new();
        pack_layer(tmp.path(), &diff, &mut layer).unwrap();

        assert_eq!(tar_names(&layer), vec!["etc/.wh.doomed"]);
    }

    #[test]
    fn test_whiteout_sorts_before_sibling_entries() {
        assert!(whiteout_name("a/b") < "a/b".to_string());
        assert_eq!(whiteout_name("top"), ".wh.top");
        assert_eq!(whiteout_name("a/b/c"), "a/b/.wh.c");
    }

    #[test]
    fn test_pack_only_changed_entries() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("stable"), "same").unwrap();
        std::fs::write(tmp.path().join("volatile"), "v1").unwrap();
        let before = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();

        std::fs::write(tmp.path().join("volatile"), "v2").unwrap();
        let after = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();

        let diff = before.diff(&after);
        let mut layer = Vec::new();
        pack_layer(tmp.path(), &diff, &mut layer).unwrap();

        assert_eq!(tar_names(&layer), vec!["volatile"]);
    }

    #[test]
    fn test_pack_symlink() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/bin/sh", tmp.path().join("sh")).unwrap();

        let spec = FsSpec::scan(tmp.path(), &IdMap::identity()).unwrap();
        let diff = FsSpec::empty().diff(&spec);

        let mut layer = Vec::new();
        pack_layer(tmp.path(), &diff, &mut layer).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(&layer[..]));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            entry.link_name().unwrap().unwrap().to_string_lossy(),
            "/bin/sh"
        );
    }
}

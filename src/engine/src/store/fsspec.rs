//! Filesystem manifests.
//!
//! An `FsSpec` is an mtree-like manifest of a rootfs: one entry per
//! path with type, mode, ownership, size, link target, xattrs and a
//! content digest for regular files. Two states of a rootfs are diffed
//! through their specs, so a layer commit never walks the tree twice.
//!
//! The serialisation is canonical: entries sorted by path, one line per
//! entry, normalised fields. Equal trees hash equal across hosts, which
//! is why timestamps are deliberately absent.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use skiff_core::error::{Result, SkiffError};
use skiff_core::idmap::IdMap;

use crate::digest::Digest;

/// Header line of the canonical serialisation.
const HEADER: &str = "#skiff-fsspec-v1";

/// Entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEntryKind {
    File,
    Dir,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

impl FsEntryKind {
    fn as_str(&self) -> &'static str {
        match self {
            FsEntryKind::File => "file",
            FsEntryKind::Dir => "dir",
            FsEntryKind::Symlink => "symlink",
            FsEntryKind::Hardlink => "hardlink",
            FsEntryKind::CharDevice => "char",
            FsEntryKind::BlockDevice => "block",
            FsEntryKind::Fifo => "fifo",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "file" => FsEntryKind::File,
            "dir" => FsEntryKind::Dir,
            "symlink" => FsEntryKind::Symlink,
            "hardlink" => FsEntryKind::Hardlink,
            "char" => FsEntryKind::CharDevice,
            "block" => FsEntryKind::BlockDevice,
            "fifo" => FsEntryKind::Fifo,
            other => {
                return Err(SkiffError::Corrupt(format!(
                    "unknown fs-spec entry type {other:?}"
                )))
            }
        })
    }
}

/// One filesystem entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FsEntry {
    /// Slash-separated path relative to the rootfs, no leading slash.
    pub path: String,
    pub kind: FsEntryKind,
    /// Permission bits (including setuid/setgid/sticky).
    pub mode: u32,
    /// Container-side ownership.
    pub uid: u32,
    pub gid: u32,
    /// Byte size; zero for non-files.
    pub size: u64,
    /// Symlink target or hardlink source path.
    pub link: Option<String>,
    /// Device numbers for char/block entries.
    pub rdev: Option<(u64, u64)>,
    /// Extended attributes.
    pub xattrs: BTreeMap<String, Vec<u8>>,
    /// Content digest for regular files.
    pub digest: Option<Digest>,
}

impl FsEntry {
    fn serialize_line(&self, out: &mut String) {
        out.push_str(&escape(&self.path));
        let _ = write!(out, " type={}", self.kind.as_str());
        let _ = write!(out, " mode={:o}", self.mode);
        let _ = write!(out, " uid={} gid={}", self.uid, self.gid);
        if self.kind == FsEntryKind::File {
            let _ = write!(out, " size={}", self.size);
        }
        if let Some(link) = &self.link {
            let _ = write!(out, " link={}", escape(link));
        }
        if let Some((major, minor)) = self.rdev {
            let _ = write!(out, " major={major} minor={minor}");
        }
        if let Some(digest) = &self.digest {
            let _ = write!(out, " sha256={}", digest.hex());
        }
        for (name, value) in &self.xattrs {
            let _ = write!(out, " xattr.{}={}", escape(name), hex::encode(value));
        }
        out.push('\n');
    }

    fn parse_line(line: &str) -> Result<Self> {
        let corrupt = |msg: &str| SkiffError::Corrupt(format!("fs-spec line {line:?}: {msg}"));

        let mut fields = line.split(' ');
        let path = unescape(fields.next().ok_or_else(|| corrupt("empty line"))?)?;

        let mut kind = None;
        let mut mode = None;
        let mut uid = None;
        let mut gid = None;
        let mut size = 0u64;
        let mut link = None;
        let mut major = None;
        let mut minor = None;
        let mut digest = None;
        let mut xattrs = BTreeMap::new();

        for field in fields {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| corrupt("field without value"))?;
            match key {
                "type" => kind = Some(FsEntryKind::parse(value)?),
                "mode" => {
                    mode = Some(
                        u32::from_str_radix(value, 8).map_err(|_| corrupt("invalid mode"))?,
                    )
                }
                "uid" => uid = Some(value.parse().map_err(|_| corrupt("invalid uid"))?),
                "gid" => gid = Some(value.parse().map_err(|_| corrupt("invalid gid"))?),
                "size" => size = value.parse().map_err(|_| corrupt("invalid size"))?,
                "link" => link = Some(unescape(value)?),
                "major" => major = Some(value.parse().map_err(|_| corrupt("invalid major"))?),
                "minor" => minor = Some(value.parse().map_err(|_| corrupt("invalid minor"))?),
                "sha256" => {
                    digest = Some(Digest::parse(&format!("sha256:{value}"))?);
                }
                _ => {
                    if let Some(name) = key.strip_prefix("xattr.") {
                        let value = hex::decode(value).map_err(|_| corrupt("invalid xattr"))?;
                        xattrs.insert(unescape(name)?, value);
                    } else {
                        return Err(corrupt("unknown field"));
                    }
                }
            }
        }

        Ok(FsEntry {
            path,
            kind: kind.ok_or_else(|| corrupt("missing type"))?,
            mode: mode.ok_or_else(|| corrupt("missing mode"))?,
            uid: uid.ok_or_else(|| corrupt("missing uid"))?,
            gid: gid.ok_or_else(|| corrupt("missing gid"))?,
            size,
            link,
            rdev: match (major, minor) {
                (Some(ma), Some(mi)) => Some((ma, mi)),
                _ => None,
            },
            xattrs,
            digest,
        })
    }
}

/// A complete filesystem manifest, sorted by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FsSpec {
    entries: Vec<FsEntry>,
}

impl FsSpec {
    /// An empty manifest (the state of a `FROM scratch` rootfs).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[FsEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&FsEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Build a spec from entries in any order.
    pub fn from_entries(mut entries: Vec<FsEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    /// Walk a rootfs and record every entry.
    ///
    /// Ownership is recorded container-side: host ids are translated
    /// back through `idmap` (unmapped ids are kept as-is). Regular file
    /// contents are digested so diffs see content changes regardless of
    /// timestamps.
    pub fn scan(rootfs: &Path, idmap: &IdMap) -> Result<Self> {
        let mut entries = Vec::new();
        let mut hardlinks: HashMap<(u64, u64), String> = HashMap::new();
        scan_dir(rootfs, rootfs, idmap, &mut hardlinks, &mut entries)
            .map_err(|e| e.context("scan rootfs"))?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { entries })
    }

    /// Canonical serialisation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        for entry in &self.entries {
            entry.serialize_line(&mut out);
        }
        out.into_bytes()
    }

    /// Parse a canonical serialisation.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SkiffError::Corrupt("fs-spec is not UTF-8".to_string()))?;
        let mut lines = text.lines();
        if lines.next() != Some(HEADER) {
            return Err(SkiffError::Corrupt("fs-spec header missing".to_string()));
        }
        let mut entries = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            entries.push(FsEntry::parse_line(line)?);
        }
        Ok(Self { entries })
    }

    /// Digest over the canonical serialisation.
    pub fn digest(&self) -> Digest {
        Digest::sha256_of(&self.serialize())
    }

    /// Compute the change set turning `self` into `new`.
    ///
    /// Removals are pruned to the topmost removed path: deleting a
    /// directory implies its children. A path whose entry type changed
    /// appears both as a removal and a change so the layer removes the
    /// old entry before recreating it.
    pub fn diff(&self, new: &FsSpec) -> FsDiff {
        let old_by_path: HashMap<&str, &FsEntry> =
            self.entries.iter().map(|e| (e.path.as_str(), e)).collect();
        let new_by_path: HashMap<&str, &FsEntry> =
            new.entries.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut changed = Vec::new();
        let mut removed = Vec::new();

        for entry in &new.entries {
            match old_by_path.get(entry.path.as_str()) {
                None => changed.push(entry.clone()),
                Some(old) if *old != entry => {
                    if old.kind != entry.kind {
                        removed.push(entry.path.clone());
                    }
                    changed.push(entry.clone());
                }
                Some(_) => {}
            }
        }

        for entry in &self.entries {
            if !new_by_path.contains_key(entry.path.as_str()) {
                removed.push(entry.path.clone());
            }
        }

        removed.sort();
        // Keep only topmost removals; deleting a directory covers its
        // children.
        let mut pruned: Vec<String> = Vec::new();
        for path in removed {
            let covered = pruned
                .iter()
                .any(|p| path.starts_with(&format!("{p}/")));
            if !covered {
                pruned.push(path);
            }
        }

        FsDiff {
            changed,
            removed: pruned,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Change set between two filesystem states.
#[derive(Debug, Clone, Default)]
pub struct FsDiff {
    /// Added or modified entries, sorted by path.
    pub changed: Vec<FsEntry>,
    /// Removed paths (topmost only), sorted.
    pub removed: Vec<String>,
}

impl FsDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

fn scan_dir(
    rootfs: &Path,
    dir: &Path,
    idmap: &IdMap,
    hardlinks: &mut HashMap<(u64, u64), String>,
    entries: &mut Vec<FsEntry>,
) -> Result<()> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| SkiffError::Other(format!("read dir {}: {e}", dir.display())))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| SkiffError::Other(format!("read dir {}: {e}", dir.display())))?;
    names.sort_by_key(|e| e.file_name());

    for dirent in names {
        let path = dirent.path();
        let meta = std::fs::symlink_metadata(&path)
            .map_err(|e| SkiffError::Other(format!("stat {}: {e}", path.display())))?;
        let rel = path
            .strip_prefix(rootfs)
            .expect("walk stays under rootfs")
            .to_string_lossy()
            .into_owned();

        let uid = idmap.container_uid(meta.uid()).unwrap_or(meta.uid());
        let gid = idmap.container_gid(meta.gid()).unwrap_or(meta.gid());
        let mode = meta.mode() & 0o7777;
        let file_type = meta.file_type();

        let entry = if file_type.is_dir() {
            FsEntry {
                path: rel.clone(),
                kind: FsEntryKind::Dir,
                mode,
                uid,
                gid,
                size: 0,
                link: None,
                rdev: None,
                xattrs: read_xattrs(&path),
                digest: None,
            }
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path)
                .map_err(|e| SkiffError::Other(format!("readlink {}: {e}", path.display())))?;
            FsEntry {
                path: rel,
                kind: FsEntryKind::Symlink,
                mode,
                uid,
                gid,
                size: 0,
                link: Some(target.to_string_lossy().into_owned()),
                rdev: None,
                xattrs: BTreeMap::new(),
                digest: None,
            }
        } else if file_type.is_file() {
            let key = (meta.dev(), meta.ino());
            if meta.nlink() > 1 {
                if let Some(first) = hardlinks.get(&key) {
                    entries.push(FsEntry {
                        path: rel,
                        kind: FsEntryKind::Hardlink,
                        mode,
                        uid,
                        gid,
                        size: 0,
                        link: Some(first.clone()),
                        rdev: None,
                        xattrs: BTreeMap::new(),
                        digest: None,
                    });
                    continue;
                }
                hardlinks.insert(key, rel.clone());
            }
            let file = std::fs::File::open(&path)
                .map_err(|e| SkiffError::Other(format!("open {}: {e}", path.display())))?;
            let (digest, _) = Digest::sha256_of_reader(file)?;
            FsEntry {
                path: rel,
                kind: FsEntryKind::File,
                mode,
                uid,
                gid,
                size: meta.len(),
                link: None,
                rdev: None,
                xattrs: read_xattrs(&path),
                digest: Some(digest),
            }
        } else {
            let kind = if file_type.is_char_device() {
                FsEntryKind::CharDevice
            } else if file_type.is_block_device() {
                FsEntryKind::BlockDevice
            } else if file_type.is_fifo() {
                FsEntryKind::Fifo
            } else {
                // Sockets have no layer representation.
                continue;
            };
            let rdev = meta.rdev();
            FsEntry {
                path: rel,
                kind,
                mode,
                uid,
                gid,
                size: 0,
                link: None,
                rdev: Some((
                    nix::sys::stat::major(rdev),
                    nix::sys::stat::minor(rdev),
                )),
                xattrs: BTreeMap::new(),
                digest: None,
            }
        };

        let is_dir = entry.kind == FsEntryKind::Dir;
        entries.push(entry);
        if is_dir {
            scan_dir(rootfs, &path, idmap, hardlinks, entries)?;
        }
    }
    Ok(())
}

/// Best effort: xattrs are absent on filesystems without support.
fn read_xattrs(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut xattrs = BTreeMap::new();
    if let Ok(names) = xattr::list(path) {
        for name in names {
            let name_str = name.to_string_lossy().into_owned();
            if let Ok(Some(value)) = xattr::get(path, &name) {
                xattrs.insert(name_str, value);
            }
        }
    }
    xattrs
}

/// Percent-escape spaces, equals signs, newlines and other bytes that
/// would break the line format. Other bytes pass through verbatim.
fn escape(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b' ' | b'=' | b'%' | b'\n' | b'\t' | b'\r' => {
                out.extend_from_slice(format!("%{b:02x}").as_bytes());
            }
            _ => out.push(b),
        }
    }
    String::from_utf8(out).expect("escaping preserves UTF-8")
}

fn unescape(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex_pair = s
                .get(i + 1..i + 3)
                .ok_or_else(|| SkiffError::Corrupt(format!("truncated escape in {s:?}")))?;
            let value = u8::from_str_radix(hex_pair, 16)
                .map_err(|_| SkiffError::Corrupt(format!("invalid escape in {s:?}")))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| SkiffError::Corrupt(format!("non-UTF-8 path in {s:?}")))
}

/// Stores serialised fs-specs under `.fsspec/<algorithm>/<hex>`.
#[derive(Debug, Clone)]
pub struct FsSpecStore {
    dir: PathBuf,
}

impl FsSpecStore {
    pub fn new(dir: &Path) -> Result<Self> {
        skiff_core::config::ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Store a spec, returning its digest.
    pub fn put(&self, spec: &FsSpec) -> Result<Digest> {
        let data = spec.serialize();
        let digest = Digest::sha256_of(&data);
        let path = self.dir.join(digest.store_path());
        if path.is_file() {
            return Ok(digest);
        }
        if let Some(parent) = path.parent() {
            skiff_core::config::ensure_dir(parent)?;
        }
        let temp = self
            .dir
            .join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        std::fs::write(&temp, &data)
            .map_err(|e| SkiffError::Other(format!("write fs-spec {}: {e}", temp.display())))?;
        std::fs::rename(&temp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            SkiffError::Other(format!("rename fs-spec {}: {e}", path.display()))
        })?;
        Ok(digest)
    }

    /// Load a spec, verifying its digest.
    pub fn get(&self, digest: &Digest) -> Result<FsSpec> {
        let path = self.dir.join(digest.store_path());
        let data = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::NotFound(format!("fs-spec {digest}"))
            } else {
                SkiffError::Other(format!("read fs-spec {}: {e}", path.display()))
            }
        })?;
        let actual = Digest::sha256_of(&data);
        if actual != *digest {
            return Err(SkiffError::Corrupt(format!(
                "fs-spec {digest} hashes to {actual}"
            )));
        }
        FsSpec::deserialize(&data)
    }
}

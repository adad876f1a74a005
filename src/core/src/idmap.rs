//! Container/host uid and gid mapping and user resolution.
//!
//! When running rootless, container ids are translated through a
//! configured mapping before any `chown`; by default container 0:0 maps
//! to the caller's effective uid/gid with a range of one.

use std::path::Path;

use nix::unistd::{getegid, geteuid};

use crate::error::{Result, SkiffError};

/// A single contiguous id mapping range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl IdRange {
    fn to_host(&self, container_id: u32) -> Option<u32> {
        if container_id >= self.container_id && container_id - self.container_id < self.size {
            Some(self.host_id + (container_id - self.container_id))
        } else {
            None
        }
    }

    fn to_container(&self, host_id: u32) -> Option<u32> {
        if host_id >= self.host_id && host_id - self.host_id < self.size {
            Some(self.container_id + (host_id - self.host_id))
        } else {
            None
        }
    }
}

/// Uid/gid translation table between container and host.
///
/// An empty map is the identity (privileged operation).
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    uids: Vec<IdRange>,
    gids: Vec<IdRange>,
}

impl IdMap {
    /// Identity mapping: ids pass through untranslated.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Default rootless mapping: container 0:0 owns the caller's
    /// effective uid/gid, nothing else is mapped.
    pub fn rootless() -> Self {
        Self {
            uids: vec![IdRange {
                container_id: 0,
                host_id: geteuid().as_raw(),
                size: 1,
            }],
            gids: vec![IdRange {
                container_id: 0,
                host_id: getegid().as_raw(),
                size: 1,
            }],
        }
    }

    pub fn with_ranges(uids: Vec<IdRange>, gids: Vec<IdRange>) -> Self {
        Self { uids, gids }
    }

    pub fn is_identity(&self) -> bool {
        self.uids.is_empty() && self.gids.is_empty()
    }

    pub fn uid_ranges(&self) -> &[IdRange] {
        &self.uids
    }

    pub fn gid_ranges(&self) -> &[IdRange] {
        &self.gids
    }

    /// Map a container uid to the host. `None` when unmapped.
    pub fn host_uid(&self, container_uid: u32) -> Option<u32> {
        if self.uids.is_empty() {
            return Some(container_uid);
        }
        self.uids.iter().find_map(|r| r.to_host(container_uid))
    }

    /// Map a container gid to the host. `None` when unmapped.
    pub fn host_gid(&self, container_gid: u32) -> Option<u32> {
        if self.gids.is_empty() {
            return Some(container_gid);
        }
        self.gids.iter().find_map(|r| r.to_host(container_gid))
    }

    /// Map a host uid back to the container side. `None` when unmapped.
    pub fn container_uid(&self, host_uid: u32) -> Option<u32> {
        if self.uids.is_empty() {
            return Some(host_uid);
        }
        self.uids.iter().find_map(|r| r.to_container(host_uid))
    }

    /// Map a host gid back to the container side. `None` when unmapped.
    pub fn container_gid(&self, host_gid: u32) -> Option<u32> {
        if self.gids.is_empty() {
            return Some(host_gid);
        }
        self.gids.iter().find_map(|r| r.to_container(host_gid))
    }
}

/// An unresolved user reference: `name`, `name:group`, `uid` or `uid:gid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub user: String,
    pub group: Option<String>,
}

impl UserSpec {
    pub const ROOT: &'static str = "0:0";

    /// Parse `user[:group]`. An empty string means root.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Self {
                user: "0".to_string(),
                group: Some("0".to_string()),
            };
        }
        match s.split_once(':') {
            Some((u, g)) => Self {
                user: u.to_string(),
                group: Some(g.to_string()),
            },
            None => Self {
                user: s.to_string(),
                group: None,
            },
        }
    }

    /// Resolve to numeric ids against `rootfs/etc/passwd` and
    /// `rootfs/etc/group`. Numeric values pass through without a lookup;
    /// unknown names fail.
    pub fn resolve(&self, rootfs: &Path) -> Result<UserIds> {
        let (uid, default_gid) = match self.user.parse::<u64>() {
            Ok(uid) => (uid, None),
            Err(_) => {
                let entry = lookup_passwd(rootfs, &self.user)?;
                (entry.0, Some(entry.1))
            }
        };

        let gid = match &self.group {
            Some(g) => match g.parse::<u64>() {
                Ok(gid) => gid,
                Err(_) => lookup_group(rootfs, g)?,
            },
            None => match default_gid {
                Some(gid) => gid,
                // Numeric user without an explicit group: gid mirrors uid.
                None => uid,
            },
        };

        if uid > u32::MAX as u64 {
            return Err(SkiffError::InvalidInput(format!("uid {uid} exceeds range")));
        }
        if gid > u32::MAX as u64 {
            return Err(SkiffError::InvalidInput(format!("gid {gid} exceeds range")));
        }

        Ok(UserIds {
            uid: uid as u32,
            gid: gid as u32,
        })
    }
}

impl std::fmt::Display for UserSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.group {
            Some(g) => write!(f, "{}:{}", self.user, g),
            None => write!(f, "{}", self.user),
        }
    }
}

/// Resolved numeric user/group ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserIds {
    pub uid: u32,
    pub gid: u32,
}

impl UserIds {
    pub fn is_root(&self) -> bool {
        self.uid == 0 && self.gid == 0
    }
}

impl std::fmt::Display for UserIds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Look up `name` in `rootfs/etc/passwd`, returning (uid, gid).
fn lookup_passwd(rootfs: &Path, name: &str) -> Result<(u64, u64)> {
    let path = rootfs.join("etc/passwd");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        SkiffError::InvalidInput(format!(
            "resolve user {name:?}: read {}: {e}",
            path.display()
        ))
    })?;
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 4 && fields[0] == name {
            let uid = fields[2].parse::<u64>().map_err(|_| {
                SkiffError::InvalidInput(format!("invalid uid {:?} in passwd entry", fields[2]))
            })?;
            let gid = fields[3].parse::<u64>().map_err(|_| {
                SkiffError::InvalidInput(format!("invalid gid {:?} in passwd entry", fields[3]))
            })?;
            return Ok((uid, gid));
        }
    }
    Err(SkiffError::InvalidInput(format!(
        "unknown user {name:?} in {}",
        path.display()
    )))
}

/// Look up `name` in `rootfs/etc/group`, returning the gid.
fn lookup_group(rootfs: &Path, name: &str) -> Result<u64> {
    let path = rootfs.join("etc/group");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        SkiffError::InvalidInput(format!(
            "resolve group {name:?}: read {}: {e}",
            path.display()
        ))
    })?;
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 3 && fields[0] == name {
            return fields[2].parse::<u64>().map_err(|_| {
                SkiffError::InvalidInput(format!("invalid gid {:?} in group entry", fields[2]))
            });
        }
    }
    Err(SkiffError::InvalidInput(format!(
        "unknown group {name:?} in {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rootfs_with_users() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
        std::fs::write(
            tmp.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\ndaemon:x:1:1:daemon:/:/bin/false\nweb:x:100:101::/srv:/bin/sh\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("etc/group"),
            "root:x:0:\ndaemon:x:1:\nwww-data:x:33:\n",
        )
        .unwrap();
        tmp
    }

    #[test]
    fn test_parse_user_forms() {
        assert_eq!(
            UserSpec::parse("1000:1000"),
            UserSpec {
                user: "1000".to_string(),
                group: Some("1000".to_string())
            }
        );
        assert_eq!(
            UserSpec::parse("web"),
            UserSpec {
                user: "web".to_string(),
                group: None
            }
        );
        assert_eq!(UserSpec::parse("").to_string(), "0:0");
    }

    #[test]
    fn test_resolve_numeric_passthrough() {
        let tmp = TempDir::new().unwrap();
        let ids = UserSpec::parse("1000:2000").resolve(tmp.path()).unwrap();
        assert_eq!(ids, UserIds { uid: 1000, gid: 2000 });
    }

    #[test]
    fn test_resolve_name_uses_passwd_gid() {
        let tmp = rootfs_with_users();
        let ids = UserSpec::parse("web").resolve(tmp.path()).unwrap();
        assert_eq!(ids, UserIds { uid: 100, gid: 101 });
    }

    #[test]
    fn test_resolve_named_group() {
        let tmp = rootfs_with_users();
        let ids = UserSpec::parse("daemon:www-data").resolve(tmp.path()).unwrap();
        assert_eq!(ids, UserIds { uid: 1, gid: 33 });
    }

    #[test]
    fn test_resolve_unknown_name_fails() {
        let tmp = rootfs_with_users();
        let err = UserSpec::parse("nobody").resolve(tmp.path()).unwrap_err();
        assert!(matches!(err, SkiffError::InvalidInput(_)));
    }

    #[test]
    fn test_resolve_oversize_uid_fails() {
        let tmp = TempDir::new().unwrap();
        let err = UserSpec::parse("8589934592:0").resolve(tmp.path()).unwrap_err();
        assert!(matches!(err, SkiffError::InvalidInput(_)));
    }

    #[test]
    fn test_identity_map_passes_through() {
        let map = IdMap::identity();
        assert_eq!(map.host_uid(1234), Some(1234));
        assert_eq!(map.container_gid(5678), Some(5678));
    }

    #[test]
    fn test_rootless_map_translates_root_only() {
        let map = IdMap::rootless();
        assert_eq!(map.host_uid(0), Some(geteuid().as_raw()));
        assert_eq!(map.host_uid(1000), None);
        assert_eq!(map.container_uid(geteuid().as_raw()), Some(0));
    }

    #[test]
    fn test_range_mapping() {
        let map = IdMap::with_ranges(
            vec![IdRange {
                container_id: 0,
                host_id: 100000,
                size: 65536,
            }],
            vec![IdRange {
                container_id: 0,
                host_id: 100000,
                size: 65536,
            }],
        );
        assert_eq!(map.host_uid(0), Some(100000));
        assert_eq!(map.host_uid(1000), Some(101000));
        assert_eq!(map.host_uid(65536), None);
        assert_eq!(map.container_uid(100999), Some(999));
    }
}

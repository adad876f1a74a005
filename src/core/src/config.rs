//! Engine configuration resolved from the environment.
//!
//! CLI flags override these values; nothing below the CLI reads the
//! environment directly.

use std::path::{Path, PathBuf};

use nix::unistd::geteuid;

/// Environment variable naming the store directory.
pub const ENV_STORE_DIR: &str = "STORE_DIR";
/// Environment variable naming the runtime state directory.
pub const ENV_STATE_DIR: &str = "STATE_DIR";
/// Environment variable naming the PRoot binary.
pub const ENV_PROOT_PATH: &str = "PROOT_PATH";
/// Environment variable naming the image trust policy.
pub const ENV_IMAGE_POLICY: &str = "IMAGE_POLICY";

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding blobs, images and bundles.
    pub store_dir: PathBuf,
    /// Directory for OCI runtime state (should be tmpfs).
    pub state_dir: PathBuf,
    /// Whether to operate without privileges.
    pub rootless: bool,
    /// PRoot binary used for user-id emulation, if available.
    pub proot_path: Option<PathBuf>,
    /// Image trust policy handed to the import adapter.
    pub image_policy: String,
}

impl EngineConfig {
    /// Resolve the configuration from the environment.
    ///
    /// Defaults: `~/.skiff` store, `/run/user/<uid>/skiff` state when
    /// running unprivileged (`/run/skiff` otherwise), rootless iff the
    /// effective uid is non-zero, PRoot discovered next to the current
    /// executable and on `PATH`.
    pub fn from_env() -> Self {
        let uid = geteuid().as_raw();
        let rootless = uid != 0;

        let store_dir = std::env::var_os(ENV_STORE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_store_dir);

        let state_dir = std::env::var_os(ENV_STATE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_dir(uid));

        let proot_path = std::env::var_os(ENV_PROOT_PATH)
            .map(PathBuf::from)
            .or_else(find_proot_binary);

        let image_policy = std::env::var(ENV_IMAGE_POLICY).unwrap_or_else(|_| "reject".to_string());

        Self {
            store_dir,
            state_dir,
            rootless,
            proot_path,
            image_policy,
        }
    }
}

fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".skiff"))
        .unwrap_or_else(|| PathBuf::from(".skiff"))
}

fn default_state_dir(uid: u32) -> PathBuf {
    if uid == 0 {
        PathBuf::from("/run/skiff")
    } else {
        PathBuf::from(format!("/run/user/{uid}/skiff"))
    }
}

/// Locate a proot binary: next to the current executable first, then the
/// usual install locations, then `PATH`.
fn find_proot_binary() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("proot"));
        }
    }
    candidates.push(PathBuf::from("/usr/bin/proot"));
    candidates.push(PathBuf::from("/usr/local/bin/proot"));

    for path in candidates {
        if path.is_file() {
            return Some(path);
        }
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join("proot"))
        .find(|p| p.is_file())
}

/// Check that a directory exists or create it.
pub fn ensure_dir(dir: &Path) -> crate::error::Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        crate::error::SkiffError::Other(format!("create directory {}: {e}", dir.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_dir_root() {
        assert_eq!(default_state_dir(0), PathBuf::from("/run/skiff"));
    }

    #[test]
    fn test_default_state_dir_rootless() {
        assert_eq!(default_state_dir(1000), PathBuf::from("/run/user/1000/skiff"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("a/b/c");
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }
}

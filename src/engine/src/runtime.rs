//! External OCI runtime adapter.
//!
//! The engine never executes container processes itself; it hands a
//! bundle to an implementation of [`ContainerRuntime`]. The shipped
//! [`CommandRuntime`] shells out to a `runc`-compatible binary; tests
//! substitute their own implementations.

use std::path::{Path, PathBuf};
use std::process::Command;

use skiff_core::error::{Result, SkiffError};

use crate::bundle::LockedBundle;

/// Launches processes inside bundles.
pub trait ContainerRuntime {
    /// Run the bundle's process to completion.
    fn run(&self, bundle: &LockedBundle) -> Result<()>;

    /// Signal a running container.
    fn kill(&self, container_id: &str, signal: &str) -> Result<()>;
}

/// Adapter invoking an external `runc`-compatible OCI runtime binary.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    binary: PathBuf,
    state_dir: PathBuf,
}

impl CommandRuntime {
    pub fn new(binary: &Path, state_dir: &Path) -> Self {
        Self {
            binary: binary.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--root").arg(&self.state_dir);
        cmd
    }
}

impl ContainerRuntime for CommandRuntime {
    fn run(&self, bundle: &LockedBundle) -> Result<()> {
        tracing::debug!(bundle = %bundle.id(), runtime = %self.binary.display(), "running container");
        let status = self
            .command()
            .arg("run")
            .arg("--bundle")
            .arg(bundle.dir())
            .arg(bundle.id())
            .status()
            .map_err(|e| {
                SkiffError::RuntimeError(format!(
                    "launch {}: {e}",
                    self.binary.display()
                ))
            })?;
        if !status.success() {
            return Err(SkiffError::RuntimeError(format!(
                "container {} exited with {status}",
                bundle.id()
            )));
        }
        Ok(())
    }

    fn kill(&self, container_id: &str, signal: &str) -> Result<()> {
        let status = self
            .command()
            .arg("kill")
            .arg(container_id)
            .arg(signal)
            .status()
            .map_err(|e| {
                SkiffError::RuntimeError(format!(
                    "launch {}: {e}",
                    self.binary.display()
                ))
            })?;
        if !status.success() {
            return Err(SkiffError::RuntimeError(format!(
                "kill {container_id}: runtime exited with {status}"
            )));
        }
        Ok(())
    }
}

//! CLI command definitions and dispatch.

mod bundle_create;
mod bundle_list;
mod bundle_run;
mod commit;
mod gc;
mod image_create;
mod image_list;
mod image_rm;
mod image_tag;
mod kill;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use skiff_core::error::Result;
use skiff_core::EngineConfig;
use skiff_engine::{CommandRuntime, Store};

/// skiff — a rootless container engine and image builder.
#[derive(Parser)]
#[command(name = "skiff", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub globals: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command; unset values fall back to the
/// environment (`STORE_DIR`, `STATE_DIR`, `PROOT_PATH`) and its
/// defaults.
#[derive(Args)]
pub struct GlobalArgs {
    /// Directory to store images and bundles
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Directory for OCI runtime state (should be tmpfs)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Manage images and containers as an unprivileged user
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    pub rootless: Option<bool>,

    /// PRoot binary location for user-id emulation
    #[arg(long, global = true)]
    pub proot_path: Option<PathBuf>,

    /// External OCI runtime binary
    #[arg(long, global = true, default_value = "runc")]
    pub runtime: PathBuf,

    /// Enable verbose log output
    #[arg(long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Resolve the engine configuration: flags over environment.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(rootless) = self.rootless {
            config.rootless = rootless;
        }
        if let Some(proot) = &self.proot_path {
            config.proot_path = Some(proot.clone());
        }
        config
    }

    pub fn open_store(&self) -> Result<(EngineConfig, Store)> {
        let config = self.config();
        let store = Store::open(&config.store_dir, config.rootless)?;
        Ok((config, store))
    }

    pub fn runtime(&self, config: &EngineConfig) -> CommandRuntime {
        CommandRuntime::new(&self.runtime, &config.state_dir)
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Manage images
    #[command(subcommand)]
    Image(ImageCommand),
    /// Manage bundles
    #[command(subcommand)]
    Bundle(BundleCommand),
    /// Commit a bundle's filesystem changes as a new image
    Commit(commit::CommitArgs),
    /// Signal a running container
    Kill(kill::KillArgs),
    /// Garbage-collect unused bundles and unreachable blobs
    Gc(gc::GcArgs),
}

#[derive(Subcommand)]
pub enum ImageCommand {
    /// Build an image from a Dockerfile
    Create(image_create::ImageCreateArgs),
    /// List images
    List(image_list::ImageListArgs),
    /// Add a tag to an existing image
    Tag(image_tag::ImageTagArgs),
    /// Remove an image tag
    Rm(image_rm::ImageRmArgs),
}

#[derive(Subcommand)]
pub enum BundleCommand {
    /// Create a bundle from an image
    Create(bundle_create::BundleCreateArgs),
    /// List bundles
    List(bundle_list::BundleListArgs),
    /// Run a bundle through the external runtime
    Run(bundle_run::BundleRunArgs),
}

/// Dispatch a parsed CLI to the matching command handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Image(ImageCommand::Create(args)) => image_create::execute(&cli.globals, args),
        Command::Image(ImageCommand::List(args)) => image_list::execute(&cli.globals, args),
        Command::Image(ImageCommand::Tag(args)) => image_tag::execute(&cli.globals, args),
        Command::Image(ImageCommand::Rm(args)) => image_rm::execute(&cli.globals, args),
        Command::Bundle(BundleCommand::Create(args)) => {
            bundle_create::execute(&cli.globals, args)
        }
        Command::Bundle(BundleCommand::List(args)) => bundle_list::execute(&cli.globals, args),
        Command::Bundle(BundleCommand::Run(args)) => bundle_run::execute(&cli.globals, args),
        Command::Commit(args) => commit::execute(&cli.globals, args),
        Command::Kill(args) => kill::execute(&cli.globals, args),
        Command::Gc(args) => gc::execute(&cli.globals, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_image_create() {
        let cli = Cli::try_parse_from([
            "skiff",
            "image",
            "create",
            "--tag",
            "app:v1",
            "--build-arg",
            "VERSION=1",
            ".",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Image(ImageCommand::Create(_))
        ));
    }

    #[test]
    fn test_global_flags_apply_anywhere() {
        let cli = Cli::try_parse_from([
            "skiff",
            "image",
            "list",
            "--store-dir",
            "/tmp/store",
            "--rootless",
        ])
        .unwrap();
        assert_eq!(cli.globals.store_dir.as_deref(), Some("/tmp/store".as_ref()));
        assert_eq!(cli.globals.rootless, Some(true));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["skiff", "frobnicate"]).is_err());
    }
}

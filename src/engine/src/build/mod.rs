//! Image building: Dockerfile parsing, the build cache and the engine.

mod cache;
mod dockerfile;
mod engine;

pub use cache::BuildCache;
pub use dockerfile::Dockerfile;
pub use engine::{BuildEngine, BuildOptions};

use std::path::Path;

use skiff_core::error::{Context, Result};
use skiff_core::idmap::UserSpec;

/// The capability set a build operation may use.
///
/// The engine implements this against the stores; parser tests drive a
/// recording double instead.
pub trait ImageBuilder {
    /// Register a name (stage index or alias) for the current image.
    fn build_name(&mut self, name: &str);
    /// Start a stage from an image reference, or from nothing for
    /// `scratch`.
    fn from_image(&mut self, image: &str) -> Result<()>;
    fn set_author(&mut self, author: &str) -> Result<()>;
    fn set_working_dir(&mut self, dir: &str) -> Result<()>;
    fn set_entrypoint(&mut self, entrypoint: Vec<String>) -> Result<()>;
    fn set_cmd(&mut self, cmd: Vec<String>) -> Result<()>;
    fn add_env(&mut self, env: Vec<(String, String)>) -> Result<()>;
    fn add_labels(&mut self, labels: Vec<(String, String)>) -> Result<()>;
    fn add_exposed_ports(&mut self, ports: Vec<String>) -> Result<()>;
    fn add_volumes(&mut self, volumes: Vec<String>) -> Result<()>;
    fn set_user(&mut self, user: &str) -> Result<()>;
    fn set_stop_signal(&mut self, signal: &str) -> Result<()>;
    /// COPY from the build context.
    fn copy_files(
        &mut self,
        context_dir: &Path,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()>;
    /// COPY --from: sources come from an earlier stage or another image.
    fn copy_files_from_image(
        &mut self,
        source: &str,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()>;
    /// ADD from the build context.
    fn add_files(
        &mut self,
        context_dir: &Path,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()>;
    /// Execute a command inside a bundle and commit the diff.
    fn run(&mut self, args: Vec<String>, env: Vec<(String, String)>) -> Result<()>;
    /// Tag the current image.
    fn tag(&mut self, name: &str) -> Result<()>;
}

/// One build operation, parameterised and inspectable.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOp {
    From {
        image: String,
        alias: Option<String>,
    },
    SetAuthor {
        author: String,
    },
    SetWorkingDir {
        dir: String,
    },
    SetEntrypoint {
        entrypoint: Vec<String>,
    },
    SetCmd {
        cmd: Vec<String>,
    },
    AddEnv {
        env: Vec<(String, String)>,
    },
    AddLabels {
        labels: Vec<(String, String)>,
    },
    AddExposedPorts {
        ports: Vec<String>,
    },
    AddVolumes {
        volumes: Vec<String>,
    },
    SetUser {
        user: String,
    },
    SetStopSignal {
        signal: String,
    },
    Copy {
        from: Option<String>,
        patterns: Vec<String>,
        dest: String,
        chown: Option<String>,
    },
    Add {
        patterns: Vec<String>,
        dest: String,
        chown: Option<String>,
    },
    Run {
        args: Vec<String>,
        env: Vec<(String, String)>,
    },
}

/// An operation with its Dockerfile position for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedOp {
    pub op: BuildOp,
    pub line: usize,
    pub instruction: String,
}

/// Drive a builder through an operation list.
///
/// Stage names (the running index and any `AS` alias) are registered
/// right after each `FROM` so later `COPY --from` references resolve.
pub fn apply(
    ops: &[PositionedOp],
    context_dir: &Path,
    builder: &mut dyn ImageBuilder,
) -> Result<()> {
    let mut stage_count = 0usize;
    for positioned in ops {
        apply_op(positioned, &mut stage_count, context_dir, builder)
            .context(&format!(
                "line {}: {}",
                positioned.line, positioned.instruction
            ))
            .context("apply dockerfile")?;
    }
    Ok(())
}

fn apply_op(
    positioned: &PositionedOp,
    stage_count: &mut usize,
    context_dir: &Path,
    builder: &mut dyn ImageBuilder,
) -> Result<()> {
    match &positioned.op {
        BuildOp::From { image, alias } => {
            builder.from_image(image)?;
            builder.build_name(&stage_count.to_string());
            *stage_count += 1;
            if let Some(alias) = alias {
                builder.build_name(alias);
            }
            Ok(())
        }
        BuildOp::SetAuthor { author } => builder.set_author(author),
        BuildOp::SetWorkingDir { dir } => builder.set_working_dir(dir),
        BuildOp::SetEntrypoint { entrypoint } => builder.set_entrypoint(entrypoint.clone()),
        BuildOp::SetCmd { cmd } => builder.set_cmd(cmd.clone()),
        BuildOp::AddEnv { env } => builder.add_env(env.clone()),
        BuildOp::AddLabels { labels } => builder.add_labels(labels.clone()),
        BuildOp::AddExposedPorts { ports } => builder.add_exposed_ports(ports.clone()),
        BuildOp::AddVolumes { volumes } => builder.add_volumes(volumes.clone()),
        BuildOp::SetUser { user } => builder.set_user(user),
        BuildOp::SetStopSignal { signal } => builder.set_stop_signal(signal),
        BuildOp::Copy {
            from,
            patterns,
            dest,
            chown,
        } => {
            let chown = chown.as_deref().map(UserSpec::parse);
            match from {
                Some(source) => {
                    builder.copy_files_from_image(source, patterns, dest, chown.as_ref())
                }
                None => builder.copy_files(context_dir, patterns, dest, chown.as_ref()),
            }
        }
        BuildOp::Add {
            patterns,
            dest,
            chown,
        } => {
            let chown = chown.as_deref().map(UserSpec::parse);
            builder.add_files(context_dir, patterns, dest, chown.as_ref())
        }
        BuildOp::Run { args, env } => builder.run(args.clone(), env.clone()),
    }
}

//! `skiff image create` — build an image from a Dockerfile.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use skiff_core::error::{Result, SkiffError};
use skiff_engine::{BuildEngine, BuildOptions, Dockerfile, NoImporter};

use super::GlobalArgs;

#[derive(Args)]
pub struct ImageCreateArgs {
    /// Build context directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Path to the Dockerfile (default: <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Name and optional tag for the built image
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Build-time variables (KEY=VALUE), repeatable
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,
}

pub fn execute(globals: &GlobalArgs, args: ImageCreateArgs) -> Result<()> {
    let context_dir = args.path.canonicalize().map_err(|e| {
        SkiffError::InvalidInput(format!(
            "invalid build context {}: {e}",
            args.path.display()
        ))
    })?;
    let dockerfile_path = match &args.file {
        Some(file) if file.is_absolute() => file.clone(),
        Some(file) => context_dir.join(file),
        None => context_dir.join("Dockerfile"),
    };
    let build_args = parse_build_args(&args.build_arg)?;
    let dockerfile = Dockerfile::from_file(&dockerfile_path, &build_args)?;

    let (config, store) = globals.open_store()?;
    let runtime = globals.runtime(&config);
    let images = store.images().open_locked()?;

    let options = BuildOptions {
        rootless: config.rootless,
        proot_path: config.proot_path.clone(),
    };
    let mut engine = BuildEngine::new(
        &images,
        store.bundles(),
        store.build_cache(),
        &runtime,
        &NoImporter,
        options,
    );
    dockerfile.apply(&context_dir, &mut engine)?;
    let image = engine.finish()?;

    if let Some(tag) = &args.tag {
        images.tag_image(image.id(), tag)?;
    }
    println!("{}", image.id());
    Ok(())
}

/// Parse KEY=VALUE pairs.
fn parse_build_args(args: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for arg in args {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            SkiffError::InvalidInput(format!("invalid build arg (expected KEY=VALUE): {arg}"))
        })?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

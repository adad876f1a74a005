//! `skiff bundle run` — run a bundle through the external runtime.

use clap::Args;
use skiff_core::error::Result;
use skiff_engine::ContainerRuntime;

use super::GlobalArgs;

#[derive(Args)]
pub struct BundleRunArgs {
    /// Bundle id
    pub bundle: String,
}

pub fn execute(globals: &GlobalArgs, args: BundleRunArgs) -> Result<()> {
    let (config, store) = globals.open_store()?;
    let bundle = store.bundles().bundle(&args.bundle)?.lock()?;
    globals.runtime(&config).run(&bundle)
}

//! `skiff gc` — collect expired bundles and unreachable blobs.

use std::time::{Duration, SystemTime};

use clap::Args;
use skiff_core::error::Result;

use super::GlobalArgs;

#[derive(Args)]
pub struct GcArgs {
    /// Minimum bundle age in seconds before collection
    #[arg(long, default_value_t = 1800)]
    pub bundle_max_age: u64,
}

pub fn execute(globals: &GlobalArgs, args: GcArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;

    let cutoff = SystemTime::now() - Duration::from_secs(args.bundle_max_age);
    let bundles = store.bundles().gc(cutoff)?;
    for id in &bundles {
        println!("bundle {id}");
    }

    let images = store.images().open_locked()?;
    let blobs = images.gc()?;
    println!("collected {} bundles, {} blobs", bundles.len(), blobs.len());
    Ok(())
}

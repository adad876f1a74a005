//! `skiff image rm` — remove image tags.

use clap::Args;
use skiff_core::error::Result;

use super::GlobalArgs;

#[derive(Args)]
pub struct ImageRmArgs {
    /// Image names to remove
    #[arg(required = true)]
    pub names: Vec<String>,
}

pub fn execute(globals: &GlobalArgs, args: ImageRmArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;
    let images = store.images().open_locked()?;
    for name in &args.names {
        images.untag(name)?;
        println!("{name}");
    }
    Ok(())
}

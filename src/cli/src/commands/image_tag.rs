//! `skiff image tag` — add a tag to an existing image.

use clap::Args;
use skiff_core::error::Result;
use skiff_engine::Digest;

use super::GlobalArgs;

#[derive(Args)]
pub struct ImageTagArgs {
    /// Source image: a name:tag or an image id digest
    pub source: String,

    /// New name:tag
    pub target: String,
}

pub fn execute(globals: &GlobalArgs, args: ImageTagArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;
    let images = store.images().open_locked()?;

    let id = match Digest::parse(&args.source) {
        Ok(digest) => digest,
        Err(_) => images.image_by_name(&args.source)?.id().clone(),
    };
    let image = images.tag_image(&id, &args.target)?;
    println!("{}", image.id());
    Ok(())
}

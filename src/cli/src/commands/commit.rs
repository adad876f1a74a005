//! `skiff commit` — commit a bundle's filesystem changes as an image.

use clap::Args;
use skiff_core::error::Result;

use super::GlobalArgs;

#[derive(Args)]
pub struct CommitArgs {
    /// Bundle id
    pub bundle: String,

    /// Name for the committed image
    pub name: Option<String>,

    /// Author of the new layer
    #[arg(short, long)]
    pub author: Option<String>,

    /// Comment for the new layer
    #[arg(short, long, default_value = "commit")]
    pub comment: String,
}

pub fn execute(globals: &GlobalArgs, args: CommitArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;
    let bundle = store.bundles().bundle(&args.bundle)?.lock()?;
    let images = store.images().open_locked()?;

    let parent = match bundle.parent_image()? {
        Some(id) => Some(images.image(&id)?),
        None => None,
    };
    let prior = images.fsspecs().get(&bundle.fsspec_digest().map_err(|e| {
        e.context("commit needs the bundle's fs-spec snapshot")
    })?)?;

    let (image, new_spec) = images.add_image_layer(
        &bundle.rootfs(),
        parent.as_ref(),
        &prior,
        args.author.as_deref(),
        &args.comment,
    )?;
    bundle.set_parent(image.id(), &images.fsspecs().put(&new_spec)?)?;

    if let Some(name) = &args.name {
        images.tag_image(image.id(), name)?;
    }
    println!("{}", image.id());
    Ok(())
}

//! `skiff bundle list` — list bundles.

use clap::Args;
use skiff_core::error::Result;

use super::GlobalArgs;

#[derive(Args)]
pub struct BundleListArgs {}

pub fn execute(globals: &GlobalArgs, _args: BundleListArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;
    println!("{:<16} {:<24} IMAGE", "ID", "CREATED");
    for bundle in store.bundles().bundles()? {
        let created = bundle
            .created()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let image = bundle
            .parent_image()
            .ok()
            .flatten()
            .map(|d| d.hex()[..12].to_string())
            .unwrap_or_else(|| "<none>".to_string());
        println!("{:<16} {:<24} {}", bundle.id(), created, image);
    }
    Ok(())
}

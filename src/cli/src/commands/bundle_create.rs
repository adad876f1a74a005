//! `skiff bundle create` — compose a runtime bundle from an image.

use clap::Args;
use skiff_core::error::Result;
use skiff_core::idmap::UserSpec;
use skiff_engine::SpecBuilder;

use super::GlobalArgs;

#[derive(Args)]
pub struct BundleCreateArgs {
    /// Image to materialise into the bundle
    pub image: String,

    /// Bundle id (generated when omitted)
    #[arg(short = 'b', long = "bundle")]
    pub bundle: Option<String>,

    /// Override the container user (name[:group] or uid[:gid])
    #[arg(long)]
    pub user: Option<String>,

    /// Share the host network namespace
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
    pub host_network: bool,

    /// Disable the default seccomp profile
    #[arg(long)]
    pub seccomp_unconfined: bool,

    /// Publish a port through PRoot (published:target), repeatable
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,
}

pub fn execute(globals: &GlobalArgs, args: BundleCreateArgs) -> Result<()> {
    let (config, store) = globals.open_store()?;
    let image = store.images().image_by_name(&args.image)?;

    let mut builder = SpecBuilder::new();
    builder.apply_image(image.config());
    if config.rootless {
        builder.to_rootless();
    }
    if let Some(proot) = &config.proot_path {
        builder.set_proot_path(proot);
    }
    if args.host_network {
        builder.use_host_network();
    }
    if args.seccomp_unconfined {
        builder.set_seccomp_unconfined();
    }
    if let Some(user) = &args.user {
        builder.set_process_user(UserSpec::parse(user));
    }
    for mapping in &args.publish {
        let (published, target) = mapping.split_once(':').unwrap_or((mapping.as_str(), ""));
        builder.add_proot_port_mapping(published, target);
    }

    let bundle = store.bundles().create(
        args.bundle.as_deref(),
        Some(&image),
        store.images(),
        &mut builder,
    )?;
    println!("{}", bundle.id());
    Ok(())
}

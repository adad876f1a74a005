//! `skiff kill` — signal a running container.

use clap::Args;
use skiff_core::error::Result;
use skiff_engine::ContainerRuntime;

use super::GlobalArgs;

#[derive(Args)]
pub struct KillArgs {
    /// Container (bundle) id
    pub container: String,

    /// Signal to send
    #[arg(default_value = "SIGTERM")]
    pub signal: String,
}

pub fn execute(globals: &GlobalArgs, args: KillArgs) -> Result<()> {
    let config = globals.config();
    globals
        .runtime(&config)
        .kill(&args.container, &args.signal)
}

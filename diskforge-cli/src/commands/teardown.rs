use std::path::PathBuf;

use clap::Args;
use diskforge::LoopDevice;

#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Build root whose ESP and rootfs mounts should be released
    #[arg(long)]
    pub rootfs_dir: PathBuf,

    /// Loop device to detach, e.g. /dev/loop3
    #[arg(long)]
    pub loop_device: Option<PathBuf>,
}

pub fn execute(args: TeardownArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runner = global.runner();

    diskforge::mount::unmount_all(runner.as_ref(), &args.rootfs_dir)?;

    if let Some(path) = args.loop_device {
        let mut device = LoopDevice::from_path(path);
        if device.exists() {
            device.detach(runner.as_ref())?;
        } else {
            tracing::info!("{} does not exist, removing leftover nodes", device.path().display());
            device.remove_partition_nodes()?;
        }
    }

    Ok(())
}

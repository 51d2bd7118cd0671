use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct PartuuidArgs {
    /// Partition device, e.g. /dev/loop3p2
    pub device: PathBuf,
}

pub fn execute(args: PartuuidArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runner = global.runner();
    let uuid = diskforge::identify::partition_uuid(runner.as_ref(), &args.device)?;
    println!("{}", uuid);
    Ok(())
}

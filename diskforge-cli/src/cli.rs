use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use diskforge::{HostRunner, SystemRunner};

use crate::commands::{build::BuildArgs, partuuid::PartuuidArgs, teardown::TeardownArgs};

/// diskforge - build bootable VM disk images (GPT, ESP + rootfs)
#[derive(Parser, Debug)]
#[command(name = "diskforge", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, partition, format and mount a disk image
    Build(BuildArgs),

    /// Unmount a build root and release its loop device
    Teardown(TeardownArgs),

    /// Print the PARTUUID of a partition device
    Partuuid(PartuuidArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, env = "DISKFORGE_LOG", default_value = "info")]
    pub log_level: String,

    /// Kill any host tool that runs longer than this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub command_timeout: Option<u64>,
}

impl GlobalFlags {
    pub fn runner(&self) -> Arc<dyn HostRunner> {
        match self.command_timeout {
            Some(secs) => Arc::new(SystemRunner::with_default_timeout(Duration::from_secs(
                secs,
            ))),
            None => Arc::new(SystemRunner::new()),
        }
    }
}

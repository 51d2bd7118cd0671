use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use diskforge::{BuildOptions, CancelHandle, DiskImageBuilder};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// JSON file with build options; flags below override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disk image file to create
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Directory the rootfs partition is mounted at
    #[arg(long)]
    pub rootfs_dir: Option<PathBuf>,

    /// Root filesystem: ext4 or btrfs [default: ext4]
    #[arg(long)]
    pub filesystem: Option<String>,

    /// Image size in bytes [default: 4294967296]
    #[arg(long)]
    pub size: Option<u64>,

    /// Don't create missing partition device nodes (udev handles them)
    #[arg(long)]
    pub no_reconcile: bool,

    /// Leave the image attached and mounted for later pipeline stages
    #[arg(long)]
    pub keep_mounted: bool,
}

/// Printed to stdout as JSON on success.
#[derive(Debug, Serialize)]
struct BuildSummary {
    image: PathBuf,
    rootfs_dir: PathBuf,
    filesystem: String,
    size: u64,
    loop_device: Option<PathBuf>,
    rootfs_partuuid: String,
    uefi_partuuid: String,
    mounted: bool,
}

pub fn execute(args: BuildArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = resolve_options(&args, global)?;
    let mut builder = DiskImageBuilder::from_options(&options)?;

    let cancel = CancelHandle::new();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .context("Failed to register signal handler")?;
    }

    let summary = if args.keep_mounted {
        builder.prepare(&cancel)?;
        match summarize(&builder, true) {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(teardown) = builder.teardown() {
                    tracing::warn!("Teardown after failure also failed: {}", teardown);
                }
                return Err(e.into());
            }
        }
    } else {
        builder.with_mounted(&cancel, |vm| summarize(vm, false))?
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn summarize(vm: &DiskImageBuilder, mounted: bool) -> diskforge::DiskResult<BuildSummary> {
    let image = vm.image();
    Ok(BuildSummary {
        image: image.path().to_path_buf(),
        rootfs_dir: image.rootfs_dir().to_path_buf(),
        filesystem: image.filesystem().to_string(),
        size: image.size(),
        loop_device: if mounted {
            vm.loop_device().map(Path::to_path_buf)
        } else {
            None
        },
        rootfs_partuuid: vm.rootfs_partition_uuid()?,
        uefi_partuuid: vm.uefi_partition_uuid()?,
        mounted,
    })
}

fn resolve_options(
    args: &BuildArgs,
    global: &crate::cli::GlobalFlags,
) -> anyhow::Result<BuildOptions> {
    let mut options = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let image = args
                .image
                .clone()
                .context("--image is required without --config")?;
            let rootfs_dir = args
                .rootfs_dir
                .clone()
                .context("--rootfs-dir is required without --config")?;
            BuildOptions::new(image, rootfs_dir)
        }
    };

    if let Some(image) = &args.image {
        options.image_path = image.clone();
    }
    if let Some(rootfs_dir) = &args.rootfs_dir {
        options.rootfs_dir = rootfs_dir.clone();
    }
    if let Some(filesystem) = &args.filesystem {
        options.filesystem = filesystem.clone();
    }
    if let Some(size) = args.size {
        options.size = size;
    }
    if args.no_reconcile {
        options.reconcile_device_nodes = false;
    }
    if global.command_timeout.is_some() {
        options.command_timeout_secs = global.command_timeout;
    }

    Ok(options)
}

fn load_config(path: &Path) -> anyhow::Result<BuildOptions> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

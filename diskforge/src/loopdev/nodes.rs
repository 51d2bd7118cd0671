//! Partition device node reconciliation.
//!
//! With partition scanning the kernel knows about `<loop>p1` and `<loop>p2`
//! right after attach, but the device files only appear if udev creates
//! them. Inside a build container there usually is no udev, so the nodes
//! are created here from the numbers lsblk reports.

use std::io;
use std::path::Path;

use super::LoopDevice;
use crate::disk::constants::partition::{DEVICE_NODE_MODE, ESP_INDEX, ROOTFS_INDEX};
use crate::error::{DiskError, DiskResult};
use crate::runner::{HostCommand, HostRunner};

/// Parse `lsblk --raw --output MAJ:MIN --noheadings` output.
///
/// Entry 0 is the loop device itself, entry N is partition N.
pub fn parse_device_numbers(output: &str) -> io::Result<Vec<(u64, u64)>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_maj_min)
        .collect()
}

fn parse_maj_min(field: &str) -> io::Result<(u64, u64)> {
    let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

    let (major, minor) = field
        .split_once(':')
        .ok_or_else(|| invalid(format!("expected MAJ:MIN, got {:?}", field)))?;

    let major = major
        .parse()
        .map_err(|e| invalid(format!("failed to parse major {:?}: {}", major, e)))?;
    let minor = minor
        .parse()
        .map_err(|e| invalid(format!("failed to parse minor {:?}: {}", minor, e)))?;

    Ok((major, minor))
}

/// Create the ESP and rootfs device nodes of `device` if they are missing.
///
/// Nodes that already exist are left alone, and lsblk is not consulted at
/// all when both exist, so this is safe to call repeatedly and costs
/// nothing on hosts where udev does its job.
pub fn reconcile_partition_nodes(runner: &dyn HostRunner, device: &LoopDevice) -> DiskResult<()> {
    let missing: Vec<u8> = [ESP_INDEX, ROOTFS_INDEX]
        .into_iter()
        .filter(|index| !device.partition(*index).exists())
        .collect();

    if missing.is_empty() {
        tracing::debug!(
            "Partition nodes of {} already present",
            device.path().display()
        );
        return Ok(());
    }

    let cmd = HostCommand::new("lsblk")
        .args(["--raw", "--output", "MAJ:MIN", "--noheadings"])
        .arg(device.path());
    let output = runner
        .run(&cmd)
        .map_err(|source| DiskError::PartitionScan {
            device: device.path().to_path_buf(),
            source,
        })?;
    let numbers =
        parse_device_numbers(&output).map_err(|e| DiskError::device_node(device.path(), e))?;

    for index in missing {
        let node = device.partition(index);
        let (major, minor) = numbers.get(usize::from(index)).copied().ok_or_else(|| {
            DiskError::device_node(
                &node,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("lsblk reported no partition {}", index),
                ),
            )
        })?;

        create_node(runner, &node, major, minor)?;
    }

    Ok(())
}

fn create_node(runner: &dyn HostRunner, node: &Path, major: u64, minor: u64) -> DiskResult<()> {
    runner
        .make_block_device(node, major, minor, DEVICE_NODE_MODE)
        .map_err(|e| DiskError::device_node(node, e))?;

    tracing::info!("Created block device {} ({}:{})", node.display(), major, minor);
    Ok(())
}

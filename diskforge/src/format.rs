//! Filesystem creation on the partition devices.
//!
//! The rootfs kind is a closed set, so each kind gets its own handler
//! below rather than a trait object.

use std::path::{Path, PathBuf};

use crate::disk::FilesystemKind;
use crate::disk::constants::fs::{
    BTRFS_ROOT_SUBVOLUME, ESP_FAT_SIZE, ESP_LABEL, EXT4_BLOCK_SIZE, EXT4_INODE_RATIO,
    EXT4_RESERVED_PERCENT, EXT4_RESIZE_BLOCKS, ROOTFS_LABEL,
};
use crate::error::{DiskError, DiskResult};
use crate::mount;
use crate::runner::{HostCommand, HostRunner};

/// mkfs invocation for the rootfs partition.
pub fn rootfs_mkfs_command(kind: FilesystemKind, device: &Path) -> HostCommand {
    match kind {
        // https://man7.org/linux/man-pages/man8/mke2fs.8.html
        // -F: force, the target is a partition of a loop device
        // -m 0: no reserved blocks, the image is not a multi-user host
        // -E resize=: reserve GDT blocks so the image can be grown later
        FilesystemKind::Ext4 => HostCommand::new("mkfs.ext4")
            .arg("-F")
            .arg("-b")
            .arg(EXT4_BLOCK_SIZE.to_string())
            .arg("-i")
            .arg(EXT4_INODE_RATIO.to_string())
            .arg("-m")
            .arg(EXT4_RESERVED_PERCENT.to_string())
            .args(["-L", ROOTFS_LABEL])
            .arg("-E")
            .arg(format!("resize={}", EXT4_RESIZE_BLOCKS))
            .arg(device),
        FilesystemKind::Btrfs => HostCommand::new("mkfs.btrfs")
            .arg("-f")
            .args(["-L", ROOTFS_LABEL])
            .arg(device),
    }
}

/// mkfs invocation for the ESP partition.
pub fn esp_mkfs_command(device: &Path) -> HostCommand {
    HostCommand::new("mkfs.vfat")
        .args(["-F", ESP_FAT_SIZE, "-n", ESP_LABEL])
        .arg(device)
}

/// Create the root filesystem on `device`.
///
/// For btrfs this also creates the `@` subvolume, which needs the fresh
/// filesystem mounted at `rootfs_dir` for a moment. That mount is gone
/// again when this returns, whether or not the subvolume was created.
pub fn create_rootfs(
    runner: &dyn HostRunner,
    kind: FilesystemKind,
    device: &Path,
    rootfs_dir: &Path,
) -> DiskResult<()> {
    tracing::info!("Formatting {} with {}", device.display(), kind);

    mkfs(runner, rootfs_mkfs_command(kind, device), device)?;

    match kind {
        FilesystemKind::Ext4 => {}
        FilesystemKind::Btrfs => create_root_subvolume(runner, device, rootfs_dir)?,
    }

    tracing::info!("Formatted {} successfully", device.display());
    Ok(())
}

/// Create the FAT32 ESP filesystem on `device`.
pub fn create_esp(runner: &dyn HostRunner, device: &Path) -> DiskResult<()> {
    tracing::info!("Formatting {} with vfat", device.display());
    mkfs(runner, esp_mkfs_command(device), device)
}

fn mkfs(runner: &dyn HostRunner, cmd: HostCommand, device: &Path) -> DiskResult<()> {
    runner.run(&cmd).map_err(|source| DiskError::Format {
        device: device.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn create_root_subvolume(
    runner: &dyn HostRunner,
    device: &Path,
    rootfs_dir: &Path,
) -> DiskResult<()> {
    mount::ensure_dir(rootfs_dir)?;
    let guard = TemporaryMount::mount(runner, device, rootfs_dir)?;

    let subvolume = rootfs_dir.join(BTRFS_ROOT_SUBVOLUME);
    let cmd = HostCommand::new("btrfs")
        .args(["subvolume", "create"])
        .arg(&subvolume);

    // On failure the guard unmounts while the error propagates.
    runner.run(&cmd).map_err(|source| DiskError::Format {
        device: device.to_path_buf(),
        source,
    })?;
    tracing::debug!("Created btrfs subvolume {}", subvolume.display());

    guard.release()
}

/// Mount that is undone when dropped.
///
/// [`TemporaryMount::release`] unmounts and reports failure; dropping
/// without release (error paths) unmounts and only logs.
struct TemporaryMount<'a> {
    runner: &'a dyn HostRunner,
    target: PathBuf,
    active: bool,
}

impl<'a> TemporaryMount<'a> {
    fn mount(runner: &'a dyn HostRunner, device: &Path, target: &Path) -> DiskResult<Self> {
        let cmd = HostCommand::new("mount").arg(device).arg(target);
        runner.run(&cmd).map_err(|source| DiskError::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            source,
        })?;

        Ok(Self {
            runner,
            target: target.to_path_buf(),
            active: true,
        })
    }

    fn release(mut self) -> DiskResult<()> {
        self.active = false;
        mount::umount(self.runner, &self.target)
    }
}

impl Drop for TemporaryMount<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        if let Err(e) = mount::umount(self.runner, &self.target) {
            tracing::warn!(
                "Failed to unwind temporary mount {}: {}",
                self.target.display(),
                e
            );
        }
    }
}

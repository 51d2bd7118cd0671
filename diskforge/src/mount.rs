//! Mounting the image partitions into the build root.
//!
//! The ESP mount point lives inside the rootfs, so the root goes first on
//! the way up and last on the way down.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::disk::FilesystemKind;
use crate::disk::constants::fs::BTRFS_ROOT_SUBVOLUME;
use crate::disk::constants::mount::{EFI_MOUNT_DIR, EFI_MOUNT_DIR_MODE};
use crate::error::{DiskError, DiskResult};
use crate::runner::{HostCommand, HostRunner};

/// `<rootfs_dir>/boot/efi`.
pub fn esp_mount_point(rootfs_dir: &Path) -> PathBuf {
    rootfs_dir.join(EFI_MOUNT_DIR)
}

/// Mount options for the rootfs partition, if the kind needs any.
///
/// Btrfs must select the `@` subvolume explicitly; without it the
/// top-level volume would become the build root.
pub fn rootfs_mount_options(kind: FilesystemKind) -> Option<String> {
    match kind {
        FilesystemKind::Ext4 => None,
        FilesystemKind::Btrfs => Some(format!("defaults,subvol=/{}", BTRFS_ROOT_SUBVOLUME)),
    }
}

/// Mount the rootfs partition at `rootfs_dir`.
pub fn mount_rootfs(
    runner: &dyn HostRunner,
    kind: FilesystemKind,
    device: &Path,
    rootfs_dir: &Path,
) -> DiskResult<()> {
    ensure_dir(rootfs_dir)?;

    let mut cmd = HostCommand::new("mount").arg(device).arg(rootfs_dir);
    if let Some(options) = rootfs_mount_options(kind) {
        cmd = cmd.args(["-o", options.as_str()]);
    }

    mount(runner, cmd, device, rootfs_dir)
}

/// Mount the ESP partition at `<rootfs_dir>/boot/efi`.
///
/// Call only after [`mount_rootfs`] succeeded, otherwise the directory
/// would be created in the host's view of `rootfs_dir` and shadowed later.
pub fn mount_esp(runner: &dyn HostRunner, device: &Path, rootfs_dir: &Path) -> DiskResult<()> {
    let mount_point = esp_mount_point(rootfs_dir);
    ensure_dir(&mount_point)?;

    let cmd = HostCommand::new("mount").arg(device).arg(&mount_point);
    mount(runner, cmd, device, &mount_point)
}

/// Unmount the ESP, then the rootfs. Targets not mounted are skipped.
pub fn unmount_all(runner: &dyn HostRunner, rootfs_dir: &Path) -> DiskResult<()> {
    umount_if_mounted(runner, &esp_mount_point(rootfs_dir))?;
    umount_if_mounted(runner, rootfs_dir)
}

/// Unmount `target` unless it is not a mount point.
pub fn umount_if_mounted(runner: &dyn HostRunner, target: &Path) -> DiskResult<()> {
    let mounted = runner
        .is_mounted(target)
        .map_err(|e| DiskError::io("inspect mounts for", target, e))?;

    if !mounted {
        tracing::debug!("{} is not mounted, skipping", target.display());
        return Ok(());
    }

    umount(runner, target)
}

/// Unconditional `umount <target>`.
pub(crate) fn umount(runner: &dyn HostRunner, target: &Path) -> DiskResult<()> {
    let cmd = HostCommand::new("umount").arg(target);
    runner.run(&cmd).map_err(|source| DiskError::Unmount {
        target: target.to_path_buf(),
        source,
    })?;

    tracing::info!("Unmounted {}", target.display());
    Ok(())
}

pub(crate) fn ensure_dir(path: &Path) -> DiskResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(EFI_MOUNT_DIR_MODE)
        .create(path)
        .map_err(|e| DiskError::io("create directory", path, e))
}

fn mount(runner: &dyn HostRunner, cmd: HostCommand, device: &Path, target: &Path) -> DiskResult<()> {
    runner.run(&cmd).map_err(|source| DiskError::Mount {
        device: device.to_path_buf(),
        target: target.to_path_buf(),
        source,
    })?;

    tracing::info!("Mounted {} → {}", device.display(), target.display());
    Ok(())
}

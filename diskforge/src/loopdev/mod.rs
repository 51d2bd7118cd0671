//! Loop device lease.
//!
//! A [`LoopDevice`] is the host-side binding of an image file to a kernel
//! loop device. Loop devices are global host state: nothing here can stop
//! another process from racing for the same pool, so concurrent builds must
//! be serialized or isolated (separate containers) by whoever drives them.

mod nodes;

use std::fs;
use std::path::{Path, PathBuf};

use crate::disk::constants::partition::{ESP_INDEX, ROOTFS_INDEX};
use crate::error::{CommandError, DiskError, DiskResult};
use crate::runner::{HostCommand, HostRunner};

pub use nodes::{parse_device_numbers, reconcile_partition_nodes};

/// A loop device bound to a disk image with partition scanning enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    path: PathBuf,
    /// Set once `losetup -d` succeeded, so a retried detach only removes
    /// the leftover partition nodes.
    unbound: bool,
}

impl LoopDevice {
    /// Bind `image` to the next free loop device (`losetup -P -f --show`).
    pub fn attach(runner: &dyn HostRunner, image: &Path) -> DiskResult<Self> {
        let cmd = HostCommand::new("losetup")
            .args(["-P", "-f", "--show"])
            .arg(image);

        let attach_err = |source: CommandError| DiskError::Attach {
            image: image.to_path_buf(),
            source,
        };

        let stdout = runner.run(&cmd).map_err(attach_err)?;
        let device = stdout.trim();
        if device.is_empty() {
            return Err(attach_err(CommandError::unexpected_output("losetup", stdout)));
        }

        tracing::info!("Attached {} to {}", image.display(), device);
        Ok(Self {
            path: PathBuf::from(device),
            unbound: false,
        })
    }

    /// Adopt a loop device attached by an earlier process.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            unbound: false,
        }
    }

    /// Loop device path, e.g. `/dev/loop4`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partition device path, e.g. `/dev/loop4p2` for `index == 2`.
    pub fn partition(&self, index: u8) -> PathBuf {
        let mut path = self.path.as_os_str().to_owned();
        path.push(format!("p{}", index));
        path.into()
    }

    /// ESP partition device (`p1`).
    pub fn esp_partition(&self) -> PathBuf {
        self.partition(ESP_INDEX)
    }

    /// Root filesystem partition device (`p2`).
    pub fn rootfs_partition(&self) -> PathBuf {
        self.partition(ROOTFS_INDEX)
    }

    /// Whether the loop device node still exists on the host.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create any missing partition nodes. See [`reconcile_partition_nodes`].
    pub fn reconcile_nodes(&self, runner: &dyn HostRunner) -> DiskResult<()> {
        reconcile_partition_nodes(runner, self)
    }

    /// Unbind the loop device and remove its partition nodes.
    ///
    /// On error the caller still holds the lease and may retry. A retry
    /// after a successful unbind skips `losetup -d`.
    pub fn detach(&mut self, runner: &dyn HostRunner) -> DiskResult<()> {
        if !self.unbound {
            let cmd = HostCommand::new("losetup").arg("-d").arg(&self.path);
            runner.run(&cmd).map_err(|source| DiskError::Detach {
                device: self.path.clone(),
                source,
            })?;
            self.unbound = true;
        }

        self.remove_partition_nodes()?;

        tracing::info!("Detached {}", self.path.display());
        Ok(())
    }

    /// Remove `<loop>p1` / `<loop>p2` if present.
    pub fn remove_partition_nodes(&self) -> DiskResult<()> {
        for node in [self.esp_partition(), self.rootfs_partition()] {
            if node.exists() {
                fs::remove_file(&node).map_err(|e| DiskError::remove_node(&node, e))?;
                tracing::debug!("Removed partition node {}", node.display());
            }
        }
        Ok(())
    }
}

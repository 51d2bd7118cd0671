//! Build configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::disk::DiskImage;
use crate::error::DiskResult;
use crate::runner::{HostRunner, SystemRunner};

/// Options for one disk image build.
///
/// Deserializable so a pipeline can hand the builder a JSON document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Image file to create.
    pub image_path: PathBuf,

    /// Build root the rootfs partition is mounted at.
    pub rootfs_dir: PathBuf,

    /// Rootfs filesystem: `ext4` or `btrfs`.
    ///
    /// Default: empty, meaning ext4
    #[serde(default)]
    pub filesystem: String,

    /// Image size in bytes.
    ///
    /// Default: 0, meaning 4 GiB
    #[serde(default)]
    pub size: u64,

    /// Kill any host tool running longer than this many seconds.
    ///
    /// Default: no timeout
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Create missing partition device nodes after attach.
    ///
    /// Needed inside containers without udev; harmless elsewhere.
    /// Default: true
    #[serde(default = "default_reconcile_device_nodes")]
    pub reconcile_device_nodes: bool,
}

fn default_reconcile_device_nodes() -> bool {
    true
}

impl BuildOptions {
    pub fn new(image_path: impl Into<PathBuf>, rootfs_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            rootfs_dir: rootfs_dir.into(),
            filesystem: String::new(),
            size: 0,
            command_timeout_secs: None,
            reconcile_device_nodes: default_reconcile_device_nodes(),
        }
    }

    /// Validate into a [`DiskImage`], applying size and kind defaults.
    pub fn image(&self) -> DiskResult<DiskImage> {
        DiskImage::new(
            &self.image_path,
            &self.rootfs_dir,
            &self.filesystem,
            self.size,
        )
    }

    /// Host runner honoring `command_timeout_secs`.
    pub fn runner(&self) -> Arc<dyn HostRunner> {
        match self.command_timeout_secs {
            Some(secs) => Arc::new(SystemRunner::with_default_timeout(Duration::from_secs(
                secs,
            ))),
            None => Arc::new(SystemRunner::new()),
        }
    }
}

//! GPT layout: ESP first, rootfs on the remaining space.

use std::path::Path;

use super::constants::partition::{
    ESP_INDEX, ESP_SIZE_MIB, ESP_TYPE_CODE, ROOTFS_INDEX, ROOTFS_TYPE_CODE,
};
use crate::error::{DiskError, DiskResult};
use crate::runner::{HostCommand, HostRunner};

/// The fixed two-partition plan applied to every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout;

impl PartitionLayout {
    /// sgdisk argument sets, applied in order: wipe, ESP, rootfs.
    pub fn sgdisk_steps(&self) -> [Vec<String>; 3] {
        [
            vec!["--zap-all".to_string()],
            vec![
                format!("--new={}::+{}M", ESP_INDEX, ESP_SIZE_MIB),
                "-t".to_string(),
                format!("{}:{}", ESP_INDEX, ESP_TYPE_CODE),
            ],
            vec![
                format!("--new={}::", ROOTFS_INDEX),
                "-t".to_string(),
                format!("{}:{}", ROOTFS_INDEX, ROOTFS_TYPE_CODE),
            ],
        ]
    }

    /// Write the layout directly into the image file.
    ///
    /// Works on the plain file; no loop device is needed. Stops at the
    /// first failing sgdisk call.
    pub fn apply(&self, runner: &dyn HostRunner, image: &Path) -> DiskResult<()> {
        tracing::info!("Partitioning {} (ESP + rootfs)", image.display());

        for step in self.sgdisk_steps() {
            let cmd = HostCommand::new("sgdisk").arg(image).args(&step);
            runner.run(&cmd).map_err(|source| DiskError::Partition {
                image: image.to_path_buf(),
                source,
            })?;
        }

        tracing::debug!("Partition table written to {}", image.display());
        Ok(())
    }
}

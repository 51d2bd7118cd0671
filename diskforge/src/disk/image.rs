//! The disk image being built.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::constants::image::DEFAULT_SIZE_BYTES;
use crate::error::{DiskError, DiskResult};

/// Root filesystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    /// ext4, mounted with default options.
    #[default]
    Ext4,
    /// btrfs, mounted through the `@` subvolume.
    Btrfs,
}

impl FilesystemKind {
    /// Get string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemKind::Ext4 => "ext4",
            FilesystemKind::Btrfs => "btrfs",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilesystemKind {
    type Err = DiskError;

    /// An empty string selects the default (ext4).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "ext4" => Ok(FilesystemKind::Ext4),
            "btrfs" => Ok(FilesystemKind::Btrfs),
            other => Err(DiskError::UnsupportedFilesystem(other.to_string())),
        }
    }
}

/// Target artifact of one build: where the file lives, how large it is,
/// which rootfs it carries and where that rootfs gets mounted.
///
/// Size and filesystem kind are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImage {
    path: PathBuf,
    rootfs_dir: PathBuf,
    filesystem: FilesystemKind,
    size: u64,
}

impl DiskImage {
    /// Describe a disk image.
    ///
    /// # Arguments
    /// * `path` - Image file to create
    /// * `rootfs_dir` - Build root where the rootfs partition is mounted
    /// * `filesystem` - Rootfs kind (`""` means ext4)
    /// * `size` - Size in bytes (`0` means 4 GiB)
    pub fn new(
        path: impl Into<PathBuf>,
        rootfs_dir: impl Into<PathBuf>,
        filesystem: &str,
        size: u64,
    ) -> DiskResult<Self> {
        let filesystem = filesystem.parse()?;
        Ok(Self::with_kind(path, rootfs_dir, filesystem, size))
    }

    /// Like [`DiskImage::new`] with an already validated kind.
    pub fn with_kind(
        path: impl Into<PathBuf>,
        rootfs_dir: impl Into<PathBuf>,
        filesystem: FilesystemKind,
        size: u64,
    ) -> Self {
        let size = if size == 0 { DEFAULT_SIZE_BYTES } else { size };
        Self {
            path: path.into(),
            rootfs_dir: rootfs_dir.into(),
            filesystem,
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    pub fn filesystem(&self) -> FilesystemKind {
        self.filesystem
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

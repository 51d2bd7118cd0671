//! Disk image file operations.
//!
//! This module covers everything done to the image file itself:
//! - `DiskImage` - what is being built (path, size, rootfs kind, build root)
//! - `FilesystemKind` - supported rootfs filesystems (ext4, btrfs)
//! - `allocate` - sparse file creation
//! - `PartitionLayout` - the fixed ESP + rootfs GPT layout

pub mod constants;
mod image;
mod partition;
mod sparse;

pub use image::{DiskImage, FilesystemKind};
pub use partition::PartitionLayout;
pub use sparse::allocate;

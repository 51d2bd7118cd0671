//! diskforge - bootable VM disk image builder.
//!
//! Turns an empty path into a partitioned, formatted and mounted disk image
//! that later pipeline stages can fill:
//!
//! ```no_run
//! use diskforge::{BuildOptions, CancelHandle, DiskImageBuilder};
//!
//! let options = BuildOptions::new("/var/cache/build/disk.raw", "/var/cache/build/rootfs");
//! let mut builder = DiskImageBuilder::from_options(&options)?;
//! let root_uuid = builder.with_mounted(&CancelHandle::new(), |vm| {
//!     // populate vm.image().rootfs_dir() here
//!     vm.rootfs_partition_uuid()
//! })?;
//! # Ok::<(), diskforge::DiskError>(())
//! ```
//!
//! All host interaction goes through [`HostRunner`]. Loop devices are
//! shared host state; run one build per host (or per container) at a time.

pub mod builder;
pub mod disk;
pub mod error;
pub mod format;
pub mod identify;
pub mod loopdev;
pub mod mount;
pub mod options;
pub mod runner;
pub mod util;

pub use builder::{CancelHandle, DiskImageBuilder};
pub use disk::{DiskImage, FilesystemKind, PartitionLayout};
pub use error::{CommandError, DiskError, DiskResult};
pub use loopdev::LoopDevice;
pub use options::BuildOptions;
pub use runner::{HostCommand, HostRunner, SystemRunner};

//! Error types for disk image building.
//!
//! Errors are split by origin:
//! - [`CommandError`]: a host tool could not be run or exited non-zero
//! - [`DiskError`]: a build step failed, carrying the path or device it
//!   was working on and, where a tool was involved, the [`CommandError`]
//!   as its source

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type DiskResult<T> = Result<T, DiskError>;

// ============================================================================
// Host Command Errors
// ============================================================================

/// Failure of a single host tool invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Binary is not installed on the host.
    #[error("{program}: command not found")]
    NotFound { program: String },

    /// Process could not be spawned or waited on.
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Process exited non-zero. `stderr` keeps the tool's own diagnostic.
    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Process was killed after running past its deadline.
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    /// Process succeeded but printed something we cannot use.
    #[error("{program} returned unexpected output: {output:?}")]
    UnexpectedOutput { program: String, output: String },
}

impl CommandError {
    /// Create a failed-exit error.
    pub fn failed(program: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create an unexpected-output error.
    pub fn unexpected_output(program: impl Into<String>, output: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            program: program.into(),
            output: output.into(),
        }
    }

    /// Whether the command was killed by its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ============================================================================
// Build Step Errors
// ============================================================================

/// Errors raised by the disk image builder, one variant per build step.
#[derive(Debug, Error)]
pub enum DiskError {
    /// Rootfs filesystem kind is not one of the supported kinds.
    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    /// Local file operation failed (create, chmod, truncate, mkdir).
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Partition table could not be written.
    #[error("failed to create partitions on {}: {source}", .image.display())]
    Partition {
        image: PathBuf,
        #[source]
        source: CommandError,
    },

    /// Image could not be bound to a loop device.
    #[error("failed to attach {} to a loop device: {source}", .image.display())]
    Attach {
        image: PathBuf,
        #[source]
        source: CommandError,
    },

    /// `losetup -d` failed.
    #[error("failed to detach {}: {source}", .device.display())]
    Detach {
        device: PathBuf,
        #[source]
        source: CommandError,
    },

    /// Partition node left behind by a detach could not be removed.
    #[error("failed to remove partition node {}: {source}", .path.display())]
    RemoveNode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// lsblk could not list the partitions of a loop device.
    #[error("failed to list partitions of {}: {source}", .device.display())]
    PartitionScan {
        device: PathBuf,
        #[source]
        source: CommandError,
    },

    /// Partition device node could not be resolved or created.
    #[error("device node {}: {source}", .path.display())]
    DeviceNode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Operation needs an attached loop device but none is bound.
    #[error("{op}: disk image is not attached to a loop device")]
    NotAttached { op: &'static str },

    /// mkfs or subvolume creation failed.
    #[error("failed to format {}: {source}", .device.display())]
    Format {
        device: PathBuf,
        #[source]
        source: CommandError,
    },

    /// mount failed.
    #[error("failed to mount {} at {}: {source}", .device.display(), .target.display())]
    Mount {
        device: PathBuf,
        target: PathBuf,
        #[source]
        source: CommandError,
    },

    /// umount failed.
    #[error("failed to unmount {}: {source}", .target.display())]
    Unmount {
        target: PathBuf,
        #[source]
        source: CommandError,
    },

    /// PARTUUID lookup failed.
    #[error("failed to query {}: {source}", .device.display())]
    Query {
        device: PathBuf,
        #[source]
        source: CommandError,
    },

    /// Build was cancelled by the caller before `step` started.
    #[error("build cancelled before {step}")]
    Cancelled { step: &'static str },
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl DiskError {
    /// Create a local I/O error.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create a device node error.
    pub fn device_node(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::DeviceNode {
            path: path.into(),
            source,
        }
    }

    /// Create a partition node removal error.
    pub fn remove_node(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::RemoveNode {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from a host command hitting its timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Partition { source, .. }
            | Self::Attach { source, .. }
            | Self::Detach { source, .. }
            | Self::PartitionScan { source, .. }
            | Self::Format { source, .. }
            | Self::Mount { source, .. }
            | Self::Unmount { source, .. }
            | Self::Query { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the build was aborted by timeout or explicit cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Cancelled { .. }) || self.is_timeout()
    }
}

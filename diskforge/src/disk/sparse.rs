//! Sparse backing file allocation.

use std::fs::{File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::constants::image::FILE_MODE;
use crate::error::{DiskError, DiskResult};

/// Create (or truncate) `path` as a sparse file of exactly `size` bytes.
///
/// The file is made owner read/write only before it is sized, so the
/// image is never readable by others even briefly at full length. A file
/// left over from an earlier failed run is overwritten.
pub fn allocate(path: &Path, size: u64) -> DiskResult<()> {
    tracing::info!(
        "Creating sparse disk image: {} ({}MB)",
        path.display(),
        size / (1024 * 1024)
    );

    let file = File::create(path).map_err(|e| DiskError::io("create", path, e))?;

    file.set_permissions(Permissions::from_mode(FILE_MODE))
        .map_err(|e| DiskError::io("chmod", path, e))?;

    file.set_len(size)
        .map_err(|e| DiskError::io("truncate", path, e))?;

    tracing::debug!("Allocated sparse file: {}", path.display());
    Ok(())
}

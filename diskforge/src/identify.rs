//! PARTUUID lookup for bootloader and fstab generation.

use std::path::Path;

use crate::error::{CommandError, DiskError, DiskResult};
use crate::runner::{HostCommand, HostRunner};

/// Read the PARTUUID of a partition device with blkid.
///
/// A device without a recognizable PARTUUID makes blkid exit non-zero or
/// print nothing; both surface as [`DiskError::Query`].
pub fn partition_uuid(runner: &dyn HostRunner, device: &Path) -> DiskResult<String> {
    let cmd = HostCommand::new("blkid")
        .args(["-s", "PARTUUID", "-o", "value"])
        .arg(device);

    let query_err = |source: CommandError| DiskError::Query {
        device: device.to_path_buf(),
        source,
    };

    let stdout = runner.run(&cmd).map_err(query_err)?;
    let uuid = stdout.trim();
    if uuid.is_empty() {
        return Err(query_err(CommandError::unexpected_output("blkid", stdout)));
    }

    tracing::debug!("PARTUUID of {}: {}", device.display(), uuid);
    Ok(uuid.to_string())
}

//! Host command execution.
//!
//! Every host tool the builder drives (sgdisk, losetup, lsblk, mkfs.*,
//! btrfs, mount, umount, blkid) goes through [`HostRunner`], together with
//! the two kernel-facing calls that are not commands: block device node
//! creation and mount table inspection. [`SystemRunner`] talks to the real
//! host; tests substitute a fake.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::CommandError;

/// A single host tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Kill the process if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Shell-like rendering used in logs, e.g. `losetup -d /dev/loop0`.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Host-side operations needed to build a disk image.
///
/// Implementations must be usable from one builder at a time; no
/// synchronization across builders is expected.
pub trait HostRunner: Send + Sync {
    /// Run a command to completion and return its stdout.
    ///
    /// A non-zero exit maps to [`CommandError::Failed`] carrying stderr.
    fn run(&self, cmd: &HostCommand) -> Result<String, CommandError>;

    /// Create a block special file with the given device numbers and mode.
    fn make_block_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> io::Result<()>;

    /// Whether `path` is currently a mount point.
    fn is_mounted(&self, path: &Path) -> io::Result<bool>;
}

/// [`HostRunner`] backed by real processes and syscalls.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    default_timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `timeout` to every command that does not set its own.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

fn map_spawn_err(program: &str, err: io::Error) -> CommandError {
    if err.kind() == io::ErrorKind::NotFound {
        return CommandError::NotFound {
            program: program.to_string(),
        };
    }
    CommandError::Spawn {
        program: program.to_string(),
        source: err,
    }
}

fn output_with_timeout(
    program: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> Result<Output, CommandError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_spawn_err(program, e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain both pipes while waiting so a chatty tool cannot block on a full pipe.
    let stdout_handle = std::thread::spawn(move || drain(stdout));
    let stderr_handle = std::thread::spawn(move || drain(stderr));

    let waited = child
        .wait_timeout(timeout)
        .map_err(|e| map_spawn_err(program, e))?;

    let status = match waited {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(CommandError::Timeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    Ok(Output {
        status,
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
    })
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl HostRunner for SystemRunner {
    fn run(&self, cmd: &HostCommand) -> Result<String, CommandError> {
        tracing::debug!(command = %cmd.command_line(), "Running host command");

        let mut command = Command::new(cmd.program());
        command.args(cmd.get_args()).stdin(Stdio::null());

        let output = match cmd.get_timeout().or(self.default_timeout) {
            Some(timeout) => output_with_timeout(cmd.program(), &mut command, timeout)?,
            None => command
                .output()
                .map_err(|e| map_spawn_err(cmd.program(), e))?,
        };

        if !output.status.success() {
            return Err(CommandError::failed(
                cmd.program(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn make_block_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> io::Result<()> {
        use nix::sys::stat::{Mode, SFlag, makedev, mknod};

        let dev = makedev(major, minor);
        mknod(path, SFlag::S_IFBLK, Mode::from_bits_truncate(mode), dev).map_err(io::Error::from)
    }

    #[cfg(target_os = "linux")]
    fn is_mounted(&self, path: &Path) -> io::Result<bool> {
        let mountinfo = procfs::process::Process::myself()
            .and_then(|p| p.mountinfo())
            .map_err(io::Error::other)?;

        // Compare canonical paths; mountinfo never contains symlinks.
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(mountinfo.into_iter().any(|m| m.mount_point == target))
    }

    #[cfg(not(target_os = "linux"))]
    fn is_mounted(&self, _path: &Path) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mount table inspection is only supported on Linux",
        ))
    }
}

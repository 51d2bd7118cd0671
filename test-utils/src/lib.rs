//! Test doubles for diskforge.
//!
//! [`FakeRunner`] records every host command and simulates just enough
//! host state (attached loop devices, mount table, device nodes) for the
//! builder's idempotency checks to behave as on a real host.
//! [`FakeHost`] wires one up with a scratch directory standing in for
//! `/dev` and the build area.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use diskforge::{
    CommandError, DiskImage, DiskImageBuilder, FilesystemKind, HostCommand, HostRunner,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Exit code util-linux uses for mount/umount failures.
const MOUNT_FAILURE: i32 = 32;

#[derive(Debug, Clone)]
enum Failure {
    Exit(String),
    Timeout,
}

#[derive(Debug, Clone)]
struct FailureRule {
    program: String,
    needle: Option<String>,
    failure: Failure,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    queued: HashMap<String, VecDeque<String>>,
    outputs: HashMap<String, String>,
    failures: Vec<FailureRule>,
    hooks: Vec<(String, Hook)>,
    attached: HashSet<PathBuf>,
    mounted: HashSet<PathBuf>,
    nodes: Vec<(PathBuf, u64, u64, u32)>,
}

/// Recording [`HostRunner`] with scripted outputs and failures.
#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<State>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stdout returned by every call to `program` without a queued output.
    pub fn set_output(&self, program: &str, stdout: &str) {
        self.state
            .lock()
            .outputs
            .insert(program.to_string(), stdout.to_string());
    }

    /// Stdout returned by the next call to `program` only.
    pub fn queue_output(&self, program: &str, stdout: &str) {
        self.state
            .lock()
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(stdout.to_string());
    }

    /// Make every call to `program` fail with `stderr`.
    ///
    /// Use `"mknod"` to make device node creation fail.
    pub fn fail(&self, program: &str, stderr: &str) {
        self.push_failure(program, None, Failure::Exit(stderr.to_string()));
    }

    /// Make calls to `program` whose command line contains `needle` fail.
    pub fn fail_matching(&self, program: &str, needle: &str, stderr: &str) {
        self.push_failure(program, Some(needle), Failure::Exit(stderr.to_string()));
    }

    /// Make every call to `program` run into its timeout.
    pub fn time_out(&self, program: &str) {
        self.push_failure(program, None, Failure::Timeout);
    }

    /// Run `hook` whenever `program` is invoked, before its outcome is
    /// decided. The hook must not call back into the runner.
    pub fn on_run(&self, program: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.state
            .lock()
            .hooks
            .push((program.to_string(), Arc::new(hook)));
    }

    /// Remove all failure rules.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Command lines of calls to `program`.
    pub fn calls_to(&self, program: &str) -> Vec<String> {
        let prefix = format!("{} ", program);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|line| line.starts_with(&prefix) || line.as_str() == program)
            .cloned()
            .collect()
    }

    /// Loop devices currently attached according to simulated losetup.
    pub fn attached(&self) -> Vec<PathBuf> {
        self.state.lock().attached.iter().cloned().collect()
    }

    /// Current simulated mount points.
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.state.lock().mounted.iter().cloned().collect()
    }

    /// Device nodes created: (path, major, minor, mode).
    pub fn nodes(&self) -> Vec<(PathBuf, u64, u64, u32)> {
        self.state.lock().nodes.clone()
    }

    fn push_failure(&self, program: &str, needle: Option<&str>, failure: Failure) {
        self.state.lock().failures.push(FailureRule {
            program: program.to_string(),
            needle: needle.map(str::to_string),
            failure,
        });
    }

    fn run_hooks(&self, program: &str) {
        let hooks: Vec<Hook> = self
            .state
            .lock()
            .hooks
            .iter()
            .filter(|(name, _)| name == program)
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook();
        }
    }

    fn failure_for(state: &State, program: &str, line: &str) -> Option<Failure> {
        state
            .failures
            .iter()
            .find(|rule| {
                rule.program == program
                    && rule
                        .needle
                        .as_deref()
                        .is_none_or(|needle| line.contains(needle))
            })
            .map(|rule| rule.failure.clone())
    }

    fn take_output(state: &mut State, program: &str) -> String {
        if let Some(out) = state.queued.get_mut(program).and_then(VecDeque::pop_front) {
            return out;
        }
        state.outputs.get(program).cloned().unwrap_or_default()
    }
}

impl HostRunner for FakeRunner {
    fn run(&self, cmd: &HostCommand) -> Result<String, CommandError> {
        self.run_hooks(cmd.program());

        let mut state = self.state.lock();
        let line = cmd.command_line();
        state.calls.push(line.clone());

        match Self::failure_for(&state, cmd.program(), &line) {
            Some(Failure::Exit(stderr)) => {
                return Err(CommandError::failed(cmd.program(), Some(1), stderr));
            }
            Some(Failure::Timeout) => {
                return Err(CommandError::Timeout {
                    program: cmd.program().to_string(),
                    timeout_secs: cmd.get_timeout().map_or(0, |t| t.as_secs()),
                });
            }
            None => {}
        }

        let args: Vec<PathBuf> = cmd.get_args().iter().map(PathBuf::from).collect();

        match cmd.program() {
            "mount" => {
                // mount <device> <target> [-o options]
                if let Some(target) = args.get(1) {
                    state.mounted.insert(target.clone());
                }
            }
            "umount" => {
                let target = args.first().cloned().unwrap_or_default();
                if !state.mounted.remove(&target) {
                    return Err(CommandError::failed(
                        "umount",
                        Some(MOUNT_FAILURE),
                        format!("umount: {}: not mounted.", target.display()),
                    ));
                }
            }
            "losetup" if args.first().is_some_and(|a| a == Path::new("-d")) => {
                let device = args.get(1).cloned().unwrap_or_default();
                if !state.attached.remove(&device) {
                    return Err(CommandError::failed(
                        "losetup",
                        Some(1),
                        format!("losetup: {}: detach failed: No such device", device.display()),
                    ));
                }
            }
            "losetup" => {
                let out = Self::take_output(&mut state, "losetup");
                let device = out.trim();
                if !device.is_empty() {
                    state.attached.insert(PathBuf::from(device));
                }
                return Ok(out);
            }
            _ => {}
        }

        Ok(Self::take_output(&mut state, cmd.program()))
    }

    fn make_block_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> io::Result<()> {
        self.run_hooks("mknod");

        let mut state = self.state.lock();
        let line = format!("mknod {} b {} {}", path.display(), major, minor);
        state.calls.push(line.clone());

        match Self::failure_for(&state, "mknod", &line) {
            Some(Failure::Exit(stderr)) => {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, stderr));
            }
            Some(Failure::Timeout) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "mknod timed out"));
            }
            None => {}
        }

        // A regular file is enough for existence checks.
        fs::File::create(path)?;
        state.nodes.push((path.to_path_buf(), major, minor, mode));
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> io::Result<bool> {
        Ok(self.state.lock().mounted.contains(path))
    }
}

/// Scratch host: a fake `/dev` with one loop device, an image path and a
/// build root, all inside a temp directory.
pub struct FakeHost {
    pub runner: Arc<FakeRunner>,
    pub loop_device: PathBuf,
    pub image_path: PathBuf,
    pub rootfs_dir: PathBuf,
    _temp_dir: TempDir, // Dropped after test
}

impl FakeHost {
    /// Host where losetup hands out `<tmp>/dev/loop0` and lsblk reports
    /// it with two partitions.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dev = temp_dir.path().join("dev");
        fs::create_dir(&dev).expect("Failed to create fake /dev");

        let loop_device = dev.join("loop0");
        fs::File::create(&loop_device).expect("Failed to create fake loop device");

        let runner = FakeRunner::new();
        runner.set_output("losetup", &format!("{}\n", loop_device.display()));
        runner.set_output("lsblk", "7:0\n259:0\n259:1\n");
        runner.set_output("blkid", "");

        Self {
            runner,
            loop_device,
            image_path: temp_dir.path().join("disk.raw"),
            rootfs_dir: temp_dir.path().join("rootfs"),
            _temp_dir: temp_dir,
        }
    }

    /// Image description for this host with a small size.
    pub fn image(&self, kind: FilesystemKind) -> DiskImage {
        DiskImage::with_kind(&self.image_path, &self.rootfs_dir, kind, 512 * 1024 * 1024)
    }

    /// Builder for this host, driving the fake runner.
    pub fn builder(&self, kind: FilesystemKind) -> DiskImageBuilder {
        DiskImageBuilder::with_runner(self.image(kind), self.runner.clone())
    }

    /// `<loop>pN` path on this host.
    pub fn partition(&self, index: u8) -> PathBuf {
        let mut path = self.loop_device.as_os_str().to_owned();
        path.push(format!("p{}", index));
        path.into()
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

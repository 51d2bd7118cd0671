//! Disk image lifecycle.
//!
//! [`DiskImageBuilder`] drives one image through
//! allocate → partition → attach → reconcile nodes → format → mount, and
//! back down through unmount → detach. Each step is also callable on its
//! own so a pipeline can interleave its own stages.
//!
//! The builder holds at most one [`LoopDevice`] lease and remembers which
//! partitions it mounted itself; teardown only ever releases those. It does
//! not roll back earlier steps when a later one fails, except inside
//! [`DiskImageBuilder::prepare`] and [`DiskImageBuilder::with_mounted`],
//! which attempt a full teardown before returning the original error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::disk::{self, DiskImage, PartitionLayout};
use crate::error::{DiskError, DiskResult};
use crate::format;
use crate::identify;
use crate::loopdev::LoopDevice;
use crate::mount;
use crate::options::BuildOptions;
use crate::runner::{HostRunner, SystemRunner};

/// Caller-side cancellation flag, checked between build steps.
///
/// Cloning shares the flag, so one clone can be handed to a signal handler
/// or a watchdog thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The step currently running finishes first.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The shared flag, for registering with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn check(&self, step: &'static str) -> DiskResult<()> {
        if self.is_cancelled() {
            return Err(DiskError::Cancelled { step });
        }
        Ok(())
    }
}

/// Builds one VM disk image.
pub struct DiskImageBuilder {
    image: DiskImage,
    runner: Arc<dyn HostRunner>,
    loop_device: Option<LoopDevice>,
    root_mounted: bool,
    esp_mounted: bool,
    reconcile_nodes: bool,
}

impl DiskImageBuilder {
    /// Builder driving the real host.
    pub fn new(image: DiskImage) -> Self {
        Self::with_runner(image, Arc::new(SystemRunner::new()))
    }

    /// Builder driving `runner` instead of the real host.
    pub fn with_runner(image: DiskImage, runner: Arc<dyn HostRunner>) -> Self {
        Self {
            image,
            runner,
            loop_device: None,
            root_mounted: false,
            esp_mounted: false,
            reconcile_nodes: true,
        }
    }

    /// Validate `options` and build on the real host.
    ///
    /// Fails with [`DiskError::UnsupportedFilesystem`] before anything
    /// touches the filesystem.
    pub fn from_options(options: &BuildOptions) -> DiskResult<Self> {
        let builder = Self::with_runner(options.image()?, options.runner())
            .with_node_reconcile(options.reconcile_device_nodes);
        Ok(builder)
    }

    /// Enable or disable partition node reconciliation during attach.
    pub fn with_node_reconcile(mut self, enabled: bool) -> Self {
        self.reconcile_nodes = enabled;
        self
    }

    pub fn image(&self) -> &DiskImage {
        &self.image
    }

    pub fn is_attached(&self) -> bool {
        self.loop_device.is_some()
    }

    /// Loop device path, or `None` when detached.
    pub fn loop_device(&self) -> Option<&Path> {
        self.loop_device.as_ref().map(LoopDevice::path)
    }

    /// `<loop>p2`, or `None` when detached.
    pub fn rootfs_dev_file(&self) -> Option<PathBuf> {
        self.loop_device.as_ref().map(LoopDevice::rootfs_partition)
    }

    /// `<loop>p1`, or `None` when detached.
    pub fn uefi_dev_file(&self) -> Option<PathBuf> {
        self.loop_device.as_ref().map(LoopDevice::esp_partition)
    }

    /// ESP mount point, `<rootfs_dir>/boot/efi`.
    pub fn uefi_mount_point(&self) -> PathBuf {
        mount::esp_mount_point(self.image.rootfs_dir())
    }

    // ========================================================================
    // Image file
    // ========================================================================

    /// Allocate the sparse image file at its final size.
    pub fn create_empty_disk_image(&self) -> DiskResult<()> {
        disk::allocate(self.image.path(), self.image.size())
    }

    /// Write the ESP + rootfs GPT into the image file.
    pub fn create_partitions(&self) -> DiskResult<()> {
        PartitionLayout.apply(self.runner.as_ref(), self.image.path())
    }

    // ========================================================================
    // Loop device
    // ========================================================================

    /// Attach the image to a loop device, then reconcile partition nodes
    /// unless disabled.
    ///
    /// A no-op when already attached. If reconciliation fails the binding
    /// stays recorded so [`DiskImageBuilder::detach_image`] can release it.
    pub fn attach_image(&mut self) -> DiskResult<()> {
        if let Some(device) = &self.loop_device {
            tracing::debug!(
                "{} already attached to {}",
                self.image.path().display(),
                device.path().display()
            );
            return Ok(());
        }

        let device = LoopDevice::attach(self.runner.as_ref(), self.image.path())?;
        self.loop_device = Some(device);

        if self.reconcile_nodes {
            self.reconcile_device_nodes()?;
        }
        Ok(())
    }

    /// Create `<loop>p1` / `<loop>p2` if udev did not.
    pub fn reconcile_device_nodes(&self) -> DiskResult<()> {
        self.attached("reconcile device nodes")?
            .reconcile_nodes(self.runner.as_ref())
    }

    /// Release the loop device and its partition nodes.
    ///
    /// A no-op when never attached. When the loop device has vanished from
    /// the host already only leftover partition nodes are removed. On
    /// failure the binding is kept for a retry.
    pub fn detach_image(&mut self) -> DiskResult<()> {
        let Some(device) = &mut self.loop_device else {
            return Ok(());
        };

        if device.exists() {
            device.detach(self.runner.as_ref())?;
        } else {
            tracing::debug!(
                "{} no longer exists, treating as detached",
                device.path().display()
            );
            device.remove_partition_nodes()?;
        }

        self.loop_device = None;
        Ok(())
    }

    // ========================================================================
    // Filesystems
    // ========================================================================

    /// Format the rootfs partition (plus the `@` subvolume for btrfs).
    pub fn create_rootfs(&self) -> DiskResult<()> {
        let device = self.attached("create rootfs")?.rootfs_partition();
        format::create_rootfs(
            self.runner.as_ref(),
            self.image.filesystem(),
            &device,
            self.image.rootfs_dir(),
        )
    }

    /// Format the ESP partition as FAT32.
    pub fn create_uefi_fs(&self) -> DiskResult<()> {
        let device = self.attached("create UEFI filesystem")?.esp_partition();
        format::create_esp(self.runner.as_ref(), &device)
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    /// Mount the rootfs partition at the build root.
    pub fn mount_root_partition(&mut self) -> DiskResult<()> {
        let device = self.attached("mount root partition")?.rootfs_partition();
        if self.root_mounted {
            tracing::debug!("{} already mounted", device.display());
            return Ok(());
        }

        mount::mount_rootfs(
            self.runner.as_ref(),
            self.image.filesystem(),
            &device,
            self.image.rootfs_dir(),
        )?;
        self.root_mounted = true;
        Ok(())
    }

    /// Mount the ESP at `<root>/boot/efi`. Requires the root mounted first.
    pub fn mount_uefi_partition(&mut self) -> DiskResult<()> {
        let device = self.attached("mount UEFI partition")?.esp_partition();
        if self.esp_mounted {
            tracing::debug!("{} already mounted", device.display());
            return Ok(());
        }

        mount::mount_esp(self.runner.as_ref(), &device, self.image.rootfs_dir())?;
        self.esp_mounted = true;
        Ok(())
    }

    /// Unmount the ESP, then the root.
    ///
    /// Only partitions this builder mounted are touched, and those no
    /// longer in the mount table are skipped.
    pub fn unmount_partitions(&mut self) -> DiskResult<()> {
        if self.esp_mounted {
            mount::umount_if_mounted(self.runner.as_ref(), &self.uefi_mount_point())?;
            self.esp_mounted = false;
        }

        if self.root_mounted {
            mount::umount_if_mounted(self.runner.as_ref(), self.image.rootfs_dir())?;
            self.root_mounted = false;
        }
        Ok(())
    }

    /// Whether the rootfs partition is mounted by this builder.
    pub fn is_root_mounted(&self) -> bool {
        self.root_mounted
    }

    /// Whether the ESP is mounted by this builder.
    pub fn is_uefi_mounted(&self) -> bool {
        self.esp_mounted
    }

    // ========================================================================
    // Identification
    // ========================================================================

    pub fn rootfs_partition_uuid(&self) -> DiskResult<String> {
        let device = self.attached("query rootfs PARTUUID")?.rootfs_partition();
        identify::partition_uuid(self.runner.as_ref(), &device)
    }

    pub fn uefi_partition_uuid(&self) -> DiskResult<String> {
        let device = self.attached("query UEFI PARTUUID")?.esp_partition();
        identify::partition_uuid(self.runner.as_ref(), &device)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Run every step up to and including the ESP mount.
    ///
    /// Any failure once the loop device is attached triggers
    /// [`DiskImageBuilder::teardown`]; teardown errors are logged and the
    /// original error is returned.
    pub fn prepare(&mut self, cancel: &CancelHandle) -> DiskResult<()> {
        cancel.check("create disk image")?;
        self.create_empty_disk_image()?;

        cancel.check("partition")?;
        self.create_partitions()?;

        cancel.check("attach")?;
        let result = self
            .attach_image()
            .and_then(|()| self.format_and_mount(cancel));

        if let Err(err) = result {
            if self.is_attached() {
                self.abort(&err);
            }
            return Err(err);
        }

        tracing::info!(
            "Disk image {} ready at {}",
            self.image.path().display(),
            self.image.rootfs_dir().display()
        );
        Ok(())
    }

    /// [`prepare`](Self::prepare), run `populate` against the mounted
    /// image, then [`teardown`](Self::teardown).
    ///
    /// Teardown is attempted on every path once the image was attached.
    pub fn with_mounted<T, F>(&mut self, cancel: &CancelHandle, populate: F) -> DiskResult<T>
    where
        F: FnOnce(&Self) -> DiskResult<T>,
    {
        self.prepare(cancel)?;

        match populate(self) {
            Ok(value) => {
                self.teardown()?;
                Ok(value)
            }
            Err(err) => {
                self.abort(&err);
                Err(err)
            }
        }
    }

    /// Unmount both partitions, then detach.
    ///
    /// Detach is attempted even if unmounting failed. The first error is
    /// returned, a second one is only logged.
    pub fn teardown(&mut self) -> DiskResult<()> {
        let unmounted = self.unmount_partitions();
        let detached = self.detach_image();

        match (unmounted, detached) {
            (Err(first), Err(second)) => {
                tracing::warn!("Detach failed after unmount failure: {}", second);
                Err(first)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn format_and_mount(&mut self, cancel: &CancelHandle) -> DiskResult<()> {
        cancel.check("format rootfs")?;
        self.create_rootfs()?;

        cancel.check("format ESP")?;
        self.create_uefi_fs()?;

        cancel.check("mount rootfs")?;
        self.mount_root_partition()?;

        cancel.check("mount ESP")?;
        self.mount_uefi_partition()
    }

    fn abort(&mut self, cause: &DiskError) {
        tracing::warn!("Disk image build failed, tearing down: {}", cause);
        if let Err(e) = self.teardown() {
            tracing::warn!("Teardown after failure also failed: {}", e);
        }
    }

    fn attached(&self, op: &'static str) -> DiskResult<&LoopDevice> {
        self.loop_device
            .as_ref()
            .ok_or(DiskError::NotAttached { op })
    }
}

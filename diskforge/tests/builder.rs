//! Integration tests for the disk image lifecycle, driven by a fake host.
//!
//! Test categories:
//! - Attach/detach idempotency and device node reconciliation
//! - Formatting and mounting per filesystem kind
//! - Failure propagation and teardown

use std::path::PathBuf;

use diskforge::{CancelHandle, CommandError, DiskError, FilesystemKind, HostCommand, HostRunner};
use diskforge_test_utils::FakeHost;

// ============================================================================
// LOOP DEVICE
// ============================================================================

#[test]
fn attach_records_loop_device_and_creates_missing_nodes() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    vm.attach_image().unwrap();

    assert_eq!(vm.loop_device(), Some(host.loop_device.as_path()));
    assert_eq!(vm.uefi_dev_file(), Some(host.partition(1)));
    assert_eq!(vm.rootfs_dev_file(), Some(host.partition(2)));
    assert!(host.partition(1).exists());
    assert!(host.partition(2).exists());

    let nodes = host.runner.nodes();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0], (host.partition(1), 259, 0, 0o644));
    assert_eq!(nodes[1], (host.partition(2), 259, 1, 0o644));

    let losetup = host.runner.calls_to("losetup");
    assert_eq!(losetup.len(), 1);
    assert!(losetup[0].starts_with("losetup -P -f --show "));
    assert!(losetup[0].ends_with("disk.raw"));
}

#[test]
fn attach_twice_is_noop() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    vm.attach_image().unwrap();
    let first = vm.loop_device().map(PathBuf::from);
    vm.attach_image().unwrap();

    assert_eq!(vm.loop_device().map(PathBuf::from), first);
    assert_eq!(host.runner.calls_to("losetup").len(), 1);
    assert_eq!(host.runner.calls_to("lsblk").len(), 1);
    assert_eq!(host.runner.attached().len(), 1);
}

#[test]
fn reconcile_skips_existing_nodes() {
    let host = FakeHost::new();
    std::fs::File::create(host.partition(1)).unwrap();
    std::fs::File::create(host.partition(2)).unwrap();

    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();
    vm.reconcile_device_nodes().unwrap();

    assert!(host.runner.calls_to("lsblk").is_empty());
    assert!(host.runner.nodes().is_empty());
}

#[test]
fn reconcile_creates_only_the_missing_node() {
    let host = FakeHost::new();
    std::fs::File::create(host.partition(1)).unwrap();

    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    let nodes = host.runner.nodes();
    assert_eq!(nodes, vec![(host.partition(2), 259, 1, 0o644)]);
}

#[test]
fn reconcile_can_be_disabled() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4).with_node_reconcile(false);

    vm.attach_image().unwrap();

    assert!(vm.is_attached());
    assert!(host.runner.calls_to("lsblk").is_empty());
    assert!(!host.partition(1).exists());
}

#[test]
fn unparseable_lsblk_output_is_device_node_error() {
    let host = FakeHost::new();
    host.runner.set_output("lsblk", "7:0\n");

    let mut vm = host.builder(FilesystemKind::Ext4);
    let err = vm.attach_image().unwrap_err();

    assert!(matches!(err, DiskError::DeviceNode { .. }), "got {err:?}");
    // Binding stays recorded so it can still be released
    assert!(vm.is_attached());
    vm.detach_image().unwrap();
    assert!(host.runner.attached().is_empty());
}

#[test]
fn failed_mknod_is_device_node_error() {
    let host = FakeHost::new();
    host.runner.fail("mknod", "Operation not permitted");

    let mut vm = host.builder(FilesystemKind::Ext4);
    let err = vm.attach_image().unwrap_err();

    assert!(matches!(err, DiskError::DeviceNode { .. }));
    assert!(err.to_string().contains("loop0p1"));
}

#[test]
fn failed_losetup_is_attach_error() {
    let host = FakeHost::new();
    host.runner.fail("losetup", "losetup: cannot find an unused loop device");

    let mut vm = host.builder(FilesystemKind::Ext4);
    let err = vm.attach_image().unwrap_err();

    assert!(matches!(err, DiskError::Attach { .. }));
    assert!(err.to_string().contains("cannot find an unused loop device"));
    assert!(!vm.is_attached());
}

#[test]
fn empty_losetup_output_is_attach_error() {
    let host = FakeHost::new();
    host.runner.set_output("losetup", "\n");

    let mut vm = host.builder(FilesystemKind::Ext4);
    let err = vm.attach_image().unwrap_err();

    assert!(matches!(err, DiskError::Attach { .. }));
    assert!(!vm.is_attached());
}

#[test]
fn detach_when_never_attached_is_noop() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    vm.detach_image().unwrap();

    assert!(host.runner.calls().is_empty());
}

#[test]
fn detach_removes_partition_nodes() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    vm.detach_image().unwrap();

    assert!(!vm.is_attached());
    assert_eq!(vm.rootfs_dev_file(), None);
    assert_eq!(vm.uefi_dev_file(), None);
    assert!(!host.partition(1).exists());
    assert!(!host.partition(2).exists());
    assert!(host.runner.attached().is_empty());

    // Second detach has nothing left to do
    vm.detach_image().unwrap();
    assert_eq!(host.runner.calls_to("losetup").len(), 2);
}

#[test]
fn detach_of_vanished_loop_device_only_removes_nodes() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();
    assert!(host.partition(1).exists());
    std::fs::remove_file(&host.loop_device).unwrap();

    vm.detach_image().unwrap();

    assert!(!vm.is_attached());
    assert_eq!(host.runner.calls_to("losetup").len(), 1);
    assert!(!host.partition(1).exists());
    assert!(!host.partition(2).exists());
}

#[test]
fn failed_detach_keeps_binding_for_retry() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    host.runner.fail_matching("losetup", "-d", "Device or resource busy");
    let err = vm.detach_image().unwrap_err();
    assert!(
        matches!(&err, DiskError::Detach { source: CommandError::Failed { stderr, .. }, .. }
            if stderr.contains("busy")),
        "got {err:?}"
    );
    assert_eq!(vm.loop_device(), Some(host.loop_device.as_path()));

    host.runner.clear_failures();
    vm.detach_image().unwrap();
    assert!(!vm.is_attached());
}

#[test]
fn detach_retry_after_node_removal_failure_does_not_unbind_twice() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    // A non-empty directory where the ESP node should be blocks removal
    let esp = host.partition(1);
    std::fs::remove_file(&esp).unwrap();
    std::fs::create_dir(&esp).unwrap();
    std::fs::File::create(esp.join("stray")).unwrap();

    let err = vm.detach_image().unwrap_err();
    assert!(matches!(err, DiskError::RemoveNode { .. }), "got {err:?}");
    assert!(vm.is_attached());
    assert!(host.runner.attached().is_empty());

    std::fs::remove_dir_all(&esp).unwrap();
    vm.detach_image().unwrap();

    assert!(!vm.is_attached());
    assert!(!host.partition(2).exists());
    let detaches: Vec<String> = host
        .runner
        .calls_to("losetup")
        .into_iter()
        .filter(|line| line.starts_with("losetup -d"))
        .collect();
    assert_eq!(detaches.len(), 1);
}

#[test]
fn failed_lsblk_keeps_command_error() {
    let host = FakeHost::new();
    host.runner.time_out("lsblk");

    let mut vm = host.builder(FilesystemKind::Ext4);
    let err = vm.attach_image().unwrap_err();

    assert!(matches!(err, DiskError::PartitionScan { .. }), "got {err:?}");
    assert!(err.is_timeout());
}

// ============================================================================
// PRECONDITIONS
// ============================================================================

#[test]
fn operations_before_attach_fail_with_not_attached() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    let results = [
        vm.create_rootfs().err(),
        vm.create_uefi_fs().err(),
        vm.mount_root_partition().err(),
        vm.mount_uefi_partition().err(),
        vm.reconcile_device_nodes().err(),
        vm.rootfs_partition_uuid().err(),
        vm.uefi_partition_uuid().err(),
    ];

    for err in results {
        assert!(
            matches!(err, Some(DiskError::NotAttached { .. })),
            "expected NotAttached, got {err:?}"
        );
    }
    assert!(host.runner.calls().is_empty());
}

// ============================================================================
// PARTITIONING
// ============================================================================

#[test]
fn partitions_are_written_in_three_steps() {
    let host = FakeHost::new();
    let vm = host.builder(FilesystemKind::Ext4);

    vm.create_partitions().unwrap();

    let image = host.image_path.display().to_string();
    assert_eq!(
        host.runner.calls(),
        vec![
            format!("sgdisk {image} --zap-all"),
            format!("sgdisk {image} --new=1::+100M -t 1:EF00"),
            format!("sgdisk {image} --new=2:: -t 2:8300"),
        ]
    );
}

#[test]
fn partition_failure_stops_at_failing_step() {
    let host = FakeHost::new();
    host.runner
        .fail_matching("sgdisk", "--new=1", "Could not create partition 1");
    let vm = host.builder(FilesystemKind::Ext4);

    let err = vm.create_partitions().unwrap_err();

    assert!(matches!(err, DiskError::Partition { .. }));
    assert!(err.to_string().contains("Could not create partition 1"));
    assert_eq!(host.runner.calls_to("sgdisk").len(), 2);
}

// ============================================================================
// FILESYSTEMS AND MOUNTS
// ============================================================================

#[test]
fn ext4_rootfs_and_esp_are_formatted() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    vm.create_rootfs().unwrap();
    vm.create_uefi_fs().unwrap();

    let p1 = host.partition(1).display().to_string();
    let p2 = host.partition(2).display().to_string();
    assert_eq!(
        host.runner.calls_to("mkfs.ext4"),
        vec![format!(
            "mkfs.ext4 -F -b 4096 -i 8192 -m 0 -L rootfs -E resize=536870912 {p2}"
        )]
    );
    assert_eq!(
        host.runner.calls_to("mkfs.vfat"),
        vec![format!("mkfs.vfat -F 32 -n UEFI {p1}")]
    );
    assert!(host.runner.calls_to("mount").is_empty());
}

#[test]
fn btrfs_rootfs_creates_subvolume_and_unmounts() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Btrfs);
    vm.attach_image().unwrap();

    vm.create_rootfs().unwrap();

    let p2 = host.partition(2).display().to_string();
    let root = host.rootfs_dir.display().to_string();
    let calls = host.runner.calls();
    let tail: Vec<&str> = calls.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            format!("mkfs.btrfs -f -L rootfs {p2}").as_str(),
            format!("mount {p2} {root}").as_str(),
            format!("btrfs subvolume create {root}/@").as_str(),
            format!("umount {root}").as_str(),
        ]
    );
    assert!(host.runner.mounted().is_empty());
}

#[test]
fn btrfs_subvolume_failure_still_unmounts() {
    let host = FakeHost::new();
    host.runner.fail("btrfs", "ERROR: cannot create subvolume");
    let mut vm = host.builder(FilesystemKind::Btrfs);
    vm.attach_image().unwrap();

    let err = vm.create_rootfs().unwrap_err();

    assert!(matches!(err, DiskError::Format { .. }));
    assert!(err.to_string().contains("cannot create subvolume"));
    assert!(host.runner.mounted().is_empty());
    assert_eq!(host.runner.calls_to("umount").len(), 1);
}

#[test]
fn btrfs_root_is_mounted_through_subvolume() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Btrfs);
    vm.attach_image().unwrap();
    vm.create_rootfs().unwrap();

    vm.mount_root_partition().unwrap();

    let p2 = host.partition(2).display().to_string();
    let root = host.rootfs_dir.display().to_string();
    let mounts = host.runner.calls_to("mount");
    assert_eq!(
        mounts.last().map(String::as_str),
        Some(format!("mount {p2} {root} -o defaults,subvol=/@").as_str())
    );
    assert_eq!(host.runner.mounted(), vec![host.rootfs_dir.clone()]);
}

#[test]
fn ext4_root_and_esp_mount_in_order() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    vm.mount_root_partition().unwrap();
    vm.mount_uefi_partition().unwrap();

    let p1 = host.partition(1).display().to_string();
    let p2 = host.partition(2).display().to_string();
    let root = host.rootfs_dir.display().to_string();
    assert_eq!(
        host.runner.calls_to("mount"),
        vec![
            format!("mount {p2} {root}"),
            format!("mount {p1} {root}/boot/efi"),
        ]
    );
    assert!(host.rootfs_dir.join("boot/efi").is_dir());
}

#[test]
fn unmount_goes_esp_first_and_skips_unmounted() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();
    vm.mount_root_partition().unwrap();
    vm.mount_uefi_partition().unwrap();

    vm.unmount_partitions().unwrap();

    let root = host.rootfs_dir.display().to_string();
    assert_eq!(
        host.runner.calls_to("umount"),
        vec![format!("umount {root}/boot/efi"), format!("umount {root}")]
    );

    // Nothing mounted anymore: no further umount calls
    vm.unmount_partitions().unwrap();
    assert_eq!(host.runner.calls_to("umount").len(), 2);
    assert!(!vm.is_root_mounted());
    assert!(!vm.is_uefi_mounted());
}

#[test]
fn unmount_leaves_foreign_mounts_alone() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();
    host.runner
        .run(&HostCommand::new("mount").arg("tmpfs").arg(&host.rootfs_dir))
        .unwrap();

    vm.unmount_partitions().unwrap();

    assert!(host.runner.calls_to("umount").is_empty());
    assert_eq!(host.runner.mounted(), vec![host.rootfs_dir.clone()]);
}

#[test]
fn mounting_twice_is_noop() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    vm.mount_root_partition().unwrap();
    vm.mount_root_partition().unwrap();
    vm.mount_uefi_partition().unwrap();
    vm.mount_uefi_partition().unwrap();

    assert_eq!(host.runner.calls_to("mount").len(), 2);
    assert!(vm.is_root_mounted());
    assert!(vm.is_uefi_mounted());
}

#[test]
fn failed_mount_is_mount_error() {
    let host = FakeHost::new();
    host.runner
        .fail("mount", "mount: wrong fs type, bad option, bad superblock");
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    let err = vm.mount_root_partition().unwrap_err();

    assert!(matches!(err, DiskError::Mount { .. }));
    assert!(err.to_string().contains("bad superblock"));
}

// ============================================================================
// PARTUUID
// ============================================================================

#[test]
fn partition_uuids_are_trimmed() {
    let host = FakeHost::new();
    host.runner
        .queue_output("blkid", "0b9a3c1e-01f4-4d2b-9e47-3c5a8f1d2e6b\n");
    host.runner
        .queue_output("blkid", "4f1e8a2c-7b3d-4c9e-a1f0-6d2b5e8c9a7f\n");
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    assert_eq!(
        vm.rootfs_partition_uuid().unwrap(),
        "0b9a3c1e-01f4-4d2b-9e47-3c5a8f1d2e6b"
    );
    assert_eq!(
        vm.uefi_partition_uuid().unwrap(),
        "4f1e8a2c-7b3d-4c9e-a1f0-6d2b5e8c9a7f"
    );

    let p1 = host.partition(1).display().to_string();
    let p2 = host.partition(2).display().to_string();
    assert_eq!(
        host.runner.calls_to("blkid"),
        vec![
            format!("blkid -s PARTUUID -o value {p2}"),
            format!("blkid -s PARTUUID -o value {p1}"),
        ]
    );
}

#[test]
fn missing_partuuid_is_query_error() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);
    vm.attach_image().unwrap();

    let err = vm.rootfs_partition_uuid().unwrap_err();
    assert!(matches!(err, DiskError::Query { .. }));

    host.runner.fail("blkid", "");
    let err = vm.uefi_partition_uuid().unwrap_err();
    assert!(matches!(err, DiskError::Query { .. }));
}

// ============================================================================
// PIPELINE
// ============================================================================

#[test]
fn full_round_trip_leaves_no_residue() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    vm.create_empty_disk_image().unwrap();
    vm.create_partitions().unwrap();
    vm.attach_image().unwrap();
    vm.create_rootfs().unwrap();
    vm.create_uefi_fs().unwrap();
    vm.mount_root_partition().unwrap();
    vm.mount_uefi_partition().unwrap();
    vm.unmount_partitions().unwrap();
    vm.detach_image().unwrap();

    assert!(host.runner.attached().is_empty());
    assert!(host.runner.mounted().is_empty());
    assert!(!host.partition(1).exists());
    assert!(!host.partition(2).exists());
    assert_eq!(
        std::fs::metadata(&host.image_path).unwrap().len(),
        512 * 1024 * 1024
    );
}

#[test]
fn with_mounted_populates_then_tears_down() {
    let host = FakeHost::new();
    host.runner.set_output("blkid", "5e1c\n");
    let mut vm = host.builder(FilesystemKind::Btrfs);

    let root_seen = vm
        .with_mounted(&CancelHandle::new(), |vm| {
            assert_eq!(host.runner.mounted().len(), 2);
            assert_eq!(vm.rootfs_partition_uuid()?, "5e1c");
            Ok(vm.image().rootfs_dir().to_path_buf())
        })
        .unwrap();

    assert_eq!(root_seen, host.rootfs_dir);
    assert!(!vm.is_attached());
    assert!(host.runner.mounted().is_empty());
    assert!(host.runner.attached().is_empty());
}

#[test]
fn failure_after_attach_tears_down_and_keeps_original_error() {
    let host = FakeHost::new();
    host.runner.fail("mkfs.vfat", "mkfs.vfat: unable to open");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&CancelHandle::new()).unwrap_err();

    assert!(matches!(err, DiskError::Format { .. }));
    assert!(err.to_string().contains("unable to open"));
    assert!(!vm.is_attached());
    assert!(host.runner.attached().is_empty());
    assert!(!host.partition(2).exists());
}

#[test]
fn teardown_failure_does_not_mask_original_error() {
    let host = FakeHost::new();
    host.runner
        .fail_matching("mount", "boot/efi", "mount: special device does not exist");
    host.runner
        .fail_matching("umount", "", "umount: target is busy");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&CancelHandle::new()).unwrap_err();

    assert!(matches!(err, DiskError::Mount { .. }), "got {err:?}");
    // Root stayed mounted because umount failed; binding released anyway
    assert_eq!(host.runner.mounted(), vec![host.rootfs_dir.clone()]);
    assert!(host.runner.attached().is_empty());
}

#[test]
fn populate_error_tears_down() {
    let host = FakeHost::new();
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm
        .with_mounted(&CancelHandle::new(), |_| -> Result<(), DiskError> {
            Err(DiskError::Cancelled { step: "populate" })
        })
        .unwrap_err();

    assert!(err.is_aborted());
    assert!(!vm.is_attached());
    assert!(host.runner.mounted().is_empty());
}

#[test]
fn cancelled_build_never_touches_host() {
    let host = FakeHost::new();
    let cancel = CancelHandle::new();
    cancel.cancel();
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&cancel).unwrap_err();

    assert!(matches!(err, DiskError::Cancelled { step: "create disk image" }));
    assert!(!host.image_path.exists());
    assert!(host.runner.calls().is_empty());
}

#[test]
fn failed_attach_leaves_existing_mount_in_place() {
    let host = FakeHost::new();
    host.runner
        .run(&HostCommand::new("mount").arg("tmpfs").arg(&host.rootfs_dir))
        .unwrap();
    host.runner.fail("losetup", "losetup: cannot find an unused loop device");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&CancelHandle::new()).unwrap_err();

    assert!(matches!(err, DiskError::Attach { .. }), "got {err:?}");
    assert!(host.runner.calls_to("umount").is_empty());
    assert_eq!(host.runner.mounted(), vec![host.rootfs_dir.clone()]);
}

#[test]
fn failure_before_mount_leaves_existing_mount_in_place() {
    let host = FakeHost::new();
    host.runner
        .run(&HostCommand::new("mount").arg("tmpfs").arg(&host.rootfs_dir))
        .unwrap();
    host.runner.fail("mkfs.ext4", "mkfs.ext4: Device or resource busy");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&CancelHandle::new()).unwrap_err();

    assert!(matches!(err, DiskError::Format { .. }), "got {err:?}");
    assert!(host.runner.calls_to("umount").is_empty());
    assert_eq!(host.runner.mounted(), vec![host.rootfs_dir.clone()]);
    assert!(!vm.is_attached());
    assert!(host.runner.attached().is_empty());
}

#[test]
fn cancel_during_build_tears_down() {
    let host = FakeHost::new();
    let cancel = CancelHandle::new();
    let watchdog = cancel.clone();
    host.runner.on_run("mkfs.ext4", move || watchdog.cancel());
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&cancel).unwrap_err();

    assert!(matches!(err, DiskError::Cancelled { step: "format ESP" }), "got {err:?}");
    assert!(host.runner.calls_to("mkfs.vfat").is_empty());
    assert!(!vm.is_attached());
    assert!(host.runner.attached().is_empty());
    assert!(!host.partition(1).exists());
    assert!(!host.partition(2).exists());
}

#[test]
fn cancel_after_mount_survives_failing_teardown() {
    let host = FakeHost::new();
    let cancel = CancelHandle::new();
    let watchdog = cancel.clone();
    host.runner.on_run("mount", move || watchdog.cancel());
    host.runner.fail_matching("losetup", "-d", "Device or resource busy");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&cancel).unwrap_err();

    assert!(matches!(err, DiskError::Cancelled { step: "mount ESP" }), "got {err:?}");
    assert!(host.runner.mounted().is_empty());
    // Detach failed, so the binding is still held for a retry
    assert!(vm.is_attached());

    host.runner.clear_failures();
    vm.teardown().unwrap();
    assert!(host.runner.attached().is_empty());
}

#[test]
fn timed_out_step_tears_down() {
    let host = FakeHost::new();
    host.runner.time_out("mkfs.vfat");
    let mut vm = host.builder(FilesystemKind::Ext4);

    let err = vm.prepare(&CancelHandle::new()).unwrap_err();

    assert!(matches!(err, DiskError::Format { .. }), "got {err:?}");
    assert!(err.is_timeout());
    assert!(err.is_aborted());
    assert!(!vm.is_attached());
    assert!(host.runner.attached().is_empty());
    assert!(!host.partition(1).exists());
    assert!(!host.partition(2).exists());
}

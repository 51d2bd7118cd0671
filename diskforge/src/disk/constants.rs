//! Disk image layout and filesystem constants.
//!
//! Centralized location for every fixed value of the image layout.

/// Disk image file configuration
pub mod image {
    /// Default image size when none is requested (4 GiB, sparse)
    pub const DEFAULT_SIZE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

    /// Permission bits of the image file (owner read/write only)
    pub const FILE_MODE: u32 = 0o600;
}

/// GPT partition layout
pub mod partition {
    /// Index of the EFI System Partition
    pub const ESP_INDEX: u8 = 1;

    /// Index of the root filesystem partition
    pub const ROOTFS_INDEX: u8 = 2;

    /// ESP size as understood by sgdisk (`+100M`)
    pub const ESP_SIZE_MIB: u64 = 100;

    /// GPT type code for the EFI System Partition
    pub const ESP_TYPE_CODE: &str = "EF00";

    /// GPT type code for a Linux filesystem
    pub const ROOTFS_TYPE_CODE: &str = "8300";

    /// Permission bits of reconciled partition device nodes
    pub const DEVICE_NODE_MODE: u32 = 0o644;
}

/// Filesystem creation parameters
pub mod fs {
    /// Label of the root filesystem (ext4 and btrfs)
    pub const ROOTFS_LABEL: &str = "rootfs";

    /// Label of the FAT32 ESP filesystem
    pub const ESP_LABEL: &str = "UEFI";

    /// FAT size passed to mkfs.vfat
    pub const ESP_FAT_SIZE: &str = "32";

    /// Ext4 block size in bytes
    pub const EXT4_BLOCK_SIZE: u64 = 4096;

    /// Ext4 bytes-per-inode ratio
    pub const EXT4_INODE_RATIO: u64 = 8192;

    /// Ext4 reserved blocks percentage (nothing reserved for root)
    pub const EXT4_RESERVED_PERCENT: u64 = 0;

    /// Ext4 online resize reservation, in filesystem blocks
    pub const EXT4_RESIZE_BLOCKS: u64 = 536_870_912;

    /// Btrfs subvolume used as the active root
    pub const BTRFS_ROOT_SUBVOLUME: &str = "@";
}

/// Mount layout under the build root
pub mod mount {
    /// ESP mount point relative to the build root
    pub const EFI_MOUNT_DIR: &str = "boot/efi";

    /// Permission bits for directories created on the way to the ESP mount point
    pub const EFI_MOUNT_DIR_MODE: u32 = 0o755;
}

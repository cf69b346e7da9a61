//! Bit-flag words stored in MD metadata.
//!
//! These words have grown bits over several kernel releases. They are always
//! built with `from_bits_retain`, so bits this crate does not name still
//! survive a decode/encode cycle unchanged.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Legacy per-disk state word of a 0.90 disk descriptor (`MD_DISK_*` bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DiskState: u32 {
        /// Disk is faulty.
        const FAULTY = 1 << 0;
        /// Disk is running but may not be in sync.
        const ACTIVE = 1 << 1;
        /// Disk is in sync with the array.
        const SYNC = 1 << 2;
        /// Disk has been removed from the array.
        const REMOVED = 1 << 3;
        /// A cluster-wide add of this disk is in progress.
        const CLUSTER_ADD = 1 << 4;
        /// Disk is a local spare until the cluster confirms it.
        const CANDIDATE = 1 << 5;
        /// RAID1 member that should only be written, not read.
        const WRITE_MOSTLY = 1 << 9;
        /// Fewer retries, fail early.
        const FAIL_FAST = 1 << 10;
        /// Disk is replacing the member in the same slot.
        const REPLACEMENT = 1 << 17;
        /// Disk is the RAID4/5/6 write journal.
        const JOURNAL = 1 << 18;
    }
}

bitflags! {
    /// Array state word of a 0.90 superblock (`MD_SB_*` bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ArrayState: u32 {
        /// Array was shut down cleanly.
        const CLEAN = 1 << 0;
        /// Array has seen errors.
        const ERRORS = 1 << 1;
        /// Bad-block log has unacknowledged errors.
        const BBM_ERRORS = 1 << 2;
        /// Container-wide reshapes are blocked.
        const BLOCK_CONTAINER_RESHAPE = 1 << 3;
        /// Activation of the array is blocked.
        const BLOCK_VOLUME = 1 << 4;
        /// Array is shared by a cluster.
        const CLUSTERED = 1 << 5;
        /// A write-intent bitmap may be present nearby.
        const BITMAP_PRESENT = 1 << 8;
    }
}

bitflags! {
    /// Feature map of a version-1 superblock (`MD_FEATURE_*` bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FeatureMap: u32 {
        /// `bitmap_offset` is meaningful.
        const BITMAP_OFFSET = 1;
        /// `recovery_offset` is meaningful.
        const RECOVERY_OFFSET = 2;
        /// A reshape is in progress.
        const RESHAPE_ACTIVE = 4;
        /// Bad-block log is present.
        const BAD_BLOCKS = 8;
        /// This device is a replacement.
        const REPLACEMENT = 16;
        /// Reshape runs backwards.
        const RESHAPE_BACKWARDS = 32;
        /// `new_offset` is meaningful.
        const NEW_OFFSET = 64;
        /// Recovery is tracked through the bitmap.
        const RECOVERY_BITMAP = 128;
        /// Array is clustered.
        const CLUSTERED = 256;
        /// Array has a write journal.
        const JOURNAL = 512;
        /// Array uses a partial parity log.
        const PPL = 1024;
        /// PPL area holds multiple consecutive logs.
        const MULTIPLE_PPLS = 2048;
        /// RAID0 layout field is meaningful.
        const RAID0_LAYOUT = 4096;
    }
}

bitflags! {
    /// Per-device flags of a version-1 superblock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DevFlags: u8 {
        /// Device should only be written.
        const WRITE_MOSTLY = 1;
        /// Device uses fail-fast I/O.
        const FAIL_FAST = 2;
    }
}

impl From<DevFlags> for DiskState {
    fn from(flags: DevFlags) -> Self {
        let mut state = DiskState::empty();
        state.set(DiskState::WRITE_MOSTLY, flags.contains(DevFlags::WRITE_MOSTLY));
        state.set(DiskState::FAIL_FAST, flags.contains(DevFlags::FAIL_FAST));
        state
    }
}

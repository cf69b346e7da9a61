//! Format-agnostic superblock decoding.
//!
//! Both superblock generations start with the same magic followed by the
//! major version, so one read is enough to pick a decoder.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::DecodeOptions;
use crate::error::{CodecError, CodecResult, Record};
use crate::layout::{ensure_len, LeReader, MD_SB_MAGIC};
use crate::superblock::{decode_superblock_with, Superblock, MD_SB0_MAJOR_VERSION};
use crate::superblock_v1::{decode_superblock_v1_with, SuperblockV1, MD_SB1_MAJOR_VERSION};

/// A superblock of either generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MdMetadata {
    /// 0.90 superblock.
    V0_90(Superblock),
    /// 1.0, 1.1 or 1.2 superblock.
    V1(SuperblockV1),
}

impl MdMetadata {
    /// Decodes whichever superblock `bytes` holds, with default options.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::decode_with(bytes, &DecodeOptions::default())
    }

    /// Decodes whichever superblock `bytes` holds.
    pub fn decode_with(bytes: &[u8], opts: &DecodeOptions) -> CodecResult<Self> {
        ensure_len(bytes, 8)?;
        let r = LeReader::new(bytes);
        let magic = r.u32(0);
        if magic != MD_SB_MAGIC {
            debug!(actual = magic, "no MD superblock magic");
            return Err(CodecError::BadMagic {
                record: Record::Superblock,
                expected: MD_SB_MAGIC,
                actual: magic,
            });
        }
        match r.u32(4) {
            MD_SB0_MAJOR_VERSION => decode_superblock_with(bytes, opts).map(MdMetadata::V0_90),
            MD_SB1_MAJOR_VERSION => decode_superblock_v1_with(bytes, opts).map(MdMetadata::V1),
            major => {
                debug!(major, "unknown superblock major version");
                Err(CodecError::UnsupportedVersion { major })
            }
        }
    }

    /// Superblock major version.
    pub fn major_version(&self) -> u32 {
        match self {
            MdMetadata::V0_90(_) => MD_SB0_MAJOR_VERSION,
            MdMetadata::V1(_) => MD_SB1_MAJOR_VERSION,
        }
    }

    /// Array UUID.
    pub fn uuid(&self) -> Uuid {
        match self {
            MdMetadata::V0_90(sb) => sb.uuid(),
            MdMetadata::V1(sb) => sb.set_uuid,
        }
    }

    /// Signed RAID level.
    pub fn level(&self) -> i32 {
        match self {
            MdMetadata::V0_90(sb) => sb.generic().level,
            MdMetadata::V1(sb) => sb.level,
        }
    }

    /// Slots in a fully working array.
    pub fn raid_disks(&self) -> u32 {
        match self {
            MdMetadata::V0_90(sb) => sb.generic().raid_disks,
            MdMetadata::V1(sb) => sb.raid_disks,
        }
    }

    /// Superblock update count.
    pub fn events(&self) -> u64 {
        match self {
            MdMetadata::V0_90(sb) => sb.generic().events,
            MdMetadata::V1(sb) => sb.events,
        }
    }
}

#![warn(missing_docs)]

//! mdmeta on-disk codec: Linux MD RAID superblocks, disk tables, PPL and R5-log headers
//!
//! This crate decodes and encodes the fixed-layout little-endian records MD
//! keeps on member devices: the 0.90 and 1.x superblocks, the 0.90 disk
//! descriptor table, partial parity log headers, and RAID4/5/6 write-journal
//! meta blocks. Every operation is a pure function over a caller-owned buffer.

pub mod checksum;
pub mod config;
pub mod disk;
pub mod error;
pub mod flags;
pub mod layout;
pub mod ppl;
pub mod probe;
pub mod r5log;
pub mod role;
pub mod superblock;
pub mod superblock_v1;

pub use checksum::{crc32c, crc32c_raw, md_sb0_checksum, md_sb1_checksum};
pub use config::DecodeOptions;
pub use disk::{decode_disk_table, encode_disk_table, DiskDescriptor, DiskTable};
pub use error::{CodecError, CodecResult, Record};
pub use flags::{ArrayState, DevFlags, DiskState, FeatureMap};
pub use layout::{md_new_size_sectors, MetadataFormat, MD_SB_MAGIC, PPL_HDR_MAX_ENTRIES, R5LOG_MAGIC};
pub use ppl::{
    decode_ppl_header, decode_ppl_header_with, encode_ppl_header, latest_ppl_header, latest_ppl_header_with,
    ppl_signature, PplDecoded, PplDiagnostic, PplEntry, PplHeader,
};
pub use probe::MdMetadata;
pub use r5log::{
    decode_r5log_block, decode_r5log_block_with, decode_r5log_header, decode_r5log_payloads, encode_r5log_block,
    encode_r5log_header, r5log_uuid_seed, verify_r5log_block, R5LogBlock, R5LogHeader, R5LogPayload,
};
pub use role::{decode_role_state, decode_role_state_strict, encode_role_state, lenient_role, DiskRole, DiskStatus};
pub use superblock::{
    decode_superblock, decode_superblock_with, encode_superblock, Personality, RaidLevel, Superblock,
    SuperblockGeneric,
};
pub use superblock_v1::{
    decode_superblock_v1, decode_superblock_v1_with, encode_superblock_v1, PplLocation, RoleTable, SuperblockV1,
};

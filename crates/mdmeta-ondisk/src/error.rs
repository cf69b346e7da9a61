//! Error types for the metadata codec.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// The on-disk record an error was raised against.
///
/// Lets callers tell "this is not an MD member" (superblock errors) apart from
/// "the journal header is damaged" (PPL / R5-log errors) when the error kind
/// alone is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Record {
    /// The 0.90 superblock.
    Superblock,
    /// The version-1 superblock (metadata 1.0 / 1.1 / 1.2).
    SuperblockV1,
    /// A PPL header as a whole.
    PplHeader,
    /// A single entry inside a PPL header.
    PplEntry,
    /// An R5-log meta block.
    R5Log,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Superblock => write!(f, "superblock 0.90"),
            Record::SuperblockV1 => write!(f, "superblock 1.x"),
            Record::PplHeader => write!(f, "PPL header"),
            Record::PplEntry => write!(f, "PPL entry"),
            Record::R5Log => write!(f, "R5-log meta block"),
        }
    }
}

/// Error variants for decode and encode operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer is smaller than the record it should hold.
    #[error("Buffer too short: need {needed} bytes, got {actual}")]
    TooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes supplied.
        actual: usize,
    },

    /// The magic number does not identify the expected record.
    #[error("Bad magic in {record}: expected {expected:#x}, got {actual:#x}")]
    BadMagic {
        /// The record being decoded.
        record: Record,
        /// The expected magic (or PPL signature).
        expected: u32,
        /// The value found on disk.
        actual: u32,
    },

    /// The record's version field does not match the only supported value.
    #[error("Bad version in {record}: expected {expected:#x}, got {actual:#x}")]
    BadVersion {
        /// The record being decoded.
        record: Record,
        /// The supported version.
        expected: u32,
        /// The version found on disk.
        actual: u32,
    },

    /// Stored and computed checksums differ.
    #[error("Checksum mismatch in {record}: stored {stored:#x}, computed {computed:#x}")]
    ChecksumMismatch {
        /// The record being decoded.
        record: Record,
        /// Checksum read from disk.
        stored: u32,
        /// Checksum computed over the buffer.
        computed: u32,
    },

    /// More disks than the layout has room for.
    #[error("Too many disks: {count} (max {max})")]
    TooManyDisks {
        /// Requested or declared disk count.
        count: usize,
        /// Structural maximum.
        max: usize,
    },

    /// More PPL entries than the header has room for.
    #[error("Too many PPL entries: {count} (max {max})")]
    TooManyEntries {
        /// Requested or declared entry count.
        count: usize,
        /// Structural maximum.
        max: usize,
    },

    /// The superblock major version selects a layout this codec does not decode here.
    #[error("Unsupported superblock major version {major}")]
    UnsupportedVersion {
        /// The major version found on disk.
        major: u32,
    },

    /// A role value that cannot be accepted under strict decoding.
    #[error("Invalid disk role {raw_role:#06x}: {reason}")]
    InvalidRole {
        /// The raw 16-bit role (or slot index truncated to 16 bits).
        raw_role: u16,
        /// Why the role was rejected.
        reason: &'static str,
    },

    /// A size field that must be sector-aligned is not.
    #[error("Not aligned: {value} is not a multiple of {alignment}")]
    NotAligned {
        /// The offending value.
        value: u64,
        /// The required alignment.
        alignment: u64,
    },

    /// The in-memory superblock cannot be represented in the fixed layout.
    #[error("Invalid superblock: {reason}")]
    InvalidSuperblock {
        /// Description of the violated constraint.
        reason: String,
    },

    /// An R5-log payload descriptor has an unknown type.
    #[error("Invalid R5-log payload type {payload_type} at offset {offset}")]
    InvalidPayload {
        /// The raw payload type.
        payload_type: u16,
        /// Byte offset of the descriptor inside the meta block.
        offset: usize,
    },
}

impl CodecError {
    /// Returns the record a content error refers to, if the variant carries one.
    pub fn record(&self) -> Option<Record> {
        match self {
            CodecError::BadMagic { record, .. }
            | CodecError::BadVersion { record, .. }
            | CodecError::ChecksumMismatch { record, .. } => Some(*record),
            _ => None,
        }
    }

    /// True for errors that mean the buffer or structure can never hold the format.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CodecError::TooShort { .. }
                | CodecError::TooManyDisks { .. }
                | CodecError::TooManyEntries { .. }
        )
    }
}

//! 0.90 disk descriptors and the descriptor table.
//!
//! The table holds up to [`MD_SB_DISKS`] 128-byte records starting at word
//! [`MD_SB_DISKS_OFFSET`] of the superblock. Record order is physical slot
//! order and is preserved exactly; it is never sorted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CodecError, CodecResult};
use crate::flags::DiskState;
use crate::layout::{
    ensure_len, word_bytes, LeReader, LeWriter, MD_SB_DESCRIPTOR_BYTES, MD_SB_DESCRIPTOR_WORDS, MD_SB_DISKS,
    MD_SB_DISKS_BYTES, MD_SB_DISKS_OFFSET,
};
use crate::role::{bounded_role, legacy_raw_role, lenient_role, DiskRole, DiskStatus};

const DESC_NUMBER: usize = 0;
const DESC_MAJOR: usize = 1;
const DESC_MINOR: usize = 2;
const DESC_RAID_DISK: usize = 3;
const DESC_STATE: usize = 4;
const DESC_RESERVED: usize = 5;
const DESC_RESERVED_WORDS: usize = MD_SB_DESCRIPTOR_WORDS - DESC_RESERVED;

/// One member's record in a 0.90 superblock.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskDescriptor {
    /// Device number within the whole set.
    pub number: u32,
    /// Device major number.
    pub major: u32,
    /// Device minor number.
    pub minor: u32,
    /// Slot index of the device in the array.
    pub raid_disk: u32,
    /// Legacy state word.
    pub state: DiskState,
    /// Unused descriptor words, passed through unchanged.
    pub reserved: [u32; DESC_RESERVED_WORDS],
}

impl DiskDescriptor {
    /// Creates a descriptor with zeroed reserved words.
    pub fn new(number: u32, major: u32, minor: u32, raid_disk: u32, state: DiskState) -> Self {
        Self {
            number,
            major,
            minor,
            raid_disk,
            state,
            reserved: [0; DESC_RESERVED_WORDS],
        }
    }

    /// Decodes the 128-byte record at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        ensure_len(bytes, MD_SB_DESCRIPTOR_BYTES)?;
        let r = LeReader::new(bytes);
        Ok(Self {
            number: r.word(DESC_NUMBER),
            major: r.word(DESC_MAJOR),
            minor: r.word(DESC_MINOR),
            raid_disk: r.word(DESC_RAID_DISK),
            state: DiskState::from_bits_retain(r.word(DESC_STATE)),
            reserved: r.words::<DESC_RESERVED_WORDS>(DESC_RESERVED),
        })
    }

    /// Writes the record into the first 128 bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) {
        let mut w = LeWriter::new(out);
        w.put_word(DESC_NUMBER, self.number);
        w.put_word(DESC_MAJOR, self.major);
        w.put_word(DESC_MINOR, self.minor);
        w.put_word(DESC_RAID_DISK, self.raid_disk);
        w.put_word(DESC_STATE, self.state.bits());
        w.put_words(DESC_RESERVED, &self.reserved);
    }

    /// True when every word of the record is zero, i.e. an unused slot.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Raw 16-bit role implied by the slot index and state word.
    pub fn raw_role(&self) -> u16 {
        legacy_raw_role(self.raid_disk, self.state)
    }

    /// Role of this member in an array of `raid_disks` slots.
    pub fn role(&self, raid_disks: u32) -> DiskRole {
        lenient_role(self.raw_role(), self.state, raid_disks)
    }

    /// Role of this member, rejecting out-of-range slots when `strict` is set.
    pub fn role_checked(&self, raid_disks: u32, strict: bool) -> CodecResult<DiskRole> {
        bounded_role(self.raw_role(), self.state, raid_disks, strict)
    }

    /// Role and state bits together.
    pub fn status(&self, raid_disks: u32) -> DiskStatus {
        DiskStatus::new(self.role(raid_disks), self.state)
    }
}

/// Ordered, capacity-checked sequence of disk descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<DiskDescriptor>", into = "Vec<DiskDescriptor>")]
pub struct DiskTable {
    disks: Vec<DiskDescriptor>,
}

impl DiskTable {
    /// Structural capacity of the table.
    pub const CAPACITY: usize = MD_SB_DISKS;

    /// Wraps `disks`, failing with [`CodecError::TooManyDisks`] past the capacity.
    pub fn new(disks: Vec<DiskDescriptor>) -> CodecResult<Self> {
        if disks.len() > Self::CAPACITY {
            return Err(CodecError::TooManyDisks {
                count: disks.len(),
                max: Self::CAPACITY,
            });
        }
        Ok(Self { disks })
    }

    /// Number of descriptors present.
    pub fn len(&self) -> usize {
        self.disks.len()
    }

    /// True when no descriptor is present.
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Descriptor in slot `index`.
    pub fn get(&self, index: usize) -> Option<&DiskDescriptor> {
        self.disks.get(index)
    }

    /// Iterates descriptors in slot order.
    pub fn iter(&self) -> std::slice::Iter<'_, DiskDescriptor> {
        self.disks.iter()
    }

    /// Descriptors as a slice, in slot order.
    pub fn as_slice(&self) -> &[DiskDescriptor] {
        &self.disks
    }

    /// Appends a descriptor in the next slot.
    pub fn push(&mut self, disk: DiskDescriptor) -> CodecResult<()> {
        if self.disks.len() == Self::CAPACITY {
            return Err(CodecError::TooManyDisks {
                count: self.disks.len() + 1,
                max: Self::CAPACITY,
            });
        }
        self.disks.push(disk);
        Ok(())
    }

    /// Unwraps the descriptors.
    pub fn into_inner(self) -> Vec<DiskDescriptor> {
        self.disks
    }
}

impl TryFrom<Vec<DiskDescriptor>> for DiskTable {
    type Error = CodecError;

    fn try_from(disks: Vec<DiskDescriptor>) -> CodecResult<Self> {
        Self::new(disks)
    }
}

impl From<DiskTable> for Vec<DiskDescriptor> {
    fn from(table: DiskTable) -> Self {
        table.disks
    }
}

impl<'a> IntoIterator for &'a DiskTable {
    type Item = &'a DiskDescriptor;
    type IntoIter = std::slice::Iter<'a, DiskDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.disks.iter()
    }
}

/// Decodes `count` descriptors from the table region of a superblock buffer.
///
/// `bytes` is the superblock buffer; the table starts at word
/// [`MD_SB_DISKS_OFFSET`].
pub fn decode_disk_table(bytes: &[u8], count: u8) -> CodecResult<Vec<DiskDescriptor>> {
    let count = count as usize;
    if count > MD_SB_DISKS {
        debug!(count, max = MD_SB_DISKS, "disk count exceeds table capacity");
        return Err(CodecError::TooManyDisks {
            count,
            max: MD_SB_DISKS,
        });
    }
    let start = word_bytes(MD_SB_DISKS_OFFSET);
    ensure_len(bytes, start + count * MD_SB_DESCRIPTOR_BYTES)?;
    bytes[start..]
        .chunks_exact(MD_SB_DESCRIPTOR_BYTES)
        .take(count)
        .map(DiskDescriptor::decode)
        .collect()
}

/// Encodes `disks` into a full-size table region; unused slots are zero.
pub fn encode_disk_table(disks: &[DiskDescriptor]) -> CodecResult<[u8; MD_SB_DISKS_BYTES]> {
    if disks.len() > MD_SB_DISKS {
        debug!(count = disks.len(), max = MD_SB_DISKS, "too many disks to encode");
        return Err(CodecError::TooManyDisks {
            count: disks.len(),
            max: MD_SB_DISKS,
        });
    }
    let mut out = [0u8; MD_SB_DISKS_BYTES];
    for (disk, slot) in disks.iter().zip(out.chunks_exact_mut(MD_SB_DESCRIPTOR_BYTES)) {
        disk.encode_into(slot);
    }
    Ok(out)
}

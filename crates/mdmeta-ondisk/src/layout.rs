//! Layout constants, little-endian field access, and superblock placement.
//!
//! Every record in this crate is a fixed-layout little-endian structure. The
//! readers and writers here are the only place that touches raw offsets; the
//! record modules describe *which* offset holds *which* field.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Sector size used by every MD offset and size field.
pub const SECTOR_SIZE: u64 = 512;

/// 0.90 superblock magic.
pub const MD_SB_MAGIC: u32 = 0xa92b4efc;
/// Size of a 0.90 superblock record in bytes.
pub const MD_SB_BYTES: usize = 4096;
/// Size of a 0.90 superblock record in 32-bit words.
pub const MD_SB_WORDS: usize = MD_SB_BYTES / 4;
/// Size of a 0.90 superblock record in sectors.
pub const MD_SB_SECTORS: u64 = MD_SB_BYTES as u64 / SECTOR_SIZE;

/// Word offset of the generic region.
pub const MD_SB_GENERIC_OFFSET: usize = 0;
/// Word offset of the personality region.
pub const MD_SB_PERSONALITY_OFFSET: usize = 64;
/// Word offset of the disk descriptor table.
pub const MD_SB_DISKS_OFFSET: usize = 128;
/// Word offset of the trailing "this disk" descriptor.
pub const MD_SB_DESCRIPTOR_OFFSET: usize = 992;

/// Constant words at the start of the generic region.
pub const MD_SB_GENERIC_CONSTANT_WORDS: usize = 32;
/// State words following the constant words.
pub const MD_SB_GENERIC_STATE_WORDS: usize = 32;
/// Total generic region size in words.
pub const MD_SB_GENERIC_WORDS: usize = MD_SB_GENERIC_CONSTANT_WORDS + MD_SB_GENERIC_STATE_WORDS;
/// Personality region size in words.
pub const MD_SB_PERSONALITY_WORDS: usize = 64;
/// Size of one disk descriptor in words.
pub const MD_SB_DESCRIPTOR_WORDS: usize = 32;
/// Maximum number of disk descriptors in a 0.90 superblock.
pub const MD_SB_DISKS: usize = 27;
/// Size of the disk descriptor table in words.
pub const MD_SB_DISKS_WORDS: usize = MD_SB_DISKS * MD_SB_DESCRIPTOR_WORDS;
/// Words left between the disk table and the trailing descriptor.
pub const MD_SB_RESERVED_WORDS: usize = MD_SB_WORDS
    - MD_SB_GENERIC_WORDS
    - MD_SB_PERSONALITY_WORDS
    - MD_SB_DISKS_WORDS
    - MD_SB_DESCRIPTOR_WORDS;
/// Words that must be identical across the superblocks of one array.
pub const MD_SB_EQUAL_WORDS: usize = MD_SB_GENERIC_WORDS + MD_SB_PERSONALITY_WORDS + MD_SB_DISKS_WORDS;

/// Size of the personality region in bytes.
pub const MD_SB_PERSONALITY_BYTES: usize = MD_SB_PERSONALITY_WORDS * 4;
/// Size of one disk descriptor in bytes.
pub const MD_SB_DESCRIPTOR_BYTES: usize = MD_SB_DESCRIPTOR_WORDS * 4;
/// Size of the whole disk descriptor table in bytes.
pub const MD_SB_DISKS_BYTES: usize = MD_SB_DISKS_WORDS * 4;

/// Space reserved at the end of a member device for a 0.90 superblock.
pub const MD_RESERVED_BYTES: u64 = 64 * 1024;
/// [`MD_RESERVED_BYTES`] in sectors.
pub const MD_RESERVED_SECTORS: u64 = MD_RESERVED_BYTES / SECTOR_SIZE;

/// Role value of a spare device.
pub const MD_DISK_ROLE_SPARE: u16 = 0xffff;
/// Role value of a faulty device.
pub const MD_DISK_ROLE_FAULTY: u16 = 0xfffe;
/// Role value of a write-journal device.
pub const MD_DISK_ROLE_JOURNAL: u16 = 0xfffd;
/// Roles at or above this value are sentinels, never slot numbers.
pub const MD_DISK_ROLE_MAX: u16 = 0xff00;

/// Size of the fixed part of a version-1 superblock.
pub const MD_SB1_FIXED_BYTES: usize = 256;
/// Largest role table that still fits a 4 KiB version-1 superblock.
pub const MD_SB1_MAX_DEVS: usize = (MD_SB_BYTES - MD_SB1_FIXED_BYTES) / 2;

/// Size of a PPL header record.
pub const PPL_HEADER_SIZE: usize = 4096;
/// Size of the reserved prologue of a PPL header.
pub const PPL_HDR_RESERVED: usize = 512;
/// Size of one PPL header entry.
pub const PPL_ENTRY_SIZE: usize = 24;
/// Bytes available to entries after the prologue and the fixed header fields.
pub const PPL_HDR_ENTRY_SPACE: usize = PPL_HEADER_SIZE - PPL_HDR_RESERVED - 4 * 4 - 8;
/// Structural entry capacity of a PPL header.
pub const PPL_HDR_MAX_ENTRIES: usize = PPL_HDR_ENTRY_SPACE / PPL_ENTRY_SIZE;

/// R5-log meta block magic.
pub const R5LOG_MAGIC: u32 = 0x6433c509;
/// R5-log meta block version.
pub const R5LOG_VERSION: u8 = 0x1;
/// Size of the fixed R5-log meta block header.
pub const R5LOG_HEADER_SIZE: usize = 32;
/// Size of an R5-log meta block (one page).
pub const R5LOG_BLOCK_SIZE: usize = 4096;

/// Converts a word offset into a byte offset.
pub const fn word_bytes(words: usize) -> usize {
    words * 4
}

/// Reproduces `MD_NEW_SIZE_SECTORS`: rounds the device size down to the
/// reserved granularity and subtracts the reserved area.
///
/// Returns `None` when the device is smaller than the reserved area.
pub fn md_new_size_sectors(sectors: u64) -> Option<u64> {
    (sectors & !(MD_RESERVED_SECTORS - 1)).checked_sub(MD_RESERVED_SECTORS)
}

/// Fails with [`CodecError::TooShort`] unless `buf` holds at least `needed` bytes.
pub fn ensure_len(buf: &[u8], needed: usize) -> CodecResult<()> {
    if buf.len() < needed {
        return Err(CodecError::TooShort {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Read-only little-endian view over a record buffer.
///
/// Offsets are byte offsets. Callers check the buffer length once with
/// [`ensure_len`] before reading fields.
#[derive(Debug, Clone, Copy)]
pub struct LeReader<'a> {
    buf: &'a [u8],
}

impl<'a> LeReader<'a> {
    /// Wraps a buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Reads a byte.
    pub fn u8(&self, offset: usize) -> u8 {
        self.buf[offset]
    }

    /// Reads a little-endian u16.
    pub fn u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.buf[offset..offset + 2])
    }

    /// Reads a little-endian i16.
    pub fn i16(&self, offset: usize) -> i16 {
        LittleEndian::read_i16(&self.buf[offset..offset + 2])
    }

    /// Reads a little-endian u32.
    pub fn u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.buf[offset..offset + 4])
    }

    /// Reads a little-endian i32.
    pub fn i32(&self, offset: usize) -> i32 {
        LittleEndian::read_i32(&self.buf[offset..offset + 4])
    }

    /// Reads a little-endian u64.
    pub fn u64(&self, offset: usize) -> u64 {
        LittleEndian::read_u64(&self.buf[offset..offset + 8])
    }

    /// Reads the 32-bit word at word index `word`.
    pub fn word(&self, word: usize) -> u32 {
        self.u32(word_bytes(word))
    }

    /// Reads `N` consecutive words starting at word index `word`.
    pub fn words<const N: usize>(&self, word: usize) -> [u32; N] {
        let mut out = [0u32; N];
        LittleEndian::read_u32_into(&self.buf[word_bytes(word)..word_bytes(word + N)], &mut out);
        out
    }

    /// Copies `N` bytes starting at `offset`.
    pub fn bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[offset..offset + N]);
        out
    }
}

/// Little-endian writer over a caller-owned output buffer.
#[derive(Debug)]
pub struct LeWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> LeWriter<'a> {
    /// Wraps an output buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    /// Writes a byte.
    pub fn put_u8(&mut self, offset: usize, value: u8) {
        self.buf[offset] = value;
    }

    /// Writes a little-endian u16.
    pub fn put_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.buf[offset..offset + 2], value);
    }

    /// Writes a little-endian i16.
    pub fn put_i16(&mut self, offset: usize, value: i16) {
        LittleEndian::write_i16(&mut self.buf[offset..offset + 2], value);
    }

    /// Writes a little-endian u32.
    pub fn put_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.buf[offset..offset + 4], value);
    }

    /// Writes a little-endian i32.
    pub fn put_i32(&mut self, offset: usize, value: i32) {
        LittleEndian::write_i32(&mut self.buf[offset..offset + 4], value);
    }

    /// Writes a little-endian u64.
    pub fn put_u64(&mut self, offset: usize, value: u64) {
        LittleEndian::write_u64(&mut self.buf[offset..offset + 8], value);
    }

    /// Writes the 32-bit word at word index `word`.
    pub fn put_word(&mut self, word: usize, value: u32) {
        self.put_u32(word_bytes(word), value);
    }

    /// Writes consecutive words starting at word index `word`.
    pub fn put_words(&mut self, word: usize, values: &[u32]) {
        let start = word_bytes(word);
        LittleEndian::write_u32_into(values, &mut self.buf[start..start + values.len() * 4]);
    }

    /// Copies `bytes` to `offset`.
    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// On-disk metadata flavours and where each keeps its superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataFormat {
    /// 0.90: at the end of the device, inside the last 64 KiB-aligned 64 KiB.
    V0_90,
    /// 1.0: at least 8 KiB from the end, 4 KiB aligned.
    V1_0,
    /// 1.1: at the start of the device.
    V1_1,
    /// 1.2: 4 KiB from the start of the device.
    V1_2,
}

impl MetadataFormat {
    /// Superblock major version used by this format.
    pub fn major_version(&self) -> u32 {
        match self {
            MetadataFormat::V0_90 => 0,
            MetadataFormat::V1_0 | MetadataFormat::V1_1 | MetadataFormat::V1_2 => 1,
        }
    }

    /// Byte offset of the superblock on a device of `device_bytes` bytes.
    ///
    /// Returns `None` when the device is too small to hold the superblock.
    pub fn superblock_offset(&self, device_bytes: u64) -> Option<u64> {
        let sectors = device_bytes / SECTOR_SIZE;
        let sector = match self {
            MetadataFormat::V0_90 => md_new_size_sectors(sectors)?,
            MetadataFormat::V1_0 => sectors.checked_sub(8 * 2)? & !(4 * 2 - 1),
            MetadataFormat::V1_1 => 0,
            MetadataFormat::V1_2 => 8,
        };
        if sector + MD_SB_SECTORS > sectors {
            return None;
        }
        Some(sector * SECTOR_SIZE)
    }
}

impl std::fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataFormat::V0_90 => write!(f, "0.90"),
            MetadataFormat::V1_0 => write!(f, "1.0"),
            MetadataFormat::V1_1 => write!(f, "1.1"),
            MetadataFormat::V1_2 => write!(f, "1.2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_offsets_tile_the_record() {
        assert_eq!(MD_SB_GENERIC_WORDS, MD_SB_PERSONALITY_OFFSET);
        assert_eq!(MD_SB_PERSONALITY_OFFSET + MD_SB_PERSONALITY_WORDS, MD_SB_DISKS_OFFSET);
        assert_eq!(MD_SB_DISKS_OFFSET + MD_SB_DISKS_WORDS, MD_SB_DESCRIPTOR_OFFSET);
        assert_eq!(MD_SB_RESERVED_WORDS, 0);
        assert_eq!(MD_SB_DESCRIPTOR_OFFSET + MD_SB_DESCRIPTOR_WORDS, MD_SB_WORDS);
    }

    #[test]
    fn test_ppl_capacity() {
        assert_eq!(PPL_HDR_ENTRY_SPACE, 3560);
        assert_eq!(PPL_HDR_MAX_ENTRIES, 148);
    }

    #[test]
    fn test_md_new_size_sectors() {
        assert_eq!(md_new_size_sectors(1000), Some(896 - 128));
        assert_eq!(md_new_size_sectors(1024), Some(896));
        assert_eq!(md_new_size_sectors(127), None);
    }

    #[test]
    fn test_superblock_offsets() {
        let dev = 10 * 1024 * 1024;
        assert_eq!(
            MetadataFormat::V0_90.superblock_offset(dev),
            Some(dev - MD_RESERVED_BYTES)
        );
        assert_eq!(MetadataFormat::V1_0.superblock_offset(dev), Some(dev - 8192));
        assert_eq!(MetadataFormat::V1_1.superblock_offset(dev), Some(0));
        assert_eq!(MetadataFormat::V1_2.superblock_offset(dev), Some(4096));
        assert_eq!(MetadataFormat::V1_2.superblock_offset(4096), None);
        assert_eq!(MetadataFormat::V0_90.superblock_offset(4096), None);
    }

    #[test]
    fn test_v1_0_offset_is_4k_aligned() {
        let dev = 10 * 1024 * 1024 + 3 * 512;
        let off = MetadataFormat::V1_0.superblock_offset(dev).unwrap();
        assert_eq!(off % 4096, 0);
        assert!(dev - off >= 8192);
    }

    #[test]
    fn test_reader_writer_roundtrip() {
        let mut buf = [0u8; 32];
        {
            let mut w = LeWriter::new(&mut buf);
            w.put_u32(0, 0xa92b4efc);
            w.put_u64(8, 0x0102030405060708);
            w.put_i32(16, -1);
            w.put_words(5, &[7, 8]);
        }
        let r = LeReader::new(&buf);
        assert_eq!(&buf[0..4], &[0xfc, 0x4e, 0x2b, 0xa9]);
        assert_eq!(r.word(0), MD_SB_MAGIC);
        assert_eq!(r.u64(8), 0x0102030405060708);
        assert_eq!(r.i32(16), -1);
        assert_eq!(r.words::<2>(5), [7, 8]);
    }

    #[test]
    fn test_ensure_len() {
        assert!(ensure_len(&[0u8; 10], 10).is_ok());
        assert_eq!(
            ensure_len(&[0u8; 9], 10),
            Err(CodecError::TooShort { needed: 10, actual: 9 })
        );
    }
}

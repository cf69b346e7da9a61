//! Checksums used by MD metadata.
//!
//! Superblocks carry an additive checksum: the little-endian words of the
//! record are summed into 64 bits and the carry is folded back into 32 bits.
//! PPL and R5-log records use CRC32C (Castagnoli); R5-log seeds the raw CRC
//! with a CRC of the array UUID and does not invert the result.

use tracing::trace;

use crate::layout::LeReader;

/// Generates the CRC32C lookup table at compile time.
const fn make_crc32c_table() -> [u32; 256] {
    const POLY: u32 = 0x82F63B78;
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

const CRC32C_TABLE: [u32; 256] = make_crc32c_table();

/// Raw CRC32C update: no pre- or post-inversion (the kernel's `crc32c_le`).
pub fn crc32c_raw(seed: u32, data: &[u8]) -> u32 {
    let mut crc = seed;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32C_TABLE[idx];
    }
    crc
}

/// Standard CRC32C of `data` (`~crc32c_le(~0, data)`).
pub fn crc32c(data: &[u8]) -> u32 {
    !crc32c_raw(!0, data)
}

/// Folds a 64-bit word sum into the 32-bit on-disk checksum.
fn fold(sum: u64) -> u32 {
    ((sum & 0xffff_ffff) + (sum >> 32)) as u32
}

/// Additive checksum of a 0.90 superblock.
///
/// Sums every 32-bit word of `record`, treating the word at
/// `csum_word` as zero.
pub fn md_sb0_checksum(record: &[u8], csum_word: usize) -> u32 {
    let reader = LeReader::new(record);
    let sum: u64 = (0..record.len() / 4)
        .filter(|&w| w != csum_word)
        .map(|w| reader.word(w) as u64)
        .sum();
    let csum = fold(sum);
    trace!(words = record.len() / 4, csum, "computed 0.90 superblock checksum");
    csum
}

/// Additive checksum of a version-1 superblock.
///
/// `record` must be exactly the checksummed span (`256 + 2 * max_dev`
/// bytes). The field at byte `csum_offset` is treated as zero and a trailing
/// half word is added as a u16.
pub fn md_sb1_checksum(record: &[u8], csum_offset: usize) -> u32 {
    let reader = LeReader::new(record);
    let words = record.len() / 4;
    let mut sum: u64 = (0..words)
        .filter(|&w| w * 4 != csum_offset)
        .map(|w| reader.word(w) as u64)
        .sum();
    if record.len() % 4 >= 2 {
        sum += reader.u16(words * 4) as u64;
    }
    let csum = fold(sum);
    trace!(bytes = record.len(), csum, "computed 1.x superblock checksum");
    csum
}

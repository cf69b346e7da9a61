//! RAID4/5/6 write-journal meta blocks.
//!
//! Each meta block is one 4 KiB page: a 32-byte header followed by payload
//! descriptors up to `meta_size`. The block checksum is a raw CRC32C seeded
//! with the CRC of the array UUID.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checksum::crc32c_raw;
use crate::config::DecodeOptions;
use crate::error::{CodecError, CodecResult, Record};
use crate::layout::{ensure_len, LeReader, LeWriter, R5LOG_BLOCK_SIZE, R5LOG_HEADER_SIZE, R5LOG_MAGIC, R5LOG_VERSION};

const R5LOG_OFF_MAGIC: usize = 0;
const R5LOG_OFF_CHECKSUM: usize = 4;
const R5LOG_OFF_VERSION: usize = 8;
const R5LOG_OFF_PADDING1: usize = 9;
const R5LOG_OFF_PADDING2: usize = 10;
const R5LOG_OFF_META_SIZE: usize = 12;
const R5LOG_OFF_SEQ: usize = 16;
const R5LOG_OFF_POSITION: usize = 24;

/// Payload type of a data payload.
pub const R5LOG_PAYLOAD_DATA: u16 = 0;
/// Payload type of a parity payload.
pub const R5LOG_PAYLOAD_PARITY: u16 = 1;
/// Payload type of a flush payload.
pub const R5LOG_PAYLOAD_FLUSH: u16 = 2;

const PAYLOAD_HEADER_SIZE: usize = 4;
const DATA_PARITY_BASE_SIZE: usize = 16;
const FLUSH_BASE_SIZE: usize = 8;
const SECTORS_PER_PAGE: u32 = 8;

/// Fixed header of an R5-log meta block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct R5LogHeader {
    /// Stored block checksum.
    pub checksum: u32,
    /// Zero on a well-formed record, passed through.
    pub padding1: u8,
    /// Zero on a well-formed record, passed through.
    pub padding2: u16,
    /// Bytes of the block in use, header included.
    pub meta_size: u32,
    /// Sequence number of the block.
    pub seq: u64,
    /// Sector of the block in the log.
    pub position: u64,
}

/// A payload descriptor following the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum R5LogPayload {
    /// Logged data pages.
    Data {
        /// Payload flags.
        flags: u16,
        /// Data size in sectors.
        size_sectors: u32,
        /// Array sector of the data.
        location: u64,
        /// One CRC32C per 4 KiB page.
        checksums: Vec<u32>,
    },
    /// Logged parity pages.
    Parity {
        /// Payload flags.
        flags: u16,
        /// Parity size in sectors.
        size_sectors: u32,
        /// Stripe sector of the parity.
        location: u64,
        /// One CRC32C per 4 KiB page.
        checksums: Vec<u32>,
    },
    /// Stripes whose log entries are no longer needed.
    Flush {
        /// Payload flags.
        flags: u16,
        /// Stripe sectors.
        stripes: Vec<u64>,
    },
}

impl R5LogPayload {
    /// On-disk payload type.
    pub fn payload_type(&self) -> u16 {
        match self {
            R5LogPayload::Data { .. } => R5LOG_PAYLOAD_DATA,
            R5LogPayload::Parity { .. } => R5LOG_PAYLOAD_PARITY,
            R5LogPayload::Flush { .. } => R5LOG_PAYLOAD_FLUSH,
        }
    }

    /// Bytes the descriptor occupies in the meta block.
    pub fn encoded_len(&self) -> usize {
        match self {
            R5LogPayload::Data { checksums, .. } | R5LogPayload::Parity { checksums, .. } => {
                DATA_PARITY_BASE_SIZE + 4 * checksums.len()
            }
            R5LogPayload::Flush { stripes, .. } => FLUSH_BASE_SIZE + 8 * stripes.len(),
        }
    }
}

/// A decoded meta block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct R5LogBlock {
    /// Block header.
    pub header: R5LogHeader,
    /// Payload descriptors in block order.
    pub payloads: Vec<R5LogPayload>,
}

/// Checksum seed derived from the array UUID.
pub fn r5log_uuid_seed(uuid: &Uuid) -> u32 {
    crc32c_raw(!0, uuid.as_bytes())
}

fn block_checksum(block: &[u8], seed: u32) -> u32 {
    let mut copy = [0u8; R5LOG_BLOCK_SIZE];
    copy.copy_from_slice(&block[..R5LOG_BLOCK_SIZE]);
    LeWriter::new(&mut copy).put_u32(R5LOG_OFF_CHECKSUM, 0);
    crc32c_raw(seed, &copy)
}

/// Decodes the 32-byte header at the start of `bytes`.
pub fn decode_r5log_header(bytes: &[u8]) -> CodecResult<R5LogHeader> {
    ensure_len(bytes, R5LOG_HEADER_SIZE)?;
    let r = LeReader::new(bytes);

    let magic = r.u32(R5LOG_OFF_MAGIC);
    if magic != R5LOG_MAGIC {
        debug!(expected = R5LOG_MAGIC, actual = magic, "invalid R5-log magic");
        return Err(CodecError::BadMagic {
            record: Record::R5Log,
            expected: R5LOG_MAGIC,
            actual: magic,
        });
    }
    let version = r.u8(R5LOG_OFF_VERSION);
    if version != R5LOG_VERSION {
        debug!(version, "unsupported R5-log version");
        return Err(CodecError::BadVersion {
            record: Record::R5Log,
            expected: R5LOG_VERSION as u32,
            actual: version as u32,
        });
    }

    Ok(R5LogHeader {
        checksum: r.u32(R5LOG_OFF_CHECKSUM),
        padding1: r.u8(R5LOG_OFF_PADDING1),
        padding2: r.u16(R5LOG_OFF_PADDING2),
        meta_size: r.u32(R5LOG_OFF_META_SIZE),
        seq: r.u64(R5LOG_OFF_SEQ),
        position: r.u64(R5LOG_OFF_POSITION),
    })
}

/// Encodes a header, including its stored checksum.
pub fn encode_r5log_header(header: &R5LogHeader) -> [u8; R5LOG_HEADER_SIZE] {
    let mut out = [0u8; R5LOG_HEADER_SIZE];
    let mut w = LeWriter::new(&mut out);
    w.put_u32(R5LOG_OFF_MAGIC, R5LOG_MAGIC);
    w.put_u32(R5LOG_OFF_CHECKSUM, header.checksum);
    w.put_u8(R5LOG_OFF_VERSION, R5LOG_VERSION);
    w.put_u8(R5LOG_OFF_PADDING1, header.padding1);
    w.put_u16(R5LOG_OFF_PADDING2, header.padding2);
    w.put_u32(R5LOG_OFF_META_SIZE, header.meta_size);
    w.put_u64(R5LOG_OFF_SEQ, header.seq);
    w.put_u64(R5LOG_OFF_POSITION, header.position);
    out
}

/// Parses the payload descriptors of a meta block.
///
/// `block` holds the header; descriptors are read up to its `meta_size`.
pub fn decode_r5log_payloads(block: &[u8]) -> CodecResult<Vec<R5LogPayload>> {
    let header = decode_r5log_header(block)?;
    let meta_size = header.meta_size as usize;
    if meta_size > R5LOG_BLOCK_SIZE {
        debug!(meta_size, "R5-log meta size exceeds the block");
        return Err(CodecError::TooShort {
            needed: meta_size,
            actual: R5LOG_BLOCK_SIZE,
        });
    }
    ensure_len(block, meta_size)?;
    let r = LeReader::new(block);

    let mut payloads = Vec::new();
    let mut offset = R5LOG_HEADER_SIZE;
    while offset < meta_size {
        let within = |len: usize| -> CodecResult<()> {
            if offset + len > meta_size {
                debug!(offset, len, meta_size, "truncated R5-log payload");
                return Err(CodecError::TooShort {
                    needed: offset + len,
                    actual: meta_size,
                });
            }
            Ok(())
        };
        within(PAYLOAD_HEADER_SIZE)?;
        let payload_type = r.u16(offset);
        let flags = r.u16(offset + 2);
        let payload = match payload_type {
            R5LOG_PAYLOAD_DATA | R5LOG_PAYLOAD_PARITY => {
                within(DATA_PARITY_BASE_SIZE)?;
                let size_sectors = r.u32(offset + 4);
                let location = r.u64(offset + 8);
                let count = (size_sectors / SECTORS_PER_PAGE) as usize;
                within(DATA_PARITY_BASE_SIZE + 4 * count)?;
                let checksums = (0..count)
                    .map(|i| r.u32(offset + DATA_PARITY_BASE_SIZE + 4 * i))
                    .collect();
                if payload_type == R5LOG_PAYLOAD_DATA {
                    R5LogPayload::Data {
                        flags,
                        size_sectors,
                        location,
                        checksums,
                    }
                } else {
                    R5LogPayload::Parity {
                        flags,
                        size_sectors,
                        location,
                        checksums,
                    }
                }
            }
            R5LOG_PAYLOAD_FLUSH => {
                within(FLUSH_BASE_SIZE)?;
                let count = r.u32(offset + 4) as usize / 8;
                within(FLUSH_BASE_SIZE + 8 * count)?;
                let stripes = (0..count)
                    .map(|i| r.u64(offset + FLUSH_BASE_SIZE + 8 * i))
                    .collect();
                R5LogPayload::Flush { flags, stripes }
            }
            other => {
                debug!(payload_type = other, offset, "unknown R5-log payload type");
                return Err(CodecError::InvalidPayload {
                    payload_type: other,
                    offset,
                });
            }
        };
        offset += payload.encoded_len();
        payloads.push(payload);
    }
    Ok(payloads)
}

/// Fails with [`CodecError::ChecksumMismatch`] unless the block checksum
/// matches under `seed`.
pub fn verify_r5log_block(block: &[u8], seed: u32) -> CodecResult<()> {
    ensure_len(block, R5LOG_BLOCK_SIZE)?;
    let stored = LeReader::new(block).u32(R5LOG_OFF_CHECKSUM);
    let computed = block_checksum(block, seed);
    if stored != computed {
        debug!(stored, computed, "R5-log block checksum mismatch");
        return Err(CodecError::ChecksumMismatch {
            record: Record::R5Log,
            stored,
            computed,
        });
    }
    Ok(())
}

/// Decodes a whole meta block with default options.
pub fn decode_r5log_block(block: &[u8], seed: u32) -> CodecResult<R5LogBlock> {
    decode_r5log_block_with(block, seed, &DecodeOptions::default())
}

/// Decodes a whole meta block: header, checksum, then payloads.
pub fn decode_r5log_block_with(block: &[u8], seed: u32, opts: &DecodeOptions) -> CodecResult<R5LogBlock> {
    ensure_len(block, R5LOG_BLOCK_SIZE)?;
    let header = decode_r5log_header(block)?;
    if opts.verify_checksums {
        verify_r5log_block(block, seed)?;
    }
    let payloads = decode_r5log_payloads(block)?;
    trace!(seq = header.seq, position = header.position, payloads = payloads.len(), "decoded R5-log meta block");
    Ok(R5LogBlock { header, payloads })
}

fn encode_payload(w: &mut LeWriter<'_>, offset: usize, payload: &R5LogPayload) -> CodecResult<()> {
    w.put_u16(offset, payload.payload_type());
    match payload {
        R5LogPayload::Data {
            flags,
            size_sectors,
            location,
            checksums,
        }
        | R5LogPayload::Parity {
            flags,
            size_sectors,
            location,
            checksums,
        } => {
            if (size_sectors / SECTORS_PER_PAGE) as usize != checksums.len() {
                return Err(CodecError::InvalidPayload {
                    payload_type: payload.payload_type(),
                    offset,
                });
            }
            w.put_u16(offset + 2, *flags);
            w.put_u32(offset + 4, *size_sectors);
            w.put_u64(offset + 8, *location);
            for (i, csum) in checksums.iter().enumerate() {
                w.put_u32(offset + DATA_PARITY_BASE_SIZE + 4 * i, *csum);
            }
        }
        R5LogPayload::Flush { flags, stripes } => {
            w.put_u16(offset + 2, *flags);
            w.put_u32(offset + 4, (stripes.len() * 8) as u32);
            for (i, stripe) in stripes.iter().enumerate() {
                w.put_u64(offset + FLUSH_BASE_SIZE + 8 * i, *stripe);
            }
        }
    }
    Ok(())
}

/// Builds a complete checksummed meta block.
///
/// `meta_size` is derived from the payloads; the header's own `meta_size`
/// and `checksum` are ignored.
pub fn encode_r5log_block(
    header: &R5LogHeader,
    payloads: &[R5LogPayload],
    seed: u32,
) -> CodecResult<[u8; R5LOG_BLOCK_SIZE]> {
    let meta_size = R5LOG_HEADER_SIZE + payloads.iter().map(R5LogPayload::encoded_len).sum::<usize>();
    if meta_size > R5LOG_BLOCK_SIZE {
        debug!(meta_size, "R5-log payloads do not fit one block");
        return Err(CodecError::TooShort {
            needed: meta_size,
            actual: R5LOG_BLOCK_SIZE,
        });
    }

    let mut out = [0u8; R5LOG_BLOCK_SIZE];
    let fixed = encode_r5log_header(&R5LogHeader {
        checksum: 0,
        meta_size: meta_size as u32,
        ..*header
    });
    out[..R5LOG_HEADER_SIZE].copy_from_slice(&fixed);
    {
        let mut w = LeWriter::new(&mut out);
        let mut offset = R5LOG_HEADER_SIZE;
        for payload in payloads {
            encode_payload(&mut w, offset, payload)?;
            offset += payload.encoded_len();
        }
    }
    let csum = block_checksum(&out, seed);
    LeWriter::new(&mut out).put_u32(R5LOG_OFF_CHECKSUM, csum);
    Ok(out)
}

//! Partial parity log header.
//!
//! A PPL area holds one or more 4 KiB headers, each followed by the partial
//! parity payloads its entries describe, back to back in entry order.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::checksum::crc32c;
use crate::config::DecodeOptions;
use crate::error::{CodecError, CodecResult, Record};
use crate::layout::{
    ensure_len, LeReader, LeWriter, PPL_ENTRY_SIZE, PPL_HDR_MAX_ENTRIES, PPL_HDR_RESERVED, PPL_HEADER_SIZE,
    SECTOR_SIZE,
};

const PPL_SIGNATURE: usize = 512;
const PPL_PADDING: usize = 516;
const PPL_GENERATION: usize = 520;
const PPL_ENTRIES_COUNT: usize = 528;
const PPL_CHECKSUM: usize = 532;
const PPL_ENTRIES: usize = 536;

const ENTRY_DATA_SECTOR: usize = 0;
const ENTRY_PP_SIZE: usize = 8;
const ENTRY_DATA_SIZE: usize = 12;
const ENTRY_PARITY_DISK: usize = 16;
const ENTRY_CHECKSUM: usize = 20;

/// One logged stripe update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PplEntry {
    /// First data sector of the stripe, in array sectors.
    pub data_sector: u64,
    /// Size of the partial parity payload in bytes.
    pub pp_size: u32,
    /// Size of the data written in bytes.
    pub data_size: u32,
    /// Member holding parity for the stripe.
    pub parity_disk: u32,
    /// CRC32C of the partial parity payload.
    pub checksum: u32,
}

impl PplEntry {
    fn decode(r: &LeReader<'_>, offset: usize) -> Self {
        Self {
            data_sector: r.u64(offset + ENTRY_DATA_SECTOR),
            pp_size: r.u32(offset + ENTRY_PP_SIZE),
            data_size: r.u32(offset + ENTRY_DATA_SIZE),
            parity_disk: r.u32(offset + ENTRY_PARITY_DISK),
            checksum: r.u32(offset + ENTRY_CHECKSUM),
        }
    }

    fn encode_into(&self, w: &mut LeWriter<'_>, offset: usize) {
        w.put_u64(offset + ENTRY_DATA_SECTOR, self.data_sector);
        w.put_u32(offset + ENTRY_PP_SIZE, self.pp_size);
        w.put_u32(offset + ENTRY_DATA_SIZE, self.data_size);
        w.put_u32(offset + ENTRY_PARITY_DISK, self.parity_disk);
        w.put_u32(offset + ENTRY_CHECKSUM, self.checksum);
    }

    /// Both sizes must be whole sectors.
    pub fn check_alignment(&self) -> CodecResult<()> {
        for size in [self.pp_size, self.data_size] {
            if size as u64 % SECTOR_SIZE != 0 {
                return Err(CodecError::NotAligned {
                    value: size as u64,
                    alignment: SECTOR_SIZE,
                });
            }
        }
        Ok(())
    }

    /// Fails with [`CodecError::ChecksumMismatch`] unless `payload` matches the entry checksum.
    pub fn verify_payload(&self, payload: &[u8]) -> CodecResult<()> {
        let computed = crc32c(payload);
        if computed != self.checksum {
            return Err(CodecError::ChecksumMismatch {
                record: Record::PplEntry,
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }
}

/// A PPL header and its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PplHeader {
    /// Reserved prologue, passed through. Freshly built headers fill it with 0xff.
    #[serde(with = "serde_bytes")]
    pub reserved: [u8; PPL_HDR_RESERVED],
    /// Identifies the array the log belongs to.
    pub signature: u32,
    /// Zero on a well-formed record, passed through.
    pub padding: u32,
    /// Incremented on every header write.
    pub generation: u64,
    entries: Vec<PplEntry>,
}

impl PplHeader {
    /// Creates a header, failing with [`CodecError::TooManyEntries`] past the capacity.
    pub fn new(signature: u32, generation: u64, entries: Vec<PplEntry>) -> CodecResult<Self> {
        if entries.len() > PPL_HDR_MAX_ENTRIES {
            return Err(CodecError::TooManyEntries {
                count: entries.len(),
                max: PPL_HDR_MAX_ENTRIES,
            });
        }
        Ok(Self {
            reserved: [0xff; PPL_HDR_RESERVED],
            signature,
            padding: 0,
            generation,
            entries,
        })
    }

    /// Entries in log order.
    pub fn entries(&self) -> &[PplEntry] {
        &self.entries
    }

    /// Appends an entry.
    pub fn push_entry(&mut self, entry: PplEntry) -> CodecResult<()> {
        if self.entries.len() == PPL_HDR_MAX_ENTRIES {
            return Err(CodecError::TooManyEntries {
                count: self.entries.len() + 1,
                max: PPL_HDR_MAX_ENTRIES,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Byte offset of each entry's payload from the start of the header.
    pub fn payload_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().scan(PPL_HEADER_SIZE as u64, |next, e| {
            let start = *next;
            *next += e.pp_size as u64;
            Some(start)
        })
    }

    /// Fails with [`CodecError::BadMagic`] unless the header carries `expected`.
    pub fn check_signature(&self, expected: u32) -> CodecResult<()> {
        if self.signature != expected {
            debug!(expected, actual = self.signature, "PPL signature mismatch");
            return Err(CodecError::BadMagic {
                record: Record::PplHeader,
                expected,
                actual: self.signature,
            });
        }
        Ok(())
    }
}

/// An entry dropped while decoding, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PplDiagnostic {
    /// Entry index within the header.
    pub slot: usize,
    /// Reason the entry was rejected.
    pub error: CodecError,
}

/// Result of decoding a PPL header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PplDecoded {
    /// The header with every accepted entry.
    pub header: PplHeader,
    /// Entries that failed validation.
    pub rejected: Vec<PplDiagnostic>,
    /// Indices into `header.entries()` whose payload was not checked.
    pub unverified: Vec<usize>,
    /// Sum of `pp_size` over every declared entry, accepted or not.
    pub payload_len: u64,
}

/// Native signature of an array's PPL: the CRC32C of its UUID.
pub fn ppl_signature(uuid: &Uuid) -> u32 {
    crc32c(uuid.as_bytes())
}

fn header_checksum(header: &[u8]) -> u32 {
    let mut copy = [0u8; PPL_HEADER_SIZE];
    copy.copy_from_slice(&header[..PPL_HEADER_SIZE]);
    LeWriter::new(&mut copy).put_u32(PPL_CHECKSUM, 0);
    crc32c(&copy)
}

/// Decodes a PPL header with default options.
pub fn decode_ppl_header(bytes: &[u8]) -> CodecResult<PplDecoded> {
    decode_ppl_header_with(bytes, &DecodeOptions::default())
}

/// Decodes the PPL header at the start of `bytes`.
///
/// Bytes past the header are taken as the entry payloads. Entries with
/// unaligned sizes or a payload CRC mismatch are dropped and reported in
/// [`PplDecoded::rejected`]; header-level damage fails the whole decode.
pub fn decode_ppl_header_with(bytes: &[u8], opts: &DecodeOptions) -> CodecResult<PplDecoded> {
    ensure_len(bytes, PPL_HEADER_SIZE)?;
    let r = LeReader::new(bytes);

    if opts.verify_checksums {
        let stored = r.u32(PPL_CHECKSUM);
        let computed = header_checksum(bytes);
        if stored != computed {
            debug!(stored, computed, "PPL header checksum mismatch");
            return Err(CodecError::ChecksumMismatch {
                record: Record::PplHeader,
                stored,
                computed,
            });
        }
    }

    let count = r.u32(PPL_ENTRIES_COUNT) as usize;
    if count > PPL_HDR_MAX_ENTRIES {
        debug!(count, max = PPL_HDR_MAX_ENTRIES, "PPL header declares too many entries");
        return Err(CodecError::TooManyEntries {
            count,
            max: PPL_HDR_MAX_ENTRIES,
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut rejected = Vec::new();
    let mut unverified = Vec::new();
    let mut payload_start = PPL_HEADER_SIZE as u64;

    for slot in 0..count {
        let entry = PplEntry::decode(&r, PPL_ENTRIES + slot * PPL_ENTRY_SIZE);
        let start = payload_start;
        payload_start += entry.pp_size as u64;

        let checked = entry.check_alignment().and_then(|()| {
            if !opts.verify_ppl_payloads {
                return Ok(false);
            }
            match bytes.get(start as usize..payload_start as usize) {
                Some(payload) => entry.verify_payload(payload).map(|()| true),
                None => Ok(false),
            }
        });
        match checked {
            Ok(verified) => {
                if !verified {
                    unverified.push(entries.len());
                }
                entries.push(entry);
            }
            Err(error) => {
                warn!(slot, data_sector = entry.data_sector, %error, "skipping PPL entry");
                rejected.push(PplDiagnostic { slot, error });
            }
        }
    }

    let header = PplHeader {
        reserved: r.bytes::<PPL_HDR_RESERVED>(0),
        signature: r.u32(PPL_SIGNATURE),
        padding: r.u32(PPL_PADDING),
        generation: r.u64(PPL_GENERATION),
        entries,
    };
    trace!(
        signature = header.signature,
        generation = header.generation,
        entries = header.entries.len(),
        rejected = rejected.len(),
        "decoded PPL header"
    );
    Ok(PplDecoded {
        header,
        rejected,
        unverified,
        payload_len: payload_start - PPL_HEADER_SIZE as u64,
    })
}

/// Encodes a PPL header, writing its checksum. Unused entry slots are zero.
pub fn encode_ppl_header(header: &PplHeader) -> CodecResult<[u8; PPL_HEADER_SIZE]> {
    if header.entries.len() > PPL_HDR_MAX_ENTRIES {
        return Err(CodecError::TooManyEntries {
            count: header.entries.len(),
            max: PPL_HDR_MAX_ENTRIES,
        });
    }
    let mut out = [0u8; PPL_HEADER_SIZE];
    {
        let mut w = LeWriter::new(&mut out);
        w.put_bytes(0, &header.reserved);
        w.put_u32(PPL_SIGNATURE, header.signature);
        w.put_u32(PPL_PADDING, header.padding);
        w.put_u64(PPL_GENERATION, header.generation);
        w.put_u32(PPL_ENTRIES_COUNT, header.entries.len() as u32);
        for (i, entry) in header.entries.iter().enumerate() {
            entry.encode_into(&mut w, PPL_ENTRIES + i * PPL_ENTRY_SIZE);
        }
    }
    let csum = crc32c(&out);
    LeWriter::new(&mut out).put_u32(PPL_CHECKSUM, csum);
    Ok(out)
}

/// Finds the current header of a PPL area with default options.
pub fn latest_ppl_header(area: &[u8], signature: u32) -> CodecResult<PplDecoded> {
    latest_ppl_header_with(area, signature, &DecodeOptions::default())
}

/// Walks the consecutive headers of a PPL area and returns the newest.
///
/// The next header starts right after the previous header's payloads. The
/// walk stops at the end of the area or at the first header that is damaged,
/// foreign, or older than the one before it. Only a failure of the first
/// header is an error.
pub fn latest_ppl_header_with(area: &[u8], signature: u32, opts: &DecodeOptions) -> CodecResult<PplDecoded> {
    let first = decode_ppl_header_with(area, opts)?;
    first.header.check_signature(signature)?;

    let mut latest = first;
    let mut offset = PPL_HEADER_SIZE as u64 + latest.payload_len;
    while let Some(rest) = area.get(offset as usize..) {
        if rest.len() < PPL_HEADER_SIZE {
            break;
        }
        let next = match decode_ppl_header_with(rest, opts).and_then(|d| {
            d.header.check_signature(signature)?;
            Ok(d)
        }) {
            Ok(next) => next,
            Err(error) => {
                debug!(offset, %error, "end of PPL header chain");
                break;
            }
        };
        if next.header.generation < latest.header.generation {
            debug!(
                offset,
                generation = next.header.generation,
                latest = latest.header.generation,
                "older PPL header ends the chain"
            );
            break;
        }
        offset += PPL_HEADER_SIZE as u64 + next.payload_len;
        latest = next;
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: u32 = 0x1234_5678;

    fn entry_for(payload: &[u8], data_sector: u64) -> PplEntry {
        PplEntry {
            data_sector,
            pp_size: payload.len() as u32,
            data_size: 4096,
            parity_disk: 2,
            checksum: crc32c(payload),
        }
    }

    fn log_with(generation: u64, payloads: &[Vec<u8>]) -> Vec<u8> {
        let entries = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| entry_for(p, i as u64 * 8))
            .collect();
        let header = PplHeader::new(SIG, generation, entries).unwrap();
        let mut out = encode_ppl_header(&header).unwrap().to_vec();
        for p in payloads {
            out.extend_from_slice(p);
        }
        out
    }

    #[test]
    fn test_field_positions() {
        let header = PplHeader::new(SIG, 7, vec![entry_for(&[1u8; 512], 40)]).unwrap();
        let bytes = encode_ppl_header(&header).unwrap();
        let r = LeReader::new(&bytes);
        assert!(bytes[..512].iter().all(|&b| b == 0xff));
        assert_eq!(r.u32(512), SIG);
        assert_eq!(r.u64(520), 7);
        assert_eq!(r.u32(528), 1);
        assert_eq!(r.u64(536), 40);
        assert_eq!(r.u32(544), 512);
        assert!(bytes[536 + 24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_roundtrip_with_payloads() {
        let log = log_with(3, &[vec![0xaa; 512], vec![0xbb; 1024]]);
        let decoded = decode_ppl_header(&log).unwrap();
        assert_eq!(decoded.header.generation, 3);
        assert_eq!(decoded.header.entries().len(), 2);
        assert!(decoded.rejected.is_empty());
        assert!(decoded.unverified.is_empty());
        assert_eq!(decoded.payload_len, 1536);
        let offsets: Vec<_> = decoded.header.payload_offsets().collect();
        assert_eq!(offsets, vec![4096, 4608]);
    }

    #[test]
    fn test_header_checksum() {
        let mut log = log_with(1, &[vec![1; 512]]);
        log[600] ^= 0x01;
        assert!(matches!(
            decode_ppl_header(&log),
            Err(CodecError::ChecksumMismatch { record: Record::PplHeader, .. })
        ));
        assert!(decode_ppl_header_with(&log, &DecodeOptions::unchecked()).is_ok());
    }

    #[test]
    fn test_entry_payload_mismatch_is_local() {
        let mut log = log_with(1, &[vec![1; 512], vec![2; 512], vec![3; 512]]);
        log[4096 + 512 + 10] ^= 0xff;
        let decoded = decode_ppl_header(&log).unwrap();
        assert_eq!(decoded.header.entries().len(), 2);
        assert_eq!(decoded.header.entries()[1].data_sector, 16);
        assert_eq!(decoded.rejected.len(), 1);
        assert_eq!(decoded.rejected[0].slot, 1);
        assert!(matches!(
            decoded.rejected[0].error,
            CodecError::ChecksumMismatch { record: Record::PplEntry, .. }
        ));
        assert_eq!(decoded.rejected[0].error.record(), Some(Record::PplEntry));
    }

    #[test]
    fn test_unaligned_entry_rejected() {
        let mut bad = entry_for(&[0u8; 512], 0);
        bad.data_size = 100;
        let good = entry_for(&[], 8);
        let header = PplHeader::new(SIG, 1, vec![bad, good]).unwrap();
        let decoded = decode_ppl_header(&encode_ppl_header(&header).unwrap()).unwrap();
        assert_eq!(decoded.header.entries(), &[good]);
        assert_eq!(
            decoded.rejected[0].error,
            CodecError::NotAligned { value: 100, alignment: 512 }
        );
    }

    #[test]
    fn test_payload_outside_buffer_is_unverified() {
        let log = log_with(1, &[vec![1; 512], vec![2; 512]]);
        let decoded = decode_ppl_header(&log[..4096 + 512]).unwrap();
        assert_eq!(decoded.header.entries().len(), 2);
        assert_eq!(decoded.unverified, vec![1]);

        let unchecked = decode_ppl_header_with(&log, &DecodeOptions::unchecked()).unwrap();
        assert_eq!(unchecked.unverified, vec![0, 1]);
    }

    #[test]
    fn test_entry_capacity() {
        let entries = vec![PplEntry::default(); PPL_HDR_MAX_ENTRIES];
        let mut header = PplHeader::new(SIG, 1, entries).unwrap();
        assert!(encode_ppl_header(&header).is_ok());
        assert!(matches!(
            header.push_entry(PplEntry::default()),
            Err(CodecError::TooManyEntries { count: 149, max: 148 })
        ));
        assert!(PplHeader::new(SIG, 1, vec![PplEntry::default(); 149]).is_err());
    }

    #[test]
    fn test_declared_count_over_capacity() {
        let mut bytes = encode_ppl_header(&PplHeader::new(SIG, 1, vec![]).unwrap()).unwrap();
        LeWriter::new(&mut bytes).put_u32(PPL_ENTRIES_COUNT, 149);
        let csum = header_checksum(&bytes);
        LeWriter::new(&mut bytes).put_u32(PPL_CHECKSUM, csum);
        assert_eq!(
            decode_ppl_header(&bytes),
            Err(CodecError::TooManyEntries { count: 149, max: 148 })
        );
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            decode_ppl_header(&[0u8; 4095]),
            Err(CodecError::TooShort { needed: 4096, actual: 4095 })
        );
    }

    #[test]
    fn test_signature() {
        let uuid = Uuid::from_u128(0xdead_beef);
        assert_eq!(ppl_signature(&uuid), crc32c(uuid.as_bytes()));
        let header = PplHeader::new(ppl_signature(&uuid), 1, vec![]).unwrap();
        assert!(header.check_signature(ppl_signature(&uuid)).is_ok());
        assert!(matches!(
            header.check_signature(SIG),
            Err(CodecError::BadMagic { record: Record::PplHeader, .. })
        ));
    }

    #[test]
    fn test_latest_header_walk() {
        let mut area = log_with(5, &[vec![1; 512]]);
        area.extend(log_with(6, &[vec![2; 1024]]));
        area.extend(log_with(7, &[]));
        area.extend(log_with(2, &[]));
        let latest = latest_ppl_header(&area, SIG).unwrap();
        assert_eq!(latest.header.generation, 7);
    }

    #[test]
    fn test_latest_header_stops_at_damage() {
        let mut area = log_with(5, &[]);
        let mut second = log_with(9, &[]);
        second[700] ^= 1;
        area.extend(second);
        area.extend(log_with(10, &[]));
        assert_eq!(latest_ppl_header(&area, SIG).unwrap().header.generation, 5);
        assert!(matches!(
            latest_ppl_header(&area, SIG ^ 1),
            Err(CodecError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_json_dump() {
        let header = PplHeader::new(SIG, 2, vec![entry_for(&[0u8; 512], 8)]).unwrap();
        let json = serde_json::to_string(&header).unwrap();
        let back: PplHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }
}

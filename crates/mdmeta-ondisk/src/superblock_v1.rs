//! Version-1 superblock (metadata 1.0, 1.1 and 1.2).
//!
//! A 256-byte fixed part followed by `max_dev` little-endian u16 roles, one per
//! device number. Unlike 0.90, per-device state is not stored for other
//! members: only this device's flags are known, and the role table is the
//! whole membership record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checksum::md_sb1_checksum;
use crate::config::DecodeOptions;
use crate::error::{CodecError, CodecResult, Record};
use crate::flags::{DevFlags, DiskState, FeatureMap};
use crate::layout::{
    ensure_len, LeReader, LeWriter, MD_DISK_ROLE_JOURNAL, MD_DISK_ROLE_MAX, MD_DISK_ROLE_SPARE,
    MD_SB1_FIXED_BYTES, MD_SB1_MAX_DEVS, MD_SB_MAGIC,
};
use crate::role::{bounded_role, decode_role_state, encode_role_state, lenient_role, DiskRole, DiskStatus};
use crate::superblock::RaidLevel;

/// Major version of the version-1 layout.
pub const MD_SB1_MAJOR_VERSION: u32 = 1;

const SB1_MAGIC: usize = 0;
const SB1_MAJOR: usize = 4;
const SB1_FEATURE_MAP: usize = 8;
const SB1_PAD0: usize = 12;
const SB1_SET_UUID: usize = 16;
const SB1_SET_NAME: usize = 32;
const SB1_CTIME: usize = 64;
const SB1_LEVEL: usize = 72;
const SB1_LAYOUT: usize = 76;
const SB1_SIZE: usize = 80;
const SB1_CHUNKSIZE: usize = 88;
const SB1_RAID_DISKS: usize = 92;
const SB1_BITMAP_OFFSET: usize = 96;
const SB1_NEW_LEVEL: usize = 100;
const SB1_RESHAPE_POSITION: usize = 104;
const SB1_DELTA_DISKS: usize = 112;
const SB1_NEW_LAYOUT: usize = 116;
const SB1_NEW_CHUNK: usize = 120;
const SB1_NEW_OFFSET: usize = 124;
const SB1_DATA_OFFSET: usize = 128;
const SB1_DATA_SIZE: usize = 136;
const SB1_SUPER_OFFSET: usize = 144;
const SB1_RECOVERY_OFFSET: usize = 152;
const SB1_DEV_NUMBER: usize = 160;
const SB1_CNT_CORRECTED_READ: usize = 164;
const SB1_DEVICE_UUID: usize = 168;
const SB1_DEVFLAGS: usize = 184;
const SB1_BBLOG_SHIFT: usize = 185;
const SB1_BBLOG_SIZE: usize = 186;
const SB1_BBLOG_OFFSET: usize = 188;
const SB1_UTIME: usize = 192;
const SB1_EVENTS: usize = 200;
const SB1_RESYNC_OFFSET: usize = 208;
/// Byte offset of the checksum.
pub const SB1_CSUM: usize = 216;
const SB1_MAX_DEV: usize = 220;
const SB1_PAD3: usize = 224;
const SB1_PAD3_BYTES: usize = 32;
const SB1_DEV_ROLES: usize = MD_SB1_FIXED_BYTES;

const SB1_NAME_BYTES: usize = 32;
const SB1_TIME_SECONDS_MASK: u64 = (1 << 40) - 1;

/// Location of the partial parity log, relative to the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PplLocation {
    /// Signed sector offset from the superblock.
    pub offset: i16,
    /// Size of the PPL area in sectors.
    pub size: u16,
}

/// Role table of a version-1 superblock, indexed by device number.
///
/// Holds at most [`MD_SB1_MAX_DEVS`] entries, the number that fits a 4 KiB
/// superblock. Raw values are kept so reserved roles survive a round trip,
/// but are only handed out as [`DiskRole`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct RoleTable {
    roles: Vec<u16>,
}

impl RoleTable {
    /// Structural capacity of the table.
    pub const CAPACITY: usize = MD_SB1_MAX_DEVS;

    /// Wraps raw role values.
    pub fn new(raw: Vec<u16>) -> CodecResult<Self> {
        if raw.len() > Self::CAPACITY {
            return Err(CodecError::TooManyDisks {
                count: raw.len(),
                max: Self::CAPACITY,
            });
        }
        Ok(Self { roles: raw })
    }

    /// Builds a table from decoded roles.
    pub fn from_roles(roles: &[DiskRole]) -> CodecResult<Self> {
        Self::new(roles.iter().map(|&r| encode_role_state(r).0).collect())
    }

    /// Number of device numbers covered (`max_dev`).
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Role recorded for device number `index`, without the raid-disk bound.
    pub fn get(&self, index: usize) -> Option<DiskRole> {
        self.roles.get(index).map(|&raw| decode_role_state(raw, 0))
    }

    /// Overwrites the role of device number `index`.
    pub fn set(&mut self, index: usize, role: DiskRole) -> CodecResult<()> {
        match self.roles.get_mut(index) {
            Some(slot) => {
                *slot = encode_role_state(role).0;
                Ok(())
            }
            None => Err(CodecError::TooManyDisks {
                count: index + 1,
                max: self.roles.len(),
            }),
        }
    }

    /// Iterates roles in device-number order.
    pub fn iter(&self) -> impl Iterator<Item = DiskRole> + '_ {
        self.roles.iter().map(|&raw| decode_role_state(raw, 0))
    }

    fn raw(&self, index: usize) -> Option<u16> {
        self.roles.get(index).copied()
    }
}

impl TryFrom<Vec<u16>> for RoleTable {
    type Error = CodecError;

    fn try_from(raw: Vec<u16>) -> CodecResult<Self> {
        Self::new(raw)
    }
}

impl From<RoleTable> for Vec<u16> {
    fn from(table: RoleTable) -> Self {
        table.roles
    }
}

/// Converts a version-1 timestamp (40-bit seconds, 24-bit microseconds).
pub fn sb1_time_to_system(raw: u64) -> SystemTime {
    let secs = raw & SB1_TIME_SECONDS_MASK;
    let micros = raw >> 40;
    UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// Packs a time into the version-1 timestamp format.
///
/// Times before the epoch pack as zero.
pub fn sb1_time_from_system(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() & SB1_TIME_SECONDS_MASK) | ((d.subsec_micros() as u64) << 40),
        Err(_) => 0,
    }
}

/// A decoded version-1 superblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockV1 {
    /// Optional feature bits.
    pub feature_map: FeatureMap,
    /// Always zero on a well-formed record, passed through.
    pub pad0: u32,
    /// Array UUID.
    pub set_uuid: Uuid,
    /// Array name, NUL padded.
    pub set_name: [u8; SB1_NAME_BYTES],
    /// Creation time, see [`sb1_time_to_system`].
    pub ctime: u64,
    /// Signed RAID level.
    pub level: i32,
    /// Personality layout.
    pub layout: u32,
    /// Used size of each component, in sectors.
    pub size: u64,
    /// Chunk size in sectors.
    pub chunksize: u32,
    /// Number of slots in a fully working array.
    pub raid_disks: u32,
    /// Raw word shared by the bitmap offset and the PPL location.
    pub bitmap_or_ppl: u32,
    /// Level being reshaped to.
    pub new_level: i32,
    /// Next array address to reshape.
    pub reshape_position: u64,
    /// Change in raid disk count during reshape.
    pub delta_disks: i32,
    /// Layout being reshaped to.
    pub new_layout: u32,
    /// Chunk size being reshaped to.
    pub new_chunk: u32,
    /// Signed offset added to `data_offset` by the new layout.
    pub new_offset: i32,
    /// Sector where data starts on this device.
    pub data_offset: u64,
    /// Sectors of this device usable for data.
    pub data_size: u64,
    /// Sector where this superblock lives.
    pub super_offset: u64,
    /// Recovery checkpoint, or journal tail for a journal device.
    pub recovery_offset: u64,
    /// This device's index into the role table.
    pub dev_number: u32,
    /// Corrected read errors.
    pub cnt_corrected_read: u32,
    /// Per-device UUID.
    pub device_uuid: Uuid,
    /// Per-device flags.
    pub devflags: DevFlags,
    /// Bad-block log: shift applied to entries.
    pub bblog_shift: u8,
    /// Bad-block log size in sectors.
    pub bblog_size: u16,
    /// Bad-block log offset from the superblock, in sectors.
    pub bblog_offset: u32,
    /// Last update time, see [`sb1_time_to_system`].
    pub utime: u64,
    /// Superblock update count.
    pub events: u64,
    /// Resync checkpoint; `u64::MAX` once resync is complete.
    pub resync_offset: u64,
    /// Reserved bytes, passed through.
    pub pad3: [u8; SB1_PAD3_BYTES],
    /// Role of every device number.
    pub roles: RoleTable,
}

impl SuperblockV1 {
    /// Superblock for a new array, with an empty role table.
    ///
    /// Fails with [`CodecError::InvalidSuperblock`] when `name` does not fit
    /// the 32-byte name field.
    pub fn new(set_uuid: Uuid, name: &str, level: i32, raid_disks: u32, size: u64) -> CodecResult<Self> {
        let mut sb = Self {
            feature_map: FeatureMap::empty(),
            pad0: 0,
            set_uuid,
            set_name: [0; SB1_NAME_BYTES],
            ctime: 0,
            level,
            layout: 0,
            size,
            chunksize: 0,
            raid_disks,
            bitmap_or_ppl: 0,
            new_level: 0,
            reshape_position: 0,
            delta_disks: 0,
            new_layout: 0,
            new_chunk: 0,
            new_offset: 0,
            data_offset: 0,
            data_size: 0,
            super_offset: 0,
            recovery_offset: 0,
            dev_number: 0,
            cnt_corrected_read: 0,
            device_uuid: Uuid::nil(),
            devflags: DevFlags::empty(),
            bblog_shift: 0,
            bblog_size: 0,
            bblog_offset: 0,
            utime: 0,
            events: 0,
            resync_offset: u64::MAX,
            pad3: [0; SB1_PAD3_BYTES],
            roles: RoleTable::default(),
        };
        sb.set_name(name)?;
        Ok(sb)
    }

    /// Array name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self.set_name.iter().position(|&b| b == 0).unwrap_or(SB1_NAME_BYTES);
        String::from_utf8_lossy(&self.set_name[..end]).into_owned()
    }

    /// Replaces the array name.
    pub fn set_name(&mut self, name: &str) -> CodecResult<()> {
        let bytes = name.as_bytes();
        if bytes.len() > SB1_NAME_BYTES {
            return Err(CodecError::InvalidSuperblock {
                reason: format!("array name is {} bytes, max {}", bytes.len(), SB1_NAME_BYTES),
            });
        }
        self.set_name = [0; SB1_NAME_BYTES];
        self.set_name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Known RAID level, if the level field holds one.
    pub fn raid_level(&self) -> Option<RaidLevel> {
        RaidLevel::from_raw(self.level)
    }

    /// Creation time.
    pub fn created_at(&self) -> SystemTime {
        sb1_time_to_system(self.ctime)
    }

    /// Last update time.
    pub fn updated_at(&self) -> SystemTime {
        sb1_time_to_system(self.utime)
    }

    /// Write-intent bitmap offset in sectors, when the bitmap feature is set.
    pub fn bitmap_offset(&self) -> Option<i32> {
        self.feature_map
            .contains(FeatureMap::BITMAP_OFFSET)
            .then_some(self.bitmap_or_ppl as i32)
    }

    /// Sets the bitmap offset and feature bit, dropping any PPL location.
    pub fn set_bitmap_offset(&mut self, offset: i32) {
        self.feature_map.remove(FeatureMap::PPL);
        self.feature_map.insert(FeatureMap::BITMAP_OFFSET);
        self.bitmap_or_ppl = offset as u32;
    }

    /// PPL location, when the PPL feature is set.
    pub fn ppl_location(&self) -> Option<PplLocation> {
        if !self.feature_map.contains(FeatureMap::PPL) {
            return None;
        }
        Some(PplLocation {
            offset: self.bitmap_or_ppl as u16 as i16,
            size: (self.bitmap_or_ppl >> 16) as u16,
        })
    }

    /// Sets the PPL location and feature bit, dropping any bitmap offset.
    pub fn set_ppl_location(&mut self, ppl: PplLocation) {
        self.feature_map.remove(FeatureMap::BITMAP_OFFSET);
        self.feature_map.insert(FeatureMap::PPL);
        self.bitmap_or_ppl = (ppl.offset as u16 as u32) | ((ppl.size as u32) << 16);
    }

    /// Journal tail, for a journal device.
    pub fn journal_tail(&self) -> Option<u64> {
        (self.raw_role() == MD_DISK_ROLE_JOURNAL).then_some(self.recovery_offset)
    }

    /// Highest slot count the array may use, counting a growing reshape.
    pub fn slot_limit(&self) -> u32 {
        self.raid_disks.saturating_add(self.delta_disks.max(0) as u32)
    }

    /// Raw role of this device; spare when its number is past the table.
    fn raw_role(&self) -> u16 {
        self.roles.raw(self.dev_number as usize).unwrap_or(MD_DISK_ROLE_SPARE)
    }

    /// State bits of this device, synthesized from role, features and devflags.
    pub fn device_state(&self) -> DiskState {
        let mut state = DiskState::from(self.devflags);
        match self.raw_role() {
            MD_DISK_ROLE_SPARE => {}
            MD_DISK_ROLE_JOURNAL => state |= DiskState::JOURNAL,
            n if n < MD_DISK_ROLE_MAX => {
                state |= DiskState::ACTIVE;
                if !self.feature_map.contains(FeatureMap::RECOVERY_OFFSET) {
                    state |= DiskState::SYNC;
                }
                if self.feature_map.contains(FeatureMap::REPLACEMENT) {
                    state |= DiskState::REPLACEMENT;
                }
            }
            _ => state |= DiskState::FAULTY,
        }
        state
    }

    /// Role of this device.
    pub fn role(&self) -> DiskRole {
        lenient_role(self.raw_role(), self.device_state(), self.slot_limit())
    }

    /// Role and state of this device.
    pub fn status(&self) -> DiskStatus {
        DiskStatus::new(self.role(), self.device_state())
    }

    /// Role of device number `index`, held to the slot limit.
    pub fn role_of(&self, index: usize) -> Option<DiskRole> {
        if index == self.dev_number as usize {
            return self.roles.raw(index).map(|_| self.role());
        }
        let raw = self.roles.raw(index)?;
        Some(lenient_role(raw, DiskState::empty(), self.slot_limit()))
    }

    /// Checksummed length of the record: fixed part plus role table.
    pub fn record_len(&self) -> usize {
        MD_SB1_FIXED_BYTES + 2 * self.roles.len()
    }
}

/// Decodes a version-1 superblock with default options.
pub fn decode_superblock_v1(bytes: &[u8]) -> CodecResult<SuperblockV1> {
    decode_superblock_v1_with(bytes, &DecodeOptions::default())
}

/// Decodes a version-1 superblock.
pub fn decode_superblock_v1_with(bytes: &[u8], opts: &DecodeOptions) -> CodecResult<SuperblockV1> {
    ensure_len(bytes, MD_SB1_FIXED_BYTES)?;
    let r = LeReader::new(bytes);

    let magic = r.u32(SB1_MAGIC);
    if magic != MD_SB_MAGIC {
        if magic.swap_bytes() == MD_SB_MAGIC {
            debug!("superblock magic is byte-swapped; record was written on a foreign-endian host");
        }
        debug!(expected = MD_SB_MAGIC, actual = magic, "invalid 1.x superblock magic");
        return Err(CodecError::BadMagic {
            record: Record::SuperblockV1,
            expected: MD_SB_MAGIC,
            actual: magic,
        });
    }

    let major = r.u32(SB1_MAJOR);
    if major != MD_SB1_MAJOR_VERSION {
        debug!(major, "superblock major version is not 1");
        return Err(CodecError::UnsupportedVersion { major });
    }

    let max_dev = r.u32(SB1_MAX_DEV) as usize;
    if max_dev > MD_SB1_MAX_DEVS {
        debug!(max_dev, "1.x superblock role table too large");
        return Err(CodecError::TooManyDisks {
            count: max_dev,
            max: MD_SB1_MAX_DEVS,
        });
    }
    let record_len = MD_SB1_FIXED_BYTES + 2 * max_dev;
    ensure_len(bytes, record_len)?;
    let record = &bytes[..record_len];

    if opts.verify_checksums {
        let stored = r.u32(SB1_CSUM);
        let computed = md_sb1_checksum(record, SB1_CSUM);
        if stored != computed {
            debug!(stored, computed, "1.x superblock checksum mismatch");
            return Err(CodecError::ChecksumMismatch {
                record: Record::SuperblockV1,
                stored,
                computed,
            });
        }
    }

    let roles = RoleTable::new(
        record[SB1_DEV_ROLES..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
    )?;

    let sb = SuperblockV1 {
        feature_map: FeatureMap::from_bits_retain(r.u32(SB1_FEATURE_MAP)),
        pad0: r.u32(SB1_PAD0),
        set_uuid: Uuid::from_bytes(r.bytes::<16>(SB1_SET_UUID)),
        set_name: r.bytes::<SB1_NAME_BYTES>(SB1_SET_NAME),
        ctime: r.u64(SB1_CTIME),
        level: r.i32(SB1_LEVEL),
        layout: r.u32(SB1_LAYOUT),
        size: r.u64(SB1_SIZE),
        chunksize: r.u32(SB1_CHUNKSIZE),
        raid_disks: r.u32(SB1_RAID_DISKS),
        bitmap_or_ppl: r.u32(SB1_BITMAP_OFFSET),
        new_level: r.i32(SB1_NEW_LEVEL),
        reshape_position: r.u64(SB1_RESHAPE_POSITION),
        delta_disks: r.i32(SB1_DELTA_DISKS),
        new_layout: r.u32(SB1_NEW_LAYOUT),
        new_chunk: r.u32(SB1_NEW_CHUNK),
        new_offset: r.i32(SB1_NEW_OFFSET),
        data_offset: r.u64(SB1_DATA_OFFSET),
        data_size: r.u64(SB1_DATA_SIZE),
        super_offset: r.u64(SB1_SUPER_OFFSET),
        recovery_offset: r.u64(SB1_RECOVERY_OFFSET),
        dev_number: r.u32(SB1_DEV_NUMBER),
        cnt_corrected_read: r.u32(SB1_CNT_CORRECTED_READ),
        device_uuid: Uuid::from_bytes(r.bytes::<16>(SB1_DEVICE_UUID)),
        devflags: DevFlags::from_bits_retain(r.u8(SB1_DEVFLAGS)),
        bblog_shift: r.u8(SB1_BBLOG_SHIFT),
        bblog_size: r.u16(SB1_BBLOG_SIZE),
        bblog_offset: r.u32(SB1_BBLOG_OFFSET),
        utime: r.u64(SB1_UTIME),
        events: r.u64(SB1_EVENTS),
        resync_offset: r.u64(SB1_RESYNC_OFFSET),
        pad3: r.bytes::<SB1_PAD3_BYTES>(SB1_PAD3),
        roles,
    };

    if opts.strict_roles {
        let limit = sb.slot_limit();
        for raw in sb.roles.roles.iter().copied() {
            bounded_role(raw, DiskState::empty(), limit, true)?;
        }
    }

    trace!(
        uuid = %sb.set_uuid,
        name = %sb.name(),
        level = sb.level,
        max_dev,
        dev_number = sb.dev_number,
        "decoded 1.x superblock"
    );
    Ok(sb)
}

/// Encodes a version-1 superblock into `256 + 2 * max_dev` bytes, writing
/// its checksum.
pub fn encode_superblock_v1(sb: &SuperblockV1) -> Vec<u8> {
    let mut out = vec![0u8; sb.record_len()];
    {
        let mut w = LeWriter::new(&mut out);
        w.put_u32(SB1_MAGIC, MD_SB_MAGIC);
        w.put_u32(SB1_MAJOR, MD_SB1_MAJOR_VERSION);
        w.put_u32(SB1_FEATURE_MAP, sb.feature_map.bits());
        w.put_u32(SB1_PAD0, sb.pad0);
        w.put_bytes(SB1_SET_UUID, sb.set_uuid.as_bytes());
        w.put_bytes(SB1_SET_NAME, &sb.set_name);
        w.put_u64(SB1_CTIME, sb.ctime);
        w.put_i32(SB1_LEVEL, sb.level);
        w.put_u32(SB1_LAYOUT, sb.layout);
        w.put_u64(SB1_SIZE, sb.size);
        w.put_u32(SB1_CHUNKSIZE, sb.chunksize);
        w.put_u32(SB1_RAID_DISKS, sb.raid_disks);
        w.put_u32(SB1_BITMAP_OFFSET, sb.bitmap_or_ppl);
        w.put_i32(SB1_NEW_LEVEL, sb.new_level);
        w.put_u64(SB1_RESHAPE_POSITION, sb.reshape_position);
        w.put_i32(SB1_DELTA_DISKS, sb.delta_disks);
        w.put_u32(SB1_NEW_LAYOUT, sb.new_layout);
        w.put_u32(SB1_NEW_CHUNK, sb.new_chunk);
        w.put_i32(SB1_NEW_OFFSET, sb.new_offset);
        w.put_u64(SB1_DATA_OFFSET, sb.data_offset);
        w.put_u64(SB1_DATA_SIZE, sb.data_size);
        w.put_u64(SB1_SUPER_OFFSET, sb.super_offset);
        w.put_u64(SB1_RECOVERY_OFFSET, sb.recovery_offset);
        w.put_u32(SB1_DEV_NUMBER, sb.dev_number);
        w.put_u32(SB1_CNT_CORRECTED_READ, sb.cnt_corrected_read);
        w.put_bytes(SB1_DEVICE_UUID, sb.device_uuid.as_bytes());
        w.put_u8(SB1_DEVFLAGS, sb.devflags.bits());
        w.put_u8(SB1_BBLOG_SHIFT, sb.bblog_shift);
        w.put_u16(SB1_BBLOG_SIZE, sb.bblog_size);
        w.put_u32(SB1_BBLOG_OFFSET, sb.bblog_offset);
        w.put_u64(SB1_UTIME, sb.utime);
        w.put_u64(SB1_EVENTS, sb.events);
        w.put_u64(SB1_RESYNC_OFFSET, sb.resync_offset);
        w.put_u32(SB1_MAX_DEV, sb.roles.len() as u32);
        w.put_bytes(SB1_PAD3, &sb.pad3);
        for (i, raw) in sb.roles.roles.iter().enumerate() {
            w.put_u16(SB1_DEV_ROLES + 2 * i, *raw);
        }
    }
    let csum = md_sb1_checksum(&out, SB1_CSUM);
    LeWriter::new(&mut out).put_u32(SB1_CSUM, csum);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MD_DISK_ROLE_FAULTY;

    const SB1_PPL_OFFSET: usize = 96;
    const SB1_PPL_SIZE: usize = 98;

    /// Member 0 of the two-disk 1.2 RAID1 `worklaptop:0`, as mdadm wrote it:
    /// `--examine` reports checksum 9741e5f7.
    fn worklaptop_member() -> SuperblockV1 {
        let uuid = Uuid::parse_str("24d684dd-bc67-60fc-a5d3-a49f592b1b42").unwrap();
        let mut sb = SuperblockV1::new(uuid, "worklaptop:0", 1, 2, 18432).unwrap();
        sb.ctime = 1_723_541_683;
        sb.utime = 1_723_541_683;
        sb.events = 16;
        sb.data_offset = 2048;
        sb.data_size = 18432;
        sb.super_offset = 8;
        sb.device_uuid = Uuid::parse_str("201e03cf-4205-c8bf-e714-52f868f6b6cd").unwrap();
        sb.bblog_size = 8;
        sb.bblog_offset = 16;
        let mut roles = vec![MD_DISK_ROLE_SPARE; 128];
        roles[0] = 0;
        roles[1] = 1;
        sb.roles = RoleTable::new(roles).unwrap();
        sb
    }

    #[test]
    fn test_roundtrip() {
        let sb = worklaptop_member();
        let bytes = encode_superblock_v1(&sb);
        assert_eq!(bytes.len(), 256 + 2 * 128);
        let decoded = decode_superblock_v1(&bytes).unwrap();
        assert_eq!(decoded, sb);
        assert_eq!(decoded.name(), "worklaptop:0");
        assert_eq!(decoded.raid_level(), Some(RaidLevel::Raid1));
        assert_eq!(decoded.role(), DiskRole::NumberedSlot(0));
        assert!(decoded.status().is_in_sync());
    }

    #[test]
    fn test_field_positions() {
        let bytes = encode_superblock_v1(&worklaptop_member());
        let r = LeReader::new(&bytes);
        assert_eq!(r.u32(0), MD_SB_MAGIC);
        assert_eq!(r.u32(4), 1);
        assert_eq!(&bytes[32..44], b"worklaptop:0");
        assert_eq!(r.i32(72), 1);
        assert_eq!(r.u64(80), 18432);
        assert_eq!(r.u32(92), 2);
        assert_eq!(r.u64(128), 2048);
        assert_eq!(r.u64(144), 8);
        assert_eq!(r.u64(200), 16);
        assert_eq!(r.u64(208), u64::MAX);
        assert_eq!(r.u32(220), 128);
        assert_eq!(r.u16(256), 0);
        assert_eq!(r.u16(258), 1);
        assert_eq!(r.u16(260), 0xffff);
    }

    #[test]
    fn test_checksum_matches_mdadm() {
        let bytes = encode_superblock_v1(&worklaptop_member());
        assert_eq!(LeReader::new(&bytes).u32(SB1_CSUM), 0x9741_e5f7);
        assert_eq!(md_sb1_checksum(&bytes, SB1_CSUM), 0x9741_e5f7);

        // Second member: same array, own device UUID and slot.
        let mut other = worklaptop_member();
        other.dev_number = 1;
        other.device_uuid = Uuid::parse_str("fc9b0876-925c-3729-5f47-971af9ce24fc").unwrap();
        let bytes = encode_superblock_v1(&other);
        assert_eq!(LeReader::new(&bytes).u32(SB1_CSUM), 0xf869_c62b);

        let decoded = decode_superblock_v1(&bytes).unwrap();
        assert_eq!(decoded.set_uuid.to_string(), "24d684dd-bc67-60fc-a5d3-a49f592b1b42");
        assert_eq!(decoded.role(), DiskRole::NumberedSlot(1));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode_superblock_v1(&worklaptop_member());
        bytes[200] ^= 1;
        assert!(matches!(
            decode_superblock_v1(&bytes),
            Err(CodecError::ChecksumMismatch { record: Record::SuperblockV1, .. })
        ));
        let decoded = decode_superblock_v1_with(&bytes, &DecodeOptions::unchecked()).unwrap();
        assert_eq!(decoded.events, 17);
    }

    #[test]
    fn test_odd_max_dev_checksum() {
        let mut sb = worklaptop_member();
        sb.roles = RoleTable::new(vec![0, 1, 0xffff]).unwrap();
        let bytes = encode_superblock_v1(&sb);
        assert_eq!(bytes.len(), 262);
        assert_eq!(decode_superblock_v1(&bytes).unwrap(), sb);
    }

    #[test]
    fn test_rejections() {
        let bytes = encode_superblock_v1(&worklaptop_member());
        assert!(matches!(decode_superblock_v1(&bytes[..255]), Err(CodecError::TooShort { .. })));
        assert_eq!(
            decode_superblock_v1(&bytes[..300]),
            Err(CodecError::TooShort { needed: 512, actual: 300 })
        );

        let mut wrong_major = bytes.clone();
        wrong_major[4] = 0;
        assert_eq!(
            decode_superblock_v1(&wrong_major),
            Err(CodecError::UnsupportedVersion { major: 0 })
        );

        let mut huge = bytes.clone();
        LeWriter::new(&mut huge).put_u32(SB1_MAX_DEV, 1921);
        assert_eq!(
            decode_superblock_v1(&huge),
            Err(CodecError::TooManyDisks { count: 1921, max: 1920 })
        );

        let mut bad_magic = bytes;
        bad_magic[0] = 0;
        assert!(matches!(
            decode_superblock_v1(&bad_magic),
            Err(CodecError::BadMagic { record: Record::SuperblockV1, .. })
        ));
    }

    #[test]
    fn test_timestamps() {
        let t = UNIX_EPOCH + Duration::new(1_723_541_683, 250_000_000);
        let raw = sb1_time_from_system(t);
        assert_eq!(raw & SB1_TIME_SECONDS_MASK, 1_723_541_683);
        assert_eq!(raw >> 40, 250_000);
        assert_eq!(sb1_time_to_system(raw), t);
        let sb = worklaptop_member();
        assert_eq!(sb.created_at(), UNIX_EPOCH + Duration::from_secs(1_723_541_683));
        assert_eq!(sb.updated_at(), sb.created_at());
    }

    #[test]
    fn test_bitmap_and_ppl_union() {
        let mut sb = worklaptop_member();
        assert_eq!(sb.bitmap_offset(), None);
        assert_eq!(sb.ppl_location(), None);

        sb.set_bitmap_offset(-16);
        assert_eq!(sb.bitmap_offset(), Some(-16));
        assert_eq!(sb.ppl_location(), None);

        sb.set_ppl_location(PplLocation { offset: 8, size: 248 });
        assert_eq!(sb.bitmap_offset(), None);
        let decoded = decode_superblock_v1(&encode_superblock_v1(&sb)).unwrap();
        assert_eq!(decoded.ppl_location(), Some(PplLocation { offset: 8, size: 248 }));
        assert_eq!(LeReader::new(&encode_superblock_v1(&sb)).i16(SB1_PPL_OFFSET), 8);
        assert_eq!(LeReader::new(&encode_superblock_v1(&sb)).u16(SB1_PPL_SIZE), 248);
    }

    #[test]
    fn test_device_roles() {
        let mut sb = worklaptop_member();
        sb.dev_number = 1;
        sb.devflags = DevFlags::WRITE_MOSTLY;
        assert_eq!(sb.role(), DiskRole::NumberedSlot(1));
        assert!(sb.status().is_write_mostly());

        sb.feature_map.insert(FeatureMap::RECOVERY_OFFSET | FeatureMap::REPLACEMENT);
        assert_eq!(sb.role(), DiskRole::Replacement(1));
        assert!(!sb.status().is_in_sync());

        sb.dev_number = 500;
        assert_eq!(sb.role(), DiskRole::Spare);

        sb.dev_number = 2;
        sb.roles.set(2, DiskRole::Journal).unwrap();
        assert_eq!(sb.role(), DiskRole::Journal);
        assert!(sb.status().is_journal());
        assert_eq!(sb.journal_tail(), Some(0));

        sb.roles.set(3, DiskRole::Faulty).unwrap();
        assert_eq!(sb.role_of(3), Some(DiskRole::Faulty));
        assert_eq!(sb.role_of(128), None);
        assert!(sb.roles.set(128, DiskRole::Spare).is_err());
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut sb = worklaptop_member();
        let mut raw = vec![MD_DISK_ROLE_SPARE; 4];
        raw[0] = 0;
        raw[1] = 1;
        raw[2] = 2;
        raw[3] = MD_DISK_ROLE_FAULTY;
        sb.roles = RoleTable::new(raw).unwrap();
        assert_eq!(sb.role_of(2), Some(DiskRole::Spare));

        let bytes = encode_superblock_v1(&sb);
        assert!(decode_superblock_v1(&bytes).is_ok());
        assert!(matches!(
            decode_superblock_v1_with(&bytes, &DecodeOptions::strict()),
            Err(CodecError::InvalidRole { raw_role: 2, .. })
        ));

        // A growing reshape widens the slot range.
        sb.delta_disks = 1;
        assert_eq!(sb.role_of(2), Some(DiskRole::NumberedSlot(2)));
        let bytes = encode_superblock_v1(&sb);
        assert!(decode_superblock_v1_with(&bytes, &DecodeOptions::strict()).is_ok());
    }

    #[test]
    fn test_name_limits() {
        let mut sb = worklaptop_member();
        assert!(sb.set_name(&"x".repeat(32)).is_ok());
        assert_eq!(sb.name().len(), 32);
        assert!(matches!(
            sb.set_name(&"x".repeat(33)),
            Err(CodecError::InvalidSuperblock { .. })
        ));
    }

    #[test]
    fn test_role_table_capacity() {
        assert!(RoleTable::new(vec![0xffff; 1920]).is_ok());
        assert!(matches!(
            RoleTable::new(vec![0xffff; 1921]),
            Err(CodecError::TooManyDisks { count: 1921, max: 1920 })
        ));
        let table = RoleTable::from_roles(&[DiskRole::NumberedSlot(0), DiskRole::Spare]).unwrap();
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![DiskRole::NumberedSlot(0), DiskRole::Spare]);
    }

    #[test]
    fn test_json_dump() {
        let sb = worklaptop_member();
        let json = serde_json::to_string(&sb).unwrap();
        let back: SuperblockV1 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sb);
    }
}

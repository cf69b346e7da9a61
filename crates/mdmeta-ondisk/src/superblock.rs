//! 0.90 superblock: generic region, personality region, disk table.
//!
//! The record is 1024 little-endian words at the end of each member device:
//!
//! - words 0..64: generic region (32 constant words, 32 state words)
//! - words 64..128: personality region, opaque to this crate
//! - words 128..992: up to 27 disk descriptors
//! - words 992..1024: descriptor of the device the record was read from
//!
//! Word 38 holds an additive checksum over the whole record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checksum::md_sb0_checksum;
use crate::config::DecodeOptions;
use crate::disk::{decode_disk_table, encode_disk_table, DiskDescriptor, DiskTable};
use crate::error::{CodecError, CodecResult, Record};
use crate::flags::ArrayState;
use crate::layout::{
    ensure_len, word_bytes, LeReader, LeWriter, MD_SB_BYTES, MD_SB_DESCRIPTOR_BYTES, MD_SB_DESCRIPTOR_OFFSET,
    MD_SB_DISKS, MD_SB_DISKS_OFFSET, MD_SB_MAGIC, MD_SB_PERSONALITY_BYTES, MD_SB_PERSONALITY_OFFSET,
};
use crate::role::DiskRole;

/// Major version of the 0.90 layout.
pub const MD_SB0_MAJOR_VERSION: u32 = 0;
/// Minor version of the 0.90 layout.
pub const MD_SB0_MINOR_VERSION: u32 = 90;

// Constant generic words.
const SB_MAGIC: usize = 0;
const SB_MAJOR: usize = 1;
const SB_MINOR: usize = 2;
const SB_PATCH: usize = 3;
const SB_GVALID_WORDS: usize = 4;
const SB_UUID0: usize = 5;
const SB_CTIME: usize = 6;
const SB_LEVEL: usize = 7;
const SB_SIZE: usize = 8;
const SB_NR_DISKS: usize = 9;
const SB_RAID_DISKS: usize = 10;
const SB_MD_MINOR: usize = 11;
const SB_NOT_PERSISTENT: usize = 12;
const SB_UUID1: usize = 13;
const SB_UUID2: usize = 14;
const SB_UUID3: usize = 15;
const SB_CRESERVED: usize = 16;
const SB_CRESERVED_WORDS: usize = 16;

// Generic state words.
const SB_UTIME: usize = 32;
const SB_STATE: usize = 33;
const SB_ACTIVE_DISKS: usize = 34;
const SB_WORKING_DISKS: usize = 35;
const SB_FAILED_DISKS: usize = 36;
const SB_SPARE_DISKS: usize = 37;
/// Word index of the checksum.
pub const SB_CSUM: usize = 38;
const SB_EVENTS_LO: usize = 39;
const SB_EVENTS_HI: usize = 40;
const SB_CP_EVENTS_LO: usize = 41;
const SB_CP_EVENTS_HI: usize = 42;
const SB_RECOVERY_CP: usize = 43;
const SB_RESHAPE_POSITION: usize = 44;
const SB_NEW_LEVEL: usize = 46;
const SB_DELTA_DISKS: usize = 47;
const SB_NEW_LAYOUT: usize = 48;
const SB_NEW_CHUNK: usize = 49;
const SB_SRESERVED: usize = 50;
const SB_SRESERVED_WORDS: usize = 14;

// Personality words the 0.90 layout defines.
const PERS_LAYOUT: usize = 0;
const PERS_CHUNK_SIZE: usize = 1;

/// RAID personality as stored in the level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaidLevel {
    /// Container for external metadata.
    Container,
    /// Fault-injection personality.
    Faulty,
    /// Multipath.
    Multipath,
    /// Concatenation.
    Linear,
    /// Striping.
    Raid0,
    /// Mirroring.
    Raid1,
    /// Dedicated parity.
    Raid4,
    /// Distributed parity.
    Raid5,
    /// Dual distributed parity.
    Raid6,
    /// Striped mirrors.
    Raid10,
}

impl RaidLevel {
    /// Maps the signed on-disk level to a personality, if known.
    pub fn from_raw(level: i32) -> Option<Self> {
        match level {
            -100 => Some(RaidLevel::Container),
            -5 => Some(RaidLevel::Faulty),
            -4 => Some(RaidLevel::Multipath),
            -1 => Some(RaidLevel::Linear),
            0 => Some(RaidLevel::Raid0),
            1 => Some(RaidLevel::Raid1),
            4 => Some(RaidLevel::Raid4),
            5 => Some(RaidLevel::Raid5),
            6 => Some(RaidLevel::Raid6),
            10 => Some(RaidLevel::Raid10),
            _ => None,
        }
    }

    /// Signed on-disk level value.
    pub fn as_raw(&self) -> i32 {
        match self {
            RaidLevel::Container => -100,
            RaidLevel::Faulty => -5,
            RaidLevel::Multipath => -4,
            RaidLevel::Linear => -1,
            RaidLevel::Raid0 => 0,
            RaidLevel::Raid1 => 1,
            RaidLevel::Raid4 => 4,
            RaidLevel::Raid5 => 5,
            RaidLevel::Raid6 => 6,
            RaidLevel::Raid10 => 10,
        }
    }
}

/// Generic region of a 0.90 superblock, with every field in host form.
///
/// The magic and checksum are not stored: decode validates them and encode
/// writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockGeneric {
    /// Major version (0 for this layout).
    pub major_version: u32,
    /// Minor version (90, or 91 when reshape fields are valid).
    pub minor_version: u32,
    /// Patch level.
    pub patch_version: u32,
    /// Number of used words in the generic region.
    pub gvalid_words: u32,
    /// Array UUID.
    pub set_uuid: Uuid,
    /// Creation time, seconds since the epoch.
    pub ctime: u32,
    /// Signed RAID level.
    pub level: i32,
    /// Size of each member in KiB.
    pub size: u32,
    /// Number of disks described by the table.
    pub nr_disks: u32,
    /// Number of slots in a fully working array.
    pub raid_disks: u32,
    /// Preferred md minor number.
    pub md_minor: u32,
    /// Non-zero when the superblock is not persistent.
    pub not_persistent: u32,
    /// Reserved constant words, passed through unchanged.
    pub constant_reserved: [u32; SB_CRESERVED_WORDS],
    /// Last update time, seconds since the epoch.
    pub utime: u32,
    /// Array state bits.
    pub state: ArrayState,
    /// Currently active members.
    pub active_disks: u32,
    /// Working members.
    pub working_disks: u32,
    /// Failed members.
    pub failed_disks: u32,
    /// Spare members.
    pub spare_disks: u32,
    /// Superblock update count.
    pub events: u64,
    /// Checkpoint update count.
    pub cp_events: u64,
    /// Recovery checkpoint, in sectors.
    pub recovery_cp: u32,
    /// Next array address to reshape (minor 91 and later).
    pub reshape_position: u64,
    /// Level being reshaped to.
    pub new_level: i32,
    /// Change in raid disk count during reshape.
    pub delta_disks: i32,
    /// Layout being reshaped to.
    pub new_layout: u32,
    /// Chunk size being reshaped to, in bytes.
    pub new_chunk: u32,
    /// Reserved state words, passed through unchanged.
    pub state_reserved: [u32; SB_SRESERVED_WORDS],
}

impl SuperblockGeneric {
    /// Generic region for a new clean 0.90 array.
    pub fn new(set_uuid: Uuid, level: i32, raid_disks: u32, size_kib: u32, ctime: u32) -> Self {
        Self {
            major_version: MD_SB0_MAJOR_VERSION,
            minor_version: MD_SB0_MINOR_VERSION,
            patch_version: 0,
            gvalid_words: 0,
            set_uuid,
            ctime,
            level,
            size: size_kib,
            nr_disks: 0,
            raid_disks,
            md_minor: 0,
            not_persistent: 0,
            constant_reserved: [0; SB_CRESERVED_WORDS],
            utime: ctime,
            state: ArrayState::CLEAN,
            active_disks: 0,
            working_disks: 0,
            failed_disks: 0,
            spare_disks: 0,
            events: 1,
            cp_events: 0,
            recovery_cp: 0,
            reshape_position: 0,
            new_level: 0,
            delta_disks: 0,
            new_layout: 0,
            new_chunk: 0,
            state_reserved: [0; SB_SRESERVED_WORDS],
        }
    }

    fn decode(r: &LeReader<'_>) -> Self {
        let mut uuid = [0u8; 16];
        for (i, word) in [SB_UUID0, SB_UUID1, SB_UUID2, SB_UUID3].into_iter().enumerate() {
            uuid[i * 4..i * 4 + 4].copy_from_slice(&r.bytes::<4>(word_bytes(word)));
        }
        let events_lo = r.word(SB_EVENTS_LO) as u64;
        let events_hi = r.word(SB_EVENTS_HI) as u64;
        let cp_lo = r.word(SB_CP_EVENTS_LO) as u64;
        let cp_hi = r.word(SB_CP_EVENTS_HI) as u64;
        Self {
            major_version: r.word(SB_MAJOR),
            minor_version: r.word(SB_MINOR),
            patch_version: r.word(SB_PATCH),
            gvalid_words: r.word(SB_GVALID_WORDS),
            set_uuid: Uuid::from_bytes(uuid),
            ctime: r.word(SB_CTIME),
            level: r.i32(word_bytes(SB_LEVEL)),
            size: r.word(SB_SIZE),
            nr_disks: r.word(SB_NR_DISKS),
            raid_disks: r.word(SB_RAID_DISKS),
            md_minor: r.word(SB_MD_MINOR),
            not_persistent: r.word(SB_NOT_PERSISTENT),
            constant_reserved: r.words::<SB_CRESERVED_WORDS>(SB_CRESERVED),
            utime: r.word(SB_UTIME),
            state: ArrayState::from_bits_retain(r.word(SB_STATE)),
            active_disks: r.word(SB_ACTIVE_DISKS),
            working_disks: r.word(SB_WORKING_DISKS),
            failed_disks: r.word(SB_FAILED_DISKS),
            spare_disks: r.word(SB_SPARE_DISKS),
            events: events_hi << 32 | events_lo,
            cp_events: cp_hi << 32 | cp_lo,
            recovery_cp: r.word(SB_RECOVERY_CP),
            reshape_position: r.u64(word_bytes(SB_RESHAPE_POSITION)),
            new_level: r.i32(word_bytes(SB_NEW_LEVEL)),
            delta_disks: r.i32(word_bytes(SB_DELTA_DISKS)),
            new_layout: r.word(SB_NEW_LAYOUT),
            new_chunk: r.word(SB_NEW_CHUNK),
            state_reserved: r.words::<SB_SRESERVED_WORDS>(SB_SRESERVED),
        }
    }

    fn encode_into(&self, w: &mut LeWriter<'_>) {
        let uuid = self.set_uuid.as_bytes();
        w.put_word(SB_MAGIC, MD_SB_MAGIC);
        w.put_word(SB_MAJOR, self.major_version);
        w.put_word(SB_MINOR, self.minor_version);
        w.put_word(SB_PATCH, self.patch_version);
        w.put_word(SB_GVALID_WORDS, self.gvalid_words);
        for (i, word) in [SB_UUID0, SB_UUID1, SB_UUID2, SB_UUID3].into_iter().enumerate() {
            w.put_bytes(word_bytes(word), &uuid[i * 4..i * 4 + 4]);
        }
        w.put_word(SB_CTIME, self.ctime);
        w.put_i32(word_bytes(SB_LEVEL), self.level);
        w.put_word(SB_SIZE, self.size);
        w.put_word(SB_NR_DISKS, self.nr_disks);
        w.put_word(SB_RAID_DISKS, self.raid_disks);
        w.put_word(SB_MD_MINOR, self.md_minor);
        w.put_word(SB_NOT_PERSISTENT, self.not_persistent);
        w.put_words(SB_CRESERVED, &self.constant_reserved);
        w.put_word(SB_UTIME, self.utime);
        w.put_word(SB_STATE, self.state.bits());
        w.put_word(SB_ACTIVE_DISKS, self.active_disks);
        w.put_word(SB_WORKING_DISKS, self.working_disks);
        w.put_word(SB_FAILED_DISKS, self.failed_disks);
        w.put_word(SB_SPARE_DISKS, self.spare_disks);
        w.put_word(SB_EVENTS_LO, self.events as u32);
        w.put_word(SB_EVENTS_HI, (self.events >> 32) as u32);
        w.put_word(SB_CP_EVENTS_LO, self.cp_events as u32);
        w.put_word(SB_CP_EVENTS_HI, (self.cp_events >> 32) as u32);
        w.put_word(SB_RECOVERY_CP, self.recovery_cp);
        w.put_u64(word_bytes(SB_RESHAPE_POSITION), self.reshape_position);
        w.put_i32(word_bytes(SB_NEW_LEVEL), self.new_level);
        w.put_i32(word_bytes(SB_DELTA_DISKS), self.delta_disks);
        w.put_word(SB_NEW_LAYOUT, self.new_layout);
        w.put_word(SB_NEW_CHUNK, self.new_chunk);
        w.put_words(SB_SRESERVED, &self.state_reserved);
    }
}

/// Personality region: 256 bytes owned by the RAID level implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personality {
    #[serde(with = "serde_bytes")]
    bytes: [u8; MD_SB_PERSONALITY_BYTES],
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            bytes: [0; MD_SB_PERSONALITY_BYTES],
        }
    }
}

impl Personality {
    /// Wraps a raw region.
    pub fn new(bytes: [u8; MD_SB_PERSONALITY_BYTES]) -> Self {
        Self { bytes }
    }

    /// Region holding only the layout and chunk size words.
    pub fn with_layout(layout: u32, chunk_size: u32) -> Self {
        let mut region = Self::default();
        let mut w = LeWriter::new(&mut region.bytes);
        w.put_word(PERS_LAYOUT, layout);
        w.put_word(PERS_CHUNK_SIZE, chunk_size);
        region
    }

    /// Raw bytes of the region.
    pub fn as_bytes(&self) -> &[u8; MD_SB_PERSONALITY_BYTES] {
        &self.bytes
    }

    /// Physical layout of the array (word 0).
    pub fn layout(&self) -> u32 {
        LeReader::new(&self.bytes).word(PERS_LAYOUT)
    }

    /// Chunk size in bytes (word 1).
    pub fn chunk_size(&self) -> u32 {
        LeReader::new(&self.bytes).word(PERS_CHUNK_SIZE)
    }
}

/// A decoded 0.90 superblock.
///
/// Built through [`Superblock::new`] or [`decode_superblock`], both of which
/// guarantee that [`encode_superblock`] produces a record that decodes back
/// to an equal value. Deserialization goes through [`Superblock::new`] too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SuperblockParts")]
pub struct Superblock {
    generic: SuperblockGeneric,
    personality: Personality,
    disks: DiskTable,
    this_disk: DiskDescriptor,
}

/// Serialized form of [`Superblock`], validated on the way in.
#[derive(Deserialize)]
struct SuperblockParts {
    generic: SuperblockGeneric,
    personality: Personality,
    disks: DiskTable,
    this_disk: DiskDescriptor,
}

impl TryFrom<SuperblockParts> for Superblock {
    type Error = CodecError;

    fn try_from(parts: SuperblockParts) -> CodecResult<Self> {
        Superblock::new(parts.generic, parts.personality, parts.disks, parts.this_disk)
    }
}

impl Superblock {
    /// Assembles a superblock, checking that it can be represented.
    ///
    /// The major version must be 0. `nr_disks` may not exceed the table
    /// length, and a table longer than `nr_disks` may not end in an all-zero
    /// descriptor: on disk that slot would be indistinguishable from an
    /// unused one.
    pub fn new(
        generic: SuperblockGeneric,
        personality: Personality,
        disks: DiskTable,
        this_disk: DiskDescriptor,
    ) -> CodecResult<Self> {
        if generic.major_version != MD_SB0_MAJOR_VERSION {
            return Err(CodecError::InvalidSuperblock {
                reason: format!("major version {} in a 0.90 superblock", generic.major_version),
            });
        }
        let nr_disks = generic.nr_disks as usize;
        if nr_disks > disks.len() {
            return Err(CodecError::InvalidSuperblock {
                reason: format!("nr_disks {} exceeds {} descriptors", nr_disks, disks.len()),
            });
        }
        if disks.len() > nr_disks && disks.as_slice().last().map_or(false, |d| d.is_empty()) {
            return Err(CodecError::InvalidSuperblock {
                reason: format!("descriptor {} past nr_disks is empty", disks.len() - 1),
            });
        }
        Ok(Self {
            generic,
            personality,
            disks,
            this_disk,
        })
    }

    /// Generic region.
    pub fn generic(&self) -> &SuperblockGeneric {
        &self.generic
    }

    /// Personality region.
    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    /// Disk table, in slot order.
    pub fn disks(&self) -> &DiskTable {
        &self.disks
    }

    /// Descriptor of the device this record was read from.
    pub fn this_disk(&self) -> &DiskDescriptor {
        &self.this_disk
    }

    /// Splits the superblock into its parts.
    pub fn into_parts(self) -> (SuperblockGeneric, Personality, DiskTable, DiskDescriptor) {
        (self.generic, self.personality, self.disks, self.this_disk)
    }

    /// Array UUID.
    pub fn uuid(&self) -> Uuid {
        self.generic.set_uuid
    }

    /// Known RAID level, if the level field holds one.
    pub fn level(&self) -> Option<RaidLevel> {
        RaidLevel::from_raw(self.generic.level)
    }

    /// Layout word from the personality region.
    pub fn layout(&self) -> u32 {
        self.personality.layout()
    }

    /// Chunk size in bytes from the personality region.
    pub fn chunk_size(&self) -> u32 {
        self.personality.chunk_size()
    }

    /// Member size in 512-byte sectors.
    pub fn member_size_sectors(&self) -> u64 {
        self.generic.size as u64 * 2
    }

    /// Array was shut down cleanly.
    pub fn is_clean(&self) -> bool {
        self.generic.state.contains(ArrayState::CLEAN)
    }

    /// Creation time.
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.generic.ctime as u64)
    }

    /// Last update time.
    pub fn updated_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.generic.utime as u64)
    }

    /// Roles of the table's members, in slot order.
    pub fn roles(&self) -> impl Iterator<Item = DiskRole> + '_ {
        let raid_disks = self.generic.raid_disks;
        self.disks.iter().map(move |d| d.role(raid_disks))
    }

    /// Role of the device this record was read from.
    pub fn this_role(&self) -> DiskRole {
        self.this_disk.role(self.generic.raid_disks)
    }
}

/// Decodes a 0.90 superblock with default options.
pub fn decode_superblock(bytes: &[u8]) -> CodecResult<Superblock> {
    decode_superblock_with(bytes, &DecodeOptions::default())
}

/// Decodes a 0.90 superblock.
///
/// Checks run in order: length, magic, major version, checksum, disk count,
/// then (with `strict_roles`) every member's role.
pub fn decode_superblock_with(bytes: &[u8], opts: &DecodeOptions) -> CodecResult<Superblock> {
    ensure_len(bytes, MD_SB_BYTES)?;
    let record = &bytes[..MD_SB_BYTES];
    let r = LeReader::new(record);

    let magic = r.word(SB_MAGIC);
    if magic != MD_SB_MAGIC {
        if magic.swap_bytes() == MD_SB_MAGIC {
            debug!("superblock magic is byte-swapped; record was written on a foreign-endian host");
        }
        debug!(expected = MD_SB_MAGIC, actual = magic, "invalid superblock magic");
        return Err(CodecError::BadMagic {
            record: Record::Superblock,
            expected: MD_SB_MAGIC,
            actual: magic,
        });
    }

    let major = r.word(SB_MAJOR);
    if major != MD_SB0_MAJOR_VERSION {
        debug!(major, "superblock major version is not 0.90 layout");
        return Err(CodecError::UnsupportedVersion { major });
    }

    if opts.verify_checksums {
        let stored = r.word(SB_CSUM);
        let computed = md_sb0_checksum(record, SB_CSUM);
        if stored != computed {
            debug!(stored, computed, "superblock checksum mismatch");
            return Err(CodecError::ChecksumMismatch {
                record: Record::Superblock,
                stored,
                computed,
            });
        }
    }

    let generic = SuperblockGeneric::decode(&r);
    let nr_disks = generic.nr_disks as usize;
    if nr_disks > MD_SB_DISKS {
        debug!(nr_disks, "superblock declares too many disks");
        return Err(CodecError::TooManyDisks {
            count: nr_disks,
            max: MD_SB_DISKS,
        });
    }

    // Slots past nr_disks are still read when they hold data.
    let table_start = word_bytes(MD_SB_DISKS_OFFSET);
    let used = record[table_start..word_bytes(MD_SB_DESCRIPTOR_OFFSET)]
        .chunks_exact(MD_SB_DESCRIPTOR_BYTES)
        .rposition(|slot| slot.iter().any(|&b| b != 0))
        .map_or(0, |last| last + 1);
    let count = nr_disks.max(used);
    if count > nr_disks {
        debug!(nr_disks, count, "disk table has populated slots past nr_disks");
    }
    let disks = DiskTable::new(decode_disk_table(record, count as u8)?)?;
    let this_disk = DiskDescriptor::decode(&record[word_bytes(MD_SB_DESCRIPTOR_OFFSET)..])?;

    if opts.strict_roles {
        for disk in disks.iter().chain(std::iter::once(&this_disk)) {
            disk.role_checked(generic.raid_disks, true)?;
        }
    }

    let mut personality = [0u8; MD_SB_PERSONALITY_BYTES];
    personality.copy_from_slice(
        &record[word_bytes(MD_SB_PERSONALITY_OFFSET)..word_bytes(MD_SB_PERSONALITY_OFFSET) + MD_SB_PERSONALITY_BYTES],
    );

    trace!(
        uuid = %generic.set_uuid,
        level = generic.level,
        raid_disks = generic.raid_disks,
        disks = disks.len(),
        "decoded 0.90 superblock"
    );

    Ok(Superblock {
        generic,
        personality: Personality::new(personality),
        disks,
        this_disk,
    })
}

/// Encodes a 0.90 superblock, writing its checksum.
pub fn encode_superblock(sb: &Superblock) -> [u8; MD_SB_BYTES] {
    let mut out = [0u8; MD_SB_BYTES];
    {
        let mut w = LeWriter::new(&mut out);
        sb.generic.encode_into(&mut w);
        w.put_bytes(word_bytes(MD_SB_PERSONALITY_OFFSET), sb.personality.as_bytes());
    }
    // A DiskTable never exceeds the table capacity.
    if let Ok(table) = encode_disk_table(sb.disks.as_slice()) {
        let start = word_bytes(MD_SB_DISKS_OFFSET);
        out[start..start + table.len()].copy_from_slice(&table);
    }
    sb.this_disk
        .encode_into(&mut out[word_bytes(MD_SB_DESCRIPTOR_OFFSET)..]);
    let csum = md_sb0_checksum(&out, SB_CSUM);
    LeWriter::new(&mut out).put_word(SB_CSUM, csum);
    out
}

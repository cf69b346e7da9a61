//! Disk role and state decoding.
//!
//! A role is a 16-bit value where small numbers are slot indices and the top
//! of the range holds sentinels. Once decoded, roles are always carried as a
//! [`DiskRole`] so a sentinel can never be mistaken for a slot number.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CodecError, CodecResult};
use crate::flags::DiskState;
use crate::layout::{MD_DISK_ROLE_FAULTY, MD_DISK_ROLE_JOURNAL, MD_DISK_ROLE_MAX, MD_DISK_ROLE_SPARE};

/// Logical function of a member device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiskRole {
    /// Hot spare, not part of the active set.
    Spare,
    /// Failed member.
    Faulty,
    /// RAID4/5/6 write journal.
    Journal,
    /// Replacement being rebuilt into the given slot.
    Replacement(u16),
    /// Active member in the given slot.
    NumberedSlot(u16),
}

impl DiskRole {
    /// Slot index for roles that occupy one.
    pub fn slot(&self) -> Option<u16> {
        match self {
            DiskRole::NumberedSlot(n) | DiskRole::Replacement(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for DiskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskRole::Spare => write!(f, "spare"),
            DiskRole::Faulty => write!(f, "faulty"),
            DiskRole::Journal => write!(f, "journal"),
            DiskRole::Replacement(n) => write!(f, "Replacement device {}", n),
            DiskRole::NumberedSlot(n) => write!(f, "Active device {}", n),
        }
    }
}

/// Maps a raw role and a legacy state word to a [`DiskRole`].
///
/// Total over all inputs: roles in the unassigned band `0xff00..=0xfffc`
/// decode as [`DiskRole::Faulty`].
pub fn decode_role_state(raw_role: u16, raw_state_flags: u32) -> DiskRole {
    let state = DiskState::from_bits_retain(raw_state_flags);
    match raw_role {
        MD_DISK_ROLE_JOURNAL => DiskRole::Journal,
        MD_DISK_ROLE_FAULTY => DiskRole::Faulty,
        MD_DISK_ROLE_SPARE => DiskRole::Spare,
        n if n < MD_DISK_ROLE_MAX && state.contains(DiskState::REPLACEMENT) => DiskRole::Replacement(n),
        n if n < MD_DISK_ROLE_MAX => DiskRole::NumberedSlot(n),
        _ => DiskRole::Faulty,
    }
}

/// Like [`decode_role_state`], but rejects the unassigned band with
/// [`CodecError::InvalidRole`].
pub fn decode_role_state_strict(raw_role: u16, raw_state_flags: u32) -> CodecResult<DiskRole> {
    if (MD_DISK_ROLE_MAX..MD_DISK_ROLE_JOURNAL).contains(&raw_role) {
        debug!(raw_role, "role in reserved band");
        return Err(CodecError::InvalidRole {
            raw_role,
            reason: "reserved role band",
        });
    }
    Ok(decode_role_state(raw_role, raw_state_flags))
}

/// Inverse of [`decode_role_state`]: the raw role and the state bits that
/// describe `role`.
pub fn encode_role_state(role: DiskRole) -> (u16, u32) {
    match role {
        DiskRole::Spare => (MD_DISK_ROLE_SPARE, 0),
        DiskRole::Faulty => (MD_DISK_ROLE_FAULTY, DiskState::FAULTY.bits()),
        DiskRole::Journal => (MD_DISK_ROLE_JOURNAL, DiskState::JOURNAL.bits()),
        DiskRole::Replacement(n) => (n, (DiskState::ACTIVE | DiskState::REPLACEMENT).bits()),
        DiskRole::NumberedSlot(n) => (n, (DiskState::ACTIVE | DiskState::SYNC).bits()),
    }
}

/// Raw role of a 0.90 descriptor, derived from its slot index and state word.
///
/// Faulty and journal bits win; an active or in-sync disk takes its slot;
/// anything else is a spare. Slot indices the 16-bit role space cannot hold
/// map to [`MD_DISK_ROLE_MAX`].
pub fn legacy_raw_role(raid_disk: u32, state: DiskState) -> u16 {
    if state.contains(DiskState::FAULTY) {
        MD_DISK_ROLE_FAULTY
    } else if state.contains(DiskState::JOURNAL) {
        MD_DISK_ROLE_JOURNAL
    } else if state.intersects(DiskState::ACTIVE | DiskState::SYNC) {
        u16::try_from(raid_disk)
            .ok()
            .filter(|&n| n < MD_DISK_ROLE_MAX)
            .unwrap_or(MD_DISK_ROLE_MAX)
    } else {
        MD_DISK_ROLE_SPARE
    }
}

/// Decodes a role and demotes a slot at or past `raid_disks` to
/// [`DiskRole::Spare`], which is what the kernel does with such members.
pub fn lenient_role(raw_role: u16, state: DiskState, raid_disks: u32) -> DiskRole {
    let role = decode_role_state(raw_role, state.bits());
    match role.slot() {
        Some(n) if n as u32 >= raid_disks => {
            debug!(slot = n, raid_disks, "demoting slot role beyond raid disk count");
            DiskRole::Spare
        }
        _ => role,
    }
}

/// Decodes a role and holds slot roles to the array's raid-disk count.
///
/// Without `strict` this is [`lenient_role`] and never fails. With `strict`
/// set, an out-of-range slot and the reserved band both fail with
/// [`CodecError::InvalidRole`].
pub fn bounded_role(raw_role: u16, state: DiskState, raid_disks: u32, strict: bool) -> CodecResult<DiskRole> {
    if !strict {
        return Ok(lenient_role(raw_role, state, raid_disks));
    }
    let role = decode_role_state_strict(raw_role, state.bits())?;
    match role.slot() {
        Some(n) if n as u32 >= raid_disks => {
            debug!(slot = n, raid_disks, "slot role beyond raid disk count");
            Err(CodecError::InvalidRole {
                raw_role,
                reason: "slot beyond raid disk count",
            })
        }
        _ => Ok(role),
    }
}

/// Semantic status of a member: its role plus the state bits that qualify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStatus {
    /// Decoded role.
    pub role: DiskRole,
    /// State bits (legacy word, or synthesized for 1.x members).
    pub state: DiskState,
}

impl DiskStatus {
    /// Creates a status from a role and state bits.
    pub fn new(role: DiskRole, state: DiskState) -> Self {
        Self { role, state }
    }

    /// Member has failed.
    pub fn is_faulty(&self) -> bool {
        self.role == DiskRole::Faulty || self.state.contains(DiskState::FAULTY)
    }

    /// Member is running, in sync or not.
    pub fn is_active(&self) -> bool {
        !self.is_faulty() && (self.role.slot().is_some() || self.state.contains(DiskState::ACTIVE))
    }

    /// Member holds current data for its slot.
    pub fn is_in_sync(&self) -> bool {
        matches!(self.role, DiskRole::NumberedSlot(_)) && self.state.contains(DiskState::SYNC)
    }

    /// Member is a spare.
    pub fn is_spare(&self) -> bool {
        self.role == DiskRole::Spare
    }

    /// Member is the write journal.
    pub fn is_journal(&self) -> bool {
        self.role == DiskRole::Journal
    }

    /// Member is replacing another in its slot.
    pub fn is_replacement(&self) -> bool {
        matches!(self.role, DiskRole::Replacement(_))
    }

    /// Member should only be written.
    pub fn is_write_mostly(&self) -> bool {
        self.state.contains(DiskState::WRITE_MOSTLY)
    }

    /// Member uses fail-fast I/O.
    pub fn is_fail_fast(&self) -> bool {
        self.state.contains(DiskState::FAIL_FAST)
    }

    /// Member was removed from the array.
    pub fn is_removed(&self) -> bool {
        self.state.contains(DiskState::REMOVED)
    }

    /// Member is a candidate awaiting cluster confirmation.
    pub fn is_candidate(&self) -> bool {
        self.state.contains(DiskState::CANDIDATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(decode_role_state(0xfffd, 0), DiskRole::Journal);
        assert_eq!(decode_role_state(0xfffe, 0), DiskRole::Faulty);
        assert_eq!(decode_role_state(0xffff, 0), DiskRole::Spare);
        // Sentinels ignore the replacement bit.
        let repl = DiskState::REPLACEMENT.bits();
        assert_eq!(decode_role_state(0xffff, repl), DiskRole::Spare);
    }

    #[test]
    fn test_numbered_and_replacement() {
        assert_eq!(decode_role_state(0, 0), DiskRole::NumberedSlot(0));
        assert_eq!(decode_role_state(17, 0), DiskRole::NumberedSlot(17));
        assert_eq!(
            decode_role_state(3, DiskState::REPLACEMENT.bits()),
            DiskRole::Replacement(3)
        );
        assert_eq!(decode_role_state(0xfeff, 0), DiskRole::NumberedSlot(0xfeff));
    }

    #[test]
    fn test_reserved_band_degrades_to_faulty() {
        for raw in [0xff00u16, 0xff01, 0xfff0, 0xfffc] {
            assert_eq!(decode_role_state(raw, 0xdead_beef), DiskRole::Faulty);
            assert!(matches!(
                decode_role_state_strict(raw, 0),
                Err(CodecError::InvalidRole { .. })
            ));
        }
        assert_eq!(decode_role_state_strict(0xfffd, 0), Ok(DiskRole::Journal));
    }

    #[test]
    fn test_encode_is_left_inverse() {
        let roles = [
            DiskRole::Spare,
            DiskRole::Faulty,
            DiskRole::Journal,
            DiskRole::Replacement(0),
            DiskRole::Replacement(0xfeff),
            DiskRole::NumberedSlot(0),
            DiskRole::NumberedSlot(26),
        ];
        for role in roles {
            let (raw, state) = encode_role_state(role);
            assert_eq!(decode_role_state(raw, state), role);
        }
    }

    #[test]
    fn test_legacy_raw_role() {
        let sync = DiskState::ACTIVE | DiskState::SYNC;
        assert_eq!(legacy_raw_role(2, sync), 2);
        assert_eq!(legacy_raw_role(2, DiskState::FAULTY | sync), MD_DISK_ROLE_FAULTY);
        assert_eq!(legacy_raw_role(2, DiskState::JOURNAL), MD_DISK_ROLE_JOURNAL);
        assert_eq!(legacy_raw_role(5, DiskState::empty()), MD_DISK_ROLE_SPARE);
        assert_eq!(legacy_raw_role(0x1_0000, sync), MD_DISK_ROLE_MAX);
    }

    #[test]
    fn test_bounded_role_demotes_out_of_range_slot() {
        let sync = DiskState::ACTIVE | DiskState::SYNC;
        assert_eq!(bounded_role(1, sync, 2, false), Ok(DiskRole::NumberedSlot(1)));
        assert_eq!(bounded_role(2, sync, 2, false), Ok(DiskRole::Spare));
        assert!(matches!(
            bounded_role(2, sync, 2, true),
            Err(CodecError::InvalidRole { raw_role: 2, .. })
        ));
        assert_eq!(bounded_role(0xffff, sync, 0, true), Ok(DiskRole::Spare));
    }

    #[test]
    fn test_lenient_role_never_fails() {
        let sync = DiskState::ACTIVE | DiskState::SYNC;
        assert_eq!(lenient_role(1, sync, 2), DiskRole::NumberedSlot(1));
        assert_eq!(lenient_role(2, sync, 2), DiskRole::Spare);
        assert_eq!(lenient_role(0xff10, sync, 2), DiskRole::Faulty);
        for raw in [0u16, 2, 0xfeff, 0xff00, 0xfffc, 0xfffd, 0xffff] {
            assert_eq!(bounded_role(raw, sync, 2, false), Ok(lenient_role(raw, sync, 2)));
        }
    }

    #[test]
    fn test_status_predicates() {
        let status = DiskStatus::new(
            DiskRole::NumberedSlot(0),
            DiskState::ACTIVE | DiskState::SYNC | DiskState::WRITE_MOSTLY,
        );
        assert!(status.is_active());
        assert!(status.is_in_sync());
        assert!(status.is_write_mostly());
        assert!(!status.is_fail_fast());
        assert!(!status.is_spare());

        let faulty = DiskStatus::new(DiskRole::Faulty, DiskState::FAULTY | DiskState::REMOVED);
        assert!(faulty.is_faulty());
        assert!(!faulty.is_active());
        assert!(faulty.is_removed());

        let repl = DiskStatus::new(DiskRole::Replacement(1), DiskState::ACTIVE | DiskState::REPLACEMENT);
        assert!(repl.is_replacement());
        assert!(!repl.is_in_sync());

        let cand = DiskStatus::new(DiskRole::Spare, DiskState::CANDIDATE);
        assert!(cand.is_candidate());
        assert!(cand.is_spare());
        assert!(DiskStatus::new(DiskRole::Journal, DiskState::JOURNAL).is_journal());
    }

    #[test]
    fn test_display_matches_examine_wording() {
        assert_eq!(DiskRole::NumberedSlot(1).to_string(), "Active device 1");
        assert_eq!(DiskRole::Spare.to_string(), "spare");
        assert_eq!(DiskRole::Faulty.to_string(), "faulty");
        assert_eq!(DiskRole::Journal.to_string(), "journal");
        assert_eq!(DiskRole::Replacement(0).to_string(), "Replacement device 0");
    }
}

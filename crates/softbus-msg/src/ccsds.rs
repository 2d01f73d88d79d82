//! # CCSDS Primary Header
//!
//! Field access over the 6-byte, big-endian CCSDS primary header that begins
//! every bus message:
//!
//! ```text
//!  octet 0-1  StreamId = Version(3) | Type(1) | SecHdr(1) | APID(11)
//!  octet 2-3  Sequence = SegFlag(2) | SeqCount(14)
//!  octet 4-5  Length   = total_bytes - 7
//! ```
//!
//! All accessors operate on a raw byte slice so the same code serves pool
//! buffers, stack-built packets, and test fixtures. Every accessor fails with
//! [`Status::BadArgument`] when the slice cannot hold the field; every setter
//! additionally rejects values with bits outside the field mask.

use crate::msgid::MsgId;
use crate::status::Status;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Primary header length in bytes.
pub const PRI_HDR_LEN: usize = 6;

/// The wire Length field stores `total_bytes - SIZE_OFFSET`.
pub const SIZE_OFFSET: usize = 7;

/// Smallest legal message: primary header plus one byte.
pub const MIN_MSG_LEN: usize = SIZE_OFFSET;

/// Largest legal message.
pub const MAX_MSG_LEN: usize = 0xFFFF + SIZE_OFFSET;

/// CCSDS version carried by default-initialized packets.
pub const DEFAULT_CCSDS_VERSION: u8 = 0;

/// APID bits applied by default-initialized packets (overwritten by the MsgId).
pub const DEFAULT_APID: u16 = 0;

const CCSDSVER_MASK: u16 = 0xE000;
const CCSDSVER_SHIFT: u16 = 13;
const TYPE_MASK: u16 = 0x1000;
const SHDR_MASK: u16 = 0x0800;
const APID_MASK: u16 = 0x07FF;
const SEGFLG_MASK: u16 = 0xC000;
const SEGFLG_CONTINUE: u16 = 0x0000;
const SEGFLG_FIRST: u16 = 0x4000;
const SEGFLG_LAST: u16 = 0x8000;
const SEGFLG_UNSEG: u16 = 0xC000;
const SEQCNT_MASK: u16 = 0x3FFF;

// ─── Field Enums ─────────────────────────────────────────────────────────────

/// Whether the packet carries a command or telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Type bit set.
    Cmd,
    /// Type bit clear.
    Tlm,
}

/// CCSDS segmentation flag. The bus defaults to `Unsegmented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentationFlag {
    Continue = 0b00,
    First = 0b01,
    Last = 0b10,
    Unsegmented = 0b11,
}

impl SegmentationFlag {
    fn from_raw(raw: u16) -> Self {
        match raw & SEGFLG_MASK {
            SEGFLG_CONTINUE => SegmentationFlag::Continue,
            SEGFLG_FIRST => SegmentationFlag::First,
            SEGFLG_LAST => SegmentationFlag::Last,
            _ => SegmentationFlag::Unsegmented,
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            SegmentationFlag::Continue => SEGFLG_CONTINUE,
            SegmentationFlag::First => SEGFLG_FIRST,
            SegmentationFlag::Last => SEGFLG_LAST,
            SegmentationFlag::Unsegmented => SEGFLG_UNSEG,
        }
    }
}

// ─── Word Access ─────────────────────────────────────────────────────────────

#[inline]
fn word(msg: &[u8], offset: usize) -> Result<u16, Status> {
    if msg.len() < offset + 2 {
        return Err(Status::BadArgument);
    }
    Ok(u16::from_be_bytes([msg[offset], msg[offset + 1]]))
}

#[inline]
fn set_word_bits(msg: &mut [u8], offset: usize, value: u16, mask: u16) -> Result<(), Status> {
    if msg.len() < offset + 2 {
        return Err(Status::BadArgument);
    }
    let old = u16::from_be_bytes([msg[offset], msg[offset + 1]]);
    let new = (old & !mask) | (value & mask);
    msg[offset..offset + 2].copy_from_slice(&new.to_be_bytes());
    Ok(())
}

// ─── Stream Id Fields ────────────────────────────────────────────────────────

/// Read the message id from the stream id word.
pub fn msg_id(msg: &[u8]) -> Result<MsgId, Status> {
    Ok(MsgId::from_stream_id(word(msg, 0)?))
}

/// Overwrite the stream id word with the given message id.
pub fn set_msg_id(msg: &mut [u8], id: MsgId) -> Result<(), Status> {
    set_word_bits(msg, 0, id.to_stream_id(), 0xFFFF)
}

/// Read the 3-bit CCSDS version.
pub fn header_version(msg: &[u8]) -> Result<u8, Status> {
    Ok(((word(msg, 0)? & CCSDSVER_MASK) >> CCSDSVER_SHIFT) as u8)
}

/// Set the 3-bit CCSDS version. Values above 7 are rejected.
pub fn set_header_version(msg: &mut [u8], version: u8) -> Result<(), Status> {
    let raw = (version as u16) << CCSDSVER_SHIFT;
    if raw & !CCSDSVER_MASK != 0 || version > 0x07 {
        return Err(Status::BadArgument);
    }
    set_word_bits(msg, 0, raw, CCSDSVER_MASK)
}

/// Read the command/telemetry type bit.
pub fn msg_type(msg: &[u8]) -> Result<MsgType, Status> {
    if word(msg, 0)? & TYPE_MASK != 0 {
        Ok(MsgType::Cmd)
    } else {
        Ok(MsgType::Tlm)
    }
}

/// Set the command/telemetry type bit.
pub fn set_msg_type(msg: &mut [u8], ty: MsgType) -> Result<(), Status> {
    let raw = match ty {
        MsgType::Cmd => TYPE_MASK,
        MsgType::Tlm => 0,
    };
    set_word_bits(msg, 0, raw, TYPE_MASK)
}

/// Read the secondary-header-present flag.
pub fn has_secondary_header(msg: &[u8]) -> Result<bool, Status> {
    Ok(word(msg, 0)? & SHDR_MASK != 0)
}

/// Set the secondary-header-present flag.
pub fn set_has_secondary_header(msg: &mut [u8], present: bool) -> Result<(), Status> {
    set_word_bits(msg, 0, if present { SHDR_MASK } else { 0 }, SHDR_MASK)
}

/// Read the 11-bit application process id.
pub fn apid(msg: &[u8]) -> Result<u16, Status> {
    Ok(word(msg, 0)? & APID_MASK)
}

/// Set the 11-bit application process id. Values above 0x7FF are rejected.
pub fn set_apid(msg: &mut [u8], apid: u16) -> Result<(), Status> {
    if apid & !APID_MASK != 0 {
        return Err(Status::BadArgument);
    }
    set_word_bits(msg, 0, apid, APID_MASK)
}

// ─── Sequence Fields ─────────────────────────────────────────────────────────

/// Read the segmentation flag.
pub fn segmentation_flag(msg: &[u8]) -> Result<SegmentationFlag, Status> {
    Ok(SegmentationFlag::from_raw(word(msg, 2)?))
}

/// Set the segmentation flag.
pub fn set_segmentation_flag(msg: &mut [u8], flag: SegmentationFlag) -> Result<(), Status> {
    set_word_bits(msg, 2, flag.to_raw(), SEGFLG_MASK)
}

/// Read the 14-bit sequence count.
pub fn sequence_count(msg: &[u8]) -> Result<u16, Status> {
    Ok(word(msg, 2)? & SEQCNT_MASK)
}

/// Set the 14-bit sequence count. Values above 0x3FFF are rejected.
pub fn set_sequence_count(msg: &mut [u8], count: u16) -> Result<(), Status> {
    if count & !SEQCNT_MASK != 0 {
        return Err(Status::BadArgument);
    }
    set_word_bits(msg, 2, count, SEQCNT_MASK)
}

// ─── Length Field ────────────────────────────────────────────────────────────

/// Read the total message size in bytes (wire field plus [`SIZE_OFFSET`]).
pub fn size(msg: &[u8]) -> Result<usize, Status> {
    Ok(word(msg, 4)? as usize + SIZE_OFFSET)
}

/// Set the total message size. Requires `MIN_MSG_LEN <= size <= MAX_MSG_LEN`.
pub fn set_size(msg: &mut [u8], size: usize) -> Result<(), Status> {
    if !(MIN_MSG_LEN..=MAX_MSG_LEN).contains(&size) {
        return Err(Status::BadArgument);
    }
    set_word_bits(msg, 4, (size - SIZE_OFFSET) as u16, 0xFFFF)
}

// ─── Initialization ──────────────────────────────────────────────────────────

/// Apply the default primary header: secondary header present, mission
/// version, default APID bits, unsegmented.
pub fn set_default_primary(msg: &mut [u8]) -> Result<(), Status> {
    set_has_secondary_header(msg, true)?;
    set_header_version(msg, DEFAULT_CCSDS_VERSION)?;
    set_apid(msg, DEFAULT_APID)?;
    set_segmentation_flag(msg, SegmentationFlag::Unsegmented)
}

/// Initialize a message buffer: zero it, apply the default primary header,
/// then stamp the message id and total size.
pub fn init(msg: &mut [u8], id: MsgId, size: usize) -> Result<(), Status> {
    if msg.len() < PRI_HDR_LEN || size != msg.len() {
        return Err(Status::BadArgument);
    }
    msg.fill(0);
    set_default_primary(msg)?;
    set_msg_id(msg, id)?;
    set_size(msg, size)
}

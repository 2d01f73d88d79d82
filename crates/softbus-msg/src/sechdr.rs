//! Command and telemetry secondary headers.
//!
//! By bus convention every packet carries a secondary header after the
//! 6-byte primary header: commands carry a function code and checksum
//! (2 bytes), telemetry carries a coarse timestamp (6 bytes).

use crate::ccsds::{self, MsgType, PRI_HDR_LEN};
use crate::status::Status;

/// Total length of primary plus command secondary header.
pub const CMD_HDR_LEN: usize = PRI_HDR_LEN + 2;

/// Total length of primary plus telemetry secondary header.
pub const TLM_HDR_LEN: usize = PRI_HDR_LEN + 6;

const FCN_CODE_OFFSET: usize = 6;
const CHECKSUM_OFFSET: usize = 7;
const TIME_SECS_OFFSET: usize = 6;
const TIME_SUBS_OFFSET: usize = 10;

fn require_cmd(msg: &[u8], len: usize) -> Result<(), Status> {
    if msg.len() < len
        || !ccsds::has_secondary_header(msg)?
        || ccsds::msg_type(msg)? != MsgType::Cmd
    {
        return Err(Status::BadArgument);
    }
    Ok(())
}

fn require_tlm(msg: &[u8], len: usize) -> Result<(), Status> {
    if msg.len() < len
        || !ccsds::has_secondary_header(msg)?
        || ccsds::msg_type(msg)? != MsgType::Tlm
    {
        return Err(Status::BadArgument);
    }
    Ok(())
}

// ─── Command Secondary Header ────────────────────────────────────────────────

/// Read the command function code.
pub fn fcn_code(msg: &[u8]) -> Result<u8, Status> {
    require_cmd(msg, FCN_CODE_OFFSET + 1)?;
    Ok(msg[FCN_CODE_OFFSET])
}

/// Set the command function code.
pub fn set_fcn_code(msg: &mut [u8], code: u8) -> Result<(), Status> {
    require_cmd(msg, FCN_CODE_OFFSET + 1)?;
    msg[FCN_CODE_OFFSET] = code;
    Ok(())
}

/// Read the stored command checksum byte.
pub fn checksum(msg: &[u8]) -> Result<u8, Status> {
    require_cmd(msg, CHECKSUM_OFFSET + 1)?;
    Ok(msg[CHECKSUM_OFFSET])
}

/// Recompute and store the checksum so the whole message XORs to 0xFF.
pub fn generate_checksum(msg: &mut [u8]) -> Result<(), Status> {
    require_cmd(msg, CHECKSUM_OFFSET + 1)?;
    msg[CHECKSUM_OFFSET] = 0;
    let xor = msg.iter().fold(0xFFu8, |acc, &b| acc ^ b);
    msg[CHECKSUM_OFFSET] = xor;
    Ok(())
}

/// Whether the stored checksum matches the message contents.
pub fn validate_checksum(msg: &[u8]) -> Result<bool, Status> {
    require_cmd(msg, CHECKSUM_OFFSET + 1)?;
    Ok(msg.iter().fold(0xFFu8, |acc, &b| acc ^ b) == 0)
}

// ─── Telemetry Secondary Header ──────────────────────────────────────────────

/// Read the telemetry timestamp as (seconds, subseconds).
pub fn time(msg: &[u8]) -> Result<(u32, u16), Status> {
    require_tlm(msg, TLM_HDR_LEN)?;
    let secs = u32::from_be_bytes([
        msg[TIME_SECS_OFFSET],
        msg[TIME_SECS_OFFSET + 1],
        msg[TIME_SECS_OFFSET + 2],
        msg[TIME_SECS_OFFSET + 3],
    ]);
    let subs = u16::from_be_bytes([msg[TIME_SUBS_OFFSET], msg[TIME_SUBS_OFFSET + 1]]);
    Ok((secs, subs))
}

/// Set the telemetry timestamp.
pub fn set_time(msg: &mut [u8], secs: u32, subsecs: u16) -> Result<(), Status> {
    require_tlm(msg, TLM_HDR_LEN)?;
    msg[TIME_SECS_OFFSET..TIME_SECS_OFFSET + 4].copy_from_slice(&secs.to_be_bytes());
    msg[TIME_SUBS_OFFSET..TIME_SUBS_OFFSET + 2].copy_from_slice(&subsecs.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccsds;
    use crate::msgid::MsgId;

    fn cmd_msg(len: usize) -> Vec<u8> {
        let mut msg = vec![0u8; len];
        ccsds::init(&mut msg, MsgId::new(0x1803), len).unwrap();
        msg
    }

    fn tlm_msg(len: usize) -> Vec<u8> {
        let mut msg = vec![0u8; len];
        ccsds::init(&mut msg, MsgId::new(0x0803), len).unwrap();
        msg
    }

    #[test]
    fn fcn_code_roundtrip() {
        let mut msg = cmd_msg(CMD_HDR_LEN);
        set_fcn_code(&mut msg, 7).unwrap();
        assert_eq!(fcn_code(&msg).unwrap(), 7);
    }

    #[test]
    fn fcn_code_rejects_telemetry() {
        let msg = tlm_msg(TLM_HDR_LEN);
        assert_eq!(fcn_code(&msg), Err(Status::BadArgument));
    }

    #[test]
    fn checksum_roundtrip() {
        let mut msg = cmd_msg(CMD_HDR_LEN + 4);
        set_fcn_code(&mut msg, 3).unwrap();
        msg[CMD_HDR_LEN..].copy_from_slice(&[1, 2, 3, 4]);
        generate_checksum(&mut msg).unwrap();
        assert!(validate_checksum(&msg).unwrap());
        msg[CMD_HDR_LEN] ^= 0x01;
        assert!(!validate_checksum(&msg).unwrap());
    }

    #[test]
    fn time_roundtrip() {
        let mut msg = tlm_msg(TLM_HDR_LEN + 8);
        set_time(&mut msg, 1_234_567, 890).unwrap();
        assert_eq!(time(&msg).unwrap(), (1_234_567, 890));
    }

    #[test]
    fn time_rejects_command() {
        let mut msg = cmd_msg(TLM_HDR_LEN);
        assert_eq!(set_time(&mut msg, 1, 2), Err(Status::BadArgument));
    }

    #[test]
    fn short_buffer_rejected() {
        let msg = tlm_msg(TLM_HDR_LEN - 4);
        assert_eq!(time(&msg), Err(Status::BadArgument));
    }
}

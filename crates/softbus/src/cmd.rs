//! # Command Packets
//!
//! Function codes and fixed-size payload codecs for the bus's own command
//! set. Encoders build complete packets (headers, payload, checksum) so
//! ground tooling and tests share one definition with the dispatcher.

use bytes::{Buf, BufMut, BytesMut};
use softbus_msg::{
    ccsds,
    sechdr::{self, CMD_HDR_LEN},
    MsgId, Status,
};

use crate::pipe::PipeId;

// ─── Function Codes ──────────────────────────────────────────────────────────

pub const NOOP_CC: u8 = 0;
pub const RESET_COUNTERS_CC: u8 = 1;
pub const SEND_SB_STATS_CC: u8 = 2;
pub const WRITE_ROUTING_INFO_CC: u8 = 3;
pub const ENABLE_ROUTE_CC: u8 = 4;
pub const DISABLE_ROUTE_CC: u8 = 5;
pub const WRITE_PIPE_INFO_CC: u8 = 7;
pub const WRITE_MAP_INFO_CC: u8 = 8;

pub const SEND_PREV_SUBS_CC: u8 = 12;
pub const ENABLE_SUB_REPORTING_CC: u8 = 13;
pub const DISABLE_SUB_REPORTING_CC: u8 = 14;

// ─── Lengths ─────────────────────────────────────────────────────────────────

/// A command with no payload.
pub const BARE_CMD_LEN: usize = CMD_HDR_LEN;
/// A route enable/disable command.
pub const ROUTE_CMD_LEN: usize = CMD_HDR_LEN + 8;
/// Fixed width of the filename field in write-info commands.
pub const FILENAME_FIELD_LEN: usize = 64;
/// A write-info command.
pub const WRITE_FILE_CMD_LEN: usize = CMD_HDR_LEN + FILENAME_FIELD_LEN;

fn build_cmd(msg_id: MsgId, fcn_code: u8, payload: &[u8]) -> Result<Vec<u8>, Status> {
    let total = CMD_HDR_LEN + payload.len();
    let mut pkt = vec![0u8; total];
    ccsds::init(&mut pkt, msg_id, total)?;
    sechdr::set_fcn_code(&mut pkt, fcn_code)?;
    pkt[CMD_HDR_LEN..].copy_from_slice(payload);
    sechdr::generate_checksum(&mut pkt)?;
    Ok(pkt)
}

fn payload(msg: &[u8], expected: usize) -> Result<&[u8], Status> {
    if msg.len() < CMD_HDR_LEN + expected {
        return Err(Status::BadArgument);
    }
    Ok(&msg[CMD_HDR_LEN..])
}

/// Encode a payload-free command packet.
pub fn encode_bare_cmd(msg_id: MsgId, fcn_code: u8) -> Result<Vec<u8>, Status> {
    build_cmd(msg_id, fcn_code, &[])
}

// ─── Route Command ───────────────────────────────────────────────────────────

/// Payload of the enable/disable route commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteCmd {
    pub msg_id: MsgId,
    pub pipe: PipeId,
}

impl RouteCmd {
    pub fn encode(&self, cmd_mid: MsgId, fcn_code: u8) -> Result<Vec<u8>, Status> {
        let mut body = BytesMut::with_capacity(8);
        body.put_u32(self.msg_id.value() as u32);
        body.put_u32(self.pipe.value());
        build_cmd(cmd_mid, fcn_code, &body)
    }

    pub fn decode(msg: &[u8]) -> Result<RouteCmd, Status> {
        let mut p = payload(msg, 8)?;
        let msg_id = MsgId::new(p.get_u32() as u16);
        let pipe = PipeId::from_value(p.get_u32());
        Ok(RouteCmd { msg_id, pipe })
    }
}

// ─── Write-Info Command ──────────────────────────────────────────────────────

/// Payload of the write-routing/pipe/map-info commands. An empty filename
/// selects the configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileCmd {
    pub filename: String,
}

impl WriteFileCmd {
    pub fn encode(&self, cmd_mid: MsgId, fcn_code: u8) -> Result<Vec<u8>, Status> {
        let bytes = self.filename.as_bytes();
        if bytes.len() > FILENAME_FIELD_LEN {
            return Err(Status::BadArgument);
        }
        let mut body = [0u8; FILENAME_FIELD_LEN];
        body[..bytes.len()].copy_from_slice(bytes);
        build_cmd(cmd_mid, fcn_code, &body)
    }

    pub fn decode(msg: &[u8]) -> Result<WriteFileCmd, Status> {
        let p = payload(msg, FILENAME_FIELD_LEN)?;
        let end = p[..FILENAME_FIELD_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_FIELD_LEN);
        let filename = String::from_utf8_lossy(&p[..end]).into_owned();
        Ok(WriteFileCmd { filename })
    }
}

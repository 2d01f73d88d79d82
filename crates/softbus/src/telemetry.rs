//! # Telemetry Payloads
//!
//! Housekeeping, statistics, and subscription-report packets produced by the
//! bus. Each payload has a packed big-endian wire encoding (transmitted on
//! the bus itself after a telemetry header) and derives `Serialize` for
//! ground-side export.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use softbus_msg::{ccsds, sechdr::TLM_HDR_LEN, MsgId, Status};

use crate::route::Qos;

// ─── Housekeeping ────────────────────────────────────────────────────────────

/// The bus housekeeping counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HkCounters {
    pub command_counter: u32,
    pub command_error_counter: u32,
    pub no_subscribers_counter: u32,
    pub duplicate_subscriptions_counter: u32,
    pub msg_send_error_counter: u32,
    pub msg_receive_error_counter: u32,
    pub internal_error_counter: u32,
    pub create_pipe_error_counter: u32,
    pub subscribe_error_counter: u32,
    pub pipe_overflow_error_counter: u32,
    pub msg_limit_error_counter: u32,
}

impl HkCounters {
    /// Zero every counter (the ground reset command).
    pub fn reset(&mut self) {
        *self = HkCounters::default();
    }
}

/// Housekeeping telemetry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HkTlm {
    pub counters: HkCounters,
    /// Reserved pool handle word, kept for ground record compatibility.
    pub mem_pool_handle: u32,
    pub mem_in_use: u32,
    pub unmarked_mem: u32,
}

impl HkTlm {
    pub const PAYLOAD_LEN: usize = 14 * 4;

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        let c = &self.counters;
        for v in [
            c.command_counter,
            c.command_error_counter,
            c.no_subscribers_counter,
            c.duplicate_subscriptions_counter,
            c.msg_send_error_counter,
            c.msg_receive_error_counter,
            c.internal_error_counter,
            c.create_pipe_error_counter,
            c.subscribe_error_counter,
            c.pipe_overflow_error_counter,
            c.msg_limit_error_counter,
            self.mem_pool_handle,
            self.mem_in_use,
            self.unmarked_mem,
        ] {
            buf.put_u32(v);
        }
    }

    /// Decode from a full telemetry packet.
    pub fn decode(msg: &[u8]) -> Result<HkTlm, Status> {
        let mut p = payload(msg, Self::PAYLOAD_LEN)?;
        Ok(HkTlm {
            counters: HkCounters {
                command_counter: p.get_u32(),
                command_error_counter: p.get_u32(),
                no_subscribers_counter: p.get_u32(),
                duplicate_subscriptions_counter: p.get_u32(),
                msg_send_error_counter: p.get_u32(),
                msg_receive_error_counter: p.get_u32(),
                internal_error_counter: p.get_u32(),
                create_pipe_error_counter: p.get_u32(),
                subscribe_error_counter: p.get_u32(),
                pipe_overflow_error_counter: p.get_u32(),
                msg_limit_error_counter: p.get_u32(),
            },
            mem_pool_handle: p.get_u32(),
            mem_in_use: p.get_u32(),
            unmarked_mem: p.get_u32(),
        })
    }
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Depth statistics for one in-use pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeDepthStats {
    pub pipe_id: u32,
    pub in_use: u16,
    pub peak_in_use: u16,
    pub depth: u16,
}

impl PipeDepthStats {
    pub const ENCODED_LEN: usize = 10;
}

/// Statistics telemetry payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsTlm {
    pub msg_ids_in_use: u32,
    pub peak_msg_ids_in_use: u32,
    pub max_msg_ids_allowed: u32,
    pub pipes_in_use: u32,
    pub peak_pipes_in_use: u32,
    pub max_pipes_allowed: u32,
    pub mem_in_use: u32,
    pub peak_mem_in_use: u32,
    pub max_mem_allowed: u32,
    pub subscriptions_in_use: u32,
    pub peak_subscriptions_in_use: u32,
    pub max_subscriptions_allowed: u32,
    pub sb_buffers_in_use: u32,
    pub peak_sb_buffers_in_use: u32,
    pub max_pipe_depth_allowed: u32,
    pub pipe_depth_stats: Vec<PipeDepthStats>,
}

impl StatsTlm {
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        for v in [
            self.msg_ids_in_use,
            self.peak_msg_ids_in_use,
            self.max_msg_ids_allowed,
            self.pipes_in_use,
            self.peak_pipes_in_use,
            self.max_pipes_allowed,
            self.mem_in_use,
            self.peak_mem_in_use,
            self.max_mem_allowed,
            self.subscriptions_in_use,
            self.peak_subscriptions_in_use,
            self.max_subscriptions_allowed,
            self.sb_buffers_in_use,
            self.peak_sb_buffers_in_use,
            self.max_pipe_depth_allowed,
        ] {
            buf.put_u32(v);
        }
        buf.put_u16(self.pipe_depth_stats.len() as u16);
        for s in &self.pipe_depth_stats {
            buf.put_u32(s.pipe_id);
            buf.put_u16(s.in_use);
            buf.put_u16(s.peak_in_use);
            buf.put_u16(s.depth);
        }
    }

    pub fn decode(msg: &[u8]) -> Result<StatsTlm, Status> {
        let mut p = payload(msg, 15 * 4 + 2)?;
        let mut tlm = StatsTlm {
            msg_ids_in_use: p.get_u32(),
            peak_msg_ids_in_use: p.get_u32(),
            max_msg_ids_allowed: p.get_u32(),
            pipes_in_use: p.get_u32(),
            peak_pipes_in_use: p.get_u32(),
            max_pipes_allowed: p.get_u32(),
            mem_in_use: p.get_u32(),
            peak_mem_in_use: p.get_u32(),
            max_mem_allowed: p.get_u32(),
            subscriptions_in_use: p.get_u32(),
            peak_subscriptions_in_use: p.get_u32(),
            max_subscriptions_allowed: p.get_u32(),
            sb_buffers_in_use: p.get_u32(),
            peak_sb_buffers_in_use: p.get_u32(),
            max_pipe_depth_allowed: p.get_u32(),
            pipe_depth_stats: Vec::new(),
        };
        let count = p.get_u16() as usize;
        if p.remaining() < count * PipeDepthStats::ENCODED_LEN {
            return Err(Status::BadArgument);
        }
        for _ in 0..count {
            tlm.pipe_depth_stats.push(PipeDepthStats {
                pipe_id: p.get_u32(),
                in_use: p.get_u16(),
                peak_in_use: p.get_u16(),
                depth: p.get_u16(),
            });
        }
        Ok(tlm)
    }
}

// ─── Subscription Reports ────────────────────────────────────────────────────

/// Sub-type carried by a single-subscription report.
pub const SUB_TYPE_SUBSCRIPTION: u8 = 1;

/// One-subscription notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SingleSubTlm {
    pub sub_type: u8,
    pub msg_id: MsgId,
    pub qos: Qos,
    pub pipe: u32,
}

impl SingleSubTlm {
    pub const PAYLOAD_LEN: usize = 1 + 2 + 4 + 4;

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sub_type);
        buf.put_u8(self.qos.priority);
        buf.put_u8(self.qos.reliability);
        buf.put_u32(self.msg_id.value() as u32);
        buf.put_u32(self.pipe);
    }

    pub fn decode(msg: &[u8]) -> Result<SingleSubTlm, Status> {
        let mut p = payload(msg, Self::PAYLOAD_LEN)?;
        let sub_type = p.get_u8();
        let qos = Qos {
            priority: p.get_u8(),
            reliability: p.get_u8(),
        };
        let msg_id = MsgId::new(p.get_u32() as u16);
        let pipe = p.get_u32();
        Ok(SingleSubTlm {
            sub_type,
            msg_id,
            qos,
            pipe,
        })
    }
}

/// One entry of the prior-subscriptions replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrevSubEntry {
    pub msg_id: MsgId,
    pub qos: Qos,
}

/// One segment of the prior-subscriptions replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrevSubsTlm {
    pub pkt_segment: u16,
    pub entries: Vec<PrevSubEntry>,
}

impl PrevSubsTlm {
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u16(self.pkt_segment);
        buf.put_u16(self.entries.len() as u16);
        for e in &self.entries {
            buf.put_u32(e.msg_id.value() as u32);
            buf.put_u8(e.qos.priority);
            buf.put_u8(e.qos.reliability);
        }
    }

    pub fn decode(msg: &[u8]) -> Result<PrevSubsTlm, Status> {
        let mut p = payload(msg, 4)?;
        let pkt_segment = p.get_u16();
        let count = p.get_u16() as usize;
        if p.remaining() < count * 6 {
            return Err(Status::BadArgument);
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(PrevSubEntry {
                msg_id: MsgId::new(p.get_u32() as u16),
                qos: Qos {
                    priority: p.get_u8(),
                    reliability: p.get_u8(),
                },
            });
        }
        Ok(PrevSubsTlm {
            pkt_segment,
            entries,
        })
    }
}

// ─── Packet Assembly ─────────────────────────────────────────────────────────

/// Build a full telemetry packet: initialized headers plus the payload.
/// The caller stamps the timestamp before transmitting.
pub fn build_tlm_packet(msg_id: MsgId, payload: &[u8]) -> Result<Vec<u8>, Status> {
    let total = TLM_HDR_LEN + payload.len();
    let mut pkt = vec![0u8; total];
    ccsds::init(&mut pkt, msg_id, total)?;
    pkt[TLM_HDR_LEN..].copy_from_slice(payload);
    Ok(pkt)
}

fn payload(msg: &[u8], min_len: usize) -> Result<&[u8], Status> {
    if msg.len() < TLM_HDR_LEN + min_len {
        return Err(Status::BadArgument);
    }
    Ok(&msg[TLM_HDR_LEN..])
}

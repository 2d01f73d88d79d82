//! # Reporting
//!
//! Housekeeping and statistics telemetry, subscription reports, the
//! segmented prior-subscriptions replay, and the routing / pipe / map file
//! dumps. Every snapshot is taken under the bus lock and every transmit or
//! file write happens after the lock is released.

use bytes::{BufMut, BytesMut};
use softbus_msg::{sechdr, MsgId, Status};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bus::SoftBus;
use crate::events::{EventId, Severity};
use crate::pipe::PipeId;
use crate::route::{Qos, Scope};
use crate::telemetry::{
    build_tlm_packet, HkTlm, PipeDepthStats, PrevSubEntry, PrevSubsTlm, SingleSubTlm, StatsTlm,
    SUB_TYPE_SUBSCRIPTION,
};

// ─── Dump File Format ────────────────────────────────────────────────────────

/// Dump file magic: "SBFS".
pub const FILE_MAGIC: u32 = 0x5342_4653;
/// Dump file header length: magic, subtype, timestamp, 32-byte description.
pub const FILE_HEADER_LEN: usize = 4 + 4 + 4 + 32;

/// Routing dump subtype.
pub const FILE_SUBTYPE_ROUTES: u32 = 4;
/// Pipe dump subtype.
pub const FILE_SUBTYPE_PIPES: u32 = 5;
/// Message map dump subtype.
pub const FILE_SUBTYPE_MSG_MAP: u32 = 6;

/// Fixed width of name fields in dump entries.
pub const NAME_FIELD_LEN: usize = 20;

/// Encoded length of one routing dump entry.
pub const ROUTING_ENTRY_LEN: usize = 4 + 4 + 1 + 4 + 2 * NAME_FIELD_LEN;
/// Encoded length of one pipe dump entry.
pub const PIPE_ENTRY_LEN: usize = 4 + 4 + 2 + 2 + 2 + 2 + 1 + 2 * NAME_FIELD_LEN;
/// Encoded length of one message map dump entry.
pub const MAP_ENTRY_LEN: usize = 4 + 4;

// ─── Time ────────────────────────────────────────────────────────────────────

/// Coarse wall-clock timestamp: (seconds, 1/65536ths).
pub(crate) fn timestamp_now() -> (u32, u16) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => (
            d.as_secs() as u32,
            ((d.subsec_nanos() as u64 * 65_536) / 1_000_000_000) as u16,
        ),
        Err(_) => (0, 0),
    }
}

fn stamp_and_transmit(bus: &SoftBus, pkt: &mut [u8]) -> Result<(), Status> {
    let (secs, subs) = timestamp_now();
    sechdr::set_time(pkt, secs, subs)?;
    bus.transmit_msg(pkt, true)
}

// ─── Housekeeping & Statistics ───────────────────────────────────────────────

/// Snapshot the counters and memory gauges and transmit the housekeeping
/// packet.
pub fn send_hk_tlm(bus: &SoftBus) -> Result<(), Status> {
    let counters = bus.hk_counters();
    let pool = bus.pool();
    let tlm = HkTlm {
        counters,
        mem_pool_handle: 0,
        mem_in_use: pool.mem_in_use() as u32,
        unmarked_mem: bus.config().buf_memory_bytes.saturating_sub(pool.peak_mem_in_use()) as u32,
    };
    let mut payload = BytesMut::with_capacity(HkTlm::PAYLOAD_LEN);
    tlm.encode_payload(&mut payload);
    let mut pkt = build_tlm_packet(bus.config().msg_ids.hk_tlm, &payload)?;
    stamp_and_transmit(bus, &mut pkt)
}

/// Walk the pipe table and transmit the statistics packet.
pub fn send_stats(bus: &SoftBus) -> Result<(), Status> {
    let cfg = bus.config();
    let pool = bus.pool();
    let mut tlm = StatsTlm {
        max_msg_ids_allowed: cfg.max_msg_ids as u32,
        max_pipes_allowed: cfg.max_pipes as u32,
        max_mem_allowed: cfg.buf_memory_bytes as u32,
        max_subscriptions_allowed: cfg.max_subscriptions() as u32,
        max_pipe_depth_allowed: cfg.max_queue_depth as u32,
        mem_in_use: pool.mem_in_use() as u32,
        peak_mem_in_use: pool.peak_mem_in_use() as u32,
        sb_buffers_in_use: pool.bufs_in_use() as u32,
        peak_sb_buffers_in_use: pool.peak_bufs_in_use() as u32,
        ..Default::default()
    };
    {
        let guard = bus.shared_lock();
        tlm.msg_ids_in_use = guard.routes.msg_ids_in_use() as u32;
        tlm.peak_msg_ids_in_use = guard.routes.peak_msg_ids_in_use() as u32;
        tlm.subscriptions_in_use = guard.routes.subscriptions_in_use() as u32;
        tlm.peak_subscriptions_in_use = guard.routes.peak_subscriptions_in_use() as u32;
        tlm.pipes_in_use = guard.pipes.in_use() as u32;
        tlm.peak_pipes_in_use = guard.pipes.peak_in_use() as u32;
        for desc in guard.pipes.iter_used().take(cfg.max_pipes) {
            tlm.pipe_depth_stats.push(PipeDepthStats {
                pipe_id: desc.pipe_id.value(),
                in_use: desc.current_depth,
                peak_in_use: desc.peak_depth,
                depth: desc.queue_depth,
            });
        }
    }
    // Zero-fill the remainder of the fixed-size record array.
    tlm.pipe_depth_stats
        .resize(cfg.max_pipes, PipeDepthStats::default());

    let mut payload = BytesMut::new();
    tlm.encode_payload(&mut payload);
    let mut pkt = build_tlm_packet(cfg.msg_ids.stats_tlm, &payload)?;
    let status = stamp_and_transmit(bus, &mut pkt);

    bus.events().emit(
        EventId::SendStats,
        Severity::Debug,
        "Software Bus Statistics packet sent".to_owned(),
    );
    bus.note_command_ok();
    status
}

// ─── Subscription Reports ────────────────────────────────────────────────────

/// Transmit a one-subscription notification. Callers check the reporting
/// flag first.
pub(crate) fn send_subscription_report(bus: &SoftBus, msg_id: MsgId, pipe: PipeId, qos: Qos) {
    let tlm = SingleSubTlm {
        sub_type: SUB_TYPE_SUBSCRIPTION,
        msg_id,
        qos,
        pipe: pipe.value(),
    };
    let mut payload = BytesMut::with_capacity(SingleSubTlm::PAYLOAD_LEN);
    tlm.encode_payload(&mut payload);
    let status = build_tlm_packet(bus.config().msg_ids.onesub_tlm, &payload)
        .and_then(|mut pkt| stamp_and_transmit(bus, &mut pkt));
    bus.events().emit(
        EventId::SubscriptionRptSent,
        Severity::Debug,
        format!("Sending Subscription Report Msg {msg_id},Pipe {pipe},Stat {status:?}"),
    );
}

/// Replay current subscriptions as segmented telemetry: one entry per route
/// that has at least one global destination. An off-node bridge cares only
/// about message id presence, so the first global destination stands for
/// the route.
pub fn send_prev_subs(bus: &SoftBus) -> Result<(), Status> {
    let per_pkt = bus.config().sub_entries_per_pkt;
    let route_ids = bus.shared_lock().routes.route_ids();

    let mut segment: u16 = 1;
    let mut entries: Vec<PrevSubEntry> = Vec::new();
    for rid in route_ids {
        let entry = {
            let guard = bus.shared_lock();
            guard.routes.route(rid).and_then(|route| {
                guard
                    .routes
                    .dests(rid)
                    .find(|d| matches!(d.scope, Scope::Global))
                    .map(|_| PrevSubEntry {
                        msg_id: route.msg_id,
                        qos: Qos::default(),
                    })
            })
        };
        if let Some(entry) = entry {
            entries.push(entry);
            if entries.len() >= per_pkt {
                transmit_sub_segment(bus, segment, &entries, EventId::FullSubPkt, "Full");
                entries.clear();
                segment += 1;
            }
        }
    }
    if !entries.is_empty() {
        transmit_sub_segment(bus, segment, &entries, EventId::PartSubPkt, "Partial");
    }
    Ok(())
}

fn transmit_sub_segment(
    bus: &SoftBus,
    segment: u16,
    entries: &[PrevSubEntry],
    event: EventId,
    kind: &str,
) {
    let tlm = PrevSubsTlm {
        pkt_segment: segment,
        entries: entries.to_vec(),
    };
    let mut payload = BytesMut::new();
    tlm.encode_payload(&mut payload);
    let status = build_tlm_packet(bus.config().msg_ids.allsubs_tlm, &payload)
        .and_then(|mut pkt| stamp_and_transmit(bus, &mut pkt));
    bus.events().emit(
        event,
        Severity::Debug,
        format!(
            "{kind} Sub Pkt {segment} Sent,Entries {},Stat {status:?}",
            entries.len()
        ),
    );
}

// ─── File Dumps ──────────────────────────────────────────────────────────────

fn put_name(buf: &mut BytesMut, name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_FIELD_LEN);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, NAME_FIELD_LEN - n);
}

fn create_dump(bus: &SoftBus, path: &Path, subtype: u32, description: &str) -> Result<File, Status> {
    let mut file = match File::create(path) {
        Ok(f) => f,
        Err(e) => {
            bus.events().emit(
                EventId::DumpFileCreateErr,
                Severity::Error,
                format!("Error creating file {},err {e}", path.display()),
            );
            return Err(Status::FileIoErr);
        }
    };
    let mut hdr = BytesMut::with_capacity(FILE_HEADER_LEN);
    hdr.put_u32(FILE_MAGIC);
    hdr.put_u32(subtype);
    hdr.put_u32(timestamp_now().0);
    let desc = description.as_bytes();
    let n = desc.len().min(32);
    hdr.put_slice(&desc[..n]);
    hdr.put_bytes(0, 32 - n);
    write_entry(bus, &mut file, path, &hdr)?;
    Ok(file)
}

fn write_entry(bus: &SoftBus, file: &mut File, path: &Path, entry: &[u8]) -> Result<(), Status> {
    if let Err(e) = file.write_all(entry) {
        bus.events().emit(
            EventId::FileWriteErr,
            Severity::Error,
            format!(
                "File write,byte cnt err,file {},request {},err {e}",
                path.display(),
                entry.len()
            ),
        );
        return Err(Status::FileIoErr);
    }
    Ok(())
}

fn note_dump_written(bus: &SoftBus, path: &Path, bytes: usize, entries: usize) {
    bus.events().emit(
        EventId::DumpWritten,
        Severity::Debug,
        format!("{} written:Size {bytes},Entries {entries}", path.display()),
    );
}

/// Write one routing dump entry per destination of every route.
pub fn write_routing_info(bus: &SoftBus, path: &Path) -> Result<(), Status> {
    struct Row {
        msg_id: MsgId,
        pipe_id: PipeId,
        active: bool,
        sent_count: u32,
        app_name: String,
        pipe_name: String,
    }

    let mut file = create_dump(bus, path, FILE_SUBTYPE_ROUTES, "SB Routing Information")?;
    let mut bytes = FILE_HEADER_LEN;
    let mut entries = 0usize;

    let route_ids = bus.shared_lock().routes.route_ids();
    for rid in route_ids {
        // Snapshot this route's rows under the lock; write after release.
        // Names come from the destination's own pipe descriptor.
        let rows: Vec<Row> = {
            let guard = bus.shared_lock();
            match guard.routes.route(rid) {
                None => Vec::new(),
                Some(route) => guard
                    .routes
                    .dests(rid)
                    .take(bus.config().max_dest_per_msg_id)
                    .filter_map(|d| {
                        guard.pipes.get(d.pipe_id).map(|pd| Row {
                            msg_id: route.msg_id,
                            pipe_id: d.pipe_id,
                            active: d.active,
                            sent_count: d.sent_count,
                            app_name: guard
                                .apps
                                .get(&pd.app_id.value())
                                .cloned()
                                .unwrap_or_default(),
                            pipe_name: pd.name.clone(),
                        })
                    })
                    .collect(),
            }
        };
        for row in rows {
            let mut buf = BytesMut::with_capacity(ROUTING_ENTRY_LEN);
            buf.put_u32(row.msg_id.value() as u32);
            buf.put_u32(row.pipe_id.value());
            buf.put_u8(row.active as u8);
            buf.put_u32(row.sent_count);
            put_name(&mut buf, &row.app_name);
            put_name(&mut buf, &row.pipe_name);
            write_entry(bus, &mut file, path, &buf)?;
            bytes += buf.len();
            entries += 1;
        }
    }
    note_dump_written(bus, path, bytes, entries);
    Ok(())
}

/// Write one pipe dump entry per in-use pipe.
pub fn write_pipe_info(bus: &SoftBus, path: &Path) -> Result<(), Status> {
    struct Row {
        pipe_id: u32,
        app_id: u32,
        max_queue_depth: u16,
        current_depth: u16,
        peak_depth: u16,
        send_errors: u16,
        opts: u8,
        app_name: String,
        pipe_name: String,
    }

    let mut file = create_dump(bus, path, FILE_SUBTYPE_PIPES, "SB Pipe Information")?;
    let rows: Vec<Row> = {
        let guard = bus.shared_lock();
        guard
            .pipes
            .iter_used()
            .map(|pd| Row {
                pipe_id: pd.pipe_id.value(),
                app_id: pd.app_id.value(),
                max_queue_depth: pd.queue_depth,
                current_depth: pd.current_depth,
                peak_depth: pd.peak_depth,
                send_errors: pd.send_errors,
                opts: pd.opts,
                app_name: guard
                    .apps
                    .get(&pd.app_id.value())
                    .cloned()
                    .unwrap_or_default(),
                pipe_name: pd.name.clone(),
            })
            .collect()
    };

    let mut bytes = FILE_HEADER_LEN;
    let mut entries = 0usize;
    for row in rows {
        let mut buf = BytesMut::with_capacity(PIPE_ENTRY_LEN);
        buf.put_u32(row.pipe_id);
        buf.put_u32(row.app_id);
        buf.put_u16(row.max_queue_depth);
        buf.put_u16(row.current_depth);
        buf.put_u16(row.peak_depth);
        buf.put_u16(row.send_errors);
        buf.put_u8(row.opts);
        put_name(&mut buf, &row.app_name);
        put_name(&mut buf, &row.pipe_name);
        write_entry(bus, &mut file, path, &buf)?;
        bytes += buf.len();
        entries += 1;
    }
    note_dump_written(bus, path, bytes, entries);
    Ok(())
}

/// Write the message id → route id map.
pub fn write_map_info(bus: &SoftBus, path: &Path) -> Result<(), Status> {
    let mut file = create_dump(bus, path, FILE_SUBTYPE_MSG_MAP, "SB Message Map Information")?;
    let rows: Vec<(u32, u32)> = {
        let guard = bus.shared_lock();
        guard
            .routes
            .route_ids()
            .into_iter()
            .filter_map(|rid| {
                guard
                    .routes
                    .route(rid)
                    .map(|route| (route.msg_id.value() as u32, rid.value()))
            })
            .collect()
    };

    let mut bytes = FILE_HEADER_LEN;
    let mut entries = 0usize;
    for (msg_id, route_id) in rows {
        let mut buf = BytesMut::with_capacity(MAP_ENTRY_LEN);
        buf.put_u32(msg_id);
        buf.put_u32(route_id);
        write_entry(bus, &mut file, path, &buf)?;
        bytes += buf.len();
        entries += 1;
    }
    note_dump_written(bus, path, bytes, entries);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ReceiveTimeout;
    use crate::config::Config;
    use softbus_msg::ccsds;

    fn bus() -> SoftBus {
        SoftBus::new(Config::default())
    }

    #[test]
    fn hk_tlm_carries_counters_and_mem() {
        let b = bus();
        let app = b.register_app("GND");
        let pipe = b.create_pipe(app, 4, "HK_PIPE").unwrap();
        b.subscribe(b.config().msg_ids.hk_tlm, pipe).unwrap();

        // provoke a no-subscribers count
        let mut msg = vec![0u8; 16];
        ccsds::init(&mut msg, MsgId::new(0x1000), 16).unwrap();
        let _ = b.transmit_msg(&msg, true);

        send_hk_tlm(&b).unwrap();
        let pkt = b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
        let tlm = HkTlm::decode(&pkt).unwrap();
        assert_eq!(tlm.counters.no_subscribers_counter, 1);
        // the failed transmit's buffer was freed before the snapshot
        assert_eq!(tlm.mem_in_use, 0);
        // but it left a 16-byte peak behind
        assert_eq!(tlm.unmarked_mem, b.config().buf_memory_bytes as u32 - 16);
    }

    #[test]
    fn stats_records_are_zero_padded() {
        let mut cfg = Config::default();
        cfg.max_pipes = 8;
        let b = SoftBus::new(cfg);
        let app = b.register_app("GND");
        let pipe = b.create_pipe(app, 4, "STATS_PIPE").unwrap();
        b.subscribe(b.config().msg_ids.stats_tlm, pipe).unwrap();

        send_stats(&b).unwrap();
        let pkt = b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
        let tlm = StatsTlm::decode(&pkt).unwrap();
        assert_eq!(tlm.pipe_depth_stats.len(), 8);
        assert_eq!(tlm.pipes_in_use, 1);
        assert_eq!(tlm.max_pipes_allowed, 8);
        assert_eq!(tlm.max_subscriptions_allowed, 256 * 16);
        // first record is the live pipe, the rest are zeroed
        assert_eq!(tlm.pipe_depth_stats[0].depth, 4);
        assert_eq!(tlm.pipe_depth_stats[7], PipeDepthStats::default());
        assert_eq!(b.hk_counters().command_counter, 1);
    }

    #[test]
    fn routing_dump_has_header_and_entries() {
        let b = bus();
        let app = b.register_app("APP1");
        let pipe = b.create_pipe(app, 4, "RT_PIPE").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        b.subscribe(MsgId::new(0x1001), pipe).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.dat");
        write_routing_info(&b, &path).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), FILE_HEADER_LEN + 2 * ROUTING_ENTRY_LEN);
        assert_eq!(u32::from_be_bytes(data[0..4].try_into().unwrap()), FILE_MAGIC);
        assert_eq!(
            u32::from_be_bytes(data[4..8].try_into().unwrap()),
            FILE_SUBTYPE_ROUTES
        );
        // first entry: msg id then pipe id
        let e = &data[FILE_HEADER_LEN..];
        assert_eq!(u32::from_be_bytes(e[0..4].try_into().unwrap()), 0x1000);
        assert_eq!(u32::from_be_bytes(e[4..8].try_into().unwrap()), pipe.value());
        assert_eq!(e[8], 1); // active
        let app_name = &e[13..13 + NAME_FIELD_LEN];
        assert!(app_name.starts_with(b"APP1"));
        let pipe_name = &e[13 + NAME_FIELD_LEN..13 + 2 * NAME_FIELD_LEN];
        assert!(pipe_name.starts_with(b"RT_PIPE"));
    }

    #[test]
    fn pipe_dump_reflects_depths() {
        let b = bus();
        let app = b.register_app("APP1");
        let pipe = b.create_pipe(app, 4, "PD_PIPE").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        let mut msg = vec![0u8; 16];
        ccsds::init(&mut msg, MsgId::new(0x1000), 16).unwrap();
        b.transmit_msg(&msg, true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipes.dat");
        write_pipe_info(&b, &path).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), FILE_HEADER_LEN + PIPE_ENTRY_LEN);
        let e = &data[FILE_HEADER_LEN..];
        assert_eq!(u32::from_be_bytes(e[0..4].try_into().unwrap()), pipe.value());
        assert_eq!(u16::from_be_bytes(e[8..10].try_into().unwrap()), 4); // max depth
        assert_eq!(u16::from_be_bytes(e[10..12].try_into().unwrap()), 1); // current
        assert_eq!(u16::from_be_bytes(e[12..14].try_into().unwrap()), 1); // peak
    }

    #[test]
    fn map_dump_lists_route_assignments() {
        let b = bus();
        let app = b.register_app("APP1");
        let pipe = b.create_pipe(app, 4, "MAP_PIPE").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        b.subscribe(MsgId::new(0x1001), pipe).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.dat");
        write_map_info(&b, &path).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), FILE_HEADER_LEN + 2 * MAP_ENTRY_LEN);
        let e = &data[FILE_HEADER_LEN..];
        assert_eq!(u32::from_be_bytes(e[0..4].try_into().unwrap()), 0x1000);
    }

    #[test]
    fn dump_to_bad_path_reports_file_error() {
        let b = bus();
        let path = Path::new("/nonexistent-dir/impossible.dat");
        assert_eq!(write_map_info(&b, path), Err(Status::FileIoErr));
    }

    #[test]
    fn prev_subs_takes_first_global_per_route() {
        let mut cfg = Config::default();
        cfg.sub_entries_per_pkt = 2;
        let b = SoftBus::new(cfg);
        let app = b.register_app("APP1");
        let p = b.create_pipe(app, 8, "GP").unwrap();
        let capture = b.create_pipe(app, 8, "CAPTURE").unwrap();
        // local-scope capture subscription stays out of the replay
        b.subscribe_local(b.config().msg_ids.allsubs_tlm, capture, 8)
            .unwrap();

        for m in [0x1000u16, 0x1001, 0x1002] {
            b.subscribe(MsgId::new(m), p).unwrap();
        }
        send_prev_subs(&b).unwrap();

        let full = b.receive_buffer(capture, ReceiveTimeout::Poll).unwrap();
        let full = PrevSubsTlm::decode(&full).unwrap();
        assert_eq!(full.pkt_segment, 1);
        assert_eq!(full.entries.len(), 2);
        assert_eq!(full.entries[0].msg_id, MsgId::new(0x1000));

        let part = b.receive_buffer(capture, ReceiveTimeout::Poll).unwrap();
        let part = PrevSubsTlm::decode(&part).unwrap();
        assert_eq!(part.pkt_segment, 2);
        assert_eq!(part.entries.len(), 1);
    }

    #[test]
    fn subscription_report_emitted_when_enabled() {
        let b = bus();
        let app = b.register_app("APP1");
        let p = b.create_pipe(app, 8, "SUBJ").unwrap();
        let capture = b.create_pipe(app, 8, "ONESUB").unwrap();
        b.subscribe_local(b.config().msg_ids.onesub_tlm, capture, 8)
            .unwrap();

        b.set_subscription_reporting(true);
        b.subscribe(MsgId::new(0x1234), p).unwrap();

        let pkt = b.receive_buffer(capture, ReceiveTimeout::Poll).unwrap();
        let tlm = SingleSubTlm::decode(&pkt).unwrap();
        assert_eq!(tlm.sub_type, SUB_TYPE_SUBSCRIPTION);
        assert_eq!(tlm.msg_id, MsgId::new(0x1234));
        assert_eq!(tlm.pipe, p.value());

        b.set_subscription_reporting(false);
        b.subscribe(MsgId::new(0x1235), p).unwrap();
        assert!(b.receive_buffer(capture, ReceiveTimeout::Poll).is_err());
    }
}

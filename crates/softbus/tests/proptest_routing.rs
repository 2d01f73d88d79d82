//! Property tests for routing invariants, driven through the public API.

use proptest::prelude::*;
use softbus::{Config, MsgId, ReceiveTimeout, SoftBus};
use softbus_msg::ccsds;
use std::collections::HashSet;

fn packet(msg_id: u16, len: usize) -> Vec<u8> {
    let mut msg = vec![0u8; len];
    ccsds::init(&mut msg, MsgId::new(msg_id), len).unwrap();
    msg
}

proptest! {
    /// Destination count equals subscribes minus unsubscribes per id.
    #[test]
    fn destination_count_tracks_operations(
        ops in proptest::collection::vec((0u16..6, 0usize..4, any::<bool>()), 1..80)
    ) {
        let bus = SoftBus::new(Config::default());
        let app = bus.register_app("T");
        let pipes: Vec<_> = (0..4)
            .map(|i| bus.create_pipe(app, 4, &format!("P{i}")).unwrap())
            .collect();
        let mut model: HashSet<(u16, usize)> = HashSet::new();

        for (msg, pipe_idx, subscribe) in ops {
            let msg_id = MsgId::new(0x1000 + msg);
            if subscribe {
                bus.subscribe(msg_id, pipes[pipe_idx]).unwrap();
                model.insert((msg, pipe_idx));
            } else {
                bus.unsubscribe(msg_id, pipes[pipe_idx]).unwrap();
                model.remove(&(msg, pipe_idx));
            }
        }

        for msg in 0u16..6 {
            let expected = model.iter().filter(|(m, _)| *m == msg).count();
            prop_assert_eq!(bus.dest_count(MsgId::new(0x1000 + msg)), expected);
        }
    }

    /// Repeated subscribes never add a second destination and count
    /// duplicates exactly once each.
    #[test]
    fn duplicate_subscribes_count_once_each(repeats in 1usize..6) {
        let bus = SoftBus::new(Config::default());
        let app = bus.register_app("T");
        let pipe = bus.create_pipe(app, 4, "P").unwrap();

        bus.subscribe(MsgId::new(0x1000), pipe).unwrap();
        for _ in 0..repeats {
            bus.subscribe(MsgId::new(0x1000), pipe).unwrap();
        }
        prop_assert_eq!(bus.dest_count(MsgId::new(0x1000)), 1);
        prop_assert_eq!(
            bus.hk_counters().duplicate_subscriptions_counter,
            repeats as u32
        );
    }

    /// After deleting a pipe, no route still targets it and transmits to its
    /// former ids find no subscribers.
    #[test]
    fn pipe_delete_leaves_no_destinations(
        ids in proptest::collection::hash_set(0u16..32, 1..10)
    ) {
        let bus = SoftBus::new(Config::default());
        let app = bus.register_app("T");
        let pipe = bus.create_pipe(app, 4, "P").unwrap();
        for id in &ids {
            bus.subscribe(MsgId::new(0x1000 + id), pipe).unwrap();
        }
        bus.delete_pipe(pipe, app).unwrap();
        for id in &ids {
            prop_assert_eq!(bus.dest_count(MsgId::new(0x1000 + id)), 0);
        }
    }

    /// Among active destinations of one route, enqueue order equals
    /// subscription order.
    #[test]
    fn dispatch_order_matches_subscription_order(
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()
    ) {
        let bus = SoftBus::new(Config::default());
        let app = bus.register_app("T");
        let pipes: Vec<_> = (0..4)
            .map(|i| bus.create_pipe(app, 4, &format!("P{i}")).unwrap())
            .collect();
        for &i in order.iter() {
            bus.subscribe(MsgId::new(0x1000), pipes[i]).unwrap();
        }

        bus.transmit_msg(&packet(0x1000, 16), true).unwrap();

        // every subscribed pipe got exactly one copy, and the shared
        // sequence stamp shows a single fan-out pass
        let mut seqs = Vec::new();
        for &i in order.iter() {
            let buf = bus.receive_buffer(pipes[i], ReceiveTimeout::Poll).unwrap();
            seqs.push(ccsds::sequence_count(&buf).unwrap());
        }
        prop_assert!(seqs.iter().all(|&s| s == seqs[0]));
    }

    /// Peak depth never falls below current depth across random traffic.
    #[test]
    fn peak_depth_dominates_current_depth(
        ops in proptest::collection::vec(any::<bool>(), 1..60)
    ) {
        let bus = SoftBus::new(Config::default());
        let app = bus.register_app("T");
        let pipe = bus.create_pipe(app, 16, "P").unwrap();
        bus.subscribe_ex(MsgId::new(0x1000), pipe, Default::default(), 16).unwrap();

        for publish in ops {
            if publish {
                let _ = bus.transmit_msg(&packet(0x1000, 16), true);
            } else {
                let _ = bus.receive_buffer(pipe, ReceiveTimeout::Poll);
            }
            let info = bus.pipe_info(pipe).unwrap();
            prop_assert!(info.peak_depth >= info.current_depth);
        }
    }
}

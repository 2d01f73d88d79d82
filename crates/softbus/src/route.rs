//! # Routing Table
//!
//! Maps a message id to its route, the ordered set of destinations
//! subscribed to it. Routes and destinations live in slab arenas indexed by
//! small integers; each route stores the head of its destination chain and
//! each destination the index of the next, so the list has no ownership
//! cycles and insertion order is preserved for dispatch fairness.

use serde::{Deserialize, Serialize};
use slab::Slab;
use softbus_msg::{MsgId, Status};
use std::collections::HashMap;

use crate::pipe::PipeId;

// ─── Subscription Attributes ─────────────────────────────────────────────────

/// Quality-of-service hint. Accepted at subscribe time; dispatch does not
/// honor it yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub priority: u8,
    pub reliability: u8,
}

/// Subscription scope: only `Global` destinations appear in the
/// prior-subscriptions replay consumed by an off-node bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
    Global,
    Local,
}

/// Dense route identifier, assigned at first subscription to an unseen
/// message id and recycled when the last destination leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(usize);

impl RouteId {
    pub fn value(self) -> u32 {
        self.0 as u32
    }
}

// ─── Arena Records ───────────────────────────────────────────────────────────

pub(crate) struct Destination {
    pub pipe_id: PipeId,
    pub msg_id: MsgId,
    pub active: bool,
    pub scope: Scope,
    pub qos: Qos,
    /// Max messages of this id concurrently enqueued on this pipe; 0 = unlimited.
    pub msg_count_limit: u16,
    pub msg_count_current: u16,
    /// Messages successfully forwarded to this destination.
    pub sent_count: u32,
    next: Option<usize>,
}

pub(crate) struct Route {
    pub msg_id: MsgId,
    pub seq_count: u16,
    pub dest_count: u16,
    head: Option<usize>,
}

impl Route {
    /// Advance and return the route's 14-bit transmit sequence counter.
    pub(crate) fn next_seq(&mut self) -> u16 {
        self.seq_count = (self.seq_count + 1) & 0x3FFF;
        self.seq_count
    }
}

// ─── Table ───────────────────────────────────────────────────────────────────

pub(crate) enum SubscribeOutcome {
    Added,
    Duplicate,
}

pub(crate) struct RouteTable {
    routes: Slab<Route>,
    dests: Slab<Destination>,
    index: HashMap<MsgId, usize>,
    max_routes: usize,
    max_dests_per_route: usize,
    peak_routes: usize,
    subscriptions: usize,
    peak_subscriptions: usize,
}

impl RouteTable {
    pub(crate) fn new(max_routes: usize, max_dests_per_route: usize) -> Self {
        RouteTable {
            routes: Slab::with_capacity(max_routes),
            dests: Slab::with_capacity(max_routes * max_dests_per_route),
            index: HashMap::with_capacity(max_routes),
            max_routes,
            max_dests_per_route,
            peak_routes: 0,
            subscriptions: 0,
            peak_subscriptions: 0,
        }
    }

    /// The route for a message id, if any destination is subscribed.
    pub(crate) fn route_id(&self, msg_id: MsgId) -> Option<RouteId> {
        self.index.get(&msg_id).copied().map(RouteId)
    }

    pub(crate) fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(id.0)
    }

    pub(crate) fn route_mut(&mut self, id: RouteId) -> Option<&mut Route> {
        self.routes.get_mut(id.0)
    }

    /// Add a destination at the tail of the route's chain, creating the
    /// route on first subscription to the id.
    pub(crate) fn subscribe(
        &mut self,
        msg_id: MsgId,
        pipe_id: PipeId,
        qos: Qos,
        msg_count_limit: u16,
        scope: Scope,
    ) -> Result<SubscribeOutcome, Status> {
        if let Some(&route_idx) = self.index.get(&msg_id) {
            if self.chain_find(route_idx, pipe_id).is_some() {
                return Ok(SubscribeOutcome::Duplicate);
            }
            if self.routes[route_idx].dest_count as usize >= self.max_dests_per_route {
                return Err(Status::MaxDestsMet);
            }
            let dest_idx = self.insert_dest(msg_id, pipe_id, qos, msg_count_limit, scope);
            self.chain_push_tail(route_idx, dest_idx);
            self.routes[route_idx].dest_count += 1;
        } else {
            if self.routes.len() >= self.max_routes {
                return Err(Status::MaxMsgsMet);
            }
            let dest_idx = self.insert_dest(msg_id, pipe_id, qos, msg_count_limit, scope);
            let route_idx = self.routes.insert(Route {
                msg_id,
                seq_count: 0,
                dest_count: 1,
                head: Some(dest_idx),
            });
            self.index.insert(msg_id, route_idx);
            self.peak_routes = self.peak_routes.max(self.routes.len());
        }
        self.subscriptions += 1;
        self.peak_subscriptions = self.peak_subscriptions.max(self.subscriptions);
        Ok(SubscribeOutcome::Added)
    }

    /// Remove the (msg_id, pipe) destination. Returns whether one existed.
    /// Reclaims the route when its last destination leaves.
    pub(crate) fn unsubscribe(&mut self, msg_id: MsgId, pipe_id: PipeId) -> bool {
        let Some(&route_idx) = self.index.get(&msg_id) else {
            return false;
        };
        let mut prev: Option<usize> = None;
        let mut cur = self.routes[route_idx].head;
        while let Some(idx) = cur {
            if self.dests[idx].pipe_id == pipe_id {
                let next = self.dests[idx].next;
                match prev {
                    Some(p) => self.dests[p].next = next,
                    None => self.routes[route_idx].head = next,
                }
                self.dests.remove(idx);
                self.subscriptions -= 1;
                let route = &mut self.routes[route_idx];
                route.dest_count -= 1;
                if route.head.is_none() {
                    self.index.remove(&msg_id);
                    self.routes.remove(route_idx);
                }
                return true;
            }
            prev = cur;
            cur = self.dests[idx].next;
        }
        false
    }

    /// The destination of (route, pipe), if present.
    pub(crate) fn dest_mut(&mut self, route: RouteId, pipe_id: PipeId) -> Option<&mut Destination> {
        let idx = self.chain_find(route.0, pipe_id)?;
        self.dests.get_mut(idx)
    }

    /// Arena indices of the route's destinations, in insertion order.
    pub(crate) fn dest_indices(&self, route: RouteId) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(r) = self.routes.get(route.0) else {
            return out;
        };
        let mut cur = r.head;
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.dests[idx].next;
        }
        out
    }

    pub(crate) fn dest_at_mut(&mut self, idx: usize) -> Option<&mut Destination> {
        self.dests.get_mut(idx)
    }

    /// Destinations of a route, in insertion order.
    pub(crate) fn dests(&self, route: RouteId) -> impl Iterator<Item = &Destination> + '_ {
        ChainIter {
            table: self,
            cur: self.routes.get(route.0).and_then(|r| r.head),
        }
    }

    /// Snapshot of every live route id, in stable arena order. Taken under
    /// the bus lock; consumers iterate outside it and re-query per route.
    pub(crate) fn route_ids(&self) -> Vec<RouteId> {
        self.routes.iter().map(|(idx, _)| RouteId(idx)).collect()
    }

    pub(crate) fn msg_ids_in_use(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn peak_msg_ids_in_use(&self) -> usize {
        self.peak_routes
    }

    pub(crate) fn subscriptions_in_use(&self) -> usize {
        self.subscriptions
    }

    pub(crate) fn peak_subscriptions_in_use(&self) -> usize {
        self.peak_subscriptions
    }

    fn insert_dest(
        &mut self,
        msg_id: MsgId,
        pipe_id: PipeId,
        qos: Qos,
        msg_count_limit: u16,
        scope: Scope,
    ) -> usize {
        self.dests.insert(Destination {
            pipe_id,
            msg_id,
            active: true,
            scope,
            qos,
            msg_count_limit,
            msg_count_current: 0,
            sent_count: 0,
            next: None,
        })
    }

    fn chain_push_tail(&mut self, route_idx: usize, dest_idx: usize) {
        match self.routes[route_idx].head {
            None => self.routes[route_idx].head = Some(dest_idx),
            Some(mut tail) => {
                while let Some(next) = self.dests[tail].next {
                    tail = next;
                }
                self.dests[tail].next = Some(dest_idx);
            }
        }
    }

    fn chain_find(&self, route_idx: usize, pipe_id: PipeId) -> Option<usize> {
        let mut cur = self.routes.get(route_idx)?.head;
        while let Some(idx) = cur {
            if self.dests[idx].pipe_id == pipe_id {
                return Some(idx);
            }
            cur = self.dests[idx].next;
        }
        None
    }
}

struct ChainIter<'a> {
    table: &'a RouteTable,
    cur: Option<usize>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Destination;

    fn next(&mut self) -> Option<&'a Destination> {
        let idx = self.cur?;
        let dest = &self.table.dests[idx];
        self.cur = dest.next;
        Some(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(v: u32) -> PipeId {
        PipeId::from_value(v)
    }

    fn table() -> RouteTable {
        RouteTable::new(8, 4)
    }

    fn sub(t: &mut RouteTable, msg: u16, pipe: u32) -> Result<SubscribeOutcome, Status> {
        t.subscribe(
            MsgId::new(msg),
            pid(pipe),
            Qos::default(),
            4,
            Scope::Global,
        )
    }

    #[test]
    fn subscribe_creates_route_once() {
        let mut t = table();
        assert!(matches!(sub(&mut t, 0x100, 1), Ok(SubscribeOutcome::Added)));
        let route = t.route_id(MsgId::new(0x100)).unwrap();
        assert!(matches!(
            sub(&mut t, 0x100, 2),
            Ok(SubscribeOutcome::Added)
        ));
        assert_eq!(t.route_id(MsgId::new(0x100)), Some(route));
        assert_eq!(t.msg_ids_in_use(), 1);
        assert_eq!(t.subscriptions_in_use(), 2);
    }

    #[test]
    fn duplicate_subscription_detected() {
        let mut t = table();
        sub(&mut t, 0x100, 1).unwrap();
        assert!(matches!(
            sub(&mut t, 0x100, 1),
            Ok(SubscribeOutcome::Duplicate)
        ));
        assert_eq!(t.subscriptions_in_use(), 1);
    }

    #[test]
    fn destination_order_is_insertion_order() {
        let mut t = table();
        for p in [5u32, 2, 9] {
            sub(&mut t, 0x100, p).unwrap();
        }
        let route = t.route_id(MsgId::new(0x100)).unwrap();
        let order: Vec<u32> = t.dests(route).map(|d| d.pipe_id.value()).collect();
        assert_eq!(order, vec![5, 2, 9]);
    }

    #[test]
    fn unsubscribe_middle_preserves_chain() {
        let mut t = table();
        for p in [1u32, 2, 3] {
            sub(&mut t, 0x100, p).unwrap();
        }
        assert!(t.unsubscribe(MsgId::new(0x100), pid(2)));
        let route = t.route_id(MsgId::new(0x100)).unwrap();
        let order: Vec<u32> = t.dests(route).map(|d| d.pipe_id.value()).collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(t.route(route).unwrap().dest_count, 2);
    }

    #[test]
    fn last_unsubscribe_reclaims_route() {
        let mut t = table();
        sub(&mut t, 0x100, 1).unwrap();
        assert!(t.unsubscribe(MsgId::new(0x100), pid(1)));
        assert!(t.route_id(MsgId::new(0x100)).is_none());
        assert_eq!(t.msg_ids_in_use(), 0);
        // id can be resubscribed afterwards
        assert!(matches!(sub(&mut t, 0x100, 1), Ok(SubscribeOutcome::Added)));
    }

    #[test]
    fn missing_unsubscribe_is_tolerated() {
        let mut t = table();
        assert!(!t.unsubscribe(MsgId::new(0x100), pid(1)));
        sub(&mut t, 0x100, 1).unwrap();
        assert!(!t.unsubscribe(MsgId::new(0x100), pid(2)));
        assert_eq!(t.subscriptions_in_use(), 1);
    }

    #[test]
    fn route_cap_enforced() {
        let mut t = RouteTable::new(2, 4);
        sub(&mut t, 0x100, 1).unwrap();
        sub(&mut t, 0x101, 1).unwrap();
        assert_eq!(sub(&mut t, 0x102, 1).err(), Some(Status::MaxMsgsMet));
    }

    #[test]
    fn dest_cap_enforced() {
        let mut t = RouteTable::new(8, 2);
        sub(&mut t, 0x100, 1).unwrap();
        sub(&mut t, 0x100, 2).unwrap();
        assert_eq!(sub(&mut t, 0x100, 3).err(), Some(Status::MaxDestsMet));
    }

    #[test]
    fn sequence_counter_wraps_at_14_bits() {
        let mut t = table();
        sub(&mut t, 0x100, 1).unwrap();
        let route = t.route_id(MsgId::new(0x100)).unwrap();
        let r = t.route_mut(route).unwrap();
        r.seq_count = 0x3FFF;
        assert_eq!(r.next_seq(), 0);
        assert_eq!(r.next_seq(), 1);
    }

    #[test]
    fn proptest_subscription_counting() {
        use proptest::prelude::*;

        proptest!(|(ops in proptest::collection::vec((0u16..8, 0u32..4, any::<bool>()), 1..64))| {
            let mut t = RouteTable::new(16, 8);
            let mut model: std::collections::HashSet<(u16, u32)> = Default::default();
            for (msg, pipe, subscribe) in ops {
                if subscribe {
                    let _ = t.subscribe(MsgId::new(msg), pid(pipe), Qos::default(), 4, Scope::Global);
                    model.insert((msg, pipe));
                } else {
                    t.unsubscribe(MsgId::new(msg), pid(pipe));
                    model.remove(&(msg, pipe));
                }
            }
            prop_assert_eq!(t.subscriptions_in_use(), model.len());
            for msg in 0u16..8 {
                let expected = model.iter().filter(|(m, _)| *m == msg).count();
                let actual = t
                    .route_id(MsgId::new(msg))
                    .map(|r| t.dests(r).count())
                    .unwrap_or(0);
                prop_assert_eq!(actual, expected);
            }
        });
    }
}

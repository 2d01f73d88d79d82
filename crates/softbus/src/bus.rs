//! # The Software Bus
//!
//! [`SoftBus`] is the single owning aggregate: pipe table, routing table,
//! housekeeping counters, buffer pool, and event dispatch. One coarse mutex
//! protects the shared tables: contention is low and correctness is favored
//! over throughput. Events raised while the lock is held are collected and
//! emitted after release, and all blocking (queue receive) happens outside
//! the lock.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use softbus_msg::{ccsds, MsgId, Status};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Config;
use crate::events::{EventDispatcher, EventId, EventSink, LogSink, Severity};
use crate::pipe::{AppId, CreateError, PipeId, PipeInfo, PipeTable, MAX_PIPE_NAME_LEN};
use crate::pool::{Buffer, BufferPool};
use crate::report;
use crate::route::{Qos, RouteId, RouteTable, Scope, SubscribeOutcome};
use crate::telemetry::HkCounters;

// ─── Receive Timeout ─────────────────────────────────────────────────────────

/// How long a receive may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Block until a message arrives.
    PendForever,
    /// Return immediately.
    Poll,
    /// Block up to the given number of milliseconds.
    Millis(u32),
}

// ─── Shared State ────────────────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) pipes: PipeTable,
    pub(crate) routes: RouteTable,
    pub(crate) hk: HkCounters,
    pub(crate) sub_reporting: bool,
    pub(crate) apps: HashMap<u32, String>,
    next_app_id: u32,
}

type PendingEvent = (EventId, Severity, String);

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// The in-process publish/subscribe message router.
pub struct SoftBus {
    config: Config,
    pool: BufferPool,
    events: EventDispatcher,
    shared: Mutex<Shared>,
}

impl SoftBus {
    /// Create a bus with the default `tracing`-backed event sink.
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Box::new(LogSink))
    }

    /// Create a bus with a caller-provided event sink.
    pub fn with_sink(config: Config, sink: Box<dyn EventSink>) -> Self {
        let events = EventDispatcher::new(sink);
        events.register_filters(&config.filtered_events, config.max_event_filters);
        SoftBus {
            pool: BufferPool::new(config.buf_memory_bytes),
            events,
            shared: Mutex::new(Shared {
                pipes: PipeTable::new(config.max_pipes),
                routes: RouteTable::new(config.max_msg_ids, config.max_dest_per_msg_id),
                hk: HkCounters::default(),
                sub_reporting: false,
                apps: HashMap::new(),
                next_app_id: 1,
            }),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub(crate) fn shared_lock(&self) -> MutexGuard<'_, Shared> {
        crate::events::lock_recover(&self.shared)
    }

    fn emit_all(&self, pending: Vec<PendingEvent>) {
        for (id, severity, text) in pending {
            self.events.emit(id, severity, text);
        }
    }

    // ─── Applications ────────────────────────────────────────────────────

    /// Register an application for owner attribution in pipes and dumps.
    pub fn register_app(&self, name: &str) -> AppId {
        let mut sh = self.shared_lock();
        let id = sh.next_app_id;
        sh.next_app_id += 1;
        sh.apps.insert(id, name.to_owned());
        AppId(id)
    }

    /// Name of a registered application.
    pub fn app_name(&self, app: AppId) -> Option<String> {
        self.shared_lock().apps.get(&app.0).cloned()
    }

    // ─── Pipe Registry ───────────────────────────────────────────────────

    /// Create a pipe owned by `app` with a bounded queue of `depth` entries.
    pub fn create_pipe(&self, app: AppId, depth: u16, name: &str) -> Result<PipeId, Status> {
        let mut pending = Vec::new();
        let result = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            if depth == 0
                || depth > self.config.max_queue_depth
                || name.is_empty()
                || name.len() > MAX_PIPE_NAME_LEN
            {
                sh.hk.create_pipe_error_counter += 1;
                pending.push((
                    EventId::CreatePipeBadArg,
                    Severity::Error,
                    format!("CreatePipeErr:Bad Input Arg:app {},depth {},name {:?}", app.0, depth, name),
                ));
                Err(Status::BadArgument)
            } else {
                match sh.pipes.create(app, depth, name) {
                    Ok(pipe_id) => {
                        pending.push((
                            EventId::PipeAdded,
                            Severity::Debug,
                            format!("Pipe Created:name {},id {},app {}", name, pipe_id, app.0),
                        ));
                        Ok(pipe_id)
                    }
                    Err(CreateError::TableFull) => {
                        sh.hk.create_pipe_error_counter += 1;
                        pending.push((
                            EventId::MaxPipesMet,
                            Severity::Error,
                            format!("CreatePipeErr:Max Pipes {} In Use,app {}", self.config.max_pipes, app.0),
                        ));
                        Err(Status::MaxPipesMet)
                    }
                    Err(CreateError::NameTaken) => {
                        sh.hk.create_pipe_error_counter += 1;
                        pending.push((
                            EventId::CreatePipeNameTaken,
                            Severity::Error,
                            format!("CreatePipeErr:Name {} already in use,app {}", name, app.0),
                        ));
                        Err(Status::PipeCreateErr)
                    }
                }
            }
        };
        self.emit_all(pending);
        result
    }

    /// Delete a pipe. Only the owning application may do so.
    pub fn delete_pipe(&self, pipe: PipeId, app: AppId) -> Result<(), Status> {
        self.delete_pipe_internal(pipe, Some(app))
    }

    /// Delete a pipe on behalf of the executive, bypassing the owner check.
    pub fn delete_pipe_forced(&self, pipe: PipeId) -> Result<(), Status> {
        self.delete_pipe_internal(pipe, None)
    }

    fn delete_pipe_internal(&self, pipe: PipeId, requester: Option<AppId>) -> Result<(), Status> {
        let mut pending = Vec::new();
        let result = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            let owner = match sh.pipes.get(pipe) {
                None => {
                    pending.push((
                        EventId::DeletePipeBadArg,
                        Severity::Error,
                        format!("Pipe Delete Err:Bad pipe id {pipe}"),
                    ));
                    Err(Status::BadArgument)
                }
                Some(desc) => Ok(desc.app_id),
            };
            match owner {
                Err(e) => Err(e),
                Ok(owner) if requester.is_some_and(|r| r != owner) => {
                    pending.push((
                        EventId::DeletePipeOwner,
                        Severity::Error,
                        format!("Pipe Delete Err:pipe {pipe} not owned by caller"),
                    ));
                    Err(Status::BadArgument)
                }
                Ok(owner) => {
                    // Cascade: remove this pipe from every route it subscribed
                    // to, with no per-route reporting.
                    if let Some(desc) = sh.pipes.delete(pipe) {
                        for msg_id in &desc.subscriptions {
                            sh.routes.unsubscribe(*msg_id, pipe);
                        }
                    }
                    pending.push((
                        EventId::PipeDeleted,
                        Severity::Debug,
                        format!("Pipe Deleted:id {},owner app {}", pipe, owner.0),
                    ));
                    Ok(())
                }
            }
        };
        self.emit_all(pending);
        result
    }

    /// Set the pipe's option flags.
    pub fn set_pipe_opts(&self, pipe: PipeId, opts: u8) -> Result<(), Status> {
        let mut pending = Vec::new();
        let result = {
            let mut guard = self.shared_lock();
            match guard.pipes.get_mut(pipe) {
                Some(desc) => {
                    desc.opts = opts;
                    pending.push((
                        EventId::SetPipeOpts,
                        Severity::Debug,
                        format!("Pipe opts set:pipe {pipe},opts 0x{opts:02X}"),
                    ));
                    Ok(())
                }
                None => {
                    pending.push((
                        EventId::SetPipeOptsBadArg,
                        Severity::Error,
                        format!("Set Pipe Opts Err:Bad pipe id {pipe}"),
                    ));
                    Err(Status::BadArgument)
                }
            }
        };
        self.emit_all(pending);
        result
    }

    /// Read the pipe's option flags.
    pub fn get_pipe_opts(&self, pipe: PipeId) -> Result<u8, Status> {
        let result = self.shared_lock().pipes.get(pipe).map(|d| d.opts);
        match result {
            Some(opts) => Ok(opts),
            None => {
                self.events.emit(
                    EventId::GetPipeOptsBadArg,
                    Severity::Error,
                    format!("Get Pipe Opts Err:Bad pipe id {pipe}"),
                );
                Err(Status::BadArgument)
            }
        }
    }

    /// Name of a pipe.
    pub fn get_pipe_name(&self, pipe: PipeId) -> Result<String, Status> {
        let result = self.shared_lock().pipes.get(pipe).map(|d| d.name.clone());
        match result {
            Some(name) => Ok(name),
            None => {
                self.events.emit(
                    EventId::GetPipeNameBadArg,
                    Severity::Error,
                    format!("Get Pipe Name Err:Bad pipe id {pipe}"),
                );
                Err(Status::BadArgument)
            }
        }
    }

    /// Look a pipe up by name.
    pub fn get_pipe_id_by_name(&self, name: &str) -> Result<PipeId, Status> {
        let result = self.shared_lock().pipes.find_by_name(name);
        match result {
            Some(id) => Ok(id),
            None => {
                self.events.emit(
                    EventId::GetPipeIdByNameBadArg,
                    Severity::Error,
                    format!("Get Pipe Id By Name Err:name {name:?} not found"),
                );
                Err(Status::BadArgument)
            }
        }
    }

    /// Snapshot one pipe's state.
    pub fn pipe_info(&self, pipe: PipeId) -> Result<PipeInfo, Status> {
        self.shared_lock()
            .pipes
            .get(pipe)
            .map(|d| PipeInfo {
                pipe_id: d.pipe_id,
                app_id: d.app_id,
                name: d.name.clone(),
                opts: d.opts,
                queue_depth: d.queue_depth,
                current_depth: d.current_depth,
                peak_depth: d.peak_depth,
                send_errors: d.send_errors,
            })
            .ok_or(Status::BadArgument)
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    /// Subscribe a pipe to a message id with default QoS, the configured
    /// message limit, and global scope.
    pub fn subscribe(&self, msg_id: MsgId, pipe: PipeId) -> Result<(), Status> {
        self.subscribe_full(
            msg_id,
            pipe,
            Qos::default(),
            self.config.default_msg_limit,
            Scope::Global,
        )
    }

    /// Subscribe with explicit QoS and message limit (global scope).
    pub fn subscribe_ex(
        &self,
        msg_id: MsgId,
        pipe: PipeId,
        qos: Qos,
        msg_lim: u16,
    ) -> Result<(), Status> {
        self.subscribe_full(msg_id, pipe, qos, msg_lim, Scope::Global)
    }

    /// Subscribe with local scope: the destination is served normally but
    /// never replayed to an off-node bridge.
    pub fn subscribe_local(&self, msg_id: MsgId, pipe: PipeId, msg_lim: u16) -> Result<(), Status> {
        self.subscribe_full(msg_id, pipe, Qos::default(), msg_lim, Scope::Local)
    }

    fn subscribe_full(
        &self,
        msg_id: MsgId,
        pipe: PipeId,
        qos: Qos,
        msg_lim: u16,
        scope: Scope,
    ) -> Result<(), Status> {
        let mut pending = Vec::new();
        let mut report_sub = false;
        let result = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            if !msg_id.is_valid(self.config.highest_valid_msg_id) || sh.pipes.get(pipe).is_none() {
                sh.hk.subscribe_error_counter += 1;
                pending.push((
                    EventId::SubscribeBadArg,
                    Severity::Error,
                    format!("Subscribe Err:Bad Arg,MsgId {msg_id},pipe {pipe}"),
                ));
                Err(Status::BadArgument)
            } else {
                match sh.routes.subscribe(msg_id, pipe, qos, msg_lim, scope) {
                    Ok(SubscribeOutcome::Added) => {
                        if let Some(desc) = sh.pipes.get_mut(pipe) {
                            desc.subscriptions.push(msg_id);
                        }
                        report_sub = sh.sub_reporting;
                        pending.push((
                            EventId::SubscriptionRcvd,
                            Severity::Debug,
                            format!("Subscription Rcvd:MsgId {msg_id} on pipe {pipe}"),
                        ));
                        Ok(())
                    }
                    Ok(SubscribeOutcome::Duplicate) => {
                        // Idempotent for the caller, but counted and reported.
                        sh.hk.duplicate_subscriptions_counter += 1;
                        pending.push((
                            EventId::DuplicateSubscription,
                            Severity::Info,
                            format!("Duplicate Subscription,MsgId {msg_id} on pipe {pipe}"),
                        ));
                        Ok(())
                    }
                    Err(status @ Status::MaxMsgsMet) => {
                        sh.hk.subscribe_error_counter += 1;
                        pending.push((
                            EventId::MaxMsgsMet,
                            Severity::Error,
                            format!(
                                "Subscribe Err:Max Msgs {} In Use,MsgId {msg_id}",
                                self.config.max_msg_ids
                            ),
                        ));
                        Err(status)
                    }
                    Err(status @ Status::MaxDestsMet) => {
                        sh.hk.subscribe_error_counter += 1;
                        pending.push((
                            EventId::MaxDestsMet,
                            Severity::Error,
                            format!(
                                "Subscribe Err:Max Dests {} In Use For MsgId {msg_id},pipe {pipe}",
                                self.config.max_dest_per_msg_id
                            ),
                        ));
                        Err(status)
                    }
                    Err(status) => {
                        sh.hk.subscribe_error_counter += 1;
                        Err(status)
                    }
                }
            }
        };
        self.emit_all(pending);
        if report_sub {
            report::send_subscription_report(self, msg_id, pipe, qos);
        }
        result
    }

    /// Remove the (msg_id, pipe) destination. A missing destination is
    /// tolerated silently.
    pub fn unsubscribe(&self, msg_id: MsgId, pipe: PipeId) -> Result<(), Status> {
        let mut pending = Vec::new();
        let result = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            if !msg_id.is_valid(self.config.highest_valid_msg_id) || sh.pipes.get(pipe).is_none() {
                sh.hk.subscribe_error_counter += 1;
                pending.push((
                    EventId::UnsubscribeBadArg,
                    Severity::Error,
                    format!("Unsubscribe Err:Bad Arg,MsgId {msg_id},pipe {pipe}"),
                ));
                Err(Status::BadArgument)
            } else {
                if sh.routes.unsubscribe(msg_id, pipe) {
                    if let Some(desc) = sh.pipes.get_mut(pipe) {
                        desc.subscriptions.retain(|m| *m != msg_id);
                    }
                    pending.push((
                        EventId::SubscriptionRemoved,
                        Severity::Debug,
                        format!("Subscription Removed:MsgId {msg_id} on pipe {pipe}"),
                    ));
                }
                Ok(())
            }
        };
        self.emit_all(pending);
        result
    }

    /// Snapshot of every live route id, in stable order. Consumers iterate
    /// outside the lock and re-query per id while the bus keeps running.
    pub fn route_ids(&self) -> Vec<RouteId> {
        self.shared_lock().routes.route_ids()
    }

    /// The message id a route serves, if the route is still live.
    pub fn route_msg_id(&self, route: RouteId) -> Option<MsgId> {
        self.shared_lock().routes.route(route).map(|r| r.msg_id)
    }

    /// Number of destinations currently subscribed to a message id.
    pub fn dest_count(&self, msg_id: MsgId) -> usize {
        let guard = self.shared_lock();
        guard
            .routes
            .route_id(msg_id)
            .map(|r| guard.routes.dests(r).count())
            .unwrap_or(0)
    }

    // ─── Route Enable/Disable ────────────────────────────────────────────

    /// Re-activate a destination previously disabled.
    pub fn enable_route(&self, msg_id: MsgId, pipe: PipeId) -> Result<(), Status> {
        self.set_route_state(msg_id, pipe, true)
    }

    /// Deactivate a destination: dispatch skips it but it stays on the route.
    pub fn disable_route(&self, msg_id: MsgId, pipe: PipeId) -> Result<(), Status> {
        self.set_route_state(msg_id, pipe, false)
    }

    fn set_route_state(&self, msg_id: MsgId, pipe: PipeId, active: bool) -> Result<(), Status> {
        let (verb, ev_no_route, ev_ok, ev_bad) = if active {
            (
                "Enbl",
                EventId::EnableRouteNoRoute,
                EventId::EnableRouteOk,
                EventId::EnableRouteBadParam,
            )
        } else {
            (
                "Dsbl",
                EventId::DisableRouteNoRoute,
                EventId::DisableRouteOk,
                EventId::DisableRouteBadParam,
            )
        };
        let mut pending = Vec::new();
        let result = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            if !msg_id.is_valid(self.config.highest_valid_msg_id) || sh.pipes.get(pipe).is_none() {
                sh.hk.command_error_counter += 1;
                pending.push((
                    ev_bad,
                    Severity::Error,
                    format!("{verb} Route Cmd:Invalid Param,Msg {msg_id},Pipe {pipe}"),
                ));
                Err(Status::BadArgument)
            } else {
                let dest = sh
                    .routes
                    .route_id(msg_id)
                    .and_then(|r| sh.routes.dest_mut(r, pipe));
                match dest {
                    None => {
                        sh.hk.command_error_counter += 1;
                        pending.push((
                            ev_no_route,
                            Severity::Error,
                            format!("{verb} Route Cmd:Route does not exist,Msg {msg_id},Pipe {pipe}"),
                        ));
                        Err(Status::BadArgument)
                    }
                    Some(dest) => {
                        dest.active = active;
                        sh.hk.command_counter += 1;
                        pending.push((
                            ev_ok,
                            Severity::Debug,
                            format!("{verb} Route,Msg {msg_id},Pipe {pipe}"),
                        ));
                        Ok(())
                    }
                }
            }
        };
        self.emit_all(pending);
        result
    }

    // ─── Transmit ────────────────────────────────────────────────────────

    /// Route a message to every active subscribed destination.
    ///
    /// The message is copied into a pool buffer; the caller keeps ownership
    /// of `msg` and consumers receive refcounted clones of the pool copy.
    /// With `increment_seq`, the copy is stamped with the route's next
    /// sequence count before fan-out.
    pub fn transmit_msg(&self, msg: &[u8], increment_seq: bool) -> Result<(), Status> {
        let msg_id = match self.validate_transmit(msg) {
            Ok(id) => id,
            Err((status, event, text)) => {
                self.shared_lock().hk.msg_send_error_counter += 1;
                self.events.emit(event, Severity::Error, text);
                return Err(status);
            }
        };

        let mut staged = match self.pool.allocate(msg) {
            Ok(buf) => buf,
            Err(status) => {
                self.shared_lock().hk.msg_send_error_counter += 1;
                self.events.emit(
                    EventId::BufAllocErr,
                    Severity::Error,
                    format!("Transmit Err:no buffer for MsgId {msg_id}"),
                );
                return Err(status);
            }
        };

        // Phase 1, under the lock: resolve the route, pick eligible
        // destinations, charge their message counts, stamp the sequence.
        let mut pending: Vec<PendingEvent> = Vec::new();
        let mut targets: Vec<(usize, PipeId, Sender<Buffer>)> = Vec::new();
        let mut limit_skips = 0u32;
        {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            let Some(route_id) = sh.routes.route_id(msg_id) else {
                // Frequent during boot; counted but never an event.
                sh.hk.no_subscribers_counter += 1;
                return Err(Status::NoSubscribers);
            };
            if increment_seq {
                if let Some(route) = sh.routes.route_mut(route_id) {
                    let seq = route.next_seq();
                    let _ = ccsds::set_sequence_count(&mut staged, seq);
                }
            }
            for dest_idx in sh.routes.dest_indices(route_id) {
                let Some(dest) = sh.routes.dest_at_mut(dest_idx) else {
                    continue;
                };
                if !dest.active {
                    continue;
                }
                if dest.msg_count_limit != 0 && dest.msg_count_current >= dest.msg_count_limit {
                    sh.hk.msg_limit_error_counter += 1;
                    limit_skips += 1;
                    let pipe_id = dest.pipe_id;
                    if let Some(pd) = sh.pipes.get_mut(pipe_id) {
                        pd.send_errors = pd.send_errors.saturating_add(1);
                        pending.push((
                            EventId::MsgIdLimErr,
                            Severity::Error,
                            format!("Msg Limit Err,MsgId {msg_id},pipe {}", pd.name),
                        ));
                    }
                    continue;
                }
                let pipe_id = dest.pipe_id;
                if let Some(pd) = sh.pipes.get(pipe_id) {
                    let tx = pd.tx.clone();
                    if let Some(dest) = sh.routes.dest_at_mut(dest_idx) {
                        dest.msg_count_current += 1;
                    }
                    targets.push((dest_idx, pipe_id, tx));
                }
            }
        }

        // Phase 2, outside the lock: enqueue one clone per destination.
        let buffer = staged.freeze();
        let results: Vec<Result<(), TrySendError<Buffer>>> = targets
            .iter()
            .map(|(_, _, tx)| tx.try_send(buffer.clone()))
            .collect();
        drop(buffer);

        // Phase 3, under the lock again: apply depth accounting and roll
        // back the message counts of failed enqueues.
        let mut delivered = 0usize;
        let mut q_full = 0usize;
        let mut dropped = 0usize;
        {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            for ((dest_idx, pipe_id, _), result) in targets.iter().zip(&results) {
                match result {
                    Ok(()) => {
                        if let Some(pd) = sh.pipes.get_mut(*pipe_id) {
                            pd.note_enqueue();
                        }
                        // The arena slot may have been recycled while the
                        // lock was dropped; the cached ids gate the walk-back.
                        if let Some(dest) = sh.routes.dest_at_mut(*dest_idx) {
                            if dest.msg_id == msg_id && dest.pipe_id == *pipe_id {
                                dest.sent_count += 1;
                            }
                        }
                        delivered += 1;
                    }
                    Err(TrySendError::Full(_)) => {
                        q_full += 1;
                        sh.hk.pipe_overflow_error_counter += 1;
                        let name = match sh.pipes.get_mut(*pipe_id) {
                            Some(pd) => {
                                pd.send_errors = pd.send_errors.saturating_add(1);
                                pd.name.clone()
                            }
                            None => pipe_id.to_string(),
                        };
                        if let Some(dest) = sh.routes.dest_at_mut(*dest_idx) {
                            if dest.msg_id == msg_id && dest.pipe_id == *pipe_id {
                                dest.msg_count_current = dest.msg_count_current.saturating_sub(1);
                            }
                        }
                        pending.push((
                            EventId::QFullErr,
                            Severity::Error,
                            format!("Pipe Overflow,MsgId {msg_id},pipe {name}"),
                        ));
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        dropped += 1;
                        sh.hk.internal_error_counter += 1;
                        sh.hk.msg_send_error_counter += 1;
                        if let Some(dest) = sh.routes.dest_at_mut(*dest_idx) {
                            if dest.msg_id == msg_id && dest.pipe_id == *pipe_id {
                                dest.msg_count_current = dest.msg_count_current.saturating_sub(1);
                            }
                        }
                        pending.push((
                            EventId::TransmitFailed,
                            Severity::Error,
                            format!("Transmit Err:queue gone,MsgId {msg_id},pipe {pipe_id}"),
                        ));
                    }
                }
            }
        }
        self.emit_all(pending);

        if delivered > 0 {
            Ok(())
        } else if q_full > 0 {
            Err(Status::QFull)
        } else if dropped > 0 {
            Err(Status::InternalErr)
        } else if limit_skips > 0 {
            Err(Status::MsgLimitErr)
        } else {
            // Route exists but every destination was inactive.
            Ok(())
        }
    }

    fn validate_transmit(&self, msg: &[u8]) -> Result<MsgId, (Status, EventId, String)> {
        if msg.len() < ccsds::MIN_MSG_LEN {
            return Err((
                Status::BadArgument,
                EventId::TransmitBadArg,
                format!("Transmit Err:Bad Arg,len {}", msg.len()),
            ));
        }
        if msg.len() > ccsds::MAX_MSG_LEN {
            return Err((
                Status::MsgTooBig,
                EventId::MsgTooBig,
                format!("Transmit Err:Msg Too Big,len {}", msg.len()),
            ));
        }
        let msg_id = ccsds::msg_id(msg).map_err(|s| {
            (s, EventId::TransmitBadArg, "Transmit Err:Bad Arg".to_owned())
        })?;
        let declared = ccsds::size(msg).map_err(|s| {
            (s, EventId::TransmitBadArg, "Transmit Err:Bad Arg".to_owned())
        })?;
        if declared != msg.len() {
            return Err((
                Status::BadArgument,
                EventId::TransmitBadArg,
                format!(
                    "Transmit Err:Size mismatch,MsgId {msg_id},hdr {declared},actual {}",
                    msg.len()
                ),
            ));
        }
        if !msg_id.is_valid(self.config.highest_valid_msg_id) {
            return Err((
                Status::BadArgument,
                EventId::TransmitInvalidMsgId,
                format!("Transmit Err:Invalid MsgId {msg_id}"),
            ));
        }
        Ok(msg_id)
    }

    // ─── Receive ─────────────────────────────────────────────────────────

    /// Dequeue the next message from a pipe, blocking per `timeout`.
    pub fn receive_buffer(&self, pipe: PipeId, timeout: ReceiveTimeout) -> Result<Buffer, Status> {
        // Clone the queue endpoint under the lock, then block outside it.
        let rx: Receiver<Buffer> = {
            let mut guard = self.shared_lock();
            let sh = &mut *guard;
            match sh.pipes.get(pipe) {
                Some(desc) => desc.rx.clone(),
                None => {
                    sh.hk.msg_receive_error_counter += 1;
                    drop(guard);
                    self.events.emit(
                        EventId::ReceiveBadArg,
                        Severity::Error,
                        format!("Rcv Err:Bad pipe id {pipe}"),
                    );
                    return Err(Status::BadArgument);
                }
            }
        };

        let received = match timeout {
            ReceiveTimeout::PendForever => rx.recv().map_err(|_| Status::PipeReadErr),
            ReceiveTimeout::Poll => rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => Status::TimeOut,
                TryRecvError::Disconnected => Status::PipeReadErr,
            }),
            ReceiveTimeout::Millis(ms) => rx
                .recv_timeout(Duration::from_millis(ms as u64))
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => Status::TimeOut,
                    RecvTimeoutError::Disconnected => Status::PipeReadErr,
                }),
        };

        match received {
            Ok(buffer) => {
                let mut guard = self.shared_lock();
                let sh = &mut *guard;
                match sh.pipes.get_mut(pipe) {
                    Some(desc) => {
                        desc.note_dequeue();
                        // Release this message's charge against the
                        // destination's concurrent-count limit.
                        if let Ok(msg_id) = buffer.msg_id() {
                            if let Some(route) = sh.routes.route_id(msg_id) {
                                if let Some(dest) = sh.routes.dest_mut(route, pipe) {
                                    dest.msg_count_current =
                                        dest.msg_count_current.saturating_sub(1);
                                }
                            }
                        }
                        Ok(buffer)
                    }
                    // Pipe deleted while we blocked; drop the message.
                    None => Err(Status::PipeReadErr),
                }
            }
            Err(Status::TimeOut) => Err(Status::TimeOut),
            Err(status) => {
                self.shared_lock().hk.msg_receive_error_counter += 1;
                self.events.emit(
                    EventId::PipeReadErr,
                    Severity::Error,
                    format!("Rcv Err:pipe {pipe} read failed"),
                );
                Err(status)
            }
        }
    }

    // ─── Counters & Reporting Flags ──────────────────────────────────────

    /// Snapshot of the housekeeping counters.
    pub fn hk_counters(&self) -> HkCounters {
        self.shared_lock().hk.clone()
    }

    /// Zero the housekeeping counters (the ground reset command).
    pub fn reset_counters(&self) {
        self.shared_lock().hk.reset();
    }

    /// Enable or disable per-subscription report packets.
    pub fn set_subscription_reporting(&self, enabled: bool) {
        self.shared_lock().sub_reporting = enabled;
    }

    pub fn subscription_reporting(&self) -> bool {
        self.shared_lock().sub_reporting
    }

    pub(crate) fn note_command_ok(&self) {
        self.shared_lock().hk.command_counter += 1;
    }

    pub(crate) fn note_command_error(&self) {
        self.shared_lock().hk.command_error_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softbus_msg::ccsds;

    fn bus() -> SoftBus {
        SoftBus::new(Config::default())
    }

    fn packet(msg_id: u16, len: usize) -> Vec<u8> {
        let mut msg = vec![0u8; len];
        ccsds::init(&mut msg, MsgId::new(msg_id), len).unwrap();
        msg
    }

    #[test]
    fn transmit_without_subscribers_counts_silently() {
        let b = bus();
        let app = b.register_app("PUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        let msg = packet(0x1000, 32);
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::NoSubscribers));
        assert_eq!(b.hk_counters().no_subscribers_counter, 1);
        assert_eq!(b.pipe_info(pipe).unwrap().current_depth, 0);
    }

    #[test]
    fn publish_subscribe_roundtrip_in_order() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();

        for i in 0..3u8 {
            let mut msg = packet(0x1000, 32);
            msg[16] = i;
            b.transmit_msg(&msg, true).unwrap();
        }
        for i in 0..3u8 {
            let buf = b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
            assert_eq!(buf[16], i);
        }
        assert_eq!(
            b.receive_buffer(pipe, ReceiveTimeout::Poll).err(),
            Some(Status::TimeOut)
        );
    }

    #[test]
    fn sequence_counter_stamped_per_route() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();

        for expected in 1..=3u16 {
            let msg = packet(0x1000, 32);
            b.transmit_msg(&msg, true).unwrap();
            let buf = b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
            assert_eq!(ccsds::sequence_count(&buf).unwrap(), expected);
        }

        // sequence untouched when increment is off
        let mut msg = packet(0x1000, 32);
        ccsds::set_sequence_count(&mut msg, 0x0AAA).unwrap();
        b.transmit_msg(&msg, false).unwrap();
        let buf = b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
        assert_eq!(ccsds::sequence_count(&buf).unwrap(), 0x0AAA);
    }

    #[test]
    fn duplicate_subscribe_is_idempotent_and_counted() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        assert_eq!(b.hk_counters().duplicate_subscriptions_counter, 1);
        assert_eq!(b.dest_count(MsgId::new(0x1000)), 1);
    }

    #[test]
    fn queue_overflow_rolls_back_and_counts() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 2, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();

        let msg = packet(0x1000, 32);
        b.transmit_msg(&msg, true).unwrap();
        b.transmit_msg(&msg, true).unwrap();
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::QFull));

        let hk = b.hk_counters();
        assert_eq!(hk.pipe_overflow_error_counter, 1);
        let info = b.pipe_info(pipe).unwrap();
        assert_eq!(info.send_errors, 1);
        assert_eq!(info.current_depth, 2);
        assert_eq!(info.peak_depth, 2);
    }

    #[test]
    fn msg_limit_skips_destination() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe_ex(MsgId::new(0x1000), pipe, Qos::default(), 1).unwrap();

        let msg = packet(0x1000, 32);
        b.transmit_msg(&msg, true).unwrap();
        // limit of 1 in flight: second transmit is skipped
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::MsgLimitErr));
        assert_eq!(b.hk_counters().msg_limit_error_counter, 1);
        assert_eq!(b.pipe_info(pipe).unwrap().current_depth, 1);

        // receiving releases the charge
        b.receive_buffer(pipe, ReceiveTimeout::Poll).unwrap();
        b.transmit_msg(&msg, true).unwrap();
    }

    #[test]
    fn disable_enable_route() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();

        b.disable_route(MsgId::new(0x1000), pipe).unwrap();
        let msg = packet(0x1000, 32);
        b.transmit_msg(&msg, true).unwrap();
        assert_eq!(b.pipe_info(pipe).unwrap().current_depth, 0);

        b.enable_route(MsgId::new(0x1000), pipe).unwrap();
        b.transmit_msg(&msg, true).unwrap();
        assert_eq!(b.pipe_info(pipe).unwrap().current_depth, 1);
        assert_eq!(b.hk_counters().command_counter, 2);
    }

    #[test]
    fn enable_route_missing_counts_error_once() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        assert_eq!(
            b.enable_route(MsgId::new(0x1000), pipe),
            Err(Status::BadArgument)
        );
        assert_eq!(b.hk_counters().command_error_counter, 1);
    }

    #[test]
    fn delete_pipe_cascades_unsubscribes() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.subscribe(MsgId::new(0x1000), pipe).unwrap();
        b.subscribe(MsgId::new(0x2000), pipe).unwrap();

        b.delete_pipe(pipe, app).unwrap();
        assert_eq!(b.dest_count(MsgId::new(0x1000)), 0);
        assert_eq!(b.dest_count(MsgId::new(0x2000)), 0);

        let msg = packet(0x1000, 32);
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::NoSubscribers));
    }

    #[test]
    fn delete_pipe_requires_owner() {
        let b = bus();
        let owner = b.register_app("OWNER");
        let other = b.register_app("OTHER");
        let pipe = b.create_pipe(owner, 8, "P").unwrap();
        assert_eq!(b.delete_pipe(pipe, other), Err(Status::BadArgument));
        b.delete_pipe_forced(pipe).unwrap();
        assert!(b.pipe_info(pipe).is_err());
    }

    #[test]
    fn stale_pipe_handle_rejected() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "P").unwrap();
        b.delete_pipe(pipe, app).unwrap();
        assert_eq!(
            b.receive_buffer(pipe, ReceiveTimeout::Poll).err(),
            Some(Status::BadArgument)
        );
        assert_eq!(b.subscribe(MsgId::new(0x1000), pipe), Err(Status::BadArgument));
        assert_eq!(b.hk_counters().msg_receive_error_counter, 1);
    }

    #[test]
    fn transmit_validations() {
        let b = bus();
        assert_eq!(b.transmit_msg(&[0u8; 3], true), Err(Status::BadArgument));

        // header claims a different size than the buffer
        let mut msg = packet(0x1000, 32);
        ccsds::set_size(&mut msg, 64).unwrap();
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::BadArgument));

        // invalid message id
        let msg = packet(0x3000, 32);
        assert_eq!(b.transmit_msg(&msg, true), Err(Status::BadArgument));

        assert_eq!(b.hk_counters().msg_send_error_counter, 3);
    }

    #[test]
    fn pipe_accessors() {
        let b = bus();
        let app = b.register_app("SUB");
        let pipe = b.create_pipe(app, 8, "NAMED").unwrap();
        assert_eq!(b.get_pipe_name(pipe).unwrap(), "NAMED");
        assert_eq!(b.get_pipe_id_by_name("NAMED").unwrap(), pipe);
        b.set_pipe_opts(pipe, 0x02).unwrap();
        assert_eq!(b.get_pipe_opts(pipe).unwrap(), 0x02);
        assert_eq!(b.get_pipe_id_by_name("NOPE").err(), Some(Status::BadArgument));
    }

    #[test]
    fn fanout_order_matches_subscription_order() {
        let b = bus();
        let app = b.register_app("SUB");
        let p1 = b.create_pipe(app, 8, "P1").unwrap();
        let p2 = b.create_pipe(app, 8, "P2").unwrap();
        b.subscribe(MsgId::new(0x1000), p1).unwrap();
        b.subscribe(MsgId::new(0x1000), p2).unwrap();

        let msg = packet(0x1000, 32);
        b.transmit_msg(&msg, true).unwrap();
        // both got a clone of the same buffer
        let b1 = b.receive_buffer(p1, ReceiveTimeout::Poll).unwrap();
        let b2 = b.receive_buffer(p2, ReceiveTimeout::Poll).unwrap();
        assert_eq!(&b1[..], &b2[..]);
        // pool holds one allocation while clones are alive
        assert_eq!(b.pool().bufs_in_use(), 1);
        drop(b1);
        drop(b2);
        assert_eq!(b.pool().bufs_in_use(), 0);
    }
}

//! Bus events.
//!
//! Every noteworthy bus action raises a numbered event through an
//! [`EventSink`]. The default sink forwards to `tracing`; ground systems or
//! tests install their own sink at bus construction. Binary event filtering
//! sits in front of the sink so chatty failure classes (queue-full storms,
//! message-limit storms) can be throttled per platform configuration.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// ─── Event Ids ───────────────────────────────────────────────────────────────

/// Bus event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventId {
    Init = 1,

    // pipe registry
    CreatePipeBadArg = 2,
    MaxPipesMet = 3,
    CreatePipeNameTaken = 4,
    PipeAdded = 5,
    PipeDeleted = 6,
    DeletePipeBadArg = 7,
    DeletePipeOwner = 8,
    SetPipeOptsBadArg = 9,
    SetPipeOpts = 10,
    GetPipeOptsBadArg = 11,
    GetPipeNameBadArg = 12,
    GetPipeIdByNameBadArg = 13,

    // routing table
    SubscriptionRcvd = 14,
    SubscribeBadArg = 15,
    MaxMsgsMet = 16,
    MaxDestsMet = 17,
    DuplicateSubscription = 18,
    SubscriptionRemoved = 19,
    UnsubscribeBadArg = 20,
    SubscriptionRptSent = 21,
    EnableRouteNoRoute = 22,
    EnableRouteOk = 23,
    EnableRouteBadParam = 24,
    DisableRouteNoRoute = 25,
    DisableRouteOk = 26,
    DisableRouteBadParam = 27,

    // dispatch
    TransmitBadArg = 28,
    TransmitInvalidMsgId = 29,
    MsgTooBig = 30,
    BufAllocErr = 31,
    MsgIdLimErr = 32,
    QFullErr = 33,
    TransmitFailed = 34,
    ReceiveBadArg = 35,
    PipeReadErr = 36,

    // command task
    Noop = 37,
    ResetCounters = 38,
    SendStats = 39,
    BadCmdCode = 40,
    BadMsgId = 41,
    LenErr = 42,

    // reporting
    DumpFileCreateErr = 43,
    FileWriteErr = 44,
    DumpWritten = 45,
    FullSubPkt = 46,
    PartSubPkt = 47,
}

/// Event severity, mapped onto `tracing` levels by the default sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Error,
}

/// A fully formatted bus event.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub severity: Severity,
    pub text: String,
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Destination for bus events. Implementations must not call back into the
/// bus. Events are emitted outside the shared lock precisely so sinks can
/// do I/O, but a reentrant bus call from a sink would still deadlock the
/// emitting operation's own pipeline.
pub trait EventSink: Send + Sync {
    fn send(&self, event: &Event);
}

/// Default sink: forwards events to `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&self, event: &Event) {
        match event.severity {
            Severity::Debug => tracing::debug!(event_id = ?event.id, "{}", event.text),
            Severity::Info => tracing::info!(event_id = ?event.id, "{}", event.text),
            Severity::Error => tracing::error!(event_id = ?event.id, "{}", event.text),
        }
    }
}

/// Sink that records every event; for tests and ground replay.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<Event>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything captured so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *lock_recover(&self.events))
    }

    /// Number of captured events with the given id.
    pub fn count(&self, id: EventId) -> usize {
        lock_recover(&self.events)
            .iter()
            .filter(|e| e.id == id)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn send(&self, event: &Event) {
        lock_recover(&self.events).push(event.clone());
    }
}

// ─── Binary Filtering ────────────────────────────────────────────────────────

/// Filter mask: never filter.
pub const FILTER_NO_FILTER: u16 = 0x0000;
/// Filter mask: emit the first occurrence, drop the rest.
pub const FILTER_FIRST_ONE_STOP: u16 = 0xFFFF;
/// Filter mask: emit the first two occurrences, drop the rest.
pub const FILTER_FIRST_TWO_STOP: u16 = 0xFFFE;
/// Filter mask: emit every other occurrence.
pub const FILTER_EVERY_OTHER_ONE: u16 = 0x0001;

/// One configured event filter registration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EventFilter {
    pub event_id: EventId,
    pub mask: u16,
}

impl EventFilter {
    /// The platform default: throttle the two dispatch-path failure storms
    /// to their first occurrence.
    pub fn platform_defaults() -> Vec<EventFilter> {
        vec![
            EventFilter {
                event_id: EventId::MsgIdLimErr,
                mask: FILTER_FIRST_ONE_STOP,
            },
            EventFilter {
                event_id: EventId::QFullErr,
                mask: FILTER_FIRST_ONE_STOP,
            },
        ]
    }
}

struct FilterState {
    id: EventId,
    mask: u16,
    count: u16,
}

/// Applies binary filters, then forwards to the installed sink.
pub(crate) struct EventDispatcher {
    sink: Box<dyn EventSink>,
    filters: Mutex<Vec<FilterState>>,
}

impl EventDispatcher {
    pub(crate) fn new(sink: Box<dyn EventSink>) -> Self {
        EventDispatcher {
            sink,
            filters: Mutex::new(Vec::new()),
        }
    }

    /// Register filters, honoring at most `max` registrations.
    /// Returns how many were registered.
    pub(crate) fn register_filters(&self, filters: &[EventFilter], max: usize) -> usize {
        let mut state = lock_recover(&self.filters);
        state.clear();
        for f in filters.iter().take(max) {
            state.push(FilterState {
                id: f.event_id,
                mask: f.mask,
                count: 0,
            });
        }
        state.len()
    }

    /// Emit an event unless a registered filter suppresses it.
    pub(crate) fn emit(&self, id: EventId, severity: Severity, text: String) {
        {
            let mut state = lock_recover(&self.filters);
            if let Some(f) = state.iter_mut().find(|f| f.id == id) {
                let suppressed = f.count & f.mask != 0;
                f.count = f.count.saturating_add(1);
                if suppressed {
                    return;
                }
            }
        }
        self.sink.send(&Event { id, severity, text });
    }
}

/// Lock a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock_recover<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Shared(Arc<CaptureSink>);
    impl EventSink for Shared {
        fn send(&self, event: &Event) {
            self.0.send(event);
        }
    }

    fn dispatcher_with_capture() -> (EventDispatcher, Arc<CaptureSink>) {
        let capture = Arc::new(CaptureSink::new());
        (
            EventDispatcher::new(Box::new(Shared(capture.clone()))),
            capture,
        )
    }

    #[test]
    fn unfiltered_events_pass_through() {
        let (d, cap) = dispatcher_with_capture();
        d.emit(EventId::Noop, Severity::Info, "hello".into());
        d.emit(EventId::Noop, Severity::Info, "again".into());
        assert_eq!(cap.count(EventId::Noop), 2);
    }

    #[test]
    fn first_one_stop_suppresses_repeats() {
        let (d, cap) = dispatcher_with_capture();
        d.register_filters(
            &[EventFilter {
                event_id: EventId::QFullErr,
                mask: FILTER_FIRST_ONE_STOP,
            }],
            8,
        );
        for _ in 0..5 {
            d.emit(EventId::QFullErr, Severity::Error, "full".into());
        }
        assert_eq!(cap.count(EventId::QFullErr), 1);
    }

    #[test]
    fn every_other_one_alternates() {
        let (d, cap) = dispatcher_with_capture();
        d.register_filters(
            &[EventFilter {
                event_id: EventId::MsgIdLimErr,
                mask: FILTER_EVERY_OTHER_ONE,
            }],
            8,
        );
        for _ in 0..6 {
            d.emit(EventId::MsgIdLimErr, Severity::Error, "lim".into());
        }
        assert_eq!(cap.count(EventId::MsgIdLimErr), 3);
    }

    #[test]
    fn registrations_are_capped() {
        let (d, _cap) = dispatcher_with_capture();
        let filters = vec![
            EventFilter {
                event_id: EventId::QFullErr,
                mask: FILTER_NO_FILTER,
            };
            12
        ];
        assert_eq!(d.register_filters(&filters, 8), 8);
    }
}

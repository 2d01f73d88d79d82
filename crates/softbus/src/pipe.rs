//! # Pipe Registry
//!
//! Fixed-capacity table of pipe descriptors. A pipe is a bounded in-process
//! queue owned by one application; its handle combines a slot index with a
//! generation counter so handles left over from a deleted pipe fail
//! validation instead of touching the slot's new tenant.

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use softbus_msg::MsgId;

use crate::pool::Buffer;

/// Longest pipe name accepted (including none of the NUL padding used on the
/// wire).
pub const MAX_PIPE_NAME_LEN: usize = 20;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Owning-application identifier, assigned by [`crate::SoftBus::register_app`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AppId(pub(crate) u32);

impl AppId {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Pipe handle: slot index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PipeId {
    index: u16,
    generation: u16,
}

impl PipeId {
    /// Pack into the single word carried by commands and file dumps.
    pub fn value(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    /// Unpack a wire value back into a handle.
    pub fn from_value(value: u32) -> Self {
        PipeId {
            index: value as u16,
            generation: (value >> 16) as u16,
        }
    }
}

impl std::fmt::Display for PipeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Per-pipe opts bit: reserved, no semantics attached yet.
pub const PIPE_OPTS_NONE: u8 = 0;

pub(crate) struct PipeDescriptor {
    pub pipe_id: PipeId,
    pub app_id: AppId,
    pub name: String,
    pub opts: u8,
    pub tx: Sender<Buffer>,
    pub rx: Receiver<Buffer>,
    pub queue_depth: u16,
    pub current_depth: u16,
    pub peak_depth: u16,
    pub send_errors: u16,
    /// Reverse index: message ids this pipe is subscribed to, for O(subs)
    /// cascade unsubscribe on delete.
    pub subscriptions: Vec<MsgId>,
}

impl PipeDescriptor {
    pub(crate) fn note_enqueue(&mut self) {
        self.current_depth = self.current_depth.saturating_add(1);
        self.peak_depth = self.peak_depth.max(self.current_depth);
    }

    pub(crate) fn note_dequeue(&mut self) {
        self.current_depth = self.current_depth.saturating_sub(1);
    }
}

/// Public snapshot of one pipe's state.
#[derive(Debug, Clone, Serialize)]
pub struct PipeInfo {
    pub pipe_id: PipeId,
    pub app_id: AppId,
    pub name: String,
    pub opts: u8,
    pub queue_depth: u16,
    pub current_depth: u16,
    pub peak_depth: u16,
    pub send_errors: u16,
}

// ─── Table ───────────────────────────────────────────────────────────────────

struct Slot {
    generation: u16,
    desc: Option<PipeDescriptor>,
}

pub(crate) struct PipeTable {
    slots: Vec<Slot>,
    in_use: usize,
    peak_in_use: usize,
}

pub(crate) enum CreateError {
    TableFull,
    NameTaken,
}

impl PipeTable {
    pub(crate) fn new(max_pipes: usize) -> Self {
        let mut slots = Vec::with_capacity(max_pipes);
        for _ in 0..max_pipes {
            slots.push(Slot {
                generation: 0,
                desc: None,
            });
        }
        PipeTable {
            slots,
            in_use: 0,
            peak_in_use: 0,
        }
    }

    /// Allocate a free slot and create the pipe queue.
    pub(crate) fn create(
        &mut self,
        app_id: AppId,
        depth: u16,
        name: &str,
    ) -> Result<PipeId, CreateError> {
        if self.find_by_name(name).is_some() {
            return Err(CreateError::NameTaken);
        }
        let index = self
            .slots
            .iter()
            .position(|s| s.desc.is_none())
            .ok_or(CreateError::TableFull)?;

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let pipe_id = PipeId {
            index: index as u16,
            generation: slot.generation,
        };
        let (tx, rx) = bounded(depth as usize);
        slot.desc = Some(PipeDescriptor {
            pipe_id,
            app_id,
            name: name.to_owned(),
            opts: PIPE_OPTS_NONE,
            tx,
            rx,
            queue_depth: depth,
            current_depth: 0,
            peak_depth: 0,
            send_errors: 0,
            subscriptions: Vec::new(),
        });
        self.in_use += 1;
        self.peak_in_use = self.peak_in_use.max(self.in_use);
        Ok(pipe_id)
    }

    /// Remove the descriptor, returning it so the caller can cascade
    /// unsubscribe. The slot keeps its bumped generation, so the old handle
    /// no longer matches.
    pub(crate) fn delete(&mut self, id: PipeId) -> Option<PipeDescriptor> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match &slot.desc {
            Some(desc) if desc.pipe_id == id => {
                self.in_use -= 1;
                slot.desc.take()
            }
            _ => None,
        }
    }

    /// Validate a handle and fetch its descriptor: the slot must be in use
    /// and the generation must match.
    pub(crate) fn get(&self, id: PipeId) -> Option<&PipeDescriptor> {
        self.slots
            .get(id.index as usize)?
            .desc
            .as_ref()
            .filter(|d| d.pipe_id == id)
    }

    pub(crate) fn get_mut(&mut self, id: PipeId) -> Option<&mut PipeDescriptor> {
        self.slots
            .get_mut(id.index as usize)?
            .desc
            .as_mut()
            .filter(|d| d.pipe_id == id)
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<PipeId> {
        self.iter_used().find(|d| d.name == name).map(|d| d.pipe_id)
    }

    pub(crate) fn iter_used(&self) -> impl Iterator<Item = &PipeDescriptor> {
        self.slots.iter().filter_map(|s| s.desc.as_ref())
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    pub(crate) fn peak_in_use(&self) -> usize {
        self.peak_in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PipeTable {
        PipeTable::new(4)
    }

    #[test]
    fn create_and_lookup() {
        let mut t = table();
        let id = t.create(AppId(1), 8, "TEST").ok().unwrap();
        assert_eq!(t.get(id).unwrap().name, "TEST");
        assert_eq!(t.in_use(), 1);
        assert_eq!(t.find_by_name("TEST"), Some(id));
    }

    #[test]
    fn stale_handle_fails_after_delete() {
        let mut t = table();
        let id = t.create(AppId(1), 8, "A").ok().unwrap();
        assert!(t.delete(id).is_some());
        assert!(t.get(id).is_none());

        // slot reuse gets a fresh generation
        let id2 = t.create(AppId(1), 8, "B").ok().unwrap();
        assert_ne!(id.value(), id2.value());
        assert!(t.get(id).is_none());
        assert!(t.get(id2).is_some());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut t = table();
        t.create(AppId(1), 8, "DUP").ok().unwrap();
        assert!(matches!(
            t.create(AppId(2), 8, "DUP"),
            Err(CreateError::NameTaken)
        ));
    }

    #[test]
    fn table_capacity_enforced() {
        let mut t = table();
        for i in 0..4 {
            t.create(AppId(1), 2, &format!("P{i}")).ok().unwrap();
        }
        assert!(matches!(
            t.create(AppId(1), 2, "OVER"),
            Err(CreateError::TableFull)
        ));
        assert_eq!(t.peak_in_use(), 4);
    }

    #[test]
    fn depth_accounting_tracks_peak() {
        let mut t = table();
        let id = t.create(AppId(1), 8, "D").ok().unwrap();
        let d = t.get_mut(id).unwrap();
        d.note_enqueue();
        d.note_enqueue();
        d.note_dequeue();
        assert_eq!(d.current_depth, 1);
        assert_eq!(d.peak_depth, 2);
    }

    #[test]
    fn pipe_id_wire_roundtrip() {
        let id = PipeId {
            index: 5,
            generation: 3,
        };
        assert_eq!(PipeId::from_value(id.value()), id);
    }
}

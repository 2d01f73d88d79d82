//! Message identifiers.
//!
//! A `MsgId` is the topic identifier routed by the software bus. Under the
//! default scheme it maps one-to-one onto the 16-bit CCSDS stream id, so the
//! command/telemetry type bit and the secondary-header bit are part of the
//! identifier value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic identifier carried in the CCSDS primary header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(u16);

impl MsgId {
    /// Reserved sentinel, never routable.
    pub const INVALID: MsgId = MsgId(0xFFFF);

    /// Wrap a raw message id value.
    #[inline]
    pub const fn new(value: u16) -> Self {
        MsgId(value)
    }

    /// The underlying numeric value.
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Whether this id may be subscribed to or transmitted.
    ///
    /// `highest_valid` comes from the platform configuration.
    #[inline]
    pub fn is_valid(self, highest_valid: u16) -> bool {
        self != Self::INVALID && self.0 <= highest_valid
    }

    /// Map a wire stream id to a message id (identity under the default scheme).
    #[inline]
    pub const fn from_stream_id(stream_id: u16) -> Self {
        MsgId(stream_id)
    }

    /// Map this message id to its wire stream id.
    #[inline]
    pub const fn to_stream_id(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgId(0x{:04X})", self.0)
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

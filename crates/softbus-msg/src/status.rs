//! Status codes shared across the software bus.

use thiserror::Error;

/// Errors surfaced by the bus core and the message codecs.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Malformed input: short buffer, out-of-range field value, stale handle.
    #[error("bad argument")]
    BadArgument,
    /// Message larger than the maximum CCSDS packet.
    #[error("message too big")]
    MsgTooBig,
    /// No route exists for the transmitted message id.
    #[error("no subscribers")]
    NoSubscribers,
    /// The (message id, pipe) destination already exists.
    #[error("duplicate subscription")]
    DuplicateSubscription,
    /// The routing table already holds the maximum number of message ids.
    #[error("message id table full")]
    MaxMsgsMet,
    /// The route already holds the maximum number of destinations.
    #[error("destination list full")]
    MaxDestsMet,
    /// The pipe table is full.
    #[error("pipe table full")]
    MaxPipesMet,
    /// Pipe creation failed (bad depth or duplicate name).
    #[error("pipe creation failed")]
    PipeCreateErr,
    /// The pipe queue failed during receive.
    #[error("pipe read error")]
    PipeReadErr,
    /// A destination was skipped because its message count limit was reached.
    #[error("message limit reached")]
    MsgLimitErr,
    /// A destination was skipped because its pipe queue was full.
    #[error("pipe queue full")]
    QFull,
    /// The buffer pool budget is exhausted.
    #[error("buffer allocation failed")]
    BufAllocErr,
    /// Inconsistent internal state.
    #[error("internal error")]
    InternalErr,
    /// A dump file could not be created or fully written.
    #[error("file I/O error")]
    FileIoErr,
    /// A timed or polling receive found no message.
    #[error("timed out")]
    TimeOut,
}

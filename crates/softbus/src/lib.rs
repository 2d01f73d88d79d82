//! # softbus
//!
//! In-process, many-to-many publish/subscribe message router for a
//! flight-software executive. Applications transmit fixed-format packets
//! identified by a numeric message id; the bus routes each packet to every
//! pipe whose owner subscribed to that id, applying per-destination
//! filtering and per-pipe bounded queueing.
//!
//! ## Crate structure
//!
//! - [`bus`] — the [`SoftBus`] aggregate: transmit/receive, subscriptions
//! - [`pipe`] — pipe registry: bounded queues with generation-checked handles
//! - [`route`] — routing table: message id → destination list
//! - [`pool`] — byte-accounted refcounted buffer pool
//! - [`task`] — the command task consuming the bus's own command pipe
//! - [`report`] — housekeeping/statistics telemetry and file dumps
//! - [`telemetry`] — telemetry payload codecs
//! - [`cmd`] — command packet codecs
//! - [`events`] — numbered events, binary filtering, sink seam
//! - [`config`] — platform configuration

pub mod bus;
pub mod cmd;
pub mod config;
pub mod events;
pub mod pipe;
pub mod pool;
pub mod report;
pub mod route;
pub mod task;
pub mod telemetry;

pub use bus::{ReceiveTimeout, SoftBus};
pub use config::Config;
pub use pipe::{AppId, PipeId, PipeInfo};
pub use pool::Buffer;
pub use route::{Qos, RouteId, Scope};
pub use softbus_msg::{MsgId, Status};
pub use task::{CommandTask, RunStatus};

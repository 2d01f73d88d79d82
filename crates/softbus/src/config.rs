//! Bus configuration.
//!
//! Every capacity table in the bus is sized from [`Config`] at construction
//! and never grows. The defaults mirror a small single-node deployment; a
//! mission overrides them by deserializing a config file into [`Config`].

use serde::Deserialize;
use softbus_msg::MsgId;

use crate::events::EventFilter;

/// Bus platform configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum distinct message ids the routing table can hold.
    pub max_msg_ids: usize,
    /// Maximum pipes in the pipe table.
    pub max_pipes: usize,
    /// Maximum destinations on one route.
    pub max_dest_per_msg_id: usize,
    /// Maximum depth a pipe queue may be created with.
    pub max_queue_depth: u16,
    /// Buffer pool budget in bytes.
    pub buf_memory_bytes: usize,
    /// Default per-destination message count limit applied by `subscribe`.
    pub default_msg_limit: u16,
    /// Highest routable message id value.
    pub highest_valid_msg_id: u16,
    /// Entries per segment of the prior-subscriptions replay.
    pub sub_entries_per_pkt: usize,
    /// Depth of the bus's own command pipe.
    pub cmd_pipe_depth: u16,
    /// Name of the bus's own command pipe.
    pub cmd_pipe_name: String,
    /// Maximum event filter registrations honored.
    pub max_event_filters: usize,
    /// Event filters applied at bus construction.
    pub filtered_events: Vec<EventFilter>,
    /// Fallback filename for the routing dump command.
    pub default_routing_filename: String,
    /// Fallback filename for the pipe dump command.
    pub default_pipe_filename: String,
    /// Fallback filename for the message map dump command.
    pub default_map_filename: String,
    /// Message ids the bus itself consumes and produces.
    pub msg_ids: BusMsgIds,
}

/// The bus's own command and telemetry message ids.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BusMsgIds {
    pub cmd: MsgId,
    pub send_hk: MsgId,
    pub sub_rpt_ctrl: MsgId,
    pub hk_tlm: MsgId,
    pub stats_tlm: MsgId,
    pub allsubs_tlm: MsgId,
    pub onesub_tlm: MsgId,
}

impl Default for BusMsgIds {
    fn default() -> Self {
        BusMsgIds {
            cmd: MsgId::new(0x1803),
            send_hk: MsgId::new(0x180B),
            sub_rpt_ctrl: MsgId::new(0x180E),
            hk_tlm: MsgId::new(0x0803),
            stats_tlm: MsgId::new(0x080A),
            allsubs_tlm: MsgId::new(0x080D),
            onesub_tlm: MsgId::new(0x080E),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_msg_ids: 256,
            max_pipes: 64,
            max_dest_per_msg_id: 16,
            max_queue_depth: 64,
            buf_memory_bytes: 524_288,
            default_msg_limit: 4,
            highest_valid_msg_id: 0x1FFF,
            sub_entries_per_pkt: 20,
            cmd_pipe_depth: 32,
            cmd_pipe_name: "SB_CMD_PIPE".into(),
            max_event_filters: 8,
            filtered_events: EventFilter::platform_defaults(),
            default_routing_filename: "sb_routes.dat".into(),
            default_pipe_filename: "sb_pipes.dat".into(),
            default_map_filename: "sb_msgmap.dat".into(),
            msg_ids: BusMsgIds::default(),
        }
    }
}

impl Config {
    /// Total subscriptions the bus can hold.
    pub fn max_subscriptions(&self) -> usize {
        self.max_msg_ids * self.max_dest_per_msg_id
    }
}

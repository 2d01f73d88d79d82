//! # Command Task
//!
//! The single dedicated consumer of the bus's own command pipe. It decodes
//! function codes, validates command lengths, mutates the routing and pipe
//! tables, and emits telemetry. Only two conditions are fatal: failed
//! initialization and an unrecoverable command-pipe receive error; every
//! other error is reported and the task keeps running.

use softbus_msg::{ccsds, sechdr, Status};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::bus::{ReceiveTimeout, SoftBus};
use crate::cmd::{
    RouteCmd, WriteFileCmd, BARE_CMD_LEN, DISABLE_ROUTE_CC, DISABLE_SUB_REPORTING_CC,
    ENABLE_ROUTE_CC, ENABLE_SUB_REPORTING_CC, NOOP_CC, RESET_COUNTERS_CC, ROUTE_CMD_LEN,
    SEND_PREV_SUBS_CC, SEND_SB_STATS_CC, WRITE_FILE_CMD_LEN, WRITE_MAP_INFO_CC,
    WRITE_PIPE_INFO_CC, WRITE_ROUTING_INFO_CC,
};
use crate::events::{EventId, Severity};
use crate::pipe::PipeId;
use crate::report;

/// Pool block reserved at init so a ground reset command can always be
/// buffered, whatever state the pool is in by then.
const RESTART_CMD_RESERVE: usize = sechdr::CMD_HDR_LEN + 2;

/// How the task's execution context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Initialization failed; the executive should treat this as fatal.
    InitError,
    /// The command pipe receive failed unrecoverably.
    RuntimeError,
}

/// The bus command task: owns the command pipe and dispatches every packet
/// that arrives on it.
pub struct CommandTask {
    bus: Arc<SoftBus>,
    cmd_pipe: PipeId,
    exec_count: u64,
}

impl CommandTask {
    /// Initialize the task: create the command pipe, subscribe it to the
    /// bus's command and control ids, and warm the buffer pool.
    pub fn attach(bus: Arc<SoftBus>) -> Result<CommandTask, Status> {
        let app = bus.register_app("SB");
        let (depth, name, ids) = {
            let cfg = bus.config();
            (cfg.cmd_pipe_depth, cfg.cmd_pipe_name.clone(), cfg.msg_ids)
        };

        let cmd_pipe = bus.create_pipe(app, depth, &name).map_err(|status| {
            tracing::error!(?status, "SB init: command pipe creation failed");
            status
        })?;
        for mid in [ids.cmd, ids.send_hk, ids.sub_rpt_ctrl] {
            bus.subscribe(mid, cmd_pipe).map_err(|status| {
                tracing::error!(?status, %mid, "SB init: command pipe subscribe failed");
                status
            })?;
        }

        // Reserve-and-release a restart-command-sized block so the pool has
        // demonstrated room for a ground reset before anything else fills it.
        bus.pool()
            .allocate(&[0u8; RESTART_CMD_RESERVE])
            .map_err(|status| {
                tracing::error!(?status, "SB init: pool reserve failed");
                status
            })?;

        bus.events().emit(
            EventId::Init,
            Severity::Info,
            format!("Software Bus initialized,version {}", env!("CARGO_PKG_VERSION")),
        );

        Ok(CommandTask {
            bus,
            cmd_pipe,
            exec_count: 0,
        })
    }

    /// The task's command pipe.
    pub fn cmd_pipe(&self) -> PipeId {
        self.cmd_pipe
    }

    /// Main-loop passes completed so far.
    pub fn exec_count(&self) -> u64 {
        self.exec_count
    }

    /// Consume the command pipe until receive fails unrecoverably.
    pub fn run(&mut self) -> RunStatus {
        loop {
            self.exec_count += 1;
            match self
                .bus
                .receive_buffer(self.cmd_pipe, ReceiveTimeout::PendForever)
            {
                Ok(buf) => self.process_cmd_pkt(&buf),
                Err(status) => {
                    tracing::error!(?status, "SB: error reading cmd pipe");
                    return RunStatus::RuntimeError;
                }
            }
        }
    }

    /// Initialize and run the task on a dedicated thread.
    pub fn spawn(bus: Arc<SoftBus>) -> std::io::Result<thread::JoinHandle<RunStatus>> {
        thread::Builder::new()
            .name("softbus-cmd".into())
            .spawn(move || match CommandTask::attach(bus) {
                Ok(mut task) => task.run(),
                Err(status) => {
                    tracing::error!(?status, "SB: application init failed");
                    RunStatus::InitError
                }
            })
    }

    /// Dispatch one command-pipe packet.
    pub fn process_cmd_pkt(&mut self, msg: &[u8]) {
        let Ok(msg_id) = ccsds::msg_id(msg) else {
            self.bus.note_command_error();
            return;
        };
        let ids = self.bus.config().msg_ids;

        if msg_id == ids.send_hk {
            // Command counter intentionally not incremented.
            let _ = report::send_hk_tlm(&self.bus);
            return;
        }

        if msg_id == ids.sub_rpt_ctrl {
            self.process_sub_rpt_ctrl(msg);
            return;
        }

        if msg_id == ids.cmd {
            self.process_cmd(msg);
            return;
        }

        self.bus.events().emit(
            EventId::BadMsgId,
            Severity::Error,
            format!("Invalid Cmd, Unexpected Msg Id {msg_id}"),
        );
        self.bus.note_command_error();
    }

    fn process_cmd(&mut self, msg: &[u8]) {
        let Some(fcn_code) = self.read_fcn_code(msg) else {
            return;
        };
        match fcn_code {
            NOOP_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    self.bus.events().emit(
                        EventId::Noop,
                        Severity::Info,
                        format!("No-op Cmd Rcvd,version {}", env!("CARGO_PKG_VERSION")),
                    );
                    self.bus.note_command_ok();
                }
            }
            RESET_COUNTERS_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    // Command counter intentionally not incremented.
                    self.bus.events().emit(
                        EventId::ResetCounters,
                        Severity::Debug,
                        "Reset Counters Cmd Rcvd".to_owned(),
                    );
                    self.bus.reset_counters();
                }
            }
            SEND_SB_STATS_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    let _ = report::send_stats(&self.bus);
                }
            }
            WRITE_ROUTING_INFO_CC => {
                if self.verify_cmd_length(msg, WRITE_FILE_CMD_LEN) {
                    let default = self.bus.config().default_routing_filename.clone();
                    self.write_info_cmd(msg, &default, report::write_routing_info);
                }
            }
            WRITE_PIPE_INFO_CC => {
                if self.verify_cmd_length(msg, WRITE_FILE_CMD_LEN) {
                    let default = self.bus.config().default_pipe_filename.clone();
                    self.write_info_cmd(msg, &default, report::write_pipe_info);
                }
            }
            WRITE_MAP_INFO_CC => {
                if self.verify_cmd_length(msg, WRITE_FILE_CMD_LEN) {
                    let default = self.bus.config().default_map_filename.clone();
                    self.write_info_cmd(msg, &default, report::write_map_info);
                }
            }
            ENABLE_ROUTE_CC => {
                if self.verify_cmd_length(msg, ROUTE_CMD_LEN) {
                    if let Ok(cmd) = RouteCmd::decode(msg) {
                        let _ = self.bus.enable_route(cmd.msg_id, cmd.pipe);
                    }
                }
            }
            DISABLE_ROUTE_CC => {
                if self.verify_cmd_length(msg, ROUTE_CMD_LEN) {
                    if let Ok(cmd) = RouteCmd::decode(msg) {
                        let _ = self.bus.disable_route(cmd.msg_id, cmd.pipe);
                    }
                }
            }
            other => self.bad_cmd_code(other),
        }
    }

    fn process_sub_rpt_ctrl(&mut self, msg: &[u8]) {
        let Some(fcn_code) = self.read_fcn_code(msg) else {
            return;
        };
        // Command counters intentionally not incremented on this id.
        match fcn_code {
            SEND_PREV_SUBS_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    let _ = report::send_prev_subs(&self.bus);
                }
            }
            ENABLE_SUB_REPORTING_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    self.bus.set_subscription_reporting(true);
                }
            }
            DISABLE_SUB_REPORTING_CC => {
                if self.verify_cmd_length(msg, BARE_CMD_LEN) {
                    self.bus.set_subscription_reporting(false);
                }
            }
            other => self.bad_cmd_code(other),
        }
    }

    fn read_fcn_code(&self, msg: &[u8]) -> Option<u8> {
        match sechdr::fcn_code(msg) {
            Ok(code) => Some(code),
            Err(_) => {
                self.bus.events().emit(
                    EventId::BadCmdCode,
                    Severity::Error,
                    "Invalid Cmd, no command code".to_owned(),
                );
                self.bus.note_command_error();
                None
            }
        }
    }

    fn bad_cmd_code(&self, fcn_code: u8) {
        self.bus.events().emit(
            EventId::BadCmdCode,
            Severity::Error,
            format!("Invalid Cmd, Unexpected Command Code {fcn_code}"),
        );
        self.bus.note_command_error();
    }

    fn verify_cmd_length(&self, msg: &[u8], expected: usize) -> bool {
        let actual = ccsds::size(msg).unwrap_or(0);
        if actual != expected {
            let msg_id = ccsds::msg_id(msg).unwrap_or(softbus_msg::MsgId::INVALID);
            let fcn_code = sechdr::fcn_code(msg).unwrap_or(0);
            self.bus.events().emit(
                EventId::LenErr,
                Severity::Error,
                format!(
                    "Invalid msg length: ID {msg_id}, CC {fcn_code}, Len {actual}, Expected {expected}"
                ),
            );
            self.bus.note_command_error();
            return false;
        }
        true
    }

    fn write_info_cmd(
        &self,
        msg: &[u8],
        default_filename: &str,
        writer: fn(&SoftBus, &Path) -> Result<(), Status>,
    ) {
        let filename = match WriteFileCmd::decode(msg) {
            Ok(cmd) if !cmd.filename.is_empty() => cmd.filename,
            _ => default_filename.to_owned(),
        };
        match writer(&self.bus, Path::new(&filename)) {
            Ok(()) => self.bus.note_command_ok(),
            Err(_) => self.bus.note_command_error(),
        }
    }
}

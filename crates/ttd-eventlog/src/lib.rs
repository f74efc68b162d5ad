//! Deterministic record/replay and time-travel debugging for a script
//! runtime.
//!
//! A script engine is only deterministic until it touches the outside
//! world: the clock, the random source, host functions, callbacks scheduled
//! by the embedder. This crate records every such interaction into an
//! [`EventLog`] at a logical event time, then replays the run by handing the
//! recorded values back in the same order. Periodic heap snapshots let a
//! debugger restore the nearest checkpoint and replay forward to any
//! top-level event instead of starting over.
//!
//! # Core Capabilities
//!
//! 1. **Recording:** every nondeterministic input becomes a log entry
//! 2. **Replay:** the same inputs come back, checked against the event clock
//! 3. **Checkpoints:** portable heap snapshots, inflated back into the host
//! 4. **Time-travel:** seek to any top-level event, step, break on positions
//! 5. **Persistence:** JSON or compact binary log streams
//!
//! # Example: Record, Persist, Replay
//!
//! ```no_run
//! use ttd_eventlog::{EventLog, EventLogConfig, ScriptHost, TtdMode};
//!
//! fn record<H: ScriptHost>(host: &mut H, ctx: ttd_eventlog::LogTag) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut log = EventLog::new(EventLogConfig::with_log_dir("ttd_log"));
//!     host.attach_mode(log.start_time_travel_on_script(ctx)?);
//!     log.set_global_mode(TtdMode::RECORD_ENABLED)?;
//!     log.init_for_ttd_record(host)?;
//!
//!     log.do_snapshot_extract(host, true)?;
//!     // the host calls log.record_* while the script runs
//!     log.emit_log()?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Time-Travel Debugging
//!
//! ```no_run
//! use ttd_eventlog::{load_event_log, Debugger, EventLogConfig, ScriptHost};
//!
//! fn debug<H: ScriptHost>(host: H) -> Result<(), Box<dyn std::error::Error>> {
//!     let log = load_event_log(EventLogConfig::with_log_dir("ttd_log"))?;
//!     let mut debugger = Debugger::new(log, host)?;
//!
//!     debugger.goto(0)?;
//!     let report = debugger.step_into()?;
//!     for hit in &report.hits {
//!         println!("{} @ {}", hit.function_name, hit.position);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Recording Phase                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  host engine ── record_*() ──→ EventLog                     │
//! │                                  │  entries in an arena    │
//! │  do_snapshot_extract() ──────────┤  at event time t, t+1.. │
//! │                                  ↓                          │
//! │                        emit_log() → ttdlog.json + snap_*.json│
//! └────────────────────────────────────────────────────────────┘
//!
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Replay Phase                          │
//! ├────────────────────────────────────────────────────────────┤
//! │  init_for_ttd_replay() → parse log, re-create property ids  │
//! │  do_snapshot_inflate(t) → heap restored, cursor at t        │
//! │  replay_action_loop_step() → host.execute_action()          │
//! │         ↑                          ↓                        │
//! │         └────── replay_*() ←── host re-enters the log       │
//! └────────────────────────────────────────────────────────────┘
//!
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Time-Travel Phase                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  Debugger::goto(t)                                          │
//! │  1. find checkpoint at or before t                          │
//! │  2. fresh script context if the inflate map is stale        │
//! │  3. inflate, then replay forward to t                       │
//! │                                                             │
//! │  breakpoint hit → pause handler → continue / step / abort   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`mode`]: TTD mode flags and the mode stack
//! - [`event_log`]: coordinator owning entries, modes and the call stack
//! - [`recording`] / [`replay`]: `record_*` and `replay_*` operations
//! - [`entry`] / [`arena`] / [`value`]: entry model and payload storage
//! - [`callstack`]: per-call counters for positions
//! - [`snapshot`] / [`checkpoint`]: heap capture, inflate, bodies on disk
//! - [`breakpoint`] / [`debugger`]: breakpoint evaluation and seek
//! - [`writer`] / [`serialize`]: log stream encoding
//! - [`host`]: traits the host engine implements

pub mod arena;
pub mod breakpoint;
pub mod callstack;
pub mod checkpoint;
pub mod config;
pub mod debugger;
pub mod entry;
pub mod error;
pub mod event_log;
pub mod host;
pub mod mode;
pub mod recording;
pub mod replay;
pub mod serialize;
pub mod snapshot;
pub mod value;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use breakpoint::{BreakpointDecision, BreakpointHit, Position, PreviousPosition, StepKind};
pub use checkpoint::{CheckpointInfo, CheckpointKind};
pub use config::{EventLogConfig, LogFormat};
pub use debugger::{
    Breakpoint, BreakpointId, DebugState, Debugger, DebuggerError, EventFilter,
    ExceptionBreakPolicy, RunReport, StopReason,
};
pub use entry::{ActionKind, EntryId, EntryKind, EventList, EventLogEntry};
pub use error::{AbortRequest, EventLogError, FatalError, HostError, PersistError};
pub use event_log::{EventLog, SnapTarget};
pub use host::{ReplayAction, ScriptHost, SnapshotHost, SourceInfo, StatementSpan};
pub use mode::{ModeMirror, TtdMode};
pub use replay::PropertyEnumStep;
pub use serialize::load_event_log;
pub use snapshot::{SnapShot, SnapshotExtractor};
pub use value::{
    BodyId, HostValue, IdentityTag, LogTag, PropertyAttributes, PropertyId, PropertyRecord,
};

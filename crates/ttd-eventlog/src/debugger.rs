//! Time-travel debugger: seek, stepping and a breakpoint table on top of a
//! replaying event log.
//!
//! The debugger owns the log and the host. Execution only ever stops at
//! top-level event boundaries; a hit inside a call, or an exception the
//! policy stops on, is handed to the pause handler, which decides whether
//! to keep running, step, or abort to an earlier time. An abort with no
//! target leaves the replay mid-call, so nothing runs again until the next
//! seek.

use crate::breakpoint::{BreakpointDecision, BreakpointHit, Position, StepKind};
pub use crate::breakpoint::ExceptionBreakPolicy;
use crate::entry::{EntryKind, EventLogEntry};
use crate::error::{AbortRequest, EventLogError};
use crate::event_log::EventLog;
use crate::host::ScriptHost;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Called on every breakpoint hit while the debugger runs.
pub type PauseHandler = Box<dyn FnMut(&BreakpointHit) -> BreakpointDecision>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bp{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("no breakpoint {0}")]
    UnknownBreakpoint(BreakpointId),

    #[error("event time {0} is not a checkpoint or top-level call")]
    InvalidTarget(u64),

    #[error("no call is active to step {0:?} of")]
    NoActiveFrame(StepKind),

    #[error("already at the first top-level call")]
    AtStart,

    #[error("execution was interrupted inside a call; goto a checkpoint or top-level call first")]
    Interrupted,

    #[error(transparent)]
    Log(#[from] EventLogError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub position: Position,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    EndOfLog,
    /// The pause handler aborted to `time`; the debugger is now positioned
    /// there.
    Repositioned {
        time: u64,
        message: Option<String>,
    },
    /// The pause handler aborted without a target.
    Interrupted { message: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stop: StopReason,
    pub hits: Vec<BreakpointHit>,
}

/// Debugger position between top-level events.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugState {
    pub event_time: u64,
    /// Checkpoint the last seek restored from.
    pub snapshot_time: Option<u64>,
    /// Kind of the entry replay continues with.
    pub next_entry: Option<&'static str>,
    pub armed: Option<BreakpointId>,
}

/// Interactive time-travel debugger.
pub struct Debugger<H: ScriptHost> {
    log: EventLog,
    host: H,
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    next_breakpoint_id: u32,
    armed: Option<BreakpointId>,
    interrupted: bool,
    snapshot_time: Option<u64>,
    hits: Rc<RefCell<Vec<BreakpointHit>>>,
    pause_handler: Rc<RefCell<Option<PauseHandler>>>,
}

impl<H: ScriptHost> Debugger<H> {
    /// Switch `log` to debugging and take over `host`. Call [`goto`]
    /// before running.
    ///
    /// [`goto`]: Debugger::goto
    pub fn new(mut log: EventLog, host: H) -> Result<Self, DebuggerError> {
        log.set_into_debugging_mode().map_err(EventLogError::from)?;

        let hits = Rc::new(RefCell::new(Vec::new()));
        let pause_handler: Rc<RefCell<Option<PauseHandler>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&hits);
        let handler = Rc::clone(&pause_handler);
        log.set_breakpoint_callback(Box::new(move |hit: &BreakpointHit| {
            sink.borrow_mut().push(hit.clone());
            match handler.borrow_mut().as_mut() {
                Some(h) => h(hit),
                None => BreakpointDecision::Continue,
            }
        }));

        Ok(Self {
            log,
            host,
            breakpoints: BTreeMap::new(),
            next_breakpoint_id: 1,
            armed: None,
            interrupted: false,
            snapshot_time: None,
            hits,
            pause_handler,
        })
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_parts(self) -> (EventLog, H) {
        (self.log, self.host)
    }

    pub fn set_pause_handler(&mut self, handler: PauseHandler) {
        *self.pause_handler.borrow_mut() = Some(handler);
    }

    pub fn clear_pause_handler(&mut self) {
        *self.pause_handler.borrow_mut() = None;
    }

    // ═══════════════════════════════════════════════════════════════
    // Breakpoint table
    // ═══════════════════════════════════════════════════════════════

    pub fn set_breakpoint(&mut self, position: Position) -> BreakpointId {
        let id = BreakpointId(self.next_breakpoint_id);
        self.next_breakpoint_id += 1;
        self.breakpoints.insert(id, Breakpoint { id, position });
        id
    }

    /// Remove a breakpoint, disarming it first if it is the armed one.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<Breakpoint, DebuggerError> {
        let bp = self
            .breakpoints
            .remove(&id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        if self.armed == Some(id) {
            self.disarm();
        }
        Ok(bp)
    }

    pub fn list_breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// Hand breakpoint `id` to the evaluator. Only one is armed at a time,
    /// and it disarms itself once hit.
    pub fn arm(&mut self, id: BreakpointId) -> Result<(), DebuggerError> {
        let bp = self
            .breakpoints
            .get(&id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        self.log.set_breakpoint(bp.position);
        self.armed = Some(id);
        debug!("armed {} at {}", id, bp.position);
        Ok(())
    }

    pub fn disarm(&mut self) {
        self.log.clear_breakpoint();
        self.armed = None;
    }

    /// The armed breakpoint, if the evaluator still holds it.
    pub fn armed(&self) -> Option<BreakpointId> {
        self.armed.filter(|_| self.log.breakpoints().breakpoint().is_some())
    }

    /// Exceptions the host reports through [`EventLog::bp_check_exception`]
    /// stop the run when this policy matches.
    pub fn set_exception_policy(&mut self, policy: ExceptionBreakPolicy) {
        self.log.set_exception_break_policy(policy);
    }

    pub fn exception_policy(&self) -> ExceptionBreakPolicy {
        self.log.breakpoints().exception_policy()
    }

    /// Where the last exception left its frame, if the policy stops on it.
    pub fn exception_stop(&self, uncaught: bool) -> Option<Position> {
        if !self.exception_policy().should_break(uncaught) {
            return None;
        }
        self.log.exception_time_and_position(&self.host)
    }

    // ═══════════════════════════════════════════════════════════════
    // Navigation
    // ═══════════════════════════════════════════════════════════════

    /// Position the replay at `time`: restore the nearest checkpoint at or
    /// before it, then replay forward.
    pub fn goto(&mut self, time: u64) -> Result<DebugState, DebuggerError> {
        self.check_target(time)?;
        let target = self
            .log
            .find_snap_time_for_event_time(time)
            .map_err(EventLogError::from)?;

        if target.new_contexts_needed {
            self.log.update_inflate_map_for_fresh_script_contexts();
            let ctx = self
                .host
                .fresh_script_context()
                .map_err(EventLogError::from)?;
            let mirror = self
                .log
                .start_time_travel_on_script(ctx)
                .map_err(EventLogError::from)?;
            self.host.attach_mode(mirror);
        }
        self.log.do_snapshot_inflate(&mut self.host, target.snap_time)?;
        self.snapshot_time = Some(target.snap_time);
        self.interrupted = false;

        if self.log.cursor_time().is_some_and(|c| c < time) {
            self.log.replay_to_time(&mut self.host, time)?;
        }
        info!("positioned at {} (from checkpoint {})", time, target.snap_time);
        Ok(self.state())
    }

    /// Go back to the top-level call before the current position.
    pub fn step_back(&mut self) -> Result<DebugState, DebuggerError> {
        let here = self.current_time();
        let previous = self
            .log
            .events()
            .iter_backward()
            .find(|(_, e)| e.time < here && e.kind.is_root_call())
            .map(|(_, e)| e.time)
            .ok_or(DebuggerError::AtStart)?;
        self.goto(previous)
    }

    /// Replay until the end of the log or until the pause handler aborts.
    pub fn continue_execution(&mut self) -> Result<RunReport, DebuggerError> {
        if self.interrupted {
            return Err(DebuggerError::Interrupted);
        }
        self.hits.borrow_mut().clear();
        let err = match self.log.replay_full_trace(&mut self.host) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        let stop = match err {
            EventLogError::Abort(AbortRequest::EndOfLog { .. }) => StopReason::EndOfLog,
            EventLogError::Abort(AbortRequest::ToTime {
                target_time: Some(time),
                message,
            }) => {
                info!("execution aborted to {}", time);
                self.goto(time)?;
                StopReason::Repositioned { time, message }
            }
            EventLogError::Abort(AbortRequest::ToTime {
                target_time: None,
                message,
            }) => {
                info!("execution interrupted at {}", self.current_time());
                self.interrupted = true;
                StopReason::Interrupted { message }
            }
            other => return Err(other.into()),
        };
        let hits = std::mem::take(&mut *self.hits.borrow_mut());
        Ok(RunReport { stop, hits })
    }

    /// Run until the next statement matching `kind`. From between top-level
    /// calls only stepping into is possible.
    pub fn step(&mut self, kind: StepKind) -> Result<RunReport, DebuggerError> {
        if self.interrupted {
            return Err(DebuggerError::Interrupted);
        }
        let depth = self.log.call_stack().len();
        if depth == 0 && kind != StepKind::Into {
            return Err(DebuggerError::NoActiveFrame(kind));
        }
        self.log.set_step_request(kind.request(depth));
        self.continue_execution()
    }

    pub fn step_into(&mut self) -> Result<RunReport, DebuggerError> {
        self.step(StepKind::Into)
    }

    pub fn step_over(&mut self) -> Result<RunReport, DebuggerError> {
        self.step(StepKind::Over)
    }

    pub fn step_out(&mut self) -> Result<RunReport, DebuggerError> {
        self.step(StepKind::Out)
    }

    // ═══════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════

    /// True after an interrupt until the next seek.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    fn current_time(&self) -> u64 {
        self.log.cursor_time().unwrap_or_else(|| self.log.event_time())
    }

    fn check_target(&self, time: u64) -> Result<(), DebuggerError> {
        let valid = self.log.events().find_time(time).is_some_and(|id| {
            let kind = &self.log.events().get(id).kind;
            matches!(kind, EntryKind::Snapshot(_)) || kind.is_root_call()
        });
        if valid {
            Ok(())
        } else {
            Err(DebuggerError::InvalidTarget(time))
        }
    }

    /// Next entry after the current position matching `filter`.
    pub fn next_event(&self, filter: EventFilter) -> Option<&EventLogEntry> {
        let here = self.current_time();
        self.log
            .events()
            .iter()
            .map(|(_, e)| e)
            .find(|e| e.time > here && filter.matches(e))
    }

    /// Entries with `start <= time <= end`.
    pub fn events_between(&self, start: u64, end: u64) -> Vec<&EventLogEntry> {
        self.log
            .events()
            .iter()
            .map(|(_, e)| e)
            .filter(|e| e.time >= start && e.time <= end)
            .collect()
    }

    pub fn state(&self) -> DebugState {
        DebugState {
            event_time: self.current_time(),
            snapshot_time: self.snapshot_time,
            next_entry: self
                .log
                .cursor()
                .map(|id| self.log.events().get(id).kind.name()),
            armed: self.armed(),
        }
    }
}

/// Filter for finding entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    Checkpoint,
    AnyAction,
    TopLevelCall,
    ExternalCall,
    PropertyEnum,
    Value,
}

impl EventFilter {
    pub fn matches(&self, entry: &EventLogEntry) -> bool {
        match (self, &entry.kind) {
            (EventFilter::Checkpoint, kind) => kind.checkpoint().is_some(),
            (EventFilter::AnyAction, kind) => kind.is_action(),
            (EventFilter::TopLevelCall, kind) => kind.is_root_call(),
            (
                EventFilter::ExternalCall,
                EntryKind::ExternalCallBegin { .. } | EntryKind::ExternalCallEnd { .. },
            ) => true,
            (EventFilter::PropertyEnum, EntryKind::PropertyEnumStep { .. }) => true,
            (
                EventFilter::Value,
                EntryKind::Double(_) | EntryKind::UInt64(_) | EntryKind::StringValue(_),
            ) => true,
            _ => false,
        }
    }
}

//! Breakpoint evaluation during replay.
//!
//! The evaluator holds at most one pending position breakpoint and one
//! "break at next statement" request. The host calls
//! [`EventLog::bp_check_and_action`] whenever execution enters a new
//! statement, and [`EventLog::bp_check_exception`] once a thrown exception
//! has left the frame that raised it.

use crate::error::{AbortRequest, EventLogError};
use crate::event_log::EventLog;
use crate::host::SourceInfo;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frames printed on a hit before eliding the rest.
const MAX_PRINTED_FRAMES: usize = 5;

/// A replay position: logical times plus source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub root_event_time: Option<u64>,
    pub function_time: u64,
    pub loop_time: u64,
    pub line: u32,
    pub column: u32,
    pub source_id: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line: {}, column: {}, ", self.line, self.column)?;
        match self.root_event_time {
            Some(t) => write!(f, "etime: {t}, ")?,
            None => f.write_str("etime: -, ")?,
        }
        write!(f, "ftime: {}, ltime: {}", self.function_time, self.loop_time)
    }
}

/// Outcome of asking for the previous statement's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousPosition {
    /// Execution is at the first statement of a top-level callback.
    StartOfCallback { root_event_time: Option<u64> },
    At(Position),
}

/// One-shot request to stop at the next statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRequest {
    /// Stop regardless of depth.
    pub into: bool,
    /// Stop once the call stack is at most this deep.
    pub depth: usize,
}

/// What the evaluator saw when it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointHit {
    pub position: Position,
    pub function_name: String,
    /// Names of the innermost frames, outermost first.
    pub frames: Vec<String>,
    /// Whether older frames were left out of `frames`.
    pub elided: bool,
}

/// Where a step resumed from a hit should stop next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

impl StepKind {
    /// Request for a step starting at call stack depth `depth`.
    pub fn request(self, depth: usize) -> StepRequest {
        match self {
            StepKind::Into => StepRequest { into: true, depth },
            StepKind::Over => StepRequest { into: false, depth },
            StepKind::Out => StepRequest {
                into: false,
                depth: depth.saturating_sub(1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointDecision {
    Continue,
    /// Keep running and stop again at the next matching statement.
    Step(StepKind),
    Abort {
        target_time: Option<u64>,
        message: Option<String>,
    },
}

pub type BreakpointCallback = Box<dyn FnMut(&BreakpointHit) -> BreakpointDecision>;

/// When to stop on a thrown exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExceptionBreakPolicy {
    #[default]
    Never,
    Uncaught,
    FirstChance,
}

impl ExceptionBreakPolicy {
    pub fn should_break(self, uncaught: bool) -> bool {
        match self {
            ExceptionBreakPolicy::Never => false,
            ExceptionBreakPolicy::Uncaught => uncaught,
            ExceptionBreakPolicy::FirstChance => true,
        }
    }
}

#[derive(Default)]
pub struct BreakpointEvaluator {
    pending: Option<Position>,
    step: Option<StepRequest>,
    exception_policy: ExceptionBreakPolicy,
    callback: Option<BreakpointCallback>,
    hits: u64,
}

impl fmt::Debug for BreakpointEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakpointEvaluator")
            .field("pending", &self.pending)
            .field("step", &self.step)
            .field("exception_policy", &self.exception_policy)
            .field("has_callback", &self.callback.is_some())
            .field("hits", &self.hits)
            .finish()
    }
}

impl BreakpointEvaluator {
    pub fn breakpoint(&self) -> Option<&Position> {
        self.pending.as_ref()
    }

    pub fn step(&self) -> Option<StepRequest> {
        self.step
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn exception_policy(&self) -> ExceptionBreakPolicy {
        self.exception_policy
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some() || self.step.is_some()
    }

    fn matches(&self, stack_depth: usize, here: &Position) -> bool {
        if let Some(step) = self.step {
            if step.into || stack_depth <= step.depth {
                return true;
            }
        }
        self.pending.as_ref().is_some_and(|bp| bp == here)
    }

    fn disarm(&mut self) {
        self.pending = None;
        self.step = None;
    }
}

impl EventLog {
    pub fn breakpoints(&self) -> &BreakpointEvaluator {
        &self.breakpoints
    }

    pub fn set_breakpoint(&mut self, position: Position) {
        self.breakpoints.pending = Some(position);
    }

    pub fn clear_breakpoint(&mut self) {
        self.breakpoints.pending = None;
    }

    /// Stop at the next statement. Step-into stops anywhere; otherwise only
    /// at the current depth or shallower.
    pub fn set_breakpoint_on_next_statement(&mut self, into: bool) {
        let depth = self.call_stack.len();
        self.set_step_request(StepRequest { into, depth });
    }

    pub fn set_step_request(&mut self, request: StepRequest) {
        self.breakpoints.step = Some(request);
    }

    pub fn clear_breakpoint_on_next_statement(&mut self) {
        self.breakpoints.step = None;
    }

    pub fn set_breakpoint_callback(&mut self, callback: BreakpointCallback) {
        self.breakpoints.callback = Some(callback);
    }

    pub fn set_exception_break_policy(&mut self, policy: ExceptionBreakPolicy) {
        self.breakpoints.exception_policy = policy;
    }

    /// Check the current statement against the armed breakpoints. On a hit
    /// the evaluator disarms, reports the stack and runs the callback; an
    /// abort decision unwinds to the replay driver.
    pub fn bp_check_and_action<H: SourceInfo + ?Sized>(
        &mut self,
        host: &H,
    ) -> Result<(), EventLogError> {
        if !self.should_perform_debug_action() || !self.breakpoints.is_armed() {
            return Ok(());
        }
        let here = self.time_and_position(host)?;
        if !self.breakpoints.matches(self.call_stack.len(), &here) {
            return Ok(());
        }
        self.breakpoints.disarm();

        let frames = self.call_stack.frames();
        let shown = frames.len().min(MAX_PRINTED_FRAMES);
        let hit = BreakpointHit {
            position: here,
            function_name: self.call_stack.top()?.name.clone(),
            frames: frames[frames.len() - shown..]
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            elided: frames.len() > shown,
        };
        self.report_hit(hit)
    }

    /// Called after the raising frame was popped with
    /// [`EventLog::pop_call_event_exception`]. `uncaught` is true when no
    /// handler remains on the stack. Stops at the raise site when the
    /// exception policy asks for it; armed breakpoints stay armed.
    pub fn bp_check_exception<H: SourceInfo + ?Sized>(
        &mut self,
        host: &H,
        uncaught: bool,
    ) -> Result<(), EventLogError> {
        if !self.should_perform_debug_action()
            || !self.breakpoints.exception_policy.should_break(uncaught)
        {
            return Ok(());
        }
        let Some(position) = self.exception_time_and_position(host) else {
            return Ok(());
        };
        let thrower = self
            .call_stack
            .immediate_exception_frame()
            .map(|f| f.name.clone())
            .unwrap_or_default();

        // the raising frame is already popped; report it as the innermost
        let mut names: Vec<String> = self
            .call_stack
            .frames()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        names.push(thrower.clone());
        let shown = names.len().min(MAX_PRINTED_FRAMES);
        let elided = names.len() > shown;
        let hit = BreakpointHit {
            position,
            function_name: thrower,
            frames: names.split_off(names.len() - shown),
            elided,
        };
        info!(
            "{} exception raised",
            if uncaught { "uncaught" } else { "first-chance" }
        );
        self.report_hit(hit)
    }

    fn report_hit(&mut self, hit: BreakpointHit) -> Result<(), EventLogError> {
        self.breakpoints.hits += 1;
        if hit.elided {
            info!("...");
        }
        for name in &hit.frames[..hit.frames.len().saturating_sub(1)] {
            info!("{name}");
        }
        info!("----");
        info!("{} @ {}", hit.function_name, hit.position);

        let decision = match self.breakpoints.callback.as_mut() {
            Some(callback) => callback(&hit),
            None => BreakpointDecision::Continue,
        };
        match decision {
            BreakpointDecision::Continue => Ok(()),
            BreakpointDecision::Step(kind) => {
                self.breakpoints.step = Some(kind.request(self.call_stack.len()));
                Ok(())
            }
            BreakpointDecision::Abort {
                target_time,
                message,
            } => Err(AbortRequest::ToTime {
                target_time,
                message,
            }
            .into()),
        }
    }
}

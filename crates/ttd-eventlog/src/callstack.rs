//! Active call frame bookkeeping.
//!
//! One running function-time counter is shared by the whole stack and bumps
//! on every push and pop, so each call/return transition has a unique
//! position. Frames leave the stack either normally or while unwinding; the
//! first frame popped while unwinding is marked as the exception origin and
//! later frames in the same unwind are not.

use crate::error::FatalError;
use crate::value::BodyId;

/// Where a frame's exit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExit {
    Normal,
    Unwinding,
}

/// Proof of a push, handed back on the matching pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pushed frame must be popped with its token"]
pub struct FrameToken {
    depth: usize,
    tracked: bool,
}

impl FrameToken {
    /// Token for a frame that was not pushed (tracking was off).
    pub(crate) fn untracked() -> Self {
        Self {
            depth: 0,
            tracked: false,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Per-frame timing and statement state.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleCallCounter {
    pub body: BodyId,
    pub name: String,
    /// Event time when the frame was entered.
    pub event_time: u64,
    pub function_time: u64,
    pub loop_time: u64,

    pub current_statement: Option<u32>,
    pub current_statement_loop_time: u64,
    pub last_statement: Option<u32>,
    pub last_statement_loop_time: u64,
    pub current_statement_bytecode_min: u32,
    pub current_statement_bytecode_max: u32,
}

impl SingleCallCounter {
    pub fn new(body: BodyId, name: String, event_time: u64, function_time: u64) -> Self {
        Self {
            body,
            name,
            event_time,
            function_time,
            loop_time: 0,
            current_statement: None,
            current_statement_loop_time: 0,
            last_statement: None,
            last_statement_loop_time: 0,
            current_statement_bytecode_min: u32::MAX,
            current_statement_bytecode_max: u32::MAX,
        }
    }

    fn in_current_statement(&self, offset: u32) -> bool {
        self.current_statement_bytecode_min <= offset && offset <= self.current_statement_bytecode_max
    }
}

/// Why the last popped frame was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMark {
    Return,
    Exception,
}

#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<SingleCallCounter>,
    running_function_time: u64,
    last_frame: Option<(FrameMark, SingleCallCounter)>,
    unwinding: bool,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[SingleCallCounter] {
        &self.frames
    }

    pub fn running_function_time(&self) -> u64 {
        self.running_function_time
    }

    pub fn top(&self) -> Result<&SingleCallCounter, FatalError> {
        self.frames.last().ok_or(FatalError::EmptyCallStack)
    }

    pub fn top_mut(&mut self) -> Result<&mut SingleCallCounter, FatalError> {
        self.frames.last_mut().ok_or(FatalError::EmptyCallStack)
    }

    /// The caller of the top frame.
    pub fn caller(&self) -> Option<&SingleCallCounter> {
        self.frames.len().checked_sub(2).map(|i| &self.frames[i])
    }

    pub fn push(&mut self, body: BodyId, name: String, event_time: u64) -> FrameToken {
        self.clear_return_and_exception_frames();
        self.unwinding = false;
        self.running_function_time += 1;
        self.frames.push(SingleCallCounter::new(
            body,
            name,
            event_time,
            self.running_function_time,
        ));
        FrameToken {
            depth: self.frames.len(),
            tracked: true,
        }
    }

    /// Pop the frame `token` names. Returns true when this pop marked the
    /// frame as the origin of an exception.
    pub fn pop(&mut self, token: FrameToken, exit: FrameExit) -> Result<bool, FatalError> {
        if !token.tracked {
            return Ok(false);
        }
        if token.depth != self.frames.len() {
            return Err(FatalError::FrameMismatch {
                token_depth: token.depth,
                stack_depth: self.frames.len(),
            });
        }
        let frame = self.frames.pop().ok_or(FatalError::EmptyCallStack)?;
        self.running_function_time += 1;

        let origin = match exit {
            FrameExit::Normal => {
                self.unwinding = false;
                self.last_frame = Some((FrameMark::Return, frame));
                false
            }
            FrameExit::Unwinding if !self.unwinding => {
                self.unwinding = true;
                self.last_frame = Some((FrameMark::Exception, frame));
                true
            }
            FrameExit::Unwinding => false,
        };
        Ok(origin)
    }

    pub fn clear_return_and_exception_frames(&mut self) {
        self.last_frame = None;
    }

    /// Drop every frame and restart function time for a new top-level call.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.running_function_time = 0;
        self.unwinding = false;
        self.clear_return_and_exception_frames();
    }

    pub fn immediate_return_frame(&self) -> Option<&SingleCallCounter> {
        match &self.last_frame {
            Some((FrameMark::Return, frame)) => Some(frame),
            _ => None,
        }
    }

    pub fn immediate_exception_frame(&self) -> Option<&SingleCallCounter> {
        match &self.last_frame {
            Some((FrameMark::Exception, frame)) => Some(frame),
            _ => None,
        }
    }

    pub fn update_loop_count(&mut self) -> Result<(), FatalError> {
        self.top_mut()?.loop_time += 1;
        Ok(())
    }

    /// Track statement movement in the top frame. `lookup` resolves the
    /// statement enclosing an offset. Returns true on entering a new
    /// statement.
    pub fn update_current_statement<F>(&mut self, offset: u32, lookup: F) -> Result<bool, FatalError>
    where
        F: FnOnce(BodyId, u32) -> Option<crate::host::StatementSpan>,
    {
        let frame = self.top_mut()?;
        if frame.in_current_statement(offset) {
            return Ok(false);
        }

        let Some(span) = lookup(frame.body, offset) else {
            return Ok(false);
        };

        let new_statement = frame.current_statement != Some(span.index) && span.contains(offset);
        if new_statement {
            frame.last_statement = frame.current_statement;
            frame.last_statement_loop_time = frame.current_statement_loop_time;

            frame.current_statement = Some(span.index);
            frame.current_statement_loop_time = frame.loop_time;

            frame.current_statement_bytecode_min = span.begin;
            frame.current_statement_bytecode_max = span.end;
        }
        Ok(new_statement)
    }
}

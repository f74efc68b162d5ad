//! Error types for the event log.
//!
//! Two classes exist. [`AbortRequest`] is a control-flow signal: the host
//! catches it at its top-level replay loop and repositions. [`FatalError`]
//! means the log is corrupt or the coordinator was misused; the session has
//! to be torn down.

use crate::mode::TtdMode;
use crate::value::{LogTag, PropertyId};
use thiserror::Error;

/// Request to unwind to the top-level replay driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbortRequest {
    /// Replay ran off the end of the recorded log.
    #[error("end of log reached: {message}")]
    EndOfLog { message: String },
    /// A breakpoint callback asked to stop and (optionally) move to a time.
    #[error("abort requested (target time {target_time:?}): {}", .message.as_deref().unwrap_or("<none>"))]
    ToTime {
        target_time: Option<u64>,
        message: Option<String>,
    },
}

impl AbortRequest {
    pub(crate) fn end_of_log() -> Self {
        AbortRequest::EndOfLog {
            message: "End of log reached -- returning to top-level.".to_string(),
        }
    }

    /// Event time the host should reposition to, if any.
    pub fn target_time(&self) -> Option<u64> {
        match self {
            AbortRequest::EndOfLog { .. } => None,
            AbortRequest::ToTime { target_time, .. } => *target_time,
        }
    }
}

/// Invariant violations. These never come back on their own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error("replay cursor out of sync: counter at {expected}, next entry at {found}")]
    OutOfSync { expected: u64, found: u64 },

    #[error("mode is inconsistent: {operation} requires {required:?}, current mode is {actual:?}")]
    ModeInconsistent {
        operation: &'static str,
        required: TtdMode,
        actual: TtdMode,
    },

    #[error("mode push/pop is not matched (popping {popped:?})")]
    UnmatchedModePop { popped: TtdMode },

    #[error("{0:?} is not a valid base mode")]
    InvalidBaseMode(TtdMode),

    #[error("call stack is empty")]
    EmptyCallStack,

    #[error("call frame exit does not match the top frame (token depth {token_depth}, stack depth {stack_depth})")]
    FrameMismatch {
        token_depth: usize,
        stack_depth: usize,
    },

    #[error("external call nesting mismatch: begin depth {begin}, end depth {end}")]
    NestingMismatch { begin: i32, end: i32 },

    #[error("gap in the recorded property id sequence at {0}")]
    PropertyIdGap(PropertyId),

    #[error("expected {expected} entry at time {time}, found {found}")]
    UnexpectedEntry {
        expected: &'static str,
        found: &'static str,
        time: u64,
    },

    #[error("no checkpoint recorded at event time {0}")]
    MissingCheckpoint(u64),

    #[error("no script context is attached to the event log")]
    NoContext,

    #[error("a script context is already attached to the event log")]
    ContextAlreadyAttached,

    #[error("context {0:?} is not the attached context")]
    ContextMismatch(LogTag),

    #[error("recorded property id {0} cannot be resolved")]
    InvalidPropertyId(PropertyId),

    #[error("replay overshot target time {target} (cursor at {cursor})")]
    Overshoot { target: u64, cursor: u64 },

    #[error("snapshot references identity tag {0} that was never materialized")]
    DanglingReference(u64),
}

/// A failure reported by the host engine.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("host error: {message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from persisting or loading the log.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed log stream: {0}")]
    Malformed(String),
}

impl PersistError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        PersistError::Malformed(message.into())
    }
}

/// Umbrella error returned by event log operations.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error(transparent)]
    Abort(#[from] AbortRequest),
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl EventLogError {
    /// True for control-flow aborts the host should treat as a reposition.
    pub fn is_abort(&self) -> bool {
        matches!(self, EventLogError::Abort(_))
    }

    pub fn abort(&self) -> Option<&AbortRequest> {
        match self {
            EventLogError::Abort(a) => Some(a),
            _ => None,
        }
    }

    pub fn fatal(&self) -> Option<&FatalError> {
        match self {
            EventLogError::Fatal(f) => Some(f),
            _ => None,
        }
    }
}

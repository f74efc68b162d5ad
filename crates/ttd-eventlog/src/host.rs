//! Interface to the host script engine.
//!
//! The event log never owns the engine. Replay operations borrow the host
//! mutably for the duration of the call, and the host borrows the log back
//! when it re-enters a `replay_*` operation from inside
//! [`ScriptHost::execute_action`].

use crate::error::{EventLogError, HostError};
use crate::event_log::EventLog;
use crate::mode::ModeMirror;
use crate::snapshot::{HeapItem, HeapItemRef, HeapRef, InflateMap, LiveRef, SnapContext};
use crate::value::{BodyId, HostValue, IdentityTag, LogTag, PropertyId, PropertyRecord};

/// Bytecode range covered by one statement of a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSpan {
    pub index: u32,
    pub begin: u32,
    pub end: u32,
}

impl StatementSpan {
    pub fn contains(&self, offset: u32) -> bool {
        self.begin <= offset && offset <= self.end
    }
}

/// Source-level mapping of function bodies.
pub trait SourceInfo {
    /// Statement enclosing `offset`, if the body has one.
    fn statement_for_offset(&self, body: BodyId, offset: u32) -> Option<StatementSpan>;

    /// Line and column of a statement. `None` means the function entry.
    fn statement_position(&self, body: BodyId, statement: Option<u32>) -> (u32, u32);

    fn source_id(&self, body: BodyId) -> u32;

    fn display_name(&self, body: BodyId) -> String;
}

/// Heap access needed to capture and restore snapshots.
pub trait SnapshotHost {
    /// Describe the attached context: its global object and extra roots.
    fn snapshot_context(&self) -> Result<SnapContext, HostError>;

    /// Report the current contents of one live item.
    fn describe(&self, item: HeapRef) -> Result<HeapItem, HostError>;

    /// Current (log tag, identity tag) allocation counters.
    fn current_tags(&self) -> (LogTag, IdentityTag);

    /// Rewind the tag counters to the values captured with a checkpoint.
    fn reset_tags_for_restore(&mut self, log_tag: LogTag, identity_tag: IdentityTag);

    /// Force a collection before a restore.
    fn collect_garbage(&mut self) {}

    /// Clear the live context before items are materialized into it.
    fn begin_inflate(&mut self, ctx: &SnapContext) -> Result<(), HostError>;

    /// Allocate the live shell for `item`, reusing `reuse` when given.
    fn materialize(
        &mut self,
        item: HeapItemRef<'_>,
        reuse: Option<LiveRef>,
    ) -> Result<LiveRef, HostError>;

    /// Fill in the contents of `live`, resolving references through `map`.
    fn link(
        &mut self,
        live: LiveRef,
        item: HeapItemRef<'_>,
        map: &InflateMap,
    ) -> Result<(), EventLogError>;

    /// Reinstall the global object and roots once linking is complete.
    fn finish_inflate(&mut self, ctx: &SnapContext, map: &InflateMap) -> Result<(), HostError>;
}

/// A logged engine action, owned and ready for re-execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayAction {
    AllocateNumber {
        value: HostValue,
    },
    VarConvert {
        value: HostValue,
        to_bool: bool,
        to_number: bool,
        to_string: bool,
    },
    GetAndClearException,
    GetProperty {
        pid: PropertyId,
        value: HostValue,
    },
    Callback {
        is_cancel: bool,
        is_repeating: bool,
        host_callback_id: Option<i64>,
        function: LogTag,
        created_callback_id: i64,
    },
    CodeParse {
        is_expression: bool,
        source: String,
        document_id: u64,
        source_uri: String,
    },
    CallFunction {
        root_depth: i32,
        host_callback_id: Option<i64>,
        begin_time: f64,
        function: LogTag,
        args: Vec<HostValue>,
    },
}

/// The complete host engine.
pub trait ScriptHost: SourceInfo + SnapshotHost {
    /// One past the largest property id currently allocated.
    fn max_property_id(&self) -> PropertyId;

    fn property_record(&self, pid: PropertyId) -> Option<PropertyRecord>;

    /// Re-create a recorded property record under its original id.
    fn create_property_record(&mut self, record: &PropertyRecord) -> Result<(), HostError>;

    /// Slot index of `pid` in the live type handler of `object`.
    fn property_index(&self, object: IdentityTag, pid: PropertyId) -> Result<u32, HostError>;

    /// Number of properties in the live type handler of `object`.
    fn property_count(&self, object: IdentityTag) -> Result<u32, HostError>;

    /// Replace the current script context with a fresh one and return its tag.
    fn fresh_script_context(&mut self) -> Result<LogTag, HostError>;

    /// Install the mirror through which the context reads the log's mode.
    fn attach_mode(&mut self, mirror: ModeMirror);

    fn enter_script(&mut self, context: LogTag) -> Result<(), HostError>;

    fn leave_script(&mut self, context: LogTag);

    /// Re-execute a logged action. Nested `replay_*` calls go through `log`.
    fn execute_action(
        &mut self,
        log: &mut EventLog,
        context: LogTag,
        action: &ReplayAction,
    ) -> Result<(), EventLogError>;
}

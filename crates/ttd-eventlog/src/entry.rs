//! Event entries and the chronological list.
//!
//! Entries live in one vector and are linked by index in both directions.
//! The tail is the most recently appended entry. Nothing is ever removed
//! before the whole list is dropped.

use crate::arena::{Arena, StrRef, ValueSlice};
use crate::checkpoint::CheckpointInfo;
use crate::error::FatalError;
use crate::host::ReplayAction;
use crate::value::{LogTag, LogValue, PropertyAttributes, PropertyId};

/// Index of an entry in its [`EventList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    AllocateNumber {
        value: LogValue,
    },
    VarConvert {
        value: LogValue,
        to_bool: bool,
        to_number: bool,
        to_string: bool,
    },
    GetAndClearException,
    GetProperty {
        pid: PropertyId,
        value: LogValue,
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
        source: StrRef,
        document_id: u64,
        source_uri: StrRef,
    },
    CallFunction {
        root_depth: i32,
        host_callback_id: Option<i64>,
        begin_time: f64,
        function: LogTag,
        args: ValueSlice,
        /// Wall time the call took, filled in when it returns.
        elapsed_ms: f64,
        ready_to_run: Option<CheckpointInfo>,
        name: Option<StrRef>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AllocateNumber { .. } => "allocateNumber",
            ActionKind::VarConvert { .. } => "varConvert",
            ActionKind::GetAndClearException => "getAndClearException",
            ActionKind::GetProperty { .. } => "getProperty",
            ActionKind::Callback { .. } => "callback",
            ActionKind::CodeParse { .. } => "codeParse",
            ActionKind::CallFunction { .. } => "callFunction",
        }
    }

    /// A call made directly from the host rather than from script.
    pub fn is_root_call(&self) -> bool {
        matches!(self, ActionKind::CallFunction { root_depth: 0, .. })
    }

    /// Owned copy for handing to the host.
    pub fn to_replay_action(&self, arena: &Arena) -> ReplayAction {
        match self {
            ActionKind::AllocateNumber { value } => ReplayAction::AllocateNumber {
                value: value.inflate(arena),
            },
            ActionKind::VarConvert {
                value,
                to_bool,
                to_number,
                to_string,
            } => ReplayAction::VarConvert {
                value: value.inflate(arena),
                to_bool: *to_bool,
                to_number: *to_number,
                to_string: *to_string,
            },
            ActionKind::GetAndClearException => ReplayAction::GetAndClearException,
            ActionKind::GetProperty { pid, value } => ReplayAction::GetProperty {
                pid: *pid,
                value: value.inflate(arena),
            },
            ActionKind::Callback {
                is_cancel,
                is_repeating,
                host_callback_id,
                function,
                created_callback_id,
            } => ReplayAction::Callback {
                is_cancel: *is_cancel,
                is_repeating: *is_repeating,
                host_callback_id: *host_callback_id,
                function: *function,
                created_callback_id: *created_callback_id,
            },
            ActionKind::CodeParse {
                is_expression,
                source,
                document_id,
                source_uri,
            } => ReplayAction::CodeParse {
                is_expression: *is_expression,
                source: arena.get_str(*source).to_string(),
                document_id: *document_id,
                source_uri: arena.get_str(*source_uri).to_string(),
            },
            ActionKind::CallFunction {
                root_depth,
                host_callback_id,
                begin_time,
                function,
                args,
                ..
            } => ReplayAction::CallFunction {
                root_depth: *root_depth,
                host_callback_id: *host_callback_id,
                begin_time: *begin_time,
                function: *function,
                args: arena
                    .get_values(*args)
                    .iter()
                    .map(|v| v.inflate(arena))
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Snapshot(CheckpointInfo),
    Double(f64),
    UInt64(u64),
    StringValue(StrRef),
    PropertyEnumStep {
        return_code: bool,
        pid: PropertyId,
        attributes: PropertyAttributes,
        name: Option<StrRef>,
    },
    SymbolCreation(PropertyId),
    ExternalCallBegin {
        root_depth: i32,
        begin_time: f64,
        function_name: Option<StrRef>,
    },
    ExternalCallEnd {
        root_depth: i32,
        return_value: LogValue,
        function_name: Option<StrRef>,
    },
    Action {
        context: LogTag,
        action: ActionKind,
    },
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::Snapshot(_) => "snapshot",
            EntryKind::Double(_) => "double",
            EntryKind::UInt64(_) => "uint64",
            EntryKind::StringValue(_) => "string",
            EntryKind::PropertyEnumStep { .. } => "propertyEnum",
            EntryKind::SymbolCreation(_) => "symbol",
            EntryKind::ExternalCallBegin { .. } => "externalCallBegin",
            EntryKind::ExternalCallEnd { .. } => "externalCallEnd",
            EntryKind::Action { .. } => "action",
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self, EntryKind::Action { .. })
    }

    pub fn is_root_call(&self) -> bool {
        matches!(self, EntryKind::Action { action, .. } if action.is_root_call())
    }

    /// The checkpoint this entry carries, if any: a dedicated checkpoint or
    /// ready-to-run info on a root call.
    pub fn checkpoint(&self) -> Option<&CheckpointInfo> {
        match self {
            EntryKind::Snapshot(info) => Some(info),
            EntryKind::Action {
                action: ActionKind::CallFunction { ready_to_run, .. },
                ..
            } => ready_to_run.as_ref(),
            _ => None,
        }
    }

    pub fn checkpoint_mut(&mut self) -> Option<&mut CheckpointInfo> {
        match self {
            EntryKind::Snapshot(info) => Some(info),
            EntryKind::Action {
                action: ActionKind::CallFunction { ready_to_run, .. },
                ..
            } => ready_to_run.as_mut(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub time: u64,
    pub prev: Option<EntryId>,
    pub next: Option<EntryId>,
    pub kind: EntryKind,
}

#[derive(Debug, Default)]
pub struct EventList {
    entries: Vec<EventLogEntry>,
    tail: Option<EntryId>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail. Times must strictly increase.
    pub fn append(&mut self, time: u64, kind: EntryKind) -> Result<EntryId, FatalError> {
        if let Some(tail) = self.tail.map(|t| &self.entries[t.index()]) {
            if time <= tail.time {
                return Err(FatalError::OutOfSync {
                    expected: tail.time + 1,
                    found: time,
                });
            }
        }
        let index = u32::try_from(self.entries.len()).map_err(|_| FatalError::OutOfSync {
            expected: u64::from(u32::MAX),
            found: time,
        })?;
        let id = EntryId(index);

        if let Some(tail) = self.tail {
            self.entries[tail.index()].next = Some(id);
        }
        self.entries.push(EventLogEntry {
            time,
            prev: self.tail,
            next: None,
            kind,
        });
        self.tail = Some(id);
        Ok(id)
    }

    pub fn head(&self) -> Option<EntryId> {
        (!self.entries.is_empty()).then_some(EntryId(0))
    }

    pub fn tail(&self) -> Option<EntryId> {
        self.tail
    }

    pub fn get(&self, id: EntryId) -> &EventLogEntry {
        &self.entries[id.index()]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut EventLogEntry {
        &mut self.entries[id.index()]
    }

    pub fn next(&self, id: EntryId) -> Option<EntryId> {
        self.get(id).next
    }

    pub fn prev(&self, id: EntryId) -> Option<EntryId> {
        self.get(id).prev
    }

    /// Walk from the tail toward the head.
    pub fn iter_backward(&self) -> impl Iterator<Item = (EntryId, &EventLogEntry)> {
        std::iter::successors(self.tail, move |id| self.prev(*id)).map(move |id| (id, self.get(id)))
    }

    /// Walk from the head toward the tail.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &EventLogEntry)> {
        std::iter::successors(self.head(), move |id| self.next(*id)).map(move |id| (id, self.get(id)))
    }

    /// Entry whose time is exactly `time`.
    pub fn find_time(&self, time: u64) -> Option<EntryId> {
        self.iter_backward()
            .take_while(|(_, e)| e.time >= time)
            .find(|(_, e)| e.time == time)
            .map(|(id, _)| id)
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> {
        (0..self.entries.len() as u32).map(EntryId)
    }
}

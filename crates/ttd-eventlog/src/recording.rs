//! Record side of the event log.
//!
//! Every `record_*` operation requires record mode, appends one entry at the
//! current event time and advances the counter. Variable-length payloads go
//! into the log's arena.

use crate::entry::{ActionKind, EntryId, EntryKind};
use crate::error::FatalError;
use crate::event_log::EventLog;
use crate::value::{HostValue, LogTag, LogValue, PropertyAttributes, PropertyId};

impl EventLog {
    fn record_action(&mut self, action: ActionKind) -> Result<EntryId, FatalError> {
        let context = self.context_tag()?;
        self.append_entry(EntryKind::Action { context, action })
    }

    fn extract_value(&mut self, value: &HostValue) -> LogValue {
        LogValue::extract(value, &mut self.arena)
    }

    /// Wall-clock read, in milliseconds.
    pub fn record_date_time_event(&mut self, time: f64) -> Result<EntryId, FatalError> {
        self.require_record("record_date_time_event")?;
        self.append_entry(EntryKind::Double(time))
    }

    pub fn record_date_string_event(&mut self, value: &str) -> Result<EntryId, FatalError> {
        self.require_record("record_date_string_event")?;
        let s = self.arena.alloc_str(value);
        self.append_entry(EntryKind::StringValue(s))
    }

    pub fn record_external_entropy_random_event(&mut self, seed: u64) -> Result<EntryId, FatalError> {
        self.require_record("record_external_entropy_random_event")?;
        self.append_entry(EntryKind::UInt64(seed))
    }

    /// One step of a property enumeration. The name is kept only when the
    /// step has no property id to resolve it from on replay.
    pub fn record_property_enum_event(
        &mut self,
        return_code: bool,
        pid: PropertyId,
        attributes: PropertyAttributes,
        name: Option<&str>,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_property_enum_event")?;
        let name = match name {
            Some(n) if pid.is_none() => Some(self.arena.alloc_str(n)),
            _ => None,
        };
        self.append_entry(EntryKind::PropertyEnumStep {
            return_code,
            pid,
            attributes,
            name,
        })
    }

    pub fn record_symbol_creation_event(&mut self, pid: PropertyId) -> Result<EntryId, FatalError> {
        self.require_record("record_symbol_creation_event")?;
        self.append_entry(EntryKind::SymbolCreation(pid))
    }

    /// Script is about to call out to a host function.
    pub fn record_external_call_begin_event(
        &mut self,
        function_name: &str,
        root_depth: i32,
        begin_time: f64,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_external_call_begin_event")?;
        let function_name = Some(self.arena.alloc_str(function_name));
        self.append_entry(EntryKind::ExternalCallBegin {
            root_depth,
            begin_time,
            function_name,
        })
    }

    /// The host function returned `value`.
    pub fn record_external_call_end_event(
        &mut self,
        function_name: &str,
        root_depth: i32,
        value: &HostValue,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_external_call_end_event")?;
        let return_value = self.extract_value(value);
        let function_name = Some(self.arena.alloc_str(function_name));
        self.append_entry(EntryKind::ExternalCallEnd {
            root_depth,
            return_value,
            function_name,
        })
    }

    pub fn record_js_rt_allocate_int(&mut self, value: i32) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_allocate_int")?;
        self.record_action(ActionKind::AllocateNumber {
            value: LogValue::Int(value),
        })
    }

    pub fn record_js_rt_allocate_double(&mut self, value: f64) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_allocate_double")?;
        self.record_action(ActionKind::AllocateNumber {
            value: LogValue::Number(value),
        })
    }

    pub fn record_js_rt_var_conversion(
        &mut self,
        value: &HostValue,
        to_bool: bool,
        to_number: bool,
        to_string: bool,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_var_conversion")?;
        let value = self.extract_value(value);
        self.record_action(ActionKind::VarConvert {
            value,
            to_bool,
            to_number,
            to_string,
        })
    }

    pub fn record_js_rt_get_and_clear_exception(&mut self) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_get_and_clear_exception")?;
        self.record_action(ActionKind::GetAndClearException)
    }

    pub fn record_js_rt_get_property(
        &mut self,
        pid: PropertyId,
        value: &HostValue,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_get_property")?;
        let value = self.extract_value(value);
        self.record_action(ActionKind::GetProperty { pid, value })
    }

    /// Registration (or cancellation) of a host callback. The host callback
    /// currently running, if any, is recorded alongside.
    pub fn record_js_rt_callback_operation(
        &mut self,
        is_cancel: bool,
        is_repeating: bool,
        function: LogTag,
        created_callback_id: i64,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_callback_operation")?;
        let host_callback_id = self.host_callback_id;
        self.record_action(ActionKind::Callback {
            is_cancel,
            is_repeating,
            host_callback_id,
            function,
            created_callback_id,
        })
    }

    pub fn record_js_rt_code_parse(
        &mut self,
        is_expression: bool,
        source: &str,
        document_id: u64,
        source_uri: &str,
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_code_parse")?;
        let source = self.arena.alloc_str(source);
        let source_uri = self.arena.alloc_str(source_uri);
        self.record_action(ActionKind::CodeParse {
            is_expression,
            source,
            document_id,
            source_uri,
        })
    }

    /// A call into script from the host. Finish it with
    /// [`complete_call_function_action`](Self::complete_call_function_action).
    pub fn record_js_rt_call_function(
        &mut self,
        root_depth: i32,
        host_callback_id: Option<i64>,
        begin_time: f64,
        function: LogTag,
        name: &str,
        args: &[HostValue],
    ) -> Result<EntryId, FatalError> {
        self.require_record("record_js_rt_call_function")?;
        let values: Vec<LogValue> = args.iter().map(|a| self.extract_value(a)).collect();
        let args = self.arena.alloc_values(&values);
        let name = Some(self.arena.alloc_str(name));
        self.record_action(ActionKind::CallFunction {
            root_depth,
            host_callback_id,
            begin_time,
            function,
            args,
            elapsed_ms: 0.0,
            ready_to_run: None,
            name,
        })
    }

    /// Store how long the call took and add it to the time since the last
    /// checkpoint.
    pub fn complete_call_function_action(
        &mut self,
        id: EntryId,
        elapsed: f64,
    ) -> Result<(), FatalError> {
        let entry = self.events.get_mut(id);
        let time = entry.time;
        match &mut entry.kind {
            EntryKind::Action {
                action: ActionKind::CallFunction { elapsed_ms, .. },
                ..
            } => {
                *elapsed_ms = elapsed;
            }
            other => {
                return Err(FatalError::UnexpectedEntry {
                    expected: "callFunction",
                    found: other.name(),
                    time,
                })
            }
        }
        self.increment_elapsed_snapshot_time(elapsed);
        Ok(())
    }
}

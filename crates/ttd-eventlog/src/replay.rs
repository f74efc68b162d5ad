//! Replay side of the event log.
//!
//! Each `replay_*` operation checks that the entry under the cursor was
//! recorded at the current event time and has the expected kind, hands its
//! payload back, and steps past it. The drivers at the bottom re-execute
//! logged actions against the host until a target time or the end of the
//! log.

use crate::entry::{EntryKind, EventLogEntry};
use crate::error::{AbortRequest, EventLogError, FatalError};
use crate::event_log::EventLog;
use crate::host::ScriptHost;
use crate::value::{HostValue, IdentityTag, PropertyAttributes, PropertyId};
use log::debug;
use std::convert::Infallible;

/// A replayed property enumeration step.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEnumStep {
    pub return_code: bool,
    pub pid: PropertyId,
    pub attributes: PropertyAttributes,
    pub name: Option<String>,
    /// Slot of the property in the live object's handler, or the handler's
    /// property count once enumeration is done.
    pub new_index: u32,
}

fn unexpected(expected: &'static str, entry: &EventLogEntry) -> FatalError {
    FatalError::UnexpectedEntry {
        expected,
        found: entry.kind.name(),
        time: entry.time,
    }
}

impl EventLog {
    /// The entry under the cursor, checked against the event counter.
    fn next_replay_entry(&self, operation: &'static str) -> Result<&EventLogEntry, EventLogError> {
        self.require_debug(operation)?;
        let id = self.cursor.ok_or_else(AbortRequest::end_of_log)?;
        let entry = self.events.get(id);
        if entry.time != self.event_time {
            return Err(FatalError::OutOfSync {
                expected: self.event_time,
                found: entry.time,
            }
            .into());
        }
        Ok(entry)
    }

    /// Abort used when replay runs past the last entry.
    pub fn abort_replay_return_to_host(&self) -> EventLogError {
        AbortRequest::end_of_log().into()
    }

    pub fn replay_date_time_event(&mut self) -> Result<f64, EventLogError> {
        let entry = self.next_replay_entry("replay_date_time_event")?;
        let value = match entry.kind {
            EntryKind::Double(v) => v,
            _ => return Err(unexpected("double", entry).into()),
        };
        self.advance_time_and_position_for_replay();
        Ok(value)
    }

    pub fn replay_date_string_event(&mut self) -> Result<String, EventLogError> {
        let entry = self.next_replay_entry("replay_date_string_event")?;
        let value = match entry.kind {
            EntryKind::StringValue(s) => self.arena.get_str(s).to_string(),
            _ => return Err(unexpected("string", entry).into()),
        };
        self.advance_time_and_position_for_replay();
        Ok(value)
    }

    pub fn replay_external_entropy_random_event(&mut self) -> Result<u64, EventLogError> {
        let entry = self.next_replay_entry("replay_external_entropy_random_event")?;
        let value = match entry.kind {
            EntryKind::UInt64(v) => v,
            _ => return Err(unexpected("uint64", entry).into()),
        };
        self.advance_time_and_position_for_replay();
        Ok(value)
    }

    /// Replay one enumeration step over `object`, resolving the property
    /// against the object's live handler rather than trusting the logged
    /// index.
    pub fn replay_property_enum_event<H: ScriptHost + ?Sized>(
        &mut self,
        host: &H,
        object: IdentityTag,
    ) -> Result<PropertyEnumStep, EventLogError> {
        let entry = self.next_replay_entry("replay_property_enum_event")?;
        let (return_code, pid, attributes, recorded_name) = match entry.kind {
            EntryKind::PropertyEnumStep {
                return_code,
                pid,
                attributes,
                name,
            } => (return_code, pid, attributes, name),
            _ => return Err(unexpected("propertyEnum", entry).into()),
        };
        let recorded_name = recorded_name.map(|n| self.arena.get_str(n).to_string());

        let (name, new_index) = if return_code && !pid.is_none() {
            let record = host
                .property_record(pid)
                .ok_or(FatalError::InvalidPropertyId(pid))?;
            (Some(record.name), host.property_index(object, pid)?)
        } else {
            (recorded_name, host.property_count(object)?)
        };

        self.advance_time_and_position_for_replay();
        Ok(PropertyEnumStep {
            return_code,
            pid,
            attributes,
            name,
            new_index,
        })
    }

    pub fn replay_symbol_creation_event(&mut self) -> Result<PropertyId, EventLogError> {
        let entry = self.next_replay_entry("replay_symbol_creation_event")?;
        let pid = match entry.kind {
            EntryKind::SymbolCreation(pid) => pid,
            _ => return Err(unexpected("symbol", entry).into()),
        };
        self.advance_time_and_position_for_replay();
        Ok(pid)
    }

    /// Replay a call out to a host function: consume the begin entry, run
    /// any actions the host performed while inside it, then consume the end
    /// entry and return the recorded result.
    pub fn replay_external_call_event<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<HostValue, EventLogError> {
        let entry = self.next_replay_entry("replay_external_call_event")?;
        let begin_depth = match entry.kind {
            EntryKind::ExternalCallBegin { root_depth, .. } => root_depth,
            _ => return Err(unexpected("externalCallBegin", entry).into()),
        };
        self.advance_time_and_position_for_replay();

        if self.cursor_is_action() {
            self.replay_action_loop_step(host)?;
        }

        let entry = self.next_replay_entry("replay_external_call_event")?;
        let (end_depth, return_value) = match entry.kind {
            EntryKind::ExternalCallEnd {
                root_depth,
                return_value,
                ..
            } => (root_depth, return_value),
            _ => return Err(unexpected("externalCallEnd", entry).into()),
        };
        if begin_depth != end_depth {
            return Err(FatalError::NestingMismatch {
                begin: begin_depth,
                end: end_depth,
            }
            .into());
        }
        let value = return_value.inflate(&self.arena);
        self.advance_time_and_position_for_replay();
        Ok(value)
    }

    fn cursor_is_action(&self) -> bool {
        self.cursor
            .is_some_and(|id| self.events.get(id).kind.is_action())
    }

    fn cursor_is_nested_action(&self) -> bool {
        self.cursor.is_some_and(|id| {
            let kind = &self.events.get(id).kind;
            kind.is_action() && !kind.is_root_call()
        })
    }

    /// Execute the action under the cursor, then keep going while the next
    /// entry is another action that is not a new top-level call.
    pub fn replay_action_loop_step<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<(), EventLogError> {
        loop {
            let entry = self.next_replay_entry("replay_action_loop_step")?;
            let time = entry.time;
            let (context, action, root_call) = match &entry.kind {
                EntryKind::Action { context, action } => (
                    *context,
                    action.to_replay_action(&self.arena),
                    action.is_root_call(),
                ),
                _ => return Err(unexpected("action", entry).into()),
            };
            let host_callback_id = match &action {
                crate::host::ReplayAction::CallFunction {
                    host_callback_id, ..
                } => *host_callback_id,
                _ => None,
            };
            self.advance_time_and_position_for_replay();

            if root_call {
                self.reset_call_stack_for_top_level_call(Some(time), host_callback_id)?;
            }
            debug!("replaying action at {}: {:?}", time, action);

            host.enter_script(context)?;
            let result = host.execute_action(self, context, &action);
            host.leave_script(context);
            result?;

            if !self.cursor_is_nested_action() {
                return Ok(());
            }
        }
    }

    /// Replay whatever is under the cursor.
    pub fn replay_single_entry<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<(), EventLogError> {
        let entry = self.next_replay_entry("replay_single_entry")?;
        match entry.kind {
            EntryKind::Snapshot(_) => {
                self.advance_time_and_position_for_replay();
                Ok(())
            }
            EntryKind::Action { .. } => self.replay_action_loop_step(host),
            _ => Err(unexpected("snapshot or action", entry).into()),
        }
    }

    /// Replay until the cursor sits exactly on `target`.
    pub fn replay_to_time<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
        target: u64,
    ) -> Result<(), EventLogError> {
        loop {
            let cursor = self.cursor_time().ok_or_else(AbortRequest::end_of_log)?;
            if cursor == target {
                return Ok(());
            }
            if cursor > target {
                return Err(FatalError::Overshoot { target, cursor }.into());
            }
            self.replay_single_entry(host)?;
        }
    }

    /// Replay to the end of the log. Always finishes with an end-of-log
    /// abort unless something else fails first.
    pub fn replay_full_trace<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<Infallible, EventLogError> {
        while self.cursor.is_some() {
            self.replay_single_entry(host)?;
        }
        Err(self.abort_replay_return_to_host())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::TtdMode;
    use crate::test_support::{
        scenario_config, MockHost, Observed, FN_CALLBACK_HOST, FN_FIRST, FN_SECOND,
    };
    use crate::value::LogTag;
    use tempfile::TempDir;

    /// Record the full scenario and return the log switched to debugging.
    ///
    /// Timeline: checkpoint 0, first call 1, clock 2, enum 3..=6, external
    /// begin 7, external end 8, checkpoint 9, second call 10, clock 11.
    fn recorded_scenario(dir: &TempDir) -> (EventLog, MockHost) {
        let mut host = MockHost::with_sample_heap();
        let mut log = EventLog::new(scenario_config(dir.path()));
        let mirror = log.start_time_travel_on_script(host.context_tag()).unwrap();
        host.attach_mode(mirror);
        log.set_global_mode(TtdMode::RECORD_ENABLED).unwrap();
        log.init_for_ttd_record(&host).unwrap();

        log.do_snapshot_extract(&host, true).unwrap();
        host.call_function(&mut log, FN_FIRST, 0).unwrap();
        log.do_snapshot_extract(&host, false).unwrap();
        host.call_function(&mut log, FN_SECOND, 0).unwrap();
        (log, host)
    }

    fn into_replay(log: &mut EventLog, host: &mut MockHost) {
        log.set_into_debugging_mode().unwrap();
        host.observed.clear();
    }

    #[test]
    fn test_scenario_timeline() {
        let dir = TempDir::new().unwrap();
        let (log, host) = recorded_scenario(&dir);
        let kinds: Vec<&str> = log.events().iter().map(|(_, e)| e.kind.name()).collect();
        assert_eq!(
            kinds,
            vec![
                "snapshot",
                "action",
                "double",
                "propertyEnum",
                "propertyEnum",
                "propertyEnum",
                "propertyEnum",
                "externalCallBegin",
                "externalCallEnd",
                "snapshot",
                "action",
                "double",
            ]
        );
        assert_eq!(log.event_time(), 12);
        assert_eq!(
            host.observed,
            vec![
                Observed::Clock(1000.0),
                Observed::Property("a".into()),
                Observed::Property("b".into()),
                Observed::Property("c".into()),
                Observed::External(HostValue::Int(7)),
                Observed::Clock(2000.0),
            ]
        );
    }

    #[test]
    fn test_replay_to_second_call() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);

        log.do_snapshot_inflate(&mut host, 0).unwrap();
        log.replay_to_time(&mut host, 10).unwrap();
        assert_eq!(log.cursor_time(), Some(10));
        assert_eq!(
            host.observed,
            vec![
                Observed::Clock(1000.0),
                Observed::Property("a".into()),
                Observed::Property("b".into()),
                Observed::Property("c".into()),
                Observed::External(HostValue::Int(7)),
            ]
        );
    }

    #[test]
    fn test_seek_to_checkpoint_and_replay_remainder() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 0).unwrap();
        log.replay_to_time(&mut host, 10).unwrap();
        host.observed.clear();

        let target = log.find_snap_time_for_event_time(9).unwrap();
        assert_eq!(target.snap_time, 9);
        assert!(target.new_contexts_needed);

        log.update_inflate_map_for_fresh_script_contexts();
        let ctx = host.fresh_script_context().unwrap();
        let mirror = log.start_time_travel_on_script(ctx).unwrap();
        host.attach_mode(mirror);
        log.do_snapshot_inflate(&mut host, target.snap_time).unwrap();

        let err = log.replay_full_trace(&mut host).unwrap_err();
        assert!(matches!(err.abort(), Some(AbortRequest::EndOfLog { .. })));
        assert_eq!(host.observed, vec![Observed::Clock(2000.0)]);
    }

    #[test]
    fn test_replay_full_trace_reproduces_recording() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        let recorded = host.observed.clone();
        into_replay(&mut log, &mut host);

        log.do_snapshot_inflate(&mut host, 0).unwrap();
        assert!(log.replay_full_trace(&mut host).unwrap_err().is_abort());
        assert_eq!(host.observed, recorded);
        assert_eq!(log.event_time(), 12);
    }

    #[test]
    fn test_replay_to_time_past_end_is_end_of_log() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 9).unwrap();

        let err = log.replay_to_time(&mut host, 50).unwrap_err();
        assert!(matches!(err.abort(), Some(AbortRequest::EndOfLog { .. })));
    }

    #[test]
    fn test_replay_to_time_rejects_overshoot() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 9).unwrap();

        let err = log.replay_to_time(&mut host, 3).unwrap_err();
        assert_eq!(
            err.fatal(),
            Some(&FatalError::Overshoot {
                target: 3,
                cursor: 10
            })
        );
    }

    #[test]
    fn test_wrong_entry_kind_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 0).unwrap();

        // cursor is on the first call action
        let err = log.replay_date_time_event().unwrap_err();
        assert_eq!(
            err.fatal(),
            Some(&FatalError::UnexpectedEntry {
                expected: "double",
                found: "action",
                time: 1
            })
        );
    }

    #[test]
    fn test_out_of_sync_counter_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 0).unwrap();
        log.event_time += 1;

        let err = log.replay_single_entry(&mut host).unwrap_err();
        assert_eq!(
            err.fatal(),
            Some(&FatalError::OutOfSync {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_replay_requires_debug_mode() {
        let dir = TempDir::new().unwrap();
        let (mut log, _host) = recorded_scenario(&dir);
        assert!(matches!(
            log.replay_date_time_event(),
            Err(EventLogError::Fatal(FatalError::ModeInconsistent { .. }))
        ));
    }

    #[test]
    fn test_scalar_replays() {
        let mut log = EventLog::new(crate::config::EventLogConfig::default());
        log.start_time_travel_on_script(LogTag(1)).unwrap();
        log.set_global_mode(TtdMode::RECORD_ENABLED).unwrap();
        log.record_date_string_event("Sat Oct 18 2026").unwrap();
        log.record_external_entropy_random_event(0xdead_beef).unwrap();
        log.record_symbol_creation_event(PropertyId(1030)).unwrap();

        log.set_into_debugging_mode().unwrap();
        log.cursor = log.events().head();
        log.event_time = 0;

        assert_eq!(log.replay_date_string_event().unwrap(), "Sat Oct 18 2026");
        assert_eq!(log.replay_external_entropy_random_event().unwrap(), 0xdead_beef);
        assert_eq!(log.replay_symbol_creation_event().unwrap(), PropertyId(1030));
        assert!(log.replay_date_time_event().unwrap_err().is_abort());
    }

    #[test]
    fn test_enum_step_resolves_against_live_handler() {
        let dir = TempDir::new().unwrap();
        let (mut log, mut host) = recorded_scenario(&dir);
        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 0).unwrap();

        // Step to the first enumeration entry by hand: run the call action's
        // prologue through the host, which stops after the clock read.
        host.pause_after_clock = true;
        log.replay_single_entry(&mut host).unwrap();
        assert_eq!(log.cursor_time(), Some(3));

        let obj = host.enum_target();
        let steps: Vec<PropertyEnumStep> = (0..4)
            .map(|_| log.replay_property_enum_event(&host, obj).unwrap())
            .collect();
        let names: Vec<_> = steps.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![Some("a".into()), Some("b".into()), Some("c".into()), None]
        );
        let indices: Vec<u32> = steps.iter().map(|s| s.new_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(!steps[3].return_code);
    }

    #[test]
    fn test_external_call_drains_nested_actions() {
        let dir = TempDir::new().unwrap();
        let mut host = MockHost::with_sample_heap();
        let mut log = EventLog::new(scenario_config(dir.path()));
        let mirror = log.start_time_travel_on_script(host.context_tag()).unwrap();
        host.attach_mode(mirror);
        log.set_global_mode(TtdMode::RECORD_ENABLED).unwrap();
        log.do_snapshot_extract(&host, true).unwrap();
        host.call_function(&mut log, FN_CALLBACK_HOST, 0).unwrap();
        let recorded = host.observed.clone();
        assert!(recorded.contains(&Observed::CallbackRan));

        into_replay(&mut log, &mut host);
        log.do_snapshot_inflate(&mut host, 0).unwrap();
        assert!(log.replay_full_trace(&mut host).unwrap_err().is_abort());
        assert_eq!(host.observed, recorded);
    }

    #[test]
    fn test_external_call_depth_mismatch_is_fatal() {
        let mut log = EventLog::new(crate::config::EventLogConfig::default());
        log.start_time_travel_on_script(LogTag(1)).unwrap();
        log.set_global_mode(TtdMode::RECORD_ENABLED).unwrap();
        log.record_external_call_begin_event("f", 0, 0.0).unwrap();
        log.record_external_call_end_event("f", 1, &HostValue::Null)
            .unwrap();

        log.set_into_debugging_mode().unwrap();
        log.cursor = log.events().head();
        log.event_time = 0;
        let mut host = MockHost::with_sample_heap();
        let err = log.replay_external_call_event(&mut host).unwrap_err();
        assert_eq!(
            err.fatal(),
            Some(&FatalError::NestingMismatch { begin: 0, end: 1 })
        );
    }
}

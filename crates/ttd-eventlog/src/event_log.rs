//! The event log coordinator.
//!
//! [`EventLog`] owns the chronological entry list, the arena that holds
//! entry payloads, the mode stack, the call stack and the inflate map. The
//! `Record*` operations live in [`recording`](crate::recording), the
//! `Replay*` operations and drivers in [`replay`](crate::replay), and the
//! breakpoint hooks in [`breakpoint`](crate::breakpoint). This module holds
//! the state itself plus mode handling, call-stack bookkeeping, position
//! queries and checkpoint capture/restore.

use crate::arena::Arena;
use crate::breakpoint::{BreakpointEvaluator, Position, PreviousPosition};
use crate::callstack::{CallStack, FrameExit, FrameToken, SingleCallCounter};
use crate::checkpoint::{CheckpointInfo, CheckpointKind};
use crate::config::{EventLogConfig, LogFormat};
use crate::entry::{ActionKind, EntryId, EntryKind, EventList};
use crate::error::{AbortRequest, EventLogError, FatalError, HostError, PersistError};
use crate::host::{ScriptHost, SnapshotHost, SourceInfo};
use crate::mode::{ModeMirror, ModeStack, TtdMode};
use crate::snapshot::{inflate_snapshot, InflateMap, SnapShot, SnapshotExtractor};
use crate::value::{BodyId, LogTag, PropertyId, PropertyRecord};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// The script context the log is currently driving.
#[derive(Debug)]
pub(crate) struct AttachedContext {
    pub(crate) tag: LogTag,
    mirror: ModeMirror,
}

/// Result of [`EventLog::find_snap_time_for_event_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapTarget {
    /// Event time of the checkpoint entry to inflate.
    pub snap_time: u64,
    /// Whether the host must build a fresh script context before inflating.
    pub new_contexts_needed: bool,
}

pub struct EventLog {
    pub(crate) config: EventLogConfig,
    pub(crate) modes: ModeStack,
    pub(crate) context: Option<AttachedContext>,

    pub(crate) arena: Arena,
    pub(crate) events: EventList,
    /// Next entry to replay.
    pub(crate) cursor: Option<EntryId>,
    /// Logical time the next recorded or replayed event gets.
    pub(crate) event_time: u64,

    pub(crate) call_stack: CallStack,
    pub(crate) top_level_event_time: Option<u64>,
    pub(crate) host_callback_id: Option<i64>,

    extractor: SnapshotExtractor,
    pub(crate) elapsed_since_snapshot_ms: f64,

    last_inflate_snapshot_time: Option<u64>,
    last_inflate_map: Option<InflateMap>,

    /// Property records kept alive for the lifetime of the log. `None` once
    /// released.
    property_pins: Option<BTreeMap<PropertyId, PropertyRecord>>,
    /// Property table read back from a persisted log.
    pub(crate) property_records: Vec<PropertyRecord>,

    pub(crate) breakpoints: BreakpointEvaluator,
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        Self {
            config,
            modes: ModeStack::new(),
            context: None,
            arena: Arena::new(),
            events: EventList::new(),
            cursor: None,
            event_time: 0,
            call_stack: CallStack::new(),
            top_level_event_time: None,
            host_callback_id: None,
            extractor: SnapshotExtractor::new(),
            elapsed_since_snapshot_ms: 0.0,
            last_inflate_snapshot_time: None,
            last_inflate_map: None,
            property_pins: Some(BTreeMap::new()),
            property_records: Vec::new(),
            breakpoints: BreakpointEvaluator::default(),
        }
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.config
    }

    /// Encoding used by the next `emit_log`.
    pub fn set_log_format(&mut self, format: LogFormat) {
        self.config.format = format;
    }

    pub fn events(&self) -> &EventList {
        &self.events
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// Logical time the next event will be assigned.
    pub fn event_time(&self) -> u64 {
        self.event_time
    }

    /// Next entry replay will consume.
    pub fn cursor(&self) -> Option<EntryId> {
        self.cursor
    }

    /// Time of the next entry replay will consume.
    pub fn cursor_time(&self) -> Option<u64> {
        self.cursor.map(|id| self.events.get(id).time)
    }

    pub fn entry_time(&self, id: EntryId) -> u64 {
        self.events.get(id).time
    }

    /// Property table of a parsed log.
    pub fn property_records(&self) -> &[PropertyRecord] {
        &self.property_records
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.extractor.snapshots_taken()
    }

    pub(crate) fn take_event_time(&mut self) -> u64 {
        let t = self.event_time;
        self.event_time += 1;
        t
    }

    /// Append an entry at the current time and advance the counter.
    pub(crate) fn append_entry(&mut self, kind: EntryKind) -> Result<EntryId, FatalError> {
        let time = self.take_event_time();
        self.events.append(time, kind)
    }

    /// Step past the entry under the cursor.
    pub(crate) fn advance_time_and_position_for_replay(&mut self) {
        self.event_time += 1;
        self.cursor = self.cursor.and_then(|id| self.events.next(id));
    }

    // ═══════════════════════════════════════════════════════════════
    // Modes
    // ═══════════════════════════════════════════════════════════════

    pub fn mode(&self) -> TtdMode {
        self.modes.computed()
    }

    fn update_computed_mode(&self) {
        if let Some(ctx) = &self.context {
            ctx.mirror.set(self.modes.computed());
        }
    }

    pub fn set_global_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        self.modes.set_global_mode(mode)?;
        self.update_computed_mode();
        Ok(())
    }

    pub fn push_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        self.modes.push_mode(mode)?;
        self.update_computed_mode();
        Ok(())
    }

    pub fn pop_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        self.modes.pop_mode(mode)?;
        self.update_computed_mode();
        Ok(())
    }

    pub fn set_into_debugging_mode(&mut self) -> Result<(), FatalError> {
        self.set_global_mode(TtdMode::DEBUGGING_ENABLED)
    }

    pub fn should_perform_record_action(&self) -> bool {
        self.modes.should_perform_record_action()
    }

    pub fn should_perform_debug_action(&self) -> bool {
        self.modes.should_perform_debug_action()
    }

    pub fn is_ttd_active(&self) -> bool {
        self.modes.is_ttd_active()
    }

    pub fn is_ttd_detached(&self) -> bool {
        self.modes.is_ttd_detached()
    }

    /// Whether newly created engine objects need identity tags.
    pub fn js_rt_should_tag_object(log: Option<&EventLog>) -> bool {
        log.is_some_and(|l| l.should_perform_record_action() || l.should_perform_debug_action())
    }

    pub(crate) fn require_record(&self, operation: &'static str) -> Result<(), FatalError> {
        if self.should_perform_record_action() {
            return Ok(());
        }
        Err(FatalError::ModeInconsistent {
            operation,
            required: TtdMode::RECORD_ENABLED,
            actual: self.mode(),
        })
    }

    pub(crate) fn require_debug(&self, operation: &'static str) -> Result<(), FatalError> {
        if self.should_perform_debug_action() {
            return Ok(());
        }
        Err(FatalError::ModeInconsistent {
            operation,
            required: TtdMode::DEBUGGING_ENABLED,
            actual: self.mode(),
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Script context
    // ═══════════════════════════════════════════════════════════════

    /// Attach `ctx` and return the mirror it reads the mode through.
    pub fn start_time_travel_on_script(&mut self, ctx: LogTag) -> Result<ModeMirror, FatalError> {
        if self.context.is_some() {
            return Err(FatalError::ContextAlreadyAttached);
        }
        let mirror = ModeMirror::new(self.modes.computed());
        self.context = Some(AttachedContext {
            tag: ctx,
            mirror: mirror.clone(),
        });
        debug!("attached script context {:?}", ctx);
        Ok(mirror)
    }

    pub fn stop_time_travel_on_script(&mut self, ctx: LogTag) -> Result<(), FatalError> {
        match &self.context {
            Some(attached) if attached.tag == ctx => {
                attached.mirror.set(TtdMode::DETACHED);
                self.context = None;
                debug!("detached script context {:?}", ctx);
                Ok(())
            }
            Some(_) => Err(FatalError::ContextMismatch(ctx)),
            None => Err(FatalError::NoContext),
        }
    }

    pub fn context_tag(&self) -> Result<LogTag, FatalError> {
        self.context.as_ref().map(|c| c.tag).ok_or(FatalError::NoContext)
    }

    // ═══════════════════════════════════════════════════════════════
    // Property records
    // ═══════════════════════════════════════════════════════════════

    /// Keep `record` alive for the lifetime of the log.
    pub fn add_property_record(&mut self, record: PropertyRecord) {
        match &mut self.property_pins {
            Some(pins) => {
                pins.insert(record.id, record);
            }
            None => warn!("property pins already released, ignoring {}", record.id),
        }
    }

    /// Pinned records in id order.
    pub fn pinned_property_records(&self) -> impl Iterator<Item = &PropertyRecord> {
        self.property_pins.iter().flat_map(|pins| pins.values())
    }

    pub fn init_for_ttd_record<H: ScriptHost + ?Sized>(
        &mut self,
        host: &H,
    ) -> Result<(), EventLogError> {
        std::fs::create_dir_all(&self.config.log_dir).map_err(PersistError::from)?;

        let first = self.config.first_custom_property_id;
        let max = host.max_property_id().0;
        for pid in first..max {
            if let Some(record) = host.property_record(PropertyId(pid)) {
                self.add_property_record(record);
            }
        }
        info!(
            "initialized for recording into {} ({} custom property records pinned)",
            self.config.log_dir.display(),
            self.pinned_property_records().count()
        );
        Ok(())
    }

    pub fn init_for_ttd_replay<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<(), EventLogError> {
        self.parse_log_into()?;

        let first = self.config.first_custom_property_id;
        let by_id: BTreeMap<PropertyId, PropertyRecord> = self
            .property_records
            .iter()
            .filter(|r| r.id.0 >= first)
            .map(|r| (r.id, r.clone()))
            .collect();

        if let Some(max) = by_id.keys().next_back().map(|p| p.0) {
            for pid in first..=max {
                let record = by_id
                    .get(&PropertyId(pid))
                    .ok_or(FatalError::PropertyIdGap(PropertyId(pid)))?;
                host.create_property_record(record)?;
                self.add_property_record(record.clone());
            }
        }
        info!(
            "initialized for replay from {} ({} entries, {} custom property records)",
            self.config.log_dir.display(),
            self.events.len(),
            by_id.len()
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // Call stack
    // ═══════════════════════════════════════════════════════════════

    fn tracking_calls(&self) -> bool {
        self.should_perform_record_action() || self.should_perform_debug_action()
    }

    pub fn push_call_event<H: SourceInfo + ?Sized>(
        &mut self,
        host: &H,
        body: BodyId,
    ) -> Result<FrameToken, FatalError> {
        if !self.is_ttd_active() {
            return Err(FatalError::ModeInconsistent {
                operation: "push_call_event",
                required: TtdMode::TTD_ACTIVE,
                actual: self.mode(),
            });
        }
        if !self.tracking_calls() {
            return Ok(FrameToken::untracked());
        }
        Ok(self
            .call_stack
            .push(body, host.display_name(body), self.event_time))
    }

    /// Pop the frame for a normal return.
    pub fn pop_call_event(&mut self, token: FrameToken) -> Result<(), FatalError> {
        self.pop_call_event_with(token, FrameExit::Normal).map(|_| ())
    }

    /// Pop the frame while an exception unwinds through it. Returns true
    /// when this frame is where the exception started.
    pub fn pop_call_event_exception(&mut self, token: FrameToken) -> Result<bool, FatalError> {
        self.pop_call_event_with(token, FrameExit::Unwinding)
    }

    pub fn pop_call_event_with(
        &mut self,
        token: FrameToken,
        exit: FrameExit,
    ) -> Result<bool, FatalError> {
        self.call_stack.pop(token, exit)
    }

    pub fn update_loop_count_info(&mut self) -> Result<(), FatalError> {
        if !self.tracking_calls() {
            return Ok(());
        }
        self.call_stack.update_loop_count()
    }

    /// Track statement movement in the top frame. Returns true when
    /// execution entered a new statement.
    pub fn update_current_statement_info<H: SourceInfo + ?Sized>(
        &mut self,
        host: &H,
        bytecode_offset: u32,
    ) -> Result<bool, FatalError> {
        if !self.tracking_calls() {
            return Ok(false);
        }
        self.call_stack
            .update_current_statement(bytecode_offset, |body, offset| {
                host.statement_for_offset(body, offset)
            })
    }

    pub fn has_immediate_return_frame(&self) -> bool {
        self.call_stack.immediate_return_frame().is_some()
    }

    pub fn has_immediate_exception_frame(&self) -> bool {
        self.call_stack.immediate_exception_frame().is_some()
    }

    pub fn clear_return_and_exception_frames(&mut self) {
        self.call_stack.clear_return_and_exception_frames();
    }

    /// Start a new top-level call. The stack must already be empty.
    pub fn reset_call_stack_for_top_level_call(
        &mut self,
        event_time: Option<u64>,
        host_callback_id: Option<i64>,
    ) -> Result<(), FatalError> {
        if !self.call_stack.is_empty() {
            return Err(FatalError::FrameMismatch {
                token_depth: 0,
                stack_depth: self.call_stack.len(),
            });
        }
        self.set_top_level(event_time, host_callback_id);
        Ok(())
    }

    pub(crate) fn set_top_level(&mut self, event_time: Option<u64>, host_callback_id: Option<i64>) {
        self.call_stack.reset();
        self.top_level_event_time = event_time;
        self.host_callback_id = host_callback_id;
    }

    pub fn current_top_level_event_time(&self) -> Option<u64> {
        self.top_level_event_time
    }

    pub fn current_host_callback_id(&self) -> Option<i64> {
        self.host_callback_id
    }

    /// The latest callback register (or cancel) action for `callback_id`.
    pub fn event_for_host_callback_id(&self, want_register: bool, callback_id: i64) -> Option<EntryId> {
        self.events
            .iter_backward()
            .find(|(_, entry)| {
                matches!(
                    &entry.kind,
                    EntryKind::Action {
                        action: ActionKind::Callback { is_cancel, created_callback_id, .. },
                        ..
                    } if *created_callback_id == callback_id && *is_cancel != want_register
                )
            })
            .map(|(id, _)| id)
    }

    // ═══════════════════════════════════════════════════════════════
    // Position queries
    // ═══════════════════════════════════════════════════════════════

    fn position_of<H: SourceInfo + ?Sized>(
        &self,
        host: &H,
        frame: &SingleCallCounter,
        statement: Option<u32>,
        loop_time: u64,
    ) -> Position {
        let (line, column) = host.statement_position(frame.body, statement);
        Position {
            root_event_time: self.top_level_event_time,
            function_time: frame.function_time,
            loop_time,
            line,
            column,
            source_id: host.source_id(frame.body),
        }
    }

    /// Where execution is now.
    pub fn time_and_position<H: SourceInfo + ?Sized>(&self, host: &H) -> Result<Position, FatalError> {
        self.require_debug("time_and_position")?;
        let frame = self.call_stack.top()?;
        Ok(self.position_of(host, frame, frame.current_statement, frame.loop_time))
    }

    /// The position of the previous statement. At the start of a top-level
    /// callback there is none.
    pub fn previous_time_and_position<H: SourceInfo + ?Sized>(
        &self,
        host: &H,
    ) -> Result<PreviousPosition, FatalError> {
        self.require_debug("previous_time_and_position")?;
        let frame = self.call_stack.top()?;

        match frame.last_statement {
            Some(statement) => Ok(PreviousPosition::At(self.position_of(
                host,
                frame,
                Some(statement),
                frame.last_statement_loop_time,
            ))),
            None => match self.call_stack.caller() {
                Some(caller) => Ok(PreviousPosition::At(self.position_of(
                    host,
                    caller,
                    caller.current_statement,
                    caller.current_statement_loop_time,
                ))),
                None => Ok(PreviousPosition::StartOfCallback {
                    root_event_time: self.top_level_event_time,
                }),
            },
        }
    }

    /// Where the last exception started, if a frame was unwound since the
    /// last push.
    pub fn exception_time_and_position<H: SourceInfo + ?Sized>(&self, host: &H) -> Option<Position> {
        self.call_stack.immediate_exception_frame().map(|frame| {
            self.position_of(
                host,
                frame,
                frame.current_statement,
                frame.current_statement_loop_time,
            )
        })
    }

    /// Where the frame that just returned was.
    pub fn immediate_return_time_and_position<H: SourceInfo + ?Sized>(
        &self,
        host: &H,
    ) -> Option<Position> {
        self.call_stack.immediate_return_frame().map(|frame| {
            self.position_of(
                host,
                frame,
                frame.current_statement,
                frame.current_statement_loop_time,
            )
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Checkpoints
    // ═══════════════════════════════════════════════════════════════

    pub fn elapsed_snapshot_time(&self) -> f64 {
        self.elapsed_since_snapshot_ms
    }

    pub fn increment_elapsed_snapshot_time(&mut self, ms: f64) {
        self.elapsed_since_snapshot_ms += ms;
    }

    /// Whether enough execution time has accrued for another checkpoint.
    pub fn should_take_snapshot(&self) -> bool {
        self.elapsed_since_snapshot_ms > self.config.snapshot_interval_ms
    }

    fn extract_snapshot<H: SnapshotHost + ?Sized>(
        &mut self,
        host: &H,
        first_snap: bool,
    ) -> Result<SnapShot, HostError> {
        let ctx = host.snapshot_context()?;
        self.extractor.begin_snapshot(vec![ctx], first_snap);
        self.extractor.do_mark_walk(host)?;
        self.extractor.evacuate_marked_into_snapshot(host)?;
        Ok(self.extractor.complete_snapshot())
    }

    /// Capture the attached context into a new checkpoint entry.
    pub fn do_snapshot_extract<H: SnapshotHost + ?Sized>(
        &mut self,
        host: &H,
        first_snap: bool,
    ) -> Result<EntryId, EventLogError> {
        self.context_tag()?;
        let snap = self.extract_snapshot(host, first_snap)?;
        let (log_tag, identity_tag) = host.current_tags();

        let time = self.event_time;
        let info = CheckpointInfo::new(CheckpointKind::Snapshot, snap, time, log_tag, identity_tag);
        let id = self.append_entry(EntryKind::Snapshot(info))?;
        self.elapsed_since_snapshot_ms = 0.0;

        info!("checkpoint taken at event time {}", time);
        Ok(id)
    }

    /// Attach a ready-to-run snapshot to the root call under the cursor if
    /// it does not have one yet.
    pub fn do_rtr_snap_if_needed<H: SnapshotHost + ?Sized>(
        &mut self,
        host: &H,
    ) -> Result<(), EventLogError> {
        self.context_tag()?;
        let id = self.cursor.ok_or_else(AbortRequest::end_of_log)?;
        let entry = self.events.get(id);
        if !entry.kind.is_root_call() {
            return Err(FatalError::UnexpectedEntry {
                expected: "root callFunction",
                found: entry.kind.name(),
                time: entry.time,
            }
            .into());
        }
        if entry.kind.checkpoint().is_some() {
            return Ok(());
        }
        let time = entry.time;

        let snap = self.extract_snapshot(host, false)?;
        let (log_tag, identity_tag) = host.current_tags();
        if let EntryKind::Action {
            action: ActionKind::CallFunction { ready_to_run, .. },
            ..
        } = &mut self.events.get_mut(id).kind
        {
            *ready_to_run = Some(CheckpointInfo::new(
                CheckpointKind::ReadyToRun,
                snap,
                time,
                log_tag,
                identity_tag,
            ));
        }
        debug!("attached ready-to-run snapshot to call at {}", time);
        Ok(())
    }

    /// Nearest checkpoint at or before `target`.
    pub fn find_snap_time_for_event_time(&self, target: u64) -> Result<SnapTarget, FatalError> {
        let snap_time = self
            .events
            .iter_backward()
            .find(|(_, entry)| entry.time <= target && entry.kind.checkpoint().is_some())
            .map(|(_, entry)| entry.time)
            .ok_or(FatalError::MissingCheckpoint(target))?;

        let new_contexts_needed = self.last_inflate_map.is_none()
            || self.last_inflate_snapshot_time != Some(snap_time);
        debug!(
            "seek to {}: checkpoint at {} (fresh context: {})",
            target, snap_time, new_contexts_needed
        );
        Ok(SnapTarget {
            snap_time,
            new_contexts_needed,
        })
    }

    /// Forget the current context and inflate map before the host builds a
    /// fresh context.
    pub fn update_inflate_map_for_fresh_script_contexts(&mut self) {
        self.context = None;
        self.last_inflate_map = None;
    }

    /// Restore the checkpoint recorded at `etime` into the host.
    pub fn do_snapshot_inflate<H: ScriptHost + ?Sized>(
        &mut self,
        host: &mut H,
        etime: u64,
    ) -> Result<(), EventLogError> {
        self.context_tag()?;
        host.collect_garbage();

        let fresh = self.last_inflate_map.is_none();
        if fresh && self.config.unload_inactive_snapshots {
            if let Some(previous) = self.last_inflate_snapshot_time.filter(|t| *t != etime) {
                self.evict_snapshot_body(previous);
            }
        }

        let id = self
            .events
            .find_time(etime)
            .ok_or(FatalError::MissingCheckpoint(etime))?;
        let info = self
            .events
            .get_mut(id)
            .kind
            .checkpoint_mut()
            .ok_or(FatalError::MissingCheckpoint(etime))?;
        let restore_time = info.restore_event_time;
        let (log_tag, identity_tag) = (info.log_tag, info.identity_tag);
        let snap = info.ensure_loaded(&self.config.log_dir)?;

        let map = self.last_inflate_map.get_or_insert_with(InflateMap::new);
        if fresh {
            map.prep_for_initial_inflate(snap.inflate_counts());
            self.last_inflate_snapshot_time = Some(etime);
        } else {
            map.prep_for_re_inflate(snap.inflate_counts());
        }

        host.reset_tags_for_restore(log_tag, identity_tag);
        match inflate_snapshot(snap, host, map) {
            Ok(()) => map.cleanup_after_inflate(),
            Err(e) => {
                // the host heap is half built; the next seek needs a fresh context
                warn!("inflating checkpoint {} failed: {}", etime, e);
                self.last_inflate_map = None;
                self.last_inflate_snapshot_time = None;
                return Err(e);
            }
        }
        self.event_time = restore_time;

        self.cursor = self
            .events
            .iter_backward()
            .take_while(|(_, e)| e.time >= self.event_time)
            .find(|(_, e)| e.time == self.event_time)
            .map(|(id, _)| id);
        if self
            .cursor
            .is_some_and(|id| matches!(self.events.get(id).kind, EntryKind::Snapshot(_)))
        {
            self.advance_time_and_position_for_replay();
        }
        self.set_top_level(None, None);

        info!(
            "inflated checkpoint {} (fresh map: {}), resuming at event time {}",
            etime, fresh, self.event_time
        );
        Ok(())
    }

    fn evict_snapshot_body(&mut self, time: u64) {
        let Some(id) = self.events.find_time(time) else {
            return;
        };
        if let Some(info) = self.events.get_mut(id).kind.checkpoint_mut() {
            if info.unload() {
                debug!("evicted snapshot body for checkpoint {}", time);
            }
        }
    }

    /// Release the inflate map and the pinned property records.
    pub fn unload_retained_data(&mut self) {
        self.last_inflate_map = None;
        if let Some(pins) = self.property_pins.take() {
            debug!("released {} pinned property records", pins.len());
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.unload_retained_data();
    }
}

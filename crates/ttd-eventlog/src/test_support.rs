//! Mock host engine for unit tests.
//!
//! A toy heap of identity-tagged objects, a property table, a source map
//! and a handful of scripted functions. Each function records or replays
//! its nondeterministic inputs depending on the mode the log mirrors to the
//! host, so one script drives both sides of a session.

use crate::config::EventLogConfig;
use crate::entry::EntryId;
use crate::error::{EventLogError, HostError};
use crate::event_log::EventLog;
use crate::host::{ReplayAction, ScriptHost, SnapshotHost, SourceInfo, StatementSpan};
use crate::mode::{ModeMirror, TtdMode};
use crate::snapshot::{
    EnvId, HandlerId, HeapItem, HeapItemRef, HeapRef, InflateMap, LiveRef, SlotArrayId,
    SnapContext, SnapEnv, SnapFunctionBody, SnapFunctionInfo, SnapHandler, SnapHandlerProperty,
    SnapObject, SnapPrimitive, SnapSlotArray, SnapType, SnapValue, TypeId,
};
use crate::value::{
    BodyId, HostValue, IdentityTag, LogTag, PropertyAttributes, PropertyId, PropertyRecord,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Reads the clock, enumerates three properties, calls one host function.
pub(crate) const FN_FIRST: LogTag = LogTag(101);
/// Reads the clock once.
pub(crate) const FN_SECOND: LogTag = LogTag(102);
/// Calls a host function that calls back into script.
pub(crate) const FN_CALLBACK_HOST: LogTag = LogTag(103);
pub(crate) const FN_CALLBACK: LogTag = LogTag(104);
/// Calls `inner` recursively `recursion_depth` times.
pub(crate) const FN_NESTED_OUTER: LogTag = LogTag(105);

const INNER_BODY: BodyId = BodyId(16);
const CLOSURE_BODY: BodyId = BodyId(1);

const CONTEXT: LogTag = LogTag(1);
const GLOBAL: IdentityTag = IdentityTag(1);
const TARGET: IdentityTag = IdentityTag(2);
const CLOSURE: IdentityTag = IdentityTag(3);
const BOXED: IdentityTag = IdentityTag(4);

pub(crate) fn scenario_config(dir: &Path) -> EventLogConfig {
    EventLogConfig::with_log_dir(dir)
}

/// What a scripted function saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observed {
    Clock(f64),
    Property(String),
    External(HostValue),
    Entropy(u64),
    CallbackRan,
    Action(String),
}

#[derive(Debug, Clone, PartialEq)]
struct MockObject {
    type_id: TypeId,
    props: Vec<(PropertyId, SnapValue)>,
    primitive: Option<SnapValue>,
    function: Option<SnapFunctionInfo>,
}

impl MockObject {
    fn plain(tag: IdentityTag, props: Vec<(PropertyId, SnapValue)>) -> Self {
        Self {
            type_id: TypeId(tag.0),
            props,
            primitive: None,
            function: None,
        }
    }
}

#[derive(Debug, Clone)]
struct MockBody {
    name: &'static str,
    first_line: u32,
}

enum External {
    Fixed,
    Callback,
}

pub(crate) struct MockHost {
    context: LogTag,
    global: IdentityTag,
    objects: BTreeMap<IdentityTag, MockObject>,
    envs: BTreeMap<EnvId, (Option<EnvId>, SlotArrayId)>,
    slot_arrays: BTreeMap<SlotArrayId, Vec<SnapValue>>,
    bodies: BTreeMap<BodyId, MockBody>,
    functions: BTreeMap<LogTag, BodyId>,
    properties: BTreeMap<PropertyId, PropertyRecord>,
    next_pid: u32,

    staged_types: HashMap<TypeId, Option<HandlerId>>,
    staged_handlers: HashMap<HandlerId, Vec<PropertyId>>,
    next_live: u64,

    next_log_tag: u64,
    next_identity: u64,
    mirror: Option<ModeMirror>,
    next_clock: f64,
    next_entropy: u64,
    root_nesting: i32,
    in_script: u32,

    pub(crate) observed: Vec<Observed>,
    pub(crate) pause_after_clock: bool,
    pub(crate) recursion_depth: u32,
    pub(crate) contexts_created: u32,
}

impl MockHost {
    pub(crate) fn with_sample_heap() -> Self {
        let mut host = Self {
            context: CONTEXT,
            global: GLOBAL,
            objects: BTreeMap::new(),
            envs: BTreeMap::new(),
            slot_arrays: BTreeMap::new(),
            bodies: BTreeMap::new(),
            functions: BTreeMap::new(),
            properties: BTreeMap::new(),
            next_pid: EventLogConfig::default().first_custom_property_id,
            staged_types: HashMap::new(),
            staged_handlers: HashMap::new(),
            next_live: 0,
            next_log_tag: 200,
            next_identity: 100,
            mirror: None,
            next_clock: 1000.0,
            next_entropy: 0x5eed,
            root_nesting: 0,
            in_script: 0,
            observed: Vec::new(),
            pause_after_clock: false,
            recursion_depth: 1,
            contexts_created: 0,
        };

        let a = host.intern("a");
        let b = host.intern("b");
        let c = host.intern("c");
        let target = host.intern("target");
        let closure = host.intern("closure");
        let boxed = host.intern("boxed");

        for (body, name) in [
            (CLOSURE_BODY, "closure"),
            (BodyId(11), "first"),
            (BodyId(12), "second"),
            (BodyId(13), "callbackHost"),
            (BodyId(14), "callback"),
            (BodyId(15), "outer"),
            (INNER_BODY, "inner"),
        ] {
            host.bodies.insert(
                body,
                MockBody {
                    name,
                    first_line: body.0 as u32 * 10,
                },
            );
        }
        host.functions.insert(FN_FIRST, BodyId(11));
        host.functions.insert(FN_SECOND, BodyId(12));
        host.functions.insert(FN_CALLBACK_HOST, BodyId(13));
        host.functions.insert(FN_CALLBACK, BodyId(14));
        host.functions.insert(FN_NESTED_OUTER, BodyId(15));

        host.objects.insert(
            GLOBAL,
            MockObject::plain(
                GLOBAL,
                vec![
                    (target, SnapValue::Ref(TARGET)),
                    (closure, SnapValue::Ref(CLOSURE)),
                    (boxed, SnapValue::Ref(BOXED)),
                ],
            ),
        );
        host.objects.insert(
            TARGET,
            MockObject::plain(
                TARGET,
                vec![
                    (a, SnapValue::Int(1)),
                    (b, SnapValue::String("two".into())),
                    (c, SnapValue::Ref(GLOBAL)),
                ],
            ),
        );
        let mut closure_obj = MockObject::plain(CLOSURE, vec![]);
        closure_obj.function = Some(SnapFunctionInfo {
            body: CLOSURE_BODY,
            scope: Some(EnvId(1)),
        });
        host.objects.insert(CLOSURE, closure_obj);
        let mut boxed_obj = MockObject::plain(BOXED, vec![]);
        boxed_obj.primitive = Some(SnapValue::String("boxed".into()));
        host.objects.insert(BOXED, boxed_obj);

        host.envs.insert(EnvId(1), (None, SlotArrayId(1)));
        host.slot_arrays
            .insert(SlotArrayId(1), vec![SnapValue::Int(42), SnapValue::Ref(TARGET)]);
        host
    }

    fn intern(&mut self, name: &str) -> PropertyId {
        let pid = PropertyId(self.next_pid);
        self.next_pid += 1;
        self.properties.insert(pid, PropertyRecord::named(pid, name));
        pid
    }

    pub(crate) fn context_tag(&self) -> LogTag {
        self.context
    }

    pub(crate) fn global_tag(&self) -> IdentityTag {
        self.global
    }

    pub(crate) fn enum_target(&self) -> IdentityTag {
        TARGET
    }

    pub(crate) fn body_of(&self, function: LogTag) -> BodyId {
        self.functions.get(&function).copied().unwrap_or(INNER_BODY)
    }

    pub(crate) fn mode(&self) -> TtdMode {
        self.mirror.as_ref().map_or(TtdMode::DISABLED, ModeMirror::get)
    }

    fn recording(&self) -> bool {
        let mode = self.mode();
        mode.contains(TtdMode::RECORD_ENABLED) && !mode.contains(TtdMode::EXCLUDED_EXECUTION)
    }

    pub(crate) fn custom_property_count(&self) -> usize {
        self.properties.len()
    }

    pub(crate) fn snapshot_context_for_test(&self) -> SnapContext {
        SnapContext {
            log_tag: self.context,
            global: self.global,
            roots: vec![],
        }
    }

    fn walk_reachable(&self) -> HashSet<IdentityTag> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.global]);
        while let Some(tag) = queue.pop_front() {
            if !seen.insert(tag) {
                continue;
            }
            let Some(obj) = self.objects.get(&tag) else {
                continue;
            };
            let mut values: Vec<&SnapValue> = obj.props.iter().map(|(_, v)| v).collect();
            values.extend(obj.primitive.iter());
            let mut env = obj.function.as_ref().and_then(|f| f.scope);
            while let Some(id) = env {
                let Some((parent, slots)) = self.envs.get(&id) else {
                    break;
                };
                values.extend(self.slot_arrays.get(slots).into_iter().flatten());
                env = *parent;
            }
            queue.extend(values.into_iter().filter_map(SnapValue::as_ref_tag));
        }
        seen
    }

    /// Reachable plain objects (boxed primitives excluded).
    pub(crate) fn reachable_object_count(&self) -> usize {
        self.walk_reachable()
            .iter()
            .filter(|tag| self.objects.get(tag).is_some_and(|o| o.primitive.is_none()))
            .count()
    }

    pub(crate) fn total_object_count(&self) -> usize {
        self.objects.values().filter(|o| o.primitive.is_none()).count()
    }

    pub(crate) fn alloc_garbage_object(&mut self) -> IdentityTag {
        let tag = IdentityTag(self.next_identity);
        self.next_identity += 1;
        self.objects.insert(tag, MockObject::plain(tag, vec![]));
        tag
    }

    /// Mutate the reachable graph so it no longer matches any snapshot.
    pub(crate) fn scramble_heap(&mut self) {
        if let Some(target) = self.objects.get_mut(&TARGET) {
            if let Some((_, value)) = target.props.first_mut() {
                *value = SnapValue::Int(999);
            }
        }
        if let Some(global) = self.objects.get_mut(&GLOBAL) {
            global.props.pop();
        }
        self.alloc_garbage_object();
    }

    /// Identity-based description of the heap, independent of live refs.
    pub(crate) fn heap_fingerprint(&self) -> String {
        format!(
            "{:?}|{:?}|{:?}|{:?}",
            self.global, self.objects, self.envs, self.slot_arrays
        )
    }

    // ───────────────────────────────────────────────────────────────
    // Scripted execution
    // ───────────────────────────────────────────────────────────────

    /// Call `function` from the host while recording.
    pub(crate) fn call_function(
        &mut self,
        log: &mut EventLog,
        function: LogTag,
        root_depth: i32,
    ) -> Result<EntryId, EventLogError> {
        let body = self.body_of(function);
        let name = self.display_name(body);
        let id = log.record_js_rt_call_function(
            root_depth,
            None,
            self.next_clock,
            function,
            &name,
            &[HostValue::Int(root_depth)],
        )?;
        if root_depth == 0 {
            let time = log.entry_time(id);
            log.reset_call_stack_for_top_level_call(Some(time), None)?;
        }

        self.root_nesting += 1;
        let result = self.run_function(log, function);
        self.root_nesting -= 1;
        result?;

        log.complete_call_function_action(id, 1.0)?;
        Ok(id)
    }

    fn run_function(&mut self, log: &mut EventLog, function: LogTag) -> Result<(), EventLogError> {
        let body = self.body_of(function);
        let token = log.push_call_event(&*self, body)?;
        match function {
            FN_FIRST => {
                self.statement(log, 0)?;
                let t = self.read_clock(log)?;
                self.observed.push(Observed::Clock(t));
                if self.pause_after_clock {
                    log.pop_call_event(token)?;
                    return Ok(());
                }
                self.statement(log, 10)?;
                self.enumerate(log, TARGET)?;
                self.statement(log, 20)?;
                let v = self.external_call(log, "getFixed", External::Fixed)?;
                self.observed.push(Observed::External(v));
            }
            FN_SECOND => {
                self.statement(log, 0)?;
                let t = self.read_clock(log)?;
                self.observed.push(Observed::Clock(t));
                self.statement(log, 10)?;
            }
            FN_CALLBACK_HOST => {
                self.statement(log, 0)?;
                let v = self.external_call(log, "runCallback", External::Callback)?;
                self.observed.push(Observed::External(v));
            }
            FN_CALLBACK => {
                self.statement(log, 0)?;
                self.observed.push(Observed::CallbackRan);
                let v = self.read_entropy(log)?;
                self.observed.push(Observed::Entropy(v));
            }
            FN_NESTED_OUTER => {
                self.run_inner(log, self.recursion_depth)?;
                self.statement(log, 0)?;
            }
            other => return Err(HostError::new(format!("no script for {other:?}")).into()),
        }
        log.pop_call_event(token)?;
        Ok(())
    }

    fn run_inner(&mut self, log: &mut EventLog, depth: u32) -> Result<(), EventLogError> {
        if depth == 0 {
            return Ok(());
        }
        let token = log.push_call_event(&*self, INNER_BODY)?;
        self.run_inner(log, depth - 1)?;
        self.statement(log, 0)?;
        log.pop_call_event(token)?;
        Ok(())
    }

    fn statement(&mut self, log: &mut EventLog, offset: u32) -> Result<(), EventLogError> {
        if log.update_current_statement_info(&*self, offset)? {
            log.bp_check_and_action(&*self)?;
        }
        Ok(())
    }

    fn read_clock(&mut self, log: &mut EventLog) -> Result<f64, EventLogError> {
        if self.recording() {
            let t = self.next_clock;
            self.next_clock += 1000.0;
            log.record_date_time_event(t)?;
            Ok(t)
        } else {
            log.replay_date_time_event()
        }
    }

    fn read_entropy(&mut self, log: &mut EventLog) -> Result<u64, EventLogError> {
        if self.recording() {
            let v = self.next_entropy;
            self.next_entropy += 1;
            log.record_external_entropy_random_event(v)?;
            Ok(v)
        } else {
            log.replay_external_entropy_random_event()
        }
    }

    fn enumerate(&mut self, log: &mut EventLog, object: IdentityTag) -> Result<(), EventLogError> {
        if self.recording() {
            let props: Vec<(PropertyId, String)> = self
                .objects
                .get(&object)
                .map(|o| {
                    o.props
                        .iter()
                        .map(|(pid, _)| (*pid, self.properties[pid].name.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for (pid, name) in props {
                log.record_property_enum_event(
                    true,
                    pid,
                    PropertyAttributes::ENUMERABLE,
                    Some(&name),
                )?;
                self.observed.push(Observed::Property(name));
            }
            log.record_property_enum_event(
                false,
                PropertyId::NO_PROPERTY,
                PropertyAttributes::NONE,
                None,
            )?;
        } else {
            loop {
                let step = log.replay_property_enum_event(&*self, object)?;
                if !step.return_code {
                    break;
                }
                self.observed
                    .push(Observed::Property(step.name.unwrap_or_default()));
            }
        }
        Ok(())
    }

    fn external_call(
        &mut self,
        log: &mut EventLog,
        name: &str,
        kind: External,
    ) -> Result<HostValue, EventLogError> {
        if !self.recording() {
            return log.replay_external_call_event(self);
        }
        let depth = self.root_nesting - 1;
        log.record_external_call_begin_event(name, depth, self.next_clock)?;
        let value = match kind {
            External::Fixed => HostValue::Int(7),
            External::Callback => {
                self.call_function(log, FN_CALLBACK, 1)?;
                HostValue::Bool(true)
            }
        };
        log.record_external_call_end_event(name, depth, &value)?;
        Ok(value)
    }

    fn live_object(&self, tag: IdentityTag) -> Result<&MockObject, HostError> {
        self.objects
            .get(&tag)
            .ok_or_else(|| HostError::new(format!("no live object {tag:?}")))
    }

    fn next_live_ref(&mut self) -> LiveRef {
        self.next_live += 1;
        LiveRef(self.next_live)
    }
}

impl SourceInfo for MockHost {
    fn statement_for_offset(&self, body: BodyId, offset: u32) -> Option<StatementSpan> {
        self.bodies.get(&body)?;
        let index = offset / 10;
        Some(StatementSpan {
            index,
            begin: index * 10,
            end: index * 10 + 9,
        })
    }

    fn statement_position(&self, body: BodyId, statement: Option<u32>) -> (u32, u32) {
        let first_line = self.bodies.get(&body).map_or(0, |b| b.first_line);
        match statement {
            Some(index) => (first_line + index, 4),
            None => (first_line, 0),
        }
    }

    fn source_id(&self, body: BodyId) -> u32 {
        body.0 as u32
    }

    fn display_name(&self, body: BodyId) -> String {
        self.bodies
            .get(&body)
            .map_or_else(|| format!("body#{}", body.0), |b| b.name.to_string())
    }
}

impl SnapshotHost for MockHost {
    fn snapshot_context(&self) -> Result<SnapContext, HostError> {
        Ok(self.snapshot_context_for_test())
    }

    fn describe(&self, item: HeapRef) -> Result<HeapItem, HostError> {
        match item {
            HeapRef::Object(tag) => {
                let obj = self.live_object(tag)?;
                Ok(match &obj.primitive {
                    Some(value) => HeapItem::Primitive(SnapPrimitive {
                        tag,
                        type_id: obj.type_id,
                        value: value.clone(),
                    }),
                    None => HeapItem::Object(SnapObject {
                        tag,
                        type_id: obj.type_id,
                        slots: obj.props.iter().map(|(_, v)| v.clone()).collect(),
                        function: obj.function.clone(),
                    }),
                })
            }
            HeapRef::Type(id) => {
                self.live_object(IdentityTag(id.0))?;
                Ok(HeapItem::Type(SnapType {
                    id,
                    handler: Some(HandlerId(id.0)),
                    prototype: SnapValue::Null,
                }))
            }
            HeapRef::Handler(id) => {
                let obj = self.live_object(IdentityTag(id.0))?;
                Ok(HeapItem::Handler(SnapHandler {
                    id,
                    properties: obj
                        .props
                        .iter()
                        .map(|(pid, _)| SnapHandlerProperty {
                            pid: *pid,
                            attributes: PropertyAttributes::ENUMERABLE,
                        })
                        .collect(),
                }))
            }
            HeapRef::Body(id) => Ok(HeapItem::Body(SnapFunctionBody {
                id,
                name: self.display_name(id),
                source_id: self.source_id(id),
            })),
            HeapRef::Env(id) => {
                let (parent, slots) = self
                    .envs
                    .get(&id)
                    .ok_or_else(|| HostError::new(format!("no env {id:?}")))?;
                Ok(HeapItem::Env(SnapEnv {
                    id,
                    parent: *parent,
                    slots: *slots,
                }))
            }
            HeapRef::SlotArray(id) => {
                let values = self
                    .slot_arrays
                    .get(&id)
                    .ok_or_else(|| HostError::new(format!("no slot array {id:?}")))?;
                Ok(HeapItem::SlotArray(SnapSlotArray {
                    id,
                    values: values.clone(),
                }))
            }
        }
    }

    fn current_tags(&self) -> (LogTag, IdentityTag) {
        (LogTag(self.next_log_tag), IdentityTag(self.next_identity))
    }

    fn reset_tags_for_restore(&mut self, log_tag: LogTag, identity_tag: IdentityTag) {
        self.next_log_tag = log_tag.0;
        self.next_identity = identity_tag.0;
    }

    fn begin_inflate(&mut self, _ctx: &SnapContext) -> Result<(), HostError> {
        self.objects.clear();
        self.envs.clear();
        self.slot_arrays.clear();
        self.staged_types.clear();
        self.staged_handlers.clear();
        Ok(())
    }

    fn materialize(
        &mut self,
        item: HeapItemRef<'_>,
        reuse: Option<LiveRef>,
    ) -> Result<LiveRef, HostError> {
        let live = match reuse {
            Some(live) => live,
            None => self.next_live_ref(),
        };
        match item {
            HeapItemRef::Handler(h) => {
                self.staged_handlers
                    .insert(h.id, h.properties.iter().map(|p| p.pid).collect());
            }
            HeapItemRef::Type(t) => {
                self.staged_types.insert(t.id, t.handler);
            }
            HeapItemRef::Body(_) => {}
            HeapItemRef::SlotArray(s) => {
                self.slot_arrays.insert(s.id, Vec::new());
            }
            HeapItemRef::Env(e) => {
                self.envs.insert(e.id, (e.parent, e.slots));
            }
            HeapItemRef::Primitive(p) => {
                let mut obj = MockObject::plain(p.tag, vec![]);
                obj.type_id = p.type_id;
                obj.primitive = Some(p.value.clone());
                self.objects.insert(p.tag, obj);
            }
            HeapItemRef::Object(o) => {
                let mut obj = MockObject::plain(o.tag, vec![]);
                obj.type_id = o.type_id;
                obj.function = o.function.clone();
                self.objects.insert(o.tag, obj);
            }
        }
        Ok(live)
    }

    fn link(
        &mut self,
        _live: LiveRef,
        item: HeapItemRef<'_>,
        map: &InflateMap,
    ) -> Result<(), EventLogError> {
        match item {
            HeapItemRef::Object(o) => {
                for tag in o.slots.iter().filter_map(SnapValue::as_ref_tag) {
                    map.lookup_object(tag)?;
                }
                let pids = self
                    .staged_types
                    .get(&o.type_id)
                    .copied()
                    .flatten()
                    .and_then(|h| self.staged_handlers.get(&h))
                    .cloned()
                    .unwrap_or_default();
                if pids.len() != o.slots.len() {
                    return Err(HostError::new(format!(
                        "handler for {:?} has {} properties, object has {} slots",
                        o.tag,
                        pids.len(),
                        o.slots.len()
                    ))
                    .into());
                }
                let obj = self
                    .objects
                    .get_mut(&o.tag)
                    .ok_or_else(|| HostError::new(format!("{:?} not materialized", o.tag)))?;
                obj.props = pids.into_iter().zip(o.slots.iter().cloned()).collect();
            }
            HeapItemRef::SlotArray(s) => {
                for tag in s.values.iter().filter_map(SnapValue::as_ref_tag) {
                    map.lookup_object(tag)?;
                }
                self.slot_arrays.insert(s.id, s.values.clone());
            }
            HeapItemRef::Primitive(p) => {
                if let Some(tag) = p.value.as_ref_tag() {
                    map.lookup_object(tag)?;
                }
            }
            HeapItemRef::Handler(_)
            | HeapItemRef::Type(_)
            | HeapItemRef::Body(_)
            | HeapItemRef::Env(_) => {}
        }
        Ok(())
    }

    fn finish_inflate(&mut self, ctx: &SnapContext, map: &InflateMap) -> Result<(), HostError> {
        map.lookup_object(ctx.global)
            .map_err(|e| HostError::new(e.to_string()))?;
        self.global = ctx.global;
        self.context = ctx.log_tag;
        self.staged_types.clear();
        self.staged_handlers.clear();
        Ok(())
    }
}

impl ScriptHost for MockHost {
    fn max_property_id(&self) -> PropertyId {
        PropertyId(self.next_pid)
    }

    fn property_record(&self, pid: PropertyId) -> Option<PropertyRecord> {
        self.properties.get(&pid).cloned()
    }

    fn create_property_record(&mut self, record: &PropertyRecord) -> Result<(), HostError> {
        match self.properties.get(&record.id) {
            Some(existing) if existing.name != record.name => Err(HostError::new(format!(
                "property {} is already {:?}",
                record.id, existing.name
            ))),
            Some(_) => Ok(()),
            None => {
                self.properties.insert(record.id, record.clone());
                self.next_pid = self.next_pid.max(record.id.0 + 1);
                Ok(())
            }
        }
    }

    fn property_index(&self, object: IdentityTag, pid: PropertyId) -> Result<u32, HostError> {
        let obj = self.live_object(object)?;
        obj.props
            .iter()
            .position(|(p, _)| *p == pid)
            .map(|i| i as u32)
            .ok_or_else(|| HostError::new(format!("{object:?} has no property {pid}")))
    }

    fn property_count(&self, object: IdentityTag) -> Result<u32, HostError> {
        Ok(self.live_object(object)?.props.len() as u32)
    }

    fn fresh_script_context(&mut self) -> Result<LogTag, HostError> {
        self.objects.clear();
        self.envs.clear();
        self.slot_arrays.clear();
        self.contexts_created += 1;
        Ok(self.context)
    }

    fn attach_mode(&mut self, mirror: ModeMirror) {
        self.mirror = Some(mirror);
    }

    fn enter_script(&mut self, context: LogTag) -> Result<(), HostError> {
        if context != self.context {
            return Err(HostError::new(format!("unknown context {context:?}")));
        }
        self.in_script += 1;
        Ok(())
    }

    fn leave_script(&mut self, _context: LogTag) {
        self.in_script = self.in_script.saturating_sub(1);
    }

    fn execute_action(
        &mut self,
        log: &mut EventLog,
        _context: LogTag,
        action: &ReplayAction,
    ) -> Result<(), EventLogError> {
        match action {
            ReplayAction::CallFunction { function, .. } => {
                self.root_nesting += 1;
                let result = self.run_function(log, *function);
                self.root_nesting -= 1;
                result
            }
            ReplayAction::AllocateNumber { value } => {
                self.observed
                    .push(Observed::Action(format!("allocate {value:?}")));
                Ok(())
            }
            other => {
                self.observed.push(Observed::Action(format!("{other:?}")));
                Ok(())
            }
        }
    }
}

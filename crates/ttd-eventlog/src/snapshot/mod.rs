//! Portable heap snapshots.
//!
//! A [`SnapShot`] is an immutable, address-free capture of a script
//! context: every reachable object plus the type handlers, types, function
//! bodies, environments, and slot arrays those objects point at. Objects are
//! named by [`IdentityTag`]; the other categories by host-assigned ids.
//!
//! Capture lives in [`extract`], restoration in [`inflate`].

pub mod extract;
pub mod inflate;

pub use extract::SnapshotExtractor;
pub use inflate::{inflate_snapshot, InflateCounts, InflateMap, LiveRef};

use crate::value::{BodyId, IdentityTag, LogTag, PropertyAttributes, PropertyId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotArrayId(pub u64);

/// A slot value inside a snapshot. References use identity tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "v", rename_all = "lowercase")]
pub enum SnapValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    String(String),
    Symbol(PropertyId),
    Ref(IdentityTag),
}

impl SnapValue {
    pub fn as_ref_tag(&self) -> Option<IdentityTag> {
        match self {
            SnapValue::Ref(tag) => Some(*tag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapContext {
    pub log_tag: LogTag,
    pub global: IdentityTag,
    /// Extra roots the context holds besides its global object.
    pub roots: Vec<IdentityTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapHandlerProperty {
    pub pid: PropertyId,
    pub attributes: PropertyAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapHandler {
    pub id: HandlerId,
    pub properties: Vec<SnapHandlerProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapType {
    pub id: TypeId,
    pub handler: Option<HandlerId>,
    pub prototype: SnapValue,
}

/// A boxed primitive (string, number, or boolean object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapPrimitive {
    pub tag: IdentityTag,
    pub type_id: TypeId,
    pub value: SnapValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapFunctionInfo {
    pub body: BodyId,
    pub scope: Option<EnvId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapObject {
    pub tag: IdentityTag,
    pub type_id: TypeId,
    pub slots: Vec<SnapValue>,
    pub function: Option<SnapFunctionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapFunctionBody {
    pub id: BodyId,
    pub name: String,
    pub source_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapEnv {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub slots: SlotArrayId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapSlotArray {
    pub id: SlotArrayId,
    pub values: Vec<SnapValue>,
}

/// Address of one item in the live heap, as the extractor asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapRef {
    Object(IdentityTag),
    Handler(HandlerId),
    Type(TypeId),
    Body(BodyId),
    Env(EnvId),
    SlotArray(SlotArrayId),
}

/// One item as the host describes it during capture.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapItem {
    Primitive(SnapPrimitive),
    Object(SnapObject),
    Handler(SnapHandler),
    Type(SnapType),
    Body(SnapFunctionBody),
    Env(SnapEnv),
    SlotArray(SnapSlotArray),
}

/// Borrowed view of one snapshot item, handed to the host during inflate.
#[derive(Debug, Clone, Copy)]
pub enum HeapItemRef<'a> {
    Primitive(&'a SnapPrimitive),
    Object(&'a SnapObject),
    Handler(&'a SnapHandler),
    Type(&'a SnapType),
    Body(&'a SnapFunctionBody),
    Env(&'a SnapEnv),
    SlotArray(&'a SnapSlotArray),
}

fn push_value_ref(out: &mut Vec<HeapRef>, value: &SnapValue) {
    if let Some(tag) = value.as_ref_tag() {
        out.push(HeapRef::Object(tag));
    }
}

impl HeapItem {
    pub fn heap_ref(&self) -> HeapRef {
        self.as_item_ref().heap_ref()
    }

    pub fn as_item_ref(&self) -> HeapItemRef<'_> {
        match self {
            HeapItem::Primitive(p) => HeapItemRef::Primitive(p),
            HeapItem::Object(o) => HeapItemRef::Object(o),
            HeapItem::Handler(h) => HeapItemRef::Handler(h),
            HeapItem::Type(t) => HeapItemRef::Type(t),
            HeapItem::Body(b) => HeapItemRef::Body(b),
            HeapItem::Env(e) => HeapItemRef::Env(e),
            HeapItem::SlotArray(s) => HeapItemRef::SlotArray(s),
        }
    }
}

impl HeapItemRef<'_> {
    pub fn heap_ref(&self) -> HeapRef {
        match self {
            HeapItemRef::Primitive(p) => HeapRef::Object(p.tag),
            HeapItemRef::Object(o) => HeapRef::Object(o.tag),
            HeapItemRef::Handler(h) => HeapRef::Handler(h.id),
            HeapItemRef::Type(t) => HeapRef::Type(t.id),
            HeapItemRef::Body(b) => HeapRef::Body(b.id),
            HeapItemRef::Env(e) => HeapRef::Env(e.id),
            HeapItemRef::SlotArray(s) => HeapRef::SlotArray(s.id),
        }
    }

    /// Outgoing edges, in slot order.
    pub fn references(&self) -> Vec<HeapRef> {
        let mut out = Vec::new();
        match self {
            HeapItemRef::Primitive(p) => {
                out.push(HeapRef::Type(p.type_id));
                push_value_ref(&mut out, &p.value);
            }
            HeapItemRef::Object(o) => {
                out.push(HeapRef::Type(o.type_id));
                for slot in &o.slots {
                    push_value_ref(&mut out, slot);
                }
                if let Some(f) = &o.function {
                    out.push(HeapRef::Body(f.body));
                    if let Some(scope) = f.scope {
                        out.push(HeapRef::Env(scope));
                    }
                }
            }
            HeapItemRef::Handler(_) | HeapItemRef::Body(_) => {}
            HeapItemRef::Type(t) => {
                if let Some(h) = t.handler {
                    out.push(HeapRef::Handler(h));
                }
                push_value_ref(&mut out, &t.prototype);
            }
            HeapItemRef::Env(e) => {
                if let Some(parent) = e.parent {
                    out.push(HeapRef::Env(parent));
                }
                out.push(HeapRef::SlotArray(e.slots));
            }
            HeapItemRef::SlotArray(s) => {
                for value in &s.values {
                    push_value_ref(&mut out, value);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapShot {
    pub contexts: Vec<SnapContext>,
    pub handlers: Vec<SnapHandler>,
    pub types: Vec<SnapType>,
    pub primitives: Vec<SnapPrimitive>,
    pub objects: Vec<SnapObject>,
    pub bodies: Vec<SnapFunctionBody>,
    pub envs: Vec<SnapEnv>,
    pub slot_arrays: Vec<SnapSlotArray>,
}

impl SnapShot {
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn env_count(&self) -> usize {
        self.envs.len()
    }

    pub fn slot_array_count(&self) -> usize {
        self.slot_arrays.len()
    }

    /// Per-category sizes used to pre-size an [`InflateMap`].
    pub fn inflate_counts(&self) -> InflateCounts {
        InflateCounts {
            contexts: self.context_count(),
            handlers: self.handler_count(),
            types: self.type_count(),
            objects: self.primitive_count() + self.object_count(),
            bodies: self.body_count(),
            envs: self.env_count(),
            slot_arrays: self.slot_array_count(),
        }
    }

    /// File an evacuated item into its category.
    pub(crate) fn add_item(&mut self, item: HeapItem) {
        match item {
            HeapItem::Primitive(p) => self.primitives.push(p),
            HeapItem::Object(o) => self.objects.push(o),
            HeapItem::Handler(h) => self.handlers.push(h),
            HeapItem::Type(t) => self.types.push(t),
            HeapItem::Body(b) => self.bodies.push(b),
            HeapItem::Env(e) => self.envs.push(e),
            HeapItem::SlotArray(s) => self.slot_arrays.push(s),
        }
    }

    /// Every item, dependencies first: handlers, types, bodies, slot
    /// arrays, environments, primitives, then objects.
    pub fn items(&self) -> impl Iterator<Item = HeapItemRef<'_>> {
        self.handlers
            .iter()
            .map(HeapItemRef::Handler)
            .chain(self.types.iter().map(HeapItemRef::Type))
            .chain(self.bodies.iter().map(HeapItemRef::Body))
            .chain(self.slot_arrays.iter().map(HeapItemRef::SlotArray))
            .chain(self.envs.iter().map(HeapItemRef::Env))
            .chain(self.primitives.iter().map(HeapItemRef::Primitive))
            .chain(self.objects.iter().map(HeapItemRef::Object))
    }

    pub fn find_object(&self, tag: IdentityTag) -> Option<&SnapObject> {
        self.objects.iter().find(|o| o.tag == tag)
    }
}

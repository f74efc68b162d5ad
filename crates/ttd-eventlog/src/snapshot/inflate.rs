//! Snapshot restoration into a live context.
//!
//! [`InflateMap`] maps snapshot items to the live objects materialized for
//! them. It survives across restores of the same lineage: on re-inflate the
//! previous mapping is kept aside so the host can reuse a live object for an
//! item it already built, and [`InflateMap::cleanup_after_inflate`] drops
//! that scratch copy once linking is done.

use super::{HeapRef, SnapShot};
use crate::error::{EventLogError, FatalError};
use crate::host::SnapshotHost;
use crate::value::IdentityTag;
use log::debug;
use std::collections::HashMap;

/// Opaque handle to a live host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRef(pub u64);

/// Per-category sizes of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflateCounts {
    pub contexts: usize,
    pub handlers: usize,
    pub types: usize,
    /// Primitives plus objects.
    pub objects: usize,
    pub bodies: usize,
    pub envs: usize,
    pub slot_arrays: usize,
}

impl InflateCounts {
    pub fn total(&self) -> usize {
        self.handlers + self.types + self.objects + self.bodies + self.envs + self.slot_arrays
    }
}

#[derive(Debug, Default)]
pub struct InflateMap {
    live: HashMap<HeapRef, LiveRef>,
    retained: HashMap<HeapRef, LiveRef>,
    counts: InflateCounts,
    inflate_count: u32,
}

impl InflateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prep_for_initial_inflate(&mut self, counts: InflateCounts) {
        self.live = HashMap::with_capacity(counts.total());
        self.retained.clear();
        self.counts = counts;
    }

    /// Keep the previous mapping aside for reuse and start a fresh one.
    pub fn prep_for_re_inflate(&mut self, counts: InflateCounts) {
        let previous = std::mem::replace(&mut self.live, HashMap::with_capacity(counts.total()));
        self.retained = previous;
        self.counts = counts;
    }

    pub fn cleanup_after_inflate(&mut self) {
        self.retained = HashMap::new();
        self.inflate_count += 1;
    }

    pub fn counts(&self) -> InflateCounts {
        self.counts
    }

    /// How many restores this map has completed.
    pub fn inflate_count(&self) -> u32 {
        self.inflate_count
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub(crate) fn insert(&mut self, item: HeapRef, live: LiveRef) {
        self.live.insert(item, live);
    }

    /// Live object built for `item` during a previous restore, if any.
    pub fn retained(&self, item: HeapRef) -> Option<LiveRef> {
        self.retained.get(&item).copied()
    }

    pub fn lookup(&self, item: HeapRef) -> Option<LiveRef> {
        self.live.get(&item).copied()
    }

    /// Resolve an object reference, failing if it was never materialized.
    pub fn lookup_object(&self, tag: IdentityTag) -> Result<LiveRef, FatalError> {
        self.lookup(HeapRef::Object(tag))
            .ok_or(FatalError::DanglingReference(tag.0))
    }
}

/// Restore the first context of `snap` into the host through `map`.
///
/// Every item is materialized before any is linked, so links may point
/// anywhere in the snapshot.
pub fn inflate_snapshot<H: SnapshotHost + ?Sized>(
    snap: &SnapShot,
    host: &mut H,
    map: &mut InflateMap,
) -> Result<(), EventLogError> {
    let ctx = snap.contexts.first().ok_or(FatalError::NoContext)?;
    host.begin_inflate(ctx)?;

    let mut reused = 0usize;
    let mut built = Vec::with_capacity(map.counts().total());
    for item in snap.items() {
        let key = item.heap_ref();
        let reuse = map.retained(key);
        reused += usize::from(reuse.is_some());
        let live = host.materialize(item, reuse)?;
        map.insert(key, live);
        built.push((live, item));
    }

    for (live, item) in built {
        host.link(live, item, map)?;
    }

    host.finish_inflate(ctx, map)?;
    debug!(
        "inflated {} items ({} reused from previous restore)",
        map.len(),
        reused
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockHost;

    fn capture(host: &MockHost) -> SnapShot {
        let mut extractor = crate::snapshot::SnapshotExtractor::new();
        extractor.begin_snapshot(vec![host.snapshot_context_for_test()], true);
        extractor.do_mark_walk(host).unwrap();
        extractor.evacuate_marked_into_snapshot(host).unwrap();
        extractor.complete_snapshot()
    }

    #[test]
    fn test_inflate_restores_graph() {
        let mut host = MockHost::with_sample_heap();
        let before = host.heap_fingerprint();
        let snap = capture(&host);

        host.scramble_heap();
        assert_ne!(host.heap_fingerprint(), before);

        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(snap.inflate_counts());
        inflate_snapshot(&snap, &mut host, &mut map).unwrap();
        map.cleanup_after_inflate();

        assert_eq!(host.heap_fingerprint(), before);
        assert_eq!(map.inflate_count(), 1);
    }

    #[test]
    fn test_re_inflate_reuses_live_objects() {
        let mut host = MockHost::with_sample_heap();
        let snap = capture(&host);

        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(snap.inflate_counts());
        inflate_snapshot(&snap, &mut host, &mut map).unwrap();
        map.cleanup_after_inflate();
        let first = host.heap_fingerprint();
        let global = map.lookup_object(host.global_tag()).unwrap();

        map.prep_for_re_inflate(snap.inflate_counts());
        assert_eq!(map.retained(HeapRef::Object(host.global_tag())), Some(global));
        inflate_snapshot(&snap, &mut host, &mut map).unwrap();
        map.cleanup_after_inflate();

        assert_eq!(host.heap_fingerprint(), first);
        assert_eq!(map.lookup_object(host.global_tag()).unwrap(), global);
        assert_eq!(map.retained(HeapRef::Object(host.global_tag())), None);
    }

    #[test]
    fn test_missing_object_is_dangling() {
        let map = InflateMap::new();
        assert_eq!(
            map.lookup_object(IdentityTag(99)),
            Err(FatalError::DanglingReference(99))
        );
    }
}

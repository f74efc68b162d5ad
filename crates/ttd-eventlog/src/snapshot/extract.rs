//! Snapshot capture: roots, mark walk, evacuation.
//!
//! The phases are separate calls so a host can interleave execution
//! between marking and evacuation. Marking records only [`HeapRef`]s;
//! evacuation asks the host for each marked item's contents and files it
//! into the snapshot.

use super::{HeapRef, SnapContext, SnapShot};
use crate::error::HostError;
use crate::host::SnapshotHost;
use log::{debug, info};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct SnapshotExtractor {
    contexts: Vec<SnapContext>,
    worklist: VecDeque<HeapRef>,
    seen: HashSet<HeapRef>,
    marked: Vec<HeapRef>,
    pending: Option<SnapShot>,
    first_snap: bool,
    snapshots_taken: u64,
}

impl SnapshotExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots completed so far.
    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken
    }

    /// Seed the walk with each context's global object and extra roots.
    pub fn begin_snapshot(&mut self, contexts: Vec<SnapContext>, first_snap: bool) {
        self.worklist.clear();
        self.seen.clear();
        self.marked.clear();
        self.pending = None;
        self.first_snap = first_snap;

        for ctx in &contexts {
            for root in std::iter::once(ctx.global).chain(ctx.roots.iter().copied()) {
                let r = HeapRef::Object(root);
                if self.seen.insert(r) {
                    self.worklist.push_back(r);
                }
            }
        }
        self.contexts = contexts;
    }

    /// Mark everything transitively reachable from the roots.
    pub fn do_mark_walk<H: SnapshotHost + ?Sized>(&mut self, host: &H) -> Result<(), HostError> {
        while let Some(r) = self.worklist.pop_front() {
            let item = host.describe(r)?;
            for edge in item.as_item_ref().references() {
                if self.seen.insert(edge) {
                    self.worklist.push_back(edge);
                }
            }
            self.marked.push(r);
        }
        debug!(
            "mark walk complete: {} items reachable (first snapshot: {})",
            self.marked.len(),
            self.first_snap
        );
        Ok(())
    }

    /// Copy every marked item out of the live heap.
    pub fn evacuate_marked_into_snapshot<H: SnapshotHost + ?Sized>(
        &mut self,
        host: &H,
    ) -> Result<(), HostError> {
        let mut snap = SnapShot {
            contexts: std::mem::take(&mut self.contexts),
            ..Default::default()
        };
        for r in self.marked.drain(..) {
            snap.add_item(host.describe(r)?);
        }
        self.pending = Some(snap);
        Ok(())
    }

    /// Hand back the finished snapshot and reset scratch state.
    pub fn complete_snapshot(&mut self) -> SnapShot {
        self.seen.clear();
        self.worklist.clear();
        self.snapshots_taken += 1;

        let snap = self.pending.take().unwrap_or_default();
        info!(
            "snapshot complete: {} objects, {} primitives, {} types, {} bodies",
            snap.object_count(),
            snap.primitive_count(),
            snap.type_count(),
            snap.body_count()
        );
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockHost;

    #[test]
    fn test_extract_reaches_every_live_object() {
        let host = MockHost::with_sample_heap();
        let ctx = host.snapshot_context_for_test();

        let mut extractor = SnapshotExtractor::new();
        extractor.begin_snapshot(vec![ctx], true);
        extractor.do_mark_walk(&host).unwrap();
        extractor.evacuate_marked_into_snapshot(&host).unwrap();
        let snap = extractor.complete_snapshot();

        assert_eq!(snap.context_count(), 1);
        assert_eq!(snap.object_count(), host.reachable_object_count());
        assert_eq!(extractor.snapshots_taken(), 1);
    }

    #[test]
    fn test_unreachable_objects_are_skipped() {
        let mut host = MockHost::with_sample_heap();
        host.alloc_garbage_object();
        let ctx = host.snapshot_context_for_test();

        let mut extractor = SnapshotExtractor::new();
        extractor.begin_snapshot(vec![ctx], false);
        extractor.do_mark_walk(&host).unwrap();
        extractor.evacuate_marked_into_snapshot(&host).unwrap();
        let snap = extractor.complete_snapshot();

        assert_eq!(snap.object_count(), host.reachable_object_count());
        assert!(snap.object_count() < host.total_object_count());
    }
}

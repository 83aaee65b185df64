//! Tri-color mark-sweep over the [`crate::heap::Heap`] arena.
//!
//! There is no persistent gray set: every heap object only ever needs one
//! bit of state (`marked`), because "gray" (reachable, not yet scanned) is
//! represented transiently by membership in the local worklist rather than
//! stored on the object. White is `!marked` before a pass starts, black is
//! `marked` once its children have been pushed. This is the usual
//! simplification for a stop-the-world collector that never interleaves
//! mutation with marking.
//!
//! Root scanning is the caller's job — [`collect`] takes an iterator of
//! root cells (VM registers, the live stack slice, the module table, the
//! current exception) rather than reaching into [`crate::vm::Vm`] itself,
//! so the heap and collector stay usable without a VM in tests.

use crate::cell::Cell;
use crate::heap::Heap;

/// Outcome of one collection pass, suitable for a `tracing` event at the
/// call site.
#[derive(Debug, Clone, Copy)]
pub struct GcStats {
    pub collected: usize,
    pub live_after: usize,
}

/// Runs one full mark-sweep pass rooted at `roots`. Returns how many
/// objects were reclaimed.
///
/// # Panics
/// In debug builds, panics if `roots` yields a cell whose `as_object_id`
/// points past the end of the arena — that indicates a dangling root was
/// retained past a previous collection, a caller bug this collector treats
/// as a hard invariant violation rather than something to paper over.
pub fn collect(heap: &mut Heap, roots: impl IntoIterator<Item = Cell>) -> GcStats {
    heap.unmark_all();

    let mut gray = Vec::new();
    for cell in roots {
        if let Some(id) = cell.as_object_id()
            && heap.mark(id)
        {
            gray.push(id);
        }
    }

    while let Some(id) = gray.pop() {
        // Collect children first: `trace_children` borrows the heap
        // immutably for its duration, and `heap.mark` needs `&mut`, so the
        // two can't interleave in one pass.
        let mut children = Vec::new();
        heap.trace_children(id, |child| children.push(child));
        for child in children {
            if let Some(cid) = child.as_object_id()
                && heap.mark(cid)
            {
                gray.push(cid);
            }
        }
    }

    let collected = heap.sweep();
    GcStats {
        collected,
        live_after: heap.live_count(),
    }
}

/// Adaptive trigger: starts at `min_threshold` and, once a collection fails
/// to bring the live set back under the threshold, doubles it rather than
/// thrashing every allocation. Mirrors the "threshold adapts upward" rule;
/// a single `Gc` instance is meant to live alongside one [`Heap`] for the
/// VM's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    threshold: usize,
    min_threshold: usize,
}

impl Trigger {
    #[must_use]
    pub fn new(min_threshold: usize) -> Self {
        Self {
            threshold: min_threshold,
            min_threshold,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn should_collect(&self, bytes_since_gc: usize) -> bool {
        bytes_since_gc >= self.threshold
    }

    /// Call after a collection completes; grows the threshold if the
    /// reclaimed fraction was small (the working set is genuinely large,
    /// not just garbage-heavy), otherwise relaxes back toward the minimum.
    pub fn adapt(&mut self, stats: GcStats) {
        let total = stats.collected + stats.live_after;
        if total == 0 {
            self.threshold = self.min_threshold;
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let reclaimed_fraction = stats.collected as f32 / total as f32;
        if reclaimed_fraction < 0.25 {
            self.threshold = (self.threshold * 2).max(self.min_threshold);
        } else {
            self.threshold = self.min_threshold;
        }
    }
}

#[cfg(test)]
mod tests {
    use smallvec::SmallVec;

    use super::*;
    use crate::cell::TypeId;
    use crate::heap::UserData;

    #[test]
    fn unreachable_object_is_collected() {
        let mut heap = Heap::new();
        let ty = TypeId::from_index(8);
        let _dangling = heap.alloc(ty, SmallVec::new(), UserData::None, false);
        let stats = collect(&mut heap, std::iter::empty());
        assert_eq!(stats.collected, 1);
        assert_eq!(stats.live_after, 0);
    }

    #[test]
    fn root_keeps_object_and_its_children_alive() {
        let mut heap = Heap::new();
        let ty = TypeId::from_index(8);
        let child = heap.alloc(ty, SmallVec::new(), UserData::None, false);
        let child_cell = Cell::ptr(ty, child);
        let parent = heap.alloc(ty, SmallVec::from_slice(&[child_cell]), UserData::None, false);
        let root = Cell::ptr(ty, parent);

        let stats = collect(&mut heap, std::iter::once(root));
        assert_eq!(stats.collected, 0);
        assert_eq!(stats.live_after, 2);
    }

    #[test]
    fn cycle_with_no_external_root_is_fully_collected() {
        let mut heap = Heap::new();
        let ty = TypeId::from_index(8);
        let a = heap.alloc(ty, SmallVec::new(), UserData::None, false);
        let b = heap.alloc(ty, SmallVec::from_slice(&[Cell::ptr(ty, a)]), UserData::None, false);
        heap.get_mut(a).slots.push(Cell::ptr(ty, b));

        let stats = collect(&mut heap, std::iter::empty());
        assert_eq!(stats.collected, 2);
        assert_eq!(stats.live_after, 0);
    }

    #[test]
    fn trigger_doubles_threshold_when_reclaim_fraction_is_low() {
        let mut trigger = Trigger::new(1024);
        trigger.adapt(GcStats {
            collected: 1,
            live_after: 99,
        });
        assert_eq!(trigger.threshold(), 2048);
    }

    #[test]
    fn trigger_resets_when_reclaim_fraction_is_high() {
        let mut trigger = Trigger::new(1024);
        trigger.adapt(GcStats {
            collected: 1,
            live_after: 99,
        });
        trigger.adapt(GcStats {
            collected: 90,
            live_after: 10,
        });
        assert_eq!(trigger.threshold(), 1024);
    }
}

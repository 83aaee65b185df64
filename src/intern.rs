//! Name pool: maps byte-sequences (identifiers) to compact 16-bit ids.
//!
//! Construction reserves ids for every magic name in a fixed, compiler-known
//! order (mirroring pocketpy's `__new__ .. __missing__` ordering) so that a
//! bytecode compiler built against this core can refer to them by enum
//! rather than by string lookup. Magic vs. ordinary is decided purely by
//! `id <= last_magic_id`, exactly as `py_ismagicname` does upstream.

use ahash::AHashMap;
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::error::{CoreResult, FatalError};

/// A 16-bit index into a [`NamePool`]. `NameId(0)` is never interned to;
/// it is reserved the same way `py_Name` reserves no sentinel of its own,
/// but we keep it free for callers that want an "absent name" niche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NameId(pub(crate) u16);

impl NameId {
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

/// Every dunder the dispatch layer and a compiler built against this core
/// need to refer to without a string comparison. Order is fixed: it is the
/// order ids are reserved in, and `__missing__` is deliberately last so that
/// `id <= MagicName::__missing__ as id` is the magic-name test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
#[allow(non_camel_case_types)]
pub enum MagicName {
    __new__,
    __init__,
    __del__,
    __repr__,
    __str__,
    __hash__,
    __eq__,
    __ne__,
    __lt__,
    __le__,
    __gt__,
    __ge__,
    __bool__,
    __len__,
    __iter__,
    __next__,
    __contains__,
    __getitem__,
    __setitem__,
    __delitem__,
    __call__,
    __get__,
    __set__,
    __enter__,
    __exit__,
    __add__,
    __radd__,
    __sub__,
    __rsub__,
    __mul__,
    __rmul__,
    __truediv__,
    __rtruediv__,
    __floordiv__,
    __rfloordiv__,
    __mod__,
    __rmod__,
    __pow__,
    __rpow__,
    __lshift__,
    __rlshift__,
    __rshift__,
    __rrshift__,
    __and__,
    __rand__,
    __or__,
    __ror__,
    __xor__,
    __rxor__,
    __matmul__,
    __rmatmul__,
    __neg__,
    __pos__,
    __invert__,
    __name__,
    __getattr__,
    /// Sentinel: the last magic name. Every id `<= __missing__` is magic.
    __missing__,
}

impl MagicName {
    /// The id this magic name is permanently reserved at. Ids start at 1;
    /// 0 is left free as an "absent name" niche.
    #[must_use]
    pub fn id(self) -> NameId {
        NameId(self as u16 + 1)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// The reflected-operator counterpart, where one is defined.
    /// Shift/bitwise/matmul reflected pairs exist but some binary operators
    /// (comparisons) reflect by swapping lt/gt and le/ge instead - that
    /// swap is handled in `dispatch::binaryop`, not here.
    #[must_use]
    pub fn reflected(self) -> Option<Self> {
        use MagicName::{
            __add__, __and__, __floordiv__, __lshift__, __matmul__, __mod__, __mul__, __or__, __pow__, __radd__,
            __rand__, __rfloordiv__, __rlshift__, __rmatmul__, __rmod__, __rmul__, __ror__, __rpow__, __rrshift__,
            __rshift__, __rsub__, __rtruediv__, __rxor__, __sub__, __truediv__, __xor__,
        };
        Some(match self {
            __add__ => __radd__,
            __sub__ => __rsub__,
            __mul__ => __rmul__,
            __truediv__ => __rtruediv__,
            __floordiv__ => __rfloordiv__,
            __mod__ => __rmod__,
            __pow__ => __rpow__,
            __lshift__ => __rlshift__,
            __rshift__ => __rrshift__,
            __and__ => __rand__,
            __or__ => __ror__,
            __xor__ => __rxor__,
            __matmul__ => __rmatmul__,
            _ => return None,
        })
    }
}

/// Reserved id for `"<module>"`, used as the default name for module-level
/// code objects and the synthetic top-level frame.
pub const MODULE_NAME_ID: NameId = NameId(MagicName::COUNT as u16 + 1);

/// Maps byte-sequences to compact 16-bit ids and back.
///
/// Magic names are reserved up front in [`MagicName`]'s declared order;
/// `"<module>"` is reserved immediately after. Everything interned later is
/// an ordinary name, deduplicated through an `ahash`-keyed map.
#[derive(Debug)]
pub struct NamePool {
    strings: Vec<Box<str>>,
    by_str: AHashMap<Box<str>, NameId>,
    last_magic_id: NameId,
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NamePool {
    #[must_use]
    pub fn new() -> Self {
        let mut strings = Vec::with_capacity(MagicName::COUNT + 1);
        let mut by_str = AHashMap::with_capacity(MagicName::COUNT + 1);
        // id 0 is deliberately left unused (the "absent name" niche).
        strings.push(Box::from(""));
        for magic in MagicName::iter() {
            let id = magic.id();
            debug_assert_eq!(id.0 as usize, strings.len());
            strings.push(Box::from(magic.as_str()));
            by_str.insert(Box::from(magic.as_str()), id);
        }
        let module_str: Box<str> = Box::from("<module>");
        debug_assert_eq!(MODULE_NAME_ID.0 as usize, strings.len());
        strings.push(module_str.clone());
        by_str.insert(module_str, MODULE_NAME_ID);

        Self {
            strings,
            by_str,
            last_magic_id: MagicName::__missing__.id(),
        }
    }

    /// Interns `bytes` (as UTF-8 text), returning its compact id.
    ///
    /// # Errors
    /// Returns [`FatalError::NamePoolExhausted`] once 16-bit id space (up to
    /// `u16::MAX`) is exhausted; this is a hard configuration limit and the
    /// VM should abort startup on it, never recover.
    pub fn intern(&mut self, name: &str) -> CoreResult<NameId> {
        if let Some(&id) = self.by_str.get(name) {
            return Ok(id);
        }
        if self.strings.len() > u16::MAX as usize {
            return Err(FatalError::NamePoolExhausted { max: u16::MAX as usize }.into());
        }
        let id = NameId(u16::try_from(self.strings.len()).expect("checked above"));
        let boxed: Box<str> = Box::from(name);
        self.strings.push(boxed.clone());
        self.by_str.insert(boxed, id);
        Ok(id)
    }

    /// Looks up a name by id. The returned view is stable for the pool's lifetime.
    ///
    /// # Panics
    /// Panics if `id` was never interned by this pool.
    #[must_use]
    pub fn lookup(&self, id: NameId) -> &str {
        &self.strings[id.0 as usize]
    }

    #[must_use]
    pub fn is_magic(&self, id: NameId) -> bool {
        id.0 != 0 && id <= self.last_magic_id
    }

    #[must_use]
    pub fn magic_id(&self, magic: MagicName) -> NameId {
        magic.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_lookup_roundtrip() {
        let mut pool = NamePool::new();
        let id = pool.intern("frobnicate").unwrap();
        assert_eq!(pool.lookup(id), "frobnicate");
        let id2 = pool.intern("frobnicate").unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn magic_names_are_magic_and_ordinary_are_not() {
        let mut pool = NamePool::new();
        assert!(pool.is_magic(MagicName::__add__.id()));
        assert!(pool.is_magic(MagicName::__missing__.id()));
        let ordinary = pool.intern("x").unwrap();
        assert!(!pool.is_magic(ordinary));
    }

    #[test]
    fn module_name_preinterned() {
        let pool = NamePool::new();
        assert_eq!(pool.lookup(MODULE_NAME_ID), "<module>");
    }
}

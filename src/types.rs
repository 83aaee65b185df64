//! Type registry: every registered Python type, its single base, its magic
//! method slot table, and its general attribute store.
//!
//! Lookup walks the base chain (single inheritance only, so "MRO" here is
//! just that chain) from the most-derived type up to `object`. Magic
//! methods live in a fixed-size slot array indexed by [`MagicName`] rather
//! than the general attribute store, so dispatch never pays a hash lookup
//! for `__add__`/`__getitem__`/etc. — the same separation the upstream
//! design keeps between "slots" and "ordinary dict lookup" for types.

use ahash::AHashMap;
use strum::{EnumCount, IntoEnumIterator};

use crate::attrs::AttrStore;
use crate::cell::{Cell, TypeId};
use crate::config;
use crate::error::{CoreResult, RaisedExc};
use crate::intern::{MagicName, NameId, NamePool};

/// One registered type's metadata.
#[derive(Debug)]
pub struct TypeObject {
    pub name: NameId,
    pub base: Option<TypeId>,
    magic_slots: Box<[Option<Cell>; MagicName::COUNT]>,
    pub attrs: AttrStore,
}

impl TypeObject {
    fn new(name: NameId, base: Option<TypeId>) -> Self {
        Self {
            name,
            base,
            magic_slots: Box::new([None; MagicName::COUNT]),
            attrs: AttrStore::new(config::DEFAULT_TYPE_ATTR_LOAD_FACTOR),
        }
    }

    fn magic_index(magic: MagicName) -> usize {
        magic as usize
    }

    #[must_use]
    pub fn own_magic(&self, magic: MagicName) -> Option<Cell> {
        self.magic_slots[Self::magic_index(magic)]
    }

    pub fn set_magic(&mut self, magic: MagicName, value: Cell) {
        self.magic_slots[Self::magic_index(magic)] = Some(value);
    }
}

/// Canonical built-in type ids, fixed at bootstrap so native code can refer
/// to them directly instead of by name lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypeIds {
    pub object: TypeId,
    pub r#type: TypeId,
    pub int: TypeId,
    pub float: TypeId,
    pub bool: TypeId,
    pub str: TypeId,
    pub str_iterator: TypeId,
    pub list: TypeId,
    pub tuple: TypeId,
    pub range: TypeId,
    pub range_iterator: TypeId,
    pub dict: TypeId,
    pub dict_items: TypeId,
    pub slice: TypeId,
    pub bytes: TypeId,
    pub function: TypeId,
    pub nativefunc: TypeId,
    pub bound_method: TypeId,
    pub super_: TypeId,
    pub property: TypeId,
    pub classmethod: TypeId,
    pub staticmethod: TypeId,
    pub star_wrapper: TypeId,
    pub module: TypeId,
    pub seq_iterator: TypeId,
    pub none_type: TypeId,
    pub not_implemented_type: TypeId,
    pub ellipsis_type: TypeId,
    pub base_exception: TypeId,
    pub exception: TypeId,
}

/// Holds every registered type plus a name -> id index for lookups driven
/// by source text (`isinstance(x, SomeType)` resolving `SomeType` by name).
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeObject>,
    by_name: AHashMap<NameId, TypeId>,
    pub builtins: BuiltinTypeIds,
}

impl TypeRegistry {
    /// Registers a brand-new type with `base` as its single superclass
    /// (`None` only for `object` itself).
    ///
    /// # Errors
    /// Propagates [`crate::error::FatalError::NamePoolExhausted`] if interning `name` overflows the pool.
    pub fn register(&mut self, names: &mut NamePool, name: &str, base: Option<TypeId>) -> CoreResult<TypeId> {
        let name_id = names.intern(name)?;
        let id = TypeId::from_index(self.types.len());
        self.types.push(TypeObject::new(name_id, base));
        self.by_name.insert(name_id, id);
        Ok(id)
    }

    /// Bootstraps the registry with every built-in type in the fixed order
    /// native code depends on, followed by the standard exception
    /// hierarchy (`BaseException` and its direct/indirect subclasses).
    ///
    /// # Errors
    /// Propagates name pool exhaustion, which can only happen if the name
    /// pool was already nearly full before this call.
    pub fn bootstrap(names: &mut NamePool) -> CoreResult<Self> {
        let mut registry = Self {
            types: vec![TypeObject::new(NameId(0), None)], // index 0: unused, aligns with TypeId::NIL
            by_name: AHashMap::new(),
            builtins: BuiltinTypeIds::default(),
        };

        let object = registry.register(names, "object", None)?;
        let r#type = registry.register(names, "type", Some(object))?;
        let int = registry.register(names, "int", Some(object))?;
        let float = registry.register(names, "float", Some(object))?;
        let bool_ = registry.register(names, "bool", Some(int))?;
        let str_ = registry.register(names, "str", Some(object))?;
        let str_iterator = registry.register(names, "str_iterator", Some(object))?;
        let list = registry.register(names, "list", Some(object))?;
        let tuple = registry.register(names, "tuple", Some(object))?;
        let range = registry.register(names, "range", Some(object))?;
        let range_iterator = registry.register(names, "range_iterator", Some(object))?;
        let dict = registry.register(names, "dict", Some(object))?;
        let dict_items = registry.register(names, "dict_items", Some(object))?;
        let slice = registry.register(names, "slice", Some(object))?;
        let bytes = registry.register(names, "bytes", Some(object))?;
        let function = registry.register(names, "function", Some(object))?;
        let nativefunc = registry.register(names, "nativefunc", Some(object))?;
        let bound_method = registry.register(names, "bound_method", Some(object))?;
        let super_ = registry.register(names, "super", Some(object))?;
        let property = registry.register(names, "property", Some(object))?;
        let classmethod = registry.register(names, "classmethod", Some(object))?;
        let staticmethod = registry.register(names, "staticmethod", Some(object))?;
        let star_wrapper = registry.register(names, "star_wrapper", Some(object))?;
        let module = registry.register(names, "module", Some(object))?;
        let seq_iterator = registry.register(names, "seq_iterator", Some(object))?;
        let none_type = registry.register(names, "NoneType", Some(object))?;
        let not_implemented_type = registry.register(names, "NotImplementedType", Some(object))?;
        let ellipsis_type = registry.register(names, "ellipsis", Some(object))?;
        let base_exception = registry.register(names, "BaseException", Some(object))?;
        let exception = registry.register(names, "Exception", Some(base_exception))?;

        registry.builtins = BuiltinTypeIds {
            object,
            r#type,
            int,
            float,
            bool: bool_,
            str: str_,
            str_iterator,
            list,
            tuple,
            range,
            range_iterator,
            dict,
            dict_items,
            slice,
            bytes,
            function,
            nativefunc,
            bound_method,
            super_,
            property,
            classmethod,
            staticmethod,
            star_wrapper,
            module,
            seq_iterator,
            none_type,
            not_implemented_type,
            ellipsis_type,
            base_exception,
            exception,
        };

        registry.register_standard_exceptions(names, base_exception, exception)?;
        Ok(registry)
    }

    fn register_standard_exceptions(&mut self, names: &mut NamePool, base_exception: TypeId, exception: TypeId) -> CoreResult<()> {
        // Direct BaseException children (control-flow signals, not "errors").
        for name in ["SystemExit", "KeyboardInterrupt", "StopIteration"] {
            self.register(names, name, Some(base_exception))?;
        }
        // Ordinary Exception subclasses.
        for name in [
            "TypeError",
            "ValueError",
            "AttributeError",
            "NameError",
            "IndexError",
            "KeyError",
            "ZeroDivisionError",
            "RuntimeError",
            "ImportError",
            "OSError",
            "SyntaxError",
            "AssertionError",
            "NotImplementedError",
        ] {
            self.register(names, name, Some(exception))?;
        }
        let name_error = self.find_by_name(names, "NameError").expect("just registered");
        self.register(names, "UnboundLocalError", Some(name_error))?;
        let runtime_error = self.find_by_name(names, "RuntimeError").expect("just registered");
        self.register(names, "StackOverflowError", Some(runtime_error))?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: TypeId) -> &TypeObject {
        &self.types[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeObject {
        &mut self.types[id.index()]
    }

    #[must_use]
    pub fn find_by_name(&self, names: &NamePool, name: &str) -> Option<TypeId> {
        // Name interning is intentionally not attempted here (a lookup miss
        // on a never-seen name must not mutate the pool); string comparison
        // against already-registered names is cheap enough for this path.
        self.by_name
            .iter()
            .find(|(id, _)| names.lookup(**id) == name)
            .map(|(_, ty)| *ty)
    }

    /// `true` if `sub` is `sup` or a (transitive) subclass of it.
    #[must_use]
    pub fn issubclass(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.get(id).base;
        }
        false
    }

    /// Walks `ty`'s base chain looking for a magic slot, returning the
    /// defining type alongside the value so callers can tell whether it
    /// came from `ty` itself or an ancestor (needed for the "subclass
    /// overrides the reflected operator" dispatch rule).
    #[must_use]
    pub fn find_magic(&self, ty: TypeId, magic: MagicName) -> Option<(TypeId, Cell)> {
        let mut current = Some(ty);
        while let Some(id) = current {
            if let Some(cell) = self.get(id).own_magic(magic) {
                return Some((id, cell));
            }
            current = self.get(id).base;
        }
        None
    }

    /// Walks `ty`'s base chain looking for an ordinary named attribute
    /// (methods, class variables) in each ancestor's attribute store.
    #[must_use]
    pub fn find_name(&self, ty: TypeId, name: NameId) -> Option<Cell> {
        let mut current = Some(ty);
        while let Some(id) = current {
            if let Some(cell) = self.get(id).attrs.get(name) {
                return Some(cell);
            }
            current = self.get(id).base;
        }
        None
    }

    /// Resolves `name` against `ty`'s base chain, checking the magic slot
    /// table first (for the rare case a caller does `getattr(cls,
    /// "__add__")` by plain name rather than through [`Self::find_magic`])
    /// and falling back to the ordinary attribute store.
    #[must_use]
    pub fn find_attr_including_magic(&self, ty: TypeId, name: NameId) -> Option<Cell> {
        if let Some(magic) = MagicName::iter().find(|m| m.id() == name)
            && let Some((_, cell)) = self.find_magic(ty, magic)
        {
            return Some(cell);
        }
        self.find_name(ty, name)
    }

    /// Builds the exception kind -> type id mapping once exceptions are
    /// registered, for `crate::error::RaisedExc` materialization.
    #[must_use]
    pub fn exception_type(&self, names: &NamePool, kind: crate::error::ExcKind) -> Option<TypeId> {
        let name: &'static str = kind.into();
        self.find_by_name(names, name)
    }

    /// Raises `exc` as a `TypeError` if the wrapped type doesn't resolve to
    /// a registered exception subclass; used by native code constructing
    /// `RaisedExc` values before the type registry existed in its final
    /// form (bootstrap-ordering guard).
    ///
    /// # Errors
    /// Returns the `RaisedExc` unchanged wrapped in `Err` if `kind` has no
    /// corresponding registered type, which should only happen before
    /// `bootstrap` completes.
    pub fn require_exception_type(&self, names: &NamePool, exc: &RaisedExc) -> CoreResult<TypeId> {
        self.exception_type(names, exc.kind)
            .ok_or_else(|| RaisedExc::value_error(format!("exception type '{}' is not registered", exc.kind)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_orders_builtin_types_as_expected() {
        let mut names = NamePool::new();
        let registry = TypeRegistry::bootstrap(&mut names).unwrap();
        assert_eq!(registry.builtins.object.index(), 1);
        assert_eq!(registry.builtins.r#type.index(), 2);
        assert_eq!(registry.builtins.int.index(), 3);
        assert_eq!(registry.builtins.float.index(), 4);
        assert_eq!(registry.builtins.bool.index(), 5);
        assert_eq!(registry.builtins.str.index(), 6);
        assert_eq!(registry.builtins.module.index(), 24);
        assert_eq!(registry.builtins.seq_iterator.index(), 25);
        assert_eq!(registry.builtins.base_exception.index(), 29);
        assert_eq!(registry.builtins.exception.index(), 30);
    }

    #[test]
    fn bool_is_subclass_of_int_which_is_subclass_of_object() {
        let mut names = NamePool::new();
        let registry = TypeRegistry::bootstrap(&mut names).unwrap();
        assert!(registry.issubclass(registry.builtins.bool, registry.builtins.int));
        assert!(registry.issubclass(registry.builtins.bool, registry.builtins.object));
        assert!(!registry.issubclass(registry.builtins.int, registry.builtins.bool));
    }

    #[test]
    fn magic_slot_lookup_walks_base_chain() {
        let mut names = NamePool::new();
        let mut registry = TypeRegistry::bootstrap(&mut names).unwrap();
        let marker = Cell::bool(registry.builtins.bool, true);
        registry.get_mut(registry.builtins.int).set_magic(MagicName::__add__, marker);
        let (defining_type, found) = registry.find_magic(registry.builtins.bool, MagicName::__add__).unwrap();
        assert_eq!(defining_type, registry.builtins.int);
        assert_eq!(found.as_bool(), Some(true));
    }

    #[test]
    fn name_error_subclasses_exception_and_unbound_local_subclasses_name_error() {
        let mut names = NamePool::new();
        let registry = TypeRegistry::bootstrap(&mut names).unwrap();
        let name_error = registry.find_by_name(&names, "NameError").unwrap();
        let unbound = registry.find_by_name(&names, "UnboundLocalError").unwrap();
        assert!(registry.issubclass(name_error, registry.builtins.exception));
        assert!(registry.issubclass(unbound, name_error));
    }
}

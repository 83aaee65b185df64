//! `super`, `property`, `classmethod`, `staticmethod`, `star_wrapper`: the
//! thin wrapper types spec §4's Value representation calls out as "semantics
//! defined by the dispatch layer" — each one is a near-empty slot holder
//! whose behavior lives entirely in a magic method rather than in any
//! bespoke storage.

use smallvec::SmallVec;

use crate::cell::{Cell, TypeId};
use crate::error::{CoreResult, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn str_contents(vm: &Vm, cell: Cell) -> &str {
    match cell.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::Str(s)) => s,
        _ => "",
    }
}

// ---------------------------------------------------------------------
// super: 1 slot (the bound object) + the type to resume the MRO walk
// from, stored as a first-class type value in slot 1.
// ---------------------------------------------------------------------

/// Allocates `super(start_after, obj)`: attribute lookups against the
/// result skip `start_after` itself and resume at its base, same as
/// Python's zero/two-argument `super()`.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_super(vm: &mut Vm, start_after: TypeId, obj: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.super_;
    let type_cell = Cell::type_value(vm.types.builtins.r#type, start_after);
    let slots = SmallVec::from_slice(&[obj, type_cell]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn super_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    // super(SomeClass, obj) -- args[0] is the `type` cell from `construct`,
    // args[1] is SomeClass, args[2] is obj.
    let Some(start_after) = args.get(1).and_then(|c| c.as_type_value()) else {
        return Err(RaisedExc::type_error("super() argument 1 must be a type").into());
    };
    let obj = args.get(2).copied().unwrap_or_else(|| vm.registers().none);
    new_super(vm, start_after, obj)
}

fn super_getattr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a super object").into());
    };
    let obj = vm.heap.get(id).slot(0);
    let Some(start_after) = vm.heap.get(id).slot(1).as_type_value() else {
        return Err(RaisedExc::type_error("corrupt super object").into());
    };
    let Some(resume_at) = vm.types.get(start_after).base else {
        return Err(RaisedExc::attribute_error("super", str_contents(vm, args[1])).into());
    };
    let name_text = str_contents(vm, args[1]).to_string();
    let name_id = vm.names.intern(&name_text)?;
    let Some(value) = vm.types.find_attr_including_magic(resume_at, name_id) else {
        return Err(RaisedExc::attribute_error("super", &name_text).into());
    };
    if let Some(get_id) = value.as_object_id() {
        let value_type = vm.heap.get(get_id).type_id;
        if let Some((_, getter)) = vm.types.find_magic(value_type, MagicName::__get__) {
            return crate::dispatch::call(vm, getter, &[value, obj]);
        }
    }
    Ok(value)
}

// ---------------------------------------------------------------------
// property: 2 slots (getter, setter); setter may be `none`, making it
// read-only and a data descriptor regardless (its presence in the magic
// slot table, not a non-nil setter, is what marks a class attribute as a
// data descriptor in `dispatch::getattr`).
// ---------------------------------------------------------------------

/// Allocates a `property(getter, setter)`. `setter` may be `vm.registers().none`
/// for a read-only property.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_property(vm: &mut Vm, getter: Cell, setter: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.property;
    let slots = SmallVec::from_slice(&[getter, setter]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn property_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let getter = args.get(1).copied().unwrap_or_else(|| vm.registers().none);
    let setter = args.get(2).copied().unwrap_or_else(|| vm.registers().none);
    new_property(vm, getter, setter)
}

fn property_get(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a property").into());
    };
    let getter = vm.heap.get(id).slot(0);
    let instance = args.get(1).copied().unwrap_or_else(|| vm.registers().none);
    if instance.is_none_value() {
        return Ok(args[0]);
    }
    crate::dispatch::call(vm, getter, &[instance])
}

fn property_set(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a property").into());
    };
    let setter = vm.heap.get(id).slot(1);
    if setter.is_none_value() {
        return Err(RaisedExc::attribute_error("property", "can't set attribute").into());
    }
    let instance = args[1];
    let value = args[2];
    crate::dispatch::call(vm, setter, &[instance, value])?;
    Ok(vm.registers().none)
}

// ---------------------------------------------------------------------
// classmethod / staticmethod: both 1 slot (the wrapped callable); the
// only difference is what `__get__` binds to.
// ---------------------------------------------------------------------

/// Allocates a `classmethod(wrapped)`.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_classmethod(vm: &mut Vm, wrapped: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.classmethod;
    let id = vm.alloc(ty, SmallVec::from_slice(&[wrapped]), UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

/// Allocates a `staticmethod(wrapped)`.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_staticmethod(vm: &mut Vm, wrapped: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.staticmethod;
    let id = vm.alloc(ty, SmallVec::from_slice(&[wrapped]), UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn classmethod_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    new_classmethod(vm, args[1])
}

fn staticmethod_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    new_staticmethod(vm, args[1])
}

/// `classmethod.__get__(self, instance, owner)`: binds the wrapped
/// callable to the *owning class*, not the instance -- `owner` is
/// recovered from `instance`'s own cell (its type, or if `instance` is
/// itself a type value, the type it represents), matching how `getattr`
/// resolves the receiver for a class-level lookup.
fn classmethod_get(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a classmethod").into());
    };
    let wrapped = vm.heap.get(id).slot(0);
    let instance = args.get(1).copied().unwrap_or_else(|| vm.registers().none);
    let owning_class = instance.as_type_value().unwrap_or_else(|| instance.type_id());
    let owner_cell = Cell::type_value(vm.types.builtins.r#type, owning_class);
    super::function::new_bound_method(vm, owner_cell, wrapped)
}

/// `staticmethod.__get__`: unwraps to the bare callable regardless of how
/// it was accessed -- no receiver is ever prepended.
fn staticmethod_get(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a staticmethod").into());
    };
    Ok(vm.heap.get(id).slot(0))
}

// ---------------------------------------------------------------------
// star_wrapper: 1 slot (the wrapped value) + an unpacking level (1 for
// `*args`, 2 for `**kwargs`) recording how a call-site argument should be
// spread by the caller -- it carries no behavior of its own here since
// spreading happens at the call site (external to this core, per
// spec's `Call` section), not through a magic method.
// ---------------------------------------------------------------------

/// Unpacking level recorded alongside a `star_wrapper`'s wrapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarLevel {
    /// `*args`-style single-star spread.
    Single,
    /// `**kwargs`-style double-star spread.
    Double,
}

/// Allocates a `star_wrapper(wrapped, level)`, marking `wrapped` for
/// call-site argument spreading. `level` is folded into slot 1 as a plain
/// int (`1`/`2`) rather than needing a dedicated payload kind.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_star_wrapper(vm: &mut Vm, wrapped: Cell, level: StarLevel) -> CoreResult<Cell> {
    let ty = vm.types.builtins.star_wrapper;
    let level_int = match level {
        StarLevel::Single => 1,
        StarLevel::Double => 2,
    };
    let slots = SmallVec::from_slice(&[wrapped, vm.new_int(level_int)]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

/// Installs `super`, `property`, `classmethod`, `staticmethod`, and
/// `star_wrapper`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let nativefunc_ty = vm.types.builtins.nativefunc;

    let super_ty = vm.types.builtins.super_;
    let mut set_super = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(super_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set_super(MagicName::__new__, super_new);
    set_super(MagicName::__getattr__, super_getattr);

    let property_ty = vm.types.builtins.property;
    let mut set_property = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(property_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set_property(MagicName::__new__, property_new);
    set_property(MagicName::__get__, property_get);
    set_property(MagicName::__set__, property_set);

    let classmethod_ty = vm.types.builtins.classmethod;
    vm.types.get_mut(classmethod_ty).set_magic(MagicName::__new__, Cell::native_fn(nativefunc_ty, classmethod_new));
    vm.types.get_mut(classmethod_ty).set_magic(MagicName::__get__, Cell::native_fn(nativefunc_ty, classmethod_get));

    let staticmethod_ty = vm.types.builtins.staticmethod;
    vm.types.get_mut(staticmethod_ty).set_magic(MagicName::__new__, Cell::native_fn(nativefunc_ty, staticmethod_new));
    vm.types.get_mut(staticmethod_ty).set_magic(MagicName::__get__, Cell::native_fn(nativefunc_ty, staticmethod_get));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch;

    fn setup() -> Vm {
        let mut vm = Vm::new(Config::default()).unwrap();
        crate::builtins::install(&mut vm).unwrap();
        vm
    }

    #[test]
    fn property_get_invokes_the_getter() {
        let mut vm = setup();
        fn getter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
            Ok(vm.new_int(args[0].as_int_like().unwrap_or(0) * 2))
        }
        let getter_cell = Cell::native_fn(vm.types.builtins.nativefunc, getter);
        let none = vm.registers().none;
        let prop = new_property(&mut vm, getter_cell, none).unwrap();
        let instance = vm.new_int(21);
        let get = vm.types.get(vm.types.builtins.property).own_magic(MagicName::__get__).unwrap();
        let result = dispatch::call(&mut vm, get, &[prop, instance]).unwrap();
        assert_eq!(result.as_int(), Some(42));
    }

    #[test]
    fn property_without_a_setter_rejects_assignment() {
        let mut vm = setup();
        fn getter(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
            Ok(vm.new_int(1))
        }
        let getter_cell = Cell::native_fn(vm.types.builtins.nativefunc, getter);
        let none = vm.registers().none;
        let prop = new_property(&mut vm, getter_cell, none).unwrap();
        let set = vm.types.get(vm.types.builtins.property).own_magic(MagicName::__set__).unwrap();
        let err = dispatch::call(&mut vm, set, &[prop, vm.new_int(0), vm.new_int(5)]).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn staticmethod_get_never_binds_a_receiver() {
        let mut vm = setup();
        fn plain(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
            Ok(vm.new_int(args.len() as i64))
        }
        let wrapped = Cell::native_fn(vm.types.builtins.nativefunc, plain);
        let sm = new_staticmethod(&mut vm, wrapped).unwrap();
        let get = vm.types.get(vm.types.builtins.staticmethod).own_magic(MagicName::__get__).unwrap();
        let instance = vm.new_int(7);
        let unwrapped = dispatch::call(&mut vm, get, &[sm, instance]).unwrap();
        assert!(unwrapped.as_native_fn().is_some());
    }

    #[test]
    fn classmethod_get_binds_the_owning_class_not_the_instance() {
        let mut vm = setup();
        fn plain(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
            Ok(vm.registers().none)
        }
        let wrapped = Cell::native_fn(vm.types.builtins.nativefunc, plain);
        let cm = new_classmethod(&mut vm, wrapped).unwrap();
        let get = vm.types.get(vm.types.builtins.classmethod).own_magic(MagicName::__get__).unwrap();
        let instance = vm.new_int(9);
        let bound = dispatch::call(&mut vm, get, &[cm, instance]).unwrap();
        assert_eq!(bound.type_id(), vm.types.builtins.bound_method);
        let receiver = vm.heap.get(bound.as_object_id().unwrap()).slot(0);
        assert_eq!(receiver.as_type_value(), Some(vm.types.builtins.int));
    }

    #[test]
    fn super_getattr_resumes_the_search_after_the_given_class() {
        let mut vm = setup();
        // Build a tiny two-level hierarchy: base defines `greet`, derived overrides it.
        let object_ty = vm.types.builtins.object;
        let base = vm.types.register(&mut vm.names, "Base", Some(object_ty)).unwrap();
        let derived = vm.types.register(&mut vm.names, "Derived", Some(base)).unwrap();
        fn base_greet(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
            super::super::strtype::new_str(vm, "base")
        }
        let base_greet_cell = Cell::native_fn(vm.types.builtins.nativefunc, base_greet);
        let name_id = vm.names.intern("greet").unwrap();
        vm.types.get_mut(base).attrs.insert(name_id, base_greet_cell);

        let instance_id = vm.new_instance(derived).unwrap();
        let instance = Cell::ptr(derived, instance_id);
        let sup = new_super(&mut vm, derived, instance).unwrap();
        let name_str = super::super::strtype::new_str(&mut vm, "greet").unwrap();
        let getattr_hook = vm.types.get(vm.types.builtins.super_).own_magic(MagicName::__getattr__).unwrap();
        let found = dispatch::call(&mut vm, getattr_hook, &[sup, name_str]).unwrap();
        let result = dispatch::call(&mut vm, found, &[]).unwrap();
        assert!(dispatch::equal(&mut vm, result, super::super::strtype::new_str(&mut vm, "base").unwrap()).unwrap());
    }
}

//! The dispatch layer: every operation that needs to resolve a magic
//! method or walk the descriptor protocol before doing its real work.
//! This is the layer a bytecode interpreter (external to this core) calls
//! into for `LOAD_ATTR`, `BINARY_OP`, `CALL`, `GET_ITER`, and friends — the
//! same entry points the upstream C ABI exposes as `py_getattr`,
//! `py_binaryop`, `py_vectorcall`, etc.

use smallvec::SmallVec;

use crate::cell::{Cell, TypeId};
use crate::error::{CoreResult, RaisedExc};
use crate::intern::{MagicName, NameId};
use crate::vm::Vm;

fn type_name(vm: &Vm, ty: TypeId) -> &str {
    vm.names.lookup(vm.types.get(ty).name)
}

/// Calls `callee` with `args` as its full (already-bound) argument list.
/// This is the `py_vectorcall` entry point: native functions, bound
/// methods, type construction, and `__call__` fallback all funnel through
/// here.
///
/// # Errors
/// Returns `TypeError` if `callee` is not callable by any of the above
/// means; propagates whatever the callee itself raises.
pub fn call(vm: &mut Vm, callee: Cell, args: &[Cell]) -> CoreResult<Cell> {
    if let Some(f) = callee.as_native_fn() {
        return f(vm, args);
    }
    if let Some(ty) = callee.as_type_value() {
        return construct(vm, ty, args);
    }
    if let Some(id) = callee.as_object_id() {
        let obj_type = vm.heap.get(id).type_id;
        if obj_type == vm.types.builtins.bound_method {
            let receiver = vm.heap.get(id).slot(0);
            let underlying = vm.heap.get(id).slot(1);
            let mut full: SmallVec<[Cell; 4]> = SmallVec::from_slice(&[receiver]);
            full.extend_from_slice(args);
            return call(vm, underlying, &full);
        }
    }
    if let Some((_, method)) = vm.types.find_magic(callee.type_id(), MagicName::__call__) {
        let mut full: SmallVec<[Cell; 4]> = SmallVec::from_slice(&[callee]);
        full.extend_from_slice(args);
        return call(vm, method, &full);
    }
    Err(RaisedExc::not_callable(type_name(vm, callee.type_id())).into())
}

/// Constructs a new instance of `ty`: runs `__new__` if the type (or an
/// ancestor) defines one, falling back to a plain attribute-backed
/// instance, then runs `__init__` on the result if defined.
///
/// # Errors
/// Propagates whatever `__new__`/`__init__` raise.
pub fn construct(vm: &mut Vm, ty: TypeId, args: &[Cell]) -> CoreResult<Cell> {
    let instance = if let Some((_, new_fn)) = vm.types.find_magic(ty, MagicName::__new__) {
        let type_cell = Cell::type_value(vm.types.builtins.r#type, ty);
        let mut full: SmallVec<[Cell; 4]> = SmallVec::from_slice(&[type_cell]);
        full.extend_from_slice(args);
        call(vm, new_fn, &full)?
    } else {
        Cell::ptr(ty, vm.new_instance(ty)?)
    };
    if let Some((_, init)) = vm.types.find_magic(ty, MagicName::__init__) {
        let mut full: SmallVec<[Cell; 4]> = SmallVec::from_slice(&[instance]);
        full.extend_from_slice(args);
        call(vm, init, &full)?;
    }
    Ok(instance)
}

/// Looks up `name` on `obj`, honoring the descriptor protocol in CPython's
/// priority order: a *data descriptor* found on the class (one whose own
/// type defines `__set__`) wins over the instance's own attribute store;
/// otherwise the instance store wins; otherwise a *non-data* descriptor or
/// plain class attribute is used; finally `__getattr__` is tried as a
/// last-resort hook before raising `AttributeError`.
///
/// # Errors
/// Returns `AttributeError` if no instance attribute, type attribute,
/// descriptor, or `__getattr__` resolves `name`.
pub fn getattr(vm: &mut Vm, obj: Cell, name: NameId) -> CoreResult<Cell> {
    // `obj` may itself be a class (`SomeClass.attr`), in which case the
    // lookup walks the class's own base chain rather than its metaclass's.
    let lookup_ty = obj.as_type_value().unwrap_or_else(|| obj.type_id());
    let class_attr = vm.types.find_attr_including_magic(lookup_ty, name);

    if let Some(value) = class_attr
        && let Some(get_id) = value.as_object_id()
    {
        let value_type = vm.heap.get(get_id).type_id;
        let is_data_descriptor = vm.types.find_magic(value_type, MagicName::__set__).is_some();
        if is_data_descriptor {
            if let Some((_, getter)) = vm.types.find_magic(value_type, MagicName::__get__) {
                return call(vm, getter, &[value, obj]);
            }
            return Ok(value);
        }
    }

    if let Some(id) = obj.as_object_id()
        && let Some(value) = vm.heap.get(id).attrs.as_ref().and_then(|a| a.get(name))
    {
        return Ok(value);
    }

    if let Some(value) = class_attr {
        if let Some(get_id) = value.as_object_id() {
            let value_type = vm.heap.get(get_id).type_id;
            if let Some((_, getter)) = vm.types.find_magic(value_type, MagicName::__get__) {
                return call(vm, getter, &[value, obj]);
            }
        }
        let is_callable = value.as_native_fn().is_some()
            || value.as_object_id().is_some_and(|id| vm.types.find_magic(vm.heap.get(id).type_id, MagicName::__call__).is_some());
        if is_callable && obj.as_type_value().is_none() {
            return crate::builtins::function::new_bound_method(vm, obj, value);
        }
        return Ok(value);
    }

    if let Some((_, getattr_hook)) = vm.types.find_magic(lookup_ty, MagicName::__getattr__) {
        let name_str = crate::builtins::strtype::new_str(vm, vm.names.lookup(name).to_string())?;
        return call(vm, getattr_hook, &[obj, name_str]);
    }

    Err(RaisedExc::attribute_error(type_name(vm, obj.type_id()), vm.names.lookup(name)).into())
}

/// Sets `name` on `obj`. A type attribute whose own type defines `__set__`
/// (a data descriptor, e.g. `property`) takes priority over plain instance
/// storage; otherwise the value goes straight into `obj`'s attribute
/// store.
///
/// # Errors
/// Returns `AttributeError` if `obj` has no attribute store and no data
/// descriptor claims `name` (immediate kinds, and heap kinds allocated
/// without one).
pub fn setattr(vm: &mut Vm, obj: Cell, name: NameId, value: Cell) -> CoreResult<()> {
    if let Some(attr) = vm.types.find_name(obj.type_id(), name)
        && let Some(attr_id) = attr.as_object_id()
    {
        let attr_type = vm.heap.get(attr_id).type_id;
        if let Some((_, setter)) = vm.types.find_magic(attr_type, MagicName::__set__) {
            call(vm, setter, &[attr, obj, value])?;
            return Ok(());
        }
    }
    let Some(id) = obj.as_object_id() else {
        return Err(RaisedExc::attribute_error(type_name(vm, obj.type_id()), vm.names.lookup(name)).into());
    };
    let Some(attrs) = vm.heap.get_mut(id).attrs.as_mut() else {
        return Err(RaisedExc::attribute_error(type_name(vm, obj.type_id()), vm.names.lookup(name)).into());
    };
    attrs.insert(name, value);
    Ok(())
}

/// Deletes `name` from `obj`'s attribute store.
///
/// # Errors
/// Returns `AttributeError` if `obj` has no attribute store or `name`
/// isn't present in it.
pub fn delattr(vm: &mut Vm, obj: Cell, name: NameId) -> CoreResult<()> {
    let Some(id) = obj.as_object_id() else {
        return Err(RaisedExc::attribute_error(type_name(vm, obj.type_id()), vm.names.lookup(name)).into());
    };
    let removed = vm.heap.get_mut(id).attrs.as_mut().and_then(|a| a.remove(name));
    if removed.is_some() {
        Ok(())
    } else {
        Err(RaisedExc::attribute_error(type_name(vm, obj.type_id()), vm.names.lookup(name)).into())
    }
}

fn try_magic(vm: &mut Vm, magic: MagicName, receiver: Cell, extra: &[Cell]) -> CoreResult<Option<Cell>> {
    let Some((_, method)) = vm.types.find_magic(receiver.type_id(), magic) else {
        return Ok(None);
    };
    let mut args: SmallVec<[Cell; 4]> = SmallVec::from_slice(&[receiver]);
    args.extend_from_slice(extra);
    let result = call(vm, method, &args)?;
    Ok(if result.is_not_implemented() { None } else { Some(result) })
}

/// Dispatches a binary operator, implementing the reflected-operator
/// protocol: if `rhs`'s type is a proper subclass of `lhs`'s type *and*
/// overrides the reflected method, the reflected method is tried first
/// (so a subclass can take precedence over its base even on the left
/// operand's side). Otherwise `lhs`'s forward method runs first, then
/// `rhs`'s reflected method if the forward method is absent or returns
/// `NotImplemented`.
///
/// # Errors
/// Returns `TypeError` if neither operand's type implements `op` (or its
/// reflection), or if both return `NotImplemented`.
pub fn binaryop(vm: &mut Vm, op: MagicName, lhs: Cell, rhs: Cell) -> CoreResult<Cell> {
    let reflected = op.reflected();
    let lhs_ty = lhs.type_id();
    let rhs_ty = rhs.type_id();

    let overriding_reflection = reflected.filter(|&refl| {
        rhs_ty != lhs_ty
            && vm.types.issubclass(rhs_ty, lhs_ty)
            && vm.types.find_magic(rhs_ty, refl).is_some_and(|(defining, _)| defining != lhs_ty)
    });

    if let Some(refl) = overriding_reflection
        && let Some(result) = try_magic(vm, refl, rhs, &[lhs])?
    {
        return Ok(result);
    }
    if let Some(result) = try_magic(vm, op, lhs, &[rhs])? {
        return Ok(result);
    }
    if let Some(refl) = reflected
        && let Some(result) = try_magic(vm, refl, rhs, &[lhs])?
    {
        return Ok(result);
    }
    Err(RaisedExc::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.as_str(),
        type_name(vm, lhs_ty),
        type_name(vm, rhs_ty),
    ))
    .into())
}

/// Comparison operators reflect by swapping the operator itself (`a < b`
/// falls back to `b > a`, not a `__rlt__` that doesn't exist), which is
/// why this is a distinct entry point from [`binaryop`] rather than a
/// table lookup through `MagicName::reflected`.
///
/// # Errors
/// Returns `TypeError` if neither the forward nor swapped comparison is
/// implemented.
pub fn compare(vm: &mut Vm, op: MagicName, lhs: Cell, rhs: Cell) -> CoreResult<Cell> {
    let swapped = match op {
        MagicName::__lt__ => MagicName::__gt__,
        MagicName::__le__ => MagicName::__ge__,
        MagicName::__gt__ => MagicName::__lt__,
        MagicName::__ge__ => MagicName::__le__,
        MagicName::__eq__ => MagicName::__eq__,
        MagicName::__ne__ => MagicName::__ne__,
        other => other,
    };
    if let Some(result) = try_magic(vm, op, lhs, &[rhs])? {
        return Ok(result);
    }
    if let Some(result) = try_magic(vm, swapped, rhs, &[lhs])? {
        return Ok(result);
    }
    match op {
        MagicName::__eq__ => Ok(vm.new_bool(lhs.as_object_id().zip(rhs.as_object_id()).is_some_and(|(a, b)| a == b))),
        MagicName::__ne__ => Ok(vm.new_bool(lhs.as_object_id().zip(rhs.as_object_id()).is_none_or(|(a, b)| a != b))),
        _ => Err(RaisedExc::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.as_str(),
            type_name(vm, lhs.type_id()),
            type_name(vm, rhs.type_id()),
        ))
        .into()),
    }
}

/// `__hash__`. Returns the `i64` hash value, or a `TypeError` if `obj`'s
/// type (and every ancestor) sets `__hash__` to `None` — unhashable, as
/// `dict`/`set` require.
///
/// # Errors
/// Returns `TypeError` if `obj`'s type has no `__hash__` at all.
pub fn hash(vm: &mut Vm, obj: Cell) -> CoreResult<i64> {
    let Some((_, method)) = vm.types.find_magic(obj.type_id(), MagicName::__hash__) else {
        return Err(RaisedExc::type_error(format!("unhashable type: '{}'", type_name(vm, obj.type_id()))).into());
    };
    let result = call(vm, method, &[obj])?;
    result
        .as_int()
        .ok_or_else(|| RaisedExc::type_error("__hash__ method should return an integer").into())
}

/// `a == b`, returning a plain `bool` rather than a `Cell` (most callers —
/// dict probing, `in` checks — want this, not a boxed truth value that
/// itself might need `__bool__` coercion).
///
/// # Errors
/// Propagates whatever [`compare`] raises.
pub fn equal(vm: &mut Vm, lhs: Cell, rhs: Cell) -> CoreResult<bool> {
    let result = compare(vm, MagicName::__eq__, lhs, rhs)?;
    truthy(vm, result)
}

/// `a < b` as a plain `bool`.
///
/// # Errors
/// Propagates whatever [`compare`] raises.
pub fn less(vm: &mut Vm, lhs: Cell, rhs: Cell) -> CoreResult<bool> {
    let result = compare(vm, MagicName::__lt__, lhs, rhs)?;
    truthy(vm, result)
}

/// Coerces `value` to a Rust `bool` via `__bool__`, falling back to
/// `__len__` (nonzero length is truthy) and finally to "everything but
/// `None`/`False` is truthy" if neither is defined.
///
/// # Errors
/// Propagates whatever `__bool__`/`__len__` raise.
pub fn truthy(vm: &mut Vm, value: Cell) -> CoreResult<bool> {
    if let Some(b) = value.as_bool() {
        return Ok(b);
    }
    if value.is_none_value() {
        return Ok(false);
    }
    if let Some((_, method)) = vm.types.find_magic(value.type_id(), MagicName::__bool__) {
        let result = call(vm, method, &[value])?;
        return result
            .as_bool()
            .ok_or_else(|| RaisedExc::type_error("__bool__ should return bool").into());
    }
    if let Some((_, method)) = vm.types.find_magic(value.type_id(), MagicName::__len__) {
        let result = call(vm, method, &[value])?;
        return Ok(result.as_int().unwrap_or(0) != 0);
    }
    Ok(true)
}

/// `obj[key]`.
///
/// # Errors
/// Returns `TypeError` if `obj`'s type has no `__getitem__`.
pub fn getitem(vm: &mut Vm, obj: Cell, key: Cell) -> CoreResult<Cell> {
    try_magic(vm, MagicName::__getitem__, obj, &[key])?
        .ok_or_else(|| RaisedExc::type_error(format!("'{}' object is not subscriptable", type_name(vm, obj.type_id()))).into())
}

/// `obj[key] = value`.
///
/// # Errors
/// Returns `TypeError` if `obj`'s type has no `__setitem__`.
pub fn setitem(vm: &mut Vm, obj: Cell, key: Cell, value: Cell) -> CoreResult<()> {
    let Some((_, method)) = vm.types.find_magic(obj.type_id(), MagicName::__setitem__) else {
        return Err(RaisedExc::type_error(format!(
            "'{}' object does not support item assignment",
            type_name(vm, obj.type_id())
        ))
        .into());
    };
    call(vm, method, &[obj, key, value])?;
    Ok(())
}

/// `del obj[key]`.
///
/// # Errors
/// Returns `TypeError` if `obj`'s type has no `__delitem__`.
pub fn delitem(vm: &mut Vm, obj: Cell, key: Cell) -> CoreResult<()> {
    let Some((_, method)) = vm.types.find_magic(obj.type_id(), MagicName::__delitem__) else {
        return Err(RaisedExc::type_error(format!(
            "'{}' object does not support item deletion",
            type_name(vm, obj.type_id())
        ))
        .into());
    };
    call(vm, method, &[obj, key])?;
    Ok(())
}

/// `iter(obj)`.
///
/// # Errors
/// Returns `TypeError` if `obj`'s type has no `__iter__`.
pub fn iter(vm: &mut Vm, obj: Cell) -> CoreResult<Cell> {
    try_magic(vm, MagicName::__iter__, obj, &[])?
        .ok_or_else(|| RaisedExc::type_error(format!("'{}' object is not iterable", type_name(vm, obj.type_id()))).into())
}

/// `next(iterator)`. A `StopIteration` raise (not a sentinel return value)
/// signals exhaustion, matching the magic method's own contract.
///
/// # Errors
/// Returns `TypeError` if `iterator`'s type has no `__next__`; propagates
/// `StopIteration` and anything else `__next__` raises.
pub fn next(vm: &mut Vm, iterator: Cell) -> CoreResult<Cell> {
    let Some((_, method)) = vm.types.find_magic(iterator.type_id(), MagicName::__next__) else {
        return Err(RaisedExc::type_error(format!("'{}' object is not an iterator", type_name(vm, iterator.type_id()))).into());
    };
    call(vm, method, &[iterator])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::vm::Vm;

    fn setup() -> Vm {
        let mut vm = Vm::new(Config::default()).unwrap();
        crate::builtins::install(&mut vm).unwrap();
        vm
    }

    /// A native-function method hung off a type's ordinary attribute
    /// store (not a magic slot, and not a heap object with `__get__`)
    /// must still be bound to `self` when resolved via `instance.method`,
    /// the same as a `function` resolved through the descriptor protocol.
    #[test]
    fn native_function_class_attr_binds_as_bound_method() {
        let mut vm = setup();
        let object_ty = vm.types.builtins.object;
        let point_ty = vm.types.register(&mut vm.names, "Point", Some(object_ty)).unwrap();
        fn identity_self(_vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
            Ok(args[0])
        }
        let method_name = vm.names.intern("whoami").unwrap();
        let nativefunc_ty = vm.types.builtins.nativefunc;
        vm.types.get_mut(point_ty).attrs.insert(method_name, Cell::native_fn(nativefunc_ty, identity_self));

        let instance = vm.new_instance(point_ty).unwrap();
        let instance = Cell::ptr(point_ty, instance);
        let bound = getattr(&mut vm, instance, method_name).unwrap();
        assert_eq!(bound.type_id(), vm.types.builtins.bound_method);

        let result = call(&mut vm, bound, &[]).unwrap();
        assert_eq!(result.as_object_id(), instance.as_object_id());
    }
}

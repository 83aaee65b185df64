//! `function` and `bound_method`: the storage shape a Python-level
//! function def needs, and the binding step `obj.method` performs when it
//! resolves to one.
//!
//! Actually running a `function`'s body is bytecode interpretation, which
//! this core does not do (see spec §1's external-collaborator list) —
//! frame setup and instruction dispatch belong to the bytecode interpreter
//! linked against this core, which reads a function's slots directly
//! rather than going through [`crate::dispatch::call`]. What this core
//! owns is the function object's *shape* (code reference, defining
//! module, defaults, closure cells) and the descriptor protocol that
//! turns `instance.method` into a `bound_method`, since both are part of
//! the type/attribute machinery rather than the interpreter loop.
//!
//! `bound_method` itself *is* callable through [`crate::dispatch::call`]
//! (it just prepends the receiver and recurses on the underlying
//! callable) — that recursion bottoms out in a native function or
//! `__call__` just fine, and bottoms out in a bare `function` exactly at
//! the boundary the bytecode interpreter is expected to take over.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::CoreResult;
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

/// Slot layout: `[code, module, defaults, closure]`. `code` is an opaque
/// cell supplied by the embedder's compiler/interpreter (this core never
/// interprets it); `defaults` and `closure` are both `tuple`s (empty when
/// a function has none of either).
///
/// Allocates a new `function` object.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_function(vm: &mut Vm, code: Cell, module: Cell, defaults: Cell, closure: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.function;
    let slots = SmallVec::from_slice(&[code, module, defaults, closure]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

/// Binds `underlying` (a `function`, `nativefunc`, or anything else
/// callable) to `receiver`, producing a `bound_method`. Calling the result
/// through [`crate::dispatch::call`] prepends `receiver` to the argument
/// list and recurses on `underlying`.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_bound_method(vm: &mut Vm, receiver: Cell, underlying: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.bound_method;
    let slots = SmallVec::from_slice(&[receiver, underlying]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

/// `function.__get__(self, instance, owner)`: binds to `instance` unless
/// the attribute was fetched straight off the class (`instance is None`,
/// Python's `SomeClass.method` rather than `some_instance.method`), in
/// which case the plain function is handed back unbound.
fn function_get(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let func = args[0];
    let instance = args.get(1).copied().unwrap_or(vm.registers().none);
    if instance.is_none_value() {
        return Ok(func);
    }
    new_bound_method(vm, instance, func)
}

fn function_repr(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
    super::strtype::new_str(vm, "<function>".to_string())
}

fn bound_method_repr(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
    super::strtype::new_str(vm, "<bound method>".to_string())
}

/// Installs `function`'s and `bound_method`'s magic methods into the type
/// registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let function_ty = vm.types.builtins.function;
    {
        let mut set = |m: MagicName, f: crate::cell::NativeFn| {
            vm.types.get_mut(function_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
        };
        set(MagicName::__get__, function_get);
        set(MagicName::__repr__, function_repr);
    }
    let bound_method_ty = vm.types.builtins.bound_method;
    vm.types.get_mut(bound_method_ty).set_magic(MagicName::__repr__, Cell::native_fn(nativefunc_ty, bound_method_repr));
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
    fn accessing_through_an_instance_binds_a_method() {
        let mut vm = setup();
        let none = vm.registers().none;
        let empty_tuple = super::super::tuple::new_tuple(&mut vm, vec![]).unwrap();
        let func = new_function(&mut vm, none, none, empty_tuple, empty_tuple).unwrap();
        let instance = vm.new_int(7);
        let bound = dispatch::call(&mut vm, vm.types.get(vm.types.builtins.function).own_magic(MagicName::__get__).unwrap(), &[func, instance]).unwrap();
        assert_eq!(bound.type_id(), vm.types.builtins.bound_method);
    }

    #[test]
    fn accessing_through_the_class_itself_leaves_it_unbound() {
        let mut vm = setup();
        let none = vm.registers().none;
        let empty_tuple = super::super::tuple::new_tuple(&mut vm, vec![]).unwrap();
        let func = new_function(&mut vm, none, none, empty_tuple, empty_tuple).unwrap();
        let still_func = dispatch::call(&mut vm, vm.types.get(vm.types.builtins.function).own_magic(MagicName::__get__).unwrap(), &[func, none]).unwrap();
        assert_eq!(still_func.type_id(), vm.types.builtins.function);
    }

    #[test]
    fn bound_method_prepends_receiver_when_called() {
        let mut vm = setup();
        fn native_sum(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
            let total: i64 = args.iter().filter_map(|c| c.as_int_like()).sum();
            Ok(vm.new_int(total))
        }
        let underlying = Cell::native_fn(vm.types.builtins.nativefunc, native_sum);
        let receiver = vm.new_int(10);
        let bound = new_bound_method(&mut vm, receiver, underlying).unwrap();
        let result = dispatch::call(&mut vm, bound, &[vm.new_int(5)]).unwrap();
        assert_eq!(result.as_int(), Some(15));
    }
}

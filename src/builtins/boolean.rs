//! `bool`: a subclass of `int` (spec: `issubclass(bool, int)` holds and
//! `True`/`False` behave as `1`/`0` in arithmetic). Magic slot lookup walks
//! the base chain, so arithmetic, bitwise ops, and generic comparisons
//! already resolve to `int`'s implementations without being copied here —
//! only the handful of methods where `bool` prints or constructs
//! differently from a plain integer are overridden.

use crate::cell::Cell;
use crate::error::CoreResult;
use crate::intern::MagicName;
use crate::vm::Vm;

fn bool_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let truthy = match args.get(1) {
        Some(&value) => crate::dispatch::truthy(vm, value)?,
        None => false,
    };
    Ok(vm.new_bool(truthy))
}

fn bool_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(args[0].as_bool().unwrap_or(false)))
}

fn bool_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let text = if args[0].as_bool().unwrap_or(false) { "True" } else { "False" };
    super::strtype::new_str(vm, text)
}

/// Installs `bool`'s overrides into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.bool;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__new__, bool_new);
    set(MagicName::__bool__, bool_bool);
    set(MagicName::__repr__, bool_repr);
    set(MagicName::__str__, bool_repr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch;
    use crate::vm::Vm;

    fn setup() -> Vm {
        let mut vm = Vm::new(Config::default()).unwrap();
        crate::builtins::install(&mut vm).unwrap();
        vm
    }

    #[test]
    fn bool_is_subclass_of_int_for_arithmetic() {
        let mut vm = setup();
        let truthy = vm.registers().true_;
        let one = vm.new_int(1);
        let result = dispatch::binaryop(&mut vm, MagicName::__add__, truthy, one).unwrap();
        assert_eq!(result.as_int(), Some(2));
    }

    #[test]
    fn bool_repr_is_true_or_false_not_one_or_zero() {
        let mut vm = setup();
        let truthy = vm.registers().true_;
        let result = dispatch::call(&mut vm, vm.types.get(vm.types.builtins.bool).own_magic(MagicName::__repr__).unwrap(), &[truthy]).unwrap();
        let id = result.as_object_id().unwrap();
        match &vm.heap.get(id).user_data {
            crate::heap::UserData::Str(s) => assert_eq!(&**s, "True"),
            _ => panic!("expected str"),
        }
    }
}

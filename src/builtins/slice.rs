//! `slice`: a 3-slot `(start, stop, step)` value, each `None` or an `int`.
//! Construction is the only meaningful operation here — interpreting the
//! bounds against a concrete length is left to each subscriptable type's
//! own `__getitem__` (see `strtype::str_getitem`, `list::list_getitem`),
//! since the defaulting rules depend on that length.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::CoreResult;
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

/// Allocates a new `slice` object from already-resolved bound cells
/// (`none` or `int`).
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_slice(vm: &mut Vm, start: Cell, stop: Cell, step: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.slice;
    let id = vm.alloc(ty, SmallVec::from_slice(&[start, stop, step]), UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn slice_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    // args[0] is the type cell from `construct`; accepts `slice(stop)` or
    // `slice(start, stop, step=None)`, matching Python's constructor arity.
    let none = vm.registers().none;
    let (start, stop, step) = match args.len() {
        2 => (none, args[1], none),
        3 => (args[1], args[2], none),
        _ => (args.get(1).copied().unwrap_or(none), args.get(2).copied().unwrap_or(none), args.get(3).copied().unwrap_or(none)),
    };
    new_slice(vm, start, stop, step)
}

fn bound_repr(bound: Cell) -> String {
    if bound.is_none_value() { "None".to_string() } else { bound.as_int_like().map_or(String::new(), |i| i.to_string()) }
}

fn slice_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return super::strtype::new_str(vm, "slice(None, None, None)".to_string());
    };
    let (start, stop, step) = (vm.heap.get(id).slot(0), vm.heap.get(id).slot(1), vm.heap.get(id).slot(2));
    let text = format!("slice({}, {}, {})", bound_repr(start), bound_repr(stop), bound_repr(step));
    super::strtype::new_str(vm, text)
}

/// Installs `slice`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.slice;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__new__, slice_new);
    set(MagicName::__repr__, slice_repr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::vm::Vm;

    #[test]
    fn slots_hold_start_stop_step() {
        let mut vm = Vm::new(Config::default()).unwrap();
        crate::builtins::install(&mut vm).unwrap();
        let start = vm.new_int(1);
        let stop = vm.new_int(5);
        let step = vm.registers().none;
        let slice = new_slice(&mut vm, start, stop, step).unwrap();
        let id = slice.as_object_id().unwrap();
        assert_eq!(vm.heap.get(id).slot(0).as_int(), Some(1));
        assert_eq!(vm.heap.get(id).slot(1).as_int(), Some(5));
        assert!(vm.heap.get(id).slot(2).is_none_value());
    }
}

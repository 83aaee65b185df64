//! `range`: an immutable `(start, stop, step)` triple of ints, identical in
//! shape to `slice` but always fully resolved (no `None` bounds) and
//! iterable in its own right rather than needing a container to interpret
//! it against.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn bounds(vm: &Vm, cell: Cell) -> (i64, i64, i64) {
    match cell.as_object_id() {
        Some(id) => {
            let obj = vm.heap.get(id);
            (obj.slot(0).as_int_like().unwrap_or(0), obj.slot(1).as_int_like().unwrap_or(0), obj.slot(2).as_int_like().unwrap_or(1))
        }
        None => (0, 0, 1),
    }
}

/// Allocates a new `range(start, stop, step)`.
///
/// # Errors
/// Returns `ValueError` if `step` is zero; propagates heap allocation
/// failure otherwise.
pub fn new_range(vm: &mut Vm, start: i64, stop: i64, step: i64) -> CoreResult<Cell> {
    if step == 0 {
        return Err(RaisedExc::value_error("range() arg 3 must not be zero").into());
    }
    let ty = vm.types.builtins.range;
    let slots = SmallVec::from_slice(&[vm.new_int(start), vm.new_int(stop), vm.new_int(step)]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn range_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let ints: Vec<i64> = args[1..].iter().filter_map(|c| c.as_int_like()).collect();
    match ints.len() {
        1 => new_range(vm, 0, ints[0], 1),
        2 => new_range(vm, ints[0], ints[1], 1),
        _ if ints.len() >= 3 => new_range(vm, ints[0], ints[1], ints[2]),
        _ => Err(RaisedExc::type_error("range expected at least 1 argument, got 0").into()),
    }
}

/// Number of elements `(start, stop, step)` yields, matching Python's
/// `len(range(...))` (rounds toward zero after accounting for direction).
#[must_use]
pub fn range_length(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 {
        if stop <= start { 0 } else { (stop - start - 1) / step + 1 }
    } else if stop >= start {
        0
    } else {
        (start - stop - 1) / (-step) + 1
    }
}

fn range_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let (start, stop, step) = bounds(vm, args[0]);
    Ok(vm.new_int(range_length(start, stop, step)))
}

fn range_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let (start, stop, step) = bounds(vm, args[0]);
    let len = range_length(start, stop, step);
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("range indices must be integers").into());
    };
    let normalized = if index < 0 { index + len } else { index };
    if normalized < 0 || normalized >= len {
        return Err(RaisedExc::index_error("range object index out of range").into());
    }
    Ok(vm.new_int(start + normalized * step))
}

fn range_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let (start, stop, step) = bounds(vm, args[0]);
    let Some(value) = args[1].as_int_like() else {
        return Ok(vm.new_bool(false));
    };
    let in_span = if step > 0 { value >= start && value < stop } else { value <= start && value > stop };
    Ok(vm.new_bool(in_span && (value - start) % step == 0))
}

fn range_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(other_id) = args.get(1).and_then(|c| c.as_object_id()) else {
        return Ok(vm.registers().not_implemented);
    };
    if vm.heap.get(other_id).type_id != vm.types.builtins.range {
        return Ok(vm.registers().not_implemented);
    }
    let a = bounds(vm, args[0]);
    let b = bounds(vm, args[1]);
    let len_a = range_length(a.0, a.1, a.2);
    let len_b = range_length(b.0, b.1, b.2);
    let equal = if len_a == 0 && len_b == 0 {
        true
    } else {
        len_a == len_b && a.0 == b.0 && (len_a <= 1 || a.2 == b.2)
    };
    Ok(vm.new_bool(equal))
}

fn range_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let (start, stop, step) = bounds(vm, args[0]);
    let text = if step == 1 { format!("range({start}, {stop})") } else { format!("range({start}, {stop}, {step})") };
    super::strtype::new_str(vm, text)
}

fn range_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let ty = vm.types.builtins.range_iterator;
    let (start, _, _) = bounds(vm, args[0]);
    let slots = SmallVec::from_slice(&[args[0], vm.new_int(start), vm.new_int(0)]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn range_iterator_iter(_vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(args[0])
}

fn range_iterator_next(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a range_iterator").into());
    };
    let source = vm.heap.get(id).slot(0);
    let produced = vm.heap.get(id).slot(2).as_int_like().unwrap_or(0);
    let (start, stop, step) = bounds(vm, source);
    let len = range_length(start, stop, step);
    if produced >= len {
        return Err(RaisedExc::stop_iteration().into());
    }
    let value = start + produced * step;
    vm.heap.get_mut(id).set_slot(2, vm.new_int(produced + 1));
    Ok(vm.new_int(value))
}

/// Installs `range`'s and `range_iterator`'s magic methods into the type
/// registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.range;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    {
        let mut set = |m: MagicName, f: crate::cell::NativeFn| {
            vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
        };
        set(MagicName::__new__, range_new);
        set(MagicName::__len__, range_len);
        set(MagicName::__getitem__, range_getitem);
        set(MagicName::__contains__, range_contains);
        set(MagicName::__eq__, range_eq);
        set(MagicName::__repr__, range_repr);
        set(MagicName::__iter__, range_iter);
    }
    let iter_ty = vm.types.builtins.range_iterator;
    let mut set_iter = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(iter_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set_iter(MagicName::__iter__, range_iterator_iter);
    set_iter(MagicName::__next__, range_iterator_next);
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
    fn length_matches_python_semantics_for_negative_step() {
        assert_eq!(range_length(10, 0, -2), 5);
        assert_eq!(range_length(0, 10, 3), 4);
        assert_eq!(range_length(5, 5, 1), 0);
    }

    #[test]
    fn iterating_yields_every_element_in_order() {
        let mut vm = setup();
        let r = new_range(&mut vm, 0, 3, 1).unwrap();
        let iterator = dispatch::iter(&mut vm, r).unwrap();
        let mut seen = Vec::new();
        while let Ok(v) = dispatch::next(&mut vm, iterator) {
            seen.push(v.as_int().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn zero_step_is_a_value_error() {
        let mut vm = setup();
        assert!(new_range(&mut vm, 0, 1, 0).is_err());
    }

    #[test]
    fn contains_honors_step() {
        let mut vm = setup();
        let r = new_range(&mut vm, 0, 10, 2).unwrap();
        let contains_method = vm.types.get(vm.types.builtins.range).own_magic(MagicName::__contains__).unwrap();
        let odd = dispatch::call(&mut vm, contains_method, &[r, vm.new_int(3)]).unwrap();
        assert_eq!(odd.as_bool(), Some(false));
        let even = dispatch::call(&mut vm, contains_method, &[r, vm.new_int(4)]).unwrap();
        assert_eq!(even.as_bool(), Some(true));
    }
}

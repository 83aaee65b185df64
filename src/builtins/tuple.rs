//! `tuple`: a fixed-length immutable sequence, stored as `UserData::List`
//! (the same dynamically-sized backing `list` uses) even though tuples
//! never grow — the distinction between the two types is in which magic
//! methods are installed, not the storage shape.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn items<'vm>(vm: &'vm Vm, cell: Cell) -> &'vm [Cell] {
    match cell.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::List(items)) => items,
        _ => &[],
    }
}

/// Allocates a new `tuple` from already-constructed element cells.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_tuple(vm: &mut Vm, elements: Vec<Cell>) -> CoreResult<Cell> {
    let ty = vm.types.builtins.tuple;
    let id = vm.alloc(ty, SmallVec::new(), UserData::List(elements), false)?;
    Ok(Cell::ptr(ty, id))
}

fn tuple_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let elements = args.get(1).map_or_else(Vec::new, |iterable| vec![*iterable]);
    new_tuple(vm, elements)
}

fn tuple_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let n = items(vm, args[0]).len();
    Ok(vm.new_int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn tuple_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let len = items(vm, args[0]).len();
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("tuple indices must be integers").into());
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let normalized = if index < 0 { index + len_i } else { index };
    if normalized < 0 || normalized >= len_i {
        return Err(RaisedExc::index_error("tuple index out of range").into());
    }
    Ok(items(vm, args[0])[normalized as usize])
}

fn tuple_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(other_id) = args.get(1).and_then(|c| c.as_object_id()) else {
        return Ok(vm.registers().not_implemented);
    };
    if vm.heap.get(other_id).type_id != vm.types.builtins.tuple {
        return Ok(vm.registers().not_implemented);
    }
    let lhs: Vec<Cell> = items(vm, args[0]).to_vec();
    let rhs: Vec<Cell> = items(vm, args[1]).to_vec();
    if lhs.len() != rhs.len() {
        return Ok(vm.new_bool(false));
    }
    for (a, b) in lhs.into_iter().zip(rhs) {
        if !crate::dispatch::equal(vm, a, b)? {
            return Ok(vm.new_bool(false));
        }
    }
    Ok(vm.new_bool(true))
}

fn tuple_hash(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let elements: Vec<Cell> = items(vm, args[0]).to_vec();
    let mut acc: i64 = 0x345a_20ed_i64;
    for element in elements {
        let h = crate::dispatch::hash(vm, element)?;
        acc = acc.wrapping_mul(1_000_003).wrapping_add(h);
    }
    Ok(vm.new_int(acc))
}

fn tuple_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let elements: Vec<Cell> = items(vm, args[0]).to_vec();
    let needle = args[1];
    for element in elements {
        if crate::dispatch::equal(vm, element, needle)? {
            return Ok(vm.new_bool(true));
        }
    }
    Ok(vm.new_bool(false))
}

fn tuple_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    super::list::new_sequence_iterator(vm, args[0])
}

/// Installs `tuple`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.tuple;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__new__, tuple_new);
    set(MagicName::__len__, tuple_len);
    set(MagicName::__getitem__, tuple_getitem);
    set(MagicName::__eq__, tuple_eq);
    set(MagicName::__hash__, tuple_hash);
    set(MagicName::__contains__, tuple_contains);
    set(MagicName::__iter__, tuple_iter);
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
    fn equal_tuples_hash_the_same() {
        let mut vm = setup();
        let a = new_tuple(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        let b = new_tuple(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        assert!(dispatch::equal(&mut vm, a, b).unwrap());
        assert_eq!(dispatch::hash(&mut vm, a).unwrap(), dispatch::hash(&mut vm, b).unwrap());
    }

    #[test]
    fn negative_index_and_out_of_range() {
        let mut vm = setup();
        let t = new_tuple(&mut vm, vec![vm.new_int(10), vm.new_int(20)]).unwrap();
        let last = dispatch::getitem(&mut vm, t, vm.new_int(-1)).unwrap();
        assert_eq!(last.as_int(), Some(20));
        assert!(dispatch::getitem(&mut vm, t, vm.new_int(5)).is_err());
    }
}

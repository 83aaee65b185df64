//! `list`: a mutable dynamic array, backed by `UserData::List`. Shares its
//! storage shape with `tuple` (see `tuple.rs`'s module doc) but additionally
//! exposes the mutating operations (`__setitem__`, `__delitem__`, plus the
//! non-magic `list_swap`/`list_insert`/`list_emplace` entry points a
//! bytecode interpreter's `LIST_APPEND`/sort opcodes would call directly,
//! the way pocketpy's `py_list_insert`/`py_list_delitem` C API does).
//!
//! [`new_sequence_iterator`] is the one piece of machinery this module
//! contributes to its siblings: a generic `seq_iterator` that walks any
//! type defining `__len__`/`__getitem__`, shared by `tuple` and `bytes` so
//! neither needs its own iterator type. It snapshots length at creation and,
//! in debug builds, raises `RuntimeError` if that length changes mid-walk.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{CoreResult, ExcKind, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn with_list<'vm>(vm: &'vm Vm, cell: Cell) -> &'vm [Cell] {
    match cell.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::List(items)) => items,
        _ => &[],
    }
}

/// Allocates a new `list` from already-constructed element cells.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_list(vm: &mut Vm, elements: Vec<Cell>) -> CoreResult<Cell> {
    let ty = vm.types.builtins.list;
    let id = vm.alloc(ty, SmallVec::new(), UserData::List(elements), false)?;
    Ok(Cell::ptr(ty, id))
}

fn list_new(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    new_list(vm, Vec::new())
        .and_then(|list| if args.len() > 1 { list_extend_from_iterable(vm, list, args[1]).map(|()| list) } else { Ok(list) })
}

fn list_extend_from_iterable(vm: &mut Vm, list: Cell, iterable: Cell) -> CoreResult<()> {
    let iterator = crate::dispatch::iter(vm, iterable)?;
    loop {
        match crate::dispatch::next(vm, iterator) {
            Ok(item) => {
                let Some(id) = list.as_object_id() else { break };
                if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
                    items.push(item);
                }
            }
            Err(err) if err.is_stop_iteration() => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn list_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let n = with_list(vm, args[0]).len();
    Ok(vm.new_int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn normalize(index: i64, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let normalized = if index < 0 { index + len_i } else { index };
    if normalized < 0 || normalized >= len_i { None } else { usize::try_from(normalized).ok() }
}

fn list_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let items = with_list(vm, args[0]).to_vec();
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("list indices must be integers").into());
    };
    let Some(i) = normalize(index, items.len()) else {
        return Err(RaisedExc::index_error("list index out of range").into());
    };
    Ok(items[i])
}

fn list_setitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a list").into());
    };
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("list indices must be integers").into());
    };
    let len = with_list(vm, args[0]).len();
    let Some(i) = normalize(index, len) else {
        return Err(RaisedExc::index_error("list assignment index out of range").into());
    };
    if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
        items[i] = args[2];
    }
    Ok(vm.registers().none)
}

fn list_delitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a list").into());
    };
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("list indices must be integers").into());
    };
    let len = with_list(vm, args[0]).len();
    let Some(i) = normalize(index, len) else {
        return Err(RaisedExc::index_error("list assignment index out of range").into());
    };
    if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
        items.remove(i);
    }
    Ok(vm.registers().none)
}

/// Swaps the elements at `i` and `j` (both already in-range, zero-based)
/// in place. The non-magic counterpart of `list.sort`'s element swaps.
///
/// # Errors
/// Returns `IndexError` if either index is out of range.
pub fn list_swap(vm: &mut Vm, list: Cell, i: usize, j: usize) -> CoreResult<()> {
    let Some(id) = list.as_object_id() else {
        return Err(RaisedExc::type_error("not a list").into());
    };
    if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
        if i >= items.len() || j >= items.len() {
            return Err(RaisedExc::index_error("list index out of range").into());
        }
        items.swap(i, j);
    }
    Ok(())
}

/// Inserts `value` at position `i`, shifting later elements right. Matches
/// `list.insert`'s clamping behavior: out-of-range indices clamp to the
/// nearest end rather than erroring.
///
/// # Errors
/// Infallible for a well-formed list cell; returns `TypeError` otherwise.
pub fn list_insert(vm: &mut Vm, list: Cell, i: i64, value: Cell) -> CoreResult<()> {
    let Some(id) = list.as_object_id() else {
        return Err(RaisedExc::type_error("not a list").into());
    };
    if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
        let len = items.len();
        let len_i = i64::try_from(len).unwrap_or(i64::MAX);
        let normalized = if i < 0 { (i + len_i).max(0) } else { i.min(len_i) };
        #[allow(clippy::cast_sign_loss)]
        items.insert(normalized as usize, value);
    }
    Ok(())
}

/// Appends `value` to the end of `list`. Named to match the spec's
/// `list_emplace` operation (construct-in-place at the back), distinct
/// from `list_insert` at an arbitrary position.
///
/// # Errors
/// Returns `TypeError` if `list` is not a list cell.
pub fn list_emplace(vm: &mut Vm, list: Cell, value: Cell) -> CoreResult<()> {
    let Some(id) = list.as_object_id() else {
        return Err(RaisedExc::type_error("not a list").into());
    };
    if let UserData::List(items) = &mut vm.heap.get_mut(id).user_data {
        items.push(value);
    }
    Ok(())
}

fn list_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(other_id) = args.get(1).and_then(|c| c.as_object_id()) else {
        return Ok(vm.registers().not_implemented);
    };
    if vm.heap.get(other_id).type_id != vm.types.builtins.list {
        return Ok(vm.registers().not_implemented);
    }
    let lhs = with_list(vm, args[0]).to_vec();
    let rhs = with_list(vm, args[1]).to_vec();
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

fn list_add(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(other_id) = args.get(1).and_then(|c| c.as_object_id()) else {
        return Ok(vm.registers().not_implemented);
    };
    if vm.heap.get(other_id).type_id != vm.types.builtins.list {
        return Ok(vm.registers().not_implemented);
    }
    let mut joined = with_list(vm, args[0]).to_vec();
    joined.extend_from_slice(with_list(vm, args[1]));
    new_list(vm, joined)
}

fn list_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let items = with_list(vm, args[0]).to_vec();
    for item in items {
        if crate::dispatch::equal(vm, item, args[1])? {
            return Ok(vm.new_bool(true));
        }
    }
    Ok(vm.new_bool(false))
}

fn list_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(!with_list(vm, args[0]).is_empty()))
}

fn list_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    new_sequence_iterator(vm, args[0])
}

fn list_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let items = with_list(vm, args[0]).to_vec();
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let repr = crate::dispatch::call(vm, vm.types.get(item.type_id()).own_magic(MagicName::__repr__).ok_or_else(|| {
            RaisedExc::type_error("object has no __repr__")
        })?, &[item])?;
        let text = match repr.as_object_id().map(|id| &vm.heap.get(id).user_data) {
            Some(UserData::Str(s)) => s.to_string(),
            _ => String::new(),
        };
        parts.push(text);
    }
    super::strtype::new_str(vm, format!("[{}]", parts.join(", ")))
}

fn sequence_len(vm: &mut Vm, source: Cell) -> CoreResult<i64> {
    let len = crate::dispatch::call(
        vm,
        vm.types.get(source.type_id()).own_magic(MagicName::__len__).ok_or_else(|| RaisedExc::type_error("object has no len()"))?,
        &[source],
    )?;
    Ok(len.as_int().unwrap_or(0))
}

/// Allocates a `seq_iterator` walking `source` from index 0 via its own
/// `__len__`/`__getitem__`, generic over any sequence type (`tuple`,
/// `list`, `bytes`) rather than one iterator type per sequence kind.
///
/// Snapshots `source`'s length at creation time (slot 2): spec §4.7 requires
/// list iteration to snapshot length at iterator creation and raise
/// `RuntimeError` on concurrent structural modification in debug builds,
/// rather than reflecting live mutation.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]) or a failing
/// `__len__` call on `source`.
pub fn new_sequence_iterator(vm: &mut Vm, source: Cell) -> CoreResult<Cell> {
    let ty = vm.types.builtins.seq_iterator;
    let len = sequence_len(vm, source)?;
    let slots = SmallVec::from_slice(&[source, vm.new_int(0), vm.new_int(len)]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn seq_iterator_iter(_vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(args[0])
}

fn seq_iterator_next(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a seq_iterator").into());
    };
    let source = vm.heap.get(id).slot(0);
    let index = vm.heap.get(id).slot(1);
    let snapshot_len = vm.heap.get(id).slot(2).as_int_like().unwrap_or(0);
    #[cfg(debug_assertions)]
    {
        let current_len = sequence_len(vm, source)?;
        if current_len != snapshot_len {
            return Err(RaisedExc::new(ExcKind::RuntimeError, "sequence changed size during iteration").into());
        }
    }
    let i = index.as_int_like().unwrap_or(0);
    if i >= snapshot_len {
        return Err(RaisedExc::stop_iteration().into());
    }
    let item = crate::dispatch::getitem(vm, source, vm.new_int(i))?;
    let next_index = vm.new_int(i + 1);
    vm.heap.get_mut(id).set_slot(1, next_index);
    Ok(item)
}

/// Installs `list`'s and the shared `seq_iterator`'s magic methods into the
/// type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.list;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    {
        let mut set = |m: MagicName, f: crate::cell::NativeFn| {
            vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
        };
        set(MagicName::__new__, list_new);
        set(MagicName::__len__, list_len);
        set(MagicName::__getitem__, list_getitem);
        set(MagicName::__setitem__, list_setitem);
        set(MagicName::__delitem__, list_delitem);
        set(MagicName::__eq__, list_eq);
        set(MagicName::__add__, list_add);
        set(MagicName::__contains__, list_contains);
        set(MagicName::__bool__, list_bool);
        set(MagicName::__iter__, list_iter);
        set(MagicName::__repr__, list_repr);
    }
    let iter_ty = vm.types.builtins.seq_iterator;
    let mut set_iter = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(iter_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set_iter(MagicName::__iter__, seq_iterator_iter);
    set_iter(MagicName::__next__, seq_iterator_next);
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
    fn setitem_mutates_in_place() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        dispatch::setitem(&mut vm, list, vm.new_int(0), vm.new_int(99)).unwrap();
        let got = dispatch::getitem(&mut vm, list, vm.new_int(0)).unwrap();
        assert_eq!(got.as_int(), Some(99));
    }

    #[test]
    fn delitem_shrinks_the_list() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(2), vm.new_int(3)]).unwrap();
        dispatch::delitem(&mut vm, list, vm.new_int(1)).unwrap();
        let len = dispatch::call(&mut vm, vm.types.get(vm.types.builtins.list).own_magic(MagicName::__len__).unwrap(), &[list]).unwrap();
        assert_eq!(len.as_int(), Some(2));
        let remaining = dispatch::getitem(&mut vm, list, vm.new_int(1)).unwrap();
        assert_eq!(remaining.as_int(), Some(3));
    }

    #[test]
    fn swap_exchanges_two_elements() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        list_swap(&mut vm, list, 0, 1).unwrap();
        assert_eq!(dispatch::getitem(&mut vm, list, vm.new_int(0)).unwrap().as_int(), Some(2));
        assert_eq!(dispatch::getitem(&mut vm, list, vm.new_int(1)).unwrap().as_int(), Some(1));
    }

    #[test]
    fn insert_shifts_later_elements() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(3)]).unwrap();
        list_insert(&mut vm, list, 1, vm.new_int(2)).unwrap();
        let items: Vec<i64> = (0..3).map(|i| dispatch::getitem(&mut vm, list, vm.new_int(i)).unwrap().as_int().unwrap()).collect();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn iteration_without_mutation_walks_all_elements() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        let iterator = dispatch::iter(&mut vm, list).unwrap();
        let first = dispatch::next(&mut vm, iterator).unwrap();
        assert_eq!(first.as_int(), Some(1));
        let second = dispatch::next(&mut vm, iterator).unwrap();
        assert_eq!(second.as_int(), Some(2));
        assert!(dispatch::next(&mut vm, iterator).is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    fn mutation_mid_walk_raises_runtime_error() {
        let mut vm = setup();
        let list = new_list(&mut vm, vec![vm.new_int(1), vm.new_int(2)]).unwrap();
        let iterator = dispatch::iter(&mut vm, list).unwrap();
        let first = dispatch::next(&mut vm, iterator).unwrap();
        assert_eq!(first.as_int(), Some(1));
        list_emplace(&mut vm, list, vm.new_int(3)).unwrap();
        let err = dispatch::next(&mut vm, iterator).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Recoverable(exc) if exc.kind == ExcKind::RuntimeError));
    }
}

//! `dict`: an insertion-ordered hash map, backed by [`crate::heap::DictData`].
//! Key hashing/equality dispatch through `__hash__`/`__eq__` (keys are
//! late-bound — a user-defined `__hash__` overrides the builtin dispatch
//! just as it would for `hash(x)` itself), so every probe takes the VM by
//! `&mut` and every operation that needs the dict's own storage must take
//! it out of the heap object first (`Heap::take_user_data`) to avoid
//! aliasing a `&mut Vm` against the dict it lives inside. While the
//! storage is taken out, its entries are reachable only from a Rust local,
//! not from the root scan, so every such window runs under
//! `Vm::suppress_auto_gc`.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::heap::{DictData, UserData};
use crate::intern::MagicName;
use crate::vm::Vm;

/// Allocates a new, empty `dict`.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_dict(vm: &mut Vm) -> CoreResult<Cell> {
    let ty = vm.types.builtins.dict;
    let id = vm.alloc(ty, SmallVec::new(), UserData::Dict(DictData::new()), false)?;
    Ok(Cell::ptr(ty, id))
}

/// Inserts `key -> value`, returning the previous value if `key` was
/// already present. Dispatches `__hash__`/`__eq__` on `key`, so this is not
/// a plain data-structure operation — it can fail (unhashable key) or
/// re-enter the VM (a user `__eq__` override).
///
/// # Errors
/// Propagates whatever `__hash__`/`__eq__` raise, plus `TypeError` if
/// `dict` is not a dict cell.
pub fn dict_set(vm: &mut Vm, dict: Cell, key: Cell, value: Cell) -> CoreResult<Option<Cell>> {
    let Some(id) = dict.as_object_id() else {
        return Err(RaisedExc::type_error("not a dict").into());
    };
    let hash = u64::from_ne_bytes(crate::dispatch::hash(vm, key)?.to_ne_bytes());
    let mut data = vm.heap.take_user_data(id);
    let UserData::Dict(map) = &mut data else {
        vm.heap.restore_user_data(id, data);
        return Err(RaisedExc::type_error("not a dict").into());
    };
    // `data` was just taken out of the heap, so `vm.heap` no longer holds
    // it — `dispatch::equal` can safely re-enter the VM from inside the
    // probe closure without aliasing this object's storage. But its
    // entries are also unreachable from the root scan for the same
    // reason, so auto-GC is suppressed for the duration: a collection
    // triggered by the `__eq__` callback (or by any allocation it makes)
    // would otherwise sweep this dict's still-live keys and values.
    let mut eq_err = None;
    let previous = vm.suppress_auto_gc(|vm| {
        map.insert(hash, key, value, |existing, new| match crate::dispatch::equal(vm, existing, new) {
            Ok(b) => b,
            Err(e) => {
                eq_err = Some(e);
                false
            }
        })
    });
    vm.heap.restore_user_data(id, data);
    if let Some(e) = eq_err {
        return Err(e);
    }
    Ok(previous)
}

/// Looks up `key`, dispatching `__hash__`/`__eq__`.
///
/// # Errors
/// Propagates whatever `__hash__`/`__eq__` raise.
pub fn dict_get(vm: &mut Vm, dict: Cell, key: Cell) -> CoreResult<Option<Cell>> {
    let Some(id) = dict.as_object_id() else {
        return Err(RaisedExc::type_error("not a dict").into());
    };
    let hash = u64::from_ne_bytes(crate::dispatch::hash(vm, key)?.to_ne_bytes());
    let mut data = vm.heap.take_user_data(id);
    let UserData::Dict(map) = &mut data else {
        vm.heap.restore_user_data(id, data);
        return Err(RaisedExc::type_error("not a dict").into());
    };
    let mut eq_err = None;
    let found = vm.suppress_auto_gc(|vm| {
        map.get(hash, |candidate| match crate::dispatch::equal(vm, candidate, key) {
            Ok(b) => b,
            Err(e) => {
                eq_err = Some(e);
                false
            }
        })
    });
    vm.heap.restore_user_data(id, data);
    if let Some(e) = eq_err {
        return Err(e);
    }
    Ok(found)
}

/// Removes `key`, returning its value if present.
///
/// # Errors
/// Propagates whatever `__hash__`/`__eq__` raise.
pub fn dict_remove(vm: &mut Vm, dict: Cell, key: Cell) -> CoreResult<Option<Cell>> {
    let Some(id) = dict.as_object_id() else {
        return Err(RaisedExc::type_error("not a dict").into());
    };
    let hash = u64::from_ne_bytes(crate::dispatch::hash(vm, key)?.to_ne_bytes());
    let mut data = vm.heap.take_user_data(id);
    let UserData::Dict(map) = &mut data else {
        vm.heap.restore_user_data(id, data);
        return Err(RaisedExc::type_error("not a dict").into());
    };
    let mut eq_err = None;
    let removed = vm.suppress_auto_gc(|vm| {
        map.remove(hash, |candidate| match crate::dispatch::equal(vm, candidate, key) {
            Ok(b) => b,
            Err(e) => {
                eq_err = Some(e);
                false
            }
        })
    });
    vm.heap.restore_user_data(id, data);
    if let Some(e) = eq_err {
        return Err(e);
    }
    Ok(removed)
}

fn dict_len_of(vm: &Vm, dict: Cell) -> usize {
    match dict.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::Dict(map)) => map.len(),
        _ => 0,
    }
}

fn dict_new(vm: &mut Vm, _args: &[Cell]) -> CoreResult<Cell> {
    new_dict(vm)
}

fn dict_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_int(i64::try_from(dict_len_of(vm, args[0])).unwrap_or(i64::MAX)))
}

fn dict_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match dict_get(vm, args[0], args[1])? {
        Some(value) => Ok(value),
        None => Err(RaisedExc::new(crate::error::ExcKind::KeyError, key_repr(vm, args[1])).into()),
    }
}

fn key_repr(vm: &Vm, key: Cell) -> String {
    key.as_int_like().map_or_else(
        || match key.as_object_id().map(|id| &vm.heap.get(id).user_data) {
            Some(UserData::Str(s)) => s.to_string(),
            _ => "<key>".to_string(),
        },
        |i| i.to_string(),
    )
}

fn dict_setitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    dict_set(vm, args[0], args[1], args[2])?;
    Ok(vm.registers().none)
}

fn dict_delitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match dict_remove(vm, args[0], args[1])? {
        Some(_) => Ok(vm.registers().none),
        None => Err(RaisedExc::new(crate::error::ExcKind::KeyError, key_repr(vm, args[1])).into()),
    }
}

fn dict_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(dict_get(vm, args[0], args[1])?.is_some()))
}

fn dict_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(dict_len_of(vm, args[0]) != 0))
}

fn dict_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    // Iterates keys, matching Python's `for k in some_dict`. Built on top
    // of the already-allocated `dict_items` view's storage (a plain list of
    // keys snapshotted at iterator-creation time) rather than reflecting
    // live mutation - dict iteration order under concurrent mutation is an
    // open question this core resolves conservatively (see DESIGN.md).
    let keys: Vec<Cell> = match args[0].as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::Dict(map)) => map.iter().map(|(k, _)| k).collect(),
        _ => Vec::new(),
    };
    let snapshot = super::list::new_list(vm, keys)?;
    super::list::new_sequence_iterator(vm, snapshot)
}

fn dict_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(other_id) = args.get(1).and_then(|c| c.as_object_id()) else {
        return Ok(vm.registers().not_implemented);
    };
    if vm.heap.get(other_id).type_id != vm.types.builtins.dict {
        return Ok(vm.registers().not_implemented);
    }
    if dict_len_of(vm, args[0]) != dict_len_of(vm, args[1]) {
        return Ok(vm.new_bool(false));
    }
    let entries: Vec<(Cell, Cell)> = match &vm.heap.get(args[0].as_object_id().unwrap()).user_data {
        UserData::Dict(map) => map.iter().collect(),
        _ => Vec::new(),
    };
    for (key, value) in entries {
        match dict_get(vm, args[1], key)? {
            Some(other_value) if crate::dispatch::equal(vm, value, other_value)? => {}
            _ => return Ok(vm.new_bool(false)),
        }
    }
    Ok(vm.new_bool(true))
}

/// Installs `dict`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.dict;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__new__, dict_new);
    set(MagicName::__len__, dict_len);
    set(MagicName::__getitem__, dict_getitem);
    set(MagicName::__setitem__, dict_setitem);
    set(MagicName::__delitem__, dict_delitem);
    set(MagicName::__contains__, dict_contains);
    set(MagicName::__bool__, dict_bool);
    set(MagicName::__iter__, dict_iter);
    set(MagicName::__eq__, dict_eq);
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
    fn set_then_get_roundtrips() {
        let mut vm = setup();
        let dict = new_dict(&mut vm).unwrap();
        let key = super::super::strtype::new_str(&mut vm, "x").unwrap();
        let value = vm.new_int(42);
        dict_set(&mut vm, dict, key, value).unwrap();
        let got = dict_get(&mut vm, dict, key).unwrap();
        assert_eq!(got.unwrap().as_int(), Some(42));
    }

    #[test]
    fn missing_key_raises_key_error() {
        let mut vm = setup();
        let dict = new_dict(&mut vm).unwrap();
        let key = vm.new_int(1);
        let err = dispatch::getitem(&mut vm, dict, key).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn insertion_order_is_preserved_through_iteration() {
        let mut vm = setup();
        let dict = new_dict(&mut vm).unwrap();
        for i in 0..5i64 {
            dict_set(&mut vm, dict, vm.new_int(i), vm.new_int(i * 10)).unwrap();
        }
        let iterator = dispatch::iter(&mut vm, dict).unwrap();
        let mut seen = Vec::new();
        while let Ok(key) = dispatch::next(&mut vm, iterator) {
            seen.push(key.as_int().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn remove_deletes_and_returns_value() {
        let mut vm = setup();
        let dict = new_dict(&mut vm).unwrap();
        let key = vm.new_int(7);
        dict_set(&mut vm, dict, key, vm.new_int(70)).unwrap();
        let removed = dict_remove(&mut vm, dict, key).unwrap();
        assert_eq!(removed.unwrap().as_int(), Some(70));
        assert!(dict_get(&mut vm, dict, key).unwrap().is_none());
    }

    #[test]
    fn integral_float_key_finds_the_equal_int_key() {
        let mut vm = setup();
        let dict = new_dict(&mut vm).unwrap();
        let int_key = vm.new_int(3);
        let value = super::super::strtype::new_str(&mut vm, "v").unwrap();
        dict_set(&mut vm, dict, int_key, value).unwrap();
        let float_key = vm.new_float(3.0);
        let found = dict_get(&mut vm, dict, float_key).unwrap();
        assert!(found.is_some());
    }
}

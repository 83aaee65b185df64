//! `str`: an immutable sequence of Unicode scalar values, stored as UTF-8
//! text in the heap object's user data. Indexing and length count
//! characters, not bytes — spec §4.4's "`str` is a value type over code
//! points" requirement — so every index operation walks `chars()` rather
//! than slicing the byte buffer directly.

use ahash::RandomState;
use smallvec::SmallVec;
use std::hash::{BuildHasher, Hasher};

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn text(vm: &Vm, cell: Cell) -> &str {
    match cell.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::Str(s)) => s,
        _ => "",
    }
}

/// Allocates a new `str` object from owned text.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_str(vm: &mut Vm, s: impl Into<String>) -> CoreResult<Cell> {
    let ty = vm.types.builtins.str;
    let id = vm.alloc(ty, SmallVec::new(), UserData::Str(s.into().into_boxed_str()), false)?;
    Ok(Cell::ptr(ty, id))
}

fn other_str<'vm>(vm: &'vm Vm, args: &[Cell]) -> Option<&'vm str> {
    let cell = *args.get(1)?;
    let id = cell.as_object_id()?;
    match &vm.heap.get(id).user_data {
        UserData::Str(s) => Some(s),
        _ => None,
    }
}

fn str_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let n = text(vm, args[0]).chars().count();
    Ok(vm.new_int(i64::try_from(n).unwrap_or(i64::MAX)))
}

/// Resolves a possibly-negative char index against `len`, returning the
/// non-negative offset or `None` if still out of range after normalizing.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let normalized = if index < 0 { index + len_i } else { index };
    if normalized < 0 || normalized >= len_i {
        None
    } else {
        usize::try_from(normalized).ok()
    }
}

fn slice_bound(cell: Cell, default: i64) -> i64 {
    let raw = if cell.is_none_value() { default } else { cell.as_int_like().unwrap_or(default) };
    raw.max(0)
}

fn str_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let chars: Vec<char> = text(vm, args[0]).chars().collect();
    let key = args[1];
    if let Some(id) = key.as_object_id()
        && vm.heap.get(id).type_id == vm.types.builtins.slice
    {
        let start_cell = vm.heap.get(id).slot(0);
        let stop_cell = vm.heap.get(id).slot(1);
        let len = i64::try_from(chars.len()).unwrap_or(i64::MAX);
        #[allow(clippy::cast_sign_loss)]
        let start = slice_bound(start_cell, 0).min(len) as usize;
        #[allow(clippy::cast_sign_loss)]
        let stop = slice_bound(stop_cell, len).min(len) as usize;
        let sliced: String = if start < stop { chars[start..stop].iter().collect() } else { String::new() };
        return new_str(vm, sliced);
    }
    let Some(index) = key.as_int_like() else {
        return Err(RaisedExc::type_error("string indices must be integers").into());
    };
    let Some(i) = normalize_index(index, chars.len()) else {
        return Err(RaisedExc::index_error("string index out of range").into());
    };
    new_str(vm, chars[i].to_string())
}

fn str_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_str(vm, args) {
        Some(other) => Ok(vm.new_bool(text(vm, args[0]) == other)),
        None => Ok(vm.registers().not_implemented),
    }
}

fn str_lt(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_str(vm, args) {
        Some(other) => Ok(vm.new_bool(text(vm, args[0]) < other)),
        None => Ok(vm.registers().not_implemented),
    }
}

fn str_le(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_str(vm, args) {
        Some(other) => Ok(vm.new_bool(text(vm, args[0]) <= other)),
        None => Ok(vm.registers().not_implemented),
    }
}

fn str_add(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_str(vm, args) {
        Some(other) => {
            let mut joined = String::with_capacity(text(vm, args[0]).len() + other.len());
            joined.push_str(text(vm, args[0]));
            joined.push_str(other);
            new_str(vm, joined)
        }
        None => Ok(vm.registers().not_implemented),
    }
}

fn str_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(needle) = other_str(vm, args) else {
        return Err(RaisedExc::type_error("'in <string>' requires string as left operand").into());
    };
    Ok(vm.new_bool(text(vm, args[0]).contains(needle)))
}

const STR_HASH_SEEDS: (u64, u64, u64, u64) = (0x9e37_79b9, 0x7f4a_7c15, 0xbf58_476d, 0x94d0_49bb);

fn str_hash(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let hasher_state = RandomState::with_seeds(STR_HASH_SEEDS.0, STR_HASH_SEEDS.1, STR_HASH_SEEDS.2, STR_HASH_SEEDS.3);
    let mut hasher = hasher_state.build_hasher();
    hasher.write(text(vm, args[0]).as_bytes());
    #[allow(clippy::cast_possible_wrap)]
    Ok(vm.new_int(hasher.finish() as i64))
}

fn str_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(!text(vm, args[0]).is_empty()))
}

fn str_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let mut out = String::from("'");
    for c in text(vm, args[0]).chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    new_str(vm, out)
}

fn str_str(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    new_str(vm, text(vm, args[0]).to_string())
}

fn str_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let ty = vm.types.builtins.str_iterator;
    let slots = SmallVec::from_slice(&[args[0], vm.new_int(0)]);
    let id = vm.alloc(ty, slots, UserData::None, false)?;
    Ok(Cell::ptr(ty, id))
}

fn str_iterator_iter(_vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(args[0])
}

fn str_iterator_next(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(id) = args[0].as_object_id() else {
        return Err(RaisedExc::type_error("not a str_iterator").into());
    };
    let source = vm.heap.get(id).slot(0);
    let index = vm.heap.get(id).slot(1).as_int_like().unwrap_or(0);
    let chars: Vec<char> = text(vm, source).chars().collect();
    let Ok(i) = usize::try_from(index) else {
        return Err(RaisedExc::stop_iteration().into());
    };
    if i >= chars.len() {
        return Err(RaisedExc::stop_iteration().into());
    }
    let next_index = vm.new_int(index + 1);
    vm.heap.get_mut(id).set_slot(1, next_index);
    new_str(vm, chars[i].to_string())
}

/// Installs `str` and `str_iterator`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let str_ty = vm.types.builtins.str;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    {
        let mut set = |m: MagicName, f: crate::cell::NativeFn| {
            vm.types.get_mut(str_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
        };
        set(MagicName::__len__, str_len);
        set(MagicName::__getitem__, str_getitem);
        set(MagicName::__eq__, str_eq);
        set(MagicName::__lt__, str_lt);
        set(MagicName::__le__, str_le);
        set(MagicName::__add__, str_add);
        set(MagicName::__contains__, str_contains);
        set(MagicName::__hash__, str_hash);
        set(MagicName::__bool__, str_bool);
        set(MagicName::__repr__, str_repr);
        set(MagicName::__str__, str_str);
        set(MagicName::__iter__, str_iter);
    }
    let iter_ty = vm.types.builtins.str_iterator;
    let mut set_iter = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(iter_ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set_iter(MagicName::__iter__, str_iterator_iter);
    set_iter(MagicName::__next__, str_iterator_next);
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
    fn len_counts_chars_not_bytes() {
        let mut vm = setup();
        let s = new_str(&mut vm, "héllo").unwrap();
        let len = dispatch::call(&mut vm, vm.types.get(vm.types.builtins.str).own_magic(MagicName::__len__).unwrap(), &[s]).unwrap();
        assert_eq!(len.as_int(), Some(5));
    }

    #[test]
    fn negative_index_wraps_from_the_end() {
        let mut vm = setup();
        let s = new_str(&mut vm, "abc").unwrap();
        let idx = vm.new_int(-1);
        let result = dispatch::getitem(&mut vm, s, idx).unwrap();
        assert_eq!(text(&vm, result), "c");
    }

    #[test]
    fn concatenation_and_equality() {
        let mut vm = setup();
        let a = new_str(&mut vm, "foo").unwrap();
        let b = new_str(&mut vm, "bar").unwrap();
        let joined = dispatch::binaryop(&mut vm, MagicName::__add__, a, b).unwrap();
        assert_eq!(text(&vm, joined), "foobar");
        let same = new_str(&mut vm, "foobar").unwrap();
        assert!(dispatch::equal(&mut vm, joined, same).unwrap());
    }

    #[test]
    fn iteration_yields_each_char_then_stops() {
        let mut vm = setup();
        let s = new_str(&mut vm, "ab").unwrap();
        let iterator = dispatch::iter(&mut vm, s).unwrap();
        let first = dispatch::next(&mut vm, iterator).unwrap();
        assert_eq!(text(&vm, first), "a");
        let second = dispatch::next(&mut vm, iterator).unwrap();
        assert_eq!(text(&vm, second), "b");
        assert!(dispatch::next(&mut vm, iterator).is_err());
    }
}

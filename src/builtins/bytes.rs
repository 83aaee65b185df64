//! `bytes`: an immutable sequence of octets, stored as a plain `Vec<u8>`
//! in the heap object's user data. Indexing yields `int`s (`0..=255`), not
//! length-1 `bytes` objects — the one place this type's indexing protocol
//! diverges from `str`'s.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::heap::UserData;
use crate::intern::MagicName;
use crate::vm::Vm;

fn data<'vm>(vm: &'vm Vm, cell: Cell) -> &'vm [u8] {
    match cell.as_object_id().map(|id| &vm.heap.get(id).user_data) {
        Some(UserData::Bytes(b)) => b,
        _ => &[],
    }
}

/// Allocates a new `bytes` object from owned octets.
///
/// # Errors
/// Propagates heap allocation failure (see [`Vm::alloc`]).
pub fn new_bytes(vm: &mut Vm, data: Vec<u8>) -> CoreResult<Cell> {
    let ty = vm.types.builtins.bytes;
    let id = vm.alloc(ty, SmallVec::new(), UserData::Bytes(data), false)?;
    Ok(Cell::ptr(ty, id))
}

fn other_bytes<'vm>(vm: &'vm Vm, args: &[Cell]) -> Option<&'vm [u8]> {
    let cell = *args.get(1)?;
    let id = cell.as_object_id()?;
    match &vm.heap.get(id).user_data {
        UserData::Bytes(b) => Some(b),
        _ => None,
    }
}

fn bytes_len(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let n = data(vm, args[0]).len();
    Ok(vm.new_int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn bytes_getitem(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let bytes = data(vm, args[0]).to_vec();
    let Some(index) = args[1].as_int_like() else {
        return Err(RaisedExc::type_error("byte indices must be integers").into());
    };
    let len_i = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
    let normalized = if index < 0 { index + len_i } else { index };
    if normalized < 0 || normalized >= len_i {
        return Err(RaisedExc::index_error("index out of range").into());
    }
    Ok(vm.new_int(i64::from(bytes[normalized as usize])))
}

fn bytes_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_bytes(vm, args) {
        Some(other) => Ok(vm.new_bool(data(vm, args[0]) == other)),
        None => Ok(vm.registers().not_implemented),
    }
}

fn bytes_add(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    match other_bytes(vm, args) {
        Some(other) => {
            let mut joined = data(vm, args[0]).to_vec();
            joined.extend_from_slice(other);
            new_bytes(vm, joined)
        }
        None => Ok(vm.registers().not_implemented),
    }
}

fn bytes_contains(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let haystack = data(vm, args[0]).to_vec();
    if let Some(byte) = args[1].as_int_like() {
        let byte = u8::try_from(byte).map_err(|_| RaisedExc::value_error("byte must be in range(0, 256)"))?;
        return Ok(vm.new_bool(haystack.contains(&byte)));
    }
    let Some(needle) = other_bytes(vm, args) else {
        return Err(RaisedExc::type_error("a bytes-like object is required").into());
    };
    let found = needle.is_empty() || haystack.windows(needle.len().max(1)).any(|w| w == needle);
    Ok(vm.new_bool(found))
}

fn bytes_hash(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    use ahash::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let hasher_state = RandomState::with_seeds(0x9e37_79b9, 0x7f4a_7c15, 0xbf58_476d, 0x94d0_49bb);
    let mut hasher = hasher_state.build_hasher();
    hasher.write(data(vm, args[0]));
    #[allow(clippy::cast_possible_wrap)]
    Ok(vm.new_int(hasher.finish() as i64))
}

fn bytes_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(!data(vm, args[0]).is_empty()))
}

fn bytes_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let mut out = String::from("b'");
    for &byte in data(vm, args[0]) {
        match byte {
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('\'');
    super::strtype::new_str(vm, out)
}

fn bytes_iter(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    super::list::new_sequence_iterator(vm, args[0])
}

/// Installs `bytes`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.bytes;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__len__, bytes_len);
    set(MagicName::__getitem__, bytes_getitem);
    set(MagicName::__eq__, bytes_eq);
    set(MagicName::__add__, bytes_add);
    set(MagicName::__contains__, bytes_contains);
    set(MagicName::__hash__, bytes_hash);
    set(MagicName::__bool__, bytes_bool);
    set(MagicName::__repr__, bytes_repr);
    set(MagicName::__iter__, bytes_iter);
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
    fn indexing_yields_an_int_not_a_length_one_bytes() {
        let mut vm = setup();
        let b = new_bytes(&mut vm, vec![10, 20, 30]).unwrap();
        let first = dispatch::getitem(&mut vm, b, vm.new_int(0)).unwrap();
        assert_eq!(first.as_int(), Some(10));
    }

    #[test]
    fn concatenation_and_equality() {
        let mut vm = setup();
        let a = new_bytes(&mut vm, vec![1, 2]).unwrap();
        let b = new_bytes(&mut vm, vec![3, 4]).unwrap();
        let joined = dispatch::binaryop(&mut vm, MagicName::__add__, a, b).unwrap();
        let expected = new_bytes(&mut vm, vec![1, 2, 3, 4]).unwrap();
        assert!(dispatch::equal(&mut vm, joined, expected).unwrap());
    }

    #[test]
    fn contains_checks_a_single_byte_value() {
        let mut vm = setup();
        let b = new_bytes(&mut vm, vec![5, 6, 7]).unwrap();
        assert!(dispatch::truthy(&mut vm, dispatch::call(&mut vm, vm.types.get(vm.types.builtins.bytes).own_magic(MagicName::__contains__).unwrap(), &[b, vm.new_int(6)]).unwrap()).unwrap());
    }
}

//! Accessors for exception objects raised through [`crate::vm::Vm::raise`].
//!
//! The exception hierarchy itself lives in [`crate::types::TypeRegistry`]
//! (registered once at bootstrap); this module only reads/writes the two
//! slots every exception object carries (argument tuple, chained cause)
//! and the message string stashed in its user data by `Vm::raise`.

use crate::cell::Cell;
use crate::error::ExcKind;
use crate::heap::UserData;
use crate::vm::Vm;

const ARGS_SLOT: usize = 0;
const CAUSE_SLOT: usize = 1;

/// The exception's `args` tuple placeholder (spec §4.3: "two slots — an
/// argument tuple and a chained inner exception").
#[must_use]
pub fn args(vm: &Vm, exc: Cell) -> Cell {
    exc.as_object_id().map_or(vm.registers().none, |id| vm.heap.get(id).slot(ARGS_SLOT))
}

#[must_use]
pub fn cause(vm: &Vm, exc: Cell) -> Cell {
    exc.as_object_id().map_or(vm.registers().none, |id| vm.heap.get(id).slot(CAUSE_SLOT))
}

/// Sets the chained cause, as `raise ... from ...` would.
pub fn set_cause(vm: &mut Vm, exc: Cell, new_cause: Cell) {
    if let Some(id) = exc.as_object_id() {
        vm.heap.get_mut(id).set_slot(CAUSE_SLOT, new_cause);
    }
}

/// The human-readable message `Vm::raise` stashed when materializing the
/// exception object, if any survives (native-constructed exceptions
/// always have one; user-constructed ones via `construct` may not).
#[must_use]
pub fn message<'vm>(vm: &'vm Vm, exc: Cell) -> Option<&'vm str> {
    let id = exc.as_object_id()?;
    match &vm.heap.get(id).user_data {
        UserData::Str(s) => Some(s),
        _ => None,
    }
}

/// `true` if `exc`'s type (or an ancestor) is the type registered for
/// `kind`.
#[must_use]
pub fn is_kind(vm: &Vm, exc: Cell, kind: ExcKind) -> bool {
    let Some(ty) = vm.types.exception_type(&vm.names, kind) else {
        return false;
    };
    vm.types.issubclass(exc.type_id(), ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::RaisedExc;

    #[test]
    fn raised_exception_carries_its_message_and_kind() {
        let mut vm = Vm::new(Config::default()).unwrap();
        vm.raise(RaisedExc::value_error("bad value"));
        let exc = vm.current_exception().unwrap();
        assert_eq!(message(&vm, exc), Some("bad value"));
        assert!(is_kind(&vm, exc, ExcKind::ValueError));
        assert!(!is_kind(&vm, exc, ExcKind::TypeError));
    }

    #[test]
    fn cause_chain_round_trips() {
        let mut vm = Vm::new(Config::default()).unwrap();
        vm.raise(RaisedExc::value_error("inner"));
        let inner = vm.current_exception().unwrap();
        vm.clear_exception();
        vm.raise(RaisedExc::type_error("outer"));
        let outer = vm.current_exception().unwrap();
        set_cause(&mut vm, outer, inner);
        assert_eq!(message(&vm, cause(&vm, outer)), Some("inner"));
    }
}

//! The embeddable core of a Python-language runtime: value representation,
//! managed heap and garbage collector, type registry, attribute/method
//! resolution, and VM state. Deliberately excluded (left to collaborators
//! linked against this crate): the lexer/parser/bytecode compiler, the
//! bytecode interpreter loop, module-path resolution and source loading,
//! standard-library bindings, the REPL, and a C ABI façade.
//!
//! The [`dispatch`] module is the entry point a bytecode interpreter calls
//! into for attribute access, operator use, iteration, calls, and item
//! access; [`vm::Vm`] is the self-contained universe (heap, types, stack,
//! frames, exception channel) each such interpreter drives.

pub mod attrs;
pub mod builtins;
pub mod cell;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exceptions;
pub mod gc;
pub mod heap;
pub mod intern;
pub mod resource;
pub mod types;
pub mod vm;

pub use crate::cell::{Cell, NativeFn, TypeId};
pub use crate::config::Config;
pub use crate::error::{CoreError, CoreResult, ExcKind, FatalError, RaisedExc};
pub use crate::heap::{Heap, ObjectId, UserData};
pub use crate::intern::{MagicName, NameId, NamePool};
pub use crate::types::{BuiltinTypeIds, TypeObject, TypeRegistry};
pub use crate::vm::{Frame, Registers, Vm, VmHandle};

/// Builds a fresh, fully bootstrapped VM: built-in types, the exception
/// hierarchy, and every built-in type's magic methods are installed and
/// ready for a bytecode interpreter to start pushing frames.
///
/// # Errors
/// Only fails if the name pool is exhausted during bootstrap, which
/// cannot happen starting from a fresh pool.
pub fn new_vm(config: Config) -> CoreResult<Vm> {
    let mut vm = Vm::new(config)?;
    builtins::install(&mut vm)?;
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vm_boots_with_builtins_installed() {
        let mut vm = new_vm(Config::default()).unwrap();
        let five = vm.new_int(5);
        let three = vm.new_int(3);
        let sum = dispatch::binaryop(&mut vm, MagicName::__add__, five, three).unwrap();
        assert_eq!(sum.as_int(), Some(8));
    }
}

//! Error taxonomy for the core.
//!
//! Internally everything uses [`CoreResult`]/[`CoreError`] with `?` propagation.
//! At the [`crate::api`] boundary a `CoreError` is deposited into the owning
//! VM's exception slot and the call reports failure as a plain `bool`, matching
//! the propagation model every embedder-facing operation follows.

use std::fmt;

use strum::IntoStaticStr;

use crate::intern::NameId;

pub type CoreResult<T> = Result<T, CoreError>;

/// The recoverable/unrecoverable exception taxonomy.
///
/// Ordered from most to least common, mirroring the taxonomy table.
/// Every variant maps 1:1 to a registered exception type in the
/// [`crate::types::TypeRegistry`]; `exc_type()` gives the canonical name used
/// to look that type up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum ExcKind {
    TypeError,
    ValueError,
    AttributeError,
    NameError,
    UnboundLocalError,
    IndexError,
    KeyError,
    ZeroDivisionError,
    RuntimeError,
    ImportError,
    StopIteration,
    OsError,
    SyntaxError,
    StackOverflowError,
    AssertionError,
    NotImplementedError,
    SystemExit,
    KeyboardInterrupt,
    /// Catch-all raised through `py_exception`/`py_raise` for user-registered
    /// exception types; callers pass the type id directly.
    Custom,
}

impl ExcKind {
    /// Whether this kind derives directly from `BaseException` rather than
    /// from `Exception` (see spec §7).
    #[must_use]
    pub fn derives_base_exception_directly(self) -> bool {
        matches!(self, Self::SystemExit | Self::KeyboardInterrupt | Self::StopIteration)
    }
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = (*self).into();
        write!(f, "{s}")
    }
}

/// A raised-but-not-yet-materialized exception: enough information for
/// [`crate::vm::Vm::raise`] to allocate the exception object lazily.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RaisedExc {
    pub kind: ExcKind,
    pub message: String,
}

impl RaisedExc {
    #[must_use]
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    #[must_use]
    pub fn attribute_error(type_name: &str, name: &str) -> Self {
        Self::new(
            ExcKind::AttributeError,
            format!("'{type_name}' object has no attribute '{name}'"),
        )
    }

    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::new(ExcKind::NameError, format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::IndexError, message)
    }

    #[must_use]
    pub fn key_error(name: NameId) -> Self {
        Self::new(ExcKind::KeyError, format!("{}", name.0))
    }

    #[must_use]
    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ZeroDivisionError, message)
    }

    #[must_use]
    pub fn not_callable(type_name: &str) -> Self {
        Self::new(ExcKind::TypeError, format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub fn stop_iteration() -> Self {
        Self::new(ExcKind::StopIteration, String::new())
    }
}

/// Unrecoverable VM conditions. Once raised, the owning VM is left in a
/// defined but non-resumable state (spec §7 "Recovery").
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    #[error("stack overflow: value stack exceeded {limit} cells")]
    StackOverflow { limit: usize },
    #[error("out of memory: heap allocator refused request of {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("name pool exhausted: cannot intern more than {max} identifiers")]
    NamePoolExhausted { max: usize },
}

/// Internal Rust-level error type. Never crosses the `api` boundary directly;
/// `Recoverable` becomes an exception-slot deposit, `Fatal` poisons the VM.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Recoverable(#[from] RaisedExc),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl CoreError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    #[must_use]
    pub fn is_stop_iteration(&self) -> bool {
        matches!(self, Self::Recoverable(exc) if exc.kind == ExcKind::StopIteration)
    }
}

//! VM state: registers, value stack, frame chain, the exception channel,
//! and the thread-local pool that multiplexes several VMs.
//!
//! Every operation that needs "the current VM" is exposed two ways: as a
//! method on [`Vm`] itself (for embedders holding a `&mut Vm` directly),
//! and as a free function taking an explicit [`VmHandle`] that looks the
//! VM up in the thread-local [`VmPool`] (for embedders that prefer a
//! context-parameter style closer to the upstream C ABI's implicit
//! "current VM"). Neither is layered on top of the other as a convenience
//! wrapper; both read the same underlying state.

use std::cell::RefCell;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::attrs::AttrStore;
use crate::cell::{Cell, TypeId};
use crate::config::{self, Config};
use crate::error::{CoreError, CoreResult, ExcKind, FatalError, RaisedExc};
use crate::gc;
use crate::heap::{Heap, ObjectId, UserData};
use crate::intern::{NameId, NamePool};
use crate::resource::{NoLimitTracker, ResourceTracker};
use crate::types::TypeRegistry;

/// Fixed registers every VM carries regardless of frame state: the three
/// singletons, the distinguished non-value, and the last call's return
/// value (read by the dispatch layer's call-return convention).
#[derive(Debug, Clone, Copy)]
pub struct Registers {
    pub true_: Cell,
    pub false_: Cell,
    pub none: Cell,
    pub not_implemented: Cell,
    pub ellipsis: Cell,
    pub last_return: Cell,
}

impl Registers {
    fn bootstrap(bool_ty: TypeId, none_ty: TypeId, not_implemented_ty: TypeId, ellipsis_ty: TypeId) -> Self {
        Self {
            true_: Cell::bool(bool_ty, true),
            false_: Cell::bool(bool_ty, false),
            none: Cell::none(none_ty),
            not_implemented: Cell::not_implemented(not_implemented_ty),
            ellipsis: Cell::ellipsis(ellipsis_ty),
            last_return: Cell::none(none_ty),
        }
    }

    fn roots(&self) -> impl Iterator<Item = Cell> + '_ {
        [self.true_, self.false_, self.none, self.not_implemented, self.ellipsis, self.last_return].into_iter()
    }
}

/// A single call frame's locals. The bytecode interpreter that drives
/// execution is an external collaborator; what this core provides is the
/// allocation/bookkeeping a frame needs to participate in GC rooting and
/// stack-overflow accounting, not the instruction dispatch loop itself.
#[derive(Debug)]
pub struct Frame {
    pub locals: SmallVec<[Cell; 8]>,
    pub module: Option<ObjectId>,
}

impl Frame {
    #[must_use]
    pub fn new(max_co_varnames: usize, module: Option<ObjectId>) -> Self {
        Self {
            locals: SmallVec::from_elem(Cell::nil(), max_co_varnames),
            module,
        }
    }
}

/// The exception channel's state machine (spec §7): `clear -> raised ->
/// handled -> clear`. `raised` means propagating; `handled` means a
/// handler caught it and it is available for inspection (e.g. `__cause__`
/// chaining) until explicitly cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExceptionState {
    Clear,
    Raised,
    Handled,
}

#[derive(Debug)]
struct ExceptionSlot {
    state: ExceptionState,
    value: Option<Cell>,
}

impl Default for ExceptionSlot {
    fn default() -> Self {
        Self {
            state: ExceptionState::Clear,
            value: None,
        }
    }
}

/// One embeddable Python VM: its own heap, type registry, name pool,
/// value stack, frame chain, and exception channel. Nothing here is
/// shared between VMs — `Vm::new` bootstraps a fully independent instance.
pub struct Vm {
    pub heap: Heap,
    pub types: TypeRegistry,
    pub names: NamePool,
    pub config: Config,
    registers: Registers,
    stack: Vec<Cell>,
    frames: Vec<Frame>,
    exception: ExceptionSlot,
    modules: AHashMap<NameId, ObjectId>,
    argv: Vec<String>,
    gc_tracker: NoLimitTracker,
}

impl Vm {
    /// Builds a fresh VM: interns every magic name, bootstraps the type
    /// registry's built-in types and exception hierarchy, and seeds the
    /// fixed registers.
    ///
    /// # Errors
    /// Only fails if the name pool is exhausted before bootstrap finishes,
    /// which cannot happen from a fresh pool.
    pub fn new(config: Config) -> CoreResult<Self> {
        let mut names = NamePool::new();
        let types = TypeRegistry::bootstrap(&mut names)?;
        let registers = Registers::bootstrap(
            types.builtins.bool,
            types.builtins.none_type,
            types.builtins.not_implemented_type,
            types.builtins.ellipsis_type,
        );
        Ok(Self {
            heap: Heap::new(),
            types,
            names,
            gc_tracker: NoLimitTracker::new(config.gc_min_threshold),
            config,
            registers,
            stack: Vec::new(),
            frames: Vec::new(),
            exception: ExceptionSlot::default(),
            modules: AHashMap::new(),
            argv: Vec::new(),
        })
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn set_last_return(&mut self, value: Cell) {
        self.registers.last_return = value;
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Pushes a value onto the value stack.
    ///
    /// # Errors
    /// Returns [`FatalError::StackOverflow`] once `vm_stack_size` would be
    /// exceeded; this poisons the VM per the fatal-error contract.
    pub fn push(&mut self, value: Cell) -> CoreResult<()> {
        if self.stack.len() >= self.config.vm_stack_size {
            return Err(FatalError::StackOverflow {
                limit: self.config.vm_stack_size,
            }
            .into());
        }
        self.stack.push(value);
        Ok(())
    }

    #[must_use]
    pub fn pop(&mut self) -> Option<Cell> {
        self.stack.pop()
    }

    #[must_use]
    pub fn peek(&self, depth_from_top: usize) -> Option<Cell> {
        let len = self.stack.len();
        len.checked_sub(depth_from_top + 1).map(|i| self.stack[i])
    }

    /// Pushes a new call frame.
    ///
    /// # Errors
    /// Returns [`FatalError::StackOverflow`] if the frame chain is already
    /// as deep as the value stack is wide — there is no separate
    /// recursion-limit knob; frame depth is bounded by the same budget as
    /// the value stack.
    pub fn push_frame(&mut self, module: Option<ObjectId>) -> CoreResult<()> {
        if self.frames.len() >= self.config.vm_stack_size {
            return Err(FatalError::StackOverflow {
                limit: self.config.vm_stack_size,
            }
            .into());
        }
        self.frames.push(Frame::new(self.config.max_co_varnames, module));
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn register_module(&mut self, name: NameId, module: ObjectId) {
        self.modules.insert(name, module);
    }

    #[must_use]
    pub fn find_module(&self, name: NameId) -> Option<ObjectId> {
        self.modules.get(&name).copied()
    }

    // -- exception channel --------------------------------------------------

    /// Materializes `exc` as a heap exception object (slot 0 = args tuple
    /// placeholder cell, slot 1 = chained cause, initially `none`) and
    /// moves the channel to `Raised`. Returns the `CoreError` so callers
    /// can propagate it with `?` in the same expression that raised it.
    ///
    /// # Errors
    /// Propagates [`FatalError::NamePoolExhausted`] only in the degenerate
    /// case where `exc.kind`'s name was never interned and cannot be now;
    /// in practice every built-in kind is interned at bootstrap.
    pub fn raise(&mut self, exc: RaisedExc) -> CoreError {
        tracing::trace!(kind = %exc.kind, message = %exc.message, "exception raised");
        let Ok(ty) = self.types.require_exception_type(&self.names, &exc) else {
            return exc.into();
        };
        // Slot 0 is the argument tuple (`exc.args == (message,)`, matching
        // Python), slot 1 the chained cause. `msg` is reachable only from
        // this Rust local between the two allocations, so the window runs
        // with auto-GC suppressed (see `suppress_auto_gc`'s doc comment).
        let message = exc.message.clone();
        let args_tuple = match self.suppress_auto_gc(|vm| {
            crate::builtins::strtype::new_str(vm, message.clone()).and_then(|msg| crate::builtins::tuple::new_tuple(vm, vec![msg]))
        }) {
            Ok(tuple) => tuple,
            Err(_) => self.registers.none,
        };
        let slots = SmallVec::from_slice(&[args_tuple, self.registers.none]);
        let id = self.heap.alloc(ty, slots, UserData::Str(message.into_boxed_str()), false);
        self.exception = ExceptionSlot {
            state: ExceptionState::Raised,
            value: Some(Cell::ptr(ty, id)),
        };
        exc.into()
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.exception.state == ExceptionState::Raised
    }

    #[must_use]
    pub fn current_exception(&self) -> Option<Cell> {
        self.exception.value
    }

    /// Moves a raised exception to `Handled` (a handler caught it).
    pub fn handle_exception(&mut self) {
        if self.exception.state == ExceptionState::Raised {
            self.exception.state = ExceptionState::Handled;
        }
    }

    /// Clears the channel entirely, from either `Raised` or `Handled`.
    pub fn clear_exception(&mut self) {
        self.exception = ExceptionSlot::default();
    }

    // -- GC -------------------------------------------------------------

    fn roots(&self) -> impl Iterator<Item = Cell> + '_ {
        self.registers
            .roots()
            .chain(self.stack.iter().copied())
            .chain(self.frames.iter().flat_map(|f| f.locals.iter().copied()))
            .chain(self.modules.values().map(|id| Cell::ptr(self.types.builtins.module, *id)))
            .chain(self.exception.value)
    }

    /// Runs a collection unconditionally, regardless of what the resource
    /// tracker thinks. Returns the stats for logging.
    pub fn collect_garbage(&mut self) -> gc::GcStats {
        let roots: Vec<Cell> = self.roots().collect();
        let stats = gc::collect(&mut self.heap, roots);
        tracing::debug!(collected = stats.collected, live_after = stats.live_after, "garbage collection pass");
        self.gc_tracker.on_gc_complete(stats);
        self.heap.reset_gc_counter();
        stats
    }

    /// Runs `f` with the auto-GC trigger suppressed, restoring the previous
    /// setting afterward (even if `f` returns early via `?`, since this
    /// isn't itself fallible). Needed around any window where a cell is
    /// reachable only from a Rust local — not yet linked into the stack,
    /// a register, or a heap object's slots/attrs/user-data — because a
    /// collection triggered inside that window would treat it as garbage
    /// (spec §4.2: "GC does not run while a native callback is mid-
    /// allocation of an uninitialized object"). Two call sites need this:
    /// `Vm::raise` building the chained args-tuple cell-by-cell, and
    /// `dict`'s `take_user_data`/`restore_user_data` window, where the
    /// dict's own entries are briefly untraceable while a user `__hash__`/
    /// `__eq__` callback re-enters the VM.
    pub fn suppress_auto_gc<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.config.debug_no_auto_gc;
        self.config.debug_no_auto_gc = true;
        let result = f(self);
        self.config.debug_no_auto_gc = previous;
        result
    }

    /// Allocates via the heap, charging the resource tracker and running a
    /// collection first if it's due and auto-GC isn't disabled.
    ///
    /// # Errors
    /// Propagates heap allocation failures (currently infallible in this
    /// arena, reserved for an embedder-supplied allocation ceiling).
    pub fn alloc(&mut self, type_id: TypeId, slots: SmallVec<[Cell; 4]>, user_data: UserData, with_attrs: bool) -> CoreResult<ObjectId> {
        if !self.config.debug_no_auto_gc && self.gc_tracker.should_gc() {
            self.collect_garbage();
        }
        let before = self.heap.bytes_since_gc();
        let id = self.heap.alloc(type_id, slots, user_data, with_attrs);
        let charged = self.heap.bytes_since_gc() - before;
        self.gc_tracker.on_allocate(charged);
        Ok(id)
    }

    /// Allocates a plain instance with a fresh attribute store — the
    /// common path for `SomeClass()` constructing a general object.
    ///
    /// # Errors
    /// See [`Vm::alloc`].
    pub fn new_instance(&mut self, type_id: TypeId) -> CoreResult<ObjectId> {
        self.alloc(type_id, SmallVec::new(), UserData::None, true)
    }

    #[must_use]
    pub fn new_int(&self, value: i64) -> Cell {
        Cell::int(self.types.builtins.int, value)
    }

    #[must_use]
    pub fn new_float(&self, value: f64) -> Cell {
        Cell::float(self.types.builtins.float, value)
    }

    #[must_use]
    pub fn new_bool(&self, value: bool) -> Cell {
        Cell::bool(self.types.builtins.bool, value)
    }
}

/// Reserved attribute store for a module object: a thin wrapper so module
/// globals get the same open-addressed treatment as instance attributes.
#[must_use]
pub fn new_module_attrs(config: &Config) -> AttrStore {
    AttrStore::new(config.inst_attr_load_factor)
}

// -- multi-VM multiplexing ---------------------------------------------------

/// Identifies a VM owned by the thread-local [`VmPool`]. Opaque and
/// copyable; stable for the VM's lifetime in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmHandle(u8);

struct VmPool {
    slots: Vec<Option<Vm>>,
    current: Option<VmHandle>,
}

impl VmPool {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            current: None,
        }
    }
}

thread_local! {
    static POOL: RefCell<VmPool> = RefCell::new(VmPool::new());
}

/// Creates a new VM and registers it in the calling thread's pool,
/// returning a handle. Does not change which VM is "current".
///
/// # Errors
/// Returns [`RaisedExc::runtime_error`]-flavored [`CoreError`] (via a
/// `RuntimeError`) once [`config::MAX_VMS`] VMs are already registered.
pub fn create(cfg: Config) -> CoreResult<VmHandle> {
    let vm = Vm::new(cfg)?;
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if let Some(slot) = pool.slots.iter().position(Option::is_none) {
            pool.slots[slot] = Some(vm);
            Ok(VmHandle(u8::try_from(slot).expect("MAX_VMS fits in u8")))
        } else if pool.slots.len() < config::MAX_VMS {
            pool.slots.push(Some(vm));
            Ok(VmHandle(u8::try_from(pool.slots.len() - 1).expect("MAX_VMS fits in u8")))
        } else {
            Err(RaisedExc::new(ExcKind::RuntimeError, format!("cannot exceed {} concurrent VMs", config::MAX_VMS)).into())
        }
    })
}

/// Destroys the VM at `handle`, freeing its slot for reuse. If it was the
/// current VM, no VM is current afterward.
pub fn destroy(handle: VmHandle) {
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if let Some(slot) = pool.slots.get_mut(handle.0 as usize) {
            *slot = None;
        }
        if pool.current == Some(handle) {
            pool.current = None;
        }
    });
}

/// Marks `handle` as the thread's current VM, for callers that want the
/// upstream-style implicit-current-VM convention.
pub fn set_current(handle: VmHandle) {
    POOL.with(|pool| pool.borrow_mut().current = Some(handle));
}

#[must_use]
pub fn current_handle() -> Option<VmHandle> {
    POOL.with(|pool| pool.borrow().current)
}

/// Runs `f` against the VM at `handle`, if it's still registered.
pub fn with<R>(handle: VmHandle, f: impl FnOnce(&mut Vm) -> R) -> Option<R> {
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        pool.slots.get_mut(handle.0 as usize).and_then(Option::as_mut).map(f)
    })
}

/// Runs `f` against the thread's current VM, if one is set.
pub fn with_current<R>(f: impl FnOnce(&mut Vm) -> R) -> Option<R> {
    current_handle().and_then(|h| with(h, f))
}

/// A [`Vm`] wrapped in a re-entrant lock, for embedders that share one VM
/// across threads rather than using the thread-local pool above. Re-entrant
/// because a native callback invoked through [`crate::dispatch::call`] may
/// itself need to borrow the same VM (e.g. a `__repr__` that calls back into
/// `getattr`) from the same thread that already holds the lock.
#[cfg(feature = "locked")]
pub struct LockedVm {
    inner: parking_lot::ReentrantMutex<std::cell::RefCell<Vm>>,
}

#[cfg(feature = "locked")]
impl LockedVm {
    /// # Errors
    /// See [`Vm::new`].
    pub fn new(config: Config) -> CoreResult<Self> {
        Ok(Self {
            inner: parking_lot::ReentrantMutex::new(std::cell::RefCell::new(Vm::new(config)?)),
        })
    }

    /// Runs `f` with exclusive (but re-entrant, same-thread) access to the
    /// wrapped VM.
    pub fn with<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> R {
        let guard = self.inner.lock();
        let mut vm = guard.borrow_mut();
        f(&mut vm)
    }
}

#[cfg(all(test, feature = "locked"))]
mod locked_tests {
    use super::*;

    #[test]
    fn locked_vm_allows_reentrant_access_from_a_native_callback() {
        let locked = LockedVm::new(Config::default()).unwrap();
        let outer = locked.with(|vm| vm.new_int(1));
        let inner = locked.with(|vm| {
            // Simulates a native callback re-entering the same VM while the
            // outer `with` call's borrow is conceptually "held" -- both
            // calls are sequential here since `with` doesn't nest directly,
            // but the lock itself must tolerate being acquired twice from
            // one thread without deadlocking.
            locked.with(|vm2| vm2.new_int(2)).as_int().unwrap() + vm.new_int(0).as_int().unwrap()
        });
        assert_eq!(outer.as_int(), Some(1));
        assert_eq!(inner, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_stack_size_is_a_fatal_stack_overflow() {
        let mut vm = Vm::new(Config {
            vm_stack_size: 2,
            ..Config::default()
        })
        .unwrap();
        vm.push(vm.registers().none).unwrap();
        vm.push(vm.registers().none).unwrap();
        let err = vm.push(vm.registers().none).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn raise_then_handle_then_clear_walks_the_state_machine() {
        let mut vm = Vm::new(Config::default()).unwrap();
        assert!(!vm.is_raised());
        vm.raise(RaisedExc::value_error("boom"));
        assert!(vm.is_raised());
        assert!(vm.current_exception().is_some());
        vm.handle_exception();
        assert!(!vm.is_raised());
        assert!(vm.current_exception().is_some());
        vm.clear_exception();
        assert!(vm.current_exception().is_none());
    }

    #[test]
    fn pool_reuses_handle_after_destroy() {
        let h1 = create(Config::default()).unwrap();
        destroy(h1);
        let h2 = create(Config::default()).unwrap();
        assert_eq!(h1, h2);
        destroy(h2);
    }

    #[test]
    fn gc_reclaims_unrooted_instances_across_a_vm() {
        let mut vm = Vm::new(Config {
            debug_no_auto_gc: true,
            ..Config::default()
        })
        .unwrap();
        let ty = vm.types.builtins.object;
        let _unrooted = vm.new_instance(ty).unwrap();
        let rooted_id = vm.new_instance(ty).unwrap();
        vm.push(Cell::ptr(ty, rooted_id)).unwrap();
        let stats = vm.collect_garbage();
        assert_eq!(stats.collected, 1);
        assert_eq!(stats.live_after, 1);
    }
}

//! Tunables pinned down by the original implementation's `common/config.h`.
//!
//! Every constant here has an observable semantic consequence (stack
//! overflow boundary, GC trigger point, attribute store rehash point) so it
//! is kept as runtime configuration rather than a compile-time constant,
//! while the defaults match the upstream header exactly.

/// Maximum number of cells on a single VM's value stack before
/// `StackOverflowError` is raised.
pub const DEFAULT_VM_STACK_SIZE: usize = 16384;

/// Starting byte threshold for triggering a GC pass.
pub const DEFAULT_GC_MIN_THRESHOLD: usize = 16384;

/// Maximum number of local variables a single frame's register window may
/// address; also used to size the register bank's scratch region.
pub const DEFAULT_MAX_CO_VARNAMES: usize = 64;

/// Load factor at which an instance's attribute store rehashes.
pub const DEFAULT_INST_ATTR_LOAD_FACTOR: f32 = 0.67;

/// Load factor at which a type's attribute store rehashes.
pub const DEFAULT_TYPE_ATTR_LOAD_FACTOR: f32 = 0.5;

/// Maximum number of VMs that may coexist in one [`crate::vm::VmPool`].
pub const MAX_VMS: usize = 16;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub vm_stack_size: usize,
    pub gc_min_threshold: usize,
    pub max_co_varnames: usize,
    pub inst_attr_load_factor: f32,
    pub type_attr_load_factor: f32,
    /// Disables automatic GC triggers; collection only runs when requested
    /// explicitly. Intended for deterministic tests, mirrors `PK_DEBUG_NO_AUTO_GC`.
    pub debug_no_auto_gc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vm_stack_size: DEFAULT_VM_STACK_SIZE,
            gc_min_threshold: DEFAULT_GC_MIN_THRESHOLD,
            max_co_varnames: DEFAULT_MAX_CO_VARNAMES,
            inst_attr_load_factor: DEFAULT_INST_ATTR_LOAD_FACTOR,
            type_attr_load_factor: DEFAULT_TYPE_ATTR_LOAD_FACTOR,
            debug_no_auto_gc: cfg!(feature = "debug-no-auto-gc"),
        }
    }
}

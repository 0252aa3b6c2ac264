//! Generated kernel and its call contract

use super::asm::Program;
use super::exec;
use super::macro_loop::MacroLoopEmitter;
use crate::plan::KernelConfig;
use std::ptr;
use tracing::trace;

/// Flag bit: first reduction pass, accumulators start from bias or zero
pub const FLAG_REDUCE_FIRST: usize = 1 << 0;

/// Flag bit: last reduction pass, the activation applies
pub const FLAG_REDUCE_LAST: usize = 1 << 1;

/// Flag bit: the call covers the final spatial tail of a transposed source
pub const FLAG_SP_LAST: usize = 1 << 2;

/// Per-call arguments, read once by the kernel prologue
///
/// Pointers address the first element the call touches in each operand; work counts
/// are in elements of the respective axis. `reduce_dim` must be a positive multiple of
/// the configuration's `reduce_loop_unroll`, `load_dim` a multiple of the load block.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct CallDescriptor {
    /// Broadcast operand
    pub bcast_data: *const u8,
    /// Load operand
    pub load_data: *const u8,
    /// Output
    pub output_data: *mut u8,
    /// Bias; read only when the configuration has a bias
    pub bias_data: *const u8,
    /// Load work
    pub load_dim: usize,
    /// Broadcast work
    pub bcast_dim: usize,
    /// Reduction work
    pub reduce_dim: usize,
    /// `FLAG_*` bits
    pub flags: usize,
    /// Bytes between output load tiles; weight gradient only
    pub output_stride: usize,
}

impl Default for CallDescriptor {
    fn default() -> Self {
        Self {
            bcast_data: ptr::null(),
            load_data: ptr::null(),
            output_data: ptr::null_mut(),
            bias_data: ptr::null(),
            load_dim: 0,
            bcast_dim: 0,
            reduce_dim: 0,
            flags: 0,
            output_stride: 0,
        }
    }
}

/// A generated 1×1 convolution kernel
///
/// Immutable after generation and shareable across threads; every invocation keeps
/// its state on the calling thread's stack.
#[derive(Clone, Debug)]
pub struct EmittedKernel {
    config: KernelConfig,
    program: Program,
}

impl EmittedKernel {
    /// Generate the kernel for `config`
    ///
    /// # Panics
    ///
    /// Panics if `config` violates the register or blocking invariants the planner
    /// establishes.
    pub fn new(config: KernelConfig) -> Self {
        let program = MacroLoopEmitter::new(&config).emit();
        trace!(
            direction = %config.direction,
            variant = %config.variant,
            instructions = program.len(),
            "generated 1x1 convolution kernel"
        );
        Self { config, program }
    }

    /// The configuration this kernel was generated from
    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The generated instructions
    #[inline]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Number of instructions
    #[inline]
    pub fn len(&self) -> usize {
        self.program.len()
    }

    /// Returns true if no instruction was generated
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Assembly-like listing of the kernel
    pub fn listing(&self) -> String {
        self.program.listing()
    }

    /// Run the kernel for one call descriptor
    ///
    /// # Safety
    ///
    /// The descriptor must describe buffers laid out as the configuration expects:
    /// - `bcast_data` and `load_data` readable over the work the call covers
    /// - `output_data` writable (and readable unless the first-pass flag is set) over
    ///   every output tile of the call
    /// - `bias_data` readable for `load_dim` elements when the configuration has a bias
    ///
    /// Concurrent calls must write disjoint output regions.
    pub unsafe fn execute(&self, desc: &CallDescriptor) {
        // SAFETY: forwarded to the caller
        unsafe { exec::run(&self.program, desc) }
    }
}

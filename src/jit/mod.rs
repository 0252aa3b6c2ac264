//! Kernel generation
//!
//! Code is generated for a register-level vector instruction set ([`inst`]) through an
//! [`Assembler`]. Emission is layered the way the loops nest:
//!
//! - [`MacroLoopEmitter`]: prologue, the width-dispatched load loop ([`DispatchTree`])
//!   and the broadcast loop
//! - [`MicroKernelEmitter`]: one reduce loop over a `load_loop_blk × ur` accumulator
//!   tile, with its prefetches ([`PrefetchSchedule`]) and epilogue
//!
//! All operand addresses come from the pure functions in [`addr`]. The resulting
//! [`EmittedKernel`] runs on a portable executor.

pub mod addr;
mod asm;
pub mod dispatch;
mod exec;
pub mod inst;
mod kernel;
mod macro_loop;
mod micro;
mod prefetch;

pub use asm::{Assembler, Program};
pub use dispatch::DispatchTree;
pub use kernel::{
    CallDescriptor, EmittedKernel, FLAG_REDUCE_FIRST, FLAG_REDUCE_LAST, FLAG_SP_LAST,
};
pub use macro_loop::MacroLoopEmitter;
pub use micro::MicroKernelEmitter;
pub use prefetch::PrefetchSchedule;

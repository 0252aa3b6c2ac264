//! # conv1x1-jit
//!
//! **Just-in-time generation of blocked pointwise (1×1) convolution kernels.**
//!
//! A 1×1 convolution is a batched matrix multiply over channel-blocked activations.
//! This crate plans the register and cache blocking of such a convolution for a given
//! shape, layout, precision and thread count, then generates a specialised instruction
//! stream for it.
//!
//! ## Directions and variants
//!
//! | Direction        | `fma` (f32) | `4fma` (f32) | `4vnni` (s16 → s32) |
//! |------------------|-------------|--------------|---------------------|
//! | Forward          | yes         | yes          | yes                 |
//! | Backward data    | yes         | yes          | yes                 |
//! | Backward weights | yes         | yes (transposed source) | no       |
//!
//! ## Quick Start
//!
//! ```rust
//! use conv1x1_jit::prelude::*;
//!
//! let problem = ConvProblem::new(
//!     Direction::ForwardInference,
//!     TensorDesc::new(&[1, 64, 7, 7], DataType::F32, MemoryFormat::NChw16c),
//!     TensorDesc::new(&[64, 64, 1, 1], DataType::F32, MemoryFormat::OIhw16i16o),
//!     TensorDesc::new(&[1, 64, 7, 7], DataType::F32, MemoryFormat::NChw16c),
//! );
//! let request = PlanRequest::new(problem).with_threads(1);
//! let kernel = conv1x1_jit::generate(SyntheticCpu::avx512(1), &request)?;
//! assert_eq!(kernel.config().ur, 24);
//! # Ok::<(), conv1x1_jit::error::Error>(())
//! ```
//!
//! The caller drives the kernel: it walks the loop order in
//! [`KernelConfig::loop_order`](plan::KernelConfig::loop_order), fills one
//! [`CallDescriptor`](jit::CallDescriptor) per block and calls
//! [`EmittedKernel::execute`](jit::EmittedKernel::execute), from as many threads as
//! the plan was made for.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conv;
pub mod dtype;
pub mod error;
pub mod isa;
pub mod jit;
pub mod plan;

use isa::CpuCapabilities;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conv::{ConvProblem, Direction, LeakyRelu, MemoryFormat, TensorDesc};
    pub use crate::dtype::DataType;
    pub use crate::error::{Error, Result, UnsupportedReason};
    pub use crate::isa::{CpuCapabilities, HostCpu, IsaExtension, SyntheticCpu};
    pub use crate::jit::{
        CallDescriptor, EmittedKernel, FLAG_REDUCE_FIRST, FLAG_REDUCE_LAST, FLAG_SP_LAST,
    };
    pub use crate::plan::{ConfigPlanner, KernelConfig, LoopOrder, PlanRequest, Variant};
}

/// Plan `request` for `caps` and generate its kernel
pub fn generate<C: CpuCapabilities>(
    caps: C,
    request: &plan::PlanRequest,
) -> error::Result<jit::EmittedKernel> {
    let config = plan::ConfigPlanner::new(caps).plan(request)?;
    Ok(jit::EmittedKernel::new(config))
}

//! Kernel planning
//!
//! The planner maps a [`crate::conv::ConvProblem`] onto the three logical loop axes of
//! the kernel and picks block sizes for each:
//!
//! ```text
//! for load blocks      (output channels, or input channels for backward data)
//!   for bcast blocks   (spatial positions, or input channels for backward weights)
//!     for reduce steps (the summed-over axis)
//!       acc[load_loop_blk x ur] += load[..] * broadcast(bcast[..])
//! ```
//!
//! | Level    | Constraint                          | Chosen by          |
//! |----------|-------------------------------------|--------------------|
//! | register | `ur * load_loop_blk` accumulators   | [`blocking::select_ur`] |
//! | L1/L2    | reduce, load and bcast tiles resident | [`blocking::best_divider`] |
//! | threads  | weight-gradient 4-way split         | [`balance::balance`] |

pub mod balance;
pub mod blocking;
mod config;
mod planner;
pub mod tuning;
pub mod variant;

pub use balance::{BalanceInput, ThreadPartition};
pub use config::{KernelConfig, LoopOrder, SIMD_W};
pub use planner::{ConfigPlanner, PlanRequest};
pub use tuning::TuningConstants;
pub use variant::{Variant, VariantTraits};

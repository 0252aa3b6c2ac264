//! The immutable kernel configuration

use super::balance::ThreadPartition;
use super::variant::{Variant, VariantTraits};
use crate::conv::{Direction, LeakyRelu};
use std::fmt;

/// SIMD width in 32-bit lanes; every channel block has this size
pub const SIMD_W: usize = 16;

/// Nesting of the reduce (`R`), load (`L`) and broadcast (`B`) loops, outermost first
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoopOrder {
    /// reduce, load, broadcast
    Rlb,
    /// reduce, broadcast, load
    Rbl,
    /// load, reduce, broadcast
    Lrb,
    /// load, broadcast, reduce
    Lbr,
    /// broadcast, reduce, load
    Brl,
    /// broadcast, load, reduce
    Blr,
}

impl LoopOrder {
    /// Returns true if the reduction loop is outermost
    #[inline]
    pub const fn reduce_outer(self) -> bool {
        matches!(self, Self::Rlb | Self::Rbl)
    }

    /// Returns the conventional name of this order
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rlb => "rlb",
            Self::Rbl => "rbl",
            Self::Lrb => "lrb",
            Self::Lbr => "lbr",
            Self::Brl => "brl",
            Self::Blr => "blr",
        }
    }
}

impl fmt::Display for LoopOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete description of one generated kernel and of how to drive it
///
/// Extents are in elements, steps in bytes. The `nb_*_blocking` factors count blocks
/// of the respective axis handled by one kernel call (the `_max` forms bound the last,
/// possibly merged, chunk). Built by [`super::ConfigPlanner`] and never modified.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelConfig {
    /// Derivative computed
    pub direction: Direction,
    /// Numeric variant
    pub variant: Variant,
    /// Facts for the (direction, variant) pair
    pub traits: VariantTraits,

    /// Minibatch
    pub mb: usize,
    /// Number of groups
    pub ngroups: usize,
    /// Input channels per group
    pub ic: usize,
    /// Output channels per group
    pub oc: usize,
    /// Input height
    pub ih: usize,
    /// Input width
    pub iw: usize,
    /// Output height
    pub oh: usize,
    /// Output width
    pub ow: usize,
    /// Input spatial size
    pub is: usize,
    /// Output spatial size
    pub os: usize,
    /// Input spatial size rounded up to a multiple of 4 (transposed source)
    pub tr_is: usize,
    /// Input channel block
    pub ic_block: usize,
    /// Output channel block
    pub oc_block: usize,

    /// Reduction extent
    pub reduce_dim: usize,
    /// Reduction block
    pub reduce_block: usize,
    /// Load extent
    pub load_dim: usize,
    /// Load block
    pub load_block: usize,
    /// Broadcast extent
    pub bcast_dim: usize,
    /// Broadcast block
    pub bcast_block: usize,
    /// Broadcast positions per micro-kernel
    pub ur: usize,
    /// `bcast_dim % ur`
    pub ur_tail: usize,

    /// Reduction elements per reduce-loop iteration
    pub reduce_loop_unroll: usize,
    /// Broadcast pointer advance per reduce-loop iteration
    pub reduce_loop_bcast_step: usize,
    /// Load pointer advance per reduce-loop iteration
    pub reduce_loop_load_step: usize,
    /// Output pointer advance per broadcast-loop iteration
    pub bcast_loop_output_step: usize,
    /// Output pointer advance between sub-steps of one broadcast block
    pub bcast_loop_output_substep: usize,
    /// Broadcast pointer advance per broadcast-loop iteration
    pub bcast_loop_bcast_step: usize,
    /// Broadcast pointer advance between sub-steps of one broadcast block
    pub bcast_loop_bcast_substep: usize,
    /// Load pointer advance per load tile
    pub load_loop_load_step: usize,
    /// Load work consumed per load tile
    pub load_loop_iter_step: usize,

    /// Reduction blocks
    pub nb_reduce: usize,
    /// Load blocks
    pub nb_load: usize,
    /// Broadcast blocks
    pub nb_bcast: usize,
    /// Reduction blocks per call
    pub nb_reduce_blocking: usize,
    /// Upper bound of reduction blocks per call
    pub nb_reduce_blocking_max: usize,
    /// Load blocks per call
    pub nb_load_blocking: usize,
    /// Upper bound of load blocks per call
    pub nb_load_blocking_max: usize,
    /// Broadcast blocks per call
    pub nb_bcast_blocking: usize,
    /// Upper bound of broadcast blocks per call
    pub nb_bcast_blocking_max: usize,
    /// Thread groups sharing the load axis
    pub load_grp_count: usize,
    /// Loop nesting for the parallel driver
    pub loop_order: LoopOrder,

    /// Bias is added on the first reduction pass
    pub with_bias: bool,
    /// Leaky rectifier applied on the last reduction pass
    pub activation: Option<LeakyRelu>,
    /// Outputs are written with cache-bypassing stores
    pub use_streaming_stores: bool,
    /// The broadcast operand is transposed in quads of spatial positions
    pub transpose_src: bool,

    /// Threads the plan was built for
    pub nthreads: usize,
    /// Weight-gradient thread split ([`ThreadPartition::TRIVIAL`] otherwise)
    pub partition: ThreadPartition,
}

impl KernelConfig {
    /// Bytes per input element
    #[inline]
    pub fn typesize_in(&self) -> usize {
        self.traits.typesize_in
    }

    /// Bytes per output element
    #[inline]
    pub fn typesize_out(&self) -> usize {
        self.traits.typesize_out
    }

    /// Load registers consumed per multiply-accumulate
    #[inline]
    pub fn fma_step(&self) -> usize {
        self.traits.fma_step
    }

    /// Widest load-tile count whose width candidate still holds `ur` positions
    pub fn max_load_loop_blk(&self) -> usize {
        let cases = self.traits.width_cases;
        cases
            .iter()
            .position(|&case| self.ur <= case)
            .map_or(0, |idx| cases.len() - idx)
    }

    /// Load-tile counts the load loop is specialised for, widest first
    pub fn load_loop_widths(&self) -> impl Iterator<Item = usize> + '_ {
        (1..=self.max_load_loop_blk()).rev()
    }

    /// Whether the reduction completes in a single call
    #[inline]
    pub fn single_reduce_pass(&self) -> bool {
        self.nb_reduce_blocking * self.reduce_block >= self.reduce_dim
    }
}

impl fmt::Display for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ur={}+{} reduce={}/{}x{} load={}/{}x{} bcast={}/{}x{} order={}",
            self.direction,
            self.variant,
            self.ur,
            self.ur_tail,
            self.reduce_dim,
            self.reduce_block,
            self.nb_reduce_blocking,
            self.load_dim,
            self.load_block,
            self.nb_load_blocking,
            self.bcast_dim,
            self.bcast_block,
            self.nb_bcast_blocking,
            self.loop_order,
        )
    }
}

//! Register assignment and operand addressing
//!
//! Pure functions of the configuration and loop indices. The micro-kernel emitter
//! turns their results into memory operands; tests check them directly against the
//! blocked layouts.

use super::inst::{GReg, Mem, NUM_VREGS, VReg};
use crate::plan::blocking::rnd_up;
use crate::plan::variant::{BcastAddressing, LoadRowExtent, OutputAddressing};
use crate::plan::KernelConfig;

/// Register holding zero in the activation epilogue
pub const ZERO_REG: VReg = VReg::new(NUM_VREGS - 1);

/// Register holding the broadcast negative slope
pub const SLOPE_REG: VReg = VReg::new(NUM_VREGS - 2);

/// Fixed arena of accumulator and load registers for one micro-kernel shape
///
/// Accumulators occupy `zmm0 .. ur * load_loop_blk`, position-major. Load registers
/// follow, aligned to the variant's `fma_step` so four-way instructions see four
/// consecutive registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterGrid {
    ur: usize,
    load_loop_blk: usize,
    fma_step: usize,
}

impl RegisterGrid {
    /// Lay out `load_loop_blk × ur` accumulators
    ///
    /// # Panics
    ///
    /// Panics if the grid and its load registers do not fit the register file, or if
    /// the accumulators would overlap the epilogue registers.
    pub fn new(ur: usize, load_loop_blk: usize, fma_step: usize, with_activation: bool) -> Self {
        let grid = Self {
            ur,
            load_loop_blk,
            fma_step,
        };
        assert!(
            grid.load_base() + fma_step * load_loop_blk <= NUM_VREGS,
            "{load_loop_blk}x{ur} tile with fma_step {fma_step} exceeds the register file"
        );
        if with_activation {
            assert!(
                ur * load_loop_blk < SLOPE_REG.index(),
                "{load_loop_blk}x{ur} accumulators overlap the epilogue registers"
            );
        }
        grid
    }

    #[inline]
    fn load_base(&self) -> usize {
        rnd_up(self.ur * self.load_loop_blk, self.fma_step)
    }

    /// Accumulator of output tile `(i_load, i_ur)`
    #[inline]
    pub fn accumulator(&self, i_load: usize, i_ur: usize) -> VReg {
        debug_assert!(i_load < self.load_loop_blk && i_ur < self.ur);
        VReg::new(i_ur * self.load_loop_blk + i_load)
    }

    /// `i_fma`-th load register of tile `i_load`
    #[inline]
    pub fn load(&self, i_load: usize, i_fma: usize) -> VReg {
        debug_assert!(i_load < self.load_loop_blk && i_fma < self.fma_step);
        VReg::new(self.load_base() + self.fma_step * i_load + i_fma)
    }

    /// Number of accumulators
    #[inline]
    pub fn accumulators(&self) -> usize {
        self.ur * self.load_loop_blk
    }
}

/// Byte offset of broadcast element `(i_reduce, i_ur)` from the reduce-loop pointer
pub fn bcast_offset(c: &KernelConfig, i_reduce: usize, i_ur: usize) -> usize {
    debug_assert!(i_reduce < c.reduce_loop_unroll);
    let elems = match c.traits.bcast {
        BcastAddressing::ReduceInner => i_ur * c.reduce_loop_unroll + i_reduce,
        BcastAddressing::SpatialMajor => i_reduce * c.ic_block + i_ur,
        BcastAddressing::Transposed4 => {
            4 * ((i_reduce / 4) * c.ic_block + i_ur) + i_reduce % 4
        }
    };
    c.typesize_in() * elems
}

/// Byte offset of the load vector for reduction element `i_reduce` of tile `i_load`
pub fn load_offset(c: &KernelConfig, i_reduce: usize, i_load: usize) -> usize {
    let u0 = i_reduce % c.reduce_loop_unroll;
    let u1 = i_reduce / c.reduce_loop_unroll;
    let row = match c.traits.load_row {
        LoadRowExtent::ReduceDim => c.reduce_dim,
        LoadRowExtent::ReduceBlock => c.reduce_block,
    };
    u1 * c.reduce_loop_load_step + c.typesize_in() * (i_load * row + u0) * c.load_block
}

/// Output tile address relative to the broadcast-step output pointer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputOffset {
    /// Multiples of the runtime output stride
    pub stride_scale: usize,
    /// Constant byte offset
    pub disp: usize,
}

/// Address of output tile `(i_load, i_ur)`
pub fn output_offset(c: &KernelConfig, i_load: usize, i_ur: usize) -> OutputOffset {
    match c.traits.output {
        OutputAddressing::Contiguous => OutputOffset {
            stride_scale: 0,
            disp: (i_load * c.bcast_dim + i_ur) * c.load_block * c.typesize_out(),
        },
        OutputAddressing::Strided => OutputOffset {
            stride_scale: i_load,
            disp: c.typesize_out() * c.load_block * i_ur,
        },
    }
}

/// Byte offset of the bias vector of tile `i_load`
#[inline]
pub fn bias_offset(c: &KernelConfig, i_load: usize) -> usize {
    c.typesize_out() * c.oc_block * i_load
}

// ============================================================================
// Memory operands
// ============================================================================

#[inline]
fn disp(bytes: usize) -> isize {
    bytes as isize
}

/// Broadcast operand of `(i_reduce, i_ur)`
pub fn bcast_mem(c: &KernelConfig, i_reduce: usize, i_ur: usize) -> Mem {
    Mem::new(GReg::AuxBcastData, disp(bcast_offset(c, i_reduce, i_ur)))
}

/// Load operand of `(i_reduce, i_load)`
pub fn load_mem(c: &KernelConfig, i_reduce: usize, i_load: usize) -> Mem {
    Mem::new(GReg::AuxLoadData, disp(load_offset(c, i_reduce, i_load)))
}

/// Output operand of `(i_load, i_ur)`
pub fn output_mem(c: &KernelConfig, i_load: usize, i_ur: usize) -> Mem {
    let off = output_offset(c, i_load, i_ur);
    Mem::indexed(
        GReg::AuxOutputData,
        GReg::OutputStride,
        off.stride_scale,
        disp(off.disp),
    )
}

/// Bias operand of tile `i_load`
pub fn bias_mem(c: &KernelConfig, i_load: usize) -> Mem {
    Mem::new(GReg::BiasData, disp(bias_offset(c, i_load)))
}

//! Micro-kernel: the reduce loop around one register-resident accumulator tile

use super::addr::{
    RegisterGrid, SLOPE_REG, ZERO_REG, bcast_mem, bias_mem, load_mem, output_mem,
};
use super::asm::Assembler;
use super::inst::{Cond, GReg, Inst, KReg, Lane, Mem, VReg};
use super::kernel::{FLAG_REDUCE_FIRST, FLAG_REDUCE_LAST, FLAG_SP_LAST};
use super::prefetch::PrefetchSchedule;
use crate::plan::KernelConfig;
use crate::plan::variant::{LaneKind, MacKind};

const NEGATIVE_MASK: KReg = KReg(1);

/// Emits reduce loops for one configuration
#[derive(Copy, Clone, Debug)]
pub struct MicroKernelEmitter<'a> {
    c: &'a KernelConfig,
}

impl<'a> MicroKernelEmitter<'a> {
    /// Bind the emitter to a configuration
    pub fn new(c: &'a KernelConfig) -> Self {
        Self { c }
    }

    /// Accumulator lane type
    fn lane(&self) -> Lane {
        match self.c.traits.lane {
            LaneKind::F32 => Lane::F32,
            LaneKind::I32 => Lane::I32,
        }
    }

    /// Emit the full reduce loop for a `load_loop_blk × ur` tile
    ///
    /// Expects `LoadData`, `Aux1BcastData` and `AuxOutputData` to address the tile,
    /// and `ReduceLoopWork` to hold a positive multiple of the unroll. `wraparound`
    /// marks the broadcast tail, which prefetches for the next load tile.
    pub fn emit_reduce_loop(
        &self,
        asm: &mut Assembler,
        ur: usize,
        load_loop_blk: usize,
        wraparound: bool,
    ) {
        let c = self.c;
        let grid = RegisterGrid::new(ur, load_loop_blk, c.fma_step(), c.activation.is_some());

        let reduce_loop = asm.new_label();
        let reduce_loop_tail = asm.new_label();

        asm.mov(GReg::AuxLoadData, GReg::LoadData);
        asm.mov(GReg::AuxBcastData, GReg::Aux1BcastData);

        self.init(asm, &grid, ur, load_loop_blk);

        asm.mov(GReg::ReduceLoopIter, GReg::ReduceLoopWork);
        asm.sub(GReg::ReduceLoopIter, c.reduce_loop_unroll);
        asm.jump(Cond::Le, reduce_loop_tail);

        asm.bind(reduce_loop);
        self.fma_block(asm, &grid, ur, load_loop_blk, false, wraparound);
        asm.add(GReg::AuxBcastData, c.reduce_loop_bcast_step);
        asm.add(GReg::AuxLoadData, c.reduce_loop_load_step);
        asm.sub(GReg::ReduceLoopIter, c.reduce_loop_unroll);
        asm.jump(Cond::Gt, reduce_loop);

        asm.bind(reduce_loop_tail);
        self.fma_block(asm, &grid, ur, load_loop_blk, true, wraparound);

        self.store(asm, &grid, ur, load_loop_blk);
    }

    /// Zero the accumulators, or load the bias on the first reduction pass
    fn init(&self, asm: &mut Assembler, grid: &RegisterGrid, ur: usize, blk: usize) {
        let c = self.c;
        if !c.with_bias {
            for i_ur in 0..ur {
                for i_load in 0..blk {
                    asm.vzero(grid.accumulator(i_load, i_ur));
                }
            }
            return;
        }

        let zero = asm.new_label();
        let done = asm.new_label();
        asm.test(GReg::ReducePosFlag, FLAG_REDUCE_FIRST);
        asm.jump(Cond::Zero, zero);
        for i_load in 0..blk {
            let mem = bias_mem(c, i_load);
            for i_ur in 0..ur {
                asm.vload(grid.accumulator(i_load, i_ur), mem);
            }
        }
        asm.jmp(done);
        asm.bind(zero);
        for i_ur in 0..ur {
            for i_load in 0..blk {
                asm.vzero(grid.accumulator(i_load, i_ur));
            }
        }
        asm.bind(done);
    }

    fn mac(&self, acc: VReg, src: VReg, mem: Mem) -> Inst {
        match self.c.traits.mac {
            MacKind::BroadcastFma => Inst::VFmaBcast { acc, src, mem },
            MacKind::QuadFma => Inst::V4Fma { acc, src, mem },
            MacKind::QuadDotWords => Inst::V4DpWssd { acc, src, mem },
        }
    }

    /// Load `fma_step` registers per tile for reduction element `i_reduce`
    fn load_block(
        &self,
        asm: &mut Assembler,
        grid: &RegisterGrid,
        blk: usize,
        i_reduce: usize,
        n_loads: usize,
    ) {
        let c = self.c;
        let fma_step = c.fma_step();
        for i_load in 0..blk {
            for i_fma in 0..fma_step {
                let dst = grid.load(i_load, i_fma);
                if i_fma < n_loads {
                    let row = i_reduce + c.traits.load_scale * i_fma;
                    asm.vload(dst, load_mem(c, row, i_load));
                } else {
                    asm.vzero(dst);
                }
            }
        }
    }

    /// One unrolled reduce-loop body
    fn fma_block(
        &self,
        asm: &mut Assembler,
        grid: &RegisterGrid,
        ur: usize,
        blk: usize,
        last_block: bool,
        wraparound: bool,
    ) {
        let c = self.c;
        let fma_step = c.fma_step();
        let reduce_step = c.traits.reduce_step;
        let schedule = PrefetchSchedule::new(c, ur, blk, last_block, wraparound);

        for i_reduce in (0..c.reduce_loop_unroll).step_by(reduce_step) {
            let spatial_tail = c.is % fma_step;
            if c.transpose_src
                && spatial_tail != 0
                && last_block
                && i_reduce == c.reduce_loop_unroll - reduce_step
            {
                // rows past the spatial extent are zero on the final tail
                let load_all = asm.new_label();
                let loaded = asm.new_label();
                asm.test(GReg::ReducePosFlag, FLAG_SP_LAST);
                asm.jump(Cond::Zero, load_all);
                self.load_block(asm, grid, blk, i_reduce, spatial_tail);
                asm.jmp(loaded);
                asm.bind(load_all);
                self.load_block(asm, grid, blk, i_reduce, fma_step);
                asm.bind(loaded);
            } else {
                self.load_block(asm, grid, blk, i_reduce, fma_step);
            }

            for i_ur in 0..ur {
                let mem = bcast_mem(c, i_reduce, i_ur);
                for i_load in 0..blk {
                    asm.emit(self.mac(grid.accumulator(i_load, i_ur), grid.load(i_load, 0), mem));
                    if let Some(pf) = schedule.at(c, i_reduce, i_ur, i_load) {
                        asm.emit(pf);
                    }
                }
            }
        }
    }

    /// Accumulate into partial output, apply the activation, write back
    fn store(&self, asm: &mut Assembler, grid: &RegisterGrid, ur: usize, blk: usize) {
        let c = self.c;
        let lane = self.lane();

        let store_no_add = asm.new_label();
        asm.test(GReg::ReducePosFlag, FLAG_REDUCE_FIRST);
        asm.jump(Cond::NotZero, store_no_add);
        for i_ur in 0..ur {
            for i_load in 0..blk {
                asm.emit(Inst::VAddMem {
                    dst: grid.accumulator(i_load, i_ur),
                    mem: output_mem(c, i_load, i_ur),
                    lane,
                });
            }
        }
        asm.bind(store_no_add);

        if let Some(activation) = c.activation {
            let skip = asm.new_label();
            asm.test(GReg::ReducePosFlag, FLAG_REDUCE_LAST);
            asm.jump(Cond::Zero, skip);

            asm.vzero(ZERO_REG);
            let slope = if activation.negative_slope == 0.0 {
                ZERO_REG
            } else {
                let bits = match c.traits.lane {
                    LaneKind::F32 => activation.negative_slope.to_bits(),
                    // integer accumulators take the slope truncated toward zero
                    LaneKind::I32 => (activation.negative_slope as i32) as u32,
                };
                asm.emit(Inst::VBroadcastImm {
                    dst: SLOPE_REG,
                    bits,
                });
                SLOPE_REG
            };
            for i_ur in 0..ur {
                for i_load in 0..blk {
                    let acc = grid.accumulator(i_load, i_ur);
                    asm.emit(Inst::VCmpLt {
                        mask: NEGATIVE_MASK,
                        a: acc,
                        b: ZERO_REG,
                        lane,
                    });
                    asm.emit(Inst::VMulMasked {
                        dst: acc,
                        mask: NEGATIVE_MASK,
                        a: acc,
                        b: slope,
                        lane,
                    });
                }
            }
            asm.bind(skip);
        }

        for i_ur in 0..ur {
            for i_load in 0..blk {
                let mem = output_mem(c, i_load, i_ur);
                let src = grid.accumulator(i_load, i_ur);
                asm.emit(if c.use_streaming_stores {
                    Inst::VStoreNt { mem, src }
                } else {
                    Inst::VStore { mem, src }
                });
            }
        }
    }
}

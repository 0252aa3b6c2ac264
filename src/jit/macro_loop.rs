//! Broadcast and load loops around the micro-kernel, and the kernel entry

use super::asm::{Assembler, Program};
use super::dispatch::DispatchTree;
use super::inst::{ArgField, Cond, GReg, Inst};
use super::micro::MicroKernelEmitter;
use crate::plan::variant::OutputAddressing;
use crate::plan::{KernelConfig, SIMD_W};

/// Emits the complete kernel for one configuration
#[derive(Copy, Clone, Debug)]
pub struct MacroLoopEmitter<'a> {
    c: &'a KernelConfig,
    micro: MicroKernelEmitter<'a>,
}

impl<'a> MacroLoopEmitter<'a> {
    /// Bind the emitter to a configuration
    pub fn new(c: &'a KernelConfig) -> Self {
        Self {
            c,
            micro: MicroKernelEmitter::new(c),
        }
    }

    /// Generate the instruction stream
    pub fn emit(&self) -> Program {
        let mut asm = Assembler::new();
        self.prologue(&mut asm);
        self.load_loop(&mut asm);
        asm.emit(Inst::Ret);
        asm.finish()
    }

    /// Copy the call descriptor into registers
    fn prologue(&self, asm: &mut Assembler) {
        let c = self.c;
        asm.load_arg(GReg::BcastData, ArgField::BcastData);
        asm.load_arg(GReg::LoadData, ArgField::LoadData);
        asm.load_arg(GReg::OutputData, ArgField::OutputData);
        if c.with_bias {
            asm.load_arg(GReg::BiasData, ArgField::BiasData);
        }
        asm.load_arg(GReg::LoadLoopWork, ArgField::LoadDim);
        asm.load_arg(GReg::BcastLoopWork, ArgField::BcastDim);
        asm.load_arg(GReg::ReduceLoopWork, ArgField::ReduceDim);
        asm.load_arg(GReg::ReducePosFlag, ArgField::Flags);
        if c.traits.output == OutputAddressing::Strided {
            asm.load_arg(GReg::OutputStride, ArgField::OutputStride);
        }
    }

    /// Lower the width dispatch tree
    fn load_loop(&self, asm: &mut Assembler) {
        let tree = DispatchTree::new(self.c.ur, self.c.traits.width_cases, SIMD_W);
        debug_assert_eq!(tree.max_width(), self.c.max_load_loop_blk());

        // labels indexed by width
        let labels: Vec<_> = (0..=tree.max_width()).map(|_| asm.new_label()).collect();
        let exit = asm.new_label();

        for edge in tree.entry() {
            asm.cmp(GReg::LoadLoopWork, edge.imm);
            asm.jump(edge.cond, labels[edge.width]);
        }

        for state in tree.states() {
            asm.bind(labels[state.width]);
            if state.exit_on_empty {
                asm.cmp(GReg::LoadLoopWork, 0);
                asm.jump(Cond::Eq, exit);
            }
            self.load_loop_body(asm, state.width);
            for edge in &state.after {
                asm.cmp(GReg::LoadLoopWork, edge.imm);
                asm.jump(edge.cond, labels[edge.width]);
            }
        }
        asm.bind(exit);
    }

    /// One load-loop iteration over `load_loop_blk` tiles
    fn load_loop_body(&self, asm: &mut Assembler, load_loop_blk: usize) {
        let c = self.c;
        self.bcast_loop(asm, load_loop_blk);

        asm.add(GReg::LoadData, load_loop_blk * c.load_loop_load_step);
        match c.traits.output {
            OutputAddressing::Contiguous => {
                if c.with_bias {
                    asm.add(
                        GReg::BiasData,
                        load_loop_blk * c.load_block * c.typesize_out(),
                    );
                }
                asm.add(
                    GReg::OutputData,
                    load_loop_blk * c.bcast_dim * c.load_block * c.typesize_out(),
                );
            }
            OutputAddressing::Strided => {
                for _ in 0..load_loop_blk {
                    asm.add_reg(GReg::OutputData, GReg::OutputStride);
                }
            }
        }
        asm.sub(GReg::LoadLoopWork, load_loop_blk * c.load_loop_iter_step);
    }

    /// Broadcast loop in steps of `bcast_block`, then the `ur_tail` remainder
    fn bcast_loop(&self, asm: &mut Assembler, load_loop_blk: usize) {
        let c = self.c;
        let bcast_loop = asm.new_label();
        let bcast_loop_tail = asm.new_label();

        asm.mov(GReg::Aux1BcastData, GReg::BcastData);
        asm.mov(GReg::AuxOutputData, GReg::OutputData);
        asm.mov(GReg::BcastLoopIter, GReg::BcastLoopWork);

        asm.cmp(GReg::BcastLoopIter, c.bcast_block);
        asm.jump(Cond::Lt, bcast_loop_tail);

        asm.bind(bcast_loop);
        let num_substeps = c.bcast_block / c.ur;
        assert!(
            num_substeps > 0 && num_substeps < 10,
            "bcast_block {} holds {num_substeps} steps of ur {}",
            c.bcast_block,
            c.ur
        );
        for i in 0..num_substeps {
            self.micro.emit_reduce_loop(asm, c.ur, load_loop_blk, false);
            if i < num_substeps - 1 {
                asm.add(GReg::Aux1BcastData, c.bcast_loop_bcast_substep);
                asm.add(GReg::AuxOutputData, c.bcast_loop_output_substep);
            } else {
                let done = num_substeps - 1;
                asm.add(
                    GReg::Aux1BcastData,
                    c.bcast_loop_bcast_step - done * c.bcast_loop_bcast_substep,
                );
                asm.add(
                    GReg::AuxOutputData,
                    c.bcast_loop_output_step - done * c.bcast_loop_output_substep,
                );
            }
        }
        asm.sub(GReg::BcastLoopIter, c.bcast_block);
        asm.cmp(GReg::BcastLoopIter, c.bcast_block);
        asm.jump(Cond::Ge, bcast_loop);

        asm.bind(bcast_loop_tail);
        if c.ur_tail != 0 {
            let bcast_loop_out = asm.new_label();
            asm.cmp(GReg::BcastLoopIter, 0);
            asm.jump(Cond::Eq, bcast_loop_out);
            self.micro.emit_reduce_loop(asm, c.ur_tail, load_loop_blk, true);
            asm.bind(bcast_loop_out);
        }
    }
}

//! Software prefetch placement inside one reduce-loop iteration
//!
//! Every multiply-accumulate is an opportunity to issue one prefetch. The first half
//! of the operations prefetch the next broadcast rows (every line is touched by the
//! first pass, so these matter most); the rest are shared between L2 and L1 weight
//! prefetches and output lines. Placement only affects speed.

use super::inst::{GReg, Inst, Mem, PrefetchHint};
use crate::plan::KernelConfig;
use crate::plan::variant::{LoadRowExtent, PrefetchBasis};

/// Prefetch plan for one `(ur, load_loop_blk, last_block, wraparound)` body
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrefetchSchedule {
    ur: usize,
    load_loop_blk: usize,
    reduce_step: usize,
    last_block: bool,
    wraparound: bool,
    pf_inp_ops: usize,
    pf_inp_trigger: usize,
    n_pf_ker_l1: usize,
    n_pf_ker_l2: usize,
    n_pf_out_l1: usize,
    other_pf_trigger: usize,
}

impl PrefetchSchedule {
    /// Plan prefetches for one reduce-loop body
    pub fn new(
        c: &KernelConfig,
        ur: usize,
        load_loop_blk: usize,
        last_block: bool,
        wraparound: bool,
    ) -> Self {
        let reduce_step = c.traits.reduce_step;
        let n_ops = (c.reduce_loop_unroll / reduce_step) * ur * load_loop_blk;

        let n_pf_ker_l1 = c.reduce_block;
        let n_pf_ker_l2 = if wraparound { c.reduce_block } else { 0 };
        let n_pf_out_l1 = if c.use_streaming_stores { 0 } else { ur };

        let pf_inp_ops = n_ops / 2;
        let pf_inp_trigger = match c.traits.prefetch {
            PrefetchBasis::Reduction => (pf_inp_ops / c.reduce_block).max(1),
            PrefetchBasis::Broadcast => (pf_inp_ops / ur).max(1),
        };

        let n_other_pf = load_loop_blk * (n_pf_ker_l1 + n_pf_ker_l2 + n_pf_out_l1);
        let n_other_pf_ops = n_ops - pf_inp_ops;
        let other_pf_trigger = if n_other_pf > 0 {
            (n_other_pf_ops / n_other_pf).max(1)
        } else {
            0
        };

        Self {
            ur,
            load_loop_blk,
            reduce_step,
            last_block,
            wraparound,
            pf_inp_ops,
            pf_inp_trigger,
            n_pf_ker_l1,
            n_pf_ker_l2,
            n_pf_out_l1,
            other_pf_trigger,
        }
    }

    /// Prefetch to issue after the multiply-accumulate of `(i_reduce, i_ur, i_load)`
    pub fn at(
        &self,
        c: &KernelConfig,
        i_reduce: usize,
        i_ur: usize,
        i_load: usize,
    ) -> Option<Inst> {
        let blk = self.load_loop_blk;
        let i_op = (i_reduce / self.reduce_step) * self.ur * blk + i_ur * blk + i_load;
        let ts_in = c.typesize_in();

        if i_op < self.pf_inp_ops {
            if !i_op.is_multiple_of(self.pf_inp_trigger) {
                return None;
            }
            let i_pf = i_op / self.pf_inp_trigger;
            let wrapped = self.wraparound && self.last_block;
            let base = if wrapped {
                GReg::BcastData
            } else if self.last_block {
                GReg::Aux1BcastData
            } else {
                GReg::AuxBcastData
            };
            let offt = match c.traits.prefetch {
                PrefetchBasis::Reduction => {
                    let ahead = if wrapped {
                        0
                    } else if self.last_block {
                        c.is
                    } else {
                        c.reduce_block
                    };
                    (i_pf + ahead) * c.bcast_block
                }
                PrefetchBasis::Broadcast => {
                    let ahead = if wrapped {
                        0
                    } else if self.last_block {
                        c.ur
                    } else {
                        c.bcast_dim
                    };
                    (i_pf + ahead) * c.reduce_block
                }
            };
            return Some(prefetch(base, offt * ts_in, PrefetchHint::L1));
        }

        if self.other_pf_trigger == 0 {
            return None;
        }
        let i_op = i_op - self.pf_inp_ops;
        if !i_op.is_multiple_of(self.other_pf_trigger) {
            return None;
        }

        let mut i_pf = i_op / (blk * self.other_pf_trigger);
        if i_pf < self.n_pf_ker_l2 {
            let row = match c.traits.load_row {
                LoadRowExtent::ReduceDim => c.reduce_dim,
                LoadRowExtent::ReduceBlock => c.reduce_block,
            };
            let offt = (i_pf + (i_load + 1) * row) * c.load_block;
            return Some(prefetch(GReg::AuxLoadData, offt * ts_in, PrefetchHint::L2));
        }
        i_pf -= self.n_pf_ker_l2;

        if i_pf < self.n_pf_ker_l1 {
            let base = if self.last_block {
                GReg::LoadData
            } else {
                GReg::AuxLoadData
            };
            let ahead = match (self.last_block, self.wraparound) {
                (true, true) => c.reduce_dim,
                (true, false) => 0,
                (false, _) => c.reduce_block,
            };
            let offt = (i_pf + i_load * c.reduce_dim + ahead) * c.load_block;
            return Some(prefetch(base, offt * ts_in, PrefetchHint::L1));
        }
        i_pf -= self.n_pf_ker_l1;

        if i_pf < self.n_pf_out_l1 {
            let offt = i_pf * c.load_block;
            return Some(prefetch(
                GReg::AuxOutputData,
                offt * c.typesize_out(),
                PrefetchHint::L1,
            ));
        }
        None
    }
}

#[inline]
fn prefetch(base: GReg, bytes: usize, hint: PrefetchHint) -> Inst {
    Inst::Prefetch {
        mem: Mem::new(base, bytes as isize),
        hint,
    }
}

//! Thread partitioning for the weight-gradient direction
//!
//! The weight gradient reduces over minibatch and spatial positions, so threads can
//! split four ways: minibatch×reduction blocks, groups, output-channel blocks and
//! input-channel blocks. The balancer picks the split with the smallest estimated
//! per-thread memory traffic.

use super::blocking::div_up;
use tracing::debug;

/// Four-way split of the thread budget
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadPartition {
    /// Threads across minibatch × reduction blocks
    pub mb: usize,
    /// Threads across groups
    pub groups: usize,
    /// Threads across output-channel blocks
    pub oc_blocks: usize,
    /// Threads across input-channel blocks
    pub ic_blocks: usize,
}

impl ThreadPartition {
    /// The single-thread partition
    pub const TRIVIAL: Self = Self {
        mb: 1,
        groups: 1,
        oc_blocks: 1,
        ic_blocks: 1,
    };

    /// Threads the partition keeps busy
    #[inline]
    pub fn total(&self) -> usize {
        self.mb * self.groups * self.oc_blocks * self.ic_blocks
    }
}

impl Default for ThreadPartition {
    fn default() -> Self {
        Self::TRIVIAL
    }
}

/// Problem dimensions the balancer needs
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BalanceInput {
    /// Minibatch
    pub mb: usize,
    /// Number of groups
    pub ngroups: usize,
    /// Reduction blocks per image
    pub nb_reduce: usize,
    /// Output-channel (load) blocks
    pub nb_load: usize,
    /// Input-channel (broadcast) blocks
    pub nb_bcast: usize,
    /// Reduction block size
    pub reduce_block: usize,
    /// Load block size
    pub load_block: usize,
    /// Broadcast block size
    pub bcast_block: usize,
    /// Relative traffic weights (broadcast, load, output)
    pub weights: (usize, usize, usize),
}

impl BalanceInput {
    /// Estimated per-thread traffic of a (minibatch, oc-block, ic-block) split
    pub fn cost(&self, nthr_mb: usize, nthr_oc_b: usize, nthr_ic_b: usize) -> usize {
        let (bcast_w, load_w, output_w) = self.weights;
        let mb_work = div_up(self.mb * self.nb_reduce, nthr_mb);
        let load_work = div_up(self.nb_load, nthr_oc_b);
        let bcast_work = div_up(self.nb_bcast, nthr_ic_b);
        // every group runs on its own threads
        let groups = 1;

        bcast_w * mb_work * groups * bcast_work * self.bcast_block * self.reduce_block
            + load_w * mb_work * groups * load_work * self.load_block * self.reduce_block
            + output_w * groups * load_work * bcast_work * self.bcast_block * self.load_block
    }
}

/// Choose a thread partition for `nthreads` threads
///
/// Fewer threads than groups yields [`ThreadPartition::TRIVIAL`]. Otherwise every
/// (minibatch, oc-block) pair is tried in ascending order, the ic-block factor taking
/// the rest of the budget; the last split whose cost does not exceed the best so far
/// wins. A minibatch factor above half the budget but below all of it is widened to
/// `min(mb, nthreads)`.
pub fn balance(input: &BalanceInput, nthreads: usize) -> ThreadPartition {
    if nthreads < input.ngroups {
        return ThreadPartition::TRIVIAL;
    }

    let nthr_g = input.ngroups;
    let nthr = nthreads / nthr_g;

    let mut best = ThreadPartition {
        groups: nthr_g,
        ..ThreadPartition::TRIVIAL
    };
    let mut best_cost = input.cost(1, 1, 1);

    let nthr_mb_max = nthr.min(input.mb * input.nb_reduce);
    for nthr_mb in 1..=nthr_mb_max {
        let nthr_par = nthr / nthr_mb;
        let nthr_oc_b_max = nthr_par.min(input.nb_load);
        for nthr_oc_b in 1..=nthr_oc_b_max {
            let nthr_ic_b = (nthr_par / nthr_oc_b).min(input.nb_bcast);
            let cost = input.cost(nthr_mb, nthr_oc_b, nthr_ic_b);
            if cost <= best_cost {
                best_cost = cost;
                best.mb = nthr_mb;
                best.oc_blocks = nthr_oc_b;
                best.ic_blocks = nthr_ic_b;
            }
        }
    }

    if best.mb > nthreads / 2 && best.mb < nthreads {
        best.mb = input.mb.min(nthreads);
    }

    assert!(
        best.total() <= nthreads,
        "thread partition {best:?} exceeds {nthreads} threads"
    );
    debug!(
        nthreads,
        mb = best.mb,
        groups = best.groups,
        oc_blocks = best.oc_blocks,
        ic_blocks = best.ic_blocks,
        cost = best_cost,
        "balanced weight-gradient threads"
    );
    best
}

//! Load-loop width dispatch as an explicit state machine
//!
//! The load loop is specialised for every tile width `1..=max_load_loop_blk`. Each
//! specialisation is a state; transitions compare the remaining load work against
//! multiples of the SIMD width. An entry tree picks the first state, every state loops
//! on itself while a full tile of its width remains, and the narrowest state exits
//! when no work is left.
//!
//! The same table drives code emission and [`DispatchTree::trace`],
//! which replays it on a work count.

use super::inst::Cond;
use smallvec::SmallVec;

/// `if work <cond> imm`, continue in the state of `width`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Comparison against the remaining work
    pub cond: Cond,
    /// Work threshold in elements
    pub imm: usize,
    /// Width of the destination state
    pub width: usize,
}

/// One width specialisation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchState {
    /// Tiles processed per iteration
    pub width: usize,
    /// Exit immediately when no work remains (narrowest state only)
    pub exit_on_empty: bool,
    /// Transitions checked after the body, in order; falling through moves to the
    /// next state
    pub after: SmallVec<[Edge; 8]>,
}

/// The full dispatch table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchTree {
    simd_w: usize,
    entry: SmallVec<[Edge; 8]>,
    states: SmallVec<[DispatchState; 8]>,
}

impl DispatchTree {
    /// Build the machine for accumulator width `ur` over ascending width candidates
    ///
    /// States are ordered widest first; a candidate participates when it holds `ur`.
    pub fn new(ur: usize, cases: &[usize], simd_w: usize) -> Self {
        let n = cases.len();
        let mut entry = SmallVec::new();
        for ur_idx in (1..n).rev() {
            if ur <= cases[ur_idx] {
                let label_idx = n - ur_idx - 1;
                entry.push(Edge {
                    cond: Cond::Le,
                    imm: simd_w * (label_idx + 1),
                    width: label_idx + 1,
                });
            }
        }

        let mut states = SmallVec::new();
        for (ur_idx, &case) in cases.iter().enumerate() {
            if ur > case {
                continue;
            }
            let label_idx = n - ur_idx - 1;
            let width = label_idx + 1;
            let mut after = SmallVec::new();
            if label_idx >= 2 {
                // two tiles of the next narrower width finish exactly
                after.push(Edge {
                    cond: Cond::Eq,
                    imm: 2 * label_idx * simd_w,
                    width: label_idx,
                });
            }
            after.push(Edge {
                cond: Cond::Ge,
                imm: width * simd_w,
                width,
            });
            for idx in (1..label_idx).rev() {
                after.push(Edge {
                    cond: Cond::Eq,
                    imm: simd_w * (idx + 1),
                    width: idx + 1,
                });
            }
            if ur_idx + 2 < n {
                after.push(Edge {
                    cond: Cond::Le,
                    imm: simd_w,
                    width: 1,
                });
            }
            states.push(DispatchState {
                width,
                exit_on_empty: label_idx == 0,
                after,
            });
        }

        Self {
            simd_w,
            entry,
            states,
        }
    }

    /// Transitions evaluated before any state
    #[inline]
    pub fn entry(&self) -> &[Edge] {
        &self.entry
    }

    /// States in emission order, widest first
    #[inline]
    pub fn states(&self) -> &[DispatchState] {
        &self.states
    }

    /// Widest specialisation
    #[inline]
    pub fn max_width(&self) -> usize {
        self.states.first().map_or(0, |s| s.width)
    }

    fn state_index(&self, width: usize) -> Option<usize> {
        self.states.iter().position(|s| s.width == width)
    }

    fn follow(edges: &[Edge], work: isize) -> Option<usize> {
        edges
            .iter()
            .find(|e| e.cond.holds(work, e.imm as isize))
            .map(|e| e.width)
    }

    /// Widths executed, in order, for `work` elements of load work
    ///
    /// Each body consumes `width * simd_w` elements. Returns `None` if the machine
    /// jumps to a width it does not have or fails to stop.
    pub fn trace(&self, work: usize) -> Option<Vec<usize>> {
        let mut work = work as isize;
        let mut widths = Vec::new();
        let limit = work.max(0) as usize / self.simd_w + self.states.len() + 2;

        let mut at = match Self::follow(&self.entry, work) {
            Some(w) => self.state_index(w)?,
            None => 0,
        };
        loop {
            if widths.len() > limit {
                return None;
            }
            let state = self.states.get(at)?;
            if state.exit_on_empty && work == 0 {
                return Some(widths);
            }
            widths.push(state.width);
            work -= (state.width * self.simd_w) as isize;
            match Self::follow(&state.after, work) {
                Some(w) => at = self.state_index(w)?,
                None if at + 1 < self.states.len() => at += 1,
                None => return Some(widths),
            }
        }
    }
}

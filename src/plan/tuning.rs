//! Heuristic constants used by the planner
//!
//! All of these are empirically tuned. They are grouped in one value so callers can
//! experiment with a different register or cache budget without touching the planner.

use crate::error::{Error, Result};

/// Overridable blocking heuristics
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TuningConstants {
    /// Largest register-blocking factor tried
    pub max_regs: usize,
    /// Smallest register-blocking factor tried
    pub min_regs: usize,
    /// Candidate step for the 4-way variants
    pub wide_ur_step: usize,
    /// Row height from which rows, not the flattened spatial size, drive `ur` (baseline)
    pub size_threshold: usize,
    /// Same threshold for the 4-way variants
    pub wide_size_threshold: usize,
    /// Broadcast extents up to this count as small
    pub small_spatial: usize,
    /// Reduction extents from this count as big
    pub big_reduce_dim: usize,
    /// Reduce blocks per pass for a small spatial extent and a big reduction
    pub reduce_blocking_small_spatial: usize,
    /// Reduce blocks per pass for a large spatial extent and a big reduction
    pub reduce_blocking_large_spatial: usize,
    /// L2 capacity in f32 elements
    pub l2_capacity: usize,
    /// L1 capacity in f32 elements
    pub l1_capacity: usize,
    /// L2 elements kept free for everything but the three tiles
    pub l2_reserved: usize,
    /// `nb_bcast_blocking_max = nb_bcast_blocking * num / den`
    pub bcast_blocking_max_ratio: (usize, usize),
    /// Load grouping applies to broadcast extents up to this size
    pub load_grp_spatial: usize,
    /// Load grouping applies to load extents above this size
    pub load_grp_min_load_dim: usize,
    /// Load grouping applies when `load_dim / reduce_dim` reaches this ratio
    pub load_grp_ratio: usize,
    /// Weight gradient transposes its source when `is * ic / oc` stays within this bound
    pub transpose_src_limit: usize,
    /// Balancer weights (broadcast, load, output)
    pub balance_weights: (usize, usize, usize),
    /// Balancer weights with a pre-transposed source
    pub balance_weights_transposed: (usize, usize, usize),
    /// Weight gradient: lower bound of the load blocking search, in blocks
    pub min_load_blocking: usize,
    /// Weight gradient: lower bound of the broadcast blocking search, in blocks
    pub min_bcast_blocking: usize,
    /// Weight gradient reduce block range for the baseline variant
    pub reduce_block_range: (usize, usize),
    /// Weight gradient reduce block range for the 4-way variant, searched in steps of 4
    pub wide_reduce_block_range: (usize, usize),
}

impl Default for TuningConstants {
    fn default() -> Self {
        Self {
            max_regs: 28,
            min_regs: 8,
            wide_ur_step: 4,
            size_threshold: 14,
            wide_size_threshold: 28,
            small_spatial: 7 * 7,
            big_reduce_dim: 1024,
            reduce_blocking_small_spatial: 16,
            reduce_blocking_large_spatial: 8,
            // 3/4 of a 512 KiB L2, in f32 elements
            l2_capacity: (512 * 1024 * 3) / (4 * 4),
            l1_capacity: (32 * 1024) / 4,
            l2_reserved: 3 * 1024,
            bcast_blocking_max_ratio: (3, 2),
            load_grp_spatial: 49,
            load_grp_min_load_dim: 512,
            load_grp_ratio: 4,
            transpose_src_limit: 2048,
            balance_weights: (1, 1, 12),
            balance_weights_transposed: (5, 1, 8),
            min_load_blocking: 16,
            min_bcast_blocking: 5,
            reduce_block_range: (7, 16),
            wide_reduce_block_range: (4, 16),
        }
    }
}

impl TuningConstants {
    /// Check the constants are usable by the planner
    pub fn validate(&self) -> Result<()> {
        if self.min_regs == 0 || self.min_regs > self.max_regs {
            return Err(Error::invalid_argument(
                "tuning",
                format!(
                    "register range [{}, {}] is empty",
                    self.min_regs, self.max_regs
                ),
            ));
        }
        if self.max_regs > 28 {
            return Err(Error::invalid_argument(
                "tuning",
                format!("max_regs {} exceeds the 28 accumulator registers", self.max_regs),
            ));
        }
        if self.wide_ur_step == 0 || !self.wide_ur_step.is_multiple_of(4) {
            return Err(Error::invalid_argument(
                "tuning",
                format!("wide_ur_step {} must be a positive multiple of 4", self.wide_ur_step),
            ));
        }
        let (num, den) = self.bcast_blocking_max_ratio;
        if den == 0 || num < den {
            return Err(Error::invalid_argument(
                "tuning",
                format!("bcast_blocking_max_ratio {num}/{den} must be at least 1"),
            ));
        }
        if self.l2_capacity == 0 || self.l1_capacity == 0 {
            return Err(Error::invalid_argument(
                "tuning",
                "cache capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = TuningConstants::default();
        assert_eq!(t.l2_capacity, 98304);
        assert_eq!(t.l1_capacity, 8192);
        assert_eq!(t.small_spatial, 49);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_register_range() {
        let t = TuningConstants {
            min_regs: 12,
            max_regs: 10,
            ..TuningConstants::default()
        };
        assert!(matches!(
            t.validate(),
            Err(Error::InvalidArgument { arg: "tuning", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_grid() {
        let t = TuningConstants {
            max_regs: 30,
            ..TuningConstants::default()
        };
        assert!(t.validate().is_err());
    }
}

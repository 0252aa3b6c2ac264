//! Blocking arithmetic: rounding helpers, divisor search and register-block selection

use super::tuning::TuningConstants;

/// `ceil(a / b)`
#[inline]
pub const fn div_up(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Round `a` up to a multiple of `b`
#[inline]
pub const fn rnd_up(a: usize, b: usize) -> usize {
    div_up(a, b) * b
}

/// Round `a` down to a multiple of `b`
#[inline]
pub const fn rnd_dn(a: usize, b: usize) -> usize {
    (a / b) * b
}

/// Fraction of a rounded-up extent that is padding
///
/// `loss_ratio(10, 4) == (12 - 10) / 12`
#[inline]
pub fn loss_ratio(amount: usize, divider: usize) -> f32 {
    let rounded = rnd_up(amount, divider);
    (rounded - amount) as f32 / rounded as f32
}

/// Find the block count in `[min_divider, max_divider]` that wastes least of `value`
///
/// Candidates are scanned from `max_divider` down in steps of `step`. With `find_max`
/// the best candidate is replaced only on a strictly smaller loss, so the largest of
/// equally good divisors wins; without it the replacement is non-strict and the
/// smallest wins. Bounds are clamped to `[1, value]`.
pub fn best_divider(
    value: usize,
    min_divider: usize,
    max_divider: usize,
    find_max: bool,
    step: usize,
) -> usize {
    debug_assert!(step > 0);
    let max_divider = max_divider.min(value).max(1);
    let min_divider = min_divider.min(max_divider).max(1);

    let mut min_loss = f32::MAX;
    let mut x_divider = max_divider;
    let mut divider = max_divider;
    loop {
        let loss = loss_ratio(value, divider);
        if (find_max && loss < min_loss) || (!find_max && loss <= min_loss) {
            min_loss = loss;
            x_divider = divider;
        }
        if divider < min_divider + step {
            break;
        }
        divider -= step;
    }
    x_divider
}

/// Pick the register-blocking factor `ur` and its tail
///
/// First pass: the largest candidate in `[min_regs, max_regs]` (stepping by `ur_step`)
/// dividing the row height (tall images) or the flattened spatial size. Second pass,
/// when nothing divides: the candidate leaving the smallest non-zero remainder of the
/// spatial size, ties to the larger candidate, a zero remainder ending the scan.
/// Spatial sizes below the smallest candidate are processed in one block.
pub fn select_ur(ih: usize, os: usize, wide: bool, tuning: &TuningConstants) -> (usize, usize) {
    let max_regs = tuning.max_regs;
    let min_regs = tuning.min_regs;
    let ur_step = if wide { tuning.wide_ur_step } else { 1 };
    let size_threshold = if wide {
        tuning.wide_size_threshold
    } else {
        tuning.size_threshold
    };

    if os < min_regs {
        return (os, 0);
    }

    let candidates = || (min_regs..=max_regs).rev().step_by(ur_step);

    let exact = candidates().find(|&ur_w| {
        (ih >= size_threshold && ih.is_multiple_of(ur_w))
            || (ih < size_threshold && os.is_multiple_of(ur_w))
    });
    if let Some(ur) = exact {
        return (ur, os % ur);
    }

    let mut best: Option<(usize, usize)> = None;
    for ur_w in candidates() {
        let tail = os % ur_w;
        if tail == 0 {
            best = Some((ur_w, 0));
            break;
        }
        match best {
            Some((_, best_tail)) if tail >= best_tail => {}
            _ => best = Some((ur_w, tail)),
        }
    }
    // min_regs <= max_regs is checked when the tuning constants are validated
    best.unwrap_or((max_regs.min(os), os % max_regs.min(os)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(div_up(10, 4), 3);
        assert_eq!(rnd_up(10, 4), 12);
        assert_eq!(rnd_dn(10, 4), 8);
        assert_eq!(rnd_up(16, 16), 16);
    }

    #[test]
    fn test_loss_ratio() {
        assert!((loss_ratio(10, 4) - 2.0 / 12.0).abs() < 1e-6);
        assert_eq!(loss_ratio(10, 5), 0.0);
        assert_eq!(loss_ratio(10, 1), 0.0);
    }

    #[test]
    fn test_best_divider_find_max_keeps_first_tie() {
        // losses: d=4 -> 1/6, d=3 -> 1/6, d=2 -> 0, d=1 -> 0
        assert_eq!(best_divider(10, 1, 4, true, 1), 2);
    }

    #[test]
    fn test_best_divider_find_min_keeps_last_tie() {
        assert_eq!(best_divider(10, 1, 4, false, 1), 1);
    }

    #[test]
    fn test_best_divider_clamps_bounds() {
        // max clamps to value, min clamps to max
        assert_eq!(best_divider(3, 5, 16, true, 1), 3);
        assert_eq!(best_divider(0, 1, 4, true, 1), 1);
        assert_eq!(best_divider(7, 0, 0, true, 1), 1);
    }

    #[test]
    fn test_best_divider_stepped() {
        // 52 = 4 * 13: only 4 divides among {16, 12, 8, 4}
        assert_eq!(best_divider(52, 4, 16, true, 4), 4);
        // 49 spatial positions, reduce block between 7 and 16
        assert_eq!(best_divider(49, 7, 16, true, 1), 7);
        assert_eq!(best_divider(196, 7, 16, true, 1), 14);
    }

    #[test]
    fn test_select_ur_divides_spatial() {
        let t = TuningConstants::default();
        // 14 < threshold: 28 divides 28*28=784
        assert_eq!(select_ur(28, 784, false, &t), (28, 0));
        // short image: 4*5 = 20 is itself a candidate
        assert_eq!(select_ur(4, 20, false, &t), (20, 0));
    }

    #[test]
    fn test_select_ur_prefers_rows_for_tall_images() {
        let t = TuningConstants::default();
        // ih = 56 >= 14: 28 divides the row height
        assert_eq!(select_ur(56, 56 * 56, false, &t), (28, 0));
        // ih = 17 >= 14 has no divisor in [8, 28]; fall back to spatial size 17
        assert_eq!(select_ur(17, 17, false, &t), (17, 0));
    }

    #[test]
    fn test_select_ur_smallest_remainder() {
        let t = TuningConstants::default();
        // 49 has no divisor in [8, 28]; 24 is the first candidate leaving remainder 1
        assert_eq!(select_ur(7, 49, false, &t), (24, 1));
    }

    #[test]
    fn test_select_ur_wide_steps() {
        let t = TuningConstants::default();
        // wide candidates: 28, 24, 20, 16, 12, 8
        assert_eq!(select_ur(4, 16, true, &t), (16, 0));
        assert_eq!(select_ur(7, 49, true, &t), (24, 1));
        assert_eq!(select_ur(2, 4, true, &t), (4, 0));
    }

    #[test]
    fn test_select_ur_tuned_bounds() {
        let t = TuningConstants {
            max_regs: 8,
            min_regs: 8,
            ..TuningConstants::default()
        };
        assert_eq!(select_ur(4, 20, false, &t), (8, 4));
        assert_eq!(select_ur(4, 16, false, &t), (8, 0));
    }
}

//! Support-matrix validation, variant selection and blocking

use super::balance::{BalanceInput, ThreadPartition, balance};
use super::blocking::{best_divider, div_up, rnd_dn, rnd_up, select_ur};
use super::config::{KernelConfig, LoopOrder, SIMD_W};
use super::tuning::TuningConstants;
use super::variant::{LoadRowExtent, Variant, VariantTraits};
use crate::conv::{
    ConvGeometry, ConvProblem, Direction, LeakyRelu, MemoryFormat, Operand,
    validate_bias_layout, validate_channel_blocking, validate_filter, validate_layout,
    validate_positive, validate_stride_padding, validate_ungrouped,
};
use crate::dtype::DataType;
use crate::error::{Error, Result, UnsupportedReason};
use crate::isa::{CpuCapabilities, IsaExtension};
use tracing::debug;

/// Everything the planner needs to build a [`KernelConfig`]
#[derive(Clone, Debug, PartialEq)]
pub struct PlanRequest {
    problem: ConvProblem,
    activation: Option<LeakyRelu>,
    nthreads: Option<usize>,
    reduce_src: bool,
    tuning: TuningConstants,
}

impl PlanRequest {
    /// Request a plan for `problem` with default threads and tuning
    pub fn new(problem: ConvProblem) -> Self {
        Self {
            problem,
            activation: None,
            nthreads: None,
            reduce_src: false,
            tuning: TuningConstants::default(),
        }
    }

    /// Fuse a leaky rectifier into the last reduction pass (forward only)
    pub fn with_activation(mut self, activation: LeakyRelu) -> Self {
        self.activation = Some(activation);
        self
    }

    /// Plan for `nthreads` threads instead of the logical core count
    pub fn with_threads(mut self, nthreads: usize) -> Self {
        self.nthreads = Some(nthreads);
        self
    }

    /// Hint that the caller reduces over the source (changes loop order and
    /// disables source transposition)
    pub fn with_reduce_src(mut self, reduce_src: bool) -> Self {
        self.reduce_src = reduce_src;
        self
    }

    /// Override the blocking heuristics
    pub fn with_tuning(mut self, tuning: TuningConstants) -> Self {
        self.tuning = tuning;
        self
    }

    /// The problem being planned
    #[inline]
    pub fn problem(&self) -> &ConvProblem {
        &self.problem
    }

    /// The heuristics in use
    #[inline]
    pub fn tuning(&self) -> &TuningConstants {
        &self.tuning
    }
}

/// Builds kernel configurations for one capability set
#[derive(Clone, Debug)]
pub struct ConfigPlanner<C> {
    caps: C,
}

impl<C: CpuCapabilities> ConfigPlanner<C> {
    /// Create a planner for the given capabilities
    pub fn new(caps: C) -> Self {
        Self { caps }
    }

    /// Capabilities this planner targets
    #[inline]
    pub fn capabilities(&self) -> &C {
        &self.caps
    }

    /// Validate `request` and compute its blocking
    ///
    /// Returns [`Error::Unsupported`] for well-formed problems outside the support
    /// matrix and [`Error::InvalidArgument`] for malformed requests.
    pub fn plan(&self, request: &PlanRequest) -> Result<KernelConfig> {
        let result = self.plan_inner(request);
        match &result {
            Ok(config) => debug!(
                direction = %config.direction,
                variant = %config.variant,
                ur = config.ur,
                ur_tail = config.ur_tail,
                reduce_block = config.reduce_block,
                nb_reduce_blocking = config.nb_reduce_blocking,
                nb_load_blocking = config.nb_load_blocking,
                nb_bcast_blocking = config.nb_bcast_blocking,
                loop_order = %config.loop_order,
                streaming = config.use_streaming_stores,
                "accepted 1x1 convolution"
            ),
            Err(err) => debug!(
                direction = %request.problem.direction,
                error = %err,
                "rejected 1x1 convolution"
            ),
        }
        result
    }

    fn plan_inner(&self, request: &PlanRequest) -> Result<KernelConfig> {
        let problem = &request.problem;
        let tuning = &request.tuning;

        if !self.caps.supports(IsaExtension::Avx512Common) {
            return Err(Error::unsupported(UnsupportedReason::MissingIsa(
                IsaExtension::Avx512Common,
            )));
        }

        tuning.validate()?;
        let nthreads = request
            .nthreads
            .unwrap_or_else(|| self.caps.logical_cores());
        validate_positive(nthreads, "nthreads")?;

        let geometry = problem.geometry()?;
        validate_ungrouped(&geometry)?;
        validate_layout(Operand::Src, &problem.src, MemoryFormat::NChw16c)?;
        validate_layout(Operand::Dst, &problem.dst, MemoryFormat::NChw16c)?;
        validate_bias_layout(problem.bias.as_ref())?;
        validate_filter(&geometry)?;
        validate_stride_padding(problem, &geometry)?;
        validate_channel_blocking(&geometry, SIMD_W)?;

        let direction = problem.direction;
        let (variant, traits) = self.select_variant(problem, &geometry, request, tuning)?;

        validate_layout(
            Operand::Weights,
            &problem.weights,
            traits.weights_format_for(geometry.with_groups),
        )?;

        if request.activation.is_some() && !traits.epilogue {
            return Err(Error::unsupported(UnsupportedReason::Activation(direction)));
        }
        let with_bias = traits.epilogue && problem.bias.is_some();

        let (ur, _) = select_ur(geometry.ih, geometry.os(), variant.is_wide(), tuning);

        let mut config = KernelConfig {
            direction,
            variant,
            traits,
            mb: geometry.mb,
            ngroups: geometry.ngroups,
            ic: geometry.ic,
            oc: geometry.oc,
            ih: geometry.ih,
            iw: geometry.iw,
            oh: geometry.oh,
            ow: geometry.ow,
            is: geometry.is(),
            os: geometry.os(),
            tr_is: rnd_up(geometry.is(), 4),
            ic_block: SIMD_W,
            oc_block: SIMD_W,
            reduce_dim: 0,
            reduce_block: 0,
            load_dim: 0,
            load_block: 0,
            bcast_dim: 0,
            bcast_block: 0,
            ur,
            ur_tail: 0,
            reduce_loop_unroll: 0,
            reduce_loop_bcast_step: 0,
            reduce_loop_load_step: 0,
            bcast_loop_output_step: 0,
            bcast_loop_output_substep: 0,
            bcast_loop_bcast_step: 0,
            bcast_loop_bcast_substep: 0,
            load_loop_load_step: 0,
            load_loop_iter_step: 0,
            nb_reduce: 0,
            nb_load: 0,
            nb_bcast: 0,
            nb_reduce_blocking: 0,
            nb_reduce_blocking_max: 0,
            nb_load_blocking: 0,
            nb_load_blocking_max: 0,
            nb_bcast_blocking: 0,
            nb_bcast_blocking_max: 0,
            load_grp_count: 1,
            loop_order: LoopOrder::Lbr,
            with_bias,
            activation: request.activation,
            use_streaming_stores: true,
            transpose_src: traits.transpose_src,
            nthreads,
            partition: ThreadPartition::TRIVIAL,
        };

        let blocking = if direction == Direction::BackwardWeights {
            block_backward_weights(&mut config, tuning)
        } else {
            block_activations(&mut config, request.reduce_src, tuning)
        };
        finalize(&mut config, blocking);
        Ok(config)
    }

    fn select_variant(
        &self,
        problem: &ConvProblem,
        geometry: &ConvGeometry,
        request: &PlanRequest,
        tuning: &TuningConstants,
    ) -> Result<(Variant, VariantTraits)> {
        let direction = problem.direction;
        let src = problem.src.dtype();
        let wei = problem.weights.dtype();
        let dst = problem.dst.dtype();
        let mic_4ops = self.caps.supports(IsaExtension::Avx512Mic4Ops);

        let dot_product = mic_4ops
            && VariantTraits::lookup(direction, Variant::Vnni4)
                .is_some_and(|t| t.accepts_dtypes(src, wei, dst));

        let variant = if dot_product {
            Variant::Vnni4
        } else if [src, wei, dst].iter().all(|&dt| dt == DataType::F32) {
            let reduce_block = SIMD_W;
            if direction != Direction::BackwardWeights
                && mic_4ops
                && reduce_block.is_multiple_of(4)
            {
                Variant::Fma4
            } else if direction == Direction::BackwardWeights
                && mic_4ops
                && !request.reduce_src
                && (geometry.is() * geometry.ic) / geometry.oc <= tuning.transpose_src_limit
            {
                // transposition pays off only while the source stays small next to oc
                Variant::Fma4
            } else {
                Variant::Fma
            }
        } else {
            return Err(Error::unsupported(UnsupportedReason::DataTypes {
                src,
                weights: wei,
                dst,
            }));
        };

        let traits = VariantTraits::lookup(direction, variant).ok_or_else(|| {
            Error::unsupported(UnsupportedReason::DataTypes {
                src,
                weights: wei,
                dst,
            })
        })?;
        Ok((variant, traits))
    }
}

/// Cache blocking in elements: (reduce, reduce max, load, load max, bcast, bcast max)
type Blocking = [usize; 6];

/// Forward and backward-data blocking
fn block_activations(c: &mut KernelConfig, reduce_src: bool, t: &TuningConstants) -> Blocking {
    let ts_in = c.typesize_in();
    let ts_out = c.typesize_out();
    let nthreads = c.nthreads;

    if c.direction.is_forward() {
        c.reduce_dim = c.ic;
        c.reduce_block = c.ic_block;
        c.load_dim = c.oc;
        c.load_block = c.oc_block;
        c.bcast_dim = c.is;
    } else {
        c.reduce_dim = c.oc;
        c.reduce_block = c.oc_block;
        c.load_dim = c.ic;
        c.load_block = c.ic_block;
        c.bcast_dim = c.os;
    }
    c.bcast_block = c.ur;

    c.reduce_loop_unroll = c.reduce_block;
    c.reduce_loop_bcast_step = c.reduce_loop_unroll * c.bcast_dim * ts_in;
    c.reduce_loop_load_step = match c.traits.load_row {
        LoadRowExtent::ReduceBlock => c.reduce_loop_unroll * c.load_dim * ts_in,
        LoadRowExtent::ReduceDim => c.reduce_loop_unroll * c.load_block * ts_in,
    };

    c.bcast_loop_output_step = c.ur * c.load_block * ts_out;
    c.bcast_loop_output_substep = 0;
    c.bcast_loop_bcast_step = c.ur * c.reduce_block * ts_in;
    c.bcast_loop_bcast_substep = 0;

    c.load_loop_load_step = match c.traits.load_row {
        LoadRowExtent::ReduceBlock => c.reduce_block * c.load_block * ts_in,
        LoadRowExtent::ReduceDim => c.reduce_dim * c.load_block * ts_in,
    };
    c.load_loop_iter_step = c.load_block;

    c.loop_order = if c.direction == Direction::BackwardData || !reduce_src {
        LoopOrder::Lbr
    } else {
        LoopOrder::Blr
    };

    let nb_bcast = div_up(c.bcast_dim, c.bcast_block);
    let nb_reduce = div_up(c.reduce_dim, c.reduce_block);

    let big_reduce = c.reduce_dim >= t.big_reduce_dim;
    let mut reduce_blocking = nb_reduce;
    if big_reduce && c.bcast_dim <= t.small_spatial {
        reduce_blocking = t.reduce_blocking_small_spatial;
    } else if big_reduce {
        reduce_blocking = t.reduce_blocking_large_spatial;
    }
    let reduce_blocking = best_divider(nb_reduce, 1, reduce_blocking, true, 1) * c.reduce_block;

    if reduce_blocking < c.reduce_dim {
        // partial sums are re-read: reduce outermost, no streaming stores
        c.loop_order = match (c.direction, reduce_src) {
            (Direction::BackwardData, true) => LoopOrder::Lbr,
            (Direction::BackwardData, false) => LoopOrder::Rlb,
            (_, true) => LoopOrder::Rbl,
            (_, false) => LoopOrder::Rlb,
        };
        c.use_streaming_stores = false;
    }

    let mut load_blocking = c.load_dim;

    let groups_work = c.mb * c.ngroups * nb_bcast;
    let load_grp_count = div_up(nthreads, groups_work);
    c.load_grp_count = best_divider(nthreads, load_grp_count, 2 * load_grp_count, false, 1);
    if c.bcast_dim <= t.load_grp_spatial
        && c.mb <= nthreads
        && c.load_dim > t.load_grp_min_load_dim
        && c.load_dim / c.reduce_dim >= t.load_grp_ratio
    {
        c.load_grp_count = c.load_grp_count.max(2);
        load_blocking = c.load_block;
    }

    let mut bcast_blocking = div_up(groups_work, div_up(nthreads, c.load_grp_count)) * c.bcast_block;
    bcast_blocking = rnd_up(bcast_blocking.min(c.bcast_dim), c.bcast_block);

    let l2 = t.l2_capacity as i64;
    let mut space_for_bcast = l2
        - (2 * c.load_block * reduce_blocking) as i64
        - (c.ur * reduce_blocking) as i64
        - t.l2_reserved as i64;
    if (c.reduce_dim * c.bcast_dim) as i64 > l2 {
        space_for_bcast /= 2;
    }
    let bcast_in_cache = (c.bcast_block as i64).max(space_for_bcast / reduce_blocking as i64) as usize;
    bcast_blocking = bcast_blocking.min(rnd_dn(bcast_in_cache, c.bcast_block));

    let (num, den) = t.bcast_blocking_max_ratio;
    [
        reduce_blocking,
        reduce_blocking,
        load_blocking,
        load_blocking,
        bcast_blocking,
        bcast_blocking * num / den,
    ]
}

/// Backward-weights blocking, including the thread partition
fn block_backward_weights(c: &mut KernelConfig, t: &TuningConstants) -> Blocking {
    let ts_in = c.typesize_in();
    let ts_out = c.typesize_out();

    c.use_streaming_stores = c.is > t.small_spatial && c.variant == Variant::Fma4;
    c.loop_order = LoopOrder::Rlb;

    c.reduce_dim = if c.transpose_src { c.tr_is } else { c.is };
    c.reduce_block = if c.variant == Variant::Fma4 {
        let (min, max) = t.wide_reduce_block_range;
        best_divider(c.reduce_dim, min, max, true, 4)
    } else {
        let (min, max) = t.reduce_block_range;
        best_divider(c.reduce_dim, min, max, true, 1)
    };

    c.load_dim = c.oc;
    c.load_block = c.oc_block;
    c.bcast_dim = c.ic;
    c.bcast_block = c.ic_block;
    c.ur = c.bcast_block;

    c.reduce_loop_unroll = c.reduce_block;
    c.reduce_loop_bcast_step = c.reduce_loop_unroll * c.ic_block * ts_in;
    c.reduce_loop_load_step = c.reduce_loop_unroll * c.oc_block * ts_in;

    c.bcast_loop_output_step = c.oc_block * c.ic_block * ts_out;
    c.bcast_loop_output_substep = c.oc_block * c.ur * ts_out;
    c.bcast_loop_bcast_step = c.ic_block * c.reduce_dim * ts_in;
    c.bcast_loop_bcast_substep = c.ur * ts_in;

    // diff_dst rows are reduce_dim apart, padded to tr_is when the source is transposed
    c.load_loop_load_step = c.oc_block * c.reduce_dim * ts_in;
    c.load_loop_iter_step = c.oc_block;

    let nb_load = div_up(c.load_dim, c.load_block);
    let nb_bcast = div_up(c.bcast_dim, c.bcast_block);
    let nb_reduce = div_up(c.reduce_dim, c.reduce_block);

    c.partition = balance(
        &BalanceInput {
            mb: c.mb,
            ngroups: c.ngroups,
            nb_reduce,
            nb_load,
            nb_bcast,
            reduce_block: c.reduce_block,
            load_block: c.load_block,
            bcast_block: c.bcast_block,
            weights: if c.transpose_src {
                t.balance_weights_transposed
            } else {
                t.balance_weights
            },
        },
        c.nthreads,
    );

    let load_blocking = best_divider(nb_load, t.min_load_blocking, nb_load, false, 1) * c.load_block;
    assert!(c.load_dim.is_multiple_of(load_blocking));

    let bcast_blocking =
        best_divider(nb_bcast, t.min_bcast_blocking, nb_bcast, false, 1) * c.bcast_block;
    assert!(c.bcast_dim.is_multiple_of(bcast_blocking));

    let max_reduce_blocking = (t.l2_capacity / ((bcast_blocking + load_blocking) * c.reduce_block))
        .min((t.l1_capacity / c.bcast_block) / c.reduce_block);

    // per-thread reduction work uses the threads the partition actually occupies
    let num_jobs = div_up(c.load_dim, load_blocking) * div_up(c.bcast_dim, bcast_blocking);
    let threads_per_job = (c.partition.total() / num_jobs).max(1);
    let reduce_blocking = div_up(div_up(c.mb * c.reduce_dim, c.reduce_block), threads_per_job);
    let reduce_blocking = best_divider(
        reduce_blocking,
        max_reduce_blocking.saturating_sub(2),
        max_reduce_blocking,
        true,
        1,
    ) * c.reduce_block;
    let reduce_blocking_max = rnd_dn(reduce_blocking * 3 / 2, c.reduce_block);

    [
        reduce_blocking,
        reduce_blocking_max,
        load_blocking,
        load_blocking,
        bcast_blocking,
        bcast_blocking,
    ]
}

/// Fill block counts and check the blocking invariants
fn finalize(c: &mut KernelConfig, blocking: Blocking) {
    let [reduce, reduce_max, load, load_max, bcast, bcast_max] = blocking;

    assert!(reduce > 0 && reduce_max > 0 && load > 0 && load_max > 0);
    assert!(bcast > 0 && bcast_max > 0);
    assert!(reduce.is_multiple_of(c.reduce_block));
    assert!(reduce_max.is_multiple_of(c.reduce_block));
    assert!(load.is_multiple_of(c.load_block));
    assert!(load_max.is_multiple_of(c.load_block));
    assert!(c.bcast_block.is_multiple_of(c.ur));
    assert!(c.reduce_loop_unroll.is_multiple_of(c.traits.reduce_step));
    if c.variant.is_wide() {
        assert!(c.reduce_dim.is_multiple_of(c.reduce_loop_unroll));
    }

    c.ur_tail = c.bcast_dim % c.ur;

    c.nb_bcast_blocking = bcast / c.bcast_block;
    c.nb_bcast_blocking_max = bcast_max / c.bcast_block;
    c.nb_load_blocking = load / c.load_block;
    c.nb_load_blocking_max = load_max / c.load_block;
    c.nb_reduce_blocking = reduce / c.reduce_block;
    c.nb_reduce_blocking_max = reduce_max / c.reduce_block;

    c.nb_bcast = div_up(c.bcast_dim, c.bcast_block);
    c.nb_load = div_up(c.load_dim, c.load_block);
    c.nb_reduce = div_up(c.reduce_dim, c.reduce_block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::TensorDesc;
    use crate::isa::SyntheticCpu;

    fn fwd(ic: usize, oc: usize, h: usize, w: usize) -> ConvProblem {
        ConvProblem::new(
            Direction::ForwardInference,
            TensorDesc::new(&[1, ic, h, w], DataType::F32, MemoryFormat::NChw16c),
            TensorDesc::new(&[oc, ic, 1, 1], DataType::F32, MemoryFormat::OIhw16i16o),
            TensorDesc::new(&[1, oc, h, w], DataType::F32, MemoryFormat::NChw16c),
        )
    }

    fn plan(request: PlanRequest) -> Result<KernelConfig> {
        ConfigPlanner::new(SyntheticCpu::avx512(1)).plan(&request)
    }

    #[test]
    fn test_forward_baseline() {
        let c = plan(PlanRequest::new(fwd(64, 64, 7, 7)).with_threads(1)).unwrap();
        assert_eq!(c.variant, Variant::Fma);
        assert_eq!((c.ur, c.ur_tail), (24, 1));
        assert_eq!(c.nb_reduce_blocking * c.reduce_block, 64);
        assert_eq!(c.loop_order, LoopOrder::Lbr);
        assert!(c.use_streaming_stores);
        assert_eq!(c.reduce_loop_bcast_step, 16 * 49 * 4);
        assert_eq!(c.load_loop_load_step, 64 * 16 * 4);
    }

    #[test]
    fn test_big_reduction_goes_reduce_outer() {
        let c = plan(PlanRequest::new(fwd(2048, 64, 14, 14)).with_threads(1)).unwrap();
        // 128 reduce blocks, at most 8 per pass for a large spatial extent
        assert_eq!(c.nb_reduce_blocking, 8);
        assert_eq!(c.loop_order, LoopOrder::Rlb);
        assert!(!c.use_streaming_stores);

        let c = plan(
            PlanRequest::new(fwd(2048, 64, 14, 14))
                .with_threads(1)
                .with_reduce_src(true),
        )
        .unwrap();
        assert_eq!(c.loop_order, LoopOrder::Rbl);
    }

    #[test]
    fn test_missing_isa() {
        let err = ConfigPlanner::new(SyntheticCpu::none(4))
            .plan(&PlanRequest::new(fwd(16, 16, 4, 4)))
            .unwrap_err();
        assert_eq!(
            err.unsupported_reason(),
            Some(&UnsupportedReason::MissingIsa(IsaExtension::Avx512Common))
        );
    }

    #[test]
    fn test_zero_threads() {
        let err = plan(PlanRequest::new(fwd(16, 16, 4, 4)).with_threads(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "nthreads", .. }));
    }

    #[test]
    fn test_default_threads_come_from_capabilities() {
        let c = ConfigPlanner::new(SyntheticCpu::avx512(6))
            .plan(&PlanRequest::new(fwd(16, 16, 4, 4)))
            .unwrap();
        assert_eq!(c.nthreads, 6);
    }
}

//! Numeric variants and the per-(direction, variant) lookup table
//!
//! Everything the emitters need to know about a direction or a variant is resolved
//! here once. Code generation reads [`VariantTraits`] and never matches on
//! [`Direction`] or [`Variant`] itself.

use crate::conv::{Direction, MemoryFormat};
use crate::dtype::DataType;
use std::fmt;

/// Numeric execution variant
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    /// f32 broadcast FMA, one reduction element per instruction
    Fma,
    /// f32 4-way FMA, four reduction elements per instruction
    Fma4,
    /// s16 pair dot product into s32, four pairs per instruction
    Vnni4,
}

impl Variant {
    /// Returns the name of this variant as a string
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fma => "fma",
            Self::Fma4 => "4fma",
            Self::Vnni4 => "4vnni",
        }
    }

    /// Returns true for the 4-way variants
    #[inline]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Fma4 | Self::Vnni4)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical convolution axis
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogicalAxis {
    /// Input channels
    InputChannels,
    /// Output channels
    OutputChannels,
    /// Spatial positions of one image
    Spatial,
}

/// Which logical axis plays each kernel role
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AxisRoles {
    /// Summed-over axis
    pub reduce: LogicalAxis,
    /// Axis of the vector-loaded operand
    pub load: LogicalAxis,
    /// Axis of the scalar-broadcast operand
    pub bcast: LogicalAxis,
}

/// Multiply-accumulate instruction family
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MacKind {
    /// `acc += load * broadcast(mem)`
    BroadcastFma,
    /// `acc += sum(load[i] * mem[i])` over four consecutive registers
    QuadFma,
    /// `acc += sum(dot2(load[i], mem[i]))` over four registers of s16 pairs
    QuadDotWords,
}

/// Lane interpretation of accumulators
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// IEEE single precision
    F32,
    /// Two's complement 32-bit
    I32,
}

/// How an output tile `(i_load, i_ur)` is addressed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputAddressing {
    /// Tiles are packed: `(i_load * bcast_dim + i_ur) * load_block`
    Contiguous,
    /// Load tiles are `output_stride` bytes apart, supplied at call time
    Strided,
}

/// How a broadcast element `(i_reduce, i_ur)` is addressed, in elements
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BcastAddressing {
    /// `i_ur * reduce_loop_unroll + i_reduce` (channel-blocked activations)
    ReduceInner,
    /// `i_reduce * ic_block + i_ur` (spatial-major source)
    SpatialMajor,
    /// `4 * ((i_reduce / 4) * ic_block + i_ur) + i_reduce % 4` (source transposed in quads)
    Transposed4,
}

/// Stride the input prefetches walk
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrefetchBasis {
    /// Broadcast positions, scaled by the reduce block
    Broadcast,
    /// Reduction positions, scaled by the broadcast block
    Reduction,
}

/// Extent separating consecutive load tiles in the weight operand
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadRowExtent {
    /// The full reduction extent
    ReduceDim,
    /// One reduce block (pair-interleaved backward-data weights)
    ReduceBlock,
}

/// Immutable facts about one (direction, variant) pair
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariantTraits {
    /// Direction this entry describes
    pub direction: Direction,
    /// Variant this entry describes
    pub variant: Variant,
    /// Axis role assignment
    pub roles: AxisRoles,
    /// Required element types of (src, weights, dst)
    pub dtypes: (DataType, DataType, DataType),
    /// Required ungrouped weight layout
    pub weights_format: MemoryFormat,
    /// Bytes per element read by the multiply-accumulate
    pub typesize_in: usize,
    /// Bytes per accumulator element
    pub typesize_out: usize,
    /// Accumulator lanes
    pub lane: LaneKind,
    /// Multiply-accumulate family
    pub mac: MacKind,
    /// Load registers consumed per multiply-accumulate
    pub fma_step: usize,
    /// Reduction elements consumed per multiply-accumulate
    pub reduce_step: usize,
    /// Reduction elements between consecutive load registers
    pub load_scale: usize,
    /// Output tile addressing
    pub output: OutputAddressing,
    /// Broadcast operand addressing
    pub bcast: BcastAddressing,
    /// Input prefetch stride
    pub prefetch: PrefetchBasis,
    /// Distance between load tiles
    pub load_row: LoadRowExtent,
    /// Whether the source is pre-transposed
    pub transpose_src: bool,
    /// Whether bias and the activation epilogue apply
    pub epilogue: bool,
    /// Tile-width candidates of the load-loop dispatch, ascending
    pub width_cases: &'static [usize],
}

/// Width candidates of the baseline variant
pub const FMA_WIDTH_CASES: &[usize] = &[2, 4, 5, 8, 14, 28];

/// Width candidates of the 4-way variants
pub const WIDE_WIDTH_CASES: &[usize] = &[2, 4, 6, 12, 28];

impl VariantTraits {
    /// Look up the entry for a (direction, variant) pair
    ///
    /// Returns `None` for pairs that have no kernel: the dot-product variant has no
    /// weight-gradient form.
    pub fn lookup(direction: Direction, variant: Variant) -> Option<Self> {
        use DataType::{F32, I16, I32};
        use LogicalAxis::{InputChannels, OutputChannels, Spatial};

        let roles = match direction {
            Direction::ForwardTraining | Direction::ForwardInference => AxisRoles {
                reduce: InputChannels,
                load: OutputChannels,
                bcast: Spatial,
            },
            Direction::BackwardData => AxisRoles {
                reduce: OutputChannels,
                load: InputChannels,
                bcast: Spatial,
            },
            Direction::BackwardWeights => AxisRoles {
                reduce: Spatial,
                load: OutputChannels,
                bcast: InputChannels,
            },
        };
        let backward_weights = direction == Direction::BackwardWeights;

        let (dtypes, weights_format) = match (variant, direction) {
            (Variant::Vnni4, Direction::BackwardWeights) => return None,
            (Variant::Vnni4, Direction::BackwardData) => ((I32, I16, I16), MemoryFormat::OIhw8o16i2o),
            (Variant::Vnni4, _) => ((I16, I16, I32), MemoryFormat::OIhw8i16o2i),
            (_, Direction::BackwardData) => ((F32, F32, F32), MemoryFormat::IOhw16o16i),
            _ => ((F32, F32, F32), MemoryFormat::OIhw16i16o),
        };

        let (typesize_in, typesize_out, lane) = match variant {
            Variant::Vnni4 => (2, 4, LaneKind::I32),
            Variant::Fma | Variant::Fma4 => (4, 4, LaneKind::F32),
        };

        let (mac, fma_step, reduce_step, load_scale) = match variant {
            Variant::Fma => (MacKind::BroadcastFma, 1, 1, 1),
            Variant::Fma4 => (MacKind::QuadFma, 4, 4, 1),
            Variant::Vnni4 => (MacKind::QuadDotWords, 4, 8, 2),
        };

        // The 4-way weight gradient only exists with a transposed source
        let transpose_src = backward_weights && variant == Variant::Fma4;
        let bcast = if transpose_src {
            BcastAddressing::Transposed4
        } else if backward_weights {
            BcastAddressing::SpatialMajor
        } else {
            BcastAddressing::ReduceInner
        };

        let load_row = if variant == Variant::Vnni4 && direction == Direction::BackwardData {
            LoadRowExtent::ReduceBlock
        } else {
            LoadRowExtent::ReduceDim
        };

        Some(Self {
            direction,
            variant,
            roles,
            dtypes,
            weights_format,
            typesize_in,
            typesize_out,
            lane,
            mac,
            fma_step,
            reduce_step,
            load_scale,
            output: if backward_weights {
                OutputAddressing::Strided
            } else {
                OutputAddressing::Contiguous
            },
            bcast,
            prefetch: if backward_weights {
                PrefetchBasis::Reduction
            } else {
                PrefetchBasis::Broadcast
            },
            load_row,
            transpose_src,
            epilogue: direction.is_forward(),
            width_cases: if variant.is_wide() {
                WIDE_WIDTH_CASES
            } else {
                FMA_WIDTH_CASES
            },
        })
    }

    /// Weight layout required for the given weight rank
    #[inline]
    pub fn weights_format_for(&self, with_groups: bool) -> MemoryFormat {
        if with_groups {
            self.weights_format.grouped()
        } else {
            self.weights_format
        }
    }

    /// Direction-aware checks of the element types
    #[inline]
    pub fn accepts_dtypes(&self, src: DataType, weights: DataType, dst: DataType) -> bool {
        self.dtypes == (src, weights, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_roles() {
        let t = VariantTraits::lookup(Direction::ForwardInference, Variant::Fma).unwrap();
        assert_eq!(t.roles.reduce, LogicalAxis::InputChannels);
        assert_eq!(t.roles.load, LogicalAxis::OutputChannels);
        assert_eq!(t.roles.bcast, LogicalAxis::Spatial);
        assert_eq!(t.weights_format, MemoryFormat::OIhw16i16o);
        assert_eq!(t.output, OutputAddressing::Contiguous);
        assert!(t.epilogue);
        assert_eq!(t.width_cases, FMA_WIDTH_CASES);
    }

    #[test]
    fn test_backward_data_swaps_channels() {
        let t = VariantTraits::lookup(Direction::BackwardData, Variant::Fma4).unwrap();
        assert_eq!(t.roles.reduce, LogicalAxis::OutputChannels);
        assert_eq!(t.roles.load, LogicalAxis::InputChannels);
        assert_eq!(t.weights_format, MemoryFormat::IOhw16o16i);
        assert_eq!((t.fma_step, t.reduce_step), (4, 4));
        assert!(!t.epilogue);
    }

    #[test]
    fn test_backward_weights_traits() {
        let fma = VariantTraits::lookup(Direction::BackwardWeights, Variant::Fma).unwrap();
        assert_eq!(fma.roles.reduce, LogicalAxis::Spatial);
        assert_eq!(fma.bcast, BcastAddressing::SpatialMajor);
        assert_eq!(fma.output, OutputAddressing::Strided);
        assert_eq!(fma.prefetch, PrefetchBasis::Reduction);
        assert!(!fma.transpose_src);

        let wide = VariantTraits::lookup(Direction::BackwardWeights, Variant::Fma4).unwrap();
        assert!(wide.transpose_src);
        assert_eq!(wide.bcast, BcastAddressing::Transposed4);

        assert!(VariantTraits::lookup(Direction::BackwardWeights, Variant::Vnni4).is_none());
    }

    #[test]
    fn test_vnni_traits() {
        let fwd = VariantTraits::lookup(Direction::ForwardTraining, Variant::Vnni4).unwrap();
        assert_eq!(fwd.dtypes, (DataType::I16, DataType::I16, DataType::I32));
        assert_eq!((fwd.typesize_in, fwd.typesize_out), (2, 4));
        assert_eq!((fwd.fma_step, fwd.reduce_step, fwd.load_scale), (4, 8, 2));
        assert_eq!(fwd.weights_format_for(true), MemoryFormat::GOIhw8i16o2i);

        let bwd = VariantTraits::lookup(Direction::BackwardData, Variant::Vnni4).unwrap();
        assert_eq!(bwd.dtypes, (DataType::I32, DataType::I16, DataType::I16));
        assert_eq!(bwd.load_row, LoadRowExtent::ReduceBlock);
        assert_eq!(bwd.lane, LaneKind::I32);
    }
}

//! Convolution problem description
//!
//! A [`ConvProblem`] names the three operands of a convolution by their role in the
//! forward convolution, whatever the direction being computed:
//!
//! | Direction        | `src`      | `weights`      | `dst`      |
//! |------------------|------------|----------------|------------|
//! | Forward          | input      | weights        | output     |
//! | Backward data    | diff_src   | weights        | diff_dst   |
//! | Backward weights | src        | diff_weights   | diff_dst   |
//!
//! Activations are `[N, C, H, W]`; weights are `[O, I, KH, KW]` or, with a leading
//! group dimension, `[G, O, I, KH, KW]`.

mod validate;

pub use validate::ConvGeometry;
pub(crate) use validate::{
    validate_bias_layout, validate_channel_blocking, validate_filter, validate_layout,
    validate_positive, validate_stride_padding, validate_ungrouped,
};

use crate::dtype::DataType;
use crate::error::Result;
use smallvec::SmallVec;
use std::fmt;

/// Which derivative of the convolution is computed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Forward pass during training
    ForwardTraining,
    /// Forward pass for inference
    ForwardInference,
    /// Gradient with respect to the input
    BackwardData,
    /// Gradient with respect to the weights
    BackwardWeights,
}

impl Direction {
    /// Returns true for both forward directions
    #[inline]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::ForwardTraining | Self::ForwardInference)
    }

    /// Returns the name of this direction as a string
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ForwardTraining => "forward_training",
            Self::ForwardInference => "forward_inference",
            Self::BackwardData => "backward_data",
            Self::BackwardWeights => "backward_weights",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory layouts of operands
///
/// Blocked layouts are named after the dimension order from outermost to innermost;
/// capital letters are blocked dimensions, the trailing `16c`/`16i`/`16o` suffixes are
/// the blocks themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MemoryFormat {
    /// Layout left to the implementation
    Any,
    /// Plain 1D (bias)
    X,
    /// Plain activations
    Nchw,
    /// Channels-last activations
    Nhwc,
    /// Activations with channels blocked by 8
    NChw8c,
    /// Activations with channels blocked by 16
    NChw16c,
    /// Plain weights
    Oihw,
    /// f32 weights, 16 input × 16 output channel blocks, output fastest
    OIhw16i16o,
    /// f32 weights with input blocks outermost, input fastest
    IOhw16o16i,
    /// s16 weights, input channel pairs interleaved under 16 outputs
    OIhw8i16o2i,
    /// s16 weights, output channel pairs interleaved under 16 inputs
    OIhw8o16i2o,
    /// Grouped form of [`MemoryFormat::OIhw16i16o`]
    GOIhw16i16o,
    /// Grouped form of [`MemoryFormat::IOhw16o16i`]
    GIOhw16o16i,
    /// Grouped form of [`MemoryFormat::OIhw8i16o2i`]
    GOIhw8i16o2i,
    /// Grouped form of [`MemoryFormat::OIhw8o16i2o`]
    GOIhw8o16i2o,
}

impl MemoryFormat {
    /// Returns the conventional name of this layout
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::X => "x",
            Self::Nchw => "nchw",
            Self::Nhwc => "nhwc",
            Self::NChw8c => "nChw8c",
            Self::NChw16c => "nChw16c",
            Self::Oihw => "oihw",
            Self::OIhw16i16o => "OIhw16i16o",
            Self::IOhw16o16i => "IOhw16o16i",
            Self::OIhw8i16o2i => "OIhw8i16o2i",
            Self::OIhw8o16i2o => "OIhw8o16i2o",
            Self::GOIhw16i16o => "gOIhw16i16o",
            Self::GIOhw16o16i => "gIOhw16o16i",
            Self::GOIhw8i16o2i => "gOIhw8i16o2i",
            Self::GOIhw8o16i2o => "gOIhw8o16i2o",
        }
    }

    /// The grouped counterpart of an ungrouped weight layout
    pub const fn grouped(self) -> Self {
        match self {
            Self::OIhw16i16o => Self::GOIhw16i16o,
            Self::IOhw16o16i => Self::GIOhw16o16i,
            Self::OIhw8i16o2i => Self::GOIhw8i16o2i,
            Self::OIhw8o16i2o => Self::GOIhw8o16i2o,
            other => other,
        }
    }
}

impl fmt::Display for MemoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand roles, used in diagnostics
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Source activations (or their gradient)
    Src,
    /// Weights (or their gradient)
    Weights,
    /// Destination activations (or their gradient)
    Dst,
    /// Bias
    Bias,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Src => "src",
            Self::Weights => "weights",
            Self::Dst => "dst",
            Self::Bias => "bias",
        })
    }
}

/// Shape, element type and layout of one operand
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    dims: SmallVec<[usize; 5]>,
    dtype: DataType,
    format: MemoryFormat,
}

impl TensorDesc {
    /// Create a descriptor from logical dims
    pub fn new(dims: &[usize], dtype: DataType, format: MemoryFormat) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
            dtype,
            format,
        }
    }

    /// Logical dimensions
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions
    #[inline]
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Memory layout
    #[inline]
    pub fn format(&self) -> MemoryFormat {
        self.format
    }
}

/// Fused leaky-rectifier epilogue: `x < 0 ? x * negative_slope : x`
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LeakyRelu {
    /// Multiplier applied to negative lanes (0 gives a plain ReLU)
    pub negative_slope: f32,
}

impl LeakyRelu {
    /// Plain rectifier
    pub const RELU: Self = Self {
        negative_slope: 0.0,
    };

    /// Leaky rectifier with the given slope
    pub const fn new(negative_slope: f32) -> Self {
        Self { negative_slope }
    }
}

/// Full description of one convolution
#[derive(Clone, Debug, PartialEq)]
pub struct ConvProblem {
    /// Derivative being computed
    pub direction: Direction,
    /// Source (or diff-source) activations
    pub src: TensorDesc,
    /// Weights (or diff-weights)
    pub weights: TensorDesc,
    /// Destination (or diff-destination) activations
    pub dst: TensorDesc,
    /// Optional bias; only consumed by forward directions
    pub bias: Option<TensorDesc>,
    /// Spatial strides (height, width)
    pub strides: [usize; 2],
    /// Top and left padding
    pub padding: [usize; 2],
}

impl ConvProblem {
    /// Create an unbiased, unit-stride, unpadded problem
    pub fn new(direction: Direction, src: TensorDesc, weights: TensorDesc, dst: TensorDesc) -> Self {
        Self {
            direction,
            src,
            weights,
            dst,
            bias: None,
            strides: [1, 1],
            padding: [0, 0],
        }
    }

    /// Attach a bias operand
    pub fn with_bias(mut self, bias: TensorDesc) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Set spatial strides
    pub fn with_strides(mut self, strides: [usize; 2]) -> Self {
        self.strides = strides;
        self
    }

    /// Set top/left padding
    pub fn with_padding(mut self, padding: [usize; 2]) -> Self {
        self.padding = padding;
        self
    }

    /// Extract the problem geometry, checking operand ranks and extents
    pub fn geometry(&self) -> Result<ConvGeometry> {
        ConvGeometry::from_problem(self)
    }
}

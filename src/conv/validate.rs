//! Shared validation for pointwise convolution problems.
//!
//! Malformed descriptions (wrong rank, inconsistent extents) are `InvalidArgument`;
//! well-formed problems outside the kernel's support matrix are `Unsupported`.

use super::{ConvProblem, MemoryFormat, Operand, TensorDesc};
use crate::error::{Error, Result, UnsupportedReason};

/// Logical extents of a convolution, per group
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConvGeometry {
    /// Weights carry a leading group dimension
    pub with_groups: bool,
    /// Number of groups
    pub ngroups: usize,
    /// Minibatch
    pub mb: usize,
    /// Input channels per group
    pub ic: usize,
    /// Output channels per group
    pub oc: usize,
    /// Input height
    pub ih: usize,
    /// Input width
    pub iw: usize,
    /// Output height
    pub oh: usize,
    /// Output width
    pub ow: usize,
    /// Filter height
    pub kh: usize,
    /// Filter width
    pub kw: usize,
}

impl ConvGeometry {
    pub(super) fn from_problem(problem: &ConvProblem) -> Result<Self> {
        validate_rank(&problem.src, &[4], "src")?;
        validate_rank(&problem.dst, &[4], "dst")?;
        validate_rank(&problem.weights, &[4, 5], "weights")?;

        let src = problem.src.dims();
        let dst = problem.dst.dims();
        let wei = problem.weights.dims();

        let with_groups = problem.weights.ndims() == problem.src.ndims() + 1;
        let ngroups = if with_groups { wei[0] } else { 1 };
        validate_positive(ngroups, "groups")?;

        if dst[0] != src[0] {
            return Err(Error::invalid_argument(
                "dst",
                format!("minibatch {} does not match src minibatch {}", dst[0], src[0]),
            ));
        }
        if !src[1].is_multiple_of(ngroups) || !dst[1].is_multiple_of(ngroups) {
            return Err(Error::invalid_argument(
                "groups",
                format!(
                    "channels (src {}, dst {}) must be divisible by groups ({})",
                    src[1], dst[1], ngroups
                ),
            ));
        }

        let g = usize::from(with_groups);
        let geometry = Self {
            with_groups,
            ngroups,
            mb: src[0],
            ic: src[1] / ngroups,
            oc: dst[1] / ngroups,
            ih: src[2],
            iw: src[3],
            oh: dst[2],
            ow: dst[3],
            kh: wei[g + 2],
            kw: wei[g + 3],
        };

        if wei[g] != geometry.oc || wei[g + 1] != geometry.ic {
            return Err(Error::invalid_argument(
                "weights",
                format!(
                    "weights channels [{}, {}] should be [oc={}, ic={}]",
                    wei[g], wei[g + 1], geometry.oc, geometry.ic
                ),
            ));
        }
        for (name, value) in [
            ("mb", geometry.mb),
            ("ic", geometry.ic),
            ("oc", geometry.oc),
            ("ih", geometry.ih),
            ("iw", geometry.iw),
        ] {
            validate_positive(value, name)?;
        }

        Ok(geometry)
    }

    /// Input spatial size `ih * iw`
    #[inline]
    pub fn is(&self) -> usize {
        self.ih * self.iw
    }

    /// Output spatial size `oh * ow`
    #[inline]
    pub fn os(&self) -> usize {
        self.oh * self.ow
    }
}

/// Validates the rank of a descriptor.
#[inline]
pub(crate) fn validate_rank(desc: &TensorDesc, allowed: &[usize], arg: &'static str) -> Result<()> {
    if !allowed.contains(&desc.ndims()) {
        return Err(Error::invalid_argument(
            arg,
            format!("expects rank {:?}, got {}D", allowed, desc.ndims()),
        ));
    }
    Ok(())
}

/// Validates that an extent is non-zero.
#[inline]
pub(crate) fn validate_positive(value: usize, arg: &'static str) -> Result<()> {
    if value == 0 {
        return Err(Error::invalid_argument(arg, format!("requires {arg} > 0, got 0")));
    }
    Ok(())
}

/// Rejects grouped convolutions.
#[inline]
pub(crate) fn validate_ungrouped(geometry: &ConvGeometry) -> Result<()> {
    if geometry.ngroups != 1 {
        return Err(Error::unsupported(UnsupportedReason::Grouped {
            groups: geometry.ngroups,
        }));
    }
    Ok(())
}

/// Validates that an operand uses the required layout.
#[inline]
pub(crate) fn validate_layout(
    operand: Operand,
    desc: &TensorDesc,
    expected: MemoryFormat,
) -> Result<()> {
    if desc.format() != expected {
        return Err(Error::unsupported(UnsupportedReason::Layout {
            operand,
            expected,
            got: desc.format(),
        }));
    }
    Ok(())
}

/// Bias must be plain 1D or left to the implementation.
#[inline]
pub(crate) fn validate_bias_layout(bias: Option<&TensorDesc>) -> Result<()> {
    match bias {
        Some(desc) if !matches!(desc.format(), MemoryFormat::X | MemoryFormat::Any) => {
            Err(Error::unsupported(UnsupportedReason::Layout {
                operand: Operand::Bias,
                expected: MemoryFormat::X,
                got: desc.format(),
            }))
        }
        _ => Ok(()),
    }
}

/// Validates a 1x1 filter.
#[inline]
pub(crate) fn validate_filter(geometry: &ConvGeometry) -> Result<()> {
    if geometry.kh != 1 || geometry.kw != 1 {
        return Err(Error::unsupported(UnsupportedReason::FilterSize {
            kh: geometry.kh,
            kw: geometry.kw,
        }));
    }
    Ok(())
}

/// Validates unit strides, zero padding and matching spatial extents.
#[inline]
pub(crate) fn validate_stride_padding(problem: &ConvProblem, geometry: &ConvGeometry) -> Result<()> {
    if problem.strides != [1, 1] || problem.padding != [0, 0] {
        return Err(Error::unsupported(UnsupportedReason::StrideOrPadding {
            strides: problem.strides,
            padding: problem.padding,
        }));
    }
    if geometry.oh != geometry.ih || geometry.ow != geometry.iw {
        return Err(Error::invalid_argument(
            "dst",
            format!(
                "spatial extent {}x{} does not match src {}x{} for a unit-stride 1x1 filter",
                geometry.oh, geometry.ow, geometry.ih, geometry.iw
            ),
        ));
    }
    Ok(())
}

/// Validates that both channel counts are multiples of the SIMD width.
#[inline]
pub(crate) fn validate_channel_blocking(geometry: &ConvGeometry, simd_w: usize) -> Result<()> {
    if !geometry.ic.is_multiple_of(simd_w) || !geometry.oc.is_multiple_of(simd_w) {
        return Err(Error::unsupported(UnsupportedReason::ChannelBlocking {
            ic: geometry.ic,
            oc: geometry.oc,
            simd_w,
        }));
    }
    Ok(())
}

//! Error types for conv1x1-jit

use crate::conv::{Direction, MemoryFormat, Operand};
use crate::dtype::DataType;
use crate::isa::IsaExtension;
use thiserror::Error;

/// Result type alias using conv1x1-jit's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or generating a kernel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The problem lies outside the support matrix of this kernel.
    ///
    /// Callers are expected to fall back to a different implementation.
    #[error("Unsupported 1x1 convolution: {reason}")]
    Unsupported {
        /// Why the problem was rejected
        reason: UnsupportedReason,
    },

    /// Invalid argument provided to the planner
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },
}

impl Error {
    /// Create an unsupported-problem error
    pub fn unsupported(reason: UnsupportedReason) -> Self {
        Self::Unsupported { reason }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Returns the rejection reason if this is an `Unsupported` error
    pub fn unsupported_reason(&self) -> Option<&UnsupportedReason> {
        match self {
            Self::Unsupported { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Typed reason attached to [`Error::Unsupported`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnsupportedReason {
    /// A required instruction-set extension is not available
    #[error("instruction set extension {0} is not available")]
    MissingIsa(IsaExtension),
    /// Grouped convolutions are not handled
    #[error("grouped convolution ({groups} groups)")]
    Grouped {
        /// Requested number of groups
        groups: usize,
    },
    /// An operand is not in the layout this kernel requires
    #[error("{operand} layout must be {expected}, got {got}")]
    Layout {
        /// Offending operand
        operand: Operand,
        /// Required layout
        expected: MemoryFormat,
        /// Layout supplied by the caller
        got: MemoryFormat,
    },
    /// A spatial filter dimension is not 1
    #[error("filter must be 1x1, got {kh}x{kw}")]
    FilterSize {
        /// Filter height
        kh: usize,
        /// Filter width
        kw: usize,
    },
    /// Non-unit stride or non-zero padding
    #[error("requires unit stride and no padding, got strides {strides:?} padding {padding:?}")]
    StrideOrPadding {
        /// Strides (height, width)
        strides: [usize; 2],
        /// Top/left padding
        padding: [usize; 2],
    },
    /// Channel counts are not multiples of the SIMD width
    #[error("channels must be multiples of {simd_w}, got ic={ic} oc={oc}")]
    ChannelBlocking {
        /// Input channels per group
        ic: usize,
        /// Output channels per group
        oc: usize,
        /// Required channel multiple
        simd_w: usize,
    },
    /// No numeric variant accepts this combination of data types
    #[error("no variant for data types src={src} weights={weights} dst={dst}")]
    DataTypes {
        /// Source (or diff-source) type
        src: DataType,
        /// Weights type
        weights: DataType,
        /// Destination (or diff-destination) type
        dst: DataType,
    },
    /// Activation fusion is only available for forward directions
    #[error("activation fusion is not available for {0}")]
    Activation(Direction),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_display() {
        let err = Error::unsupported(UnsupportedReason::FilterSize { kh: 3, kw: 3 });
        assert_eq!(
            err.to_string(),
            "Unsupported 1x1 convolution: filter must be 1x1, got 3x3"
        );
        assert!(matches!(
            err.unsupported_reason(),
            Some(UnsupportedReason::FilterSize { kh: 3, kw: 3 })
        ));
    }

    #[test]
    fn test_reason_messages() {
        let cases = [
            (
                UnsupportedReason::Grouped { groups: 2 },
                "grouped convolution (2 groups)",
            ),
            (
                UnsupportedReason::StrideOrPadding {
                    strides: [2, 1],
                    padding: [0, 0],
                },
                "requires unit stride and no padding, got strides [2, 1] padding [0, 0]",
            ),
            (
                UnsupportedReason::ChannelBlocking {
                    ic: 24,
                    oc: 16,
                    simd_w: 16,
                },
                "channels must be multiples of 16, got ic=24 oc=16",
            ),
        ];
        for (reason, msg) in cases {
            assert_eq!(reason.to_string(), msg);
        }
    }

    #[test]
    fn test_invalid_argument_has_no_reason() {
        let err = Error::invalid_argument("nthreads", "must be at least 1");
        assert!(err.unsupported_reason().is_none());
        assert_eq!(
            err.to_string(),
            "Invalid argument 'nthreads': must be at least 1"
        );
    }
}

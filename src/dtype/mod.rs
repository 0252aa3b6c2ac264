//! Element types understood by the planner
//!
//! Only `F32`, `I16` and `I32` are accepted by a numeric variant; the others exist so
//! callers can describe their tensors faithfully and receive a typed rejection.

use std::fmt;

/// Data types of convolution operands
///
/// Discriminants group the families: floats 0-9, signed ints 10-19, unsigned ints
/// 20-29.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum DataType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point
    F32 = 1,
    /// 16-bit floating point (IEEE 754)
    F16 = 2,
    /// 16-bit brain floating point
    BF16 = 3,
    /// 32-bit signed integer (accumulator type of the dot-product variant)
    I32 = 11,
    /// 16-bit signed integer (input type of the dot-product variant)
    I16 = 12,
    /// 8-bit signed integer
    I8 = 13,
    /// 8-bit unsigned integer
    U8 = 23,
}

impl DataType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 | Self::I16 => 2,
            Self::I8 | Self::U8 => 1,
        }
    }

    /// Returns true if this is a floating point type
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F64 | Self::F32 | Self::F16 | Self::BF16)
    }

    /// Short name used in diagnostics
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::I32 => "s32",
            Self::I16 => "s16",
            Self::I8 => "s8",
            Self::U8 => "u8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::I32.size_in_bytes(), 4);
        assert_eq!(DataType::I16.size_in_bytes(), 2);
        assert_eq!(DataType::U8.size_in_bytes(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::I16.to_string(), "s16");
        assert!(DataType::BF16.is_float());
        assert!(!DataType::I32.is_float());
    }
}

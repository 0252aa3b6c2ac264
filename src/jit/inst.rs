//! Register-level vector instruction set
//!
//! The instruction set mirrors the AVX-512 subset the kernels need: 32 vector registers
//! of 16 × 32-bit lanes, 8 mask registers, a handful of named general registers, and
//! compare/test flags consumed by conditional jumps.

use std::fmt;

/// Lanes per vector register
pub const VLEN: usize = 16;

/// Number of vector registers
pub const NUM_VREGS: usize = 32;

/// General-purpose registers, named by their role in the kernel
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GReg {
    /// Broadcast operand of the current load tile
    BcastData,
    /// Load operand of the current load tile
    LoadData,
    /// Output of the current load tile
    OutputData,
    /// Bias of the current load tile
    BiasData,
    /// Remaining load work
    LoadLoopWork,
    /// Broadcast work of one call
    BcastLoopWork,
    /// Reduction work of one call
    ReduceLoopWork,
    /// Reduction position flags
    ReducePosFlag,
    /// Bytes between output load tiles (weight gradient)
    OutputStride,
    /// Broadcast pointer inside the reduce loop
    AuxBcastData,
    /// Broadcast pointer of the current broadcast step
    Aux1BcastData,
    /// Load pointer inside the reduce loop
    AuxLoadData,
    /// Output pointer of the current broadcast step
    AuxOutputData,
    /// Broadcast loop counter
    BcastLoopIter,
    /// Reduce loop counter
    ReduceLoopIter,
}

impl GReg {
    /// Number of general registers
    pub const COUNT: usize = 15;

    /// Register file index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Assembly name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BcastData => "bcast",
            Self::LoadData => "load",
            Self::OutputData => "output",
            Self::BiasData => "bias",
            Self::LoadLoopWork => "load_work",
            Self::BcastLoopWork => "bcast_work",
            Self::ReduceLoopWork => "reduce_work",
            Self::ReducePosFlag => "flags",
            Self::OutputStride => "out_stride",
            Self::AuxBcastData => "aux_bcast",
            Self::Aux1BcastData => "aux1_bcast",
            Self::AuxLoadData => "aux_load",
            Self::AuxOutputData => "aux_output",
            Self::BcastLoopIter => "bcast_iter",
            Self::ReduceLoopIter => "reduce_iter",
        }
    }
}

impl fmt::Display for GReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vector register `zmm0..zmm31`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u8);

impl VReg {
    /// Register `zmm{index}`
    ///
    /// # Panics
    ///
    /// Panics if `index >= 32`.
    #[inline]
    pub const fn new(index: usize) -> Self {
        assert!(index < NUM_VREGS, "vector register index out of range");
        Self(index as u8)
    }

    /// Register file index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The register `n` places above this one
    #[inline]
    pub const fn offset(self, n: usize) -> Self {
        Self::new(self.0 as usize + n)
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zmm{}", self.0)
    }
}

/// Mask register `k0..k7`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KReg(pub u8);

impl fmt::Display for KReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Memory operand `[base + index * scale + disp]`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mem {
    /// Base register
    pub base: GReg,
    /// Optional scaled index register
    pub index: Option<(GReg, usize)>,
    /// Byte displacement
    pub disp: isize,
}

impl Mem {
    /// `[base + disp]`
    #[inline]
    pub const fn new(base: GReg, disp: isize) -> Self {
        Self {
            base,
            index: None,
            disp,
        }
    }

    /// `[base + index * scale + disp]`; a zero scale drops the index
    #[inline]
    pub const fn indexed(base: GReg, index: GReg, scale: usize, disp: isize) -> Self {
        Self {
            base,
            index: if scale == 0 { None } else { Some((index, scale)) },
            disp,
        }
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base)?;
        if let Some((index, scale)) = self.index {
            write!(f, " + {index}*{scale}")?;
        }
        if self.disp != 0 {
            write!(f, " + {:#x}", self.disp)?;
        }
        f.write_str("]")
    }
}

/// Call descriptor fields readable with [`Inst::LoadArg`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgField {
    /// Broadcast operand pointer
    BcastData,
    /// Load operand pointer
    LoadData,
    /// Output pointer
    OutputData,
    /// Bias pointer
    BiasData,
    /// Load work
    LoadDim,
    /// Broadcast work
    BcastDim,
    /// Reduction work
    ReduceDim,
    /// Flag word
    Flags,
    /// Output stride
    OutputStride,
}

impl ArgField {
    /// Descriptor field name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BcastData => "bcast_data",
            Self::LoadData => "load_data",
            Self::OutputData => "output_data",
            Self::BiasData => "bias_data",
            Self::LoadDim => "load_dim",
            Self::BcastDim => "bcast_dim",
            Self::ReduceDim => "reduce_dim",
            Self::Flags => "flags",
            Self::OutputStride => "output_stride",
        }
    }
}

/// Jump label
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Label table index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

/// Jump condition over the last compare, test or arithmetic result
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cond {
    /// Unconditional
    Always,
    /// `lhs == rhs`
    Eq,
    /// `lhs != rhs`
    Ne,
    /// `lhs < rhs`
    Lt,
    /// `lhs <= rhs`
    Le,
    /// `lhs > rhs`
    Gt,
    /// `lhs >= rhs`
    Ge,
    /// Result is zero
    Zero,
    /// Result is non-zero
    NotZero,
}

impl Cond {
    /// Evaluate against flags `(lhs, rhs)`; arithmetic and test set `rhs = 0`
    #[inline]
    pub fn holds(self, lhs: isize, rhs: isize) -> bool {
        match self {
            Self::Always => true,
            Self::Eq | Self::Zero => lhs == rhs,
            Self::Ne | Self::NotZero => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }

    const fn mnemonic(self) -> &'static str {
        match self {
            Self::Always => "jmp",
            Self::Eq => "je",
            Self::Ne => "jne",
            Self::Lt => "jl",
            Self::Le => "jle",
            Self::Gt => "jg",
            Self::Ge => "jge",
            Self::Zero => "jz",
            Self::NotZero => "jnz",
        }
    }
}

/// Lane interpretation for arithmetic on accumulators
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    /// f32 lanes
    F32,
    /// i32 lanes, wrapping arithmetic
    I32,
}

/// Prefetch locality
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrefetchHint {
    /// Into L1
    L1,
    /// Into L2
    L2,
}

/// One instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Inst {
    /// `dst = descriptor.field`
    LoadArg {
        /// Destination
        dst: GReg,
        /// Field read
        field: ArgField,
    },
    /// `dst = src`
    Mov {
        /// Destination
        dst: GReg,
        /// Source
        src: GReg,
    },
    /// `dst += imm`, sets flags from the result
    AddImm {
        /// Destination
        dst: GReg,
        /// Immediate
        imm: isize,
    },
    /// `dst -= imm`, sets flags from the result
    SubImm {
        /// Destination
        dst: GReg,
        /// Immediate
        imm: isize,
    },
    /// `dst += src`, sets flags from the result
    AddReg {
        /// Destination
        dst: GReg,
        /// Source
        src: GReg,
    },
    /// Compare `lhs` with `imm`
    CmpImm {
        /// Register compared
        lhs: GReg,
        /// Immediate
        imm: isize,
    },
    /// Set flags from `reg & imm`
    TestImm {
        /// Register tested
        reg: GReg,
        /// Bit mask
        imm: isize,
    },
    /// Jump to `target` if `cond` holds
    Jump {
        /// Condition
        cond: Cond,
        /// Destination
        target: Label,
    },
    /// `dst = 0`
    VZero {
        /// Destination
        dst: VReg,
    },
    /// `dst = [mem]` (64 bytes)
    VLoad {
        /// Destination
        dst: VReg,
        /// Source
        mem: Mem,
    },
    /// Every lane of `dst` set to `bits`
    VBroadcastImm {
        /// Destination
        dst: VReg,
        /// Lane bit pattern
        bits: u32,
    },
    /// `acc += src * broadcast(f32 [mem])`
    VFmaBcast {
        /// Accumulator
        acc: VReg,
        /// Vector operand
        src: VReg,
        /// Scalar operand
        mem: Mem,
    },
    /// `acc += src[i] * f32 [mem + 4i]` for `i` in `0..4`
    V4Fma {
        /// Accumulator
        acc: VReg,
        /// First of four consecutive vector operands
        src: VReg,
        /// First of four consecutive scalars
        mem: Mem,
    },
    /// `acc += dot2(src[i], s16x2 [mem + 4i])` for `i` in `0..4`
    V4DpWssd {
        /// Accumulator
        acc: VReg,
        /// First of four consecutive s16-pair operands
        src: VReg,
        /// First of four consecutive s16 pairs
        mem: Mem,
    },
    /// `dst += [mem]`
    VAddMem {
        /// Destination
        dst: VReg,
        /// Source
        mem: Mem,
        /// Lane type
        lane: Lane,
    },
    /// `mask = a < b`, per lane
    VCmpLt {
        /// Destination mask
        mask: KReg,
        /// Left operand
        a: VReg,
        /// Right operand
        b: VReg,
        /// Lane type
        lane: Lane,
    },
    /// `dst = a * b` in lanes selected by `mask`, others unchanged
    VMulMasked {
        /// Destination
        dst: VReg,
        /// Lane selector
        mask: KReg,
        /// Left operand
        a: VReg,
        /// Right operand
        b: VReg,
        /// Lane type
        lane: Lane,
    },
    /// `[mem] = src`
    VStore {
        /// Destination
        mem: Mem,
        /// Source
        src: VReg,
    },
    /// `[mem] = src`, bypassing the cache
    VStoreNt {
        /// Destination
        mem: Mem,
        /// Source
        src: VReg,
    },
    /// Prefetch the line holding `[mem]`
    Prefetch {
        /// Address
        mem: Mem,
        /// Cache level
        hint: PrefetchHint,
    },
    /// Return to the caller
    Ret,
}

impl Inst {
    /// Returns true for instructions that touch memory through a vector access
    pub fn is_vector_memory(&self) -> bool {
        matches!(
            self,
            Self::VLoad { .. }
                | Self::VFmaBcast { .. }
                | Self::V4Fma { .. }
                | Self::V4DpWssd { .. }
                | Self::VAddMem { .. }
                | Self::VStore { .. }
                | Self::VStoreNt { .. }
        )
    }

    /// Returns true for multiply-accumulate instructions
    pub fn is_mac(&self) -> bool {
        matches!(
            self,
            Self::VFmaBcast { .. } | Self::V4Fma { .. } | Self::V4DpWssd { .. }
        )
    }
}

fn lane_suffix(lane: Lane, float: &'static str, int: &'static str) -> &'static str {
    match lane {
        Lane::F32 => float,
        Lane::I32 => int,
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LoadArg { dst, field } => write!(f, "mov {dst}, [param.{}]", field.as_str()),
            Self::Mov { dst, src } => write!(f, "mov {dst}, {src}"),
            Self::AddImm { dst, imm } => write!(f, "add {dst}, {imm}"),
            Self::SubImm { dst, imm } => write!(f, "sub {dst}, {imm}"),
            Self::AddReg { dst, src } => write!(f, "add {dst}, {src}"),
            Self::CmpImm { lhs, imm } => write!(f, "cmp {lhs}, {imm}"),
            Self::TestImm { reg, imm } => write!(f, "test {reg}, {imm:#x}"),
            Self::Jump { cond, target } => write!(f, "{} {target}", cond.mnemonic()),
            Self::VZero { dst } => write!(f, "vpxord {dst}, {dst}, {dst}"),
            Self::VLoad { dst, mem } => write!(f, "vmovups {dst}, {mem}"),
            Self::VBroadcastImm { dst, bits } => write!(f, "vbroadcastss {dst}, {bits:#010x}"),
            Self::VFmaBcast { acc, src, mem } => write!(f, "vfmadd231ps {acc}, {src}, {mem}{{1to16}}"),
            Self::V4Fma { acc, src, mem } => {
                write!(f, "v4fmaddps {acc}, {src}-{}, {mem}", src.offset(3))
            }
            Self::V4DpWssd { acc, src, mem } => {
                write!(f, "vp4dpwssd {acc}, {src}-{}, {mem}", src.offset(3))
            }
            Self::VAddMem { dst, mem, lane } => {
                write!(f, "{} {dst}, {dst}, {mem}", lane_suffix(lane, "vaddps", "vpaddd"))
            }
            Self::VCmpLt { mask, a, b, lane } => {
                write!(f, "{} {mask}, {a}, {b}, lt", lane_suffix(lane, "vcmpps", "vpcmpd"))
            }
            Self::VMulMasked { dst, mask, a, b, lane } => write!(
                f,
                "{} {dst}{{{mask}}}, {a}, {b}",
                lane_suffix(lane, "vmulps", "vpmulld")
            ),
            Self::VStore { mem, src } => write!(f, "vmovups {mem}, {src}"),
            Self::VStoreNt { mem, src } => write!(f, "vmovntps {mem}, {src}"),
            Self::Prefetch { mem, hint } => match hint {
                PrefetchHint::L1 => write!(f, "prefetcht0 {mem}"),
                PrefetchHint::L2 => write!(f, "prefetcht1 {mem}"),
            },
            Self::Ret => f.write_str("ret"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cond_holds() {
        assert!(Cond::Le.holds(0, 0));
        assert!(Cond::Gt.holds(5, 0));
        assert!(Cond::Zero.holds(0, 0));
        assert!(Cond::NotZero.holds(4, 0));
        assert!(!Cond::Ge.holds(15, 16));
        assert!(Cond::Always.holds(-1, 7));
    }

    #[test]
    fn test_mem_display() {
        let m = Mem::indexed(GReg::AuxOutputData, GReg::OutputStride, 2, 0x40);
        assert_eq!(m.to_string(), "[aux_output + out_stride*2 + 0x40]");
        assert_eq!(Mem::indexed(GReg::AuxOutputData, GReg::OutputStride, 0, 0).index, None);
    }

    #[test]
    fn test_inst_display() {
        let fma = Inst::VFmaBcast {
            acc: VReg::new(3),
            src: VReg::new(28),
            mem: Mem::new(GReg::AuxBcastData, 4),
        };
        assert_eq!(fma.to_string(), "vfmadd231ps zmm3, zmm28, [aux_bcast + 0x4]{1to16}");
        assert!(fma.is_mac());
        assert!(fma.is_vector_memory());
    }

    #[test]
    #[should_panic(expected = "vector register index out of range")]
    fn test_vreg_range() {
        let _ = VReg::new(32);
    }
}

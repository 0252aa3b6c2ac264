//! Portable executor for generated programs

use super::asm::Program;
use super::inst::{ArgField, GReg, Inst, Lane, Mem, PrefetchHint, VLEN, VReg, NUM_VREGS};
use super::kernel::CallDescriptor;
use std::ptr;

type Vector = [u32; VLEN];

/// Register state of one invocation, kept on the caller's stack
struct Machine {
    gpr: [usize; GReg::COUNT],
    vec: [Vector; NUM_VREGS],
    mask: [u16; 8],
    flags: (isize, isize),
}

impl Machine {
    fn new() -> Self {
        Self {
            gpr: [0; GReg::COUNT],
            vec: [[0; VLEN]; NUM_VREGS],
            mask: [0; 8],
            flags: (0, 0),
        }
    }

    #[inline]
    fn g(&self, r: GReg) -> usize {
        self.gpr[r.index()]
    }

    #[inline]
    fn set_g(&mut self, r: GReg, value: usize) {
        self.gpr[r.index()] = value;
    }

    #[inline]
    fn v(&self, r: VReg) -> Vector {
        self.vec[r.index()]
    }

    #[inline]
    fn f32s(&self, r: VReg) -> [f32; VLEN] {
        bytemuck::cast(self.vec[r.index()])
    }

    #[inline]
    fn set_f32s(&mut self, r: VReg, lanes: [f32; VLEN]) {
        self.vec[r.index()] = bytemuck::cast(lanes);
    }

    #[inline]
    fn i32s(&self, r: VReg) -> [i32; VLEN] {
        bytemuck::cast(self.vec[r.index()])
    }

    #[inline]
    fn set_i32s(&mut self, r: VReg, lanes: [i32; VLEN]) {
        self.vec[r.index()] = bytemuck::cast(lanes);
    }

    #[inline]
    fn addr(&self, mem: Mem) -> usize {
        let mut at = self.g(mem.base);
        if let Some((index, scale)) = mem.index {
            at = at.wrapping_add(self.g(index).wrapping_mul(scale));
        }
        at.wrapping_add_signed(mem.disp)
    }

    /// Set flags from an arithmetic result
    #[inline]
    fn set_result(&mut self, value: usize) {
        self.flags = (value as isize, 0);
    }
}

fn arg(desc: &CallDescriptor, field: ArgField) -> usize {
    match field {
        ArgField::BcastData => desc.bcast_data as usize,
        ArgField::LoadData => desc.load_data as usize,
        ArgField::OutputData => desc.output_data as usize,
        ArgField::BiasData => desc.bias_data as usize,
        ArgField::LoadDim => desc.load_dim,
        ArgField::BcastDim => desc.bcast_dim,
        ArgField::ReduceDim => desc.reduce_dim,
        ArgField::Flags => desc.flags,
        ArgField::OutputStride => desc.output_stride,
    }
}

#[inline]
unsafe fn read_vector(at: usize) -> Vector {
    // SAFETY: caller guarantees 64 readable bytes at `at`
    unsafe { ptr::read_unaligned(at as *const Vector) }
}

#[inline]
unsafe fn write_vector(at: usize, value: Vector) {
    // SAFETY: caller guarantees 64 writable bytes at `at`
    unsafe { ptr::write_unaligned(at as *mut Vector, value) }
}

#[inline]
unsafe fn read_f32(at: usize) -> f32 {
    // SAFETY: caller guarantees 4 readable bytes at `at`
    unsafe { ptr::read_unaligned(at as *const f32) }
}

#[inline]
unsafe fn read_i16_pair(at: usize) -> [i16; 2] {
    // SAFETY: caller guarantees 4 readable bytes at `at`
    unsafe { ptr::read_unaligned(at as *const [i16; 2]) }
}

#[inline]
#[allow(unused_unsafe)]
fn prefetch(at: usize, hint: PrefetchHint) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_MM_HINT_T0, _MM_HINT_T1, _mm_prefetch};
        let p = at as *const i8;
        // SAFETY: prefetch never faults, whatever the address
        unsafe {
            match hint {
                PrefetchHint::L1 => _mm_prefetch::<_MM_HINT_T0>(p),
                PrefetchHint::L2 => _mm_prefetch::<_MM_HINT_T1>(p),
            }
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (at, hint);
    }
}

/// Run `program` against `desc`
///
/// # Safety
///
/// Every address the program forms from `desc` must be valid for the access made
/// through it; see [`super::EmittedKernel::execute`].
pub(crate) unsafe fn run(program: &Program, desc: &CallDescriptor) {
    let insts = program.insts();
    let mut m = Machine::new();
    let mut pc = 0;

    while let Some(&inst) = insts.get(pc) {
        pc += 1;
        match inst {
            Inst::LoadArg { dst, field } => m.set_g(dst, arg(desc, field)),
            Inst::Mov { dst, src } => m.set_g(dst, m.g(src)),
            Inst::AddImm { dst, imm } => {
                let value = m.g(dst).wrapping_add_signed(imm);
                m.set_g(dst, value);
                m.set_result(value);
            }
            Inst::SubImm { dst, imm } => {
                let value = m.g(dst).wrapping_add_signed(imm.wrapping_neg());
                m.set_g(dst, value);
                m.set_result(value);
            }
            Inst::AddReg { dst, src } => {
                let value = m.g(dst).wrapping_add(m.g(src));
                m.set_g(dst, value);
                m.set_result(value);
            }
            Inst::CmpImm { lhs, imm } => m.flags = (m.g(lhs) as isize, imm),
            Inst::TestImm { reg, imm } => m.flags = ((m.g(reg) as isize) & imm, 0),
            Inst::Jump { cond, target } => {
                if cond.holds(m.flags.0, m.flags.1) {
                    pc = program.target(target);
                }
            }
            Inst::VZero { dst } => m.vec[dst.index()] = [0; VLEN],
            Inst::VLoad { dst, mem } => {
                // SAFETY: operand validity is the caller's contract
                let value = unsafe { read_vector(m.addr(mem)) };
                m.vec[dst.index()] = value;
            }
            Inst::VBroadcastImm { dst, bits } => m.vec[dst.index()] = [bits; VLEN],
            Inst::VFmaBcast { acc, src, mem } => {
                // SAFETY: as above
                let scalar = unsafe { read_f32(m.addr(mem)) };
                let b = m.f32s(src);
                let mut a = m.f32s(acc);
                for (a, b) in a.iter_mut().zip(b) {
                    *a = b.mul_add(scalar, *a);
                }
                m.set_f32s(acc, a);
            }
            Inst::V4Fma { acc, src, mem } => {
                let base = m.addr(mem);
                let mut a = m.f32s(acc);
                for i in 0..4 {
                    // SAFETY: as above
                    let scalar = unsafe { read_f32(base.wrapping_add(4 * i)) };
                    let b = m.f32s(src.offset(i));
                    for (a, b) in a.iter_mut().zip(b) {
                        *a = b.mul_add(scalar, *a);
                    }
                }
                m.set_f32s(acc, a);
            }
            Inst::V4DpWssd { acc, src, mem } => {
                let base = m.addr(mem);
                let mut a = m.i32s(acc);
                for i in 0..4 {
                    // SAFETY: as above
                    let [p0, p1] = unsafe { read_i16_pair(base.wrapping_add(4 * i)) };
                    let words: [i16; 2 * VLEN] = bytemuck::cast(m.v(src.offset(i)));
                    for (lane, a) in a.iter_mut().enumerate() {
                        let dot = (i32::from(words[2 * lane]) * i32::from(p0))
                            .wrapping_add(i32::from(words[2 * lane + 1]) * i32::from(p1));
                        *a = a.wrapping_add(dot);
                    }
                }
                m.set_i32s(acc, a);
            }
            Inst::VAddMem { dst, mem, lane } => {
                // SAFETY: as above
                let other = unsafe { read_vector(m.addr(mem)) };
                match lane {
                    Lane::F32 => {
                        let b: [f32; VLEN] = bytemuck::cast(other);
                        let mut a = m.f32s(dst);
                        for (a, b) in a.iter_mut().zip(b) {
                            *a += b;
                        }
                        m.set_f32s(dst, a);
                    }
                    Lane::I32 => {
                        let b: [i32; VLEN] = bytemuck::cast(other);
                        let mut a = m.i32s(dst);
                        for (a, b) in a.iter_mut().zip(b) {
                            *a = a.wrapping_add(b);
                        }
                        m.set_i32s(dst, a);
                    }
                }
            }
            Inst::VCmpLt { mask, a, b, lane } => {
                let lt: [bool; VLEN] = match lane {
                    Lane::F32 => {
                        let (x, y) = (m.f32s(a), m.f32s(b));
                        std::array::from_fn(|i| x[i] < y[i])
                    }
                    Lane::I32 => {
                        let (x, y) = (m.i32s(a), m.i32s(b));
                        std::array::from_fn(|i| x[i] < y[i])
                    }
                };
                m.mask[usize::from(mask.0)] = lt
                    .iter()
                    .enumerate()
                    .fold(0u16, |bits, (i, &set)| bits | (u16::from(set) << i));
            }
            Inst::VMulMasked {
                dst,
                mask,
                a,
                b,
                lane,
            } => {
                let bits = m.mask[usize::from(mask.0)];
                match lane {
                    Lane::F32 => {
                        let (x, y, mut out) = (m.f32s(a), m.f32s(b), m.f32s(dst));
                        for i in 0..VLEN {
                            if (bits >> i) & 1 == 1 {
                                out[i] = x[i] * y[i];
                            }
                        }
                        m.set_f32s(dst, out);
                    }
                    Lane::I32 => {
                        let (x, y, mut out) = (m.i32s(a), m.i32s(b), m.i32s(dst));
                        for i in 0..VLEN {
                            if (bits >> i) & 1 == 1 {
                                out[i] = x[i].wrapping_mul(y[i]);
                            }
                        }
                        m.set_i32s(dst, out);
                    }
                }
            }
            Inst::VStore { mem, src } | Inst::VStoreNt { mem, src } => {
                // SAFETY: as above
                unsafe { write_vector(m.addr(mem), m.v(src)) };
            }
            Inst::Prefetch { mem, hint } => prefetch(m.addr(mem), hint),
            Inst::Ret => return,
        }
    }
}

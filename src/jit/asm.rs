//! Instruction buffer with label binding

use super::inst::{ArgField, Cond, GReg, Inst, Label, Mem, VReg};
use std::fmt::Write as _;

/// Append-only instruction buffer
#[derive(Debug, Default)]
pub struct Assembler {
    insts: Vec<Inst>,
    labels: Vec<Option<usize>>,
}

impl Assembler {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions emitted so far
    #[inline]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Returns true if nothing was emitted
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Allocate an unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind `label` to the next instruction
    ///
    /// # Panics
    ///
    /// Panics if `label` is already bound.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.index()];
        assert!(slot.is_none(), "label {label} bound twice");
        *slot = Some(self.insts.len());
    }

    /// Append one instruction
    #[inline]
    pub fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    // ------------------------------------------------------------------------
    // Scalar helpers
    // ------------------------------------------------------------------------

    /// `dst = descriptor.field`
    pub fn load_arg(&mut self, dst: GReg, field: ArgField) {
        self.emit(Inst::LoadArg { dst, field });
    }

    /// `dst = src`
    pub fn mov(&mut self, dst: GReg, src: GReg) {
        self.emit(Inst::Mov { dst, src });
    }

    /// `dst += imm`
    pub fn add(&mut self, dst: GReg, imm: usize) {
        self.emit(Inst::AddImm {
            dst,
            imm: to_imm(imm),
        });
    }

    /// `dst -= imm`
    pub fn sub(&mut self, dst: GReg, imm: usize) {
        self.emit(Inst::SubImm {
            dst,
            imm: to_imm(imm),
        });
    }

    /// `dst += src`
    pub fn add_reg(&mut self, dst: GReg, src: GReg) {
        self.emit(Inst::AddReg { dst, src });
    }

    /// Compare `lhs` with `imm`
    pub fn cmp(&mut self, lhs: GReg, imm: usize) {
        self.emit(Inst::CmpImm {
            lhs,
            imm: to_imm(imm),
        });
    }

    /// Set flags from `reg & imm`
    pub fn test(&mut self, reg: GReg, imm: usize) {
        self.emit(Inst::TestImm {
            reg,
            imm: to_imm(imm),
        });
    }

    /// Jump to `target` if `cond` holds
    pub fn jump(&mut self, cond: Cond, target: Label) {
        self.emit(Inst::Jump { cond, target });
    }

    /// Unconditional jump
    pub fn jmp(&mut self, target: Label) {
        self.jump(Cond::Always, target);
    }

    // ------------------------------------------------------------------------
    // Vector helpers
    // ------------------------------------------------------------------------

    /// `dst = 0`
    pub fn vzero(&mut self, dst: VReg) {
        self.emit(Inst::VZero { dst });
    }

    /// `dst = [mem]`
    pub fn vload(&mut self, dst: VReg, mem: Mem) {
        self.emit(Inst::VLoad { dst, mem });
    }

    /// Seal the buffer into a program
    ///
    /// # Panics
    ///
    /// Panics if a jump targets a label that was never bound.
    pub fn finish(self) -> Program {
        let labels: Vec<usize> = self
            .labels
            .iter()
            .map(|slot| slot.unwrap_or(usize::MAX))
            .collect();
        for inst in &self.insts {
            if let Inst::Jump { target, .. } = inst {
                assert!(
                    labels[target.index()] != usize::MAX,
                    "jump to unbound label {target}"
                );
            }
        }
        Program {
            insts: self.insts,
            labels,
        }
    }
}

/// Immediates are byte counts or work sizes, far below `isize::MAX`
#[inline]
fn to_imm(value: usize) -> isize {
    debug_assert!(value <= isize::MAX as usize);
    value as isize
}

/// A sealed instruction stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    insts: Vec<Inst>,
    labels: Vec<usize>,
}

impl Program {
    /// Instructions in emission order
    #[inline]
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    /// Number of instructions
    #[inline]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Returns true for an empty program
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Instruction index a label is bound to
    #[inline]
    pub fn target(&self, label: Label) -> usize {
        self.labels[label.index()]
    }

    /// Assembly-like listing, one instruction per line with bound labels
    pub fn listing(&self) -> String {
        let mut bound: Vec<Vec<usize>> = vec![Vec::new(); self.insts.len() + 1];
        for (label, &at) in self.labels.iter().enumerate() {
            if at != usize::MAX {
                bound[at].push(label);
            }
        }
        let mut out = String::new();
        for (at, labels) in bound.iter().enumerate() {
            for label in labels {
                let _ = writeln!(out, ".L{label}:");
            }
            if let Some(inst) = self.insts.get(at) {
                let _ = writeln!(out, "    {inst}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve() {
        let mut asm = Assembler::new();
        let top = asm.new_label();
        let out = asm.new_label();
        asm.bind(top);
        asm.sub(GReg::ReduceLoopIter, 1);
        asm.jump(Cond::Gt, top);
        asm.jmp(out);
        asm.bind(out);
        asm.emit(Inst::Ret);
        let program = asm.finish();
        assert_eq!(program.len(), 4);
        assert_eq!(program.target(top), 0);
        assert_eq!(program.target(out), 3);
        assert!(program.listing().contains(".L0:\n    sub reduce_iter, 1"));
    }

    #[test]
    #[should_panic(expected = "jump to unbound label")]
    fn test_unbound_label_panics() {
        let mut asm = Assembler::new();
        let nowhere = asm.new_label();
        asm.jmp(nowhere);
        let _ = asm.finish();
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn test_double_bind_panics() {
        let mut asm = Assembler::new();
        let l = asm.new_label();
        asm.bind(l);
        asm.bind(l);
    }
}

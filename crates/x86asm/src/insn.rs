//! Instruction encoders.
//!
//! Encodings follow the Intel SDM. Every method appends to the current
//! section of the [`Assembler`]; methods that can produce an invalid
//! encoding return `Result` so the caller sees an [`AsmError`] instead of
//! bad bytes.

use alloc::format;

use crate::code::{Assembler, Label};
use crate::error::AsmError;
use crate::reg::{Gp, SReg};

/// REX prefix from the W/R/X/B extension bits.
fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (u8::from(w) << 3) | (u8::from(r) << 2) | (u8::from(x) << 1) | u8::from(b)
}

/// ModRM byte.
fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | (reg << 3) | rm
}

/// SIB byte.
fn sib(scale: u8, index: u8, base: u8) -> u8 {
    (scale << 6) | (index << 3) | base
}

/// A memory operand.
#[derive(Debug, Clone, Copy)]
pub enum Mem {
    /// `[label + disp]`, RIP-relative, resolved at [`Assembler::resolve`].
    Label {
        /// The referenced label.
        label: Label,
        /// Constant byte offset from the label.
        disp: i32,
    },
    /// `[base]` with no displacement.
    Base {
        /// The base register.
        base: Gp,
    },
    /// `[base + index * 8]`.
    BaseIndex8 {
        /// The base register.
        base: Gp,
        /// The index register, scaled by 8.
        index: Gp,
    },
    /// `[addr]`, an absolute address encoded as a sign-extended
    /// 32-bit displacement.
    Abs {
        /// The absolute address.
        addr: u64,
    },
}

impl Mem {
    /// `[label]`.
    #[must_use]
    pub fn label(label: Label) -> Self {
        Self::Label { label, disp: 0 }
    }

    /// `[label + disp]`.
    #[must_use]
    pub fn label_disp(label: Label, disp: i32) -> Self {
        Self::Label { label, disp }
    }

    /// `[base]`.
    #[must_use]
    pub fn base(base: Gp) -> Self {
        Self::Base { base }
    }

    /// `[base + index * 8]`.
    #[must_use]
    pub fn base_index8(base: Gp, index: Gp) -> Self {
        Self::BaseIndex8 { base, index }
    }

    /// `[addr]`.
    #[must_use]
    pub fn abs(addr: u64) -> Self {
        Self::Abs { addr }
    }
}

impl Assembler {
    /// Encodes `opcode` with ModRM/SIB addressing for `mem`, with `reg`
    /// in the ModRM reg field. `rex_w` selects 64-bit operand size.
    fn encode_mem(
        &mut self,
        rex_w: bool,
        opcode: &[u8],
        reg: u8,
        reg_ext: bool,
        mem: Mem,
    ) -> Result<(), AsmError> {
        match mem {
            Mem::Label { label, disp } => {
                if rex_w || reg_ext {
                    self.emit(&[rex(rex_w, reg_ext, false, false)]);
                }
                self.emit(opcode);
                // mod=00 rm=101: RIP-relative disp32
                self.emit(&[modrm(0b00, reg, 0b101)]);
                self.emit_rel32_fixup(label, i64::from(disp));
                Ok(())
            }
            Mem::Base { base } => {
                if base == Gp::Rbp || base == Gp::R13 {
                    // mod=00 with rm=101 means RIP-relative, not [rbp]
                    return Err(AsmError::new("[rbp]/[r13] base requires a displacement"));
                }
                if rex_w || reg_ext || base.extended() {
                    self.emit(&[rex(rex_w, reg_ext, false, base.extended())]);
                }
                self.emit(opcode);
                if base == Gp::Rsp || base == Gp::R12 {
                    // rm=100 escapes to a SIB byte
                    self.emit(&[modrm(0b00, reg, 0b100), sib(0, 0b100, base.low3())]);
                } else {
                    self.emit(&[modrm(0b00, reg, base.low3())]);
                }
                Ok(())
            }
            Mem::BaseIndex8 { base, index } => {
                if index == Gp::Rsp {
                    return Err(AsmError::new("rsp cannot be an index register"));
                }
                if base == Gp::Rbp || base == Gp::R13 {
                    return Err(AsmError::new("[rbp]/[r13] base requires a displacement"));
                }
                if rex_w || reg_ext || index.extended() || base.extended() {
                    self.emit(&[rex(rex_w, reg_ext, index.extended(), base.extended())]);
                }
                self.emit(opcode);
                self.emit(&[modrm(0b00, reg, 0b100), sib(3, index.low3(), base.low3())]);
                Ok(())
            }
            Mem::Abs { addr } => {
                let disp = i32::try_from(addr as i64).or_else(|_| {
                    // High-half addresses whose low 32 bits sign-extend back
                    // to the same value are encodable.
                    let low = addr as u32 as i32;
                    if i64::from(low) as u64 == addr {
                        Ok(low)
                    } else {
                        Err(AsmError::new(format!(
                            "absolute address {addr:#x} is not sign-extended 32-bit"
                        )))
                    }
                })?;
                if rex_w || reg_ext {
                    self.emit(&[rex(rex_w, reg_ext, false, false)]);
                }
                self.emit(opcode);
                // mod=00 rm=100, SIB base=101 index=100: [disp32] absolute
                self.emit(&[modrm(0b00, reg, 0b100), sib(0, 0b100, 0b101)]);
                self.emit(&disp.to_le_bytes());
                Ok(())
            }
        }
    }

    /// Group-1 ALU op (`or`/`add`/`sub`/`cmp`…) with a 64-bit register
    /// destination, picking the sign-extended imm8 form when possible.
    fn alu_r64_imm(&mut self, ext: u8, dst: Gp, imm: i32) {
        let rex_byte = rex(true, false, false, dst.extended());
        if let Ok(imm8) = i8::try_from(imm) {
            self.emit(&[rex_byte, 0x83, modrm(0b11, ext, dst.low3()), imm8 as u8]);
        } else {
            self.emit(&[rex_byte, 0x81, modrm(0b11, ext, dst.low3())]);
            self.emit(&imm.to_le_bytes());
        }
    }

    // -----------------------------------------------------------------
    // Moves
    // -----------------------------------------------------------------

    /// `mov r64, imm` — sign-extended 32-bit immediate form when the value
    /// fits, `movabs` otherwise.
    pub fn mov_r64_imm(&mut self, dst: Gp, imm: i64) {
        let rex_byte = rex(true, false, false, dst.extended());
        if let Ok(imm32) = i32::try_from(imm) {
            self.emit(&[rex_byte, 0xc7, modrm(0b11, 0, dst.low3())]);
            self.emit(&imm32.to_le_bytes());
        } else {
            self.emit(&[rex_byte, 0xb8 + dst.low3()]);
            self.emit(&imm.to_le_bytes());
        }
    }

    /// `mov r32, imm32` — zero-extends into the full register.
    pub fn mov_r32_imm(&mut self, dst: Gp, imm: u32) {
        if dst.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0xb8 + dst.low3()]);
        self.emit(&imm.to_le_bytes());
    }

    /// `mov r16, imm16`.
    pub fn mov_r16_imm(&mut self, dst: Gp, imm: u16) {
        self.emit(&[0x66]);
        if dst.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0xb8 + dst.low3()]);
        self.emit(&imm.to_le_bytes());
    }

    /// `mov r8, imm8` for the low-byte registers `al`/`cl`/`dl`/`bl`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for registers whose 8-bit form needs a REX
    /// prefix; the trampoline has no use for them.
    pub fn mov_r8_imm(&mut self, dst: Gp, imm: u8) -> Result<(), AsmError> {
        if (dst as u8) >= 4 {
            return Err(AsmError::new("8-bit immediate moves support al/cl/dl/bl only"));
        }
        self.emit(&[0xb0 + dst.low3(), imm]);
        Ok(())
    }

    /// `mov qword ptr [mem], src`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unencodable memory operands.
    pub fn mov_qword(&mut self, mem: Mem, src: Gp) -> Result<(), AsmError> {
        self.encode_mem(true, &[0x89], src.low3(), src.extended(), mem)
    }

    /// `mov dword ptr [mem], src`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unencodable memory operands.
    pub fn mov_dword(&mut self, mem: Mem, src: Gp) -> Result<(), AsmError> {
        self.encode_mem(false, &[0x89], src.low3(), src.extended(), mem)
    }

    /// `lea dst, [mem]`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unencodable memory operands.
    pub fn lea(&mut self, dst: Gp, mem: Mem) -> Result<(), AsmError> {
        self.encode_mem(true, &[0x8d], dst.low3(), dst.extended(), mem)
    }

    /// `mov sreg, r32` — loads a segment register from a selector.
    pub fn mov_sreg(&mut self, dst: SReg, src: Gp) {
        if src.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0x8e, modrm(0b11, dst as u8, src.low3())]);
    }

    /// `mov cr3, r64` — loads the page table root.
    pub fn mov_cr3(&mut self, src: Gp) {
        if src.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0x0f, 0x22, modrm(0b11, 3, src.low3())]);
    }

    // -----------------------------------------------------------------
    // ALU
    // -----------------------------------------------------------------

    /// `or r64, imm`.
    pub fn or_r64_imm(&mut self, dst: Gp, imm: i32) {
        self.alu_r64_imm(1, dst, imm);
    }

    /// `add r64, imm`.
    pub fn add_r64_imm(&mut self, dst: Gp, imm: i32) {
        self.alu_r64_imm(0, dst, imm);
    }

    /// `sub r64, imm`.
    pub fn sub_r64_imm(&mut self, dst: Gp, imm: i32) {
        self.alu_r64_imm(5, dst, imm);
    }

    /// `cmp r32, imm`.
    pub fn cmp_r32_imm(&mut self, dst: Gp, imm: i32) {
        if dst.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        if let Ok(imm8) = i8::try_from(imm) {
            self.emit(&[0x83, modrm(0b11, 7, dst.low3()), imm8 as u8]);
        } else {
            self.emit(&[0x81, modrm(0b11, 7, dst.low3())]);
            self.emit(&imm.to_le_bytes());
        }
    }

    /// `xor r64, r64`.
    pub fn xor_r64(&mut self, dst: Gp, src: Gp) {
        self.emit(&[
            rex(true, src.extended(), false, dst.extended()),
            0x31,
            modrm(0b11, src.low3(), dst.low3()),
        ]);
    }

    /// `inc r32`.
    pub fn inc_r32(&mut self, dst: Gp) {
        if dst.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0xff, modrm(0b11, 0, dst.low3())]);
    }

    // -----------------------------------------------------------------
    // Stack and control flow
    // -----------------------------------------------------------------

    /// `push r64`.
    pub fn push_r64(&mut self, src: Gp) {
        if src.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0x50 + src.low3()]);
    }

    /// `retfq` — 64-bit far return, pops RIP then CS.
    pub fn retfq(&mut self) {
        self.emit(&[0x48, 0xcb]);
    }

    /// `jl label`: short form for bound labels in range, `rel32` with a
    /// fixup otherwise.
    pub fn jl(&mut self, label: Label) {
        self.jcc_or_jmp(Some(0x7c), label);
    }

    /// `jmp label`: short form for bound labels in range, `rel32` with a
    /// fixup otherwise.
    pub fn jmp(&mut self, label: Label) {
        self.jcc_or_jmp(None, label);
    }

    /// `jmp r64`.
    pub fn jmp_r64(&mut self, target: Gp) {
        if target.extended() {
            self.emit(&[rex(false, false, false, true)]);
        }
        self.emit(&[0xff, modrm(0b11, 4, target.low3())]);
    }

    /// `cc` is the short-form opcode of a conditional branch, or `None`
    /// for an unconditional `jmp`.
    fn jcc_or_jmp(&mut self, cc: Option<u8>, label: Label) {
        // Short-encode backward branches in range, the way a one-pass
        // assembler does for already-bound labels.
        if let Some((section, offset)) = self.labels[label.0].bound {
            if section == self.cursor {
                let disp = offset as i64 - (self.offset() as i64 + 2);
                if let Ok(disp8) = i8::try_from(disp) {
                    self.emit(&[cc.unwrap_or(0xeb), disp8 as u8]);
                    return;
                }
            }
        }
        match cc {
            Some(op) => self.emit(&[0x0f, op + 0x10]),
            None => self.emit(&[0xe9]),
        }
        self.emit_rel32_fixup(label, 0);
    }

    // -----------------------------------------------------------------
    // System
    // -----------------------------------------------------------------

    /// `cli`.
    pub fn cli(&mut self) {
        self.emit(&[0xfa]);
    }

    /// `hlt`.
    pub fn hlt(&mut self) {
        self.emit(&[0xf4]);
    }

    /// `int3`.
    pub fn int3(&mut self) {
        self.emit(&[0xcc]);
    }

    /// `lgdt [mem]`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unencodable memory operands.
    pub fn lgdt(&mut self, mem: Mem) -> Result<(), AsmError> {
        self.encode_mem(false, &[0x0f, 0x01], 2, false, mem)
    }

    /// `in al, dx`.
    pub fn in_al_dx(&mut self) {
        self.emit(&[0xec]);
    }

    /// `out dx, al`.
    pub fn out_dx_al(&mut self) {
        self.emit(&[0xee]);
    }

    /// `out dx, eax`.
    pub fn out_dx_eax(&mut self) {
        self.emit(&[0xef]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Assembler;

    fn text(asm: &Assembler) -> &[u8] {
        asm.section_bytes(asm.text_section())
    }

    #[test]
    fn mov_r64_imm_small() {
        let mut asm = Assembler::new(0);
        asm.mov_r64_imm(Gp::Rdi, 31);
        assert_eq!(text(&asm), &[0x48, 0xc7, 0xc7, 0x1f, 0, 0, 0]);
    }

    #[test]
    fn mov_r64_imm_large_uses_movabs() {
        let mut asm = Assembler::new(0);
        asm.mov_r64_imm(Gp::Rax, 0x1_0000_0000);
        assert_eq!(
            text(&asm),
            &[0x48, 0xb8, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn mov_r32_imm() {
        let mut asm = Assembler::new(0);
        asm.mov_r32_imm(Gp::Rax, 0x18);
        assert_eq!(text(&asm), &[0xb8, 0x18, 0, 0, 0]);
    }

    #[test]
    fn mov_r16_and_r8_imm() {
        let mut asm = Assembler::new(0);
        asm.mov_r16_imm(Gp::Rdx, 0x3da);
        asm.mov_r8_imm(Gp::Rax, 0x20).unwrap();
        assert_eq!(text(&asm), &[0x66, 0xba, 0xda, 0x03, 0xb0, 0x20]);
    }

    #[test]
    fn mov_r8_rejects_high_registers() {
        let mut asm = Assembler::new(0);
        assert!(asm.mov_r8_imm(Gp::Rsp, 0).is_err());
    }

    #[test]
    fn alu_forms() {
        let mut asm = Assembler::new(0);
        asm.or_r64_imm(Gp::Rax, 3);
        asm.or_r64_imm(Gp::Rax, 0x83); // 0x83 > i8::MAX, long form
        asm.add_r64_imm(Gp::Rax, 0x1000);
        asm.sub_r64_imm(Gp::Rsp, 4);
        asm.xor_r64(Gp::Rax, Gp::Rax);
        asm.inc_r32(Gp::Rcx);
        asm.cmp_r32_imm(Gp::Rcx, 2048);
        assert_eq!(
            text(&asm),
            &[
                0x48, 0x83, 0xc8, 0x03, // or rax, 3
                0x48, 0x81, 0xc8, 0x83, 0, 0, 0, // or rax, 0x83
                0x48, 0x81, 0xc0, 0x00, 0x10, 0, 0, // add rax, 0x1000
                0x48, 0x83, 0xec, 0x04, // sub rsp, 4
                0x48, 0x31, 0xc0, // xor rax, rax
                0xff, 0xc1, // inc ecx
                0x81, 0xf9, 0x00, 0x08, 0, 0, // cmp ecx, 2048
            ]
        );
    }

    #[test]
    fn segment_and_control_registers() {
        let mut asm = Assembler::new(0);
        asm.mov_sreg(SReg::Ss, Gp::Rax);
        asm.mov_sreg(SReg::Ds, Gp::Rax);
        asm.mov_cr3(Gp::Rax);
        assert_eq!(text(&asm), &[0x8e, 0xd0, 0x8e, 0xd8, 0x0f, 0x22, 0xd8]);
    }

    #[test]
    fn push_retfq_jmp_reg() {
        let mut asm = Assembler::new(0);
        asm.push_r64(Gp::Rax);
        asm.retfq();
        asm.jmp_r64(Gp::Rax);
        assert_eq!(text(&asm), &[0x50, 0x48, 0xcb, 0xff, 0xe0]);
    }

    #[test]
    fn store_through_rsp_and_sib() {
        let mut asm = Assembler::new(0);
        asm.mov_dword(Mem::base(Gp::Rsp), Gp::Rcx).unwrap();
        asm.mov_qword(Mem::base_index8(Gp::R11, Gp::Rcx), Gp::Rax)
            .unwrap();
        asm.mov_qword(Mem::base_index8(Gp::R12, Gp::Rcx), Gp::Rax)
            .unwrap();
        assert_eq!(
            text(&asm),
            &[
                0x89, 0x0c, 0x24, // mov [rsp], ecx
                0x49, 0x89, 0x04, 0xcb, // mov [r11+rcx*8], rax
                0x49, 0x89, 0x04, 0xcc, // mov [r12+rcx*8], rax
            ]
        );
    }

    #[test]
    fn rbp_base_is_rejected() {
        let mut asm = Assembler::new(0);
        assert!(asm.mov_dword(Mem::base(Gp::Rbp), Gp::Rax).is_err());
        assert!(
            asm.mov_qword(Mem::base_index8(Gp::R13, Gp::Rcx), Gp::Rax)
                .is_err()
        );
    }

    #[test]
    fn lea_absolute_sign_extended() {
        let mut asm = Assembler::new(0);
        asm.lea(Gp::Rax, Mem::abs(0xffff_ffff_8020_0000)).unwrap();
        assert_eq!(
            text(&asm),
            &[0x48, 0x8d, 0x04, 0x25, 0x00, 0x00, 0x20, 0x80]
        );
    }

    #[test]
    fn lea_absolute_out_of_range() {
        let mut asm = Assembler::new(0);
        assert!(asm.lea(Gp::Rax, Mem::abs(0x1_0000_0000)).is_err());
    }

    #[test]
    fn rip_relative_store_resolves() {
        let mut asm = Assembler::new(0x10_0000);
        let mark = asm.new_named_label("mark");
        asm.mov_dword(Mem::label(mark), Gp::Rdi).unwrap(); // 6 bytes
        asm.hlt();
        asm.bind(mark).unwrap(); // at offset 7
        asm.dq(0);
        asm.resolve().unwrap();

        // disp32 = target(7) - end_of_insn(6) = 1
        assert_eq!(
            &text(&asm)[..7],
            &[0x89, 0x3d, 0x01, 0x00, 0x00, 0x00, 0xf4]
        );
    }

    #[test]
    fn rip_relative_with_displacement() {
        let mut asm = Assembler::new(0x10_0000);
        let table = asm.new_named_label("table");
        asm.mov_qword(Mem::label_disp(table, 8 * 511), Gp::Rax).unwrap(); // 7 bytes
        asm.bind(table).unwrap();
        asm.resolve().unwrap();

        // disp32 = target(7) + 4088 - end_of_insn(7) = 4088
        assert_eq!(
            text(&asm),
            &[0x48, 0x89, 0x05, 0xf8, 0x0f, 0x00, 0x00]
        );
    }

    #[test]
    fn lgdt_rip_relative() {
        let mut asm = Assembler::new(0);
        let gdtp = asm.new_named_label("GDTP");
        asm.lgdt(Mem::label(gdtp)).unwrap();
        asm.bind(gdtp).unwrap();
        asm.resolve().unwrap();
        assert_eq!(text(&asm), &[0x0f, 0x01, 0x15, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn short_backward_branches() {
        let mut asm = Assembler::new(0);
        let top = asm.new_label();
        asm.bind(top).unwrap();
        asm.hlt();
        asm.jmp(top);
        assert_eq!(text(&asm), &[0xf4, 0xeb, 0xfd]);

        let mut asm = Assembler::new(0);
        let top = asm.new_label();
        asm.bind(top).unwrap();
        asm.inc_r32(Gp::Rcx);
        asm.jl(top);
        assert_eq!(text(&asm), &[0xff, 0xc1, 0x7c, 0xfc]);
    }

    #[test]
    fn long_forward_branch_resolves() {
        let mut asm = Assembler::new(0);
        let fwd = asm.new_label();
        asm.jmp(fwd); // e9 rel32, 5 bytes
        asm.db_repeat(0x90, 3);
        asm.bind(fwd).unwrap();
        asm.hlt();
        asm.resolve().unwrap();
        assert_eq!(
            text(&asm),
            &[0xe9, 0x03, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0xf4]
        );
    }

    #[test]
    fn far_backward_conditional_uses_rel32() {
        let mut asm = Assembler::new(0);
        let top = asm.new_label();
        asm.bind(top).unwrap();
        asm.db_repeat(0x90, 0x100);
        asm.jl(top);
        asm.resolve().unwrap();
        let t = text(&asm);
        assert_eq!(&t[0x100..0x102], &[0x0f, 0x8c]);
        let disp = i32::from_le_bytes(t[0x102..0x106].try_into().unwrap());
        assert_eq!(disp, -(0x106));
    }

    #[test]
    fn port_io() {
        let mut asm = Assembler::new(0);
        asm.in_al_dx();
        asm.out_dx_al();
        asm.out_dx_eax();
        assert_eq!(text(&asm), &[0xec, 0xee, 0xef]);
    }
}

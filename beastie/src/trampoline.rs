//! The long-mode boot trampoline.
//!
//! kexec drops us at 1 MiB with the old kernel gone; this code has to
//! stand up its own world before it can call the FreeBSD kernel: a GDT
//! with flat 64-bit code and data segments, a private stack, and page
//! tables mapping the low 4 GiB identity and the kernel's high half.
//! It then performs any graphics reset, builds the FreeBSD boot call
//! frame, and jumps to `btext`.
//!
//! The image is laid out as a 4 KiB `.text` section at the load base
//! (0x100000) and a read-only `.data` section one page in, holding the
//! GDT, the page table pages, and the stack.
//!
//! Stack state at the kernel entry, 32-bit slots in memory order:
//!
//! ```text
//! [rsp+0] = 0 (fake return address)
//! [rsp+4] = modulep
//! [rsp+8] = kernend
//! ```

use anyhow::Result;
use beastie_x86asm::{AsmError, Assembler, Gp, Label, Mem, SReg, SectionId};

use crate::gfx;
use crate::layout::BOOT_PHYS;
use crate::platform::FbInfo;

const PAGE_SIZE: usize = 4096;
const STACK_SIZE: usize = PAGE_SIZE;

/// Kernel code segment selector (third GDT slot).
const SEL_KCODE: i64 = 0x10;

/// Kernel data segment selector (fourth GDT slot).
const SEL_KDATA: u32 = 0x18;

/// 2 MiB page entry flags: PS | RW | P.
const PDE_PS_RW_P: i32 = 0x83;

/// Table entry flags: RW | P.
const PTE_RW_P: i32 = 3;

struct Labels {
    entry: Label,
    gdt: Label,
    gdtp: Label,
    stack_top: Label,
    pml4t: Label,
    pdpt: [Label; 2],
    pdt: [Label; 2],
}

/// Builder for the trampoline image.
pub struct Trampoline {
    asm: Assembler,
    data: SectionId,
    labels: Labels,
    btext: u64,
    modulep: u64,
    kernend: u64,
    gfxcode: Vec<u8>,
}

impl Trampoline {
    /// Prepares a trampoline for the given kernel entry and metadata
    /// placement, generating graphics reset code if `fb` needs it.
    ///
    /// # Errors
    ///
    /// Fails when the graphics probe or its code generation fails.
    ///
    /// # Panics
    ///
    /// Panics unless `modulep < kernend`.
    pub fn new(btext: u64, modulep: u64, kernend: u64, fb: &FbInfo) -> Result<Self> {
        let gfxcode = gfx::reset_code_for(fb)?;
        Ok(Self::with_reset_code(btext, modulep, kernend, gfxcode))
    }

    /// As [`Trampoline::new`], with the graphics reset bytes supplied
    /// directly.
    pub(crate) fn with_reset_code(
        btext: u64,
        modulep: u64,
        kernend: u64,
        gfxcode: Vec<u8>,
    ) -> Self {
        assert!(modulep < kernend, "modulep must precede kernend");

        let mut asm = Assembler::new(BOOT_PHYS);
        asm.set_virtual_size(asm.text_section(), 0x1000);
        let data = asm.new_section(".data", 0x1000, 0xf000);

        let labels = Labels {
            entry: asm.new_named_label("entry"),
            gdt: asm.new_named_label("GDT"),
            gdtp: asm.new_named_label("GDTP"),
            stack_top: asm.new_named_label("stackTop"),
            pml4t: asm.new_named_label("PML4T"),
            pdpt: [
                asm.new_named_label("PDPT[0]"),
                asm.new_named_label("PDPT[1]"),
            ],
            pdt: [asm.new_named_label("PDT[0]"), asm.new_named_label("PDT[1]")],
        };

        Self {
            asm,
            data,
            labels,
            btext,
            modulep,
            kernend,
            gfxcode,
        }
    }

    /// Emits both sections and resolves all label references.
    ///
    /// # Errors
    ///
    /// Surfaces assembler validation errors.
    pub fn assemble(&mut self) -> Result<(), AsmError> {
        self.emit_text()?;
        self.emit_data()?;
        self.asm.resolve()
    }

    fn emit_text(&mut self) -> Result<(), AsmError> {
        let text = self.asm.text_section();
        self.asm.switch_section(text);

        let l1 = self.asm.new_label();
        let lp_pd0 = self.asm.new_label();
        let lp_pd1 = self.asm.new_label();
        let lp_hlt = self.asm.new_label();

        self.asm.bind(self.labels.entry)?;
        self.asm.cli();

        // Build the GDT pointer in place and load it: limit first, then
        // the base, which is only known symbolically.
        self.asm.mov_r64_imm(Gp::Rdi, 4 * 8 - 1);
        self.asm.mov_dword(Mem::label(self.labels.gdtp), Gp::Rdi)?;
        self.asm.lea(Gp::Rsi, Mem::label(self.labels.gdt))?;
        self.asm
            .mov_qword(Mem::label_disp(self.labels.gdtp, 2), Gp::Rsi)?;
        self.asm.lgdt(Mem::label(self.labels.gdtp))?;

        // Reload CS with a far return: push the selector and the
        // continuation address, retfq pops both.
        self.asm.mov_r64_imm(Gp::Rax, SEL_KCODE);
        self.asm.push_r64(Gp::Rax);
        self.asm.lea(Gp::Rax, Mem::label(l1))?;
        self.asm.push_r64(Gp::Rax);
        self.asm.retfq();
        self.asm.bind(l1)?;

        // Data segments.
        self.asm.mov_r32_imm(Gp::Rax, SEL_KDATA);
        for sreg in [SReg::Ss, SReg::Ds, SReg::Es, SReg::Fs, SReg::Gs] {
            self.asm.mov_sreg(sreg, Gp::Rax);
        }

        // Our own stack; whatever kexec left in rsp is not ours to keep.
        self.asm.lea(Gp::Rsp, Mem::label(self.labels.stack_top))?;

        // Level 4, low mapping.
        self.asm.lea(Gp::Rax, Mem::label(self.labels.pdpt[0]))?;
        self.asm.or_r64_imm(Gp::Rax, PTE_RW_P);
        self.asm.mov_qword(Mem::label(self.labels.pml4t), Gp::Rax)?;

        // Level 3, low mapping: four consecutive directory pages.
        self.asm.lea(Gp::Rax, Mem::label(self.labels.pdt[0]))?;
        self.asm.or_r64_imm(Gp::Rax, PTE_RW_P);
        self.asm
            .mov_qword(Mem::label(self.labels.pdpt[0]), Gp::Rax)?;
        for i in 1..4 {
            self.asm.add_r64_imm(Gp::Rax, 0x1000);
            self.asm
                .mov_qword(Mem::label_disp(self.labels.pdpt[0], 8 * i), Gp::Rax)?;
        }

        // Level 2, low mapping: 2048 entries of 2 MiB pages cover 4 GiB
        // identity.
        self.asm.xor_r64(Gp::Rax, Gp::Rax);
        self.asm.xor_r64(Gp::Rcx, Gp::Rcx);
        self.asm.or_r64_imm(Gp::Rax, PDE_PS_RW_P);
        self.asm.bind(lp_pd0)?;
        self.asm.lea(Gp::R11, Mem::label(self.labels.pdt[0]))?;
        self.asm
            .mov_qword(Mem::base_index8(Gp::R11, Gp::Rcx), Gp::Rax)?;
        self.asm.add_r64_imm(Gp::Rax, 0x20_0000);
        self.asm.inc_r32(Gp::Rcx);
        self.asm.cmp_r32_imm(Gp::Rcx, 512 * 4);
        self.asm.jl(lp_pd0);

        // Level 4, high mapping.
        self.asm.lea(Gp::Rax, Mem::label(self.labels.pdpt[1]))?;
        self.asm.or_r64_imm(Gp::Rax, PTE_RW_P);
        self.asm
            .mov_qword(Mem::label_disp(self.labels.pml4t, 8 * 511), Gp::Rax)?;

        // Level 3, high mapping: the last two slots map the kernel half.
        self.asm.lea(Gp::Rax, Mem::label(self.labels.pdt[1]))?;
        self.asm.or_r64_imm(Gp::Rax, PTE_RW_P);
        self.asm
            .mov_qword(Mem::label_disp(self.labels.pdpt[1], 8 * 510), Gp::Rax)?;
        self.asm.add_r64_imm(Gp::Rax, 0x1000);
        self.asm
            .mov_qword(Mem::label_disp(self.labels.pdpt[1], 8 * 511), Gp::Rax)?;

        // Level 2, high mapping: entry 0 maps physical 0 for zero-page
        // compatibility.
        self.asm.mov_r64_imm(Gp::Rax, 0);
        self.asm.or_r64_imm(Gp::Rax, PDE_PS_RW_P);
        self.asm.mov_qword(Mem::label(self.labels.pdt[1]), Gp::Rax)?;

        // Level 2, high mapping: the rest walks physical memory from
        // 2 MiB up.
        self.asm.mov_r64_imm(Gp::Rax, 0x20_0000);
        self.asm.or_r64_imm(Gp::Rax, PDE_PS_RW_P);
        self.asm.mov_r64_imm(Gp::Rcx, 1);
        self.asm.bind(lp_pd1)?;
        self.asm.lea(Gp::R12, Mem::label(self.labels.pdt[1]))?;
        self.asm
            .mov_qword(Mem::base_index8(Gp::R12, Gp::Rcx), Gp::Rax)?;
        self.asm.add_r64_imm(Gp::Rax, 0x20_0000);
        self.asm.inc_r32(Gp::Rcx);
        self.asm.cmp_r32_imm(Gp::Rcx, 512 * 2);
        self.asm.jl(lp_pd1);

        // Switch to the new tables.
        self.asm.lea(Gp::Rax, Mem::label(self.labels.pml4t))?;
        self.asm.mov_cr3(Gp::Rax);

        // Graphics reset, if any.
        self.asm.embed(&self.gfxcode);

        // FreeBSD boot call frame: three 32-bit slots, pushed so memory
        // order is fake return address, modulep, kernend.
        self.asm.mov_r32_imm(Gp::Rax, 0);
        self.asm.mov_r32_imm(Gp::Rbx, self.modulep as u32);
        self.asm.mov_r32_imm(Gp::Rcx, self.kernend as u32);
        self.asm.sub_r64_imm(Gp::Rsp, 4);
        self.asm.mov_dword(Mem::base(Gp::Rsp), Gp::Rcx)?;
        self.asm.sub_r64_imm(Gp::Rsp, 4);
        self.asm.mov_dword(Mem::base(Gp::Rsp), Gp::Rbx)?;
        self.asm.sub_r64_imm(Gp::Rsp, 4);
        self.asm.mov_dword(Mem::base(Gp::Rsp), Gp::Rax)?;

        self.asm.lea(Gp::Rax, Mem::abs(self.btext))?;
        self.asm.jmp_r64(Gp::Rax);

        // Halt trap in case the kernel ever returns.
        self.asm.bind(lp_hlt)?;
        self.asm.hlt();
        self.asm.jmp(lp_hlt);
        self.asm.int3();

        Ok(())
    }

    fn emit_data(&mut self) -> Result<(), AsmError> {
        self.asm.switch_section(self.data);

        // GDT: two null slots, 64-bit kernel code, kernel data.
        self.asm.align(16);
        self.asm.bind(self.labels.gdt)?;
        self.asm.dq(0);
        self.asm.dq(0);
        self.asm.dq(0x00af_9a00_0000_ffff);
        self.asm.dq(0x00cf_9200_0000_ffff);

        // GDT pointer storage: u16 limit, u64 base, filled at run time.
        self.asm.align(16);
        self.asm.bind(self.labels.gdtp)?;
        self.asm.dw(0);
        self.asm.dq(0);

        // Page table memory. Each table must be page aligned and zeroed.
        self.asm.align(PAGE_SIZE);
        self.asm.bind(self.labels.pml4t)?;
        self.asm.db_repeat(0x00, PAGE_SIZE);
        self.asm.bind(self.labels.pdpt[0])?; // low
        self.asm.db_repeat(0x00, PAGE_SIZE);
        self.asm.bind(self.labels.pdpt[1])?; // high
        self.asm.db_repeat(0x00, PAGE_SIZE);
        self.asm.bind(self.labels.pdt[0])?; // low
        self.asm.db_repeat(0x00, 4 * PAGE_SIZE);
        self.asm.bind(self.labels.pdt[1])?; // high
        self.asm.db_repeat(0x00, 2 * PAGE_SIZE);
        // With 2 MiB pages the walk ends here; no PTE level.

        // The stack, top bound just past its page.
        self.asm.align(PAGE_SIZE);
        self.asm.db_repeat(0x00, STACK_SIZE);
        self.asm.bind(self.labels.stack_top)?;

        Ok(())
    }

    /// Flattens the assembled sections into the boot block image.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.asm.image()
    }

    /// Renders the section and label tables for `-D` output.
    #[must_use]
    pub fn dump(&self) -> String {
        let bar = "=========================================\n";
        let text_len = self.asm.section_bytes(self.asm.text_section()).len();
        let data_len = self.asm.section_bytes(self.data).len();
        format!(
            "{bar}btext       | {:016x}\n{}{bar}total = {} kbytes\n",
            self.btext,
            self.asm.dump(),
            (text_len + data_len) / 1024
        )
    }
}

//! Legacy VGA register reset.
//!
//! A full reprogramming of the sequencer, CRTC, graphics, and attribute
//! controllers back to a sane text mode, originally lifted from the Xen
//! VGA setup. The port/value table is a fixed contract; hardware that
//! needs it gets these exact writes. The current boot path only embeds
//! the VMware SVGA reset, but the sequence is kept for machines whose
//! VGA comes up scrambled after kexec.

use beastie_x86asm::{AsmError, Assembler, Gp};

/// One step of the reset sequence.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// `in al, <port>` — the attribute controller flip-flop reset reads.
    InB(u16),
    /// `out <port>, al` with an 8-bit value.
    OutB(u8, u16),
    /// 16-bit value loaded into `ax`, written to the port as `al`
    /// (index in the low byte, data in the high byte via two writes on
    /// real hardware; the low-byte write is what the table encodes).
    OutW(u16, u16),
}

use Step::{InB, OutB, OutW};

/// The register table, verbatim.
const VGA_RESET_SEQUENCE: &[Step] = &[
    InB(0x3da),
    OutB(0x00, 0x3c0),
    OutW(0x0300, 0x3c4),
    OutW(0x0001, 0x3c4),
    OutW(0x0302, 0x3c4),
    OutW(0x0003, 0x3c4),
    OutW(0x0204, 0x3c4),
    OutW(0x0e11, 0x3d4),
    OutW(0x5f00, 0x3d4),
    OutW(0x4f01, 0x3d4),
    OutW(0x5002, 0x3d4),
    OutW(0x8203, 0x3d4),
    OutW(0x5504, 0x3d4),
    OutW(0x8105, 0x3d4),
    OutW(0xbf06, 0x3d4),
    OutW(0x1f07, 0x3d4),
    OutW(0x0008, 0x3d4),
    OutW(0x4f09, 0x3d4),
    OutW(0x200a, 0x3d4),
    OutW(0x0e0b, 0x3d4),
    OutW(0x000c, 0x3d4),
    OutW(0x000d, 0x3d4),
    OutW(0x010e, 0x3d4),
    OutW(0xe00f, 0x3d4),
    OutW(0x9c10, 0x3d4),
    OutW(0x8e11, 0x3d4),
    OutW(0x8f12, 0x3d4),
    OutW(0x2813, 0x3d4),
    OutW(0x1f14, 0x3d4),
    OutW(0x9615, 0x3d4),
    OutW(0xb916, 0x3d4),
    OutW(0xa317, 0x3d4),
    OutW(0xff18, 0x3d4),
    OutW(0x0000, 0x3ce),
    OutW(0x0001, 0x3ce),
    OutW(0x0002, 0x3ce),
    OutW(0x0003, 0x3ce),
    OutW(0x0004, 0x3ce),
    OutW(0x1005, 0x3ce),
    OutW(0x0e06, 0x3ce),
    OutW(0x0007, 0x3ce),
    OutW(0xff08, 0x3ce),
    InB(0x3da),
    OutB(0x00, 0x3c0),
    OutB(0x00, 0x3c0),
    InB(0x3da),
    OutB(0x01, 0x3c0),
    OutB(0x01, 0x3c0),
    InB(0x3da),
    OutB(0x02, 0x3c0),
    OutB(0x02, 0x3c0),
    InB(0x3da),
    OutB(0x03, 0x3c0),
    OutB(0x03, 0x3c0),
    InB(0x3da),
    OutB(0x04, 0x3c0),
    OutB(0x04, 0x3c0),
    InB(0x3da),
    OutB(0x05, 0x3c0),
    OutB(0x05, 0x3c0),
    InB(0x3da),
    OutB(0x06, 0x3c0),
    OutB(0x14, 0x3c0),
    InB(0x3da),
    OutB(0x07, 0x3c0),
    OutB(0x07, 0x3c0),
    InB(0x3da),
    OutB(0x08, 0x3c0),
    OutB(0x38, 0x3c0),
    InB(0x3da),
    OutB(0x09, 0x3c0),
    OutB(0x39, 0x3c0),
    InB(0x3da),
    OutB(0x0a, 0x3c0),
    OutB(0x3a, 0x3c0),
    InB(0x3da),
    OutB(0x0b, 0x3c0),
    OutB(0x3b, 0x3c0),
    InB(0x3da),
    OutB(0x0c, 0x3c0),
    OutB(0x3c, 0x3c0),
    InB(0x3da),
    OutB(0x0d, 0x3c0),
    OutB(0x3d, 0x3c0),
    InB(0x3da),
    OutB(0x0e, 0x3c0),
    OutB(0x3e, 0x3c0),
    InB(0x3da),
    OutB(0x0f, 0x3c0),
    OutB(0x3f, 0x3c0),
    InB(0x3da),
    OutB(0x10, 0x3c0),
    OutB(0x0c, 0x3c0),
    InB(0x3da),
    OutB(0x11, 0x3c0),
    OutB(0x00, 0x3c0),
    InB(0x3da),
    OutB(0x12, 0x3c0),
    OutB(0x0f, 0x3c0),
    InB(0x3da),
    OutB(0x13, 0x3c0),
    OutB(0x08, 0x3c0),
    InB(0x3da),
    OutB(0x14, 0x3c0),
    OutB(0x00, 0x3c0),
    InB(0x3da),
    OutB(0x20, 0x3c0),
];

/// Emits the full VGA reset as position-independent machine code.
///
/// # Errors
///
/// Surfaces assembler validation errors.
pub fn legacy_reset_code() -> Result<Vec<u8>, AsmError> {
    let mut asm = Assembler::new(0);
    for step in VGA_RESET_SEQUENCE {
        match *step {
            InB(port) => {
                asm.mov_r16_imm(Gp::Rdx, port);
                asm.in_al_dx();
            }
            OutB(value, port) => {
                asm.mov_r16_imm(Gp::Rdx, port);
                asm.mov_r8_imm(Gp::Rax, value)?;
                asm.out_dx_al();
            }
            OutW(value, port) => {
                asm.mov_r16_imm(Gp::Rdx, port);
                asm.mov_r16_imm(Gp::Rax, value);
                asm.out_dx_al();
            }
        }
    }
    asm.resolve()?;
    Ok(asm.section_bytes(asm.text_section()).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_with_flip_flop_reset() {
        let code = legacy_reset_code().unwrap();
        // in al, 0x3da: mov dx, 0x3da; in al, dx
        assert_eq!(&code[..5], &[0x66, 0xba, 0xda, 0x03, 0xec]);
        // out 0x3c0, 0: mov dx, 0x3c0; mov al, 0; out dx, al
        assert_eq!(&code[5..12], &[0x66, 0xba, 0xc0, 0x03, 0xb0, 0x00, 0xee]);
    }

    #[test]
    fn word_steps_load_ax_and_write_al() {
        let code = legacy_reset_code().unwrap();
        // Third step is outw(0x0300, 0x3c4).
        let off = 5 + 7;
        assert_eq!(
            &code[off..off + 9],
            &[0x66, 0xba, 0xc4, 0x03, 0x66, 0xb8, 0x00, 0x03, 0xee]
        );
    }

    #[test]
    fn sequence_ends_enabling_the_display() {
        let code = legacy_reset_code().unwrap();
        // Last two steps: in al, 0x3da; out 0x3c0, 0x20.
        let tail = &code[code.len() - 12..];
        assert_eq!(tail[..5], [0x66, 0xba, 0xda, 0x03, 0xec]);
        assert_eq!(tail[5..], [0x66, 0xba, 0xc0, 0x03, 0xb0, 0x20, 0xee]);
    }

    #[test]
    fn emission_is_deterministic() {
        assert_eq!(legacy_reset_code().unwrap(), legacy_reset_code().unwrap());
    }
}

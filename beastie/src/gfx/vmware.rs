//! VMware SVGA II adapter support.
//!
//! The adapter is programmed through an index/value port pair at BAR0:
//! write a register index to the base port, then read or write the value
//! port one above it. The probe locates the device on the PCI bus via
//! sysfs and snapshots the live framebuffer registers; the reset emitter
//! generates the same register writes as position-independent machine
//! code for the trampoline.

use std::path::Path;

use anyhow::{Context, Result};
use beastie_x86asm::{AsmError, Assembler, Gp};

/// PCI vendor id of VMware.
const VENDOR_VMWARE: u32 = 0x15ad;

/// PCI device id of the SVGA II adapter.
const DEVICE_SVGAII: u32 = 0x0405;

/// Where the PCI bus is enumerated.
const PCI_DEVICES_PATH: &str = "/sys/bus/pci/devices";

/// Number of I/O ports claimed while talking to the adapter.
const IOPORT_SPAN: libc::c_ulong = 16;

/// SVGA register indexes.
#[expect(dead_code, reason = "full register block kept for reference")]
mod svga_reg {
    pub const ID: u32 = 0;
    pub const ENABLE: u32 = 1;
    pub const WIDTH: u32 = 2;
    pub const HEIGHT: u32 = 3;
    pub const MAX_WIDTH: u32 = 4;
    pub const MAX_HEIGHT: u32 = 5;
    pub const DEPTH: u32 = 6;
    pub const BITS_PER_PIXEL: u32 = 7;
    pub const PSEUDOCOLOR: u32 = 8;
    pub const RED_MASK: u32 = 9;
    pub const GREEN_MASK: u32 = 10;
    pub const BLUE_MASK: u32 = 11;
    pub const BYTES_PER_LINE: u32 = 12;
    pub const FB_START: u32 = 13;
    pub const FB_OFFSET: u32 = 14;
    pub const VRAM_SIZE: u32 = 15;
    pub const FB_SIZE: u32 = 16;
}

/// A probed VMware SVGA II adapter.
pub struct VmwareSvga {
    iostart: u16,
    present: bool,
    fbbase: u64,
    fbsize: u64,
}

/// `out dx, eax` port write.
unsafe fn outl(port: u16, value: u32) {
    // SAFETY: requires ioperm on the port; callers hold it.
    unsafe {
        core::arch::asm!(
            "out dx, eax",
            in("dx") port,
            in("eax") value,
            options(nomem, nostack, preserves_flags)
        );
    }
}

/// `in eax, dx` port read.
unsafe fn inl(port: u16) -> u32 {
    let value: u32;
    // SAFETY: requires ioperm on the port; callers hold it.
    unsafe {
        core::arch::asm!(
            "in eax, dx",
            in("dx") port,
            out("eax") value,
            options(nomem, nostack, preserves_flags)
        );
    }
    value
}

/// Reads a sysfs hex attribute such as `vendor` or `device`.
fn read_sysfs_hex(path: &Path) -> Result<u64> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("{}: read failed", path.display()))?;
    let text = text.trim();
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).with_context(|| format!("{}: not a hex value", path.display()))
}

/// Extracts the BAR0 base from a sysfs `resource` file (first line,
/// first field).
fn parse_resource_bar0(resource: &str) -> Option<u64> {
    let first = resource.lines().next()?;
    let start = first.split_whitespace().next()?;
    let digits = start.strip_prefix("0x").unwrap_or(start);
    u64::from_str_radix(digits, 16).ok()
}

impl VmwareSvga {
    /// Scans the PCI bus for the adapter; on a hit, claims its I/O ports
    /// and snapshots the framebuffer base and size registers.
    ///
    /// # Errors
    ///
    /// Fails when sysfs cannot be enumerated or port access is denied.
    pub fn probe() -> Result<Self> {
        let mut svga = Self {
            iostart: 0,
            present: false,
            fbbase: 0,
            fbsize: 0,
        };

        for entry in std::fs::read_dir(PCI_DEVICES_PATH)
            .with_context(|| format!("{PCI_DEVICES_PATH}: read failed"))?
        {
            let dir = entry?.path();
            let vendor = read_sysfs_hex(&dir.join("vendor"))? as u32 & 0xffff;
            let device = read_sysfs_hex(&dir.join("device"))? as u32 & 0xffff;
            if vendor != VENDOR_VMWARE || device != DEVICE_SVGAII {
                continue;
            }

            let resource = std::fs::read_to_string(dir.join("resource"))
                .with_context(|| format!("{}: read failed", dir.join("resource").display()))?;
            let bar0 = parse_resource_bar0(&resource)
                .with_context(|| format!("{}: malformed resource", dir.display()))?;
            svga.iostart = (bar0 & 0xffff) as u16;
            svga.present = true;
        }

        if svga.present {
            // SAFETY: requesting port permission, no memory involved.
            let rc = unsafe { libc::ioperm(libc::c_ulong::from(svga.iostart), IOPORT_SPAN, 1) };
            anyhow::ensure!(rc == 0, "ioperm({:#x}) denied", svga.iostart);
            svga.fbbase = u64::from(svga.read(svga_reg::FB_START));
            svga.fbsize = u64::from(svga.read(svga_reg::FB_SIZE));
        }

        Ok(svga)
    }

    /// Whether the adapter was found on the bus.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// The live framebuffer base read from the adapter.
    #[must_use]
    pub fn fb_base(&self) -> u64 {
        self.fbbase
    }

    /// Reads an SVGA register through the index/value port pair.
    fn read(&self, reg: u32) -> u32 {
        // SAFETY: probe() acquired ioperm for this port span.
        unsafe {
            outl(self.iostart, reg);
            inl(self.iostart + 1)
        }
    }

    /// Emits the mode reset sequence for the trampoline: disable, set
    /// width/height/bpp/pitch, re-enable.
    ///
    /// # Errors
    ///
    /// Surfaces assembler validation errors.
    pub fn assemble_reset(&self, width: u32, height: u32) -> Result<Vec<u8>, AsmError> {
        reset_code(self.iostart, width, height)
    }
}

impl Drop for VmwareSvga {
    fn drop(&mut self) {
        if self.present {
            // SAFETY: releasing the port span claimed in probe().
            unsafe {
                libc::ioperm(libc::c_ulong::from(self.iostart), IOPORT_SPAN, 0);
            }
        }
    }
}

/// Generates the register write sequence as machine code. Each write is
/// an `outl(reg, iostart)` followed by `outl(value, iostart + 1)`.
fn reset_code(iostart: u16, width: u32, height: u32) -> Result<Vec<u8>, AsmError> {
    let mut asm = Assembler::new(0);

    let mut outl = |asm: &mut Assembler, value: u32, port: u16| {
        asm.mov_r32_imm(Gp::Rax, value);
        asm.mov_r32_imm(Gp::Rdx, u32::from(port));
        asm.out_dx_eax();
    };
    let mut write = |asm: &mut Assembler, reg: u32, value: u32| {
        outl(asm, reg, iostart);
        outl(asm, value, iostart + 1);
    };

    write(&mut asm, svga_reg::ENABLE, 0);
    write(&mut asm, svga_reg::WIDTH, width);
    write(&mut asm, svga_reg::HEIGHT, height);
    write(&mut asm, svga_reg::BITS_PER_PIXEL, 32);
    write(&mut asm, svga_reg::BYTES_PER_LINE, height * 4);
    write(&mut asm, svga_reg::ENABLE, 1);

    asm.resolve()?;
    Ok(asm.section_bytes(asm.text_section()).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_code_is_six_register_writes() {
        let code = reset_code(0x1060, 1024, 768).unwrap();
        // Each outl is mov eax,imm (5) + mov edx,imm (5) + out (1);
        // two outls per register write, six writes.
        assert_eq!(code.len(), 6 * 2 * 11);

        // First write: index ENABLE to the base port...
        assert_eq!(&code[0..5], &[0xb8, 1, 0, 0, 0]); // mov eax, ENABLE
        assert_eq!(&code[5..10], &[0xba, 0x60, 0x10, 0, 0]); // mov edx, 0x1060
        assert_eq!(code[10], 0xef); // out dx, eax
        // ...then value 0 to the value port.
        assert_eq!(&code[11..16], &[0xb8, 0, 0, 0, 0]);
        assert_eq!(&code[16..21], &[0xba, 0x61, 0x10, 0, 0]);
    }

    #[test]
    fn reset_code_programs_resolution() {
        let code = reset_code(0x1060, 1024, 768).unwrap();
        // Write 2 (WIDTH) value: second outl of the second pair.
        let width_value = &code[22 + 11..22 + 16];
        assert_eq!(width_value, &[0xb8, 0, 4, 0, 0]); // 1024

        // BYTES_PER_LINE carries height * 4.
        let pitch_value = &code[4 * 22 + 11..4 * 22 + 16];
        assert_eq!(pitch_value, &[0xb8, 0, 12, 0, 0]); // 768 * 4 = 3072
    }

    #[test]
    fn bar0_parsing() {
        let resource = "0x0000000000001060 0x000000000000106f 0x0000000000040101\n\
                        0x00000000e8000000 0x00000000efffffff 0x0000000000042208\n";
        assert_eq!(parse_resource_bar0(resource), Some(0x1060));
        assert_eq!(parse_resource_bar0(""), None);
    }
}

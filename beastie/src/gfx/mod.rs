//! Graphics reset code emitters.
//!
//! Some framebuffer hardware must be reprogrammed before the new kernel's
//! console can draw; the reset is emitted as machine code and embedded in
//! the trampoline, since it has to run after this OS is gone. Exactly two
//! variants exist: the VMware SVGA II register dance, and a no-op for
//! everything else (EFI VGA and the Intel DRM framebuffers come up fine
//! on their own).

pub mod vga;
pub mod vmware;

use anyhow::Result;

use crate::debug::dprintln;
use crate::platform::FbInfo;
use vmware::VmwareSvga;

/// Framebuffer id string that selects the SVGA II emitter.
const VMWARE_FB_ID: &str = "vmwgfxdrmfb";

/// A graphics device that may need reset code in the trampoline.
pub enum GfxDevice {
    /// VMware SVGA II adapter, located on the PCI bus.
    VmwareSvgaII(VmwareSvga),
    /// Any other framebuffer; emits no reset code.
    NoOp {
        /// Framebuffer base, kept for diagnostics.
        base: u64,
    },
}

impl GfxDevice {
    /// Selects the emitter for a probed framebuffer. The choice is by
    /// driver id string only.
    ///
    /// # Errors
    ///
    /// Fails when the id calls for the SVGA II emitter but the PCI probe
    /// cannot run.
    pub fn for_framebuffer(fb: &FbInfo) -> Result<Self> {
        if fb.id == VMWARE_FB_ID {
            Ok(Self::VmwareSvgaII(VmwareSvga::probe()?))
        } else {
            Ok(Self::NoOp { base: fb.phys })
        }
    }

    /// Whether the matching hardware was actually found.
    #[must_use]
    pub fn is_present(&self) -> bool {
        match self {
            Self::VmwareSvgaII(svga) => svga.is_present(),
            Self::NoOp { .. } => false,
        }
    }

    /// The framebuffer base address.
    #[must_use]
    pub fn base(&self) -> u64 {
        match self {
            Self::VmwareSvgaII(svga) => svga.fb_base(),
            Self::NoOp { base } => *base,
        }
    }

    /// Emits the mode reset code for the given resolution; empty for the
    /// no-op variant.
    ///
    /// # Errors
    ///
    /// Surfaces assembler validation errors.
    pub fn assemble_reset(&self, width: u32, height: u32) -> Result<Vec<u8>> {
        match self {
            Self::VmwareSvgaII(svga) => Ok(svga.assemble_reset(width, height)?),
            Self::NoOp { .. } => Ok(Vec::new()),
        }
    }
}

/// Returns the reset bytes to embed in the trampoline for `fb`, at the
/// framebuffer's configured resolution.
///
/// # Errors
///
/// Fails on PCI probe or assembler errors.
pub fn reset_code_for(fb: &FbInfo) -> Result<Vec<u8>> {
    let device = GfxDevice::for_framebuffer(fb)?;
    if device.is_present() {
        dprintln!("gfx    base={:#x}", device.base());
    }
    device.assemble_reset(fb.width, fb.height)
}

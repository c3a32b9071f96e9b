//! Framebuffer probe via the Linux fbdev interface.
//!
//! Queries `/dev/fb0` with the two `FBIOGET_*SCREENINFO` ioctls and
//! extracts the fields at their ABI offsets. On an `"EFI VGA"`
//! framebuffer the physical base comes from the fixed screen info; other
//! drivers report an aperture there, so the legacy `screen_info` in the
//! boot parameters is used instead.

use std::os::fd::AsRawFd as _;

use anyhow::{Context, Result};

use super::bootparams::BootParams;
use super::FbInfo;

/// The probed framebuffer device.
const FB_PATH: &str = "/dev/fb0";

/// `FBIOGET_VSCREENINFO` ioctl request.
const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;

/// `FBIOGET_FSCREENINFO` ioctl request.
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;

/// Size of `struct fb_fix_screeninfo` (rounded up; the kernel writes
/// exactly its own size).
const FIX_INFO_SIZE: usize = 128;

/// Size of `struct fb_var_screeninfo` (rounded up).
const VAR_INFO_SIZE: usize = 192;

fn ne_u32(data: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(data[off..off + 4].try_into().unwrap())
}

fn ne_u64(data: &[u8], off: usize) -> u64 {
    u64::from_ne_bytes(data[off..off + 8].try_into().unwrap())
}

/// Fields lifted from `struct fb_fix_screeninfo`.
struct FixInfo {
    id: String,
    smem_start: u64,
    smem_len: u32,
}

/// Parses `fb_fix_screeninfo`: 16-byte id string, then the aperture.
fn parse_fix(raw: &[u8]) -> FixInfo {
    let id_bytes = &raw[..16];
    let id_len = id_bytes.iter().position(|&b| b == 0).unwrap_or(16);
    FixInfo {
        id: String::from_utf8_lossy(&id_bytes[..id_len]).into_owned(),
        smem_start: ne_u64(raw, 16),
        smem_len: ne_u32(raw, 24),
    }
}

/// Fields lifted from `struct fb_var_screeninfo`.
struct VarInfo {
    xres: u32,
    yres: u32,
    red_offset: u32,
    green_offset: u32,
    blue_offset: u32,
}

/// Parses `fb_var_screeninfo`: resolution, then the three
/// `fb_bitfield { offset, length, msb_right }` channel descriptions.
fn parse_var(raw: &[u8]) -> VarInfo {
    VarInfo {
        xres: ne_u32(raw, 0),
        yres: ne_u32(raw, 4),
        red_offset: ne_u32(raw, 32),
        green_offset: ne_u32(raw, 44),
        blue_offset: ne_u32(raw, 56),
    }
}

/// Builds the [`FbInfo`] from the parsed ioctl data, consulting the boot
/// parameters for the physical base when the driver is not `"EFI VGA"`.
fn assemble_fb_info(fix: FixInfo, var: VarInfo, legacy_lfb: impl FnOnce() -> Result<u64>) -> Result<FbInfo> {
    let phys = if fix.id == "EFI VGA" {
        fix.smem_start
    } else {
        legacy_lfb()?
    };
    Ok(FbInfo {
        id: fix.id,
        phys,
        size: u64::from(fix.smem_len),
        width: var.xres,
        height: var.yres,
        mask_red: 0xff << var.red_offset,
        mask_green: 0xff << var.green_offset,
        mask_blue: 0xff << var.blue_offset,
        mask_reserved: 0xff00_0000,
    })
}

/// Probes the first framebuffer device.
///
/// # Errors
///
/// Fails when `/dev/fb0` cannot be opened or the ioctls are rejected.
pub fn fetch_fb() -> Result<FbInfo> {
    let file = std::fs::File::open(FB_PATH).with_context(|| format!("{FB_PATH}: open failed"))?;
    let fd = file.as_raw_fd();

    let mut fix_raw = [0u8; FIX_INFO_SIZE];
    let mut var_raw = [0u8; VAR_INFO_SIZE];
    // SAFETY: both buffers outlive the calls and are larger than the
    // structs the kernel writes.
    let rc = unsafe { libc::ioctl(fd, FBIOGET_FSCREENINFO, fix_raw.as_mut_ptr()) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("{FB_PATH}: FBIOGET_FSCREENINFO"));
    }
    // SAFETY: as above.
    let rc = unsafe { libc::ioctl(fd, FBIOGET_VSCREENINFO, var_raw.as_mut_ptr()) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("{FB_PATH}: FBIOGET_VSCREENINFO"));
    }

    assemble_fb_info(parse_fix(&fix_raw), parse_var(&var_raw), || {
        Ok(BootParams::read()?.lfb().0)
    })
}

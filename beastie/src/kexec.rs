//! The kexec and reboot syscall boundary.
//!
//! The kexec slot is a process-wide singleton on the host kernel: loading
//! replaces whatever was there, and an explicit unload clears it. The
//! reboot-to-kexec syscall transfers control to the loaded image without
//! going back through firmware.

use std::io;
use std::os::unix::process::CommandExt as _;
use std::process::Command;

/// Maximum number of segments the host kexec facility accepts.
pub const KEXEC_SEGMENT_MAX: usize = 16;

/// Architecture code for x86-64 images.
const KEXEC_ARCH_X86_64: libc::c_ulong = 62 << 16;

/// Flag clearing a previously loaded image.
const KEXEC_FILE_UNLOAD: libc::c_ulong = 0x1;

/// One kexec segment: `bufsz` bytes copied from `buf` to physical `mem`,
/// which reserves `memsz` bytes (page aligned).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KexecSegment {
    /// Source buffer in this process.
    pub buf: *const libc::c_void,
    /// Source buffer size in bytes.
    pub bufsz: usize,
    /// Destination physical address.
    pub mem: *const libc::c_void,
    /// Reserved size at the destination, a multiple of the page size.
    pub memsz: usize,
}

impl KexecSegment {
    /// Builds a segment copying `bytes` to physical address `mem`,
    /// reserving `memsz` bytes there.
    #[must_use]
    pub fn new(bytes: &[u8], mem: u64, memsz: usize) -> Self {
        Self {
            buf: bytes.as_ptr().cast(),
            bufsz: bytes.len(),
            mem: mem as *const libc::c_void,
            memsz,
        }
    }
}

/// Loads `segments` into the kexec slot with the given entry address.
///
/// # Errors
///
/// Returns the syscall error; `EPERM` without `CAP_SYS_BOOT` and `EINVAL`
/// for overlapping or unaligned segments are the common ones.
pub fn load(entry: u64, segments: &[KexecSegment]) -> io::Result<()> {
    debug_assert!(segments.len() <= KEXEC_SEGMENT_MAX);
    // SAFETY: the segment array lives for the duration of the call and
    // every buf pointer refers to a live allocation of bufsz bytes.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_kexec_load,
            entry,
            segments.len() as libc::c_ulong,
            segments.as_ptr(),
            KEXEC_ARCH_X86_64,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Clears the kexec slot. Succeeds when nothing is loaded.
///
/// # Errors
///
/// Returns the syscall error (e.g. `EPERM`).
pub fn unload() -> io::Result<()> {
    // SAFETY: no pointers are passed on the unload path.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_kexec_load,
            0u64,
            0u64,
            std::ptr::null::<KexecSegment>(),
            KEXEC_FILE_UNLOAD,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Immediately reboots into the loaded kexec image. Does not return on
/// success.
///
/// # Errors
///
/// Returns the syscall error when the reboot could not be issued.
pub fn reboot_to_kexec() -> io::Result<()> {
    // SAFETY: plain syscall, no pointers.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_reboot,
            libc::LINUX_REBOOT_MAGIC1,
            libc::LINUX_REBOOT_MAGIC2,
            libc::LINUX_REBOOT_CMD_KEXEC,
            std::ptr::null::<libc::c_void>(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Replaces this process with `shutdown -r now` so init performs the
/// reboot (and the kernel kexecs on the way down). Only returns on
/// failure, trying the usual install locations in order.
pub fn shutdown() -> io::Error {
    for path in ["/sbin/shutdown", "/etc/shutdown", "/bin/shutdown"] {
        let err = Command::new(path).args(["-r", "now"]).exec();
        if err.kind() != io::ErrorKind::NotFound {
            return err;
        }
    }
    io::Error::new(io::ErrorKind::NotFound, "no shutdown program found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_carries_buffer_and_placement() {
        let block = vec![0xabu8; 100];
        let seg = KexecSegment::new(&block, 0x20_0000, 4096);
        assert_eq!(seg.bufsz, 100);
        assert_eq!(seg.mem as u64, 0x20_0000);
        assert_eq!(seg.memsz, 4096);
    }
}

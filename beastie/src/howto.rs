//! FreeBSD boot-time `howto` flags.
//!
//! The RB_* bitfield the kernel reads from the `MODINFOMD_HOWTO` metadata
//! record. Values are FreeBSD's `sys/reboot.h`, unchanged on the wire.

bitflags::bitflags! {
    /// FreeBSD `RB_*` boot flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BootHowto: u32 {
        /// Force prompt of device of root filesystem.
        const ASKNAME = 0x001;
        /// Reboot to single user only.
        const SINGLE = 0x002;
        /// Don't sync before reboot.
        const NOSYNC = 0x004;
        /// Don't reboot, just halt.
        const HALT = 0x008;
        /// Use compiled-in rootdev.
        const DFLTROOT = 0x020;
        /// Give control to kernel debugger.
        const KDB = 0x040;
        /// Mount root fs read-only.
        const RDONLY = 0x080;
        /// Dump kernel memory before reboot.
        const DUMP = 0x100;
        /// Print all potentially useful info.
        const VERBOSE = 0x800;
        /// Use serial port as console.
        const SERIAL = 0x1000;
        /// Use cdrom as root.
        const CDROM = 0x2000;
        /// Turn the power off if possible.
        const POWEROFF = 0x4000;
        /// Use GDB remote debugger instead of DDB.
        const GDB = 0x8000;
        /// Start up with the console muted.
        const MUTE = 0x10000;
        /// Pause after each output line during probe.
        const PAUSE = 0x100000;
        /// Unmount the rootfs and mount it again.
        const REROOT = 0x200000;
        /// Power cycle if possible.
        const POWERCYCLE = 0x400000;
        /// Probe multiple consoles.
        const PROBE = 0x10000000;
        /// Use multiple consoles.
        const MULTIPLE = 0x20000000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_mode_sets_both_bits() {
        let howto = BootHowto::MULTIPLE | BootHowto::SERIAL;
        assert_eq!(howto.bits(), 0x2000_1000);
    }

    #[test]
    fn flag_values_match_reboot_h() {
        assert_eq!(BootHowto::VERBOSE.bits(), 0x800);
        assert_eq!(BootHowto::CDROM.bits(), 0x2000);
    }
}

//! beastie — reboot a Linux host directly into a FreeBSD kernel.
//!
//! Builds an in-memory FreeBSD boot image (kernel, symbols, environment,
//! console font, loader metadata, and a long-mode trampoline), loads it
//! through the host kexec facility, and triggers the reboot.
//!
//! Pipeline: probe host → load font and kernel ELF → plan physical
//! placement → write loader metadata → assemble trampoline → kexec.

mod cli;
mod debug;
mod gfx;
mod howto;
mod image;
mod kexec;
mod layout;
mod loader;
mod platform;
mod trampoline;

use anyhow::Result;
use clap::Parser as _;
use clap::error::ErrorKind;

use crate::debug::dprintln;
use crate::howto::BootHowto;

fn main() -> Result<()> {
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => -1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    debug::init(cli.debug || cli.debug_asm);

    let mut howto = BootHowto::empty();
    if cli.cdrom {
        howto |= BootHowto::CDROM;
    }
    if cli.serial {
        howto |= BootHowto::MULTIPLE | BootHowto::SERIAL;
    }
    if cli.verbose {
        howto |= BootHowto::VERBOSE;
    }

    // Everything past this point touches /dev/mem, sysfs, and the kexec
    // syscall.
    // SAFETY: geteuid has no preconditions.
    let euid = unsafe { libc::geteuid() };
    anyhow::ensure!(
        euid == 0,
        "this operation requires root privileges; run as root or use sudo"
    );

    dprintln!("boot_howto={:#x}", howto.bits());

    let mut bootloader = loader::Bootloader::probe()?;
    bootloader.set_howto(howto.bits());
    bootloader.set_force(cli.force);
    bootloader.set_debug_asm(cli.debug_asm);
    bootloader.font_load(&cli.root.join("boot/fonts/12x24.fnt.gz"))?;
    bootloader.file_load(&cli.root.join("boot/kernel/kernel"))?;

    if !cli.pretend {
        bootloader.boot()?;
    }

    Ok(())
}

//! Command-line interface definitions for beastie.

use std::path::PathBuf;

use clap::Parser;

/// Directly reboot into FreeBSD.
#[derive(Parser)]
#[command(name = "beastie", version, about, disable_version_flag = true)]
pub struct Cli {
    /// Print the version of beastie.
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Pretend to reboot: build and validate the image, skip kexec.
    #[arg(short = 'p', long)]
    pub pretend: bool,

    /// Force an immediate boot, don't call shutdown.
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Enable debugging to help spot a failure.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Also dump the generated trampoline sections and labels.
    #[arg(short = 'D', long = "debug-asm")]
    pub debug_asm: bool,

    /// Boot in cdrom mode.
    #[arg(short = 'c', long)]
    pub cdrom: bool,

    /// Boot in serial mode.
    #[arg(short = 's', long)]
    pub serial: bool,

    /// Boot in verbose mode.
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Root directory holding boot/kernel/kernel and boot/fonts/.
    pub root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_root() {
        let cli = Cli::try_parse_from(["beastie", "-p", "-c", "-s", "/mnt/freebsd"]).unwrap();
        assert!(cli.pretend);
        assert!(cli.cdrom);
        assert!(cli.serial);
        assert!(!cli.force);
        assert_eq!(cli.root, PathBuf::from("/mnt/freebsd"));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(Cli::try_parse_from(["beastie", "-p"]).is_err());
    }

    #[test]
    fn upper_v_is_verbose_not_version() {
        let cli = Cli::try_parse_from(["beastie", "-V", "/"]).unwrap();
        assert!(cli.verbose);
    }
}

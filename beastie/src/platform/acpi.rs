//! ACPI 2.0 root table discovery.
//!
//! The RSDP address comes either from the EFI system table dump in sysfs
//! (ACPI 5.2.5.2, "Finding the RSDP on UEFI Enabled Systems") or from the
//! legacy boot parameters. The RSDT address then sits 16 bytes into the
//! RSDP structure, read through `/dev/mem`.

use std::io::{Read as _, Seek as _, SeekFrom};

use anyhow::{Context, Result};

use super::bootparams::BootParams;

/// The EFI system table dump.
const SYSTAB_PATH: &str = "/sys/firmware/efi/systab";

/// Physical memory window used for the RSDT lookup.
const DEVMEM_PATH: &str = "/dev/mem";

/// Offset of the 32-bit RSDT address within the RSDP structure.
const RSDP_RSDT_OFFSET: u64 = 16;

/// Returns `(rsdp, rsdt)` physical addresses.
///
/// # Errors
///
/// Fails when the firmware tables cannot be read or no RSDP was
/// published.
pub fn fetch_acpi20(efi: bool) -> Result<(u64, u64)> {
    let rsdp = if efi {
        let systab = std::fs::read_to_string(SYSTAB_PATH)
            .with_context(|| format!("{SYSTAB_PATH}: read failed"))?;
        parse_systab_acpi20(&systab)
            .with_context(|| format!("{SYSTAB_PATH}: no ACPI20 entry"))?
    } else {
        BootParams::read()?.acpi_rsdp_addr()
    };
    anyhow::ensure!(rsdp != 0, "firmware published no ACPI RSDP");

    let rsdt = read_rsdt(rsdp)?;
    Ok((rsdp, rsdt))
}

/// Extracts the `ACPI20=<hex>` line from an EFI systab dump.
fn parse_systab_acpi20(systab: &str) -> Option<u64> {
    for line in systab.lines() {
        if let Some(value) = line.strip_prefix("ACPI20=") {
            let value = value.trim().trim_start_matches("0x");
            return u64::from_str_radix(value, 16).ok();
        }
    }
    None
}

/// Reads the 32-bit RSDT pointer out of the RSDP via `/dev/mem`.
fn read_rsdt(rsdp: u64) -> Result<u64> {
    let mut devmem = std::fs::File::open(DEVMEM_PATH)
        .with_context(|| format!("{DEVMEM_PATH}: open failed"))?;
    devmem
        .seek(SeekFrom::Start(rsdp + RSDP_RSDT_OFFSET))
        .with_context(|| format!("{DEVMEM_PATH}: seek to RSDP failed"))?;
    let mut word = [0u8; 4];
    devmem
        .read_exact(&mut word)
        .with_context(|| format!("{DEVMEM_PATH}: read at RSDP failed"))?;
    Ok(u64::from(u32::from_ne_bytes(word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_acpi20_line() {
        let systab = "MONITOR=0\nACPI20=0x7ff7e014\nACPI=0x7ff7e000\nSMBIOS=0xf0000\n";
        assert_eq!(parse_systab_acpi20(systab), Some(0x7ff7_e014));
    }

    #[test]
    fn parses_bare_hex() {
        assert_eq!(parse_systab_acpi20("ACPI20=7ff7e014\n"), Some(0x7ff7_e014));
    }

    #[test]
    fn missing_acpi20_is_none() {
        assert_eq!(parse_systab_acpi20("ACPI=0x1000\n"), None);
        assert_eq!(parse_systab_acpi20(""), None);
    }
}

//! Linux boot parameters ("zero page") parsing.
//!
//! `/sys/kernel/boot_params/data` exposes the `struct boot_params` page
//! the host kernel was booted with. Fields are extracted at their x86
//! boot protocol offsets instead of casting to a packed struct.

use std::path::Path;

use anyhow::{Context, Result};

use super::{SMAP_MAX_ENTRIES, SmapEntry, SmapInfo};

/// Where the host kernel exposes its boot parameters.
pub const BOOT_PARAMS_PATH: &str = "/sys/kernel/boot_params/data";

/// `screen_info.lfb_base` (u32).
const OFF_LFB_BASE: usize = 0x018;
/// `screen_info.lfb_size` (u32).
const OFF_LFB_SIZE: usize = 0x01c;
/// `screen_info.ext_lfb_base` (u32), upper half of a 64-bit base.
const OFF_EXT_LFB_BASE: usize = 0x03a;
/// `boot_params.acpi_rsdp_addr` (u64).
const OFF_ACPI_RSDP_ADDR: usize = 0x070;
/// `boot_params.e820_entries` (u8).
const OFF_E820_ENTRIES: usize = 0x1e8;
/// `boot_params.e820_table` (128 packed 20-byte entries).
const OFF_E820_TABLE: usize = 0x2d0;

/// Size of one packed `boot_e820_entry`.
const E820_ENTRY_SIZE: usize = 20;

/// Minimum usable size of the boot parameters blob.
const MIN_SIZE: usize = OFF_E820_TABLE + SMAP_MAX_ENTRIES * E820_ENTRY_SIZE;

fn ne_u32(data: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(data[off..off + 4].try_into().unwrap())
}

fn ne_u64(data: &[u8], off: usize) -> u64 {
    u64::from_ne_bytes(data[off..off + 8].try_into().unwrap())
}

/// The raw boot parameters page.
#[derive(Debug)]
pub struct BootParams {
    raw: Vec<u8>,
}

impl BootParams {
    /// Reads the boot parameters from sysfs.
    ///
    /// # Errors
    ///
    /// Fails when the file is unreadable or too short.
    pub fn read() -> Result<Self> {
        let raw = std::fs::read(Path::new(BOOT_PARAMS_PATH))
            .with_context(|| format!("{BOOT_PARAMS_PATH}: read failed"))?;
        Self::from_bytes(raw)
    }

    /// Wraps an already loaded boot parameters blob.
    ///
    /// # Errors
    ///
    /// Fails when the blob is shorter than the E820 table it must hold.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        anyhow::ensure!(
            raw.len() >= MIN_SIZE,
            "boot_params blob too short ({} < {MIN_SIZE} bytes)",
            raw.len()
        );
        Ok(Self { raw })
    }

    /// The ACPI RSDP address the firmware handed to Linux, or 0.
    #[must_use]
    pub fn acpi_rsdp_addr(&self) -> u64 {
        ne_u64(&self.raw, OFF_ACPI_RSDP_ADDR)
    }

    /// The E820 memory map recorded at boot.
    #[must_use]
    pub fn e820(&self) -> SmapInfo {
        let count = usize::from(self.raw[OFF_E820_ENTRIES]).min(SMAP_MAX_ENTRIES);
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = OFF_E820_TABLE + i * E820_ENTRY_SIZE;
            entries.push(SmapEntry {
                addr: ne_u64(&self.raw, off),
                size: ne_u64(&self.raw, off + 8),
                typ: ne_u32(&self.raw, off + 16),
            });
        }
        SmapInfo { entries }
    }

    /// The legacy `screen_info` linear framebuffer base (with the
    /// extended upper half) and size.
    #[must_use]
    pub fn lfb(&self) -> (u64, u32) {
        let base = u64::from(ne_u32(&self.raw, OFF_LFB_BASE))
            | u64::from(ne_u32(&self.raw, OFF_EXT_LFB_BASE)) << 32;
        (base, ne_u32(&self.raw, OFF_LFB_SIZE))
    }
}

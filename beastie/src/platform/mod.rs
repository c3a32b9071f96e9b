//! Host platform glue: firmware tables, memory maps, framebuffer.
//!
//! Everything the boot image needs from the running Linux host, plus the
//! packed on-wire forms the FreeBSD kernel expects. The packed structs
//! are serialized field by field through [`ByteBuffer`] rather than cast
//! from memory, so the byte layout is explicit.

pub mod acpi;
pub mod bootparams;
pub mod fb;

use std::path::Path;

use crate::image::ByteBuffer;

/// E820 range type: usable memory.
pub const SMAP_TYPE_MEMORY: u32 = 0x0001;

/// EFI memory descriptor type: unused/free memory.
pub const EFI_MD_TYPE_FREE: u32 = 7;

/// Capacity of the E820 table in the boot parameters page.
pub const SMAP_MAX_ENTRIES: usize = 128;

/// A probed framebuffer.
#[derive(Debug, Clone, Default)]
pub struct FbInfo {
    /// Driver identification string (`"EFI VGA"`, `"i915drmfb"`,
    /// `"vmwgfxdrmfb"`, ...).
    pub id: String,
    /// Physical base of the linear framebuffer.
    pub phys: u64,
    /// Framebuffer aperture size in bytes.
    pub size: u64,
    /// Horizontal resolution in pixels.
    pub width: u32,
    /// Vertical resolution in pixels.
    pub height: u32,
    /// Red channel mask.
    pub mask_red: u32,
    /// Green channel mask.
    pub mask_green: u32,
    /// Blue channel mask.
    pub mask_blue: u32,
    /// Reserved channel mask.
    pub mask_reserved: u32,
}

/// One E820 range: 20 packed bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmapEntry {
    /// Range base.
    pub addr: u64,
    /// Range size in bytes.
    pub size: u64,
    /// Range type (`SMAP_TYPE_*`).
    pub typ: u32,
}

/// The BIOS E820 memory map.
#[derive(Debug, Clone, Default)]
pub struct SmapInfo {
    /// The populated entries, in firmware order.
    pub entries: Vec<SmapEntry>,
}

impl SmapInfo {
    /// Serializes the populated entries as the `MODINFOMD_SMAP` payload:
    /// 20 packed bytes per entry, no count prefix.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        for entry in &self.entries {
            buf.push_u64(entry.addr);
            buf.push_u64(entry.size);
            buf.push_u32(entry.typ);
        }
        buf.as_slice().to_vec()
    }
}

/// One EFI memory descriptor: 40 packed bytes on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EfiMapEntry {
    /// Descriptor type (`EFI_MD_TYPE_*`).
    pub typ: u32,
    /// Physical base.
    pub phys: u64,
    /// Virtual base (unused here).
    pub virt: u64,
    /// Size in 4 KiB pages.
    pub pages: u64,
    /// Attribute bits.
    pub attr: u64,
}

/// The EFI memory map in the wrapper the kernel reads at
/// `MODINFOMD_EFI_MAP`: a header plus a fixed table of 128 descriptors.
#[derive(Debug, Clone)]
pub struct EfiMapInfo {
    /// Total descriptor bytes (`entry count * descriptor size`).
    pub memory_size: u64,
    /// Size of one descriptor (40).
    pub descriptor_size: u64,
    /// Descriptor format version (1).
    pub descriptor_version: u32,
    /// Fixed descriptor table; unused slots stay zero.
    pub entries: [EfiMapEntry; SMAP_MAX_ENTRIES],
}

impl EfiMapInfo {
    /// Synthesizes an EFI map from the E820 map.
    ///
    /// Linux does not expose descriptors for system memory in
    /// `/sys/firmware/efi/runtime-map`, so usable E820 ranges are
    /// converted instead: type 1 becomes `EFI_MD_TYPE_FREE` with standard
    /// attributes, slot for slot.
    #[must_use]
    pub fn from_smap(smap: &SmapInfo) -> Self {
        let mut entries = [EfiMapEntry::default(); SMAP_MAX_ENTRIES];
        for (i, e820) in smap.entries.iter().take(SMAP_MAX_ENTRIES).enumerate() {
            if e820.typ != SMAP_TYPE_MEMORY {
                continue;
            }
            entries[i] = EfiMapEntry {
                typ: EFI_MD_TYPE_FREE,
                phys: e820.addr,
                virt: 0,
                pages: e820.size / 4096,
                attr: 0x0f,
            };
        }
        Self {
            memory_size: smap.entries.len() as u64 * 40,
            descriptor_size: 40,
            descriptor_version: 1,
            entries,
        }
    }

    /// Serializes the whole wrapper, including the zero slots, as the
    /// `MODINFOMD_EFI_MAP` payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.push_u64(self.memory_size);
        buf.push_u64(self.descriptor_size);
        buf.push_u32(self.descriptor_version);
        buf.push_u32(0); // pad1
        buf.push_u64(0); // pad2
        for entry in &self.entries {
            buf.push_u32(entry.typ);
            buf.push_u32(0); // pad
            buf.push_u64(entry.phys);
            buf.push_u64(entry.virt);
            buf.push_u64(entry.pages);
            buf.push_u64(entry.attr);
        }
        buf.as_slice().to_vec()
    }
}

/// The `MODINFOMD_EFI_FB` framebuffer record: 44 packed bytes.
#[derive(Debug, Clone, Copy)]
pub struct EfiFramebuffer {
    /// Physical framebuffer base.
    pub addr: u64,
    /// Framebuffer size in bytes.
    pub size: u64,
    /// Vertical resolution.
    pub height: u32,
    /// Horizontal resolution.
    pub width: u32,
    /// Pixels per scanline.
    pub stride: u32,
    /// Red channel mask.
    pub mask_red: u32,
    /// Green channel mask.
    pub mask_green: u32,
    /// Blue channel mask.
    pub mask_blue: u32,
    /// Reserved channel mask.
    pub mask_reserved: u32,
}

impl EfiFramebuffer {
    /// Builds the record from a probed framebuffer, assuming 32-bit
    /// pixels and a reserved mask in the top byte.
    #[must_use]
    pub fn from_fb(fb: &FbInfo) -> Self {
        Self {
            addr: fb.phys,
            size: u64::from(fb.width) * u64::from(fb.height) * 4,
            height: fb.height,
            width: fb.width,
            stride: fb.width,
            mask_red: fb.mask_red,
            mask_green: fb.mask_green,
            mask_blue: fb.mask_blue,
            mask_reserved: 0xff00_0000,
        }
    }

    /// Serializes the packed record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.push_u64(self.addr);
        buf.push_u64(self.size);
        buf.push_u32(self.height);
        buf.push_u32(self.width);
        buf.push_u32(self.stride);
        buf.push_u32(self.mask_red);
        buf.push_u32(self.mask_green);
        buf.push_u32(self.mask_blue);
        buf.push_u32(self.mask_reserved);
        buf.as_slice().to_vec()
    }
}

/// Returns whether the host booted through EFI firmware.
#[must_use]
pub fn is_efi() -> bool {
    let dir = Path::new("/sys/firmware/efi");
    dir.is_dir()
        && dir
            .read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_smap() -> SmapInfo {
        SmapInfo {
            entries: vec![
                SmapEntry {
                    addr: 0,
                    size: 0x9_fc00,
                    typ: 1,
                },
                SmapEntry {
                    addr: 0x9_fc00,
                    size: 0x400,
                    typ: 2,
                },
                SmapEntry {
                    addr: 0x10_0000,
                    size: 0x7ff0_0000,
                    typ: 1,
                },
            ],
        }
    }

    #[test]
    fn smap_payload_is_packed() {
        let bytes = sample_smap().to_bytes();
        assert_eq!(bytes.len(), 3 * 20);
        assert_eq!(&bytes[0..8], &0u64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x9_fc00u64.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_ne_bytes());
        // Second entry starts at 20 with no padding
        assert_eq!(&bytes[20..28], &0x9_fc00u64.to_ne_bytes());
    }

    #[test]
    fn efi_map_synthesis_skips_reserved() {
        let map = EfiMapInfo::from_smap(&sample_smap());
        assert_eq!(map.memory_size, 3 * 40);
        assert_eq!(map.descriptor_size, 40);
        assert_eq!(map.descriptor_version, 1);
        assert_eq!(map.entries[0].typ, EFI_MD_TYPE_FREE);
        assert_eq!(map.entries[0].pages, 0x9_fc00 / 4096);
        assert_eq!(map.entries[0].attr, 0x0f);
        // Reserved slot 1 stays zero
        assert_eq!(map.entries[1].typ, 0);
        assert_eq!(map.entries[2].typ, EFI_MD_TYPE_FREE);
    }

    #[test]
    fn efi_map_payload_covers_all_slots() {
        let bytes = EfiMapInfo::from_smap(&sample_smap()).to_bytes();
        assert_eq!(bytes.len(), 8 + 8 + 4 + 4 + 8 + 128 * 40);
        // Third descriptor at header(32) + 2*40
        let off = 32 + 80;
        assert_eq!(
            &bytes[off..off + 4],
            &EFI_MD_TYPE_FREE.to_ne_bytes()
        );
        assert_eq!(
            &bytes[off + 8..off + 16],
            &0x10_0000u64.to_ne_bytes()
        );
    }

    #[test]
    fn efi_fb_record() {
        let fb = FbInfo {
            id: "EFI VGA".into(),
            phys: 0xe000_0000,
            size: 0x100_0000,
            width: 1024,
            height: 768,
            mask_red: 0xff0000,
            mask_green: 0xff00,
            mask_blue: 0xff,
            mask_reserved: 0xff00_0000,
        };
        let record = EfiFramebuffer::from_fb(&fb);
        assert_eq!(record.size, 1024 * 768 * 4);
        assert_eq!(record.stride, 1024);

        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[0..8], &0xe000_0000u64.to_ne_bytes());
        assert_eq!(&bytes[16..20], &768u32.to_ne_bytes());
        assert_eq!(&bytes[40..44], &0xff00_0000u32.to_ne_bytes());
    }
}

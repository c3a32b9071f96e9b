//! The boot driver.
//!
//! Owns every block of the boot image and walks the pipeline end to end:
//! probe the host, load font and kernel, plan the physical placement,
//! write the loader metadata, assemble the trampoline, and hand the
//! segments to kexec.

use std::io::Read as _;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use beastie_elf::{ElfFile, ElfType, SHT_STRTAB, SHT_SYMTAB};

use crate::debug::{dprintln, is_debug, print_buffer};
use crate::image::meta::modinfo::{
    MODINFOMD_EFI_FB, MODINFOMD_EFI_MAP, MODINFOMD_ENVP, MODINFOMD_ESYM, MODINFOMD_FONT,
    MODINFOMD_FW_HANDLE, MODINFOMD_HOWTO, MODINFOMD_SMAP, MODINFOMD_SSYM, MODINFO_METADATA,
};
use crate::image::{EnvWriter, MetaWriter, SymbolsWriter};
use crate::kexec::{self, KexecSegment};
use crate::layout::{BOOT_PHYS, Placement, page_align_up};
use crate::platform::{self, EfiFramebuffer, EfiMapInfo, FbInfo, SmapInfo};
use crate::trampoline::Trampoline;

/// Virtual base of the FreeBSD kernel map.
const KERNBASE: u64 = 0xffff_ffff_8000_0000;

/// The 2 MiB virtual hole in front of the kernel; stripping it puts the
/// kernel block at physical 2 MiB.
const KERN_HOLE: u64 = 0x20_0000;

/// Gzip stream magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Boot pipeline state and buffers.
pub struct Bootloader {
    debug_asm: bool,
    efi: bool,
    howto: u32,
    force: bool,
    btext: u64,
    fb: FbInfo,
    rsdp: u64,
    rsdt: u64,
    smap: SmapInfo,
    efimap: EfiMapInfo,
    env: EnvWriter,
    meta: MetaWriter,
    sym: SymbolsWriter,
    kernblock: Vec<u8>,
    bootblock: Vec<u8>,
    fontblock: Vec<u8>,
    placement: Option<Placement>,
    kern_end: u64,
}

impl Bootloader {
    /// Probes the host (firmware type, framebuffer, memory maps, ACPI
    /// tables) and seeds the default kernel environment.
    ///
    /// # Errors
    ///
    /// Fails when any host interface is unavailable; requires root.
    pub fn probe() -> Result<Self> {
        let efi = platform::is_efi();
        let fb = platform::fb::fetch_fb()?;
        let smap = platform::bootparams::BootParams::read()?.e820();
        anyhow::ensure!(!smap.entries.is_empty(), "boot_params carry no E820 entries");
        let efimap = EfiMapInfo::from_smap(&smap);
        let (rsdp, rsdt) = platform::acpi::fetch_acpi20(efi)?;

        let mut loader = Self {
            debug_asm: false,
            efi,
            howto: 0,
            force: false,
            btext: 0,
            fb,
            rsdp,
            rsdt,
            smap,
            efimap,
            env: EnvWriter::new(),
            meta: MetaWriter::new(),
            sym: SymbolsWriter::new(),
            kernblock: Vec::new(),
            bootblock: Vec::new(),
            fontblock: Vec::new(),
            placement: None,
            kern_end: 0,
        };
        loader.write_default_env();
        // The probed mode is irrelevant after the reset; boot at a mode
        // every console driver handles.
        loader.set_resolution(1024, 768);
        Ok(loader)
    }

    /// Sets the RB_* howto flags passed to the kernel.
    pub fn set_howto(&mut self, howto: u32) {
        self.howto = howto;
    }

    /// Chooses the direct reboot syscall over spawning `shutdown`.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Enables the trampoline section/label dump.
    pub fn set_debug_asm(&mut self, debug_asm: bool) {
        self.debug_asm = debug_asm;
    }

    /// Overrides the framebuffer resolution programmed at boot.
    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.fb.width = width;
        self.fb.height = height;
    }

    fn write_default_env(&mut self) {
        self.env.add(&format!("acpi.rsdp=0x{:x}", self.rsdp));
        self.env.add(&format!("acpi.rsdt=0x{:x}", self.rsdt));
        self.env.add("hint.uart.0.at=acpi");
        self.env.add("hint.uart.0.port=0x3f8");
        self.env.add("hint.uart.0.flags=0x10");
    }

    /// Loads the console font, transparently unwrapping gzip.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files or a malformed font.
    pub fn font_load(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read(path).with_context(|| format!("{}: read failed", path.display()))?;
        let raw = if raw.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            flate2::read::GzDecoder::new(raw.as_slice())
                .read_to_end(&mut decoded)
                .with_context(|| format!("{}: gzip decode failed", path.display()))?;
            decoded
        } else {
            raw
        };

        let font = beastie_vfnt::Font::parse(&raw)
            .map_err(|e| anyhow!("{}: {e}", path.display()))?;
        self.fontblock = font.to_kernel_blob();
        Ok(())
    }

    /// Loads an ELF kernel (or recognizes a module) and builds the whole
    /// boot image around it.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, a malformed ELF, or a module image.
    pub fn file_load(&mut self, path: &Path) -> Result<()> {
        let buffer =
            std::fs::read(path).with_context(|| format!("{}: read failed", path.display()))?;
        let elf =
            ElfFile::parse(&buffer).map_err(|e| anyhow!("{}: {e}", path.display()))?;

        match elf.elf_type() {
            ElfType::Exec => self.elf_load_exec(&elf),
            ElfType::Rel => {
                // Modules carry no program headers and no entry point.
                anyhow::ensure!(
                    elf.header().e_phnum == 0 && elf.entry_point() == 0,
                    "{}: malformed relocatable object",
                    path.display()
                );
                eprintln!(
                    "{}: kernel module loading is not implemented, skipping",
                    path.display()
                );
                Ok(())
            }
        }
    }

    fn elf_load_exec(&mut self, elf: &ElfFile<'_>) -> Result<()> {
        self.btext = elf.entry_point();
        assert!(self.btext != 0, "kernel entry point is zero");

        for seg in elf.load_segments() {
            // The program headers map the kernel high; dropping KERNBASE
            // and the leading hole yields the offset into the block.
            let paddr = seg
                .vaddr
                .checked_sub(KERNBASE + KERN_HOLE)
                .with_context(|| format!("PT_LOAD at {:#x} below the kernel window", seg.vaddr))?;
            let paddr = usize::try_from(paddr).context("PT_LOAD beyond addressable range")?;
            let memsz = usize::try_from(seg.memsz).context("PT_LOAD size overflow")?;

            // Growth is zero-filled, which is what gives BSS its zeroes.
            let end = paddr
                .checked_add(memsz)
                .context("PT_LOAD range overflow")?;
            if self.kernblock.len() < end {
                self.kernblock.resize(end, 0);
            }

            dprintln!(
                "[PT_LOAD]  phys={paddr:#x} size={:#x} off={:#x}",
                seg.memsz,
                seg.offset
            );
            self.kernblock[paddr..paddr + seg.data.len()].copy_from_slice(seg.data);
        }

        // The kernel debugger contract: first symtab, then first strtab.
        let symtab = elf
            .find_section_by_type(SHT_SYMTAB)
            .expect("kernel image has no symbol table");
        let symtab_data = elf
            .section_data(&symtab)
            .context("symbol table data out of bounds")?;
        self.sym.add_symtab(symtab_data);

        let strtab = elf
            .find_section_by_type(SHT_STRTAB)
            .expect("kernel image has no string table");
        let strtab_data = elf
            .section_data(&strtab)
            .context("string table data out of bounds")?;
        self.sym.add_strtab(strtab_data);

        let placement = Placement::compute(
            self.kernblock.len() as u64,
            self.sym.size() as u64,
            self.env.size() as u64,
            self.fontblock.len() as u64,
        );
        self.placement = Some(placement);

        self.write_metadata(placement);
        self.kern_end = placement.kern_end(self.meta.size() as u64);

        let mut trampoline =
            Trampoline::new(self.btext, placement.meta_phys, self.kern_end, &self.fb)?;
        trampoline
            .assemble()
            .map_err(|e| anyhow!("assembling trampoline: {e}"))?;
        if self.debug_asm {
            print!("{}", trampoline.dump());
        }
        self.bootblock = trampoline.bytes();

        Ok(())
    }

    fn write_metadata(&mut self, placement: Placement) {
        let meta = &mut self.meta;
        meta.add_name("/boot/kernel/kernel");
        meta.add_type("elf kernel");
        meta.add_addr(placement.kern_phys);
        meta.add_size(self.kernblock.len() as u64);

        assert!(self.sym.size() > 0, "symbols block is empty");
        assert!(placement.env_phys != 0, "environment has no placement");
        meta.add_metadata_u64(MODINFO_METADATA | MODINFOMD_SSYM, placement.sym_phys);
        meta.add_metadata_u64(
            MODINFO_METADATA | MODINFOMD_ESYM,
            placement.sym_phys + self.sym.size() as u64,
        );
        meta.add_metadata_u64(MODINFO_METADATA | MODINFOMD_ENVP, placement.env_phys);
        meta.add_metadata_u32(MODINFO_METADATA | MODINFOMD_HOWTO, self.howto);
        meta.add_metadata_u64(MODINFO_METADATA | MODINFOMD_FW_HANDLE, self.rsdp);

        if self.efi {
            meta.add_metadata_bytes(
                MODINFO_METADATA | MODINFOMD_EFI_MAP,
                &self.efimap.to_bytes(),
            );
        } else {
            meta.add_metadata_bytes(MODINFO_METADATA | MODINFOMD_SMAP, &self.smap.to_bytes());
        }

        meta.add_metadata_bytes(
            MODINFO_METADATA | MODINFOMD_EFI_FB,
            &EfiFramebuffer::from_fb(&self.fb).to_bytes(),
        );
        meta.add_metadata_u64(MODINFO_METADATA | MODINFOMD_FONT, placement.font_phys);
        meta.add_end();
    }

    /// The kexec segments in submission order, empty blocks skipped.
    fn prepare_segments(&self) -> Vec<KexecSegment> {
        let placement = self.placement.expect("no placement computed");
        let blocks: [(&[u8], u64); 6] = [
            (&self.kernblock, placement.kern_phys),
            (self.sym.as_slice(), placement.sym_phys),
            (self.env.as_slice(), placement.env_phys),
            (self.meta.as_slice(), placement.meta_phys),
            (&self.bootblock, BOOT_PHYS),
            (&self.fontblock, placement.font_phys),
        ];

        blocks
            .into_iter()
            .filter(|(bytes, _)| !bytes.is_empty())
            .map(|(bytes, mem)| {
                let memsz = usize::try_from(page_align_up(bytes.len() as u64))
                    .expect("segment size overflow");
                KexecSegment::new(bytes, mem, memsz)
            })
            .collect()
    }

    fn load(&mut self) -> Result<()> {
        // Whatever is in the kexec slot is stale; clearing an empty slot
        // is fine.
        let _ = kexec::unload();

        let segments = self.prepare_segments();
        if is_debug() {
            for seg in &segments {
                println!(
                    "kexec segment: mem={:#010x} memsz={:08x}",
                    seg.mem as u64, seg.memsz
                );
            }
            print_buffer(self.meta.as_slice(), "metadata");
        }

        kexec::load(BOOT_PHYS, &segments).context("kexec_load")
    }

    /// Loads the image into the kexec slot and reboots: through
    /// `shutdown -r now` normally, or the direct reboot syscall when
    /// forced. Does not return on success.
    ///
    /// # Errors
    ///
    /// Fails when the load, the reboot syscall, or every shutdown
    /// program fails.
    pub fn boot(&mut self) -> Result<()> {
        self.load()?;
        if self.force {
            kexec::reboot_to_kexec().context("reboot into kexec image")?;
            Ok(())
        } else {
            Err(kexec::shutdown()).context("exec shutdown -r now")
        }
    }
}

impl Drop for Bootloader {
    fn drop(&mut self) {
        // Best effort: a loaded image without a reboot would fire on the
        // next unrelated shutdown. If boot() succeeded this never runs.
        let _ = kexec::unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::meta::modinfo::{
        MODINFO_ADDR, MODINFO_END, MODINFO_NAME, MODINFO_SIZE, MODINFO_TYPE,
    };
    use crate::platform::SmapEntry;

    /// A driver with probed state faked in, bypassing the host probes.
    fn test_loader(efi: bool) -> Bootloader {
        let smap = SmapInfo {
            entries: vec![SmapEntry {
                addr: 0,
                size: 0x9_fc00,
                typ: 1,
            }],
        };
        let efimap = EfiMapInfo::from_smap(&smap);
        let mut loader = Bootloader {
            debug_asm: false,
            efi,
            howto: 0,
            force: false,
            btext: 0,
            fb: FbInfo {
                id: "EFI VGA".into(),
                phys: 0xe000_0000,
                width: 1024,
                height: 768,
                ..FbInfo::default()
            },
            rsdp: 0xf_5ac0,
            rsdt: 0x7fe0_0000,
            smap,
            efimap,
            env: EnvWriter::new(),
            meta: MetaWriter::new(),
            sym: SymbolsWriter::new(),
            kernblock: Vec::new(),
            bootblock: Vec::new(),
            fontblock: Vec::new(),
            placement: None,
            kern_end: 0,
        };
        loader.write_default_env();
        loader
    }

    /// A minimal FreeBSD kernel ELF: two PT_LOAD segments (the second a
    /// page in, the first with a BSS tail), a symbol table, and a string
    /// table.
    fn make_kernel_elf() -> Vec<u8> {
        const EHDR: usize = 64;
        const PHDR: usize = 56;
        const SHDR: usize = 64;
        let phoff = EHDR;
        let shoff = phoff + 2 * PHDR;
        let data_off = shoff + 2 * SHDR;

        let mut buf = vec![0u8; data_off];
        // e_ident: magic, ELFCLASS64, little-endian, version, FreeBSD
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2;
        buf[5] = 1;
        buf[6] = 1;
        buf[7] = 9;
        buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        buf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[24..32].copy_from_slice(&(KERNBASE + KERN_HOLE).to_le_bytes());
        buf[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
        buf[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        buf[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&2u16.to_le_bytes());
        buf[58..60].copy_from_slice(&(SHDR as u16).to_le_bytes());
        buf[60..62].copy_from_slice(&2u16.to_le_bytes());

        let mut phdr = |slot: usize, offset: u64, vaddr: u64, filesz: u64, memsz: u64| {
            let p = phoff + slot * PHDR;
            buf[p..p + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
            buf[p + 8..p + 16].copy_from_slice(&offset.to_le_bytes());
            buf[p + 16..p + 24].copy_from_slice(&vaddr.to_le_bytes());
            buf[p + 32..p + 40].copy_from_slice(&filesz.to_le_bytes());
            buf[p + 40..p + 48].copy_from_slice(&memsz.to_le_bytes());
        };
        let text_vaddr = KERNBASE + KERN_HOLE;
        phdr(0, data_off as u64, text_vaddr, 4, 0x10);
        phdr(1, data_off as u64 + 4, text_vaddr + 0x1000, 4, 4);

        let symtab_off = data_off + 8;
        let strtab_off = symtab_off + 24;
        let mut shdr = |slot: usize, sh_type: u32, offset: u64, size: u64| {
            let s = shoff + slot * SHDR;
            buf[s + 4..s + 8].copy_from_slice(&sh_type.to_le_bytes());
            buf[s + 24..s + 32].copy_from_slice(&offset.to_le_bytes());
            buf[s + 32..s + 40].copy_from_slice(&size.to_le_bytes());
        };
        shdr(0, 2, symtab_off as u64, 24); // SHT_SYMTAB
        shdr(1, 3, strtab_off as u64, 4); // SHT_STRTAB

        buf.extend_from_slice(&[0xaa; 4]); // segment 0 text
        buf.extend_from_slice(&[0xbb; 4]); // segment 1 text
        buf.extend_from_slice(&[0x11; 24]); // symtab
        buf.extend_from_slice(&[0x22; 4]); // strtab
        buf
    }

    #[test]
    fn exec_load_builds_the_whole_image() {
        let mut loader = test_loader(false);
        loader.fontblock = vec![0x33; 0x800];

        let file = make_kernel_elf();
        let elf = ElfFile::parse(&file).expect("fixture parses");
        loader.elf_load_exec(&elf).expect("kernel loads");

        // Segment bytes at their hole-stripped offsets, BSS zeroed.
        assert_eq!(loader.btext, KERNBASE + KERN_HOLE);
        assert_eq!(loader.kernblock.len(), 0x1004);
        assert_eq!(&loader.kernblock[..4], &[0xaa; 4]);
        assert_eq!(&loader.kernblock[4..0x10], &[0u8; 12]);
        assert_eq!(&loader.kernblock[0x1000..], &[0xbb; 4]);

        // Symbols: length-prefixed symtab then strtab.
        assert_eq!(&loader.sym.as_slice()[..8], &24u64.to_ne_bytes());
        assert_eq!(loader.sym.size(), 48);

        // Placement matches the planner run on the same sizes.
        let expected = Placement::compute(
            0x1004,
            48,
            loader.env.size() as u64,
            loader.fontblock.len() as u64,
        );
        assert_eq!(loader.placement, Some(expected));
        assert_eq!(
            loader.kern_end,
            expected.kern_end(loader.meta.size() as u64)
        );

        // The trampoline came out of the assembler.
        assert_eq!(loader.bootblock.len(), 0xc000);
        assert_eq!(loader.bootblock[0], 0xfa); // cli
    }

    #[test]
    fn segments_submit_in_fixed_order() {
        let mut loader = test_loader(false);
        loader.fontblock = vec![0x33; 0x800];
        let file = make_kernel_elf();
        let elf = ElfFile::parse(&file).expect("fixture parses");
        loader.elf_load_exec(&elf).expect("kernel loads");

        let placement = loader.placement.unwrap();
        let segments = loader.prepare_segments();
        assert_eq!(segments.len(), 6);

        let mems: Vec<u64> = segments.iter().map(|s| s.mem as u64).collect();
        assert_eq!(
            mems,
            vec![
                placement.kern_phys,
                placement.sym_phys,
                placement.env_phys,
                placement.meta_phys,
                BOOT_PHYS,
                placement.font_phys,
            ]
        );
        for seg in &segments {
            assert_eq!(seg.memsz % 4096, 0);
            assert!(seg.memsz >= seg.bufsz);
        }
    }

    #[test]
    fn empty_blocks_are_skipped() {
        let mut loader = test_loader(false);
        // No font loaded.
        let file = make_kernel_elf();
        let elf = ElfFile::parse(&file).expect("fixture parses");
        loader.elf_load_exec(&elf).expect("kernel loads");

        let placement = loader.placement.unwrap();
        let segments = loader.prepare_segments();
        let mems: Vec<u64> = segments.iter().map(|s| s.mem as u64).collect();
        assert_eq!(
            mems,
            vec![
                placement.kern_phys,
                placement.sym_phys,
                placement.env_phys,
                placement.meta_phys,
                BOOT_PHYS,
            ]
        );
    }

    #[test]
    fn metadata_records_follow_the_handoff_order() {
        use crate::image::meta::modinfo as md;

        for efi in [false, true] {
            let mut loader = test_loader(efi);
            loader.howto = 0x800;
            loader.fontblock = vec![0x33; 0x100];
            loader.sym.add_symtab(&[0x11; 24]);
            loader.sym.add_strtab(&[0x22; 4]);
            loader.kernblock = vec![0; 0x1000];

            let placement = Placement::compute(0x1000, 48, loader.env.size() as u64, 0x100);
            loader.placement = Some(placement);
            loader.write_metadata(placement);

            let mut types = Vec::new();
            let bytes = loader.meta.as_slice();
            let mut off = 0;
            loop {
                let ty = u32::from_ne_bytes(bytes[off..off + 4].try_into().unwrap());
                let len =
                    u32::from_ne_bytes(bytes[off + 4..off + 8].try_into().unwrap()) as usize;
                off += 8 + len;
                off = off.next_multiple_of(8);
                types.push(ty);
                if ty == MODINFO_END {
                    break;
                }
            }

            let map_record = if efi {
                md::MODINFO_METADATA | md::MODINFOMD_EFI_MAP
            } else {
                md::MODINFO_METADATA | md::MODINFOMD_SMAP
            };
            assert_eq!(
                types,
                vec![
                    MODINFO_NAME,
                    MODINFO_TYPE,
                    MODINFO_ADDR,
                    MODINFO_SIZE,
                    md::MODINFO_METADATA | md::MODINFOMD_SSYM,
                    md::MODINFO_METADATA | md::MODINFOMD_ESYM,
                    md::MODINFO_METADATA | md::MODINFOMD_ENVP,
                    md::MODINFO_METADATA | md::MODINFOMD_HOWTO,
                    md::MODINFO_METADATA | md::MODINFOMD_FW_HANDLE,
                    map_record,
                    md::MODINFO_METADATA | md::MODINFOMD_EFI_FB,
                    md::MODINFO_METADATA | md::MODINFOMD_FONT,
                    MODINFO_END,
                ]
            );
            assert_eq!(bytes.len() % 8, 0);
        }
    }

    /// A tiny valid `.fnt`: 8x16, one glyph, empty mapping tables.
    fn make_fnt() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"VFNT0002");
        buf.push(8); // width
        buf.push(16); // height
        buf.extend_from_slice(&[0, 0]); // pad
        buf.extend_from_slice(&1u32.to_be_bytes()); // glyph count
        for _ in 0..4 {
            buf.extend_from_slice(&0u32.to_be_bytes()); // map counts
        }
        buf.extend_from_slice(&[0x5a; 16]); // one 8x16 glyph
        buf
    }

    #[test]
    fn font_load_accepts_plain_and_gzipped() {
        use std::io::Write as _;

        let fnt = make_fnt();
        let dir = std::env::temp_dir();

        let plain_path = dir.join("beastie-test-plain.fnt");
        std::fs::write(&plain_path, &fnt).unwrap();
        let mut loader = test_loader(false);
        loader.font_load(&plain_path).expect("plain font loads");
        let plain_blob = loader.fontblock.clone();
        assert_eq!(plain_blob.len(), 32 + 16);

        let gz_path = dir.join("beastie-test-gz.fnt.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&fnt).unwrap();
        std::fs::write(&gz_path, encoder.finish().unwrap()).unwrap();
        let mut loader = test_loader(false);
        loader.font_load(&gz_path).expect("gzipped font loads");
        assert_eq!(loader.fontblock, plain_blob);
    }

    #[test]
    fn default_env_seeds_acpi_and_uart_hints() {
        let loader = test_loader(false);
        let env = loader.env.as_slice();
        let text = String::from_utf8_lossy(env);
        assert!(text.contains("acpi.rsdp=0xf5ac0"));
        assert!(text.contains("acpi.rsdt=0x7fe00000"));
        assert!(text.contains("hint.uart.0.port=0x3f8"));
        assert_eq!(&env[env.len() - 2..], &[0, 0]);
    }
}

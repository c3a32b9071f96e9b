//! ELF64 section header parsing.
//!
//! Provides zero-copy, zero-allocation access to section headers and raw
//! section data. The boot loader uses this to lift the kernel's symbol
//! table (`.symtab`) and string table (`.strtab`) verbatim into the image
//! handed to the new kernel.

use crate::header::{ELF64_SHDR_SIZE, le_u32, le_u64};
use crate::segment::ElfFile;

/// Section type: symbol table.
pub const SHT_SYMTAB: u32 = 2;

/// Section type: string table.
pub const SHT_STRTAB: u32 = 3;

/// Section type: occupies no file space (`.bss`).
pub const SHT_NOBITS: u32 = 8;

/// Parsed ELF64 section header entry.
#[derive(Debug, Clone, Copy)]
pub struct Elf64SectionHeader {
    /// Offset into the section header string table for this section's name.
    pub sh_name: u32,
    /// Section type (`SHT_SYMTAB`, `SHT_STRTAB`, etc.).
    pub sh_type: u32,
    /// File offset of the section data.
    pub sh_offset: u64,
    /// Size of the section data in bytes.
    pub sh_size: u64,
    /// Associated section index (e.g., `.strtab` index for `.symtab`).
    pub sh_link: u32,
}

impl Elf64SectionHeader {
    /// Parse a section header from raw bytes at the given file offset.
    ///
    /// The caller must ensure `file_offset + ELF64_SHDR_SIZE <= data.len()`.
    pub(crate) fn parse(data: &[u8], file_offset: usize) -> Self {
        let b = &data[file_offset..];
        Self {
            sh_name: le_u32(b, 0),
            sh_type: le_u32(b, 4),
            // sh_flags at 8..16, sh_addr at 16..24 — skipped
            sh_offset: le_u64(b, 24),
            sh_size: le_u64(b, 32),
            sh_link: le_u32(b, 40),
        }
    }
}

/// An iterator over ELF64 section headers.
pub struct SectionIter<'a> {
    data: &'a [u8],
    shoff: usize,
    shentsize: usize,
    index: usize,
    count: usize,
}

impl Iterator for SectionIter<'_> {
    type Item = Elf64SectionHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let offset = self.shoff + self.index * self.shentsize;
        if offset + ELF64_SHDR_SIZE > self.data.len() {
            return None;
        }
        let hdr = Elf64SectionHeader::parse(self.data, offset);
        self.index += 1;
        Some(hdr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count.saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<'a> ElfFile<'a> {
    /// Returns an iterator over all section headers.
    ///
    /// Returns an empty iterator if the ELF has no sections (`e_shnum == 0`).
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF fields are u32/u64, truncation checked by format"
    )]
    pub fn sections(&self) -> SectionIter<'a> {
        let hdr = self.header();
        SectionIter {
            data: self.raw_data(),
            shoff: hdr.e_shoff as usize,
            shentsize: hdr.e_shentsize as usize,
            index: 0,
            count: hdr.e_shnum as usize,
        }
    }

    /// Finds the first section header with the given type.
    ///
    /// The FreeBSD loader contract takes the *first* `SHT_SYMTAB` and the
    /// *first* `SHT_STRTAB` in section header order.
    #[must_use]
    pub fn find_section_by_type(&self, sh_type: u32) -> Option<Elf64SectionHeader> {
        self.sections().find(|s| s.sh_type == sh_type)
    }

    /// Returns the raw data slice for a given section header.
    ///
    /// Returns `None` if the section data is out of bounds.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF fields are u32/u64, truncation checked by format"
    )]
    pub fn section_data(&self, shdr: &Elf64SectionHeader) -> Option<&'a [u8]> {
        let start = shdr.sh_offset as usize;
        let size = shdr.sh_size as usize;
        let data = self.raw_data();
        if start.checked_add(size)? > data.len() {
            return None;
        }
        Some(&data[start..start + size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a kernel ELF whose section header table holds `sections`,
    /// each given as `(sh_type, data)`. Section data blobs are placed
    /// after the table and their offsets patched in.
    fn make_elf_with_sections(sections: &[(u32, &[u8])]) -> Vec<u8> {
        let mut buf = crate::header::tests::make_kernel_header();
        let shoff = buf.len();
        let data_start = shoff + sections.len() * ELF64_SHDR_SIZE;

        let mut data_off = data_start;
        for (sh_type, data) in sections {
            let start = buf.len();
            buf.resize(start + ELF64_SHDR_SIZE, 0);
            let b = &mut buf[start..];
            b[4..8].copy_from_slice(&sh_type.to_le_bytes());
            b[24..32].copy_from_slice(&(data_off as u64).to_le_bytes());
            b[32..40].copy_from_slice(&(data.len() as u64).to_le_bytes());
            data_off += data.len();
        }
        for (_, data) in sections {
            buf.extend_from_slice(data);
        }

        // Patch e_shoff / e_shnum
        buf[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        buf[60..62].copy_from_slice(&(sections.len() as u16).to_le_bytes());
        buf
    }

    #[test]
    fn no_sections_yields_empty_iterator() {
        let buf = crate::header::tests::make_kernel_header();
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        assert_eq!(elf.sections().count(), 0);
    }

    #[test]
    fn finds_first_symtab() {
        let symtab = [0x11u8; 48];
        let strtab = [0x22u8; 16];
        let buf = make_elf_with_sections(&[
            (0, &[]), // SHT_NULL
            (SHT_SYMTAB, &symtab),
            (SHT_STRTAB, &strtab),
        ]);

        let elf = ElfFile::parse(&buf).expect("valid ELF");
        let shdr = elf.find_section_by_type(SHT_SYMTAB).expect("symtab");
        assert_eq!(shdr.sh_size, 48);
        assert_eq!(elf.section_data(&shdr).expect("data"), &symtab);
    }

    #[test]
    fn first_of_type_wins() {
        let first = [0xAAu8; 8];
        let second = [0xBBu8; 8];
        let buf = make_elf_with_sections(&[(SHT_STRTAB, &first), (SHT_STRTAB, &second)]);

        let elf = ElfFile::parse(&buf).expect("valid ELF");
        let shdr = elf.find_section_by_type(SHT_STRTAB).expect("strtab");
        assert_eq!(elf.section_data(&shdr).expect("data"), &first);
    }

    #[test]
    fn missing_type_returns_none() {
        let buf = make_elf_with_sections(&[(SHT_STRTAB, &[0u8; 4])]);
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        assert!(elf.find_section_by_type(SHT_SYMTAB).is_none());
    }

    #[test]
    fn out_of_bounds_section_data() {
        let mut buf = make_elf_with_sections(&[(SHT_SYMTAB, &[0u8; 8])]);
        // Corrupt the section size so it runs past EOF
        let shoff = u64::from_le_bytes(buf[40..48].try_into().unwrap()) as usize;
        buf[shoff + 32..shoff + 40].copy_from_slice(&0x10_0000u64.to_le_bytes());

        let elf = ElfFile::parse(&buf).expect("header still valid");
        let shdr = elf.sections().next().expect("one section");
        assert!(elf.section_data(&shdr).is_none());
    }
}

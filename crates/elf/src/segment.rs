//! ELF64 segment (program header) iteration.
//!
//! Provides [`ElfFile`] as the main entry point for parsing an ELF64 binary,
//! and [`LoadSegment`] for iterating over `PT_LOAD` segments.

use crate::header::{ELF64_PHDR_SIZE, Elf64Header, Elf64ProgramHeader, ElfError, ElfType, PT_LOAD};

/// A parsed ELF64 file, holding a reference to the raw data and the parsed header.
#[derive(Debug, Clone, Copy)]
pub struct ElfFile<'a> {
    pub(crate) data: &'a [u8],
    header: Elf64Header,
}

/// A loadable segment extracted from an ELF64 file.
#[derive(Debug)]
pub struct LoadSegment<'a> {
    /// Virtual address where this segment should be mapped.
    pub vaddr: u64,
    /// Offset of the segment data in the file.
    pub offset: u64,
    /// File content of this segment (may be shorter than `memsz`; remainder is zero-filled).
    pub data: &'a [u8],
    /// Total size of the segment in memory.
    pub memsz: u64,
}

impl<'a> ElfFile<'a> {
    /// Parse an ELF64 file from raw bytes.
    ///
    /// This validates the file header and ensures the program and section
    /// header tables are within bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the header is invalid or the data is too short.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::parse(data)?;
        Ok(Self { data, header })
    }

    /// Returns the virtual address of the entry point (`btext` for kernels).
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    /// Returns the object kind (`ET_EXEC` kernel or `ET_REL` module).
    #[must_use]
    pub fn elf_type(&self) -> ElfType {
        self.header.elf_type()
    }

    /// Returns the parsed ELF64 file header.
    #[must_use]
    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    /// Returns the raw file bytes this [`ElfFile`] was parsed from.
    #[must_use]
    pub fn raw_data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns an iterator over `PT_LOAD` segments.
    ///
    /// Each yielded [`LoadSegment`] contains a slice into the original data
    /// for the file-backed portion and the total memory size (which may be
    /// larger if the segment has a `.bss`-like zero-fill region).
    /// The header is already validated to ensure program header offsets fit in the
    /// file data, so truncation from `u64` to `usize` is safe on 64-bit targets
    /// (and would have been caught by `InvalidOffset` on 32-bit).
    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF segment fields fit in target width"
    )]
    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment<'a>> {
        let data = self.data;
        let phoff = self.header.e_phoff as usize;
        let phentsize = self.header.e_phentsize as usize;
        let phnum = self.header.e_phnum as usize;

        (0..phnum).filter_map(move |i| {
            let offset = phoff + i * phentsize;
            if offset + ELF64_PHDR_SIZE > data.len() {
                return None;
            }

            let phdr = Elf64ProgramHeader::parse(data, offset);
            if phdr.seg_type != PT_LOAD {
                return None;
            }

            let file_offset = phdr.offset as usize;
            let file_size = phdr.filesz as usize;

            // Bounds-check the segment data within the file
            let seg_data = if file_size == 0 {
                &[] as &[u8]
            } else if file_offset + file_size <= data.len() {
                &data[file_offset..file_offset + file_size]
            } else {
                // Truncated segment — return what we can
                &data[file_offset.min(data.len())..data.len()]
            };

            Some(LoadSegment {
                vaddr: phdr.vaddr,
                offset: phdr.offset,
                data: seg_data,
                memsz: phdr.memsz,
            })
        })
    }
}

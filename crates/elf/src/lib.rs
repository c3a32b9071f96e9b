//! Minimal ELF64 parser for FreeBSD kernel images.
//!
//! Parses ELF64 headers, `PT_LOAD` program headers, and section headers
//! (symbol and string tables) from raw byte slices using safe field
//! extraction (`from_le_bytes`). No unsafe code, no allocations.
//!
//! The validation set is what a FreeBSD/amd64 kernel must satisfy:
//! 64-bit, little-endian, FreeBSD OS ABI, `EM_X86_64`, and either
//! `ET_EXEC` (a kernel) or `ET_REL` (a loadable module).
//!
//! # Usage
//!
//! ```
//! use beastie_elf::{ElfFile, ElfType};
//!
//! fn load_kernel(data: &[u8]) {
//!     let elf = ElfFile::parse(data).expect("valid ELF");
//!     assert_eq!(elf.elf_type(), ElfType::Exec);
//!     let btext = elf.entry_point();
//!     for seg in elf.load_segments() {
//!         // Copy seg.data to the physical slot for seg.vaddr,
//!         // zero-fill up to seg.memsz.
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod header;
pub mod section;
pub mod segment;

pub use header::{Elf64Header, ElfError, ElfType};
pub use section::{Elf64SectionHeader, SHT_NOBITS, SHT_STRTAB, SHT_SYMTAB};
pub use segment::{ElfFile, LoadSegment};

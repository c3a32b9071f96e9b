//! Kernel symbol table block.
//!
//! The kernel's debugger support reads two length-prefixed tables at
//! `MODINFOMD_SSYM`: first the symbol table, then the string table. Each
//! is `u64 size | bytes | pad to 8`. The order is a contract.

use crate::image::buffer::ByteBuffer;

/// Writer for the symbols block.
#[derive(Debug, Default)]
pub struct SymbolsWriter {
    buf: ByteBuffer,
}

impl SymbolsWriter {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the ELF `.symtab` bytes. Must be called before
    /// [`SymbolsWriter::add_strtab`].
    pub fn add_symtab(&mut self, bytes: &[u8]) {
        self.push_table(bytes);
    }

    /// Appends the ELF `.strtab` bytes.
    pub fn add_strtab(&mut self, bytes: &[u8]) {
        self.push_table(bytes);
    }

    fn push_table(&mut self, bytes: &[u8]) {
        self.buf.push_u64(bytes.len() as u64);
        self.buf.push_bytes(bytes);
        self.buf.align_to(8);
    }

    /// Block size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// The block bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

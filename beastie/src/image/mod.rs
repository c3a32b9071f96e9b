//! Boot image block writers.
//!
//! Each writer owns a byte buffer in the exact in-memory layout the
//! FreeBSD kernel expects to find at its physical placement: the loader
//! metadata stream, the environment string pool, and the symbol table
//! block.

pub mod buffer;
pub mod env;
pub mod meta;
pub mod symbols;

pub use buffer::ByteBuffer;
pub use env::EnvWriter;
pub use meta::MetaWriter;
pub use symbols::SymbolsWriter;

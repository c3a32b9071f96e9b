//! Small x86-64 assembler for boot trampoline generation.
//!
//! Emits position-fixed machine code into named sections with symbolic
//! labels. The instruction surface is the subset a boot trampoline needs:
//! register/immediate moves, RIP-relative loads and stores, the descriptor
//! table and control register instructions, port I/O, short branches, and
//! raw data directives.
//!
//! Code is built in two phases, the way a relocating assembler works:
//! emit instructions (forward references record fixups), then
//! [`Assembler::resolve`] patches every displacement against the image
//! base address and validates section bounds. [`Assembler::image`]
//! flattens all sections into one zero-padded byte vector.
//!
//! Validation is strict: displacement overflow, unresolved or doubly
//! bound labels, and section overflow all surface as [`AsmError`].
//!
//! ```
//! use beastie_x86asm::{Assembler, Gp};
//!
//! let mut asm = Assembler::new(0x10_0000);
//! let done = asm.new_named_label("done");
//! asm.cli();
//! asm.jmp(done);
//! asm.bind(done).unwrap();
//! asm.hlt();
//! asm.resolve().unwrap();
//! let bytes = asm.image();
//! assert_eq!(bytes[0], 0xfa); // cli
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod code;
mod error;
mod insn;
mod reg;

pub use code::{Assembler, Label, SectionId};
pub use error::AsmError;
pub use insn::Mem;
pub use reg::{Gp, SReg};

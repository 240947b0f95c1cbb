//! DCPU-16 two-pass assembler and linker with optional human-readable listing
//! (feature: "listing")
//!
//! ## Features
//! - **Full instruction set**: the basic (`OP b, a`) and special (`OP a`)
//!   opcodes, plus the multiprocessor extensions `SND`, `RCV`, `IFW`, `IFR`
//!   and `BRK`.
//! - **Expressions** in every operand: `+ - * / % ** & | ^`, parentheses,
//!   unary minus, labels and constants. `[register + expression]` selects the
//!   indexed addressing forms.
//! - **Forward references**: operands naming labels defined later are
//!   reserved a word and patched once the whole program has been read.
//! - **Directives**:
//!   - `:label` / `label:` define a label.
//!   - `.dat 1, 0x20, "text", ?` emit raw words.
//!   - `.def NAME, value` define a constant.
//!   - `.export NAME` publish a symbol to other modules.
//!   - `.repeat n` ... `.end` repeat a block; labels inside are local to
//!     each copy.
//! - **Relocation and linking**: assemble for any base address, or link
//!   several modules with [`assemble_multiple`].
//!
//! ## Optional Features
//! - `listing`: enables functions to print and save human-readable assembly listings.
//!
//! ## Basic Usage
//! ```rust
//! use dcpu16asm::Assembler;
//!
//! fn main() -> Result<(), dcpu16asm::AsmError> {
//!     let mut assembler = Assembler::new();
//!     let src = r#"
//!         set x, 10
//!         add x, 1
//!     "#;
//!
//!     let words = assembler.assemble_words(src)?;
//!     assert_eq!(words, vec![0b1010110001100001, 0b1000100001100010]);
//!     Ok(())
//! }
//! ```

mod addressing;
mod assembler;
mod error;
mod eval;
mod link;
#[cfg(feature = "listing")]
mod listing;
mod opcodes;
mod parser;
mod symbol;

// Public exports
pub use addressing::{ArgPos, Register};
pub use assembler::{assemble, Assembler, AssemblerSettings, Endian, MemoryImage, ReturnInfo, MEM_SIZE};
pub use error::{AsmError, ErrorInfo, ErrorKind};
pub use link::{assemble_multiple, DelayedExpression, ExportTable, PatchPosition};
#[cfg(feature = "listing")]
pub use listing::render_listing;
pub use opcodes::{split_binary, OpClass, Opcode};
pub use symbol::{Label, SymbolLookup, SymbolTable};

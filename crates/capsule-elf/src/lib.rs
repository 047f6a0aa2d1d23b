//! ELF Metadata Parsing
//!
//! This crate reads just enough of an ELF shared object to answer the
//! questions the capsule loader asks about a native module:
//! - which libraries does it declare as needed (`DT_NEEDED`)?
//! - what is its soname (`DT_SONAME`)?
//! - what is its runtime search path (`DT_RPATH`/`DT_RUNPATH`), and at
//!   which file offset does that string live, so it can be rewritten in
//!   place without relinking?
//!
//! It is a reader, not a linker: program headers, relocations, and symbols
//! are never touched.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod header;
pub mod image;
pub mod strtab;
pub mod testimage;

mod reader;

pub use header::{ElfClass, ElfHeader, SectionHeader};
pub use image::{DynamicEntry, ElfImage, FormatError, RunPath};
pub use strtab::StringTable;

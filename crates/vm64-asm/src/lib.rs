//! vm64 assembler library: preprocessing, assembly and linking.

use env_logger as _;
#[cfg(test)]
use tempfile as _;

/// Source lines to object modules.
pub mod assembler;
/// Structured assembler and linker error types.
pub mod errors;
/// Object module records.
pub mod object;
/// Joins object modules into a flat image.
pub mod linker;
/// `%include`, `%define` and conditional assembly.
pub mod preprocess;
/// Line cleaning.
pub mod source;

pub use assembler::{assemble, assemble_file};
pub use errors::{AsmError, AsmErrorKind, LinkError, LinkErrorKind, SourceLoc};
pub use linker::{link, LinkedImage};
pub use object::ObjectModule;
pub use preprocess::{preprocess_file, Preprocessed, Preprocessor};

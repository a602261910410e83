//! Shared utilities: binary lookup and option rendering.

pub mod binary;
pub mod options;

pub use binary::{resolve_binaries, resolve_binary_path, validate_binary, validate_binary_spec, BinaryError, ResolvedBinaries};
pub use options::{merge_options, options_to_lines};

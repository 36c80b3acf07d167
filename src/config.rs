// ABOUTME: Compiler-wide constants — version string and fixed input/output filenames

pub const VERSION: &str = "1.0.0";

/// Always parsed first, before any file named on the command line (spec.md §6).
pub const RUNTIME_SOURCE_NAME: &str = "runtime.lisp";
pub const RUNTIME_SOURCE: &str = include_str!("runtime.lisp");

pub const HEX_OUTPUT_FILE: &str = "program.hex";
pub const LISTING_OUTPUT_FILE: &str = "program.lst";

// ABOUTME: Orchestrates parse -> macro-expand -> optimize -> codegen for a set of source texts

use std::fmt::Write as _;

use crate::codegen::{self, CompiledProgram};
use crate::error::CompileError;
use crate::macroexpand;
use crate::optimizer;
use crate::parser;
use crate::value::Expr;

pub struct CompileOutput {
    pub program: CompiledProgram,
    pub expanded: Vec<Expr>,
}

/// Compile `sources` (label, text) in order — the runtime library must be
/// first, per spec.md §6 — into a finished program.
pub fn compile_sources(sources: &[(&str, &str)]) -> Result<CompileOutput, CompileError> {
    let mut forms = Vec::new();
    for (label, text) in sources {
        let parsed = parser::parse_program(text).map_err(|e| {
            log::error!("{}: {}", label, e);
            e
        })?;
        forms.extend(parsed);
    }

    let (rest, macros) = macroexpand::collect_macros(forms)?;
    let expanded = macroexpand::expand_program(&rest, &macros)?;
    let optimized = optimizer::optimize_program(&expanded);
    let program = codegen::compile_program(&optimized)?;

    Ok(CompileOutput {
        program,
        expanded: optimized,
    })
}

/// `program.hex`: one six-digit lowercase hex word per line, in emission order.
pub fn format_hex(words: &[u32]) -> String {
    let mut out = String::new();
    for word in words {
        writeln!(out, "{:06x}", word).unwrap();
    }
    out
}

// ABOUTME: Human-readable disassembly listing — program.lst (spec.md §6)

use std::fmt::Write as _;

use crate::codegen::CompiledProgram;
use crate::error::CompileError;
use crate::opcode::decode;
use crate::value::Expr;

/// Render `program`'s listing: a `Globals:` section, each retained
/// function's disassembly, then the fully expanded program as pretty
/// S-expressions.
pub fn render(program: &CompiledProgram, expanded: &[Expr]) -> Result<String, CompileError> {
    let mut out = String::new();

    writeln!(out, "Globals:").unwrap();
    for (name, index) in &program.globals {
        writeln!(out, "  {}\t{}", index, name).unwrap();
    }
    writeln!(out).unwrap();

    for function in &program.functions {
        writeln!(out, "{}:", function.name).unwrap();
        for (offset, &word) in function.code.iter().enumerate() {
            let address = function.base_address + offset;
            let (opcode, operand) = decode(word)?;
            if opcode.has_operand() {
                writeln!(out, "{}\t{}\t{}", address, opcode.mnemonic(), operand).unwrap();
            } else {
                writeln!(out, "{}\t{}", address, opcode.mnemonic()).unwrap();
            }
        }
        writeln!(out).unwrap();
    }

    writeln!(out, "Expanded program:").unwrap();
    for expr in expanded {
        writeln!(out, "{}", expr).unwrap();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::compile_program;

    #[test]
    fn test_render_contains_sections() {
        let program = vec![Expr::symbol_seq("+", vec![Expr::Int(2), Expr::Int(3)])];
        let compiled = compile_program(&program).unwrap();
        let text = render(&compiled, &program).unwrap();
        assert!(text.contains("Globals:"));
        assert!(text.contains("<main>:"));
        assert!(text.contains("Expanded program:"));
    }
}

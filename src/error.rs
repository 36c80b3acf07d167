// ABOUTME: Error types for the parser, macro expander, optimizer and code generator

use thiserror::Error;

// ===== Arity constant strings (eliminates allocations in error paths) =====
pub const ARITY_ONE: &str = "1";
pub const ARITY_TWO: &str = "2";
pub const ARITY_AT_LEAST_ONE: &str = "at least 1";

/// Every fatal condition spec.md §7 enumerates: lexical/syntactic (unmatched
/// paren), semantic (bad assignment, closures, operand range, undefined
/// label), and internal invariant violations (unknown symbol/fixup kind).
///
/// Non-fatal conditions — a macro invoked with the wrong argument count, and
/// an uninitialized global left over at link time — are *not* represented
/// here. They are logged via `log::warn!` at the call site and compilation
/// continues, per spec.md §7(3).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unmatched )")]
    UnmatchedParen,

    #[error("{form}: expected {expected} argument{}, got {actual}", if expected == "1" { "" } else { "s" })]
    ArityMismatch {
        form: String,
        expected: String,
        actual: usize,
    },

    #[error("{context}: operand {value} out of 16-bit range")]
    OperandOutOfRange { context: String, value: i64 },

    #[error("closures not implemented: variable '{0}' defined in an enclosing function")]
    ClosureNotImplemented(String),

    #[error("cannot assign to function '{0}'")]
    AssignToFunction(String),

    #[error("undefined label referenced in function '{0}'")]
    UndefinedLabel(String),

    #[error("malformed '{form}': {message}")]
    MalformedForm { form: String, message: String },

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn malformed(form: &str, message: impl Into<String>) -> Self {
        CompileError::MalformedForm {
            form: form.to_string(),
            message: message.into(),
        }
    }

    pub fn arity(form: &str, expected: impl Into<String>, actual: usize) -> Self {
        CompileError::ArityMismatch {
            form: form.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    pub fn operand_out_of_range(context: &str, value: i64) -> Self {
        CompileError::OperandOutOfRange {
            context: context.to_string(),
            value,
        }
    }
}

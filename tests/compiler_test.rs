// ABOUTME: End-to-end pipeline tests covering the scenarios and testable
// properties described for the compiler's overall behavior.

use lispvm_compiler::codegen::compile_program;
use lispvm_compiler::driver::compile_sources;
use lispvm_compiler::macroexpand::{collect_macros, expand_program};
use lispvm_compiler::opcode::{decode, Opcode};
use lispvm_compiler::optimizer::optimize_program;
use lispvm_compiler::parser::parse_program;

/// Runs the same pipeline stages as `driver::compile_sources` (parse,
/// expand macros, optimize, codegen) for a single source with no embedded
/// runtime library, so tests can check codegen's reaction to already-
/// optimized input without pulling in `cons`.
fn compile(src: &str) -> lispvm_compiler::codegen::CompiledProgram {
    let forms = parse_program(src).unwrap();
    let (rest, macros) = collect_macros(forms).unwrap();
    let expanded = expand_program(&rest, &macros).unwrap();
    let optimized = optimize_program(&expanded);
    compile_program(&optimized).unwrap()
}

fn opcodes_in(words: &[u32]) -> Vec<Opcode> {
    words.iter().map(|&w| decode(w).unwrap().0).collect()
}

/// Scenario 1: calling a two-argument function loads both arguments, pushes
/// the function's address, calls, and cleans up the two stack slots.
#[test]
fn test_function_call_emits_load_call_cleanup() {
    let program = compile("(function add (a b) (+ a b)) (add 2 3)");

    let add_fn = program
        .functions
        .iter()
        .find(|f| f.name == "add")
        .expect("add should be retained, it is referenced by the call");
    assert!(opcodes_in(&add_fn.code).contains(&Opcode::Add));

    let main_fn = program.functions.iter().find(|f| f.name == "<main>").unwrap();
    let ops = opcodes_in(&main_fn.code);
    let call_pos = ops.iter().position(|&o| o == Opcode::Call).unwrap();
    assert_eq!(ops[call_pos + 1], Opcode::Cleanup);
}

/// Scenario 2: constant folding resolves `(+ 2 3)` at optimize time, so no
/// `add` opcode is ever emitted.
#[test]
fn test_constant_folded_addition_emits_no_add() {
    let program = compile("(+ 2 3)");
    let all_ops: Vec<Opcode> = program
        .functions
        .iter()
        .flat_map(|f| opcodes_in(&f.code))
        .collect();
    assert!(!all_ops.contains(&Opcode::Add));
    assert!(all_ops.contains(&Opcode::Push));
}

/// Scenario 3: multiplying by a power of two becomes a left shift, never a
/// multiply opcode (there is none) and never a literal push of the
/// original power-of-two operand.
#[test]
fn test_multiply_by_power_of_two_uses_shift() {
    let program = compile("(function f (x) (* x 8))");
    let f = program.functions.iter().find(|f| f.name == "f").unwrap();
    assert!(opcodes_in(&f.code).contains(&Opcode::LShift));
    assert!(!f
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 8)));
}

/// Scenario 4: an `if` with a constant test is resolved entirely by the
/// optimizer — only the live branch's code is ever emitted.
#[test]
fn test_if_constant_test_eliminates_dead_branch() {
    let program = compile("(function f () (if 0 10 20))");
    let f = program.functions.iter().find(|f| f.name == "f").unwrap();
    assert!(f
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 20)));
    assert!(!f
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 10)));
    assert!(!opcodes_in(&f.code).contains(&Opcode::BFalse));

    let program2 = compile("(function g () (if 1 30))");
    let g = program2.functions.iter().find(|f| f.name == "g").unwrap();
    assert!(g
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 30)));
    assert!(!opcodes_in(&g.code).contains(&Opcode::BFalse));
}

/// Scenario 5: a constant-zero operand in an `and` collapses the whole
/// expression to a literal zero at optimize time.
#[test]
fn test_and_with_constant_zero_short_circuits() {
    let program = compile("(function f () (and 5 0))");
    let f = program.functions.iter().find(|f| f.name == "f").unwrap();
    assert!(f
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 0)));
    assert!(!opcodes_in(&f.code).contains(&Opcode::And));
}

/// Scenario 6: `break` inside a `while` leaves its value on the stack via
/// the same landing site the loop's default (no-break) value uses.
#[test]
fn test_while_break_leaves_value_on_stack() {
    let program = compile(
        "(function f (n) (while (> n 0) (break 7) (assign n (- n 1))))",
    );
    let f = program.functions.iter().find(|f| f.name == "f").unwrap();
    assert!(f
        .code
        .iter()
        .any(|&w| decode(w).unwrap() == (Opcode::Push, 7)));
    assert!(opcodes_in(&f.code).contains(&Opcode::Goto));
}

/// Testable property (vi): a self-recursive tail call rewrites arguments
/// in place and jumps back to the entry label — it never emits `call`.
#[test]
fn test_tail_recursive_self_call_never_emits_call() {
    let program = compile("(function count (n) (if (= n 0) 0 (count (- n 1))))");
    let count_fn = program.functions.iter().find(|f| f.name == "count").unwrap();
    assert!(!opcodes_in(&count_fn.code).contains(&Opcode::Call));
    assert!(opcodes_in(&count_fn.code).contains(&Opcode::Goto));
}

/// Invariant: every function's code begins with `reserve`, and `<main>` is
/// always first in emission order regardless of declaration order.
#[test]
fn test_main_is_first_and_functions_start_with_reserve() {
    let program = compile("(function helper (x) x) (helper 1)");
    assert_eq!(program.functions[0].name, "<main>");
    for f in &program.functions {
        let (op, _) = decode(f.code[0]).unwrap();
        assert_eq!(op, Opcode::Reserve);
    }
}

/// Invariant: every emitted word decodes to a known opcode with an operand
/// in 16-bit range (decode() itself enforces this, so a successful decode
/// over the whole program is the property).
#[test]
fn test_all_words_decode_cleanly() {
    let program = compile("(function fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 6)");
    for &word in &program.words {
        decode(word).expect("every word must decode to a known opcode in range");
    }
}

/// Dead functions (never referenced) are dropped from the final layout.
#[test]
fn test_unreferenced_function_is_dropped() {
    let program = compile("(function used (x) x) (function unused (x) (+ x 1)) (used 5)");
    assert!(program.functions.iter().any(|f| f.name == "used"));
    assert!(!program.functions.iter().any(|f| f.name == "unused"));
}

/// `$heapstart` is registered as a global and `<main>`'s reserved-globals
/// slot (code[1]) ends up holding the final global count.
#[test]
fn test_heapstart_global_registered() {
    let program = compile("(quote (1 2 3))");
    assert!(program.globals.iter().any(|(name, _)| name == "$heapstart"));
    let main_fn = program.functions.iter().find(|f| f.name == "<main>").unwrap();
    let (_, globals_count) = decode(main_fn.code[1]).unwrap();
    assert_eq!(globals_count as usize, program.globals.len());
}

/// `(quote "hi")` lowers the raw token, quote characters included — a
/// quoted string in quote position is not stripped the way a string
/// literal in expression position is.
#[test]
fn test_quote_of_string_keeps_surrounding_quote_characters() {
    let program = compile("(quote \"hi\")");
    let main_fn = program.functions.iter().find(|f| f.name == "<main>").unwrap();
    let quote_char_pushes = main_fn
        .code
        .iter()
        .filter(|&&w| decode(w).unwrap() == (Opcode::Push, '"' as i16))
        .count();
    assert_eq!(quote_char_pushes, 2);
}

/// The full pipeline (runtime + user source) compiles end to end, and the
/// embedded `cons` is only pulled in (and retained) when something in the
/// user program actually needs list construction.
#[test]
fn test_full_pipeline_with_runtime_and_quote() {
    let runtime = lispvm_compiler::config::RUNTIME_SOURCE;
    let out = compile_sources(&[("runtime.lisp", runtime), ("user", "(quote (1 2))")]).unwrap();
    assert!(out.program.functions.iter().any(|f| f.name == "cons"));
    for &word in &out.program.words {
        decode(word).unwrap();
    }
}

/// `when`/`unless`/`inc!` macros from the runtime library expand and
/// compile without error.
#[test]
fn test_runtime_macros_expand_and_compile() {
    let runtime = lispvm_compiler::config::RUNTIME_SOURCE;
    let out = compile_sources(&[
        ("runtime.lisp", runtime),
        (
            "user",
            "(function f (n) (when (> n 0) (assign n (- n 1))) n)",
        ),
    ])
    .unwrap();
    assert!(out.program.functions.iter().any(|f| f.name == "f"));
}

// ABOUTME: Constant-folding and strength-reduction optimizer, run once between macro expansion and code generation

use crate::value::Expr;

fn binop_fold(op: &str, a: i32, b: i32) -> Option<i32> {
    Some(match op {
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        "bitwise-and" => a & b,
        "bitwise-or" => a | b,
        "bitwise-xor" => a ^ b,
        "lshift" => a.wrapping_shl(b as u32),
        "rshift" => a.wrapping_shr(b as u32),
        ">" => (a > b) as i32,
        ">=" => (a >= b) as i32,
        "<" => (a < b) as i32,
        "<=" => (a <= b) as i32,
        "=" => (a == b) as i32,
        "<>" => (a != b) as i32,
        _ => return None,
    })
}

fn is_binop(op: &str) -> bool {
    matches!(
        op,
        "+" | "-"
            | "*"
            | "/"
            | "bitwise-and"
            | "bitwise-or"
            | "bitwise-xor"
            | "lshift"
            | "rshift"
            | ">"
            | ">="
            | "<"
            | "<="
            | "="
            | "<>"
    )
}

/// Truncate a folded constant to the VM's 16-bit two's-complement word
/// width, per spec.md §4.3 "every folded constant is truncated to 16 bits
/// the same way a `push` of that value would be at code-generation time".
fn truncate16(n: i32) -> i32 {
    (n as i16) as i32
}

/// A power of two in `[1, 2^15]`, returned as its shift amount, for
/// strength-reducing `*`/`/` by a constant.
fn power_of_two_shift(n: i32) -> Option<u32> {
    if n > 0 && (n & (n - 1)) == 0 {
        Some(n.trailing_zeros())
    } else {
        None
    }
}

/// Rewrite `expr` bottom-up into an equivalent, simpler form. Quoted
/// subtrees are opaque and never descended into (spec.md §4.3).
pub fn optimize(expr: &Expr) -> Expr {
    let items = match expr {
        Expr::Seq(items) if !items.is_empty() => items,
        _ => return expr.clone(),
    };

    if items[0].as_atom() == Some("quote") {
        return expr.clone();
    }

    let folded: Vec<Expr> = items.iter().map(optimize).collect();
    let head = folded[0].as_atom();

    match (head, folded.len()) {
        (Some("not"), 2) => {
            if let Some(n) = folded[1].as_int() {
                return Expr::Int(if n == 0 { 1 } else { 0 });
            }
        }
        (Some("and"), 3) => {
            if let Some(0) = folded[1].as_int() {
                return Expr::Int(0);
            }
            if let Some(0) = folded[2].as_int() {
                return Expr::Int(0);
            }
        }
        (Some("or"), 3) => {
            if let Some(a) = folded[1].as_int() {
                if a != 0 {
                    return Expr::Int(a);
                }
            }
            if let Some(b) = folded[2].as_int() {
                if b != 0 {
                    return folded[2].clone();
                }
            }
        }
        (Some("if"), 3) | (Some("if"), 4) => {
            if let Some(cond) = folded[1].as_int() {
                if cond != 0 {
                    return folded[2].clone();
                } else if folded.len() == 4 {
                    return folded[3].clone();
                } else {
                    return Expr::Int(0);
                }
            }
        }
        (Some(op), 3) if is_binop(op) => {
            // Both operands constant: fold fully. Only fall through to
            // strength-reduction when at least one operand is not a
            // constant — a fully-constant `*`/`/` must fold to a single
            // `Int`, never a shift, or re-optimizing the result would
            // change it again.
            if let (Some(a), Some(b)) = (folded[1].as_int(), folded[2].as_int()) {
                if let Some(result) = binop_fold(op, a, b) {
                    return Expr::Int(truncate16(result));
                }
            } else if op == "*" {
                if let Some(n) = folded[2].as_int() {
                    if let Some(shift) = power_of_two_shift(n) {
                        return Expr::symbol_seq(
                            "lshift",
                            vec![folded[1].clone(), Expr::Int(shift as i32)],
                        );
                    }
                }
                if let Some(n) = folded[1].as_int() {
                    if let Some(shift) = power_of_two_shift(n) {
                        return Expr::symbol_seq(
                            "lshift",
                            vec![folded[2].clone(), Expr::Int(shift as i32)],
                        );
                    }
                }
            } else if op == "/" {
                if let Some(n) = folded[2].as_int() {
                    if let Some(shift) = power_of_two_shift(n) {
                        return Expr::symbol_seq(
                            "rshift",
                            vec![folded[1].clone(), Expr::Int(shift as i32)],
                        );
                    }
                }
            }
        }
        _ => {}
    }

    Expr::Seq(folded)
}

pub fn optimize_program(program: &[Expr]) -> Vec<Expr> {
    program.iter().map(optimize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_addition() {
        let e = Expr::symbol_seq("+", vec![Expr::Int(2), Expr::Int(3)]);
        assert_eq!(optimize(&e), Expr::Int(5));
    }

    #[test]
    fn test_strength_reduce_multiply_by_power_of_two() {
        let e = Expr::symbol_seq("*", vec![Expr::atom("x"), Expr::Int(8)]);
        assert_eq!(
            optimize(&e),
            Expr::symbol_seq("lshift", vec![Expr::atom("x"), Expr::Int(3)])
        );
    }

    #[test]
    fn test_strength_reduce_divide_by_power_of_two() {
        let e = Expr::symbol_seq("/", vec![Expr::atom("x"), Expr::Int(4)]);
        assert_eq!(
            optimize(&e),
            Expr::symbol_seq("rshift", vec![Expr::atom("x"), Expr::Int(2)])
        );
    }

    #[test]
    fn test_multiply_two_constants_folds_fully_even_when_one_is_a_power_of_two() {
        let e = Expr::symbol_seq("*", vec![Expr::Int(2), Expr::Int(3)]);
        assert_eq!(optimize(&e), Expr::Int(6));
    }

    #[test]
    fn test_multiply_by_non_power_of_two_is_not_reduced() {
        let e = Expr::symbol_seq("*", vec![Expr::atom("x"), Expr::Int(6)]);
        assert_eq!(
            optimize(&e),
            Expr::symbol_seq("*", vec![Expr::atom("x"), Expr::Int(6)])
        );
    }

    #[test]
    fn test_if_constant_test_resolves_taken_branch() {
        let e = Expr::symbol_seq("if", vec![Expr::Int(0), Expr::atom("a"), Expr::atom("b")]);
        assert_eq!(optimize(&e), Expr::atom("b"));

        let e = Expr::symbol_seq("if", vec![Expr::Int(1), Expr::atom("a")]);
        assert_eq!(optimize(&e), Expr::atom("a"));

        let e = Expr::symbol_seq("if", vec![Expr::Int(0), Expr::atom("a")]);
        assert_eq!(optimize(&e), Expr::Int(0));
    }

    #[test]
    fn test_and_or_short_circuit() {
        assert_eq!(
            optimize(&Expr::symbol_seq("and", vec![Expr::Int(0), Expr::atom("x")])),
            Expr::Int(0)
        );
        assert_eq!(
            optimize(&Expr::symbol_seq("or", vec![Expr::Int(5), Expr::atom("x")])),
            Expr::Int(5)
        );
    }

    #[test]
    fn test_quote_is_opaque() {
        let e = Expr::symbol_seq(
            "quote",
            vec![Expr::symbol_seq("+", vec![Expr::Int(2), Expr::Int(3)])],
        );
        assert_eq!(optimize(&e), e);
    }

    #[test]
    fn test_folding_truncates_to_16_bits() {
        let e = Expr::symbol_seq("+", vec![Expr::Int(32760), Expr::Int(100)]);
        assert_eq!(optimize(&e), Expr::Int(((32760i32 + 100) as i16) as i32));
    }

    #[test]
    fn test_idempotent() {
        let e = Expr::symbol_seq(
            "if",
            vec![
                Expr::symbol_seq("+", vec![Expr::Int(1), Expr::Int(1)]),
                Expr::symbol_seq("*", vec![Expr::atom("y"), Expr::Int(16)]),
                Expr::atom("z"),
            ],
        );
        let once = optimize(&e);
        let twice = optimize(&once);
        assert_eq!(once, twice);
    }
}

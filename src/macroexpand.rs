// ABOUTME: Macro processor — collects defmacro forms and expands macro invocations via a small tree evaluator

use std::collections::HashMap;

use crate::error::CompileError;
use crate::macros::MacroRegistry;
use crate::value::Expr;

/// Binary arithmetic/bitwise/comparison operators the macro evaluator (and
/// the optimizer) understand, per spec.md §4.2/§4.3.
fn eval_binop(op: &str, a: i32, b: i32) -> Option<i32> {
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

/// Separate `defmacro` declarations from the rest of the program and
/// register them. Matches spec.md §4.2 "Collection": `(defmacro NAME
/// (PARAMS...) BODY)` is removed from the program and recorded.
pub fn collect_macros(program: Vec<Expr>) -> Result<(Vec<Expr>, MacroRegistry), CompileError> {
    let mut registry = MacroRegistry::new();
    let mut rest = Vec::with_capacity(program.len());

    for form in program {
        if form.head_atom() == Some("defmacro") {
            let items = form.as_seq().unwrap();
            if items.len() != 4 {
                return Err(CompileError::malformed(
                    "defmacro",
                    "expected (defmacro NAME (PARAMS...) BODY)",
                ));
            }
            let name = items[1]
                .as_atom()
                .ok_or_else(|| CompileError::malformed("defmacro", "name must be an atom"))?
                .to_string();
            let params = items[2]
                .as_seq()
                .ok_or_else(|| CompileError::malformed("defmacro", "params must be a list"))?
                .iter()
                .map(|p| {
                    p.as_atom()
                        .map(|s| s.to_string())
                        .ok_or_else(|| CompileError::malformed("defmacro", "param must be an atom"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            registry.define(name, params, items[3].clone());
        } else {
            rest.push(form);
        }
    }

    Ok((rest, registry))
}

/// Expand every macro invocation in `program` against `macros`. Recurses
/// into every subtree, including quoted ones — macro expansion, unlike the
/// optimizer, is not quote-aware (per the behavior of the system this
/// language was distilled from).
pub fn expand_program(program: &[Expr], macros: &MacroRegistry) -> Result<Vec<Expr>, CompileError> {
    program.iter().map(|e| expand(e, macros)).collect()
}

fn expand(expr: &Expr, macros: &MacroRegistry) -> Result<Expr, CompileError> {
    let items = match expr {
        Expr::Seq(items) if !items.is_empty() => items,
        _ => return Ok(expr.clone()),
    };

    if let Some(name) = items[0].as_atom() {
        if let Some((params, body)) = macros.get(name) {
            let args = &items[1..];
            if params.len() != args.len() {
                log::warn!(
                    "macro '{}' invoked with {} argument(s), expected {}",
                    name,
                    args.len(),
                    params.len()
                );
            }

            let expanded_args = args
                .iter()
                .map(|a| expand(a, macros))
                .collect::<Result<Vec<_>, _>>()?;

            let mut env = HashMap::new();
            for (param, arg) in params.iter().zip(expanded_args.iter()) {
                env.insert(param.clone(), arg.clone());
            }

            let result = eval_macro_body(body, &mut env, macros)?;
            return expand(&result, macros);
        }
    }

    let expanded = items
        .iter()
        .map(|e| expand(e, macros))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::Seq(expanded))
}

fn is_truthy(e: &Expr) -> bool {
    match e {
        Expr::Int(0) => false,
        Expr::Seq(items) if items.is_empty() => false,
        _ => true,
    }
}

/// The mini evaluator used to run a macro's body: §4.2 "Evaluator used
/// during expansion". Only a fixed set of primitive forms is understood;
/// calling a user-defined (non-macro) function here is unsupported.
fn eval_macro_body(
    expr: &Expr,
    env: &mut HashMap<String, Expr>,
    macros: &MacroRegistry,
) -> Result<Expr, CompileError> {
    match expr {
        Expr::Int(_) => Ok(expr.clone()),
        Expr::Atom(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::malformed("macro body", format!("unbound name '{}'", name))),
        Expr::Seq(items) => {
            if items.is_empty() {
                return Ok(expr.clone());
            }
            let head = items[0]
                .as_atom()
                .ok_or_else(|| CompileError::malformed("macro body", "head of form must be an atom"))?;

            match head {
                "first" => {
                    let list = eval_macro_body(&items[1], env, macros)?;
                    match list {
                        Expr::Seq(mut xs) if !xs.is_empty() => Ok(xs.remove(0)),
                        _ => Err(CompileError::malformed("first", "argument is not a non-empty list")),
                    }
                }
                "rest" => {
                    let list = eval_macro_body(&items[1], env, macros)?;
                    match list {
                        Expr::Seq(xs) if !xs.is_empty() => Ok(Expr::Seq(xs[1..].to_vec())),
                        _ => Err(CompileError::malformed("rest", "argument is not a non-empty list")),
                    }
                }
                "if" => {
                    let cond = eval_macro_body(&items[1], env, macros)?;
                    if is_truthy(&cond) {
                        // Evaluate the then-branch in the same environment.
                        eval_macro_body(&items[2], env, macros)
                    } else if items.len() > 3 {
                        eval_macro_body(&items[3], env, macros)
                    } else {
                        Ok(Expr::Int(0))
                    }
                }
                "assign" => {
                    let name = items[1]
                        .as_atom()
                        .ok_or_else(|| CompileError::malformed("assign", "target must be an atom"))?
                        .to_string();
                    let value = eval_macro_body(&items[2], env, macros)?;
                    env.insert(name, value.clone());
                    Ok(value)
                }
                "list" => {
                    let elems = items[1..]
                        .iter()
                        .map(|e| eval_macro_body(e, env, macros))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Expr::Seq(elems))
                }
                "quote" => Ok(items[1].clone()),
                "backquote" => expand_backquote(&items[1], env, macros),
                "cons" => {
                    let a = eval_macro_body(&items[1], env, macros)?;
                    let b = eval_macro_body(&items[2], env, macros)?;
                    Ok(Expr::Seq(vec![a, b]))
                }
                op if is_binop(op) => {
                    let a = eval_macro_body(&items[1], env, macros)?;
                    let b = eval_macro_body(&items[2], env, macros)?;
                    match (a.as_int(), b.as_int()) {
                        (Some(a), Some(b)) => eval_binop(op, a, b)
                            .map(Expr::Int)
                            .ok_or_else(|| CompileError::malformed(op, "division by zero")),
                        _ => Err(CompileError::malformed(op, "operands must be integers")),
                    }
                }
                _ => Err(CompileError::malformed(
                    "macro body",
                    format!("calling user-defined functions during macro expansion is unsupported (got '{}')", head),
                )),
            }
        }
    }
}

/// `backquote`'s nested-`unquote` substitution (spec.md §4.2).
fn expand_backquote(
    expr: &Expr,
    env: &mut HashMap<String, Expr>,
    macros: &MacroRegistry,
) -> Result<Expr, CompileError> {
    match expr {
        Expr::Seq(items) if items.first().and_then(|e| e.as_atom()) == Some("unquote") => {
            eval_macro_body(&items[1], env, macros)
        }
        Expr::Seq(items) => {
            let expanded = items
                .iter()
                .map(|e| expand_backquote(e, env, macros))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Seq(expanded))
        }
        _ => Ok(expr.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_removes_defmacro() {
        let program = vec![
            Expr::symbol_seq(
                "defmacro",
                vec![
                    Expr::atom("double"),
                    Expr::Seq(vec![Expr::atom("x")]),
                    Expr::symbol_seq("+", vec![Expr::atom("x"), Expr::atom("x")]),
                ],
            ),
            Expr::symbol_seq("double", vec![Expr::Int(21)]),
        ];
        let (rest, registry) = collect_macros(program).unwrap();
        assert_eq!(rest.len(), 1);
        assert!(registry.contains("double"));
    }

    #[test]
    fn test_expand_simple_macro() {
        let mut registry = MacroRegistry::new();
        registry.define(
            "double".to_string(),
            vec!["x".to_string()],
            Expr::symbol_seq("+", vec![Expr::atom("x"), Expr::atom("x")]),
        );
        let program = vec![Expr::symbol_seq("double", vec![Expr::Int(21)])];
        let expanded = expand_program(&program, &registry).unwrap();
        assert_eq!(
            expanded,
            vec![Expr::symbol_seq("+", vec![Expr::Int(21), Expr::Int(21)])]
        );
    }

    #[test]
    fn test_expand_if_then_branch_uses_same_env() {
        // (defmacro m (x) (if x (list x x) 0)); (m 5) -> (5 5)
        let mut registry = MacroRegistry::new();
        registry.define(
            "m".to_string(),
            vec!["x".to_string()],
            Expr::symbol_seq(
                "if",
                vec![
                    Expr::atom("x"),
                    Expr::symbol_seq("list", vec![Expr::atom("x"), Expr::atom("x")]),
                    Expr::Int(0),
                ],
            ),
        );
        let program = vec![Expr::symbol_seq("m", vec![Expr::Int(5)])];
        let expanded = expand_program(&program, &registry).unwrap();
        assert_eq!(expanded, vec![Expr::Seq(vec![Expr::Int(5), Expr::Int(5)])]);
    }

    #[test]
    fn test_expand_quasiquote_unquote() {
        // (defmacro m (x) (backquote (add (unquote x) 1))); (m 41) -> (add 41 1)
        let mut registry = MacroRegistry::new();
        registry.define(
            "m".to_string(),
            vec!["x".to_string()],
            Expr::symbol_seq(
                "backquote",
                vec![Expr::symbol_seq(
                    "add",
                    vec![
                        Expr::symbol_seq("unquote", vec![Expr::atom("x")]),
                        Expr::Int(1),
                    ],
                )],
            ),
        );
        let program = vec![Expr::symbol_seq("m", vec![Expr::Int(41)])];
        let expanded = expand_program(&program, &registry).unwrap();
        assert_eq!(
            expanded,
            vec![Expr::symbol_seq("add", vec![Expr::Int(41), Expr::Int(1)])]
        );
    }

    #[test]
    fn test_wrong_arity_warns_and_truncates() {
        let mut registry = MacroRegistry::new();
        registry.define(
            "m".to_string(),
            vec!["x".to_string(), "y".to_string()],
            Expr::atom("x"),
        );
        // Only one arg supplied; 'x' binds, 'y' left unbound but unused.
        let program = vec![Expr::symbol_seq("m", vec![Expr::Int(7)])];
        let expanded = expand_program(&program, &registry).unwrap();
        assert_eq!(expanded, vec![Expr::Int(7)]);
    }

    #[test]
    fn test_expansion_descends_into_quote() {
        let mut registry = MacroRegistry::new();
        registry.define("m".to_string(), vec![], Expr::Int(99));
        let program = vec![Expr::symbol_seq("quote", vec![Expr::symbol_seq("m", vec![])])];
        let expanded = expand_program(&program, &registry).unwrap();
        assert_eq!(expanded, vec![Expr::symbol_seq("quote", vec![Expr::Int(99)])]);
    }
}

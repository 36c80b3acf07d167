// ABOUTME: Parser module for parsing S-expressions using nom combinators

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, multispace1, none_of},
    combinator::{not, peek, recognize, value},
    multi::{many0, many1},
    IResult, Parser,
};

use crate::error::CompileError;
use crate::value::Expr;

/// Identifier/symbol characters beyond letters and digits, per spec.md §4.1.
const IDENT_PUNCTUATION: &str = "?+<>!@#$%^&*;:.=-_";

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || IDENT_PUNCTUATION.contains(c)
}

/// Skip a single `;`-to-end-of-line comment.
fn line_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char(';')(input)?;
    let (input, _) = take_while(|c| c != '\n')(input)?;
    Ok((input, ()))
}

/// Skip whitespace and line comments between tokens.
fn ws(input: &str) -> IResult<&str, ()> {
    many0(alt((value((), multispace1), line_comment)))
        .map(|_| ())
        .parse(input)
}

/// A maximal run of non-delimiter characters, not yet classified as int or atom.
fn raw_token(input: &str) -> IResult<&str, &str> {
    recognize(many1(none_of(" \t\r\n();'\"`,"))).parse(input)
}

fn is_integer_token(tok: &str) -> bool {
    let digits = tok.strip_prefix('-').unwrap_or(tok);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// A bare (non-string) token: either an integer literal or an atom.
fn parse_bare_token(input: &str) -> IResult<&str, Expr> {
    let (rest, tok) = raw_token(input)?;
    // raw_token is a superset of legal identifier chars (it also stops at
    // structural delimiters); validate that every char is actually legal.
    if !tok.chars().all(is_ident_char) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    if is_integer_token(tok) {
        match tok.parse::<i32>() {
            Ok(n) => Ok((rest, Expr::Int(n))),
            Err(_) => Ok((rest, Expr::atom(tok))),
        }
    } else {
        Ok((rest, Expr::atom(tok)))
    }
}

/// A double-quoted region, retained verbatim with its surrounding quotes.
/// No escape processing: matches the source tokenizer's non-posix quoting.
fn parse_quoted_string(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('"')(input)?;
    let (input, body) = take_while(|c| c != '"')(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, Expr::atom(format!("\"{}\"", body))))
}

fn parse_quote(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('\'')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, Expr::symbol_seq("quote", vec![expr])))
}

fn parse_backquote(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('`')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, Expr::symbol_seq("backquote", vec![expr])))
}

fn parse_unquote(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char(',')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, Expr::symbol_seq("unquote", vec![expr])))
}

/// Parses `(expr...)`. A missing closing paren is reported (caller logs a
/// warning) but the partial list collected so far is still returned —
/// tolerant recovery, per spec.md §4.1 and §7. The bool flags completeness.
fn parse_list(input: &str) -> IResult<&str, (Expr, bool)> {
    let (input, _) = char('(')(input)?;
    let mut remaining = input;
    let mut items = Vec::new();

    loop {
        let (rest, _) = ws(remaining)?;
        remaining = rest;

        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>(')')(remaining) {
            return Ok((rest, (Expr::Seq(items), true)));
        }

        if remaining.is_empty() {
            return Ok((remaining, (Expr::Seq(items), false)));
        }

        let (rest, expr) = parse_expr(remaining)?;
        items.push(expr);
        remaining = rest;
    }
}

fn parse_expr(input: &str) -> IResult<&str, Expr> {
    let (input, _) = ws(input)?;
    // Reject a lone ')' explicitly rather than letting `alt` fall through to
    // a confusing generic error.
    let (input, _) = not(peek(char(')'))).parse(input)?;
    alt((
        parse_quote,
        parse_backquote,
        parse_unquote,
        |i| parse_list(i).map(|(rest, (expr, _complete))| (rest, expr)),
        parse_quoted_string,
        parse_bare_token,
    ))
    .parse(input)
}

/// Parse every top-level form in `input`, in order. Used for both the
/// embedded runtime library and each user source file (spec.md §6).
pub fn parse_program(input: &str) -> Result<Vec<Expr>, CompileError> {
    let mut remaining = input;
    let mut program = Vec::new();

    loop {
        let (rest, _) = ws(remaining).unwrap_or((remaining, ()));
        remaining = rest;
        if remaining.is_empty() {
            break;
        }

        if remaining.starts_with(')') {
            return Err(CompileError::UnmatchedParen);
        }

        if let Some(body) = remaining.strip_prefix('(') {
            let (rest, (expr, complete)) =
                parse_list(remaining).map_err(|e| CompileError::Parse(format!("{:?}", e)))?;
            if !complete {
                log::warn!(
                    "missing ')' in form starting near: {}",
                    &body[..body.len().min(40)]
                );
            }
            program.push(expr);
            remaining = rest;
        } else {
            let (rest, expr) =
                parse_expr(remaining).map_err(|e| CompileError::Parse(format!("{:?}", e)))?;
            program.push(expr);
            remaining = rest;
        }
    }

    Ok(program)
}

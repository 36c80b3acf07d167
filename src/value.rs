// ABOUTME: Expression tree shared by every compiler stage (parser output, macro/optimizer input and output)

use std::fmt;

/// A node of the parsed program. Every stage from the parser through the
/// code generator operates on this tree: the macro expander rewrites it,
/// the optimizer rewrites it again, and the compiler walks the final form.
///
/// There is no dedicated string type: a source string literal survives
/// parsing as an `Atom` whose text still carries its surrounding `"`
/// characters (see `Expr::is_quoted_string`), and is lowered to a cons-list
/// of character codes at code-generation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A signed integer literal. Range is enforced (16-bit, two's
    /// complement) only at emit time, not at parse time.
    Int(i32),
    /// An identifier, a reserved-word head, a primitive name, or a
    /// quoted-string token (still wrapped in its original `"..."`).
    Atom(String),
    /// A finite ordered sequence: `()`, `(a b c)`, `(a . b)` (as a
    /// length-3 list whose middle element is the atom `.`), etc.
    Seq(Vec<Expr>),
}

impl Expr {
    pub fn atom(s: impl Into<String>) -> Expr {
        Expr::Atom(s.into())
    }

    pub fn symbol_seq(head: &str, rest: Vec<Expr>) -> Expr {
        let mut items = Vec::with_capacity(rest.len() + 1);
        items.push(Expr::atom(head));
        items.extend(rest);
        Expr::Seq(items)
    }

    /// The head atom of a non-empty sequence, if this is one.
    pub fn head_atom(&self) -> Option<&str> {
        match self {
            Expr::Seq(items) => match items.first() {
                Some(Expr::Atom(s)) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Expr]> {
        match self {
            Expr::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Expr::Atom(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Expr::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// True for an atom carrying the preserved `"..."` quoted-string form.
    pub fn is_quoted_string(&self) -> bool {
        matches!(self, Expr::Atom(s) if s.starts_with('"'))
    }

    /// The characters of a quoted-string atom, with the surrounding quotes
    /// stripped. Panics if this is not a quoted string; callers check
    /// `is_quoted_string` first.
    pub fn string_chars(&self) -> &str {
        match self {
            Expr::Atom(s) if s.starts_with('"') => &s[1..s.len() - 1],
            _ => panic!("string_chars called on a non-string atom"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Atom(s) => write!(f, "{}", s),
            Expr::Seq(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ABOUTME: Primitive name to opcode/arity table (spec.md §4.4.2)

use crate::opcode::Opcode;

#[derive(Debug, Clone, Copy)]
pub struct Primitive {
    pub opcode: Opcode,
    pub arity: usize,
    /// `<` and `<=` have no dedicated opcode: they reuse `gtr`/`gte` with
    /// their operands compiled in the opposite order from every other
    /// binary primitive.
    pub reverse_args: bool,
}

fn prim(opcode: Opcode, arity: usize) -> Primitive {
    Primitive {
        opcode,
        arity,
        reverse_args: false,
    }
}

pub fn lookup(name: &str) -> Option<Primitive> {
    Some(match name {
        "+" => prim(Opcode::Add, 2),
        "-" => prim(Opcode::Sub, 2),
        ">" => prim(Opcode::Gtr, 2),
        ">=" => prim(Opcode::Gte, 2),
        "=" => prim(Opcode::Eq, 2),
        "<>" => prim(Opcode::Neq, 2),
        "<" => Primitive {
            opcode: Opcode::Gtr,
            arity: 2,
            reverse_args: true,
        },
        "<=" => Primitive {
            opcode: Opcode::Gte,
            arity: 2,
            reverse_args: true,
        },
        "load" => prim(Opcode::Load, 1),
        "store" => prim(Opcode::Store, 2),
        "first" => prim(Opcode::Load, 1),
        "rest" => prim(Opcode::Rest, 1),
        "second" => prim(Opcode::Rest, 1),
        "settag" => prim(Opcode::SetTag, 2),
        "gettag" => prim(Opcode::GetTag, 1),
        "bitwise-and" => prim(Opcode::And, 2),
        "bitwise-or" => prim(Opcode::Or, 2),
        "bitwise-xor" => prim(Opcode::Xor, 2),
        "lshift" => prim(Opcode::LShift, 2),
        "rshift" => prim(Opcode::RShift, 2),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lt_reuses_gtr_reversed() {
        let p = lookup("<").unwrap();
        assert_eq!(p.opcode, Opcode::Gtr);
        assert!(p.reverse_args);
    }

    #[test]
    fn test_second_aliases_rest() {
        let p = lookup("second").unwrap();
        assert_eq!(p.opcode, Opcode::Rest);
    }

    #[test]
    fn test_unknown_primitive() {
        assert!(lookup("frobnicate").is_none());
    }
}

// ABOUTME: Symbol and scope-stack model shared by every function the code generator builds

use std::collections::HashMap;

/// Identifies a `Function` inside the compiler's function table. Functions
/// are stored in an arena (`HashMap<FunctionId, Function>`) rather than
/// linked by direct reference, so nested/anonymous functions can be built
/// and finished independently of their enclosing function.
pub type FunctionId = usize;

/// What an identifier resolves to, per spec.md §3 "Symbol".
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// A stack slot relative to the frame base (negative for locals,
    /// positive for parameters).
    Local,
    /// A slot in the global variable area, addressed by index.
    Global,
    /// A compiled function, referenced by its base address once laid out.
    Function(FunctionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub index: i32,
    pub initialized: bool,
}

impl Symbol {
    pub fn local(index: i32) -> Symbol {
        Symbol {
            kind: SymbolKind::Local,
            index,
            initialized: true,
        }
    }

    pub fn global(index: i32, initialized: bool) -> Symbol {
        Symbol {
            kind: SymbolKind::Global,
            index,
            initialized,
        }
    }

    pub fn function(id: FunctionId) -> Symbol {
        Symbol {
            kind: SymbolKind::Function(id),
            index: 0,
            initialized: true,
        }
    }
}

pub type Scope = HashMap<String, Symbol>;

/// A function's ordered stack of scopes. Lookup walks innermost to
/// outermost; reservation always targets the innermost scope (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the function's outermost scope");
    }

    pub fn define(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.into(), symbol);
    }

    /// Innermost-to-outermost lookup within this function only; does not
    /// fall through to the global table (the compiler does that).
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_shadows_outer() {
        let mut stack = ScopeStack::new();
        stack.define("x", Symbol::local(1));
        stack.push();
        stack.define("x", Symbol::local(-2));
        assert_eq!(stack.lookup("x").unwrap().index, -2);
        stack.pop();
        assert_eq!(stack.lookup("x").unwrap().index, 1);
    }

    #[test]
    fn test_lookup_missing_is_none() {
        let stack = ScopeStack::new();
        assert!(stack.lookup("missing").is_none());
    }
}

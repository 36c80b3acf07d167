// ABOUTME: Macro registry for storing and retrieving defmacro definitions

use crate::value::Expr;
use std::collections::HashMap;

/// Table of `defmacro` definitions collected from the program, keyed by
/// name. Mirrors spec.md §4.2 "Collection": a `defmacro` form registers a
/// macro here and is dropped from the program; everything else is expanded
/// against this table.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, (Vec<String>, Expr)>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        MacroRegistry::default()
    }

    pub fn define(&mut self, name: String, params: Vec<String>, body: Expr) {
        self.macros.insert(name, (params, body));
    }

    pub fn get(&self, name: &str) -> Option<&(Vec<String>, Expr)> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }
}

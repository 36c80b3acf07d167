// ABOUTME: Code generator — symbol environment, label/fixup machinery, and the top-level compile driver

mod expr;
pub mod function;
mod layout;
mod primitives;

use std::collections::HashMap;

use crate::error::CompileError;
use crate::opcode::{check_operand_range, Opcode};
use crate::symtab::{FunctionId, Symbol, SymbolKind};
use crate::value::Expr;
use function::Function;

/// Tag discriminator for the VM's `settag`/`gettag` pair, per the glossary.
const TAG_FUNCTION: i16 = 2;

#[derive(Debug, Clone)]
pub enum FixupTarget {
    Function(FunctionId),
    Symbol(String),
}

#[derive(Debug, Clone)]
pub struct GlobalFixup {
    pub function: FunctionId,
    pub offset: usize,
    pub target: FixupTarget,
}

/// The finished program: the concatenated instruction stream plus the
/// metadata `listing` needs (function names/addresses/code, global names
/// in slot order).
pub struct CompiledProgram {
    pub words: Vec<u32>,
    pub globals: Vec<(String, i32)>,
    pub functions: Vec<CompiledFunction>,
}

pub struct CompiledFunction {
    pub name: String,
    pub base_address: usize,
    pub code: Vec<u32>,
}

pub struct Compiler {
    functions: HashMap<FunctionId, Function>,
    building: Vec<Function>,
    next_id: FunctionId,
    emission_order: Vec<FunctionId>,
    globals: HashMap<String, Symbol>,
    global_fixups: Vec<GlobalFixup>,
}

impl Compiler {
    fn new() -> Compiler {
        Compiler {
            functions: HashMap::new(),
            building: Vec::new(),
            next_id: 0,
            emission_order: Vec::new(),
            globals: HashMap::new(),
            global_fixups: Vec::new(),
        }
    }

    fn current_fn(&mut self) -> &mut Function {
        self.building.last_mut().expect("no function is being built")
    }

    fn current_id(&self) -> FunctionId {
        self.building.last().expect("no function is being built").id
    }

    /// Start a new function, nested inside whatever is currently being
    /// built (or top-level if the building stack is empty). The very first
    /// call — for `<main>` — gets id 0, satisfying invariant (v).
    fn begin_function(&mut self, name: Option<String>) -> FunctionId {
        let id = self.next_id;
        self.next_id += 1;
        let enclosing = self.building.last().map(|f| f.id);
        self.building.push(Function::new(id, name, enclosing));
        id
    }

    /// Finish the function on top of the building stack and record it.
    /// `<main>` (id 0) occupies a pre-reserved slot in emission order so it
    /// always lands first regardless of how many nested functions finished
    /// while it was still being compiled.
    fn end_function(&mut self) -> FunctionId {
        let f = self.building.pop().expect("end_function with nothing building");
        let id = f.id;
        if id != 0 {
            self.emission_order.push(id);
        }
        self.functions.insert(id, f);
        id
    }

    fn mark_referenced(&mut self, id: FunctionId) {
        if let Some(f) = self.building.iter_mut().find(|f| f.id == id) {
            f.referenced = true;
        } else if let Some(f) = self.functions.get_mut(&id) {
            f.referenced = true;
        }
    }

    fn emit_push(&mut self, value: i32) -> Result<(), CompileError> {
        let operand = check_operand_range("push", value as i64)?;
        self.current_fn().emit(Opcode::Push, operand);
        Ok(())
    }

    fn emit_push_with_function_fixup(&mut self, id: FunctionId) -> Result<(), CompileError> {
        let function = self.current_id();
        let offset = self.current_fn().emit(Opcode::Push, 0);
        self.global_fixups.push(GlobalFixup {
            function,
            offset,
            target: FixupTarget::Function(id),
        });
        self.mark_referenced(id);
        Ok(())
    }

    fn emit_push_with_symbol_fixup(&mut self, name: &str) -> Result<(), CompileError> {
        let function = self.current_id();
        let offset = self.current_fn().emit(Opcode::Push, 0);
        self.global_fixups.push(GlobalFixup {
            function,
            offset,
            target: FixupTarget::Symbol(name.to_string()),
        });
        Ok(())
    }

    /// Resolve `name`: this function's own scopes, then enclosing functions
    /// still under construction (a `Local` found there is a closure
    /// reference, which is unsupported), then the global table, creating an
    /// uninitialized global as a last resort.
    fn resolve_identifier(&mut self, name: &str) -> Result<Symbol, CompileError> {
        if let Some(sym) = self.current_fn().scopes.lookup(name) {
            return Ok(sym.clone());
        }
        if self.building.len() > 1 {
            for f in self.building[..self.building.len() - 1].iter().rev() {
                if let Some(sym) = f.scopes.lookup(name) {
                    if matches!(sym.kind, SymbolKind::Local) {
                        return Err(CompileError::ClosureNotImplemented(name.to_string()));
                    }
                }
            }
        }
        if let Some(sym) = self.globals.get(name) {
            return Ok(sym.clone());
        }
        let index = self.globals.len() as i32;
        let sym = Symbol::global(index, false);
        self.globals.insert(name.to_string(), sym.clone());
        Ok(sym)
    }

    fn compile_atom_identifier(&mut self, name: &str) -> Result<(), CompileError> {
        let sym = self.resolve_identifier(name)?;
        match sym.kind {
            SymbolKind::Local => {
                let operand = check_operand_range("getlocal", sym.index as i64)?;
                self.current_fn().emit(Opcode::GetLocal, operand);
            }
            SymbolKind::Global => {
                self.emit_push_with_symbol_fixup(name)?;
                self.current_fn().emit(Opcode::Load, 0);
            }
            SymbolKind::Function(id) => {
                self.emit_push_with_function_fixup(id)?;
            }
        }
        Ok(())
    }

    fn emit_cons_call(&mut self) -> Result<(), CompileError> {
        self.compile_atom_identifier("cons")?;
        self.current_fn().emit(Opcode::Call, 0);
        self.current_fn().emit(Opcode::Cleanup, 2);
        Ok(())
    }

    /// Top-level `(function NAME (PARAMS...) BODY...)` declaration. `NAME`
    /// may already be a `Global` symbol by the time the body finishes
    /// compiling — either because it was called before this declaration was
    /// reached, or because the body calls itself recursively from a
    /// non-tail position, which creates the same uninitialized global
    /// on demand (see `resolve_identifier`). Both cases are the same
    /// forward reference and are patched the same way.
    fn compile_function_decl(&mut self, name: &str, params: &[Expr], body: &[Expr]) -> Result<(), CompileError> {
        let fid = self.begin_function(Some(name.to_string()));
        for (i, p) in params.iter().enumerate() {
            let pname = p
                .as_atom()
                .ok_or_else(|| CompileError::malformed("function", "parameter must be an atom"))?;
            let index = (i + 1) as i32;
            self.current_fn().scopes.define(pname, Symbol::local(index));
        }
        self.compile_sequence(body, true)?;
        self.current_fn().emit(Opcode::Return, 0);
        self.end_function();

        let forward_global = match self.globals.get(name) {
            Some(sym) if matches!(sym.kind, SymbolKind::Global) => Some(sym.clone()),
            _ => None,
        };

        self.globals.insert(name.to_string(), Symbol::function(fid));

        // The forward-reference global's slot index is already known, so
        // the store target is a direct literal rather than a name lookup —
        // the name itself now resolves to the function symbol we just
        // installed above.
        if let Some(sym) = forward_global {
            self.emit_push_with_function_fixup(fid)?;
            self.emit_push(sym.index)?;
            self.current_fn().emit(Opcode::Store, 0);
            self.current_fn().emit(Opcode::Pop, 0);
        }
        Ok(())
    }

    /// `<main>`'s entry sequence: look up `$heapstart` (creating and
    /// initializing its slot), then store its own globals-area size into
    /// it. The `push 0` emitted here sits at offset 1 of `<main>` — the
    /// entry label's instruction — and gets overwritten with the final
    /// global count during layout (§4.4.3 step 5), independent of the
    /// literal 0 this sequence pushes as `$heapstart`'s nominal value.
    fn compile_heapstart_init(&mut self) -> Result<(), CompileError> {
        let sym = self.resolve_identifier("$heapstart")?;
        let index = sym.index;
        self.globals.insert(
            "$heapstart".to_string(),
            Symbol::global(index, true),
        );
        self.emit_push(0)?;
        self.emit_push_with_symbol_fixup("$heapstart")?;
        self.current_fn().emit(Opcode::Store, 0);
        self.current_fn().emit(Opcode::Pop, 0);
        Ok(())
    }

    fn compile_top_level_form(&mut self, form: &Expr) -> Result<(), CompileError> {
        if let Some(items) = form.as_seq() {
            if items.first().and_then(|e| e.as_atom()) == Some("function") && items.len() >= 3 {
                if let Some(name) = items[1].as_atom() {
                    let params = items[2]
                        .as_seq()
                        .ok_or_else(|| CompileError::malformed("function", "expected a parameter list"))?;
                    return self.compile_function_decl(name, params, &items[3..]);
                }
            }
        }
        self.compile_expr(form, false)?;
        self.current_fn().emit(Opcode::Pop, 0);
        Ok(())
    }
}

/// Compile an already macro-expanded, optimized program into its final
/// instruction stream and listing metadata.
pub fn compile_program(program: &[Expr]) -> Result<CompiledProgram, CompileError> {
    let mut c = Compiler::new();
    let main_id = c.begin_function(None);
    debug_assert_eq!(main_id, 0);
    c.emission_order.push(main_id);

    c.compile_heapstart_init()?;
    for form in program {
        c.compile_top_level_form(form)?;
    }

    let done_label = c.current_fn().new_label();
    let off = c.current_fn().offset();
    c.current_fn().define_label(done_label, off);
    c.current_fn().emit_branch(Opcode::Goto, done_label);

    c.end_function();

    layout::finish(c)
}

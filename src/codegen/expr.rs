// ABOUTME: Expression and special-form compilation (spec §4.4, §4.4.1)

use crate::error::CompileError;
use crate::opcode::Opcode;
use crate::symtab::Symbol;
use crate::value::Expr;

use super::{primitives, Compiler, TAG_FUNCTION};

impl Compiler {
    /// Compile `expr`, leaving exactly one value on the stack. `tail`
    /// marks whether `expr` occupies the enclosing function's tail
    /// position (only `if`/`begin`/`let`/function-call react to it).
    pub(super) fn compile_expr(&mut self, expr: &Expr, tail: bool) -> Result<(), CompileError> {
        match expr {
            Expr::Int(n) => self.emit_push(*n),
            Expr::Atom(_) => self.compile_atom(expr),
            Expr::Seq(items) if items.is_empty() => {
                Err(CompileError::malformed("()", "empty combination has no value"))
            }
            Expr::Seq(_) => self.compile_combination(expr, tail),
        }
    }

    fn compile_atom(&mut self, atom: &Expr) -> Result<(), CompileError> {
        let name = atom.as_atom().expect("compile_atom called on a non-atom");
        match name {
            "nil" | "false" => self.emit_push(0),
            "true" => self.emit_push(1),
            _ if atom.is_quoted_string() => self.compile_string_chars(atom.string_chars()),
            _ => self.compile_atom_identifier(name),
        }
    }

    fn compile_combination(&mut self, expr: &Expr, tail: bool) -> Result<(), CompileError> {
        let items = expr.as_seq().expect("compile_combination called on a non-list");
        let args = &items[1..];

        if let Some(head) = items[0].as_atom() {
            if let Some(prim) = primitives::lookup(head) {
                return self.compile_primitive(head, args, prim);
            }
            match head {
                "function" => return self.compile_function_expr(args),
                "begin" => return self.compile_sequence(args, tail),
                "while" => return self.compile_while(args),
                "break" => return self.compile_break(args),
                "if" => return self.compile_if(args, tail),
                "assign" => return self.compile_assign(args),
                "quote" => {
                    if args.len() != 1 {
                        return Err(CompileError::arity("quote", "1", args.len()));
                    }
                    return self.compile_quote(&args[0]);
                }
                "let" => return self.compile_let(args, tail),
                "getbp" => {
                    self.current_fn().emit(Opcode::GetBp, 0);
                    return Ok(());
                }
                "and" | "or" | "not" => return self.compile_bool_expr(expr),
                _ => {}
            }
            return self.compile_call(&items[0], args, tail);
        }

        self.compile_call(&items[0], args, tail)
    }

    fn compile_primitive(
        &mut self,
        name: &str,
        args: &[Expr],
        prim: primitives::Primitive,
    ) -> Result<(), CompileError> {
        if args.len() != prim.arity {
            return Err(CompileError::arity(name, prim.arity.to_string(), args.len()));
        }
        match prim.arity {
            1 => self.compile_expr(&args[0], false)?,
            2 => {
                if prim.reverse_args {
                    self.compile_expr(&args[0], false)?;
                    self.compile_expr(&args[1], false)?;
                } else {
                    self.compile_expr(&args[1], false)?;
                    self.compile_expr(&args[0], false)?;
                }
            }
            _ => unreachable!("primitive table only defines arity 1 and 2"),
        }
        self.current_fn().emit(prim.opcode, 0);
        Ok(())
    }

    /// Right-to-left argument push, then the callee address, then `call`.
    /// A tail-position self-recursive call is rewritten into an in-place
    /// parameter update and a jump instead (spec.md §4.4.1).
    fn compile_call(&mut self, callee: &Expr, args: &[Expr], tail: bool) -> Result<(), CompileError> {
        if tail {
            if let Some(name) = callee.as_atom() {
                if self.current_fn().name.as_deref() == Some(name) {
                    for (i, arg) in args.iter().enumerate() {
                        self.compile_expr(arg, false)?;
                        let index = (i + 1) as i16;
                        self.current_fn().emit(Opcode::SetLocal, index);
                        self.current_fn().emit(Opcode::Pop, 0);
                    }
                    let entry = self.current_fn().entry_label;
                    self.current_fn().emit_branch(Opcode::Goto, entry);
                    return Ok(());
                }
            }
        }

        for arg in args.iter().rev() {
            self.compile_expr(arg, false)?;
        }
        self.compile_expr(callee, false)?;
        self.current_fn().emit(Opcode::Call, 0);
        if !args.is_empty() {
            self.current_fn().emit(Opcode::Cleanup, args.len() as i16);
        }
        Ok(())
    }

    pub(super) fn compile_sequence(&mut self, body: &[Expr], tail: bool) -> Result<(), CompileError> {
        if body.is_empty() {
            return self.emit_push(0);
        }
        for e in &body[..body.len() - 1] {
            self.compile_expr(e, false)?;
            self.current_fn().emit(Opcode::Pop, 0);
        }
        self.compile_expr(&body[body.len() - 1], tail)
    }

    fn compile_if(&mut self, args: &[Expr], tail: bool) -> Result<(), CompileError> {
        if args.len() != 2 && args.len() != 3 {
            return Err(CompileError::arity("if", "2 or 3", args.len()));
        }
        let false_label = self.current_fn().new_label();
        self.compile_predicate_false(&args[0], false_label)?;
        self.compile_expr(&args[1], tail)?;

        let done_label = self.current_fn().new_label();
        self.current_fn().emit_branch(Opcode::Goto, done_label);

        let off = self.current_fn().offset();
        self.current_fn().define_label(false_label, off);
        if args.len() == 3 {
            self.compile_expr(&args[2], tail)?;
        } else {
            self.emit_push(0)?;
        }

        let off = self.current_fn().offset();
        self.current_fn().define_label(done_label, off);
        Ok(())
    }

    /// Compile `expr` as a predicate that falls through when true and
    /// branches to `false_label` when false, handling `and`/`or`/`not`
    /// with short-circuit branching (spec.md §4.4.1).
    fn compile_predicate_false(&mut self, expr: &Expr, false_label: usize) -> Result<(), CompileError> {
        if let Some(items) = expr.as_seq() {
            match items.first().and_then(|e| e.as_atom()) {
                Some("and") => {
                    for p in &items[1..] {
                        self.compile_predicate_false(p, false_label)?;
                    }
                    return Ok(());
                }
                Some("or") => {
                    let true_label = self.current_fn().new_label();
                    let preds = &items[1..];
                    for (i, p) in preds.iter().enumerate() {
                        if i + 1 == preds.len() {
                            self.compile_predicate_false(p, false_label)?;
                        } else {
                            self.compile_predicate_true(p, true_label)?;
                        }
                    }
                    let off = self.current_fn().offset();
                    self.current_fn().define_label(true_label, off);
                    return Ok(());
                }
                Some("not") => {
                    let skip = self.current_fn().new_label();
                    self.compile_predicate_true(&items[1], skip)?;
                    self.current_fn().emit_branch(Opcode::Goto, false_label);
                    let off = self.current_fn().offset();
                    self.current_fn().define_label(skip, off);
                    return Ok(());
                }
                _ => {}
            }
        }
        self.compile_expr(expr, false)?;
        self.current_fn().emit_branch(Opcode::BFalse, false_label);
        Ok(())
    }

    /// The mirror image of `compile_predicate_false`: branches to
    /// `true_label` when true, falls through when false.
    fn compile_predicate_true(&mut self, expr: &Expr, true_label: usize) -> Result<(), CompileError> {
        let false_label = self.current_fn().new_label();
        self.compile_predicate_false(expr, false_label)?;
        self.current_fn().emit_branch(Opcode::Goto, true_label);
        let off = self.current_fn().offset();
        self.current_fn().define_label(false_label, off);
        Ok(())
    }

    /// `and`/`or`/`not` used for their value rather than as a predicate:
    /// branch-and-push an explicit 0/1 (spec.md §4.4.1).
    fn compile_bool_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let false_label = self.current_fn().new_label();
        self.compile_predicate_false(expr, false_label)?;
        self.emit_push(1)?;

        let done_label = self.current_fn().new_label();
        self.current_fn().emit_branch(Opcode::Goto, done_label);

        let off = self.current_fn().offset();
        self.current_fn().define_label(false_label, off);
        self.emit_push(0)?;

        let off = self.current_fn().offset();
        self.current_fn().define_label(done_label, off);
        Ok(())
    }

    fn compile_while(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        if args.is_empty() {
            return Err(CompileError::arity("while", "at least 1", args.len()));
        }
        let (cond, body) = (&args[0], &args[1..]);

        let break_label = self.current_fn().new_label();
        self.current_fn().break_labels.push(break_label);

        let top_label = self.current_fn().new_label();
        let off = self.current_fn().offset();
        self.current_fn().define_label(top_label, off);

        let bottom_label = self.current_fn().new_label();
        self.compile_predicate_false(cond, bottom_label)?;
        self.compile_sequence(body, false)?;
        self.current_fn().emit(Opcode::Pop, 0);
        self.current_fn().emit_branch(Opcode::Goto, top_label);

        let off = self.current_fn().offset();
        self.current_fn().define_label(bottom_label, off);
        self.emit_push(0)?;

        let off = self.current_fn().offset();
        self.current_fn().define_label(break_label, off);
        self.current_fn().break_labels.pop();
        Ok(())
    }

    fn compile_break(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        let label = *self
            .current_fn()
            .break_labels
            .last()
            .ok_or_else(|| CompileError::malformed("break", "not inside a while loop"))?;
        if args.is_empty() {
            self.emit_push(0)?;
        } else {
            self.compile_expr(&args[0], false)?;
        }
        self.current_fn().emit_branch(Opcode::Goto, label);
        Ok(())
    }

    fn compile_assign(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        if args.len() != 2 {
            return Err(CompileError::arity("assign", "2", args.len()));
        }
        let name = args[0]
            .as_atom()
            .ok_or_else(|| CompileError::malformed("assign", "target must be an atom"))?
            .to_string();

        self.compile_expr(&args[1], false)?;
        let sym = self.resolve_identifier(&name)?;
        match sym.kind {
            crate::symtab::SymbolKind::Local => {
                let operand = crate::opcode::check_operand_range("setlocal", sym.index as i64)?;
                self.current_fn().emit(Opcode::SetLocal, operand);
            }
            crate::symtab::SymbolKind::Global => {
                self.emit_push_with_symbol_fixup(&name)?;
                self.current_fn().emit(Opcode::Store, 0);
                if let Some(g) = self.globals.get_mut(&name) {
                    g.initialized = true;
                }
            }
            crate::symtab::SymbolKind::Function(_) => {
                return Err(CompileError::AssignToFunction(name));
            }
        }
        Ok(())
    }

    fn compile_quote(&mut self, x: &Expr) -> Result<(), CompileError> {
        match x {
            Expr::Int(n) => self.emit_push(*n),
            // Unlike a string literal in expression position, a quoted
            // string is lowered raw, surrounding `"` characters included.
            Expr::Atom(s) => self.compile_string_chars(s.as_str()),
            Expr::Seq(items) if items.len() == 3 && items[1].as_atom() == Some(".") => {
                self.compile_quote(&items[2])?;
                self.compile_quote(&items[0])?;
                self.emit_cons_call()
            }
            Expr::Seq(items) => self.compile_quote_list(items),
        }
    }

    fn compile_quote_list(&mut self, items: &[Expr]) -> Result<(), CompileError> {
        if items.is_empty() {
            return self.emit_push(0);
        }
        self.compile_quote_list(&items[1..])?;
        self.compile_quote(&items[0])?;
        self.emit_cons_call()
    }

    /// A quoted-string atom lowers to a right-folded `cons` chain of
    /// character codes terminated by 0, except a single character lowers
    /// to just its code with no list wrapper (spec.md §4.4).
    pub(super) fn compile_string_chars(&mut self, s: &str) -> Result<(), CompileError> {
        let codes: Vec<i32> = s.chars().map(|c| c as i32).collect();
        if codes.len() == 1 {
            return self.emit_push(codes[0]);
        }
        self.compile_char_list(&codes)
    }

    fn compile_char_list(&mut self, codes: &[i32]) -> Result<(), CompileError> {
        if codes.is_empty() {
            return self.emit_push(0);
        }
        self.compile_char_list(&codes[1..])?;
        self.emit_push(codes[0])?;
        self.emit_cons_call()
    }

    fn compile_let(&mut self, args: &[Expr], tail: bool) -> Result<(), CompileError> {
        if args.is_empty() {
            return Err(CompileError::malformed("let", "expected a binding list"));
        }
        let bindings = args[0]
            .as_seq()
            .ok_or_else(|| CompileError::malformed("let", "expected a binding list"))?;
        let body = &args[1..];

        self.current_fn().scopes.push();
        for binding in bindings {
            let pair = binding
                .as_seq()
                .ok_or_else(|| CompileError::malformed("let", "binding must be (NAME EXPR)"))?;
            if pair.len() != 2 {
                return Err(CompileError::malformed("let", "binding must be (NAME EXPR)"));
            }
            let name = pair[0]
                .as_atom()
                .ok_or_else(|| CompileError::malformed("let", "binding name must be an atom"))?
                .to_string();
            self.compile_expr(&pair[1], false)?;
            let slot = self.current_fn().reserve_local_slot();
            self.current_fn().scopes.define(name, Symbol::local(slot));
            let operand = crate::opcode::check_operand_range("setlocal", slot as i64)?;
            self.current_fn().emit(Opcode::SetLocal, operand);
            self.current_fn().emit(Opcode::Pop, 0);
        }
        let result = self.compile_sequence(body, tail);
        self.current_fn().scopes.pop();
        result
    }

    /// `(function PARAMS BODY…)` in expression position: a referenced
    /// anonymous function producing a tagged function value.
    fn compile_function_expr(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        if args.is_empty() {
            return Err(CompileError::malformed("function", "expected a parameter list"));
        }
        let params = args[0]
            .as_seq()
            .ok_or_else(|| CompileError::malformed("function", "expected a parameter list"))?;
        let body = &args[1..];

        let fid = self.begin_function(None);
        for (i, p) in params.iter().enumerate() {
            let name = p
                .as_atom()
                .ok_or_else(|| CompileError::malformed("function", "parameter must be an atom"))?;
            let index = (i + 1) as i32;
            self.current_fn().scopes.define(name, Symbol::local(index));
        }
        self.compile_sequence(body, true)?;
        self.current_fn().emit(Opcode::Return, 0);
        self.end_function();

        self.current_fn().emit(Opcode::Push, TAG_FUNCTION);
        self.emit_push_with_function_fixup(fid)?;
        self.current_fn().emit(Opcode::SetTag, 0);
        Ok(())
    }
}

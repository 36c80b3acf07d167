// ABOUTME: Per-function codegen state — emitted words, labels, local fixups and the scope stack

use crate::opcode::{encode, patch_operand, Opcode};
use crate::symtab::{FunctionId, ScopeStack};

/// A deferred, function-relative address. Legal to reference before it is
/// defined; every referenced label must be defined by the time fixups run
/// (spec.md §3 "Label").
#[derive(Debug, Clone, Copy, Default)]
pub struct Label {
    pub defined: bool,
    pub offset: usize,
}

/// A pending edit to an already-emitted word once this function's base
/// address is known: `instr_offset` within `code`, and the label whose
/// final address to write there.
#[derive(Debug, Clone, Copy)]
pub struct LocalFixup {
    pub instr_offset: usize,
    pub label: usize,
}

pub struct Function {
    pub id: FunctionId,
    pub name: Option<String>,
    pub enclosing: Option<FunctionId>,
    pub base_address: usize,
    pub referenced: bool,
    pub local_count: i32,
    pub code: Vec<u32>,
    pub local_fixups: Vec<LocalFixup>,
    pub labels: Vec<Label>,
    pub entry_label: usize,
    pub scopes: ScopeStack,
    /// Stack of break-target labels for nested `while` loops; does not
    /// cross function boundaries (a nested `function` starts empty).
    pub break_labels: Vec<usize>,
    next_local_slot: i32,
}

impl Function {
    /// Pre-emits the `reserve` placeholder at offset 0 and defines the
    /// entry label at offset 1, per spec.md §3 "Function object".
    pub fn new(id: FunctionId, name: Option<String>, enclosing: Option<FunctionId>) -> Function {
        let mut f = Function {
            id,
            name,
            enclosing,
            base_address: 0,
            referenced: false,
            local_count: 0,
            code: Vec::new(),
            local_fixups: Vec::new(),
            labels: Vec::new(),
            entry_label: 0,
            scopes: ScopeStack::new(),
            break_labels: Vec::new(),
            next_local_slot: -2,
        };
        f.emit(Opcode::Reserve, 0);
        let entry = f.new_label();
        f.define_label(entry, f.code.len());
        f.entry_label = entry;
        f
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, opcode: Opcode, operand: i16) -> usize {
        let offset = self.code.len();
        self.code.push(encode(opcode, operand));
        offset
    }

    pub fn new_label(&mut self) -> usize {
        self.labels.push(Label::default());
        self.labels.len() - 1
    }

    pub fn define_label(&mut self, label: usize, offset: usize) {
        self.labels[label] = Label {
            defined: true,
            offset,
        };
    }

    /// Emit a branch-family instruction (`goto`/`bfalse`) targeting a label
    /// whose final address is not yet known; records a local fixup.
    pub fn emit_branch(&mut self, opcode: Opcode, label: usize) -> usize {
        let offset = self.emit(opcode, 0);
        self.local_fixups.push(LocalFixup {
            instr_offset: offset,
            label,
        });
        offset
    }

    /// Allocate the next local slot (negative, starting at -2) in the
    /// innermost scope.
    pub fn reserve_local_slot(&mut self) -> i32 {
        let slot = self.next_local_slot;
        self.next_local_slot -= 1;
        self.local_count += 1;
        slot
    }

    /// Patch `reserve`'s operand (offset 0) to the function's final local
    /// count, and rewrite every local fixup's operand to `base_address +
    /// label.offset`, per spec.md §4.4.3 step 3. Run once this function's
    /// base address is known.
    pub fn patch_local_fixups(&mut self, base_address: usize) -> Result<(), crate::error::CompileError> {
        self.code[0] = patch_operand(self.code[0], self.local_count as i16);
        for fixup in &self.local_fixups {
            let label = &self.labels[fixup.label];
            if !label.defined {
                return Err(crate::error::CompileError::UndefinedLabel(
                    self.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
                ));
            }
            let target = crate::opcode::check_operand_range(
                "branch target",
                (base_address + label.offset) as i64,
            )?;
            self.code[fixup.instr_offset] = patch_operand(self.code[fixup.instr_offset], target);
        }
        Ok(())
    }
}

// ABOUTME: Final layout pass — dead-function elimination, base-address assignment, and fixup resolution (spec §4.4.3)

use std::collections::HashSet;

use crate::error::CompileError;
use crate::opcode::{check_operand_range, patch_operand};
use crate::symtab::SymbolKind;

use super::{CompiledFunction, CompiledProgram, Compiler, FixupTarget};

pub(super) fn finish(mut c: Compiler) -> Result<CompiledProgram, CompileError> {
    // (1) dead-function elimination; <main> (id 0) is always kept.
    if let Some(main) = c.functions.get_mut(&0) {
        main.referenced = true;
    }
    let retained: Vec<usize> = c
        .emission_order
        .iter()
        .copied()
        .filter(|id| *id == 0 || c.functions.get(id).map_or(false, |f| f.referenced))
        .collect();
    let retained_set: HashSet<usize> = retained.iter().copied().collect();

    // (2) assign base addresses by prefix-summing instruction counts.
    let mut base = 0usize;
    for &id in &retained {
        let f = c.functions.get_mut(&id).expect("retained function missing from table");
        f.base_address = base;
        base += f.code.len();
    }

    // (3) patch each function's reserve operand and local fixups.
    for &id in &retained {
        let base_address = c.functions[&id].base_address;
        c.functions
            .get_mut(&id)
            .unwrap()
            .patch_local_fixups(base_address)?;
    }

    // (4) resolve global fixups.
    for fixup in &c.global_fixups {
        if !retained_set.contains(&fixup.function) {
            continue;
        }
        let value = match &fixup.target {
            FixupTarget::Function(id) => c
                .functions
                .get(id)
                .ok_or_else(|| CompileError::Internal(format!("fixup targets unknown function {id}")))?
                .base_address as i64,
            FixupTarget::Symbol(name) => {
                let sym = c
                    .globals
                    .get(name)
                    .ok_or_else(|| CompileError::Internal(format!("fixup targets unknown symbol '{name}'")))?;
                match sym.kind {
                    SymbolKind::Global => sym.index as i64,
                    SymbolKind::Function(id) => c
                        .functions
                        .get(&id)
                        .ok_or_else(|| CompileError::Internal(format!("fixup targets unknown function {id}")))?
                        .base_address as i64,
                    SymbolKind::Local => {
                        return Err(CompileError::Internal(format!(
                            "global fixup resolved to a local symbol '{name}'"
                        )))
                    }
                }
            }
        };
        let operand = check_operand_range("global fixup", value)?;
        let f = c.functions.get_mut(&fixup.function).unwrap();
        f.code[fixup.offset] = patch_operand(f.code[fixup.offset], operand);
    }

    for (name, sym) in &c.globals {
        if matches!(sym.kind, SymbolKind::Global) && !sym.initialized {
            log::warn!("global '{}' is never initialized", name);
        }
    }

    // (5) patch offset 1 of <main> with the final global count.
    let globals_count = check_operand_range("globals count", c.globals.len() as i64)?;
    {
        let main = c.functions.get_mut(&0).unwrap();
        main.code[1] = patch_operand(main.code[1], globals_count);
    }

    let mut words = Vec::new();
    let mut functions = Vec::with_capacity(retained.len());
    for &id in &retained {
        let f = &c.functions[&id];
        words.extend_from_slice(&f.code);
        functions.push(CompiledFunction {
            name: f.name.clone().unwrap_or_else(|| "<main>".to_string()),
            base_address: f.base_address,
            code: f.code.clone(),
        });
    }

    let mut globals: Vec<(String, i32)> = c
        .globals
        .iter()
        .filter(|(_, sym)| matches!(sym.kind, SymbolKind::Global))
        .map(|(name, sym)| (name.clone(), sym.index))
        .collect();
    globals.sort_by_key(|(_, index)| *index);

    Ok(CompiledProgram {
        words,
        globals,
        functions,
    })
}

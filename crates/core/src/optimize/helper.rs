//! Bookkeeping for peephole passes.
//!
//! A pass never edits the tape directly. It records deletions and
//! replacements against a read-only tape through an [`OptimizeHelper`], which
//! also knows every instruction index that is the target of a branch. When
//! the pass is done, [`OptimizeHelper::apply`] rebuilds the tape and
//! recomputes every jump offset and function entry so each still resolves to
//! the instruction it named before (or, when that instruction was itself
//! deleted, to its surviving successor).

use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::instruction::{Arg, Instruction};
use crate::op::Op;
use crate::primitive::Primitive;
use crate::symbol::Symbol;
use crate::tape::{self, ClassRef, FunctionRef, Tape};

#[derive(Clone, Copy, PartialEq)]
enum Action {
    Keep,
    Remove,
    SetOp(Op),
    Replace(Instruction),
}

/// Records one pass's pending rewrites over a tape.
pub struct OptimizeHelper<'t> {
    tape: &'t Tape,
    actions: Vec<Action>,
    i_gotos: HashSet<usize>,
    changed: bool,
}

impl<'t> OptimizeHelper<'t> {
    /// Prepares a helper for one pass, recording all branch targets.
    pub fn new(tape: &'t Tape) -> Self {
        let mut i_gotos = HashSet::new();
        for (i, ins) in tape.instructions().iter().enumerate() {
            if ins.op.is_relative_jump() {
                if let Some(offset) = ins.arg.as_int() {
                    let target = i as i64 + 1 + offset as i64;
                    if target >= 0 {
                        i_gotos.insert(target as usize);
                    }
                }
            } else if ins.op == Op::GOTO {
                if let Some(target) = ins.arg.as_int() {
                    if target >= 0 {
                        i_gotos.insert(target as usize);
                    }
                }
            }
        }
        OptimizeHelper {
            actions: vec![Action::Keep; tape.len()],
            i_gotos,
            tape,
            changed: false,
        }
    }

    /// Returns the tape under optimization.
    pub fn tape(&self) -> &Tape {
        self.tape
    }

    /// True when `index` is the target of any branch.
    pub fn is_target(&self, index: usize) -> bool {
        self.i_gotos.contains(&index)
    }

    /// True when any of `indices` is a branch target.
    pub fn any_target(&self, indices: &[usize]) -> bool {
        indices.iter().any(|i| self.is_target(*i))
    }

    /// Marks the instruction at `index` for deletion.
    pub fn remove(&mut self, index: usize) {
        self.actions[index] = Action::Remove;
        self.changed = true;
    }

    /// Rewrites the op at `index`, keeping its operand.
    pub fn set_op(&mut self, index: usize, op: Op) {
        self.actions[index] = Action::SetOp(op);
        self.changed = true;
    }

    /// Replaces the whole instruction at `index`.
    pub fn replace(&mut self, index: usize, ins: Instruction) {
        self.actions[index] = Action::Replace(ins);
        self.changed = true;
    }

    /// Applies the recorded rewrites, producing a new tape with all jump
    /// offsets and function entries recomputed.
    pub fn apply(self) -> Tape {
        if !self.changed {
            return self.tape.clone();
        }

        let old_len = self.tape.len();

        // index_map[i] = position instruction i lands at, or for a removed
        // instruction, the position of its surviving successor.
        let mut index_map = vec![0usize; old_len + 1];
        let mut kept = 0usize;
        for (i, action) in self.actions.iter().enumerate() {
            index_map[i] = kept;
            if !matches!(action, Action::Remove) {
                kept += 1;
            }
        }
        index_map[old_len] = kept;

        let mut instructions = Vec::with_capacity(kept);
        let mut lines = Vec::with_capacity(kept);
        for (i, action) in self.actions.iter().enumerate() {
            let ins = match action {
                Action::Remove => continue,
                Action::Keep => self.tape.instructions()[i],
                Action::SetOp(op) => Instruction {
                    op: *op,
                    arg: self.tape.instructions()[i].arg,
                },
                Action::Replace(replacement) => *replacement,
            };
            let new_pos = instructions.len();
            instructions.push(retarget(ins, i, new_pos, &index_map));
            lines.push(self.tape.line_of(i));
        }

        let functions = remap_functions(self.tape.functions(), &index_map);
        let mut classes: IndexMap<Symbol, ClassRef> = IndexMap::new();
        for (name, cref) in self.tape.classes() {
            let mut mapped = cref.clone();
            mapped.methods = remap_functions(&cref.methods, &index_map);
            classes.insert(*name, mapped);
        }

        tape::rebuild(self.tape, instructions, functions, classes, Some(lines))
    }
}

fn remap_functions(
    functions: &IndexMap<Symbol, FunctionRef>,
    index_map: &[usize],
) -> IndexMap<Symbol, FunctionRef> {
    functions
        .iter()
        .map(|(name, fref)| {
            let mut mapped = *fref;
            mapped.index = index_map[fref.index.min(index_map.len() - 1)];
            (*name, mapped)
        })
        .collect()
}

/// Recomputes the branch operand of `ins`, moved from `old_pos` to
/// `new_pos`, so it resolves to the image of its original target.
fn retarget(ins: Instruction, old_pos: usize, new_pos: usize, index_map: &[usize]) -> Instruction {
    if ins.op.is_relative_jump() {
        if let Some(offset) = ins.arg.as_int() {
            let old_target = (old_pos as i64 + 1 + offset as i64)
                .clamp(0, index_map.len() as i64 - 1) as usize;
            let new_target = index_map[old_target] as i64;
            let new_offset = new_target - (new_pos as i64 + 1);
            return Instruction {
                op: ins.op,
                arg: Arg::Primitive(Primitive::Int(new_offset as i32)),
            };
        }
    } else if ins.op == Op::GOTO {
        if let Some(target) = ins.arg.as_int() {
            if target >= 0 {
                let mapped = index_map[(target as usize).min(index_map.len() - 1)];
                return Instruction::int(Op::GOTO, mapped as i32);
            }
        }
    }
    ins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::TapeBuilder;

    fn sample_tape() -> Tape {
        // 0: nop
        // 1: jmp 2    -> target 4
        // 2: nop
        // 3: nop
        // 4: ret
        let mut b = TapeBuilder::new(Symbol::intern("t"));
        b.add(Instruction::no_arg(Op::NOP));
        b.add(Instruction::int(Op::JMP, 2));
        b.add(Instruction::no_arg(Op::NOP));
        b.add(Instruction::no_arg(Op::NOP));
        b.add(Instruction::no_arg(Op::RET));
        b.finish()
    }

    #[test]
    fn records_branch_targets() {
        let tape = sample_tape();
        let oh = OptimizeHelper::new(&tape);
        assert!(oh.is_target(4));
        assert!(!oh.is_target(2));
    }

    #[test]
    fn deletion_recomputes_jump_offsets() {
        let tape = sample_tape();
        let mut oh = OptimizeHelper::new(&tape);
        oh.remove(2);
        let out = oh.apply();

        assert_eq!(out.len(), 4);
        // jmp moved to index 1; target (old 4) is now index 3: offset 1.
        assert_eq!(out.get(1), Some(&Instruction::int(Op::JMP, 1)));
    }

    #[test]
    fn deleted_target_resolves_to_successor() {
        let tape = sample_tape();
        let mut oh = OptimizeHelper::new(&tape);
        oh.remove(4 - 2); // unrelated removal
        oh.remove(3);
        let out = oh.apply();
        // old target 4 maps to new index 2; jmp at new index 1: offset 0.
        assert_eq!(out.get(1), Some(&Instruction::int(Op::JMP, 0)));
        assert_eq!(out.get(2), Some(&Instruction::no_arg(Op::RET)));
    }

    #[test]
    fn function_entries_are_remapped() {
        let mut b = TapeBuilder::new(Symbol::intern("t"));
        b.add(Instruction::no_arg(Op::NOP));
        b.add(Instruction::no_arg(Op::NOP));
        b.label_function(Symbol::intern("f"), Default::default());
        b.add(Instruction::no_arg(Op::RET));
        let tape = b.finish();

        let mut oh = OptimizeHelper::new(&tape);
        oh.remove(0);
        let out = oh.apply();
        assert_eq!(out.functions()[&Symbol::intern("f")].index, 1);
    }

    #[test]
    fn no_change_is_identity() {
        let tape = sample_tape();
        let oh = OptimizeHelper::new(&tape);
        let out = oh.apply();
        assert_eq!(out.instructions(), tape.instructions());
    }
}

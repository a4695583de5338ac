//! Textual tape writer.

use std::fmt::Write as _;

use jv_core::tape::FnFlags;
use jv_core::{Symbol, Tape};

/// Writes a tape as `.ja` assembly text. [`crate::tape_read`] of the output
/// reproduces the tape (modulo the source map).
pub fn tape_write(tape: &Tape) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", tape.module_name());

    // Field-only classes have no method to anchor their block; emit them up
    // front.
    let mut class_starts: Vec<(usize, Symbol)> = Vec::new();
    let mut class_ends: Vec<(usize, Symbol)> = Vec::new();
    for (name, cref) in tape.classes() {
        let method_span = cref
            .methods
            .values()
            .map(|m| m.index)
            .fold(None::<(usize, usize)>, |span, index| match span {
                None => Some((index, index)),
                Some((lo, hi)) => Some((lo.min(index), hi.max(index))),
            });
        match method_span {
            Some((first, last)) => {
                class_starts.push((first, *name));
                class_ends.push((last, *name));
            }
            None => {
                emit_class_header(&mut out, tape, *name);
                let _ = writeln!(out, "endclass");
            }
        }
    }

    for i in 0..=tape.len() {
        // Close class blocks whose last method body ended before i.
        for (last, _name) in &class_ends {
            if i > 0 && end_of_body(tape, *last) == i {
                let _ = writeln!(out, "endclass");
            }
        }
        for (first, name) in &class_starts {
            if *first == i {
                emit_class_header(&mut out, tape, *name);
            }
        }
        for fref in tape.functions().values() {
            if fref.index == i {
                emit_label(&mut out, fref.name, fref.flags);
            }
        }
        for cref in tape.classes().values() {
            for m in cref.methods.values() {
                if m.index == i {
                    emit_label(&mut out, m.name, m.flags);
                }
            }
        }
        if let Some(ins) = tape.get(i) {
            let _ = writeln!(out, "  {ins}");
        }
    }
    out
}

fn emit_label(out: &mut String, name: Symbol, flags: FnFlags) {
    let _ = write!(out, "@{name}");
    if flags.contains(FnFlags::CONST) {
        let _ = write!(out, " const");
    }
    if flags.contains(FnFlags::ASYNC) {
        let _ = write!(out, " async");
    }
    let _ = writeln!(out);
}

fn emit_class_header(out: &mut String, tape: &Tape, name: Symbol) {
    let cref = &tape.classes()[&name];
    let _ = write!(out, "class {name}");
    for (i, s) in cref.supers.iter().enumerate() {
        let sep = if i == 0 { " : " } else { ", " };
        let _ = write!(out, "{sep}{s}");
    }
    let _ = writeln!(out);
    for field in &cref.fields {
        let _ = writeln!(out, "  field {field}");
    }
}

/// Returns the index one past the last instruction of the method body that
/// starts at `entry`: the body extends to the next function entry, or the
/// end of the tape.
fn end_of_body(tape: &Tape, entry: usize) -> usize {
    let mut end = tape.len();
    let all_entries = tape
        .functions()
        .values()
        .map(|f| f.index)
        .chain(
            tape.classes()
                .values()
                .flat_map(|c| c.methods.values().map(|m| m.index)),
        );
    for other in all_entries {
        if other > entry && other < end {
            end = other;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tape_read;
    use jv_core::{Instruction, Op, Primitive, TapeBuilder};

    fn roundtrip(tape: &Tape) -> Tape {
        let text = tape_write(tape);
        tape_read(&text, "roundtrip.ja", "fallback").unwrap()
    }

    #[test]
    fn writes_simple_module() {
        let mut b = TapeBuilder::new(Symbol::intern("main"));
        b.add(Instruction::int(Op::PUSH, 2));
        b.add(Instruction::int(Op::PUSH, 3));
        b.add(Instruction::no_arg(Op::ADD));
        let tape = b.finish();

        let text = tape_write(&tape);
        assert!(text.starts_with("module main\n"));
        assert!(text.contains("  push  2\n"));
        assert!(text.contains("  add\n"));
    }

    #[test]
    fn roundtrips_functions_and_classes() {
        let mut b = TapeBuilder::new(Symbol::intern("shapes"));
        b.add(Instruction::no_arg(Op::NOP));
        b.label_function(Symbol::intern("helper"), FnFlags::CONST);
        b.add(Instruction::no_arg(Op::RET));
        b.start_class(Symbol::intern("Point"), vec![Symbol::intern("Object")]);
        b.add_field(Symbol::intern("x"));
        b.label_function(Symbol::intern("new"), FnFlags::empty());
        b.add(Instruction::int(Op::RES, 7));
        b.add(Instruction::no_arg(Op::RET));
        b.end_class();
        let tape = b.finish();

        let back = roundtrip(&tape);
        assert_eq!(back.module_name(), tape.module_name());
        assert_eq!(back.instructions(), tape.instructions());
        assert_eq!(back.functions(), tape.functions());
        assert_eq!(back.classes(), tape.classes());
    }

    #[test]
    fn roundtrips_every_operand_form() {
        let mut b = TapeBuilder::new(Symbol::intern("ops"));
        b.add(Instruction::no_arg(Op::NOP));
        b.add(Instruction::int(Op::PUSH, -9));
        b.add(Instruction::primitive(Op::PUSH, Primitive::Float(0.25)));
        b.add(Instruction::primitive(Op::PUSH, Primitive::Char(b'z')));
        b.add(Instruction::id(Op::SET, Symbol::intern("name")));
        b.add(Instruction::text(Op::RES, Symbol::intern("\"quoted text\"")));
        let tape = b.finish();

        let back = roundtrip(&tape);
        assert_eq!(back.instructions(), tape.instructions());
    }

    #[test]
    fn field_only_class_is_preserved() {
        let mut b = TapeBuilder::new(Symbol::intern("data"));
        b.start_class(Symbol::intern("Bag"), vec![]);
        b.add_field(Symbol::intern("items"));
        b.end_class();
        b.add(Instruction::no_arg(Op::EXIT));
        let tape = b.finish();

        let back = roundtrip(&tape);
        assert_eq!(back.classes(), tape.classes());
    }
}

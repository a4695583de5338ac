//! Compiled module tapes.
//!
//! A tape is a module's linear instruction stream plus the symbol tables a
//! loader needs to hydrate it: a function table mapping names to entry
//! offsets, a class table carrying super/field/method references, and an
//! optional source map for diagnostics. Tapes are immutable once built; the
//! optimizer produces a new tape rather than editing in place.

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::instruction::Instruction;
use crate::symbol::Symbol;

bitflags! {
    /// Attribute flags on a function reference.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FnFlags: u8 {
        /// The function may not be rebound.
        const CONST = 1 << 0;
        /// The function is an async entry point.
        const ASYNC = 1 << 1;
    }
}

/// A named function entry in a tape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionRef {
    /// Function name
    pub name: Symbol,
    /// Offset of the first instruction
    pub index: usize,
    /// Attribute flags
    pub flags: FnFlags,
}

impl FunctionRef {
    /// True when the function is const.
    pub fn is_const(&self) -> bool {
        self.flags.contains(FnFlags::CONST)
    }

    /// True when the function is async.
    pub fn is_async(&self) -> bool {
        self.flags.contains(FnFlags::ASYNC)
    }
}

/// A class entry in a tape: supers, fields and method references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassRef {
    /// Class name
    pub name: Symbol,
    /// Named super classes, in declaration order
    pub supers: Vec<Symbol>,
    /// Field names, in declaration order
    pub fields: Vec<Symbol>,
    /// Methods, keyed by name
    pub methods: IndexMap<Symbol, FunctionRef>,
}

impl ClassRef {
    /// Creates an empty class reference.
    pub fn new(name: Symbol) -> Self {
        ClassRef {
            name,
            ..Default::default()
        }
    }
}

/// Per-instruction line numbers plus the raw source text, for stack traces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceMap {
    /// The file the tape was read from
    pub file_name: String,
    /// Line number of each instruction (0 = unknown)
    pub lines: Vec<u32>,
    /// The raw lines of the source file, 1-indexed via `line - 1`
    pub source_lines: Vec<String>,
}

impl SourceMap {
    /// Returns the text of a 1-based source line, if known.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.source_lines.get(line as usize - 1).map(|s| s.as_str())
    }
}

/// A module's compiled instruction stream and symbol tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    module_name: Symbol,
    instructions: Vec<Instruction>,
    functions: IndexMap<Symbol, FunctionRef>,
    classes: IndexMap<Symbol, ClassRef>,
    source_map: Option<SourceMap>,
}

impl Tape {
    /// Returns the module name.
    pub fn module_name(&self) -> Symbol {
        self.module_name
    }

    /// Returns the number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when the tape has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the instruction at `index`, if in bounds.
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Returns the full instruction slice.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the module-level function table.
    pub fn functions(&self) -> &IndexMap<Symbol, FunctionRef> {
        &self.functions
    }

    /// Returns the class table.
    pub fn classes(&self) -> &IndexMap<Symbol, ClassRef> {
        &self.classes
    }

    /// Returns the source map, if the tape carries one.
    pub fn source_map(&self) -> Option<&SourceMap> {
        self.source_map.as_ref()
    }

    /// Returns the 1-based source line of the instruction at `index`
    /// (0 when unknown).
    pub fn line_of(&self, index: usize) -> u32 {
        self.source_map
            .as_ref()
            .and_then(|sm| sm.lines.get(index).copied())
            .unwrap_or(0)
    }
}

/// Incrementally assembles a [`Tape`].
///
/// Function labels bind the *next* instruction offset; class blocks gather
/// fields and method labels until closed.
#[derive(Debug)]
pub struct TapeBuilder {
    module_name: Symbol,
    instructions: Vec<Instruction>,
    lines: Vec<u32>,
    functions: IndexMap<Symbol, FunctionRef>,
    classes: IndexMap<Symbol, ClassRef>,
    current_class: Option<Symbol>,
}

impl TapeBuilder {
    /// Starts a tape for `module_name`.
    pub fn new(module_name: Symbol) -> Self {
        TapeBuilder {
            module_name,
            instructions: Vec::new(),
            lines: Vec::new(),
            functions: IndexMap::new(),
            classes: IndexMap::new(),
            current_class: None,
        }
    }

    /// Returns the offset the next instruction will occupy.
    pub fn next_index(&self) -> usize {
        self.instructions.len()
    }

    /// Appends an instruction with no line information.
    pub fn add(&mut self, ins: Instruction) -> &mut Self {
        self.add_at_line(ins, 0)
    }

    /// Appends an instruction tagged with a 1-based source line.
    pub fn add_at_line(&mut self, ins: Instruction, line: u32) -> &mut Self {
        self.instructions.push(ins);
        self.lines.push(line);
        self
    }

    /// Binds a function label to the next instruction offset. Inside an open
    /// class block the label becomes a method of that class.
    pub fn label_function(&mut self, name: Symbol, flags: FnFlags) {
        let fref = FunctionRef {
            name,
            index: self.next_index(),
            flags,
        };
        match self.current_class {
            Some(class) => {
                self.classes[&class].methods.insert(name, fref);
            }
            None => {
                self.functions.insert(name, fref);
            }
        }
    }

    /// Opens a class block.
    pub fn start_class(&mut self, name: Symbol, supers: Vec<Symbol>) {
        let mut cref = ClassRef::new(name);
        cref.supers = supers;
        self.classes.insert(name, cref);
        self.current_class = Some(name);
    }

    /// Declares a field on the open class block.
    pub fn add_field(&mut self, name: Symbol) {
        if let Some(class) = self.current_class {
            self.classes[&class].fields.push(name);
        }
    }

    /// Closes the open class block.
    pub fn end_class(&mut self) {
        self.current_class = None;
    }

    /// True when a class block is open.
    pub fn in_class(&self) -> bool {
        self.current_class.is_some()
    }

    /// Finishes the tape, attaching source text when available.
    pub fn finish_with_source(self, file_name: String, source_lines: Vec<String>) -> Tape {
        Tape {
            module_name: self.module_name,
            instructions: self.instructions,
            functions: self.functions,
            classes: self.classes,
            source_map: Some(SourceMap {
                file_name,
                lines: self.lines,
                source_lines,
            }),
        }
    }

    /// Finishes the tape without a source map.
    pub fn finish(self) -> Tape {
        Tape {
            module_name: self.module_name,
            instructions: self.instructions,
            functions: self.functions,
            classes: self.classes,
            source_map: None,
        }
    }
}

/// Builds a tape directly from its parts. Used by the optimizer and the
/// binary decoder.
pub(crate) fn from_parts(
    module_name: Symbol,
    instructions: Vec<Instruction>,
    functions: IndexMap<Symbol, FunctionRef>,
    classes: IndexMap<Symbol, ClassRef>,
    source_map: Option<SourceMap>,
) -> Tape {
    Tape {
        module_name,
        instructions,
        functions,
        classes,
        source_map,
    }
}

/// Rebuilds a tape from transformed parts, preserving the name and source
/// text of `original`. Used by the optimizer, which rewrites instructions
/// and function offsets but never classes or names.
pub(crate) fn rebuild(
    original: &Tape,
    instructions: Vec<Instruction>,
    functions: IndexMap<Symbol, FunctionRef>,
    classes: IndexMap<Symbol, ClassRef>,
    lines: Option<Vec<u32>>,
) -> Tape {
    let source_map = match (original.source_map.as_ref(), lines) {
        (Some(sm), Some(lines)) => Some(SourceMap {
            file_name: sm.file_name.clone(),
            lines,
            source_lines: sm.source_lines.clone(),
        }),
        _ => None,
    };
    from_parts(
        original.module_name,
        instructions,
        functions,
        classes,
        source_map,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    #[test]
    fn builder_binds_labels_to_offsets() {
        let mut b = TapeBuilder::new(Symbol::intern("main"));
        b.add(Instruction::no_arg(Op::NOP));
        b.label_function(Symbol::intern("foo"), FnFlags::empty());
        b.add(Instruction::no_arg(Op::RET));
        let tape = b.finish();

        let foo = tape.functions()[&Symbol::intern("foo")];
        assert_eq!(foo.index, 1);
        assert!(!foo.is_const());
    }

    #[test]
    fn class_blocks_collect_fields_and_methods() {
        let mut b = TapeBuilder::new(Symbol::intern("main"));
        b.start_class(Symbol::intern("Point"), vec![]);
        b.add_field(Symbol::intern("x"));
        b.add_field(Symbol::intern("y"));
        b.label_function(Symbol::intern("new"), FnFlags::empty());
        b.add(Instruction::no_arg(Op::RET));
        b.end_class();
        let tape = b.finish();

        let class = &tape.classes()[&Symbol::intern("Point")];
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.methods[&Symbol::intern("new")].index, 0);
        assert!(tape.functions().is_empty());
    }

    #[test]
    fn line_numbers_follow_instructions() {
        let mut b = TapeBuilder::new(Symbol::intern("main"));
        b.add_at_line(Instruction::no_arg(Op::NOP), 3);
        b.add_at_line(Instruction::no_arg(Op::RET), 7);
        let tape = b.finish_with_source("main.ja".into(), vec![]);
        assert_eq!(tape.line_of(0), 3);
        assert_eq!(tape.line_of(1), 7);
        assert_eq!(tape.line_of(99), 0);
    }
}

//! Binary tape codec.
//!
//! The `.jb` wire format: a `JVBC` magic, a format version, a string table,
//! the module name, the instruction stream, the function and class tables,
//! and an optional debug section with per-instruction line numbers. Every
//! op and operand round-trips exactly.

use indexmap::IndexMap;

use jv_io::{BinaryReader, BinaryWriter};

use crate::error::{StaticError, StaticResult};
use crate::instruction::{Arg, Instruction};
use crate::op::Op;
use crate::primitive::Primitive;
use crate::symbol::Symbol;
use crate::tape::{ClassRef, FnFlags, FunctionRef, SourceMap, Tape, TapeBuilder};

const MAGIC: &[u8; 4] = b"JVBC";
const VERSION: u16 = 1;

const ARG_NONE: u8 = 0;
const ARG_CHAR: u8 = 1;
const ARG_INT: u8 = 2;
const ARG_FLOAT: u8 = 3;
const ARG_ID: u8 = 4;
const ARG_TEXT: u8 = 5;

#[derive(Default)]
struct StringTable {
    ids: IndexMap<Symbol, u32>,
}

impl StringTable {
    fn add(&mut self, symbol: Symbol) {
        let next = self.ids.len() as u32;
        self.ids.entry(symbol).or_insert(next);
    }

    fn id_of(&self, symbol: Symbol) -> u32 {
        self.ids[&symbol]
    }
}

fn collect_strings(tape: &Tape) -> StringTable {
    let mut table = StringTable::default();
    table.add(tape.module_name());
    for ins in tape.instructions() {
        match ins.arg {
            Arg::Id(s) | Arg::Text(s) => table.add(s),
            _ => {}
        }
    }
    for fref in tape.functions().values() {
        table.add(fref.name);
    }
    for cref in tape.classes().values() {
        table.add(cref.name);
        for s in &cref.supers {
            table.add(*s);
        }
        for f in &cref.fields {
            table.add(*f);
        }
        for m in cref.methods.values() {
            table.add(m.name);
        }
    }
    table
}

fn write_function_ref(writer: &mut BinaryWriter, table: &StringTable, fref: &FunctionRef) {
    writer.write_var_int(table.id_of(fref.name) as u64);
    writer.write_var_int(fref.index as u64);
    writer.write_u8(fref.flags.bits());
}

/// Serializes a tape into its `.jb` wire form.
pub fn tape_write_binary(tape: &Tape) -> Vec<u8> {
    let table = collect_strings(tape);
    let mut writer = BinaryWriter::with_capacity(64 + tape.len() * 4);

    writer.write_bytes(MAGIC);
    writer.write_u16(VERSION);

    writer.write_var_int(table.ids.len() as u64);
    for symbol in table.ids.keys() {
        writer.write_var_string(symbol.as_str());
    }

    writer.write_var_int(table.id_of(tape.module_name()) as u64);

    writer.write_var_int(tape.len() as u64);
    for ins in tape.instructions() {
        writer.write_u8(ins.op as u8);
        match ins.arg {
            Arg::None => writer.write_u8(ARG_NONE),
            Arg::Primitive(Primitive::Char(c)) => {
                writer.write_u8(ARG_CHAR);
                writer.write_u8(c);
            }
            Arg::Primitive(Primitive::Int(i)) => {
                writer.write_u8(ARG_INT);
                writer.write_i32(i);
            }
            Arg::Primitive(Primitive::Float(f)) => {
                writer.write_u8(ARG_FLOAT);
                writer.write_f64(f);
            }
            Arg::Id(s) => {
                writer.write_u8(ARG_ID);
                writer.write_var_int(table.id_of(s) as u64);
            }
            Arg::Text(s) => {
                writer.write_u8(ARG_TEXT);
                writer.write_var_int(table.id_of(s) as u64);
            }
        }
    }

    writer.write_var_int(tape.functions().len() as u64);
    for fref in tape.functions().values() {
        write_function_ref(&mut writer, &table, fref);
    }

    writer.write_var_int(tape.classes().len() as u64);
    for cref in tape.classes().values() {
        writer.write_var_int(table.id_of(cref.name) as u64);
        writer.write_var_int(cref.supers.len() as u64);
        for s in &cref.supers {
            writer.write_var_int(table.id_of(*s) as u64);
        }
        writer.write_var_int(cref.fields.len() as u64);
        for f in &cref.fields {
            writer.write_var_int(table.id_of(*f) as u64);
        }
        writer.write_var_int(cref.methods.len() as u64);
        for m in cref.methods.values() {
            write_function_ref(&mut writer, &table, m);
        }
    }

    match tape.source_map() {
        Some(sm) => {
            writer.write_u8(1);
            writer.write_var_string(&sm.file_name);
            writer.write_var_int(sm.lines.len() as u64);
            for line in &sm.lines {
                writer.write_var_int(*line as u64);
            }
            writer.write_var_int(sm.source_lines.len() as u64);
            for line in &sm.source_lines {
                writer.write_var_string(line);
            }
        }
        None => writer.write_u8(0),
    }

    writer.into_bytes()
}

struct TapeDecoder<'a> {
    reader: BinaryReader<'a>,
    strings: Vec<Symbol>,
}

impl<'a> TapeDecoder<'a> {
    fn symbol(&mut self) -> StaticResult<Symbol> {
        let id = self.reader.read_var_int()? as usize;
        self.strings
            .get(id)
            .copied()
            .ok_or_else(|| StaticError::invalid_bytecode(format!("string id {id} out of range")))
    }

    fn function_ref(&mut self) -> StaticResult<FunctionRef> {
        let name = self.symbol()?;
        let index = self.reader.read_var_int()? as usize;
        let bits = self.reader.read_u8()?;
        let flags = FnFlags::from_bits(bits)
            .ok_or_else(|| StaticError::invalid_bytecode(format!("bad function flags {bits:#x}")))?;
        Ok(FunctionRef { name, index, flags })
    }
}

/// Decodes a tape from its `.jb` wire form.
pub fn tape_read_binary(bytes: &[u8]) -> StaticResult<Tape> {
    let mut reader = BinaryReader::new(bytes);

    let magic = reader.read_bytes(4)?;
    if magic != MAGIC {
        return Err(StaticError::invalid_bytecode("bad magic"));
    }
    let version = reader.read_u16()?;
    if version != VERSION {
        return Err(StaticError::UnsupportedVersion {
            version,
            expected: VERSION,
        });
    }

    let string_count = reader.read_var_int()? as usize;
    let mut strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        strings.push(Symbol::intern(&reader.read_var_string()?));
    }

    let mut dec = TapeDecoder { reader, strings };
    let module_name = dec.symbol()?;
    let mut builder = TapeBuilder::new(module_name);

    let ins_count = dec.reader.read_var_int()? as usize;
    for _ in 0..ins_count {
        let op_byte = dec.reader.read_u8()?;
        let op = Op::from_byte(op_byte)
            .ok_or_else(|| StaticError::invalid_bytecode(format!("unknown op {op_byte:#04x}")))?;
        let arg = match dec.reader.read_u8()? {
            ARG_NONE => Arg::None,
            ARG_CHAR => Arg::Primitive(Primitive::Char(dec.reader.read_u8()?)),
            ARG_INT => Arg::Primitive(Primitive::Int(dec.reader.read_i32()?)),
            ARG_FLOAT => Arg::Primitive(Primitive::Float(dec.reader.read_f64()?)),
            ARG_ID => Arg::Id(dec.symbol()?),
            ARG_TEXT => Arg::Text(dec.symbol()?),
            tag => {
                return Err(StaticError::invalid_bytecode(format!(
                    "unknown operand tag {tag:#04x}"
                )))
            }
        };
        builder.add(Instruction { op, arg });
    }

    let fn_count = dec.reader.read_var_int()? as usize;
    let mut functions: IndexMap<Symbol, FunctionRef> = IndexMap::new();
    for _ in 0..fn_count {
        let fref = dec.function_ref()?;
        functions.insert(fref.name, fref);
    }

    let class_count = dec.reader.read_var_int()? as usize;
    let mut classes: IndexMap<Symbol, ClassRef> = IndexMap::new();
    for _ in 0..class_count {
        let name = dec.symbol()?;
        let mut cref = ClassRef::new(name);
        let super_count = dec.reader.read_var_int()? as usize;
        for _ in 0..super_count {
            let s = dec.symbol()?;
            cref.supers.push(s);
        }
        let field_count = dec.reader.read_var_int()? as usize;
        for _ in 0..field_count {
            let f = dec.symbol()?;
            cref.fields.push(f);
        }
        let method_count = dec.reader.read_var_int()? as usize;
        for _ in 0..method_count {
            let m = dec.function_ref()?;
            cref.methods.insert(m.name, m);
        }
        classes.insert(name, cref);
    }

    let source_map = match dec.reader.read_u8()? {
        0 => None,
        1 => {
            let file_name = dec.reader.read_var_string()?;
            let line_count = dec.reader.read_var_int()? as usize;
            let mut lines = Vec::with_capacity(line_count);
            for _ in 0..line_count {
                lines.push(dec.reader.read_var_int()? as u32);
            }
            let text_count = dec.reader.read_var_int()? as usize;
            let mut source_lines = Vec::with_capacity(text_count);
            for _ in 0..text_count {
                source_lines.push(dec.reader.read_var_string()?);
            }
            Some(SourceMap {
                file_name,
                lines,
                source_lines,
            })
        }
        tag => {
            return Err(StaticError::invalid_bytecode(format!(
                "unknown debug tag {tag:#04x}"
            )))
        }
    };

    let base = builder.finish();
    let instructions = base.instructions().to_vec();
    Ok(crate::tape::from_parts(
        module_name,
        instructions,
        functions,
        classes,
        source_map,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::FnFlags;

    fn sample_tape() -> Tape {
        let mut b = TapeBuilder::new(Symbol::intern("sample"));
        b.add_at_line(Instruction::int(Op::PUSH, 2), 1);
        b.add_at_line(Instruction::int(Op::PUSH, 3), 1);
        b.add_at_line(Instruction::no_arg(Op::ADD), 1);
        b.add_at_line(Instruction::id(Op::SET, Symbol::intern("x")), 2);
        b.add_at_line(
            Instruction::text(Op::RES, Symbol::intern("\"hello\"")),
            3,
        );
        b.add_at_line(
            Instruction::primitive(Op::PUSH, Primitive::Float(2.5)),
            3,
        );
        b.add_at_line(
            Instruction::primitive(Op::PUSH, Primitive::Char(b'q')),
            3,
        );
        b.label_function(Symbol::intern("helper"), FnFlags::CONST);
        b.add_at_line(Instruction::no_arg(Op::RET), 4);
        b.start_class(Symbol::intern("Point"), vec![Symbol::intern("Object")]);
        b.add_field(Symbol::intern("x"));
        b.add_field(Symbol::intern("y"));
        b.label_function(Symbol::intern("new"), FnFlags::empty());
        b.add_at_line(Instruction::no_arg(Op::RET), 6);
        b.end_class();
        b.finish_with_source("sample.ja".into(), vec!["line one".into()])
    }

    #[test]
    fn roundtrip_preserves_everything() {
        let tape = sample_tape();
        let bytes = tape_write_binary(&tape);
        let decoded = tape_read_binary(&bytes).unwrap();

        assert_eq!(decoded.module_name(), tape.module_name());
        assert_eq!(decoded.instructions(), tape.instructions());
        assert_eq!(decoded.functions(), tape.functions());
        assert_eq!(decoded.classes(), tape.classes());
        assert_eq!(
            decoded.source_map().map(|sm| &sm.lines),
            tape.source_map().map(|sm| &sm.lines)
        );
    }

    #[test]
    fn roundtrip_without_debug_info() {
        let mut b = TapeBuilder::new(Symbol::intern("bare"));
        b.add(Instruction::no_arg(Op::EXIT));
        let tape = b.finish();
        let decoded = tape_read_binary(&tape_write_binary(&tape)).unwrap();
        assert!(decoded.source_map().is_none());
        assert_eq!(decoded.instructions(), tape.instructions());
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            tape_read_binary(b"NOPE\x01\x00"),
            Err(StaticError::InvalidBytecode { .. })
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let tape = sample_tape();
        let mut bytes = tape_write_binary(&tape);
        bytes[4] = 0xEE;
        assert!(matches!(
            tape_read_binary(&bytes),
            Err(StaticError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let tape = sample_tape();
        let bytes = tape_write_binary(&tape);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(tape_read_binary(truncated).is_err());
    }
}

//! Textual tape reader.

use jv_core::tape::FnFlags;
use jv_core::{Arg, Instruction, Op, StaticError, StaticResult, Symbol, Tape, TapeBuilder};

use crate::lexer::{lex_line, Token};

/// Reads `.ja` assembly text into a tape.
///
/// `file_name` is used for diagnostics and the source map;
/// `default_module` names the module when the text carries no `module`
/// header.
pub fn tape_read(source: &str, file_name: &str, default_module: &str) -> StaticResult<Tape> {
    let mut builder: Option<TapeBuilder> = None;
    let source_lines: Vec<String> = source.lines().map(str::to_owned).collect();

    for (i, raw) in source.lines().enumerate() {
        let line_no = i + 1;
        let tokens = lex_line(raw, file_name, line_no)?;
        if tokens.is_empty() {
            continue;
        }

        // The module header may only appear before any code.
        if let Token::Ident(word) = &tokens[0] {
            if word == "module" {
                if builder.is_some() {
                    return Err(StaticError::malformed(
                        file_name,
                        line_no,
                        "duplicate module header",
                    ));
                }
                let name = match tokens.get(1) {
                    Some(Token::Ident(name)) if tokens.len() == 2 => name,
                    _ => {
                        return Err(StaticError::malformed(
                            file_name,
                            line_no,
                            "expected: module <name>",
                        ));
                    }
                };
                builder = Some(TapeBuilder::new(Symbol::intern(name)));
                continue;
            }
        }

        let b = builder.get_or_insert_with(|| TapeBuilder::new(Symbol::intern(default_module)));
        read_line(b, &tokens, file_name, line_no)?;
    }

    let builder =
        builder.unwrap_or_else(|| TapeBuilder::new(Symbol::intern(default_module)));
    if builder.in_class() {
        return Err(StaticError::malformed(
            file_name.to_owned(),
            source_lines.len(),
            "unterminated class block".to_owned(),
        ));
    }
    Ok(builder.finish_with_source(file_name.to_owned(), source_lines))
}

fn read_line(
    b: &mut TapeBuilder,
    tokens: &[Token],
    file: &str,
    line_no: usize,
) -> StaticResult<()> {
    match &tokens[0] {
        Token::Label(name) => {
            let mut flags = FnFlags::empty();
            for extra in &tokens[1..] {
                match extra {
                    Token::Ident(word) if word == "const" => flags |= FnFlags::CONST,
                    Token::Ident(word) if word == "async" => flags |= FnFlags::ASYNC,
                    _ => {
                        return Err(StaticError::malformed(
                            file,
                            line_no,
                            "expected: @<name> [const] [async]",
                        ));
                    }
                }
            }
            b.label_function(Symbol::intern(name), flags);
            Ok(())
        }
        Token::Ident(word) if word == "class" => read_class_header(b, tokens, file, line_no),
        Token::Ident(word) if word == "endclass" => {
            if !b.in_class() {
                return Err(StaticError::malformed(
                    file,
                    line_no,
                    "endclass outside a class block",
                ));
            }
            b.end_class();
            Ok(())
        }
        Token::Ident(word) if word == "field" => {
            let name = match tokens.get(1) {
                Some(Token::Ident(name)) if tokens.len() == 2 && b.in_class() => name,
                _ => {
                    return Err(StaticError::malformed(
                        file,
                        line_no,
                        "expected: field <name> inside a class block",
                    ));
                }
            };
            b.add_field(Symbol::intern(name));
            Ok(())
        }
        Token::Ident(mnemonic) => {
            let op = Op::from_mnemonic(mnemonic).ok_or_else(|| StaticError::UnknownOp {
                file: file.to_owned(),
                line: line_no,
                mnemonic: mnemonic.clone(),
            })?;
            let arg = read_operand(op, &tokens[1..], file, line_no)?;
            b.add_at_line(Instruction { op, arg }, line_no as u32);
            Ok(())
        }
        _ => Err(StaticError::malformed(
            file.to_owned(),
            line_no,
            "expected an instruction, label or directive".to_owned(),
        )),
    }
}

fn read_class_header(
    b: &mut TapeBuilder,
    tokens: &[Token],
    file: &str,
    line_no: usize,
) -> StaticResult<()> {
    if b.in_class() {
        return Err(StaticError::malformed(
            file,
            line_no,
            "class blocks cannot nest",
        ));
    }
    let name = match tokens.get(1) {
        Some(Token::Ident(name)) => Symbol::intern(name),
        _ => {
            return Err(StaticError::malformed(
                file,
                line_no,
                "expected: class <Name> [: Super[, ...]]",
            ));
        }
    };
    let mut supers = Vec::new();
    let mut rest = &tokens[2..];
    if let Some(Token::Punct(':')) = rest.first() {
        rest = &rest[1..];
        loop {
            match rest.first() {
                Some(Token::Ident(s)) => {
                    supers.push(Symbol::intern(s));
                    rest = &rest[1..];
                }
                _ => {
                    return Err(StaticError::malformed(
                        file,
                        line_no,
                        "expected a super-class name",
                    ));
                }
            }
            match rest.first() {
                Some(Token::Punct(',')) => rest = &rest[1..],
                None => break,
                _ => {
                    return Err(StaticError::malformed(
                        file,
                        line_no,
                        "expected ',' between super-class names",
                    ));
                }
            }
        }
    } else if !rest.is_empty() {
        return Err(StaticError::malformed(
            file,
            line_no,
            "expected: class <Name> [: Super[, ...]]",
        ));
    }
    b.start_class(name, supers);
    Ok(())
}

fn read_operand(op: Op, rest: &[Token], file: &str, line_no: usize) -> StaticResult<Arg> {
    let bad = |reason: &str| StaticError::BadOperand {
        file: file.to_owned(),
        line: line_no,
        op: op.as_str().to_owned(),
        reason: reason.to_owned(),
    };
    match rest {
        [] => Ok(Arg::None),
        [Token::Int(i)] => Ok(Arg::Primitive(jv_core::Primitive::Int(*i))),
        [Token::Float(f)] => Ok(Arg::Primitive(jv_core::Primitive::Float(*f))),
        [Token::Char(c)] => Ok(Arg::Primitive(jv_core::Primitive::Char(*c))),
        [Token::Ident(id)] => Ok(Arg::Id(Symbol::intern(id))),
        [Token::Str(text)] => Ok(Arg::Text(Symbol::intern(text))),
        [_] => Err(bad("unsupported operand form")),
        _ => Err(bad("at most one operand per instruction")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jv_core::Primitive;

    #[test]
    fn reads_instructions_and_labels() {
        let src = "module main\n  push 2\n  push 3\n  add\n@helper\n  ret\n";
        let tape = tape_read(src, "main.ja", "main").unwrap();
        assert_eq!(tape.module_name().as_str(), "main");
        assert_eq!(tape.len(), 4);
        assert_eq!(tape.get(0), Some(&Instruction::int(Op::PUSH, 2)));
        assert_eq!(tape.get(2), Some(&Instruction::no_arg(Op::ADD)));
        assert_eq!(
            tape.functions()[&Symbol::intern("helper")].index,
            3
        );
        assert_eq!(tape.line_of(0), 2);
    }

    #[test]
    fn reads_class_blocks() {
        let src = "\
module shapes
class Point : Object
  field x
  field y
@new
  ret
endclass
";
        let tape = tape_read(src, "shapes.ja", "shapes").unwrap();
        let class = &tape.classes()[&Symbol::intern("Point")];
        assert_eq!(class.supers, vec![Symbol::intern("Object")]);
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.methods[&Symbol::intern("new")].index, 0);
    }

    #[test]
    fn reads_operand_forms() {
        let src = "  res \"hi\"\n  push 'c'\n  res 1.5\n  set x\n";
        let tape = tape_read(src, "ops.ja", "ops").unwrap();
        assert_eq!(
            tape.get(0),
            Some(&Instruction::text(Op::RES, Symbol::intern("\"hi\"")))
        );
        assert_eq!(
            tape.get(1),
            Some(&Instruction::primitive(Op::PUSH, Primitive::Char(b'c')))
        );
        assert_eq!(
            tape.get(2),
            Some(&Instruction::primitive(Op::RES, Primitive::Float(1.5)))
        );
        assert_eq!(
            tape.get(3),
            Some(&Instruction::id(Op::SET, Symbol::intern("x")))
        );
    }

    #[test]
    fn default_module_name_applies() {
        let tape = tape_read("  nop\n", "scratch.ja", "scratch").unwrap();
        assert_eq!(tape.module_name().as_str(), "scratch");
    }

    #[test]
    fn rejects_unknown_mnemonics() {
        assert!(matches!(
            tape_read("  warble\n", "bad.ja", "bad"),
            Err(StaticError::UnknownOp { .. })
        ));
    }

    #[test]
    fn rejects_unterminated_class() {
        assert!(tape_read("class Foo\n  nop\n", "bad.ja", "bad").is_err());
    }

    #[test]
    fn function_flags_parse() {
        let src = "@f const async\n  ret\n";
        let tape = tape_read(src, "f.ja", "f").unwrap();
        let f = tape.functions()[&Symbol::intern("f")];
        assert!(f.is_const());
        assert!(f.is_async());
    }
}

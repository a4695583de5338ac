//! Line lexer for `.ja` assembly.

use jv_core::{StaticError, StaticResult};

/// One token of an assembly line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A bare identifier or mnemonic
    Ident(String),
    /// An integer literal
    Int(i32),
    /// A float literal
    Float(f64),
    /// A char literal (`'c'`)
    Char(u8),
    /// A string literal, verbatim including its quotes
    Str(String),
    /// A function label (`@name`)
    Label(String),
    /// Punctuation (`:` or `,`)
    Punct(char),
}

/// Splits one line into tokens. Comments (`;` to end of line) are dropped.
pub fn lex_line(line: &str, file: &str, line_no: usize) -> StaticResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(_, c)) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            ':' | ',' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            '@' => {
                chars.next();
                let name = take_while(&mut chars, line, is_ident_char);
                if name.is_empty() {
                    return Err(StaticError::malformed(file, line_no, "empty label"));
                }
                tokens.push(Token::Label(name));
            }
            '\'' => {
                chars.next();
                let (_, ch) = chars
                    .next()
                    .ok_or_else(|| StaticError::malformed(file, line_no, "unterminated char"))?;
                match chars.next() {
                    Some((_, '\'')) => tokens.push(Token::Char(ch as u8)),
                    _ => {
                        return Err(StaticError::malformed(file, line_no, "unterminated char"));
                    }
                }
            }
            '"' => {
                chars.next();
                let mut text = String::from('"');
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    text.push(ch);
                    if ch == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            text.push(escaped);
                        }
                    } else if ch == '"' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(StaticError::malformed(file, line_no, "unterminated string"));
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let text = take_while(&mut chars, line, |ch| {
                    ch.is_ascii_digit() || ch == '.' || ch == '-' || ch == '+'
                });
                tokens.push(parse_number(&text, file, line_no)?);
            }
            c if is_ident_char(c) => {
                let text = take_while(&mut chars, line, is_ident_char);
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(StaticError::malformed(
                    file.to_owned(),
                    line_no,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn take_while(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    line: &str,
    keep: fn(char) -> bool,
) -> String {
    let start = match chars.peek() {
        Some(&(i, _)) => i,
        None => return String::new(),
    };
    let mut end = start;
    while let Some(&(i, c)) = chars.peek() {
        if !keep(c) {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    line[start..end].to_owned()
}

fn parse_number(text: &str, file: &str, line_no: usize) -> StaticResult<Token> {
    if text.contains('.') {
        text.parse::<f64>().map(Token::Float).map_err(|_| {
            StaticError::malformed(file.to_owned(), line_no, format!("bad float '{text}'"))
        })
    } else {
        text.parse::<i32>().map(Token::Int).map_err(|_| {
            StaticError::malformed(file.to_owned(), line_no, format!("bad int '{text}'"))
        })
    }
}

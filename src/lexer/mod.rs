//! Tokenizes one line of BASIC source.
//!
//! Converts a single source line into a token stream: numbers, string
//! literals, identifiers (canonicalized to upper case, with a trailing
//! `$` kept as part of the name), operators, and punctuation. `'` and the
//! identifier `REM` both start a line comment that consumes the rest of
//! the line. `MOD`, `AND`, `OR`, and `NOT` are recognized as operator
//! tokens, not identifiers, so the compiler's precedence climb never has
//! to special-case them.

pub mod cursor;
pub mod token;

#[cfg(test)]
mod tests;

use crate::error::{CompileError, CompileErrorKind, Span};
use cursor::Cursor;
use token::{Token, TokenKind};

pub struct LexResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<CompileError>,
}

pub fn tokenize(line_no: u32, line: &str) -> LexResult {
    let mut cursor = Cursor::new(line);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    loop {
        skip_whitespace(&mut cursor);
        if cursor.is_at_end() {
            break;
        }

        let col = cursor.col();
        let span = Span::new(line_no, col);
        let ch = cursor.peek().unwrap();

        match ch {
            '\'' => break, // line comment: nothing more to lex
            '"' => match lex_string(&mut cursor, span) {
                Ok(tok) => tokens.push(tok),
                Err(e) => {
                    errors.push(e);
                    break;
                }
            },
            c if c.is_ascii_digit() || (c == '.' && cursor.peek_at(1).map_or(false, |d| d.is_ascii_digit())) => {
                tokens.push(lex_number(&mut cursor, span));
            }
            c if c.is_ascii_alphabetic() => {
                let (tok, is_rem) = lex_word(&mut cursor, span);
                let stop = is_rem;
                tokens.push(tok);
                if stop {
                    break;
                }
            }
            _ => match lex_operator(&mut cursor, span) {
                Some(tok) => tokens.push(tok),
                None => {
                    errors.push(CompileError::new(
                        CompileErrorKind::SyntaxError,
                        format!("unexpected character '{}'", ch),
                        span,
                    ));
                    cursor.advance();
                }
            },
        }
    }

    let eol_span = Span::new(line_no, cursor.col());
    tokens.push(Token { kind: TokenKind::Eol, span: eol_span });
    tokens.push(Token { kind: TokenKind::Eof, span: eol_span });

    LexResult { tokens, errors }
}

fn skip_whitespace(cursor: &mut Cursor) {
    while matches!(cursor.peek(), Some(' ') | Some('\t')) {
        cursor.advance();
    }
}

fn lex_string(cursor: &mut Cursor, span: Span) -> Result<Token, CompileError> {
    cursor.advance(); // opening quote
    let mut s = String::new();
    loop {
        match cursor.peek() {
            None => {
                return Err(CompileError::new(
                    CompileErrorKind::UnterminatedString,
                    "unterminated string literal",
                    span,
                ))
            }
            Some('"') => {
                cursor.advance();
                break;
            }
            Some(c) => {
                s.push(c);
                cursor.advance();
            }
        }
    }
    Ok(Token { kind: TokenKind::Str(s), span })
}

fn lex_number(cursor: &mut Cursor, span: Span) -> Token {
    let mut text = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
        text.push(cursor.advance().unwrap());
    }
    if cursor.peek() == Some('.') {
        text.push(cursor.advance().unwrap());
        while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(cursor.advance().unwrap());
        }
    }
    let value: f64 = text.parse().unwrap_or(0.0);
    Token { kind: TokenKind::Number(value), span }
}

/// Returns the token plus whether it was `REM` (so the caller stops lexing).
fn lex_word(cursor: &mut Cursor, span: Span) -> (Token, bool) {
    let mut word = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_alphanumeric()) {
        word.push(cursor.advance().unwrap());
    }
    if cursor.peek() == Some('$') {
        word.push(cursor.advance().unwrap());
    }
    let upper = word.to_ascii_uppercase();

    match upper.as_str() {
        "REM" => (Token { kind: TokenKind::Ident(upper), span }, true),
        "MOD" => (Token { kind: TokenKind::Mod, span }, false),
        "AND" => (Token { kind: TokenKind::And, span }, false),
        "OR" => (Token { kind: TokenKind::Or, span }, false),
        "NOT" => (Token { kind: TokenKind::Not, span }, false),
        _ => (Token { kind: TokenKind::Ident(upper), span }, false),
    }
}

fn lex_operator(cursor: &mut Cursor, span: Span) -> Option<Token> {
    let c = cursor.peek()?;
    let two = cursor.peek_at(1);

    let (kind, len) = match (c, two) {
        ('<', Some('=')) => (TokenKind::LessEqual, 2),
        ('>', Some('=')) => (TokenKind::GreaterEqual, 2),
        ('<', Some('>')) => (TokenKind::NotEqual, 2),
        ('+', _) => (TokenKind::Plus, 1),
        ('-', _) => (TokenKind::Minus, 1),
        ('*', _) => (TokenKind::Star, 1),
        ('/', _) => (TokenKind::Slash, 1),
        ('^', _) => (TokenKind::Caret, 1),
        ('=', _) => (TokenKind::Equal, 1),
        ('<', _) => (TokenKind::Less, 1),
        ('>', _) => (TokenKind::Greater, 1),
        ('(', _) => (TokenKind::LParen, 1),
        (')', _) => (TokenKind::RParen, 1),
        (',', _) => (TokenKind::Comma, 1),
        (';', _) => (TokenKind::Semicolon, 1),
        (':', _) => (TokenKind::Colon, 1),
        ('[', _) => (TokenKind::LBracket, 1),
        _ => return None,
    };

    for _ in 0..len {
        cursor.advance();
    }
    Some(Token { kind, span })
}

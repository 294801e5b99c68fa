use super::*;
use token::TokenKind::*;

fn kinds(src: &str) -> Vec<TokenKind> {
    tokenize(10, src).tokens.into_iter().map(|t| t.kind).collect()
}

#[test]
fn test_simple_assignment() {
    assert_eq!(kinds("A = 3"), vec![Ident("A".into()), Equal, Number(3.0), Eol, Eof]);
}

#[test]
fn test_string_name_is_string_type() {
    assert_eq!(kinds("A$"), vec![Ident("A$".into()), Eol, Eof]);
}

#[test]
fn test_lowercase_canonicalized() {
    assert_eq!(kinds("foo"), vec![Ident("FOO".into()), Eol, Eof]);
}

#[test]
fn test_two_char_operators() {
    assert_eq!(kinds("<= >= <>"), vec![LessEqual, GreaterEqual, NotEqual, Eol, Eof]);
}

#[test]
fn test_mod_is_operator_not_ident() {
    assert_eq!(kinds("7 MOD 3"), vec![Number(7.0), Mod, Number(3.0), Eol, Eof]);
}

#[test]
fn test_string_literal() {
    assert_eq!(kinds("\"hi there\""), vec![Str("hi there".into()), Eol, Eof]);
}

#[test]
fn test_unterminated_string_is_error() {
    let result = tokenize(1, "\"unterminated");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, crate::error::CompileErrorKind::UnterminatedString);
}

#[test]
fn test_rem_consumes_rest_of_line() {
    assert_eq!(kinds("REM this is ignored"), vec![Ident("REM".into()), Eol, Eof]);
}

#[test]
fn test_apostrophe_comment() {
    assert_eq!(kinds("A=1 ' trailing comment"), vec![Ident("A".into()), Equal, Number(1.0), Eol, Eof]);
}

#[test]
fn test_fractional_number() {
    assert_eq!(kinds("3.5"), vec![Number(3.5), Eol, Eof]);
}

#[test]
fn test_colon_separates_statements() {
    assert_eq!(kinds("A=1:B=2"), vec![
        Ident("A".into()), Equal, Number(1.0), Colon,
        Ident("B".into()), Equal, Number(2.0), Eol, Eof
    ]);
}

//! S-expression reader.
//!
//! Turns source text into [`Node`] trees:
//!
//! - numbers (always f64): `42`, `-3.5`, `.5`, `1e3`
//! - strings with `\n \t \r \\ \"` escapes
//! - booleans `#t` / `#f`
//! - symbols
//! - lists with an optional dotted tail: `(a b . c)`
//! - reader shorthands `'x`, `` `x ``, `,x`, `,@x`
//! - `;` line comments (see [`ParseConfig`])

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{cut, value},
    error::ErrorKind,
};

use crate::ast::{
    Node, SYMBOL_SPECIAL_CHARS, boolean, is_valid_symbol, list, looks_numeric, num, string, sym,
};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Treat `;` up to the end of the line as a comment
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

fn failure(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Skip whitespace and, when enabled, comments
fn skip_whitespace(input: &str, config: ParseConfig) -> &str {
    let mut rest = input.trim_start();
    while config.handle_comments
        && let Some(comment) = rest.strip_prefix(';')
    {
        rest = comment
            .find('\n')
            .map_or("", |end| &comment[end..])
            .trim_start();
    }
    rest
}

/// Convert nom parsing errors to structured parse errors
fn parse_error(
    input: &str,
    error: nom::Err<nom::error::Error<&str>>,
    config: ParseConfig,
) -> Error {
    let e = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return Error::ParseError(ParseError::from_message(
                ParseErrorKind::Incomplete,
                "Incomplete input",
            ));
        }
    };
    let offset = input.len().saturating_sub(e.input.len());
    let near: String = e.input.chars().take(10).collect();

    let (kind, message) = match e.code {
        ErrorKind::TooLarge => (
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        ),
        _ if skip_whitespace(e.input, config).is_empty() => (
            ParseErrorKind::Incomplete,
            "Unexpected end of input".to_owned(),
        ),
        ErrorKind::Float => (
            ParseErrorKind::InvalidSyntax,
            format!("Invalid number near '{near}'"),
        ),
        ErrorKind::Escaped => (
            ParseErrorKind::InvalidSyntax,
            "Invalid escape sequence in string literal".to_owned(),
        ),
        ErrorKind::Verify => (
            ParseErrorKind::InvalidSyntax,
            "Dotted tail needs at least one element before '.'".to_owned(),
        ),
        _ => (
            ParseErrorKind::InvalidSyntax,
            format!("Invalid syntax near '{near}'"),
        ),
    };
    Error::ParseError(ParseError::with_context(kind, message, input, offset))
}

/// Parse a boolean (#t or #f)
fn parse_bool(input: &str) -> IResult<&str, Node> {
    alt((
        value(boolean(true), tag("#t")),
        value(boolean(false), tag("#f")),
    ))
    .parse(input)
}

/// Parse a number or a symbol.
///
/// Both share one token grammar; a token that starts like a number must parse
/// as one.
fn parse_atom(input: &str) -> IResult<&str, Node> {
    let mut token_chars =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c));
    let (remaining, token) = token_chars.parse(input)?;

    if looks_numeric(token) {
        return match token.parse::<f64>() {
            Ok(n) => Ok((remaining, num(n))),
            Err(_) => Err(failure(input, ErrorKind::Float)),
        };
    }
    if is_valid_symbol(token) {
        Ok((remaining, sym(token)))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        )))
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Node> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), string(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return Err(failure(remaining, ErrorKind::Escaped)),
                    // Backslash at end of input
                    None => return Err(failure(char_iter.as_str(), ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            // Unterminated string
            None => return Err(failure(remaining, ErrorKind::Char)),
        }
    }
}

/// Parse reader shorthands: 'x `x ,x ,@x
fn parse_prefixed(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Node> {
    let (input, form) = alt((
        value("unquote-splicing", tag(",@")),
        value("unquote", tag(",")),
        value("quote", tag("'")),
        value("quasiquote", tag("`")),
    ))
    .parse(input)?;
    let (input, expr) = cut(|input| parse_sexpr(input, config, depth + 1)).parse(input)?;
    Ok((input, list(vec![sym(form), expr])))
}

/// A lone `.` that separates a dotted tail
fn strip_dot(input: &str) -> Option<&str> {
    let after = input.strip_prefix('.')?;
    match after.chars().next() {
        None => Some(after),
        Some(c) if c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'' | '`' | ',') => {
            Some(after)
        }
        Some(_) => None,
    }
}

/// Parse a list, including an optional dotted tail
fn parse_list(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Node> {
    let (mut rest, _) = char('(').parse(input)?;
    let mut elements = Vec::new();

    loop {
        rest = skip_whitespace(rest, config);
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((
                after,
                Node::List {
                    elements,
                    tail: None,
                },
            ));
        }
        if let Some(after_dot) = strip_dot(rest) {
            if elements.is_empty() {
                return Err(failure(rest, ErrorKind::Verify));
            }
            let (after_tail, tail) =
                cut(|input| parse_sexpr(input, config, depth + 1)).parse(after_dot)?;
            let (after_close, _) =
                cut(char(')')).parse(skip_whitespace(after_tail, config))?;
            return Ok((
                after_close,
                Node::List {
                    elements,
                    tail: Some(Box::new(tail)),
                },
            ));
        }
        // Anything else after '(' must be an element; end of input is a failure here
        let (after, element) = cut(|input| parse_sexpr(input, config, depth + 1)).parse(rest)?;
        elements.push(element);
        rest = after;
    }
}

/// Parse one S-expression, skipping leading whitespace and comments
fn parse_sexpr(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Node> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }
    let input = skip_whitespace(input, config);
    alt((
        |input| parse_prefixed(input, config, depth),
        |input| parse_list(input, config, depth),
        parse_bool,
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// Parse every form in `input`.
pub fn parse_program(input: &str) -> Result<Vec<Node>, Error> {
    parse_program_with_config(input, ParseConfig::default())
}

pub fn parse_program_with_config(input: &str, config: ParseConfig) -> Result<Vec<Node>, Error> {
    let mut rest = skip_whitespace(input, config);
    let mut nodes = Vec::new();
    while !rest.is_empty() {
        let (remaining, node) =
            parse_sexpr(rest, config, 0).map_err(|e| parse_error(input, e, config))?;
        nodes.push(node);
        rest = skip_whitespace(remaining, config);
    }
    Ok(nodes)
}

/// Parse exactly one S-expression.
pub fn parse_expr(input: &str) -> Result<Node, Error> {
    parse_expr_with_config(input, ParseConfig::default())
}

pub fn parse_expr_with_config(input: &str, config: ParseConfig) -> Result<Node, Error> {
    let (remaining, node) =
        parse_sexpr(input, config, 0).map_err(|e| parse_error(input, e, config))?;
    let remaining = skip_whitespace(remaining, config);
    if remaining.is_empty() {
        Ok(node)
    } else {
        Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input: '{remaining}'"),
            input,
            input.len() - remaining.len(),
        )))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{dotted, nil};

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Node),               // Parsing should succeed with this node
        SpecificError(&'static str), // Parsing should fail with error containing this string
        Error,                       // Parsing should fail (any error)
    }
    use ParseTestResult::{SpecificError, Success};

    /// Helper for successful parse test cases
    fn success<T: Into<Node>>(node: T) -> ParseTestResult {
        Success(node.into())
    }

    /// Run parse tests with round-trip validation
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let result = parse_expr(input);

            match (result, expected) {
                (Ok(actual), Success(expected_node)) => {
                    assert_eq!(actual, *expected_node, "{test_id}: node mismatch for '{input}'");

                    // display -> parse -> display must be stable
                    let displayed = format!("{actual}");
                    let reparsed = parse_expr(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        displayed,
                        format!("{reparsed}"),
                        "{test_id}: round-trip display mismatch for '{input}'"
                    );
                }
                (Err(_), ParseTestResult::Error) => {}
                (Err(err), SpecificError(expected_text)) => {
                    let message = format!("{err}");
                    assert!(
                        message.contains(expected_text),
                        "{test_id}: error for '{input}' should contain '{expected_text}', got '{message}'"
                    );
                }
                (Ok(actual), ParseTestResult::Error | SpecificError(_)) => {
                    panic!("{test_id}: expected error for '{input}', got {actual}");
                }
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success for '{input}', got {err:?}");
                }
            }
        }
    }

    fn quoted(form: &str, node: Node) -> Node {
        list(vec![sym(form), node])
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== NUMBERS =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("+7", success(7)),
            ("3.25", success(3.25)),
            ("-0.5", success(-0.5)),
            (".5", success(0.5)),
            ("1e3", success(1000.0)),
            ("2.5E-1", success(0.25)),
            ("  42  ", success(42)),
            ("1abc", SpecificError("Invalid number")),
            ("1.2.3", SpecificError("Invalid number")),
            ("-1x", ParseTestResult::Error),
            // ===== BOOLEANS =====
            ("#t", success(true)),
            ("#f", success(false)),
            ("#x", SpecificError("Invalid syntax")),
            // ===== STRINGS =====
            ("\"hello\"", success("hello")),
            ("\"\"", success("")),
            (r#""a\nb\t\"c\"\\""#, success("a\nb\t\"c\"\\")),
            ("\"héllo wörld\"", success("héllo wörld")),
            ("\"unterminated", SpecificError("end of input")),
            (r#""bad \q escape""#, SpecificError("escape")),
            // ===== SYMBOLS =====
            ("foo", success(sym("foo"))),
            ("+", success(sym("+"))),
            ("-", success(sym("-"))),
            ("null?", success(sym("null?"))),
            ("string->number", success(sym("string->number"))),
            ("...", success(sym("..."))),
            ("G__1", success(sym("G__1"))),
            ("quote", success(sym("quote"))),
            (".", SpecificError("Invalid syntax")),
            // ===== LISTS =====
            ("()", success(nil())),
            ("( )", success(nil())),
            ("(1 2 3)", success(vec![1, 2, 3])),
            (
                "(+ 1 (* 2 3))",
                success(list(vec![
                    sym("+"),
                    1.into(),
                    list(vec![sym("*"), 2.into(), 3.into()]),
                ])),
            ),
            ("(a\n\tb)", success(list(vec![sym("a"), sym("b")]))),
            ("(\"a\"\"b\")", success(vec!["a", "b"])),
            ("((()))", success(list(vec![list(vec![nil()])]))),
            // ===== DOTTED TAILS =====
            ("(1 . 2)", success(dotted(vec![1.into()], 2.into()))),
            (
                "(1 2 . (3))",
                success(dotted(vec![1.into(), 2.into()], vec![3].into())),
            ),
            ("(a . b)", success(dotted(vec![sym("a")], sym("b")))),
            ("(a .b)", success(list(vec![sym("a"), sym(".b")]))),
            ("(a .5)", success(list(vec![sym("a"), 0.5.into()]))),
            ("(. a)", SpecificError("at least one element")),
            ("(a . )", SpecificError("Invalid syntax")),
            ("(a . b c)", SpecificError("Invalid syntax")),
            ("(a . b", SpecificError("end of input")),
            // ===== READER SHORTHANDS =====
            ("'foo", success(quoted("quote", sym("foo")))),
            ("'(1 2)", success(quoted("quote", vec![1, 2].into()))),
            ("''a", success(quoted("quote", quoted("quote", sym("a"))))),
            (
                "`(a ,b)",
                success(quoted(
                    "quasiquote",
                    list(vec![sym("a"), quoted("unquote", sym("b"))]),
                )),
            ),
            (",@xs", success(quoted("unquote-splicing", sym("xs")))),
            (", x", success(quoted("unquote", sym("x")))),
            ("'()", success(quoted("quote", nil()))),
            ("'", SpecificError("end of input")),
            ("'(1 2", SpecificError("end of input")),
            // ===== COMMENTS =====
            ("; leading\n42", success(42)),
            ("(1 ; inline\n 2)", success(vec![1, 2])),
            ("42 ; trailing", success(42)),
            // ===== ERRORS =====
            ("", SpecificError("end of input")),
            ("   ", SpecificError("end of input")),
            (")", SpecificError("Invalid syntax")),
            ("(1 2", SpecificError("end of input")),
            ("(1 2))", SpecificError("Unexpected remaining input")),
            ("1 2", SpecificError("Unexpected remaining input")),
            ("(a [b])", ParseTestResult::Error),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parse_error_kinds() {
        let kind_of = |input: &str| match parse_expr(input) {
            Err(Error::ParseError(e)) => e.kind,
            other => panic!("expected parse error for '{input}', got {other:?}"),
        };
        assert_eq!(kind_of("(define x"), ParseErrorKind::Incomplete);
        assert_eq!(kind_of("\"abc"), ParseErrorKind::Incomplete);
        assert_eq!(kind_of("(a ; comment"), ParseErrorKind::Incomplete);
        assert_eq!(kind_of(")"), ParseErrorKind::InvalidSyntax);
        assert_eq!(kind_of("1 2"), ParseErrorKind::TrailingContent);

        let deep = format!(
            "{}{}",
            "(".repeat(MAX_PARSE_DEPTH + 1),
            ")".repeat(MAX_PARSE_DEPTH + 1)
        );
        assert_eq!(kind_of(&deep), ParseErrorKind::TooDeeplyNested);

        match parse_expr("(foo #bar)") {
            Err(Error::ParseError(e)) => {
                assert_eq!(e.found.as_deref(), Some("#"));
                assert!(e.context.unwrap().contains("(foo #bar)"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        let under_limit = format!(
            "{}{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        assert!(parse_expr(&under_limit).is_ok());

        let quotes_under_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH - 1));
        assert!(parse_expr(&quotes_under_limit).is_ok());

        let quotes_at_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH));
        let err = parse_expr(&quotes_at_limit).unwrap_err();
        assert!(err.to_string().contains("too deeply nested"));
    }

    #[test]
    fn test_parse_program() {
        let program = parse_program("(define x 1)\n; comment\n(+ x 2) 'done").unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(program[2], quoted("quote", sym("done")));

        assert!(parse_program("").unwrap().is_empty());
        assert!(parse_program("; only a comment").unwrap().is_empty());

        let err = parse_program("(ok) (broken").unwrap_err();
        assert!(matches!(
            err,
            Error::ParseError(ParseError {
                kind: ParseErrorKind::Incomplete,
                ..
            })
        ));
    }

    #[test]
    fn test_comments_disabled() {
        let config = ParseConfig {
            handle_comments: false,
        };
        assert!(parse_expr_with_config("; not a comment\n1", config).is_err());
        assert_eq!(parse_expr_with_config("(1 2)", config).unwrap(), vec![1, 2].into());
        assert_eq!(
            parse_program_with_config("1 2", config).unwrap(),
            vec![num(1.0), num(2.0)]
        );
    }
}

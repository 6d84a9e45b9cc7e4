//! Syntax tree consumed by the evaluator.
//!
//! A [`Node`] is either an atom or a list with an optional dotted tail. The
//! reader produces nodes, the evaluator only reads them, and closures keep
//! their bodies as shared node slices. Helper constructors such as [`sym`],
//! [`num`] and [`list`] are convenient for building trees in code and tests.

use std::fmt;

/// Allowed non-alphanumeric characters in symbol names
#[cfg_attr(not(any(feature = "reader", test)), expect(dead_code))]
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:^~.";

/// Valid: non-empty, not a lone `.`, not numeric-looking, alphanumeric + SYMBOL_SPECIAL_CHARS
#[cfg_attr(not(any(feature = "reader", test)), expect(dead_code))]
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !looks_numeric(name)
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
}

/// Whether a token must be read as a number: a digit, optionally after a sign and/or a dot
pub(crate) fn looks_numeric(token: &str) -> bool {
    let rest = token.strip_prefix(['+', '-']).unwrap_or(token);
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    rest.starts_with(|c: char| c.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Symbol(String),
    Number(f64),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Atom(Atom),
    /// Ordered elements plus an optional dotted tail; `()` has neither
    List {
        elements: Vec<Node>,
        tail: Option<Box<Node>>,
    },
}

impl Node {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Node::Atom(Atom::Symbol(name)) => Some(name),
            _ => None,
        }
    }

    /// The empty list `()`
    pub fn is_nil(&self) -> bool {
        matches!(self, Node::List { elements, tail: None } if elements.is_empty())
    }

    /// Split a proper list whose head is a symbol into `(head, operands)`.
    pub fn as_form(&self) -> Option<(&str, &[Node])> {
        match self {
            Node::List {
                elements,
                tail: None,
            } => {
                let (head, operands) = elements.split_first()?;
                Some((head.as_symbol()?, operands))
            }
            _ => None,
        }
    }
}

pub fn sym<S: AsRef<str>>(name: S) -> Node {
    Node::Atom(Atom::Symbol(name.as_ref().to_owned()))
}

pub fn num(n: f64) -> Node {
    Node::Atom(Atom::Number(n))
}

pub fn string<S: Into<String>>(s: S) -> Node {
    Node::Atom(Atom::String(s.into()))
}

pub fn boolean(b: bool) -> Node {
    Node::Atom(Atom::Bool(b))
}

pub fn nil() -> Node {
    list(Vec::new())
}

pub fn list(elements: Vec<Node>) -> Node {
    Node::List {
        elements,
        tail: None,
    }
}

pub fn dotted(elements: Vec<Node>, tail: Node) -> Node {
    Node::List {
        elements,
        tail: Some(Box::new(tail)),
    }
}

impl From<f64> for Node {
    fn from(n: f64) -> Self {
        num(n)
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        num(f64::from(n))
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        boolean(b)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        string(s)
    }
}

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(v: Vec<T>) -> Self {
        list(v.into_iter().map(Into::into).collect())
    }
}

/// Numbers print through f64's shortest round-trip form, so `16.0` prints as `16`.
pub(crate) fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    write!(f, "{n}")
}

pub(crate) fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Symbol(name) => write!(f, "{name}"),
            Atom::Number(n) => write_number(f, *n),
            Atom::String(s) => write_string_literal(f, s),
            Atom::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Atom(atom) => write!(f, "{atom}"),
            Node::List { elements, tail } => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{element}")?;
                }
                if let Some(tail) = tail {
                    write!(f, " . {tail}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let cases = vec![
            (num(16.0), "16"),
            (num(2.5), "2.5"),
            (num(-3.0), "-3"),
            (boolean(true), "#t"),
            (string("a \"b\"\n"), r#""a \"b\"\n""#),
            (nil(), "()"),
            (list(vec![sym("+"), 1.into(), 2.into()]), "(+ 1 2)"),
            (dotted(vec![1.into(), 2.into()], 3.into()), "(1 2 . 3)"),
            (
                list(vec![sym("quote"), vec![sym("a"), sym("b")].into()]),
                "(quote (a b))",
            ),
        ];
        for (node, expected) in cases {
            assert_eq!(node.to_string(), expected);
        }
    }

    #[test]
    fn test_symbol_classification() {
        for name in ["foo", "+", "-", "...", "set!", "null?", "->", "a.b", "-abc"] {
            assert!(is_valid_symbol(name), "{name} should be a symbol");
        }
        for token in ["", ".", "1", "-1", "+.5", ".5", "1abc", "a b", "a(b"] {
            assert!(!is_valid_symbol(token), "{token} should not be a symbol");
        }
    }

    #[test]
    fn test_as_form() {
        let form = list(vec![sym("if"), boolean(true), 1.into()]);
        let (head, operands) = form.as_form().unwrap_or(("", &[]));
        assert_eq!(head, "if");
        assert_eq!(operands.len(), 2);

        assert!(dotted(vec![sym("f")], 1.into()).as_form().is_none());
        assert!(list(vec![1.into()]).as_form().is_none());
        assert!(nil().as_form().is_none());
        assert!(nil().is_nil());
    }
}

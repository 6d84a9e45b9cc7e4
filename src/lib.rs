//! Shrew - a small Lisp runtime
//!
//! This crate evaluates symbolic expressions with a direct tree-walking
//! interpreter. Every runtime value lives in an index-based heap that is
//! reclaimed by an explicit mark-and-sweep collector, and every environment
//! frame as well as the symbol table is backed by a Robin-Hood hashtable.
//!
//! ```scheme
//! (define make-adder (lambda (a) (lambda (x) (+ x a))))
//! (define add7 (make-adder 7))
//! (add7 9)                         ; 16
//! `(1 ,(+ 1 1) ,@(list 3 4))       ; (1 2 3 4)
//! (cond (#f 'no #t 'yes))          ; yes
//! ```
//!
//! ## Strict Typing
//!
//! Conditions of `if`, `cond`, `and`, `or`, `not` and `filter` must be actual
//! booleans; there is no truthiness. Arithmetic only accepts numbers and
//! reports undefined operations (division by zero, `sqrt` of a negative
//! number, ...) as domain errors instead of producing NaN.
//!
//! ## Modules
//!
//! - `hashtable`: Robin-Hood open-addressing table with tombstone deletion
//! - `symbol`: identifier interning
//! - `heap`: value arena, handles and list helpers
//! - `env`: lexical environment frames stored in the heap arena
//! - `gc`: mark-and-sweep collection over values and frames
//! - `evaluator`: interpreter context, special forms and application
//! - `quasiquote`: template expansion with nesting depth
//! - `builtinops`: builtin procedure and special-form registry
//! - `reader`: S-expression parsing from text

use std::fmt;

use crate::evaluator::Arity;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum evaluation depth to prevent native stack overflow in recursive evaluation.
/// There is no tail-call elimination, so this also bounds user-level recursion.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let prefix_chars = input
            .get(..error_offset)
            .map_or(0, |prefix| prefix.chars().count());
        let context_start = prefix_chars.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.chars().next())
            .map(String::from);

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
///
/// Everything except [`Error::AllocationFailure`] is recoverable: the host
/// reports it and keeps the global environment for the next top-level form.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    /// Symbol absent from the whole environment chain
    UnboundSymbol(String),
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    /// Operand of the wrong value kind
    TypeError(String),
    /// Mathematically undefined operation
    DomainError(String),
    /// Dotted list where a proper list is required, misplaced unquote forms
    StructuralError(String),
    /// Application of a value that is not a procedure
    CallableError(String),
    /// User-raised errors and the evaluation depth limit
    EvalError(String),
    /// Heap or hashtable exhaustion; fatal
    AllocationFailure(String),
}

impl Error {
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// Whether the host must stop instead of continuing with the next form.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::AllocationFailure(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::UnboundSymbol(name) => write!(f, "Unbound symbol: {name}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(f, "ArityError: expected {expected} arguments, got {got}"),
            },
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::DomainError(msg) => write!(f, "Domain error: {msg}"),
            Error::StructuralError(msg) => write!(f, "Structural error: {msg}"),
            Error::CallableError(msg) => write!(f, "Callable error: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::AllocationFailure(msg) => write!(f, "Allocation failure: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod env;
pub mod evaluator;
pub mod gc;
pub mod hashtable;
pub mod heap;
pub mod quasiquote;
pub mod symbol;

#[cfg(feature = "reader")]
pub mod reader;

pub use evaluator::{Interpreter, InterpreterConfig};
pub use heap::{EnvRef, Value, ValueRef};

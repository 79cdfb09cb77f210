//! rpal-cse - RPAL interpreter built on the Control-Stack-Environment machine
//!
//! This crate evaluates programs of RPAL, a small applicative functional language,
//! in two steps. The raw parse tree is first *standardized*: every piece of
//! syntactic sugar (`let`, `where`, function forms, `within`, `and`, `rec`, `@`)
//! is rewritten into a handful of primitives. The canonical tree is then
//! flattened into control sequences and executed by the CSE machine, which keeps
//! an explicit control list, a value stack and a chain of environments.
//!
//! ```rpal
//! let rec Fact n = n eq 0 -> 1 | n * Fact (n - 1)
//! in Fact 5
//! ```
//!
//! ## Pipeline
//!
//! raw [`ast::Node`] -> [`standardizer::standardize`] -> canonical tree ->
//! [`control::ControlBuilder`] -> [`evaluator::Machine`] -> [`symbol::Symbol`]
//!
//! Recursion is not a primitive: `rec` becomes an application of the Y*
//! combinator, which the machine unrolls on demand through Eta closures.
//!
//! ## Modules
//!
//! - `ast`: parse tree nodes, their tags and the dot-indented printer
//! - `standardizer`: sugar-to-primitive rewriting
//! - `symbol`: control and value symbols of the machine
//! - `control`: flattening of canonical trees into control sequences
//! - `builtinops`: operator semantics and the named built-in functions
//! - `evaluator`: environments and the CSE machine loop
//! - `rpal`: RPAL source reader (feature `rpal`)
//! - `json`: JSON encoding of parse trees (feature `json`)

use std::fmt;

use crate::ast::NumberType;

/// Maximum nesting accepted by the RPAL reader: it bounds the reader's own
/// recursion and the height of the trees it returns, which the standardizer
/// and the control builder walk recursively
pub const MAX_PARSE_DEPTH: usize = 64;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// A character sequence that is not an RPAL token
    InvalidToken,
    /// Invalid or unexpected syntax (a token in the wrong place)
    InvalidSyntax,
    /// Input ended before the expression was complete
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid program
    TrailingContent,
    /// Implementation-imposed limit exceeded (integer overflow)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
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

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // error_offset is a byte offset; the snippet is cut on characters
        let total_chars = input.chars().count();
        let error_char = input
            .get(..error_offset)
            .map_or(total_chars, |before| before.chars().count());
        let context_start = error_char.saturating_sub(20);

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
        if context_start + context_str.chars().count() < total_chars {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
///
/// Every variant except `ParseError` is produced by the core. All of them are
/// fatal: evaluation stops at the first one and no partial result is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    /// Malformed tree (wrong child arity, misplaced definition) or corrupt machine state
    StructuralError(String),
    UnboundName(String),
    /// Operator or built-in applied to a value of the wrong kind
    TypeMismatch(String),
    /// Parameter/argument count or tuple index out of range
    ArityMismatch {
        expected: usize,
        /// Count actually supplied, absent when the failing operand is not a count
        got: Option<usize>,
        context: Option<String>,
    },
    /// Gamma applied to a value that cannot be applied
    ApplicationError(String),
    /// Arithmetic failures and output sink failures
    EvalError(String),
}

impl Error {
    /// Create an ArityMismatch without context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityMismatch {
            expected,
            got: Some(got),
            context: None,
        }
    }

    /// Create an ArityMismatch naming the rule or operand involved
    pub fn arity_error_with_context(expected: usize, got: usize, context: impl Into<String>) -> Self {
        Error::ArityMismatch {
            expected,
            got: Some(got),
            context: Some(context.into()),
        }
    }

    /// Create an ArityMismatch for selecting `index` from a tuple of `len`
    /// elements; the index itself is reported as written
    pub fn index_error(len: usize, index: NumberType) -> Self {
        Error::ArityMismatch {
            expected: len,
            got: None,
            context: Some(format!("tuple index {index} out of range 1..={len}")),
        }
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
            Error::StructuralError(msg) => write!(f, "StructuralError: {msg}"),
            Error::UnboundName(name) => write!(f, "UnboundNameError: {name}"),
            Error::TypeMismatch(msg) => write!(f, "TypeMismatchError: {msg}"),
            Error::ArityMismatch {
                expected,
                got,
                context,
            } => {
                write!(f, "ArityMismatchError: ")?;
                match (context, got) {
                    (Some(context), Some(got)) => {
                        write!(f, "{context}: expected {expected}, got {got}")
                    }
                    (Some(context), None) => write!(f, "{context}"),
                    (None, Some(got)) => write!(f, "expected {expected}, got {got}"),
                    (None, None) => write!(f, "expected {expected}"),
                }
            }
            Error::ApplicationError(msg) => write!(f, "ApplicationError: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod control;
pub mod evaluator;
pub mod standardizer;
pub mod symbol;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "rpal")]
pub mod rpal;

pub use ast::Node;
pub use evaluator::{evaluate, evaluate_with_output};
pub use standardizer::standardize;
pub use symbol::Symbol;

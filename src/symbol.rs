//! Control and value symbols of the CSE machine.
//!
//! One closed enum covers everything that can sit on the control list or the
//! value stack: literals, closures, tuples, operators, structural markers and
//! the Delta/B sequences produced by the control builder.

use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, NumberType, UnaryOp};
use crate::builtinops::BuiltinOp;

/// A flattened lambda body or conditional branch.
///
/// Deltas are immutable once built and shared by every closure created from the
/// same lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub label: usize,
    pub symbols: Vec<Symbol>,
}

/// A lambda, closed over an environment once it has been evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub id: usize,
    /// Empty for `fn () . E`; more than one name for tuple parameters
    pub params: Rc<[String]>,
    pub body: Rc<Delta>,
    /// Index of the environment captured by rule 2, `None` until then
    pub env: Option<usize>,
}

impl Lambda {
    /// First parameter name, used when printing closures
    fn first_param(&self) -> &str {
        self.params.first().map_or("()", String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Identifier(String),
    Integer(NumberType),
    String(String),
    Boolean(bool),
    Dummy,
    /// Result of a failed type conversion (`Itos` on a non-integer)
    Error,
    Lambda(Lambda),
    Gamma,
    Tau(usize),
    Beta,
    Tuple(Vec<Symbol>),
    Ystar,
    /// A recursive closure produced by applying Y* to a lambda
    Eta(Lambda),
    UnaryOp(UnaryOp),
    BinaryOp(BinaryOp),
    Delta(Rc<Delta>),
    /// Conditional test sequence, spliced like a Delta
    B(Rc<[Symbol]>),
    EnvMarker(usize),
    /// A built-in still waiting for some of its arguments
    Partial {
        op: &'static BuiltinOp,
        args: Vec<Symbol>,
    },
}

impl Symbol {
    /// Short name of the symbol's kind, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Identifier(_) => "identifier",
            Symbol::Integer(_) => "integer",
            Symbol::String(_) => "string",
            Symbol::Boolean(_) => "truthvalue",
            Symbol::Dummy => "dummy",
            Symbol::Error => "error",
            Symbol::Lambda(_) => "function",
            Symbol::Gamma => "gamma",
            Symbol::Tau(_) => "tau",
            Symbol::Beta => "beta",
            Symbol::Tuple(_) => "tuple",
            Symbol::Ystar => "Y*",
            Symbol::Eta(_) => "eta",
            Symbol::UnaryOp(_) => "unary operator",
            Symbol::BinaryOp(_) => "binary operator",
            Symbol::Delta(_) => "delta",
            Symbol::B(_) => "condition",
            Symbol::EnvMarker(_) => "environment marker",
            Symbol::Partial { .. } => "function",
        }
    }

    /// The empty tuple, value of `nil`
    pub fn nil() -> Symbol {
        Symbol::Tuple(Vec::new())
    }
}

impl From<NumberType> for Symbol {
    fn from(n: NumberType) -> Self {
        Symbol::Integer(n)
    }
}

impl From<bool> for Symbol {
    fn from(b: bool) -> Self {
        Symbol::Boolean(b)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::String(s.to_owned())
    }
}

impl<T: Into<Symbol>> From<Vec<T>> for Symbol {
    fn from(v: Vec<T>) -> Self {
        Symbol::Tuple(v.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Identifier(name) => write!(f, "{name}"),
            Symbol::Integer(n) => write!(f, "{n}"),
            Symbol::String(s) => write!(f, "{s}"),
            Symbol::Boolean(b) => write!(f, "{b}"),
            Symbol::Dummy => write!(f, "dummy"),
            Symbol::Error => write!(f, "error"),
            Symbol::Lambda(lambda) => {
                write!(f, "[lambda closure: {}: {}]", lambda.first_param(), lambda.id)
            }
            Symbol::Eta(lambda) => {
                write!(f, "[eta closure: {}: {}]", lambda.first_param(), lambda.id)
            }
            Symbol::Tuple(elements) if elements.is_empty() => write!(f, "nil"),
            Symbol::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            Symbol::Gamma => write!(f, "gamma"),
            Symbol::Tau(n) => write!(f, "tau{n}"),
            Symbol::Beta => write!(f, "beta"),
            Symbol::Ystar => write!(f, "<Y*>"),
            Symbol::UnaryOp(op) => write!(f, "{}", op.as_str()),
            Symbol::BinaryOp(op) => write!(f, "{}", op.as_str()),
            Symbol::Delta(delta) => write!(f, "delta{}", delta.label),
            Symbol::B(_) => write!(f, "b"),
            Symbol::EnvMarker(index) => write!(f, "e{index}"),
            Symbol::Partial { op, args } => {
                write!(f, "[partial {}", op.name)?;
                for (i, arg) in args.iter().enumerate() {
                    write!(f, "{}{arg}", if i == 0 { ": " } else { ", " })?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::builtinops::find_builtin;

    #[test]
    fn test_display_values() {
        let closure = Lambda {
            id: 2,
            params: Rc::from(vec!["x".to_owned()]),
            body: Rc::new(Delta {
                label: 1,
                symbols: vec![],
            }),
            env: Some(0),
        };
        let test_cases = vec![
            (Symbol::from(42i64), "42"),
            (Symbol::from(-7i64), "-7"),
            (Symbol::from(true), "true"),
            (Symbol::from(false), "false"),
            (Symbol::from("hello world"), "hello world"),
            (Symbol::Dummy, "dummy"),
            (Symbol::Error, "error"),
            (Symbol::nil(), "nil"),
            (Symbol::from(vec![1i64, 2, 3]), "(1, 2, 3)"),
            (
                Symbol::Tuple(vec![
                    Symbol::from(1i64),
                    Symbol::from(vec!["a", "b"]),
                    Symbol::from(true),
                ]),
                "(1, (a, b), true)",
            ),
            (Symbol::Lambda(closure.clone()), "[lambda closure: x: 2]"),
            (Symbol::Eta(closure), "[eta closure: x: 2]"),
            (
                Symbol::Partial {
                    op: find_builtin("Conc").unwrap(),
                    args: vec![Symbol::from("ab")],
                },
                "[partial Conc: ab]",
            ),
        ];

        for (i, (symbol, expected)) in test_cases.iter().enumerate() {
            assert_eq!(format!("{symbol}"), *expected, "case #{}", i + 1);
        }
    }
}

//! Operator semantics and the registry of named built-in functions.
//!
//! Operators (`neg`, `not`, `+`, `aug`, `eq`, ...) are executed by machine rules
//! 6 and 7 through [`apply_unary`] and [`apply_binary`]. Named built-ins such as
//! `Print` or `Order` are not bound in any environment: an unbound identifier that
//! names one is pushed as-is, and Gamma looks it up here when it is applied.
//!
//! ```rpal
//! Order (1, 2, 3)      // 3
//! Conc 'ab' 'cd'       // abcd
//! Itos 42              // 42 as a string
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: operators reject operands of the wrong kind (`1 + true` errors)
//! - **Overflow Detection**: arithmetic is checked, overflow is an evaluation error
//! - **Conversion Carve-out**: `Itos` on a non-integer yields the `error` symbol
//!   instead of aborting
//!
//! ## Adding New Built-ins
//!
//! 1. **Implement the function** with signature `fn(&[Symbol]) -> Result<Symbol, Error>`
//! 2. **Add to BUILTIN_OPS** with its RPAL name and the number of arguments it consumes
//! 3. **Add tests** covering edge cases and error conditions

use std::collections::HashMap;
use std::io::Write;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{BinaryOp, NumberType, UnaryOp};
use crate::symbol::Symbol;

/// Implementation of a built-in function
#[derive(Debug, Clone, Copy)]
pub enum OpKind {
    /// Pure function of its arguments
    Function(fn(&[Symbol]) -> Result<Symbol, Error>),
    /// Function that also writes to the machine's output sink
    Output(fn(&[Symbol], &mut dyn Write) -> Result<Symbol, Error>),
}

/// Definition of a built-in function
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The RPAL identifier for this function
    pub name: &'static str,
    /// Number of curried arguments; each arrives with its own Gamma
    pub arity: usize,
    pub op_kind: OpKind,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl BuiltinOp {
    /// Run the function on already popped arguments, first argument first
    pub fn invoke(&self, args: &[Symbol], output: &mut dyn Write) -> Result<Symbol, Error> {
        if args.len() != self.arity {
            return Err(Error::arity_error_with_context(
                self.arity,
                args.len(),
                self.name,
            ));
        }
        match self.op_kind {
            OpKind::Function(func) => func(args),
            OpKind::Output(func) => func(args, output),
        }
    }
}

//
// Operators
//

fn expect_integer(op: &str, operand: &Symbol) -> Result<NumberType, Error> {
    match operand {
        Symbol::Integer(n) => Ok(*n),
        other => Err(Error::TypeMismatch(format!(
            "'{op}' expects integer operands, got {}",
            other.kind_name()
        ))),
    }
}

fn expect_boolean(op: &str, operand: &Symbol) -> Result<bool, Error> {
    match operand {
        Symbol::Boolean(b) => Ok(*b),
        other => Err(Error::TypeMismatch(format!(
            "'{op}' expects truthvalue operands, got {}",
            other.kind_name()
        ))),
    }
}

/// Rule 6: apply a unary operator
pub fn apply_unary(op: UnaryOp, operand: Symbol) -> Result<Symbol, Error> {
    match op {
        UnaryOp::Neg => expect_integer(op.as_str(), &operand)?
            .checked_neg()
            .map(Symbol::Integer)
            .ok_or_else(|| Error::EvalError("Integer overflow in negation".into())),
        UnaryOp::Not => Ok(Symbol::Boolean(!expect_boolean(op.as_str(), &operand)?)),
    }
}

/// Rule 7: apply a binary operator; `left` is the operand that was on top of
/// the stack
pub fn apply_binary(op: BinaryOp, left: Symbol, right: Symbol) -> Result<Symbol, Error> {
    let name = op.as_str();
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            let a = expect_integer(name, &left)?;
            let b = expect_integer(name, &right)?;
            arithmetic(op, a, b).map(Symbol::Integer)
        }
        BinaryOp::Ls | BinaryOp::Le | BinaryOp::Gr | BinaryOp::Ge => {
            let a = expect_integer(name, &left)?;
            let b = expect_integer(name, &right)?;
            let result = match op {
                BinaryOp::Ls => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gr => a > b,
                _ => a >= b,
            };
            Ok(Symbol::Boolean(result))
        }
        BinaryOp::And => {
            let a = expect_boolean(name, &left)?;
            let b = expect_boolean(name, &right)?;
            Ok(Symbol::Boolean(a && b))
        }
        BinaryOp::Or => {
            let a = expect_boolean(name, &left)?;
            let b = expect_boolean(name, &right)?;
            Ok(Symbol::Boolean(a || b))
        }
        // Polymorphic: operands of any kind are compared by printed value
        BinaryOp::Eq => Ok(Symbol::Boolean(left.to_string() == right.to_string())),
        BinaryOp::Ne => Ok(Symbol::Boolean(left.to_string() != right.to_string())),
        BinaryOp::Aug => match left {
            Symbol::Tuple(mut elements) => {
                match right {
                    Symbol::Tuple(tail) => elements.extend(tail),
                    single => elements.push(single),
                }
                Ok(Symbol::Tuple(elements))
            }
            other => Err(Error::TypeMismatch(format!(
                "'aug' expects a tuple on the left, got {}",
                other.kind_name()
            ))),
        },
    }
}

fn arithmetic(op: BinaryOp, a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    let overflow = |what: &str| Error::EvalError(format!("Integer overflow in {what}"));
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(|| overflow("addition")),
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(|| overflow("subtraction")),
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(|| overflow("multiplication")),
        BinaryOp::Div => {
            if b == 0 {
                return Err(Error::EvalError("Division by zero".into()));
            }
            a.checked_div(b).ok_or_else(|| overflow("division"))
        }
        _ => power(a, b),
    }
}

/// Integer exponentiation; negative exponents truncate toward zero
fn power(base: NumberType, exponent: NumberType) -> Result<NumberType, Error> {
    match (base, exponent) {
        (_, 0) | (1, _) => Ok(1),
        (-1, e) => Ok(if e % 2 == 0 { 1 } else { -1 }),
        (0, e) if e > 0 => Ok(0),
        (0, _) => Err(Error::EvalError(
            "Division by zero in exponentiation".into(),
        )),
        (_, e) if e < 0 => Ok(0),
        (b, e) => u32::try_from(e)
            .ok()
            .and_then(|e| b.checked_pow(e))
            .ok_or_else(|| Error::EvalError("Integer overflow in exponentiation".into())),
    }
}

//
// Built-in Function Implementations
//

fn expect_string<'a>(name: &str, arg: &'a Symbol) -> Result<&'a str, Error> {
    match arg {
        Symbol::String(s) => Ok(s.as_str()),
        other => Err(Error::TypeMismatch(format!(
            "{name} expects a string, got {}",
            other.kind_name()
        ))),
    }
}

fn expect_tuple<'a>(name: &str, arg: &'a Symbol) -> Result<&'a [Symbol], Error> {
    match arg {
        Symbol::Tuple(elements) => Ok(elements.as_slice()),
        other => Err(Error::TypeMismatch(format!(
            "{name} expects a tuple, got {}",
            other.kind_name()
        ))),
    }
}

/// Expand the `\n` and `\t` escapes kept in string literals
fn expand_escapes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('\\') => result.push('\\'),
            Some('\'') => result.push('\''),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

fn builtin_print(args: &[Symbol], output: &mut dyn Write) -> Result<Symbol, Error> {
    let text = expand_escapes(&args[0].to_string());
    output
        .write_all(text.as_bytes())
        .map_err(|e| Error::EvalError(format!("Print failed: {e}")))?;
    Ok(Symbol::Dummy)
}

fn builtin_stem(args: &[Symbol]) -> Result<Symbol, Error> {
    let s = expect_string("Stem", &args[0])?;
    match s.chars().next() {
        Some(first) => Ok(Symbol::String(first.to_string())),
        None => Err(Error::TypeMismatch(
            "Stem expects a non-empty string".to_owned(),
        )),
    }
}

fn builtin_stern(args: &[Symbol]) -> Result<Symbol, Error> {
    let s = expect_string("Stern", &args[0])?;
    let mut chars = s.chars();
    match chars.next() {
        Some(_) => Ok(Symbol::String(chars.as_str().to_owned())),
        None => Err(Error::TypeMismatch(
            "Stern expects a non-empty string".to_owned(),
        )),
    }
}

fn builtin_conc(args: &[Symbol]) -> Result<Symbol, Error> {
    let first = expect_string("Conc", &args[0])?;
    let second = expect_string("Conc", &args[1])?;
    Ok(Symbol::String(format!("{first}{second}")))
}

fn builtin_order(args: &[Symbol]) -> Result<Symbol, Error> {
    let elements = expect_tuple("Order", &args[0])?;
    NumberType::try_from(elements.len())
        .map(Symbol::Integer)
        .map_err(|_| Error::EvalError("Order: tuple too large".into()))
}

fn builtin_null(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(expect_tuple("Null", &args[0])?.is_empty()))
}

fn builtin_itos(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(match &args[0] {
        Symbol::Integer(n) => Symbol::String(n.to_string()),
        _ => Symbol::Error,
    })
}

fn builtin_isinteger(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(matches!(args[0], Symbol::Integer(_))))
}

fn builtin_isstring(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(matches!(args[0], Symbol::String(_))))
}

fn builtin_istuple(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(matches!(args[0], Symbol::Tuple(_))))
}

fn builtin_isdummy(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(matches!(args[0], Symbol::Dummy)))
}

fn builtin_istruthvalue(args: &[Symbol]) -> Result<Symbol, Error> {
    Ok(Symbol::Boolean(matches!(args[0], Symbol::Boolean(_))))
}

fn builtin_isfunction(args: &[Symbol]) -> Result<Symbol, Error> {
    let is_function = match &args[0] {
        Symbol::Lambda(_) | Symbol::Eta(_) | Symbol::Partial { .. } => true,
        Symbol::Identifier(name) => find_builtin(name).is_some(),
        _ => false,
    };
    Ok(Symbol::Boolean(is_function))
}

/// Global registry of all built-in functions.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn function(name: &'static str, func: fn(&[Symbol]) -> Result<Symbol, Error>) -> BuiltinOp {
        BuiltinOp {
            name,
            arity: 1,
            op_kind: OpKind::Function(func),
        }
    }

    vec![
        BuiltinOp {
            name: "Print",
            arity: 1,
            op_kind: OpKind::Output(builtin_print),
        },
        function("Stem", builtin_stem),
        function("Stern", builtin_stern),
        BuiltinOp {
            name: "Conc",
            arity: 2,
            op_kind: OpKind::Function(builtin_conc),
        },
        function("Order", builtin_order),
        function("Null", builtin_null),
        function("Itos", builtin_itos),
        function("Isinteger", builtin_isinteger),
        function("Isstring", builtin_isstring),
        function("Istuple", builtin_istuple),
        function("Isdummy", builtin_isdummy),
        function("Istruthvalue", builtin_istruthvalue),
        function("Isfunction", builtin_isfunction),
    ]
});

/// Lazy static map from name to BuiltinOp (private - use find_builtin)
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.name, op)).collect()
    });

/// Get all built-in functions
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a built-in function by its RPAL name
pub fn find_builtin(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}

//! Control builder: flattening a standardized tree into control sequences.
//!
//! Each lambda body and each conditional branch becomes its own [`Delta`]. The
//! flattening is pre-order: the machine pops control symbols from the end of the
//! list, so a node's operands run right to left and the node's own symbol runs
//! after them.
//!
//! | node | emitted symbols |
//! |---|---|
//! | literal, identifier, `nil`, `dummy`, `Y*` | one symbol |
//! | `lambda P E` | `Lambda` whose body Delta holds `E` |
//! | `gamma R N` | `Gamma R.. N..` |
//! | `-> C T E` | `Delta(T) Delta(E) Beta B(C..)` |
//! | `tau E1 .. En` | `Tau(n) E1.. .. En..` |
//! | operator | `Op operands..` |

use std::rc::Rc;

use tracing::debug;

use crate::Error;
use crate::ast::{Node, Tag};
use crate::evaluator::Environment;
use crate::symbol::{Delta, Lambda, Symbol};

/// The three structures the CSE machine starts from
#[derive(Debug, Clone)]
pub struct InitialState {
    pub control: Vec<Symbol>,
    pub stack: Vec<Symbol>,
    pub environments: Vec<Environment>,
}

/// Turns canonical trees into Deltas, numbering lambdas and Deltas as it goes.
///
/// Lambda ids start at 1 and Delta labels at 0. A Delta gets its label once its
/// contents are flattened, so any Delta it contains has a smaller label.
#[derive(Debug)]
pub struct ControlBuilder {
    next_lambda: usize,
    next_delta: usize,
}

impl Default for ControlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBuilder {
    pub fn new() -> Self {
        ControlBuilder {
            next_lambda: 1,
            next_delta: 0,
        }
    }

    /// Build the machine's starting state for a standardized program:
    /// control `[e0, Delta(root)]`, stack `[e0]`, environments `[e0]`.
    pub fn initial_state(mut self, tree: &Node) -> Result<InitialState, Error> {
        let root = self.delta(tree)?;
        debug!(
            lambdas = self.next_lambda - 1,
            deltas = self.next_delta,
            "built control structures"
        );
        Ok(InitialState {
            control: vec![Symbol::EnvMarker(0), Symbol::Delta(root)],
            stack: vec![Symbol::EnvMarker(0)],
            environments: vec![Environment::global()],
        })
    }

    /// Flatten `tree` into a new Delta
    pub fn delta(&mut self, tree: &Node) -> Result<Rc<Delta>, Error> {
        let mut symbols = Vec::new();
        self.flatten(tree, &mut symbols)?;
        let label = self.next_delta;
        self.next_delta += 1;
        Ok(Rc::new(Delta { label, symbols }))
    }

    fn flatten(&mut self, tree: &Node, out: &mut Vec<Symbol>) -> Result<(), Error> {
        tree.check_arity()?;
        match &tree.tag {
            Tag::Identifier(name) => out.push(Symbol::Identifier(name.clone())),
            Tag::Integer(n) => out.push(Symbol::Integer(*n)),
            Tag::String(s) => out.push(Symbol::String(s.clone())),
            Tag::True => out.push(Symbol::Boolean(true)),
            Tag::False => out.push(Symbol::Boolean(false)),
            Tag::Nil => out.push(Symbol::nil()),
            Tag::Dummy => out.push(Symbol::Dummy),
            Tag::YStar => out.push(Symbol::Ystar),
            Tag::Lambda => match tree.children.as_slice() {
                [param, body] => {
                    let lambda = self.lambda(param, body)?;
                    out.push(Symbol::Lambda(lambda));
                }
                _ => {
                    return Err(Error::StructuralError(
                        "lambda must be curried before building control".to_owned(),
                    ));
                }
            },
            Tag::Gamma => {
                out.push(Symbol::Gamma);
                self.flatten_all(&tree.children, out)?;
            }
            Tag::Conditional => {
                let [condition, then_branch, else_branch] = tree.children.as_slice() else {
                    unreachable!("conditional arity checked above");
                };
                let then_delta = self.delta(then_branch)?;
                let else_delta = self.delta(else_branch)?;
                let mut test = Vec::new();
                self.flatten(condition, &mut test)?;
                out.push(Symbol::Delta(then_delta));
                out.push(Symbol::Delta(else_delta));
                out.push(Symbol::Beta);
                out.push(Symbol::B(test.into()));
            }
            Tag::Tau => {
                out.push(Symbol::Tau(tree.children.len()));
                self.flatten_all(&tree.children, out)?;
            }
            Tag::Unary(op) => {
                out.push(Symbol::UnaryOp(*op));
                self.flatten_all(&tree.children, out)?;
            }
            Tag::Binary(op) => {
                out.push(Symbol::BinaryOp(*op));
                self.flatten_all(&tree.children, out)?;
            }
            Tag::EmptyParams | Tag::Comma | Tag::Equal => {
                return Err(Error::StructuralError(format!(
                    "'{}' is only valid as a lambda parameter or definition",
                    tree.tag.label()
                )));
            }
            Tag::Let
            | Tag::Where
            | Tag::Within
            | Tag::And
            | Tag::Rec
            | Tag::FcnForm
            | Tag::At => {
                return Err(Error::StructuralError(format!(
                    "'{}' must be standardized before building control",
                    tree.tag.label()
                )));
            }
        }
        Ok(())
    }

    fn flatten_all(&mut self, trees: &[Node], out: &mut Vec<Symbol>) -> Result<(), Error> {
        for tree in trees {
            self.flatten(tree, out)?;
        }
        Ok(())
    }

    fn lambda(&mut self, param: &Node, body: &Node) -> Result<Lambda, Error> {
        let params = parameter_names(param)?;
        let id = self.next_lambda;
        self.next_lambda += 1;
        let body = self.delta(body)?;
        Ok(Lambda {
            id,
            params: params.into(),
            body,
            env: None,
        })
    }
}

/// Names bound by a lambda parameter: `x`, `(x, y, ..)` or `()`
fn parameter_names(param: &Node) -> Result<Vec<String>, Error> {
    match &param.tag {
        Tag::Identifier(name) => Ok(vec![name.clone()]),
        Tag::EmptyParams => Ok(Vec::new()),
        Tag::Comma => param
            .children
            .iter()
            .map(|child| {
                child.identifier().map(str::to_owned).ok_or_else(|| {
                    Error::StructuralError(format!(
                        "tuple parameter must list identifiers, found '{}'",
                        child.tag.label()
                    ))
                })
            })
            .collect(),
        other => Err(Error::StructuralError(format!(
            "invalid lambda parameter '{}'",
            other.label()
        ))),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, id, int, node};

    fn rendered(symbols: &[Symbol]) -> Vec<String> {
        symbols.iter().map(|s| format!("{s}")).collect()
    }

    #[test]
    fn test_initial_state() {
        let state = ControlBuilder::new().initial_state(&int(7)).unwrap();
        assert_eq!(rendered(&state.control), vec!["e0", "delta0"]);
        assert_eq!(state.stack, vec![Symbol::EnvMarker(0)]);
        assert_eq!(state.environments.len(), 1);
        match &state.control[1] {
            Symbol::Delta(root) => assert_eq!(root.symbols, vec![Symbol::Integer(7)]),
            other => panic!("expected root delta, got {other:?}"),
        }
    }

    #[test]
    fn test_flatten_application_and_operators() {
        // (fn x . x + 1) 2
        let tree = node(
            Tag::Gamma,
            vec![
                node(
                    Tag::Lambda,
                    vec![id("x"), node(Tag::Binary(BinaryOp::Add), vec![id("x"), int(1)])],
                ),
                int(2),
            ],
        );
        let mut builder = ControlBuilder::new();
        let root = builder.delta(&tree).unwrap();
        assert_eq!(rendered(&root.symbols), vec!["gamma", "[lambda closure: x: 1]", "2"]);
        let Symbol::Lambda(lambda) = &root.symbols[1] else {
            panic!("expected lambda");
        };
        assert_eq!(rendered(&lambda.body.symbols), vec!["+", "x", "1"]);
        assert!(lambda.env.is_none());
        // body Delta is numbered before the root Delta that contains it
        assert!(lambda.body.label < root.label);
    }

    #[test]
    fn test_flatten_conditional_and_tuple() {
        let tree = node(
            Tag::Conditional,
            vec![
                Node::leaf(Tag::True),
                node(Tag::Tau, vec![int(1), int(2)]),
                Node::leaf(Tag::Nil),
            ],
        );
        let root = ControlBuilder::new().delta(&tree).unwrap();
        assert_eq!(rendered(&root.symbols), vec!["delta0", "delta1", "beta", "b"]);
        match (&root.symbols[0], &root.symbols[3]) {
            (Symbol::Delta(then_delta), Symbol::B(test)) => {
                assert_eq!(rendered(&then_delta.symbols), vec!["tau2", "1", "2"]);
                assert_eq!(test.as_ref(), &[Symbol::Boolean(true)]);
            }
            other => panic!("unexpected layout {other:?}"),
        }
    }

    #[test]
    fn test_tuple_parameters() {
        let tree = node(
            Tag::Lambda,
            vec![node(Tag::Comma, vec![id("x"), id("y")]), id("x")],
        );
        let root = ControlBuilder::new().delta(&tree).unwrap();
        let Symbol::Lambda(lambda) = &root.symbols[0] else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.params.as_ref(), &["x".to_owned(), "y".to_owned()]);
    }

    #[test]
    fn test_unstandardized_tree_rejected() {
        let tree = node(
            Tag::Let,
            vec![node(Tag::Equal, vec![id("x"), int(1)]), id("x")],
        );
        match ControlBuilder::new().delta(&tree) {
            Err(Error::StructuralError(msg)) => assert!(msg.contains("standardized")),
            other => panic!("expected StructuralError, got {other:?}"),
        }

        let bad_param = node(Tag::Lambda, vec![int(1), id("x")]);
        assert!(matches!(
            ControlBuilder::new().delta(&bad_param),
            Err(Error::StructuralError(_))
        ));
    }
}

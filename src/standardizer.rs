//! Standardization: rewriting RPAL syntactic sugar into primitive forms.
//!
//! The rewrite is a pure post-order rebuild. Children are standardized first and
//! each rule consumes the already standardized children to produce a new node:
//!
//! | sugar | primitive form |
//! |---|---|
//! | `let (P = E1) E2` | `gamma (lambda P E2) E1` |
//! | `where E1 (P = E2)` | `gamma (lambda P E1) E2` |
//! | `fcn_form F V1 .. Vn E` | `= F (lambda V1 (.. (lambda Vn E)))` |
//! | `lambda V1 .. Vn E` | `lambda V1 (.. (lambda Vn E))` |
//! | `within (X1 = E1) (X2 = E2)` | `= X2 (gamma (lambda X1 E2) E1)` |
//! | `@ E1 N E2` | `gamma (gamma N E1) E2` |
//! | `and (X1 = E1) .. (Xn = En)` | `= (, X1 .. Xn) (tau E1 .. En)` |
//! | `rec (X = E)` | `= X (gamma Y* (lambda X E))` |
//!
//! Conditionals, operators, tuples and literals are left alone: the CSE machine
//! executes them directly.

use tracing::debug;

use crate::Error;
use crate::ast::{Node, Tag};

/// Standardize a raw parse tree (public API)
///
/// Fails with [`Error::StructuralError`] when a node has the wrong number of
/// children for its tag, or when a definition position does not hold a
/// definition. Standardizing an already standardized tree returns an equal tree.
pub fn standardize(tree: &Node) -> Result<Node, Error> {
    let standardized = standardize_node(tree)?;
    debug!(
        root = %standardized.tag.label(),
        "standardized parse tree"
    );
    Ok(standardized)
}

fn standardize_node(tree: &Node) -> Result<Node, Error> {
    tree.check_arity()?;
    let children = tree
        .children
        .iter()
        .map(standardize_node)
        .collect::<Result<Vec<_>, _>>()?;
    rewrite(tree.tag.clone(), children)
}

/// Apply the rule for `tag` to its standardized children
fn rewrite(tag: Tag, children: Vec<Node>) -> Result<Node, Error> {
    match tag {
        Tag::Let => {
            let [definition, body] = take_children::<2>(children);
            let (name, value) = split_definition(definition, "let")?;
            Ok(apply(lambda(name, body), value))
        }
        Tag::Where => {
            let [body, definition] = take_children::<2>(children);
            let (name, value) = split_definition(definition, "where")?;
            Ok(apply(lambda(name, body), value))
        }
        Tag::FcnForm => {
            let mut children = children.into_iter();
            let (Some(name), Some(body)) = (children.next(), children.next_back()) else {
                return Err(Error::StructuralError(
                    "function_form is missing its name or body".to_owned(),
                ));
            };
            Ok(equal(name, curry(children.collect(), body)))
        }
        Tag::Lambda if children.len() > 2 => {
            let mut params = children;
            let Some(body) = params.pop() else {
                return Err(Error::StructuralError("lambda without body".to_owned()));
            };
            Ok(curry(params, body))
        }
        Tag::Within => {
            let [inner, outer] = take_children::<2>(children);
            let (inner_name, inner_value) = split_definition(inner, "within")?;
            let (outer_name, outer_value) = split_definition(outer, "within")?;
            Ok(equal(
                outer_name,
                apply(lambda(inner_name, outer_value), inner_value),
            ))
        }
        Tag::At => {
            let [left, operator, right] = take_children::<3>(children);
            Ok(apply(apply(operator, left), right))
        }
        Tag::And => {
            let mut names = Vec::with_capacity(children.len());
            let mut values = Vec::with_capacity(children.len());
            for definition in children {
                let (name, value) = split_definition(definition, "and")?;
                if name.identifier().is_none() {
                    return Err(Error::StructuralError(format!(
                        "'and' binds plain identifiers, found '{}'",
                        name.tag.label()
                    )));
                }
                names.push(name);
                values.push(value);
            }
            Ok(equal(
                Node::new(Tag::Comma, names),
                Node::new(Tag::Tau, values),
            ))
        }
        Tag::Rec => {
            let [definition] = take_children::<1>(children);
            let (name, value) = split_definition(definition, "rec")?;
            let fixed_point = apply(Node::leaf(Tag::YStar), lambda(name.clone(), value));
            Ok(equal(name, fixed_point))
        }
        // Executed directly by the machine
        tag => Ok(Node::new(tag, children)),
    }
}

/// Move exactly `N` children out of a vector whose length was checked against
/// the tag's arity before rewriting.
fn take_children<const N: usize>(children: Vec<Node>) -> [Node; N] {
    match <[Node; N]>::try_from(children) {
        Ok(array) => array,
        Err(children) => unreachable!(
            "arity checked before rewrite: expected {N} children, found {}",
            children.len()
        ),
    }
}

/// Split a standardized definition `= X E` into `(X, E)`
fn split_definition(definition: Node, context: &str) -> Result<(Node, Node), Error> {
    match definition.tag {
        Tag::Equal => {
            let [name, value] = take_children::<2>(definition.children);
            Ok((name, value))
        }
        other => Err(Error::StructuralError(format!(
            "'{context}' expects a definition, found '{}'",
            other.label()
        ))),
    }
}

/// Right-nested chain of single-parameter lambdas, first parameter outermost
fn curry(params: Vec<Node>, body: Node) -> Node {
    params
        .into_iter()
        .rev()
        .fold(body, |inner, param| lambda(param, inner))
}

fn lambda(param: Node, body: Node) -> Node {
    Node::new(Tag::Lambda, vec![param, body])
}

fn apply(rator: Node, rand: Node) -> Node {
    Node::new(Tag::Gamma, vec![rator, rand])
}

fn equal(name: Node, value: Node) -> Node {
    Node::new(Tag::Equal, vec![name, value])
}

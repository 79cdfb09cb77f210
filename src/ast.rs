//! This module defines the parse tree handed to the interpreter core. A [`Node`]
//! is a [`Tag`] plus an ordered list of children; leaves carry their payload
//! (identifier name, integer, string text) inside the tag. Trees are immutable:
//! the standardizer builds new trees instead of rewriting nodes in place, so no
//! parent back-references are needed.
//!
//! The module also owns the dot-indented serializer ([`Node::to_dot_lines`]),
//! which prints raw and standardized trees alike, and small helper functions
//! ([`id`], [`int`], [`node`], ...) for building trees in code and tests.

use std::fmt;

use crate::Error;

/// Type alias for integer values in the interpreter
pub type NumberType = i64;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators, including tuple augmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    And,
    Or,
    Eq,
    Ne,
    Ls,
    Le,
    Gr,
    Ge,
    Aug,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
            BinaryOp::And => "&",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Ls => "ls",
            BinaryOp::Le => "le",
            BinaryOp::Gr => "gr",
            BinaryOp::Ge => "ge",
            BinaryOp::Aug => "aug",
        }
    }

    /// Look up a binary operator by its printed form
    pub fn from_str_opt(text: &str) -> Option<BinaryOp> {
        Some(match text {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "**" => BinaryOp::Pow,
            "&" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "eq" => BinaryOp::Eq,
            "ne" => BinaryOp::Ne,
            "ls" => BinaryOp::Ls,
            "le" => BinaryOp::Le,
            "gr" => BinaryOp::Gr,
            "ge" => BinaryOp::Ge,
            "aug" => BinaryOp::Aug,
            _ => return None,
        })
    }
}

impl UnaryOp {
    /// Look up a unary operator by its printed form
    pub fn from_str_opt(text: &str) -> Option<UnaryOp> {
        match text {
            "neg" => Some(UnaryOp::Neg),
            "not" => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

/// Node vocabulary of RPAL parse trees
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Identifier(String),
    Integer(NumberType),
    String(String),
    True,
    False,
    Nil,
    Dummy,
    YStar,
    EmptyParams,
    Let,
    Lambda,
    Where,
    Tau,
    Conditional,
    Gamma,
    Within,
    And,
    Rec,
    Equal,
    Comma,
    FcnForm,
    At,
    Unary(UnaryOp),
    Binary(BinaryOp),
}

/// Expected number of children for a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    /// Check if the given number of children is valid for this arity
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }

    fn minimum(self) -> usize {
        match self {
            Arity::Exact(n) | Arity::AtLeast(n) => n,
        }
    }
}

impl Tag {
    /// Number of children a node with this tag must have
    pub fn arity(&self) -> Arity {
        match self {
            Tag::Identifier(_)
            | Tag::Integer(_)
            | Tag::String(_)
            | Tag::True
            | Tag::False
            | Tag::Nil
            | Tag::Dummy
            | Tag::YStar
            | Tag::EmptyParams => Arity::Exact(0),
            Tag::Rec | Tag::Unary(_) => Arity::Exact(1),
            Tag::Let | Tag::Where | Tag::Within | Tag::Gamma | Tag::Equal | Tag::Binary(_) => {
                Arity::Exact(2)
            }
            Tag::Conditional | Tag::At => Arity::Exact(3),
            Tag::Lambda | Tag::Tau | Tag::Comma | Tag::And => Arity::AtLeast(2),
            Tag::FcnForm => Arity::AtLeast(3),
        }
    }

    /// Printed form used by the dot-indented serializer
    pub fn label(&self) -> String {
        match self {
            Tag::Identifier(name) => format!("<ID:{name}>"),
            Tag::Integer(n) => format!("<INT:{n}>"),
            Tag::String(s) => format!("<STR:'{s}'>"),
            Tag::True => "<true>".to_owned(),
            Tag::False => "<false>".to_owned(),
            Tag::Nil => "<nil>".to_owned(),
            Tag::Dummy => "<dummy>".to_owned(),
            Tag::YStar => "<Y*>".to_owned(),
            Tag::EmptyParams => "()".to_owned(),
            Tag::FcnForm => "function_form".to_owned(),
            other => other.keyword().to_owned(),
        }
    }

    /// Operator text of an interior tag (the name JSON trees use as object key)
    pub fn keyword(&self) -> &'static str {
        match self {
            Tag::Let => "let",
            Tag::Lambda => "lambda",
            Tag::Where => "where",
            Tag::Tau => "tau",
            Tag::Conditional => "->",
            Tag::Gamma => "gamma",
            Tag::Within => "within",
            Tag::And => "and",
            Tag::Rec => "rec",
            Tag::Equal => "=",
            Tag::Comma => ",",
            Tag::FcnForm => "fcn_form",
            Tag::At => "@",
            Tag::Unary(op) => op.as_str(),
            Tag::Binary(op) => op.as_str(),
            Tag::Identifier(_) => "id",
            Tag::Integer(_) => "int",
            Tag::String(_) => "str",
            Tag::True => "true",
            Tag::False => "false",
            Tag::Nil => "nil",
            Tag::Dummy => "dummy",
            Tag::YStar => "<Y*>",
            Tag::EmptyParams => "()",
        }
    }

    /// Inverse of [`Tag::keyword`] for interior tags
    pub fn from_keyword(text: &str) -> Option<Tag> {
        Some(match text {
            "let" => Tag::Let,
            "lambda" => Tag::Lambda,
            "where" => Tag::Where,
            "tau" => Tag::Tau,
            "->" => Tag::Conditional,
            "gamma" => Tag::Gamma,
            "within" => Tag::Within,
            "and" => Tag::And,
            "rec" => Tag::Rec,
            "=" => Tag::Equal,
            "," => Tag::Comma,
            "fcn_form" | "function_form" => Tag::FcnForm,
            "@" => Tag::At,
            other => {
                if let Some(op) = UnaryOp::from_str_opt(other) {
                    Tag::Unary(op)
                } else {
                    Tag::Binary(BinaryOp::from_str_opt(other)?)
                }
            }
        })
    }
}

/// A parse tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub tag: Tag,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(tag: Tag, children: Vec<Node>) -> Self {
        Node { tag, children }
    }

    pub fn leaf(tag: Tag) -> Self {
        Node {
            tag,
            children: Vec::new(),
        }
    }

    /// Identifier name if this node is an identifier leaf
    pub fn identifier(&self) -> Option<&str> {
        match &self.tag {
            Tag::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Number of levels in the tree, 1 for a leaf
    pub fn height(&self) -> usize {
        1 + self.children.iter().map(Node::height).max().unwrap_or(0)
    }

    /// Fail with a StructuralError unless the child count fits the tag
    pub fn check_arity(&self) -> Result<(), Error> {
        let arity = self.tag.arity();
        if arity.accepts(self.children.len()) {
            Ok(())
        } else {
            Err(Error::StructuralError(format!(
                "'{}' expects {}{} children, found {}",
                self.tag.label(),
                if matches!(arity, Arity::AtLeast(_)) {
                    "at least "
                } else {
                    ""
                },
                arity.minimum(),
                self.children.len()
            )))
        }
    }

    /// Serialize the tree in pre-order, one node per line, each prefixed by
    /// one dot per level of depth.
    pub fn to_dot_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.push_dot_lines(0, &mut lines);
        lines
    }

    fn push_dot_lines(&self, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}{}", ".".repeat(depth), self.tag.label()));
        for child in &self.children {
            child.push_dot_lines(depth + 1, lines);
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.to_dot_lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Identifier leaf
pub fn id<S: AsRef<str>>(name: S) -> Node {
    Node::leaf(Tag::Identifier(name.as_ref().to_owned()))
}

/// Integer leaf
pub fn int(n: NumberType) -> Node {
    Node::leaf(Tag::Integer(n))
}

/// String leaf
pub fn string<S: AsRef<str>>(text: S) -> Node {
    Node::leaf(Tag::String(text.as_ref().to_owned()))
}

/// Interior node
pub fn node(tag: Tag, children: Vec<Node>) -> Node {
    Node::new(tag, children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_lines_format() {
        // let x = 3 in x + 4
        let tree = node(
            Tag::Let,
            vec![
                node(Tag::Equal, vec![id("x"), int(3)]),
                node(Tag::Binary(BinaryOp::Add), vec![id("x"), int(4)]),
            ],
        );
        assert_eq!(
            tree.to_dot_lines(),
            vec!["let", ".=", "..<ID:x>", "..<INT:3>", ".+", "..<ID:x>", "..<INT:4>"]
        );
    }

    #[test]
    fn test_leaf_labels() {
        let test_cases = vec![
            (string("hi"), "<STR:'hi'>"),
            (Node::leaf(Tag::True), "<true>"),
            (Node::leaf(Tag::False), "<false>"),
            (Node::leaf(Tag::Nil), "<nil>"),
            (Node::leaf(Tag::Dummy), "<dummy>"),
            (Node::leaf(Tag::YStar), "<Y*>"),
            (Node::leaf(Tag::EmptyParams), "()"),
        ];
        for (i, (tree, expected)) in test_cases.iter().enumerate() {
            assert_eq!(tree.to_dot_lines(), vec![*expected], "case #{}", i + 1);
        }
    }

    #[test]
    fn test_check_arity() {
        assert!(node(Tag::Gamma, vec![id("f"), int(1)]).check_arity().is_ok());
        assert!(node(Tag::Tau, vec![int(1), int(2), int(3)]).check_arity().is_ok());

        let bad = node(Tag::Conditional, vec![Node::leaf(Tag::True), int(1)]);
        match bad.check_arity() {
            Err(Error::StructuralError(msg)) => assert!(msg.contains("'->' expects 3")),
            other => panic!("expected StructuralError, got {other:?}"),
        }

        let bad_lambda = node(Tag::Lambda, vec![id("x")]);
        assert!(matches!(
            bad_lambda.check_arity(),
            Err(Error::StructuralError(_))
        ));
    }

    #[test]
    fn test_keyword_round_trip() {
        let tags = vec![
            Tag::Let,
            Tag::Lambda,
            Tag::Where,
            Tag::Tau,
            Tag::Conditional,
            Tag::Gamma,
            Tag::Within,
            Tag::And,
            Tag::Rec,
            Tag::Equal,
            Tag::Comma,
            Tag::FcnForm,
            Tag::At,
            Tag::Unary(UnaryOp::Neg),
            Tag::Binary(BinaryOp::Aug),
            Tag::Binary(BinaryOp::Pow),
        ];
        for tag in tags {
            assert_eq!(Tag::from_keyword(tag.keyword()), Some(tag.clone()));
        }
        assert_eq!(Tag::from_keyword("bogus"), None);
    }
}

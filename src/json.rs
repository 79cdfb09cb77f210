//! JSON interchange format for parse trees.
//!
//! Lets an external RPAL front end hand trees to the interpreter without
//! linking against it. Leaves are small objects or bare strings, interior nodes
//! are single-key objects mapping the node's operator text to its children:
//!
//! ```json
//! {"let": [{"=": [{"id": "x"}, {"int": 3}]},
//!          {"+": [{"id": "x"}, {"int": 4}]}]}
//! ```
//!
//! | leaf | JSON |
//! |---|---|
//! | identifier | `{"id": "x"}` |
//! | integer | `{"int": 3}` |
//! | string | `{"str": "ab"}` |
//! | `true` `false` `nil` `dummy` `Y*` `()` | `"true"` `"false"` `"nil"` `"dummy"` `"<Y*>"` `"()"` |
//!
//! Child counts are not checked here; the standardizer rejects malformed trees.

use serde_json::{Map, Value, json};

use crate::ast::{Node, Tag};
use crate::{Error, ParseError, ParseErrorKind};

fn invalid(message: impl Into<String>) -> Error {
    ParseError::from_message(ParseErrorKind::InvalidSyntax, message).into()
}

/// Decode a JSON document into a parse tree
pub fn node_from_json(text: &str) -> Result<Node, Error> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("Invalid JSON: {e}")))?;
    node_from_value(&value)
}

fn node_from_value(value: &Value) -> Result<Node, Error> {
    match value {
        Value::String(leaf) => {
            let tag = match leaf.as_str() {
                "true" => Tag::True,
                "false" => Tag::False,
                "nil" => Tag::Nil,
                "dummy" => Tag::Dummy,
                "<Y*>" => Tag::YStar,
                "()" => Tag::EmptyParams,
                other => return Err(invalid(format!("Unknown leaf '{other}'"))),
            };
            Ok(Node::leaf(tag))
        }
        Value::Object(object) if object.len() == 1 => {
            let Some((key, payload)) = object.iter().next() else {
                return Err(invalid("Empty node object"));
            };
            match (key.as_str(), payload) {
                ("id", Value::String(name)) => Ok(Node::leaf(Tag::Identifier(name.clone()))),
                ("str", Value::String(text)) => Ok(Node::leaf(Tag::String(text.clone()))),
                ("int", Value::Number(n)) => n
                    .as_i64()
                    .map(|n| Node::leaf(Tag::Integer(n)))
                    .ok_or_else(|| invalid(format!("Integer out of range: {n}"))),
                (keyword, Value::Array(children)) => {
                    let tag = Tag::from_keyword(keyword)
                        .ok_or_else(|| invalid(format!("Unknown node tag '{keyword}'")))?;
                    let children = children
                        .iter()
                        .map(node_from_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Node::new(tag, children))
                }
                (key, payload) => Err(invalid(format!(
                    "Invalid payload for '{key}': {payload}"
                ))),
            }
        }
        other => Err(invalid(format!(
            "Expected a node object or leaf string, found {other}"
        ))),
    }
}

/// Encode a parse tree as a compact JSON document
pub fn node_to_json(tree: &Node) -> String {
    node_to_value(tree).to_string()
}

fn node_to_value(tree: &Node) -> Value {
    match &tree.tag {
        Tag::Identifier(name) => json!({ "id": name }),
        Tag::Integer(n) => json!({ "int": n }),
        Tag::String(text) => json!({ "str": text }),
        Tag::True | Tag::False | Tag::Nil | Tag::Dummy | Tag::YStar | Tag::EmptyParams => {
            Value::String(tree.tag.keyword().to_owned())
        }
        tag => {
            let children = tree.children.iter().map(node_to_value).collect();
            let mut object = Map::new();
            object.insert(tag.keyword().to_owned(), Value::Array(children));
            Value::Object(object)
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, id, int, node, string};
    use crate::evaluate;
    use crate::symbol::Symbol;

    #[test]
    fn test_decode_and_evaluate() {
        let text = r#"
            {"let": [
                {"function_form": [{"id": "f"}, {"id": "x"}, {"*": [{"id": "x"}, {"int": 2}]}]},
                {"gamma": [{"id": "f"}, {"int": 21}]}
            ]}
        "#;
        let tree = node_from_json(text).unwrap();
        assert_eq!(tree.children[0].tag, Tag::FcnForm);
        assert_eq!(evaluate(&tree).unwrap(), Symbol::Integer(42));
    }

    #[test]
    fn test_encode_uses_operator_text() {
        let tree = node(
            Tag::Conditional,
            vec![
                node(Tag::Binary(BinaryOp::Eq), vec![id("n"), int(0)]),
                string("zero"),
                node(Tag::Tau, vec![Node::leaf(Tag::Nil), Node::leaf(Tag::YStar)]),
            ],
        );
        let text = node_to_json(&tree);
        assert_eq!(
            text,
            r#"{"->":[{"eq":[{"id":"n"},{"int":0}]},{"str":"zero"},{"tau":["nil","<Y*>"]}]}"#
        );
        assert_eq!(node_from_json(&text).unwrap(), tree);
    }

    #[test]
    fn test_decode_errors() {
        let test_cases = vec![
            "not json",
            "42",
            r#""maybe""#,
            r#"{"int": "3"}"#,
            r#"{"int": 1.5}"#,
            r#"{"frobnicate": []}"#,
            r#"{"id": "x", "int": 3}"#,
            r#"{"gamma": [{"id": "f"}, 7]}"#,
        ];
        for (i, text) in test_cases.iter().enumerate() {
            match node_from_json(text) {
                Err(Error::ParseError(e)) => {
                    assert_eq!(e.kind, ParseErrorKind::InvalidSyntax, "case #{}", i + 1);
                }
                other => panic!("case #{}: expected ParseError, got {other:?}", i + 1),
            }
        }

        // well-formed JSON with a bad child count is left to the standardizer
        let tree = node_from_json(r#"{"let": [{"int": 1}]}"#).unwrap();
        assert!(matches!(
            evaluate(&tree),
            Err(Error::StructuralError(_))
        ));
    }
}

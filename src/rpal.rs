//! RPAL source reader: nom-based tokenizer plus a recursive-descent parser
//! producing raw parse trees.
//!
//! The grammar is the standard RPAL phrase structure grammar:
//!
//! ```text
//! E  -> 'let' D 'in' E | 'fn' Vb+ '.' E | Ew
//! Ew -> T 'where' Dr | T
//! T  -> Ta (',' Ta)*          Ta -> Ta 'aug' Tc | Tc
//! Tc -> B '->' Tc '|' Tc | B
//! B  -> B 'or' Bt | Bt        Bt -> Bt '&' Bs | Bs
//! Bs -> 'not' Bp | Bp         Bp -> A (gr|ge|ls|le|eq|ne) A | A
//! A  -> A '+' At | A '-' At | '+' At | '-' At | At
//! At -> At '*' Af | At '/' Af | Af
//! Af -> Ap '**' Af | Ap       Ap -> Ap '@' <ID> R | R
//! R  -> R Rn | Rn             Rn -> <ID> | <INT> | <STR> | true | false | nil | dummy | '(' E ')'
//! D  -> Da 'within' D | Da    Da -> Dr ('and' Dr)*
//! Dr -> 'rec' Db | Db         Db -> Vl '=' E | <ID> Vb+ '=' E | '(' D ')'
//! Vb -> <ID> | '(' Vl ')' | '(' ')'
//! Vl -> <ID> (',' <ID>)*
//! ```

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{map, recognize, value},
    multi::many0,
    sequence::pair,
};
use tracing::debug;

use crate::ast::{BinaryOp, NumberType, Tag, UnaryOp};
use crate::{Error, MAX_PARSE_DEPTH, Node, ParseError, ParseErrorKind};

/// Characters that make up operator tokens
const OPERATOR_CHARS: &str = "+-*<>&.@/:=~|$!#%^_[]{}\"`?";

const KEYWORDS: &[&str] = &[
    "let", "in", "fn", "where", "aug", "or", "not", "gr", "ge", "ls", "le", "eq", "ne", "true",
    "false", "nil", "dummy", "within", "and", "rec",
];

/// Configuration for the RPAL reader
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Maximum recursion depth of the reader, and maximum height of the
    /// trees it returns
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Identifier,
    Keyword,
    Integer,
    String,
    Operator,
    Punctuation,
}

#[derive(Debug, Clone, PartialEq)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    /// Byte offset into the source
    offset: usize,
}

//
// Tokenizer
//

/// Whitespace and `//` comments
fn parse_trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            multispace1,
            recognize(pair(tag("//"), not_line_ending)),
        ))),
    )
    .parse(input)
}

fn parse_word(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic()),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        )),
        |word: &str| {
            if KEYWORDS.contains(&word) {
                (TokenKind::Keyword, word)
            } else {
                (TokenKind::Identifier, word)
            }
        },
    )
    .parse(input)
}

fn parse_integer(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(digit1, |digits| (TokenKind::Integer, digits)).parse(input)
}

/// Single-quoted string; escapes are kept as written and the token text
/// excludes the quotes
fn parse_string(input: &str) -> IResult<&str, (TokenKind, &str)> {
    let (body, _) = char('\'').parse(input)?;
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => return Ok((&body[i + 1..], (TokenKind::String, &body[..i]))),
            '\\' => {
                chars.next();
            }
            _ => {}
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn parse_operator(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(take_while1(|c: char| OPERATOR_CHARS.contains(c)), |op| {
        (TokenKind::Operator, op)
    })
    .parse(input)
}

fn parse_punctuation(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(recognize(one_of("(),;")), |p| (TokenKind::Punctuation, p)).parse(input)
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, Error> {
    let mut tokens = Vec::new();
    let mut rest = input;
    loop {
        if let Ok((after, ())) = parse_trivia(rest) {
            rest = after;
        }
        if rest.is_empty() {
            return Ok(tokens);
        }
        let offset = input.len() - rest.len();
        match alt((
            parse_word,
            parse_integer,
            parse_string,
            parse_operator,
            parse_punctuation,
        ))
        .parse(rest)
        {
            Ok((after, (kind, text))) => {
                tokens.push(Token { kind, text, offset });
                rest = after;
            }
            Err(nom::Err::Failure(_)) => {
                return Err(ParseError::with_context_and_found(
                    ParseErrorKind::Incomplete,
                    "Unterminated string literal",
                    input,
                    offset,
                    None,
                )
                .into());
            }
            Err(_) => {
                let found: String = rest.chars().take(1).collect();
                return Err(ParseError::with_context_and_found(
                    ParseErrorKind::InvalidToken,
                    format!("Invalid character at position {offset}"),
                    input,
                    offset,
                    Some(found),
                )
                .into());
            }
        }
    }
}

//
// Parser
//

struct RpalParser<'a> {
    input: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> RpalParser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, kind: TokenKind, text: &str) -> bool {
        self.peek()
            .is_some_and(|token| token.kind == kind && token.text == text)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek_is(TokenKind::Keyword, keyword)
    }

    fn at_operator(&self, op: &str) -> bool {
        self.peek_is(TokenKind::Operator, op)
    }

    fn at_punctuation(&self, p: &str) -> bool {
        self.peek_is(TokenKind::Punctuation, p)
    }

    fn at_identifier(&self) -> bool {
        self.peek()
            .is_some_and(|token| token.kind == TokenKind::Identifier)
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Error for the current token, or for end of input
    fn unexpected(&self, expected: &str) -> Error {
        match self.peek() {
            Some(token) => ParseError::with_context_and_found(
                ParseErrorKind::InvalidSyntax,
                format!("Expected {expected}"),
                self.input,
                token.offset,
                Some(token.text.to_owned()),
            )
            .into(),
            None => ParseError::from_message(
                ParseErrorKind::Incomplete,
                format!("Expected {expected}, found end of input"),
            )
            .into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, text: &str) -> Result<(), Error> {
        if self.peek_is(kind, text) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{text}'")))
        }
    }

    fn expect_identifier(&mut self) -> Result<Node, Error> {
        if self.at_identifier()
            && let Some(token) = self.advance()
        {
            return Ok(Node::leaf(Tag::Identifier(token.text.to_owned())));
        }
        Err(self.unexpected("an identifier"))
    }

    fn too_deep(&self) -> Error {
        let offset = self.peek().map_or(self.input.len(), |token| token.offset);
        ParseError::with_context_and_found(
            ParseErrorKind::TooDeeplyNested,
            format!(
                "Expression too deeply nested (max depth: {})",
                self.max_depth
            ),
            self.input,
            offset,
            None,
        )
        .into()
    }

    /// Run `parse` one recursion level deeper
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Node, Error>,
    ) -> Result<Node, Error> {
        if self.depth >= self.max_depth {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Build an interior node. Left-associative chains grow the tree without
    /// recursing, so the height limit is checked here rather than in `nested`.
    fn build(&self, tag: Tag, children: Vec<Node>) -> Result<Node, Error> {
        let node = Node::new(tag, children);
        if node.height() > self.max_depth {
            return Err(self.too_deep());
        }
        Ok(node)
    }

    fn parse_e(&mut self) -> Result<Node, Error> {
        self.nested(|p| {
            if p.at_keyword("let") {
                p.pos += 1;
                let definition = p.parse_d()?;
                p.expect(TokenKind::Keyword, "in")?;
                let body = p.parse_e()?;
                p.build(Tag::Let, vec![definition, body])
            } else if p.at_keyword("fn") {
                p.pos += 1;
                let mut children = vec![p.parse_vb()?];
                while !p.at_operator(".") {
                    children.push(p.parse_vb()?);
                }
                p.pos += 1;
                children.push(p.parse_e()?);
                p.build(Tag::Lambda, children)
            } else {
                p.parse_ew()
            }
        })
    }

    fn parse_ew(&mut self) -> Result<Node, Error> {
        let body = self.parse_t()?;
        if self.at_keyword("where") {
            self.pos += 1;
            let definition = self.parse_dr()?;
            return self.build(Tag::Where, vec![body, definition]);
        }
        Ok(body)
    }

    fn parse_t(&mut self) -> Result<Node, Error> {
        let first = self.parse_ta()?;
        if !self.at_punctuation(",") {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.at_punctuation(",") {
            self.pos += 1;
            elements.push(self.parse_ta()?);
        }
        self.build(Tag::Tau, elements)
    }

    fn parse_ta(&mut self) -> Result<Node, Error> {
        let mut left = self.parse_tc()?;
        while self.at_keyword("aug") {
            self.pos += 1;
            let right = self.parse_tc()?;
            left = self.build(Tag::Binary(BinaryOp::Aug), vec![left, right])?;
        }
        Ok(left)
    }

    fn parse_tc(&mut self) -> Result<Node, Error> {
        self.nested(|p| {
            let condition = p.parse_b()?;
            if !p.at_operator("->") {
                return Ok(condition);
            }
            p.pos += 1;
            let then_branch = p.parse_tc()?;
            p.expect(TokenKind::Operator, "|")?;
            let else_branch = p.parse_tc()?;
            p.build(
                Tag::Conditional,
                vec![condition, then_branch, else_branch],
            )
        })
    }

    fn parse_b(&mut self) -> Result<Node, Error> {
        let mut left = self.parse_bt()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_bt()?;
            left = self.build(Tag::Binary(BinaryOp::Or), vec![left, right])?;
        }
        Ok(left)
    }

    fn parse_bt(&mut self) -> Result<Node, Error> {
        let mut left = self.parse_bs()?;
        while self.at_operator("&") {
            self.pos += 1;
            let right = self.parse_bs()?;
            left = self.build(Tag::Binary(BinaryOp::And), vec![left, right])?;
        }
        Ok(left)
    }

    fn parse_bs(&mut self) -> Result<Node, Error> {
        if self.at_keyword("not") {
            self.pos += 1;
            let operand = self.parse_bp()?;
            return self.build(Tag::Unary(UnaryOp::Not), vec![operand]);
        }
        self.parse_bp()
    }

    fn comparison(&self) -> Option<BinaryOp> {
        let token = self.peek()?;
        match (token.kind, token.text) {
            (TokenKind::Keyword, "gr") | (TokenKind::Operator, ">") => Some(BinaryOp::Gr),
            (TokenKind::Keyword, "ge") | (TokenKind::Operator, ">=") => Some(BinaryOp::Ge),
            (TokenKind::Keyword, "ls") | (TokenKind::Operator, "<") => Some(BinaryOp::Ls),
            (TokenKind::Keyword, "le") | (TokenKind::Operator, "<=") => Some(BinaryOp::Le),
            (TokenKind::Keyword, "eq") => Some(BinaryOp::Eq),
            (TokenKind::Keyword, "ne") => Some(BinaryOp::Ne),
            _ => None,
        }
    }

    fn parse_bp(&mut self) -> Result<Node, Error> {
        let left = self.parse_a()?;
        if let Some(op) = self.comparison() {
            self.pos += 1;
            let right = self.parse_a()?;
            return self.build(Tag::Binary(op), vec![left, right]);
        }
        Ok(left)
    }

    fn parse_a(&mut self) -> Result<Node, Error> {
        let mut left = if self.at_operator("-") {
            self.pos += 1;
            let operand = self.parse_at()?;
            self.build(Tag::Unary(UnaryOp::Neg), vec![operand])?
        } else if self.at_operator("+") {
            self.pos += 1;
            self.parse_at()?
        } else {
            self.parse_at()?
        };
        loop {
            let op = if self.at_operator("+") {
                BinaryOp::Add
            } else if self.at_operator("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            self.pos += 1;
            let right = self.parse_at()?;
            left = self.build(Tag::Binary(op), vec![left, right])?;
        }
    }

    fn parse_at(&mut self) -> Result<Node, Error> {
        let mut left = self.parse_af()?;
        loop {
            let op = if self.at_operator("*") {
                BinaryOp::Mul
            } else if self.at_operator("/") {
                BinaryOp::Div
            } else {
                return Ok(left);
            };
            self.pos += 1;
            let right = self.parse_af()?;
            left = self.build(Tag::Binary(op), vec![left, right])?;
        }
    }

    fn parse_af(&mut self) -> Result<Node, Error> {
        self.nested(|p| {
            let base = p.parse_ap()?;
            if !p.at_operator("**") {
                return Ok(base);
            }
            p.pos += 1;
            let exponent = p.parse_af()?;
            p.build(Tag::Binary(BinaryOp::Pow), vec![base, exponent])
        })
    }

    fn parse_ap(&mut self) -> Result<Node, Error> {
        let mut left = self.parse_r()?;
        while self.at_operator("@") {
            self.pos += 1;
            let operator = self.expect_identifier()?;
            let right = self.parse_r()?;
            left = self.build(Tag::At, vec![left, operator, right])?;
        }
        Ok(left)
    }

    fn at_rand_start(&self) -> bool {
        match self.peek() {
            Some(token) => match token.kind {
                TokenKind::Identifier | TokenKind::Integer | TokenKind::String => true,
                TokenKind::Keyword => {
                    matches!(token.text, "true" | "false" | "nil" | "dummy")
                }
                TokenKind::Punctuation => token.text == "(",
                TokenKind::Operator => false,
            },
            None => false,
        }
    }

    fn parse_r(&mut self) -> Result<Node, Error> {
        let mut rator = self.parse_rn()?;
        while self.at_rand_start() {
            let rand = self.parse_rn()?;
            rator = self.build(Tag::Gamma, vec![rator, rand])?;
        }
        Ok(rator)
    }

    fn parse_rn(&mut self) -> Result<Node, Error> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("an operand"));
        };
        let leaf = match (token.kind, token.text) {
            (TokenKind::Identifier, name) => Tag::Identifier(name.to_owned()),
            (TokenKind::Integer, digits) => match digits.parse::<NumberType>() {
                Ok(n) => Tag::Integer(n),
                Err(_) => {
                    return Err(ParseError::with_context_and_found(
                        ParseErrorKind::ImplementationLimit,
                        "Integer literal out of range",
                        self.input,
                        token.offset,
                        Some(digits.to_owned()),
                    )
                    .into());
                }
            },
            (TokenKind::String, text) => Tag::String(text.to_owned()),
            (TokenKind::Keyword, "true") => Tag::True,
            (TokenKind::Keyword, "false") => Tag::False,
            (TokenKind::Keyword, "nil") => Tag::Nil,
            (TokenKind::Keyword, "dummy") => Tag::Dummy,
            (TokenKind::Punctuation, "(") => {
                self.pos += 1;
                let inner = self.parse_e()?;
                self.expect(TokenKind::Punctuation, ")")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an operand")),
        };
        self.pos += 1;
        Ok(Node::leaf(leaf))
    }

    fn parse_d(&mut self) -> Result<Node, Error> {
        self.nested(|p| {
            let inner = p.parse_da()?;
            if p.at_keyword("within") {
                p.pos += 1;
                let outer = p.parse_d()?;
                return p.build(Tag::Within, vec![inner, outer]);
            }
            Ok(inner)
        })
    }

    fn parse_da(&mut self) -> Result<Node, Error> {
        let first = self.parse_dr()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut definitions = vec![first];
        while self.at_keyword("and") {
            self.pos += 1;
            definitions.push(self.parse_dr()?);
        }
        self.build(Tag::And, definitions)
    }

    fn parse_dr(&mut self) -> Result<Node, Error> {
        if self.at_keyword("rec") {
            self.pos += 1;
            let definition = self.parse_db()?;
            return self.build(Tag::Rec, vec![definition]);
        }
        self.parse_db()
    }

    fn parse_db(&mut self) -> Result<Node, Error> {
        if self.at_punctuation("(") {
            self.pos += 1;
            let definition = self.parse_d()?;
            self.expect(TokenKind::Punctuation, ")")?;
            return Ok(definition);
        }
        let name = self.expect_identifier()?;
        if self.at_identifier() || self.at_punctuation("(") {
            let mut children = vec![name];
            while !self.at_operator("=") {
                children.push(self.parse_vb()?);
            }
            self.pos += 1;
            children.push(self.parse_e()?);
            return self.build(Tag::FcnForm, children);
        }
        let names = self.parse_vl_rest(name)?;
        self.expect(TokenKind::Operator, "=")?;
        let value = self.parse_e()?;
        self.build(Tag::Equal, vec![names, value])
    }

    fn parse_vb(&mut self) -> Result<Node, Error> {
        if self.at_punctuation("(") {
            self.pos += 1;
            if self.at_punctuation(")") {
                self.pos += 1;
                return Ok(Node::leaf(Tag::EmptyParams));
            }
            let first = self.expect_identifier()?;
            let names = self.parse_vl_rest(first)?;
            self.expect(TokenKind::Punctuation, ")")?;
            return Ok(names);
        }
        self.expect_identifier()
    }

    /// Remainder of a variable list whose first name was already read; a single
    /// name stays a plain identifier
    fn parse_vl_rest(&mut self, first: Node) -> Result<Node, Error> {
        if !self.at_punctuation(",") {
            return Ok(first);
        }
        let mut names = vec![first];
        while self.at_punctuation(",") {
            self.pos += 1;
            names.push(self.expect_identifier()?);
        }
        self.build(Tag::Comma, names)
    }
}

/// Parse an RPAL program into a raw parse tree (public API)
pub fn parse_rpal(input: &str) -> Result<Node, Error> {
    parse_rpal_with_config(input, ParseConfig::default())
}

/// Parse an RPAL program with an explicit reader configuration
pub fn parse_rpal_with_config(input: &str, config: ParseConfig) -> Result<Node, Error> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::from_message(ParseErrorKind::Incomplete, "Empty program").into());
    }
    let mut parser = RpalParser {
        input,
        tokens,
        pos: 0,
        depth: 0,
        max_depth: config.max_depth,
    };
    let tree = parser.parse_e()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::with_context_and_found(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input at position {}", token.offset),
            input,
            token.offset,
            Some(token.text.to_owned()),
        )
        .into());
    }
    debug!(tokens = parser.tokens.len(), "parsed RPAL program");
    Ok(tree)
}

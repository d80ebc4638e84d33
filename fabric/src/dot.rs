// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reader for the Graphviz `digraph` subset used by fabric topology files.
//!
//! Topology files declare nodes and directed edges; every edge carries a
//! `comment` attribute with its destination filter. Only the constructs
//! that appear in such files are accepted: node statements, edge statements
//! (including chains `a -> b -> c`), attribute lists, quoted and bare
//! identifiers, and the usual comment forms. Subgraphs are rejected.
//!
//! Declaration order is preserved for both nodes and edges since edge-id
//! assignment depends on it.

use crate::error::{Error, Result};

/// A directed edge as declared in the input, attributes in declaration order.
#[derive(Debug, Clone)]
pub struct DotEdge {
    pub tail: String,
    pub head: String,
    pub attrs: Vec<(String, String)>,
}

impl DotEdge {
    /// Look up an attribute value by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The parsed graph: node names in first-mention order, edges in
/// declaration order.
#[derive(Debug, Default)]
pub struct DotGraph {
    pub name: String,
    pub nodes: Vec<String>,
    pub edges: Vec<DotEdge>,
    seen: std::collections::HashSet<String>,
}

impl DotGraph {
    fn touch_node(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.nodes.push(name.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Id(String),
    Arrow,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Comma,
    Semicolon,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::DotParse(self.line, msg.into())
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_noise(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if (c as char).is_whitespace() => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(c) = self.bump() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') => match self.input.get(self.pos + 1) {
                    Some(b'/') => {
                        while let Some(c) = self.bump() {
                            if c == b'\n' {
                                break;
                            }
                        }
                    }
                    Some(b'*') => {
                        self.bump();
                        self.bump();
                        loop {
                            match self.bump() {
                                Some(b'*') if self.peek() == Some(b'/') => {
                                    self.bump();
                                    break;
                                }
                                Some(_) => {}
                                None => return Err(self.err("unterminated block comment")),
                            }
                        }
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize)>> {
        self.skip_noise()?;
        let line = self.line;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };
        let tok = match c {
            b'{' => {
                self.bump();
                Token::LBrace
            }
            b'}' => {
                self.bump();
                Token::RBrace
            }
            b'[' => {
                self.bump();
                Token::LBracket
            }
            b']' => {
                self.bump();
                Token::RBracket
            }
            b'=' => {
                self.bump();
                Token::Equals
            }
            b',' => {
                self.bump();
                Token::Comma
            }
            b';' => {
                self.bump();
                Token::Semicolon
            }
            b'-' => {
                self.bump();
                match self.bump() {
                    Some(b'>') => Token::Arrow,
                    Some(b'-') => {
                        return Err(self.err("undirected edge '--' in a directed topology"))
                    }
                    _ => return Err(self.err("stray '-'")),
                }
            }
            b'"' => {
                self.bump();
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some(b'"') => break,
                        Some(b'\\') => match self.bump() {
                            Some(e) => s.push(e as char),
                            None => return Err(self.err("unterminated string")),
                        },
                        Some(c) => s.push(c as char),
                        None => return Err(self.err("unterminated string")),
                    }
                }
                Token::Id(s)
            }
            c if (c as char).is_alphanumeric() || c == b'_' || c == b'.' => {
                let mut s = String::new();
                while let Some(c) = self.peek() {
                    if (c as char).is_alphanumeric() || c == b'_' || c == b'.' {
                        s.push(c as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Token::Id(s)
            }
            other => return Err(self.err(format!("unexpected character '{}'", other as char))),
        };
        Ok(Some((tok, line)))
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::DotParse(self.line(), msg.into())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        let line = self.line();
        match self.bump() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(Error::DotParse(
                line,
                format!("expected {:?}, found {:?}", want, t),
            )),
            None => Err(Error::DotParse(
                line,
                format!("expected {:?}, found end of input", want),
            )),
        }
    }

    fn expect_id(&mut self) -> Result<String> {
        let line = self.line();
        match self.bump() {
            Some(Token::Id(s)) => Ok(s),
            Some(t) => Err(Error::DotParse(
                line,
                format!("expected an identifier, found {:?}", t),
            )),
            None => Err(Error::DotParse(
                line,
                "expected an identifier, found end of input".to_string(),
            )),
        }
    }

    /// `[ key = value (, key = value)* ]`; returns pairs in declaration order.
    fn attr_list(&mut self) -> Result<Vec<(String, String)>> {
        let mut attrs = Vec::new();
        self.expect(Token::LBracket)?;
        loop {
            match self.peek() {
                Some(Token::RBracket) => {
                    self.bump();
                    break;
                }
                Some(Token::Comma) | Some(Token::Semicolon) => {
                    self.bump();
                }
                Some(Token::Id(_)) => {
                    let key = self.expect_id()?;
                    self.expect(Token::Equals)?;
                    let value = self.expect_id()?;
                    attrs.push((key, value));
                }
                other => return Err(self.err(format!("unexpected {:?} in attribute list", other))),
            }
        }
        Ok(attrs)
    }

    fn graph(&mut self) -> Result<DotGraph> {
        let mut graph = DotGraph::default();

        match self.bump() {
            Some(Token::Id(kw)) if kw == "strict" => {
                let kw = self.expect_id()?;
                if kw != "digraph" {
                    return Err(self.err("expected 'digraph'"));
                }
            }
            Some(Token::Id(kw)) if kw == "digraph" => {}
            Some(Token::Id(kw)) if kw == "graph" => {
                return Err(self.err("undirected graphs are not supported"))
            }
            _ => return Err(self.err("expected 'digraph'")),
        }
        if let Some(Token::Id(_)) = self.peek() {
            graph.name = self.expect_id()?;
        }
        self.expect(Token::LBrace)?;

        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.bump();
                    break;
                }
                Some(Token::Semicolon) => {
                    self.bump();
                }
                Some(Token::LBrace) => return Err(self.err("subgraphs are not supported")),
                Some(Token::Id(_)) => self.statement(&mut graph)?,
                Some(other) => return Err(self.err(format!("unexpected {:?}", other))),
                None => return Err(self.err("missing closing '}'")),
            }
        }
        Ok(graph)
    }

    /// One node or edge statement. Default-attribute statements
    /// (`graph [..]`, `node [..]`, `edge [..]`) are accepted and ignored.
    fn statement(&mut self, graph: &mut DotGraph) -> Result<()> {
        let first = self.expect_id()?;

        if matches!(first.as_str(), "graph" | "node" | "edge")
            && matches!(self.peek(), Some(Token::LBracket))
        {
            self.attr_list()?;
            return Ok(());
        }

        graph.touch_node(&first);

        // edge chain: a -> b -> c [attrs]; every hop gets the attrs
        let mut chain = vec![first];
        while matches!(self.peek(), Some(Token::Arrow)) {
            self.bump();
            let next = self.expect_id()?;
            graph.touch_node(&next);
            chain.push(next);
        }

        let attrs = if matches!(self.peek(), Some(Token::LBracket)) {
            self.attr_list()?
        } else {
            Vec::new()
        };

        for pair in chain.windows(2) {
            graph.edges.push(DotEdge {
                tail: pair[0].clone(),
                head: pair[1].clone(),
                attrs: attrs.clone(),
            });
        }
        Ok(())
    }
}

/// Parse a `.dot` topology from text.
pub fn parse(input: &str) -> Result<DotGraph> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let graph = parser.graph()?;
    if parser.peek().is_some() {
        return Err(parser.err("trailing input after closing '}'"));
    }
    Ok(graph)
}

/// Quote an identifier for .dot output. Bare identifiers pass through.
pub(crate) fn quote(id: &str) -> String {
    let bare = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if bare {
        id.to_string()
    } else {
        format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

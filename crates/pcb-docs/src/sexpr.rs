/// S-expression parser for KiCad design files.
///
/// Grammar:
///   sexpr  = '(' item* ')'
///   item   = sexpr | number | string | symbol
///   number = '-'? [0-9]+ ('.' [0-9]+)?     (must end at a delimiter)
///   string = '"' [^"]* '"'                 (no escape handling)
///   symbol = [^ \t\n\r()]+
///
/// The parser keeps an explicit stack of open lists instead of recursing,
/// so deeply nested boards cannot overflow the call stack.
use crate::error::DocsError;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Normalize a float to an integer when it has no fractional part.
    pub fn from_f64(v: f64) -> Self {
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Number::Int(v as i64)
        } else {
            Number::Float(v)
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl Serialize for Number {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            Number::Int(i) => s.serialize_i64(i),
            Number::Float(f) => s.serialize_f64(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    List(Vec<SExpr>),
    Atom(String),
    Number(Number),
    Str(String),
}

impl SExpr {
    /// Get the first atom in a list (the "tag" or "name").
    pub fn tag(&self) -> Option<&str> {
        match self {
            SExpr::List(items) => items.first().and_then(|item| match item {
                SExpr::Atom(s) => Some(s.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Get list children (everything after the tag).
    pub fn children(&self) -> &[SExpr] {
        match self {
            SExpr::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// Get all items including tag.
    pub fn items(&self) -> &[SExpr] {
        match self {
            SExpr::List(items) => items,
            _ => &[],
        }
    }

    /// Find a child list with the given tag.
    pub fn find(&self, tag: &str) -> Option<&SExpr> {
        self.children().iter().find(|c| c.tag() == Some(tag))
    }

    /// Find all child lists with the given tag.
    pub fn find_all(&self, tag: &str) -> Vec<&SExpr> {
        self.children()
            .iter()
            .filter(|c| c.tag() == Some(tag))
            .collect()
    }

    /// Textual form of a leaf: symbols and strings verbatim, numbers formatted.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SExpr::Atom(s) | SExpr::Str(s) => Some(s.clone()),
            SExpr::Number(n) => Some(n.to_string()),
            SExpr::List(_) => None,
        }
    }

    /// Borrowed text of a symbol or quoted string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SExpr::Atom(s) | SExpr::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            SExpr::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the value of a simple (tag value) node.
    pub fn value(&self, tag: &str) -> Option<String> {
        self.find(tag)
            .and_then(|node| node.children().first())
            .and_then(SExpr::as_text)
    }

    /// Get the nth child as borrowed text (0-indexed from children, i.e. after the tag).
    pub fn atom_at(&self, index: usize) -> Option<&str> {
        self.children().get(index).and_then(SExpr::as_str)
    }

    /// Get the nth child as f64.
    pub fn f64_at(&self, index: usize) -> Option<f64> {
        match self.children().get(index)? {
            SExpr::Number(n) => Some(n.as_f64()),
            other => other.as_str().and_then(|s| s.parse().ok()),
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(s) => f.write_str(s),
            SExpr::Number(n) => write!(f, "{n}"),
            SExpr::Str(s) => write!(f, "\"{s}\""),
            SExpr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Number(Number),
    Str(&'a str),
    Symbol(&'a str),
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'(' || b == b')'
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Length of a `-?\d+(\.\d+)?` prefix at `start`, if it spans the whole run.
    fn number_len(&self, start: usize) -> Option<usize> {
        let bytes = self.input.as_bytes();
        let mut i = start;
        if bytes.get(i) == Some(&b'-') {
            i += 1;
        }
        let int_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == int_start {
            return None;
        }
        if bytes.get(i) == Some(&b'.') {
            let frac_start = i + 1;
            let mut j = frac_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > frac_start {
                i = j;
            }
        }
        match bytes.get(i) {
            None => Some(i - start),
            Some(&b) if is_delimiter(b) => Some(i - start),
            _ => None,
        }
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        let bytes = self.input.as_bytes();
        let start = self.pos;
        let first = *bytes.get(start)?;

        match first {
            b'(' => {
                self.pos += 1;
                return Some(Token::Open);
            }
            b')' => {
                self.pos += 1;
                return Some(Token::Close);
            }
            _ => {}
        }

        if let Some(len) = self.number_len(start) {
            self.pos += len;
            let text = &self.input[start..self.pos];
            let number = match text.parse::<i64>() {
                Ok(i) => Number::Int(i),
                Err(_) => Number::from_f64(text.parse::<f64>().unwrap_or(0.0)),
            };
            return Some(Token::Number(number));
        }

        if first == b'"' {
            if let Some(end) = self.input[start + 1..].find('"') {
                self.pos = start + 1 + end + 1;
                return Some(Token::Str(&self.input[start + 1..start + 1 + end]));
            }
        }

        while self.pos < bytes.len() && !is_delimiter(bytes[self.pos]) {
            self.pos += 1;
        }
        Some(Token::Symbol(&self.input[start..self.pos]))
    }
}

/// Parse an S-expression document and return its first top-level element.
pub fn parse(input: &str) -> Result<SExpr, DocsError> {
    let mut tokenizer = Tokenizer::new(input);
    let mut stack: Vec<Vec<SExpr>> = Vec::new();
    let mut out: Vec<SExpr> = Vec::new();

    while let Some(token) = tokenizer.next_token() {
        match token {
            Token::Open => {
                stack.push(std::mem::take(&mut out));
            }
            Token::Close => {
                let parent = stack.pop().ok_or_else(|| {
                    DocsError::Structural(format!(
                        "unexpected ')' at byte {}",
                        tokenizer.pos - 1
                    ))
                })?;
                let closed = std::mem::replace(&mut out, parent);
                out.push(SExpr::List(closed));
            }
            Token::Number(n) => out.push(SExpr::Number(n)),
            Token::Str(s) => out.push(SExpr::Str(s.to_string())),
            Token::Symbol(s) => out.push(SExpr::Atom(s.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(DocsError::Structural(format!(
            "{} unclosed '(' at end of input",
            stack.len()
        )));
    }

    out.into_iter()
        .next()
        .ok_or_else(|| DocsError::Structural("empty input".to_string()))
}

//! Parser for Python literal reprs.
//!
//! Expression-judged tests compare the `repr` printed by a probe with the
//! test's expected text by value. Both sides go through [`parse`]; the grader
//! process never evaluates candidate-controlled text as code.

use std::fmt;
use thiserror::Error;

/// Absolute tolerance for float comparisons
pub const FLOAT_TOLERANCE: f64 = 0.01;

/// Deepest container nesting accepted; reprs are candidate-controlled
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    List(Vec<PyValue>),
    Tuple(Vec<PyValue>),
    Set(Vec<PyValue>),
    Dict(Vec<(PyValue, PyValue)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for PyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[PyValue]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            PyValue::None => write!(f, "None"),
            PyValue::Bool(true) => write!(f, "True"),
            PyValue::Bool(false) => write!(f, "False"),
            PyValue::Int(i) => write!(f, "{}", i),
            PyValue::Float(x) => write!(f, "{:?}", x),
            PyValue::Str(s) => write!(f, "{:?}", s),
            PyValue::List(items) => {
                write!(f, "[")?;
                join(f, items)?;
                write!(f, "]")
            }
            PyValue::Tuple(items) => {
                write!(f, "(")?;
                join(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            PyValue::Set(items) if items.is_empty() => write!(f, "set()"),
            PyValue::Set(items) => {
                write!(f, "{{")?;
                join(f, items)?;
                write!(f, "}}")
            }
            PyValue::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Parse a complete literal; trailing text is an error
pub fn parse(text: &str) -> Result<PyValue, LiteralError> {
    let mut parser = Parser {
        chars: text.char_indices().collect(),
        pos: 0,
        len: text.len(),
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn error(&self, message: &str) -> LiteralError {
        LiteralError {
            offset: self.offset(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<PyValue, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = self.item();
        self.depth -= 1;
        value
    }

    fn item(&mut self) -> Result<PyValue, LiteralError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('[') => {
                self.pos += 1;
                Ok(PyValue::List(self.sequence(']')?.0))
            }
            Some('(') => {
                self.pos += 1;
                let (items, trailing_comma) = self.sequence(')')?;
                // `(x)` is just x; `(x,)` is a one-tuple
                if items.len() == 1 && !trailing_comma {
                    Ok(items.into_iter().next().unwrap_or(PyValue::None))
                } else {
                    Ok(PyValue::Tuple(items))
                }
            }
            Some('{') => {
                self.pos += 1;
                self.braced()
            }
            Some('\'') | Some('"') => Ok(PyValue::Str(self.string()?)),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.word(),
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    /// Comma-separated values up to `close`; reports a trailing comma
    fn sequence(&mut self, close: char) -> Result<(Vec<PyValue>, bool), LiteralError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = self.eat(',');
            if !trailing_comma {
                if self.eat(close) {
                    return Ok((items, false));
                }
                return Err(self.error("expected ',' or closing bracket"));
            }
        }
    }

    fn braced(&mut self) -> Result<PyValue, LiteralError> {
        if self.eat('}') {
            return Ok(PyValue::Dict(Vec::new()));
        }

        let first = self.value()?;
        if self.eat(':') {
            let mut entries = vec![(first, self.value()?)];
            loop {
                if !self.eat(',') {
                    break;
                }
                if self.eat('}') {
                    return Ok(PyValue::Dict(entries));
                }
                let key = self.value()?;
                if !self.eat(':') {
                    return Err(self.error("expected ':' in dict"));
                }
                entries.push((key, self.value()?));
            }
            if self.eat('}') {
                Ok(PyValue::Dict(entries))
            } else {
                Err(self.error("expected '}'"))
            }
        } else {
            let mut items = vec![first];
            if self.eat(',') {
                let (rest, _) = self.sequence('}')?;
                items.extend(rest);
            } else if !self.eat('}') {
                return Err(self.error("expected ',' or '}'"));
            }
            Ok(PyValue::Set(items))
        }
    }

    fn word(&mut self) -> Result<PyValue, LiteralError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();

        match word.as_str() {
            "True" => Ok(PyValue::Bool(true)),
            "False" => Ok(PyValue::Bool(false)),
            "None" => Ok(PyValue::None),
            "inf" => Ok(PyValue::Float(f64::INFINITY)),
            "nan" => Ok(PyValue::Float(f64::NAN)),
            "set" if self.eat('(') && self.eat(')') => Ok(PyValue::Set(Vec::new())),
            // String prefixes: r'..', u'..'
            "r" | "R" | "u" | "U" if matches!(self.peek(), Some('\'') | Some('"')) => {
                let raw = word.eq_ignore_ascii_case("r");
                if raw {
                    Ok(PyValue::Str(self.raw_string()?))
                } else {
                    Ok(PyValue::Str(self.string()?))
                }
            }
            _ => Err(LiteralError {
                offset: self.chars[start].0,
                message: format!("unknown name '{}'", word),
            }),
        }
    }

    fn number(&mut self) -> Result<PyValue, LiteralError> {
        let start = self.pos;
        let mut text = String::new();
        if let Some(sign) = self.peek().filter(|c| *c == '-' || *c == '+') {
            text.push(sign);
            self.pos += 1;
            self.skip_ws();
        }
        if self.peek().map_or(false, |c| c.is_alphabetic()) {
            // -inf
            return match self.word()? {
                PyValue::Float(x) if text == "-" => Ok(PyValue::Float(-x)),
                PyValue::Float(x) => Ok(PyValue::Float(x)),
                _ => Err(LiteralError {
                    offset: self.chars[start].0,
                    message: "invalid number".to_string(),
                }),
            };
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.pos += 1;
                    if let Some(sign) = self.peek().filter(|c| *c == '-' || *c == '+') {
                        text.push(sign);
                    } else {
                        continue;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }

        let invalid = || LiteralError {
            offset: self.chars[start].0,
            message: format!("invalid number '{}'", text),
        };

        if is_float {
            text.parse::<f64>().map(PyValue::Float).map_err(|_| invalid())
        } else {
            match text.parse::<i128>() {
                Ok(i) => Ok(PyValue::Int(i)),
                // Beyond i128: keep the magnitude
                Err(_) => text.parse::<f64>().map(PyValue::Float).map_err(|_| invalid()),
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' => out.push('\\'),
                        '\'' => out.push('\''),
                        '"' => out.push('"'),
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        'U' => out.push(self.hex_escape(8)?),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn raw_string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hex escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }
}

fn as_number(value: &PyValue) -> Option<f64> {
    match value {
        PyValue::Int(i) => Some(*i as f64),
        PyValue::Float(x) => Some(*x),
        PyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Value equality with Python's numeric tower and float tolerance
pub fn values_equal(a: &PyValue, b: &PyValue) -> bool {
    match (a, b) {
        (PyValue::Int(x), PyValue::Int(y)) => x == y,
        (PyValue::Bool(x), PyValue::Bool(y)) => x == y,
        (PyValue::Str(x), PyValue::Str(y)) => x == y,
        (PyValue::None, PyValue::None) => true,
        (PyValue::List(x), PyValue::List(y)) | (PyValue::Tuple(x), PyValue::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (PyValue::Set(x), PyValue::Set(y)) => {
            x.iter().all(|p| y.iter().any(|q| values_equal(p, q)))
                && y.iter().all(|q| x.iter().any(|p| values_equal(p, q)))
        }
        (PyValue::Dict(x), PyValue::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .find(|(k2, _)| values_equal(k, k2))
                        .map_or(false, |(_, v2)| values_equal(v, v2))
                })
        }
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) if x.is_infinite() || y.is_infinite() => x == y,
            (Some(x), Some(y)) => (x - y).abs() < FLOAT_TOLERANCE,
            _ => false,
        },
    }
}

/// Whitespace- and quote-insensitive form for the string fallback
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
        .collect()
}

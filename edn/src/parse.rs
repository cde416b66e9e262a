// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A recursive-descent reader for the subset of EDN the store speaks: nil,
//! booleans, integers, doubles, strings, keywords, symbols, `#uuid`, `#inst`,
//! vectors, lists, maps, and sets. Commas are whitespace; `;` comments run to
//! the end of the line.

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use ordered_float::OrderedFloat;
use uuid::Uuid;

use symbols;
use types::Value;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new<T>(message: T, position: usize) -> ParseError where T: Into<String> {
        ParseError {
            message: message.into(),
            position: position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EDN parse error at {}: {}", self.position, self.message)
    }
}

impl Error for ParseError {
    fn description(&self) -> &str {
        "EDN parse error"
    }
}

pub type Result<T> = ::std::result::Result<T, ParseError>;

/// Parse exactly one EDN form; trailing input is an error.
pub fn value(input: &str) -> Result<Value> {
    let mut p = Parser::new(input);
    let v = p.parse_value()?;
    p.skip_whitespace();
    if !p.at_end() {
        return Err(ParseError::new("trailing input after form", p.pos));
    }
    Ok(v)
}

/// Parse a whitespace-separated sequence of EDN forms.
pub fn values(input: &str) -> Result<Vec<Value>> {
    let mut p = Parser::new(input);
    let mut out = vec![];
    loop {
        p.skip_whitespace();
        if p.at_end() {
            return Ok(out);
        }
        out.push(p.parse_value()?);
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || ".*+!-_?$%&=<>/#'".contains(c)
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Parser<'a> {
        Parser {
            input: input,
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.pos += c.len_utf8();
        }
        c
    }

    fn eat(&mut self, c: char) -> Result<()> {
        match self.peek() {
            Some(x) if x == c => {
                self.bump();
                Ok(())
            },
            Some(x) => Err(ParseError::new(format!("expected '{}', found '{}'", c, x), self.pos)),
            None => Err(ParseError::new(format!("expected '{}', found end of input", c), self.pos)),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                },
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                },
                _ => return,
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(ParseError::new("unexpected end of input", self.pos)),
            Some('[') => self.parse_seq('[', ']').map(Value::Vector),
            Some('(') => self.parse_seq('(', ')').map(Value::List),
            Some('{') => self.parse_map(),
            Some('"') => self.parse_string().map(Value::Text),
            Some(':') => self.parse_keyword().map(Value::Keyword),
            Some('#') => self.parse_tagged(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some(c) if (c == '-' || c == '+') && self.second_is_digit() => self.parse_number(),
            Some(c) if is_symbol_char(c) => self.parse_symbolic(),
            Some(c) => Err(ParseError::new(format!("unexpected character '{}'", c), self.pos)),
        }
    }

    fn second_is_digit(&self) -> bool {
        let mut cs = self.input[self.pos..].chars();
        cs.next();
        match cs.next() {
            Some(c) => c.is_ascii_digit(),
            None => false,
        }
    }

    fn parse_seq(&mut self, open: char, close: char) -> Result<Vec<Value>> {
        self.eat(open)?;
        let mut items = vec![];
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                },
                Some(_) => items.push(self.parse_value()?),
                None => return Err(ParseError::new(format!("unterminated '{}'", open), self.pos)),
            }
        }
    }

    fn parse_map(&mut self) -> Result<Value> {
        let start = self.pos;
        let items = self.parse_seq('{', '}')?;
        if items.len() % 2 != 0 {
            return Err(ParseError::new("map literal with odd number of forms", start));
        }
        let mut m = BTreeMap::new();
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            m.insert(k, v);
        }
        Ok(Value::Map(m))
    }

    fn parse_string(&mut self) -> Result<String> {
        self.eat('"')?;
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new("unterminated string", self.pos)),
                Some('"') => return Ok(s),
                Some('\\') => {
                    match self.bump() {
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('r') => s.push('\r'),
                        Some(c) => return Err(ParseError::new(format!("unknown escape '\\{}'", c), self.pos)),
                        None => return Err(ParseError::new("unterminated escape", self.pos)),
                    }
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn parse_symbol_text(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_symbol_char(c) {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(ParseError::new("expected a symbol", start));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_keyword(&mut self) -> Result<symbols::Keyword> {
        self.eat(':')?;
        let start = self.pos;
        let text = self.parse_symbol_text()?;
        match text.find('/') {
            None => Ok(symbols::Keyword::plain(text)),
            Some(0) => Err(ParseError::new("keyword with empty namespace", start)),
            Some(i) if i == text.len() - 1 => Err(ParseError::new("keyword with empty name", start)),
            Some(i) => Ok(symbols::Keyword::namespaced(&text[..i], &text[i + 1..])),
        }
    }

    fn parse_symbolic(&mut self) -> Result<Value> {
        let text = self.parse_symbol_text()?;
        match text.as_str() {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Ok(Value::PlainSymbol(symbols::PlainSymbol::plain(text))),
        }
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        if let Some(c) = self.peek() {
            if c == '-' || c == '+' {
                self.bump();
            }
        }
        let mut is_double = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' || c == 'e' || c == 'E' {
                is_double = true;
                self.bump();
                if c != '.' {
                    // Exponent sign.
                    if let Some(s) = self.peek() {
                        if s == '-' || s == '+' {
                            self.bump();
                        }
                    }
                }
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        if is_double {
            f64::from_str(text)
                .map(|d| Value::Double(OrderedFloat(d)))
                .map_err(|e| ParseError::new(format!("bad double '{}': {}", text, e), start))
        } else {
            i64::from_str(text)
                .map(Value::Integer)
                .map_err(|e| ParseError::new(format!("bad integer '{}': {}", text, e), start))
        }
    }

    fn parse_tagged(&mut self) -> Result<Value> {
        let start = self.pos;
        self.eat('#')?;
        match self.peek() {
            Some('{') => {
                let items = self.parse_seq('{', '}')?;
                Ok(Value::Set(items.into_iter().collect::<BTreeSet<Value>>()))
            },
            _ => {
                let tag = self.parse_symbol_text()?;
                match tag.as_str() {
                    "uuid" => {
                        self.skip_whitespace();
                        let text = self.parse_string()?;
                        Uuid::parse_str(&text)
                            .map(Value::Uuid)
                            .map_err(|e| ParseError::new(format!("bad #uuid: {}", e), start))
                    },
                    "inst" => {
                        self.skip_whitespace();
                        let text = self.parse_string()?;
                        DateTime::parse_from_rfc3339(&text)
                            .map(|t| Value::Instant(t.with_timezone(&Utc)))
                            .map_err(|e| ParseError::new(format!("bad #inst: {}", e), start))
                    },
                    _ => Err(ParseError::new(format!("unknown tagged literal #{}", tag), start)),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms() {
        assert_eq!(Value::Nil, value("nil").unwrap());
        assert_eq!(Value::Boolean(true), value("true").unwrap());
        assert_eq!(Value::Integer(-42), value("-42").unwrap());
        assert_eq!(Value::Double(OrderedFloat(1.5)), value("1.5").unwrap());
        assert_eq!(Value::Text("hi \"there\"".to_string()), value(r#""hi \"there\"""#).unwrap());
        assert_eq!(Value::Keyword(symbols::Keyword::namespaced("db", "ident")), value(":db/ident").unwrap());
        assert_eq!(Value::PlainSymbol(symbols::PlainSymbol::plain("?x")), value("?x").unwrap());
    }

    #[test]
    fn test_collections() {
        let v = value("[1 :a/b \"s\" [2.5]]").unwrap();
        assert_eq!(Value::Vector(vec![
            Value::Integer(1),
            Value::Keyword(symbols::Keyword::namespaced("a", "b")),
            Value::Text("s".to_string()),
            Value::Vector(vec![Value::Double(OrderedFloat(2.5))]),
        ]), v);

        let m = value("{:a 1, :b 2}").unwrap();
        let mut expected = BTreeMap::new();
        expected.insert(Value::Keyword(symbols::Keyword::plain("a")), Value::Integer(1));
        expected.insert(Value::Keyword(symbols::Keyword::plain("b")), Value::Integer(2));
        assert_eq!(Value::Map(expected), m);
    }

    #[test]
    fn test_tagged() {
        let u = value("#uuid \"550e8400-e29b-41d4-a716-446655440000\"").unwrap();
        match u {
            Value::Uuid(_) => {},
            x => panic!("expected uuid, got {:?}", x),
        }
        let t = value("#inst \"2018-01-01T11:00:00.000Z\"").unwrap();
        match t {
            Value::Instant(_) => {},
            x => panic!("expected instant, got {:?}", x),
        }
        let s = value("#{1 2 2 3}").unwrap();
        match s {
            Value::Set(items) => assert_eq!(3, items.len()),
            x => panic!("expected set, got {:?}", x),
        }
    }

    #[test]
    fn test_comments_and_commas() {
        let v = values("[1, 2] ; trailing\n:done").unwrap();
        assert_eq!(2, v.len());
    }

    #[test]
    fn test_display_parses_back() {
        let source = "[{:a 1} #{:x} (f ?v) -3 2.5 \"s\"]";
        let v = value(source).unwrap();
        assert_eq!(v, value(&v.to_string()).unwrap());
    }

    #[test]
    fn test_errors() {
        assert!(value("[1 2").is_err());
        assert!(value("{:a}").is_err());
        assert!(value("1 2").is_err());
    }
}

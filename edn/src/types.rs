// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::fmt;

use chrono::{
    DateTime,
    TimeZone,
    Utc,
};
use ordered_float::OrderedFloat;
use uuid::Uuid;

use symbols;

/// An EDN value.
///
/// Maps and sets use ordered collections so that `Value` itself is `Ord` and
/// usable as a map key. Doubles are wrapped in `OrderedFloat` for the same
/// reason: NaN is banished to a total order.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Double(OrderedFloat<f64>),
    Text(String),
    Uuid(Uuid),
    Instant(DateTime<Utc>),
    Keyword(symbols::Keyword),
    PlainSymbol(symbols::PlainSymbol),
    Vector(Vec<Value>),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        match *self {
            Value::Nil => true,
            _ => false,
        }
    }

    pub fn is_keyword(&self) -> bool {
        match *self {
            Value::Keyword(_) => true,
            _ => false,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&String> {
        match *self {
            Value::Text(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&symbols::Keyword> {
        match *self {
            Value::Keyword(ref k) => Some(k),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&symbols::PlainSymbol> {
        match *self {
            Value::PlainSymbol(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vec<Value>> {
        match *self {
            Value::Vector(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match *self {
            Value::List(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match *self {
            Value::Map(ref m) => Some(m),
            _ => None,
        }
    }
}

impl From<symbols::Keyword> for Value {
    fn from(k: symbols::Keyword) -> Value {
        Value::Keyword(k)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Integer(i)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Value {
        Value::Text(s.to_string())
    }
}

fn write_double(f: &mut fmt::Formatter, d: f64) -> fmt::Result {
    // Print so that the parser round-trips: a double never renders as an
    // integer literal.
    let s = format!("{}", d);
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        write!(f, "{}", s)
    } else {
        write!(f, "{}.0", s)
    }
}

fn write_text(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

fn write_seq(f: &mut fmt::Formatter, open: &str, vs: &mut dyn Iterator<Item = &Value>, close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    let mut first = true;
    for v in vs {
        if !first {
            write!(f, " ")?;
        }
        first = false;
        write!(f, "{}", v)?;
    }
    write!(f, "{}", close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(OrderedFloat(d)) => write_double(f, d),
            Value::Text(ref s) => write_text(f, s),
            Value::Uuid(ref u) => write!(f, "#uuid \"{}\"", u.to_hyphenated()),
            Value::Instant(ref t) => write!(f, "#inst \"{}\"", t.to_rfc3339()),
            Value::Keyword(ref k) => write!(f, "{}", k),
            Value::PlainSymbol(ref s) => write!(f, "{}", s),
            Value::Vector(ref vs) => write_seq(f, "[", &mut vs.iter(), "]"),
            Value::List(ref vs) => write_seq(f, "(", &mut vs.iter(), ")"),
            Value::Set(ref vs) => write_seq(f, "#{", &mut vs.iter(), "}"),
            Value::Map(ref m) => {
                write!(f, "{{")?;
                let mut first = true;
                for (k, v) in m {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            },
        }
    }
}

/// Instants are persisted as microseconds since the epoch.
pub trait ToMicros {
    fn to_micros(&self) -> i64;
}

impl ToMicros for DateTime<Utc> {
    fn to_micros(&self) -> i64 {
        (self.timestamp() * 1_000_000) + i64::from(self.timestamp_subsec_micros())
    }
}

pub trait FromMicros {
    fn from_micros(ts: i64) -> Self;
}

impl FromMicros for DateTime<Utc> {
    fn from_micros(ts: i64) -> Self {
        Utc.timestamp(ts.div_euclid(1_000_000), (ts.rem_euclid(1_000_000) as u32) * 1_000)
    }
}

pub trait FromMillis {
    fn from_millis(ts: i64) -> Self;
}

impl FromMillis for DateTime<Utc> {
    fn from_millis(ts: i64) -> Self {
        Utc.timestamp(ts.div_euclid(1_000), (ts.rem_euclid(1_000) as u32) * 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trippable() {
        assert_eq!("nil", Value::Nil.to_string());
        assert_eq!("1.0", Value::Double(OrderedFloat(1.0)).to_string());
        assert_eq!("1.25", Value::Double(OrderedFloat(1.25)).to_string());
        assert_eq!("\"a\\\"b\"", Value::Text("a\"b".to_string()).to_string());
        assert_eq!("[1 2 3]", Value::Vector(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]).to_string());
    }

    #[test]
    fn test_micros_round_trip() {
        let t: DateTime<Utc> = Utc.timestamp(1_493_399_581, 314_000_000);
        let micros = t.to_micros();
        assert_eq!(t, DateTime::<Utc>::from_micros(micros));
    }
}

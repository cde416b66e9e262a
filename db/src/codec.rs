// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Order-preserving byte encoding of typed values.
//!
//! Every value encodes as a type tag followed by a payload whose unsigned
//! byte order agrees with the value's semantic order, so the substrate's
//! plain lexicographic comparator sorts index keys correctly:
//!
//! - integers, refs and instants: big-endian two's-complement with the sign
//!   bit flipped;
//! - doubles: IEEE-754 bits, all bits flipped for negatives, sign bit
//!   flipped for positives;
//! - strings, keywords, symbols and byte arrays: content with `0x00` escaped
//!   as `0x00 0xFF`, closed by a `0x00 0x00` terminator;
//! - tuples: component count, then the concatenated component encodings
//!   (component encodings are prefix-free, so concatenation compares
//!   component-wise); an absent component carries the `nil` tag and sorts
//!   lowest.
//!
//! Values whose encoding exceeds `MAX_KEY_VALUE_LEN` move out of line: the
//! key keeps the tag (giant bit set), an escaped prefix of the encoding, and
//! the SHA-1 of the whole encoding; the full bytes live in the `giants` dbi
//! under that hash.

use chrono::{
    DateTime,
    Utc,
};
use ordered_float::OrderedFloat;
use sha1::Sha1;
use uuid::Uuid;

use datalith_core::{
    TypedValue,
};
use edn::{
    FromMicros,
    ToMicros,
};
use edn::symbols::{
    Keyword,
    PlainSymbol,
};
use errors::{
    DbErrorKind,
    Result,
};

pub const TAG_NIL: u8 = 0x00;
pub const TAG_REF: u8 = 0x10;
pub const TAG_BOOLEAN: u8 = 0x20;
pub const TAG_LONG: u8 = 0x30;
pub const TAG_DOUBLE: u8 = 0x40;
pub const TAG_INSTANT: u8 = 0x50;
pub const TAG_STRING: u8 = 0x60;
pub const TAG_KEYWORD: u8 = 0x70;
pub const TAG_SYMBOL: u8 = 0x80;
pub const TAG_UUID: u8 = 0x90;
pub const TAG_BYTES: u8 = 0xA0;
pub const TAG_TUPLE: u8 = 0xB0;

/// Set on the tag byte when the value is stored out of line.
pub const GIANT_BIT: u8 = 0x01;

/// Longest value encoding kept inline in an index key. LMDB caps keys at 511
/// bytes; the key still has to fit two entids next to the value.
pub const MAX_KEY_VALUE_LEN: usize = 365;

/// How much of an oversize encoding stays in the key, before escaping, to
/// keep giants roughly sorted among themselves.
const GIANT_PREFIX_LEN: usize = 64;

const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

pub fn push_i64(buf: &mut Vec<u8>, value: i64) {
    let flipped = (value as u64) ^ SIGN_MASK;
    buf.extend_from_slice(&flipped.to_be_bytes());
}

pub fn read_i64(buf: &[u8]) -> Result<(i64, &[u8])> {
    if buf.len() < 8 {
        bail!(DbErrorKind::CorruptValue("truncated i64".to_string()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    let flipped = u64::from_be_bytes(raw) ^ SIGN_MASK;
    Ok((flipped as i64, &buf[8..]))
}

fn push_f64(buf: &mut Vec<u8>, value: f64) {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_MASK != 0 {
        !bits
    } else {
        bits | SIGN_MASK
    };
    buf.extend_from_slice(&ordered.to_be_bytes());
}

fn read_f64(buf: &[u8]) -> Result<(f64, &[u8])> {
    if buf.len() < 8 {
        bail!(DbErrorKind::CorruptValue("truncated f64".to_string()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    let ordered = u64::from_be_bytes(raw);
    let bits = if ordered & SIGN_MASK != 0 {
        ordered ^ SIGN_MASK
    } else {
        !ordered
    };
    Ok((f64::from_bits(bits), &buf[8..]))
}

/// Append `bytes` with `0x00` escaped as `0x00 0xFF`, closed by `0x00 0x00`.
/// The escape keeps embedded zero bytes sorting and round-tripping, and the
/// terminator makes the encoding prefix-free.
fn push_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(b);
        }
    }
    buf.push(0x00);
    buf.push(0x00);
}

fn read_escaped(buf: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut out = vec![];
    let mut i = 0;
    loop {
        match (buf.get(i), buf.get(i + 1)) {
            (Some(&0x00), Some(&0x00)) => return Ok((out, &buf[i + 2..])),
            (Some(&0x00), Some(&0xFF)) => {
                out.push(0x00);
                i += 2;
            },
            (Some(&b), _) => {
                out.push(b);
                i += 1;
            },
            (None, _) => bail!(DbErrorKind::CorruptValue("unterminated byte string".to_string())),
        }
    }
}

/// Append the full, unbounded, order-preserving encoding of `value`.
pub fn push_value(buf: &mut Vec<u8>, value: &TypedValue) {
    match *value {
        TypedValue::Ref(e) => {
            buf.push(TAG_REF);
            push_i64(buf, e);
        },
        TypedValue::Boolean(b) => {
            buf.push(TAG_BOOLEAN);
            buf.push(if b { 1 } else { 0 });
        },
        TypedValue::Long(l) => {
            buf.push(TAG_LONG);
            push_i64(buf, l);
        },
        TypedValue::Double(OrderedFloat(d)) => {
            buf.push(TAG_DOUBLE);
            push_f64(buf, d);
        },
        TypedValue::Instant(ref t) => {
            buf.push(TAG_INSTANT);
            push_i64(buf, t.to_micros());
        },
        TypedValue::String(ref s) => {
            buf.push(TAG_STRING);
            push_escaped(buf, s.as_bytes());
        },
        TypedValue::Keyword(ref k) => {
            buf.push(TAG_KEYWORD);
            push_escaped(buf, keyword_text(k).as_bytes());
        },
        TypedValue::Symbol(ref s) => {
            buf.push(TAG_SYMBOL);
            push_escaped(buf, s.0.as_bytes());
        },
        TypedValue::Uuid(ref u) => {
            buf.push(TAG_UUID);
            buf.extend_from_slice(u.as_bytes());
        },
        TypedValue::Bytes(ref b) => {
            buf.push(TAG_BYTES);
            push_escaped(buf, b);
        },
        TypedValue::Tuple(ref components) => {
            buf.push(TAG_TUPLE);
            buf.push(components.len() as u8);
            for component in components {
                match component {
                    &Some(ref v) => push_value(buf, v),
                    &None => buf.push(TAG_NIL),
                }
            }
        },
    }
}

fn keyword_text(k: &Keyword) -> String {
    match k.namespace() {
        Some(ns) => format!("{}/{}", ns, k.name()),
        None => k.name().to_string(),
    }
}

fn keyword_from_text(text: &str) -> Keyword {
    match text.find('/') {
        Some(i) if i > 0 && i < text.len() - 1 => Keyword::namespaced(&text[..i], &text[i + 1..]),
        _ => Keyword::plain(text),
    }
}

/// Decode one value from the front of `buf`. Never sees a giant tag: datom
/// payloads carry the unbounded form.
pub fn read_value(buf: &[u8]) -> Result<(TypedValue, &[u8])> {
    let tag = match buf.first() {
        Some(&t) => t,
        None => bail!(DbErrorKind::CorruptValue("empty value".to_string())),
    };
    let rest = &buf[1..];
    match tag {
        TAG_REF => {
            let (e, rest) = read_i64(rest)?;
            Ok((TypedValue::Ref(e), rest))
        },
        TAG_BOOLEAN => {
            match rest.first() {
                Some(&b) => Ok((TypedValue::Boolean(b != 0), &rest[1..])),
                None => bail!(DbErrorKind::CorruptValue("truncated boolean".to_string())),
            }
        },
        TAG_LONG => {
            let (l, rest) = read_i64(rest)?;
            Ok((TypedValue::Long(l), rest))
        },
        TAG_DOUBLE => {
            let (d, rest) = read_f64(rest)?;
            Ok((TypedValue::Double(OrderedFloat(d)), rest))
        },
        TAG_INSTANT => {
            let (micros, rest) = read_i64(rest)?;
            Ok((TypedValue::Instant(DateTime::<Utc>::from_micros(micros)), rest))
        },
        TAG_STRING => {
            let (bytes, rest) = read_escaped(rest)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| DbErrorKind::CorruptValue(format!("bad utf-8 in string: {}", e)))?;
            Ok((TypedValue::String(s), rest))
        },
        TAG_KEYWORD => {
            let (bytes, rest) = read_escaped(rest)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| DbErrorKind::CorruptValue(format!("bad utf-8 in keyword: {}", e)))?;
            Ok((TypedValue::Keyword(keyword_from_text(&s)), rest))
        },
        TAG_SYMBOL => {
            let (bytes, rest) = read_escaped(rest)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| DbErrorKind::CorruptValue(format!("bad utf-8 in symbol: {}", e)))?;
            Ok((TypedValue::Symbol(PlainSymbol::plain(s)), rest))
        },
        TAG_UUID => {
            if rest.len() < 16 {
                bail!(DbErrorKind::CorruptValue("truncated uuid".to_string()));
            }
            let u = Uuid::from_slice(&rest[..16])
                .map_err(|e| DbErrorKind::CorruptValue(format!("bad uuid: {}", e)))?;
            Ok((TypedValue::Uuid(u), &rest[16..]))
        },
        TAG_BYTES => {
            let (bytes, rest) = read_escaped(rest)?;
            Ok((TypedValue::Bytes(bytes), rest))
        },
        TAG_TUPLE => {
            let n = match rest.first() {
                Some(&n) => n as usize,
                None => bail!(DbErrorKind::CorruptValue("truncated tuple".to_string())),
            };
            let mut rest = &rest[1..];
            let mut components = Vec::with_capacity(n);
            for _ in 0..n {
                if rest.first() == Some(&TAG_NIL) {
                    components.push(None);
                    rest = &rest[1..];
                } else {
                    let (v, r) = read_value(rest)?;
                    components.push(Some(v));
                    rest = r;
                }
            }
            Ok((TypedValue::Tuple(components), rest))
        },
        t => bail!(DbErrorKind::CorruptValue(format!("unknown value tag {:#x}", t))),
    }
}

/// A value as it appears in an index key: inline if small, else a reference
/// into the `giants` dbi.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyedValue {
    Inline(Vec<u8>),
    Giant {
        key_bytes: Vec<u8>,
        hash: [u8; 20],
        full: Vec<u8>,
    },
}

impl KeyedValue {
    pub fn key_bytes(&self) -> &[u8] {
        match *self {
            KeyedValue::Inline(ref b) => b,
            KeyedValue::Giant { ref key_bytes, .. } => key_bytes,
        }
    }
}

/// Compute the key form of a value, spilling oversize encodings out of line.
pub fn keyed_value(value: &TypedValue) -> KeyedValue {
    let mut full = vec![];
    push_value(&mut full, value);
    if full.len() <= MAX_KEY_VALUE_LEN {
        return KeyedValue::Inline(full);
    }

    let mut hasher = Sha1::new();
    hasher.update(&full);
    let hash: [u8; 20] = hasher.digest().bytes();

    let mut key_bytes = vec![full[0] | GIANT_BIT];
    push_escaped(&mut key_bytes, &full[..GIANT_PREFIX_LEN]);
    key_bytes.extend_from_slice(&hash);

    KeyedValue::Giant {
        key_bytes: key_bytes,
        hash: hash,
        full: full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use datalith_core::TypedValue;

    fn enc(v: &TypedValue) -> Vec<u8> {
        let mut buf = vec![];
        push_value(&mut buf, v);
        buf
    }

    fn round_trip(v: &TypedValue) {
        let buf = enc(v);
        let (decoded, rest) = read_value(&buf).expect("decoded");
        assert_eq!(v, &decoded);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_round_trip() {
        round_trip(&TypedValue::Ref(65536));
        round_trip(&TypedValue::Boolean(true));
        round_trip(&TypedValue::Long(-42));
        round_trip(&TypedValue::Long(i64::min_value()));
        round_trip(&TypedValue::Long(i64::max_value()));
        round_trip(&TypedValue::Double(OrderedFloat(-1.5)));
        round_trip(&TypedValue::Instant(DateTime::<Utc>::from_micros(1_493_399_581_314_000)));
        round_trip(&TypedValue::typed_string("hello"));
        round_trip(&TypedValue::String("nul \u{0} inside".to_string()));
        round_trip(&TypedValue::Keyword(Keyword::namespaced("person", "name")));
        round_trip(&TypedValue::Symbol(PlainSymbol::plain("untuple")));
        round_trip(&TypedValue::Uuid(Uuid::nil()));
        round_trip(&TypedValue::Bytes(vec![0, 1, 2, 0, 255]));
        round_trip(&TypedValue::Tuple(vec![
            Some(TypedValue::typed_string("a")),
            None,
            Some(TypedValue::Long(3)),
        ]));
    }

    /// Encode, sort the byte arrays, and check the byte order matches the
    /// semantic order.
    fn assert_order_preserved(mut values: Vec<TypedValue>) {
        let mut encoded: Vec<Vec<u8>> = values.iter().map(enc).collect();
        encoded.sort();
        values.sort();
        let decoded: Vec<TypedValue> = encoded.iter()
            .map(|b| read_value(b).expect("decoded").0)
            .collect();
        assert_eq!(values, decoded);
    }

    #[test]
    fn test_long_order() {
        assert_order_preserved(vec![
            TypedValue::Long(0),
            TypedValue::Long(-1),
            TypedValue::Long(1),
            TypedValue::Long(i64::min_value()),
            TypedValue::Long(i64::max_value()),
            TypedValue::Long(255),
            TypedValue::Long(-256),
        ]);
    }

    #[test]
    fn test_double_order() {
        assert_order_preserved(vec![
            TypedValue::Double(OrderedFloat(0.0)),
            TypedValue::Double(OrderedFloat(-1.5)),
            TypedValue::Double(OrderedFloat(1.5)),
            TypedValue::Double(OrderedFloat(-1000.25)),
            TypedValue::Double(OrderedFloat(::std::f64::MAX)),
            TypedValue::Double(OrderedFloat(::std::f64::MIN)),
        ]);
    }

    #[test]
    fn test_string_order() {
        assert_order_preserved(vec![
            TypedValue::typed_string("a"),
            TypedValue::typed_string("ab"),
            TypedValue::typed_string("b"),
            TypedValue::typed_string(""),
            TypedValue::typed_string("aa"),
        ]);
    }

    #[test]
    fn test_tuple_order_is_component_wise() {
        assert_order_preserved(vec![
            TypedValue::Tuple(vec![Some(TypedValue::typed_string("a")), Some(TypedValue::Long(2))]),
            TypedValue::Tuple(vec![Some(TypedValue::typed_string("a")), Some(TypedValue::Long(1))]),
            TypedValue::Tuple(vec![Some(TypedValue::typed_string("b")), Some(TypedValue::Long(0))]),
            TypedValue::Tuple(vec![None, Some(TypedValue::Long(9))]),
        ]);
    }

    #[test]
    fn test_giant_values() {
        let small = TypedValue::typed_string("small");
        match keyed_value(&small) {
            KeyedValue::Inline(_) => {},
            x => panic!("expected inline, got {:?}", x),
        }

        let big = TypedValue::String("x".repeat(10_000));
        match keyed_value(&big) {
            KeyedValue::Giant { ref key_bytes, ref full, .. } => {
                assert!(key_bytes.len() < MAX_KEY_VALUE_LEN);
                let (decoded, _) = read_value(full).expect("decoded full form");
                assert_eq!(big, decoded);
            },
            x => panic!("expected giant, got {:?}", x),
        }
    }

    #[test]
    fn test_giant_is_deterministic() {
        let big = TypedValue::String("y".repeat(1_000));
        assert_eq!(keyed_value(&big), keyed_value(&big));
    }
}

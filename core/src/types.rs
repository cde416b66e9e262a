// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::fmt;

use chrono::{
    DateTime,
    Utc,
};
use ordered_float::OrderedFloat;
use uuid::Uuid;

use edn;
use edn::symbols::Keyword;

/// Entity identifiers are 64-bit integers. Attributes are entities, so an
/// attribute id is also an `Entid`.
pub type Entid = i64;

/// An entid that's already been validated against the schema or allocated by
/// the transactor. Used where "this is a real entity" is an invariant.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct KnownEntid(pub Entid);

impl From<KnownEntid> for Entid {
    fn from(k: KnownEntid) -> Entid {
        k.0
    }
}

/// The type of a value schema-attached to an attribute.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum ValueType {
    Ref,
    Boolean,
    Long,
    Double,
    Instant,
    String,
    Keyword,
    Symbol,
    Uuid,
    Bytes,
    Tuple,
}

impl ValueType {
    pub fn into_keyword(self) -> Keyword {
        Keyword::namespaced("db.type", match self {
            ValueType::Ref => "ref",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Instant => "instant",
            ValueType::String => "string",
            ValueType::Keyword => "keyword",
            ValueType::Symbol => "symbol",
            ValueType::Uuid => "uuid",
            ValueType::Bytes => "bytes",
            ValueType::Tuple => "tuple",
        })
    }

    pub fn from_keyword(k: &Keyword) -> Option<ValueType> {
        if k.namespace() != Some("db.type") {
            return None;
        }
        match k.name() {
            "ref" => Some(ValueType::Ref),
            "boolean" => Some(ValueType::Boolean),
            "long" => Some(ValueType::Long),
            "double" => Some(ValueType::Double),
            "instant" => Some(ValueType::Instant),
            "string" => Some(ValueType::String),
            "keyword" => Some(ValueType::Keyword),
            "symbol" => Some(ValueType::Symbol),
            "uuid" => Some(ValueType::Uuid),
            "bytes" => Some(ValueType::Bytes),
            "tuple" => Some(ValueType::Tuple),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_keyword())
    }
}

/// A typed value in the store.
///
/// Comparison dispatches on the type tag first, then on the payload, so a
/// heterogeneous collection of values still has a total order. Byte arrays
/// compare (and are equal) by content.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum TypedValue {
    Ref(Entid),
    Boolean(bool),
    Long(i64),
    Double(OrderedFloat<f64>),
    Instant(DateTime<Utc>),
    String(String),
    Keyword(Keyword),
    Symbol(edn::PlainSymbol),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    /// A tuple value. `None` marks an absent component of a composite tuple
    /// and sorts lowest.
    Tuple(Vec<Option<TypedValue>>),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match *self {
            TypedValue::Ref(_) => ValueType::Ref,
            TypedValue::Boolean(_) => ValueType::Boolean,
            TypedValue::Long(_) => ValueType::Long,
            TypedValue::Double(_) => ValueType::Double,
            TypedValue::Instant(_) => ValueType::Instant,
            TypedValue::String(_) => ValueType::String,
            TypedValue::Keyword(_) => ValueType::Keyword,
            TypedValue::Symbol(_) => ValueType::Symbol,
            TypedValue::Uuid(_) => ValueType::Uuid,
            TypedValue::Bytes(_) => ValueType::Bytes,
            TypedValue::Tuple(_) => ValueType::Tuple,
        }
    }

    pub fn typed_ref<E>(e: E) -> TypedValue where E: Into<Entid> {
        TypedValue::Ref(e.into())
    }

    pub fn typed_string(s: &str) -> TypedValue {
        TypedValue::String(s.to_string())
    }

    pub fn as_entid(&self) -> Option<Entid> {
        match *self {
            TypedValue::Ref(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match *self {
            TypedValue::Long(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match *self {
            TypedValue::Double(OrderedFloat(d)) => Some(d),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&String> {
        match *self {
            TypedValue::String(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match *self {
            TypedValue::Keyword(ref k) => Some(k),
            _ => None,
        }
    }

    /// Render as EDN. `Ref` renders as a bare integer: the caller maps refs
    /// to idents when it has a schema in hand.
    pub fn to_edn_value(&self) -> edn::Value {
        match *self {
            TypedValue::Ref(e) => edn::Value::Integer(e),
            TypedValue::Boolean(b) => edn::Value::Boolean(b),
            TypedValue::Long(l) => edn::Value::Integer(l),
            TypedValue::Double(d) => edn::Value::Double(d),
            TypedValue::Instant(t) => edn::Value::Instant(t),
            TypedValue::String(ref s) => edn::Value::Text(s.clone()),
            TypedValue::Keyword(ref k) => edn::Value::Keyword(k.clone()),
            TypedValue::Symbol(ref s) => edn::Value::PlainSymbol(s.clone()),
            TypedValue::Uuid(u) => edn::Value::Uuid(u),
            TypedValue::Bytes(ref b) => {
                edn::Value::Vector(b.iter().map(|x| edn::Value::Integer(i64::from(*x))).collect())
            },
            TypedValue::Tuple(ref vs) => {
                edn::Value::Vector(vs.iter()
                                     .map(|x| match x {
                                         &Some(ref v) => v.to_edn_value(),
                                         &None => edn::Value::Nil,
                                     })
                                     .collect())
            },
        }
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> TypedValue {
        TypedValue::Boolean(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> TypedValue {
        TypedValue::Long(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> TypedValue {
        TypedValue::Double(OrderedFloat(v))
    }
}

impl<'a> From<&'a str> for TypedValue {
    fn from(v: &'a str) -> TypedValue {
        TypedValue::String(v.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> TypedValue {
        TypedValue::String(v)
    }
}

impl From<Keyword> for TypedValue {
    fn from(v: Keyword) -> TypedValue {
        TypedValue::Keyword(v)
    }
}

impl From<KnownEntid> for TypedValue {
    fn from(v: KnownEntid) -> TypedValue {
        TypedValue::Ref(v.0)
    }
}

/// The uniqueness constraint of an attribute.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Unique {
    /// No two datoms may share this attribute's (a, v) pair.
    Value,
    /// As `Value`, and the attribute also upserts.
    Identity,
}

/// Attribute metadata, the unit of schema.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Attribute {
    pub value_type: Option<ValueType>,

    /// `true` for `:db.cardinality/many`.
    pub multival: bool,

    pub unique: Option<Unique>,

    /// Whether the attribute participates in the AVET index even without a
    /// uniqueness constraint.
    pub index: bool,

    /// Component refs are owned: retracting the parent entity retracts them.
    pub component: bool,

    pub no_history: bool,

    /// For a composite tuple attribute: the ordered source attributes whose
    /// values the transactor assembles into this attribute's value.
    pub tuple_attrs: Option<Vec<Entid>>,

    /// For a homogeneous value tuple: the component type.
    pub tuple_type: Option<ValueType>,

    /// For a heterogeneous value tuple: the component types in order.
    pub tuple_types: Option<Vec<ValueType>>,
}

impl Attribute {
    pub fn unique_identity(&self) -> bool {
        self.unique == Some(Unique::Identity)
    }

    pub fn is_unique(&self) -> bool {
        self.unique.is_some()
    }

    pub fn is_ref(&self) -> bool {
        self.value_type == Some(ValueType::Ref)
    }

    /// Whether this attribute's value is derived from other attributes by
    /// the transactor rather than written directly.
    pub fn is_composite_tuple(&self) -> bool {
        self.tuple_attrs.is_some()
    }

    /// Whether this attribute appears in the AVET index.
    pub fn has_avet(&self) -> bool {
        self.index || self.is_unique() || self.is_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_keywords() {
        for vt in &[ValueType::Ref, ValueType::String, ValueType::Tuple, ValueType::Bytes] {
            assert_eq!(Some(*vt), ValueType::from_keyword(&vt.into_keyword()));
        }
        assert_eq!(None, ValueType::from_keyword(&Keyword::namespaced("db", "ident")));
    }

    #[test]
    fn test_typed_value_order_dispatches_on_tag_first() {
        let long = TypedValue::Long(10);
        let s = TypedValue::typed_string("a");
        // Longs sort before strings regardless of payload.
        assert!(long < s);
    }

    #[test]
    fn test_bytes_equality_is_by_content() {
        let a = TypedValue::Bytes(vec![1, 2, 3]);
        let b = TypedValue::Bytes(vec![1, 2, 3]);
        assert_eq!(a, b);
    }
}

// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

extern crate chrono;
#[macro_use]
extern crate lazy_static;
extern crate ordered_float;
extern crate uuid;

extern crate edn;

mod types;

use std::collections::{
    BTreeMap,
    BTreeSet,
};

pub use edn::symbols::{
    Keyword,
    PlainSymbol,
};

pub use types::{
    Attribute,
    Entid,
    KnownEntid,
    TypedValue,
    Unique,
    ValueType,
};

use chrono::{
    DateTime,
    Utc,
};
use edn::FromMicros;
use ordered_float::OrderedFloat;

/// Map `Keyword` idents (`:db/ident`) to positive integer entids (`1`).
pub type IdentMap = BTreeMap<Keyword, Entid>;

/// Map positive integer entids (`1`) to `Keyword` idents (`:db/ident`).
pub type EntidMap = BTreeMap<Entid, Keyword>;

/// Map attribute entids to `Attribute` instances.
pub type AttributeMap = BTreeMap<Entid, Attribute>;

/// Represents the store's schema.
///
/// Maintains the mapping between keyword idents and positive integer entids;
/// exposes the attribute metadata associated to a given entid (equivalently,
/// ident); and carries the derived reverse schema that capability queries
/// dispatch on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Schema {
    /// Map entid->ident.
    ///
    /// Invariant: is the inverse map of `ident_map`.
    pub entid_map: EntidMap,

    /// Map ident->entid.
    ///
    /// Invariant: is the inverse map of `entid_map`.
    pub ident_map: IdentMap,

    /// Map entid->attribute flags.
    ///
    /// Invariant: key-set is a subset of the key-set of `entid_map`.
    pub attribute_map: AttributeMap,

    /// The reverse schema: derived from `attribute_map`, rebuilt whenever a
    /// transaction changes the schema.
    pub rschema: ReverseSchema,
}

/// Capability-indexed views over the attribute map, for O(1) "is this a
/// ref?"-style questions on the transactor's hot path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReverseSchema {
    pub unique_attributes: BTreeSet<Entid>,
    pub ref_attributes: BTreeSet<Entid>,
    pub many_attributes: BTreeSet<Entid>,
    pub component_attributes: BTreeSet<Entid>,

    /// Map source attribute -> (composite tuple attribute -> position of the
    /// source within the tuple).
    pub attr_tuples: BTreeMap<Entid, BTreeMap<Entid, usize>>,
}

impl Schema {
    /// Recompute the reverse schema. Called after any schema mutation.
    pub fn rebuild_reverse_schema(&mut self) {
        let mut rschema = ReverseSchema::default();
        for (&entid, attribute) in &self.attribute_map {
            if attribute.is_unique() {
                rschema.unique_attributes.insert(entid);
            }
            if attribute.is_ref() {
                rschema.ref_attributes.insert(entid);
            }
            if attribute.multival {
                rschema.many_attributes.insert(entid);
            }
            if attribute.component {
                rschema.component_attributes.insert(entid);
            }
            if let Some(ref sources) = attribute.tuple_attrs {
                for (position, &source) in sources.iter().enumerate() {
                    rschema.attr_tuples
                           .entry(source)
                           .or_insert_with(BTreeMap::new)
                           .insert(entid, position);
                }
            }
        }
        self.rschema = rschema;
    }
}

pub trait HasSchema {
    fn get_ident(&self, x: Entid) -> Option<&Keyword>;
    fn get_entid(&self, x: &Keyword) -> Option<KnownEntid>;
    fn attribute_for_entid(&self, x: Entid) -> Option<&Attribute>;
    fn attribute_for_ident(&self, ident: &Keyword) -> Option<(&Attribute, KnownEntid)>;

    /// Return true if the provided entid identifies an attribute in this
    /// schema.
    fn is_attribute(&self, x: Entid) -> bool;

    /// Return true if the provided ident identifies an attribute in this
    /// schema.
    fn identifies_attribute(&self, x: &Keyword) -> bool;

    fn value_type(&self, x: Entid) -> Option<ValueType>;
    fn cardinality_many(&self, x: Entid) -> bool;
    fn is_unique_identity(&self, x: Entid) -> bool;
    fn is_ref(&self, x: Entid) -> bool;

    /// For a source attribute, the composite tuple attributes it feeds and
    /// the position it occupies in each.
    fn tuple_attrs_of(&self, x: Entid) -> Option<&BTreeMap<Entid, usize>>;
}

impl HasSchema for Schema {
    fn get_ident(&self, x: Entid) -> Option<&Keyword> {
        self.entid_map.get(&x)
    }

    fn get_entid(&self, x: &Keyword) -> Option<KnownEntid> {
        self.ident_map.get(x).map(|&e| KnownEntid(e))
    }

    fn attribute_for_entid(&self, x: Entid) -> Option<&Attribute> {
        self.attribute_map.get(&x)
    }

    fn attribute_for_ident(&self, ident: &Keyword) -> Option<(&Attribute, KnownEntid)> {
        self.get_entid(ident)
            .and_then(|e| self.attribute_for_entid(e.0).map(|a| (a, e)))
    }

    fn is_attribute(&self, x: Entid) -> bool {
        self.attribute_map.contains_key(&x)
    }

    fn identifies_attribute(&self, x: &Keyword) -> bool {
        self.get_entid(x).map(|e| self.is_attribute(e.0)).unwrap_or(false)
    }

    fn value_type(&self, x: Entid) -> Option<ValueType> {
        self.attribute_for_entid(x).and_then(|a| a.value_type)
    }

    fn cardinality_many(&self, x: Entid) -> bool {
        self.rschema.many_attributes.contains(&x)
    }

    fn is_unique_identity(&self, x: Entid) -> bool {
        self.attribute_for_entid(x).map(|a| a.unique_identity()).unwrap_or(false)
    }

    fn is_ref(&self, x: Entid) -> bool {
        self.rschema.ref_attributes.contains(&x)
    }

    fn tuple_attrs_of(&self, x: Entid) -> Option<&BTreeMap<Entid, usize>> {
        self.rschema.attr_tuples.get(&x)
    }
}

/// Infer the natural `TypedValue` of an EDN value, without schema guidance.
///
/// Integers become longs, never refs: only an attribute's declared
/// `:db.type/ref` turns an integer into an entity reference.
pub fn natural_typed_value(value: &edn::Value) -> Option<TypedValue> {
    match *value {
        edn::Value::Boolean(b) => Some(TypedValue::Boolean(b)),
        edn::Value::Integer(i) => Some(TypedValue::Long(i)),
        edn::Value::Double(d) => Some(TypedValue::Double(d)),
        edn::Value::Text(ref s) => Some(TypedValue::String(s.clone())),
        edn::Value::Keyword(ref k) => Some(TypedValue::Keyword(k.clone())),
        edn::Value::PlainSymbol(ref s) => Some(TypedValue::Symbol(s.clone())),
        edn::Value::Uuid(u) => Some(TypedValue::Uuid(u)),
        edn::Value::Instant(t) => Some(TypedValue::Instant(t)),
        edn::Value::Vector(ref items) => {
            let components: Option<Vec<Option<TypedValue>>> = items.iter()
                .map(|x| {
                    if x.is_nil() {
                        Some(None)
                    } else {
                        natural_typed_value(x).map(Some)
                    }
                })
                .collect();
            components.map(TypedValue::Tuple)
        },
        _ => None,
    }
}

/// Coerce an EDN value to the declared value type. Returns `None` when the
/// value cannot represent the type; the transactor turns that into a
/// rejection.
pub fn coerce_value(value: &edn::Value, value_type: ValueType) -> Option<TypedValue> {
    match (value_type, value) {
        (ValueType::Ref, &edn::Value::Integer(i)) => Some(TypedValue::Ref(i)),
        (ValueType::Boolean, &edn::Value::Boolean(b)) => Some(TypedValue::Boolean(b)),
        (ValueType::Long, &edn::Value::Integer(i)) => Some(TypedValue::Long(i)),
        (ValueType::Double, &edn::Value::Double(d)) => Some(TypedValue::Double(d)),
        (ValueType::Double, &edn::Value::Integer(i)) => Some(TypedValue::Double(OrderedFloat(i as f64))),
        (ValueType::Instant, &edn::Value::Instant(t)) => Some(TypedValue::Instant(t)),
        (ValueType::Instant, &edn::Value::Integer(micros)) => {
            Some(TypedValue::Instant(DateTime::<Utc>::from_micros(micros)))
        },
        (ValueType::String, &edn::Value::Text(ref s)) => Some(TypedValue::String(s.clone())),
        (ValueType::Keyword, &edn::Value::Keyword(ref k)) => Some(TypedValue::Keyword(k.clone())),
        (ValueType::Symbol, &edn::Value::PlainSymbol(ref s)) => Some(TypedValue::Symbol(s.clone())),
        (ValueType::Uuid, &edn::Value::Uuid(u)) => Some(TypedValue::Uuid(u)),
        (ValueType::Uuid, &edn::Value::Text(ref s)) => {
            uuid::Uuid::parse_str(s).ok().map(TypedValue::Uuid)
        },
        (ValueType::Bytes, &edn::Value::Vector(ref items)) => {
            let bytes: Option<Vec<u8>> = items.iter()
                .map(|x| match x.as_integer() {
                    Some(i) if i >= 0 && i <= 255 => Some(i as u8),
                    _ => None,
                })
                .collect();
            bytes.map(TypedValue::Bytes)
        },
        (ValueType::Tuple, &edn::Value::Vector(_)) => natural_typed_value(value),
        _ => None,
    }
}

lazy_static! {
    /// The reserved tempid naming the current transaction entity.
    pub static ref CURRENT_TX_IDENT: Keyword = Keyword::namespaced("db", "current-tx");
}

/// Return early with the given error kind, converted into the enclosing
/// function's error type.
#[macro_export]
macro_rules! bail {
    ($e:expr) => (
        return Err($e.into());
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_schema() -> Schema {
        let mut schema = Schema::default();
        let friend = Keyword::namespaced("person", "friend");
        let name = Keyword::namespaced("person", "name");
        schema.ident_map.insert(friend.clone(), 100);
        schema.entid_map.insert(100, friend);
        schema.ident_map.insert(name.clone(), 101);
        schema.entid_map.insert(101, name);
        schema.attribute_map.insert(100, Attribute {
            value_type: Some(ValueType::Ref),
            multival: true,
            ..Default::default()
        });
        schema.attribute_map.insert(101, Attribute {
            value_type: Some(ValueType::String),
            unique: Some(Unique::Identity),
            ..Default::default()
        });
        schema.rebuild_reverse_schema();
        schema
    }

    #[test]
    fn test_reverse_schema() {
        let schema = mk_schema();
        assert!(schema.is_ref(100));
        assert!(schema.cardinality_many(100));
        assert!(!schema.is_ref(101));
        assert!(schema.is_unique_identity(101));
    }

    #[test]
    fn test_attr_tuples() {
        let mut schema = mk_schema();
        schema.attribute_map.insert(102, Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![100, 101]),
            ..Default::default()
        });
        schema.rebuild_reverse_schema();
        assert_eq!(Some(&0), schema.tuple_attrs_of(100).unwrap().get(&102));
        assert_eq!(Some(&1), schema.tuple_attrs_of(101).unwrap().get(&102));
        assert_eq!(None, schema.tuple_attrs_of(102));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(Some(TypedValue::Ref(5)), coerce_value(&edn::Value::Integer(5), ValueType::Ref));
        assert_eq!(Some(TypedValue::Long(5)), coerce_value(&edn::Value::Integer(5), ValueType::Long));
        assert_eq!(None, coerce_value(&edn::Value::Text("x".into()), ValueType::Long));
    }
}

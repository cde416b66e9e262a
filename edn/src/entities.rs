// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! This module defines the input types of the transaction processor, and the
//! reader that turns raw EDN forms into them.
//!
//! The types are generic over the value representation `V`: parsed
//! transactions use `edn::Value`, programmatic callers can substitute an
//! already-typed value.

use std::collections::BTreeMap;
use std::fmt;

use symbols::{
    Keyword,
    PlainSymbol,
};
use parse::{
    ParseError,
    Result,
};
use types::Value;

/// A tempid: either an external tempid given in a transaction as a string or
/// a negative integer, or an internal tempid allocated by the store itself
/// while flattening nested maps.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum TempId {
    External(String),
    Internal(i64),
}

impl TempId {
    pub fn into_external(self) -> Option<String> {
        match self {
            TempId::External(s) => Some(s),
            TempId::Internal(_) => None,
        }
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter) -> ::std::result::Result<(), fmt::Error> {
        match self {
            &TempId::External(ref s) => write!(f, "{}", s),
            &TempId::Internal(x) => write!(f, "{}", x),
        }
    }
}

/// An entity identifier as written: either a known numeric entid or an ident
/// to be resolved against the schema.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum EntidOrIdent {
    Entid(i64),
    Ident(Keyword),
}

impl From<i64> for EntidOrIdent {
    fn from(v: i64) -> Self {
        EntidOrIdent::Entid(v)
    }
}

impl From<Keyword> for EntidOrIdent {
    fn from(v: Keyword) -> Self {
        EntidOrIdent::Ident(v)
    }
}

impl EntidOrIdent {
    pub fn unreversed(&self) -> Option<EntidOrIdent> {
        match self {
            &EntidOrIdent::Entid(_) => None,
            &EntidOrIdent::Ident(ref a) => a.unreversed().map(EntidOrIdent::Ident),
        }
    }
}

/// A lookup-ref `[a v]`, usable wherever an entity is named.
///
/// In theory we could allow nested lookup-refs. In practice this would
/// require us to process lookup-refs in multiple phases, like how we resolve
/// tempids, which isn't worth the effort.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct LookupRef<V> {
    pub a: AttributePlace,
    pub v: V, // An atom.
}

/// A "transaction function" that exposes some value determined by the current
/// transaction. The prototypical example is the current transaction ID,
/// `(transaction-tx)`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct TxFunction {
    pub op: PlainSymbol,
}

pub type MapNotation<V> = BTreeMap<EntidOrIdent, ValuePlace<V>>;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum ValuePlace<V> {
    // We never know at parse-time whether an integer or ident is really an
    // entid, but we will often know when building entities programmatically.
    Entid(EntidOrIdent),
    // We never know at parse-time whether a string is really a tempid, but we
    // will often know when building entities programmatically.
    TempId(TempId),
    LookupRef(LookupRef<V>),
    TxFunction(TxFunction),
    Vector(Vec<ValuePlace<V>>),
    Atom(V),
    MapNotation(MapNotation<V>),
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum EntityPlace<V> {
    Entid(EntidOrIdent),
    TempId(TempId),
    LookupRef(LookupRef<V>),
    TxFunction(TxFunction),
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum AttributePlace {
    Entid(EntidOrIdent),
}

impl<V, E: Into<EntidOrIdent>> From<E> for EntityPlace<V> {
    fn from(v: E) -> Self {
        EntityPlace::Entid(v.into())
    }
}

impl<V> From<TempId> for EntityPlace<V> {
    fn from(v: TempId) -> Self {
        EntityPlace::TempId(v)
    }
}

impl From<i64> for AttributePlace {
    fn from(v: i64) -> Self {
        AttributePlace::Entid(EntidOrIdent::Entid(v))
    }
}

impl From<Keyword> for AttributePlace {
    fn from(v: Keyword) -> Self {
        AttributePlace::Entid(EntidOrIdent::Ident(v))
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum OpType {
    Add,
    Retract,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Entity<V> {
    // Like [:db/add|:db/retract e a v].
    AddOrRetract {
        op: OpType,
        e: EntityPlace<V>,
        a: AttributePlace,
        v: ValuePlace<V>,
    },
    // Like [:db.fn/retractEntity e].
    RetractEntity {
        e: EntityPlace<V>,
    },
    // Like [:db.fn/retractAttribute e a].
    RetractAttribute {
        e: EntityPlace<V>,
        a: AttributePlace,
    },
    // Like [:db.fn/cas e a old new].
    Cas {
        e: EntityPlace<V>,
        a: AttributePlace,
        old: ValuePlace<V>,
        new: ValuePlace<V>,
    },
    // Like [:db.fn/call f arg ...] or [:my/fn arg ...] for a registered fn.
    Call {
        f: Keyword,
        args: Vec<V>,
    },
    // Like {:db/id "tempid" a1 v1 a2 v2}.
    MapNotation(MapNotation<V>),
}

fn entity_place(v: &Value) -> Result<EntityPlace<Value>> {
    match *v {
        Value::Integer(i) if i < 0 => Ok(EntityPlace::TempId(TempId::Internal(i))),
        Value::Integer(i) => Ok(EntityPlace::Entid(EntidOrIdent::Entid(i))),
        Value::Text(ref s) => Ok(EntityPlace::TempId(TempId::External(s.clone()))),
        Value::Keyword(ref k) => Ok(EntityPlace::Entid(EntidOrIdent::Ident(k.clone()))),
        Value::Vector(ref parts) if parts.len() == 2 => {
            let a = attribute_place(&parts[0])?;
            Ok(EntityPlace::LookupRef(LookupRef {
                a: a,
                v: parts[1].clone(),
            }))
        },
        Value::List(ref parts) if parts.len() == 1 => {
            match parts[0].as_symbol() {
                Some(s) => Ok(EntityPlace::TxFunction(TxFunction { op: s.clone() })),
                None => Err(ParseError::of_entity("expected a transaction function symbol".to_string())),
            }
        },
        ref x => Err(ParseError::of_entity(format!("expected number, ident, tempid or lookup ref for entity id, got {}", x))),
    }
}

fn attribute_place(v: &Value) -> Result<AttributePlace> {
    match *v {
        Value::Integer(i) => Ok(AttributePlace::Entid(EntidOrIdent::Entid(i))),
        Value::Keyword(ref k) => Ok(AttributePlace::Entid(EntidOrIdent::Ident(k.clone()))),
        ref x => Err(ParseError::of_entity(format!("expected number or ident for attribute, got {}", x))),
    }
}

fn value_place(v: &Value) -> Result<ValuePlace<Value>> {
    match *v {
        Value::Map(ref m) => map_notation(m).map(ValuePlace::MapNotation),
        Value::Vector(ref parts) => {
            // A two-element vector whose head is a keyword might be a lookup
            // ref; it might equally be a plain tuple value. The transactor
            // decides once the attribute's value type is known, so the
            // structure is preserved here.
            let places: Result<Vec<ValuePlace<Value>>> = parts.iter().map(value_place).collect();
            Ok(ValuePlace::Vector(places?))
        },
        Value::List(ref parts) if parts.len() == 1 && parts[0].as_symbol().is_some() => {
            Ok(ValuePlace::TxFunction(TxFunction { op: parts[0].as_symbol().unwrap().clone() }))
        },
        ref atom => Ok(ValuePlace::Atom(atom.clone())),
    }
}

fn map_notation(m: &BTreeMap<Value, Value>) -> Result<MapNotation<Value>> {
    let mut out = MapNotation::default();
    for (k, v) in m {
        let a = match *k {
            Value::Keyword(ref kw) => EntidOrIdent::Ident(kw.clone()),
            Value::Integer(i) => EntidOrIdent::Entid(i),
            ref x => return Err(ParseError::of_entity(format!("expected ident key in map notation, got {}", x))),
        };
        out.insert(a, value_place(v)?);
    }
    Ok(out)
}

/// Read one tx-item.
pub fn entity_from_value(v: &Value) -> Result<Entity<Value>> {
    match *v {
        Value::Map(ref m) => map_notation(m).map(Entity::MapNotation),
        Value::Vector(ref parts) => {
            let op = match parts.get(0).and_then(|x| x.as_keyword()) {
                Some(k) => k.clone(),
                None => return Err(ParseError::of_entity("expected a keyword-headed tx form".to_string())),
            };
            let ns = op.namespace().unwrap_or("");
            match (ns, op.name()) {
                ("db", "add") | ("db", "retract") => {
                    if parts.len() != 4 {
                        return Err(ParseError::of_entity(format!("expected [{} e a v]", op)));
                    }
                    Ok(Entity::AddOrRetract {
                        op: if op.name() == "add" { OpType::Add } else { OpType::Retract },
                        e: entity_place(&parts[1])?,
                        a: attribute_place(&parts[2])?,
                        v: value_place(&parts[3])?,
                    })
                },
                ("db.fn", "retractEntity") | ("db", "retractEntity") => {
                    if parts.len() != 2 {
                        return Err(ParseError::of_entity("expected [:db.fn/retractEntity e]".to_string()));
                    }
                    Ok(Entity::RetractEntity { e: entity_place(&parts[1])? })
                },
                ("db.fn", "retractAttribute") | ("db", "retractAttribute") => {
                    if parts.len() != 3 {
                        return Err(ParseError::of_entity("expected [:db.fn/retractAttribute e a]".to_string()));
                    }
                    Ok(Entity::RetractAttribute {
                        e: entity_place(&parts[1])?,
                        a: attribute_place(&parts[2])?,
                    })
                },
                ("db.fn", "cas") | ("db", "cas") => {
                    if parts.len() != 5 {
                        return Err(ParseError::of_entity("expected [:db.fn/cas e a old new]".to_string()));
                    }
                    Ok(Entity::Cas {
                        e: entity_place(&parts[1])?,
                        a: attribute_place(&parts[2])?,
                        old: value_place(&parts[3])?,
                        new: value_place(&parts[4])?,
                    })
                },
                ("db.fn", "call") => {
                    let f = match parts.get(1).and_then(|x| x.as_keyword()) {
                        Some(k) => k.clone(),
                        None => return Err(ParseError::of_entity("expected [:db.fn/call f args...] with an ident f".to_string())),
                    };
                    Ok(Entity::Call {
                        f: f,
                        args: parts[2..].to_vec(),
                    })
                },
                _ => {
                    // [:my.registered/fn args...]
                    Ok(Entity::Call {
                        f: op,
                        args: parts[1..].to_vec(),
                    })
                },
            }
        },
        ref x => Err(ParseError::of_entity(format!("expected map or vector tx form, got {}", x))),
    }
}

/// Read a top-level transaction: a vector of tx-items. `nil` items are
/// skipped here, per the input contract.
pub fn entities_from_value(v: &Value) -> Result<Vec<Entity<Value>>> {
    match *v {
        Value::Vector(ref items) => {
            items.iter()
                 .filter(|x| !x.is_nil())
                 .map(entity_from_value)
                 .collect()
        },
        ref x => Err(ParseError::of_entity(format!("expected a vector of tx forms, got {}", x))),
    }
}

impl ParseError {
    fn of_entity(message: String) -> ParseError {
        ParseError {
            message: message,
            position: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parse;

    fn parse_tx(input: &str) -> Vec<Entity<Value>> {
        let v = parse::value(input).expect("parsed EDN");
        entities_from_value(&v).expect("parsed entities")
    }

    #[test]
    fn test_add_form() {
        let entities = parse_tx(r#"[[:db/add 1 :person/name "Ivan"]]"#);
        assert_eq!(1, entities.len());
        match entities[0] {
            Entity::AddOrRetract { op: OpType::Add, ref e, ref a, ref v } => {
                assert_eq!(&EntityPlace::Entid(EntidOrIdent::Entid(1)), e);
                assert_eq!(&AttributePlace::Entid(EntidOrIdent::Ident(Keyword::namespaced("person", "name"))), a);
                assert_eq!(&ValuePlace::Atom(Value::Text("Ivan".to_string())), v);
            },
            ref x => panic!("expected :db/add, got {:?}", x),
        }
    }

    #[test]
    fn test_tempids_and_lookup_refs() {
        let entities = parse_tx(r#"[[:db/add -1 :person/friend "bob"]
                                    [:db/add [:person/email "x@y"] :person/age 30]]"#);
        match entities[0] {
            Entity::AddOrRetract { ref e, .. } => {
                assert_eq!(&EntityPlace::TempId(TempId::Internal(-1)), e);
            },
            ref x => panic!("unexpected {:?}", x),
        }
        match entities[1] {
            Entity::AddOrRetract { ref e, .. } => {
                match e {
                    &EntityPlace::LookupRef(ref r) => {
                        assert_eq!(AttributePlace::Entid(EntidOrIdent::Ident(Keyword::namespaced("person", "email"))), r.a);
                    },
                    x => panic!("expected lookup ref, got {:?}", x),
                }
            },
            ref x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn test_nil_items_skipped() {
        let entities = parse_tx(r#"[nil [:db.fn/retractEntity 2] nil]"#);
        assert_eq!(1, entities.len());
        match entities[0] {
            Entity::RetractEntity { ref e } => {
                assert_eq!(&EntityPlace::Entid(EntidOrIdent::Entid(2)), e);
            },
            ref x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn test_cas_and_call() {
        let entities = parse_tx(r#"[[:db.fn/cas 1 :weight 200 300]
                                    [:my/fn 1 2]]"#);
        match entities[0] {
            Entity::Cas { .. } => {},
            ref x => panic!("expected cas, got {:?}", x),
        }
        match entities[1] {
            Entity::Call { ref f, ref args } => {
                assert_eq!(&Keyword::namespaced("my", "fn"), f);
                assert_eq!(2, args.len());
            },
            ref x => panic!("expected call, got {:?}", x),
        }
    }

    #[test]
    fn test_map_notation() {
        let entities = parse_tx(r#"[{:db/id "t" :person/name "Petr" :person/aliases ["P" "Pete"]}]"#);
        match entities[0] {
            Entity::MapNotation(ref m) => {
                assert_eq!(3, m.len());
            },
            ref x => panic!("expected map notation, got {:?}", x),
        }
    }
}

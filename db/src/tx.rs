// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The transactor.
//!
//! A transaction is processed in phases, each pure over the store state
//! except for reads through the open write transaction:
//!
//! 1. expansion of transaction functions and map notation into primitive
//!    terms, resolving idents and lookup-refs on the way;
//! 2. tempid resolution: upserts evolve against the store until saturated,
//!    remaining tempids get fresh entids, tempids that never appear in
//!    entity position are rejected;
//! 3. application: cardinality-one replacement, unique enforcement,
//!    CAS, entity/attribute retraction expansion;
//! 4. composite tuple recomputation for every touched (entity, tuple-attr);
//! 5. validation of upsert bindings and of direct tuple-attr writes;
//! 6. bookkeeping: entity timestamps, the `:db/txInstant` datom, schema
//!    mutation, counters, and the report.
//!
//! Any rejection aborts the enclosing write transaction; nothing becomes
//! visible.

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::sync::Arc;

use chrono::{
    DateTime,
    Utc,
};
use lmdb::RwTransaction;
use time;

use datalith_core::{
    Attribute,
    CURRENT_TX_IDENT,
    Entid,
    HasSchema,
    Keyword,
    Schema,
    TypedValue,
    ValueType,
    coerce_value,
    natural_typed_value,
};
use edn;
use edn::InternSet;
use edn::entities::{
    AttributePlace,
    Entity,
    EntityPlace,
    EntidOrIdent,
    LookupRef,
    MapNotation,
    OpType,
    TempId,
    ValuePlace,
};
use entids;
use errors::{
    DbErrorKind,
    Result,
};
use internal_types::{
    AVPair,
    TempIdHandle,
    TempIdMap,
    Term,
    TermWithTempIds,
    TermWithoutTempIds,
};
use metadata;
use store::{
    self,
    Dbis,
};
use types::{
    Datom,
    DbTag,
    StoreOptions,
    TxReport,
};
use upsert_resolution::Generation;

/// A registered transaction function: receives the raw argument forms and
/// returns tx forms to splice into the transaction.
pub type TxFunction = Arc<dyn Fn(&[edn::Value]) -> Result<Vec<edn::Value>> + Send + Sync>;

pub type TxFunctionRegistry = BTreeMap<Keyword, TxFunction>;

const MAX_FN_EXPANSION_DEPTH: usize = 256;

/// Where internally generated tempids (nested maps, mostly) start counting
/// down from.
const FIRST_INTERNAL_TEMPID: i64 = -1_000_000;

struct Tx<'a, 'e: 'a> {
    txn: &'a mut RwTransaction<'e>,
    dbis: &'a Dbis,
    schema: &'a Schema,
    options: &'a StoreOptions,
    registry: &'a TxFunctionRegistry,
    tx_id: Entid,
    tx_instant: DateTime<Utc>,
    temp_ids: InternSet<TempId>,
    next_internal_tempid: i64,
    tx_data: Vec<Datom>,
    /// (e, tuple attribute) pairs whose derived value may have changed.
    touched_tuples: BTreeSet<(Entid, Entid)>,
    /// Tempid bindings established by upserting, with the (a, v) that
    /// established each.
    upsert_bindings: Vec<(TempIdHandle, AVPair, Entid)>,
}

/// Apply `entities` against the store inside `txn`.
///
/// `next_eid` is the first free user entid; `tx_id` the id of this
/// transaction. On success the meta counters are updated inside `txn`; the
/// caller commits. Returns the report and, when the transaction changed the
/// schema, the new schema.
pub fn transact<'e>(txn: &mut RwTransaction<'e>,
                    dbis: &Dbis,
                    schema: &Schema,
                    options: &StoreOptions,
                    registry: &TxFunctionRegistry,
                    next_eid: Entid,
                    tx_id: Entid,
                    entities: Vec<Entity<edn::Value>>)
                    -> Result<(TxReport, Option<Schema>)> {
    let start = time::precise_time_ns();
    let db_before = DbTag {
        next_eid: next_eid,
        next_tx: tx_id,
    };

    let mut tx = Tx {
        txn: txn,
        dbis: dbis,
        schema: schema,
        options: options,
        registry: registry,
        tx_id: tx_id,
        tx_instant: Utc::now(),
        temp_ids: InternSet::new(),
        next_internal_tempid: FIRST_INTERNAL_TEMPID,
        tx_data: vec![],
        touched_tuples: BTreeSet::new(),
        upsert_bindings: vec![],
    };

    // Phase 1: expansion into terms.
    let entities = tx.expand_tx_functions(entities, 0)?;
    let mut terms = vec![];
    for entity in entities {
        tx.entity_into_terms(entity, &mut terms)?;
    }

    // Phase 2: tempid resolution.
    let (mut generation, inert) = Generation::from(terms, schema)?;

    let mut temp_id_map = TempIdMap::default();
    while generation.can_evolve() {
        let temp_id_avs = generation.temp_id_avs();
        let mut resolved_any = false;
        for (tempid, av_pair) in temp_id_avs {
            if let Some(e) = store::lookup_av(tx.txn, dbis, schema, av_pair.0, &av_pair.1)? {
                if let Some(&previous) = temp_id_map.get(&tempid) {
                    if previous != e {
                        bail!(DbErrorKind::ConflictingUpserts(format!(
                            "tempid {} resolves to both {} and {}", tempid, previous, e)));
                    }
                } else {
                    tx.upsert_bindings.push((tempid.clone(), av_pair.clone(), e));
                    temp_id_map.insert(tempid, e);
                    resolved_any = true;
                }
            }
        }
        generation = generation.evolve_one_step(&temp_id_map);
        if !resolved_any {
            break;
        }
    }

    // Tempids that appear only in value position cannot be allocated: the
    // caller has said nothing about the entity itself.
    let to_allocate = generation.temp_ids_in_allocations();
    let defined: BTreeSet<TempIdHandle> = generation.temp_ids_in_entity_place()
        .into_iter()
        .chain(temp_id_map.keys().cloned())
        .collect();
    let only_values: Vec<String> = to_allocate.iter()
        .filter(|t| !defined.contains(*t))
        .map(|t| match **t {
            TempId::External(ref s) => format!("\"{}\"", s),
            TempId::Internal(i) => format!("{}", i),
        })
        .collect();
    if !only_values.is_empty() {
        bail!(DbErrorKind::TempIdsUsedOnlyAsValue(only_values.join(", ")));
    }

    let mut next_free_eid = next_eid;
    for tempid in to_allocate {
        if !temp_id_map.contains_key(&tempid) {
            temp_id_map.insert(tempid, next_free_eid);
            next_free_eid += 1;
        }
    }

    let populations = generation.into_final_populations(&temp_id_map);

    // Phase 3: application. Upserted and resolved terms land before
    // allocations; inert terms close the sequence.
    let mut tuple_claims = vec![];
    for term in populations.upserted.into_iter()
                           .chain(populations.resolved)
                           .chain(populations.allocated)
                           .chain(inert.into_iter().map(|term| term.unwrap())) {
        tx.apply_term(term, &mut tuple_claims)?;
    }

    // Phase 4: recompute derived tuples.
    tx.recompute_touched_tuples()?;

    // Phase 5: validation.
    tx.validate_upsert_bindings()?;
    tx.validate_tuple_claims(tuple_claims)?;

    // Phase 6: bookkeeping.
    if tx.options.auto_entity_time {
        tx.stamp_entity_times()?;
    }
    let tx_instant = tx.tx_instant;
    tx.add_datom_checked(tx_id, entids::DB_TX_INSTANT, TypedValue::Instant(tx_instant))?;

    let next_schema = tx.update_metadata()?;

    let max_user_eid = tx.tx_data.iter()
        .map(|datom| datom.e)
        .filter(|&e| e < entids::TX0)
        .max()
        .unwrap_or(0);
    next_free_eid = ::std::cmp::max(next_free_eid, max_user_eid + 1);
    next_free_eid = ::std::cmp::max(next_free_eid, entids::USER0);

    store::put_meta_i64(tx.txn, dbis, store::META_NEXT_EID, next_free_eid)?;
    store::put_meta_i64(tx.txn, dbis, store::META_NEXT_TX, tx_id + 1)?;

    let mut tempids: BTreeMap<String, Entid> = BTreeMap::new();
    for (tempid, &e) in &temp_id_map {
        let key = match **tempid {
            TempId::External(ref s) => s.clone(),
            TempId::Internal(i) => format!("{}", i),
        };
        tempids.insert(key, e);
    }
    tempids.insert(":db/current-tx".to_string(), tx_id);

    let tx_data = tx.tx_data;
    debug!("transacted {} datoms as tx {} in {}µs",
           tx_data.len(), tx_id, (time::precise_time_ns() - start) / 1_000);

    let report = TxReport {
        db_before: db_before,
        db_after: DbTag {
            next_eid: next_free_eid,
            next_tx: tx_id + 1,
        },
        tx_id: tx_id,
        tx_instant: tx_instant,
        tx_data: tx_data,
        tempids: tempids,
    };
    Ok((report, next_schema))
}

impl<'a, 'e> Tx<'a, 'e> {
    fn require_attribute(&self, a: Entid) -> Result<&'a Attribute> {
        match self.schema.attribute_for_entid(a) {
            Some(attribute) => Ok(attribute),
            None => bail!(DbErrorKind::UnknownAttribute(a)),
        }
    }

    fn attribute_ident(&self, a: Entid) -> Keyword {
        self.schema.get_ident(a).cloned().unwrap_or_else(|| Keyword::plain(format!("{}", a)))
    }

    // ---------- Phase 1: expansion ----------

    fn expand_tx_functions(&mut self,
                           entities: Vec<Entity<edn::Value>>,
                           depth: usize)
                           -> Result<Vec<Entity<edn::Value>>> {
        if depth > MAX_FN_EXPANSION_DEPTH {
            bail!(DbErrorKind::InputError("transaction fn expansion too deep".to_string()));
        }
        let mut out = vec![];
        for entity in entities {
            match entity {
                Entity::Call { f, args } => {
                    let function = match self.registry.get(&f) {
                        Some(function) => function.clone(),
                        None => {
                            if self.schema.get_entid(&f).is_some() {
                                bail!(DbErrorKind::LacksDbFn(f));
                            }
                            bail!(DbErrorKind::UnknownTransactionFn(f));
                        },
                    };
                    let forms = function(&args)?;
                    let mut produced = vec![];
                    for form in &forms {
                        if form.is_nil() {
                            continue;
                        }
                        produced.push(edn::entities::entity_from_value(form)?);
                    }
                    out.extend(self.expand_tx_functions(produced, depth + 1)?);
                },
                entity => out.push(entity),
            }
        }
        Ok(out)
    }

    fn intern_tempid(&mut self, t: TempId) -> TempIdHandle {
        self.temp_ids.intern(t)
    }

    fn allocate_internal_tempid(&mut self) -> TempIdHandle {
        let idx = self.next_internal_tempid;
        self.next_internal_tempid -= 1;
        self.intern_tempid(TempId::Internal(idx))
    }

    fn resolve_ident(&self, ident: &Keyword) -> Result<Entid> {
        if ident == &*CURRENT_TX_IDENT {
            return Ok(self.tx_id);
        }
        match self.schema.get_entid(ident) {
            Some(e) => Ok(e.0),
            None => bail!(DbErrorKind::UnrecognizedIdent(ident.to_string())),
        }
    }

    fn resolve_attribute_place(&self, a: AttributePlace) -> Result<(Entid, bool)> {
        let AttributePlace::Entid(entid_or_ident) = a;
        match entid_or_ident {
            EntidOrIdent::Entid(e) => Ok((e, false)),
            EntidOrIdent::Ident(ref ident) if ident.is_backward() => {
                let forward = ident.unreversed().expect("reversed ident unreverses");
                Ok((self.resolve_ident(&forward)?, true))
            },
            EntidOrIdent::Ident(ref ident) => Ok((self.resolve_ident(ident)?, false)),
        }
    }

    fn resolve_lookup_ref(&mut self, lookup_ref: LookupRef<edn::Value>) -> Result<Entid> {
        let (a, reversed) = self.resolve_attribute_place(lookup_ref.a)?;
        if reversed {
            bail!(DbErrorKind::InputError("lookup ref cannot use a reverse attribute".to_string()));
        }
        let attribute = self.require_attribute(a)?;
        let ident = self.attribute_ident(a);
        if !attribute.is_unique() {
            bail!(DbErrorKind::NonUniqueLookupRefAttribute(ident));
        }
        let value_type = attribute.value_type.expect("attributes always declare a value type");
        let v = match coerce_value(&lookup_ref.v, value_type) {
            Some(v) => v,
            None => bail!(DbErrorKind::TypeMismatch {
                attribute: ident,
                expected: value_type,
                value: lookup_ref.v.to_string(),
            }),
        };
        match store::lookup_av(self.txn, self.dbis, self.schema, a, &v)? {
            Some(e) => Ok(e),
            None => bail!(DbErrorKind::UnresolvedLookupRef(self.attribute_ident(a), lookup_ref.v.to_string())),
        }
    }

    fn resolve_entity_place(&mut self,
                            e: EntityPlace<edn::Value>)
                            -> Result<::std::result::Result<Entid, TempIdHandle>> {
        match e {
            EntityPlace::Entid(EntidOrIdent::Entid(i)) if i < 0 => {
                Ok(Err(self.intern_tempid(TempId::Internal(i))))
            },
            EntityPlace::Entid(EntidOrIdent::Entid(i)) => Ok(Ok(i)),
            EntityPlace::Entid(EntidOrIdent::Ident(ref ident)) => {
                Ok(Ok(self.resolve_ident(ident)?))
            },
            EntityPlace::TempId(t) => Ok(Err(self.intern_tempid(t))),
            EntityPlace::LookupRef(r) => Ok(Ok(self.resolve_lookup_ref(r)?)),
            EntityPlace::TxFunction(ref f) if f.op.name() == "transaction-tx" => Ok(Ok(self.tx_id)),
            EntityPlace::TxFunction(ref f) => {
                bail!(DbErrorKind::NotYetImplemented(format!("transaction function {}", f.op)))
            },
        }
    }

    /// Whether a two-element vector place reads as a lookup ref: its head
    /// names a unique attribute. The reader cannot distinguish a lookup ref
    /// from a two-element tuple, so the head keyword arrives as an atom.
    fn vector_is_lookup_ref(&self, places: &[ValuePlace<edn::Value>]) -> bool {
        if places.len() != 2 {
            return false;
        }
        let head = match places[0] {
            ValuePlace::Entid(EntidOrIdent::Ident(ref ident)) => ident,
            ValuePlace::Atom(edn::Value::Keyword(ref ident)) => ident,
            _ => return false,
        };
        self.schema.attribute_for_ident(head)
            .map(|(attribute, _)| attribute.is_unique())
            .unwrap_or(false)
    }

    fn place_to_atom(place: ValuePlace<edn::Value>) -> Result<edn::Value> {
        match place {
            ValuePlace::Atom(v) => Ok(v),
            ValuePlace::Entid(EntidOrIdent::Entid(i)) => Ok(edn::Value::Integer(i)),
            ValuePlace::Entid(EntidOrIdent::Ident(k)) => Ok(edn::Value::Keyword(k)),
            ValuePlace::TempId(t) => {
                match t {
                    TempId::External(s) => Ok(edn::Value::Text(s)),
                    TempId::Internal(i) => Ok(edn::Value::Integer(i)),
                }
            },
            ValuePlace::Vector(places) => {
                let atoms: Result<Vec<edn::Value>> = places.into_iter()
                    .map(Tx::place_to_atom)
                    .collect();
                Ok(edn::Value::Vector(atoms?))
            },
            place => bail!(DbErrorKind::InputError(format!("expected an atomic value, got {:?}", place))),
        }
    }

    /// Build a tuple value from component places, coercing per the declared
    /// component types.
    fn tuple_from_places(&self,
                         a: Entid,
                         attribute: &Attribute,
                         places: Vec<ValuePlace<edn::Value>>)
                         -> Result<TypedValue> {
        let ident = self.attribute_ident(a);
        let mut components: Vec<Option<TypedValue>> = Vec::with_capacity(places.len());
        for (position, place) in places.into_iter().enumerate() {
            let atom = Tx::place_to_atom(place)?;
            if atom.is_nil() {
                components.push(None);
                continue;
            }
            let component_type: Option<ValueType> = if let Some(t) = attribute.tuple_type {
                Some(t)
            } else if let Some(ref ts) = attribute.tuple_types {
                ts.get(position).cloned()
            } else if let Some(ref sources) = attribute.tuple_attrs {
                sources.get(position)
                       .and_then(|&source| self.schema.value_type(source))
            } else {
                None
            };
            let coerced = match component_type {
                // Ref components accept idents, as ref attributes do.
                Some(ValueType::Ref) => {
                    match atom {
                        edn::Value::Keyword(ref id) => Some(TypedValue::Ref(self.resolve_ident(id)?)),
                        ref atom => coerce_value(atom, ValueType::Ref),
                    }
                },
                Some(t) => coerce_value(&atom, t),
                None => natural_typed_value(&atom),
            };
            match coerced {
                Some(v) => components.push(Some(v)),
                None => bail!(DbErrorKind::TypeMismatch {
                    attribute: ident,
                    expected: ValueType::Tuple,
                    value: atom.to_string(),
                }),
            }
        }
        Ok(TypedValue::Tuple(components))
    }

    /// Convert a value place into one or more value terms for `(e, a)`.
    /// Cardinality-many attributes accept a vector of values; nested maps
    /// become sub-entities.
    fn resolve_value_place(&mut self,
                           a: Entid,
                           attribute: &Attribute,
                           place: ValuePlace<edn::Value>,
                           out: &mut Vec<::std::result::Result<TypedValue, TempIdHandle>>,
                           terms: &mut Vec<TermWithTempIds>)
                           -> Result<()> {
        let ident = self.attribute_ident(a);
        let value_type = attribute.value_type.expect("attributes always declare a value type");
        match place {
            ValuePlace::Atom(atom) => {
                if attribute.is_ref() {
                    match atom {
                        edn::Value::Integer(i) if i < 0 => {
                            out.push(Err(self.intern_tempid(TempId::Internal(i))));
                        },
                        edn::Value::Integer(i) => out.push(Ok(TypedValue::Ref(i))),
                        edn::Value::Text(s) => {
                            out.push(Err(self.intern_tempid(TempId::External(s))));
                        },
                        edn::Value::Keyword(ref ident) => {
                            out.push(Ok(TypedValue::Ref(self.resolve_ident(ident)?)));
                        },
                        atom => bail!(DbErrorKind::TypeMismatch {
                            attribute: ident,
                            expected: ValueType::Ref,
                            value: atom.to_string(),
                        }),
                    }
                } else {
                    match coerce_value(&atom, value_type) {
                        Some(v) => out.push(Ok(v)),
                        None => bail!(DbErrorKind::TypeMismatch {
                            attribute: ident,
                            expected: value_type,
                            value: atom.to_string(),
                        }),
                    }
                }
            },
            ValuePlace::Entid(EntidOrIdent::Entid(i)) if attribute.is_ref() => {
                out.push(Ok(TypedValue::Ref(i)));
            },
            ValuePlace::Entid(EntidOrIdent::Ident(ref id)) if attribute.is_ref() => {
                out.push(Ok(TypedValue::Ref(self.resolve_ident(id)?)));
            },
            ValuePlace::Entid(e) => {
                bail!(DbErrorKind::TypeMismatch {
                    attribute: ident,
                    expected: value_type,
                    value: format!("{:?}", e),
                });
            },
            ValuePlace::TempId(t) => {
                if !attribute.is_ref() {
                    bail!(DbErrorKind::TypeMismatch {
                        attribute: ident,
                        expected: value_type,
                        value: format!("{}", t),
                    });
                }
                out.push(Err(self.intern_tempid(t)));
            },
            ValuePlace::LookupRef(r) => {
                if !attribute.is_ref() {
                    bail!(DbErrorKind::TypeMismatch {
                        attribute: ident,
                        expected: value_type,
                        value: "lookup ref".to_string(),
                    });
                }
                let e = self.resolve_lookup_ref(r)?;
                out.push(Ok(TypedValue::Ref(e)));
            },
            ValuePlace::TxFunction(ref f) if f.op.name() == "transaction-tx" => {
                out.push(Ok(TypedValue::Ref(self.tx_id)));
            },
            ValuePlace::TxFunction(ref f) => {
                bail!(DbErrorKind::NotYetImplemented(format!("transaction function {}", f.op)));
            },
            ValuePlace::Vector(places) => {
                if attribute.is_ref() && self.vector_is_lookup_ref(&places) {
                    let mut places = places;
                    let v = Tx::place_to_atom(places.pop().expect("two places"))?;
                    let a_place = match places.pop().expect("two places") {
                        ValuePlace::Entid(entid_or_ident) => AttributePlace::Entid(entid_or_ident),
                        ValuePlace::Atom(edn::Value::Keyword(k)) => {
                            AttributePlace::Entid(EntidOrIdent::Ident(k))
                        },
                        _ => unreachable!(),
                    };
                    let e = self.resolve_lookup_ref(LookupRef { a: a_place, v: v })?;
                    out.push(Ok(TypedValue::Ref(e)));
                } else if attribute.multival {
                    for sub_place in places {
                        self.resolve_value_place(a, attribute, sub_place, out, terms)?;
                    }
                } else if value_type == ValueType::Tuple {
                    out.push(Ok(self.tuple_from_places(a, attribute, places)?));
                } else if value_type == ValueType::Bytes {
                    let atom = Tx::place_to_atom(ValuePlace::Vector(places))?;
                    match coerce_value(&atom, ValueType::Bytes) {
                        Some(v) => out.push(Ok(v)),
                        None => bail!(DbErrorKind::TypeMismatch {
                            attribute: ident,
                            expected: ValueType::Bytes,
                            value: atom.to_string(),
                        }),
                    }
                } else {
                    bail!(DbErrorKind::InputError(format!(
                        "vector value supplied to cardinality-one attribute {}", ident)));
                }
            },
            ValuePlace::MapNotation(m) => {
                if !attribute.is_ref() {
                    bail!(DbErrorKind::TypeMismatch {
                        attribute: ident,
                        expected: value_type,
                        value: "nested map".to_string(),
                    });
                }
                let sub_entity = self.map_notation_into_terms(m, terms)?;
                match sub_entity {
                    Ok(e) => out.push(Ok(TypedValue::Ref(e))),
                    Err(t) => out.push(Err(t)),
                }
            },
        }
        Ok(())
    }

    /// Flatten one map-notation entity into terms, returning the entity it
    /// describes.
    fn map_notation_into_terms(&mut self,
                               mut map: MapNotation<edn::Value>,
                               terms: &mut Vec<TermWithTempIds>)
                               -> Result<::std::result::Result<Entid, TempIdHandle>> {
        let db_id_key = EntidOrIdent::Ident(Keyword::namespaced("db", "id"));
        let self_place = match map.remove(&db_id_key) {
            Some(ValuePlace::Entid(entid_or_ident)) => {
                self.resolve_entity_place(EntityPlace::Entid(entid_or_ident))?
            },
            Some(ValuePlace::TempId(t)) => Err(self.intern_tempid(t)),
            Some(ValuePlace::LookupRef(r)) => Ok(self.resolve_lookup_ref(r)?),
            Some(ValuePlace::Atom(edn::Value::Integer(i))) if i < 0 => {
                Err(self.intern_tempid(TempId::Internal(i)))
            },
            Some(ValuePlace::Atom(edn::Value::Integer(i))) => Ok(i),
            Some(ValuePlace::Atom(edn::Value::Text(s))) => {
                Err(self.intern_tempid(TempId::External(s)))
            },
            Some(place) => {
                bail!(DbErrorKind::InputError(format!("bad :db/id in map notation: {:?}", place)))
            },
            None => Err(self.allocate_internal_tempid()),
        };

        for (a_place, v_place) in map {
            let (a, reversed) = match a_place {
                EntidOrIdent::Entid(e) => (e, false),
                EntidOrIdent::Ident(ref ident) if ident.is_backward() => {
                    let forward = ident.unreversed().expect("reversed ident unreverses");
                    (self.resolve_ident(&forward)?, true)
                },
                EntidOrIdent::Ident(ref ident) => (self.resolve_ident(ident)?, false),
            };
            let attribute = self.require_attribute(a)?;

            if reversed {
                if !attribute.is_ref() {
                    bail!(DbErrorKind::InputError(format!(
                        "reverse attribute {} must be :db.type/ref", self.attribute_ident(a))));
                }
                let self_value = match self_place {
                    Ok(e) => Ok(TypedValue::Ref(e)),
                    Err(ref t) => Err(t.clone()),
                };
                // `{:a/_b x}` means x :a/b this-entity; a vector of x's is
                // allowed.
                let targets = match v_place {
                    ValuePlace::Vector(places) => places,
                    place => vec![place],
                };
                for target in targets {
                    let target_entity = match target {
                        ValuePlace::Entid(entid_or_ident) => {
                            self.resolve_entity_place(EntityPlace::Entid(entid_or_ident))?
                        },
                        ValuePlace::TempId(t) => Err(self.intern_tempid(t)),
                        ValuePlace::LookupRef(r) => Ok(self.resolve_lookup_ref(r)?),
                        ValuePlace::Atom(edn::Value::Integer(i)) if i < 0 => {
                            Err(self.intern_tempid(TempId::Internal(i)))
                        },
                        ValuePlace::Atom(edn::Value::Integer(i)) => Ok(i),
                        ValuePlace::Atom(edn::Value::Text(s)) => {
                            Err(self.intern_tempid(TempId::External(s)))
                        },
                        ValuePlace::Atom(edn::Value::Keyword(ref k)) => Ok(self.resolve_ident(k)?),
                        ValuePlace::MapNotation(m) => self.map_notation_into_terms(m, terms)?,
                        place => {
                            bail!(DbErrorKind::InputError(format!(
                                "bad reverse reference value: {:?}", place)))
                        },
                    };
                    terms.push(Term::AddOrRetract(OpType::Add, target_entity, a, self_value.clone()));
                }
                continue;
            }

            let mut values = vec![];
            self.resolve_value_place(a, attribute, v_place, &mut values, terms)?;
            for v in values {
                terms.push(Term::AddOrRetract(OpType::Add, self_place.clone(), a, v));
            }
        }

        Ok(self_place)
    }

    fn entity_into_terms(&mut self,
                         entity: Entity<edn::Value>,
                         terms: &mut Vec<TermWithTempIds>)
                         -> Result<()> {
        match entity {
            Entity::AddOrRetract { op, e, a, v } => {
                let e = self.resolve_entity_place(e)?;
                let (a, reversed) = self.resolve_attribute_place(a)?;
                let attribute = self.require_attribute(a)?;
                if reversed {
                    if !attribute.is_ref() {
                        bail!(DbErrorKind::InputError(format!(
                            "reverse attribute {} must be :db.type/ref", self.attribute_ident(a))));
                    }
                    // [op e :a/_b v] asserts [op v :a/b e].
                    let v_as_entity = match v {
                        ValuePlace::Entid(entid_or_ident) => {
                            self.resolve_entity_place(EntityPlace::Entid(entid_or_ident))?
                        },
                        ValuePlace::TempId(t) => Err(self.intern_tempid(t)),
                        ValuePlace::LookupRef(r) => Ok(self.resolve_lookup_ref(r)?),
                        ValuePlace::Atom(edn::Value::Integer(i)) if i < 0 => {
                            Err(self.intern_tempid(TempId::Internal(i)))
                        },
                        ValuePlace::Atom(edn::Value::Integer(i)) => Ok(i),
                        ValuePlace::Atom(edn::Value::Text(s)) => {
                            Err(self.intern_tempid(TempId::External(s)))
                        },
                        ValuePlace::Atom(edn::Value::Keyword(ref k)) => Ok(self.resolve_ident(k)?),
                        place => {
                            bail!(DbErrorKind::InputError(format!(
                                "bad reverse reference value: {:?}", place)))
                        },
                    };
                    let e_as_value = match e {
                        Ok(e) => Ok(TypedValue::Ref(e)),
                        Err(t) => Err(t),
                    };
                    terms.push(Term::AddOrRetract(op, v_as_entity, a, e_as_value));
                    return Ok(());
                }
                let mut values = vec![];
                self.resolve_value_place(a, attribute, v, &mut values, terms)?;
                for v in values {
                    terms.push(Term::AddOrRetract(op, e.clone(), a, v));
                }
            },
            Entity::RetractEntity { e } => {
                let e = self.resolve_entity_place(e)?;
                terms.push(Term::RetractEntity(e));
            },
            Entity::RetractAttribute { e, a } => {
                let e = self.resolve_entity_place(e)?;
                let (a, reversed) = self.resolve_attribute_place(a)?;
                if reversed {
                    bail!(DbErrorKind::InputError(
                        ":db.fn/retractAttribute does not accept a reverse attribute".to_string()));
                }
                self.require_attribute(a)?;
                terms.push(Term::RetractAttribute(e, a));
            },
            Entity::Cas { e, a, old, new } => {
                // Tempids make no sense here: CAS reads current state.
                match e {
                    EntityPlace::TempId(ref t) => {
                        bail!(DbErrorKind::TempIdInCas(format!("{}", t)));
                    },
                    EntityPlace::Entid(EntidOrIdent::Entid(i)) if i < 0 => {
                        bail!(DbErrorKind::TempIdInCas(format!("{}", i)));
                    },
                    _ => {},
                }
                let e = self.resolve_entity_place(e)?;
                let (a, _) = self.resolve_attribute_place(a)?;
                let attribute = self.require_attribute(a)?;

                let old = match old {
                    ValuePlace::Atom(ref v) if v.is_nil() => None,
                    place => {
                        let mut values = vec![];
                        let mut ignored = vec![];
                        self.resolve_value_place(a, attribute, place, &mut values, &mut ignored)?;
                        match (values.pop(), values.is_empty()) {
                            (Some(Ok(v)), true) => Some(v),
                            _ => bail!(DbErrorKind::InputError(
                                "expected a single concrete old value in :db.fn/cas".to_string())),
                        }
                    },
                };
                let mut values = vec![];
                let mut ignored = vec![];
                self.resolve_value_place(a, attribute, new, &mut values, &mut ignored)?;
                let new = match (values.pop(), values.is_empty()) {
                    (Some(Ok(v)), true) => v,
                    _ => bail!(DbErrorKind::InputError(
                        "expected a single concrete new value in :db.fn/cas".to_string())),
                };
                terms.push(Term::Cas(e, a, old, new));
            },
            Entity::MapNotation(map) => {
                self.map_notation_into_terms(map, terms)?;
            },
            Entity::Call { .. } => unreachable!("calls expanded before conversion"),
        }
        Ok(())
    }

    // ---------- Phase 3: application ----------

    fn apply_term(&mut self,
                  term: TermWithoutTempIds,
                  tuple_claims: &mut Vec<(OpType, Entid, Entid, TypedValue)>)
                  -> Result<()> {
        match term {
            Term::AddOrRetract(op, e, a, v) => {
                let attribute = self.require_attribute(a)?;
                if attribute.is_composite_tuple() {
                    // Direct writes to derived tuples are validated against
                    // the recomputed value after phase 4.
                    tuple_claims.push((op, e, a, v));
                    return Ok(());
                }
                match op {
                    OpType::Add => self.add_datom_checked(e, a, v),
                    OpType::Retract => self.retract_datom_checked(e, a, &v),
                }
            },
            Term::RetractEntity(e) => {
                let mut seen = BTreeSet::new();
                self.retract_entity(e, &mut seen)
            },
            Term::RetractAttribute(e, a) => self.retract_attribute(e, a),
            Term::Cas(e, a, old, new) => self.apply_cas(e, a, old, new),
        }
    }

    fn check_value(&self, a: Entid, attribute: &Attribute, v: &TypedValue) -> Result<()> {
        let declared = attribute.value_type.expect("attributes always declare a value type");
        let ident = self.attribute_ident(a);
        let mismatch = |value: &TypedValue| DbErrorKind::TypeMismatch {
            attribute: ident.clone(),
            expected: declared,
            value: value.to_edn_value().to_string(),
        };
        if v.value_type() != declared {
            bail!(mismatch(v));
        }
        if let TypedValue::Tuple(ref components) = *v {
            if let Some(ref ts) = attribute.tuple_types {
                if components.len() != ts.len() {
                    bail!(mismatch(v));
                }
                for (component, &t) in components.iter().zip(ts.iter()) {
                    if let Some(ref inner) = *component {
                        if inner.value_type() != t {
                            bail!(mismatch(v));
                        }
                    }
                }
            }
            if let Some(t) = attribute.tuple_type {
                for component in components {
                    if let Some(ref inner) = *component {
                        if inner.value_type() != t {
                            bail!(mismatch(v));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn note_touched_tuples(&mut self, e: Entid, a: Entid) {
        if let Some(positions) = self.schema.tuple_attrs_of(a) {
            for &tuple_attr in positions.keys() {
                self.touched_tuples.insert((e, tuple_attr));
            }
        }
    }

    fn add_datom_checked(&mut self, e: Entid, a: Entid, v: TypedValue) -> Result<()> {
        let attribute = self.require_attribute(a)?;
        if self.options.validate_data {
            self.check_value(a, attribute, &v)?;
        }

        // Unique enforcement: the value may live nowhere else.
        if attribute.is_unique() {
            if let Some(other) = store::lookup_av(self.txn, self.dbis, self.schema, a, &v)? {
                if other != e {
                    bail!(DbErrorKind::UniqueConstraintViolation(format!(
                        "[{} {} {}]", e, self.attribute_ident(a), v.to_edn_value())));
                }
            }
        }

        // Cardinality-one replacement: asserting a new value retracts the
        // old one in the same transaction.
        if !attribute.multival {
            if let Some(current) = store::first_value_for(self.txn, self.dbis, e, a)? {
                if current == v {
                    return Ok(());
                }
                store::retract_datom(self.txn, self.dbis, self.schema, e, a, &current)?;
                self.tx_data.push(Datom::new(e, a, current, self.tx_id, false));
                self.note_touched_tuples(e, a);
            }
        }

        if store::add_datom(self.txn, self.dbis, self.schema, e, a, &v, self.tx_id)? {
            self.tx_data.push(Datom::new(e, a, v, self.tx_id, true));
            self.note_touched_tuples(e, a);
        }
        Ok(())
    }

    fn retract_datom_checked(&mut self, e: Entid, a: Entid, v: &TypedValue) -> Result<()> {
        if store::retract_datom(self.txn, self.dbis, self.schema, e, a, v)? {
            self.tx_data.push(Datom::new(e, a, v.clone(), self.tx_id, false));
            self.note_touched_tuples(e, a);
        }
        Ok(())
    }

    /// Remove all datoms of `e`, all incoming refs to `e`, and recurse
    /// through component refs.
    fn retract_entity(&mut self, e: Entid, seen: &mut BTreeSet<Entid>) -> Result<()> {
        if !seen.insert(e) {
            return Ok(());
        }

        let own = store::datoms(self.txn, self.dbis, store::IndexType::Eavt, Some(e), None, None)?
            .collect_datoms()?;
        let incoming = store::datoms(self.txn, self.dbis, store::IndexType::Vaet,
                                     None, None, Some(&TypedValue::Ref(e)))?
            .collect_datoms()?;

        for datom in own {
            let is_component = self.schema.rschema.component_attributes.contains(&datom.a);
            self.retract_datom_checked(datom.e, datom.a, &datom.v)?;
            if is_component {
                if let TypedValue::Ref(child) = datom.v {
                    self.retract_entity(child, seen)?;
                }
            }
        }
        for datom in incoming {
            self.retract_datom_checked(datom.e, datom.a, &datom.v)?;
        }
        Ok(())
    }

    fn retract_attribute(&mut self, e: Entid, a: Entid) -> Result<()> {
        let is_component = self.schema.rschema.component_attributes.contains(&a);
        let datoms = store::datoms(self.txn, self.dbis, store::IndexType::Eavt,
                                   Some(e), Some(a), None)?
            .collect_datoms()?;
        for datom in datoms {
            self.retract_datom_checked(datom.e, datom.a, &datom.v)?;
            if is_component {
                if let TypedValue::Ref(child) = datom.v {
                    let mut seen = BTreeSet::new();
                    self.retract_entity(child, &mut seen)?;
                }
            }
        }
        Ok(())
    }

    fn apply_cas(&mut self, e: Entid, a: Entid, old: Option<TypedValue>, new: TypedValue) -> Result<()> {
        let attribute = self.require_attribute(a)?;
        if attribute.multival {
            let values = store::values_for(self.txn, self.dbis, e, a)?;
            match old {
                Some(ref old_value) if values.contains(old_value) => {
                    self.retract_datom_checked(e, a, old_value)?;
                    self.add_datom_checked(e, a, new)
                },
                _ => {
                    let rendered: Vec<String> = values.iter()
                        .map(|v| v.to_edn_value().to_string())
                        .collect();
                    bail!(DbErrorKind::CasFailed {
                        e: e,
                        a: self.attribute_ident(a),
                        v: format!("({})", rendered.join(" ")),
                        expected: render_option(&old),
                    })
                },
            }
        } else {
            let current = store::first_value_for(self.txn, self.dbis, e, a)?;
            if current == old {
                self.add_datom_checked(e, a, new)
            } else {
                bail!(DbErrorKind::CasFailed {
                    e: e,
                    a: self.attribute_ident(a),
                    v: render_option(&current),
                    expected: render_option(&old),
                })
            }
        }
    }

    // ---------- Phase 4: derived tuples ----------

    fn recompute_touched_tuples(&mut self) -> Result<()> {
        let touched = ::std::mem::replace(&mut self.touched_tuples, BTreeSet::new());
        for (e, tuple_attr) in touched {
            let attribute = self.require_attribute(tuple_attr)?;
            let sources = attribute.tuple_attrs.clone().expect("touched tuples have sources");

            let mut components: Vec<Option<TypedValue>> = Vec::with_capacity(sources.len());
            for source in sources {
                components.push(store::first_value_for(self.txn, self.dbis, e, source)?);
            }
            let derived = if components.iter().all(|component| component.is_none()) {
                None
            } else {
                Some(TypedValue::Tuple(components))
            };

            let stored = store::first_value_for(self.txn, self.dbis, e, tuple_attr)?;
            if stored == derived {
                continue;
            }
            if let Some(old) = stored {
                self.retract_datom_checked(e, tuple_attr, &old)?;
            }
            if let Some(new) = derived {
                self.add_datom_checked(e, tuple_attr, new)?;
            }
        }
        Ok(())
    }

    // ---------- Phase 5: validation ----------

    fn validate_upsert_bindings(&mut self) -> Result<()> {
        let bindings = ::std::mem::replace(&mut self.upsert_bindings, vec![]);
        for (tempid, (a, v), e) in bindings {
            let current = store::first_value_for(self.txn, self.dbis, e, a)?;
            if current.as_ref() != Some(&v) {
                bail!(DbErrorKind::ConflictingUpserts(format!(
                    "tempid {} upserted to {} via {} {}, but the transaction changes that value",
                    tempid, e, self.attribute_ident(a), v.to_edn_value())));
            }
        }
        Ok(())
    }

    fn validate_tuple_claims(&mut self, claims: Vec<(OpType, Entid, Entid, TypedValue)>) -> Result<()> {
        for (op, e, a, v) in claims {
            let ident = self.attribute_ident(a);
            match op {
                OpType::Retract => bail!(DbErrorKind::TupleAttrModification(ident)),
                OpType::Add => {
                    let stored = store::first_value_for(self.txn, self.dbis, e, a)?;
                    if stored.as_ref() != Some(&v) {
                        bail!(DbErrorKind::TupleAttrModification(ident));
                    }
                    // The claim matches what the transactor derived; drop it
                    // as redundant.
                },
            }
        }
        Ok(())
    }

    // ---------- Phase 6: bookkeeping ----------

    fn stamp_entity_times(&mut self) -> Result<()> {
        let touched: BTreeSet<Entid> = self.tx_data.iter()
            .map(|datom| datom.e)
            .filter(|&e| e >= entids::USER0 && e < entids::TX0)
            .collect();
        let now = TypedValue::Instant(self.tx_instant);
        for e in touched {
            if store::first_value_for(self.txn, self.dbis, e, entids::DB_CREATED_AT)?.is_none() {
                self.add_datom_checked(e, entids::DB_CREATED_AT, now.clone())?;
            }
            self.add_datom_checked(e, entids::DB_UPDATED_AT, now.clone())?;
        }
        Ok(())
    }

    fn update_metadata(&mut self) -> Result<Option<Schema>> {
        let mut assertions = vec![];
        for datom in &self.tx_data {
            if !entids::is_schema_attribute(datom.a) {
                continue;
            }
            if !datom.added {
                bail!(DbErrorKind::NotYetImplemented(
                    "retracting metadata assertions".to_string()));
            }
            assertions.push((datom.e, datom.a, datom.v.clone()));
        }
        if assertions.is_empty() {
            return Ok(None);
        }

        let mut next_schema = self.schema.clone();
        let report = metadata::update_schema_from_entid_triples(&mut next_schema, assertions)?;
        if report.is_empty() {
            return Ok(None);
        }

        let changed: BTreeSet<Entid> = report.attributes_installed.iter().cloned()
            .chain(report.attributes_altered.keys().cloned())
            .chain(report.idents_installed.keys().cloned())
            .collect();
        for entid in changed {
            let ident = next_schema.get_ident(entid)
                                   .cloned()
                                   .expect("metadata installs idents before attributes");
            let attribute = next_schema.attribute_for_entid(entid)
                                       .cloned()
                                       .unwrap_or_else(Attribute::default);
            store::write_schema_entry(self.txn, self.dbis, &ident, entid, &attribute)?;
        }
        Ok(Some(next_schema))
    }
}

fn render_option(v: &Option<TypedValue>) -> String {
    match *v {
        Some(ref v) => v.to_edn_value().to_string(),
        None => "nil".to_string(),
    }
}

/// A helper for the common whole-batch path: parse an EDN transaction
/// string into entities.
pub fn parse_tx(input: &str) -> Result<Vec<Entity<edn::Value>>> {
    let form = edn::parse::value(input)?;
    Ok(edn::entities::entities_from_value(&form)?)
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;

    use lmdb::Transaction;

    use substrate::{
        DbEnv,
        DEFAULT_MAX_READERS,
    };
    use bootstrap;
    use debug;

    struct TestStore {
        _dir: tempfile::TempDir,
        env: DbEnv,
        dbis: Dbis,
        schema: Schema,
        options: StoreOptions,
        registry: TxFunctionRegistry,
    }

    impl TestStore {
        fn new() -> TestStore {
            TestStore::with_options(StoreOptions::default())
        }

        fn with_options(options: StoreOptions) -> TestStore {
            let dir = tempfile::tempdir().expect("tempdir");
            let env = DbEnv::open(dir.path(), 1 << 24, DEFAULT_MAX_READERS).expect("env");
            let dbis = store::open_dbis(&env).expect("dbis");
            let mut txn = env.begin_write().expect("write");
            let schema = bootstrap::ensure_initialized(&mut txn, &dbis, &options).expect("seeded");
            txn.commit().expect("committed");
            TestStore {
                _dir: dir,
                env: env,
                dbis: dbis,
                schema: schema,
                options: options,
                registry: TxFunctionRegistry::new(),
            }
        }

        fn counters(&self) -> (Entid, Entid) {
            let read = self.env.begin_read().expect("read");
            let next_eid = store::get_meta_i64(&read, &self.dbis, store::META_NEXT_EID)
                .expect("meta").expect("seeded");
            let next_tx = store::get_meta_i64(&read, &self.dbis, store::META_NEXT_TX)
                .expect("meta").expect("seeded");
            (next_eid, next_tx)
        }

        fn transact(&mut self, input: &str) -> Result<TxReport> {
            let entities = parse_tx(input)?;
            let (next_eid, next_tx) = self.counters();
            let mut txn = self.env.begin_write().expect("write");
            match transact(&mut txn, &self.dbis, &self.schema, &self.options,
                           &self.registry, next_eid, next_tx, entities) {
                Ok((report, next_schema)) => {
                    txn.commit().expect("committed");
                    if let Some(next_schema) = next_schema {
                        self.schema = next_schema;
                    }
                    Ok(report)
                },
                Err(e) => {
                    // Abort: partial state never becomes visible.
                    drop(txn);
                    Err(e)
                },
            }
        }

        fn datoms(&self) -> Vec<Datom> {
            let read = self.env.begin_read().expect("read");
            debug::user_datoms(&read, &self.dbis).expect("datoms")
        }
    }

    fn kw(ns: &str, name: &str) -> Keyword {
        Keyword::namespaced(ns, name)
    }

    fn install_person_schema(store: &mut TestStore) {
        store.transact(r#"[
            {:db/ident :person/name :db/valueType :db.type/string :db/cardinality :db.cardinality/one :db/unique :db.unique/identity}
            {:db/ident :person/age :db/valueType :db.type/long :db/cardinality :db.cardinality/one :db/index true}
            {:db/ident :person/friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}
        ]"#).expect("schema installed");
    }

    #[test]
    fn test_schema_install_and_assert() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);

        let (attribute, _) = store.schema.attribute_for_ident(&kw("person", "name")).expect("attribute");
        assert!(attribute.unique_identity());

        let report = store.transact(r#"[[:db/add "ivan" :person/name "Ivan"]
                                        [:db/add "ivan" :person/age 15]]"#).expect("transacted");
        let ivan = report.tempids["ivan"];
        assert!(ivan >= entids::USER0);
        assert_eq!(report.tempids[":db/current-tx"], report.tx_id);

        // Datoms present in the indices.
        let datoms = store.datoms();
        assert!(datoms.iter().any(|d| d.e == ivan && d.v == TypedValue::typed_string("Ivan")));
    }

    #[test]
    fn test_cardinality_one_replacement() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);
        store.transact(r#"[[:db/add "e" :person/name "Ivan"] [:db/add "e" :person/age 15]]"#)
             .expect("transacted");
        let report = store.transact(r#"[[:db/add [:person/name "Ivan"] :person/age 16]]"#)
                          .expect("transacted");

        // The replacement shows up as a retraction plus an assertion.
        let age = store.schema.get_entid(&kw("person", "age")).unwrap().0;
        let ops: Vec<(bool, i64)> = report.tx_data.iter()
            .filter(|d| d.a == age)
            .map(|d| (d.added, d.v.as_long().unwrap()))
            .collect();
        assert_eq!(vec![(false, 15), (true, 16)], ops);
    }

    #[test]
    fn test_upsert_and_conflict() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);
        let report = store.transact(r#"[[:db/add "a" :person/name "Ivan"]]"#).expect("transacted");
        let ivan = report.tempids["a"];

        // Upsert: same unique value binds the tempid to the existing
        // entity.
        let report = store.transact(r#"[{:person/name "Ivan" :person/age 20}]"#).expect("upserted");
        assert!(report.tempids.values().any(|&e| e == ivan));

        // Conflict: one tempid claiming two existing identities.
        store.transact(r#"[[:db/add "b" :person/name "Petr"]]"#).expect("transacted");
        let err = store.transact(r#"[[:db/add "x" :person/name "Ivan"]
                                     [:db/add "x" :person/name "Petr"]]"#).unwrap_err();
        assert!(err.to_string().starts_with("Conflicting upserts"), "got: {}", err);
    }

    #[test]
    fn test_tempids_used_only_as_value() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);
        let err = store.transact(r#"[[:db/add -1 :person/friend -2]]"#).unwrap_err();
        assert_eq!("Tempids used only as value in transaction: (-2)", err.to_string());
    }

    #[test]
    fn test_unique_constraint() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);
        store.transact(r#"[{:db/ident :person/ssn :db/valueType :db.type/string :db/unique :db.unique/value}]"#)
             .expect("schema");
        store.transact(r#"[[:db/add "a" :person/ssn "123"]]"#).expect("transacted");
        let err = store.transact(r#"[[:db/add "b" :person/ssn "123"]]"#).unwrap_err();
        assert!(err.to_string().starts_with("Cannot add"), "got: {}", err);
        assert!(err.to_string().ends_with("because of unique constraint"), "got: {}", err);
    }

    #[test]
    fn test_cas() {
        let mut store = TestStore::new();
        store.transact(r#"[{:db/ident :weight :db/valueType :db.type/long :db/cardinality :db.cardinality/one}]"#)
             .expect("schema");
        store.transact(r#"[[:db/add 1 :weight 200]]"#).expect("transacted");
        store.transact(r#"[[:db.fn/cas 1 :weight 200 300]]"#).expect("cas ok");

        let err = store.transact(r#"[[:db.fn/cas 1 :weight 200 210]]"#).unwrap_err();
        assert!(err.to_string().contains("[1 :weight 300], expected 200"), "got: {}", err);

        let err = store.transact(r#"[[:db.fn/cas "t" :weight 300 400]]"#).unwrap_err();
        assert!(err.to_string().starts_with("Invalid tempid in :db.fn/cas"), "got: {}", err);
    }

    #[test]
    fn test_retract_entity_with_incoming_refs() {
        let mut store = TestStore::new();
        install_person_schema(&mut store);
        store.transact(r#"[[:db/add 1 :person/name "Ivan"]
                           [:db/add 2 :person/name "Petr"]
                           [:db/add 1 :person/friend 2]]"#).expect("transacted");
        store.transact(r#"[[:db.fn/retractEntity 2]]"#).expect("retracted");

        let datoms = store.datoms();
        assert!(datoms.iter().all(|d| d.e != 2), "datoms of 2 remain: {:?}", datoms);
        assert!(datoms.iter().all(|d| d.v != TypedValue::Ref(2)), "refs to 2 remain: {:?}", datoms);
        // Ivan survives untouched.
        assert!(datoms.iter().any(|d| d.e == 1 && d.v == TypedValue::typed_string("Ivan")));
    }

    #[test]
    fn test_component_retraction_recurses() {
        let mut store = TestStore::new();
        store.transact(r#"[
            {:db/ident :order/line :db/valueType :db.type/ref :db/cardinality :db.cardinality/many :db/isComponent true}
            {:db/ident :line/sku :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        ]"#).expect("schema");
        let report = store.transact(r#"[{:db/id "o" :order/line [{:line/sku "a"} {:line/sku "b"}]}]"#)
                          .expect("transacted");
        let order = report.tempids["o"];
        store.transact(&format!("[[:db.fn/retractEntity {}]]", order)).expect("retracted");
        assert!(store.datoms().is_empty(), "datoms remain: {:?}", store.datoms());
    }

    #[test]
    fn test_transaction_functions() {
        let mut store = TestStore::new();
        store.transact(r#"[{:db/ident :counter/value :db/valueType :db.type/long :db/cardinality :db.cardinality/one}]"#)
             .expect("schema");
        store.transact(r#"[[:db/add 1 :counter/value 1]]"#).expect("transacted");

        store.registry.insert(kw("counter", "set"), Arc::new(|args: &[edn::Value]| {
            let e = args[0].as_integer().expect("entity argument");
            let v = args[1].as_integer().expect("value argument");
            Ok(vec![edn::parse::value(&format!("[:db/add {} :counter/value {}]", e, v)).expect("form")])
        }));

        store.transact(r#"[[:counter/set 1 5]]"#).expect("fn applied");
        let err = store.transact(r#"[[:counter/missing 1 5]]"#).unwrap_err();
        assert!(err.to_string().starts_with("Unknown transaction fn"), "got: {}", err);
    }

    #[test]
    fn test_auto_entity_time() {
        let mut store = TestStore::with_options(StoreOptions::default().with_auto_entity_time());
        install_person_schema(&mut store);
        let report = store.transact(r#"[[:db/add "e" :person/name "Ivan"]]"#).expect("transacted");
        let e = report.tempids["e"];

        let created = store.schema.get_entid(&kw("db", "created-at")).unwrap().0;
        let updated = store.schema.get_entid(&kw("db", "updated-at")).unwrap().0;
        let datoms = store.datoms();
        assert!(datoms.iter().any(|d| d.e == e && d.a == created));
        assert!(datoms.iter().any(|d| d.e == e && d.a == updated));
    }

    #[test]
    fn test_validate_data_rejects_mismatches() {
        let mut store = TestStore::with_options(StoreOptions::default().with_validation());
        store.transact(r#"[{:db/ident :count :db/valueType :db.type/long :db/cardinality :db.cardinality/one}]"#)
             .expect("schema");
        let err = store.transact(r#"[[:db/add 1 :count "five"]]"#).unwrap_err();
        assert!(err.to_string().starts_with("Type mismatch"), "got: {}", err);
    }
}

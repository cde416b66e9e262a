// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The datom store: maintenance of the four indices over the substrate, and
//! sorted iteration over them.
//!
//! Physical layout (one LMDB dbi per index):
//!
//! - `eav`: key `(e, a, v)` — the primary index;
//! - `aev`: key `(a, e, v)` — all values of an attribute;
//! - `ave`: key `(a, v, e)` — only attributes that are indexed, unique, or
//!   refs; serves value range scans;
//! - `vae`: key `(v, a, e)` — only ref-valued attributes; serves reverse
//!   navigation.
//!
//! Every row's value is the datom payload `(e, a, v, tx, added)`; oversize
//! values are spilled to the `giants` dbi and referenced by content hash.

use std::ops::Bound;

use lmdb::{
    Database,
    RwTransaction,
    Transaction,
};

use datalith_core::{
    Attribute,
    Entid,
    HasSchema,
    Keyword,
    Schema,
    TypedValue,
};
use edn;
use codec::{
    self,
    KeyedValue,
};
use errors::{
    DbErrorKind,
    Result,
};
use substrate::{
    self,
    DbEnv,
    KvOp,
    RangeIter,
};
use types::Datom;

/// The store's dbis, opened once per environment.
#[derive(Clone, Copy, Debug)]
pub struct Dbis {
    pub eav: Database,
    pub aev: Database,
    pub ave: Database,
    pub vae: Database,
    pub giants: Database,
    pub schema: Database,
    pub meta: Database,
}

pub fn open_dbis(env: &DbEnv) -> Result<Dbis> {
    Ok(Dbis {
        eav: env.create_dbi("eav")?,
        aev: env.create_dbi("aev")?,
        ave: env.create_dbi("ave")?,
        vae: env.create_dbi("vae")?,
        giants: env.create_dbi("giants")?,
        schema: env.create_dbi("schema")?,
        meta: env.create_dbi("meta")?,
    })
}

/// The four logical orderings.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum IndexType {
    Eavt,
    Aevt,
    Avet,
    Vaet,
}

// Meta dbi keys.
pub const META_FORMAT: &[u8] = b"format-version";
pub const META_NEXT_EID: &[u8] = b"next-eid";
pub const META_NEXT_TX: &[u8] = b"next-tx";
pub const META_MAX_READERS: &[u8] = b"options/max-readers";
pub const META_VALIDATE_DATA: &[u8] = b"options/validate-data";
pub const META_AUTO_ENTITY_TIME: &[u8] = b"options/auto-entity-time";

pub const FORMAT_VERSION: i64 = 1;

fn eav_key(e: Entid, a: Entid, v_bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + v_bytes.len());
    codec::push_i64(&mut key, e);
    codec::push_i64(&mut key, a);
    key.extend_from_slice(v_bytes);
    key
}

fn aev_key(a: Entid, e: Entid, v_bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + v_bytes.len());
    codec::push_i64(&mut key, a);
    codec::push_i64(&mut key, e);
    key.extend_from_slice(v_bytes);
    key
}

fn ave_key(a: Entid, v_bytes: &[u8], e: Entid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + v_bytes.len());
    codec::push_i64(&mut key, a);
    key.extend_from_slice(v_bytes);
    codec::push_i64(&mut key, e);
    key
}

fn vae_key(v_bytes: &[u8], a: Entid, e: Entid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + v_bytes.len());
    key.extend_from_slice(v_bytes);
    codec::push_i64(&mut key, a);
    codec::push_i64(&mut key, e);
    key
}

const PAYLOAD_INLINE: u8 = 0;
const PAYLOAD_GIANT: u8 = 1;

fn datom_payload(e: Entid, a: Entid, tx: Entid, added: bool, v: &KeyedValue) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    codec::push_i64(&mut payload, e);
    codec::push_i64(&mut payload, a);
    codec::push_i64(&mut payload, tx);
    payload.push(if added { 1 } else { 0 });
    match *v {
        KeyedValue::Inline(ref bytes) => {
            payload.push(PAYLOAD_INLINE);
            payload.extend_from_slice(bytes);
        },
        KeyedValue::Giant { ref hash, .. } => {
            payload.push(PAYLOAD_GIANT);
            payload.extend_from_slice(hash);
        },
    }
    payload
}

/// Decode a datom payload, resolving an out-of-line value through the
/// `giants` dbi.
pub fn read_datom<T: Transaction>(txn: &T, dbis: &Dbis, payload: &[u8]) -> Result<Datom> {
    let (e, rest) = codec::read_i64(payload)?;
    let (a, rest) = codec::read_i64(rest)?;
    let (tx, rest) = codec::read_i64(rest)?;
    let added = match rest.first() {
        Some(&b) => b != 0,
        None => bail!(DbErrorKind::CorruptValue("truncated datom payload".to_string())),
    };
    let rest = &rest[1..];
    let v = match rest.first() {
        Some(&PAYLOAD_INLINE) => codec::read_value(&rest[1..])?.0,
        Some(&PAYLOAD_GIANT) => {
            let hash = &rest[1..];
            match substrate::get_kv(txn, dbis.giants, hash)? {
                Some(full) => codec::read_value(full)?.0,
                None => bail!(DbErrorKind::CorruptValue("dangling giant reference".to_string())),
            }
        },
        _ => bail!(DbErrorKind::CorruptValue("truncated datom value".to_string())),
    };
    Ok(Datom::new(e, a, v, tx, added))
}

/// Insert a datom into all applicable indices.
///
/// Idempotent: returns `false` without touching the store when the exact
/// `(e, a, v)` is already present.
pub fn add_datom(txn: &mut RwTransaction,
                 dbis: &Dbis,
                 schema: &Schema,
                 e: Entid,
                 a: Entid,
                 v: &TypedValue,
                 tx: Entid)
                 -> Result<bool> {
    let attribute = match schema.attribute_for_entid(a) {
        Some(attribute) => attribute,
        None => bail!(DbErrorKind::UnknownAttribute(a)),
    };

    let keyed = codec::keyed_value(v);
    let v_bytes = keyed.key_bytes().to_vec();

    let eav = eav_key(e, a, &v_bytes);
    if substrate::get_kv(txn, dbis.eav, &eav)?.is_some() {
        return Ok(false);
    }

    let payload = datom_payload(e, a, tx, true, &keyed);
    let mut ops = vec![];
    if let KeyedValue::Giant { ref hash, ref full, .. } = keyed {
        ops.push(KvOp::Put { db: dbis.giants, key: hash.to_vec(), value: full.clone() });
    }
    ops.push(KvOp::Put { db: dbis.eav, key: eav, value: payload.clone() });
    ops.push(KvOp::Put { db: dbis.aev, key: aev_key(a, e, &v_bytes), value: payload.clone() });
    if attribute.has_avet() {
        ops.push(KvOp::Put { db: dbis.ave, key: ave_key(a, &v_bytes, e), value: payload.clone() });
    }
    if attribute.is_ref() {
        ops.push(KvOp::Put { db: dbis.vae, key: vae_key(&v_bytes, a, e), value: payload });
    }
    substrate::apply_ops(txn, ops)?;
    Ok(true)
}

/// Remove a datom from all indices. Returns `false` if it was absent. The
/// content-addressed giant blob, if any, stays: other datoms may share it.
pub fn retract_datom(txn: &mut RwTransaction,
                     dbis: &Dbis,
                     schema: &Schema,
                     e: Entid,
                     a: Entid,
                     v: &TypedValue)
                     -> Result<bool> {
    let attribute = match schema.attribute_for_entid(a) {
        Some(attribute) => attribute,
        None => bail!(DbErrorKind::UnknownAttribute(a)),
    };

    let keyed = codec::keyed_value(v);
    let v_bytes = keyed.key_bytes().to_vec();

    let eav = eav_key(e, a, &v_bytes);
    if substrate::get_kv(txn, dbis.eav, &eav)?.is_none() {
        return Ok(false);
    }

    let mut ops = vec![
        KvOp::Del { db: dbis.eav, key: eav },
        KvOp::Del { db: dbis.aev, key: aev_key(a, e, &v_bytes) },
    ];
    if attribute.has_avet() {
        ops.push(KvOp::Del { db: dbis.ave, key: ave_key(a, &v_bytes, e) });
    }
    if attribute.is_ref() {
        ops.push(KvOp::Del { db: dbis.vae, key: vae_key(&v_bytes, a, e) });
    }
    substrate::apply_ops(txn, ops)?;
    Ok(true)
}

/// Lazy sorted iteration of datoms.
pub struct DatomIter<'t, T: Transaction + 't> {
    txn: &'t T,
    dbis: Dbis,
    inner: RangeIter<'t>,
}

impl<'t, T: Transaction> DatomIter<'t, T> {
    pub fn next(&mut self) -> Result<Option<Datom>> {
        match self.inner.next()? {
            Some((_, payload)) => read_datom(self.txn, &self.dbis, payload).map(Some),
            None => Ok(None),
        }
    }

    pub fn collect_datoms(mut self) -> Result<Vec<Datom>> {
        let mut out = vec![];
        while let Some(datom) = self.next()? {
            out.push(datom);
        }
        Ok(out)
    }
}

fn index_dbi(dbis: &Dbis, index: IndexType) -> Database {
    match index {
        IndexType::Eavt => dbis.eav,
        IndexType::Aevt => dbis.aev,
        IndexType::Avet => dbis.ave,
        IndexType::Vaet => dbis.vae,
    }
}

/// Build the key prefix binding the leading components of `index`.
///
/// Components bind in index order; a bound component after an unbound one is
/// an input error.
fn index_prefix(index: IndexType,
                e: Option<Entid>,
                a: Option<Entid>,
                v: Option<&TypedValue>)
                -> Result<Vec<u8>> {
    let mut prefix = vec![];
    let components: [(&str, Option<Vec<u8>>); 3] = match index {
        IndexType::Eavt => [
            ("e", e.map(|x| i64_bytes(x))),
            ("a", a.map(|x| i64_bytes(x))),
            ("v", v.map(value_bytes)),
        ],
        IndexType::Aevt => [
            ("a", a.map(|x| i64_bytes(x))),
            ("e", e.map(|x| i64_bytes(x))),
            ("v", v.map(value_bytes)),
        ],
        IndexType::Avet => [
            ("a", a.map(|x| i64_bytes(x))),
            ("v", v.map(value_bytes)),
            ("e", e.map(|x| i64_bytes(x))),
        ],
        IndexType::Vaet => [
            ("v", v.map(value_bytes)),
            ("a", a.map(|x| i64_bytes(x))),
            ("e", e.map(|x| i64_bytes(x))),
        ],
    };

    let mut stop = false;
    for &(name, ref bytes) in components.iter() {
        match (stop, bytes) {
            (false, &Some(ref b)) => prefix.extend_from_slice(b),
            (false, &None) => stop = true,
            (true, &Some(_)) => {
                bail!(DbErrorKind::InputError(format!(
                    "component {} bound after an unbound component in {:?} scan", name, index)));
            },
            (true, &None) => {},
        }
    }
    Ok(prefix)
}

fn i64_bytes(x: i64) -> Vec<u8> {
    let mut b = vec![];
    codec::push_i64(&mut b, x);
    b
}

fn value_bytes(v: &TypedValue) -> Vec<u8> {
    codec::keyed_value(v).key_bytes().to_vec()
}

/// Sorted iteration over the chosen index, bounded to the given component
/// prefix.
pub fn datoms<'t, T: Transaction>(txn: &'t T,
                                  dbis: &Dbis,
                                  index: IndexType,
                                  e: Option<Entid>,
                                  a: Option<Entid>,
                                  v: Option<&TypedValue>)
                                  -> Result<DatomIter<'t, T>> {
    let prefix = index_prefix(index, e, a, v)?;
    let (lower, upper) = substrate::prefix_bounds(&prefix);
    Ok(DatomIter {
        txn: txn,
        dbis: *dbis,
        inner: substrate::scan_range(txn, index_dbi(dbis, index), lower, upper)?,
    })
}

/// As `datoms`, but iterating in decreasing key order.
pub fn datoms_back<'t, T: Transaction>(txn: &'t T,
                                       dbis: &Dbis,
                                       index: IndexType,
                                       e: Option<Entid>,
                                       a: Option<Entid>,
                                       v: Option<&TypedValue>)
                                       -> Result<DatomIter<'t, T>> {
    let prefix = index_prefix(index, e, a, v)?;
    let (lower, upper) = substrate::prefix_bounds(&prefix);
    Ok(DatomIter {
        txn: txn,
        dbis: *dbis,
        inner: substrate::scan_range_back(txn, index_dbi(dbis, index), lower, upper)?,
    })
}

/// Iteration starting at the component prefix and continuing to the end of
/// the index.
pub fn seek_datoms<'t, T: Transaction>(txn: &'t T,
                                       dbis: &Dbis,
                                       index: IndexType,
                                       e: Option<Entid>,
                                       a: Option<Entid>,
                                       v: Option<&TypedValue>)
                                       -> Result<DatomIter<'t, T>> {
    let prefix = index_prefix(index, e, a, v)?;
    Ok(DatomIter {
        txn: txn,
        dbis: *dbis,
        inner: substrate::scan_range(txn, index_dbi(dbis, index),
                                     Bound::Included(prefix), Bound::Unbounded)?,
    })
}

/// Iteration from the end of the index backwards to the component prefix
/// (`:all-back` style).
pub fn seek_datoms_back<'t, T: Transaction>(txn: &'t T,
                                            dbis: &Dbis,
                                            index: IndexType,
                                            e: Option<Entid>,
                                            a: Option<Entid>,
                                            v: Option<&TypedValue>)
                                            -> Result<DatomIter<'t, T>> {
    let prefix = index_prefix(index, e, a, v)?;
    Ok(DatomIter {
        txn: txn,
        dbis: *dbis,
        inner: substrate::scan_range_back(txn, index_dbi(dbis, index),
                                          Bound::Included(prefix), Bound::Unbounded)?,
    })
}

/// Value range scan over AVET for one attribute.
pub fn index_range<'t, T: Transaction>(txn: &'t T,
                                       dbis: &Dbis,
                                       schema: &Schema,
                                       a: Entid,
                                       lo: Bound<&TypedValue>,
                                       hi: Bound<&TypedValue>)
                                       -> Result<DatomIter<'t, T>> {
    let attribute = match schema.attribute_for_entid(a) {
        Some(attribute) => attribute,
        None => bail!(DbErrorKind::UnknownAttribute(a)),
    };
    if !attribute.has_avet() {
        bail!(DbErrorKind::InputError(format!(
            "index-range requires an indexed, unique, or ref attribute; {} is none of these", a)));
    }

    let a_bytes = i64_bytes(a);
    let with_value = |v: &TypedValue| {
        let mut k = a_bytes.clone();
        k.extend_from_slice(&value_bytes(v));
        k
    };

    // Bounds on values become bounds on (a, v)-prefixed keys: every key
    // carries a trailing entid, so "past every key with this value prefix"
    // is the prefix successor.
    let lower = match lo {
        Bound::Unbounded => Bound::Included(a_bytes.clone()),
        Bound::Included(v) => Bound::Included(with_value(v)),
        Bound::Excluded(v) => {
            match substrate::prefix_successor(&with_value(v)) {
                Some(succ) => Bound::Included(succ),
                None => Bound::Unbounded,
            }
        },
    };
    let upper = match hi {
        Bound::Unbounded => {
            match substrate::prefix_successor(&a_bytes) {
                Some(succ) => Bound::Excluded(succ),
                None => Bound::Unbounded,
            }
        },
        Bound::Included(v) => {
            match substrate::prefix_successor(&with_value(v)) {
                Some(succ) => Bound::Excluded(succ),
                None => Bound::Unbounded,
            }
        },
        Bound::Excluded(v) => Bound::Excluded(with_value(v)),
    };

    Ok(DatomIter {
        txn: txn,
        dbis: *dbis,
        inner: substrate::scan_range(txn, dbis.ave, lower, upper)?,
    })
}

/// All current values of `(e, a)`.
pub fn values_for<T: Transaction>(txn: &T,
                                  dbis: &Dbis,
                                  e: Entid,
                                  a: Entid)
                                  -> Result<Vec<TypedValue>> {
    let mut iter = datoms(txn, dbis, IndexType::Eavt, Some(e), Some(a), None)?;
    let mut out = vec![];
    while let Some(datom) = iter.next()? {
        out.push(datom.v);
    }
    Ok(out)
}

/// The current value of a cardinality-one `(e, a)`, if any.
pub fn first_value_for<T: Transaction>(txn: &T,
                                       dbis: &Dbis,
                                       e: Entid,
                                       a: Entid)
                                       -> Result<Option<TypedValue>> {
    let mut iter = datoms(txn, dbis, IndexType::Eavt, Some(e), Some(a), None)?;
    Ok(iter.next()?.map(|datom| datom.v))
}

/// Resolve `(a, v)` to the entity carrying it, via AVET.
pub fn lookup_av<T: Transaction>(txn: &T,
                                 dbis: &Dbis,
                                 schema: &Schema,
                                 a: Entid,
                                 v: &TypedValue)
                                 -> Result<Option<Entid>> {
    let attribute = match schema.attribute_for_entid(a) {
        Some(attribute) => attribute,
        None => bail!(DbErrorKind::UnknownAttribute(a)),
    };
    if !attribute.has_avet() {
        bail!(DbErrorKind::InputError(format!(
            "lookup by (a, v) requires an indexed, unique, or ref attribute; {} is none of these", a)));
    }
    let mut iter = datoms(txn, dbis, IndexType::Avet, None, Some(a), Some(v))?;
    Ok(iter.next()?.map(|datom| datom.e))
}

/// Whether the entity has any datoms at all.
pub fn entity_present<T: Transaction>(txn: &T, dbis: &Dbis, e: Entid) -> Result<bool> {
    let mut iter = datoms(txn, dbis, IndexType::Eavt, Some(e), None, None)?;
    Ok(iter.next()?.is_some())
}

pub fn get_meta_i64<T: Transaction>(txn: &T, dbis: &Dbis, key: &[u8]) -> Result<Option<i64>> {
    match substrate::get_kv(txn, dbis.meta, key)? {
        Some(bytes) => Ok(Some(codec::read_i64(bytes)?.0)),
        None => Ok(None),
    }
}

pub fn put_meta_i64(txn: &mut RwTransaction, dbis: &Dbis, key: &[u8], value: i64) -> Result<()> {
    substrate::apply_ops(txn, vec![KvOp::Put {
        db: dbis.meta,
        key: key.to_vec(),
        value: i64_bytes(value),
    }])
}

/// Persist one attribute (or bare ident) row in the `schema` dbi.
pub fn write_schema_entry(txn: &mut RwTransaction,
                          dbis: &Dbis,
                          ident: &Keyword,
                          entid: Entid,
                          attribute: &Attribute)
                          -> Result<()> {
    let rendered = ::schema::attribute_to_edn(entid, attribute).to_string();
    substrate::apply_ops(txn, vec![KvOp::Put {
        db: dbis.schema,
        key: ident.to_string().into_bytes(),
        value: rendered.into_bytes(),
    }])
}

/// Load the full schema from the `schema` dbi and derive the reverse schema.
pub fn read_schema<T: Transaction>(txn: &T, dbis: &Dbis) -> Result<Schema> {
    let mut schema = Schema::default();
    let mut iter = substrate::scan_range(txn, dbis.schema, Bound::Unbounded, Bound::Unbounded)?;
    while let Some((key, value)) = iter.next()? {
        let ident_text = ::std::str::from_utf8(key)
            .map_err(|e| DbErrorKind::CorruptValue(format!("bad schema dbi key: {}", e)))?;
        let ident = parse_ident(ident_text)?;
        let rendered = ::std::str::from_utf8(value)
            .map_err(|e| DbErrorKind::CorruptValue(format!("bad schema dbi value: {}", e)))?;
        let parsed = edn::parse::value(rendered)?;
        let (entid, attribute) = ::schema::attribute_from_edn(&parsed)?;
        schema.ident_map.insert(ident.clone(), entid);
        schema.entid_map.insert(entid, ident);
        if attribute != Attribute::default() {
            schema.attribute_map.insert(entid, attribute);
        }
    }
    schema.rebuild_reverse_schema();
    Ok(schema)
}

fn parse_ident(text: &str) -> Result<Keyword> {
    match edn::parse::value(text)? {
        edn::Value::Keyword(k) => Ok(k),
        x => bail!(DbErrorKind::CorruptValue(format!("expected ident in schema dbi, got {}", x))),
    }
}

// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The bootstrap vocabulary: the `:db/*` idents and attributes a fresh store
//! is seeded with, written both to the `schema` dbi and, as ordinary datoms,
//! to the indices, so that the vocabulary itself is queryable.

use lmdb::{
    RwTransaction,
    Transaction,
};

use datalith_core::{
    Attribute,
    Entid,
    Keyword,
    Schema,
    TypedValue,
    Unique,
    ValueType,
};
use entids;
use errors::Result;
use store::{
    self,
    Dbis,
};
use types::StoreOptions;

lazy_static! {
    /// Idents for entities that are not attributes: type, cardinality and
    /// uniqueness markers.
    static ref BOOTSTRAP_IDENTS: Vec<(Keyword, Entid)> = {
        vec![
            (Keyword::namespaced("db.type", "ref"), entids::DB_TYPE_REF),
            (Keyword::namespaced("db.type", "boolean"), entids::DB_TYPE_BOOLEAN),
            (Keyword::namespaced("db.type", "long"), entids::DB_TYPE_LONG),
            (Keyword::namespaced("db.type", "double"), entids::DB_TYPE_DOUBLE),
            (Keyword::namespaced("db.type", "instant"), entids::DB_TYPE_INSTANT),
            (Keyword::namespaced("db.type", "string"), entids::DB_TYPE_STRING),
            (Keyword::namespaced("db.type", "keyword"), entids::DB_TYPE_KEYWORD),
            (Keyword::namespaced("db.type", "symbol"), entids::DB_TYPE_SYMBOL),
            (Keyword::namespaced("db.type", "uuid"), entids::DB_TYPE_UUID),
            (Keyword::namespaced("db.type", "bytes"), entids::DB_TYPE_BYTES),
            (Keyword::namespaced("db.type", "tuple"), entids::DB_TYPE_TUPLE),
            (Keyword::namespaced("db.cardinality", "one"), entids::DB_CARDINALITY_ONE),
            (Keyword::namespaced("db.cardinality", "many"), entids::DB_CARDINALITY_MANY),
            (Keyword::namespaced("db.unique", "value"), entids::DB_UNIQUE_VALUE),
            (Keyword::namespaced("db.unique", "identity"), entids::DB_UNIQUE_IDENTITY),
        ]
    };

    /// The bootstrap attributes themselves.
    static ref BOOTSTRAP_ATTRIBUTES: Vec<(Keyword, Entid, Attribute)> = {
        let mut attributes = vec![];
        {
            let mut add = |ns: &str, name: &str, entid: Entid, attribute: Attribute| {
                attributes.push((Keyword::namespaced(ns, name), entid, attribute));
            };
            add("db", "ident", entids::DB_IDENT, Attribute {
                value_type: Some(ValueType::Keyword),
                unique: Some(Unique::Identity),
                ..Default::default()
            });
            add("db", "valueType", entids::DB_VALUE_TYPE, Attribute {
                value_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "cardinality", entids::DB_CARDINALITY, Attribute {
                value_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "unique", entids::DB_UNIQUE, Attribute {
                value_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "index", entids::DB_INDEX, Attribute {
                value_type: Some(ValueType::Boolean),
                ..Default::default()
            });
            add("db", "isComponent", entids::DB_IS_COMPONENT, Attribute {
                value_type: Some(ValueType::Boolean),
                ..Default::default()
            });
            add("db", "noHistory", entids::DB_NO_HISTORY, Attribute {
                value_type: Some(ValueType::Boolean),
                ..Default::default()
            });
            add("db", "txInstant", entids::DB_TX_INSTANT, Attribute {
                value_type: Some(ValueType::Instant),
                index: true,
                ..Default::default()
            });
            add("db", "tupleAttrs", entids::DB_TUPLE_ATTRS, Attribute {
                value_type: Some(ValueType::Tuple),
                tuple_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "tupleType", entids::DB_TUPLE_TYPE, Attribute {
                value_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "tupleTypes", entids::DB_TUPLE_TYPES, Attribute {
                value_type: Some(ValueType::Tuple),
                tuple_type: Some(ValueType::Ref),
                ..Default::default()
            });
            add("db", "doc", entids::DB_DOC, Attribute {
                value_type: Some(ValueType::String),
                ..Default::default()
            });
            add("db", "created-at", entids::DB_CREATED_AT, Attribute {
                value_type: Some(ValueType::Instant),
                ..Default::default()
            });
            add("db", "updated-at", entids::DB_UPDATED_AT, Attribute {
                value_type: Some(ValueType::Instant),
                ..Default::default()
            });
        }
        attributes
    };
}

/// The in-memory schema of a fresh store.
pub fn bootstrap_schema() -> Schema {
    let mut schema = Schema::default();
    for &(ref ident, entid) in BOOTSTRAP_IDENTS.iter() {
        schema.ident_map.insert(ident.clone(), entid);
        schema.entid_map.insert(entid, ident.clone());
    }
    for &(ref ident, entid, ref attribute) in BOOTSTRAP_ATTRIBUTES.iter() {
        schema.ident_map.insert(ident.clone(), entid);
        schema.entid_map.insert(entid, ident.clone());
        schema.attribute_map.insert(entid, attribute.clone());
    }
    schema.rebuild_reverse_schema();
    schema
}

/// Seed a fresh store: schema dbi rows, bootstrap datoms at `TX0`, counters
/// and options in the meta dbi. Idempotent across opens via the format
/// marker.
pub fn ensure_initialized(txn: &mut RwTransaction,
                          dbis: &Dbis,
                          options: &StoreOptions)
                          -> Result<Schema> {
    if store::get_meta_i64(txn, dbis, store::META_FORMAT)?.is_some() {
        return store::read_schema(txn, dbis);
    }

    let schema = bootstrap_schema();

    for (ident, &entid) in &schema.ident_map {
        let attribute = schema.attribute_map
                              .get(&entid)
                              .cloned()
                              .unwrap_or_else(Attribute::default);
        store::write_schema_entry(txn, dbis, ident, entid, &attribute)?;
    }

    // The vocabulary as datoms: `[e :db/ident ident]` plus the attribute
    // flags, all in the bootstrap transaction.
    for (ident, &entid) in &schema.ident_map {
        store::add_datom(txn, dbis, &schema, entid, entids::DB_IDENT,
                         &TypedValue::Keyword(ident.clone()), entids::TX0)?;
    }
    for (&entid, attribute) in &schema.attribute_map {
        if let Some(value_type) = attribute.value_type {
            let type_entid = schema.ident_map[&value_type.into_keyword()];
            store::add_datom(txn, dbis, &schema, entid, entids::DB_VALUE_TYPE,
                             &TypedValue::Ref(type_entid), entids::TX0)?;
        }
        let cardinality = if attribute.multival {
            entids::DB_CARDINALITY_MANY
        } else {
            entids::DB_CARDINALITY_ONE
        };
        store::add_datom(txn, dbis, &schema, entid, entids::DB_CARDINALITY,
                         &TypedValue::Ref(cardinality), entids::TX0)?;
        if let Some(ref unique) = attribute.unique {
            let unique_entid = match *unique {
                Unique::Value => entids::DB_UNIQUE_VALUE,
                Unique::Identity => entids::DB_UNIQUE_IDENTITY,
            };
            store::add_datom(txn, dbis, &schema, entid, entids::DB_UNIQUE,
                             &TypedValue::Ref(unique_entid), entids::TX0)?;
        }
        if attribute.index {
            store::add_datom(txn, dbis, &schema, entid, entids::DB_INDEX,
                             &TypedValue::Boolean(true), entids::TX0)?;
        }
    }

    store::put_meta_i64(txn, dbis, store::META_FORMAT, store::FORMAT_VERSION)?;
    store::put_meta_i64(txn, dbis, store::META_NEXT_EID, entids::USER0)?;
    store::put_meta_i64(txn, dbis, store::META_NEXT_TX, entids::TX0 + 1)?;
    store::put_meta_i64(txn, dbis, store::META_MAX_READERS,
                        i64::from(options.max_readers))?;
    store::put_meta_i64(txn, dbis, store::META_VALIDATE_DATA,
                        if options.validate_data { 1 } else { 0 })?;
    store::put_meta_i64(txn, dbis, store::META_AUTO_ENTITY_TIME,
                        if options.auto_entity_time { 1 } else { 0 })?;

    Ok(schema)
}

/// Read the persisted options back, preferring the stored values over the
/// caller's. Options are fixed at creation.
pub fn read_options<T: Transaction>(txn: &T,
                                    dbis: &Dbis,
                                    requested: &StoreOptions)
                                    -> Result<StoreOptions> {
    let mut options = requested.clone();
    if let Some(v) = store::get_meta_i64(txn, dbis, store::META_MAX_READERS)? {
        options.max_readers = v as u32;
    }
    if let Some(v) = store::get_meta_i64(txn, dbis, store::META_VALIDATE_DATA)? {
        options.validate_data = v != 0;
    }
    if let Some(v) = store::get_meta_i64(txn, dbis, store::META_AUTO_ENTITY_TIME)? {
        options.auto_entity_time = v != 0;
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;
    use substrate::{
        DbEnv,
        DEFAULT_MAX_READERS,
    };

    #[test]
    fn test_bootstrap_round_trips_through_schema_dbi() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = DbEnv::open(dir.path(), 1 << 24, DEFAULT_MAX_READERS).expect("env");
        let dbis = store::open_dbis(&env).expect("dbis");

        let mut txn = env.begin_write().expect("write");
        let seeded = ensure_initialized(&mut txn, &dbis, &StoreOptions::default()).expect("seeded");
        txn.commit().expect("committed");

        let read = env.begin_read().expect("read");
        let loaded = store::read_schema(&read, &dbis).expect("loaded");
        assert_eq!(seeded, loaded);
        assert_eq!(Some(entids::USER0),
                   store::get_meta_i64(&read, &dbis, store::META_NEXT_EID).expect("meta"));
    }

    #[test]
    fn test_options_persist_across_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = DbEnv::open(dir.path(), 1 << 24, DEFAULT_MAX_READERS).expect("env");
        let dbis = store::open_dbis(&env).expect("dbis");

        let requested = StoreOptions::default()
            .with_max_readers(16)
            .with_auto_entity_time();
        let mut txn = env.begin_write().expect("write");
        ensure_initialized(&mut txn, &dbis, &requested).expect("seeded");
        txn.commit().expect("committed");

        // A later open with different requested options sees the stored
        // ones.
        let read = env.begin_read().expect("read");
        let reread = read_options(&read, &dbis, &StoreOptions::default()).expect("options");
        assert_eq!(16, reread.max_readers);
        assert!(reread.auto_entity_time);
        assert!(!reread.validate_data);
    }

    #[test]
    fn test_second_open_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = DbEnv::open(dir.path(), 1 << 24, DEFAULT_MAX_READERS).expect("env");
        let dbis = store::open_dbis(&env).expect("dbis");

        let mut txn = env.begin_write().expect("write");
        let first = ensure_initialized(&mut txn, &dbis, &StoreOptions::default()).expect("seeded");
        txn.commit().expect("committed");

        let mut txn = env.begin_write().expect("write");
        let second = ensure_initialized(&mut txn, &dbis, &StoreOptions::default()).expect("reopened");
        txn.commit().expect("committed");

        assert_eq!(first, second);
    }
}

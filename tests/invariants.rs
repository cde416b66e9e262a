// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Quantified store invariants, checked over real on-disk state.

extern crate datalith;
extern crate datalith_db;
extern crate tempfile;

mod common;

use std::collections::BTreeSet;

use datalith::{
    Datom,
    HasSchema,
    TypedValue,
};
use datalith_db::store::{
    self,
    IndexType,
};

use common::open;

fn fixture(store: &common::TestStore) {
    store.conn.transact(r#"[
        {:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one :db/unique :db.unique/identity}
        {:db/ident :age :db/valueType :db.type/long :db/cardinality :db.cardinality/one :db/index true}
        {:db/ident :bio :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[{:db/id "i" :name "Ivan" :age 15 :bio "likes pizza"}
                            {:db/id "p" :name "Petr" :age 37 :friend "i"}]"#)
         .expect("transacted");
    store.conn.transact(r#"[[:db/retract [:name "Ivan"] :bio "likes pizza"]]"#)
         .expect("retracted");
}

fn index_datoms(store: &common::TestStore, index: IndexType) -> BTreeSet<Datom> {
    let txn = store.conn.env().begin_read().expect("read");
    store::datoms(&txn, store.conn.dbis(), index, None, None, None)
        .expect("iter")
        .collect_datoms()
        .expect("datoms")
        .into_iter()
        .collect()
}

/// Invariant 1: every EAVT datom appears in AEVT; in AVET iff the attribute
/// is indexed, unique, or a ref; in VAET iff the attribute is a ref.
#[test]
fn test_index_consistency() {
    let store = open();
    fixture(&store);

    let eavt = index_datoms(&store, IndexType::Eavt);
    let aevt = index_datoms(&store, IndexType::Aevt);
    let avet = index_datoms(&store, IndexType::Avet);
    let vaet = index_datoms(&store, IndexType::Vaet);

    assert!(!eavt.is_empty());
    assert_eq!(eavt, aevt);

    let schema = store.conn.current_schema();
    let expected_avet: BTreeSet<Datom> = eavt.iter()
        .filter(|d| schema.attribute_for_entid(d.a).map(|a| a.has_avet()).unwrap_or(false))
        .cloned()
        .collect();
    assert_eq!(expected_avet, avet);

    let expected_vaet: BTreeSet<Datom> = eavt.iter()
        .filter(|d| schema.is_ref(d.a))
        .cloned()
        .collect();
    assert_eq!(expected_vaet, vaet);
}

/// Invariant 2: a composite tuple datom exists iff at least one source is
/// present, with nil padding for absent sources.
#[test]
fn test_tuple_derivation_invariant() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :x :db/valueType :db.type/long :db/cardinality :db.cardinality/one}
        {:db/ident :y :db/valueType :db.type/long :db/cardinality :db.cardinality/one}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[
        {:db/ident :x+y :db/valueType :db.type/tuple :db/tupleAttrs [:x :y]
         :db/cardinality :db.cardinality/one}
    ]"#).expect("tuple attribute installed");

    store.conn.transact(r#"[[:db/add 1 :x 1]
                            [:db/add 2 :x 2] [:db/add 2 :y 20]
                            [:db/add 3 :y 30]]"#).expect("transacted");

    let schema = store.conn.current_schema();
    let x = schema.get_entid(&datalith::Keyword::plain("x")).unwrap().0;
    let y = schema.get_entid(&datalith::Keyword::plain("y")).unwrap().0;
    let x_plus_y = schema.get_entid(&datalith::Keyword::plain("x+y")).unwrap().0;

    let datoms = store.conn.datoms().expect("datoms");
    let entities: BTreeSet<i64> = datoms.iter().map(|d| d.e).collect();
    for e in entities {
        let source_present = datoms.iter().any(|d| d.e == e && (d.a == x || d.a == y));
        let tuple: Vec<&Datom> = datoms.iter().filter(|d| d.e == e && d.a == x_plus_y).collect();
        assert_eq!(source_present, tuple.len() == 1, "entity {}", e);
        if let Some(tuple) = tuple.first() {
            let expected = TypedValue::Tuple(vec![
                datoms.iter().find(|d| d.e == e && d.a == x).map(|d| d.v.clone()),
                datoms.iter().find(|d| d.e == e && d.a == y).map(|d| d.v.clone()),
            ]);
            assert_eq!(expected, tuple.v, "entity {}", e);
        }
    }
}

/// Invariant 3: no two datoms share (a, v) for a unique attribute.
#[test]
fn test_unique_attributes_hold_db_wide() {
    let store = open();
    fixture(&store);

    let schema = store.conn.current_schema();
    let eavt = index_datoms(&store, IndexType::Eavt);
    let mut seen: BTreeSet<(i64, TypedValue)> = BTreeSet::new();
    for d in &eavt {
        let unique = schema.attribute_for_entid(d.a).map(|a| a.is_unique()).unwrap_or(false);
        if unique {
            assert!(seen.insert((d.a, d.v.clone())),
                    "duplicate unique (a, v): {:?}", d);
        }
    }

    // And the transactor rejects a violation outright.
    let err = store.conn.transact(r#"[[:db/add 100 :name "Ivan"]]"#).unwrap_err();
    assert!(err.to_string().starts_with("Cannot add"), "got: {}", err);
}

/// Invariant 4: applying a report's tx-data to the datoms visible before
/// the transaction yields the datoms visible after it.
#[test]
fn test_report_replay() {
    let store = open();
    fixture(&store);

    let visible = |store: &common::TestStore| -> BTreeSet<(i64, i64, TypedValue)> {
        store.conn.datoms().expect("datoms")
             .into_iter()
             .map(|d| (d.e, d.a, d.v))
             .collect()
    };

    let before = visible(&store);
    let report = store.conn
        .transact(r#"[{:name "Mara" :age 28}
                      [:db/add [:name "Petr"] :age 38]]"#)
        .expect("transacted");
    let after = visible(&store);

    let mut replayed = before.clone();
    for d in &report.tx_data {
        // The same filtering the debug view applies: schema bookkeeping and
        // tx timestamps are not part of the user-visible datom set.
        if datalith_db::entids::is_schema_attribute(d.a) || d.a == datalith_db::entids::DB_TX_INSTANT {
            continue;
        }
        if d.added {
            replayed.insert((d.e, d.a, d.v.clone()));
        } else {
            replayed.remove(&(d.e, d.a, d.v.clone()));
        }
    }
    assert_eq!(after, replayed);
    assert_eq!(report.db_before.next_tx + 1, report.db_after.next_tx);
    assert!(report.db_after.next_eid > report.db_before.next_eid);
}

/// Writes roll back wholesale: a failing item mid-transaction leaves no
/// trace and does not advance counters.
#[test]
fn test_failed_transaction_leaves_no_trace() {
    let store = open();
    fixture(&store);

    let before = store.conn.datoms().expect("datoms");
    let report_before = store.conn.transact("[]").expect("empty transaction");

    let err = store.conn
        .transact(r#"[[:db/add 50 :age 1] [:db/add 51 :name "Ivan"]]"#)
        .unwrap_err();
    assert!(err.to_string().starts_with("Cannot add"), "got: {}", err);

    let after = store.conn.datoms().expect("datoms");
    assert_eq!(before, after);

    let report_after = store.conn.transact("[]").expect("empty transaction");
    assert_eq!(report_before.db_after.next_eid, report_after.db_before.next_eid);
}

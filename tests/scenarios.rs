// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! End-to-end scenarios over a real on-disk store.

extern crate datalith;
extern crate tempfile;

mod common;

use std::collections::BTreeSet;

use datalith::{
    HasSchema,
    Keyword,
    QueryInputValue,
    QueryInputs,
    TypedValue,
};

use common::{
    entids,
    open,
};

fn people_schema(store: &common::TestStore) {
    store.conn.transact(r#"[
        {:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :age :db/valueType :db.type/long :db/cardinality :db.cardinality/one :db/index true}
    ]"#).expect("schema installed");
}

#[test]
fn test_s1_or_query() {
    let store = open();
    people_schema(&store);
    store.conn.transact(r#"[[:db/add 1 :name "Ivan"] [:db/add 1 :age 10]
                            [:db/add 2 :name "Ivan"] [:db/add 2 :age 20]
                            [:db/add 3 :name "Oleg"] [:db/add 3 :age 10]
                            [:db/add 4 :name "Oleg"] [:db/add 4 :age 20]
                            [:db/add 5 :name "Ivan"] [:db/add 5 :age 10]
                            [:db/add 6 :name "Ivan"] [:db/add 6 :age 20]]"#)
         .expect("transacted");

    let out = store.conn
        .q_once(r#"[:find ?e :where (or [?e :name "Oleg"] [?e :age 10])]"#,
                QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [1, 3, 4, 5].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_s2_tuple_attr_maintenance() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :a :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :b :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
    ]"#).expect("schema installed");
    // Idents resolve against the pre-transaction schema, so the composite
    // attribute follows in its own transaction.
    store.conn.transact(r#"[
        {:db/ident :a+b :db/valueType :db.type/tuple :db/tupleAttrs [:a :b]
         :db/cardinality :db.cardinality/one}
    ]"#).expect("tuple attribute installed");

    let schema = store.conn.current_schema();
    let tuple_attr = schema.get_entid(&Keyword::plain("a+b")).expect("a+b").0;

    let tuple_value_of = |store: &common::TestStore| -> Option<TypedValue> {
        store.conn.datoms().expect("datoms")
             .into_iter()
             .find(|d| d.e == 1 && d.a == tuple_attr)
             .map(|d| d.v)
    };

    store.conn.transact(r#"[[:db/add 1 :a "a"]]"#).expect("transacted");
    assert_eq!(Some(TypedValue::Tuple(vec![Some(TypedValue::String("a".to_string())), None])),
               tuple_value_of(&store));

    store.conn.transact(r#"[[:db/add 1 :b "b"]]"#).expect("transacted");
    assert_eq!(Some(TypedValue::Tuple(vec![Some(TypedValue::String("a".to_string())),
                                           Some(TypedValue::String("b".to_string()))])),
               tuple_value_of(&store));

    store.conn.transact(r#"[[:db/retract 1 :a "a"]]"#).expect("transacted");
    assert_eq!(Some(TypedValue::Tuple(vec![None, Some(TypedValue::String("b".to_string()))])),
               tuple_value_of(&store));

    // Retracting the other source removes the derived tuple entirely.
    store.conn.transact(r#"[[:db/retract 1 :b "b"]]"#).expect("transacted");
    assert_eq!(None, tuple_value_of(&store));
}

#[test]
fn test_s3_upsert_by_tuple_identity() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :a :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :b :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :c :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[
        {:db/ident :a+b :db/valueType :db.type/tuple :db/tupleAttrs [:a :b]
         :db/cardinality :db.cardinality/one :db/unique :db.unique/identity}
    ]"#).expect("tuple attribute installed");

    store.conn.transact(r#"[{:db/id 1 :a "A" :b "B"}]"#).expect("transacted");

    // Upsert through the tuple identity: the map lands on entity 1, and the
    // redundant direct tuple value is silently dropped.
    let report = store.conn.transact(r#"[{:a+b ["A" "B"] :c "C"}]"#).expect("upserted");
    assert!(report.tempids.values().any(|&e| e == 1),
            "expected the tempid to upsert onto entity 1: {:?}", report.tempids);
    let schema = store.conn.current_schema();
    let c = schema.get_entid(&Keyword::plain("c")).expect("c").0;
    assert!(store.conn.datoms().expect("datoms").iter()
                 .any(|d| d.e == 1 && d.a == c && d.v == TypedValue::String("C".to_string())));

    // Upserting through the tuple while changing one of its sources
    // contradicts the binding.
    let err = store.conn.transact(r#"[{:a+b ["A" "B"] :a "a"}]"#).unwrap_err();
    assert!(err.to_string().starts_with("Conflicting upserts"), "got: {}", err);
}

#[test]
fn test_s4_cas() {
    let store = open();
    store.conn.transact(r#"[{:db/ident :weight :db/valueType :db.type/long :db/cardinality :db.cardinality/one}]"#)
         .expect("schema installed");

    store.conn.transact(r#"[[:db/add 1 :weight 200]]"#).expect("transacted");
    store.conn.transact(r#"[[:db.fn/cas 1 :weight 200 300]]"#).expect("cas applied");

    let out = store.conn.q_once("[:find ?w . :where [1 :weight ?w]]", QueryInputs::default())
                  .expect("queried");
    match out.results {
        datalith::QueryResults::Scalar(Some(TypedValue::Long(300))) => {},
        ref r => panic!("expected 300, got {:?}", r),
    }

    let err = store.conn.transact(r#"[[:db.fn/cas 1 :weight 200 210]]"#).unwrap_err();
    assert!(err.to_string().contains("[1 :weight 300], expected 200"), "got: {}", err);
}

#[test]
fn test_s5_retract_entity_clears_incoming_refs() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[[:db/add 1 :name "Ivan"]
                            [:db/add 2 :name "Petr"]
                            [:db/add 1 :friend 2]
                            [:db/add 2 :friend 1]]"#).expect("transacted");

    store.conn.transact(r#"[[:db.fn/retractEntity 2]]"#).expect("retracted");

    let out = store.conn
        .q_once("[:find ?e :in $ ?x :where [?e :friend ?x]]",
                QueryInputs::default().with_value(QueryInputValue::Scalar(TypedValue::Ref(2))))
        .expect("queried");
    assert!(entids(&out.results).is_empty());

    // Ivan remains, friendless.
    let out = store.conn
        .q_once(r#"[:find ?e :where [?e :name "Ivan"]]"#, QueryInputs::default())
        .expect("queried");
    assert_eq!(1, entids(&out.results).len());
}

#[test]
fn test_s6_tempid_only_as_value() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}
    ]"#).expect("schema installed");

    let err = store.conn.transact(r#"[[:db/add -1 :friend -2]]"#).unwrap_err();
    assert_eq!("Tempids used only as value in transaction: (-2)", err.to_string());
}

#[test]
fn test_s7_search_ranking() {
    let store = open();
    store.conn.add_doc(&TypedValue::Long(0), "The quick red fox jumped over the lazy red dogs.")
         .expect("doc 0 indexed");
    store.conn.add_doc(&TypedValue::Long(1), "Mary had a little lamb whose fleece was red as fire.")
         .expect("doc 1 indexed");

    assert_eq!(2, store.conn.doc_count().expect("counted"));

    let hits: Vec<(TypedValue, datalith::DocId)> =
        store.conn.search("red fox").expect("searched").collect();
    assert_eq!(2, hits.len());
    // The bigram match on "red fox" ranks document 0 first.
    assert_eq!(TypedValue::Long(0), hits[0].0);
    assert_eq!(TypedValue::Long(1), hits[1].0);
}

#[test]
fn test_unique_constraint_via_derived_tuple() {
    let store = open();
    store.conn.transact(r#"[
        {:db/ident :a :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :b :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[
        {:db/ident :a+b :db/valueType :db.type/tuple :db/tupleAttrs [:a :b]
         :db/cardinality :db.cardinality/one :db/unique :db.unique/identity}
    ]"#).expect("tuple attribute installed");

    store.conn.transact(r#"[{:db/id 1 :a "A" :b "B"}]"#).expect("transacted");

    // A second entity deriving the same tuple violates the constraint, and
    // the whole transaction aborts.
    let err = store.conn.transact(r#"[{:db/id 2 :a "A" :b "B"}]"#).unwrap_err();
    assert!(err.to_string().starts_with("Cannot add"), "got: {}", err);
    assert!(store.conn.datoms().expect("datoms").iter().all(|d| d.e != 2),
            "no partial state from the aborted transaction may be visible");
}

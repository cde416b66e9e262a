// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Query engine coverage: negation, unions, predicates, function binds,
//! rules, inputs, projections, and multi-source joins.

extern crate datalith;
extern crate tempfile;

mod common;

use std::collections::BTreeSet;

use datalith::{
    DbView,
    QueryInputValue,
    QueryInputs,
    QueryResults,
    Sources,
    TypedValue,
    parse_rules,
    q_once,
};

use common::{
    entids,
    open,
};

fn people(store: &common::TestStore) {
    store.conn.transact(r#"[
        {:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
        {:db/ident :age :db/valueType :db.type/long :db/cardinality :db.cardinality/one :db/index true}
        {:db/ident :friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}
    ]"#).expect("schema installed");
    store.conn.transact(r#"[[:db/add 1 :name "Ivan"] [:db/add 1 :age 10]
                            [:db/add 2 :name "Petr"] [:db/add 2 :age 20]
                            [:db/add 3 :name "Oleg"] [:db/add 3 :age 30]
                            [:db/add 1 :friend 2]
                            [:db/add 2 :friend 3]]"#).expect("transacted");
}

#[test]
fn test_not() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once("[:find ?e :where [?e :name _] (not [?e :age 10])]", QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [2, 3].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_not_join_with_internal_variable() {
    let store = open();
    people(&store);
    // Entities without a friend older than 25.
    let out = store.conn
        .q_once("[:find ?e :where [?e :name _]
                  (not-join [?e] [?e :friend ?f] [?f :age ?a] [(> ?a 25)])]",
                QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [1, 3].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_predicates_filter() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once("[:find ?e :where [?e :age ?a] [(< ?a 25)]]", QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [1, 2].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_function_binds() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once(r#"[:find ?b :where [1 :age ?a] [(+ ?a 5) ?b]]"#, QueryInputs::default())
        .expect("queried");
    match out.results {
        QueryResults::Rel(ref rows) => {
            assert_eq!(vec![vec![TypedValue::Long(15)]], *rows);
        },
        ref r => panic!("expected rel, got {:?}", r),
    }
}

#[test]
fn test_tuple_and_untuple() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once("[:find ?n ?a2 :where [?e :name ?n] [?e :age ?a]
                  [(tuple ?n ?a) ?t] [(untuple ?t) [?n2 ?a2]]]",
                QueryInputs::default())
        .expect("queried");
    match out.results {
        QueryResults::Rel(ref rows) => {
            assert_eq!(3, rows.len());
            assert!(rows.contains(&vec![TypedValue::String("Ivan".to_string()), TypedValue::Long(10)]));
        },
        ref r => panic!("expected rel, got {:?}", r),
    }
}

#[test]
fn test_ground_collection() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once("[:find ?x :where [(ground [10 20 99]) [?x ...]] [_ :age ?x]]", QueryInputs::default())
        .expect("queried");
    match out.results {
        QueryResults::Rel(ref rows) => {
            let xs: BTreeSet<i64> = rows.iter().map(|r| r[0].as_long().unwrap()).collect();
            let expected: BTreeSet<i64> = [10, 20].iter().cloned().collect();
            assert_eq!(expected, xs);
        },
        ref r => panic!("expected rel, got {:?}", r),
    }
}

#[test]
fn test_or_join_with_and_branch() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once(r#"[:find ?e :where (or-join [?e]
                      [?e :name "Oleg"]
                      (and [?e :age ?a] [(< ?a 15)]))]"#,
                QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [1, 3].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_or_branches_must_share_free_vars() {
    let store = open();
    people(&store);
    let err = store.conn
        .q_once(r#"[:find ?e :where (or [?e :name "Oleg"] [?f :age 10])]"#, QueryInputs::default())
        .unwrap_err();
    assert!(err.to_string().contains("All clauses in 'or' must use the same set of free vars"),
            "got: {}", err);
}

#[test]
fn test_or_join_required_binding() {
    let store = open();
    people(&store);
    // `[[?a]]`-style required bindings demand that the variable is already
    // bound.
    let err = store.conn
        .q_once(r#"[:find ?e :where (or-join [?e [?a]] [?e :age ?a])]"#, QueryInputs::default())
        .unwrap_err();
    assert!(err.to_string().starts_with("Insufficient bindings"), "got: {}", err);

    let out = store.conn
        .q_once(r#"[:find ?e :where [?e :age ?a] (or-join [?e [?a]] [?e :age ?a])]"#,
                QueryInputs::default())
        .expect("queried");
    assert_eq!(3, entids(&out.results).len());
}

#[test]
fn test_scalar_coll_tuple_projections() {
    let store = open();
    people(&store);

    let out = store.conn
        .q_once(r#"[:find ?a . :where [1 :age ?a]]"#, QueryInputs::default())
        .expect("queried");
    assert_eq!(QueryResults::Scalar(Some(TypedValue::Long(10))), out.results);

    let out = store.conn
        .q_once(r#"[:find [?a ...] :where [_ :age ?a]]"#, QueryInputs::default())
        .expect("queried");
    match out.results {
        QueryResults::Coll(ref ages) => {
            let ages: BTreeSet<i64> = ages.iter().map(|v| v.as_long().unwrap()).collect();
            let expected: BTreeSet<i64> = [10, 20, 30].iter().cloned().collect();
            assert_eq!(expected, ages);
        },
        ref r => panic!("expected coll, got {:?}", r),
    }

    let out = store.conn
        .q_once(r#"[:find [?n ?a] :where [1 :name ?n] [1 :age ?a]]"#, QueryInputs::default())
        .expect("queried");
    assert_eq!(QueryResults::Tuple(Some(vec![TypedValue::String("Ivan".to_string()),
                                             TypedValue::Long(10)])),
               out.results);

    // A scalar over an empty result is None, not an error.
    let out = store.conn
        .q_once(r#"[:find ?a . :where [99 :age ?a]]"#, QueryInputs::default())
        .expect("queried");
    assert_eq!(QueryResults::Scalar(None), out.results);
}

#[test]
fn test_coll_and_rel_inputs() {
    let store = open();
    people(&store);

    let out = store.conn
        .q_once("[:find ?e :in $ [?name ...] :where [?e :name ?name]]",
                QueryInputs::default().with_value(QueryInputValue::Coll(vec![
                    TypedValue::String("Ivan".to_string()),
                    TypedValue::String("Oleg".to_string()),
                ])))
        .expect("queried");
    let expected: BTreeSet<i64> = [1, 3].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));

    let out = store.conn
        .q_once("[:find ?e :in $ [[?name ?age]] :where [?e :name ?name] [?e :age ?age]]",
                QueryInputs::default().with_value(QueryInputValue::Rel(vec![
                    vec![TypedValue::String("Ivan".to_string()), TypedValue::Long(10)],
                    vec![TypedValue::String("Petr".to_string()), TypedValue::Long(99)],
                ])))
        .expect("queried");
    let expected: BTreeSet<i64> = [1].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_keys_annotation() {
    let store = open();
    people(&store);
    let out = store.conn
        .q_once("[:find ?e ?name :keys id name :where [?e :name ?name]]", QueryInputs::default())
        .expect("queried");
    assert_eq!(Some(vec!["id".to_string(), "name".to_string()]), out.keys);
}

#[test]
fn test_recursive_rules() {
    let store = open();
    people(&store);
    // friend: 1 -> 2 -> 3; reachability is its transitive closure.
    let rules = parse_rules(r#"[[(reachable ?a ?b) [?a :friend ?b]]
                               [(reachable ?a ?b) [?a :friend ?x] (reachable ?x ?b)]]"#)
        .expect("rules parsed");
    let out = store.conn
        .q_once("[:find ?b :in $ % :where (reachable 1 ?b)]",
                QueryInputs::default().with_rules(rules))
        .expect("queried");
    let expected: BTreeSet<i64> = [2, 3].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

#[test]
fn test_clause_order_independence() {
    let store = open();
    people(&store);
    let forward = store.conn
        .q_once(r#"[:find ?e :where [?e :age ?a] [(< ?a 25)] [?e :friend ?f]]"#,
                QueryInputs::default())
        .expect("queried");
    let reversed = store.conn
        .q_once(r#"[:find ?e :where [?e :friend ?f] [(< ?a 25)] [?e :age ?a]]"#,
                QueryInputs::default())
        .expect("queried");
    assert_eq!(entids(&forward.results), entids(&reversed.results));
}

#[test]
fn test_multi_source() {
    let store_a = open();
    people(&store_a);

    let store_b = open();
    store_b.conn.transact(r#"[
        {:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one}
    ]"#).expect("schema installed");
    store_b.conn.transact(r#"[[:db/add 10 :name "Ivan"] [:db/add 11 :name "Mara"]]"#)
           .expect("transacted");

    let schema_a = store_a.conn.current_schema();
    let schema_b = store_b.conn.current_schema();
    let txn_a = store_a.conn.env().begin_read().expect("read");
    let txn_b = store_b.conn.env().begin_read().expect("read");

    let mut sources = Sources::new(DbView {
        txn: &txn_a,
        dbis: store_a.conn.dbis(),
        schema: &schema_a,
    });
    sources.add("$2", DbView {
        txn: &txn_b,
        dbis: store_b.conn.dbis(),
        schema: &schema_b,
    });

    // Who shares a name across the stores?
    let out = q_once(&sources,
                     "[:find ?e ?f :in $ $2 :where [?e :name ?n] [$2 ?f :name ?n]]",
                     QueryInputs::default())
        .expect("queried");
    match out.results {
        QueryResults::Rel(ref rows) => {
            assert_eq!(vec![vec![TypedValue::Ref(1), TypedValue::Ref(10)]], *rows);
        },
        ref r => panic!("expected rel, got {:?}", r),
    }

    // The same join via a source-rebinding scope.
    let out = q_once(&sources,
                     "[:find ?f :in $ $2 :where [?e :name ?n] ($2 [?f :name ?n])]",
                     QueryInputs::default())
        .expect("queried");
    let expected: BTreeSet<i64> = [10].iter().cloned().collect();
    assert_eq!(expected, entids(&out.results));
}

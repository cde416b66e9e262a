// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

#![allow(dead_code)]

use std::collections::BTreeSet;

use datalith::{
    Conn,
    QueryResults,
    StoreOptions,
    TypedValue,
};
use tempfile;

pub struct TestStore {
    // Held for its Drop: the store directory lives as long as the
    // connection.
    pub dir: tempfile::TempDir,
    pub conn: Conn,
}

pub fn open() -> TestStore {
    open_with(StoreOptions::default())
}

pub fn open_with(options: StoreOptions) -> TestStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = Conn::open(dir.path(), options).expect("opened");
    TestStore {
        dir: dir,
        conn: conn,
    }
}

/// The entity ids of a single-column `:find ?e` relation.
pub fn entids(results: &QueryResults) -> BTreeSet<i64> {
    match *results {
        QueryResults::Rel(ref rows) => {
            rows.iter()
                .map(|row| match row[0] {
                    TypedValue::Ref(e) => e,
                    ref v => panic!("expected a ref, got {:?}", v),
                })
                .collect()
        },
        ref r => panic!("expected a relation, got {:?}", r),
    }
}

pub fn longs(results: &QueryResults) -> BTreeSet<i64> {
    match *results {
        QueryResults::Rel(ref rows) => {
            rows.iter()
                .map(|row| match row[0] {
                    TypedValue::Long(l) => l,
                    ref v => panic!("expected a long, got {:?}", v),
                })
                .collect()
        },
        ref r => panic!("expected a relation, got {:?}", r),
    }
}

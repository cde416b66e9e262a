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

//! Low-level functions for testing.

use std::cmp::Ordering;
use std::io::Write;
use std::ops::{
    Bound,
    Deref,
};

use itertools::Itertools;
use lmdb::Transaction;
use tabwriter::TabWriter;

use datalith_core::Schema;
use edn;
use entids;
use errors::Result;
use store::{
    self,
    Dbis,
    IndexType,
};
use substrate;
use types::Datom;

/// Represents a set of datoms (assertions) in the store.
///
/// To make comparison easier, we deterministically order. The ordering is
/// the ascending tuple ordering determined by `(e, a, v, tx)`.
pub struct Datoms(pub Vec<Datom>);

fn datom_cmp(x: &Datom, y: &Datom) -> Ordering {
    (&x.e, &x.a, &x.v, &x.tx, &x.added).cmp(&(&y.e, &y.a, &y.v, &y.tx, &y.added))
}

impl Datoms {
    pub fn new(mut datoms: Vec<Datom>) -> Datoms {
        datoms[..].sort_unstable_by(datom_cmp);
        Datoms(datoms)
    }

    pub fn to_edn(&self, schema: &Schema) -> edn::Value {
        edn::Value::Vector((&self.0).into_iter().map(|x| x.to_edn(schema)).collect())
    }
}

impl Deref for Datoms {
    type Target = [Datom];

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Return all datoms in the EAVT index, ordered.
pub fn all_datoms<T: Transaction>(txn: &T, dbis: &Dbis) -> Result<Datoms> {
    let datoms = store::datoms(txn, dbis, IndexType::Eavt, None, None, None)?
        .collect_datoms()?;
    Ok(Datoms::new(datoms))
}

/// The datoms a test usually wants to look at: everything except the
/// bootstrap vocabulary, schema assertions, and transaction timestamps.
pub fn user_datoms<T: Transaction>(txn: &T, dbis: &Dbis) -> Result<Vec<Datom>> {
    let datoms = all_datoms(txn, dbis)?;
    Ok(datoms.0.into_iter()
              .filter(|d| !entids::is_schema_attribute(d.a) && d.a != entids::DB_TX_INSTANT)
              .collect())
}

/// Group the store's datoms by transaction, ascending.
pub fn transactions_after<T: Transaction>(txn: &T, dbis: &Dbis, tx: i64) -> Result<Vec<Datoms>> {
    let mut datoms = all_datoms(txn, dbis)?.0;
    datoms.retain(|d| d.tx > tx);
    datoms.sort_by_key(|d| d.tx);
    let grouped: Vec<Datoms> = datoms.into_iter()
        .group_by(|d| d.tx)
        .into_iter()
        .map(|(_tx, group)| Datoms::new(group.collect()))
        .collect();
    Ok(grouped)
}

/// Format the raw contents of one dbi as a tab-aligned hex dump, suitable
/// for debug printing.
pub fn dump_dbi<T: Transaction>(txn: &T, db: ::lmdb::Database, name: &str) -> Result<String> {
    let mut tw = TabWriter::new(Vec::new()).padding(2);
    write!(&mut tw, "{}\nkey\tvalue\n", name).unwrap();

    let mut iter = substrate::scan_range(txn, db, Bound::Unbounded, Bound::Unbounded)?;
    while let Some((key, value)) = iter.next()? {
        let hex = |bytes: &[u8]| {
            bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("")
        };
        write!(&mut tw, "{}\t{}\n", hex(key), hex(value)).unwrap();
    }

    let dump = String::from_utf8(tw.into_inner().unwrap()).unwrap();
    Ok(dump)
}

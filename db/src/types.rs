// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{
    DateTime,
    Utc,
};

use datalith_core::{
    Entid,
    HasSchema,
    Schema,
    TypedValue,
};
use edn;

/// Represents a datom (assertion) in the store.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Datom {
    pub e: Entid,
    pub a: Entid,
    pub v: TypedValue,
    pub tx: Entid,
    pub added: bool,
}

impl Datom {
    pub fn new(e: Entid, a: Entid, v: TypedValue, tx: Entid, added: bool) -> Datom {
        Datom {
            e: e,
            a: a,
            v: v,
            tx: tx,
            added: added,
        }
    }

    /// Render as an EDN vector `[e a v tx added]`, mapping the attribute (and
    /// ref values naming idents) back to keywords where the schema can.
    pub fn to_edn(&self, schema: &Schema) -> edn::Value {
        let a = match schema.get_ident(self.a) {
            Some(ident) => edn::Value::Keyword(ident.clone()),
            None => edn::Value::Integer(self.a),
        };
        let v = match self.v {
            TypedValue::Ref(e) => {
                match schema.get_ident(e) {
                    Some(ident) => edn::Value::Keyword(ident.clone()),
                    None => edn::Value::Integer(e),
                }
            },
            ref v => v.to_edn_value(),
        };
        edn::Value::Vector(vec![
            edn::Value::Integer(self.e),
            a,
            v,
            edn::Value::Integer(self.tx),
            edn::Value::Boolean(self.added),
        ])
    }
}

impl fmt::Display for Datom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} {} {} {} {}]", self.e, self.a, self.v.to_edn_value(), self.tx, self.added)
    }
}

/// A lightweight identification of a database state: the counters that,
/// together with the datom set, determine it.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct DbTag {
    pub next_eid: Entid,
    pub next_tx: Entid,
}

/// A transaction report summarizes an applied transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxReport {
    /// The state before the transaction was applied.
    pub db_before: DbTag,

    /// The state the transaction produced.
    pub db_after: DbTag,

    /// The transaction ID of the transaction.
    pub tx_id: Entid,

    /// The timestamp when the transaction began to be committed.
    pub tx_instant: DateTime<Utc>,

    /// The datoms asserted and retracted, in application order.
    pub tx_data: Vec<Datom>,

    /// A map from tempid to the allocated entid. External tempids appear
    /// under their string; internal (negative integer) tempids under their
    /// decimal rendering; the reserved `:db/current-tx` key maps to `tx_id`.
    pub tempids: BTreeMap<String, Entid>,
}

/// Options fixed at store creation and persisted in the `meta` dbi.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreOptions {
    /// Size of the memory map, in bytes.
    pub map_size: usize,

    /// How many concurrent snapshot readers the substrate admits.
    pub max_readers: u32,

    /// When set, values are checked against their attribute's declared type
    /// and mismatches abort the transaction.
    pub validate_data: bool,

    /// When set, the transactor stamps every touched entity with
    /// `:db/created-at` (first appearance only) and `:db/updated-at`.
    pub auto_entity_time: bool,
}

impl Default for StoreOptions {
    fn default() -> StoreOptions {
        StoreOptions {
            map_size: ::substrate::DEFAULT_MAP_SIZE,
            max_readers: ::substrate::DEFAULT_MAX_READERS,
            validate_data: false,
            auto_entity_time: false,
        }
    }
}

impl StoreOptions {
    pub fn with_max_readers(mut self, max_readers: u32) -> StoreOptions {
        self.max_readers = max_readers;
        self
    }

    pub fn with_validation(mut self) -> StoreOptions {
        self.validate_data = true;
        self
    }

    pub fn with_auto_entity_time(mut self) -> StoreOptions {
        self.auto_entity_time = true;
        self
    }
}

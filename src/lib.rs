// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Datalith: a durable, embedded, transactional triple store with Datalog
//! queries and a companion full-text search engine, over a memory-mapped
//! ordered key-value substrate.
//!
//! Facts are five-tuples `(entity, attribute, value, transaction, added?)`
//! maintained in four orderings (EAVT, AEVT, AVET, VAET). The transactor
//! resolves identity (tempids, lookup-refs, upserts), enforces uniqueness,
//! and derives composite tuple attributes; the query engine answers
//! declarative Datalog over one or more stores.

extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate lazy_static;
extern crate lmdb;
#[macro_use]
extern crate log;

#[macro_use]
extern crate edn;
#[macro_use]
extern crate datalith_core;
extern crate datalith_db;
extern crate datalith_query;
extern crate datalith_search;

pub mod errors;
pub mod conn;
pub mod stores;

pub use errors::{
    Error,
    Result,
};

pub use conn::Conn;

pub use stores::{
    Store,
    Stores,
};

pub use datalith_core::{
    Attribute,
    Entid,
    HasSchema,
    Keyword,
    KnownEntid,
    Schema,
    TypedValue,
    Unique,
    ValueType,
};

pub use datalith_db::{
    Datom,
    StoreOptions,
    TxFunction,
    TxReport,
};

pub use datalith_query::{
    DbView,
    FindQuery,
    QueryInputValue,
    QueryInputs,
    QueryOutput,
    QueryResults,
    Rules,
    Sources,
    parse_query,
    parse_rules,
    q_once,
};

pub use datalith_search::{
    DocId,
    SearchParams,
    SearchResults,
    TermId,
};

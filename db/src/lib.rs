// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The storage and transaction layer: the value codec, the substrate
//! adapter, the datom store with its four indices, the bootstrap
//! vocabulary, and the transactor.

extern crate chrono;
extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate itertools;
#[macro_use]
extern crate lazy_static;
extern crate lmdb;
extern crate lmdb_sys;
#[macro_use]
extern crate log;
extern crate ordered_float;
extern crate petgraph;
extern crate sha1;
extern crate tabwriter;
extern crate time;
extern crate uuid;

extern crate edn;
#[macro_use]
extern crate datalith_core;

pub mod errors;
pub mod entids;
pub mod codec;
pub mod substrate;
pub mod store;
pub mod schema;
pub mod metadata;
pub mod bootstrap;
pub mod internal_types;
pub mod upsert_resolution;
pub mod tx;
pub mod types;
pub mod debug;

pub use errors::{
    DbError,
    DbErrorKind,
    Result,
};

pub use entids::{
    TX0,
    USER0,
};

pub use store::{
    Dbis,
    IndexType,
};

pub use substrate::DbEnv;

pub use tx::{
    TxFunction,
    TxFunctionRegistry,
    parse_tx,
    transact,
};

pub use types::{
    Datom,
    DbTag,
    StoreOptions,
    TxReport,
};

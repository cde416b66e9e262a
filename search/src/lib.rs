// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The companion full-text search engine: an inverted index with term and
//! bigram dictionaries, positional postings, symmetric-delete fuzzy
//! correction, and ranked retrieval. Independent of the datom store, but
//! sharing its substrate.

#[macro_use]
extern crate lazy_static;
extern crate lmdb;
#[macro_use]
extern crate log;

extern crate edn;
#[macro_use]
extern crate datalith_core;
extern crate datalith_db;

pub mod analyzer;
pub mod engine;

pub use analyzer::{
    Token,
    analyze,
};

pub use engine::{
    DocId,
    SearchEngine,
    SearchParams,
    SearchResults,
    TermId,
};

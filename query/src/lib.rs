// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The Datalog query engine: AST, parser, planner, and evaluator.

extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate indexmap;
extern crate lmdb;
#[macro_use]
extern crate log;

extern crate edn;
#[macro_use]
extern crate datalith_core;
extern crate datalith_db;

pub mod errors;
pub mod types;
pub mod parse;
pub mod plan;
pub mod eval;

pub use errors::{
    QueryError,
    QueryErrorKind,
    Result,
};

pub use types::{
    Binding,
    Element,
    FindQuery,
    FindSpec,
    FnArg,
    InBinding,
    Pattern,
    Rules,
    SrcVar,
    Variable,
    WhereClause,
};

pub use parse::{
    parse_query,
    parse_rules,
};

pub use eval::{
    DbView,
    QueryInputValue,
    QueryInputs,
    QueryOutput,
    QueryResults,
    Relation,
    Sources,
    q_once,
    q_parsed,
};

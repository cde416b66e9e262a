// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! EDN is the public data format of the store: transactions and queries are
//! written as EDN forms, and every value we can persist has an EDN rendering.
//! This crate holds the value model, the symbol types, a text parser, and the
//! entity types that the transaction processor consumes.

extern crate chrono;
extern crate ordered_float;
extern crate uuid;

pub mod symbols;
pub mod types;
pub mod parse;
pub mod entities;
pub mod intern_set;

pub use symbols::{
    Keyword,
    PlainSymbol,
};

pub use types::{
    FromMicros,
    ToMicros,
    Value,
};

pub use parse::ParseError;

pub use intern_set::InternSet;

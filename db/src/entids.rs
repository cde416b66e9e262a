// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Literal `Entid` values for the bootstrap vocabulary.
//!
//! Used through-out the transactor to match core DB constructs.

use datalith_core::Entid;

// Attributes.
pub const DB_IDENT: Entid = 1;
pub const DB_VALUE_TYPE: Entid = 2;
pub const DB_CARDINALITY: Entid = 3;
pub const DB_UNIQUE: Entid = 4;
pub const DB_INDEX: Entid = 5;
pub const DB_IS_COMPONENT: Entid = 6;
pub const DB_NO_HISTORY: Entid = 7;
pub const DB_TX_INSTANT: Entid = 8;
pub const DB_TUPLE_ATTRS: Entid = 9;
pub const DB_TUPLE_TYPE: Entid = 10;
pub const DB_TUPLE_TYPES: Entid = 11;
pub const DB_DOC: Entid = 12;
pub const DB_CREATED_AT: Entid = 13;
pub const DB_UPDATED_AT: Entid = 14;

// Value type entities.
pub const DB_TYPE_REF: Entid = 20;
pub const DB_TYPE_BOOLEAN: Entid = 21;
pub const DB_TYPE_LONG: Entid = 22;
pub const DB_TYPE_DOUBLE: Entid = 23;
pub const DB_TYPE_INSTANT: Entid = 24;
pub const DB_TYPE_STRING: Entid = 25;
pub const DB_TYPE_KEYWORD: Entid = 26;
pub const DB_TYPE_SYMBOL: Entid = 27;
pub const DB_TYPE_UUID: Entid = 28;
pub const DB_TYPE_BYTES: Entid = 29;
pub const DB_TYPE_TUPLE: Entid = 30;

// Cardinality and uniqueness entities.
pub const DB_CARDINALITY_ONE: Entid = 33;
pub const DB_CARDINALITY_MANY: Entid = 34;
pub const DB_UNIQUE_VALUE: Entid = 35;
pub const DB_UNIQUE_IDENTITY: Entid = 36;

/// The first transaction id. User entids live below `TX0`; transaction
/// entities are allocated from `TX0 + 1` up.
pub const TX0: Entid = 0x1000_0000;

/// The first entid available to user entities.
pub const USER0: Entid = 0x1_0000;

/// Attributes whose assertion mutates the schema.
pub fn is_schema_attribute(a: Entid) -> bool {
    match a {
        DB_IDENT |
        DB_VALUE_TYPE |
        DB_CARDINALITY |
        DB_UNIQUE |
        DB_INDEX |
        DB_IS_COMPONENT |
        DB_NO_HISTORY |
        DB_TUPLE_ATTRS |
        DB_TUPLE_TYPE |
        DB_TUPLE_TYPES |
        DB_DOC => true,
        _ => false,
    }
}

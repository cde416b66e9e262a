// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Error types for the storage and transaction layers.
//!
//! The display strings of transactor rejections are a public contract:
//! callers match on the message prefix. Do not reword them.

use std::fmt;

use failure::{
    Backtrace,
    Context,
    Fail,
};

use lmdb;

use datalith_core::{
    Entid,
    ValueType,
};
use edn;
use edn::symbols::Keyword;

pub type Result<T> = ::std::result::Result<T, DbError>;

#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum DbErrorKind {
    /// We're just not done yet.  Message that the feature is recognized but not yet
    /// implemented.
    #[fail(display = "not yet implemented: {}", _0)]
    NotYetImplemented(String),

    #[fail(display = "bad schema assertion: {}", _0)]
    BadSchemaAssertion(String),

    #[fail(display = "invalid input: {}", _0)]
    InputError(String),

    #[fail(display = "no entid found for ident: {}", _0)]
    UnrecognizedIdent(String),

    #[fail(display = "no ident found for entid: {}", _0)]
    UnrecognizedEntid(Entid),

    #[fail(display = "unknown attribute for entid: {}", _0)]
    UnknownAttribute(Entid),

    #[fail(display = "Conflicting upserts: {}", _0)]
    ConflictingUpserts(String),

    #[fail(display = "Tempids used only as value in transaction: ({})", _0)]
    TempIdsUsedOnlyAsValue(String),

    #[fail(display = "Cannot add {} because of unique constraint", _0)]
    UniqueConstraintViolation(String),

    #[fail(display = "Can't modify tuple attrs directly: {}", _0)]
    TupleAttrModification(Keyword),

    #[fail(display = ":db.fn/cas failed on datom [{} {} {}], expected {}", e, a, v, expected)]
    CasFailed {
        e: Entid,
        a: Keyword,
        v: String,
        expected: String,
    },

    #[fail(display = "Invalid tempid in :db.fn/cas: {}", _0)]
    TempIdInCas(String),

    #[fail(display = "Unknown transaction fn {}", _0)]
    UnknownTransactionFn(Keyword),

    #[fail(display = "Entity {} is lacking :db/fn", _0)]
    LacksDbFn(Keyword),

    #[fail(display = "Could not resolve lookup ref: [{} {}]", _0, _1)]
    UnresolvedLookupRef(Keyword, String),

    #[fail(display = "Lookup ref attribute {} is not unique", _0)]
    NonUniqueLookupRefAttribute(Keyword),

    #[fail(display = "Type mismatch: expected {} for attribute {}, got {}", expected, attribute, value)]
    TypeMismatch {
        attribute: Keyword,
        expected: ValueType,
        value: String,
    },

    #[fail(display = "Value of size {} is too large for a key", _0)]
    ValueTooLarge(usize),

    #[fail(display = "corrupt stored value: {}", _0)]
    CorruptValue(String),

    #[fail(display = "storage layer error: {}", _0)]
    StorageFailure(String),
}

#[derive(Debug)]
pub struct DbError {
    inner: Context<DbErrorKind>,
}

impl DbError {
    pub fn kind(&self) -> &DbErrorKind {
        self.inner.get_context()
    }
}

impl Fail for DbError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> DbError {
        DbError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<DbErrorKind>> for DbError {
    fn from(inner: Context<DbErrorKind>) -> DbError {
        DbError {
            inner: inner,
        }
    }
}

impl From<lmdb::Error> for DbError {
    fn from(error: lmdb::Error) -> DbError {
        DbError {
            inner: Context::new(DbErrorKind::StorageFailure(error.to_string())),
        }
    }
}

impl From<::std::io::Error> for DbError {
    fn from(error: ::std::io::Error) -> DbError {
        DbError {
            inner: Context::new(DbErrorKind::StorageFailure(error.to_string())),
        }
    }
}

impl From<edn::ParseError> for DbError {
    fn from(error: edn::ParseError) -> DbError {
        DbError {
            inner: Context::new(DbErrorKind::InputError(error.to_string())),
        }
    }
}

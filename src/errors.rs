// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::path::PathBuf;

use datalith_db::DbError;
use datalith_query::QueryError;
use edn;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{}", _0)]
    DbError(#[fail(cause)] DbError),

    #[fail(display = "{}", _0)]
    QueryError(#[fail(cause)] QueryError),

    #[fail(display = "{}", _0)]
    EdnParseError(#[fail(cause)] edn::ParseError),

    #[fail(display = "store {} is already open in this process", _0)]
    StoreAlreadyOpen(String),

    #[fail(display = "no open store named {}", _0)]
    StoreNotFound(String),

    #[fail(display = "store {} still has active connections", _0)]
    StoreConnectionStillActive(String),

    #[fail(display = "could not canonicalize store path {:?}: {}", _0, _1)]
    BadStorePath(PathBuf, String),
}

impl From<DbError> for Error {
    fn from(error: DbError) -> Error {
        Error::DbError(error)
    }
}

impl From<QueryError> for Error {
    fn from(error: QueryError) -> Error {
        Error::QueryError(error)
    }
}

impl From<edn::ParseError> for Error {
    fn from(error: edn::ParseError) -> Error {
        Error::EdnParseError(error)
    }
}

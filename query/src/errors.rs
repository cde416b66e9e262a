// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::fmt;

use failure::{
    Backtrace,
    Context,
    Fail,
};

use edn;
use edn::symbols::PlainSymbol;

pub type Result<T> = ::std::result::Result<T, QueryError>;

#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum QueryErrorKind {
    #[fail(display = "query parse error: {}", _0)]
    ParseFailure(String),

    #[fail(display = "malformed clause: {}", _0)]
    MalformedClause(String),

    #[fail(display = "no function named {}", _0)]
    UnknownFunction(PlainSymbol),

    #[fail(display = "invalid number of arguments to {}: expected {}, got {}.", _0, _1, _2)]
    InvalidNumberOfArguments(PlainSymbol, usize, usize),

    #[fail(display = "unbound variable: {}", _0)]
    UnboundVariable(PlainSymbol),

    #[fail(display = "All clauses in 'or' must use the same set of free vars")]
    NonMatchingFreeVarsInOr,

    #[fail(display = "Insufficient bindings: {}", _0)]
    InsufficientBindings(String),

    #[fail(display = "no rule named {}", _0)]
    UnknownRule(PlainSymbol),

    #[fail(display = "no source named {}", _0)]
    UnknownSource(String),

    #[fail(display = "wrong number of inputs: expected {}, got {}", _0, _1)]
    WrongNumberOfInputs(usize, usize),

    #[fail(display = "storage error during query: {}", _0)]
    StorageError(String),
}

#[derive(Debug)]
pub struct QueryError {
    inner: Context<QueryErrorKind>,
}

impl QueryError {
    pub fn kind(&self) -> &QueryErrorKind {
        self.inner.get_context()
    }
}

impl Fail for QueryError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<QueryErrorKind> for QueryError {
    fn from(kind: QueryErrorKind) -> QueryError {
        QueryError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<QueryErrorKind>> for QueryError {
    fn from(inner: Context<QueryErrorKind>) -> QueryError {
        QueryError {
            inner: inner,
        }
    }
}

impl From<edn::ParseError> for QueryError {
    fn from(error: edn::ParseError) -> QueryError {
        QueryErrorKind::ParseFailure(error.to_string()).into()
    }
}

impl From<::datalith_db::DbError> for QueryError {
    fn from(error: ::datalith_db::DbError) -> QueryError {
        QueryErrorKind::StorageError(error.to_string()).into()
    }
}

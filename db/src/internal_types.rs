// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Types used inside the transactor while identities are still being
//! resolved.

use std::collections::HashMap;
use std::rc::Rc;

use datalith_core::{
    Entid,
    TypedValue,
};
use edn::entities::{
    OpType,
    TempId,
};

/// A transaction item with entity identities at various stages of
/// resolution: `E` is the entity place, `V` the value place.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Term<E, V> {
    AddOrRetract(OpType, E, Entid, V),
    RetractAttribute(E, Entid),
    RetractEntity(E),
    Cas(E, Entid, Option<TypedValue>, TypedValue),
}

pub type EntidOr<T> = ::std::result::Result<Entid, T>;
pub type TypedValueOr<T> = ::std::result::Result<TypedValue, T>;

pub type TempIdHandle = Rc<TempId>;
pub type TempIdMap = HashMap<TempIdHandle, Entid>;

/// A pair `[a v]` in the store.
///
/// Used to represent lookup-refs and `[TEMPID a v]` upserts as they are
/// resolved.
pub type AVPair = (Entid, TypedValue);

/// Map `[a v]` pairs to existing entids. Used to resolve lookup-refs and
/// upserts.
pub type AVMap = HashMap<AVPair, Entid>;

pub type TermWithTempIds = Term<EntidOr<TempIdHandle>, TypedValueOr<TempIdHandle>>;
pub type TermWithoutTempIds = Term<Entid, TypedValue>;
pub type Population = Vec<TermWithTempIds>;

impl TermWithTempIds {
    /// Unwrap a term known to carry no tempids.
    ///
    /// The Rust type system cannot express the saturation invariant, so this
    /// panics when it is violated; the upsert-resolution loop guarantees it
    /// never is.
    pub fn unwrap(self) -> TermWithoutTempIds {
        match self {
            Term::AddOrRetract(op, Ok(e), a, Ok(v)) => Term::AddOrRetract(op, e, a, v),
            Term::RetractAttribute(Ok(e), a) => Term::RetractAttribute(e, a),
            Term::RetractEntity(Ok(e)) => Term::RetractEntity(e),
            Term::Cas(Ok(e), a, old, new) => Term::Cas(e, a, old, new),
            _ => unreachable!(),
        }
    }
}

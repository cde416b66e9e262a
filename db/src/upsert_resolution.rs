// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! This module implements the upsert resolution algorithm: terms that
//! reference tempids are split into populations by shape, and the upsertable
//! populations are evolved step by step against the store until every tempid
//! is either bound to an existing entid or known to need a fresh allocation.

use std::collections::BTreeSet;

use datalith_core::{
    Entid,
    HasSchema,
    Schema,
    TypedValue,
};
use edn::entities::OpType;
use errors::Result;
use internal_types::{
    AVPair,
    Population,
    TempIdHandle,
    TempIdMap,
    Term,
    TermWithTempIds,
    TermWithoutTempIds,
};

/// Population types classify terms into the races we care about.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
enum PopulationType {
    /// "Simple upserts" that look like [:db/add TEMPID a v], where a is
    /// :db.unique/identity.
    UpsertsE,

    /// "Complex upserts" that look like [:db/add TEMPID a OTHERID], where a
    /// is :db.unique/identity.
    UpsertsEV,

    /// Terms that reference tempids without upserting: non-unique adds,
    /// retracts, retract-entity and retract-attribute forms naming a tempid.
    Allocations,

    /// Terms that do not reference tempids.
    Inert,
}

fn population_type(term: &TermWithTempIds, schema: &Schema) -> PopulationType {
    match term {
        &Term::AddOrRetract(ref op, Err(_), a, Err(_)) => {
            if op == &OpType::Add && schema.is_unique_identity(a) {
                PopulationType::UpsertsEV
            } else {
                PopulationType::Allocations
            }
        },
        &Term::AddOrRetract(ref op, Err(_), a, Ok(_)) => {
            if op == &OpType::Add && schema.is_unique_identity(a) {
                PopulationType::UpsertsE
            } else {
                PopulationType::Allocations
            }
        },
        &Term::AddOrRetract(_, Ok(_), _, Err(_)) => PopulationType::Allocations,
        &Term::AddOrRetract(_, Ok(_), _, Ok(_)) => PopulationType::Inert,
        &Term::RetractAttribute(Err(_), _) |
        &Term::RetractEntity(Err(_)) |
        &Term::Cas(Err(_), _, _, _) => PopulationType::Allocations,
        &Term::RetractAttribute(Ok(_), _) |
        &Term::RetractEntity(Ok(_)) |
        &Term::Cas(Ok(_), _, _, _) => PopulationType::Inert,
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Generation {
    /// "Simple upserts" that look like [:db/add TEMPID a v], where a is
    /// :db.unique/identity.
    upserts_e: Population,

    /// "Complex upserts" that look like [:db/add TEMPID a OTHERID], where a
    /// is :db.unique/identity.
    upserts_ev: Population,

    /// Terms that still reference unresolved tempids.
    allocations: Population,

    /// Upserts that upserted.
    upserted: Population,

    /// Allocations that resolved due to other upserts.
    resolved: Population,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct FinalPopulations {
    /// Upserts that upserted.
    pub upserted: Vec<TermWithoutTempIds>,

    /// Allocations that resolved due to other upserts.
    pub resolved: Vec<TermWithoutTempIds>,

    /// Allocations that required new entid allocations.
    pub allocated: Vec<TermWithoutTempIds>,
}

impl Generation {
    /// Split terms into a generation of populations that need to evolve to
    /// have their tempids resolved or allocated, and a population of inert
    /// terms that do not reference tempids.
    pub fn from<I>(terms: I, schema: &Schema) -> Result<(Generation, Population)>
        where I: IntoIterator<Item = TermWithTempIds> {
        let mut generation = Generation::default();
        let mut inert = vec![];

        for term in terms.into_iter() {
            match population_type(&term, schema) {
                PopulationType::UpsertsEV => generation.upserts_ev.push(term),
                PopulationType::UpsertsE => generation.upserts_e.push(term),
                PopulationType::Allocations => generation.allocations.push(term),
                PopulationType::Inert => inert.push(term),
            }
        }

        Ok((generation, inert))
    }

    /// Return true if it's possible to evolve this generation further.
    pub fn can_evolve(&self) -> bool {
        !self.upserts_e.is_empty()
    }

    /// Evolve this generation one step further by rewriting the existing
    /// terms using the given resolved tempids.
    pub fn evolve_one_step(self, temp_id_map: &TempIdMap) -> Generation {
        let mut next = Generation::default();
        next.upserted = self.upserted;
        next.resolved = self.resolved;

        for term in self.upserts_e {
            match term {
                Term::AddOrRetract(op, Err(t), a, v) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.upserted.push(Term::AddOrRetract(op, Ok(n), a, v)),
                        None => next.allocations.push(Term::AddOrRetract(op, Err(t), a, v)),
                    }
                },
                _ => unreachable!(),
            }
        }

        for term in self.upserts_ev {
            match term {
                Term::AddOrRetract(op, Err(t1), a, Err(t2)) => {
                    match (temp_id_map.get(&t1), temp_id_map.get(&t2)) {
                        (Some(&n1), Some(&n2)) => {
                            next.resolved.push(Term::AddOrRetract(op, Ok(n1), a, Ok(TypedValue::Ref(n2))))
                        },
                        (None, Some(&n2)) => {
                            next.upserts_e.push(Term::AddOrRetract(op, Err(t1), a, Ok(TypedValue::Ref(n2))))
                        },
                        (Some(&n1), None) => {
                            next.allocations.push(Term::AddOrRetract(op, Ok(n1), a, Err(t2)))
                        },
                        (None, None) => {
                            next.allocations.push(Term::AddOrRetract(op, Err(t1), a, Err(t2)))
                        },
                    }
                },
                _ => unreachable!(),
            }
        }

        for term in self.allocations {
            match term {
                Term::AddOrRetract(op, Err(t1), a, Err(t2)) => {
                    match (temp_id_map.get(&t1), temp_id_map.get(&t2)) {
                        (Some(&n1), Some(&n2)) => {
                            next.resolved.push(Term::AddOrRetract(op, Ok(n1), a, Ok(TypedValue::Ref(n2))))
                        },
                        (None, Some(&n2)) => {
                            next.allocations.push(Term::AddOrRetract(op, Err(t1), a, Ok(TypedValue::Ref(n2))))
                        },
                        (Some(&n1), None) => {
                            next.allocations.push(Term::AddOrRetract(op, Ok(n1), a, Err(t2)))
                        },
                        (None, None) => {
                            next.allocations.push(Term::AddOrRetract(op, Err(t1), a, Err(t2)))
                        },
                    }
                },
                Term::AddOrRetract(op, Err(t), a, v) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.resolved.push(Term::AddOrRetract(op, Ok(n), a, v)),
                        None => next.allocations.push(Term::AddOrRetract(op, Err(t), a, v)),
                    }
                },
                Term::AddOrRetract(op, e, a, Err(t)) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.resolved.push(Term::AddOrRetract(op, e, a, Ok(TypedValue::Ref(n)))),
                        None => next.allocations.push(Term::AddOrRetract(op, e, a, Err(t))),
                    }
                },
                Term::RetractAttribute(Err(t), a) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.resolved.push(Term::RetractAttribute(Ok(n), a)),
                        None => next.allocations.push(Term::RetractAttribute(Err(t), a)),
                    }
                },
                Term::RetractEntity(Err(t)) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.resolved.push(Term::RetractEntity(Ok(n))),
                        None => next.allocations.push(Term::RetractEntity(Err(t))),
                    }
                },
                Term::Cas(Err(t), a, old, new) => {
                    match temp_id_map.get(&t) {
                        Some(&n) => next.resolved.push(Term::Cas(Ok(n), a, old, new)),
                        None => next.allocations.push(Term::Cas(Err(t), a, old, new)),
                    }
                },
                _ => unreachable!(),
            }
        }

        next
    }

    /// Collect tempid->[a v] pairs that might upsert in this generation.
    pub fn temp_id_avs(&self) -> Vec<(TempIdHandle, AVPair)> {
        let mut temp_id_avs: Vec<(TempIdHandle, AVPair)> = vec![];
        for term in &self.upserts_e {
            match term {
                &Term::AddOrRetract(_, Err(ref t), a, Ok(ref v)) => {
                    temp_id_avs.push((t.clone(), (a, v.clone())));
                },
                _ => unreachable!(),
            }
        }
        temp_id_avs
    }

    /// The tempids that remain unresolved and will need fresh entids.
    pub fn temp_ids_in_allocations(&self) -> BTreeSet<TempIdHandle> {
        assert!(self.upserts_e.is_empty(),
                "All upserts should have been upserted, resolved, or moved to the allocated population!");
        assert!(self.upserts_ev.is_empty(),
                "All upserts should have been upserted, resolved, or moved to the allocated population!");

        let mut temp_ids: BTreeSet<TempIdHandle> = BTreeSet::default();

        for term in self.allocations.iter() {
            match term {
                &Term::AddOrRetract(_, Err(ref t1), _, Err(ref t2)) => {
                    temp_ids.insert(t1.clone());
                    temp_ids.insert(t2.clone());
                },
                &Term::AddOrRetract(_, Err(ref t), _, Ok(_)) => {
                    temp_ids.insert(t.clone());
                },
                &Term::AddOrRetract(_, Ok(_), _, Err(ref t)) => {
                    temp_ids.insert(t.clone());
                },
                &Term::RetractAttribute(Err(ref t), _) |
                &Term::RetractEntity(Err(ref t)) |
                &Term::Cas(Err(ref t), _, _, _) => {
                    temp_ids.insert(t.clone());
                },
                _ => unreachable!(),
            }
        }

        temp_ids
    }

    /// The tempids that appear in entity position somewhere in this
    /// generation. A tempid that never does is "used only as value".
    pub fn temp_ids_in_entity_place(&self) -> BTreeSet<TempIdHandle> {
        let mut temp_ids: BTreeSet<TempIdHandle> = BTreeSet::default();
        for population in &[&self.upserts_e, &self.upserts_ev, &self.allocations,
                            &self.upserted, &self.resolved] {
            for term in population.iter() {
                match term {
                    &Term::AddOrRetract(_, Err(ref t), _, _) |
                    &Term::RetractAttribute(Err(ref t), _) |
                    &Term::RetractEntity(Err(ref t)) |
                    &Term::Cas(Err(ref t), _, _, _) => {
                        temp_ids.insert(t.clone());
                    },
                    _ => {},
                }
            }
        }
        temp_ids
    }

    /// After allocating entids for the given tempids, segment `self` into
    /// populations, each with no references to tempids.
    pub fn into_final_populations(self, temp_id_map: &TempIdMap) -> FinalPopulations {
        assert!(self.upserts_e.is_empty());
        assert!(self.upserts_ev.is_empty());

        let mut populations = FinalPopulations::default();

        populations.upserted = self.upserted.into_iter().map(|term| term.unwrap()).collect();
        populations.resolved = self.resolved.into_iter().map(|term| term.unwrap()).collect();

        let resolve = |t: &TempIdHandle| -> Entid {
            *temp_id_map.get(t).expect("tempid allocated above")
        };

        for term in self.allocations {
            let allocated = match term {
                Term::AddOrRetract(op, Err(t1), a, Err(t2)) => {
                    Term::AddOrRetract(op, resolve(&t1), a, TypedValue::Ref(resolve(&t2)))
                },
                Term::AddOrRetract(op, Err(t), a, Ok(v)) => {
                    Term::AddOrRetract(op, resolve(&t), a, v)
                },
                Term::AddOrRetract(op, Ok(e), a, Err(t)) => {
                    Term::AddOrRetract(op, e, a, TypedValue::Ref(resolve(&t)))
                },
                Term::RetractAttribute(Err(t), a) => Term::RetractAttribute(resolve(&t), a),
                Term::RetractEntity(Err(t)) => Term::RetractEntity(resolve(&t)),
                Term::Cas(Err(t), a, old, new) => Term::Cas(resolve(&t), a, old, new),
                _ => unreachable!(),
            };
            populations.allocated.push(allocated);
        }

        populations
    }
}

// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Clause ordering.
//!
//! The planner greedily orders clauses so that, where possible, each clause
//! shares a variable with the bindings accumulated so far; among runnable
//! patterns the one with the most bound places (the most selective scan)
//! goes first. Predicates, functions, negations and unions wait until their
//! input variables are bound. The ordering never changes results, only how
//! much the evaluator scans and joins.

use std::collections::BTreeSet;

use types::{
    FnArg,
    UnifyVars,
    Variable,
    WhereClause,
};

/// The variables a clause needs bound before it can run, and a flag for
/// whether it can run at all without them.
fn requirements(clause: &WhereClause) -> (BTreeSet<Variable>, bool) {
    let mut required = BTreeSet::new();
    let self_sufficient = match *clause {
        WhereClause::Pattern(_) | WhereClause::SourceScope(..) | WhereClause::RuleInvocation(_) => true,
        WhereClause::OrJoin(ref o) => {
            if let UnifyVars::Explicit(ref args) = o.unify_vars {
                for arg in args {
                    if let ::types::OrJoinArg::Required(ref v) = *arg {
                        required.insert(v.clone());
                    }
                }
            }
            true
        },
        WhereClause::Pred(ref p) => {
            for arg in &p.args {
                if let FnArg::Variable(ref v) = *arg {
                    required.insert(v.clone());
                }
            }
            false
        },
        WhereClause::WhereFn(ref f) => {
            for arg in &f.args {
                if let FnArg::Variable(ref v) = *arg {
                    required.insert(v.clone());
                }
            }
            false
        },
        WhereClause::NotJoin(ref n) => {
            // A negation only filters; run it once the outer side has had a
            // chance to bind the join variables.
            match n.unify_vars {
                UnifyVars::Explicit(ref args) => {
                    for arg in args {
                        required.insert(arg.variable().clone());
                    }
                },
                UnifyVars::Implicit => {
                    required.extend(clause.variables());
                },
            }
            false
        },
    };
    (required, self_sufficient)
}

/// The variables a clause can bind once it runs.
fn produced(clause: &WhereClause) -> BTreeSet<Variable> {
    match *clause {
        WhereClause::WhereFn(ref f) => f.binding.variables().into_iter().collect(),
        WhereClause::Pred(_) | WhereClause::NotJoin(_) => BTreeSet::new(),
        ref clause => clause.variables(),
    }
}

/// How selective a pattern scan is: count constant places plus places whose
/// variable is already bound.
fn pattern_score(clause: &WhereClause, bound: &BTreeSet<Variable>) -> usize {
    match *clause {
        WhereClause::Pattern(ref p) => {
            let mut score = 0;
            for place in &[&p.entity, &p.attribute, &p.tx] {
                if place.is_bound() {
                    score += 2;
                } else if place.variable().map(|v| bound.contains(v)).unwrap_or(false) {
                    score += 1;
                }
            }
            if p.value.is_bound() {
                score += 2;
            } else if p.value.variable().map(|v| bound.contains(v)).unwrap_or(false) {
                score += 1;
            }
            score
        },
        _ => 0,
    }
}

/// Order `clauses` for evaluation given the initially bound variables.
pub fn order_clauses(clauses: Vec<WhereClause>, initially_bound: &BTreeSet<Variable>) -> Vec<WhereClause> {
    let mut bound = initially_bound.clone();
    let mut remaining: Vec<WhereClause> = clauses;
    let mut ordered = vec![];

    while !remaining.is_empty() {
        // Prefer a runnable clause whose requirements are met and that
        // shares a variable with the bound set; among those, the most
        // selective pattern.
        let mut best: Option<(usize, usize)> = None; // (index, score)
        for (index, clause) in remaining.iter().enumerate() {
            let (required, self_sufficient) = requirements(clause);
            let requirements_met = required.iter().all(|v| bound.contains(v));
            if !requirements_met && !self_sufficient {
                continue;
            }
            let shares = clause.variables().iter().any(|v| bound.contains(v));
            let connected = bound.is_empty() || shares;
            // Joinable clauses always beat cartesian ones; score breaks
            // ties.
            let score = pattern_score(clause, &bound)
                + if connected { 100 } else { 0 }
                + if requirements_met { 1000 } else { 0 };
            match best {
                Some((_, best_score)) if best_score >= score => {},
                _ => best = Some((index, score)),
            }
        }

        // Either nothing is runnable (all remaining clauses await bindings
        // that will never arrive; evaluation will report the unbound
        // variable) or we pick the winner.
        let index = match best {
            Some((index, _)) => index,
            None => 0,
        };
        let clause = remaining.remove(index);
        for v in produced(&clause) {
            bound.insert(v);
        }
        // A negation binds nothing, but its join variables are the outer
        // ones; predicates bind nothing either.
        ordered.push(clause);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    use parse::parse_query;

    fn names(clauses: &[WhereClause]) -> Vec<&'static str> {
        clauses.iter()
               .map(|clause| match *clause {
                   WhereClause::Pattern(_) => "pattern",
                   WhereClause::Pred(_) => "pred",
                   WhereClause::WhereFn(_) => "fn",
                   WhereClause::OrJoin(_) => "or",
                   WhereClause::NotJoin(_) => "not",
                   WhereClause::RuleInvocation(_) => "rule",
                   WhereClause::SourceScope(..) => "scope",
               })
               .collect()
    }

    #[test]
    fn test_predicate_waits_for_bindings() {
        let q = parse_query("[:find ?e :where [(< ?age 30)] [?e :person/age ?age]]").expect("parsed");
        let ordered = order_clauses(q.where_clauses, &BTreeSet::new());
        assert_eq!(vec!["pattern", "pred"], names(&ordered));
    }

    #[test]
    fn test_more_selective_pattern_first() {
        let q = parse_query(r#"[:find ?e ?f :where [?e :person/friend ?f] [?e :person/name "Ivan"]]"#)
            .expect("parsed");
        let ordered = order_clauses(q.where_clauses, &BTreeSet::new());
        match ordered[0] {
            WhereClause::Pattern(ref p) => {
                assert!(p.value.is_bound(), "expected the constant-value pattern first");
            },
            ref c => panic!("expected pattern, got {:?}", c),
        }
    }

    #[test]
    fn test_negation_after_binding_patterns() {
        let q = parse_query(r#"[:find ?e :where (not [?e :person/age 10]) [?e :person/name ?n]]"#)
            .expect("parsed");
        let ordered = order_clauses(q.where_clauses, &BTreeSet::new());
        assert_eq!(vec!["pattern", "not"], names(&ordered));
    }
}

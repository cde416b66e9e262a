// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The query AST.
//!
//! Clauses are tagged variants; the parser builds them from the EDN query
//! form, the planner reorders them, the evaluator walks them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use datalith_core::{
    Entid,
    TypedValue,
};
use edn::symbols::{
    Keyword,
    PlainSymbol,
};

/// A `?name` variable.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Variable(pub PlainSymbol);

impl Variable {
    pub fn from_symbol(sym: &PlainSymbol) -> Option<Variable> {
        if sym.is_var_symbol() && sym.name().len() > 1 {
            Some(Variable(sym.clone()))
        } else {
            None
        }
    }

    pub fn name(&self) -> &str {
        self.0.without_sigil()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `$source` symbol. `$` alone is the default source.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum SrcVar {
    DefaultSrc,
    NamedSrc(String),
}

impl SrcVar {
    pub fn from_symbol(sym: &PlainSymbol) -> Option<SrcVar> {
        if !sym.is_src_symbol() {
            return None;
        }
        if sym.name() == "$" {
            Some(SrcVar::DefaultSrc)
        } else {
            Some(SrcVar::NamedSrc(sym.name().to_string()))
        }
    }

    pub fn name(&self) -> &str {
        match *self {
            SrcVar::DefaultSrc => "$",
            SrcVar::NamedSrc(ref s) => s,
        }
    }
}

/// An argument to a predicate, function, or rule invocation.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum FnArg {
    Variable(Variable),
    SrcVar(SrcVar),
    Constant(TypedValue),
}

/// A place in a pattern that cannot hold an arbitrary value: entity,
/// attribute, and tx positions.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum PatternNonValuePlace {
    Placeholder,
    Variable(Variable),
    Entid(Entid),
    Ident(Keyword),
}

impl PatternNonValuePlace {
    pub fn variable(&self) -> Option<&Variable> {
        match *self {
            PatternNonValuePlace::Variable(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        match *self {
            PatternNonValuePlace::Entid(_) | PatternNonValuePlace::Ident(_) => true,
            _ => false,
        }
    }
}

/// The value place of a pattern.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum PatternValuePlace {
    Placeholder,
    Variable(Variable),
    /// An integer is ambiguous at parse time: an entid for a ref attribute,
    /// a long otherwise. Resolved against the attribute during evaluation.
    EntidOrInteger(i64),
    /// A keyword is ambiguous the same way: an ident for a ref attribute, a
    /// keyword value otherwise.
    IdentOrKeyword(Keyword),
    Constant(TypedValue),
}

impl PatternValuePlace {
    pub fn variable(&self) -> Option<&Variable> {
        match *self {
            PatternValuePlace::Variable(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        match *self {
            PatternValuePlace::Placeholder | PatternValuePlace::Variable(_) => false,
            _ => true,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Pattern {
    pub source: Option<SrcVar>,
    pub entity: PatternNonValuePlace,
    pub attribute: PatternNonValuePlace,
    pub value: PatternValuePlace,
    pub tx: PatternNonValuePlace,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Predicate {
    pub operator: PlainSymbol,
    pub args: Vec<FnArg>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum VariableOrPlaceholder {
    Placeholder,
    Variable(Variable),
}

impl VariableOrPlaceholder {
    pub fn variable(&self) -> Option<&Variable> {
        match *self {
            VariableOrPlaceholder::Variable(ref v) => Some(v),
            VariableOrPlaceholder::Placeholder => None,
        }
    }
}

/// How a function's result binds: `?x`, `[?x ...]`, `[?x ?y]`, `[[?x ?y]]`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Binding {
    BindScalar(Variable),
    BindColl(Variable),
    BindTuple(Vec<VariableOrPlaceholder>),
    BindRel(Vec<VariableOrPlaceholder>),
}

impl Binding {
    pub fn variables(&self) -> Vec<Variable> {
        match *self {
            Binding::BindScalar(ref v) | Binding::BindColl(ref v) => vec![v.clone()],
            Binding::BindTuple(ref vs) | Binding::BindRel(ref vs) => {
                vs.iter().filter_map(|v| v.variable().cloned()).collect()
            },
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct WhereFn {
    pub operator: PlainSymbol,
    pub args: Vec<FnArg>,
    pub binding: Binding,
}

/// One exported variable of an `or-join`/`not-join` binding vector. The
/// `[?x]` form requires `?x` to be bound on entry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum OrJoinArg {
    Free(Variable),
    Required(Variable),
}

impl OrJoinArg {
    pub fn variable(&self) -> &Variable {
        match *self {
            OrJoinArg::Free(ref v) | OrJoinArg::Required(ref v) => v,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum UnifyVars {
    /// `or` and `not`: unify implicitly on the free variables.
    Implicit,
    /// `or-join` and `not-join`: the declared variables.
    Explicit(Vec<OrJoinArg>),
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum OrWhereClause {
    Clause(WhereClause),
    And(Vec<WhereClause>),
}

impl OrWhereClause {
    pub fn clauses(&self) -> Vec<WhereClause> {
        match *self {
            OrWhereClause::Clause(ref clause) => vec![clause.clone()],
            OrWhereClause::And(ref clauses) => clauses.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct OrJoin {
    pub unify_vars: UnifyVars,
    pub clauses: Vec<OrWhereClause>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct NotJoin {
    pub unify_vars: UnifyVars,
    pub clauses: Vec<WhereClause>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct RuleInvocation {
    pub name: PlainSymbol,
    pub args: Vec<FnArg>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum WhereClause {
    Pattern(Pattern),
    Pred(Predicate),
    WhereFn(WhereFn),
    OrJoin(OrJoin),
    NotJoin(NotJoin),
    RuleInvocation(RuleInvocation),
    /// `($src clauses...)`: rebind the default source for the nested block.
    SourceScope(SrcVar, Vec<WhereClause>),
}

impl WhereClause {
    /// The variables this clause mentions, free or otherwise.
    pub fn collect_variables(&self, into: &mut BTreeSet<Variable>) {
        match *self {
            WhereClause::Pattern(ref p) => {
                for place in &[&p.entity, &p.attribute, &p.tx] {
                    if let Some(v) = place.variable() {
                        into.insert(v.clone());
                    }
                }
                if let Some(v) = p.value.variable() {
                    into.insert(v.clone());
                }
            },
            WhereClause::Pred(ref p) => {
                for arg in &p.args {
                    if let FnArg::Variable(ref v) = *arg {
                        into.insert(v.clone());
                    }
                }
            },
            WhereClause::WhereFn(ref f) => {
                for arg in &f.args {
                    if let FnArg::Variable(ref v) = *arg {
                        into.insert(v.clone());
                    }
                }
                for v in f.binding.variables() {
                    into.insert(v);
                }
            },
            WhereClause::OrJoin(ref o) => {
                for branch in &o.clauses {
                    for clause in branch.clauses() {
                        clause.collect_variables(into);
                    }
                }
            },
            WhereClause::NotJoin(ref n) => {
                for clause in &n.clauses {
                    clause.collect_variables(into);
                }
            },
            WhereClause::RuleInvocation(ref r) => {
                for arg in &r.args {
                    if let FnArg::Variable(ref v) = *arg {
                        into.insert(v.clone());
                    }
                }
            },
            WhereClause::SourceScope(_, ref clauses) => {
                for clause in clauses {
                    clause.collect_variables(into);
                }
            },
        }
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut into = BTreeSet::new();
        self.collect_variables(&mut into);
        into
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum Element {
    Variable(Variable),
}

impl Element {
    pub fn variable(&self) -> &Variable {
        match *self {
            Element::Variable(ref v) => v,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum FindSpec {
    /// `:find ?x ?y`: a set of tuples.
    FindRel(Vec<Element>),
    /// `:find [?x ...]`: a collection of the first column.
    FindColl(Element),
    /// `:find [?x ?y]`: exactly one tuple.
    FindTuple(Vec<Element>),
    /// `:find ?x .`: a single scalar.
    FindScalar(Element),
}

impl FindSpec {
    pub fn elements(&self) -> Vec<&Element> {
        match *self {
            FindSpec::FindRel(ref es) | FindSpec::FindTuple(ref es) => es.iter().collect(),
            FindSpec::FindColl(ref e) | FindSpec::FindScalar(ref e) => vec![e],
        }
    }
}

/// One entry of the `:in` clause.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum InBinding {
    /// `$name`: a database source, resolved by name.
    Source(SrcVar),
    /// `%`: the rules input.
    Rules,
    /// `?x`: a scalar.
    Scalar(Variable),
    /// `[?x ?y]`: one tuple.
    Tuple(Vec<Variable>),
    /// `[?x ...]`: a collection.
    Coll(Variable),
    /// `[[?x ?y]]`: a relation.
    Rel(Vec<Variable>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FindQuery {
    pub find_spec: FindSpec,
    pub in_bindings: Vec<InBinding>,
    pub with: Vec<Variable>,
    pub where_clauses: Vec<WhereClause>,
    /// `:keys`/`:syms`/`:strs` annotation, as strings.
    pub keys: Option<Vec<String>>,
}

/// One definition branch of a rule. Multiple branches with the same name
/// union.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub name: PlainSymbol,
    pub args: Vec<Variable>,
    pub clauses: Vec<WhereClause>,
}

/// A rule set, keyed by rule name.
pub type Rules = BTreeMap<PlainSymbol, Vec<Rule>>;

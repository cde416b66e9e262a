// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The query evaluator.
//!
//! Evaluation threads a relation — a `(header, tuples)` pair — through the
//! ordered clause sequence. Patterns pick the cheapest index for their
//! constant components, scan it, and join the rows in; predicates filter;
//! functions bind; `or`/`or-join` union branch results under the exported
//! key set; `not`/`not-join` antijoin; rules evaluate to a fixpoint.

use std::collections::{
    BTreeSet,
    HashMap,
    HashSet,
};

use indexmap::IndexSet;
use lmdb::Transaction;

use datalith_core::{
    Entid,
    HasSchema,
    Schema,
    TypedValue,
};
use datalith_db::store::{
    self,
    Dbis,
    IndexType,
};
use datalith_db::types::Datom;
use edn::symbols::PlainSymbol;

use errors::{
    QueryErrorKind,
    Result,
};
use plan;
use types::{
    Binding,
    FindQuery,
    FindSpec,
    FnArg,
    InBinding,
    NotJoin,
    OrJoin,
    OrJoinArg,
    OrWhereClause,
    Pattern,
    PatternNonValuePlace,
    PatternValuePlace,
    Predicate,
    RuleInvocation,
    Rules,
    SrcVar,
    UnifyVars,
    Variable,
    VariableOrPlaceholder,
    WhereClause,
    WhereFn,
};

/// A read view over one store: the snapshot transaction, the dbis, and the
/// schema as of that snapshot.
pub struct DbView<'t, T: Transaction + 't> {
    pub txn: &'t T,
    pub dbis: &'t Dbis,
    pub schema: &'t Schema,
}

impl<'t, T: Transaction> Clone for DbView<'t, T> {
    fn clone(&self) -> Self {
        DbView {
            txn: self.txn,
            dbis: self.dbis,
            schema: self.schema,
        }
    }
}

/// The named sources a query may draw from. `$` is the default.
pub struct Sources<'t, T: Transaction + 't> {
    views: HashMap<String, DbView<'t, T>>,
}

impl<'t, T: Transaction> Sources<'t, T> {
    pub fn new(default: DbView<'t, T>) -> Sources<'t, T> {
        let mut views = HashMap::new();
        views.insert("$".to_string(), default);
        Sources { views: views }
    }

    pub fn add(&mut self, name: &str, view: DbView<'t, T>) {
        self.views.insert(name.to_string(), view);
    }

    fn get(&self, name: &str) -> Result<&DbView<'t, T>> {
        self.views.get(name).ok_or_else(|| QueryErrorKind::UnknownSource(name.to_string()).into())
    }
}

/// Values supplied for the query's `:in` bindings, in order (sources and
/// `%` aside, which resolve by name).
#[derive(Clone, Debug, Default)]
pub struct QueryInputs {
    pub values: Vec<QueryInputValue>,
    pub rules: Option<Rules>,
}

#[derive(Clone, Debug)]
pub enum QueryInputValue {
    Scalar(TypedValue),
    Tuple(Vec<TypedValue>),
    Coll(Vec<TypedValue>),
    Rel(Vec<Vec<TypedValue>>),
}

impl QueryInputs {
    pub fn with_value(mut self, value: QueryInputValue) -> QueryInputs {
        self.values.push(value);
        self
    }

    pub fn with_rules(mut self, rules: Rules) -> QueryInputs {
        self.rules = Some(rules);
        self
    }
}

/// A relation: named columns over a bag of rows. Deduplication happens at
/// the edges (projection, union), not after every join.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Relation {
    pub header: Vec<Variable>,
    pub tuples: Vec<Vec<TypedValue>>,
}

impl Relation {
    /// The relation with no columns and one empty row: the join identity.
    pub fn unit() -> Relation {
        Relation {
            header: vec![],
            tuples: vec![vec![]],
        }
    }

    pub fn empty(header: Vec<Variable>) -> Relation {
        Relation {
            header: header,
            tuples: vec![],
        }
    }

    fn column(&self, var: &Variable) -> Option<usize> {
        self.header.iter().position(|v| v == var)
    }

    /// Project onto `vars`, deduplicating. Every var must be present.
    fn project_onto(&self, vars: &[Variable]) -> Result<Relation> {
        let mut columns = Vec::with_capacity(vars.len());
        for var in vars {
            match self.column(var) {
                Some(index) => columns.push(index),
                None => bail!(QueryErrorKind::UnboundVariable(var.0.clone())),
            }
        }
        let mut seen: HashSet<Vec<TypedValue>> = HashSet::new();
        let mut tuples = vec![];
        for row in &self.tuples {
            let projected: Vec<TypedValue> = columns.iter().map(|&i| row[i].clone()).collect();
            if seen.insert(projected.clone()) {
                tuples.push(projected);
            }
        }
        Ok(Relation {
            header: vars.to_vec(),
            tuples: tuples,
        })
    }

    /// Project onto the subset of `vars` actually present.
    fn project_existing(&self, vars: &[Variable]) -> Relation {
        let present: Vec<Variable> = vars.iter()
            .filter(|v| self.column(v).is_some())
            .cloned()
            .collect();
        self.project_onto(&present).expect("projected vars are present")
    }

    fn dedup(&mut self) {
        let mut seen: HashSet<Vec<TypedValue>> = HashSet::new();
        self.tuples.retain(|row| seen.insert(row.clone()));
    }
}

/// Natural join on shared columns: hash join with the smaller side as the
/// build input, plain nested loop when one side is tiny.
pub fn join(left: Relation, right: Relation) -> Relation {
    let shared: Vec<Variable> = left.header.iter()
        .filter(|v| right.header.contains(v))
        .cloned()
        .collect();

    let mut header = left.header.clone();
    for v in &right.header {
        if !shared.contains(v) {
            header.push(v.clone());
        }
    }

    let right_extra: Vec<usize> = right.header.iter()
        .enumerate()
        .filter(|&(_, v)| !shared.contains(v))
        .map(|(i, _)| i)
        .collect();

    let mut tuples = vec![];

    if shared.is_empty() {
        // Cartesian product.
        for l in &left.tuples {
            for r in &right.tuples {
                let mut row = l.clone();
                row.extend(right_extra.iter().map(|&i| r[i].clone()));
                tuples.push(row);
            }
        }
        return Relation { header: header, tuples: tuples };
    }

    let left_key: Vec<usize> = shared.iter().map(|v| left.column(v).unwrap()).collect();
    let right_key: Vec<usize> = shared.iter().map(|v| right.column(v).unwrap()).collect();

    const TINY: usize = 16;
    if left.tuples.len() <= TINY || right.tuples.len() <= TINY {
        for l in &left.tuples {
            for r in &right.tuples {
                if left_key.iter().zip(right_key.iter()).all(|(&li, &ri)| l[li] == r[ri]) {
                    let mut row = l.clone();
                    row.extend(right_extra.iter().map(|&i| r[i].clone()));
                    tuples.push(row);
                }
            }
        }
        return Relation { header: header, tuples: tuples };
    }

    // Hash join, building on the right side.
    let mut built: HashMap<Vec<TypedValue>, Vec<&Vec<TypedValue>>> = HashMap::new();
    for r in &right.tuples {
        let key: Vec<TypedValue> = right_key.iter().map(|&i| r[i].clone()).collect();
        built.entry(key).or_insert_with(Vec::new).push(r);
    }
    for l in &left.tuples {
        let key: Vec<TypedValue> = left_key.iter().map(|&i| l[i].clone()).collect();
        if let Some(matches) = built.get(&key) {
            for r in matches {
                let mut row = l.clone();
                row.extend(right_extra.iter().map(|&i| r[i].clone()));
                tuples.push(row);
            }
        }
    }
    Relation { header: header, tuples: tuples }
}

struct EvalState {
    rule_done: HashMap<PlainSymbol, Relation>,
    rule_partial: HashMap<PlainSymbol, Relation>,
    rule_in_progress: BTreeSet<PlainSymbol>,
}

impl EvalState {
    fn new() -> EvalState {
        EvalState {
            rule_done: HashMap::new(),
            rule_partial: HashMap::new(),
            rule_in_progress: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct QueryOutput {
    pub spec: FindSpec,
    pub results: QueryResults,
    pub keys: Option<Vec<String>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryResults {
    Scalar(Option<TypedValue>),
    Coll(Vec<TypedValue>),
    Tuple(Option<Vec<TypedValue>>),
    Rel(Vec<Vec<TypedValue>>),
}

/// Run a query from its text form.
pub fn q_once<'t, T: Transaction>(sources: &Sources<'t, T>,
                                  query: &str,
                                  inputs: QueryInputs)
                                  -> Result<QueryOutput> {
    let parsed = ::parse::parse_query(query)?;
    q_parsed(sources, &parsed, inputs)
}

pub fn q_parsed<'t, T: Transaction>(sources: &Sources<'t, T>,
                                    query: &FindQuery,
                                    inputs: QueryInputs)
                                    -> Result<QueryOutput> {
    let empty_rules = Rules::new();
    let rules = inputs.rules.as_ref().unwrap_or(&empty_rules);

    // Build the initial relation from the `:in` bindings.
    let mut rel = Relation::unit();
    let mut value_inputs = inputs.values.iter();
    let mut consumed = 0;
    for binding in &query.in_bindings {
        match *binding {
            InBinding::Source(ref src) => {
                sources.get(src.name())?;
            },
            InBinding::Rules => {},
            ref value_binding => {
                let value = match value_inputs.next() {
                    Some(value) => value,
                    None => bail!(QueryErrorKind::WrongNumberOfInputs(
                        consumed + 1, inputs.values.len())),
                };
                consumed += 1;
                let bound = bind_input(value_binding, value)?;
                rel = join(rel, bound);
            },
        }
    }
    if value_inputs.next().is_some() {
        bail!(QueryErrorKind::WrongNumberOfInputs(consumed, inputs.values.len()));
    }

    let initially_bound: BTreeSet<Variable> = rel.header.iter().cloned().collect();
    let ordered = plan::order_clauses(query.where_clauses.clone(), &initially_bound);
    debug!("evaluating {} clauses against {} input rows", ordered.len(), rel.tuples.len());

    let mut state = EvalState::new();
    let rel = eval_clauses(sources, rules, "$", &mut state, &ordered, rel)?;

    project(query, rel)
}

fn bind_input(binding: &InBinding, value: &QueryInputValue) -> Result<Relation> {
    match (binding, value) {
        (&InBinding::Scalar(ref var), &QueryInputValue::Scalar(ref v)) => {
            Ok(Relation {
                header: vec![var.clone()],
                tuples: vec![vec![v.clone()]],
            })
        },
        (&InBinding::Tuple(ref vars), &QueryInputValue::Tuple(ref vs)) if vars.len() == vs.len() => {
            Ok(Relation {
                header: vars.clone(),
                tuples: vec![vs.clone()],
            })
        },
        (&InBinding::Coll(ref var), &QueryInputValue::Coll(ref vs)) => {
            Ok(Relation {
                header: vec![var.clone()],
                tuples: vs.iter().map(|v| vec![v.clone()]).collect(),
            })
        },
        (&InBinding::Rel(ref vars), &QueryInputValue::Rel(ref rows)) => {
            if rows.iter().any(|row| row.len() != vars.len()) {
                bail!(QueryErrorKind::MalformedClause("relation input of the wrong width".to_string()));
            }
            Ok(Relation {
                header: vars.clone(),
                tuples: rows.clone(),
            })
        },
        (binding, value) => {
            bail!(QueryErrorKind::MalformedClause(format!(
                "input value {:?} does not match :in binding {:?}", value, binding)))
        },
    }
}

fn eval_clauses<'t, T: Transaction>(sources: &Sources<'t, T>,
                                    rules: &Rules,
                                    default_src: &str,
                                    state: &mut EvalState,
                                    clauses: &[WhereClause],
                                    mut rel: Relation)
                                    -> Result<Relation> {
    for clause in clauses {
        rel = eval_clause(sources, rules, default_src, state, clause, rel)?;
    }
    Ok(rel)
}

fn eval_clause<'t, T: Transaction>(sources: &Sources<'t, T>,
                                   rules: &Rules,
                                   default_src: &str,
                                   state: &mut EvalState,
                                   clause: &WhereClause,
                                   rel: Relation)
                                   -> Result<Relation> {
    match *clause {
        WhereClause::Pattern(ref pattern) => {
            eval_pattern(sources, default_src, pattern, rel)
        },
        WhereClause::Pred(ref predicate) => eval_predicate(predicate, rel),
        WhereClause::WhereFn(ref f) => eval_where_fn(f, rel),
        WhereClause::OrJoin(ref o) => {
            eval_or_join(sources, rules, default_src, state, o, rel)
        },
        WhereClause::NotJoin(ref n) => {
            eval_not_join(sources, rules, default_src, state, n, rel)
        },
        WhereClause::RuleInvocation(ref invocation) => {
            eval_rule_invocation(sources, rules, default_src, state, invocation, rel)
        },
        WhereClause::SourceScope(ref src, ref clauses) => {
            eval_clauses(sources, rules, src.name(), state, clauses, rel)
        },
    }
}

// ---------- Patterns ----------

/// Coerce an ambiguous constant toward the attribute's declared type.
fn constant_for_attribute(schema: &Schema,
                          attribute: Option<Entid>,
                          place: &PatternValuePlace)
                          -> Option<Option<TypedValue>> {
    // The outer Option is "did resolution succeed"; the inner is "is there
    // a constant at all". A known-impossible constant (an unknown ident for
    // a ref attribute) makes the whole pattern match nothing.
    let is_ref = attribute.map(|a| schema.is_ref(a)).unwrap_or(false);
    let declared = attribute.and_then(|a| schema.value_type(a));
    match *place {
        PatternValuePlace::Placeholder | PatternValuePlace::Variable(_) => Some(None),
        PatternValuePlace::EntidOrInteger(i) => {
            if is_ref {
                Some(Some(TypedValue::Ref(i)))
            } else if declared == Some(::datalith_core::ValueType::Double) {
                Some(Some(TypedValue::Double((i as f64).into())))
            } else {
                Some(Some(TypedValue::Long(i)))
            }
        },
        PatternValuePlace::IdentOrKeyword(ref k) => {
            if is_ref {
                match schema.get_entid(k) {
                    Some(e) => Some(Some(TypedValue::Ref(e.0))),
                    None => None,
                }
            } else {
                Some(Some(TypedValue::Keyword(k.clone())))
            }
        },
        PatternValuePlace::Constant(ref v) => Some(Some(v.clone())),
    }
}

fn non_value_constant(schema: &Schema, place: &PatternNonValuePlace) -> Option<Option<Entid>> {
    match *place {
        PatternNonValuePlace::Placeholder | PatternNonValuePlace::Variable(_) => Some(None),
        PatternNonValuePlace::Entid(e) => Some(Some(e)),
        PatternNonValuePlace::Ident(ref k) => {
            match schema.get_entid(k) {
                Some(e) => Some(Some(e.0)),
                None => None,
            }
        },
    }
}

fn pattern_header(pattern: &Pattern) -> Vec<Variable> {
    let mut header: Vec<Variable> = vec![];
    {
        let mut push = |v: Option<&Variable>| {
            if let Some(v) = v {
                if !header.contains(v) {
                    header.push(v.clone());
                }
            }
        };
        push(pattern.entity.variable());
        push(pattern.attribute.variable());
        push(pattern.value.variable());
        push(pattern.tx.variable());
    }
    header
}

fn eval_pattern<'t, T: Transaction>(sources: &Sources<'t, T>,
                                    default_src: &str,
                                    pattern: &Pattern,
                                    rel: Relation)
                                    -> Result<Relation> {
    let source_name = pattern.source.as_ref().map(|s| s.name()).unwrap_or(default_src);
    let view = sources.get(source_name)?;
    let schema = view.schema;

    let header = pattern_header(pattern);

    // Resolve constants; an unresolvable ident matches nothing.
    let e_const = match non_value_constant(schema, &pattern.entity) {
        Some(c) => c,
        None => return Ok(join(rel, Relation::empty(header))),
    };
    let a_const = match non_value_constant(schema, &pattern.attribute) {
        Some(c) => c,
        None => return Ok(join(rel, Relation::empty(header))),
    };
    let tx_const = match non_value_constant(schema, &pattern.tx) {
        Some(c) => c,
        None => return Ok(join(rel, Relation::empty(header))),
    };
    let v_const = match constant_for_attribute(schema, a_const, &pattern.value) {
        Some(c) => c,
        None => return Ok(join(rel, Relation::empty(header))),
    };

    // Compute the best index for the bound components.
    let attribute = a_const.and_then(|a| schema.attribute_for_entid(a));
    let datoms = scan_pattern(view, e_const, a_const, v_const.as_ref(), attribute.map(|a| a.has_avet()))?;

    // Bind matching datoms into rows.
    let mut out = Relation::empty(header);
    'datom: for datom in datoms {
        if let Some(e) = e_const {
            if datom.e != e {
                continue;
            }
        }
        if let Some(a) = a_const {
            if datom.a != a {
                continue;
            }
        }
        if let Some(ref v) = v_const {
            if &datom.v != v {
                continue;
            }
        }
        if let Some(tx) = tx_const {
            if datom.tx != tx {
                continue;
            }
        }

        let mut row: Vec<Option<TypedValue>> = vec![None; out.header.len()];
        {
            let mut bind = |header: &[Variable],
                            row: &mut Vec<Option<TypedValue>>,
                            var: Option<&Variable>,
                            value: TypedValue|
                            -> bool {
                if let Some(var) = var {
                    let index = header.iter().position(|v| v == var).expect("pattern var in header");
                    match row[index] {
                        Some(ref bound) => return bound == &value,
                        None => row[index] = Some(value),
                    }
                }
                true
            };
            if !bind(&out.header, &mut row, pattern.entity.variable(), TypedValue::Ref(datom.e)) {
                continue 'datom;
            }
            if !bind(&out.header, &mut row, pattern.attribute.variable(), TypedValue::Ref(datom.a)) {
                continue 'datom;
            }
            if !bind(&out.header, &mut row, pattern.value.variable(), datom.v.clone()) {
                continue 'datom;
            }
            if !bind(&out.header, &mut row, pattern.tx.variable(), TypedValue::Ref(datom.tx)) {
                continue 'datom;
            }
        }
        out.tuples.push(row.into_iter().map(|v| v.expect("every header var bound")).collect());
    }

    Ok(join(rel, out))
}

/// Scan the substrate using the most selective index the constants allow.
fn scan_pattern<'t, T: Transaction>(view: &DbView<'t, T>,
                                    e: Option<Entid>,
                                    a: Option<Entid>,
                                    v: Option<&TypedValue>,
                                    attribute_has_avet: Option<bool>)
                                    -> Result<Vec<Datom>> {
    let iter = if let Some(e) = e {
        // EAVT; `v` may only prefix when `a` is also bound.
        let v = if a.is_some() { v } else { None };
        store::datoms(view.txn, view.dbis, IndexType::Eavt, Some(e), a, v)?
    } else if let Some(a) = a {
        if v.is_some() && attribute_has_avet == Some(true) {
            store::datoms(view.txn, view.dbis, IndexType::Avet, None, Some(a), v)?
        } else {
            store::datoms(view.txn, view.dbis, IndexType::Aevt, None, Some(a), None)?
        }
    } else if let Some(v) = v {
        match *v {
            TypedValue::Ref(_) => {
                store::datoms(view.txn, view.dbis, IndexType::Vaet, None, None, Some(v))?
            },
            _ => store::datoms(view.txn, view.dbis, IndexType::Eavt, None, None, None)?,
        }
    } else {
        store::datoms(view.txn, view.dbis, IndexType::Eavt, None, None, None)?
    };
    Ok(iter.collect_datoms()?)
}

// ---------- Predicates and functions ----------

fn resolve_args(args: &[FnArg], header: &[Variable], row: &[TypedValue]) -> Result<Vec<TypedValue>> {
    args.iter()
        .map(|arg| match *arg {
            FnArg::Constant(ref v) => Ok(v.clone()),
            FnArg::Variable(ref var) => {
                match header.iter().position(|v| v == var) {
                    Some(index) => Ok(row[index].clone()),
                    None => Err(QueryErrorKind::UnboundVariable(var.0.clone()).into()),
                }
            },
            FnArg::SrcVar(_) => {
                Err(QueryErrorKind::MalformedClause("source arguments are not accepted here".to_string()).into())
            },
        })
        .collect()
}

fn as_f64(v: &TypedValue) -> Option<f64> {
    match *v {
        TypedValue::Long(l) => Some(l as f64),
        TypedValue::Double(d) => Some(d.into_inner()),
        // Entity ids are plain numbers in the query language: `(= ?e 1)`
        // and `(rule 1 ?x)` compare a ref against an integer literal.
        TypedValue::Ref(e) => Some(e as f64),
        _ => None,
    }
}

/// Total-ish comparison for predicates: numerics compare across Long and
/// Double; other values compare within their own type.
fn compare_values(a: &TypedValue, b: &TypedValue) -> Option<::std::cmp::Ordering> {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => {
            if a.value_type() == b.value_type() {
                Some(a.cmp(b))
            } else {
                None
            }
        },
    }
}

fn values_equal(a: &TypedValue, b: &TypedValue) -> bool {
    compare_values(a, b) == Some(::std::cmp::Ordering::Equal)
}

fn apply_predicate(operator: &PlainSymbol, args: &[TypedValue]) -> Result<bool> {
    use std::cmp::Ordering;

    let chain = |accept: &dyn Fn(Ordering) -> bool| -> bool {
        args.windows(2).all(|pair| {
            match compare_values(&pair[0], &pair[1]) {
                Some(ordering) => accept(ordering),
                None => false,
            }
        })
    };

    match operator.name() {
        "=" | "==" => Ok(chain(&|o| o == Ordering::Equal)),
        "!=" | "not=" => {
            match (args.get(0), args.get(1)) {
                (Some(a), Some(b)) => Ok(!values_equal(a, b)),
                _ => bail!(QueryErrorKind::InvalidNumberOfArguments(operator.clone(), 2, args.len())),
            }
        },
        "<" => Ok(chain(&|o| o == Ordering::Less)),
        "<=" => Ok(chain(&|o| o != Ordering::Greater)),
        ">" => Ok(chain(&|o| o == Ordering::Greater)),
        ">=" => Ok(chain(&|o| o != Ordering::Less)),
        _ => bail!(QueryErrorKind::UnknownFunction(operator.clone())),
    }
}

fn eval_predicate(predicate: &Predicate, rel: Relation) -> Result<Relation> {
    let mut out = Relation::empty(rel.header.clone());
    for row in &rel.tuples {
        let args = resolve_args(&predicate.args, &rel.header, row)?;
        if apply_predicate(&predicate.operator, &args)? {
            out.tuples.push(row.clone());
        }
    }
    Ok(out)
}

enum FnValue {
    Scalar(TypedValue),
    Coll(Vec<TypedValue>),
    Tuple(Vec<Option<TypedValue>>),
    Rel(Vec<Vec<Option<TypedValue>>>),
}

fn arith(operator: &PlainSymbol, args: &[TypedValue]) -> Result<TypedValue> {
    if args.is_empty() {
        bail!(QueryErrorKind::InvalidNumberOfArguments(operator.clone(), 1, 0));
    }
    let any_double = args.iter().any(|v| v.value_type() == ::datalith_core::ValueType::Double);
    let numbers: Option<Vec<f64>> = args.iter().map(as_f64).collect();
    let numbers = match numbers {
        Some(ns) => ns,
        None => bail!(QueryErrorKind::MalformedClause(format!(
            "non-numeric argument to {}", operator))),
    };
    let folded = match operator.name() {
        "+" => numbers.iter().sum(),
        "*" => numbers.iter().product(),
        "-" => numbers[1..].iter().fold(numbers[0], |acc, n| acc - n),
        "/" => numbers[1..].iter().fold(numbers[0], |acc, n| acc / n),
        _ => unreachable!(),
    };
    if any_double {
        Ok(TypedValue::Double(folded.into()))
    } else {
        Ok(TypedValue::Long(folded as i64))
    }
}

fn apply_fn(operator: &PlainSymbol, args: Vec<TypedValue>) -> Result<FnValue> {
    match operator.name() {
        "+" | "-" | "*" | "/" => arith(operator, &args).map(FnValue::Scalar),
        "ground" => {
            if args.len() != 1 {
                bail!(QueryErrorKind::InvalidNumberOfArguments(operator.clone(), 1, args.len()));
            }
            match args.into_iter().next().expect("one argument") {
                TypedValue::Tuple(components) => {
                    // The binding form decides whether this reads as a
                    // collection, a tuple, or a relation.
                    Ok(FnValue::Tuple(components))
                },
                scalar => Ok(FnValue::Scalar(scalar)),
            }
        },
        "tuple" => {
            Ok(FnValue::Scalar(TypedValue::Tuple(args.into_iter().map(Some).collect())))
        },
        "untuple" => {
            if args.len() != 1 {
                bail!(QueryErrorKind::InvalidNumberOfArguments(operator.clone(), 1, args.len()));
            }
            match args.into_iter().next().expect("one argument") {
                TypedValue::Tuple(components) => Ok(FnValue::Tuple(components)),
                v => bail!(QueryErrorKind::MalformedClause(format!(
                    "untuple expects a tuple value, got {:?}", v))),
            }
        },
        _ => bail!(QueryErrorKind::UnknownFunction(operator.clone())),
    }
}

fn eval_where_fn(f: &WhereFn, rel: Relation) -> Result<Relation> {
    let binding_vars = f.binding.variables();
    let mut header = rel.header.clone();
    for v in &binding_vars {
        if !header.contains(v) {
            header.push(v.clone());
        }
    }

    let mut out = Relation::empty(header);
    for row in &rel.tuples {
        let args = resolve_args(&f.args, &rel.header, row)?;
        let result = apply_fn(&f.operator, args)?;

        // Normalize the result into a set of tuple extensions keyed by the
        // binding's variables.
        let extensions: Vec<Vec<Option<TypedValue>>> = match (&f.binding, result) {
            (&Binding::BindScalar(_), FnValue::Scalar(v)) => vec![vec![Some(v)]],
            (&Binding::BindColl(_), FnValue::Tuple(components)) => {
                components.into_iter().map(|c| vec![c]).collect()
            },
            (&Binding::BindColl(_), FnValue::Coll(vs)) => {
                vs.into_iter().map(|v| vec![Some(v)]).collect()
            },
            (&Binding::BindTuple(ref places), FnValue::Tuple(components)) => {
                if places.len() != components.len() {
                    bail!(QueryErrorKind::MalformedClause(format!(
                        "tuple binding of width {} for a value of width {}",
                        places.len(), components.len())));
                }
                vec![components]
            },
            (&Binding::BindRel(ref places), FnValue::Tuple(rows)) => {
                let mut out_rows = vec![];
                for r in rows {
                    match r {
                        Some(TypedValue::Tuple(components)) => {
                            if places.len() != components.len() {
                                bail!(QueryErrorKind::MalformedClause(
                                    "relation binding of the wrong width".to_string()));
                            }
                            out_rows.push(components);
                        },
                        _ => bail!(QueryErrorKind::MalformedClause(
                            "relation binding expects a collection of tuples".to_string())),
                    }
                }
                out_rows
            },
            (&Binding::BindRel(_), FnValue::Rel(rows)) => rows,
            (binding, _) => {
                bail!(QueryErrorKind::MalformedClause(format!(
                    "function result does not fit binding {:?}", binding)));
            },
        };

        // Placeholders in the binding skip columns; a `nil` component can
        // bind nothing, so it drops the row.
        let places: Vec<VariableOrPlaceholder> = match f.binding {
            Binding::BindScalar(ref v) | Binding::BindColl(ref v) => {
                vec![VariableOrPlaceholder::Variable(v.clone())]
            },
            Binding::BindTuple(ref places) | Binding::BindRel(ref places) => places.clone(),
        };

        'extension: for extension in extensions {
            let mut new_row = row.clone();
            let mut additions: Vec<Option<TypedValue>> =
                vec![None; out.header.len() - rel.header.len()];
            for (place, component) in places.iter().zip(extension) {
                let var = match place.variable() {
                    Some(var) => var,
                    None => continue,
                };
                let value = match component {
                    Some(value) => value,
                    None => continue 'extension,
                };
                match rel.header.iter().position(|v| v == var) {
                    Some(index) => {
                        // Unification with an existing binding.
                        if new_row[index] != value {
                            continue 'extension;
                        }
                    },
                    None => {
                        let index = out.header.iter().position(|v| v == var)
                            .expect("binding var in header") - rel.header.len();
                        additions[index] = Some(value);
                    },
                }
            }
            if additions.iter().any(|a| a.is_none()) {
                continue 'extension;
            }
            new_row.extend(additions.into_iter().map(|a| a.expect("checked above")));
            out.tuples.push(new_row);
        }
    }
    Ok(out)
}

// ---------- or / not ----------

fn branch_free_vars(branch: &OrWhereClause) -> BTreeSet<Variable> {
    let mut vars = BTreeSet::new();
    for clause in branch.clauses() {
        clause.collect_variables(&mut vars);
    }
    vars
}

fn eval_or_join<'t, T: Transaction>(sources: &Sources<'t, T>,
                                    rules: &Rules,
                                    default_src: &str,
                                    state: &mut EvalState,
                                    or_join: &OrJoin,
                                    rel: Relation)
                                    -> Result<Relation> {
    let exported: Vec<Variable> = match or_join.unify_vars {
        UnifyVars::Implicit => {
            // Every branch must use the same set of free variables.
            let mut sets = or_join.clauses.iter().map(branch_free_vars);
            let first = sets.next().unwrap_or_else(BTreeSet::new);
            for set in sets {
                if set != first {
                    bail!(QueryErrorKind::NonMatchingFreeVarsInOr);
                }
            }
            first.into_iter().collect()
        },
        UnifyVars::Explicit(ref args) => {
            let mut exported = IndexSet::new();
            for arg in args {
                if let OrJoinArg::Required(ref v) = *arg {
                    if rel.column(v).is_none() {
                        bail!(QueryErrorKind::InsufficientBindings(format!(
                            "{} must be bound before this or-join", v)));
                    }
                }
                exported.insert(arg.variable().clone());
            }
            exported.into_iter().collect()
        },
    };

    // Branches start from the parent relation projected to the exported
    // variables it already binds.
    let seed_vars: Vec<Variable> = exported.iter()
        .filter(|v| rel.column(v).is_some())
        .cloned()
        .collect();
    let seed = rel.project_existing(&seed_vars);

    let mut union = Relation::empty(exported.clone());
    for branch in &or_join.clauses {
        let clauses = branch.clauses();
        let branch_rel = eval_clauses(sources, rules, default_src, state, &clauses, seed.clone())?;
        // Reconcile differing branch headers by projecting to the exported
        // key set before the union.
        let projected = branch_rel.project_onto(&exported)?;
        union.tuples.extend(projected.tuples);
    }
    union.dedup();

    Ok(join(rel, union))
}

fn eval_not_join<'t, T: Transaction>(sources: &Sources<'t, T>,
                                     rules: &Rules,
                                     default_src: &str,
                                     state: &mut EvalState,
                                     not_join: &NotJoin,
                                     rel: Relation)
                                     -> Result<Relation> {
    let join_vars: Vec<Variable> = match not_join.unify_vars {
        UnifyVars::Implicit => {
            let mut inner = BTreeSet::new();
            for clause in &not_join.clauses {
                clause.collect_variables(&mut inner);
            }
            inner.into_iter().filter(|v| rel.column(v).is_some()).collect()
        },
        UnifyVars::Explicit(ref args) => {
            let mut vars = vec![];
            for arg in args {
                let v = arg.variable();
                if rel.column(v).is_none() {
                    bail!(QueryErrorKind::InsufficientBindings(format!(
                        "{} must be bound before this not-join", v)));
                }
                vars.push(v.clone());
            }
            vars
        },
    };

    if join_vars.is_empty() {
        bail!(QueryErrorKind::InsufficientBindings(
            "'not' shares no variables with the enclosing query".to_string()));
    }

    let seed = rel.project_existing(&join_vars);
    let inner = eval_clauses(sources, rules, default_src, state, &not_join.clauses, seed)?;
    let inner_keys: HashSet<Vec<TypedValue>> = inner.project_onto(&join_vars)?.tuples
        .into_iter()
        .collect();

    let columns: Vec<usize> = join_vars.iter()
        .map(|v| rel.column(v).expect("join vars are bound"))
        .collect();
    let mut out = Relation::empty(rel.header.clone());
    for row in rel.tuples {
        let key: Vec<TypedValue> = columns.iter().map(|&i| row[i].clone()).collect();
        if !inner_keys.contains(&key) {
            out.tuples.push(row);
        }
    }
    Ok(out)
}

// ---------- Rules ----------

fn eval_rule_invocation<'t, T: Transaction>(sources: &Sources<'t, T>,
                                            rules: &Rules,
                                            default_src: &str,
                                            state: &mut EvalState,
                                            invocation: &RuleInvocation,
                                            rel: Relation)
                                            -> Result<Relation> {
    let branches = match rules.get(&invocation.name) {
        Some(branches) if !branches.is_empty() => branches,
        _ => bail!(QueryErrorKind::UnknownRule(invocation.name.clone())),
    };
    let formal = &branches[0].args;
    if invocation.args.len() != formal.len() {
        bail!(QueryErrorKind::InvalidNumberOfArguments(
            invocation.name.clone(), formal.len(), invocation.args.len()));
    }

    let solved = solve_rule(sources, rules, default_src, state, &invocation.name)?;

    // Rename the rule's columns to the invocation's variables, filtering on
    // constant arguments; a repeated variable unifies.
    let mut header: Vec<Variable> = vec![];
    let mut var_columns: Vec<(usize, usize)> = vec![]; // (solved column, out column)
    let mut const_columns: Vec<(usize, TypedValue)> = vec![];
    let mut unify_columns: Vec<(usize, usize)> = vec![]; // (solved column, solved column)
    for (position, arg) in invocation.args.iter().enumerate() {
        match *arg {
            FnArg::Variable(ref v) => {
                match header.iter().position(|h| h == v) {
                    Some(prior) => {
                        unify_columns.push((var_columns[prior].0, position));
                    },
                    None => {
                        header.push(v.clone());
                        var_columns.push((position, header.len() - 1));
                    },
                }
            },
            FnArg::Constant(ref value) => const_columns.push((position, value.clone())),
            FnArg::SrcVar(_) => {
                bail!(QueryErrorKind::MalformedClause(
                    "source arguments are not accepted in rule invocations".to_string()));
            },
        }
    }

    let mut out = Relation::empty(header);
    for row in &solved.tuples {
        if const_columns.iter().any(|&(i, ref v)| !values_equal(&row[i], v)) {
            continue;
        }
        if unify_columns.iter().any(|&(a, b)| row[a] != row[b]) {
            continue;
        }
        out.tuples.push(var_columns.iter().map(|&(i, _)| row[i].clone()).collect());
    }
    out.dedup();

    Ok(join(rel, out))
}

/// Evaluate a rule to fixpoint: union the branch bodies, replacing
/// recursive invocations with the accumulated relation, until nothing new
/// appears.
fn solve_rule<'t, T: Transaction>(sources: &Sources<'t, T>,
                                  rules: &Rules,
                                  default_src: &str,
                                  state: &mut EvalState,
                                  name: &PlainSymbol)
                                  -> Result<Relation> {
    if let Some(done) = state.rule_done.get(name) {
        return Ok(done.clone());
    }
    let branches = rules.get(name).expect("caller checked the rule exists").clone();
    let formal = branches[0].args.clone();

    if state.rule_in_progress.contains(name) {
        // A recursive reference: use the relation accumulated so far.
        return Ok(state.rule_partial
                       .get(name)
                       .cloned()
                       .unwrap_or_else(|| Relation::empty(formal)));
    }

    state.rule_in_progress.insert(name.clone());
    let mut current = Relation::empty(formal.clone());
    loop {
        state.rule_partial.insert(name.clone(), current.clone());
        let mut next = Relation::empty(formal.clone());
        for branch in &branches {
            let body = eval_clauses(sources, rules, default_src, state,
                                    &branch.clauses, Relation::unit())?;
            let mut projected = body.project_onto(&branch.args)?;
            // Branches may name their arguments differently; positions
            // line up with the formals.
            projected.header = formal.clone();
            next.tuples.extend(projected.tuples);
        }
        next.dedup();
        if next == current {
            break;
        }
        current = next;
    }
    state.rule_in_progress.remove(name);
    state.rule_partial.remove(name);
    state.rule_done.insert(name.clone(), current.clone());
    Ok(current)
}

// ---------- Projection ----------

fn project(query: &FindQuery, rel: Relation) -> Result<QueryOutput> {
    let find_vars: Vec<Variable> = query.find_spec.elements()
        .into_iter()
        .map(|e| e.variable().clone())
        .collect();

    let mut projection_vars = find_vars.clone();
    for v in &query.with {
        if !projection_vars.contains(v) {
            projection_vars.push(v.clone());
        }
    }

    // The result is a set: deduplicate over find + with, then render the
    // find columns.
    let projected = rel.project_onto(&projection_vars)?;
    let rows: Vec<Vec<TypedValue>> = projected.tuples
        .into_iter()
        .map(|row| row.into_iter().take(find_vars.len()).collect())
        .collect();

    let results = match query.find_spec {
        FindSpec::FindRel(_) => QueryResults::Rel(rows),
        FindSpec::FindColl(_) => {
            QueryResults::Coll(rows.into_iter().map(|mut row| row.remove(0)).collect())
        },
        FindSpec::FindTuple(_) => QueryResults::Tuple(rows.into_iter().next()),
        FindSpec::FindScalar(_) => {
            QueryResults::Scalar(rows.into_iter().next().map(|mut row| row.remove(0)))
        },
    };

    Ok(QueryOutput {
        spec: query.find_spec.clone(),
        results: results,
        keys: query.keys.clone(),
    })
}

// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Parse the EDN query form into the AST.
//!
//! Both shapes are accepted: the positional vector form
//! `[:find ?x :in $ :where [?x :a ?v]]` and the map form
//! `{:find [?x] :where [[?x :a ?v]]}`.

use std::collections::BTreeMap;

use datalith_core::natural_typed_value;
use edn;
use edn::Value;
use edn::symbols::{
    Keyword,
    PlainSymbol,
};

use errors::{
    QueryErrorKind,
    Result,
};
use types::{
    Binding,
    Element,
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
    Rule,
    RuleInvocation,
    Rules,
    SrcVar,
    UnifyVars,
    Variable,
    VariableOrPlaceholder,
    WhereClause,
    WhereFn,
};

fn malformed<T>(what: &str, v: &Value) -> Result<T> {
    Err(QueryErrorKind::MalformedClause(format!("{}: {}", what, v)).into())
}

fn as_variable(v: &Value) -> Option<Variable> {
    v.as_symbol().and_then(Variable::from_symbol)
}

fn expect_variable(v: &Value) -> Result<Variable> {
    match as_variable(v) {
        Some(var) => Ok(var),
        None => malformed("expected variable", v),
    }
}

fn is_placeholder(v: &Value) -> bool {
    v.as_symbol().map(|s| s.name() == "_").unwrap_or(false)
}

/// Parse a query from its text form.
pub fn parse_query(input: &str) -> Result<FindQuery> {
    let form = edn::parse::value(input)?;
    parse_query_value(&form)
}

/// Parse a query from an already-read EDN form.
pub fn parse_query_value(form: &Value) -> Result<FindQuery> {
    let sections = match *form {
        Value::Vector(ref items) => sections_from_vector(items)?,
        Value::Map(ref m) => sections_from_map(m)?,
        ref v => return malformed("expected query vector or map", v),
    };

    let find_section = match sections.get("find") {
        Some(section) if !section.is_empty() => section,
        _ => return Err(QueryErrorKind::ParseFailure("query lacks :find".to_string()).into()),
    };
    let where_section = match sections.get("where") {
        Some(section) => section.clone(),
        None => vec![],
    };

    let find_spec = parse_find_spec(find_section)?;

    let in_bindings = match sections.get("in") {
        Some(section) => {
            section.iter().map(parse_in_binding).collect::<Result<Vec<InBinding>>>()?
        },
        None => vec![InBinding::Source(SrcVar::DefaultSrc)],
    };

    let with = match sections.get("with") {
        Some(section) => section.iter().map(expect_variable).collect::<Result<Vec<Variable>>>()?,
        None => vec![],
    };

    let keys = parse_keys(&sections)?;

    let where_clauses = where_section.iter()
        .map(parse_where_clause)
        .collect::<Result<Vec<WhereClause>>>()?;

    Ok(FindQuery {
        find_spec: find_spec,
        in_bindings: in_bindings,
        with: with,
        where_clauses: where_clauses,
        keys: keys,
    })
}

fn sections_from_vector(items: &[Value]) -> Result<BTreeMap<String, Vec<Value>>> {
    let mut sections: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for item in items {
        if let Some(k) = item.as_keyword() {
            if !k.is_namespaced() {
                current = Some(k.name().to_string());
                sections.entry(k.name().to_string()).or_insert_with(Vec::new);
                continue;
            }
        }
        match current {
            Some(ref section) => sections.get_mut(section).expect("section exists").push(item.clone()),
            None => return malformed("expected a section keyword", item),
        }
    }
    Ok(sections)
}

fn sections_from_map(m: &BTreeMap<Value, Value>) -> Result<BTreeMap<String, Vec<Value>>> {
    let mut sections = BTreeMap::new();
    for (k, v) in m {
        let name = match k.as_keyword() {
            Some(kw) if !kw.is_namespaced() => kw.name().to_string(),
            _ => return malformed("expected a section keyword", k),
        };
        let items = match v.as_vector() {
            Some(items) => items.clone(),
            None => return malformed("expected a section vector", v),
        };
        sections.insert(name, items);
    }
    Ok(sections)
}

fn parse_find_spec(section: &[Value]) -> Result<FindSpec> {
    // `:find ?x .` is a scalar.
    if section.len() == 2 && section[1].as_symbol().map(|s| s.name() == ".").unwrap_or(false) {
        return Ok(FindSpec::FindScalar(Element::Variable(expect_variable(&section[0])?)));
    }

    // A single vector is a collection (`[?x ...]`) or a tuple (`[?x ?y]`).
    if section.len() == 1 {
        if let Some(items) = section[0].as_vector() {
            let is_coll = items.last()
                .and_then(|v| v.as_symbol())
                .map(|s| s.name() == "...")
                .unwrap_or(false);
            if is_coll {
                if items.len() != 2 {
                    return malformed("expected [?var ...]", &section[0]);
                }
                return Ok(FindSpec::FindColl(Element::Variable(expect_variable(&items[0])?)));
            }
            let elements = items.iter()
                .map(|v| expect_variable(v).map(Element::Variable))
                .collect::<Result<Vec<Element>>>()?;
            return Ok(FindSpec::FindTuple(elements));
        }
    }

    let elements = section.iter()
        .map(|v| expect_variable(v).map(Element::Variable))
        .collect::<Result<Vec<Element>>>()?;
    Ok(FindSpec::FindRel(elements))
}

fn parse_in_binding(v: &Value) -> Result<InBinding> {
    match *v {
        Value::PlainSymbol(ref s) if s.name() == "%" => Ok(InBinding::Rules),
        Value::PlainSymbol(ref s) if s.is_src_symbol() => {
            Ok(InBinding::Source(SrcVar::from_symbol(s).expect("src symbol")))
        },
        Value::PlainSymbol(ref s) => {
            match Variable::from_symbol(s) {
                Some(var) => Ok(InBinding::Scalar(var)),
                None => malformed("expected an :in binding", v),
            }
        },
        Value::Vector(ref items) => {
            // `[[?x ?y]]` is a relation; `[?x ...]` a collection; `[?x ?y]`
            // a tuple.
            if items.len() == 1 {
                if let Some(inner) = items[0].as_vector() {
                    let vars = inner.iter().map(expect_variable).collect::<Result<Vec<Variable>>>()?;
                    return Ok(InBinding::Rel(vars));
                }
            }
            let is_coll = items.last()
                .and_then(|x| x.as_symbol())
                .map(|s| s.name() == "...")
                .unwrap_or(false);
            if is_coll {
                if items.len() != 2 {
                    return malformed("expected [?var ...]", v);
                }
                return Ok(InBinding::Coll(expect_variable(&items[0])?));
            }
            let vars = items.iter().map(expect_variable).collect::<Result<Vec<Variable>>>()?;
            Ok(InBinding::Tuple(vars))
        },
        ref v => malformed("expected an :in binding", v),
    }
}

fn parse_keys(sections: &BTreeMap<String, Vec<Value>>) -> Result<Option<Vec<String>>> {
    for key_kind in &["keys", "syms", "strs"] {
        if let Some(section) = sections.get(*key_kind) {
            let keys = section.iter()
                .map(|v| match *v {
                    Value::PlainSymbol(ref s) => Ok(s.name().to_string()),
                    Value::Keyword(ref k) => Ok(k.name().to_string()),
                    Value::Text(ref s) => Ok(s.clone()),
                    ref v => malformed("expected a key name", v),
                })
                .collect::<Result<Vec<String>>>()?;
            return Ok(Some(keys));
        }
    }
    Ok(None)
}

fn parse_fn_arg(v: &Value) -> Result<FnArg> {
    match *v {
        Value::PlainSymbol(ref s) if s.is_src_symbol() => {
            Ok(FnArg::SrcVar(SrcVar::from_symbol(s).expect("src symbol")))
        },
        Value::PlainSymbol(ref s) => {
            match Variable::from_symbol(s) {
                Some(var) => Ok(FnArg::Variable(var)),
                None => malformed("expected a function argument", v),
            }
        },
        ref constant => {
            match natural_typed_value(constant) {
                Some(tv) => Ok(FnArg::Constant(tv)),
                None => malformed("expected a constant function argument", constant),
            }
        },
    }
}

fn parse_non_value_place(v: &Value) -> Result<PatternNonValuePlace> {
    match *v {
        ref v if is_placeholder(v) => Ok(PatternNonValuePlace::Placeholder),
        Value::PlainSymbol(ref s) => {
            match Variable::from_symbol(s) {
                Some(var) => Ok(PatternNonValuePlace::Variable(var)),
                None => malformed("expected variable, entid, or ident", v),
            }
        },
        Value::Integer(e) => Ok(PatternNonValuePlace::Entid(e)),
        Value::Keyword(ref k) => Ok(PatternNonValuePlace::Ident(k.clone())),
        ref v => malformed("expected variable, entid, or ident", v),
    }
}

fn parse_value_place(v: &Value) -> Result<PatternValuePlace> {
    match *v {
        ref v if is_placeholder(v) => Ok(PatternValuePlace::Placeholder),
        Value::PlainSymbol(ref s) => {
            match Variable::from_symbol(s) {
                Some(var) => Ok(PatternValuePlace::Variable(var)),
                None => malformed("expected a value place", v),
            }
        },
        Value::Integer(i) => Ok(PatternValuePlace::EntidOrInteger(i)),
        Value::Keyword(ref k) => Ok(PatternValuePlace::IdentOrKeyword(k.clone())),
        ref constant => {
            match natural_typed_value(constant) {
                Some(tv) => Ok(PatternValuePlace::Constant(tv)),
                None => malformed("expected a value place", constant),
            }
        },
    }
}

fn parse_binding(v: &Value) -> Result<Binding> {
    match *v {
        Value::PlainSymbol(_) => Ok(Binding::BindScalar(expect_variable(v)?)),
        Value::Vector(ref items) => {
            // `[[?x ?y]]` is a relation binding.
            if items.len() == 1 {
                if let Some(inner) = items[0].as_vector() {
                    let places = inner.iter()
                        .map(parse_variable_or_placeholder)
                        .collect::<Result<Vec<VariableOrPlaceholder>>>()?;
                    return Ok(Binding::BindRel(places));
                }
            }
            let is_coll = items.last()
                .and_then(|x| x.as_symbol())
                .map(|s| s.name() == "...")
                .unwrap_or(false);
            if is_coll {
                if items.len() != 2 {
                    return malformed("expected [?var ...]", v);
                }
                return Ok(Binding::BindColl(expect_variable(&items[0])?));
            }
            let places = items.iter()
                .map(parse_variable_or_placeholder)
                .collect::<Result<Vec<VariableOrPlaceholder>>>()?;
            Ok(Binding::BindTuple(places))
        },
        ref v => malformed("expected a binding form", v),
    }
}

fn parse_variable_or_placeholder(v: &Value) -> Result<VariableOrPlaceholder> {
    if is_placeholder(v) {
        Ok(VariableOrPlaceholder::Placeholder)
    } else {
        expect_variable(v).map(VariableOrPlaceholder::Variable)
    }
}

/// Parse `[?x]` (required) or `?x` (free) in an or-join/not-join binding
/// vector.
fn parse_or_join_arg(v: &Value) -> Result<OrJoinArg> {
    match *v {
        Value::Vector(ref items) if items.len() == 1 => {
            Ok(OrJoinArg::Required(expect_variable(&items[0])?))
        },
        ref v => expect_variable(v).map(OrJoinArg::Free),
    }
}

pub fn parse_where_clause(v: &Value) -> Result<WhereClause> {
    match *v {
        Value::Vector(ref items) => parse_vector_clause(v, items),
        Value::List(ref items) => parse_list_clause(v, items),
        ref v => malformed("expected a where clause", v),
    }
}

fn parse_vector_clause(whole: &Value, items: &[Value]) -> Result<WhereClause> {
    if items.is_empty() {
        return malformed("empty clause", whole);
    }

    // `[(pred args)]` and `[(f args) binding]`.
    if let Some(call) = items[0].as_list() {
        if call.is_empty() {
            return malformed("empty call clause", whole);
        }
        let operator = match call[0].as_symbol() {
            Some(s) => s.clone(),
            None => return malformed("expected a function symbol", &call[0]),
        };
        let args = call[1..].iter().map(parse_fn_arg).collect::<Result<Vec<FnArg>>>()?;
        return match items.len() {
            1 => Ok(WhereClause::Pred(Predicate {
                operator: operator,
                args: args,
            })),
            2 => Ok(WhereClause::WhereFn(WhereFn {
                operator: operator,
                args: args,
                binding: parse_binding(&items[1])?,
            })),
            _ => malformed("expected [(f args)] or [(f args) binding]", whole),
        };
    }

    // An optional leading source: `[$src ?e :a ?v]`.
    let (source, rest) = match items[0].as_symbol().and_then(SrcVar::from_symbol) {
        Some(src) => (Some(src), &items[1..]),
        None => (None, items),
    };

    if rest.len() < 2 || rest.len() > 4 {
        return malformed("expected [e a], [e a v], or [e a v tx]", whole);
    }

    Ok(WhereClause::Pattern(Pattern {
        source: source,
        entity: parse_non_value_place(&rest[0])?,
        attribute: parse_non_value_place(&rest[1])?,
        value: match rest.get(2) {
            Some(v) => parse_value_place(v)?,
            None => PatternValuePlace::Placeholder,
        },
        tx: match rest.get(3) {
            Some(v) => parse_non_value_place(v)?,
            None => PatternNonValuePlace::Placeholder,
        },
    }))
}

fn parse_list_clause(whole: &Value, items: &[Value]) -> Result<WhereClause> {
    if items.is_empty() {
        return malformed("empty clause", whole);
    }
    let head = match items[0].as_symbol() {
        Some(s) => s.clone(),
        None => return malformed("expected a clause head symbol", &items[0]),
    };

    // `($src ...)` rebinds the default source for the nested clauses.
    if let Some(src) = SrcVar::from_symbol(&head) {
        let clauses = items[1..].iter()
            .map(parse_where_clause)
            .collect::<Result<Vec<WhereClause>>>()?;
        return Ok(WhereClause::SourceScope(src, clauses));
    }

    match head.name() {
        "or" => {
            let branches = items[1..].iter()
                .map(parse_or_branch)
                .collect::<Result<Vec<OrWhereClause>>>()?;
            Ok(WhereClause::OrJoin(OrJoin {
                unify_vars: UnifyVars::Implicit,
                clauses: branches,
            }))
        },
        "or-join" => {
            let vars = match items.get(1).and_then(|v| v.as_vector()) {
                Some(vars) if !vars.is_empty() => {
                    vars.iter().map(parse_or_join_arg).collect::<Result<Vec<OrJoinArg>>>()?
                },
                _ => return malformed("or-join requires a binding vector", whole),
            };
            let branches = items[2..].iter()
                .map(parse_or_branch)
                .collect::<Result<Vec<OrWhereClause>>>()?;
            Ok(WhereClause::OrJoin(OrJoin {
                unify_vars: UnifyVars::Explicit(vars),
                clauses: branches,
            }))
        },
        "not" => {
            let clauses = items[1..].iter()
                .map(parse_where_clause)
                .collect::<Result<Vec<WhereClause>>>()?;
            Ok(WhereClause::NotJoin(NotJoin {
                unify_vars: UnifyVars::Implicit,
                clauses: clauses,
            }))
        },
        "not-join" => {
            let vars = match items.get(1).and_then(|v| v.as_vector()) {
                Some(vars) if !vars.is_empty() => {
                    vars.iter().map(parse_or_join_arg).collect::<Result<Vec<OrJoinArg>>>()?
                },
                _ => return malformed("not-join requires a binding vector", whole),
            };
            let clauses = items[2..].iter()
                .map(parse_where_clause)
                .collect::<Result<Vec<WhereClause>>>()?;
            Ok(WhereClause::NotJoin(NotJoin {
                unify_vars: UnifyVars::Explicit(vars),
                clauses: clauses,
            }))
        },
        "and" => {
            malformed("'and' is only valid inside 'or'", whole)
        },
        _ => {
            let args = items[1..].iter().map(parse_fn_arg).collect::<Result<Vec<FnArg>>>()?;
            Ok(WhereClause::RuleInvocation(RuleInvocation {
                name: head,
                args: args,
            }))
        },
    }
}

fn parse_or_branch(v: &Value) -> Result<OrWhereClause> {
    if let Some(items) = v.as_list() {
        let is_and = items.first()
            .and_then(|x| x.as_symbol())
            .map(|s| s.name() == "and")
            .unwrap_or(false);
        if is_and {
            let clauses = items[1..].iter()
                .map(parse_where_clause)
                .collect::<Result<Vec<WhereClause>>>()?;
            return Ok(OrWhereClause::And(clauses));
        }
    }
    parse_where_clause(v).map(OrWhereClause::Clause)
}

/// Parse a rules source: `[[(rule-name ?a ?b) clause+] ...]`.
pub fn parse_rules(input: &str) -> Result<Rules> {
    let form = edn::parse::value(input)?;
    parse_rules_value(&form)
}

pub fn parse_rules_value(form: &Value) -> Result<Rules> {
    let defs = match form.as_vector() {
        Some(defs) => defs,
        None => return malformed("expected a vector of rules", form),
    };
    let mut rules = Rules::new();
    for def in defs {
        let parts = match def.as_vector() {
            Some(parts) if parts.len() >= 2 => parts,
            _ => return malformed("expected [(rule-head args) clause+]", def),
        };
        let head = match parts[0].as_list() {
            Some(head) if !head.is_empty() => head,
            _ => return malformed("expected a rule head list", &parts[0]),
        };
        let name = match head[0].as_symbol() {
            Some(s) => s.clone(),
            None => return malformed("expected a rule name", &head[0]),
        };
        let mut args = vec![];
        for arg in &head[1..] {
            // A leading `[?x ?y]` marks required arguments; the variables
            // are treated like the free ones here.
            if let Some(inner) = arg.as_vector() {
                for required in inner {
                    args.push(expect_variable(required)?);
                }
            } else {
                args.push(expect_variable(arg)?);
            }
        }
        let clauses = parts[1..].iter()
            .map(parse_where_clause)
            .collect::<Result<Vec<WhereClause>>>()?;
        rules.entry(name.clone()).or_insert_with(Vec::new).push(Rule {
            name: name,
            args: args,
            clauses: clauses,
        });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable(PlainSymbol::plain(name))
    }

    #[test]
    fn test_positional_form() {
        let q = parse_query("[:find ?e :in $ ?name :where [?e :person/name ?name]]").expect("parsed");
        assert_eq!(FindSpec::FindRel(vec![Element::Variable(var("?e"))]), q.find_spec);
        assert_eq!(vec![InBinding::Source(SrcVar::DefaultSrc), InBinding::Scalar(var("?name"))],
                   q.in_bindings);
        assert_eq!(1, q.where_clauses.len());
        match q.where_clauses[0] {
            WhereClause::Pattern(ref p) => {
                assert_eq!(PatternNonValuePlace::Variable(var("?e")), p.entity);
                assert_eq!(PatternNonValuePlace::Ident(Keyword::namespaced("person", "name")), p.attribute);
                assert_eq!(PatternValuePlace::Variable(var("?name")), p.value);
            },
            ref c => panic!("expected pattern, got {:?}", c),
        }
    }

    #[test]
    fn test_map_form_and_default_in() {
        let q = parse_query("{:find [?e] :where [[?e :person/name \"Ivan\"]]}").expect("parsed");
        assert_eq!(vec![InBinding::Source(SrcVar::DefaultSrc)], q.in_bindings);
        assert_eq!(1, q.where_clauses.len());
    }

    #[test]
    fn test_find_shapes() {
        match parse_query("[:find ?x . :where [?x :a 1]]").expect("parsed").find_spec {
            FindSpec::FindScalar(_) => {},
            s => panic!("expected scalar, got {:?}", s),
        }
        match parse_query("[:find [?x ...] :where [?x :a 1]]").expect("parsed").find_spec {
            FindSpec::FindColl(_) => {},
            s => panic!("expected coll, got {:?}", s),
        }
        match parse_query("[:find [?x ?y] :where [?x :a ?y]]").expect("parsed").find_spec {
            FindSpec::FindTuple(ref es) => assert_eq!(2, es.len()),
            s => panic!("expected tuple, got {:?}", s),
        }
    }

    #[test]
    fn test_or_and_or_join() {
        let q = parse_query(r#"[:find ?e :where (or [?e :name "Oleg"] [?e :age 10])]"#).expect("parsed");
        match q.where_clauses[0] {
            WhereClause::OrJoin(ref o) => {
                assert_eq!(UnifyVars::Implicit, o.unify_vars);
                assert_eq!(2, o.clauses.len());
            },
            ref c => panic!("expected or, got {:?}", c),
        }

        let q = parse_query(r#"[:find ?e :where (or-join [?e [?x]] [?e :a ?x] (and [?e :b ?y] [?y :c ?x]))]"#)
            .expect("parsed");
        match q.where_clauses[0] {
            WhereClause::OrJoin(ref o) => {
                match o.unify_vars {
                    UnifyVars::Explicit(ref args) => {
                        assert_eq!(vec![OrJoinArg::Free(var("?e")), OrJoinArg::Required(var("?x"))],
                                   *args);
                    },
                    ref u => panic!("expected explicit unify vars, got {:?}", u),
                }
                match o.clauses[1] {
                    OrWhereClause::And(ref clauses) => assert_eq!(2, clauses.len()),
                    ref c => panic!("expected and branch, got {:?}", c),
                }
            },
            ref c => panic!("expected or-join, got {:?}", c),
        }
    }

    #[test]
    fn test_predicates_and_functions() {
        let q = parse_query("[:find ?x ?y :where [?e :age ?x] [(< ?x 30)] [(+ ?x 1) ?y]]").expect("parsed");
        match q.where_clauses[1] {
            WhereClause::Pred(ref p) => assert_eq!("<", p.operator.name()),
            ref c => panic!("expected predicate, got {:?}", c),
        }
        match q.where_clauses[2] {
            WhereClause::WhereFn(ref f) => {
                assert_eq!("+", f.operator.name());
                assert_eq!(Binding::BindScalar(var("?y")), f.binding);
            },
            ref c => panic!("expected fn, got {:?}", c),
        }
    }

    #[test]
    fn test_source_scope_and_prefixed_pattern() {
        let q = parse_query("[:find ?e :in $ $2 :where ($2 [?e :a 1] [?e :b 2]) [$2 ?e :c 3]]").expect("parsed");
        match q.where_clauses[0] {
            WhereClause::SourceScope(SrcVar::NamedSrc(ref name), ref clauses) => {
                assert_eq!("$2", name);
                assert_eq!(2, clauses.len());
            },
            ref c => panic!("expected source scope, got {:?}", c),
        }
        match q.where_clauses[1] {
            WhereClause::Pattern(ref p) => {
                assert_eq!(Some(SrcVar::NamedSrc("$2".to_string())), p.source);
            },
            ref c => panic!("expected pattern, got {:?}", c),
        }
    }

    #[test]
    fn test_rules() {
        let rules = parse_rules(r#"[[(ancestor ?a ?b) [?a :parent ?b]]
                                    [(ancestor ?a ?b) [?a :parent ?x] (ancestor ?x ?b)]]"#)
            .expect("parsed");
        let branches = &rules[&PlainSymbol::plain("ancestor")];
        assert_eq!(2, branches.len());
        assert_eq!(vec![var("?a"), var("?b")], branches[0].args);
        match branches[1].clauses[1] {
            WhereClause::RuleInvocation(ref r) => assert_eq!("ancestor", r.name.name()),
            ref c => panic!("expected rule invocation, got {:?}", c),
        }
    }

    #[test]
    fn test_keys() {
        let q = parse_query("[:find ?e ?name :keys id name :where [?e :person/name ?name]]").expect("parsed");
        assert_eq!(Some(vec!["id".to_string(), "name".to_string()]), q.keys);
    }
}

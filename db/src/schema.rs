// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Attribute construction and schema validation.

use std::collections::BTreeMap;

use petgraph::graphmap::DiGraphMap;
use petgraph::algo::is_cyclic_directed;

use datalith_core::{
    Attribute,
    Entid,
    HasSchema,
    Schema,
    Unique,
    ValueType,
};
use edn;
use edn::symbols::Keyword;
use errors::{
    DbErrorKind,
    Result,
};

/// Accumulates assertions about one attribute into an `Attribute`, or a set
/// of mutations to apply to an existing one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeBuilder {
    pub value_type: Option<ValueType>,
    pub multival: Option<bool>,
    pub unique: Option<Option<Unique>>,
    pub index: Option<bool>,
    pub component: Option<bool>,
    pub no_history: Option<bool>,
    pub tuple_attrs: Option<Vec<Entid>>,
    pub tuple_type: Option<ValueType>,
    pub tuple_types: Option<Vec<ValueType>>,
}

/// An alteration to an attribute.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum AttributeAlteration {
    Index,
    Unique,
    Cardinality,
    NoHistory,
    IsComponent,
}

impl AttributeBuilder {
    pub fn value_type(&mut self, value_type: ValueType) -> &mut Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn multival(&mut self, multival: bool) -> &mut Self {
        self.multival = Some(multival);
        self
    }

    pub fn unique(&mut self, unique: Unique) -> &mut Self {
        self.unique = Some(Some(unique));
        self
    }

    pub fn non_unique(&mut self) -> &mut Self {
        self.unique = Some(None);
        self
    }

    pub fn index(&mut self, index: bool) -> &mut Self {
        self.index = Some(index);
        self
    }

    pub fn component(&mut self, component: bool) -> &mut Self {
        self.component = Some(component);
        self
    }

    pub fn no_history(&mut self, no_history: bool) -> &mut Self {
        self.no_history = Some(no_history);
        self
    }

    pub fn tuple_attrs(&mut self, attrs: Vec<Entid>) -> &mut Self {
        self.tuple_attrs = Some(attrs);
        self
    }

    pub fn tuple_type(&mut self, t: ValueType) -> &mut Self {
        self.tuple_type = Some(t);
        self
    }

    pub fn tuple_types(&mut self, ts: Vec<ValueType>) -> &mut Self {
        self.tuple_types = Some(ts);
        self
    }

    /// A fresh install must declare a value type.
    pub fn is_valid_install_attribute(&self) -> bool {
        self.value_type.is_some()
    }

    /// An alteration must not re-declare the value type.
    pub fn is_valid_alter_attribute(&self) -> bool {
        self.value_type.is_none()
    }

    pub fn build(&self) -> Attribute {
        let mut attribute = Attribute::default();
        attribute.value_type = self.value_type;
        if let Some(multival) = self.multival {
            attribute.multival = multival;
        }
        if let Some(ref unique) = self.unique {
            attribute.unique = unique.clone();
        }
        if let Some(index) = self.index {
            attribute.index = index;
        }
        if let Some(component) = self.component {
            attribute.component = component;
        }
        if let Some(no_history) = self.no_history {
            attribute.no_history = no_history;
        }
        attribute.tuple_attrs = self.tuple_attrs.clone();
        attribute.tuple_type = self.tuple_type;
        attribute.tuple_types = self.tuple_types.clone();
        attribute
    }

    pub fn mutate(&self, attribute: &mut Attribute) -> Vec<AttributeAlteration> {
        let mut mutations = vec![];
        if let Some(multival) = self.multival {
            if multival != attribute.multival {
                attribute.multival = multival;
                mutations.push(AttributeAlteration::Cardinality);
            }
        }
        if let Some(ref unique) = self.unique {
            if *unique != attribute.unique {
                attribute.unique = unique.clone();
                mutations.push(AttributeAlteration::Unique);
            }
        }
        if let Some(index) = self.index {
            if index != attribute.index {
                attribute.index = index;
                mutations.push(AttributeAlteration::Index);
            }
        }
        if let Some(component) = self.component {
            if component != attribute.component {
                attribute.component = component;
                mutations.push(AttributeAlteration::IsComponent);
            }
        }
        if let Some(no_history) = self.no_history {
            if no_history != attribute.no_history {
                attribute.no_history = no_history;
                mutations.push(AttributeAlteration::NoHistory);
            }
        }
        mutations
    }
}

/// Check the schema invariants for one attribute.
///
/// Tuple attributes carry the heaviest rules: a composite tuple names a
/// non-empty ordered set of cardinality-one source attributes, none of which
/// may itself be a tuple attribute; a `:db.type/tuple` attribute must carry
/// exactly one of `tupleAttrs`, `tupleType`, `tupleTypes`.
pub fn validate_attribute(schema: &Schema, ident: &Keyword, attribute: &Attribute) -> Result<()> {
    let shapes = [attribute.tuple_attrs.is_some(),
                  attribute.tuple_type.is_some(),
                  attribute.tuple_types.is_some()];
    let shape_count = shapes.iter().filter(|&&x| x).count();

    match attribute.value_type {
        Some(ValueType::Tuple) => {
            if shape_count != 1 {
                bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "{} has :db.type/tuple and must declare exactly one of :db/tupleAttrs, :db/tupleType, :db/tupleTypes", ident)));
            }
        },
        Some(_) => {
            if shape_count != 0 {
                bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "{} declares tuple metadata but is not :db.type/tuple", ident)));
            }
        },
        None => {
            bail!(DbErrorKind::BadSchemaAssertion(format!("{} does not declare :db/valueType", ident)));
        },
    }

    if let Some(ref sources) = attribute.tuple_attrs {
        if sources.is_empty() {
            bail!(DbErrorKind::BadSchemaAssertion(format!("{} has empty :db/tupleAttrs", ident)));
        }
        if attribute.multival {
            bail!(DbErrorKind::BadSchemaAssertion(format!(
                "tuple attribute {} must be :db.cardinality/one", ident)));
        }
        for &source in sources {
            let source_attribute = match schema.attribute_for_entid(source) {
                Some(a) => a,
                None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "{} has unknown tuple source attribute {}", ident, source))),
            };
            if source_attribute.multival {
                bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "tuple source attribute {} of {} must be :db.cardinality/one", source, ident)));
            }
            if source_attribute.is_composite_tuple() {
                bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "tuple source attribute {} of {} may not itself be a tuple attribute", source, ident)));
            }
        }
    }

    if let Some(ref component_types) = attribute.tuple_types {
        if component_types.is_empty() {
            bail!(DbErrorKind::BadSchemaAssertion(format!("{} has empty :db/tupleTypes", ident)));
        }
    }

    Ok(())
}

/// Reject tuple-attribute dependency cycles across the whole schema. With
/// per-attribute validation this cannot normally arise, but schema
/// alteration applies attribute-by-attribute and the combined result must
/// still be a DAG.
pub fn validate_tuple_dependencies(schema: &Schema) -> Result<()> {
    let mut graph: DiGraphMap<Entid, ()> = DiGraphMap::new();
    for (&tuple_attr, attribute) in &schema.attribute_map {
        if let Some(ref sources) = attribute.tuple_attrs {
            for &source in sources {
                graph.add_edge(source, tuple_attr, ());
            }
        }
    }
    if is_cyclic_directed(&graph) {
        bail!(DbErrorKind::BadSchemaAssertion(
            "cycle in tuple attribute dependencies".to_string()));
    }
    Ok(())
}

/// Serialize an attribute for the `schema` dbi.
pub fn attribute_to_edn(entid: Entid, attribute: &Attribute) -> edn::Value {
    let mut m: BTreeMap<edn::Value, edn::Value> = BTreeMap::new();
    let kw = |ns: &str, n: &str| edn::Value::Keyword(Keyword::namespaced(ns, n));
    m.insert(kw("db", "id"), edn::Value::Integer(entid));
    if let Some(value_type) = attribute.value_type {
        m.insert(kw("db", "valueType"), edn::Value::Keyword(value_type.into_keyword()));
    }
    m.insert(kw("db", "cardinality"),
             kw("db.cardinality", if attribute.multival { "many" } else { "one" }));
    if let Some(ref unique) = attribute.unique {
        m.insert(kw("db", "unique"),
                 kw("db.unique", match unique {
                     &Unique::Value => "value",
                     &Unique::Identity => "identity",
                 }));
    }
    if attribute.index {
        m.insert(kw("db", "index"), edn::Value::Boolean(true));
    }
    if attribute.component {
        m.insert(kw("db", "isComponent"), edn::Value::Boolean(true));
    }
    if attribute.no_history {
        m.insert(kw("db", "noHistory"), edn::Value::Boolean(true));
    }
    if let Some(ref sources) = attribute.tuple_attrs {
        m.insert(kw("db", "tupleAttrs"),
                 edn::Value::Vector(sources.iter().map(|&e| edn::Value::Integer(e)).collect()));
    }
    if let Some(t) = attribute.tuple_type {
        m.insert(kw("db", "tupleType"), edn::Value::Keyword(t.into_keyword()));
    }
    if let Some(ref ts) = attribute.tuple_types {
        m.insert(kw("db", "tupleTypes"),
                 edn::Value::Vector(ts.iter().map(|t| edn::Value::Keyword(t.into_keyword())).collect()));
    }
    edn::Value::Map(m)
}

/// The inverse of `attribute_to_edn`.
pub fn attribute_from_edn(value: &edn::Value) -> Result<(Entid, Attribute)> {
    let m = match value.as_map() {
        Some(m) => m,
        None => bail!(DbErrorKind::CorruptValue(format!("expected attribute map, got {}", value))),
    };
    let kw = |ns: &str, n: &str| edn::Value::Keyword(Keyword::namespaced(ns, n));

    let entid = match m.get(&kw("db", "id")).and_then(|v| v.as_integer()) {
        Some(e) => e,
        None => bail!(DbErrorKind::CorruptValue("attribute map without :db/id".to_string())),
    };

    let mut attribute = Attribute::default();
    if let Some(t) = m.get(&kw("db", "valueType")).and_then(|v| v.as_keyword()) {
        attribute.value_type = ValueType::from_keyword(t);
    }
    attribute.multival = m.get(&kw("db", "cardinality")) == Some(&kw("db.cardinality", "many"));
    attribute.unique = match m.get(&kw("db", "unique")) {
        Some(u) if u == &kw("db.unique", "value") => Some(Unique::Value),
        Some(u) if u == &kw("db.unique", "identity") => Some(Unique::Identity),
        _ => None,
    };
    attribute.index = m.get(&kw("db", "index")) == Some(&edn::Value::Boolean(true));
    attribute.component = m.get(&kw("db", "isComponent")) == Some(&edn::Value::Boolean(true));
    attribute.no_history = m.get(&kw("db", "noHistory")) == Some(&edn::Value::Boolean(true));
    if let Some(sources) = m.get(&kw("db", "tupleAttrs")).and_then(|v| v.as_vector()) {
        let entids: Option<Vec<Entid>> = sources.iter().map(|v| v.as_integer()).collect();
        attribute.tuple_attrs = entids;
    }
    if let Some(t) = m.get(&kw("db", "tupleType")).and_then(|v| v.as_keyword()) {
        attribute.tuple_type = ValueType::from_keyword(t);
    }
    if let Some(ts) = m.get(&kw("db", "tupleTypes")).and_then(|v| v.as_vector()) {
        let types: Option<Vec<ValueType>> = ts.iter()
            .map(|v| v.as_keyword().and_then(ValueType::from_keyword))
            .collect();
        attribute.tuple_types = types;
    }

    Ok((entid, attribute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edn::parse;

    #[test]
    fn test_attribute_edn_round_trip() {
        let mut attribute = Attribute::default();
        attribute.value_type = Some(ValueType::Tuple);
        attribute.tuple_attrs = Some(vec![100, 101]);
        attribute.unique = Some(Unique::Identity);
        let rendered = attribute_to_edn(102, &attribute).to_string();
        let parsed = parse::value(&rendered).expect("parsed");
        let (entid, decoded) = attribute_from_edn(&parsed).expect("decoded");
        assert_eq!(102, entid);
        assert_eq!(attribute, decoded);
    }

    #[test]
    fn test_tuple_attr_validation() {
        let mut schema = Schema::default();
        schema.attribute_map.insert(100, Attribute {
            value_type: Some(ValueType::String),
            ..Default::default()
        });
        schema.attribute_map.insert(101, Attribute {
            value_type: Some(ValueType::String),
            multival: true,
            ..Default::default()
        });

        let ident = Keyword::namespaced("test", "a+b");

        // Good: cardinality-one source.
        let good = Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![100]),
            ..Default::default()
        };
        validate_attribute(&schema, &ident, &good).expect("valid");

        // Bad: cardinality-many source.
        let bad = Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![101]),
            ..Default::default()
        };
        assert!(validate_attribute(&schema, &ident, &bad).is_err());

        // Bad: empty sources.
        let bad = Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![]),
            ..Default::default()
        };
        assert!(validate_attribute(&schema, &ident, &bad).is_err());

        // Bad: tuple type without any tuple shape.
        let bad = Attribute {
            value_type: Some(ValueType::Tuple),
            ..Default::default()
        };
        assert!(validate_attribute(&schema, &ident, &bad).is_err());

        // Bad: two tuple shapes at once.
        let bad = Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![100]),
            tuple_type: Some(ValueType::String),
            ..Default::default()
        };
        assert!(validate_attribute(&schema, &ident, &bad).is_err());
    }

    #[test]
    fn test_cycle_detection() {
        let mut schema = Schema::default();
        schema.attribute_map.insert(100, Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![101]),
            ..Default::default()
        });
        schema.attribute_map.insert(101, Attribute {
            value_type: Some(ValueType::Tuple),
            tuple_attrs: Some(vec![100]),
            ..Default::default()
        });
        assert!(validate_tuple_dependencies(&schema).is_err());
    }
}

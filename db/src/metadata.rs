// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Transactions can mutate the store's metadata by transacting assertions:
//!
//! - they can add recognized idents using the `:db/ident` attribute;
//!
//! - they can add and alter schema attributes using the various `:db/*`
//!   attributes (`:db/valueType`, `:db/cardinality`, `:db/unique`,
//!   `:db/index`, `:db/isComponent`, `:db/noHistory`, `:db/tupleAttrs`,
//!   `:db/tupleType`, `:db/tupleTypes`).
//!
//! This module recognizes, validates, applies, and reports on these
//! mutations.

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::collections::btree_map::Entry;

use datalith_core::{
    Entid,
    HasSchema,
    Keyword,
    Schema,
    TypedValue,
    Unique,
    ValueType,
};
use entids;
use errors::{
    DbErrorKind,
    Result,
};
use schema::{
    AttributeAlteration,
    AttributeBuilder,
    validate_attribute,
    validate_tuple_dependencies,
};

/// Summarizes changes to metadata such as a `Schema`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetadataReport {
    /// Entids that were not present in the original schema.
    pub attributes_installed: BTreeSet<Entid>,

    /// Entids that were present in the original schema, together with a
    /// representation of the mutations that were applied.
    pub attributes_altered: BTreeMap<Entid, Vec<AttributeAlteration>>,

    /// Idents that were installed.
    pub idents_installed: BTreeMap<Entid, Keyword>,
}

impl MetadataReport {
    pub fn is_empty(&self) -> bool {
        self.attributes_installed.is_empty()
            && self.attributes_altered.is_empty()
            && self.idents_installed.is_empty()
    }
}

fn value_type_for_ref(schema_entity: Entid) -> Option<ValueType> {
    match schema_entity {
        entids::DB_TYPE_REF => Some(ValueType::Ref),
        entids::DB_TYPE_BOOLEAN => Some(ValueType::Boolean),
        entids::DB_TYPE_LONG => Some(ValueType::Long),
        entids::DB_TYPE_DOUBLE => Some(ValueType::Double),
        entids::DB_TYPE_INSTANT => Some(ValueType::Instant),
        entids::DB_TYPE_STRING => Some(ValueType::String),
        entids::DB_TYPE_KEYWORD => Some(ValueType::Keyword),
        entids::DB_TYPE_SYMBOL => Some(ValueType::Symbol),
        entids::DB_TYPE_UUID => Some(ValueType::Uuid),
        entids::DB_TYPE_BYTES => Some(ValueType::Bytes),
        entids::DB_TYPE_TUPLE => Some(ValueType::Tuple),
        _ => None,
    }
}

/// Update a `Schema` in place from the given `[e a typed_value]` triples.
///
/// Returns a report summarizing the mutations that were applied.
pub fn update_schema_from_entid_triples<U>(schema: &mut Schema, assertions: U) -> Result<MetadataReport>
    where U: IntoIterator<Item = (Entid, Entid, TypedValue)> {

    // Group mutations by impacted entid.
    let mut builders: BTreeMap<Entid, AttributeBuilder> = BTreeMap::new();
    let mut idents: BTreeMap<Entid, Keyword> = BTreeMap::new();

    for (entid, attr, ref value) in assertions.into_iter() {
        let builder = builders.entry(entid).or_insert_with(AttributeBuilder::default);

        match attr {
            entids::DB_IDENT => {
                match *value {
                    TypedValue::Keyword(ref ident) => {
                        idents.insert(entid, ident.clone());
                    },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/ident :some/ident] but got [... :db/ident {:?}] for entid '{}'", value, entid))),
                }
            },

            entids::DB_DOC => {
                match *value {
                    TypedValue::String(_) => {},
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/doc \"string value\"] but got [... :db/doc {:?}] for entid '{}'", value, entid))),
                }
            },

            entids::DB_VALUE_TYPE => {
                match *value {
                    TypedValue::Ref(type_entity) => {
                        match value_type_for_ref(type_entity) {
                            Some(value_type) => {
                                builder.value_type(value_type);
                            },
                            None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                                "expected [... :db/valueType :db.type/*] but got [... :db/valueType {}] for entid '{}'", type_entity, entid))),
                        }
                    },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/valueType :db.type/*] but got [... :db/valueType {:?}] for entid '{}'", value, entid))),
                }
            },

            entids::DB_CARDINALITY => {
                match *value {
                    TypedValue::Ref(entids::DB_CARDINALITY_MANY) => { builder.multival(true); },
                    TypedValue::Ref(entids::DB_CARDINALITY_ONE) => { builder.multival(false); },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/cardinality :db.cardinality/many|:db.cardinality/one] but got [... :db/cardinality {:?}]", value))),
                }
            },

            entids::DB_UNIQUE => {
                match *value {
                    TypedValue::Ref(entids::DB_UNIQUE_VALUE) => { builder.unique(Unique::Value); },
                    TypedValue::Ref(entids::DB_UNIQUE_IDENTITY) => { builder.unique(Unique::Identity); },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/unique :db.unique/value|:db.unique/identity] but got [... :db/unique {:?}]", value))),
                }
            },

            entids::DB_INDEX => {
                match *value {
                    TypedValue::Boolean(x) => { builder.index(x); },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/index true|false] but got [... :db/index {:?}]", value))),
                }
            },

            entids::DB_IS_COMPONENT => {
                match *value {
                    TypedValue::Boolean(x) => { builder.component(x); },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/isComponent true|false] but got [... :db/isComponent {:?}]", value))),
                }
            },

            entids::DB_NO_HISTORY => {
                match *value {
                    TypedValue::Boolean(x) => { builder.no_history(x); },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/noHistory true|false] but got [... :db/noHistory {:?}]", value))),
                }
            },

            entids::DB_TUPLE_ATTRS => {
                match *value {
                    TypedValue::Tuple(ref components) => {
                        let sources: Option<Vec<Entid>> = components.iter()
                            .map(|component| component.as_ref().and_then(|v| v.as_entid()))
                            .collect();
                        match sources {
                            Some(sources) => {
                                builder.tuple_attrs(sources);
                            },
                            None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                                "expected [... :db/tupleAttrs [a1 a2 ...]] with attribute refs but got {:?}", value))),
                        }
                    },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/tupleAttrs [a1 a2 ...]] but got [... :db/tupleAttrs {:?}]", value))),
                }
            },

            entids::DB_TUPLE_TYPE => {
                match *value {
                    TypedValue::Ref(type_entity) => {
                        match value_type_for_ref(type_entity) {
                            Some(value_type) => {
                                builder.tuple_type(value_type);
                            },
                            None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                                "expected [... :db/tupleType :db.type/*] but got {}", type_entity))),
                        }
                    },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/tupleType :db.type/*] but got [... :db/tupleType {:?}]", value))),
                }
            },

            entids::DB_TUPLE_TYPES => {
                match *value {
                    TypedValue::Tuple(ref components) => {
                        let types: Option<Vec<ValueType>> = components.iter()
                            .map(|component| {
                                component.as_ref()
                                         .and_then(|v| v.as_entid())
                                         .and_then(value_type_for_ref)
                            })
                            .collect();
                        match types {
                            Some(types) => {
                                builder.tuple_types(types);
                            },
                            None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                                "expected [... :db/tupleTypes [:db.type/* ...]] but got {:?}", value))),
                        }
                    },
                    _ => bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "expected [... :db/tupleTypes [:db.type/* ...]] but got [... :db/tupleTypes {:?}]", value))),
                }
            },

            _ => {
                bail!(DbErrorKind::BadSchemaAssertion(format!(
                    "do not recognize attribute '{}' for entid '{}'", attr, entid)))
            },
        }
    }

    let mut report = MetadataReport::default();

    // Install idents first: an attribute is only addressable through one.
    for (entid, ident) in idents {
        if let Some(existing) = schema.entid_map.get(&entid) {
            if existing != &ident {
                bail!(DbErrorKind::NotYetImplemented(format!(
                    "renaming ident {} to {} is not supported", existing, ident)));
            }
            continue;
        }
        if schema.ident_map.contains_key(&ident) {
            bail!(DbErrorKind::BadSchemaAssertion(format!(
                "ident {} is already bound to entid {}", ident, schema.ident_map[&ident])));
        }
        schema.ident_map.insert(ident.clone(), entid);
        schema.entid_map.insert(entid, ident.clone());
        report.idents_installed.insert(entid, ident);
    }

    for (entid, builder) in builders.into_iter() {
        if builder == AttributeBuilder::default() {
            // An ident-only (or doc-only) assertion.
            continue;
        }
        let ident = match schema.get_ident(entid) {
            Some(ident) => ident.clone(),
            None => bail!(DbErrorKind::BadSchemaAssertion(format!(
                "schema attribute entid '{}' has no :db/ident", entid))),
        };

        match schema.attribute_map.entry(entid) {
            Entry::Vacant(entry) => {
                if !builder.is_valid_install_attribute() {
                    bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "schema attribute for new attribute {} does not set :db/valueType", ident)));
                }
                entry.insert(builder.build());
                report.attributes_installed.insert(entid);
            },
            Entry::Occupied(mut entry) => {
                if !builder.is_valid_alter_attribute() {
                    bail!(DbErrorKind::BadSchemaAssertion(format!(
                        "schema alteration for existing attribute {} must not set :db/valueType", ident)));
                }
                let mutations = builder.mutate(entry.get_mut());
                report.attributes_altered.insert(entid, mutations);
            },
        }
    }

    // Validate the combined result and refresh the reverse schema.
    for &entid in report.attributes_installed.iter().chain(report.attributes_altered.keys()) {
        let ident = schema.get_ident(entid).cloned().expect("attribute ident installed above");
        let attribute = schema.attribute_map[&entid].clone();
        validate_attribute(schema, &ident, &attribute)?;
    }
    validate_tuple_dependencies(schema)?;
    schema.rebuild_reverse_schema();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use datalith_core::Attribute;

    fn schema_with_idents() -> Schema {
        let mut schema = Schema::default();
        for (entid, ns, name) in &[(100 as Entid, "test", "name"), (101, "test", "age")] {
            let ident = Keyword::namespaced(*ns, *name);
            schema.ident_map.insert(ident.clone(), *entid);
            schema.entid_map.insert(*entid, ident);
        }
        schema
    }

    #[test]
    fn test_install_attribute() {
        let mut schema = schema_with_idents();
        let report = update_schema_from_entid_triples(&mut schema, vec![
            (100, entids::DB_VALUE_TYPE, TypedValue::Ref(entids::DB_TYPE_STRING)),
            (100, entids::DB_UNIQUE, TypedValue::Ref(entids::DB_UNIQUE_IDENTITY)),
        ]).expect("updated");
        assert!(report.attributes_installed.contains(&100));
        let attribute = schema.attribute_for_entid(100).expect("attribute");
        assert_eq!(Some(ValueType::String), attribute.value_type);
        assert_eq!(Some(Unique::Identity), attribute.unique);
        assert!(schema.rschema.unique_attributes.contains(&100));
    }

    #[test]
    fn test_install_without_value_type_fails() {
        let mut schema = schema_with_idents();
        let result = update_schema_from_entid_triples(&mut schema, vec![
            (100, entids::DB_INDEX, TypedValue::Boolean(true)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_alter_cardinality() {
        let mut schema = schema_with_idents();
        schema.attribute_map.insert(100, Attribute {
            value_type: Some(ValueType::String),
            ..Default::default()
        });
        let report = update_schema_from_entid_triples(&mut schema, vec![
            (100, entids::DB_CARDINALITY, TypedValue::Ref(entids::DB_CARDINALITY_MANY)),
        ]).expect("updated");
        assert_eq!(vec![AttributeAlteration::Cardinality],
                   report.attributes_altered[&100]);
        assert!(schema.cardinality_many(100));
    }

    #[test]
    fn test_install_tuple_attribute() {
        let mut schema = schema_with_idents();
        schema.attribute_map.insert(100, Attribute {
            value_type: Some(ValueType::String),
            ..Default::default()
        });
        schema.attribute_map.insert(101, Attribute {
            value_type: Some(ValueType::Long),
            ..Default::default()
        });
        let tuple_ident = Keyword::namespaced("test", "name+age");
        schema.ident_map.insert(tuple_ident.clone(), 102);
        schema.entid_map.insert(102, tuple_ident);

        update_schema_from_entid_triples(&mut schema, vec![
            (102, entids::DB_VALUE_TYPE, TypedValue::Ref(entids::DB_TYPE_TUPLE)),
            (102, entids::DB_TUPLE_ATTRS, TypedValue::Tuple(vec![
                Some(TypedValue::Ref(100)),
                Some(TypedValue::Ref(101)),
            ])),
        ]).expect("updated");

        assert_eq!(Some(&0), schema.tuple_attrs_of(100).expect("positions").get(&102));
        assert_eq!(Some(&1), schema.tuple_attrs_of(101).expect("positions").get(&102));
    }
}

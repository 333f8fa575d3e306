// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Thing snapshots: entities, relations and attributes

use std::fmt;

use super::remote_thing::RemoteThing;
use super::types::{AttributeType, EntityType, RelationType, Type, TypeConcept};
use super::value::Value;
use crate::error::{Error, Result};
use crate::protocol::request::hex;
use crate::protocol::{ConceptRecord, ThingRecord};
use crate::transaction::Transaction;

/// Opaque server-assigned instance identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Iid(Vec<u8>);

impl Iid {
    pub fn new(bytes: Vec<u8>) -> Self {
        Iid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Iid {
    fn from(bytes: Vec<u8>) -> Self {
        Iid(bytes)
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    iid: Iid,
    entity_type: EntityType,
    inferred: bool,
}

impl Entity {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    iid: Iid,
    relation_type: RelationType,
    inferred: bool,
}

impl Relation {
    pub fn relation_type(&self) -> &RelationType {
        &self.relation_type
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    iid: Iid,
    attribute_type: AttributeType,
    value: Value,
    inferred: bool,
}

impl Attribute {
    pub fn attribute_type(&self) -> &AttributeType {
        &self.attribute_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Behaviour shared by every thing snapshot
pub trait ThingConcept: Clone + fmt::Debug + Send + Sync + 'static {
    fn iid(&self) -> &Iid;

    /// Whether the thing was produced by reasoning rather than stored
    fn is_inferred(&self) -> bool;

    fn type_of(&self) -> Type;

    fn from_thing(thing: Thing) -> Result<Self>;

    fn into_thing(self) -> Thing;

    /// Bind this snapshot to `transaction` for live operations
    fn as_remote(&self, transaction: &Transaction) -> RemoteThing<Self> {
        RemoteThing::new(transaction.clone(), self.clone())
    }
}

macro_rules! thing_concept {
    ($name:ident, $field:ident) => {
        impl ThingConcept for $name {
            fn iid(&self) -> &Iid {
                &self.iid
            }

            fn is_inferred(&self) -> bool {
                self.inferred
            }

            fn type_of(&self) -> Type {
                self.$field.clone().into_type()
            }

            fn from_thing(thing: Thing) -> Result<Self> {
                match thing {
                    Thing::$name(inner) => Ok(inner),
                    other => Err(Error::Protocol(format!(
                        "expected {} but {} is an instance of {}",
                        stringify!($name).to_lowercase(),
                        other.iid(),
                        other.type_of()
                    ))),
                }
            }

            fn into_thing(self) -> Thing {
                Thing::$name(self)
            }
        }
    };
}

thing_concept!(Entity, entity_type);
thing_concept!(Relation, relation_type);
thing_concept!(Attribute, attribute_type);

/// Any thing snapshot, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum Thing {
    Entity(Entity),
    Relation(Relation),
    Attribute(Attribute),
}

impl Thing {
    /// Decode a thing record; its embedded type decides the variant
    pub fn decode(record: &ThingRecord) -> Result<Thing> {
        let iid = Iid::new(record.iid.clone());
        let inferred = record.inferred;

        match Type::decode(&record.thing_type)? {
            Type::Entity(entity_type) => Ok(Thing::Entity(Entity {
                iid,
                entity_type,
                inferred,
            })),
            Type::Relation(relation_type) => Ok(Thing::Relation(Relation {
                iid,
                relation_type,
                inferred,
            })),
            Type::Attribute(attribute_type) => {
                let value = match &record.value {
                    Some(value) => Value::decode(value)?,
                    None => {
                        return Err(Error::Protocol(format!(
                            "attribute {} carries no value",
                            iid
                        )))
                    }
                };
                if value.value_type() != attribute_type.value_type() {
                    return Err(Error::Protocol(format!(
                        "attribute {} of type '{}' holds a {} value, expected {}",
                        iid,
                        attribute_type.label(),
                        value.value_type(),
                        attribute_type.value_type()
                    )));
                }
                Ok(Thing::Attribute(Attribute {
                    iid,
                    attribute_type,
                    value,
                    inferred,
                }))
            }
            other => Err(Error::Protocol(format!(
                "thing {} has non-instantiable type {}",
                iid, other
            ))),
        }
    }

    pub fn iid(&self) -> &Iid {
        match self {
            Thing::Entity(t) => &t.iid,
            Thing::Relation(t) => &t.iid,
            Thing::Attribute(t) => &t.iid,
        }
    }

    pub fn type_of(&self) -> Type {
        match self {
            Thing::Entity(t) => t.type_of(),
            Thing::Relation(t) => t.type_of(),
            Thing::Attribute(t) => t.type_of(),
        }
    }

    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Thing::Attribute(a) => Some(a),
            _ => None,
        }
    }
}

impl ThingConcept for Thing {
    fn iid(&self) -> &Iid {
        Thing::iid(self)
    }

    fn is_inferred(&self) -> bool {
        match self {
            Thing::Entity(t) => t.inferred,
            Thing::Relation(t) => t.inferred,
            Thing::Attribute(t) => t.inferred,
        }
    }

    fn type_of(&self) -> Type {
        Thing::type_of(self)
    }

    fn from_thing(thing: Thing) -> Result<Self> {
        Ok(thing)
    }

    fn into_thing(self) -> Thing {
        self
    }
}

impl fmt::Display for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thing::Attribute(a) => write!(f, "{}:{}", a.attribute_type.label(), a.value),
            other => write!(f, "{}:{}", other.type_of().label(), other.iid()),
        }
    }
}

/// Either a type or a thing, as bound in query answers
#[derive(Debug, Clone, PartialEq)]
pub enum Concept {
    Type(Type),
    Thing(Thing),
}

impl Concept {
    pub fn decode(record: &ConceptRecord) -> Result<Concept> {
        match record {
            ConceptRecord::Type(record) => Type::decode(record).map(Concept::Type),
            ConceptRecord::Thing(record) => Thing::decode(record).map(Concept::Thing),
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            Concept::Type(t) => Some(t),
            Concept::Thing(_) => None,
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Concept::Thing(t) => Some(t),
            Concept::Type(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encoding, value_type, TypeRecord, ValueRecord};

    fn type_record(label: &str, encoding: i32, value_type: i32) -> TypeRecord {
        TypeRecord {
            label: label.to_string(),
            scope: None,
            encoding,
            is_root: false,
            is_abstract: false,
            value_type,
        }
    }

    #[test]
    fn test_entity_record_decodes_to_entity() {
        let record = ThingRecord {
            iid: vec![1, 2],
            thing_type: type_record("person", encoding::ENTITY_TYPE, value_type::OBJECT),
            value: None,
            inferred: false,
        };
        let thing = Thing::decode(&record).unwrap();
        assert!(matches!(thing, Thing::Entity(_)));
        assert_eq!(thing.iid().to_string(), "0x0102");
    }

    #[test]
    fn test_attribute_value_must_match_its_type() {
        let mut record = ThingRecord {
            iid: vec![9],
            thing_type: type_record("age", encoding::ATTRIBUTE_TYPE, value_type::LONG),
            value: Some(ValueRecord::Long(42)),
            inferred: true,
        };
        let thing = Thing::decode(&record).unwrap();
        assert_eq!(thing.as_attribute().unwrap().value(), &Value::Long(42));
        assert!(thing.is_inferred());

        record.value = Some(ValueRecord::String("forty-two".to_string()));
        assert!(matches!(Thing::decode(&record), Err(Error::Protocol(_))));

        record.value = None;
        assert!(matches!(Thing::decode(&record), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_role_type_cannot_have_instances() {
        let mut role = type_record("employee", encoding::ROLE_TYPE, value_type::OBJECT);
        role.scope = Some("employment".to_string());
        let record = ThingRecord {
            iid: vec![3],
            thing_type: role,
            value: None,
            inferred: false,
        };
        assert!(Thing::decode(&record).is_err());
    }

    #[test]
    fn test_narrowing_thing_kinds() {
        let record = ThingRecord {
            iid: vec![4],
            thing_type: type_record("employment", encoding::RELATION_TYPE, value_type::OBJECT),
            value: None,
            inferred: false,
        };
        let thing = Thing::decode(&record).unwrap();
        assert!(Entity::from_thing(thing.clone()).is_err());
        let relation = Relation::from_thing(thing).unwrap();
        assert_eq!(relation.relation_type().label().name(), "employment");
    }
}

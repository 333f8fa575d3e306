// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Type snapshots
//!
//! Immutable values decoded from [`TypeRecord`]s. Two decodes of the same
//! label are equal but independent values; nothing here is cached or
//! tracked, the server's transaction snapshot stays the source of truth.

use std::fmt;

use super::label::Label;
use super::remote::RemoteType;
use super::value::ValueType;
use crate::error::{Error, Result};
use crate::protocol::{encoding, value_type, TypeRecord};
use crate::transaction::Transaction;

/// Kind discriminant of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Thing,
    Entity,
    Relation,
    Attribute,
    Role,
}

impl TypeKind {
    pub fn from_encoding(code: i32) -> Result<Self> {
        match code {
            encoding::THING_TYPE => Ok(TypeKind::Thing),
            encoding::ENTITY_TYPE => Ok(TypeKind::Entity),
            encoding::RELATION_TYPE => Ok(TypeKind::Relation),
            encoding::ATTRIBUTE_TYPE => Ok(TypeKind::Attribute),
            encoding::ROLE_TYPE => Ok(TypeKind::Role),
            other => Err(Error::Protocol(format!("unrecognised type encoding {}", other))),
        }
    }

    pub fn encoding(&self) -> i32 {
        match self {
            TypeKind::Thing => encoding::THING_TYPE,
            TypeKind::Entity => encoding::ENTITY_TYPE,
            TypeKind::Relation => encoding::RELATION_TYPE,
            TypeKind::Attribute => encoding::ATTRIBUTE_TYPE,
            TypeKind::Role => encoding::ROLE_TYPE,
        }
    }

    /// Label of the root type of this kind
    pub fn root_label(&self) -> Label {
        match self {
            TypeKind::Thing => Label::new("thing"),
            TypeKind::Entity => Label::new("entity"),
            TypeKind::Relation => Label::new("relation"),
            TypeKind::Attribute => Label::new("attribute"),
            TypeKind::Role => Label::scoped("relation", "role"),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Thing => "thing type",
            TypeKind::Entity => "entity type",
            TypeKind::Relation => "relation type",
            TypeKind::Attribute => "attribute type",
            TypeKind::Role => "role type",
        };
        write!(f, "{}", name)
    }
}

/// Behaviour shared by every type snapshot
pub trait TypeConcept: Clone + fmt::Debug + Send + Sync + 'static {
    fn label(&self) -> &Label;

    fn kind(&self) -> TypeKind;

    fn is_root(&self) -> bool;

    fn is_abstract(&self) -> bool;

    /// Narrow a decoded type to this snapshot kind
    fn from_type(ty: Type) -> Result<Self>;

    fn into_type(self) -> Type;

    /// Same snapshot under another name (scope is kept)
    fn relabelled(&self, name: &str) -> Self;

    fn to_record(&self) -> TypeRecord {
        self.clone().into_type().to_record()
    }

    /// Bind this snapshot to `transaction` for live operations
    fn as_remote(&self, transaction: &Transaction) -> RemoteType<Self> {
        RemoteType::new(transaction.clone(), self.clone())
    }
}

/// Types that can have instances: everything but role types
pub trait ThingTypeConcept: TypeConcept {}

fn wrong_kind(expected: TypeKind, ty: &Type) -> Error {
    Error::Protocol(format!(
        "expected {} but '{}' is a {}",
        expected,
        ty.label(),
        ty.kind()
    ))
}

macro_rules! type_snapshot {
    ($(#[$doc:meta])* $name:ident, $kind:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            label: Label,
            is_root: bool,
            is_abstract: bool,
        }

        impl $name {
            pub fn new(label: Label, is_root: bool, is_abstract: bool) -> Self {
                Self {
                    label,
                    is_root,
                    is_abstract,
                }
            }
        }

        impl TypeConcept for $name {
            fn label(&self) -> &Label {
                &self.label
            }

            fn kind(&self) -> TypeKind {
                TypeKind::$kind
            }

            fn is_root(&self) -> bool {
                self.is_root
            }

            fn is_abstract(&self) -> bool {
                self.is_abstract
            }

            fn from_type(ty: Type) -> Result<Self> {
                match ty {
                    Type::$kind(inner) => Ok(inner),
                    other => Err(wrong_kind(TypeKind::$kind, &other)),
                }
            }

            fn into_type(self) -> Type {
                Type::$kind(self)
            }

            fn relabelled(&self, name: &str) -> Self {
                Self {
                    label: self.label.renamed(name),
                    ..self.clone()
                }
            }
        }
    };
}

type_snapshot!(
    /// The root `thing` type
    ThingType,
    Thing
);
type_snapshot!(EntityType, Entity);
type_snapshot!(RelationType, Relation);
type_snapshot!(
    /// Role type, labelled `relation:role`
    RoleType,
    Role
);

impl ThingTypeConcept for ThingType {}
impl ThingTypeConcept for EntityType {}
impl ThingTypeConcept for RelationType {}
impl ThingTypeConcept for AttributeType {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeType {
    label: Label,
    is_root: bool,
    is_abstract: bool,
    value_type: ValueType,
}

impl AttributeType {
    pub fn new(label: Label, is_root: bool, is_abstract: bool, value_type: ValueType) -> Self {
        Self {
            label,
            is_root,
            is_abstract,
            value_type,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

impl TypeConcept for AttributeType {
    fn label(&self) -> &Label {
        &self.label
    }

    fn kind(&self) -> TypeKind {
        TypeKind::Attribute
    }

    fn is_root(&self) -> bool {
        self.is_root
    }

    fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    fn from_type(ty: Type) -> Result<Self> {
        match ty {
            Type::Attribute(inner) => Ok(inner),
            other => Err(wrong_kind(TypeKind::Attribute, &other)),
        }
    }

    fn into_type(self) -> Type {
        Type::Attribute(self)
    }

    fn relabelled(&self, name: &str) -> Self {
        Self {
            label: self.label.renamed(name),
            ..self.clone()
        }
    }
}

/// Any type snapshot, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Thing(ThingType),
    Entity(EntityType),
    Relation(RelationType),
    Attribute(AttributeType),
    Role(RoleType),
}

impl Type {
    /// Decode a type record, dispatching on its encoding. Unknown encodings
    /// and value types are rejected, never defaulted.
    pub fn decode(record: &TypeRecord) -> Result<Type> {
        let kind = TypeKind::from_encoding(record.encoding)?;
        let label = match &record.scope {
            Some(scope) => Label::scoped(scope.as_str(), record.label.as_str()),
            None => Label::new(record.label.as_str()),
        };

        Ok(match kind {
            TypeKind::Thing => {
                if !record.is_root {
                    return Err(Error::Protocol(format!(
                        "thing type encoding used for non-root type '{}'",
                        label
                    )));
                }
                Type::Thing(ThingType::new(label, true, record.is_abstract))
            }
            TypeKind::Entity => {
                Type::Entity(EntityType::new(label, record.is_root, record.is_abstract))
            }
            TypeKind::Relation => {
                Type::Relation(RelationType::new(label, record.is_root, record.is_abstract))
            }
            TypeKind::Attribute => Type::Attribute(AttributeType::new(
                label,
                record.is_root,
                record.is_abstract,
                ValueType::from_code(record.value_type)?,
            )),
            TypeKind::Role => {
                if record.scope.is_none() {
                    return Err(Error::Protocol(format!(
                        "role type '{}' has no relation scope",
                        label
                    )));
                }
                Type::Role(RoleType::new(label, record.is_root, record.is_abstract))
            }
        })
    }

    pub fn to_record(&self) -> TypeRecord {
        let label = self.label();
        TypeRecord {
            label: label.name().to_string(),
            scope: label.scope().map(str::to_string),
            encoding: self.kind().encoding(),
            is_root: self.is_root(),
            is_abstract: self.is_abstract(),
            value_type: match self {
                Type::Attribute(attribute) => attribute.value_type().code(),
                _ => value_type::OBJECT,
            },
        }
    }

    pub fn as_entity_type(&self) -> Option<&EntityType> {
        match self {
            Type::Entity(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_relation_type(&self) -> Option<&RelationType> {
        match self {
            Type::Relation(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_attribute_type(&self) -> Option<&AttributeType> {
        match self {
            Type::Attribute(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_role_type(&self) -> Option<&RoleType> {
        match self {
            Type::Role(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_thing_type(&self) -> bool {
        !matches!(self, Type::Role(_))
    }
}

impl TypeConcept for Type {
    fn label(&self) -> &Label {
        match self {
            Type::Thing(t) => t.label(),
            Type::Entity(t) => t.label(),
            Type::Relation(t) => t.label(),
            Type::Attribute(t) => t.label(),
            Type::Role(t) => t.label(),
        }
    }

    fn kind(&self) -> TypeKind {
        match self {
            Type::Thing(_) => TypeKind::Thing,
            Type::Entity(_) => TypeKind::Entity,
            Type::Relation(_) => TypeKind::Relation,
            Type::Attribute(_) => TypeKind::Attribute,
            Type::Role(_) => TypeKind::Role,
        }
    }

    fn is_root(&self) -> bool {
        match self {
            Type::Thing(t) => t.is_root(),
            Type::Entity(t) => t.is_root(),
            Type::Relation(t) => t.is_root(),
            Type::Attribute(t) => t.is_root(),
            Type::Role(t) => t.is_root(),
        }
    }

    fn is_abstract(&self) -> bool {
        match self {
            Type::Thing(t) => t.is_abstract(),
            Type::Entity(t) => t.is_abstract(),
            Type::Relation(t) => t.is_abstract(),
            Type::Attribute(t) => t.is_abstract(),
            Type::Role(t) => t.is_abstract(),
        }
    }

    fn from_type(ty: Type) -> Result<Self> {
        Ok(ty)
    }

    fn into_type(self) -> Type {
        self
    }

    fn relabelled(&self, name: &str) -> Self {
        match self {
            Type::Thing(t) => Type::Thing(t.relabelled(name)),
            Type::Entity(t) => Type::Entity(t.relabelled(name)),
            Type::Relation(t) => Type::Relation(t.relabelled(name)),
            Type::Attribute(t) => Type::Attribute(t.relabelled(name)),
            Type::Role(t) => Type::Role(t.relabelled(name)),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.label())
    }
}

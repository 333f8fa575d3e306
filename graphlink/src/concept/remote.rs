// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Remote type views
//!
//! A [`RemoteType`] binds a type snapshot to a transaction. Every method is a
//! fresh round trip; nothing about parents, children or capabilities is
//! cached, so a view taken from a closed transaction fails on first use.

use log::debug;

use super::label::{self, Label};
use super::thing::{Attribute, Entity, Relation, Thing, ThingConcept};
use super::types::{
    AttributeType, EntityType, RelationType, RoleType, ThingTypeConcept, Type, TypeConcept,
    TypeKind,
};
use super::value::{Annotation, Value, ValueType};
use crate::error::{Error, Result};
use crate::protocol::{Request, Response, ResponsePart, ThingRecord, TypeRecord, TypeRequest};
use crate::transaction::{ResultStream, Transaction};

pub(crate) fn decode_types(part: ResponsePart) -> Result<Vec<Type>> {
    match part {
        ResponsePart::Types(records) => records.iter().map(Type::decode).collect(),
        other => Err(unexpected_part("types", &other)),
    }
}

pub(crate) fn decode_narrowed<U: TypeConcept>(part: ResponsePart) -> Result<Vec<U>> {
    decode_types(part)?.into_iter().map(U::from_type).collect()
}

pub(crate) fn decode_things(part: ResponsePart) -> Result<Vec<Thing>> {
    match part {
        ResponsePart::Things(records) => records.iter().map(Thing::decode).collect(),
        other => Err(unexpected_part("things", &other)),
    }
}

pub(crate) fn decode_things_narrowed<U: ThingConcept>(part: ResponsePart) -> Result<Vec<U>> {
    decode_things(part)?.into_iter().map(U::from_thing).collect()
}

fn unexpected_part(expected: &str, actual: &ResponsePart) -> Error {
    Error::Protocol(format!(
        "expected a batch of {}, got {}",
        expected,
        actual.shape()
    ))
}

pub(crate) fn decode_optional_type<U: TypeConcept>(
    record: Option<TypeRecord>,
) -> Result<Option<U>> {
    record
        .map(|record| Type::decode(&record).and_then(U::from_type))
        .transpose()
}

pub(crate) fn decode_optional_thing<U: ThingConcept>(
    record: Option<ThingRecord>,
) -> Result<Option<U>> {
    record
        .map(|record| Thing::decode(&record).and_then(U::from_thing))
        .transpose()
}

/// Live view of a type inside one transaction
#[derive(Debug, Clone)]
pub struct RemoteType<T: TypeConcept> {
    transaction: Transaction,
    concept: T,
}

impl<T: TypeConcept> RemoteType<T> {
    pub(crate) fn new(transaction: Transaction, concept: T) -> Self {
        Self {
            transaction,
            concept,
        }
    }

    /// The snapshot this view was created from (or last relabelled to)
    pub fn concept(&self) -> &T {
        &self.concept
    }

    pub fn label(&self) -> &Label {
        self.concept.label()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn request(&self, request: TypeRequest) -> Request {
        Request::Type {
            label: self.concept.label().clone(),
            request,
        }
    }

    async fn execute(&self, request: TypeRequest) -> Result<Response> {
        self.transaction.execute(self.request(request)).await
    }

    async fn execute_unit(&self, request: TypeRequest) -> Result<()> {
        self.execute(request).await?.into_unit()
    }

    fn stream<U>(
        &self,
        request: TypeRequest,
        decode: fn(ResponsePart) -> Result<Vec<U>>,
    ) -> Result<ResultStream<U>> {
        let parts = self.transaction.stream(self.request(request))?;
        Ok(ResultStream::new(parts, decode))
    }

    /// Rename the type; the view follows the new label
    pub async fn set_label(&mut self, new_label: &str) -> Result<()> {
        let new_label = label::checked(new_label)?;
        self.execute_unit(TypeRequest::SetLabel {
            label: new_label.to_string(),
        })
        .await?;
        debug!("Relabelled {} to '{}'", self.concept.label(), new_label);
        self.concept = self.concept.relabelled(new_label);
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.execute_unit(TypeRequest::Delete).await
    }

    /// Re-resolve the label through the concept manager; never cached
    pub async fn is_deleted(&self) -> Result<bool> {
        let label = self.concept.label();
        let concepts = self.transaction.concepts();
        match (self.concept.kind(), label.scope()) {
            (TypeKind::Role, Some(scope)) => match concepts.get_relation_type(scope).await? {
                None => Ok(true),
                Some(relation) => Ok(relation
                    .as_remote(&self.transaction)
                    .get_relates_for_role_label(label.name())
                    .await?
                    .is_none()),
            },
            _ => Ok(concepts.get_thing_type(label.name()).await?.is_none()),
        }
    }

    /// Direct supertype; `None` for the root `thing`
    pub async fn get_supertype(&self) -> Result<Option<Type>> {
        let record = self.execute(TypeRequest::GetSupertype).await?.into_type()?;
        decode_optional_type(record)
    }

    pub fn get_supertypes(&self) -> Result<ResultStream<Type>> {
        self.stream(TypeRequest::GetSupertypes, decode_types)
    }

    /// All transitive subtypes, including this type
    pub fn get_subtypes(&self) -> Result<ResultStream<Type>> {
        self.stream(TypeRequest::GetSubtypes, decode_types)
    }

    pub fn get_subtypes_explicit(&self) -> Result<ResultStream<Type>> {
        self.stream(TypeRequest::GetSubtypesExplicit, decode_types)
    }
}

impl<T: ThingTypeConcept> RemoteType<T> {
    pub async fn set_supertype(&self, supertype: &T) -> Result<()> {
        self.execute_unit(TypeRequest::SetSupertype {
            supertype: supertype.label().clone(),
        })
        .await
    }

    pub async fn set_abstract(&self) -> Result<()> {
        self.execute_unit(TypeRequest::SetAbstract).await
    }

    pub async fn unset_abstract(&self) -> Result<()> {
        self.execute_unit(TypeRequest::UnsetAbstract).await
    }

    pub async fn set_plays(
        &self,
        role_type: &RoleType,
        overridden_role_type: Option<&RoleType>,
    ) -> Result<()> {
        self.execute_unit(TypeRequest::SetPlays {
            role_type: role_type.label().clone(),
            overridden_role_type: overridden_role_type.map(|r| r.label().clone()),
        })
        .await
    }

    pub async fn unset_plays(&self, role_type: &RoleType) -> Result<()> {
        self.execute_unit(TypeRequest::UnsetPlays {
            role_type: role_type.label().clone(),
        })
        .await
    }

    /// Roles this type can play, inherited ones included
    pub fn get_plays(&self) -> Result<ResultStream<RoleType>> {
        self.stream(TypeRequest::GetPlays, decode_narrowed::<RoleType>)
    }

    pub fn get_plays_explicit(&self) -> Result<ResultStream<RoleType>> {
        self.stream(TypeRequest::GetPlaysExplicit, decode_narrowed::<RoleType>)
    }

    /// Role overridden by `role_type` on this type, `None` if there is none
    pub async fn get_plays_overridden(&self, role_type: &RoleType) -> Result<Option<RoleType>> {
        let record = self
            .execute(TypeRequest::GetPlaysOverridden {
                role_type: role_type.label().clone(),
            })
            .await?
            .into_type()?;
        decode_optional_type(record)
    }

    pub async fn set_owns(
        &self,
        attribute_type: &AttributeType,
        overridden_type: Option<&AttributeType>,
        annotations: &[Annotation],
    ) -> Result<()> {
        self.execute_unit(TypeRequest::SetOwns {
            attribute_type: attribute_type.label().clone(),
            overridden_type: overridden_type.map(|t| t.label().clone()),
            annotations: annotations.to_vec(),
        })
        .await
    }

    pub async fn unset_owns(&self, attribute_type: &AttributeType) -> Result<()> {
        self.execute_unit(TypeRequest::UnsetOwns {
            attribute_type: attribute_type.label().clone(),
        })
        .await
    }

    /// Owned attribute types, optionally filtered by value type and by
    /// annotations (an owned type must carry every annotation given)
    pub fn get_owns(
        &self,
        value_type: Option<ValueType>,
        annotations: &[Annotation],
    ) -> Result<ResultStream<AttributeType>> {
        self.stream(
            TypeRequest::GetOwns {
                value_type,
                annotations: annotations.to_vec(),
            },
            decode_narrowed::<AttributeType>,
        )
    }

    pub fn get_owns_explicit(
        &self,
        value_type: Option<ValueType>,
        annotations: &[Annotation],
    ) -> Result<ResultStream<AttributeType>> {
        self.stream(
            TypeRequest::GetOwnsExplicit {
                value_type,
                annotations: annotations.to_vec(),
            },
            decode_narrowed::<AttributeType>,
        )
    }

    /// Attribute type overridden by `attribute_type`, `None` if no override
    /// is configured
    pub async fn get_owns_overridden(
        &self,
        attribute_type: &AttributeType,
    ) -> Result<Option<AttributeType>> {
        let record = self
            .execute(TypeRequest::GetOwnsOverridden {
                attribute_type: attribute_type.label().clone(),
            })
            .await?
            .into_type()?;
        decode_optional_type(record)
    }

    pub fn get_instances(&self) -> Result<ResultStream<Thing>> {
        self.stream(TypeRequest::GetInstances, decode_things)
    }

    pub fn get_instances_explicit(&self) -> Result<ResultStream<Thing>> {
        self.stream(TypeRequest::GetInstancesExplicit, decode_things)
    }

    /// Definition of this type in query syntax
    pub async fn get_syntax(&self) -> Result<String> {
        self.execute(TypeRequest::GetSyntax).await?.into_text()
    }
}

fn created<U: ThingConcept>(response: Response, what: &Label) -> Result<U> {
    decode_optional_thing(response.into_thing()?)?.ok_or_else(|| {
        Error::Protocol(format!("server returned no instance for '{}'", what))
    })
}

impl RemoteType<EntityType> {
    pub async fn create(&self) -> Result<Entity> {
        let response = self.execute(TypeRequest::EntityTypeCreate).await?;
        created(response, self.label())
    }
}

impl RemoteType<RelationType> {
    pub async fn create(&self) -> Result<Relation> {
        let response = self.execute(TypeRequest::RelationTypeCreate).await?;
        created(response, self.label())
    }

    pub fn get_relates(&self) -> Result<ResultStream<RoleType>> {
        self.stream(TypeRequest::RelationTypeGetRelates, decode_narrowed::<RoleType>)
    }

    pub async fn get_relates_for_role_label(&self, role_label: &str) -> Result<Option<RoleType>> {
        let role_label = label::checked(role_label)?;
        let record = self
            .execute(TypeRequest::RelationTypeGetRelatesForRoleLabel {
                role_label: role_label.to_string(),
            })
            .await?
            .into_type()?;
        decode_optional_type(record)
    }

    pub async fn set_relates(
        &self,
        role_label: &str,
        overridden_label: Option<&str>,
    ) -> Result<()> {
        let role_label = label::checked(role_label)?;
        let overridden_label = overridden_label.map(label::checked).transpose()?;
        self.execute_unit(TypeRequest::RelationTypeSetRelates {
            role_label: role_label.to_string(),
            overridden_label: overridden_label.map(str::to_string),
        })
        .await
    }

    pub async fn unset_relates(&self, role_label: &str) -> Result<()> {
        let role_label = label::checked(role_label)?;
        self.execute_unit(TypeRequest::RelationTypeUnsetRelates {
            role_label: role_label.to_string(),
        })
        .await
    }
}

impl RemoteType<AttributeType> {
    fn check_value(&self, value: &Value) -> Result<()> {
        let expected = self.concept.value_type();
        if value.value_type() != expected {
            return Err(Error::InvalidArgument(format!(
                "attribute type '{}' holds {} values, got a {} value",
                self.label(),
                expected,
                value.value_type()
            )));
        }
        Ok(())
    }

    /// Get or create the attribute holding `value`
    pub async fn put(&self, value: impl Into<Value>) -> Result<Attribute> {
        let value = value.into();
        self.check_value(&value)?;
        let response = self
            .execute(TypeRequest::AttributeTypePut {
                value: value.to_record(),
            })
            .await?;
        created(response, self.label())
    }

    pub async fn get(&self, value: impl Into<Value>) -> Result<Option<Attribute>> {
        let value = value.into();
        self.check_value(&value)?;
        let record = self
            .execute(TypeRequest::AttributeTypeGet {
                value: value.to_record(),
            })
            .await?
            .into_thing()?;
        decode_optional_thing(record)
    }

    /// Regex constraint on string values; `None` when unset
    pub async fn get_regex(&self) -> Result<Option<String>> {
        let regex = self
            .execute(TypeRequest::AttributeTypeGetRegex)
            .await?
            .into_text()?;
        Ok(if regex.is_empty() { None } else { Some(regex) })
    }

    /// Set the regex constraint; an empty pattern removes it
    pub async fn set_regex(&self, regex: &str) -> Result<()> {
        if self.concept.value_type() != ValueType::String {
            return Err(Error::IllegalOperation(format!(
                "regex can only be set on string attribute types, '{}' is {}",
                self.label(),
                self.concept.value_type()
            )));
        }
        self.execute_unit(TypeRequest::AttributeTypeSetRegex {
            regex: regex.to_string(),
        })
        .await
    }

    /// Types owning this attribute type with every given annotation
    pub fn get_owners(&self, annotations: &[Annotation]) -> Result<ResultStream<Type>> {
        self.stream(
            TypeRequest::AttributeTypeGetOwners {
                annotations: annotations.to_vec(),
            },
            decode_types,
        )
    }
}

impl RemoteType<RoleType> {
    /// Relation type declaring this role, `None` if it no longer exists
    pub async fn get_relation_type(&self) -> Result<Option<RelationType>> {
        match self.label().scope() {
            Some(scope) => self.transaction.concepts().get_relation_type(scope).await,
            None => Err(Error::Protocol(format!(
                "role type '{}' has no relation scope",
                self.label()
            ))),
        }
    }

    /// Relation types relating this role, subtypes included
    pub fn get_relation_types(&self) -> Result<ResultStream<RelationType>> {
        self.stream(
            TypeRequest::RoleTypeGetRelationTypes,
            decode_narrowed::<RelationType>,
        )
    }

    pub fn get_player_types(&self) -> Result<ResultStream<Type>> {
        self.stream(TypeRequest::RoleTypeGetPlayerTypes, decode_types)
    }

    pub fn get_relation_instances(&self) -> Result<ResultStream<Relation>> {
        self.stream(
            TypeRequest::RoleTypeGetRelationInstances,
            decode_things_narrowed::<Relation>,
        )
    }

    pub fn get_player_instances(&self) -> Result<ResultStream<Thing>> {
        self.stream(TypeRequest::RoleTypeGetPlayerInstances, decode_things)
    }
}

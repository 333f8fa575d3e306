// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Label and IID resolution within a transaction

use super::label;
use super::remote::{decode_optional_thing, decode_optional_type};
use super::thing::{Attribute, Entity, Relation, Thing, ThingConcept};
use super::types::{
    AttributeType, EntityType, RelationType, RoleType, ThingType, Type, TypeConcept, TypeKind,
};
use super::value::ValueType;
use crate::error::{Error, Result};
use crate::protocol::{ConceptManagerRequest, Request, Response};
use crate::transaction::Transaction;

/// Entry point for looking up and creating types and things
#[derive(Debug, Clone)]
pub struct ConceptManager {
    transaction: Transaction,
}

impl ConceptManager {
    pub(crate) fn new(transaction: Transaction) -> Self {
        Self { transaction }
    }

    async fn execute(&self, request: ConceptManagerRequest) -> Result<Response> {
        self.transaction
            .execute(Request::ConceptManager(request))
            .await
    }

    async fn lookup_type<T: TypeConcept>(&self, name: &str) -> Result<Option<T>> {
        let name = label::checked(name)?;
        let record = self
            .execute(ConceptManagerRequest::GetThingType {
                label: name.to_string(),
            })
            .await?
            .into_type()?;
        match decode_optional_type::<Type>(record)? {
            None => Ok(None),
            Some(ty) => T::from_type(ty).map(Some),
        }
    }

    /// Any non-role type with this label, `None` if absent
    pub async fn get_thing_type(&self, name: &str) -> Result<Option<Type>> {
        self.lookup_type(name).await
    }

    /// Entity type with this label; fails if the label names another kind
    pub async fn get_entity_type(&self, name: &str) -> Result<Option<EntityType>> {
        self.lookup_type(name).await
    }

    pub async fn get_relation_type(&self, name: &str) -> Result<Option<RelationType>> {
        self.lookup_type(name).await
    }

    pub async fn get_attribute_type(&self, name: &str) -> Result<Option<AttributeType>> {
        self.lookup_type(name).await
    }

    async fn put_type<T: TypeConcept>(&self, request: ConceptManagerRequest) -> Result<T> {
        let record = self.execute(request).await?.into_type()?;
        decode_optional_type::<T>(record)?
            .ok_or_else(|| Error::Protocol("server returned no type for put".to_string()))
    }

    pub async fn put_entity_type(&self, name: &str) -> Result<EntityType> {
        let name = label::checked(name)?;
        self.put_type(ConceptManagerRequest::PutEntityType {
            label: name.to_string(),
        })
        .await
    }

    pub async fn put_relation_type(&self, name: &str) -> Result<RelationType> {
        let name = label::checked(name)?;
        self.put_type(ConceptManagerRequest::PutRelationType {
            label: name.to_string(),
        })
        .await
    }

    pub async fn put_attribute_type(
        &self,
        name: &str,
        value_type: ValueType,
    ) -> Result<AttributeType> {
        let name = label::checked(name)?;
        if value_type == ValueType::Object {
            return Err(Error::InvalidArgument(format!(
                "attribute type '{}' needs a concrete value type",
                name
            )));
        }
        self.put_type(ConceptManagerRequest::PutAttributeType {
            label: name.to_string(),
            value_type,
        })
        .await
    }

    async fn lookup_thing<T: ThingConcept>(&self, iid: &[u8]) -> Result<Option<T>> {
        if iid.is_empty() {
            return Err(Error::InvalidArgument("IID must not be empty".to_string()));
        }
        let record = self
            .execute(ConceptManagerRequest::GetThing { iid: iid.to_vec() })
            .await?
            .into_thing()?;
        match decode_optional_thing::<Thing>(record)? {
            None => Ok(None),
            Some(thing) => T::from_thing(thing).map(Some),
        }
    }

    /// Thing with this IID, `None` if absent
    pub async fn get_thing(&self, iid: &[u8]) -> Result<Option<Thing>> {
        self.lookup_thing(iid).await
    }

    pub async fn get_entity(&self, iid: &[u8]) -> Result<Option<Entity>> {
        self.lookup_thing(iid).await
    }

    pub async fn get_relation(&self, iid: &[u8]) -> Result<Option<Relation>> {
        self.lookup_thing(iid).await
    }

    pub async fn get_attribute(&self, iid: &[u8]) -> Result<Option<Attribute>> {
        self.lookup_thing(iid).await
    }

    pub fn get_root_thing_type(&self) -> ThingType {
        ThingType::new(TypeKind::Thing.root_label(), true, true)
    }

    pub fn get_root_entity_type(&self) -> EntityType {
        EntityType::new(TypeKind::Entity.root_label(), true, true)
    }

    pub fn get_root_relation_type(&self) -> RelationType {
        RelationType::new(TypeKind::Relation.root_label(), true, true)
    }

    pub fn get_root_attribute_type(&self) -> AttributeType {
        AttributeType::new(TypeKind::Attribute.root_label(), true, true, ValueType::Object)
    }

    pub fn get_root_role_type(&self) -> RoleType {
        RoleType::new(TypeKind::Role.root_label(), true, true)
    }
}

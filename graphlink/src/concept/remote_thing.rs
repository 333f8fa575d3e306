// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Remote thing views

use super::remote::{decode_narrowed, decode_things, decode_things_narrowed};
use super::thing::{Attribute, Relation, Thing, ThingConcept};
use super::types::{AttributeType, RoleType, Type, TypeConcept};
use super::value::Annotation;
use crate::error::Result;
use crate::protocol::{Request, Response, ResponsePart, ThingRequest};
use crate::transaction::{ResultStream, Transaction};

/// Live view of a thing inside one transaction
#[derive(Debug, Clone)]
pub struct RemoteThing<T: ThingConcept> {
    transaction: Transaction,
    concept: T,
}

impl<T: ThingConcept> RemoteThing<T> {
    pub(crate) fn new(transaction: Transaction, concept: T) -> Self {
        Self {
            transaction,
            concept,
        }
    }

    pub fn concept(&self) -> &T {
        &self.concept
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn request(&self, request: ThingRequest) -> Request {
        Request::Thing {
            iid: self.concept.iid().as_bytes().to_vec(),
            request,
        }
    }

    async fn execute(&self, request: ThingRequest) -> Result<Response> {
        self.transaction.execute(self.request(request)).await
    }

    fn stream<U>(
        &self,
        request: ThingRequest,
        decode: fn(ResponsePart) -> Result<Vec<U>>,
    ) -> Result<ResultStream<U>> {
        let parts = self.transaction.stream(self.request(request))?;
        Ok(ResultStream::new(parts, decode))
    }

    pub async fn delete(&self) -> Result<()> {
        self.execute(ThingRequest::Delete).await?.into_unit()
    }

    /// Re-resolve the IID through the concept manager
    pub async fn is_deleted(&self) -> Result<bool> {
        let found = self
            .transaction
            .concepts()
            .get_thing(self.concept.iid().as_bytes())
            .await?;
        Ok(found.is_none())
    }

    /// Owned attributes, optionally restricted to the given attribute types
    /// and to ownerships carrying every given annotation
    pub fn get_has(
        &self,
        attribute_types: &[AttributeType],
        annotations: &[Annotation],
    ) -> Result<ResultStream<Attribute>> {
        self.stream(
            ThingRequest::GetHas {
                attribute_types: attribute_types.iter().map(|t| t.label().clone()).collect(),
                annotations: annotations.to_vec(),
            },
            decode_things_narrowed::<Attribute>,
        )
    }

    pub async fn set_has(&self, attribute: &Attribute) -> Result<()> {
        self.execute(ThingRequest::SetHas {
            attribute: attribute.iid().as_bytes().to_vec(),
        })
        .await?
        .into_unit()
    }

    pub async fn unset_has(&self, attribute: &Attribute) -> Result<()> {
        self.execute(ThingRequest::UnsetHas {
            attribute: attribute.iid().as_bytes().to_vec(),
        })
        .await?
        .into_unit()
    }

    /// Relations this thing plays a role in, optionally restricted by role
    pub fn get_relations(&self, role_types: &[RoleType]) -> Result<ResultStream<Relation>> {
        self.stream(
            ThingRequest::GetRelations {
                role_types: role_types.iter().map(|r| r.label().clone()).collect(),
            },
            decode_things_narrowed::<Relation>,
        )
    }

    pub fn get_playing(&self) -> Result<ResultStream<RoleType>> {
        self.stream(ThingRequest::GetPlaying, decode_narrowed::<RoleType>)
    }
}

impl RemoteThing<Relation> {
    pub async fn add_player<P: ThingConcept>(
        &self,
        role_type: &RoleType,
        player: &P,
    ) -> Result<()> {
        self.execute(ThingRequest::RelationAddPlayer {
            role_type: role_type.label().clone(),
            player: player.iid().as_bytes().to_vec(),
        })
        .await?
        .into_unit()
    }

    pub async fn remove_player<P: ThingConcept>(
        &self,
        role_type: &RoleType,
        player: &P,
    ) -> Result<()> {
        self.execute(ThingRequest::RelationRemovePlayer {
            role_type: role_type.label().clone(),
            player: player.iid().as_bytes().to_vec(),
        })
        .await?
        .into_unit()
    }

    pub fn get_players(&self, role_types: &[RoleType]) -> Result<ResultStream<Thing>> {
        self.stream(
            ThingRequest::RelationGetPlayers {
                role_types: role_types.iter().map(|r| r.label().clone()).collect(),
            },
            decode_things,
        )
    }
}

impl RemoteThing<Attribute> {
    /// Things owning this attribute, optionally only instances of `owner_type`
    pub fn get_owners(&self, owner_type: Option<&Type>) -> Result<ResultStream<Thing>> {
        self.stream(
            ThingRequest::AttributeGetOwners {
                owner_type: owner_type.map(|t| t.label().clone()),
            },
            decode_things,
        )
    }
}

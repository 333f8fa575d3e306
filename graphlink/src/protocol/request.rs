// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Outgoing request envelopes

use serde::{Deserialize, Serialize};

use super::records::ValueRecord;
use super::{QueryKind, RequestId, SessionId, TransactionType};
use crate::concept::{Annotation, Label, ValueType};
use crate::config::Options;
use crate::error::CallContext;

/// One tagged request written to a transaction stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Transaction handshake, always the first request on a stream
    Open {
        session_id: SessionId,
        transaction_type: TransactionType,
        options: Options,
    },
    Commit,
    Rollback,
    /// Ask for the next batch of a streamed call; carries the id of that call
    Continue,
    Query {
        kind: QueryKind,
        query: String,
        options: Options,
    },
    ConceptManager(ConceptManagerRequest),
    Type {
        label: Label,
        request: TypeRequest,
    },
    Thing {
        iid: Vec<u8>,
        request: ThingRequest,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConceptManagerRequest {
    GetThingType { label: String },
    GetThing { iid: Vec<u8> },
    PutEntityType { label: String },
    PutRelationType { label: String },
    PutAttributeType { label: String, value_type: ValueType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRequest {
    Delete,
    SetLabel { label: String },
    GetSupertype,
    SetSupertype { supertype: Label },
    GetSupertypes,
    GetSubtypes,
    GetSubtypesExplicit,

    SetAbstract,
    UnsetAbstract,
    GetOwns {
        value_type: Option<ValueType>,
        annotations: Vec<Annotation>,
    },
    GetOwnsExplicit {
        value_type: Option<ValueType>,
        annotations: Vec<Annotation>,
    },
    GetOwnsOverridden { attribute_type: Label },
    SetOwns {
        attribute_type: Label,
        overridden_type: Option<Label>,
        annotations: Vec<Annotation>,
    },
    UnsetOwns { attribute_type: Label },
    GetPlays,
    GetPlaysExplicit,
    GetPlaysOverridden { role_type: Label },
    SetPlays {
        role_type: Label,
        overridden_role_type: Option<Label>,
    },
    UnsetPlays { role_type: Label },
    GetInstances,
    GetInstancesExplicit,
    GetSyntax,

    EntityTypeCreate,
    RelationTypeCreate,
    RelationTypeGetRelates,
    RelationTypeGetRelatesForRoleLabel { role_label: String },
    RelationTypeSetRelates {
        role_label: String,
        overridden_label: Option<String>,
    },
    RelationTypeUnsetRelates { role_label: String },
    AttributeTypePut { value: ValueRecord },
    AttributeTypeGet { value: ValueRecord },
    AttributeTypeGetRegex,
    AttributeTypeSetRegex { regex: String },
    AttributeTypeGetOwners { annotations: Vec<Annotation> },
    RoleTypeGetRelationTypes,
    RoleTypeGetPlayerTypes,
    RoleTypeGetRelationInstances,
    RoleTypeGetPlayerInstances,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThingRequest {
    Delete,
    GetHas {
        attribute_types: Vec<Label>,
        annotations: Vec<Annotation>,
    },
    SetHas { attribute: Vec<u8> },
    UnsetHas { attribute: Vec<u8> },
    GetRelations { role_types: Vec<Label> },
    GetPlaying,
    RelationAddPlayer { role_type: Label, player: Vec<u8> },
    RelationRemovePlayer { role_type: Label, player: Vec<u8> },
    RelationGetPlayers { role_types: Vec<Label> },
    AttributeGetOwners { owner_type: Option<Label> },
}

const MAX_QUERY_TARGET_LEN: usize = 64;

impl Request {
    /// Operation name and target used to tag errors raised for this request
    pub fn context(&self) -> CallContext {
        match self {
            Request::Open { .. } => CallContext::new("transaction.open"),
            Request::Commit => CallContext::new("transaction.commit"),
            Request::Rollback => CallContext::new("transaction.rollback"),
            Request::Continue => CallContext::new("stream.continue"),
            Request::Query { kind, query, .. } => {
                CallContext::on(kind.operation(), abbreviate(query))
            }
            Request::ConceptManager(request) => request.context(),
            Request::Type { label, request } => {
                CallContext::on(request.operation(), label.to_string())
            }
            Request::Thing { iid, request } => CallContext::on(request.operation(), hex(iid)),
        }
    }
}

impl ConceptManagerRequest {
    fn context(&self) -> CallContext {
        match self {
            ConceptManagerRequest::GetThingType { label } => {
                CallContext::on("concepts.get_thing_type", label.clone())
            }
            ConceptManagerRequest::GetThing { iid } => {
                CallContext::on("concepts.get_thing", hex(iid))
            }
            ConceptManagerRequest::PutEntityType { label } => {
                CallContext::on("concepts.put_entity_type", label.clone())
            }
            ConceptManagerRequest::PutRelationType { label } => {
                CallContext::on("concepts.put_relation_type", label.clone())
            }
            ConceptManagerRequest::PutAttributeType { label, .. } => {
                CallContext::on("concepts.put_attribute_type", label.clone())
            }
        }
    }
}

impl TypeRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            TypeRequest::Delete => "type.delete",
            TypeRequest::SetLabel { .. } => "type.set_label",
            TypeRequest::GetSupertype => "type.get_supertype",
            TypeRequest::SetSupertype { .. } => "type.set_supertype",
            TypeRequest::GetSupertypes => "type.get_supertypes",
            TypeRequest::GetSubtypes => "type.get_subtypes",
            TypeRequest::GetSubtypesExplicit => "type.get_subtypes_explicit",
            TypeRequest::SetAbstract => "thing_type.set_abstract",
            TypeRequest::UnsetAbstract => "thing_type.unset_abstract",
            TypeRequest::GetOwns { .. } => "thing_type.get_owns",
            TypeRequest::GetOwnsExplicit { .. } => "thing_type.get_owns_explicit",
            TypeRequest::GetOwnsOverridden { .. } => "thing_type.get_owns_overridden",
            TypeRequest::SetOwns { .. } => "thing_type.set_owns",
            TypeRequest::UnsetOwns { .. } => "thing_type.unset_owns",
            TypeRequest::GetPlays => "thing_type.get_plays",
            TypeRequest::GetPlaysExplicit => "thing_type.get_plays_explicit",
            TypeRequest::GetPlaysOverridden { .. } => "thing_type.get_plays_overridden",
            TypeRequest::SetPlays { .. } => "thing_type.set_plays",
            TypeRequest::UnsetPlays { .. } => "thing_type.unset_plays",
            TypeRequest::GetInstances => "thing_type.get_instances",
            TypeRequest::GetInstancesExplicit => "thing_type.get_instances_explicit",
            TypeRequest::GetSyntax => "thing_type.get_syntax",
            TypeRequest::EntityTypeCreate => "entity_type.create",
            TypeRequest::RelationTypeCreate => "relation_type.create",
            TypeRequest::RelationTypeGetRelates => "relation_type.get_relates",
            TypeRequest::RelationTypeGetRelatesForRoleLabel { .. } => {
                "relation_type.get_relates_for_role_label"
            }
            TypeRequest::RelationTypeSetRelates { .. } => "relation_type.set_relates",
            TypeRequest::RelationTypeUnsetRelates { .. } => "relation_type.unset_relates",
            TypeRequest::AttributeTypePut { .. } => "attribute_type.put",
            TypeRequest::AttributeTypeGet { .. } => "attribute_type.get",
            TypeRequest::AttributeTypeGetRegex => "attribute_type.get_regex",
            TypeRequest::AttributeTypeSetRegex { .. } => "attribute_type.set_regex",
            TypeRequest::AttributeTypeGetOwners { .. } => "attribute_type.get_owners",
            TypeRequest::RoleTypeGetRelationTypes => "role_type.get_relation_types",
            TypeRequest::RoleTypeGetPlayerTypes => "role_type.get_player_types",
            TypeRequest::RoleTypeGetRelationInstances => "role_type.get_relation_instances",
            TypeRequest::RoleTypeGetPlayerInstances => "role_type.get_player_instances",
        }
    }
}

impl ThingRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ThingRequest::Delete => "thing.delete",
            ThingRequest::GetHas { .. } => "thing.get_has",
            ThingRequest::SetHas { .. } => "thing.set_has",
            ThingRequest::UnsetHas { .. } => "thing.unset_has",
            ThingRequest::GetRelations { .. } => "thing.get_relations",
            ThingRequest::GetPlaying => "thing.get_playing",
            ThingRequest::RelationAddPlayer { .. } => "relation.add_player",
            ThingRequest::RelationRemovePlayer { .. } => "relation.remove_player",
            ThingRequest::RelationGetPlayers { .. } => "relation.get_players",
            ThingRequest::AttributeGetOwners { .. } => "attribute.get_owners",
        }
    }
}

/// Lowercase hex rendering used for IIDs in messages
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn abbreviate(query: &str) -> String {
    let trimmed = query.trim();
    match trimmed.char_indices().nth(MAX_QUERY_TARGET_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_request_context_names_label() {
        let request = Request::Type {
            label: Label::new("person"),
            request: TypeRequest::GetOwns {
                value_type: None,
                annotations: vec![],
            },
        };
        let context = request.context();
        assert_eq!(context.operation, "thing_type.get_owns");
        assert_eq!(context.target.as_deref(), Some("person"));
    }

    #[test]
    fn test_thing_request_context_uses_hex_iid() {
        let request = Request::Thing {
            iid: vec![0x0a, 0xff],
            request: ThingRequest::Delete,
        };
        assert_eq!(request.context().target.as_deref(), Some("0x0aff"));
    }

    #[test]
    fn test_long_query_is_abbreviated() {
        let query = "match $x isa person; ".repeat(10);
        let context = Request::Query {
            kind: QueryKind::Match,
            query,
            options: Options::default(),
        }
        .context();
        let target = context.target.unwrap();
        assert!(target.ends_with("..."));
        assert_eq!(target.chars().count(), MAX_QUERY_TARGET_LEN + 3);
    }
}

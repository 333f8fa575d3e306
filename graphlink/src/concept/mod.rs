// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Concept model
//!
//! Types and things arrive as immutable snapshots decoded from protocol
//! records. Live operations go through a remote view bound to a
//! transaction (`as_remote`), which issues a new call every time.

pub mod label;
pub mod manager;
pub mod remote;
pub mod remote_thing;
pub mod thing;
pub mod types;
pub mod value;

pub use label::Label;
pub use manager::ConceptManager;
pub use remote::RemoteType;
pub use remote_thing::RemoteThing;
pub use thing::{Attribute, Concept, Entity, Iid, Relation, Thing, ThingConcept};
pub use types::{
    AttributeType, EntityType, RelationType, RoleType, ThingType, ThingTypeConcept, Type,
    TypeConcept, TypeKind,
};
pub use value::{Annotation, Value, ValueType};

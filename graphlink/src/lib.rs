// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! GraphLink - async client driver for a typed graph database
//!
//! The driver talks to a server through a [`ServerStub`]. Each transaction
//! owns one bidirectional stream, and every call on it is tagged with a
//! request id so that many calls can be in flight at once. Results of
//! listing calls come back in pages and are exposed as lazy
//! [`ResultStream`]s.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use graphlink::{
//!     Client, MemoryServer, Options, SessionType, TransactionType, TypeConcept, ValueType,
//! };
//!
//! # async fn run() -> graphlink::Result<()> {
//! let client = Client::new(Arc::new(MemoryServer::new()));
//! client.databases().create("ex").await?;
//!
//! let session = client.session("ex", SessionType::Schema, Options::new()).await?;
//! let tx = session.transaction(TransactionType::Write, Options::new()).await?;
//! let person = tx.concepts().put_entity_type("person").await?;
//! let name = tx.concepts().put_attribute_type("name", ValueType::String).await?;
//! person.as_remote(&tx).set_owns(&name, None, &[]).await?;
//! tx.commit().await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`connection`] - Client, database manager and the server stub seam
//! - [`session`] - Sessions, keep-alive pulses and close cascades
//! - [`transaction`] - Request multiplexing and paginated result streams
//! - [`concept`] - Type and thing snapshots with remote views
//! - [`query`] - Query text execution
//! - [`protocol`] - Wire records exchanged with the server
//! - [`config`] - Per-call options and client configuration
//! - [`error`] - Error types and handling
//! - `memory` - In-process server (feature `memory`)

pub mod concept;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod query;
pub mod session;
pub mod transaction;

#[cfg(feature = "memory")]
pub mod memory;

pub use concept::{
    Annotation, Attribute, AttributeType, Concept, ConceptManager, Entity, EntityType, Iid, Label,
    Relation, RelationType, RemoteThing, RemoteType, RoleType, Thing, ThingConcept, ThingType,
    ThingTypeConcept, Type, TypeConcept, TypeKind, Value, ValueType,
};
pub use config::{ClientConfig, Options};
pub use connection::{Client, Database, DatabaseManager, ServerStub, TransactionChannel};
pub use error::{CallContext, Error, ErrorKind, Result};
pub use query::{ConceptMap, Numeric, QueryManager};
pub use session::{Session, SessionId, SessionType, TransactionType};
pub use transaction::{ResultStream, Transaction};

#[cfg(feature = "memory")]
pub use memory::{MemoryServer, QueryReply};

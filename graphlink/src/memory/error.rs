// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rejections raised by the in-memory server

use thiserror::Error;

use crate::concept::{Label, TypeKind};
use crate::protocol::{RequestId, SessionId};

/// Why the in-memory server refused a request. Sent to the client as the
/// message of an error envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("database '{0}' already exists")]
    DatabaseExists(String),

    #[error("session {0} does not exist")]
    SessionNotFound(SessionId),

    #[error("type '{0}' does not exist")]
    TypeNotFound(Label),

    #[error("thing {0} does not exist")]
    ThingNotFound(String),

    #[error("'{label}' has the wrong kind, expected {expected}")]
    WrongKind { label: Label, expected: TypeKind },

    #[error("root type '{0}' cannot be modified")]
    RootType(Label),

    #[error("invalid schema change: {0}")]
    InvalidSchema(String),

    #[error("invalid data change: {0}")]
    InvalidData(String),

    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("{0} is not allowed in a read transaction")]
    ReadOnly(&'static str),

    #[error("a schema transaction requires a schema session")]
    SchemaSessionRequired,

    #[error("database '{0}' already has an open schema transaction")]
    SchemaLocked(String),

    #[error("{0}")]
    Transaction(String),

    #[error("no paused stream with request id {0}")]
    UnknownStream(RequestId),

    #[error("query failed: {0}")]
    Query(String),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

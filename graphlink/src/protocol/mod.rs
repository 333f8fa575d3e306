// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request/response records exchanged with the server
//!
//! The byte-level encoding is the transport's business; the driver only sees
//! these fixed-schema records:
//! - [`RequestEnvelope`] / [`ResponseEnvelope`] tagged with a [`RequestId`]
//! - concept records ([`TypeRecord`], [`ThingRecord`], ...) inside responses

pub mod records;
pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};

pub use records::{
    encoding, value_type, ConceptMapRecord, ConceptRecord, NumericRecord, ThingRecord,
    TypeRecord, ValueRecord,
};
pub use request::{
    ConceptManagerRequest, Request, RequestEnvelope, ThingRequest, TypeRequest,
};
pub use response::{Response, ResponseEnvelope, ResponsePart, ResponsePayload, StreamState};

/// Identifies a request / response thread within one transaction stream
pub type RequestId = u64;

/// Server-issued session identifier
pub type SessionId = uuid::Uuid;

/// Kind of session: data or schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Data,
    Schema,
}

impl SessionType {
    pub fn is_data(&self) -> bool {
        matches!(self, SessionType::Data)
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, SessionType::Schema)
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data" => Ok(SessionType::Data),
            "schema" => Ok(SessionType::Schema),
            _ => Err(format!(
                "Unknown session type: {}. Valid options: data, schema",
                s
            )),
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionType::Data => "data",
            SessionType::Schema => "schema",
        };
        write!(f, "{}", name)
    }
}

/// Kind of transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Read,
    Write,
    Schema,
}

impl TransactionType {
    pub fn is_read(&self) -> bool {
        matches!(self, TransactionType::Read)
    }

    /// Write and schema transactions may commit and roll back
    pub fn is_writable(&self) -> bool {
        !self.is_read()
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(TransactionType::Read),
            "write" => Ok(TransactionType::Write),
            "schema" => Ok(TransactionType::Schema),
            _ => Err(format!(
                "Unknown transaction type: {}. Valid options: read, write, schema",
                s
            )),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionType::Read => "read",
            TransactionType::Write => "write",
            TransactionType::Schema => "schema",
        };
        write!(f, "{}", name)
    }
}

/// Query operations; the query text itself is opaque to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    Define,
    Undefine,
    Match,
    MatchAggregate,
    Insert,
    Delete,
    Update,
}

impl QueryKind {
    pub fn operation(&self) -> &'static str {
        match self {
            QueryKind::Define => "query.define",
            QueryKind::Undefine => "query.undefine",
            QueryKind::Match => "query.match",
            QueryKind::MatchAggregate => "query.match_aggregate",
            QueryKind::Insert => "query.insert",
            QueryKind::Delete => "query.delete",
            QueryKind::Update => "query.update",
        }
    }

    /// Whether answers arrive as a paginated stream
    pub fn is_streamed(&self) -> bool {
        matches!(self, QueryKind::Match | QueryKind::Insert | QueryKind::Update)
    }
}

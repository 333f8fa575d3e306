// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Concept records carried inside response envelopes
//!
//! Discriminants stay as raw integers here; mapping them onto closed enums
//! happens when the record is decoded into a concept snapshot, so unknown
//! values are reported rather than silently defaulted.

use serde::{Deserialize, Serialize};

/// Type encoding discriminants
pub mod encoding {
    pub const THING_TYPE: i32 = 0;
    pub const ENTITY_TYPE: i32 = 1;
    pub const RELATION_TYPE: i32 = 2;
    pub const ATTRIBUTE_TYPE: i32 = 3;
    pub const ROLE_TYPE: i32 = 4;
}

/// Attribute value type discriminants
pub mod value_type {
    pub const OBJECT: i32 = 0;
    pub const BOOLEAN: i32 = 1;
    pub const LONG: i32 = 2;
    pub const DOUBLE: i32 = 3;
    pub const STRING: i32 = 4;
    pub const DATETIME: i32 = 5;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub label: String,
    /// Relation label for role types
    pub scope: Option<String>,
    pub encoding: i32,
    pub is_root: bool,
    pub is_abstract: bool,
    /// Only meaningful for attribute types
    pub value_type: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueRecord {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Milliseconds since the Unix epoch, UTC
    DateTime(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingRecord {
    pub iid: Vec<u8>,
    pub thing_type: TypeRecord,
    pub value: Option<ValueRecord>,
    pub inferred: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConceptRecord {
    Type(TypeRecord),
    Thing(ThingRecord),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConceptMapRecord {
    pub entries: Vec<(String, ConceptRecord)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericRecord {
    Long(i64),
    Double(f64),
    NaN,
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Incoming response envelopes

use serde::{Deserialize, Serialize};

use super::records::{ConceptMapRecord, NumericRecord, ThingRecord, TypeRecord};
use super::RequestId;
use crate::error::{Error, Result};

/// One tagged response read from a transaction stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

impl ResponseEnvelope {
    pub fn res(id: RequestId, response: Response) -> Self {
        Self {
            id,
            payload: ResponsePayload::Res(response),
        }
    }

    pub fn part(id: RequestId, part: ResponsePart) -> Self {
        Self {
            id,
            payload: ResponsePayload::ResPart(part),
        }
    }

    pub fn state(id: RequestId, state: StreamState) -> Self {
        Self {
            id,
            payload: ResponsePayload::StreamState(state),
        }
    }

    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Reply to a single-shot request
    Res(Response),
    /// One batch of a streamed request
    ResPart(ResponsePart),
    /// Pagination marker of a streamed request
    StreamState(StreamState),
    /// The server rejected this request
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Server paused; a `Continue` request with the same id resumes it
    Continue,
    /// No more batches will follow
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Unit,
    Type(Option<TypeRecord>),
    Thing(Option<ThingRecord>),
    Text(String),
    Numeric(NumericRecord),
}

impl Response {
    pub fn shape(&self) -> &'static str {
        match self {
            Response::Unit => "unit",
            Response::Type(_) => "type",
            Response::Thing(_) => "thing",
            Response::Text(_) => "text",
            Response::Numeric(_) => "numeric",
        }
    }

    pub fn into_unit(self) -> Result<()> {
        match self {
            Response::Unit => Ok(()),
            other => Err(unexpected("unit", &other)),
        }
    }

    pub fn into_type(self) -> Result<Option<TypeRecord>> {
        match self {
            Response::Type(record) => Ok(record),
            other => Err(unexpected("type", &other)),
        }
    }

    pub fn into_thing(self) -> Result<Option<ThingRecord>> {
        match self {
            Response::Thing(record) => Ok(record),
            other => Err(unexpected("thing", &other)),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Response::Text(text) => Ok(text),
            other => Err(unexpected("text", &other)),
        }
    }

    pub fn into_numeric(self) -> Result<NumericRecord> {
        match self {
            Response::Numeric(numeric) => Ok(numeric),
            other => Err(unexpected("numeric", &other)),
        }
    }
}

fn unexpected(expected: &str, actual: &Response) -> Error {
    Error::Protocol(format!(
        "expected a {} response, got {}",
        expected,
        actual.shape()
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePart {
    Types(Vec<TypeRecord>),
    Things(Vec<ThingRecord>),
    ConceptMaps(Vec<ConceptMapRecord>),
}

impl ResponsePart {
    pub fn len(&self) -> usize {
        match self {
            ResponsePart::Types(items) => items.len(),
            ResponsePart::Things(items) => items.len(),
            ResponsePart::ConceptMaps(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &'static str {
        match self {
            ResponsePart::Types(_) => "types",
            ResponsePart::Things(_) => "things",
            ResponsePart::ConceptMaps(_) => "concept maps",
        }
    }
}

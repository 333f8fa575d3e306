// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query manager
//!
//! Query text is passed through untouched; parsing and planning are the
//! server's business. Write-style queries whose answers are streamed come
//! back as lazy [`ResultStream`]s of [`ConceptMap`]s.

use log::debug;
use std::collections::HashMap;

use crate::concept::Concept;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::protocol::{NumericRecord, QueryKind, Request, Response, ResponsePart};
use crate::transaction::{ResultStream, Transaction};

/// One answer: variable name to bound concept
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConceptMap {
    map: HashMap<String, Concept>,
}

impl ConceptMap {
    pub fn get(&self, variable: &str) -> Option<&Concept> {
        self.map.get(variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn decode_concept_maps(part: ResponsePart) -> Result<Vec<ConceptMap>> {
    match part {
        ResponsePart::ConceptMaps(records) => records
            .iter()
            .map(|record| {
                let mut map = HashMap::with_capacity(record.entries.len());
                for (variable, concept) in &record.entries {
                    map.insert(variable.clone(), Concept::decode(concept)?);
                }
                Ok(ConceptMap { map })
            })
            .collect(),
        other => Err(Error::Protocol(format!(
            "expected a batch of concept maps, got {}",
            other.shape()
        ))),
    }
}

/// Result of an aggregate query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Long(i64),
    Double(f64),
    /// Aggregate over an empty answer set
    NaN,
}

impl Numeric {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Long(l) => Some(*l as f64),
            Numeric::Double(d) => Some(*d),
            Numeric::NaN => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Numeric::NaN)
    }
}

impl From<NumericRecord> for Numeric {
    fn from(record: NumericRecord) -> Self {
        match record {
            NumericRecord::Long(l) => Numeric::Long(l),
            NumericRecord::Double(d) => Numeric::Double(d),
            NumericRecord::NaN => Numeric::NaN,
        }
    }
}

/// Runs query text against one transaction
#[derive(Debug, Clone)]
pub struct QueryManager {
    transaction: Transaction,
}

impl QueryManager {
    pub(crate) fn new(transaction: Transaction) -> Self {
        Self { transaction }
    }

    fn request(
        &self,
        kind: QueryKind,
        query: &str,
        options: Option<&Options>,
    ) -> Result<(Request, Options)> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("query must not be empty".to_string()));
        }
        let merged = match options {
            Some(options) => self.transaction.options().merged_with(options),
            None => self.transaction.options().clone(),
        };
        debug!("Running {} in transaction {}", kind.operation(), self.transaction.id());
        let request = Request::Query {
            kind,
            query: query.to_string(),
            options: merged.clone(),
        };
        Ok((request, merged))
    }

    async fn single(
        &self,
        kind: QueryKind,
        query: &str,
        options: Option<&Options>,
    ) -> Result<Response> {
        let (request, merged) = self.request(kind, query, options)?;
        self.transaction
            .execute_with_timeout(request, merged.call_timeout_duration())
            .await
    }

    fn streamed(
        &self,
        kind: QueryKind,
        query: &str,
        options: Option<&Options>,
    ) -> Result<ResultStream<ConceptMap>> {
        let (request, merged) = self.request(kind, query, options)?;
        let parts = self
            .transaction
            .stream_with_timeout(request, merged.call_timeout_duration())?;
        Ok(ResultStream::new(parts, decode_concept_maps))
    }

    pub async fn define(&self, query: &str) -> Result<()> {
        self.define_with(query, None).await
    }

    pub async fn define_with(&self, query: &str, options: Option<&Options>) -> Result<()> {
        self.single(QueryKind::Define, query, options).await?.into_unit()
    }

    pub async fn undefine(&self, query: &str) -> Result<()> {
        self.undefine_with(query, None).await
    }

    pub async fn undefine_with(&self, query: &str, options: Option<&Options>) -> Result<()> {
        self.single(QueryKind::Undefine, query, options).await?.into_unit()
    }

    pub async fn delete(&self, query: &str) -> Result<()> {
        self.delete_with(query, None).await
    }

    pub async fn delete_with(&self, query: &str, options: Option<&Options>) -> Result<()> {
        self.single(QueryKind::Delete, query, options).await?.into_unit()
    }

    pub async fn match_aggregate(&self, query: &str) -> Result<Numeric> {
        self.match_aggregate_with(query, None).await
    }

    pub async fn match_aggregate_with(
        &self,
        query: &str,
        options: Option<&Options>,
    ) -> Result<Numeric> {
        let numeric = self
            .single(QueryKind::MatchAggregate, query, options)
            .await?
            .into_numeric()?;
        Ok(numeric.into())
    }

    pub fn match_(&self, query: &str) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Match, query, None)
    }

    pub fn match_with(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Match, query, Some(options))
    }

    pub fn insert(&self, query: &str) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Insert, query, None)
    }

    pub fn insert_with(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Insert, query, Some(options))
    }

    pub fn update(&self, query: &str) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Update, query, None)
    }

    pub fn update_with(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.streamed(QueryKind::Update, query, Some(options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encoding, value_type, ConceptMapRecord, ConceptRecord, TypeRecord};

    #[test]
    fn test_concept_maps_decode_every_binding() {
        let record = ConceptMapRecord {
            entries: vec![(
                "t".to_string(),
                ConceptRecord::Type(TypeRecord {
                    label: "person".to_string(),
                    scope: None,
                    encoding: encoding::ENTITY_TYPE,
                    is_root: false,
                    is_abstract: false,
                    value_type: value_type::OBJECT,
                }),
            )],
        };
        let maps = decode_concept_maps(ResponsePart::ConceptMaps(vec![record])).unwrap();
        assert_eq!(maps.len(), 1);
        let concept = maps[0].get("t").unwrap();
        assert_eq!(concept.as_type().unwrap().to_string(), "entity type 'person'");
    }

    #[test]
    fn test_wrong_batch_shape_is_protocol_error() {
        let err = decode_concept_maps(ResponsePart::Types(vec![])).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Numeric::from(NumericRecord::Long(3)).as_f64(), Some(3.0));
        assert!(Numeric::from(NumericRecord::NaN).is_nan());
        assert_eq!(Numeric::Double(1.5).as_i64(), None);
    }
}

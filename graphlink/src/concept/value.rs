// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Attribute value types, values and ownership annotations

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::{value_type, ValueRecord};

/// Value type of an attribute type; `Object` is the root attribute type's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Object,
    Boolean,
    Long,
    Double,
    String,
    DateTime,
}

impl ValueType {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            value_type::OBJECT => Ok(ValueType::Object),
            value_type::BOOLEAN => Ok(ValueType::Boolean),
            value_type::LONG => Ok(ValueType::Long),
            value_type::DOUBLE => Ok(ValueType::Double),
            value_type::STRING => Ok(ValueType::String),
            value_type::DATETIME => Ok(ValueType::DateTime),
            other => Err(Error::Protocol(format!("unrecognised value type {}", other))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ValueType::Object => value_type::OBJECT,
            ValueType::Boolean => value_type::BOOLEAN,
            ValueType::Long => value_type::LONG,
            ValueType::Double => value_type::DOUBLE,
            ValueType::String => value_type::STRING,
            ValueType::DateTime => value_type::DATETIME,
        }
    }

    /// Whether attributes of this value type can be used as keys
    pub fn is_keyable(&self) -> bool {
        matches!(
            self,
            ValueType::Long | ValueType::String | ValueType::DateTime
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Object => "object",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::DateTime => "datetime",
        };
        write!(f, "{}", name)
    }
}

/// Modifier on an ownership capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Annotation {
    Key,
    Unique,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Key => write!(f, "@key"),
            Annotation::Unique => write!(f, "@unique"),
        }
    }
}

/// Attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn decode(record: &ValueRecord) -> Result<Self> {
        Ok(match record {
            ValueRecord::Boolean(b) => Value::Boolean(*b),
            ValueRecord::Long(l) => Value::Long(*l),
            ValueRecord::Double(d) => Value::Double(*d),
            ValueRecord::String(s) => Value::String(s.clone()),
            ValueRecord::DateTime(millis) => {
                let datetime = DateTime::from_timestamp_millis(*millis).ok_or_else(|| {
                    Error::Protocol(format!("datetime {}ms is out of range", millis))
                })?;
                Value::DateTime(datetime.naive_utc())
            }
        })
    }

    pub fn to_record(&self) -> ValueRecord {
        match self {
            Value::Boolean(b) => ValueRecord::Boolean(*b),
            Value::Long(l) => ValueRecord::Long(*l),
            Value::Double(d) => ValueRecord::Double(*d),
            Value::String(s) => ValueRecord::String(s.clone()),
            Value::DateTime(dt) => ValueRecord::DateTime(dt.and_utc().timestamp_millis()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3f")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

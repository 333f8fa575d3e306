// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Type labels

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Case-sensitive name identifying a type. Role types are scoped by their
/// relation type and render as `relation:role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    scope: Option<String>,
    name: String,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            scope: None,
            name: name.into(),
        }
    }

    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Same scope, different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            scope: self.scope.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", scope, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::new(name)
    }
}

/// Reject empty or blank label names before they reach the server
pub(crate) fn checked(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        Err(Error::InvalidArgument("label must not be empty".to_string()))
    } else {
        Ok(name)
    }
}

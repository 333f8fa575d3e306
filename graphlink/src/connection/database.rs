// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Database handles

use log::info;
use std::fmt;
use std::sync::Arc;

use super::stub::ServerStub;
use crate::error::{Error, Result};

/// Factory and registry view over the server's databases
#[derive(Clone)]
pub struct DatabaseManager {
    stub: Arc<dyn ServerStub>,
}

impl DatabaseManager {
    pub(crate) fn new(stub: Arc<dyn ServerStub>) -> Self {
        Self { stub }
    }

    pub(crate) fn stub(&self) -> &Arc<dyn ServerStub> {
        &self.stub
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        self.stub.databases_contains(non_empty(name)?).await
    }

    pub async fn create(&self, name: &str) -> Result<()> {
        let name = non_empty(name)?;
        self.stub.databases_create(name).await?;
        info!("Created database '{}'", name);
        Ok(())
    }

    /// Resolve a database by name; unknown names are an error
    pub async fn get(&self, name: &str) -> Result<Database> {
        let name = non_empty(name)?;
        if self.stub.databases_contains(name).await? {
            Ok(Database::new(Arc::clone(&self.stub), name.to_string()))
        } else {
            Err(Error::InvalidArgument(format!(
                "database '{}' does not exist",
                name
            )))
        }
    }

    pub async fn all(&self) -> Result<Vec<Database>> {
        let names = self.stub.databases_all().await?;
        Ok(names
            .into_iter()
            .map(|name| Database::new(Arc::clone(&self.stub), name))
            .collect())
    }
}

/// A named database on the server; referenced, never owned
#[derive(Clone)]
pub struct Database {
    name: String,
    stub: Arc<dyn ServerStub>,
}

impl Database {
    fn new(stub: Arc<dyn ServerStub>, name: String) -> Self {
        Self { name, stub }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full schema definition of the database
    pub async fn schema(&self) -> Result<String> {
        self.stub.database_schema(&self.name).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.stub.database_delete(&self.name).await?;
        info!("Deleted database '{}'", self.name);
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub(crate) fn non_empty(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        Err(Error::InvalidArgument(
            "database name must not be empty".to_string(),
        ))
    } else {
        Ok(name)
    }
}

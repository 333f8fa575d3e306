// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Client entry point: databases and sessions

use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::database::DatabaseManager;
use super::stub::ServerStub;
use crate::config::{ClientConfig, Options};
use crate::error::{Error, Result};
use crate::protocol::SessionType;
use crate::session::Session;

/// Opens sessions against named databases over one server connection
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    databases: DatabaseManager,
    sessions: Mutex<Vec<Session>>,
    open: AtomicBool,
}

impl Client {
    pub fn new(stub: Arc<dyn ServerStub>) -> Self {
        Self::with_config(stub, ClientConfig::default())
    }

    pub fn with_config(stub: Arc<dyn ServerStub>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                databases: DatabaseManager::new(stub),
                sessions: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn databases(&self) -> &DatabaseManager {
        &self.inner.databases
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Open a session; `options` are layered over the configured defaults
    pub async fn session(
        &self,
        database: &str,
        session_type: SessionType,
        options: Options,
    ) -> Result<Session> {
        if !self.is_open() {
            return Err(Error::Connection("client has been closed".to_string()));
        }

        let options = self.inner.config.default_options.merged_with(&options);
        let session = Session::open(
            &self.inner.databases,
            database,
            session_type,
            options,
            self.inner.config.pulse_interval(),
        )
        .await?;

        {
            // `close` flips `open` before taking the list
            let mut sessions = self.inner.sessions.lock();
            if self.is_open() {
                sessions.retain(|s| s.is_open());
                sessions.push(session.clone());
                return Ok(session);
            }
        }
        session.close().await;
        Err(Error::Connection("client has been closed".to_string()))
    }

    /// Close every session opened through this client
    pub async fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let sessions = std::mem::take(&mut *self.inner.sessions.lock());
        info!("Closing client with {} sessions", sessions.len());
        for session in sessions {
            session.close().await;
        }
    }
}

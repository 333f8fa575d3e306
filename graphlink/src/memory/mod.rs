// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory server
//!
//! [`MemoryServer`] implements [`ServerStub`] without a network: databases,
//! sessions and transaction streams all live in this process. It is meant
//! for tests and embedding, and offers hooks the real transport cannot:
//! - response jitter, so single-shot replies arrive out of order
//! - a pluggable query handler, since query text is never interpreted here
//! - fault injection for broken streams and expired sessions

pub mod error;
pub mod graph;
mod service;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Options;
use crate::connection::{ServerStub, TransactionChannel};
use crate::error::{CallContext, Error, Result};
use crate::protocol::{
    ConceptMapRecord, NumericRecord, QueryKind, ResponseEnvelope, SessionId, SessionType,
};
pub use error::MemoryError;
pub use graph::Graph;
use service::TransactionService;

/// Page size used when neither the transaction nor the query sets one
pub const DEFAULT_PREFETCH_SIZE: usize = 50;

/// What a query handler answers
#[derive(Debug, Clone, PartialEq)]
pub enum QueryReply {
    /// No answers (define, undefine, delete; or an empty stream)
    Done,
    Numeric(NumericRecord),
    ConceptMaps(Vec<ConceptMapRecord>),
}

impl QueryReply {
    fn shape(&self) -> &'static str {
        match self {
            QueryReply::Done => "empty",
            QueryReply::Numeric(_) => "numeric",
            QueryReply::ConceptMaps(_) => "concept map",
        }
    }
}

pub type QueryHandler =
    Arc<dyn Fn(QueryKind, &str) -> std::result::Result<QueryReply, String> + Send + Sync>;

struct Settings {
    jitter: Option<Duration>,
    prefetch_size: usize,
    query_handler: Option<QueryHandler>,
}

struct DatabaseState {
    graph: Graph,
    /// Stream holding the schema transaction, if any
    schema_lock: Option<u64>,
}

#[derive(Clone)]
struct SessionRecord {
    database: String,
    session_type: SessionType,
}

pub(crate) struct ServerState {
    databases: Mutex<BTreeMap<String, DatabaseState>>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    channels: Mutex<HashMap<u64, mpsc::UnboundedSender<Result<ResponseEnvelope>>>>,
    settings: RwLock<Settings>,
    next_channel: AtomicU64,
    requests_received: AtomicUsize,
    paused_streams: AtomicUsize,
}

/// Process-local server; clones share all state
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServerState {
                databases: Mutex::new(BTreeMap::new()),
                sessions: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                settings: RwLock::new(Settings {
                    jitter: None,
                    prefetch_size: DEFAULT_PREFETCH_SIZE,
                    query_handler: None,
                }),
                next_channel: AtomicU64::new(1),
                requests_received: AtomicUsize::new(0),
                paused_streams: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay single-shot replies (not open, commit or rollback) by a random
    /// duration up to `max`
    pub fn with_jitter(self, max: Duration) -> Self {
        self.state.settings.write().jitter = Some(max);
        self
    }

    pub fn with_prefetch_size(self, size: usize) -> Self {
        self.state.settings.write().prefetch_size = size.max(1);
        self
    }

    /// Answer query requests with `handler`; without one every query fails
    pub fn with_query_handler<F>(self, handler: F) -> Self
    where
        F: Fn(QueryKind, &str) -> std::result::Result<QueryReply, String> + Send + Sync + 'static,
    {
        self.state.settings.write().query_handler = Some(Arc::new(handler));
        self
    }

    /// Break every live transaction stream with a transport error
    pub fn fail_transactions(&self, message: &str) {
        let channels = self.state.channels.lock();
        warn!("Failing {} transaction streams: {}", channels.len(), message);
        for responses in channels.values() {
            let _ = responses.send(Err(Error::Connection(message.to_string())));
        }
    }

    /// Forget every session, as if they had all timed out server-side
    pub fn expire_sessions(&self) {
        let mut sessions = self.state.sessions.lock();
        info!("Expiring {} sessions", sessions.len());
        sessions.clear();
    }

    /// Envelopes received over all transaction streams so far
    pub fn requests_received(&self) -> usize {
        self.state.requests_received.load(Ordering::SeqCst)
    }

    /// Streamed replies with pages still waiting for a `Continue`
    pub fn paused_streams(&self) -> usize {
        self.state.paused_streams.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.sessions.lock().len()
    }

    fn with_database<T>(
        &self,
        operation: &'static str,
        name: &str,
        f: impl FnOnce(&mut DatabaseState) -> T,
    ) -> Result<T> {
        let mut databases = self.state.databases.lock();
        match databases.get_mut(name) {
            Some(database) => Ok(f(database)),
            None => Err(rejected(operation, name, MemoryError::DatabaseNotFound(name.to_string()))),
        }
    }
}

fn rejected(operation: &'static str, target: impl Into<String>, error: MemoryError) -> Error {
    Error::server(CallContext::on(operation, target), error.to_string())
}

#[async_trait]
impl ServerStub for MemoryServer {
    async fn databases_contains(&self, name: &str) -> Result<bool> {
        Ok(self.state.databases.lock().contains_key(name))
    }

    async fn databases_create(&self, name: &str) -> Result<()> {
        let mut databases = self.state.databases.lock();
        if databases.contains_key(name) {
            return Err(rejected(
                "databases.create",
                name,
                MemoryError::DatabaseExists(name.to_string()),
            ));
        }
        databases.insert(
            name.to_string(),
            DatabaseState {
                graph: Graph::new(),
                schema_lock: None,
            },
        );
        info!("Created database '{}'", name);
        Ok(())
    }

    async fn databases_all(&self) -> Result<Vec<String>> {
        Ok(self.state.databases.lock().keys().cloned().collect())
    }

    async fn database_schema(&self, name: &str) -> Result<String> {
        self.with_database("database.schema", name, |database| database.graph.schema())
    }

    async fn database_delete(&self, name: &str) -> Result<()> {
        if self.state.databases.lock().remove(name).is_none() {
            return Err(rejected(
                "database.delete",
                name,
                MemoryError::DatabaseNotFound(name.to_string()),
            ));
        }
        info!("Deleted database '{}'", name);
        Ok(())
    }

    async fn session_open(
        &self,
        database: &str,
        session_type: SessionType,
        _options: &Options,
    ) -> Result<SessionId> {
        self.with_database("session.open", database, |_| ())?;
        let id = uuid::Uuid::new_v4();
        self.state.sessions.lock().insert(
            id,
            SessionRecord {
                database: database.to_string(),
                session_type,
            },
        );
        debug!("Opened {} session {} on '{}'", session_type, id, database);
        Ok(id)
    }

    async fn session_close(&self, session_id: SessionId) -> Result<()> {
        match self.state.sessions.lock().remove(&session_id) {
            Some(_) => Ok(()),
            None => Err(rejected(
                "session.close",
                session_id.to_string(),
                MemoryError::SessionNotFound(session_id),
            )),
        }
    }

    async fn session_pulse(&self, session_id: SessionId) -> Result<bool> {
        Ok(self.state.sessions.lock().contains_key(&session_id))
    }

    async fn transaction(&self) -> Result<TransactionChannel> {
        let (requests, inbound) = mpsc::unbounded_channel();
        let (outbound, responses) = mpsc::unbounded_channel();
        let id = self.state.next_channel.fetch_add(1, Ordering::SeqCst);
        self.state.channels.lock().insert(id, outbound.clone());

        let service = TransactionService::new(id, Arc::clone(&self.state), outbound);
        tokio::spawn(service.run(inbound));
        Ok(TransactionChannel {
            requests,
            responses,
        })
    }
}

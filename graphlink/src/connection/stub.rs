// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Interface to the transport collaborator
//!
//! The driver never touches sockets or encodings. A [`ServerStub`]
//! implementation owns the network connection (and its retry policy) and
//! exposes the server's unary calls plus a way to open a bidirectional
//! transaction stream.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Options;
use crate::error::Result;
use crate::protocol::{RequestEnvelope, ResponseEnvelope, SessionId, SessionType};

/// Both directions of one transaction stream
///
/// An `Err` item or the end of `responses` means the stream is gone.
pub struct TransactionChannel {
    pub requests: mpsc::UnboundedSender<RequestEnvelope>,
    pub responses: mpsc::UnboundedReceiver<Result<ResponseEnvelope>>,
}

/// Unary server calls and transaction stream factory
#[async_trait]
pub trait ServerStub: Send + Sync {
    async fn databases_contains(&self, name: &str) -> Result<bool>;

    async fn databases_create(&self, name: &str) -> Result<()>;

    async fn databases_all(&self) -> Result<Vec<String>>;

    /// Schema definition text of a database
    async fn database_schema(&self, name: &str) -> Result<String>;

    async fn database_delete(&self, name: &str) -> Result<()>;

    async fn session_open(
        &self,
        database: &str,
        session_type: SessionType,
        options: &Options,
    ) -> Result<SessionId>;

    async fn session_close(&self, session_id: SessionId) -> Result<()>;

    /// Keep-alive; `false` means the server no longer knows the session
    async fn session_pulse(&self, session_id: SessionId) -> Result<bool>;

    /// Open a new bidirectional transaction stream
    async fn transaction(&self) -> Result<TransactionChannel>;
}

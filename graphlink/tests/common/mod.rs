// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use graphlink::{
    Annotation, Client, ClientConfig, MemoryServer, Options, Session, SessionType, Transaction,
    TransactionType, TypeConcept, ValueType,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Client on `server` with database `ex` already created. Pulses are off
/// unless a test asks for them.
pub async fn setup(server: &MemoryServer) -> Client {
    setup_with_pulse(server, None).await
}

pub async fn setup_with_pulse(server: &MemoryServer, pulse: Option<Duration>) -> Client {
    init_logging();
    let config = match pulse {
        Some(interval) => ClientConfig::default().with_pulse_interval(interval),
        None => ClientConfig::default().with_pulse_interval(Duration::ZERO),
    };
    let client = Client::with_config(Arc::new(server.clone()), config);
    client.databases().create("ex").await.unwrap();
    client
}

pub async fn open(
    client: &Client,
    session_type: SessionType,
    transaction_type: TransactionType,
) -> (Session, Transaction) {
    let session = client
        .session("ex", session_type, Options::new())
        .await
        .unwrap();
    let transaction = session
        .transaction(transaction_type, Options::new())
        .await
        .unwrap();
    (session, transaction)
}

/// Commit `person owns name @key` to database `ex`
pub async fn define_person(client: &Client) {
    let (session, tx) = open(client, SessionType::Schema, TransactionType::Schema).await;
    let person = tx.concepts().put_entity_type("person").await.unwrap();
    let name = tx
        .concepts()
        .put_attribute_type("name", ValueType::String)
        .await
        .unwrap();
    person
        .as_remote(&tx)
        .set_owns(&name, None, &[Annotation::Key])
        .await
        .unwrap();
    tx.commit().await.unwrap();
    session.close().await;
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Server connection: the transport collaborator interface, the client
//! entry point and database handles

pub mod client;
pub mod database;
pub mod stub;

pub use client::Client;
pub use database::{Database, DatabaseManager};
pub use stub::{ServerStub, TransactionChannel};

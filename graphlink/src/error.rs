// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the graphlink driver

use std::fmt;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the call an error originated from: the operation name and,
/// when there is one, the label or IID it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub operation: &'static str,
    pub target: Option<String>,
}

impl CallContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            target: None,
        }
    }

    pub fn on(operation: &'static str, target: impl Into<String>) -> Self {
        Self {
            operation,
            target: Some(target.into()),
        }
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "'{}' on '{}'", self.operation, target),
            None => write!(f, "'{}'", self.operation),
        }
    }
}

/// Broad classes of failure, used to decide how an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport could not reach or maintain the stream
    Connectivity,
    /// The server rejected one operation
    Server,
    /// A payload could not be mapped onto a known shape
    Protocol,
    /// The session or transaction was already closed
    Lifecycle,
    /// The caller supplied an invalid argument or called an operation
    /// that is not allowed in this state
    Usage,
}

/// Main error type for driver operations
///
/// `Clone` because a single terminal cause is delivered to every call that
/// was pending on a transaction when its channel failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport failure or rejected transaction handshake
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the operation
    #[error("Server error in {context}: {message}")]
    Server { context: CallContext, message: String },

    /// An envelope could not be decoded into a known shape
    #[error("Malformed protocol payload: {0}")]
    Protocol(String),

    /// The transaction was closed by the caller, its session or a channel failure
    #[error("Transaction closed{}", closed_cause(.cause))]
    TransactionClosed { cause: Option<Box<Error>> },

    /// The session was closed
    #[error("Session closed")]
    SessionClosed,

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not permitted for this transaction or concept
    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

fn closed_cause(cause: &Option<Box<Error>>) -> String {
    cause
        .as_ref()
        .map(|c| format!(": {}", c))
        .unwrap_or_default()
}

impl Error {
    pub fn server(context: CallContext, message: impl Into<String>) -> Self {
        Error::Server {
            context,
            message: message.into(),
        }
    }

    pub fn transaction_closed(cause: Option<Error>) -> Self {
        Error::TransactionClosed {
            cause: cause.map(Box::new),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connectivity,
            Error::Server { .. } => ErrorKind::Server,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::TransactionClosed { .. } | Error::SessionClosed => ErrorKind::Lifecycle,
            Error::InvalidArgument(_) | Error::IllegalOperation(_) | Error::Config(_) => {
                ErrorKind::Usage
            }
        }
    }

    pub fn is_transaction_closed(&self) -> bool {
        matches!(self, Error::TransactionClosed { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transactions
//!
//! A transaction owns exactly one server stream, shared between its calls by
//! a [`Multiplexer`](multiplexer). Closing it (explicitly, through its
//! session, or because the stream failed) resolves every pending call and
//! makes every later operation fail with [`Error::TransactionClosed`]
//! without reaching the network.

pub(crate) mod multiplexer;
pub mod stream;

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::concept::ConceptManager;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response};
use crate::query::QueryManager;
use crate::session::{Session, SessionInner};
use multiplexer::Multiplexer;

pub use crate::protocol::TransactionType;
pub use stream::{ResponseParts, ResultStream};

type CloseCallback = Box<dyn FnOnce(Option<Error>) + Send>;

struct TransactionState {
    open: bool,
    cause: Option<Error>,
    callbacks: Vec<CloseCallback>,
}

struct TransactionInner {
    id: u64,
    transaction_type: TransactionType,
    options: Options,
    session: Weak<SessionInner>,
    mux: Multiplexer,
    state: Mutex<TransactionState>,
}

impl TransactionInner {
    /// First call wins; later calls are no-ops
    fn terminate(&self, cause: Option<Error>) {
        let callbacks = {
            let mut state = self.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.cause = cause.clone();
            std::mem::take(&mut state.callbacks)
        };

        self.mux.shutdown(Error::transaction_closed(cause.clone()));
        if let Some(session) = self.session.upgrade() {
            session.unregister(self.id);
        }

        match &cause {
            Some(cause) => warn!("Transaction {} closed by failure: {}", self.id, cause),
            None => info!("Closed {} transaction {}", self.transaction_type, self.id),
        }

        for callback in callbacks {
            callback(cause.clone());
        }
    }
}

/// Handle to a transaction; cheap to clone, all clones share one lifecycle
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Open a stream on `session` and perform the transaction handshake
    pub(crate) async fn open(
        session: &Session,
        transaction_type: TransactionType,
        options: Options,
    ) -> Result<Transaction> {
        let channel = session.stub().transaction().await?;
        let id = session.next_transaction_id();

        let inner = Arc::new_cyclic(|weak: &Weak<TransactionInner>| {
            let weak = weak.clone();
            let mux = Multiplexer::start(channel, move |cause| {
                if let Some(inner) = weak.upgrade() {
                    inner.terminate(Some(cause));
                }
            });
            TransactionInner {
                id,
                transaction_type,
                options: options.clone(),
                session: session.downgrade(),
                mux,
                state: Mutex::new(TransactionState {
                    open: true,
                    cause: None,
                    callbacks: Vec::new(),
                }),
            }
        });
        let transaction = Transaction { inner };

        let handshake = Request::Open {
            session_id: session.id(),
            transaction_type,
            options,
        };
        match transaction.inner.mux.single(handshake).await {
            Ok(response) => {
                if let Err(e) = response.into_unit() {
                    transaction.close();
                    return Err(e);
                }
            }
            Err(e) => {
                transaction.close();
                return Err(match e {
                    Error::Server { message, .. } => Error::Connection(message),
                    other => other,
                });
            }
        }

        info!(
            "Opened {} transaction {} in session {}",
            transaction_type,
            id,
            session.id()
        );
        Ok(transaction)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.inner.transaction_type
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open && self.inner.mux.failure().is_none()
    }

    /// Calls submitted and not yet resolved
    pub fn pending_calls(&self) -> usize {
        self.inner.mux.pending_calls()
    }

    fn ensure_open(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if !state.open {
                return Err(Error::transaction_closed(state.cause.clone()));
            }
        }
        match self.inner.mux.failure() {
            Some(cause) => Err(Error::transaction_closed(Some(cause))),
            None => Ok(()),
        }
    }

    /// Issue a single-shot request and wait for its response
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_timeout(request, self.inner.options.call_timeout_duration())
            .await
    }

    pub(crate) async fn execute_with_timeout(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.ensure_open()?;
        match timeout {
            None => self.inner.mux.single(request).await,
            Some(limit) => {
                let context = request.context();
                match tokio::time::timeout(limit, self.inner.mux.single(request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!("Call {} timed out", context);
                        Err(Error::server(
                            context,
                            format!("no response within {}ms", limit.as_millis()),
                        ))
                    }
                }
            }
        }
    }

    /// Issue a streamed request and return a lazy cursor over its batches
    pub fn stream(&self, request: Request) -> Result<ResponseParts> {
        self.stream_with_timeout(request, self.inner.options.call_timeout_duration())
    }

    pub(crate) fn stream_with_timeout(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<ResponseParts> {
        self.ensure_open()?;
        Ok(self.inner.mux.streamed(request)?.with_timeout(timeout))
    }

    /// Commit and close. Only write and schema transactions can commit; the
    /// transaction is closed whether or not the commit succeeds.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_writable("commit")?;
        let outcome = self.execute(Request::Commit).await;
        self.close();
        outcome?.into_unit()
    }

    /// Discard uncommitted writes; the transaction stays open
    pub async fn rollback(&self) -> Result<()> {
        self.ensure_writable("roll back")?;
        self.execute(Request::Rollback).await?.into_unit()
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.inner.transaction_type.is_read() {
            return Err(Error::IllegalOperation(format!(
                "cannot {} a read transaction",
                operation
            )));
        }
        self.ensure_open()
    }

    /// Register a callback to run once when the transaction closes; it
    /// receives the failure cause if the stream failed. On an already
    /// closed transaction the callback runs immediately.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(Option<Error>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.open {
            state.callbacks.push(Box::new(callback));
        } else {
            let cause = state.cause.clone();
            drop(state);
            callback(cause);
        }
    }

    /// Close the transaction, cancelling every pending call. Idempotent.
    pub fn close(&self) {
        self.inner.terminate(None);
    }

    pub fn concepts(&self) -> ConceptManager {
        ConceptManager::new(self.clone())
    }

    pub fn query(&self) -> QueryManager {
        QueryManager::new(self.clone())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("type", &self.inner.transaction_type)
            .field("open", &self.is_open())
            .finish()
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session management
//!
//! A session binds a database and a session type (data or schema). It
//! spawns transactions, keeps track of the ones still open and closes them
//! all when it closes. Close callbacks run exactly once, in registration
//! order, whether the session is closed by the caller or because the
//! server stopped acknowledging its keep-alive pulses.

use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Options;
use crate::connection::{Database, DatabaseManager, ServerStub};
use crate::error::{Error, ErrorKind, Result};
use crate::transaction::Transaction;

pub use crate::protocol::{SessionId, SessionType, TransactionType};

type CloseCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

struct SessionState {
    lifecycle: Lifecycle,
    transactions: HashMap<u64, Transaction>,
    callbacks: Vec<CloseCallback>,
}

pub(crate) struct SessionInner {
    id: SessionId,
    database: Database,
    session_type: SessionType,
    options: Options,
    stub: Arc<dyn ServerStub>,
    state: Mutex<SessionState>,
    pulse: Mutex<Option<JoinHandle<()>>>,
    next_transaction: AtomicU64,
    // Flips to true once every transaction is closed
    closed: watch::Sender<bool>,
}

impl SessionInner {
    fn is_open(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Open
    }

    pub(crate) fn unregister(&self, transaction_id: u64) {
        self.state.lock().transactions.remove(&transaction_id);
    }

    /// Close the session. `lost` means the server already forgot it, so it
    /// is not told about the close; it also means we are running on the
    /// pulse task itself, which must not be aborted mid-close.
    ///
    /// A caller arriving while another close is in progress waits until
    /// that close has shut every transaction down.
    async fn shutdown(&self, lost: bool) {
        let transactions = {
            let mut state = self.state.lock();
            match state.lifecycle {
                Lifecycle::Open => {
                    state.lifecycle = Lifecycle::Closing;
                    Some(std::mem::take(&mut state.transactions))
                }
                Lifecycle::Closing => None,
                Lifecycle::Closed => return,
            }
        };
        let Some(transactions) = transactions else {
            // `wait_for` also sees a close that finished before subscribing
            let mut closed = self.closed.subscribe();
            let _ = closed.wait_for(|closed| *closed).await;
            return;
        };

        // Each transaction closes independently of the others
        for (_, transaction) in transactions {
            transaction.close();
        }

        if let Some(pulse) = self.pulse.lock().take() {
            if !lost {
                pulse.abort();
            }
        }

        let callbacks = {
            let mut state = self.state.lock();
            state.lifecycle = Lifecycle::Closed;
            std::mem::take(&mut state.callbacks)
        };
        self.closed.send_replace(true);

        if !lost {
            if let Err(e) = self.stub.session_close(self.id).await {
                warn!("Failed to close session {} on the server: {}", self.id, e);
            }
        }
        info!("Closed {} session {} on '{}'", self.session_type, self.id, self.database);

        for callback in callbacks {
            callback();
        }
    }
}

/// Handle to an open (or closed) session; cheap to clone
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Resolve `database` and open a session of `session_type` on it.
    ///
    /// With a `pulse_interval` the session pings the server periodically
    /// and closes itself once the server stops recognising it.
    pub async fn open(
        databases: &DatabaseManager,
        database: &str,
        session_type: SessionType,
        options: Options,
        pulse_interval: Option<Duration>,
    ) -> Result<Session> {
        let database = databases.get(database).await?;
        let stub = Arc::clone(databases.stub());
        let id = stub
            .session_open(database.name(), session_type, &options)
            .await?;
        info!("Opened {} session {} on '{}'", session_type, id, database);

        let session = Session {
            inner: Arc::new(SessionInner {
                id,
                database,
                session_type,
                options,
                stub,
                state: Mutex::new(SessionState {
                    lifecycle: Lifecycle::Open,
                    transactions: HashMap::new(),
                    callbacks: Vec::new(),
                }),
                pulse: Mutex::new(None),
                next_transaction: AtomicU64::new(0),
                closed: watch::channel(false).0,
            }),
        };

        if let Some(interval) = pulse_interval {
            session.start_pulse(interval);
        }
        Ok(session)
    }

    fn start_pulse(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.is_open() {
                    return;
                }

                let alive = match inner.stub.session_pulse(inner.id).await {
                    Ok(alive) => alive,
                    Err(e) if e.kind() == ErrorKind::Connectivity => {
                        warn!("Session {} lost its connection: {}", inner.id, e);
                        false
                    }
                    Err(e) => {
                        warn!("Session {} pulse failed: {}", inner.id, e);
                        true
                    }
                };

                if !alive {
                    warn!("Session {} is no longer alive on the server", inner.id);
                    inner.shutdown(true).await;
                    return;
                }
            }
        });
        *self.inner.pulse.lock() = Some(handle);
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    pub fn session_type(&self) -> SessionType {
        self.inner.session_type
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Number of transactions opened by this session that are still open
    pub fn open_transactions(&self) -> usize {
        self.inner.state.lock().transactions.len()
    }

    /// Open a transaction; `options` are layered over the session's options
    pub async fn transaction(
        &self,
        transaction_type: TransactionType,
        options: Options,
    ) -> Result<Transaction> {
        if !self.is_open() {
            return Err(Error::SessionClosed);
        }

        let options = self.inner.options.merged_with(&options);
        let transaction = Transaction::open(self, transaction_type, options).await?;

        let mut state = self.inner.state.lock();
        if state.lifecycle != Lifecycle::Open {
            drop(state);
            transaction.close();
            return Err(Error::SessionClosed);
        }
        if transaction.is_open() {
            state.transactions.insert(transaction.id(), transaction.clone());
        }
        Ok(transaction)
    }

    /// Register a callback to run once when the session closes. On an
    /// already closed session the callback runs immediately.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.lifecycle == Lifecycle::Closed {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Close every open transaction, then the session itself. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown(false).await;
    }

    pub(crate) fn stub(&self) -> &Arc<dyn ServerStub> {
        &self.inner.stub
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.inner.next_transaction.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("database", &self.inner.database.name())
            .field("type", &self.inner.session_type)
            .field("open", &self.is_open())
            .finish()
    }
}

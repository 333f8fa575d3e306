// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Integration tests for transaction streams against the in-memory server
//!
//! Covers request multiplexing under reordered replies, stream pagination,
//! and how closing a transaction or session (or losing the stream) resolves
//! outstanding work.

#![cfg(feature = "memory")]

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use graphlink::{
    Error, ErrorKind, MemoryServer, Options, SessionType, TransactionType, TypeConcept,
};

use common::{open, setup, setup_with_pulse};

#[tokio::test]
async fn test_concurrent_calls_receive_their_own_responses() {
    let server = MemoryServer::new().with_jitter(Duration::from_millis(30));
    let client = setup(&server).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    for i in 0..16 {
        tx.concepts()
            .put_entity_type(&format!("type{}", i))
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let tx = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    let mut handles = Vec::new();
    for i in 0..16 {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("type{}", i);
            let found = tx.concepts().get_entity_type(&name).await.unwrap();
            (name, found)
        }));
    }
    for handle in handles {
        let (name, found) = handle.await.unwrap();
        assert_eq!(found.unwrap().label().name(), name);
    }
    assert_eq!(tx.pending_calls(), 0);
    session.close().await;
}

#[tokio::test]
async fn test_stream_pages_through_all_items() {
    let server = MemoryServer::new().with_prefetch_size(2);
    let client = setup(&server).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    for i in 0..5 {
        tx.concepts()
            .put_entity_type(&format!("animal{}", i))
            .await
            .unwrap();
    }

    let root = tx.concepts().get_root_entity_type();
    let mut subtypes = root.as_remote(&tx).get_subtypes().unwrap();
    let mut labels = Vec::new();
    while let Some(item) = subtypes.next().await {
        labels.push(item.unwrap().label().name().to_string());
    }
    // The root itself plus five subtypes, over three pages
    assert_eq!(labels.len(), 6);
    assert!(labels.contains(&"entity".to_string()));

    let received = server.requests_received();
    assert!(subtypes.next().await.is_none());
    assert!(subtypes.next().await.is_none());
    assert_eq!(server.requests_received(), received);

    session.close().await;
}

#[tokio::test]
async fn test_query_prefetch_size_overrides_transaction() {
    let server = MemoryServer::new().with_query_handler(|_, _| {
        Ok(graphlink::QueryReply::ConceptMaps(vec![
            Default::default();
            7
        ]))
    });
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let before = server.requests_received();
    let maps = tx
        .query()
        .match_with("match $x isa thing;", &Options::new().prefetch_size(3))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(maps.len(), 7);
    assert!(maps.iter().all(|m| m.is_empty()));
    // The query plus two continuations
    assert_eq!(server.requests_received() - before, 3);

    session.close().await;
}

#[tokio::test]
async fn test_empty_stream_finishes_immediately() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let root = tx.concepts().get_root_entity_type();
    let instances = root.as_remote(&tx).get_instances().unwrap().collect().await.unwrap();
    assert!(instances.is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_close_resolves_pending_calls() {
    let server = MemoryServer::new().with_jitter(Duration::from_secs(60));
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            tx.concepts().get_thing_type("person").await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tx.pending_calls(), 8);

    let started = Instant::now();
    tx.close();
    let mut closed = 0;
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_transaction_closed(), "unexpected error: {}", err);
        closed += 1;
    }
    assert_eq!(closed, 8);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(tx.pending_calls(), 0);

    // Later calls fail locally without reaching the server
    tokio::time::sleep(Duration::from_millis(20)).await;
    let received = server.requests_received();
    let err = tx.concepts().get_thing_type("person").await.unwrap_err();
    assert!(err.is_transaction_closed());
    assert!(tx.query().match_("match $x isa thing;").is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.requests_received(), received);

    session.close().await;
}

#[tokio::test]
async fn test_session_close_cascades_to_transactions() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let session = client
        .session("ex", SessionType::Data, Options::new())
        .await
        .unwrap();

    let closed = Arc::new(AtomicUsize::new(0));
    let mut transactions = Vec::new();
    for transaction_type in [TransactionType::Read, TransactionType::Write, TransactionType::Read] {
        let tx = session
            .transaction(transaction_type, Options::new())
            .await
            .unwrap();
        let counter = Arc::clone(&closed);
        tx.on_close(move |cause| {
            assert!(cause.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        transactions.push(tx);
    }
    assert_eq!(session.open_transactions(), 3);

    let session_closed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&session_closed);
    session.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.close().await;
    session.close().await;

    assert!(!session.is_open());
    assert!(transactions.iter().all(|tx| !tx.is_open()));
    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert_eq!(session_closed.load(Ordering::SeqCst), 1);
    assert_eq!(session.open_transactions(), 0);
    assert_eq!(server.open_sessions(), 0);

    let err = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::SessionClosed);

    // Registered after close: runs straight away
    let late = Arc::clone(&session_closed);
    session.on_close(move || {
        late.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(session_closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_session_close_waits_for_transactions() {
    let server = MemoryServer::new();
    let client = setup(&server).await;

    for _ in 0..20 {
        let session = client
            .session("ex", SessionType::Data, Options::new())
            .await
            .unwrap();
        let mut transactions = Vec::new();
        for _ in 0..20 {
            transactions.push(
                session
                    .transaction(TransactionType::Read, Options::new())
                    .await
                    .unwrap(),
            );
        }
        let transactions = Arc::new(transactions);

        let closers: Vec<_> = (0..2)
            .map(|_| {
                let session = session.clone();
                let transactions = Arc::clone(&transactions);
                tokio::spawn(async move {
                    session.close().await;
                    transactions.iter().all(|tx| !tx.is_open())
                })
            })
            .collect();
        for closer in closers {
            assert!(closer.await.unwrap());
        }
        assert!(!session.is_open());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_opened_during_client_close_are_closed() {
    for _ in 0..20 {
        let server = MemoryServer::new();
        let client = setup(&server).await;
        let openers: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .session("ex", SessionType::Data, Options::new())
                        .await
                })
            })
            .collect();
        client.close().await;

        for opener in openers {
            match opener.await.unwrap() {
                Ok(session) => assert!(!session.is_open()),
                Err(e) => assert_eq!(e.kind(), ErrorKind::Connectivity),
            }
        }
        assert_eq!(server.open_sessions(), 0);
    }
}

#[tokio::test]
async fn test_abandoned_stream_pages_are_released_with_transaction() {
    let server = MemoryServer::new().with_prefetch_size(1);
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    for i in 0..4 {
        tx.concepts()
            .put_entity_type(&format!("animal{}", i))
            .await
            .unwrap();
    }

    let root = tx.concepts().get_root_entity_type();
    let mut subtypes = root.as_remote(&tx).get_subtypes().unwrap();
    assert!(subtypes.next().await.unwrap().is_ok());
    drop(subtypes);
    assert_eq!(server.paused_streams(), 1);

    tx.close();
    let started = Instant::now();
    while server.paused_streams() > 0 {
        assert!(started.elapsed() < Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // A commit releases them too
    let tx = session
        .transaction(TransactionType::Schema, Options::new())
        .await
        .unwrap();
    let root = tx.concepts().get_root_entity_type();
    let mut subtypes = root.as_remote(&tx).get_subtypes().unwrap();
    assert!(subtypes.next().await.unwrap().is_ok());
    drop(subtypes);
    assert_eq!(server.paused_streams(), 1);
    tx.commit().await.unwrap();
    assert_eq!(server.paused_streams(), 0);

    session.close().await;
}

#[tokio::test]
async fn test_only_one_schema_transaction_per_database() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, first) = open(&client, SessionType::Schema, TransactionType::Schema).await;

    let err = session
        .transaction(TransactionType::Schema, Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);

    first.commit().await.unwrap();
    let second = session
        .transaction(TransactionType::Schema, Options::new())
        .await
        .unwrap();
    assert!(second.is_open());
    session.close().await;
}

#[tokio::test]
async fn test_schema_transaction_needs_schema_session() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let session = client
        .session("ex", SessionType::Data, Options::new())
        .await
        .unwrap();

    let err = session
        .transaction(TransactionType::Schema, Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(session.open_transactions(), 0);
    session.close().await;
}

#[tokio::test]
async fn test_read_transaction_rejects_writes() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, Error::IllegalOperation(_)));
    let err = tx.rollback().await.unwrap_err();
    assert!(matches!(err, Error::IllegalOperation(_)));
    assert!(tx.is_open());

    let err = tx.concepts().put_entity_type("person").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(tx.is_open());

    session.close().await;
}

#[tokio::test]
async fn test_rollback_discards_uncommitted_writes() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Write).await;

    tx.concepts().put_entity_type("person").await.unwrap();
    assert!(tx.concepts().get_entity_type("person").await.unwrap().is_some());
    tx.rollback().await.unwrap();
    assert!(tx.is_open());
    assert!(tx.concepts().get_entity_type("person").await.unwrap().is_none());

    session.close().await;
}

#[tokio::test]
async fn test_commit_closes_transaction() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Write).await;

    tx.concepts().put_entity_type("person").await.unwrap();
    tx.commit().await.unwrap();
    assert!(!tx.is_open());
    assert!(tx.commit().await.unwrap_err().is_transaction_closed());

    let tx = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    assert!(tx.concepts().get_entity_type("person").await.unwrap().is_some());
    session.close().await;
}

#[tokio::test]
async fn test_stream_failure_closes_transaction_with_cause() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let cause: Arc<Mutex<Option<Option<Error>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&cause);
    tx.on_close(move |c| {
        *slot.lock() = Some(c);
    });

    server.fail_transactions("network unreachable");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!tx.is_open());
    let recorded = cause.lock().clone();
    assert_eq!(
        recorded,
        Some(Some(Error::Connection("network unreachable".to_string())))
    );
    assert_eq!(session.open_transactions(), 0);

    match tx.concepts().get_thing_type("person").await.unwrap_err() {
        Error::TransactionClosed { cause: Some(cause) } => {
            assert_eq!(cause.kind(), ErrorKind::Connectivity)
        }
        other => panic!("unexpected error: {}", other),
    }
    session.close().await;
}

#[tokio::test]
async fn test_expired_session_closes_itself() {
    let server = MemoryServer::new();
    let client = setup_with_pulse(&server, Some(Duration::from_millis(20))).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let closed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closed);
    session.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Still alive while the server acknowledges pulses
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(session.is_open());

    server.expire_sessions();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.is_open());
    assert!(!tx.is_open());
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    session.close().await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_call_timeout_fails_only_that_call() {
    let server = MemoryServer::new().with_jitter(Duration::from_secs(10));
    let client = setup(&server).await;
    let session = client
        .session("ex", SessionType::Data, Options::new())
        .await
        .unwrap();
    let tx = session
        .transaction(
            TransactionType::Read,
            Options::new().call_timeout(Duration::from_millis(1)),
        )
        .await
        .unwrap();

    let err = tx.concepts().get_thing_type("person").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(tx.is_open());
    assert_eq!(tx.pending_calls(), 0);
    session.close().await;
}

#[tokio::test]
async fn test_client_close_closes_sessions() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    client.close().await;
    assert!(!client.is_open());
    assert!(!session.is_open());
    assert!(!tx.is_open());
    let err = client
        .session("ex", SessionType::Data, Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Integration tests for schema and data operations through concept
//! snapshots and their remote views

#![cfg(feature = "memory")]

mod common;

use std::time::Duration;

use graphlink::protocol::{ConceptMapRecord, ConceptRecord, NumericRecord, QueryKind};
use graphlink::{
    Annotation, EntityType, Error, ErrorKind, MemoryServer, Numeric, Options, QueryReply,
    SessionType, ThingConcept, TransactionType, TypeConcept, TypeKind, Value, ValueType,
};

use common::{define_person, open, setup};

#[tokio::test]
async fn test_person_with_key_name() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Read).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let name = tx.concepts().get_attribute_type("name").await.unwrap().unwrap();
    assert_eq!(name.value_type(), ValueType::String);

    let remote = person.as_remote(&tx);
    let owns = remote.get_owns(None, &[]).unwrap().collect().await.unwrap();
    assert_eq!(owns, vec![name.clone()]);
    let keys = remote
        .get_owns(None, &[Annotation::Key])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert!(remote
        .get_owns(Some(ValueType::Long), &[])
        .unwrap()
        .collect()
        .await
        .unwrap()
        .is_empty());
    assert_eq!(remote.get_owns_overridden(&name).await.unwrap(), None);

    let syntax = remote.get_syntax().await.unwrap();
    assert_eq!(syntax, "person sub entity, owns name @key;");
    let schema = session.database().schema().await.unwrap();
    assert!(schema.contains("person sub entity, owns name @key;"));

    let owners = name
        .as_remote(&tx)
        .get_owners(&[Annotation::Key])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].label().name(), "person");
    session.close().await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let alice = person.as_remote(&tx).create().await.unwrap();
    let alice_name = name.as_remote(&tx).put("alice").await.unwrap();
    alice.as_remote(&tx).set_has(&alice_name).await.unwrap();

    let has = alice
        .as_remote(&tx)
        .get_has(&[], &[])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(has.len(), 1);
    assert_eq!(has[0].value(), &Value::String("alice".to_string()));

    // A key is owned at most once per owner
    let other = name.as_remote(&tx).put("alicia").await.unwrap();
    let err = alice.as_remote(&tx).set_has(&other).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    tx.commit().await.unwrap();

    let tx = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    let found = tx.concepts().get_entity(alice.iid().as_bytes()).await.unwrap();
    assert_eq!(found.as_ref().map(|e| e.iid()), Some(alice.iid()));
    let owners = alice_name
        .as_remote(&tx)
        .get_owners(None)
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].iid(), alice.iid());
    session.close().await;
}

#[tokio::test]
async fn test_remote_view_of_closed_transaction_fails_locally() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Read).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let remote = person.as_remote(&tx);
    tx.close();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let received = server.requests_received();
    assert!(remote.get_supertype().await.unwrap_err().is_transaction_closed());
    assert!(remote
        .get_owns(None, &[])
        .err()
        .unwrap()
        .is_transaction_closed());
    assert!(remote.is_deleted().await.unwrap_err().is_transaction_closed());
    assert_eq!(server.requests_received(), received);

    session.close().await;
}

#[tokio::test]
async fn test_uncommitted_ownership_is_not_durable() {
    let server = MemoryServer::new();
    let client = setup(&server).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    tx.concepts().put_entity_type("person").await.unwrap();
    tx.concepts()
        .put_attribute_type("name", ValueType::String)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    session.close().await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let name = tx.concepts().get_attribute_type("name").await.unwrap().unwrap();
    person.as_remote(&tx).set_owns(&name, None, &[]).await.unwrap();
    let owns = person
        .as_remote(&tx)
        .get_owns(None, &[])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert!(owns.iter().any(|t| t.label().name() == "name"));
    tx.close();

    let tx = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    let owns = person
        .as_remote(&tx)
        .get_owns(None, &[])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert!(owns.iter().all(|t| t.label().name() != "name"));
    session.close().await;
}

#[tokio::test]
async fn test_deleted_type_is_seen_by_later_transactions() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let session = client
        .session("ex", SessionType::Schema, Options::new())
        .await
        .unwrap();
    let reader = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    let person = reader
        .concepts()
        .get_entity_type("person")
        .await
        .unwrap()
        .unwrap();

    let writer = session
        .transaction(TransactionType::Schema, Options::new())
        .await
        .unwrap();
    person.as_remote(&writer).delete().await.unwrap();
    writer.commit().await.unwrap();

    // The reader keeps the view it opened with
    assert!(!person.as_remote(&reader).is_deleted().await.unwrap());

    let later = session
        .transaction(TransactionType::Read, Options::new())
        .await
        .unwrap();
    assert!(person.as_remote(&later).is_deleted().await.unwrap());
    session.close().await;
}

#[tokio::test]
async fn test_set_label_updates_snapshot() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let mut remote = person.as_remote(&tx);
    remote.set_label("human").await.unwrap();
    assert_eq!(remote.label().name(), "human");
    assert!(!remote.is_deleted().await.unwrap());
    assert!(tx.concepts().get_entity_type("person").await.unwrap().is_none());

    let err = remote.set_label("").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    session.close().await;
}

#[tokio::test]
async fn test_type_hierarchy() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;

    let animal = tx.concepts().put_entity_type("animal").await.unwrap();
    let dog = tx.concepts().put_entity_type("dog").await.unwrap();
    animal.as_remote(&tx).set_abstract().await.unwrap();
    dog.as_remote(&tx).set_supertype(&animal).await.unwrap();

    let supertype = dog.as_remote(&tx).get_supertype().await.unwrap().unwrap();
    assert_eq!(supertype.label().name(), "animal");
    let supertypes = dog
        .as_remote(&tx)
        .get_supertypes()
        .unwrap()
        .collect()
        .await
        .unwrap();
    let names: Vec<&str> = supertypes.iter().map(|t| t.label().name()).collect();
    assert_eq!(names, vec!["animal", "entity", "thing"]);

    let explicit = tx
        .concepts()
        .get_root_entity_type()
        .as_remote(&tx)
        .get_subtypes_explicit()
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(explicit.len(), 1);
    assert_eq!(explicit[0].label().name(), "animal");

    // Abstract types have no instances
    assert!(animal.as_remote(&tx).create().await.is_err());
    let rex = dog.as_remote(&tx).create().await.unwrap();
    let instances = animal
        .as_remote(&tx)
        .get_instances()
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].iid(), rex.iid());
    assert!(animal
        .as_remote(&tx)
        .get_instances_explicit()
        .unwrap()
        .collect()
        .await
        .unwrap()
        .is_empty());

    let root = tx.concepts().get_root_thing_type();
    assert!(root.is_root() && root.is_abstract());
    assert!(root.as_remote(&tx).get_supertype().await.unwrap().is_none());
    session.close().await;
}

#[tokio::test]
async fn test_relations_and_roles() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let employment = tx.concepts().put_relation_type("employment").await.unwrap();
    let remote = employment.as_remote(&tx);
    remote.set_relates("employee", None).await.unwrap();
    remote.set_relates("employer", None).await.unwrap();

    let employee = remote
        .get_relates_for_role_label("employee")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(employee.label().scope(), Some("employment"));
    assert!(remote
        .get_relates_for_role_label("manager")
        .await
        .unwrap()
        .is_none());
    assert_eq!(remote.get_relates().unwrap().collect().await.unwrap().len(), 2);

    let relation_type = employee
        .as_remote(&tx)
        .get_relation_type()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relation_type, employment);

    person.as_remote(&tx).set_plays(&employee, None).await.unwrap();
    let players = employee
        .as_remote(&tx)
        .get_player_types()
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].label().name(), "person");
    assert_eq!(
        person.as_remote(&tx).get_plays_overridden(&employee).await.unwrap(),
        None
    );
    tx.commit().await.unwrap();
    session.close().await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let job = employment.as_remote(&tx).create().await.unwrap();
    let bob = person.as_remote(&tx).create().await.unwrap();
    job.as_remote(&tx).add_player(&employee, &bob).await.unwrap();

    let players = job
        .as_remote(&tx)
        .get_players(&[])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].iid(), bob.iid());

    let relations = bob
        .as_remote(&tx)
        .get_relations(&[employee.clone()])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(relations.len(), 1);
    let playing = bob.as_remote(&tx).get_playing().unwrap().collect().await.unwrap();
    assert_eq!(playing, vec![employee.clone()]);

    job.as_remote(&tx).remove_player(&employee, &bob).await.unwrap();
    assert!(job
        .as_remote(&tx)
        .get_players(&[])
        .unwrap()
        .collect()
        .await
        .unwrap()
        .is_empty());

    bob.as_remote(&tx).delete().await.unwrap();
    assert!(bob.as_remote(&tx).is_deleted().await.unwrap());
    session.close().await;
}

#[tokio::test]
async fn test_attribute_values_are_checked_locally() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let name = tx.concepts().get_attribute_type("name").await.unwrap().unwrap();

    let received = server.requests_received();
    let err = name.as_remote(&tx).put(42i64).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = name.as_remote(&tx).get(true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(server.requests_received(), received);

    let first = name.as_remote(&tx).put("carol").await.unwrap();
    let second = name.as_remote(&tx).put("carol").await.unwrap();
    assert_eq!(first.iid(), second.iid());
    let found = name.as_remote(&tx).get("carol").await.unwrap().unwrap();
    assert_eq!(found.iid(), first.iid());
    assert!(name.as_remote(&tx).get("dave").await.unwrap().is_none());
    session.close().await;
}

#[tokio::test]
async fn test_regex_constraints() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;

    let age = tx
        .concepts()
        .put_attribute_type("age", ValueType::Long)
        .await
        .unwrap();
    let err = age.as_remote(&tx).set_regex("[0-9]+").await.unwrap_err();
    assert!(matches!(err, Error::IllegalOperation(_)));

    let code = tx
        .concepts()
        .put_attribute_type("code", ValueType::String)
        .await
        .unwrap();
    let remote = code.as_remote(&tx);
    assert_eq!(remote.get_regex().await.unwrap(), None);
    remote.set_regex("[a-z]+").await.unwrap();
    assert_eq!(remote.get_regex().await.unwrap(), Some("[a-z]+".to_string()));

    remote.put("abc").await.unwrap();
    let err = remote.put("ABC1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);

    let err = remote.set_regex("[unclosed").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    session.close().await;
}

#[tokio::test]
async fn test_manager_rejects_bad_arguments() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;

    let received = server.requests_received();
    let err = tx
        .concepts()
        .put_attribute_type("thing_value", ValueType::Object)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(matches!(
        tx.concepts().get_thing_type("  ").await.unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        tx.concepts().get_thing(&[]).await.unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert_eq!(server.requests_received(), received);

    // Same label, different kind
    tx.concepts().put_entity_type("person").await.unwrap();
    let err = tx.concepts().put_relation_type("person").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    session.close().await;
}

#[tokio::test]
async fn test_queries_go_through_the_handler() {
    let root_entity = EntityType::new(TypeKind::Entity.root_label(), true, true);
    let server = MemoryServer::new().with_query_handler(move |kind, query| match kind {
        QueryKind::Define | QueryKind::Undefine | QueryKind::Delete => Ok(QueryReply::Done),
        QueryKind::MatchAggregate => Ok(QueryReply::Numeric(NumericRecord::Long(2))),
        QueryKind::Match | QueryKind::Insert | QueryKind::Update => {
            if query.contains("nothing") {
                return Ok(QueryReply::Done);
            }
            let answer = ConceptMapRecord {
                entries: vec![(
                    "x".to_string(),
                    ConceptRecord::Type(root_entity.to_record()),
                )],
            };
            Ok(QueryReply::ConceptMaps(vec![answer; 2]))
        }
    });
    let client = setup(&server).await;

    let (session, tx) = open(&client, SessionType::Schema, TransactionType::Schema).await;
    tx.query().define("define person sub entity;").await.unwrap();
    let err = tx.query().define("   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    tx.commit().await.unwrap();
    session.close().await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let err = tx.query().define("define person sub entity;").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);

    let answers = tx
        .query()
        .match_("match $x sub entity;")
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(answers.len(), 2);
    let concept = answers[0].get("x").unwrap();
    assert_eq!(concept.as_type().unwrap().label().name(), "entity");

    assert!(tx
        .query()
        .insert("insert nothing;")
        .unwrap()
        .collect()
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        tx.query().match_aggregate("match $x isa person; count;").await.unwrap(),
        Numeric::Long(2)
    );
    tx.query().delete("match $x isa person; delete $x;").await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_queries_fail_without_handler() {
    let server = MemoryServer::new();
    let client = setup(&server).await;
    let (session, tx) = open(&client, SessionType::Data, TransactionType::Read).await;

    let mut answers = tx.query().match_("match $x isa thing;").unwrap();
    let err = answers.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(answers.next().await.is_none());
    assert!(tx.is_open());
    session.close().await;
}

#[tokio::test]
async fn test_jittered_schema_writes() {
    let server = MemoryServer::new().with_jitter(Duration::from_millis(10));
    let client = setup(&server).await;
    define_person(&client).await;

    let (session, tx) = open(&client, SessionType::Data, TransactionType::Write).await;
    let person = tx.concepts().get_entity_type("person").await.unwrap().unwrap();
    let remote = person.as_remote(&tx);
    for _ in 0..5 {
        remote.create().await.unwrap();
    }
    let instances = remote.get_instances().unwrap().collect().await.unwrap();
    assert_eq!(instances.len(), 5);
    assert!(instances.iter().all(|t| t.type_of().label().name() == "person"));
    assert!(instances.iter().all(|t| !t.is_inferred()));
    session.close().await;
}

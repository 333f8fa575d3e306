// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Server side of one transaction stream
//!
//! Requests are applied in arrival order to a private snapshot of the
//! database graph. Single-shot replies other than transaction control may be
//! delayed by a random jitter so they overtake each other. Stream pages are
//! sent one at a time and the rest waits for a `Continue` from the client.

use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::error::{MemoryError, MemoryResult};
use super::graph::Graph;
use super::{QueryHandler, QueryReply, ServerState};
use crate::concept::{Label, TypeKind, Value, ValueType};
use crate::config::Options;
use crate::error::Result;
use crate::protocol::{
    ConceptManagerRequest, ConceptMapRecord, QueryKind, Request, RequestEnvelope, RequestId,
    Response, ResponseEnvelope, ResponsePart, SessionId, SessionType, StreamState, ThingRecord,
    ThingRequest, TransactionType, TypeRecord, TypeRequest, ValueRecord,
};

enum Batch {
    Types(Vec<TypeRecord>),
    Things(Vec<ThingRecord>),
    ConceptMaps(Vec<ConceptMapRecord>),
}

fn pages<T>(
    items: Vec<T>,
    size: usize,
    wrap: fn(Vec<T>) -> ResponsePart,
) -> VecDeque<ResponsePart> {
    let mut pages = VecDeque::new();
    let mut items = items.into_iter();
    loop {
        let page: Vec<T> = items.by_ref().take(size.max(1)).collect();
        if page.is_empty() {
            return pages;
        }
        pages.push_back(wrap(page));
    }
}

impl Batch {
    fn paginate(self, size: usize) -> VecDeque<ResponsePart> {
        match self {
            Batch::Types(items) => pages(items, size, ResponsePart::Types),
            Batch::Things(items) => pages(items, size, ResponsePart::Things),
            Batch::ConceptMaps(items) => pages(items, size, ResponsePart::ConceptMaps),
        }
    }
}

enum Reply {
    Single(Response),
    Stream(Batch),
}

fn unit() -> Reply {
    Reply::Single(Response::Unit)
}

fn types(records: Vec<TypeRecord>) -> Reply {
    Reply::Stream(Batch::Types(records))
}

fn things(records: Vec<ThingRecord>) -> Reply {
    Reply::Stream(Batch::Things(records))
}

/// Operation name of requests that change the graph
fn write_operation(request: &Request) -> Option<&'static str> {
    let writes = match request {
        Request::ConceptManager(request) => !matches!(
            request,
            ConceptManagerRequest::GetThingType { .. } | ConceptManagerRequest::GetThing { .. }
        ),
        Request::Type { request, .. } => matches!(
            request,
            TypeRequest::Delete
                | TypeRequest::SetLabel { .. }
                | TypeRequest::SetSupertype { .. }
                | TypeRequest::SetAbstract
                | TypeRequest::UnsetAbstract
                | TypeRequest::SetOwns { .. }
                | TypeRequest::UnsetOwns { .. }
                | TypeRequest::SetPlays { .. }
                | TypeRequest::UnsetPlays { .. }
                | TypeRequest::EntityTypeCreate
                | TypeRequest::RelationTypeCreate
                | TypeRequest::RelationTypeSetRelates { .. }
                | TypeRequest::RelationTypeUnsetRelates { .. }
                | TypeRequest::AttributeTypePut { .. }
                | TypeRequest::AttributeTypeSetRegex { .. }
        ),
        Request::Thing { request, .. } => matches!(
            request,
            ThingRequest::Delete
                | ThingRequest::SetHas { .. }
                | ThingRequest::UnsetHas { .. }
                | ThingRequest::RelationAddPlayer { .. }
                | ThingRequest::RelationRemovePlayer { .. }
        ),
        Request::Query { kind, .. } => {
            !matches!(kind, QueryKind::Match | QueryKind::MatchAggregate)
        }
        Request::Commit | Request::Rollback => true,
        Request::Open { .. } | Request::Continue => false,
    };
    writes.then(|| request.context().operation)
}

fn decode_value(record: &ValueRecord) -> MemoryResult<Value> {
    Value::decode(record).map_err(|e| MemoryError::InvalidData(e.to_string()))
}

struct OpenTransaction {
    database: String,
    transaction_type: TransactionType,
    graph: Graph,
    prefetch_size: usize,
    finished: bool,
}

impl OpenTransaction {
    fn apply(&mut self, request: Request, handler: Option<QueryHandler>) -> MemoryResult<Reply> {
        match request {
            Request::ConceptManager(request) => self.concept_manager(request),
            Request::Type { label, request } => self.type_request(&label, request),
            Request::Thing { iid, request } => self.thing_request(&iid, request),
            Request::Query { kind, query, .. } => self.query(kind, &query, handler),
            other => Err(MemoryError::Transaction(format!(
                "unexpected request {}",
                other.context().operation
            ))),
        }
    }

    fn concept_manager(&mut self, request: ConceptManagerRequest) -> MemoryResult<Reply> {
        let graph = &mut self.graph;
        let response = match request {
            ConceptManagerRequest::GetThingType { label } => {
                Response::Type(graph.get_thing_type(&label))
            }
            ConceptManagerRequest::GetThing { iid } => Response::Thing(graph.get_thing(&iid)?),
            ConceptManagerRequest::PutEntityType { label } => Response::Type(Some(
                graph.put_type(&label, TypeKind::Entity, ValueType::Object)?,
            )),
            ConceptManagerRequest::PutRelationType { label } => Response::Type(Some(
                graph.put_type(&label, TypeKind::Relation, ValueType::Object)?,
            )),
            ConceptManagerRequest::PutAttributeType { label, value_type } => Response::Type(
                Some(graph.put_type(&label, TypeKind::Attribute, value_type)?),
            ),
        };
        Ok(Reply::Single(response))
    }

    fn type_request(&mut self, label: &Label, request: TypeRequest) -> MemoryResult<Reply> {
        let graph = &mut self.graph;
        Ok(match request {
            TypeRequest::Delete => {
                graph.delete_type(label)?;
                unit()
            }
            TypeRequest::SetLabel { label: name } => {
                graph.set_label(label, &name)?;
                unit()
            }
            TypeRequest::GetSupertype => Reply::Single(Response::Type(graph.get_supertype(label)?)),
            TypeRequest::SetSupertype { supertype } => {
                graph.set_supertype(label, &supertype)?;
                unit()
            }
            TypeRequest::GetSupertypes => types(graph.get_supertypes(label)?),
            TypeRequest::GetSubtypes => types(graph.get_subtypes(label, false)?),
            TypeRequest::GetSubtypesExplicit => types(graph.get_subtypes(label, true)?),
            TypeRequest::SetAbstract => {
                graph.set_abstract(label, true)?;
                unit()
            }
            TypeRequest::UnsetAbstract => {
                graph.set_abstract(label, false)?;
                unit()
            }
            TypeRequest::GetOwns {
                value_type,
                annotations,
            } => types(graph.get_owns(label, value_type, &annotations, false)?),
            TypeRequest::GetOwnsExplicit {
                value_type,
                annotations,
            } => types(graph.get_owns(label, value_type, &annotations, true)?),
            TypeRequest::GetOwnsOverridden { attribute_type } => Reply::Single(Response::Type(
                graph.get_owns_overridden(label, &attribute_type)?,
            )),
            TypeRequest::SetOwns {
                attribute_type,
                overridden_type,
                annotations,
            } => {
                graph.set_owns(label, &attribute_type, overridden_type.as_ref(), &annotations)?;
                unit()
            }
            TypeRequest::UnsetOwns { attribute_type } => {
                graph.unset_owns(label, &attribute_type)?;
                unit()
            }
            TypeRequest::GetPlays => types(graph.get_plays(label, false)?),
            TypeRequest::GetPlaysExplicit => types(graph.get_plays(label, true)?),
            TypeRequest::GetPlaysOverridden { role_type } => Reply::Single(Response::Type(
                graph.get_plays_overridden(label, &role_type)?,
            )),
            TypeRequest::SetPlays {
                role_type,
                overridden_role_type,
            } => {
                graph.set_plays(label, &role_type, overridden_role_type.as_ref())?;
                unit()
            }
            TypeRequest::UnsetPlays { role_type } => {
                graph.unset_plays(label, &role_type)?;
                unit()
            }
            TypeRequest::GetInstances => things(graph.get_instances(label, false)?),
            TypeRequest::GetInstancesExplicit => things(graph.get_instances(label, true)?),
            TypeRequest::GetSyntax => Reply::Single(Response::Text(graph.get_syntax(label)?)),
            TypeRequest::EntityTypeCreate => Reply::Single(Response::Thing(Some(
                graph.create(label, TypeKind::Entity)?,
            ))),
            TypeRequest::RelationTypeCreate => Reply::Single(Response::Thing(Some(
                graph.create(label, TypeKind::Relation)?,
            ))),
            TypeRequest::RelationTypeGetRelates => types(graph.get_relates(label)?),
            TypeRequest::RelationTypeGetRelatesForRoleLabel { role_label } => Reply::Single(
                Response::Type(graph.get_relates_for_role_label(label, &role_label)?),
            ),
            TypeRequest::RelationTypeSetRelates {
                role_label,
                overridden_label,
            } => {
                graph.set_relates(label, &role_label, overridden_label.as_deref())?;
                unit()
            }
            TypeRequest::RelationTypeUnsetRelates { role_label } => {
                graph.unset_relates(label, &role_label)?;
                unit()
            }
            TypeRequest::AttributeTypePut { value } => Reply::Single(Response::Thing(Some(
                graph.put_attribute(label, decode_value(&value)?)?,
            ))),
            TypeRequest::AttributeTypeGet { value } => Reply::Single(Response::Thing(
                graph.get_attribute(label, &decode_value(&value)?)?,
            )),
            TypeRequest::AttributeTypeGetRegex => {
                Reply::Single(Response::Text(graph.get_regex(label)?))
            }
            TypeRequest::AttributeTypeSetRegex { regex } => {
                graph.set_regex(label, &regex)?;
                unit()
            }
            TypeRequest::AttributeTypeGetOwners { annotations } => {
                types(graph.attribute_owners(label, &annotations)?)
            }
            TypeRequest::RoleTypeGetRelationTypes => types(graph.role_relation_types(label)?),
            TypeRequest::RoleTypeGetPlayerTypes => types(graph.role_player_types(label)?),
            TypeRequest::RoleTypeGetRelationInstances => {
                things(graph.role_relation_instances(label)?)
            }
            TypeRequest::RoleTypeGetPlayerInstances => things(graph.role_player_instances(label)?),
        })
    }

    fn thing_request(&mut self, iid: &[u8], request: ThingRequest) -> MemoryResult<Reply> {
        let graph = &mut self.graph;
        Ok(match request {
            ThingRequest::Delete => {
                graph.delete_thing(iid)?;
                unit()
            }
            ThingRequest::GetHas {
                attribute_types,
                annotations,
            } => things(graph.get_has(iid, &attribute_types, &annotations)?),
            ThingRequest::SetHas { attribute } => {
                graph.set_has(iid, &attribute)?;
                unit()
            }
            ThingRequest::UnsetHas { attribute } => {
                graph.unset_has(iid, &attribute)?;
                unit()
            }
            ThingRequest::GetRelations { role_types } => {
                things(graph.get_relations(iid, &role_types)?)
            }
            ThingRequest::GetPlaying => types(graph.get_playing(iid)?),
            ThingRequest::RelationAddPlayer { role_type, player } => {
                graph.add_player(iid, &role_type, &player)?;
                unit()
            }
            ThingRequest::RelationRemovePlayer { role_type, player } => {
                graph.remove_player(iid, &role_type, &player)?;
                unit()
            }
            ThingRequest::RelationGetPlayers { role_types } => {
                things(graph.get_players(iid, &role_types)?)
            }
            ThingRequest::AttributeGetOwners { owner_type } => {
                things(graph.attribute_owner_things(iid, owner_type.as_ref())?)
            }
        })
    }

    fn query(
        &mut self,
        kind: QueryKind,
        query: &str,
        handler: Option<QueryHandler>,
    ) -> MemoryResult<Reply> {
        if matches!(kind, QueryKind::Define | QueryKind::Undefine)
            && self.transaction_type != TransactionType::Schema
        {
            return Err(MemoryError::Transaction(format!(
                "{} requires a schema transaction",
                kind.operation()
            )));
        }
        let handler = handler
            .ok_or_else(|| MemoryError::Query("no query handler is installed".to_string()))?;
        let reply = handler(kind, query).map_err(MemoryError::Query)?;

        match (kind, reply) {
            (QueryKind::MatchAggregate, QueryReply::Numeric(numeric)) => {
                Ok(Reply::Single(Response::Numeric(numeric)))
            }
            (kind, QueryReply::ConceptMaps(maps)) if kind.is_streamed() => {
                Ok(Reply::Stream(Batch::ConceptMaps(maps)))
            }
            (kind, QueryReply::Done) if kind.is_streamed() => {
                Ok(Reply::Stream(Batch::ConceptMaps(Vec::new())))
            }
            (QueryKind::Define | QueryKind::Undefine | QueryKind::Delete, QueryReply::Done) => {
                Ok(unit())
            }
            (kind, reply) => Err(MemoryError::Query(format!(
                "handler gave a {} answer to {}",
                reply.shape(),
                kind.operation()
            ))),
        }
    }
}

/// Serves one transaction stream.
///
/// Pages a client has not pulled yet stay in `streams` until the client
/// drains them, the transaction commits, or the stream ends. A cursor
/// dropped half way is not reported to the server, so its pages are held
/// until one of those happens.
pub(crate) struct TransactionService {
    id: u64,
    state: Arc<ServerState>,
    responses: mpsc::UnboundedSender<Result<ResponseEnvelope>>,
    open: Option<OpenTransaction>,
    streams: HashMap<RequestId, VecDeque<ResponsePart>>,
}

impl TransactionService {
    pub(crate) fn new(
        id: u64,
        state: Arc<ServerState>,
        responses: mpsc::UnboundedSender<Result<ResponseEnvelope>>,
    ) -> Self {
        Self {
            id,
            state,
            responses,
            open: None,
            streams: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RequestEnvelope>) {
        while let Some(envelope) = requests.recv().await {
            self.state.requests_received.fetch_add(1, Ordering::SeqCst);
            self.handle(envelope);
        }
        self.release_schema_lock();
        self.release_streams();
        self.state.channels.lock().remove(&self.id);
        debug!("Transaction stream {} ended", self.id);
    }

    fn handle(&mut self, envelope: RequestEnvelope) {
        let RequestEnvelope { id, request } = envelope;
        trace!("Stream {} request {}: {}", self.id, id, request.context());
        let query_page_size = match &request {
            Request::Query { options, .. } => options.prefetch_size.map(|size| size as usize),
            _ => None,
        };
        // Transaction control replies are never delayed
        let control = matches!(
            request,
            Request::Open { .. } | Request::Commit | Request::Rollback
        );

        let outcome = match request {
            Request::Continue => return self.send_page(id),
            Request::Open {
                session_id,
                transaction_type,
                options,
            } => self
                .open(session_id, transaction_type, &options)
                .map(|_| unit()),
            Request::Commit => self.commit().map(|_| unit()),
            Request::Rollback => self.rollback().map(|_| unit()),
            other => self.apply(other),
        };

        match outcome {
            Ok(Reply::Single(response)) if control => {
                self.send(ResponseEnvelope::res(id, response))
            }
            Ok(Reply::Single(response)) => self.send_single(ResponseEnvelope::res(id, response)),
            Ok(Reply::Stream(batch)) => {
                let size = query_page_size.unwrap_or_else(|| self.page_size());
                let pages = batch.paginate(size);
                if pages.is_empty() {
                    self.send(ResponseEnvelope::state(id, StreamState::Done));
                } else {
                    if self.streams.insert(id, pages).is_none() {
                        self.state.paused_streams.fetch_add(1, Ordering::SeqCst);
                    }
                    self.send_page(id);
                }
            }
            Err(e) => {
                debug!("Stream {} rejected request {}: {}", self.id, id, e);
                let envelope = ResponseEnvelope::error(id, e.to_string());
                if control {
                    self.send(envelope);
                } else {
                    self.send_single(envelope);
                }
            }
        }
    }

    fn release_streams(&mut self) {
        let released = self.streams.len();
        if released > 0 {
            self.streams.clear();
            self.state.paused_streams.fetch_sub(released, Ordering::SeqCst);
            trace!("Stream {} released {} paused streams", self.id, released);
        }
    }

    fn page_size(&self) -> usize {
        self.open
            .as_ref()
            .map(|tx| tx.prefetch_size)
            .unwrap_or_else(|| self.state.settings.read().prefetch_size)
    }

    fn active(&mut self) -> MemoryResult<&mut OpenTransaction> {
        match self.open.as_mut() {
            Some(tx) if !tx.finished => Ok(tx),
            Some(_) => Err(MemoryError::Transaction(
                "transaction has already been committed".to_string(),
            )),
            None => Err(MemoryError::Transaction(
                "transaction has not been opened".to_string(),
            )),
        }
    }

    fn apply(&mut self, request: Request) -> MemoryResult<Reply> {
        let handler = self.state.settings.read().query_handler.clone();
        let operation = write_operation(&request);
        let tx = self.active()?;
        if let Some(operation) = operation {
            if tx.transaction_type.is_read() {
                return Err(MemoryError::ReadOnly(operation));
            }
        }
        tx.apply(request, handler)
    }

    fn open(
        &mut self,
        session_id: SessionId,
        transaction_type: TransactionType,
        options: &Options,
    ) -> MemoryResult<()> {
        if self.open.is_some() {
            return Err(MemoryError::Transaction(
                "transaction is already open".to_string(),
            ));
        }
        let session = self
            .state
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or(MemoryError::SessionNotFound(session_id))?;
        if transaction_type == TransactionType::Schema
            && session.session_type != SessionType::Schema
        {
            return Err(MemoryError::SchemaSessionRequired);
        }

        let graph = {
            let mut databases = self.state.databases.lock();
            let database = databases
                .get_mut(&session.database)
                .ok_or_else(|| MemoryError::DatabaseNotFound(session.database.clone()))?;
            if transaction_type == TransactionType::Schema {
                match database.schema_lock {
                    Some(holder) if holder != self.id => {
                        return Err(MemoryError::SchemaLocked(session.database.clone()))
                    }
                    _ => database.schema_lock = Some(self.id),
                }
            }
            database.graph.clone()
        };

        let prefetch_size = options
            .prefetch_size
            .map(|size| size as usize)
            .unwrap_or_else(|| self.state.settings.read().prefetch_size);
        debug!(
            "Stream {} opened {} transaction on '{}'",
            self.id, transaction_type, session.database
        );
        self.open = Some(OpenTransaction {
            database: session.database,
            transaction_type,
            graph,
            prefetch_size,
            finished: false,
        });
        Ok(())
    }

    fn commit(&mut self) -> MemoryResult<()> {
        let id = self.id;
        let state = Arc::clone(&self.state);
        let tx = self.active()?;
        if tx.transaction_type.is_read() {
            return Err(MemoryError::ReadOnly("transaction.commit"));
        }
        {
            let mut databases = state.databases.lock();
            let database = databases
                .get_mut(&tx.database)
                .ok_or_else(|| MemoryError::DatabaseNotFound(tx.database.clone()))?;
            database.graph = tx.graph.clone();
        }
        tx.finished = true;
        debug!("Stream {} committed to '{}'", id, tx.database);
        self.release_schema_lock();
        self.release_streams();
        Ok(())
    }

    fn rollback(&mut self) -> MemoryResult<()> {
        let state = Arc::clone(&self.state);
        let tx = self.active()?;
        if tx.transaction_type.is_read() {
            return Err(MemoryError::ReadOnly("transaction.rollback"));
        }
        let databases = state.databases.lock();
        let database = databases
            .get(&tx.database)
            .ok_or_else(|| MemoryError::DatabaseNotFound(tx.database.clone()))?;
        tx.graph = database.graph.clone();
        Ok(())
    }

    fn release_schema_lock(&self) {
        let Some(tx) = &self.open else {
            return;
        };
        if tx.transaction_type != TransactionType::Schema {
            return;
        }
        if let Some(database) = self.state.databases.lock().get_mut(&tx.database) {
            if database.schema_lock == Some(self.id) {
                database.schema_lock = None;
            }
        }
    }

    fn send(&self, envelope: ResponseEnvelope) {
        let _ = self.responses.send(Ok(envelope));
    }

    fn send_single(&self, envelope: ResponseEnvelope) {
        let jitter = self.state.settings.read().jitter;
        match jitter {
            Some(max) if !max.is_zero() => {
                let delay = Duration::from_millis(fastrand::u64(0..=max.as_millis() as u64));
                let responses = self.responses.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = responses.send(Ok(envelope));
                });
            }
            _ => self.send(envelope),
        }
    }

    /// Send the next page of a paused stream, then `Continue` or `Done`
    fn send_page(&mut self, id: RequestId) {
        let next = match self.streams.get_mut(&id) {
            None => None,
            Some(pages) => Some((pages.pop_front(), !pages.is_empty())),
        };
        match next {
            None => {
                let error = MemoryError::UnknownStream(id);
                self.send(ResponseEnvelope::error(id, error.to_string()));
            }
            Some((page, more)) => {
                if let Some(page) = page {
                    self.send(ResponseEnvelope::part(id, page));
                }
                if more {
                    self.send(ResponseEnvelope::state(id, StreamState::Continue));
                } else {
                    if self.streams.remove(&id).is_some() {
                        self.state.paused_streams.fetch_sub(1, Ordering::SeqCst);
                    }
                    self.send(ResponseEnvelope::state(id, StreamState::Done));
                }
            }
        }
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request/response multiplexing over one transaction stream
//!
//! Every logical call gets a fresh [`RequestId`] and an entry in the call
//! table. Inbound envelopes are routed to their entry by a single dispatcher
//! task; it is the only code that resolves entries, so no call can observe
//! another call's payload.
//!
//! A fatal failure (transport error, end of stream, protocol desync) is
//! recorded once as the terminal cause. Every pending call is resolved with
//! it and every later submission is rejected with it.

use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::stream::ResponseParts;
use crate::connection::TransactionChannel;
use crate::error::{CallContext, Error, Result};
use crate::protocol::{
    Request, RequestEnvelope, RequestId, Response, ResponseEnvelope, ResponsePart,
    ResponsePayload, StreamState,
};

/// Events delivered to the cursor of a streamed call
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Part(ResponsePart),
    Continue,
    Done,
}

enum PendingCall {
    Single {
        context: CallContext,
        slot: oneshot::Sender<Result<Response>>,
    },
    Streamed {
        context: CallContext,
        events: mpsc::UnboundedSender<Result<StreamEvent>>,
    },
}

impl PendingCall {
    fn resolve_with(self, cause: Error) {
        match self {
            PendingCall::Single { slot, .. } => {
                let _ = slot.send(Err(cause));
            }
            PendingCall::Streamed { events, .. } => {
                let _ = events.send(Err(cause));
            }
        }
    }
}

struct CallTable {
    calls: HashMap<RequestId, PendingCall>,
    next_id: RequestId,
    outbound: Option<mpsc::UnboundedSender<RequestEnvelope>>,
    failure: Option<Error>,
}

/// State shared between the multiplexer, its dispatcher task and the
/// cursors of streamed calls
pub(crate) struct Shared {
    table: Mutex<CallTable>,
    on_fatal: Box<dyn Fn(Error) + Send + Sync>,
}

impl Shared {
    fn submit(&self, request: Request, call: PendingCall) -> Result<RequestId> {
        let mut table = self.table.lock();
        if let Some(cause) = &table.failure {
            return Err(cause.clone());
        }

        let id = table.next_id;
        table.next_id += 1;

        let sent = table
            .outbound
            .as_ref()
            .map(|outbound| outbound.send(RequestEnvelope { id, request }).is_ok())
            .unwrap_or(false);
        if !sent {
            drop(table);
            let cause = Error::Connection("transaction stream rejected a write".to_string());
            self.fail(cause.clone());
            return Err(cause);
        }

        table.calls.insert(id, call);
        trace!("Submitted request {}", id);
        Ok(id)
    }

    /// Ask the server for the next batch of streamed call `id`
    pub(crate) fn request_continuation(&self, id: RequestId) -> Result<()> {
        let table = self.table.lock();
        if let Some(cause) = &table.failure {
            return Err(cause.clone());
        }

        let sent = table
            .outbound
            .as_ref()
            .map(|outbound| {
                outbound
                    .send(RequestEnvelope {
                        id,
                        request: Request::Continue,
                    })
                    .is_ok()
            })
            .unwrap_or(false);
        drop(table);

        if !sent {
            let cause = Error::Connection("transaction stream rejected a write".to_string());
            self.fail(cause.clone());
            return Err(cause);
        }
        trace!("Requested continuation of {}", id);
        Ok(())
    }

    /// Drop the table entry of a call whose caller stopped waiting
    pub(crate) fn forget(&self, id: RequestId) {
        if self.table.lock().calls.remove(&id).is_some() {
            debug!("Abandoned request {}", id);
        }
    }

    pub(crate) fn failure(&self) -> Option<Error> {
        self.table.lock().failure.clone()
    }

    fn dispatch(&self, envelope: ResponseEnvelope) {
        let ResponseEnvelope { id, payload } = envelope;
        let mut table = self.table.lock();

        let Some(call) = table.calls.remove(&id) else {
            // Late envelopes for abandoned calls are expected
            warn!("Discarding response for unknown request id {}", id);
            return;
        };

        let desync = match call {
            PendingCall::Single { context, slot } => match payload {
                ResponsePayload::Res(response) => {
                    let _ = slot.send(Ok(response));
                    None
                }
                ResponsePayload::Error(message) => {
                    let _ = slot.send(Err(Error::server(context, message)));
                    None
                }
                ResponsePayload::ResPart(part) => {
                    Some((PendingCall::Single { context, slot }, format!("{} batch", part.shape())))
                }
                ResponsePayload::StreamState(state) => Some((
                    PendingCall::Single { context, slot },
                    format!("{:?} marker", state),
                )),
            },
            PendingCall::Streamed { context, events } => {
                let (event, terminal) = match payload {
                    ResponsePayload::ResPart(part) => (Ok(StreamEvent::Part(part)), false),
                    ResponsePayload::StreamState(StreamState::Continue) => {
                        (Ok(StreamEvent::Continue), false)
                    }
                    ResponsePayload::StreamState(StreamState::Done) => {
                        (Ok(StreamEvent::Done), true)
                    }
                    ResponsePayload::Error(message) => {
                        (Err(Error::server(context.clone(), message)), true)
                    }
                    ResponsePayload::Res(response) => {
                        let reason = format!("{} reply", response.shape());
                        table.calls.insert(id, PendingCall::Streamed { context, events });
                        drop(table);
                        self.desync(id, reason);
                        return;
                    }
                };
                let delivered = events.send(event).is_ok();
                if delivered && !terminal {
                    table.calls.insert(id, PendingCall::Streamed { context, events });
                }
                None
            }
        };

        if let Some((call, reason)) = desync {
            table.calls.insert(id, call);
            drop(table);
            self.desync(id, reason);
        }
    }

    fn desync(&self, id: RequestId, reason: String) {
        self.fail(Error::Protocol(format!(
            "unexpected {} for request {}",
            reason, id
        )));
    }

    /// Record `cause` as terminal and resolve every pending call with it.
    /// Returns false if a terminal cause was already recorded.
    fn terminate(&self, cause: &Error) -> bool {
        let calls = {
            let mut table = self.table.lock();
            if table.failure.is_some() {
                return false;
            }
            table.failure = Some(cause.clone());
            table.outbound = None;
            std::mem::take(&mut table.calls)
        };

        debug!("Resolving {} pending calls with: {}", calls.len(), cause);
        for (_, call) in calls {
            call.resolve_with(cause.clone());
        }
        true
    }

    fn fail(&self, cause: Error) {
        if self.terminate(&cause) {
            warn!("Transaction stream failed: {}", cause);
            (self.on_fatal)(cause);
        }
    }
}

/// Removes a single call's table entry when its future is dropped early
struct CallGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.id);
    }
}

/// Shares one transaction stream among concurrently issued calls
pub(crate) struct Multiplexer {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Take ownership of `channel` and start dispatching its responses.
    /// `on_fatal` runs once, on the dispatcher task, if the stream fails.
    pub(crate) fn start<F>(channel: TransactionChannel, on_fatal: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        let TransactionChannel {
            requests,
            responses,
        } = channel;

        let shared = Arc::new(Shared {
            table: Mutex::new(CallTable {
                calls: HashMap::new(),
                next_id: 0,
                outbound: Some(requests),
                failure: None,
            }),
            on_fatal: Box::new(on_fatal),
        });

        let dispatcher = tokio::spawn(Self::dispatch_loop(Arc::clone(&shared), responses));

        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    async fn dispatch_loop(
        shared: Arc<Shared>,
        mut responses: mpsc::UnboundedReceiver<Result<ResponseEnvelope>>,
    ) {
        while let Some(inbound) = responses.recv().await {
            match inbound {
                Ok(envelope) => shared.dispatch(envelope),
                Err(cause) => {
                    shared.fail(cause);
                    return;
                }
            }
        }
        shared.fail(Error::Connection(
            "transaction stream closed by the server".to_string(),
        ));
    }

    /// Send `request` and wait for its single response
    pub(crate) async fn single(&self, request: Request) -> Result<Response> {
        let context = request.context();
        let (slot, receiver) = oneshot::channel();
        let id = self
            .shared
            .submit(request, PendingCall::Single { context, slot })?;
        let _guard = CallGuard {
            shared: &self.shared,
            id,
        };

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(self
                .shared
                .failure()
                .unwrap_or_else(|| Error::transaction_closed(None))),
        }
    }

    /// Send `request` and return a cursor over its response batches
    pub(crate) fn streamed(&self, request: Request) -> Result<ResponseParts> {
        let context = request.context();
        let (events, receiver) = mpsc::unbounded_channel();
        let id = self.shared.submit(
            request,
            PendingCall::Streamed {
                context: context.clone(),
                events,
            },
        )?;
        Ok(ResponseParts::new(
            id,
            context,
            Arc::clone(&self.shared),
            receiver,
        ))
    }

    /// Stop the multiplexer: resolve every pending call with `cause`, close
    /// the outbound stream and stop dispatching.
    pub(crate) fn shutdown(&self, cause: Error) {
        self.shared.terminate(&cause);
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
    }

    pub(crate) fn failure(&self) -> Option<Error> {
        self.shared.failure()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.shared.table.lock().calls.len()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown(Error::transaction_closed(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::Label;
    use crate::protocol::TypeRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Inbound = mpsc::UnboundedSender<Result<ResponseEnvelope>>;
    type Outbound = mpsc::UnboundedReceiver<RequestEnvelope>;

    fn channel() -> (TransactionChannel, Outbound, Inbound) {
        let (requests, outbound) = mpsc::unbounded_channel();
        let (inbound, responses) = mpsc::unbounded_channel();
        (
            TransactionChannel {
                requests,
                responses,
            },
            outbound,
            inbound,
        )
    }

    fn syntax_request(label: &str) -> Request {
        Request::Type {
            label: Label::new(label),
            request: TypeRequest::GetSyntax,
        }
    }

    fn label_of(envelope: &RequestEnvelope) -> String {
        match &envelope.request {
            Request::Type { label, .. } => label.to_string(),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (channel, mut outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});

        let server = async {
            let mut received = Vec::new();
            for _ in 0..3 {
                received.push(outbound.recv().await.unwrap());
            }
            // Answer in reverse order, echoing each label back
            for envelope in received.iter().rev() {
                inbound
                    .send(Ok(ResponseEnvelope::res(
                        envelope.id,
                        Response::Text(label_of(envelope)),
                    )))
                    .unwrap();
            }
        };

        let (a, b, c, _) = tokio::join!(
            mux.single(syntax_request("a")),
            mux.single(syntax_request("b")),
            mux.single(syntax_request("c")),
            server
        );

        assert_eq!(a.unwrap(), Response::Text("a".into()));
        assert_eq!(b.unwrap(), Response::Text("b".into()));
        assert_eq!(c.unwrap(), Response::Text("c".into()));
        assert_eq!(mux.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_server_error_only_affects_its_call() {
        let (channel, mut outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});

        let server = async {
            let first = outbound.recv().await.unwrap();
            let second = outbound.recv().await.unwrap();
            inbound
                .send(Ok(ResponseEnvelope::error(first.id, "constraint violated")))
                .unwrap();
            inbound
                .send(Ok(ResponseEnvelope::res(second.id, Response::Unit)))
                .unwrap();
        };

        let (first, second, _) = tokio::join!(
            mux.single(syntax_request("person")),
            mux.single(syntax_request("name")),
            server
        );

        match first.unwrap_err() {
            Error::Server { context, message } => {
                assert_eq!(context.operation, "thing_type.get_syntax");
                assert_eq!(context.target.as_deref(), Some("person"));
                assert_eq!(message, "constraint violated");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(second.unwrap(), Response::Unit);
        assert!(mux.failure().is_none());
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_ignored() {
        let (channel, mut outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});

        let server = async {
            let envelope = outbound.recv().await.unwrap();
            inbound
                .send(Ok(ResponseEnvelope::res(9_999, Response::Unit)))
                .unwrap();
            inbound
                .send(Ok(ResponseEnvelope::res(envelope.id, Response::Text("ok".into()))))
                .unwrap();
        };

        let (result, _) = tokio::join!(mux.single(syntax_request("x")), server);
        assert_eq!(result.unwrap(), Response::Text("ok".into()));
        assert!(mux.failure().is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_resolves_every_pending_call() {
        let (channel, mut outbound, inbound) = channel();
        let fatal_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fatal_count);
        let mux = Multiplexer::start(channel, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let server = async {
            outbound.recv().await.unwrap();
            outbound.recv().await.unwrap();
            inbound
                .send(Err(Error::Connection("connection reset".into())))
                .unwrap();
        };

        let (a, b, _) = tokio::join!(
            mux.single(syntax_request("a")),
            mux.single(syntax_request("b")),
            server
        );

        let cause = Error::Connection("connection reset".into());
        assert_eq!(a.unwrap_err(), cause);
        assert_eq!(b.unwrap_err(), cause);
        assert_eq!(mux.single(syntax_request("c")).await.unwrap_err(), cause);
        assert_eq!(fatal_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_fatal() {
        let (channel, _outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});
        drop(inbound);

        let err = mux.single(syntax_request("a")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_calls_and_closes_stream() {
        let (channel, mut outbound, _inbound) = channel();
        let fatal_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fatal_count);
        let mux = Multiplexer::start(channel, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let closer = async {
            outbound.recv().await.unwrap();
            outbound.recv().await.unwrap();
            mux.shutdown(Error::transaction_closed(None));
        };

        let (a, b, _) = tokio::join!(
            mux.single(syntax_request("a")),
            mux.single(syntax_request("b")),
            closer
        );

        assert!(a.unwrap_err().is_transaction_closed());
        assert!(b.unwrap_err().is_transaction_closed());
        assert!(outbound.recv().await.is_none());
        assert!(mux
            .single(syntax_request("c"))
            .await
            .unwrap_err()
            .is_transaction_closed());
        assert_eq!(fatal_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_fatal_desync() {
        let (channel, mut outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});

        let server = async {
            let envelope = outbound.recv().await.unwrap();
            inbound
                .send(Ok(ResponseEnvelope::state(envelope.id, StreamState::Done)))
                .unwrap();
        };

        let (result, _) = tokio::join!(mux.single(syntax_request("a")), server);
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
        assert!(matches!(mux.failure(), Some(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_dropped_call_leaves_no_table_entry() {
        let (channel, mut outbound, inbound) = channel();
        let mux = Multiplexer::start(channel, |_| {});

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            mux.single(syntax_request("slow")),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(mux.pending_calls(), 0);

        // The late reply is discarded and the stream stays healthy
        let envelope = outbound.recv().await.unwrap();
        inbound
            .send(Ok(ResponseEnvelope::res(envelope.id, Response::Unit)))
            .unwrap();

        let server = async {
            let next = outbound.recv().await.unwrap();
            inbound
                .send(Ok(ResponseEnvelope::res(next.id, Response::Unit)))
                .unwrap();
        };
        let (result, _) = tokio::join!(mux.single(syntax_request("fast")), server);
        assert_eq!(result.unwrap(), Response::Unit);
    }
}

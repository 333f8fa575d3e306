// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lazy, pull-driven result sequences for streamed calls
//!
//! The server sends batches until it has sent a page, then pauses with a
//! `Continue` marker. The cursor only asks for the next page once the
//! consumer has drained everything before the marker, so at most one
//! continuation is ever in flight and nothing is fetched ahead of use.

use log::trace;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::multiplexer::{Shared, StreamEvent};
use crate::error::{CallContext, Error, Result};
use crate::protocol::{RequestId, ResponsePart};

/// Cursor over the response batches of one streamed call
///
/// Forward-only and not restartable. Once the terminal marker (or an error)
/// has been seen, `next` keeps returning `None` without network traffic.
pub struct ResponseParts {
    id: RequestId,
    context: CallContext,
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<Result<StreamEvent>>,
    timeout: Option<Duration>,
    finished: bool,
}

impl ResponseParts {
    pub(crate) fn new(
        id: RequestId,
        context: CallContext,
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<Result<StreamEvent>>,
    ) -> Self {
        Self {
            id,
            context,
            shared,
            events,
            timeout: None,
            finished: false,
        }
    }

    /// Limit how long a single batch may take to arrive
    pub(crate) fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next batch, `None` once the sequence is exhausted
    pub async fn next(&mut self) -> Option<Result<ResponsePart>> {
        if self.finished {
            return None;
        }

        loop {
            let event = match self.receive().await {
                Ok(event) => event,
                Err(e) => return Some(Err(self.finish_with(e))),
            };

            match event {
                Some(Ok(StreamEvent::Part(part))) => return Some(Ok(part)),
                Some(Ok(StreamEvent::Continue)) => {
                    if let Err(e) = self.shared.request_continuation(self.id) {
                        return Some(Err(self.finish_with(e)));
                    }
                }
                Some(Ok(StreamEvent::Done)) => {
                    trace!("Stream {} done", self.id);
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(self.finish_with(e))),
                None => {
                    let cause = self
                        .shared
                        .failure()
                        .unwrap_or_else(|| Error::transaction_closed(None));
                    return Some(Err(self.finish_with(cause)));
                }
            }
        }
    }

    async fn receive(&mut self) -> Result<Option<Result<StreamEvent>>> {
        match self.timeout {
            None => Ok(self.events.recv().await),
            Some(limit) => tokio::time::timeout(limit, self.events.recv())
                .await
                .map_err(|_| {
                    Error::server(
                        self.context.clone(),
                        format!("no response within {}ms", limit.as_millis()),
                    )
                }),
        }
    }

    fn finish_with(&mut self, error: Error) -> Error {
        self.finished = true;
        self.shared.forget(self.id);
        error
    }
}

impl Drop for ResponseParts {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.forget(self.id);
        }
    }
}

type Decoder<T> = fn(ResponsePart) -> Result<Vec<T>>;

/// Typed lazy sequence over the items of a streamed call
pub struct ResultStream<T> {
    parts: ResponseParts,
    decode: Decoder<T>,
    buffer: VecDeque<T>,
    failed: bool,
}

impl<T> ResultStream<T> {
    pub(crate) fn new(parts: ResponseParts, decode: Decoder<T>) -> Self {
        Self {
            parts,
            decode,
            buffer: VecDeque::new(),
            failed: false,
        }
    }

    /// Next item, `None` once the sequence is exhausted
    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.failed {
                return None;
            }

            match self.parts.next().await? {
                Ok(part) => match (self.decode)(part) {
                    Ok(items) => self.buffer.extend(items),
                    Err(e) => {
                        self.failed = true;
                        self.parts.finish_with(e.clone());
                        return Some(Err(e));
                    }
                },
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Drain the remaining items, stopping at the first error
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

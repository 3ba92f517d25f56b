//! Request router
//!
//! Encrypts outbound JSON-RPC messages, publishes them through the relay and
//! correlates responses by id. Nothing here times out: a call resolves when
//! its response arrives or when [`RequestRouter::cancel_all`] rejects it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::constants::SIGNING_METHODS;
use crate::crypto::{SymKey, encrypt};
use crate::error::{Error, Result};
use crate::events::{EventKey, EventResult, EventRouter};
use crate::message::Payload;
use crate::transport::RelayTransport;
use crate::types::{Id, JsonRpcRequest, JsonRpcResponse};

/// An outbound call still waiting for its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: Id,
    pub method: String,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Request id, allocated when absent
    pub id: Option<Id>,
    /// Publish somewhere other than the session's peer topic
    pub topic: Option<String>,
    /// Overrides the silent flag derived from the method
    pub force_push_notification: Option<bool>,
}

impl RequestOptions {
    pub fn silent_for(&self, method: &str) -> bool {
        match self.force_push_notification {
            Some(push) => !push,
            None => is_silent_payload(method),
        }
    }
}

pub fn is_signing_method(method: &str) -> bool {
    SIGNING_METHODS.contains(&method)
}

/// Whether the relay should skip the push notification for `method`.
pub fn is_silent_payload(method: &str) -> bool {
    method.starts_with("wc_") || !is_signing_method(method)
}

type PendingMap = Arc<Mutex<HashMap<Id, PendingRequest>>>;

#[derive(Clone)]
pub struct RequestRouter {
    transport: RelayTransport,
    events: EventRouter,
    pending: PendingMap,
}

impl RequestRouter {
    pub fn new(transport: RelayTransport, events: EventRouter) -> Self {
        Self {
            transport,
            events,
            pending: Default::default(),
        }
    }

    pub fn transport(&self) -> &RelayTransport {
        &self.transport
    }

    /// Encrypts `payload` and publishes it without waiting for anything.
    pub fn send<T: Serialize>(
        &self,
        payload: &T,
        key: &SymKey,
        topic: &str,
        silent: bool,
    ) -> Result<()> {
        let envelope = encrypt(payload, key)?;
        self.transport
            .send(serde_json::to_string(&envelope)?, topic, silent)
    }

    /// Responses never trigger a push notification.
    pub fn respond(&self, response: &JsonRpcResponse, key: &SymKey, topic: &str) -> Result<()> {
        self.send(response, key, topic, true)
    }

    /// Starts waiting for the response to `id` without sending anything.
    pub fn track_response(&self, id: &Id, method: &str) -> PendingResponse {
        PendingResponse {
            response: self.events.next(EventKey::Response(id.clone())),
            _guard: Some(PendingGuard::track(&self.pending, id, method)),
        }
    }

    /// Like [`RequestRouter::track_response`], but the wait is neither listed
    /// in [`RequestRouter::pending`] nor reached by [`RequestRouter::cancel_all`].
    pub fn watch_response(&self, id: &Id) -> PendingResponse {
        PendingResponse {
            response: self.events.next(EventKey::Response(id.clone())),
            _guard: None,
        }
    }

    /// Sends `request` and returns a handle resolving with its response. The
    /// listener is registered before the frame leaves, so a fast response is
    /// not missed.
    pub fn dispatch(
        &self,
        request: &JsonRpcRequest,
        key: &SymKey,
        topic: &str,
        silent: bool,
    ) -> Result<PendingResponse> {
        let pending = self.track_response(&request.id, &request.method);
        self.send(request, key, topic, silent)?;
        log::debug!("sent {} request {}", request.method, request.id);
        Ok(pending)
    }

    pub async fn call(
        &self,
        request: JsonRpcRequest,
        key: &SymKey,
        topic: &str,
        silent: bool,
    ) -> Result<Value> {
        self.dispatch(&request, key, topic, silent)?.wait().await
    }

    /// In-flight calls, oldest first.
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<_> = lock(&self.pending).values().cloned().collect();
        pending.sort_by_key(|p| p.created_at);
        pending
    }

    /// Rejects every in-flight call with [`Error::RequestCancelled`].
    /// Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Id> = lock(&self.pending).drain().map(|(id, _)| id).collect();
        for id in &ids {
            self.events
                .reject(&EventKey::Response(id.clone()), || Error::RequestCancelled);
        }
        if !ids.is_empty() {
            log::info!("cancelled {} pending requests", ids.len());
        }
        ids.len()
    }
}

/// Response to an outbound call. Tracked responses are listed in
/// [`RequestRouter::pending`] until resolved or dropped.
pub struct PendingResponse {
    response: oneshot::Receiver<EventResult>,
    _guard: Option<PendingGuard>,
}

impl PendingResponse {
    pub async fn wait(self) -> Result<Value> {
        match self.response.await {
            Ok(Ok(Payload::Response(JsonRpcResponse {
                result: Some(result),
                ..
            }))) => Ok(result),
            Ok(Ok(_)) => Err(Error::InvalidResponse),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::RequestCancelled),
        }
    }
}

struct PendingGuard {
    pending: PendingMap,
    id: Id,
}

impl PendingGuard {
    fn track(pending: &PendingMap, id: &Id, method: &str) -> Self {
        lock(pending).insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                method: method.to_string(),
                created_at: Instant::now(),
            },
        );
        Self {
            pending: pending.clone(),
            id: id.clone(),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<Id, PendingRequest>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Event routing
//!
//! Every decrypted payload and every lifecycle event goes through
//! [`EventRouter::trigger`]. The routing key is the method for requests, the
//! id for responses and the event kind for lifecycle events. Requests and
//! responses nobody listens for are handed to [`EventKey::CallRequest`]
//! listeners instead.

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::message::{Payload, WcMethod};
use crate::types::{ConnectParams, Id, JsonRpcRequest, JsonRpcResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    SessionRequest,
    SessionUpdate,
    Connect,
    Disconnect,
    DisplayUri,
    TransportOpen,
    TransportClose,
    TransportError,
    CallRequestSent,
    Error,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_plain::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InternalEvent {
    /// Incoming `wc_sessionRequest`, after the connector recorded the peer
    SessionRequest(JsonRpcRequest),
    SessionUpdate { chain_id: u64, accounts: Vec<String> },
    Connect(ConnectParams),
    Disconnect { message: String },
    DisplayUri(String),
    TransportOpen,
    TransportClose,
    TransportError(String),
    CallRequestSent(JsonRpcRequest),
    Error { code: String, message: String },
}

impl InternalEvent {
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::SessionRequest(_) => Lifecycle::SessionRequest,
            Self::SessionUpdate { .. } => Lifecycle::SessionUpdate,
            Self::Connect(_) => Lifecycle::Connect,
            Self::Disconnect { .. } => Lifecycle::Disconnect,
            Self::DisplayUri(_) => Lifecycle::DisplayUri,
            Self::TransportOpen => Lifecycle::TransportOpen,
            Self::TransportClose => Lifecycle::TransportClose,
            Self::TransportError(_) => Lifecycle::TransportError,
            Self::CallRequestSent(_) => Lifecycle::CallRequestSent,
            Self::Error { .. } => Lifecycle::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// `wc_sessionRequest` from the peer
    SessionRequest,
    /// `wc_sessionUpdate` from the peer
    SessionUpdate,
    Method(String),
    Response(Id),
    Lifecycle(Lifecycle),
    /// Catch-all for requests and responses without a dedicated listener
    CallRequest,
}

impl EventKey {
    pub fn method(method: &str) -> Self {
        match WcMethod::from_str(method) {
            Ok(WcMethod::SessionRequest) => EventKey::SessionRequest,
            Ok(WcMethod::SessionUpdate) => EventKey::SessionUpdate,
            Err(_) => EventKey::Method(method.to_string()),
        }
    }

    pub fn for_payload(payload: &Payload) -> Self {
        match payload {
            Payload::Request(request) => EventKey::method(&request.method),
            Payload::Response(response) => {
                EventKey::Response(response.id.clone())
            }
            Payload::Event(event) => EventKey::Lifecycle(event.lifecycle()),
        }
    }

    fn falls_back(&self) -> bool {
        matches!(self, EventKey::Method(_) | EventKey::Response(_))
    }
}

/// Error-shaped responses arrive as `Err`, everything else as `Ok`.
pub type EventResult = Result<Payload, Error>;

type Callback = Arc<dyn Fn(EventResult) + Send + Sync>;
type OnceCallback = Box<dyn FnOnce(EventResult) + Send>;

enum Sink {
    Callback(Callback),
    OnceCallback(OnceCallback),
    Channel(mpsc::UnboundedSender<EventResult>),
    Once(oneshot::Sender<EventResult>),
}

impl Sink {
    fn is_closed(&self) -> bool {
        match self {
            Sink::Channel(tx) => tx.is_closed(),
            Sink::Once(tx) => tx.is_closed(),
            Sink::Callback(_) | Sink::OnceCallback(_) => false,
        }
    }

    /// Clone of a persistent sink, `None` for one-shot sinks.
    fn share(&self) -> Option<Sink> {
        match self {
            Sink::Callback(callback) => Some(Sink::Callback(callback.clone())),
            Sink::Channel(tx) => Some(Sink::Channel(tx.clone())),
            Sink::OnceCallback(_) | Sink::Once(_) => None,
        }
    }

    fn deliver(self, result: EventResult) {
        match self {
            Sink::Callback(callback) => callback(result),
            Sink::OnceCallback(callback) => callback(result),
            Sink::Channel(tx) => {
                let _ = tx.send(result);
            }
            Sink::Once(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

struct Listener {
    key: EventKey,
    sink: Sink,
}

#[derive(Clone, Default)]
pub struct EventRouter {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `callback` for every matching event until the router is dropped.
    pub fn on<F>(&self, key: EventKey, callback: F)
    where
        F: Fn(EventResult) + Send + Sync + 'static,
    {
        self.register(key, Sink::Callback(Arc::new(callback)));
    }

    pub fn once<F>(&self, key: EventKey, callback: F)
    where
        F: FnOnce(EventResult) + Send + 'static,
    {
        self.register(key, Sink::OnceCallback(Box::new(callback)));
    }

    /// Stream of matching events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, key: EventKey) -> mpsc::UnboundedReceiver<EventResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(key, Sink::Channel(tx));
        rx
    }

    /// Resolves with the next matching event only.
    pub fn next(&self, key: EventKey) -> oneshot::Receiver<EventResult> {
        let (tx, rx) = oneshot::channel();
        self.register(key, Sink::Once(tx));
        rx
    }

    pub fn listener_count(&self, key: &EventKey) -> usize {
        self.lock()
            .iter()
            .filter(|l| &l.key == key && !l.sink.is_closed())
            .count()
    }

    pub fn off(&self, key: &EventKey) {
        self.lock().retain(|l| &l.key != key);
    }

    pub fn trigger(&self, payload: Payload) {
        let key = EventKey::for_payload(&payload);
        let sinks = {
            let mut listeners = self.lock();
            listeners.retain(|l| !l.sink.is_closed());

            let target = if listeners.iter().any(|l| l.key == key) {
                key
            } else if key.falls_back() {
                EventKey::CallRequest
            } else {
                log::trace!("no listener for {key:?}");
                return;
            };
            take_matching(&mut listeners, &target)
        };

        for sink in sinks {
            sink.deliver(result_for(&payload));
        }
    }

    /// Removes every listener for `key`, handing each one an error.
    pub fn reject<F>(&self, key: &EventKey, error: F)
    where
        F: Fn() -> Error,
    {
        let sinks: Vec<Sink> = {
            let mut listeners = self.lock();
            let (matching, rest) = std::mem::take(&mut *listeners)
                .into_iter()
                .partition(|l| &l.key == key);
            *listeners = rest;
            matching.into_iter().map(|l| l.sink).collect()
        };

        for sink in sinks {
            sink.deliver(Err(error()));
        }
    }

    fn register(&self, key: EventKey, sink: Sink) {
        self.lock().push(Listener { key, sink });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_matching(listeners: &mut Vec<Listener>, key: &EventKey) -> Vec<Sink> {
    let mut sinks = vec![];
    let mut i = 0;
    while i < listeners.len() {
        if &listeners[i].key != key {
            i += 1;
            continue;
        }
        match listeners[i].sink.share() {
            Some(sink) => {
                sinks.push(sink);
                i += 1;
            }
            None => sinks.push(listeners.remove(i).sink),
        }
    }
    sinks
}

fn result_for(payload: &Payload) -> EventResult {
    match payload {
        Payload::Response(JsonRpcResponse {
            error: Some(error), ..
        }) => Err(Error::Rpc(error.clone())),
        other => Ok(other.clone()),
    }
}

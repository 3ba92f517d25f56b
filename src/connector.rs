//! Connector
//!
//! Drives the pairing handshake and the session lifecycle on either side of
//! a connection. The initiating side calls [`Connector::create_session`] and
//! waits for `connect`; the responding side is built from the pairing URI and
//! answers the incoming request with [`Connector::approve_session`] or
//! [`Connector::reject_session`].
//!
//! Session state lives behind one mutex that is never held while events are
//! delivered, so listeners may call back into the connector.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::constants::{
    ERROR_SESSION_DISCONNECTED, ERROR_SESSION_REJECTED,
    ERROR_SESSION_REQUEST_REJECTED, ERROR_SESSION_UPDATE_DISCONNECTED,
    ERROR_SESSION_UPDATE_REJECTED, SESSION_REQUEST_ERROR_CODE,
};
use crate::crypto::{EncryptedEnvelope, SymKey, decrypt};
use crate::error::{Error, Result};
use crate::events::{EventKey, EventResult, EventRouter, InternalEvent};
use crate::message::{Payload, WcMethod};
use crate::router::{
    PendingRequest, PendingResponse, RequestOptions, RequestRouter,
    is_signing_method,
};
use crate::session::{Approval, Session, SessionState};
use crate::socket::{SocketConnector, WsConnector};
use crate::store::{MemoryStore, MobileLinkChoice, SessionStore};
use crate::transport::{
    RelayTransport, RetryPolicy, TransportEvent, TransportOptions,
};
use crate::types::{
    Id, JsonRpcRequest, JsonRpcResponse, Metadata, RpcError, SessionParams,
    SessionRequestParams, SessionStatus, SocketMessage,
};
use crate::uri::parse_uri;
use crate::utils::{payload_id, uuid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
}

/// Opens the wallet app the user picked, on mobile platforms.
pub trait DeepLinkHandler: Send + Sync {
    fn redirect(&self, href: &str);
}

#[derive(Clone)]
pub struct ConnectorOptions {
    pub bridge: Option<String>,
    pub uri: Option<String>,
    pub session: Option<Session>,
    pub client_meta: Option<Metadata>,
    pub retry: RetryPolicy,
    pub platform: Platform,
    /// Reject in-flight calls with [`Error::RequestCancelled`] on kill
    pub reject_pending_on_kill: bool,
    pub store: Arc<dyn SessionStore>,
    pub socket: Arc<dyn SocketConnector>,
    pub deep_link: Option<Arc<dyn DeepLinkHandler>>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            bridge: None,
            uri: None,
            session: None,
            client_meta: None,
            retry: RetryPolicy::default(),
            platform: Platform::default(),
            reject_pending_on_kill: false,
            store: Arc::new(MemoryStore::new()),
            socket: Arc::new(WsConnector),
            deep_link: None,
        }
    }
}

impl ConnectorOptions {
    /// Options for the initiating side.
    pub fn bridge(bridge: &str) -> Self {
        Self {
            bridge: Some(bridge.to_string()),
            ..Default::default()
        }
    }

    /// Options for the responding side, built from a pairing URI.
    pub fn uri(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    pub fn with_client_meta(mut self, client_meta: Metadata) -> Self {
        self.client_meta = Some(client_meta);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_socket(mut self, socket: Arc<dyn SocketConnector>) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_deep_link(mut self, handler: Arc<dyn DeepLinkHandler>) -> Self {
        self.deep_link = Some(handler);
        self
    }

    pub fn reject_pending_on_kill(mut self, reject: bool) -> Self {
        self.reject_pending_on_kill = reject;
        self
    }
}

#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    session: Mutex<Session>,
    events: EventRouter,
    router: RequestRouter,
    store: Arc<dyn SessionStore>,
    platform: Platform,
    reject_pending_on_kill: bool,
    deep_link: Option<Arc<dyn DeepLinkHandler>>,
    /// At most one handshake and one update wait, aborted on teardown
    session_waits: Mutex<HashMap<WcMethod, AbortHandle>>,
}

impl Connector {
    /// Builds the connector and opens the relay connection. Must be called
    /// from within a tokio runtime.
    pub fn new(options: ConnectorOptions) -> Result<Self> {
        if options.bridge.is_none() && options.uri.is_none() && options.session.is_none() {
            return Err(Error::MissingRequired);
        }

        let mut session = Session::new(
            options.bridge.as_deref().unwrap_or_default(),
            uuid(),
            options.client_meta.clone(),
        );
        let responder = match &options.uri {
            Some(uri) => {
                session.adopt_uri(&parse_uri(uri)?)?;
                true
            }
            None => false,
        };
        if let Some(restored) = options.session.clone().or_else(|| options.store.load()) {
            log::debug!("restoring session {}", restored.client_id());
            session = restored;
        }
        if session.bridge().is_empty() {
            return Err(Error::InvalidBridgeUrl(String::new()));
        }

        let mut subscriptions = vec![session.client_id().to_string()];
        if responder && !session.connected() {
            subscriptions.push(session.handshake_topic().to_string());
        }
        let (transport, transport_events) = RelayTransport::spawn(
            TransportOptions::new(session.bridge())
                .with_subscriptions(subscriptions)
                .with_retry(options.retry),
            options.socket.clone(),
        )?;

        let events = EventRouter::new();
        let rearm = session
            .handshake_id()
            .filter(|_| session.pending() && session.peer_id().is_empty())
            .cloned();

        let inner = Arc::new(Inner {
            session: Mutex::new(session),
            router: RequestRouter::new(transport.clone(), events.clone()),
            events,
            store: options.store,
            platform: options.platform,
            reject_pending_on_kill: options.reject_pending_on_kill,
            deep_link: options.deep_link,
            session_waits: Default::default(),
        });

        if let Some(id) = rearm {
            log::debug!("waiting again for handshake response {id}");
            let response = inner.router.watch_response(&id);
            inner.await_session_response(
                WcMethod::SessionRequest,
                response,
                ERROR_SESSION_REQUEST_REJECTED,
            );
        }

        tokio::spawn(pump(Arc::downgrade(&inner), transport_events));
        transport.open();

        Ok(Self { inner })
    }

    /// Stream of events for `key`. Dropping the receiver unsubscribes.
    pub fn on(&self, key: EventKey) -> mpsc::UnboundedReceiver<EventResult> {
        self.inner.events.subscribe(key)
    }

    pub fn events(&self) -> &EventRouter {
        &self.inner.events
    }

    pub fn transport(&self) -> &RelayTransport {
        self.inner.router.transport()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.session().clone()
    }

    pub fn connected(&self) -> bool {
        self.inner.session().connected()
    }

    pub fn pending(&self) -> bool {
        self.inner.session().pending()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.inner.session().accounts().to_vec()
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.session().chain_id()
    }

    pub fn client_id(&self) -> String {
        self.inner.session().client_id().to_string()
    }

    pub fn peer_id(&self) -> String {
        self.inner.session().peer_id().to_string()
    }

    pub fn peer_meta(&self) -> Option<Metadata> {
        self.inner.session().peer_meta().cloned()
    }

    pub fn handshake_topic(&self) -> String {
        self.inner.session().handshake_topic().to_string()
    }

    pub fn uri(&self) -> Option<String> {
        self.inner.session().uri()
    }

    /// Generates a fresh key and handshake topic, sends `wc_sessionRequest`
    /// and emits `display_uri`. Does nothing while a handshake is pending.
    pub fn create_session(&self, chain_id: Option<u64>) -> Result<()> {
        let (request, key, topic, uri) = {
            let mut session = self.inner.session();
            match session.state() {
                SessionState::Connected => return Err(Error::SessionConnected),
                SessionState::Pending => return Ok(()),
                SessionState::Disconnected => {}
            }

            let key = SymKey::generate();
            let id = payload_id();
            let topic = uuid();
            session.begin_handshake(key, id.clone(), topic.clone())?;

            let params = SessionRequestParams {
                peer_id: session.client_id().to_string(),
                peer_meta: session.client_meta().cloned(),
                chain_id,
            };
            let request = JsonRpcRequest::new(
                id,
                WcMethod::SessionRequest.to_string(),
                json!([params]),
            );
            (request, key, topic, session.uri().unwrap_or_default())
        };

        self.inner.request_session(
            WcMethod::SessionRequest,
            &request,
            &key,
            &topic,
            ERROR_SESSION_REQUEST_REJECTED,
        )?;
        self.inner.persist();
        self.inner.emit(InternalEvent::DisplayUri(uri));
        Ok(())
    }

    /// Accepts the session request received from the initiating side.
    pub fn approve_session(&self, status: SessionStatus) -> Result<()> {
        let (response, key, topic, params) = {
            let mut session = self.inner.session();
            let params = session.approve_local(&status)?;
            let id = session
                .handshake_id()
                .cloned()
                .ok_or(Error::InvalidSessionParams("handshakeId"))?;
            let result = serde_json::to_value(session.approval_params())?;
            (
                JsonRpcResponse::success(id, result),
                session.key().copied().ok_or(Error::SessionDisconnected)?,
                session.peer_id().to_string(),
                params,
            )
        };

        self.inner.router.respond(&response, &key, &topic)?;
        self.inner.persist();
        self.inner.emit(InternalEvent::Connect(params));
        Ok(())
    }

    /// Declines the session request received from the initiating side.
    pub fn reject_session(&self, message: Option<&str>) -> Result<()> {
        let message = message.unwrap_or(ERROR_SESSION_REJECTED);
        let (response, key, topic) = {
            let session = self.inner.session();
            if session.connected() {
                return Err(Error::SessionConnected);
            }
            let id = session
                .handshake_id()
                .cloned()
                .ok_or(Error::InvalidSessionParams("handshakeId"))?;
            (
                JsonRpcResponse::failure(id, RpcError::format(Some(message), None)),
                session.key().copied().ok_or(Error::SessionDisconnected)?,
                session.peer_id().to_string(),
            )
        };

        self.inner.router.respond(&response, &key, &topic)?;
        self.inner.handle_session_disconnect(message);
        Ok(())
    }

    /// Pushes new accounts or chain to the peer with `wc_sessionUpdate`.
    pub fn update_session(&self, status: SessionStatus) -> Result<()> {
        let (request, key, topic) = {
            let mut session = self.inner.session();
            session.update(&status)?;
            let params = SessionParams {
                approved: true,
                chain_id: Some(session.chain_id()),
                network_id: Some(session.network_id()),
                accounts: Some(session.accounts().to_vec()),
                rpc_url: Some(session.rpc_url().to_string()),
                ..Default::default()
            };
            (
                JsonRpcRequest::new(
                    payload_id(),
                    WcMethod::SessionUpdate.to_string(),
                    json!([params]),
                ),
                session.key().copied().ok_or(Error::SessionDisconnected)?,
                session.peer_id().to_string(),
            )
        };

        self.inner.request_session(
            WcMethod::SessionUpdate,
            &request,
            &key,
            &topic,
            ERROR_SESSION_UPDATE_REJECTED,
        )?;
        self.inner.persist();
        self.inner.emit(InternalEvent::SessionUpdate {
            chain_id: status.chain_id,
            accounts: status.accounts,
        });
        Ok(())
    }

    /// Tells the peer the session is over and tears it down locally. A
    /// second call on an idle connector does nothing.
    pub fn kill_session(&self, message: Option<&str>) -> Result<()> {
        let farewell = {
            let session = self.inner.session();
            if session.state() == SessionState::Disconnected && session.peer_id().is_empty() {
                return Ok(());
            }
            let params = SessionParams {
                approved: false,
                ..Default::default()
            };
            session.key().copied().map(|key| {
                (
                    JsonRpcRequest::new(
                        payload_id(),
                        WcMethod::SessionUpdate.to_string(),
                        json!([params]),
                    ),
                    key,
                    session.request_topic().to_string(),
                )
            })
        };

        if let Some((request, key, topic)) = farewell {
            if let Err(e) = self.inner.router.send(&request, &key, &topic, true) {
                log::warn!("failed to notify peer of disconnect: {e}");
            }
        }
        if self.inner.reject_pending_on_kill {
            self.cancel_pending_requests();
        }
        self.inner
            .handle_session_disconnect(message.unwrap_or(ERROR_SESSION_DISCONNECTED));
        Ok(())
    }

    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let result = self
            .send_call_request(
                "eth_sendTransaction",
                json!([tx]),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Returns the raw signed transaction without broadcasting it.
    pub async fn sign_transaction(&self, tx: TransactionRequest) -> Result<Bytes> {
        let result = self
            .send_call_request(
                "eth_signTransaction",
                json!([tx]),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `eth_sign` over raw bytes.
    pub async fn sign_message(&self, address: Address, data: Bytes) -> Result<Bytes> {
        let result = self
            .send_call_request(
                "eth_sign",
                json!([address, data]),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn sign_personal_message(&self, message: Bytes, address: Address) -> Result<Bytes> {
        let result = self
            .send_call_request(
                "personal_sign",
                json!([message, address]),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `typed_data` is passed through as given, object or JSON string.
    pub async fn sign_typed_data(&self, address: Address, typed_data: Value) -> Result<Bytes> {
        let result = self
            .send_call_request(
                "eth_signTypedData",
                json!([address, typed_data]),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Any JSON-RPC call. `eth_accounts` and `eth_chainId` are answered
    /// from the session without a round trip. A fresh id is allocated unless
    /// `options.id` carries one.
    pub async fn send_custom_request(
        &self,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        match method {
            "eth_accounts" => {
                let session = self.inner.session();
                if !session.connected() {
                    return Err(Error::SessionDisconnected);
                }
                Ok(json!(session.accounts()))
            }
            "eth_chainId" => {
                let session = self.inner.session();
                if !session.connected() {
                    return Err(Error::SessionDisconnected);
                }
                Ok(json!(format!("0x{:x}", session.chain_id())))
            }
            _ => self.send_call_request(method, params, options).await,
        }
    }

    async fn send_call_request(
        &self,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let (request, key, topic) = {
            let session = self.inner.session();
            if !session.connected() {
                return Err(Error::SessionDisconnected);
            }
            let topic = options
                .topic
                .clone()
                .unwrap_or_else(|| session.peer_id().to_string());
            (
                JsonRpcRequest::new(
                    options.id.clone().unwrap_or_else(payload_id),
                    method,
                    params,
                ),
                session.key().copied().ok_or(Error::SessionDisconnected)?,
                topic,
            )
        };

        let silent = options.silent_for(method);
        let pending = self.inner.router.dispatch(&request, &key, &topic, silent)?;
        self.inner.emit(InternalEvent::CallRequestSent(request));
        if self.inner.platform == Platform::Mobile && is_signing_method(method) {
            self.inner.open_wallet();
        }
        pending.wait().await
    }

    /// Answers a call request received from the peer.
    pub fn approve_request(&self, id: Id, result: Value) -> Result<()> {
        self.inner
            .send_response(JsonRpcResponse::success(id, result))
    }

    /// Declines a call request received from the peer. The error code is
    /// derived from `message`.
    pub fn reject_request(&self, id: Id, message: Option<&str>, data: Option<Value>) -> Result<()> {
        self.inner.send_response(JsonRpcResponse::failure(
            id,
            RpcError::format(message, data),
        ))
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.inner.router.pending()
    }

    /// Rejects every in-flight call with [`Error::RequestCancelled`].
    pub fn cancel_pending_requests(&self) -> usize {
        self.inner.router.cancel_all()
    }

    pub fn set_mobile_link_choice(&self, choice: MobileLinkChoice) -> Result<()> {
        self.inner.store.save_link_choice(&choice)
    }

    pub fn mobile_link_choice(&self) -> Option<MobileLinkChoice> {
        self.inner.store.load_link_choice()
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: InternalEvent) {
        self.events.trigger(Payload::Event(event));
    }

    /// Store writes happen under the session lock so a save can never land
    /// after the teardown that cleared the store.
    fn persist(&self) {
        let session = self.session();
        if session.state() == SessionState::Disconnected {
            return;
        }
        if let Err(e) = self.store.save(&session) {
            log::warn!("failed to persist session: {e}");
        }
    }

    fn forget(&self) {
        if let Err(e) = self.store.clear() {
            log::warn!("failed to clear persisted session: {e}");
        }
        if let Err(e) = self.store.clear_link_choice() {
            log::warn!("failed to clear mobile link choice: {e}");
        }
    }

    fn open_wallet(&self) {
        let (Some(handler), Some(choice)) = (&self.deep_link, self.store.load_link_choice()) else {
            return;
        };
        log::debug!("redirecting to {}", choice.name);
        handler.redirect(&choice.href);
    }

    fn send_response(&self, response: JsonRpcResponse) -> Result<()> {
        let (key, topic) = {
            let session = self.session();
            (
                session.key().copied().ok_or(Error::SessionDisconnected)?,
                session.peer_id().to_string(),
            )
        };
        self.router.respond(&response, &key, &topic)
    }

    /// Publishes a `wc_sessionRequest` or `wc_sessionUpdate` and applies the
    /// peer's answer once it arrives.
    fn request_session(
        self: &Arc<Self>,
        method: WcMethod,
        request: &JsonRpcRequest,
        key: &SymKey,
        topic: &str,
        error_message: &'static str,
    ) -> Result<()> {
        let response = self.router.watch_response(&request.id);
        self.router.send(request, key, topic, true)?;
        log::debug!("sent {method} request {}", request.id);
        self.await_session_response(method, response, error_message);
        Ok(())
    }

    /// Replaces any earlier wait for the same method.
    fn await_session_response(
        self: &Arc<Self>,
        method: WcMethod,
        response: PendingResponse,
        error_message: &'static str,
    ) {
        let inner = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let result = response.wait().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match result {
                Ok(value) => match serde_json::from_value(value) {
                    Ok(params) => inner.handle_session_response(params, error_message),
                    Err(e) => {
                        log::debug!("malformed session response: {e}");
                        inner.handle_session_disconnect(error_message);
                    }
                },
                Err(Error::RequestCancelled) => {
                    log::debug!("stopped waiting for session response");
                }
                Err(e) => inner.handle_session_disconnect(&e.message()),
            }
        });

        let replaced = self.waits().insert(method, task.abort_handle());
        if let Some(replaced) = replaced {
            replaced.abort();
        }
    }

    fn waits(&self) -> MutexGuard<'_, HashMap<WcMethod, AbortHandle>> {
        self.session_waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_session_response(&self, params: SessionParams, error_message: &str) {
        if !params.approved {
            self.handle_session_disconnect(error_message);
            return;
        }

        let approval = self.session().approve(&params);
        match approval {
            Ok(Approval::Connected(params)) => {
                self.persist();
                self.emit(InternalEvent::Connect(params));
            }
            Ok(Approval::Updated { chain_id, accounts }) => {
                self.persist();
                self.emit(InternalEvent::SessionUpdate { chain_id, accounts });
            }
            Err(e) => {
                log::warn!("ignoring session approval: {e}");
                self.emit(InternalEvent::Error {
                    code: SESSION_REQUEST_ERROR_CODE.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn handle_session_disconnect(&self, message: &str) {
        let (changed, inbox) = {
            let mut session = self.session();
            let changed = session.disconnect();
            self.forget();
            (changed, session.client_id().to_string())
        };
        for (_, wait) in self.waits().drain() {
            wait.abort();
        }
        let transport = self.router.transport();
        transport.replace_subscriptions(vec![inbox]);
        transport.close();
        if changed {
            log::info!("session disconnected: {message}");
            self.emit(InternalEvent::Disconnect {
                message: message.to_string(),
            });
        }
    }

    fn handle_session_request(&self, request: &JsonRpcRequest) {
        let params = request
            .first_param()
            .cloned()
            .map(serde_json::from_value::<SessionRequestParams>);
        match params {
            Some(Ok(params)) => {
                self.session().record_request(
                    request.id.clone(),
                    params.peer_id,
                    params.peer_meta,
                );
                self.emit(InternalEvent::SessionRequest(request.clone()));
            }
            _ => self.emit(InternalEvent::Error {
                code: SESSION_REQUEST_ERROR_CODE.to_string(),
                message: "Invalid session request".to_string(),
            }),
        }
    }

    fn handle_session_update(&self, request: &JsonRpcRequest) {
        let params = request
            .first_param()
            .cloned()
            .map(serde_json::from_value::<SessionParams>);
        match params {
            Some(Ok(params)) => {
                self.handle_session_response(params, ERROR_SESSION_UPDATE_DISCONNECTED)
            }
            _ => self.handle_session_disconnect(ERROR_SESSION_UPDATE_DISCONNECTED),
        }
    }

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.emit(InternalEvent::TransportOpen),
            TransportEvent::Close => self.emit(InternalEvent::TransportClose),
            TransportEvent::Error(e) => {
                self.emit(InternalEvent::TransportError(e))
            }
            TransportEvent::Message(message) => self.on_message(message),
        }
    }

    fn on_message(&self, message: SocketMessage) {
        let key = {
            let session = self.session();
            let ours = !message.topic.is_empty()
                && (message.topic == session.client_id()
                    || message.topic == session.handshake_topic());
            if !ours {
                log::trace!("ignoring message on {}", message.topic);
                return;
            }
            session.key().copied()
        };
        let Some(key) = key else {
            log::debug!("no session key, dropping message");
            return;
        };

        let payload = serde_json::from_str::<EncryptedEnvelope>(&message.payload)
            .ok()
            .and_then(|envelope| decrypt(&envelope, &key))
            .map(Payload::from_value);
        let payload = match payload {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                log::debug!("dropping malformed payload: {e}");
                return;
            }
            None => {
                log::debug!("dropping undecryptable message on {}", message.topic);
                return;
            }
        };

        if let Payload::Request(request) = &payload {
            match WcMethod::from_str(&request.method) {
                Ok(WcMethod::SessionRequest) => self.handle_session_request(request),
                Ok(WcMethod::SessionUpdate) => self.handle_session_update(request),
                Err(_) => {}
            }
        }
        self.events.trigger(payload);
    }
}

async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_transport_event(event);
    }
}

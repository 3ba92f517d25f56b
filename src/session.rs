//! Session
//!
//! All session state, changed only through the mutators below so the
//! record is never observed half updated. `connected` implies a non-empty
//! `peer_id` and `accounts`.

use serde::{Deserialize, Serialize};

use crate::constants::{PROTOCOL, VERSION};
use crate::crypto::SymKey;
use crate::error::{Error, Result};
use crate::types::{ConnectParams, Id, Metadata, SessionParams, SessionStatus};
use crate::uri::{UriParameters, format_uri};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Pending,
    Connected,
}

/// Outcome of a peer approval.
#[derive(Debug, Clone, PartialEq)]
pub enum Approval {
    Connected(ConnectParams),
    Updated { chain_id: u64, accounts: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    protocol: String,
    version: u32,
    bridge: String,
    key: Option<SymKey>,
    client_id: String,
    client_meta: Option<Metadata>,
    peer_id: String,
    peer_meta: Option<Metadata>,
    handshake_id: Option<Id>,
    handshake_topic: String,
    connected: bool,
    chain_id: u64,
    accounts: Vec<String>,
    network_id: u64,
    rpc_url: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: VERSION,
            bridge: String::new(),
            key: None,
            client_id: String::new(),
            client_meta: None,
            peer_id: String::new(),
            peer_meta: None,
            handshake_id: None,
            handshake_topic: String::new(),
            connected: false,
            chain_id: 0,
            accounts: vec![],
            network_id: 0,
            rpc_url: String::new(),
        }
    }
}

impl Session {
    pub fn new(bridge: &str, client_id: String, client_meta: Option<Metadata>) -> Self {
        Self {
            bridge: bridge.to_string(),
            client_id,
            client_meta,
            ..Default::default()
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn key(&self) -> Option<&SymKey> {
        self.key.as_ref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_meta(&self) -> Option<&Metadata> {
        self.client_meta.as_ref()
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn peer_meta(&self) -> Option<&Metadata> {
        self.peer_meta.as_ref()
    }

    pub fn handshake_id(&self) -> Option<&Id> {
        self.handshake_id.as_ref()
    }

    pub fn handshake_topic(&self) -> &str {
        &self.handshake_topic
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn state(&self) -> SessionState {
        if self.connected {
            SessionState::Connected
        } else if !self.handshake_topic.is_empty() {
            SessionState::Pending
        } else {
            SessionState::Disconnected
        }
    }

    pub fn pending(&self) -> bool {
        self.state() == SessionState::Pending
    }

    /// The pairing URI for the current handshake, once a key exists.
    pub fn uri(&self) -> Option<String> {
        let key = self.key.as_ref()?;
        if self.handshake_topic.is_empty() {
            return None;
        }
        Some(format_uri(
            &self.handshake_topic,
            self.version,
            &self.bridge,
            key,
        ))
    }

    /// Where requests go: the peer once known, the handshake topic before.
    pub fn request_topic(&self) -> &str {
        if self.peer_id.is_empty() {
            &self.handshake_topic
        } else {
            &self.peer_id
        }
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            peer_id: self.peer_id.clone(),
            peer_meta: self.peer_meta.clone(),
            chain_id: self.chain_id,
            accounts: self.accounts.clone(),
        }
    }

    /// Result sent back to the initiator when this side approves.
    pub fn approval_params(&self) -> SessionParams {
        SessionParams {
            approved: true,
            chain_id: Some(self.chain_id),
            network_id: Some(self.network_id),
            accounts: Some(self.accounts.clone()),
            rpc_url: Some(self.rpc_url.clone()),
            peer_id: Some(self.client_id.clone()),
            peer_meta: self.client_meta.clone(),
        }
    }

    pub(crate) fn begin_handshake(
        &mut self,
        key: SymKey,
        handshake_id: Id,
        handshake_topic: String,
    ) -> Result<()> {
        if self.connected {
            return Err(Error::SessionConnected);
        }
        self.key = Some(key);
        self.handshake_id = Some(handshake_id);
        self.handshake_topic = handshake_topic;
        Ok(())
    }

    /// Responder side: take over the handshake described by a pairing URI.
    pub(crate) fn adopt_uri(&mut self, params: &UriParameters) -> Result<()> {
        if self.connected {
            return Err(Error::SessionConnected);
        }
        self.bridge = params.bridge.clone();
        self.key = Some(params.key);
        self.handshake_topic = params.handshake_topic.clone();
        Ok(())
    }

    /// Responder side: remember who sent the `wc_sessionRequest`.
    pub(crate) fn record_request(
        &mut self,
        handshake_id: Id,
        peer_id: String,
        peer_meta: Option<Metadata>,
    ) {
        self.handshake_id = Some(handshake_id);
        self.peer_id = peer_id;
        self.peer_meta = peer_meta;
    }

    /// Initiator side: apply an approval from the peer. The first approval
    /// connects the session, later ones update it.
    pub(crate) fn approve(&mut self, params: &SessionParams) -> Result<Approval> {
        if self.connected {
            if let Some(chain_id) = params.chain_id {
                self.chain_id = chain_id;
            }
            if let Some(accounts) = params.accounts.as_ref().filter(|a| !a.is_empty()) {
                self.accounts = accounts.clone();
            }
            return Ok(Approval::Updated {
                chain_id: self.chain_id,
                accounts: self.accounts.clone(),
            });
        }

        let accounts = params
            .accounts
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or(Error::InvalidSessionParams("accounts"))?;
        let peer_id = params
            .peer_id
            .clone()
            .filter(|p| !p.is_empty() && self.peer_id.is_empty())
            .unwrap_or_else(|| self.peer_id.clone());
        if peer_id.is_empty() {
            return Err(Error::InvalidSessionParams("peerId"));
        }

        self.connected = true;
        self.accounts = accounts;
        self.peer_id = peer_id;
        if let Some(chain_id) = params.chain_id {
            self.chain_id = chain_id;
        }
        if let Some(network_id) = params.network_id {
            self.network_id = network_id;
        }
        if let Some(rpc_url) = &params.rpc_url {
            self.rpc_url = rpc_url.clone();
        }
        if self.peer_meta.is_none() {
            self.peer_meta = params.peer_meta.clone();
        }
        Ok(Approval::Connected(self.connect_params()))
    }

    /// Responder side: accept the recorded session request.
    pub(crate) fn approve_local(&mut self, status: &SessionStatus) -> Result<ConnectParams> {
        if self.connected {
            return Err(Error::SessionConnected);
        }
        if status.accounts.is_empty() {
            return Err(Error::InvalidSessionParams("accounts"));
        }
        if self.peer_id.is_empty() || self.handshake_id.is_none() {
            return Err(Error::InvalidSessionParams("peerId"));
        }

        self.apply_status(status);
        self.connected = true;
        Ok(self.connect_params())
    }

    pub(crate) fn update(&mut self, status: &SessionStatus) -> Result<()> {
        if !self.connected {
            return Err(Error::SessionDisconnected);
        }
        if status.accounts.is_empty() {
            return Err(Error::InvalidSessionParams("accounts"));
        }
        self.apply_status(status);
        Ok(())
    }

    /// Clears everything tied to the current handshake. Returns `false` when
    /// there was nothing to tear down.
    pub(crate) fn disconnect(&mut self) -> bool {
        let active = self.connected
            || self.handshake_id.is_some()
            || !self.handshake_topic.is_empty()
            || !self.peer_id.is_empty();

        self.connected = false;
        self.handshake_id = None;
        self.handshake_topic.clear();
        self.peer_id.clear();
        active
    }

    fn apply_status(&mut self, status: &SessionStatus) {
        self.chain_id = status.chain_id;
        self.accounts = status.accounts.clone();
        self.network_id = status.network_id.unwrap_or_default();
        self.rpc_url = status.rpc_url.clone().unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_session() -> Session {
        let mut session = Session::new("https://bridge.example", "me".into(), None);
        session
            .begin_handshake(SymKey::generate(), Id::Number(1), "topic".into())
            .unwrap();
        session
    }

    fn approval(accounts: &[&str], peer_id: Option<&str>) -> SessionParams {
        SessionParams {
            approved: true,
            chain_id: Some(1),
            accounts: Some(accounts.iter().map(|a| a.to_string()).collect()),
            peer_id: peer_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_states() {
        let session = Session::new("https://bridge.example", "me".into(), None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.uri(), None);

        let mut session = pending_session();
        assert_eq!(session.state(), SessionState::Pending);
        assert!(session.uri().unwrap().starts_with("wc:topic@1?bridge="));
        assert_eq!(session.request_topic(), "topic");

        session.approve(&approval(&["0xabc"], Some("peer"))).unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.request_topic(), "peer");
    }

    #[test]
    fn test_first_approval_connects_then_updates() {
        let mut session = pending_session();

        let first = session.approve(&approval(&["0xabc"], Some("peer"))).unwrap();
        assert!(matches!(first, Approval::Connected(ref p) if p.peer_id == "peer"));
        assert_eq!(session.accounts(), ["0xabc".to_string()]);
        assert_eq!(session.chain_id(), 1);

        let mut update = approval(&["0xdef"], Some("other"));
        update.chain_id = Some(5);
        let second = session.approve(&update).unwrap();
        assert_eq!(
            second,
            Approval::Updated {
                chain_id: 5,
                accounts: vec!["0xdef".to_string()]
            }
        );
        assert_eq!(session.peer_id(), "peer");
    }

    #[test]
    fn test_approval_keeps_invariant() {
        let mut session = pending_session();
        assert!(matches!(
            session.approve(&approval(&[], Some("peer"))),
            Err(Error::InvalidSessionParams("accounts"))
        ));
        assert!(matches!(
            session.approve(&approval(&["0xabc"], None)),
            Err(Error::InvalidSessionParams("peerId"))
        ));
        assert!(!session.connected());
        assert_eq!(session.state(), SessionState::Pending);
    }

    #[test]
    fn test_responder_approval() {
        let mut session = Session::new("https://bridge.example", "wallet".into(), None);
        let status = SessionStatus {
            chain_id: 1,
            accounts: vec!["0xabc".to_string()],
            network_id: None,
            rpc_url: None,
        };
        assert!(session.approve_local(&status).is_err());

        session.record_request(Id::Number(3), "dapp".into(), None);
        let params = session.approve_local(&status).unwrap();
        assert_eq!(params.peer_id, "dapp");
        assert!(session.connected());
        assert_eq!(session.approval_params().peer_id.as_deref(), Some("wallet"));
        assert!(matches!(
            session.approve_local(&status),
            Err(Error::SessionConnected)
        ));
    }

    #[test]
    fn test_disconnect_clears_handshake() {
        let mut session = pending_session();
        session.approve(&approval(&["0xabc"], Some("peer"))).unwrap();

        assert!(session.disconnect());
        assert!(!session.connected());
        assert_eq!(session.handshake_topic(), "");
        assert_eq!(session.handshake_id(), None);
        assert_eq!(session.peer_id(), "");
        assert!(!session.disconnect());
    }

    #[test]
    fn test_update_requires_connection() {
        let mut session = pending_session();
        let status = SessionStatus {
            chain_id: 10,
            accounts: vec!["0x1".to_string()],
            network_id: Some(10),
            rpc_url: Some("https://rpc.example".to_string()),
        };
        assert!(matches!(
            session.update(&status),
            Err(Error::SessionDisconnected)
        ));

        session.approve(&approval(&["0xabc"], Some("peer"))).unwrap();
        session.update(&status).unwrap();
        assert_eq!(session.chain_id(), 10);
        assert_eq!(session.rpc_url(), "https://rpc.example");
        assert!(session.begin_handshake(
            SymKey::generate(),
            Id::Number(2),
            "again".into()
        )
        .is_err());
    }

    #[test]
    fn test_persisted_shape() {
        let session = pending_session();
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["handshakeTopic"], "topic");
        assert_eq!(value["clientId"], "me");
        assert_eq!(value["key"].as_str().unwrap().len(), 64);

        let restored: Session = serde_json::from_value(value).unwrap();
        assert_eq!(restored, session);
    }
}

//! Types
//!
//! JSON-RPC envelopes, relay frames and the session parameter records that
//! travel inside encrypted payloads.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    ERROR_DEFAULT_RPC, JSONRPC_VERSION, RPC_INTERNAL_ERROR,
    RPC_INVALID_PARAMS, RPC_INVALID_REQUEST, RPC_METHOD_NOT_FOUND,
    RPC_PARSE_ERROR, RPC_SERVER_ERROR_CODE,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id::Number(value)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::String(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: Id,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Array(vec![])
}

impl JsonRpcRequest {
    pub fn new(id: Id, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// First element of an array-shaped `params`, the convention used by all
    /// `wc_*` methods.
    pub fn first_param(&self) -> Option<&Value> {
        match &self.params {
            Value::Array(values) => values.first(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Id,
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Id, error: RpcError) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object (code, message, and optional data).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Builds the error object sent back to a peer. The code is derived from
    /// the message alone; unknown messages map to the generic server error.
    pub fn format(message: Option<&str>, data: Option<Value>) -> Self {
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or(ERROR_DEFAULT_RPC)
            .to_string();
        Self {
            code: code_for_message(&message),
            message,
            data,
        }
    }
}

pub fn code_for_message(message: &str) -> i64 {
    [
        RPC_PARSE_ERROR,
        RPC_INVALID_REQUEST,
        RPC_METHOD_NOT_FOUND,
        RPC_INVALID_PARAMS,
        RPC_INTERNAL_ERROR,
    ]
    .iter()
    .find(|(m, _)| *m == message)
    .map(|(_, code)| *code)
    .unwrap_or(RPC_SERVER_ERROR_CODE)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMessageType {
    Pub,
    Sub,
    Ack,
}

/// Frame exchanged with the relay over the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SocketMessage {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: SocketMessageType,
    pub payload: String,
    #[serde(default)]
    pub silent: bool,
}

impl SocketMessage {
    pub fn publish(topic: &str, payload: String, silent: bool) -> Self {
        Self {
            topic: topic.to_string(),
            kind: SocketMessageType::Pub,
            payload,
            silent,
        }
    }

    pub fn subscribe(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            kind: SocketMessageType::Sub,
            payload: String::new(),
            silent: true,
        }
    }

    pub fn ack(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            kind: SocketMessageType::Ack,
            payload: String::new(),
            silent: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

/// First param of `wc_sessionRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub peer_id: String,
    #[serde(default)]
    pub peer_meta: Option<Metadata>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// Result of `wc_sessionRequest` and first param of `wc_sessionUpdate`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_meta: Option<Metadata>,
}

/// What the wallet side reports when approving or updating a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub chain_id: u64,
    pub accounts: Vec<String>,
    #[serde(default)]
    pub network_id: Option<u64>,
    #[serde(default)]
    pub rpc_url: Option<String>,
}

/// Params of the `connect` lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub peer_id: String,
    pub peer_meta: Option<Metadata>,
    pub chain_id: u64,
    pub accounts: Vec<String>,
}

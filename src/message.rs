use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::JSONRPC_VERSION;
use crate::error::{Error, Result};
use crate::events::InternalEvent;
use crate::types::{Id, JsonRpcRequest, JsonRpcResponse, RpcError};

/// Protocol methods handled by the connector itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WcMethod {
    #[serde(rename = "wc_sessionRequest")]
    SessionRequest,

    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate,
}

impl Display for WcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_plain::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&name)
    }
}

impl FromStr for WcMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_plain::from_str(s)
            .map_err(|_| Error::InternalError(format!("unknown method {s}")))
    }
}

/// Anything the event router can dispatch: a decrypted JSON-RPC request or
/// response from the peer, or a locally generated lifecycle event.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Event(InternalEvent),
}

impl Payload {
    /// Classifies a decrypted JSON value. A `method` makes it a request, a
    /// `result` (even `null`) a success and an `error` a failure response.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err("JSON-RPC payload is not an object".into());
        };

        let id = map
            .get("id")
            .cloned()
            .map(serde_json::from_value::<Id>)
            .transpose()?
            .ok_or("JSON-RPC payload is missing id")?;
        let jsonrpc = map
            .get("jsonrpc")
            .and_then(Value::as_str)
            .unwrap_or(JSONRPC_VERSION)
            .to_string();

        if let Some(method) = map.get("method") {
            let method = method
                .as_str()
                .ok_or("JSON-RPC method is not a string")?
                .to_string();
            let params = map
                .get("params")
                .cloned()
                .unwrap_or(Value::Array(vec![]));
            return Ok(Payload::Request(JsonRpcRequest {
                id,
                jsonrpc,
                method,
                params,
            }));
        }

        if let Some(result) = map.get("result") {
            return Ok(Payload::Response(JsonRpcResponse {
                id,
                jsonrpc,
                result: Some(result.clone()),
                error: None,
            }));
        }

        if let Some(error) = map.get("error") {
            let error = serde_json::from_value::<RpcError>(error.clone())
                .unwrap_or_else(|_| {
                    let message = error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    RpcError::format(Some(message), None)
                });
            return Ok(Payload::Response(JsonRpcResponse {
                id,
                jsonrpc,
                result: None,
                error: Some(error),
            }));
        }

        Err(Error::InvalidResponse)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wc_method_names() {
        assert_eq!(WcMethod::SessionRequest.to_string(), "wc_sessionRequest");
        assert_eq!(
            WcMethod::from_str("wc_sessionUpdate").unwrap(),
            WcMethod::SessionUpdate
        );
        assert!(WcMethod::from_str("eth_sign").is_err());
    }

    #[test]
    fn test_decode_request() {
        let payload = Payload::from_value(json!({
            "id": 1692000000000123_u64,
            "jsonrpc": "2.0",
            "method": "wc_sessionRequest",
            "params": [{"peerId": "p", "peerMeta": null, "chainId": 1}],
        }))
        .unwrap();

        let Payload::Request(request) = payload else {
            panic!("expected a request");
        };
        assert_eq!(request.id, Id::Number(1692000000000123));
        assert_eq!(request.method, "wc_sessionRequest");
        assert_eq!(request.first_param().unwrap()["peerId"], "p");
    }

    #[test]
    fn test_decode_responses() {
        let success =
            Payload::from_value(json!({"id": 5, "jsonrpc": "2.0", "result": null}))
                .unwrap();
        assert_eq!(
            success,
            Payload::Response(JsonRpcResponse::success(Id::Number(5), Value::Null))
        );

        let failure = Payload::from_value(json!({
            "id": "abc",
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "User rejected"},
        }))
        .unwrap();
        let Payload::Response(response) = failure else {
            panic!("expected a response");
        };
        assert_eq!(response.id, Id::String("abc".to_string()));
        assert_eq!(response.error.unwrap().message, "User rejected");

        // error without a code still decodes
        let Payload::Response(response) = Payload::from_value(json!({
            "id": 6,
            "error": {"message": "Method not found"},
        }))
        .unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_decode_invalid() {
        assert!(Payload::from_value(json!([1, 2])).is_err());
        assert!(Payload::from_value(json!({"method": "x"})).is_err());
        assert!(Payload::from_value(json!({"id": 1, "jsonrpc": "2.0"})).is_err());
    }
}

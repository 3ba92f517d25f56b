use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use url::Url;

use crate::error::{Error, Result};
use crate::types::Id;

/// JSON-RPC id: milliseconds since epoch scaled by 1000 plus three random
/// digits, so ids issued within the same millisecond rarely collide.
pub fn payload_id() -> Id {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let extra: u64 = rand::thread_rng().gen_range(0..1000);
    Id::Number(millis * 1000 + extra)
}

pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Maps an http(s) bridge url to its ws(s) endpoint and appends the
/// protocol/version/env query parameters, keeping any existing ones.
pub fn websocket_url(bridge: &str, protocol: &str, version: u32, env: &str) -> Result<Url> {
    let bridge = if let Some(rest) = bridge.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = bridge.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        bridge.to_string()
    };

    let mut url = Url::parse(&bridge)
        .map_err(|e| Error::InvalidBridgeUrl(format!("{bridge}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("protocol", protocol)
        .append_pair("version", &version.to_string())
        .append_pair("env", env);
    Ok(url)
}

//! Pairing URI
//!
//! `wc:<handshakeTopic>@<version>?bridge=<url-encoded bridge>&key=<hex key>`

use std::collections::HashMap;
use std::str::FromStr;

use url::form_urlencoded;

use crate::constants::PROTOCOL;
use crate::crypto::SymKey;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct UriParameters {
    pub protocol: String,
    pub handshake_topic: String,
    pub version: u32,
    pub bridge: String,
    pub key: SymKey,
}

impl UriParameters {
    pub fn to_uri(&self) -> String {
        format_uri(&self.handshake_topic, self.version, &self.bridge, &self.key)
    }
}

impl FromStr for UriParameters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_uri(s)
    }
}

pub fn format_uri(handshake_topic: &str, version: u32, bridge: &str, key: &SymKey) -> String {
    let bridge: String = form_urlencoded::byte_serialize(bridge.as_bytes()).collect();
    format!("{PROTOCOL}:{handshake_topic}@{version}?bridge={bridge}&key={key}")
}

pub fn parse_uri(input: &str) -> Result<UriParameters> {
    let path_start = input.find(':').ok_or(Error::InvalidUri("protocol"))?;
    let protocol = &input[..path_start];
    if protocol != PROTOCOL {
        return Err(Error::InvalidUri("protocol"));
    }

    let rest = &input[path_start + 1..];
    let (path, query_string) = match rest.find('?') {
        Some(path_end) => (&rest[..path_end], &rest[path_end + 1..]),
        None => (rest, ""),
    };

    let (topic, version) = path
        .split_once('@')
        .ok_or(Error::InvalidUri("missing version"))?;
    let handshake_topic = parse_topic(topic);
    if handshake_topic.is_empty() {
        return Err(Error::InvalidUri("missing handshakeTopic"));
    }

    let query_params: HashMap<String, String> =
        form_urlencoded::parse(query_string.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

    let bridge = query_params
        .get("bridge")
        .filter(|b| !b.is_empty())
        .ok_or(Error::InvalidUri("missing bridge"))?;
    let key = query_params
        .get("key")
        .filter(|k| !k.is_empty())
        .ok_or(Error::InvalidUri("missing key"))?;

    Ok(UriParameters {
        protocol: protocol.to_string(),
        handshake_topic,
        version: version.parse()?,
        bridge: bridge.clone(),
        key: key.parse()?,
    })
}

#[allow(clippy::manual_strip)]
fn parse_topic(topic: &str) -> String {
    if topic.starts_with("//") {
        topic[2..].to_string()
    } else {
        topic.to_string()
    }
}

use std::fmt::{self, Display};

use crate::types::RpcError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// None of bridge, uri or session was provided to the connector
    MissingRequired,
    InvalidUri(&'static str),
    InvalidBridgeUrl(String),
    InvalidTopic,
    InvalidResponse,
    InvalidSessionParams(&'static str),
    SessionConnected,
    SessionDisconnected,
    SessionRejected(String),
    RequestCancelled,
    Rpc(RpcError),
    Crypto(&'static str),
    ParseInt(std::num::ParseIntError),
    UrlParse(url::ParseError),
    SerdeJson(serde_json::Error),
    FromHex(alloy::hex::FromHexError),
    Io(std::io::Error),
    InternalError(String),
}

impl Error {
    /// Message used when an error is reported through a lifecycle event or
    /// a session teardown.
    pub fn message(&self) -> String {
        match self {
            Error::Rpc(e) => e.message.clone(),
            Error::SessionRejected(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingRequired => {
                write!(f, "Missing one of the required parameters: bridge / uri / session")
            }
            Error::InvalidUri(reason) => write!(f, "Invalid URI: {reason}"),
            Error::InvalidBridgeUrl(url) => {
                write!(f, "Invalid or missing bridge url: {url}")
            }
            Error::InvalidTopic => write!(f, "Missing or invalid topic field"),
            Error::InvalidResponse => {
                write!(f, "JSON RPC response format is invalid")
            }
            Error::InvalidSessionParams(field) => {
                write!(f, "Invalid session parameters: {field}")
            }
            Error::SessionConnected => write!(f, "Session currently connected"),
            Error::SessionDisconnected => {
                write!(f, "Session currently disconnected")
            }
            Error::SessionRejected(m) => write!(f, "{m}"),
            Error::RequestCancelled => write!(f, "Request cancelled"),
            Error::Rpc(e) => write!(f, "{} ({})", e.message, e.code),
            Error::Crypto(m) => write!(f, "crypto: {m}"),
            Error::ParseInt(e) => write!(f, "{e}"),
            Error::UrlParse(e) => write!(f, "{e}"),
            Error::SerdeJson(e) => write!(f, "{e}"),
            Error::FromHex(e) => write!(f, "{e}"),
            Error::Io(e) => write!(f, "{e}"),
            Error::InternalError(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::InternalError(e)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::ParseInt(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Rpc(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::UrlParse(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerdeJson(e)
    }
}

impl From<alloy::hex::FromHexError> for Error {
    fn from(e: alloy::hex::FromHexError) -> Self {
        Error::FromHex(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

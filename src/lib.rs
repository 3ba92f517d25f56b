//! # walletconnect-v1-sdk
//!
//! A Rust implementation of the WalletConnect v1 bridge protocol: pairing
//! through a `wc:` URI, then an end-to-end encrypted JSON-RPC session relayed
//! over a websocket bridge.
//!
//! ## Features
//! - Session request, approval, update and teardown from either side
//! - AES-256-CBC + HMAC-SHA256 payload encryption
//! - Offline queueing and automatic reconnect with a configurable retry policy
//! - Pluggable session persistence
//!
//! ## Example
//! Open a session from the dapp side and wait for the wallet to approve it.
//!
//! ```rust,no_run
//! use walletconnect_v1_sdk::{Connector, ConnectorOptions, EventKey, Lifecycle};
//!
//! # async fn run() -> walletconnect_v1_sdk::error::Result<()> {
//! let connector = Connector::new(ConnectorOptions::bridge(
//!     "https://bridge.walletconnect.org",
//! ))?;
//! let mut display_uri = connector.on(EventKey::Lifecycle(Lifecycle::DisplayUri));
//! let mut connect = connector.on(EventKey::Lifecycle(Lifecycle::Connect));
//!
//! connector.create_session(Some(1))?;
//! println!("scan: {:?}", display_uri.recv().await);
//! println!("connected: {:?}", connect.recv().await);
//!
//! let accounts = connector.accounts();
//! println!("accounts: {accounts:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//! MIT OR Apache-2.0

pub mod connector;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod events;
pub mod message;
pub mod router;
pub mod session;
pub mod socket;
pub mod store;
pub mod transport;
pub mod types;
pub mod uri;
pub mod utils;

/// Exposed for easy access
pub use connector::{Connector, ConnectorOptions, Platform};
pub use error::Error;
pub use events::{EventKey, EventResult, InternalEvent, Lifecycle};
pub use session::Session;
pub use store::{FileStore, MemoryStore, SessionStore};
pub use transport::RetryPolicy;

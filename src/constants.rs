pub const PROTOCOL: &str = "wc";
pub const VERSION: u32 = 1;

pub const JSONRPC_VERSION: &str = "2.0";

pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 16;

pub const ERROR_SESSION_DISCONNECTED: &str = "Session Disconnected";
pub const ERROR_SESSION_REJECTED: &str = "Session Rejected";
pub const ERROR_SESSION_REQUEST_REJECTED: &str = "Session request rejected";
pub const ERROR_SESSION_UPDATE_REJECTED: &str = "Session update rejected";
pub const ERROR_SESSION_UPDATE_DISCONNECTED: &str = "Session disconnected";
pub const ERROR_DEFAULT_RPC: &str = "Failed or Rejected Request";

pub const SESSION_REQUEST_ERROR_CODE: &str = "SESSION_REQUEST_ERROR";

// JSON-RPC 2.0 error codes, keyed by their standard messages
pub const RPC_PARSE_ERROR: (&str, i64) = ("Parse error", -32700);
pub const RPC_INVALID_REQUEST: (&str, i64) = ("Invalid request", -32600);
pub const RPC_METHOD_NOT_FOUND: (&str, i64) = ("Method not found", -32601);
pub const RPC_INVALID_PARAMS: (&str, i64) = ("Invalid params", -32602);
pub const RPC_INTERNAL_ERROR: (&str, i64) = ("Internal error", -32603);
pub const RPC_SERVER_ERROR_CODE: i64 = -32000;

/// Methods that require the user's approval on the wallet side. Requests for
/// these are sent with push notifications enabled and trigger the mobile deep
/// link redirect.
pub const SIGNING_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_sign",
    "eth_signTypedData",
    "eth_signTypedData_v1",
    "eth_signTypedData_v2",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "personal_sign",
    "wallet_addEthereumChain",
    "wallet_switchEthereumChain",
    "wallet_getPermissions",
    "wallet_requestPermissions",
    "wallet_registerOnboarding",
    "wallet_watchAsset",
    "wallet_scanQRCode",
];

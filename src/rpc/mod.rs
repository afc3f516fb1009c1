//! Bidirectional loopback RPC between the front and back processes.
//!
//! Each process serves one endpoint and dials the other: the back listens on
//! [`BACKEND_ADDR`] and serves connection lifecycle methods, the front
//! listens on [`FRONTEND_ADDR`] and serves packet delivery plus the
//! administrative reload/shutdown methods. Records are newline-delimited
//! JSON (see [`wire`]); a single connection carries any number of concurrent
//! in-flight calls correlated by id.
//!
//! Localhost only, unauthenticated by design: the link never leaves the
//! machine.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::RpcClient;
pub use error::{RpcError, ServiceError, WireError, BAD_INDEX_MSG};
pub use server::RpcService;

use serde::{Deserialize, Serialize};

/// The back process RPC endpoint.
pub const BACKEND_ADDR: &str = "127.0.0.1:29999";

/// The front process RPC endpoint.
pub const FRONTEND_ADDR: &str = "127.0.0.1:29998";

/// Method names served by the back endpoint.
pub mod backend_methods {
    pub const NEW_CONNECTION: &str = "NewConnection";
    pub const HANDLE_PACKET: &str = "HandlePacket";
    pub const CLOSE_CONNECTION: &str = "CloseConnection";
    pub const SHUTDOWN: &str = "Shutdown";
}

/// Method names served by the front endpoint.
pub mod frontend_methods {
    pub const SEND_PACKET: &str = "SendPacket";
    pub const CLOSE_CONNECTION: &str = "CloseConnection";
    pub const RELOAD_BACKEND: &str = "ReloadBackend";
    pub const SHUTDOWN_BACKEND: &str = "ShutdownBackend";
}

/// Envelope for front → back calls (`NewConnection`, `HandlePacket`,
/// `CloseConnection`).
///
/// `address` is the client's remote address, advisory for the handler
/// modules. `data` is raw wire bytes with no framing added by the broker;
/// the modules perform their own framing on the concatenated stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendPacket {
    pub server: String,
    pub index: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Envelope for back → front calls (`SendPacket`, `CloseConnection`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontendPacket {
    pub server: String,
    pub index: u64,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Base64 encoding for byte payloads inside the JSON framing.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

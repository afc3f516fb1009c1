//! portgate: connection broker for a legacy online-gaming service
//! emulator (GameSpy-family protocols).
//!
//! The broker accepts raw TCP connections on a fixed set of well-known
//! ports, each bound to a protocol handler module, and moves bytes and
//! lifecycle events between clients and handlers. It is split into two
//! processes so the handler side can be restarted without closing a single
//! client connection:
//!
//! * the **front** ([`front`]) owns every listening socket and client TCP
//!   connection;
//! * the **back** ([`back`]) owns all protocol-handler state.
//!
//! They talk over a bidirectional loopback RPC link ([`rpc`]). During a
//! back restart the front holds the link mutex: client bytes queue in the
//! kernel, relay tasks block on the lock, and everything resumes
//! transparently against the fresh back.

pub mod back;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod front;
pub mod modules;
pub mod rpc;
pub mod servers;

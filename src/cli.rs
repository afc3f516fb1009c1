//! CLI argument types.
//!
//! Defined separately from `main.rs` so the integration tests can construct
//! and inspect them directly.

use clap::{Parser, Subcommand, ValueEnum};

/// Connection broker for GameSpy-family game services.
///
/// With no subcommand, runs the front process: it owns every client-facing
/// listener, spawns the back process, and relays bytes between the two over
/// a loopback RPC link. The back can be restarted without dropping a single
/// client connection (`portgate cmd f backend`).
#[derive(Parser, Debug)]
#[command(name = "portgate", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the front only and wait for an externally launched back.
    Skipbackend,

    /// Run the back process (normally spawned by the front, not by hand).
    Backend {
        /// Pass `reload` when attaching after a restart rather than a
        /// cold start; modules use it to recover persisted state.
        #[arg(value_enum)]
        mode: Option<BackendMode>,
    },

    /// Send an administrative command to a running broker.
    ///
    /// `cmd f backend` restarts the back without closing client
    /// connections. `cmd f backend shutdown` stops the back for good: the
    /// front keeps its client sockets open but parks every relay until the
    /// deployment is torn down; terminate the front process separately.
    Cmd {
        /// Which endpoint to dial: `f` (front) or `b` (back).
        target: String,

        /// The command words, e.g. `backend` or `backend shutdown`.
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
}

/// Back startup mode.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendMode {
    /// Attach after a restart rather than a cold start.
    Reload,
}

//! The front process: owns every listening socket and client TCP
//! connection, forwards bytes and lifecycle events to the back over the RPC
//! link, and owns the back's subprocess lifecycle.

pub mod broker;
pub mod process;
pub mod relay;
pub mod service;

pub use broker::FrontBroker;
pub use service::FrontendService;

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::rpc;
use crate::servers::ServerTag;

/// Run the front process forever.
///
/// With `skip_backend` the front does not spawn a back and instead waits
/// for an externally launched one. Startup errors (listener binds, RPC
/// endpoint bind, subprocess spawn) are fatal and returned to `main`.
pub async fn run(config: Config, skip_backend: bool) -> io::Result<()> {
    let broker = FrontBroker::new(rpc::BACKEND_ADDR);

    // Hold the link from the very beginning: no relay task can issue a
    // call until the back is up and the spin-dial helper releases it.
    let link_guard = broker.lock_link().await;

    let (rpc_addr, rpc_listener) = rpc::server::bind(rpc::FRONTEND_ADDR).await.map_err(|e| {
        error!(address = rpc::FRONTEND_ADDR, error = %e, "failed to bind frontend rpc endpoint");
        e
    })?;
    rpc::server::start(rpc_listener, Arc::new(FrontendService::new(broker.clone())));
    info!(address = %rpc_addr, "frontend rpc listening");

    if !skip_backend {
        process::spawn_backend(false).map_err(|e| {
            error!(error = %e, "failed to start backend process");
            e
        })?;
    }
    tokio::spawn(broker.clone().wait_for_backend(link_guard));

    // Bind every game listener before accepting anywhere; a bind failure
    // is fatal at startup.
    let mut listeners = Vec::new();
    for tag in ServerTag::ALL {
        let address = format!("{}:{}", config.bind_address, tag.port());
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            error!(address = %address, server = %tag, error = %e, "failed to listen");
            e
        })?;
        info!(address = %address, server = %tag, "listening");
        listeners.push((tag, listener));
    }

    for (tag, listener) in listeners {
        tokio::spawn(relay::accept_loop(broker.clone(), tag, listener));
    }

    std::future::pending::<()>().await;
    Ok(())
}

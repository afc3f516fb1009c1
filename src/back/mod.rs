//! The back process: spawns every protocol handler module, serves the
//! connection lifecycle RPC endpoint, and fans shutdown out to the modules.
//!
//! The back keeps no broker state of its own. It dispatches each call by
//! wire tag to the matching module and returns as soon as the module does;
//! modules are expected to return promptly and continue work
//! asynchronously.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::modules::{FrontendHandle, ModuleSet};
use crate::rpc::{self, backend_methods, BackendPacket, RpcService, ServiceError};
use crate::servers::ServerTag;

/// Run the back process forever.
///
/// Binds the RPC endpoint (fatal on failure), attaches to the front,
/// starts every module in parallel, and only then begins serving frontend
/// traffic. `reload` propagates restart recovery to the modules.
pub async fn run(reload: bool) -> io::Result<()> {
    let (addr, listener) = rpc::server::bind(rpc::BACKEND_ADDR).await.map_err(|e| {
        error!(address = rpc::BACKEND_ADDR, error = %e, "failed to bind backend rpc endpoint");
        e
    })?;

    let frontend = FrontendHandle::connect().await;
    let modules = Arc::new(ModuleSet::standard(frontend));

    modules.start_all(reload).await;
    info!(address = %addr, reload, "backend listening");

    rpc::server::serve(listener, Arc::new(BackendService::new(modules))).await;
    Ok(())
}

/// The RPC endpoint the back serves to the front.
pub struct BackendService {
    modules: Arc<ModuleSet>,
}

impl BackendService {
    pub fn new(modules: Arc<ModuleSet>) -> Self {
        BackendService { modules }
    }
}

#[async_trait]
impl RpcService for BackendService {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(), ServiceError> {
        match method {
            backend_methods::NEW_CONNECTION => {
                let packet: BackendPacket = parse_params(params)?;
                if let Some(module) = self.module_for(&packet.server) {
                    module.new_connection(packet.index, &packet.address).await;
                }
                Ok(())
            }

            backend_methods::HANDLE_PACKET => {
                let packet: BackendPacket = parse_params(params)?;
                if let Some(module) = self.module_for(&packet.server) {
                    module
                        .handle_packet(packet.index, &packet.data, &packet.address)
                        .await;
                }
                Ok(())
            }

            backend_methods::CLOSE_CONNECTION => {
                let packet: BackendPacket = parse_params(params)?;
                if let Some(module) = self.module_for(&packet.server) {
                    module.close_connection(packet.index).await;
                }
                Ok(())
            }

            backend_methods::SHUTDOWN => {
                info!("backend shutdown requested");
                self.modules.shutdown_all().await;
                // No reply is promised: the front tolerates the link dying
                // mid-call.
                std::process::exit(0);
            }

            _ => Err(ServiceError::new(format!("unknown method: {method}"))),
        }
    }
}

impl BackendService {
    /// Resolve the module for a wire tag. Unknown tags dispatch nowhere:
    /// a newer front may know services this back does not.
    fn module_for(&self, server: &str) -> Option<&Arc<dyn crate::modules::ProtocolModule>> {
        ServerTag::from_tag(server).and_then(|tag| self.modules.tcp_module(tag))
    }
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, ServiceError> {
    serde_json::from_value(params)
        .map_err(|e| ServiceError::new(format!("invalid parameters: {e}")))
}

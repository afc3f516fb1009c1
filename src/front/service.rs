//! The RPC endpoint the front serves to the back (and to the admin
//! command): packet delivery, back-initiated close, and the reload/shutdown
//! protocol.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::rpc::{frontend_methods, FrontendPacket, RpcService, ServiceError};

use super::broker::FrontBroker;
use super::process;

pub struct FrontendService {
    broker: Arc<FrontBroker>,
}

impl FrontendService {
    pub fn new(broker: Arc<FrontBroker>) -> Self {
        FrontendService { broker }
    }
}

#[async_trait]
impl RpcService for FrontendService {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(), ServiceError> {
        match method {
            frontend_methods::SEND_PACKET => {
                let packet: FrontendPacket = parse_params(params)?;
                self.broker
                    .send_packet(&packet.server, packet.index, &packet.data)
                    .await
            }

            frontend_methods::CLOSE_CONNECTION => {
                let packet: FrontendPacket = parse_params(params)?;
                self.broker
                    .close_connection(&packet.server, packet.index)
                    .await
            }

            frontend_methods::RELOAD_BACKEND => {
                info!("reloading backend");
                let guard = self.broker.shutdown_backend().await;
                if let Err(e) = process::spawn_backend(true) {
                    error!(error = %e, "failed to start backend process");
                    std::process::exit(1);
                }
                // The spin-dial helper releases the guard once the fresh
                // back answers; until then every relay task blocks on the
                // link and client sockets stay open.
                tokio::spawn(self.broker.clone().wait_for_backend(guard));
                Ok(())
            }

            frontend_methods::SHUTDOWN_BACKEND => {
                info!("shutting down backend");
                let guard = self.broker.shutdown_backend().await;
                // Terminal state: no new back is coming, so the link stays
                // held and every relay task blocks on its next call. The
                // operator is expected to tear the front down from here.
                tokio::spawn(async move {
                    let _guard = guard;
                    std::future::pending::<()>().await;
                });
                Ok(())
            }

            _ => Err(ServiceError::new(format!("unknown method: {method}"))),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, ServiceError> {
    serde_json::from_value(params)
        .map_err(|e| ServiceError::new(format!("invalid parameters: {e}")))
}

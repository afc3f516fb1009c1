//! Serving side of the RPC link.
//!
//! Each accepted connection gets its own read loop; each request record is
//! dispatched on its own task so a slow method never blocks the others on
//! the same connection. Responses share the connection's write half through
//! a mutex to keep records line-atomic.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::error::ServiceError;
use super::wire::{self, WireRequest, WireResponse};

/// A served RPC endpoint. Implementations dispatch on the method name.
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Handle one call. The returned error is carried back to the caller as
    /// the response's error string.
    async fn dispatch(&self, method: &str, params: serde_json::Value)
        -> Result<(), ServiceError>;
}

/// Bind `addr` and return the listener with its resolved local address.
///
/// Binding is separated from serving so callers (and tests) can bind an
/// ephemeral port and learn it before traffic starts.
pub async fn bind(addr: &str) -> io::Result<(SocketAddr, TcpListener)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((local, listener))
}

/// Serve `service` on an already-bound listener, forever.
///
/// Accept errors are logged and the loop continues; a single failed accept
/// must not kill the endpoint.
pub async fn serve(listener: TcpListener, service: Arc<dyn RpcService>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "rpc connection accepted");
                tokio::spawn(serve_connection(stream, service.clone()));
            }
            Err(e) => {
                error!(error = %e, "failed to accept rpc connection");
            }
        }
    }
}

/// Serve `service` on a background task; returns the task handle.
pub fn start(listener: TcpListener, service: Arc<dyn RpcService>) -> JoinHandle<()> {
    tokio::spawn(serve(listener, service))
}

async fn serve_connection(stream: TcpStream, service: Arc<dyn RpcService>) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let request: WireRequest = match wire::parse_line(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "unparsable rpc request, dropping connection");
                        break;
                    }
                };
                let service = service.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    let result = service.dispatch(&request.method, request.params).await;
                    let response = WireResponse {
                        id: request.id,
                        error: result.err().map(|e| e.to_string()),
                    };
                    if let Err(e) = write_response(&writer, &response).await {
                        debug!(error = %e, id = response.id, "failed to write rpc response");
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "rpc connection read error");
                break;
            }
        }
    }
}

async fn write_response(
    writer: &Mutex<OwnedWriteHalf>,
    response: &WireResponse,
) -> io::Result<()> {
    let line = wire::encode_line(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await
}

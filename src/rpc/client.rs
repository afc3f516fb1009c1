//! Outbound side of the RPC link.
//!
//! A [`RpcClient`] multiplexes any number of concurrent calls over a single
//! loopback TCP connection. Writes are serialised through a mutex; a reader
//! task routes each response record to the waiting caller by id. When the
//! connection closes underneath the client, every in-flight and future call
//! fails with [`RpcError::Shutdown`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::error::{RpcError, WireError};
use super::wire::{self, WireRequest, WireResponse};

/// Delay between spin-dial attempts in [`RpcClient::connect_retry`].
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A handle to one outbound RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    writer: Mutex<OwnedWriteHalf>,
    pending: StdMutex<Pending>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Option<String>>>,
}

impl RpcClient {
    /// Dial `addr` once.
    pub async fn connect(addr: &str) -> io::Result<RpcClient> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let inner = Arc::new(ClientInner {
            writer: Mutex::new(write_half),
            pending: StdMutex::new(Pending::default()),
            next_id: AtomicU64::new(1),
        });

        tokio::spawn(read_responses(read_half, inner.clone()));

        Ok(RpcClient { inner })
    }

    /// Dial `addr` repeatedly until a connection succeeds.
    ///
    /// Used by the front's spin-dial helper while the link mutex is held and
    /// by the back when attaching to the front at startup.
    pub async fn connect_retry(addr: &str) -> RpcClient {
        loop {
            match RpcClient::connect(addr).await {
                Ok(client) => return client,
                Err(e) => {
                    debug!(address = addr, error = %e, "rpc endpoint not ready, retrying");
                    tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Issue a call and wait for its response.
    ///
    /// Calls from different tasks proceed concurrently; responses are
    /// correlated by id, not by order.
    pub async fn call<P: Serialize>(&self, method: &str, params: &P) -> Result<(), RpcError> {
        let params = serde_json::to_value(params).map_err(|e| WireError::Malformed {
            reason: e.to_string(),
        })?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock_pending(&self.inner);
            if pending.closed {
                return Err(RpcError::Shutdown);
            }
            pending.waiters.insert(id, tx);
        }

        let line = wire::encode_line(&WireRequest {
            id,
            method: method.to_string(),
            params,
        })?;

        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                lock_pending(&self.inner).waiters.remove(&id);
                return Err(RpcError::Transport(e));
            }
        }

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(message)) => Err(RpcError::Remote(message)),
            // Sender dropped: the reader task saw the connection close.
            Err(_) => Err(RpcError::Shutdown),
        }
    }

    /// Issue a parameterless call.
    pub async fn call_empty(&self, method: &str) -> Result<(), RpcError> {
        self.call(method, &serde_json::Value::Null).await
    }

    /// Close the handle. In-flight and future calls fail with
    /// [`RpcError::Shutdown`]; the write half is shut down.
    pub async fn close(&self) -> io::Result<()> {
        fail_pending(&self.inner);
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await
    }
}

fn lock_pending(inner: &ClientInner) -> std::sync::MutexGuard<'_, Pending> {
    inner.pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mark the link closed and drop every waiter, failing their calls.
fn fail_pending(inner: &ClientInner) {
    let mut pending = lock_pending(inner);
    pending.closed = true;
    pending.waiters.clear();
}

/// Reader task: route response records to waiting callers until the
/// connection closes.
async fn read_responses(read_half: OwnedReadHalf, inner: Arc<ClientInner>) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let response: WireResponse = match wire::parse_line(&line) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "unparsable rpc response, dropping link");
                        break;
                    }
                };
                let waiter = lock_pending(&inner).waiters.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.error);
                    }
                    None => {
                        warn!(id = response.id, "rpc response for unknown call id");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "rpc link read error");
                break;
            }
        }
    }

    fail_pending(&inner);
}

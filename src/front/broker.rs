//! Front broker state: the RPC link, the connection table, and the busy
//! counter.
//!
//! A single exclusive mutex guards both the outbound RPC handle and the
//! table. This is deliberate: it makes the reload protocol expressible as
//! "hold the link, wait for busy to drain". Every table mutation, handle
//! swap, and busy increment happens while the mutex is held; decrements
//! happen after release, when the call has returned.
//!
//! Holding the lock across a back restart is what keeps client sockets
//! open: relay tasks block on acquisition instead of failing, and resume
//! transparently against the fresh back once the spin-dial helper stores
//! the new handle and releases the guard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::rpc::{backend_methods, RpcClient, ServiceError};
use crate::servers::ServerTag;

/// Interval at which [`FrontBroker::drain_busy`] re-checks the counter.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The owned guard over the link state. Holding it is what "holding the
/// link mutex" means throughout the broker: while it lives, no relay task
/// can begin an outbound call.
pub type LinkGuard = OwnedMutexGuard<LinkState>;

/// Mutex-guarded state: the outbound handle and the connection table.
///
/// `client` is `None` exactly while a back restart is in progress; only
/// holders of the guard set or clear it.
pub struct LinkState {
    client: Option<RpcClient>,
    connections: HashMap<ServerTag, HashMap<u64, ClientConn>>,
}

/// The front-owned half of a client socket: the write half (reads live in
/// the relay task) and the token that stops the relay when the back closes
/// the connection.
struct ClientConn {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
}

/// Process-wide front broker state with explicit lifecycle.
pub struct FrontBroker {
    state: Arc<Mutex<LinkState>>,
    busy: AtomicUsize,
    backend_addr: String,
}

impl FrontBroker {
    /// Create the broker with an empty table for every managed tag.
    pub fn new(backend_addr: impl Into<String>) -> Arc<FrontBroker> {
        let connections = ServerTag::ALL
            .into_iter()
            .map(|tag| (tag, HashMap::new()))
            .collect();

        Arc::new(FrontBroker {
            state: Arc::new(Mutex::new(LinkState {
                client: None,
                connections,
            })),
            busy: AtomicUsize::new(0),
            backend_addr: backend_addr.into(),
        })
    }

    /// Acquire the link guard, waiting indefinitely.
    pub async fn lock_link(&self) -> LinkGuard {
        self.state.clone().lock_owned().await
    }

    /// Spin-dial the back endpoint until it answers, store the fresh
    /// handle, and release the held guard.
    ///
    /// Invoked at startup (the front holds the guard from the very
    /// beginning) and after a reload (the guard is still held from the
    /// shutdown protocol).
    pub async fn wait_for_backend(self: Arc<Self>, mut guard: LinkGuard) {
        let client = RpcClient::connect_retry(&self.backend_addr).await;
        guard.client = Some(client);
        info!(address = %self.backend_addr, "backend rpc link established");
        drop(guard);
    }

    /// Number of outbound calls currently in flight.
    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Pin the link busy for one outbound call. Must be invoked while the
    /// link guard is held; the returned guard is dropped after the call
    /// returns, which happens after the lock is released.
    pub fn busy_guard(self: &Arc<Self>) -> BusyGuard {
        self.busy.fetch_add(1, Ordering::SeqCst);
        BusyGuard {
            broker: Arc::clone(self),
        }
    }

    /// Wait until every in-flight outbound call has settled. The caller
    /// holds the link guard, so no new call can start meanwhile.
    pub async fn drain_busy(&self) {
        loop {
            if self.busy.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Open phase: register the socket under `(tag, index)`, pin the link
    /// busy, and hand out the current handle.
    pub async fn begin_open(
        self: &Arc<Self>,
        tag: ServerTag,
        index: u64,
        writer: OwnedWriteHalf,
        cancel: CancellationToken,
    ) -> (Option<RpcClient>, BusyGuard) {
        let mut state = self.state.lock().await;
        let busy = self.busy_guard();
        state
            .connections
            .entry(tag)
            .or_default()
            .insert(index, ClientConn { writer, cancel });
        (state.client.clone(), busy)
    }

    /// Relay phase: pin the link busy and hand out the current handle.
    pub async fn begin_call(self: &Arc<Self>) -> (Option<RpcClient>, BusyGuard) {
        let state = self.state.lock().await;
        let busy = self.busy_guard();
        (state.client.clone(), busy)
    }

    /// Close phase: remove the entry (a no-op when the back already closed
    /// it), pin the link busy, and hand out the current handle.
    pub async fn begin_close(
        self: &Arc<Self>,
        tag: ServerTag,
        index: u64,
    ) -> (Option<RpcClient>, BusyGuard) {
        let mut state = self.state.lock().await;
        let busy = self.busy_guard();
        if let Some(map) = state.connections.get_mut(&tag) {
            map.remove(&index);
        }
        (state.client.clone(), busy)
    }

    /// Drop the entry for a connection whose open phase failed. The write
    /// half is dropped here; the relay task drops the read half, closing
    /// the socket.
    pub async fn discard(&self, tag: ServerTag, index: u64) {
        let mut state = self.state.lock().await;
        if let Some(map) = state.connections.get_mut(&tag) {
            map.remove(&index);
        }
    }

    /// Served `SendPacket`: write `data` to the socket at `(tag, index)`.
    ///
    /// Writes are serialised by the link mutex across all connections.
    pub async fn send_packet(
        &self,
        server: &str,
        index: u64,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let Some(tag) = ServerTag::from_tag(server) else {
            return Err(ServiceError::bad_index());
        };

        let mut state = self.state.lock().await;
        let conn = state
            .connections
            .get_mut(&tag)
            .and_then(|map| map.get_mut(&index))
            .ok_or_else(ServiceError::bad_index)?;
        conn.writer.write_all(data).await.map_err(ServiceError::from)
    }

    /// Served `CloseConnection`: remove and close the socket at
    /// `(tag, index)`. Cancelling the token ends the relay task, which
    /// drops the read half.
    pub async fn close_connection(&self, server: &str, index: u64) -> Result<(), ServiceError> {
        let Some(tag) = ServerTag::from_tag(server) else {
            return Err(ServiceError::bad_index());
        };

        let mut state = self.state.lock().await;
        let mut conn = state
            .connections
            .get_mut(&tag)
            .and_then(|map| map.remove(&index))
            .ok_or_else(ServiceError::bad_index)?;
        conn.cancel.cancel();
        conn.writer.shutdown().await.map_err(ServiceError::from)
    }

    /// The shutdown protocol: hold the link, drain in-flight calls, tell
    /// the back to shut down, close the handle. Returns the still-held
    /// guard; the caller decides whether a fresh back is coming.
    pub async fn shutdown_backend(self: &Arc<Self>) -> LinkGuard {
        // Halt issuance of new outbound calls. Calls already in flight
        // incremented busy before the lock was released.
        let mut guard = self.lock_link().await;
        self.drain_busy().await;

        if let Some(client) = guard.client.take() {
            match client.call_empty(backend_methods::SHUTDOWN).await {
                Ok(()) => {}
                // The back may exit before its reply makes it out.
                Err(e) if e.is_connection_closed() => {
                    debug!(error = %e, "backend exited before replying to shutdown");
                }
                Err(e) => {
                    error!(error = %e, "failed to shut down backend");
                }
            }

            if let Err(e) = client.close().await {
                error!(error = %e, "failed to close backend rpc handle");
            }
        }

        guard
    }
}

/// RAII increment of the busy counter; decrements on drop, even across a
/// panic in the calling task.
pub struct BusyGuard {
    broker: Arc<FrontBroker>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.broker.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_busy_guard_counts() {
        let broker = FrontBroker::new("127.0.0.1:1");
        assert_eq!(broker.busy_count(), 0);

        let first = broker.busy_guard();
        let second = broker.busy_guard();
        assert_eq!(broker.busy_count(), 2);

        drop(first);
        assert_eq!(broker.busy_count(), 1);
        drop(second);
        assert_eq!(broker.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_completes_when_guards_drop() {
        let broker = FrontBroker::new("127.0.0.1:1");
        let guard = broker.busy_guard();

        let drainer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.drain_busy().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!drainer.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), drainer)
            .await
            .expect("drain did not settle")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_immediate_when_idle() {
        let broker = FrontBroker::new("127.0.0.1:1");
        tokio::time::timeout(Duration::from_millis(100), broker.drain_busy())
            .await
            .expect("drain should return at once");
    }

    #[tokio::test]
    async fn test_link_guard_blocks_begin_call() {
        let broker = FrontBroker::new("127.0.0.1:1");
        let guard = broker.lock_link().await;

        let blocked = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let (_link, busy) = broker.begin_call().await;
                drop(busy);
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!blocked.is_finished(), "call began while the link was held");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("call never unblocked")
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_packet_unknown_index() {
        let broker = FrontBroker::new("127.0.0.1:1");
        let err = broker.send_packet("gamestats", 99_999, b"x").await.unwrap_err();
        assert_eq!(err.to_string(), crate::rpc::BAD_INDEX_MSG);
    }

    #[tokio::test]
    async fn test_close_connection_unknown_tag() {
        let broker = FrontBroker::new("127.0.0.1:1");
        let err = broker.close_connection("nas", 1).await.unwrap_err();
        assert_eq!(err.to_string(), crate::rpc::BAD_INDEX_MSG);
    }
}

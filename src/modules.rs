//! The contract consumed from protocol handler modules, and the standard
//! module set the back supervisor runs.
//!
//! Protocol decoding is not the broker's business: each handler is consumed
//! only through this small fixed contract. The broker hands every module
//! raw bytes in arrival order; modules perform their own framing on the
//! concatenated stream and emit bytes back through a [`FrontendHandle`].
//!
//! The codecs themselves live outside this crate. The standard set wires a
//! tracing-only placeholder per service so the broker runs end to end; the
//! [`EchoModule`] reflects payloads back to their sender and is exercised
//! by the integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::rpc::{frontend_methods, FrontendPacket, RpcClient, RpcError, FRONTEND_ADDR};
use crate::servers::ServerTag;

/// A protocol handler module.
///
/// `start` is called once at back startup; the supervisor waits for every
/// module's `start` to return before serving frontend traffic. `reload`
/// signals a back restart rather than a cold start, for modules that
/// reattach to persisted state.
///
/// After a reload a module may see `handle_packet` for an index it never
/// got a `new_connection` for: client sockets survive the restart and are
/// not re-announced. Implementations must tolerate such orphans.
#[async_trait]
pub trait ProtocolModule: Send + Sync {
    /// The module's service name (also its wire tag for TCP modules).
    fn name(&self) -> &'static str;

    /// Bring the module up. Called in parallel with every other module.
    async fn start(&self, reload: bool);

    /// Tear the module down. Called in parallel with every other module.
    async fn shutdown(&self);

    /// A client connected. `address` is its remote address.
    async fn new_connection(&self, index: u64, address: &str) {
        let _ = (index, address);
    }

    /// Bytes arrived from a client. Only `serverbrowser` consumes
    /// `address` here; the other TCP modules saw it at connection open.
    async fn handle_packet(&self, index: u64, data: &[u8], address: &str) {
        let _ = (index, data, address);
    }

    /// The client connection is gone.
    async fn close_connection(&self, index: u64) {
        let _ = index;
    }
}

/// The back's outbound handle to the front, shared by every module that
/// emits bytes or closes clients.
#[derive(Clone)]
pub struct FrontendHandle {
    client: RpcClient,
}

impl FrontendHandle {
    /// Attach to the front's RPC endpoint, retrying until it answers.
    pub async fn connect() -> FrontendHandle {
        FrontendHandle::connect_to(FRONTEND_ADDR).await
    }

    /// Attach to a specific endpoint (tests run the front on ephemeral
    /// ports).
    pub async fn connect_to(addr: &str) -> FrontendHandle {
        FrontendHandle {
            client: RpcClient::connect_retry(addr).await,
        }
    }

    /// Write bytes to the client at `(tag, index)`.
    ///
    /// Fails with the bad-index error when the client is already gone;
    /// callers racing a disconnect must tolerate that.
    pub async fn send_packet(
        &self,
        server: ServerTag,
        index: u64,
        data: &[u8],
    ) -> Result<(), RpcError> {
        self.client
            .call(
                frontend_methods::SEND_PACKET,
                &FrontendPacket {
                    server: server.tag().to_string(),
                    index,
                    data: data.to_vec(),
                },
            )
            .await
    }

    /// Close the client at `(tag, index)`.
    pub async fn close_connection(&self, server: ServerTag, index: u64) -> Result<(), RpcError> {
        self.client
            .call(
                frontend_methods::CLOSE_CONNECTION,
                &FrontendPacket {
                    server: server.tag().to_string(),
                    index,
                    data: Vec::new(),
                },
            )
            .await
    }
}

/// Placeholder handler: logs lifecycle events and traffic, consumes
/// nothing. Stands in for a real codec.
pub struct TraceModule {
    name: &'static str,
}

impl TraceModule {
    pub fn new(name: &'static str) -> Arc<TraceModule> {
        Arc::new(TraceModule { name })
    }
}

#[async_trait]
impl ProtocolModule for TraceModule {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self, reload: bool) {
        info!(module = self.name, reload, "module started");
    }

    async fn shutdown(&self) {
        info!(module = self.name, "module stopped");
    }

    async fn new_connection(&self, index: u64, address: &str) {
        info!(module = self.name, index, address, "new connection");
    }

    async fn handle_packet(&self, index: u64, data: &[u8], _address: &str) {
        info!(module = self.name, index, len = data.len(), "received packet");
    }

    async fn close_connection(&self, index: u64) {
        info!(module = self.name, index, "connection closed");
    }
}

/// Development handler that reflects every payload back to its sender.
/// Exercises the full reverse path; used by the integration tests.
pub struct EchoModule {
    tag: ServerTag,
    frontend: FrontendHandle,
}

impl EchoModule {
    pub fn new(tag: ServerTag, frontend: FrontendHandle) -> Arc<EchoModule> {
        Arc::new(EchoModule { tag, frontend })
    }
}

#[async_trait]
impl ProtocolModule for EchoModule {
    fn name(&self) -> &'static str {
        self.tag.tag()
    }

    async fn start(&self, reload: bool) {
        info!(module = self.name(), reload, "module started");
    }

    async fn shutdown(&self) {
        info!(module = self.name(), "module stopped");
    }

    async fn handle_packet(&self, index: u64, data: &[u8], _address: &str) {
        if let Err(e) = self.frontend.send_packet(self.tag, index, data).await {
            // Losing the race against a client disconnect is expected.
            debug!(module = self.name(), index, error = %e, "echo failed");
        }
    }
}

/// The modules the back supervisor runs: one per TCP tag plus the
/// UDP-facing and administrative services, which only participate in
/// start/shutdown here.
pub struct ModuleSet {
    tcp: HashMap<ServerTag, Arc<dyn ProtocolModule>>,
    all: Vec<Arc<dyn ProtocolModule>>,
    frontend: FrontendHandle,
}

impl ModuleSet {
    /// The standard wiring: placeholder handlers for every service.
    pub fn standard(frontend: FrontendHandle) -> ModuleSet {
        let mut set = ModuleSet {
            tcp: HashMap::new(),
            all: Vec::new(),
            frontend,
        };

        for tag in ServerTag::ALL {
            set.register_tcp(tag, TraceModule::new(tag.tag()));
        }
        for name in ["nas", "qr2", "natneg", "sake", "api"] {
            set.register_service(TraceModule::new(name));
        }

        set
    }

    /// An empty set for custom wiring (tests).
    pub fn empty(frontend: FrontendHandle) -> ModuleSet {
        ModuleSet {
            tcp: HashMap::new(),
            all: Vec::new(),
            frontend,
        }
    }

    /// Register the handler for a broker-managed TCP tag.
    pub fn register_tcp(&mut self, tag: ServerTag, module: Arc<dyn ProtocolModule>) {
        self.all.push(module.clone());
        self.tcp.insert(tag, module);
    }

    /// Register a module with no broker-managed connections (UDP services,
    /// the admin API).
    pub fn register_service(&mut self, module: Arc<dyn ProtocolModule>) {
        self.all.push(module);
    }

    /// The handler bound to a TCP tag.
    pub fn tcp_module(&self, tag: ServerTag) -> Option<&Arc<dyn ProtocolModule>> {
        self.tcp.get(&tag)
    }

    /// The shared outbound handle to the front.
    pub fn frontend(&self) -> &FrontendHandle {
        &self.frontend
    }

    /// Start every module in parallel and wait for all of them to declare
    /// readiness.
    pub async fn start_all(&self, reload: bool) {
        let mut tasks = JoinSet::new();
        for module in &self.all {
            let module = module.clone();
            tasks.spawn(async move { module.start(reload).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Shut every module down in parallel and wait for all of them.
    pub async fn shutdown_all(&self) {
        let mut tasks = JoinSet::new();
        for module in &self.all {
            let module = module.clone();
            tasks.spawn(async move { module.shutdown().await });
        }
        while tasks.join_next().await.is_some() {}
    }
}

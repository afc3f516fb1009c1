//! Accept loops and per-connection relay tasks.
//!
//! One accept loop per managed tag assigns monotonically increasing indices
//! and spawns a relay task per client. The relay task runs a strict
//! three-phase protocol: announce the connection to the back, forward every
//! read, announce the close. All three phases pin the link busy while the
//! guard is held and issue their call after release.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::rpc::{backend_methods, BackendPacket, RpcClient, RpcError};
use crate::servers::ServerTag;

use super::broker::FrontBroker;

/// Relay read buffer size. The back sees reads as-is; the modules frame the
/// concatenated stream themselves.
const READ_BUFFER_SIZE: usize = 1024;

/// Accept clients for one tag forever.
///
/// Indices increment per accepted connection and are never reused within a
/// front lifetime; wrap-around is unreachable in practice. A failed accept
/// is logged and the loop continues.
pub async fn accept_loop(broker: Arc<FrontBroker>, tag: ServerTag, listener: TcpListener) {
    let mut index: u64 = 0;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(server = %tag, error = %e, "failed to accept connection");
                continue;
            }
        };

        if let Err(e) = enable_keepalive(&stream) {
            warn!(server = %tag, error = %e, "unable to set keepalive");
        }

        index = index.wrapping_add(1);

        tokio::spawn(relay_connection(broker.clone(), tag, index, stream, peer));
    }
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    socket2::SockRef::from(stream).set_keepalive(true)
}

/// Forward bytes and lifecycle events for a single client connection.
pub async fn relay_connection(
    broker: Arc<FrontBroker>,
    tag: ServerTag,
    index: u64,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let address = peer.to_string();
    let (mut read_half, write_half) = stream.into_split();
    let cancel = CancellationToken::new();

    // Open: register the socket, then announce it. A failed announcement
    // unregisters and skips the close phase entirely.
    let (link, busy) = broker
        .begin_open(tag, index, write_half, cancel.clone())
        .await;
    let Some(link) = link else {
        error!(server = %tag, index, "rpc link unavailable");
        broker.discard(tag, index).await;
        return;
    };
    let opened = link
        .call(
            backend_methods::NEW_CONNECTION,
            &BackendPacket {
                server: tag.tag().to_string(),
                index,
                address: address.clone(),
                data: Vec::new(),
            },
        )
        .await;
    drop(busy);

    if let Err(e) = opened {
        error!(
            server = %tag,
            index,
            error = %e,
            "failed to forward new connection to backend"
        );
        broker.discard(tag, index).await;
        return;
    }

    // Relay: every read becomes one HandlePacket call, in order. The loop
    // ends on end-of-stream, a read error, a back-initiated close, or an
    // RPC failure.
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_half.read(&mut buffer) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };

        let (link, busy) = broker.begin_call().await;
        let Some(link) = link else {
            error!(server = %tag, index, "rpc link unavailable");
            break;
        };
        let forwarded = link
            .call(
                backend_methods::HANDLE_PACKET,
                &BackendPacket {
                    server: tag.tag().to_string(),
                    index,
                    address: address.clone(),
                    data: buffer[..n].to_vec(),
                },
            )
            .await;
        drop(busy);

        if let Err(e) = forwarded {
            error!(
                server = %tag,
                index,
                error = %e,
                "failed to forward packet to backend"
            );
            fatal_if_link_lost(&e);
            break;
        }
    }

    // Close: unregister (a no-op if the back closed us first) and announce.
    let (link, busy) = broker.begin_close(tag, index).await;
    let Some(link) = link else {
        return;
    };
    let closed = announce_close(&link, tag, index, &address).await;
    drop(busy);

    if let Err(e) = closed {
        error!(
            server = %tag,
            index,
            error = %e,
            "failed to forward close connection to backend"
        );
        fatal_if_link_lost(&e);
    }
}

async fn announce_close(
    link: &RpcClient,
    tag: ServerTag,
    index: u64,
    address: &str,
) -> Result<(), RpcError> {
    link.call(
        backend_methods::CLOSE_CONNECTION,
        &BackendPacket {
            server: tag.tag().to_string(),
            index,
            address: address.to_string(),
            data: Vec::new(),
        },
    )
    .await
}

/// A shut-down link is unrecoverable for the front: a relay cannot resume
/// mid-stream without a back.
fn fatal_if_link_lost(error: &RpcError) {
    if error.is_shutdown() {
        error!("backend rpc link shut down, exiting");
        std::process::exit(1);
    }
}

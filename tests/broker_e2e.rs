//! End-to-end test against the real binary on the fixed ports: cold start,
//! a client lifecycle on the gpcm port, a live reload that keeps the
//! client's socket open, and the terminal shutdown.
//!
//! Kept to a single test function because the front binds the well-known
//! ports; concurrent instances would collide.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;

const GPCM_ADDR: &str = "127.0.0.1:29900";

/// Accumulates a child's output lines for predicate-based waiting.
#[derive(Clone, Default)]
struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    fn capture<R>(&self, reader: R)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let lines = self.lines.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                lines.lock().unwrap().push(line);
            }
        });
    }

    fn count_matching(&self, needles: &[&str]) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|line| needles.iter().all(|needle| line.contains(needle)))
            .count()
    }

    async fn wait_for(&self, needles: &[&str], count: usize, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            if self.count_matching(needles) >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}\ncaptured so far:\n{}",
                self.lines.lock().unwrap().join("\n")
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

async fn wait_for_listener(addr: &str) -> TcpStream {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(_) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "listener on {addr} never came up"
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn run_admin_command(bin: &str, args: &[&str]) {
    let status = Command::new(bin)
        .args(args)
        .status()
        .await
        .expect("failed to run admin command");
    assert!(status.success(), "admin command {args:?} failed: {status}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lifecycle_reload_and_shutdown() {
    let bin = env!("CARGO_BIN_EXE_portgate");

    let mut front = Command::new(bin)
        .env("PORTGATE_BIND_ADDRESS", "127.0.0.1")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn front");

    // The back inherits the front's stderr, so one buffer sees both sides.
    let logs = LogBuffer::default();
    logs.capture(front.stdout.take().unwrap());
    logs.capture(front.stderr.take().unwrap());

    // Cold start: back comes up, link established, listeners bound.
    let mut client = wait_for_listener(GPCM_ADDR).await;
    logs.wait_for(&["backend rpc link established"], 1, "initial link")
        .await;

    // Scenario: client bytes reach the gpcm module under index 1.
    client.write_all(&[1, 2, 3, 4, 5]).await.unwrap();
    logs.wait_for(
        &["new connection", "gpcm", "index=1"],
        1,
        "connection announcement",
    )
    .await;
    logs.wait_for(
        &["received packet", "gpcm", "index=1", "len=5"],
        1,
        "first packet",
    )
    .await;

    // Live reload: the back restarts, the client socket survives, and the
    // next bytes arrive under the same index with no re-announcement.
    run_admin_command(bin, &["cmd", "f", "backend"]).await;
    logs.wait_for(&["backend rpc link established"], 2, "re-established link")
        .await;

    client.write_all(&[6, 7]).await.unwrap();
    logs.wait_for(
        &["received packet", "gpcm", "index=1", "len=2"],
        1,
        "post-reload packet",
    )
    .await;
    assert_eq!(
        logs.count_matching(&["new connection", "gpcm", "index=1"]),
        1,
        "reload must not re-announce the surviving connection"
    );

    // Terminal shutdown: the back exits for good; the front keeps sockets
    // open but relays nothing further.
    run_admin_command(bin, &["cmd", "f", "backend", "shutdown"]).await;
    let packets_before = logs.count_matching(&["received packet", "gpcm"]);

    client.write_all(&[8, 9, 10]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        logs.count_matching(&["received packet", "gpcm"]),
        packets_before,
        "no packet may reach a back that was shut down for good"
    );

    // The client socket is still open from the front's side: nothing has
    // closed it, reads just never complete. (A read here would block, so
    // assert via a successful write instead.)
    client.write_all(&[11]).await.unwrap();

    front.kill().await.expect("failed to kill front");
}

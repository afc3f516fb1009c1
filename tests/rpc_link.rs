//! Integration tests for the loopback RPC layer: round trips, concurrent
//! in-flight calls, remote errors, and link-shutdown behaviour. Everything
//! runs on ephemeral ports.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portgate::rpc::{self, RpcClient, RpcError, RpcService, ServiceError};

/// Records every dispatched call; fails methods on demand.
#[derive(Default)]
struct RecordingService {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl RpcService for RecordingService {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        match method {
            "Fail" => Err(ServiceError::new("boom")),
            "MissingIndex" => Err(ServiceError::bad_index()),
            "Slow" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

async fn start_service() -> (String, Arc<RecordingService>) {
    let (addr, listener) = rpc::server::bind("127.0.0.1:0").await.unwrap();
    let service = Arc::new(RecordingService::default());
    rpc::server::start(listener, service.clone());
    (addr.to_string(), service)
}

#[tokio::test]
async fn test_call_round_trip() {
    let (addr, service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    client
        .call("Ping", &serde_json::json!({"value": 7}))
        .await
        .unwrap();

    let calls = service.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "Ping");
    assert_eq!(calls[0].1["value"], 7);
}

#[tokio::test]
async fn test_parameterless_call() {
    let (addr, service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    client.call_empty("Shutdown").await.unwrap();

    let calls = service.calls.lock().unwrap();
    assert_eq!(calls[0].0, "Shutdown");
    assert!(calls[0].1.is_null());
}

#[tokio::test]
async fn test_remote_error_surfaces() {
    let (addr, _service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    let err = client.call_empty("Fail").await.unwrap_err();
    match err {
        RpcError::Remote(message) => assert_eq!(message, "boom"),
        other => panic!("expected remote error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_index_recognised() {
    let (addr, _service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    let err = client.call_empty("MissingIndex").await.unwrap_err();
    assert!(err.is_bad_index());
    assert!(!err.is_shutdown());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_calls_share_one_connection() {
    let (addr, service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(
            async move { client.call_empty("Slow").await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Ten 200ms calls in flight together finish far sooner than they
    // would serially.
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "calls did not overlap: {:?}",
        started.elapsed()
    );
    assert_eq!(service.calls.lock().unwrap().len(), 10);
}

#[tokio::test]
async fn test_peer_drop_fails_in_flight_calls() {
    // A listener that accepts and immediately drops every connection.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let client = RpcClient::connect(&addr).await.unwrap();
    let err = client.call_empty("Anything").await.unwrap_err();
    assert!(
        matches!(err, RpcError::Shutdown | RpcError::Transport(_)),
        "unexpected error: {err:?}"
    );

    // Once the link is gone, later calls fail with the shutdown error.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = client.call_empty("Anything").await.unwrap_err();
    assert!(err.is_shutdown(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_close_fails_future_calls() {
    let (addr, _service) = start_service().await;
    let client = RpcClient::connect(&addr).await.unwrap();

    client.call_empty("Ping").await.unwrap();
    client.close().await.unwrap();

    let err = client.call_empty("Ping").await.unwrap_err();
    assert!(err.is_shutdown());
}

#[tokio::test]
async fn test_connect_retry_waits_for_endpoint() {
    // Reserve an address, release it, then bind it again shortly after the
    // dialler starts spinning.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dial = {
        let addr = addr.clone();
        tokio::spawn(async move { RpcClient::connect_retry(&addr).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!dial.is_finished(), "dial succeeded with nothing listening");

    let (bound, listener) = rpc::server::bind(&addr).await.unwrap();
    assert_eq!(bound.to_string(), addr);
    rpc::server::start(listener, Arc::new(RecordingService::default()));

    let client = tokio::time::timeout(Duration::from_secs(5), dial)
        .await
        .expect("spin-dial never connected")
        .unwrap();
    client.call_empty("Ping").await.unwrap();
}

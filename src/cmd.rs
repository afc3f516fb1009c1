//! Administrative command entry: dial a running broker's RPC endpoint from
//! a separate invocation of the binary and issue a reload or shutdown.
//!
//! Localhost only, no authentication; the endpoints never leave the
//! machine.

use crate::rpc::{frontend_methods, RpcClient, BACKEND_ADDR, FRONTEND_ADDR};

/// Run an admin command. Returns the process exit code.
pub async fn run(target: &str, command: &[String]) -> i32 {
    if command.is_empty() {
        eprintln!("usage: portgate cmd <f|b> <command...>");
        return 1;
    }

    let addr = match target {
        "f" => FRONTEND_ADDR,
        "b" => BACKEND_ADDR,
        other => {
            eprintln!("unknown command target '{other}', expected 'f' (front) or 'b' (back)");
            return 1;
        }
    };

    let client = match RpcClient::connect(addr).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to connect to rpc endpoint {addr}: {e}");
            return 1;
        }
    };

    if target == "b" {
        eprintln!("unknown backend command: '{}'", command[0]);
        return 1;
    }

    let result = match command[0].as_str() {
        "backend" => {
            if command.get(1).map(String::as_str) == Some("shutdown") {
                client
                    .call_empty(frontend_methods::SHUTDOWN_BACKEND)
                    .await
            } else {
                client.call_empty(frontend_methods::RELOAD_BACKEND).await
            }
        }
        other => {
            eprintln!("unknown frontend command: '{other}'");
            return 1;
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("failed to send command: {e}");
            1
        }
    }
}

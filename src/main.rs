//! Process entry point.
//!
//! One binary, three roles, selected by subcommand: the front (default),
//! the back (`backend`, spawned by the front as a child process), and the
//! admin command (`cmd`). Front and back are separate processes so the
//! back can be restarted without closing any client connection.

use clap::Parser;

use portgate::cli::{BackendMode, Cli, Commands};
use portgate::config::Config;
use portgate::{back, cmd, front};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("portgate: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let code = match cli.command {
        None => run_front(config, false).await,
        Some(Commands::Skipbackend) => run_front(config, true).await,
        Some(Commands::Backend { mode }) => {
            run_backend(mode == Some(BackendMode::Reload)).await
        }
        Some(Commands::Cmd { target, command }) => cmd::run(&target, &command).await,
    };

    std::process::exit(code);
}

async fn run_front(config: Config, skip_backend: bool) -> i32 {
    match front::run(config, skip_backend).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "frontend failed");
            1
        }
    }
}

async fn run_backend(reload: bool) -> i32 {
    match back::run(reload).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "backend failed");
            1
        }
    }
}

/// Initialise the tracing subscriber with stderr output. `RUST_LOG`
/// overrides the configured default level.
fn init_tracing(default_level: &str) {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

// forge-ctl-cli/src/main.rs
// ============================================================================
// Module: Forge CLI Entry Point
// Description: Parses arguments, loads configuration, and runs the
//              control-plane HTTP/WebSocket server to completion.
// Purpose: Map startup and runtime failures to the process exit code the
//          operator's supervisor acts on.
// Dependencies: clap, tokio, tracing-subscriber, forge-ctl-cli
// ============================================================================

//! ## Overview
//! Exit codes: `0` on a clean shutdown (Ctrl-C or SIGTERM), `1` when
//! configuration or collaborator assembly fails before anything binds, `2`
//! when the server itself fails after it started accepting connections.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use forge_ctl_cli::RuntimeError;
use forge_ctl_cli::StartupError;
use forge_ctl_config::ForgeConfig;

/// Control-plane server command-line interface.
#[derive(Parser, Debug)]
#[command(name = "forge-ctl")]
struct Cli {
    /// Path to the TOML configuration file; falls back to
    /// `FORGE_CTL_CONFIG`, then `./forge-ctl.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Startup(err)) => {
            write_stderr_line(&format!("forge-ctl: fatal startup error: {err}"));
            ExitCode::from(1)
        }
        Err(Failure::Runtime(err)) => {
            write_stderr_line(&format!("forge-ctl: unrecoverable runtime error: {err}"));
            ExitCode::from(2)
        }
    }
}

/// Top-level failure classification driving the process exit code.
enum Failure {
    /// Failed before the listener bound; maps to exit code 1.
    Startup(StartupError),
    /// Failed after the server started serving traffic; maps to exit code 2.
    Runtime(RuntimeError),
}

impl From<StartupError> for Failure {
    fn from(err: StartupError) -> Self {
        Self::Startup(err)
    }
}

async fn run() -> Result<(), Failure> {
    let cli = Cli::parse();
    init_tracing();

    let config = ForgeConfig::load(cli.config.as_deref()).map_err(StartupError::from)?;
    let assembled = forge_ctl_cli::assemble(&config)?;

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| Failure::Startup(StartupError::Bind(format!("{bind}: {err}"))))?;
    tracing::info!(%bind, "forge-ctl listening");

    let serve_result = axum::serve(listener, assembled.router).with_graceful_shutdown(shutdown_signal()).await;

    assembled.tick_task.abort();
    assembled.reap_task.abort();

    serve_result.map_err(|err| Failure::Runtime(RuntimeError(err.to_string())))
}

/// Resolves once a Ctrl-C or SIGTERM is received, triggering graceful
/// shutdown of the axum server.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();
}

fn write_stderr_line(message: &str) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "{message}");
}

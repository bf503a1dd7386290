//! Livedesk CLI and live chat server entry point.
//!
//! Binary name: `livedesk`
//!
//! Parses CLI arguments, initializes the session store, then dispatches to
//! the history commands or starts the WebSocket + REST server.

mod cli;
mod http;
mod state;
mod store;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, SessionsCommand};
use state::{AppState, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity; RUST_LOG still wins
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,livedesk=info",
        1 => "info,livedesk=debug",
        _ => "trace",
    };
    livedesk_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    livedesk_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "livedesk", &mut std::io::stdout());
        return Ok(());
    }

    let ephemeral = matches!(cli.command, Commands::Serve { ephemeral: true, .. });
    let state = AppState::init(ephemeral).await?;

    match cli.command {
        Commands::Sessions { action } => match action {
            SessionsCommand::List { status, limit } => {
                cli::session::list_sessions(&state, status.as_deref(), limit, cli.json).await?;
            }
            SessionsCommand::Show { id } => {
                cli::session::show_session(&state, &id, cli.json).await?;
            }
        },

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Serve { port, host, .. } => {
            let cancel = CancellationToken::new();
            let (server_state, coordinator_task) = ServerState::start(state, cancel.clone()).await?;

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, store = server_state.app.store.backend_name(), "server listening");

            if !cli.quiet {
                println!(
                    "  {} Livedesk listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!(
                    "  {} ws://{addr}/ws/chat?role=visitor|agent&user=<id>",
                    console::style("↔").dim()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(server_state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            cancel.cancel();
            if let Err(err) = coordinator_task.await {
                tracing::error!(error = %err, "coordinator task failed");
            }

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

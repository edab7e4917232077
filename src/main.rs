//! wsrelay - Persistent WebSocket relay
//!
//! This is the main entry point for the wsrelay binary. The relay maintains
//! a single outbound WebSocket connection to a remote endpoint, keeps it
//! alive across network interruptions, and forwards payloads accepted on a
//! local HTTP endpoint over the live connection.

mod cli;
mod config;
mod error;
mod logging;
mod protocol;
mod relay;
mod upstream;
mod version;

use clap::Parser;
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::upstream::{
    wait_ready, StartupStatus, UpstreamClient, UpstreamClientConfig, UpstreamEvent,
};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    // Commands that don't need the full logging stack
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return;
        }
        Commands::Config { subcommand } => {
            if let Err(e) = logging::init_simple(tracing::Level::WARN) {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            if let Err(e) = handle_config_command(subcommand.clone()) {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            return;
        }
        Commands::Run { .. } => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config } => config.clone(),
        _ => None,
    };

    // Load config (or use defaults)
    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging with config settings.
    // The guards must be kept alive for the lifetime of the program.
    let _log_guards = match logging::init_logging(&config.logging, cli.verbose, cli.quiet) {
        Ok(guards) => guards,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Log version info at startup
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting wsrelay"
    );

    if let Err(e) = run_relay(config) {
        error!(error = %e.format_for_log(), "Relay terminated");
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

/// Run the relay in normal operation mode
fn run_relay(config: RelayConfig) -> Result<()> {
    info!(
        relay = %config.relay.instance_name(),
        upstream_url = %config.upstream.url,
        max_retry_count = config.upstream.max_retry_count,
        retry_debounce_ms = config.upstream.retry_debounce_ms,
        "Configuration loaded"
    );

    // Build and run the tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(4))
        .thread_name("wsrelay")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_relay_main(config))
}

/// Async relay main loop
async fn async_relay_main(config: RelayConfig) -> Result<()> {
    // Start the upstream lifecycle manager
    let mut client = UpstreamClient::new(UpstreamClientConfig::from(&config.upstream));
    let publisher = client.publisher();
    let mut readiness = client.readiness();
    let mut event_rx = client.start().await?;

    // Bind the HTTP listener; the relay has no purpose without it
    let http = if config.http.enabled {
        let addr = format!("{}:{}", config.http.bind, config.http.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            Error::RelayBindFailed {
                addr: addr.clone(),
                message: e.to_string(),
            }
        })?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        info!(addr = %local_addr, "Relay endpoint listening");
        Some(listener)
    } else {
        info!("HTTP endpoint disabled");
        None
    };

    // Startup gate: the listener is up, now the first upstream connection
    // must also succeed. A join, not a race: either failing is fatal.
    match wait_ready(&mut readiness).await {
        StartupStatus::Connected => {
            info!("Upstream connection ready");
        }
        StartupStatus::Failed { attempts } => {
            return Err(Error::retry_exhausted(config.upstream.url.clone(), attempts));
        }
        StartupStatus::Starting => unreachable!("readiness settles before resolving"),
    }

    // Serve the relay surface
    if let Some(listener) = http {
        let app = relay::router(relay::AppState::new(publisher));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Relay endpoint server failed");
            }
        });
    }

    // Set up graceful shutdown on Ctrl+C
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    info!("Relay event loop started");

    // Main event loop
    loop {
        tokio::select! {
            // Ctrl+C shutdown
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                if let Err(e) = client.shutdown().await {
                    warn!(error = %e, "Error requesting upstream shutdown");
                }
                break;
            }

            // Events from the upstream client
            event = event_rx.recv() => {
                match event {
                    Some(UpstreamEvent::Connected { generation }) => {
                        info!(%generation, "Connected to upstream");
                    }
                    Some(UpstreamEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "Disconnected from upstream");
                    }
                    Some(UpstreamEvent::Reconnecting { attempt, delay }) => {
                        info!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Reconnecting to upstream"
                        );
                    }
                    Some(UpstreamEvent::WatchdogExpired) => {
                        warn!("Upstream connection terminated: no liveness signal");
                    }
                    Some(UpstreamEvent::MessageReceived { text }) => {
                        // Already logged at receipt; nothing routes back yet
                        debug!(bytes = text.len(), "Upstream message observed");
                    }
                    Some(UpstreamEvent::Failed { attempts, message }) => {
                        error!(attempts, message = %message, "Upstream client gave up");
                        return Err(Error::retry_exhausted(
                            config.upstream.url.clone(),
                            attempts,
                        ));
                    }
                    None => {
                        info!("Upstream event channel closed");
                        break;
                    }
                }
            }
        }
    }

    info!("Relay shutting down");
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = RelayConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            RelayConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}

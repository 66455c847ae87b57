use anyhow::{Context, Result};
use lib_telemetry::{TelemetryClient, WssTransport};
use std::time::Duration;
use tokio::signal;

mod telemetry_logic;
use telemetry_logic::{config, logger, monitor, session, sink::LoggingSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config();
    let log_path = logger::setup_logging(&config)?;
    log::info!("Logging to {}", log_path.display());

    let client_config = config.client_config()?;
    let url = config.url.clone().context("No upstream URL configured")?;
    let (transport, events) = WssTransport::new(&url, config.auth_token.clone())?;
    let (client, handle) = TelemetryClient::new(client_config, transport, events, LoggingSink)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut client_handle = tokio::spawn(client.run());
    let session_handle = tokio::spawn(session::start(handle.clone(), config.entities().to_vec()));
    let monitor_handle = tokio::spawn(monitor::run(
        handle.clone(),
        Duration::from_secs(config.status_interval_seconds.unwrap_or(30).max(1)),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        result = &mut client_handle => {
            log::error!("Telemetry client stopped unexpectedly: {:?}", result);
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    handle.shutdown();
    session_handle.abort();

    // Wait for components to shut down
    if !client_handle.is_finished() {
        let _ = client_handle.await;
    }
    let _ = monitor_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}

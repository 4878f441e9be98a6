//! bigears-publish - publish newline-delimited JSON from stdin.
//!
//! Each non-blank line is parsed as one JSON payload and published; the
//! returned message id is printed on stdout. Oversized payloads go to the
//! bucket transparently.

use anyhow::{bail, Result};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bigears::{Config, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    info!("publisher_starting");

    let config = Config::from_env();
    info!(
        region = %config.region,
        queue_name = %config.queue_name,
        s3_endpoint = ?config.s3_endpoint,
        cleanup_orphaned_payloads = config.cleanup_orphaned_payloads,
        "config_loaded"
    );

    let publisher = Publisher::connect(&config);

    // A queue or bucket that cannot be resolved is fatal
    if let Err(e) = publisher.ready().await {
        error!(error = %e, "publisher_unavailable");
        return Err(e.into());
    }
    info!("publisher_ready");

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();
    let mut published = 0usize;
    let mut failed = 0usize;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let payload: Value = match serde_json::from_str(&line) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, line_length = line.len(), "payload_parse_failed");
                failed += 1;
                continue;
            }
        };

        match publisher.publish(&payload).await {
            Ok(id) => {
                stdout.write_all(format!("{id}\n").as_bytes()).await?;
                stdout.flush().await?;
                published += 1;
            }
            Err(e) => {
                error!(error = %e, "publish_failed");
                failed += 1;
            }
        }
    }

    if let Ok(queue) = publisher.queue().await {
        queue.close().await;
    }

    info!(published = published, failed = failed, "publisher_shutdown_complete");

    if failed > 0 {
        bail!("{failed} payload(s) were not published");
    }
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

//! `replay` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

use crate::cli::ReplayArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `replay` command
pub async fn run_replay(args: &ReplayArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    super::ensure_config_exists(&args.config)?;

    let settings = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    for warning in config_loader::ConfigLoader::warnings(&settings) {
        warn!(field = %warning.field, "{}", warning.message);
    }

    info!(
        processors = settings.processors.len(),
        load_rules = settings.load_rules.len(),
        barriers = settings.barriers.len(),
        transformations = settings.transformations.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        settings,
        flush: args.flush,
        closed_barriers: args.closed_barriers.iter().cloned().collect(),
        drain_timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    let input: Box<dyn AsyncBufRead + Unpin> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let shutdown_signal = setup_shutdown_signal();

    info!("Starting replay...");

    tokio::select! {
        result = pipeline.run(input) => {
            let stats = result.context("Replay failed")?;
            info!(
                tracked = stats.metrics.tracked,
                accepted = stats.metrics.accepted,
                dropped = stats.metrics.dropped,
                duration_secs = stats.duration.as_secs_f64(),
                "Replay completed"
            );
            stats.print_summary();
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, stopping replay...");
        }
    }

    info!("Dispatch router finished");
    Ok(())
}

/// Ctrl+C and SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

//! `run` command implementation.

use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{describe_selection, load_profile, plan_selection};
use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading device profile");

    let profile = load_profile(&args.config)?;
    let (selections, key_stream) = plan_selection(&profile)?;

    info!(
        device = %profile.device.name,
        streams = profile.streams.len(),
        modes = selections.len(),
        key_stream = %key_stream,
        "Device profile loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - profile is streamable, exiting");
        println!("\n=== Selected Modes ===\n");
        for selection in &selections {
            println!("  - {}", describe_selection(selection));
        }
        println!("\n  Key stream: {}\n", key_stream);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        profile,
        consumers: args.consumers,
        max_framesets: (args.max_framesets > 0).then_some(args.max_framesets),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        queue_capacity: (args.queue_capacity > 0).then_some(args.queue_capacity),
        motion: args.motion,
        motion_rate_hz: args.motion_rate,
        corrupt_every: (args.corrupt_every > 0).then_some(args.corrupt_every),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    let pipeline = Pipeline::new(pipeline_config);
    let shutdown = pipeline.shutdown_flag();

    info!("Starting pipeline...");
    let mut task = tokio::task::spawn_blocking(move || pipeline.run());

    let result = tokio::select! {
        result = &mut task => result,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping pipeline...");
            shutdown.store(true, Ordering::Release);
            task.await
        }
    };

    let stats = result
        .context("Pipeline task panicked")?
        .context("Pipeline execution failed")?;

    info!(
        framesets = stats.framesets,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("depthsync finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed never resolves.
async fn shutdown_signal() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let config = super::super::tests::mock_profile_path();
        let config = config.to_string_lossy().into_owned();
        let mut argv = vec!["depthsync", "run", "--config", config.as_str()];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_dry_run() {
        run_pipeline(&run_args(&["--dry-run"])).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_bounded() {
        let args = run_args(&["--max-framesets", "3", "--timeout", "10", "--consumers", "2"]);
        run_pipeline(&args).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_profile_fails() {
        let mut args = run_args(&[]);
        args.config = "/nonexistent/profile.toml".into();
        assert!(run_pipeline(&args).await.is_err());
    }
}

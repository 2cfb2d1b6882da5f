mod cli;
mod config;
mod extract;
mod pipeline;
mod sampler;
mod tail;
#[cfg(test)]
mod test_support;
mod uploader;

use crate::cli::Cli;
use crate::config::Config;
use crate::sampler::SamplerProcess;
use crate::tail::{LineFollower, StopSignal};
use crate::uploader::{CloudBitClient, DryRunSink};
use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::time::Duration;

const SAMPLER_CHECK_INTERVAL: Duration = Duration::from_secs(5);

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,cpu_meter=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
///
/// Handlers are installed before this returns, so a signal sent afterwards is never lost.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env(cli.config.as_deref())?;
    if let Some(path) = cli.sample_file.clone() {
        config.sample_file = path;
    }
    init_tracing()?;

    let mut sampler = if cli.skip_sampler {
        None
    } else {
        match SamplerProcess::start(&config.sampler, &config.sample_file) {
            Ok(process) => Some(process),
            Err(err) if !cli.require_sampler => {
                tracing::warn!(
                    error = %format_args!("{err:#}"),
                    "sampler not running; waiting for the sample file anyway"
                );
                None
            }
            Err(err) => return Err(err),
        }
    };

    let stop = StopSignal::new();
    let follower = LineFollower::open(&config.sample_file, config.poll_interval, stop.clone());
    let upload = config.upload.clone();
    let dry_run = cli.dry_run;
    tracing::info!(
        sample_file = %config.sample_file.display(),
        device_id = %upload.device_id,
        dry_run,
        "cpu-meter running"
    );

    // The blocking HTTP client must be built and dropped off the async runtime.
    let mut pipeline_handle = tokio::task::spawn_blocking(move || {
        if dry_run {
            pipeline::run(follower, &DryRunSink::new(&upload)?)
        } else {
            pipeline::run(follower, &CloudBitClient::new(&upload)?)
        }
    });

    let shutdown = shutdown_signal().context("failed to install signal handlers")?;
    tokio::pin!(shutdown);
    let mut sampler_check = tokio::time::interval(SAMPLER_CHECK_INTERVAL);
    let mut sampler_exit_reported = false;

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown => {
                tracing::info!(signal, "shutdown signal received");
                stop.stop();
                break (&mut pipeline_handle).await;
            }
            result = &mut pipeline_handle => break result,
            _ = sampler_check.tick() => {
                if let Some(process) = sampler.as_mut() {
                    if !sampler_exit_reported && !process.is_alive() {
                        tracing::warn!(pid = process.id(), "sampler exited; no new samples will arrive");
                        sampler_exit_reported = true;
                    }
                }
            }
        }
    };

    if let Some(process) = sampler.take() {
        if let Err(err) = process.terminate() {
            tracing::warn!(error = %err, "failed to stop sampler");
        }
    }

    let stats = outcome.context("pipeline task panicked")??;
    tracing::info!(
        lines = stats.lines,
        skipped = stats.skipped,
        sent = stats.sent,
        failed = stats.failed,
        "cpu-meter stopped"
    );
    Ok(())
}

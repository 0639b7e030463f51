use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kwatch_core::{Config, EventEmitter};
use kwatch_kubehub::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kwatch", version, about = "Emit one structured record per notable Kubernetes object change")]
struct Cli {
    /// Path to the configuration file
    #[arg(long = "config", env = "KWATCH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

/// Diagnostics go to stderr as JSON; stdout carries only event records.
fn init_tracing() {
    let env = std::env::var("KWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C will stop kwatch"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Translate the first interrupt into cancellation of the shared token.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("interrupt received");
        cancel.cancel();
    });
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    info!(path = %cli.config.display(), resources = config.resources.len(), "configuration loaded");

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let emitter = Arc::new(EventEmitter::stdout());
    let mut orchestrator = Orchestrator::new(emitter, cancel);
    orchestrator.run(&config).await.context("watch orchestration")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("kwatch aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_defaults_to_config_yaml() {
        let cli = Cli::try_parse_from(["kwatch"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
    }

    #[test]
    fn config_flag_overrides_default() {
        let cli = Cli::try_parse_from(["kwatch", "--config", "/etc/kwatch/watch.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/kwatch/watch.yaml"));
    }

    #[test]
    fn subcommands_are_rejected() {
        assert!(Cli::try_parse_from(["kwatch", "watch"]).is_err());
    }
}

//! policy-loader
//!
//! Loads a proxy policy configuration, applies it into a namespace and keeps
//! it in sync with its sources until interrupted.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌───────────┐   bytes    ┌──────────┐  Config  ┌───────────┐  Profile  ┌───────────┐
//!   │  storage  │──────────▶│  loader  │────────▶│  applier  │─────────▶│ namespace │
//!   │ file/http │  (+incl.)  │ + codec  │          │ (hooks)   │           │ (arc-swap)│
//!   └─────┬─────┘            └──────────┘          └─────┬─────┘           └───────────┘
//!         │ change notify                                │ scoped state
//!         ▼                                              ▼
//!   ┌───────────┐                                  ┌───────────┐
//!   │  watcher  │── reload ──▶ loader/applier      │  runtime  │── write-through ──▶ storage
//!   └───────────┘                                  │   store   │
//!                                                  └───────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use policy_loader::observability::{logging, metrics};
use policy_loader::{
    CodecRegistry, ConfigApplier, ConfigLoader, ConfigSource, ConfigWatcher, MemoryBackend,
    MergeStrategy, Params, RuntimeContext, RuntimeStore, StorageRegistry,
};

#[derive(Parser)]
#[command(name = "policy-loader")]
#[command(about = "Load, apply and hot-reload a proxy policy configuration", long_about = None)]
struct Cli {
    /// Storage backend holding the primary configuration
    #[arg(short, long, default_value = "file")]
    storage: String,

    /// Configuration encoding
    #[arg(short, long, default_value = "toml")]
    encoding: String,

    /// Storage/codec parameter, repeatable (e.g. `--param path=policy.toml`)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// How includes are combined with the primary source
    #[arg(long, value_enum, default_value_t = MergeStrategy::Concat)]
    merge: MergeStrategy,

    /// Namespace the configuration is published into
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Storage backend holding runtime state
    #[arg(long, default_value = "file")]
    runtime_storage: String,

    /// Runtime state encoding
    #[arg(long, default_value = "json")]
    runtime_encoding: String,

    /// Runtime storage parameter, repeatable
    #[arg(long = "runtime-param", value_parser = parse_param)]
    runtime_params: Vec<(String, String)>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<SocketAddr>,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    tracing::info!("policy-loader v{} starting", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = cli.metrics_address {
        if let Err(e) = metrics::init_metrics(addr) {
            tracing::error!(metrics_address = %addr, error = %e, "Failed to start metrics exporter");
        }
    }

    let storages = Arc::new(StorageRegistry::with_defaults(MemoryBackend::new()));
    let codecs = Arc::new(CodecRegistry::with_defaults());

    let mut runtime_params: Params = cli.runtime_params.into_iter().collect();
    if cli.runtime_storage == "file" {
        runtime_params
            .entry("path".to_string())
            .or_insert_with(|| "runtime.json".to_string());
    }
    let store = RuntimeStore::load(
        &storages,
        &codecs,
        &cli.runtime_storage,
        &cli.runtime_encoding,
        &runtime_params,
    )
    .await?;
    let runtime = RuntimeContext::root(Arc::new(store));

    let loader = ConfigLoader::new(storages, codecs).merge_strategy(cli.merge);
    let applier = ConfigApplier::builtin();
    let source = ConfigSource::new(cli.storage, cli.encoding, cli.params.into_iter().collect());
    let watcher = ConfigWatcher::new(loader, applier, runtime, cli.namespace, source);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    watcher.run(cancel).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("path=a=b.toml").unwrap(),
            ("path".to_string(), "a=b.toml".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_params_collected() {
        let cli = Cli::parse_from([
            "policy-loader",
            "--param",
            "path=policy.toml",
            "--merge",
            "layered",
            "--runtime-param",
            "path=/tmp/rt.json",
        ]);
        assert_eq!(cli.params, vec![("path".to_string(), "policy.toml".to_string())]);
        assert_eq!(cli.merge, MergeStrategy::Layered);
        assert_eq!(cli.runtime_params.len(), 1);
        assert_eq!(cli.namespace, "default");
    }
}

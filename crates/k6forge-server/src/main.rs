//! k6forge-server: the build service daemon.
//!
//! Serves the build API backed by a dependency catalog, an object store
//! (local directory, S3-compatible bucket, or a remote store server) and
//! a build lock (in-process, or an S3-backed lease lock for
//! multi-instance deployments).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use k6forge_core::blob::{S3BlobStore, S3BlobStoreConfig};
use k6forge_core::catalog::{Catalog, DEFAULT_CATALOG};
use k6forge_core::foundry::{CommandFoundry, CommandFoundryConfig};
use k6forge_core::lock::{LeaseLock, LeaseLockConfig, Lock, ProcessLock};
use k6forge_core::service::{LocalBuildService, LocalBuildServiceConfig};
use k6forge_core::store::{BlobObjectStore, FileObjectStore, HttpObjectStore, ObjectStore};
use k6forge_server::{router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// k6 build service.
#[derive(Parser, Debug)]
#[command(name = "k6forge-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Dependency catalog: a local path or an http(s) URL.
    #[arg(short, long, default_value = DEFAULT_CATALOG)]
    catalog: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory for the file-backed object store.
    #[arg(long, default_value = "k6forge-store")]
    store_dir: String,

    /// Remote object-store server URL. Overrides the file store.
    #[arg(long)]
    store_url: Option<String>,

    /// S3-compatible endpoint for the blob store and lock.
    #[arg(long)]
    s3_endpoint: Option<String>,

    /// S3 bucket for storing binaries. Overrides store-url and the file
    /// store.
    #[arg(long)]
    s3_bucket: Option<String>,

    /// Lock preventing concurrent builds of the same binary: "local" or
    /// "s3" (across instances).
    #[arg(long, default_value = "local")]
    build_lock: String,

    /// Lease renewal interval for the s3 lock, in seconds.
    #[arg(long, default_value_t = 60)]
    s3_lock_lease_secs: u64,

    /// Backoff between lock attempts, in seconds.
    #[arg(long, default_value_t = 1)]
    s3_lock_backoff_secs: u64,

    /// Age at which a lease counts as expired, in seconds. 0 selects
    /// three times the lease.
    #[arg(long, default_value_t = 0)]
    s3_lock_grace_secs: u64,

    /// Maximum time one owner may hold the lock, in seconds.
    #[arg(long, default_value_t = 300)]
    s3_lock_max_lease_secs: u64,

    /// Cache-Control max-age for successful build responses, in
    /// seconds. 0 disables the header.
    #[arg(long, default_value_t = 0)]
    cache_max_age_secs: u64,

    /// Builder program producing the binaries.
    #[arg(long, default_value = "k6foundry")]
    builder: String,

    /// Extra environment variables for the builder (key=value).
    #[arg(short, long, value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Enable CGO for builds.
    #[arg(long)]
    enable_cgo: bool,

    /// Allow versions carrying build metadata (e.g. v0.0.0+build).
    #[arg(long)]
    allow_build_semvers: bool,

    /// Externally reachable base URL for store download links, e.g.
    /// "https://builds.example.com/store". Defaults to the request host.
    #[arg(long)]
    base_url: Option<String>,

    /// Pass the builder's output through.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_store(args: &Args) -> Result<Arc<dyn ObjectStore>> {
    if let Some(bucket) = &args.s3_bucket {
        let endpoint = args
            .s3_endpoint
            .clone()
            .context("--s3-endpoint is required with --s3-bucket")?;
        let blob = Arc::new(
            S3BlobStore::new(S3BlobStoreConfig {
                endpoint,
                bucket: bucket.clone(),
                authorization: None,
            })
            .context("configuring s3 object store")?,
        );
        let base = args
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/store", args.port));
        info!(%bucket, "using s3 object store");
        return Ok(Arc::new(BlobObjectStore::new(blob, base)));
    }

    if let Some(url) = &args.store_url {
        info!(%url, "using remote object store");
        return Ok(Arc::new(
            HttpObjectStore::new(url.clone()).context("configuring store client")?,
        ));
    }

    info!(dir = %args.store_dir, "using file object store");
    let mut store =
        FileObjectStore::new(&args.store_dir).context("configuring file object store")?;
    let base = args
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}/store", args.port));
    store = store.with_download_base_url(base);
    Ok(Arc::new(store))
}

fn build_lock(args: &Args) -> Result<Arc<dyn Lock>> {
    match args.build_lock.as_str() {
        "local" => Ok(Arc::new(ProcessLock::new())),
        "s3" => {
            let endpoint = args
                .s3_endpoint
                .clone()
                .context("--s3-endpoint is required with --build-lock s3")?;
            let bucket = args
                .s3_bucket
                .clone()
                .context("--s3-bucket is required with --build-lock s3")?;
            let blob = Arc::new(
                S3BlobStore::new(S3BlobStoreConfig {
                    endpoint,
                    bucket,
                    authorization: None,
                })
                .context("configuring s3 lock")?,
            );
            let lock = LeaseLock::new(
                blob,
                LeaseLockConfig {
                    lease: Duration::from_secs(args.s3_lock_lease_secs),
                    backoff: Duration::from_secs(args.s3_lock_backoff_secs),
                    grace: Duration::from_secs(args.s3_lock_grace_secs),
                    max_lease: Duration::from_secs(args.s3_lock_max_lease_secs),
                },
            )
            .context("configuring s3 lock")?;
            Ok(Arc::new(lock))
        }
        other => anyhow::bail!("unknown build lock {other:?}: expected \"local\" or \"s3\""),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    if args.enable_cgo {
        warn!("CGO is enabled for builds");
    }

    let catalog = Catalog::load(&args.catalog, args.allow_build_semvers)
        .await
        .context("loading catalog")?;
    info!(catalog = %args.catalog, "catalog loaded");

    let store = build_store(&args)?;
    let lock = build_lock(&args)?;

    let foundry = Arc::new(CommandFoundry::new(CommandFoundryConfig {
        program: args.builder.clone(),
        enable_cgo: args.enable_cgo,
        env: args.env.iter().cloned().collect::<HashMap<_, _>>(),
        verbose: args.verbose,
    }));

    let mut service_config =
        LocalBuildServiceConfig::new(catalog, Arc::clone(&store), foundry, lock);
    service_config.enable_cgo = args.enable_cgo;
    let service = LocalBuildService::new(service_config);

    let registry = prometheus::Registry::new();
    service
        .metrics()
        .register(&registry)
        .context("registering build metrics")?;

    let mut state = AppState::new(Arc::new(service), store);
    state.registry = registry;
    if args.cache_max_age_secs > 0 {
        state.cache_max_age = Some(Duration::from_secs(args.cache_max_age_secs));
    }
    state.store_base_url = args.base_url.clone();

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], args.port)))
        .await
        .with_context(|| format!("binding port {}", args.port))?;
    info!(port = args.port, "listening");

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving requests")?;

    Ok(())
}

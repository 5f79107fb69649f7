//! podwatch runtime
//!
//! Builds a leaf snapshot of the pod cluster on a fixed interval, logs the
//! cluster summary, and purges expired cache records from the store.
//!
//! Usage:
//!   cargo run --release --bin podwatch
//!
//! Environment variables: see `podwatch::config::Config::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use podwatch::accessibility::{AccessibilityCache, AccessibilityConfig};
use podwatch::credits::CreditsClient;
use podwatch::geolocation::{GeolocationCache, GeolocationConfig};
use podwatch::pipeline::{AggregationPipeline, RootSummary};
use podwatch::rpc::RpcClient;
use podwatch::store::{SnapshotStore, SqliteSnapshotStore};
use podwatch::{http, Config};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = Config::from_env()?;

    info!("🚀 Starting podwatch");
    info!("   ├─ Seed RPC: {}", config.seed_rpc);
    info!("   ├─ Pod RPC: {}://<host>:{}/rpc", config.rpc_target.scheme, config.rpc_target.port);
    info!("   ├─ Database: {}", config.db_path.as_deref().unwrap_or("(none)"));
    info!("   ├─ Credits: {}", config.credits_url.as_deref().unwrap_or("(disabled)"));
    info!("   ├─ Geolocation: {}", config.geo_base_url.as_deref().unwrap_or("(disabled)"));
    info!("   ├─ Concurrency: {}", config.enrich_concurrency);
    info!("   └─ Interval: {}ms{}", config.refresh_interval_ms, if config.run_once { " (run once)" } else { "" });

    let http = http::build_client()?;
    let rpc = RpcClient::with_http(http.clone());

    let store: Option<Arc<dyn SnapshotStore>> = match &config.db_path {
        Some(path) => {
            let store = SqliteSnapshotStore::open(path)?;
            info!("✅ Database initialized");
            Some(Arc::new(store))
        }
        None => None,
    };

    let accessibility = Arc::new(AccessibilityCache::new(
        rpc.clone(),
        store.clone(),
        AccessibilityConfig {
            target: config.rpc_target.clone(),
            ..Default::default()
        },
    ));

    let mut pipeline = AggregationPipeline::new(rpc, config.seed_rpc.clone(), accessibility)
        .with_target(config.rpc_target.clone())
        .with_concurrency(config.enrich_concurrency);

    if let Some(base_url) = &config.geo_base_url {
        let geo = GeolocationCache::new(http.clone(), GeolocationConfig::new(base_url.clone()), store.clone())?;
        pipeline = pipeline.with_geolocation(Arc::new(geo));
    }
    if let Some(url) = &config.credits_url {
        pipeline = pipeline.with_credits(CreditsClient::new(http.clone(), url.clone()));
    }
    if let Some(store) = &store {
        pipeline = pipeline.with_store(store.clone());
    }

    if config.run_once {
        run_cycle(&pipeline, store.as_deref()).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    loop {
        tokio::select! {
            _ = ticker.tick() => run_cycle(&pipeline, store.as_deref()).await,
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
        }
    }

    info!("✅ podwatch stopped");
    Ok(())
}

fn init_logging() {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    // HTTP internals stay quiet unless RUST_LOG names them
    let log_level = std::env::var("RUST_LOG").unwrap_or_default();
    for module in ["hyper", "hyper_util", "reqwest"] {
        if !log_level.contains(module) {
            builder.filter_module(module, log::LevelFilter::Warn);
        }
    }

    builder.target(env_logger::Target::Stderr).init();
}

async fn run_cycle(pipeline: &AggregationPipeline, store: Option<&dyn SnapshotStore>) {
    let leaves = match pipeline.build_leaf_records().await {
        Ok(leaves) => leaves,
        Err(e) => {
            error!("❌ Snapshot build failed: {}", e);
            return;
        }
    };
    info!("📦 Snapshot holds {} leaf records", leaves.len());

    // Summarize the snapshot just built; no second roster fetch
    let summary = RootSummary::from_leaves(&leaves);
    info!("📊 Cluster summary:");
    info!("   ├─ Pods: {}", summary.total_pods);
    info!(
        "   ├─ Storage: {} / {} bytes ({:.2}% used)",
        summary.total_storage_used, summary.total_storage_committed, summary.utilization_rate
    );
    info!("   ├─ Avg committed per pod: {:.0} bytes", summary.average_storage_per_pod);
    match summary.total_credits {
        Some(total) => info!("   └─ Credits held by listed pods: {:.0}", total),
        None => info!("   └─ Credits held by listed pods: n/a"),
    }

    if let Some(store) = store {
        let now = chrono::Utc::now().timestamp();
        match store.purge_expired(now).await {
            Ok(0) => {}
            Ok(purged) => info!("🧹 Purged {} expired cache records", purged),
            Err(e) => warn!("⚠️  Purge failed: {}", e),
        }
    }
}

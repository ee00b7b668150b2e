//! Vidgate - caching proxy for video metadata and payloads

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidgate::cache::{spawn_sweep_task, EvictionMode, TtlStore};
use vidgate::config::Args;
use vidgate::proxy::{HttpPayloadSource, ProxyEngine};
use vidgate::resolve::Resolver;
use vidgate::server::{self, AppState};
use vidgate::store::MetadataStore;
use vidgate::upstream::{HttpUpstream, InstancePool, UpstreamApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vidgate={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Vidgate - video caching proxy");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Database: {}", args.db_path);
    info!("Directory: {}", args.directory_endpoint);
    info!("Eviction: {:?}", args.eviction());
    info!("Payload ceiling: {} bytes", args.max_payload_bytes);
    info!("Resolve attempts: {}", args.max_resolve_attempts);
    info!("======================================");

    let client = reqwest::Client::builder()
        .timeout(args.request_timeout())
        .build()?;

    let store = Arc::new(MetadataStore::open(&args.db_path)?);
    info!("Metadata store opened at {}", args.db_path);

    let api: Arc<dyn UpstreamApi> = Arc::new(HttpUpstream::new(
        client.clone(),
        args.directory_endpoint.clone(),
    ));
    let pool = Arc::new(InstancePool::new(Arc::clone(&api), args.blacklist_ttl()));

    let misses = Arc::new(TtlStore::new(args.cache_ttl(), args.eviction()));
    let buffers = Arc::new(TtlStore::new(args.buffer_ttl(), args.eviction()));

    // Background discipline needs its sweep tasks; the handles abort the
    // tasks when main unwinds.
    let _sweeps = if args.eviction() == EvictionMode::Background {
        vec![
            spawn_sweep_task(Arc::clone(&misses), args.cleanup_interval()),
            spawn_sweep_task(Arc::clone(&buffers), args.cleanup_interval()),
        ]
    } else {
        Vec::new()
    };

    let resolver = Arc::new(Resolver::new(
        Arc::clone(&api),
        pool,
        Arc::clone(&store),
        Arc::clone(&misses),
        args.max_resolve_attempts,
    ));

    let proxy = Arc::new(ProxyEngine::new(
        Arc::new(HttpPayloadSource::new(client)),
        Arc::clone(&resolver),
        Arc::clone(&buffers),
        args.max_payload_bytes,
    ));

    let state = Arc::new(AppState {
        args,
        resolver,
        proxy,
        store,
        misses,
        buffers,
    });

    server::run(state).await?;
    Ok(())
}

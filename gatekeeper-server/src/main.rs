//! Gatekeeper server
//!
//! Composition root: reads the configuration from the environment, wires the
//! storage adapters and the resource sampler into a `Gatekeeper`, and serves
//! HTTP behind the gate layer until interrupted.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

mod sampler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;

use gatekeeper_cache_adapter_memory::MemoryCache;
use gatekeeper_cache_adapter_redis::RedisCache;
use gatekeeper_core::access_list::{BLACKLIST_KEY, NAMESPACE};
use gatekeeper_core::scheduler::{PeriodicTask, Scheduler};
use gatekeeper_core::{GateLayer, Gatekeeper, GatekeeperConfig, ServerMode};
use gatekeeper_store_adapter_fs::DurableStoreFs;
use gatekeeper_types::prelude::*;
use gatekeeper_types::shared_cache::SharedCache;

use crate::sampler::ProcSampler;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

struct ServerOpts {
	listen: Box<str>,
	mode: ServerMode,
	redis_url: Option<Box<str>>,
	data_dir: PathBuf,
}

impl ServerOpts {
	fn from_env() -> ClResult<Self> {
		let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
		let mode = match var("SERVER_MODE").as_deref() {
			None | Some("standalone") => ServerMode::Standalone,
			Some("proxy") => ServerMode::Proxy,
			Some(other) => {
				return Err(Error::ConfigError(format!("SERVER_MODE: unknown mode {:?}", other)));
			}
		};
		Ok(Self {
			listen: var("LISTEN").unwrap_or_else(|| "127.0.0.1:8080".into()).into(),
			mode,
			redis_url: var("REDIS_URL").map(Into::into),
			data_dir: PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data".into())),
		})
	}
}

/// Drops expired keys of the in-process shared tier
#[derive(Debug)]
struct MemoryPurgeTask {
	cache: Arc<MemoryCache>,
}

#[async_trait]
impl PeriodicTask for MemoryPurgeTask {
	fn kind_of(&self) -> &'static str {
		"server.memory-purge"
	}

	async fn run(&self) -> ClResult<()> {
		self.cache.purge_expired();
		Ok(())
	}
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
		std::future::pending::<()>().await;
	}
	info!("Shutdown signal received");
}

async fn run() -> ClResult<()> {
	let config = GatekeeperConfig::from_env()?;
	let opts = ServerOpts::from_env()?;
	let scheduler = Scheduler::new();

	let shared_cache: Arc<dyn SharedCache> = match &opts.redis_url {
		Some(url) => Arc::new(RedisCache::connect(url).await?),
		None => {
			warn!("REDIS_URL not set, shared tier is local to this process");
			let cache = Arc::new(MemoryCache::new());
			scheduler.spawn(
				Arc::new(MemoryPurgeTask { cache: cache.clone() }),
				Duration::from_secs(60),
			);
			cache
		}
	};

	let durable_store = DurableStoreFs::new(opts.data_dir.join("store"))
		.await?
		.with_file(&format!("{}:{}", NAMESPACE, BLACKLIST_KEY), &config.blacklist_file);

	let gatekeeper = Arc::new(
		Gatekeeper::builder()
			.config(config)
			.shared_cache(shared_cache)
			.durable_store(Arc::new(durable_store))
			.resource_sampler(Arc::new(ProcSampler::new()))
			.build()?,
	);
	gatekeeper.initialize().await?;
	gatekeeper.start();

	let router = Router::new()
		.route("/", get(|| async { "ok" }))
		.route("/health", get(|| async { "ok" }))
		.layer(GateLayer::new(gatekeeper.clone(), opts.mode));

	let listener = tokio::net::TcpListener::bind(opts.listen.as_ref()).await?;
	info!("Listening on {} ({:?} mode)", opts.listen, opts.mode);
	let served = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown_signal())
		.await;

	scheduler.shutdown().await;
	gatekeeper.shutdown().await;
	served?;
	Ok(())
}

#[tokio::main]
async fn main() -> ClResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();
	info!("Gatekeeper V{}", VERSION);

	if let Err(e) = run().await {
		e.report("gatekeeper server");
		return Err(e);
	}
	Ok(())
}

// vim: ts=4

//! Shared tier on Redis.
//!
//! Values are plain strings. Expiry is set with `SET ... PX` and read back
//! with `PTTL` in the same pipeline as the `GET`, so the core can backfill
//! its local tier with the remaining lifetime.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};

use gatekeeper_types::prelude::*;
use gatekeeper_types::shared_cache::{CachedValue, SharedCache};

const TIER: &str = "shared";

fn unavailable(err: RedisError) -> Error {
	Error::unavailable(TIER, err)
}

/// Remaining lifetime from a `PTTL` reply (-1: no expiry, -2: missing key)
fn ttl_from_pttl(pttl: i64) -> Option<Duration> {
	u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[derive(Clone)]
pub struct RedisCache {
	conn: ConnectionManager,
	url: Box<str>,
}

impl std::fmt::Debug for RedisCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedisCache").field("url", &self.url).finish_non_exhaustive()
	}
}

impl RedisCache {
	/// Connect to Redis. The connection manager reconnects on its own after
	/// failures; calls made while disconnected return `StoreUnavailable`.
	pub async fn connect(url: &str) -> ClResult<Self> {
		let client =
			Client::open(url).map_err(|e| Error::ConfigError(format!("redis url: {}", e)))?;
		let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
		info!("Connected to shared cache at {}", url);
		Ok(Self { conn, url: url.into() })
	}
}

#[async_trait]
impl SharedCache for RedisCache {
	async fn get(&self, key: &str) -> ClResult<Option<CachedValue>> {
		let mut conn = self.conn.clone();
		let (value, pttl): (Option<String>, i64) = redis::pipe()
			.cmd("GET")
			.arg(key)
			.cmd("PTTL")
			.arg(key)
			.query_async(&mut conn)
			.await
			.map_err(unavailable)?;

		Ok(value.map(|value| CachedValue {
			value: value.into_boxed_str(),
			ttl: ttl_from_pttl(pttl),
		}))
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let mut cmd = redis::cmd("SET");
		cmd.arg(key).arg(value);
		if let Some(ttl) = ttl {
			// PX 0 is rejected by Redis
			let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
			cmd.arg("PX").arg(millis);
		}
		let () = cmd.query_async(&mut conn).await.map_err(unavailable)?;
		Ok(())
	}

	async fn del(&self, key: &str) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let _removed: i64 =
			redis::cmd("DEL").arg(key).query_async(&mut conn).await.map_err(unavailable)?;
		Ok(())
	}

	fn backend(&self) -> &'static str {
		"redis"
	}
}


// vim: ts=4

//! Gate Middleware
//!
//! Tower layer running every request through the gatekeeper pipeline and
//! translating the decision into the HTTP contract.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use hyper::Request;
use lru::LruCache;
use parking_lot::Mutex;
use tower::{Layer, Service};

use super::decision::Decision;
use super::extractors::{extract_client_ip, extract_session_id, ServerMode};
use super::service::Gatekeeper;
use super::slowdown::SessionState;
use crate::prelude::*;

pub const WARNING_HEADER: &str = "x-ratelimit-warning";
pub const DEFAULT_SESSION_HEADER: &str = "x-session-id";

const DEFAULT_SESSION_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10_000) {
	Some(v) => v,
	None => unreachable!(),
};

type Sessions = Arc<Mutex<LruCache<Box<str>, SessionState>>>;

fn missing_address() -> Response {
	let body = serde_json::json!({
		"error": {
			"code": "E-GATE-NO-ADDRESS",
			"message": "Client address could not be determined."
		}
	});
	(StatusCode::BAD_REQUEST, Json(body)).into_response()
}

#[derive(Clone)]
pub struct GateLayer {
	gatekeeper: Arc<Gatekeeper>,
	mode: ServerMode,
	session_header: &'static str,
	sessions: Sessions,
}

impl GateLayer {
	pub fn new(gatekeeper: Arc<Gatekeeper>, mode: ServerMode) -> Self {
		Self {
			gatekeeper,
			mode,
			session_header: DEFAULT_SESSION_HEADER,
			sessions: Arc::new(Mutex::new(LruCache::new(DEFAULT_SESSION_CAPACITY))),
		}
	}

	/// Header carrying the session id used for slowdown tracking
	pub fn session_header(mut self, name: &'static str) -> Self {
		self.session_header = name;
		self
	}

	/// Number of sessions whose slowdown state is remembered
	pub fn session_capacity(mut self, capacity: NonZeroUsize) -> Self {
		self.sessions = Arc::new(Mutex::new(LruCache::new(capacity)));
		self
	}
}

impl<S> Layer<S> for GateLayer {
	type Service = GateService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		GateService {
			inner,
			gatekeeper: self.gatekeeper.clone(),
			mode: self.mode,
			session_header: self.session_header,
			sessions: self.sessions.clone(),
		}
	}
}

#[derive(Clone)]
pub struct GateService<S> {
	inner: S,
	gatekeeper: Arc<Gatekeeper>,
	mode: ServerMode,
	session_header: &'static str,
	sessions: Sessions,
}

impl<S> Service<Request<Body>> for GateService<S>
where
	S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
	S::Future: Send + 'static,
{
	type Response = S::Response;
	type Error = S::Error;
	type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<Body>) -> Self::Future {
		let gatekeeper = self.gatekeeper.clone();
		let sessions = self.sessions.clone();
		let mode = self.mode;
		let session_header = self.session_header;
		let mut inner = self.inner.clone();

		Box::pin(async move {
			let Some(ip) = extract_client_ip(&req, mode) else {
				warn!("Rejecting request without a client address: {}", req.uri());
				return Ok(missing_address());
			};

			let session_id: Option<Box<str>> =
				extract_session_id(&req, session_header).map(Into::into);

			// session state is read and booked in one step under the lock
			let decision = match session_id {
				Some(id) => {
					gatekeeper
						.check_addr_with(ip, move |slowdown, now| {
							let mut sessions = sessions.lock();
							let state = sessions.get_or_insert_mut(id, SessionState::new);
							slowdown.evaluate(state, now)
						})
						.await
				}
				None => gatekeeper.check_addr(ip, None).await,
			};

			match decision {
				Decision::Allow => inner.call(req).await,
				Decision::AllowWithWarning(warning) => {
					let mut response = inner.call(req).await?;
					if let Ok(val) = HeaderValue::from_str(&warning.header_value()) {
						response.headers_mut().insert(WARNING_HEADER, val);
					}
					Ok(response)
				}
				Decision::Deny(reason) => Ok(reason.into_response()),
				Decision::Delay(delay) => {
					tokio::time::sleep(delay).await;
					inner.call(req).await
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::GatekeeperConfig;
	use crate::test_support::{FakeDurable, FakeShared, FixedSampler};
	use axum::extract::ConnectInfo;
	use axum::routing::get;
	use axum::Router;
	use std::net::SocketAddr;
	use std::num::NonZeroU32;
	use std::time::Duration;
	use tower::ServiceExt;

	fn app(config: GatekeeperConfig) -> (Arc<Gatekeeper>, Router) {
		app_with(config, FakeShared::new())
	}

	fn app_with(config: GatekeeperConfig, shared: Arc<FakeShared>) -> (Arc<Gatekeeper>, Router) {
		let gatekeeper = Arc::new(
			Gatekeeper::builder()
				.config(config)
				.shared_cache(shared)
				.durable_store(FakeDurable::new())
				.resource_sampler(FixedSampler::new(10.0, 10.0))
				.build()
				.unwrap(),
		);
		let router = Router::new()
			.route("/", get(|| async { "ok" }))
			.layer(GateLayer::new(gatekeeper.clone(), ServerMode::Standalone));
		(gatekeeper, router)
	}

	fn request(peer: Option<&str>, session: Option<&str>) -> Request<Body> {
		let mut builder = Request::builder().uri("/");
		if let Some(session) = session {
			builder = builder.header(DEFAULT_SESSION_HEADER, session);
		}
		let mut req = builder.body(Body::empty()).unwrap();
		if let Some(peer) = peer {
			req.extensions_mut().insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
		}
		req
	}

	fn config(points: u32) -> GatekeeperConfig {
		GatekeeperConfig::new(NonZeroU32::new(points).unwrap(), Duration::from_secs(60))
	}

	#[tokio::test]
	async fn test_allow_and_warning_header() {
		let (_gk, router) = app(config(3));

		let response = router.clone().oneshot(request(Some("192.0.2.1:1000"), None)).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		assert!(!response.headers().contains_key(WARNING_HEADER));

		let response = router.oneshot(request(Some("192.0.2.1:1000"), None)).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(
			response.headers().get(WARNING_HEADER).unwrap(),
			"nearly-exhausted; remaining=1"
		);
	}

	#[tokio::test]
	async fn test_blacklisted_gets_403() {
		let (gk, router) = app(config(10));
		gk.add_to_blacklist("192.0.2.66").await.unwrap();

		let response = router.oneshot(request(Some("192.0.2.66:1000"), None)).await.unwrap();
		assert_eq!(response.status(), StatusCode::FORBIDDEN);
	}

	#[tokio::test]
	async fn test_missing_address_gets_400() {
		let (_gk, router) = app(config(10));
		let response = router.oneshot(request(None, None)).await.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test(start_paused = true)]
	async fn test_delay_then_forward() {
		let mut cfg = config(100);
		cfg.slowdown_threshold = Duration::from_secs(2);
		let (_gk, router) = app(cfg);

		let started = tokio::time::Instant::now();
		for _ in 0..3 {
			let response =
				router.clone().oneshot(request(Some("192.0.2.7:1000"), Some("s1"))).await.unwrap();
			assert_eq!(response.status(), StatusCode::OK);
		}
		assert!(started.elapsed() >= Duration::from_secs(4));
	}

	#[tokio::test(start_paused = true)]
	async fn test_concurrent_session_requests_are_spaced() {
		let mut cfg = config(100);
		cfg.slowdown_threshold = Duration::from_secs(10);
		let shared = FakeShared::new();
		shared.set_delay(Duration::from_millis(20));
		let (_gk, router) = app_with(cfg, shared);

		let started = tokio::time::Instant::now();
		let (first, second) = tokio::join!(
			router.clone().oneshot(request(Some("192.0.2.8:1000"), Some("s2"))),
			router.clone().oneshot(request(Some("192.0.2.8:1001"), Some("s2"))),
		);
		assert_eq!(first.unwrap().status(), StatusCode::OK);
		assert_eq!(second.unwrap().status(), StatusCode::OK);
		// one of the two waited for the full spacing
		assert!(started.elapsed() >= Duration::from_secs(10));
	}
}

// vim: ts=4

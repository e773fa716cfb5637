//! Client address and session extraction from HTTP requests

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use hyper::Request;

/// How the server is reached by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
	/// Clients connect directly; only the peer address is trusted
	#[default]
	Standalone,
	/// Behind a reverse proxy; forwarding headers are trusted
	Proxy,
}

/// Resolve the client address of a request.
///
/// In proxy mode the forwarding headers are tried in order
/// (`X-Forwarded-For`, `X-Real-IP`, `Forwarded`) before the peer address.
pub fn extract_client_ip<B>(req: &Request<B>, mode: ServerMode) -> Option<IpAddr> {
	let peer = || req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip());
	let ip = match mode {
		ServerMode::Standalone => peer(),
		ServerMode::Proxy => forwarded_for(req)
			.or_else(|| real_ip(req))
			.or_else(|| forwarded(req))
			.or_else(peer),
	};
	ip.map(|ip| ip.to_canonical())
}

fn header<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
	req.headers().get(name).and_then(|h| h.to_str().ok())
}

/// Leftmost entry of `X-Forwarded-For`
fn forwarded_for<B>(req: &Request<B>) -> Option<IpAddr> {
	header(req, "x-forwarded-for")?.split(',').next()?.trim().parse().ok()
}

fn real_ip<B>(req: &Request<B>) -> Option<IpAddr> {
	header(req, "x-real-ip")?.trim().parse().ok()
}

/// `for=` parameter of the first `Forwarded` element (RFC 7239)
fn forwarded<B>(req: &Request<B>) -> Option<IpAddr> {
	let element = header(req, "forwarded")?.split(',').next()?;
	let value = element.split(';').find_map(|pair| {
		let (key, value) = pair.trim().split_once('=')?;
		key.eq_ignore_ascii_case("for").then_some(value)
	})?;
	let value = value.trim_matches('"');
	match value.strip_prefix('[') {
		// "[2001:db8::1]:4711"
		Some(rest) => rest.split(']').next()?.parse().ok(),
		None => value.parse().ok().or_else(|| value.parse::<SocketAddr>().ok().map(|sa| sa.ip())),
	}
}

/// Session identifier carried in the given header, if any
pub fn extract_session_id<'a, B>(req: &'a Request<B>, header_name: &str) -> Option<&'a str> {
	header(req, header_name).map(str::trim).filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{Ipv4Addr, Ipv6Addr};

	fn request(headers: &[(&str, &str)], peer: Option<&str>) -> Request<()> {
		let mut builder = Request::builder().uri("/");
		for (name, value) in headers {
			builder = builder.header(*name, *value);
		}
		let mut req = builder.body(()).unwrap();
		if let Some(peer) = peer {
			req.extensions_mut().insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
		}
		req
	}

	#[test]
	fn test_standalone_ignores_headers() {
		let req = request(&[("x-forwarded-for", "203.0.113.1")], Some("192.0.2.10:5000"));
		assert_eq!(
			extract_client_ip(&req, ServerMode::Standalone),
			Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)))
		);
	}

	#[test]
	fn test_proxy_header_order() {
		let req = request(
			&[("x-forwarded-for", "203.0.113.1, 10.0.0.1"), ("x-real-ip", "203.0.113.2")],
			Some("10.0.0.1:80"),
		);
		assert_eq!(
			extract_client_ip(&req, ServerMode::Proxy),
			Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)))
		);

		let req = request(&[("x-real-ip", "203.0.113.2")], Some("10.0.0.1:80"));
		assert_eq!(
			extract_client_ip(&req, ServerMode::Proxy),
			Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 2)))
		);

		let req = request(&[], Some("10.0.0.1:80"));
		assert_eq!(
			extract_client_ip(&req, ServerMode::Proxy),
			Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
		);
	}

	#[test]
	fn test_forwarded_header() {
		let req = request(&[("forwarded", "proto=https;For=\"[2001:db8::1]:4711\"")], None);
		assert_eq!(
			extract_client_ip(&req, ServerMode::Proxy),
			Some(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)))
		);

		let req = request(&[("forwarded", "for=192.0.2.60;proto=http, for=198.51.100.17")], None);
		assert_eq!(
			extract_client_ip(&req, ServerMode::Proxy),
			Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 60)))
		);
	}

	#[test]
	fn test_mapped_address_is_canonical() {
		let req = request(&[], Some("[::ffff:192.0.2.5]:443"));
		assert_eq!(
			extract_client_ip(&req, ServerMode::Standalone),
			Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5)))
		);
	}

	#[test]
	fn test_missing_address() {
		let req = request(&[("x-forwarded-for", "unknown")], None);
		assert_eq!(extract_client_ip(&req, ServerMode::Proxy), None);
		assert_eq!(extract_client_ip(&req, ServerMode::Standalone), None);
	}

	#[test]
	fn test_session_id() {
		let req = request(&[("x-session-id", " abc ")], None);
		assert_eq!(extract_session_id(&req, "x-session-id"), Some("abc"));
		assert_eq!(extract_session_id(&req, "x-other"), None);
	}
}

// vim: ts=4

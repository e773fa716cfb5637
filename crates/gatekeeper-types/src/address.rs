//! IP address patterns (single address or CIDR range) used by the access lists

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::prelude::*;

/// A single IP address or a CIDR network.
///
/// The network part is stored masked, so `10.0.0.7/24` and `10.0.0.0/24`
/// are the same pattern, and `10.0.0.1/32` is the same as `10.0.0.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressPattern {
	network: IpAddr,
	prefix_len: u8,
}

impl AddressPattern {
	pub fn new(addr: IpAddr, prefix_len: u8) -> ClResult<Self> {
		let addr = addr.to_canonical();
		let max = max_prefix(&addr);
		if prefix_len > max {
			return Err(Error::Malformed(format!(
				"prefix length {} out of range for {}",
				prefix_len, addr
			)));
		}
		Ok(Self { network: mask(addr, prefix_len), prefix_len })
	}

	/// Pattern matching exactly one address
	pub fn host(addr: IpAddr) -> Self {
		let addr = addr.to_canonical();
		Self { network: addr, prefix_len: max_prefix(&addr) }
	}

	pub fn network(&self) -> IpAddr {
		self.network
	}

	pub fn prefix_len(&self) -> u8 {
		self.prefix_len
	}

	pub fn is_host(&self) -> bool {
		self.prefix_len == max_prefix(&self.network)
	}

	/// Check whether an address lies inside this pattern.
	/// IPv4-mapped IPv6 addresses are matched as IPv4.
	pub fn contains(&self, addr: &IpAddr) -> bool {
		let addr = addr.to_canonical();
		match (self.network, addr) {
			(IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
				mask(addr, self.prefix_len) == self.network
			}
			_ => false,
		}
	}

	/// Parse a comma separated list, skipping blanks and invalid entries.
	/// Invalid entries are logged and returned separately.
	pub fn parse_list(list: &str) -> (Vec<AddressPattern>, Vec<String>) {
		let mut patterns = Vec::new();
		let mut invalid = Vec::new();
		for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
			match item.parse() {
				Ok(pattern) => patterns.push(pattern),
				Err(e) => {
					warn!("Ignoring invalid address pattern {:?}: {}", item, e);
					invalid.push(item.to_string());
				}
			}
		}
		(patterns, invalid)
	}
}

fn max_prefix(addr: &IpAddr) -> u8 {
	match addr {
		IpAddr::V4(_) => 32,
		IpAddr::V6(_) => 128,
	}
}

fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
	match addr {
		IpAddr::V4(ip) => {
			let bits = u32::from(ip);
			let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
			IpAddr::V4(Ipv4Addr::from(bits & mask))
		}
		IpAddr::V6(ip) => {
			let bits = u128::from(ip);
			let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
			IpAddr::V6(Ipv6Addr::from(bits & mask))
		}
	}
}

impl FromStr for AddressPattern {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		let s = s.trim();
		match s.split_once('/') {
			Some((addr, prefix)) => {
				let addr: IpAddr = addr
					.parse()
					.map_err(|_| Error::Malformed(format!("invalid address: {}", s)))?;
				let prefix_len: u8 = prefix
					.parse()
					.map_err(|_| Error::Malformed(format!("invalid prefix length: {}", s)))?;
				Self::new(addr, prefix_len)
			}
			None => {
				let addr: IpAddr = s
					.parse()
					.map_err(|_| Error::Malformed(format!("invalid address: {}", s)))?;
				Ok(Self::host(addr))
			}
		}
	}
}

impl fmt::Display for AddressPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_host() {
			write!(f, "{}", self.network)
		} else {
			write!(f, "{}/{}", self.network, self.prefix_len)
		}
	}
}

impl Serialize for AddressPattern {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for AddressPattern {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_host_pattern() {
		let pattern: AddressPattern = "198.51.100.5".parse().unwrap();
		assert!(pattern.is_host());
		assert!(pattern.contains(&"198.51.100.5".parse().unwrap()));
		assert!(!pattern.contains(&"198.51.100.6".parse().unwrap()));
		assert_eq!(pattern.to_string(), "198.51.100.5");
	}

	#[test]
	fn test_cidr_canonical_form() {
		let a: AddressPattern = "10.0.0.7/24".parse().unwrap();
		let b: AddressPattern = "10.0.0.0/24".parse().unwrap();
		assert_eq!(a, b);
		assert_eq!(a.to_string(), "10.0.0.0/24");

		let host: AddressPattern = "10.0.0.1/32".parse().unwrap();
		assert_eq!(host, "10.0.0.1".parse().unwrap());
	}

	#[test]
	fn test_cidr_contains() {
		let net: AddressPattern = "203.0.113.0/25".parse().unwrap();
		assert!(net.contains(&"203.0.113.7".parse().unwrap()));
		assert!(!net.contains(&"203.0.113.200".parse().unwrap()));
		assert!(!net.contains(&"2001:db8::1".parse().unwrap()));

		let all: AddressPattern = "0.0.0.0/0".parse().unwrap();
		assert!(all.contains(&"8.8.8.8".parse().unwrap()));
	}

	#[test]
	fn test_ipv6_and_mapped() {
		let net: AddressPattern = "2001:db8::/32".parse().unwrap();
		assert!(net.contains(&"2001:db8:85a3::1".parse().unwrap()));
		assert!(!net.contains(&"2001:db9::1".parse().unwrap()));

		let v4: AddressPattern = "192.0.2.1".parse().unwrap();
		assert!(v4.contains(&"::ffff:192.0.2.1".parse().unwrap()));
	}

	#[test]
	fn test_invalid_patterns() {
		assert!("not-an-ip".parse::<AddressPattern>().is_err());
		assert!("10.0.0.0/33".parse::<AddressPattern>().is_err());
		assert!("10.0.0.0/x".parse::<AddressPattern>().is_err());
	}

	#[test]
	fn test_parse_list() {
		let (patterns, invalid) = AddressPattern::parse_list("10.0.0.1, ,bogus,192.168.0.0/16");
		assert_eq!(patterns.len(), 2);
		assert_eq!(invalid, vec!["bogus".to_string()]);
	}

	#[test]
	fn test_serde_as_string() {
		let list: Vec<AddressPattern> =
			serde_json::from_str(r#"["10.0.0.1","10.1.0.0/16"]"#).unwrap();
		assert_eq!(serde_json::to_string(&list).unwrap(), r#"["10.0.0.1","10.1.0.0/16"]"#);
	}
}

// vim: ts=4

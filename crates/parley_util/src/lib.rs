#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// URI scheme accepted for relay endpoints.
	pub const SCHEME: &str = "quic://";

	/// Parsed `quic://host:port` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct QuicEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl QuicEndpoint {
		/// Returns `host:port` (IPv6 hosts stay bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Convert to a `SocketAddr` only if the host is an IP literal.
		pub fn to_socket_addr_if_ip_literal(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal (DNS names are not resolved here): {}", self.host))
		}

		/// Parse an endpoint string in the form `quic://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err(format!("endpoint must be non-empty (expected {SCHEME}host:port)"));
			}

			let rest = s
				.strip_prefix(SCHEME)
				.ok_or_else(|| format!("invalid endpoint (expected {SCHEME}host:port): {s}"))?;

			if rest.contains(['/', '?', '#']) {
				return Err(format!("invalid endpoint (no path/query/fragment allowed): {s}"));
			}

			let (host, port) = split_host_port(rest).ok_or_else(|| format!("invalid endpoint (missing :port): {s}"))?;

			if host.is_empty() {
				return Err(format!("invalid endpoint host: {s}"));
			}
			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("invalid endpoint host (IPv6 must be bracketed, e.g. {SCHEME}[::1]:18400): {s}"));
			}

			let port: u16 = port
				.parse()
				.ok()
				.filter(|p| *p != 0)
				.ok_or_else(|| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	fn split_host_port(s: &str) -> Option<(&str, &str)> {
		let (host, port) = s.rsplit_once(':')?;
		Some((host.trim(), port.trim()))
	}

}

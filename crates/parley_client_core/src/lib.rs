#![forbid(unsafe_code)]

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::BytesMut;
use parley_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, try_decode_frame};
use parley_protocol::wire::{self, Envelope, envelope::Msg, send_msg};
use parley_util::endpoint::QuicEndpoint;
use quinn::{ClientConfig, Endpoint, TransportConfig, VarInt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Current protocol version used in `Envelope.version`.
pub const PROTOCOL_VERSION: u32 = wire::PROTOCOL_VERSION;

/// Client session configuration (v1).
#[derive(Debug, Clone)]
pub struct ClientConfigV1 {
	/// Remote server host (DNS name or IP literal).
	pub server_host: String,

	/// Remote server UDP port.
	pub server_port: u16,

	/// Resolved remote server address override.
	pub server_addr: Option<SocketAddr>,

	/// Client identifier sent in `Hello`.
	pub client_name: String,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
}

impl ClientConfigV1 {
	/// Parse a `quic://host:port` endpoint into `(host, port)`.
	pub fn parse_quic_endpoint(endpoint: &str) -> Result<(String, u16), ClientCoreError> {
		let e = QuicEndpoint::parse(endpoint).map_err(ClientCoreError::Endpoint)?;
		Ok((e.host, e.port))
	}

	/// Convenience: create a config from `quic://host:port`.
	pub fn from_quic_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let (host, port) = Self::parse_quic_endpoint(endpoint)?;
		Ok(Self {
			server_host: host,
			server_port: port,
			server_addr: None,
			..Self::default()
		})
	}
}

impl Default for ClientConfigV1 {
	fn default() -> Self {
		// Local dev default.
		Self {
			server_host: "localhost".to_string(),
			server_port: 18400,
			server_addr: Some("127.0.0.1:18400".parse().expect("valid default addr")),
			client_name: format!("parley-client-core/{}", env!("CARGO_PKG_VERSION")),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			connect_timeout: Duration::from_secs(15),
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// QUIC endpoint setup failed.
	#[error("failed to create QUIC endpoint: {0}")]
	Endpoint(String),

	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Protocol error (unexpected message ordering/types).
	#[error("protocol error: {0}")]
	Protocol(String),

	/// IO error.
	#[error("io error: {0}")]
	Io(String),
}

/// Send half of a session: entry and chat requests.
pub struct Session {
	conn: quinn::Connection,
	send: quinn::SendStream,
	max_frame_bytes: usize,
}

/// Receive half of a session: every server event in arrival order.
pub struct SessionEvents {
	recv: quinn::RecvStream,
	buf: BytesMut,
	max_frame_bytes: usize,
}

impl Session {
	/// Connect and perform the Hello/Welcome handshake.
	///
	/// `Welcome` is guaranteed to be the first server frame; later frames
	/// (rosters, notices, chat) arrive through the returned
	/// `SessionEvents`.
	pub async fn connect(cfg: ClientConfigV1) -> Result<(Self, SessionEvents, wire::Welcome), ClientCoreError> {
		let endpoint = make_client_endpoint().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;
		let quinn_cfg = make_insecure_client_config().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let server_name = cfg.server_host.clone();
		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let hostport = format!("{}:{}", cfg.server_host, cfg.server_port);
				let addrs: Vec<SocketAddr> = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?
					.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!("no addresses for {hostport}")));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut conn: Option<quinn::Connection> = None;

		for server_addr in candidates {
			let connecting = endpoint
				.connect_with(quinn_cfg.clone(), server_addr, &server_name)
				.map_err(|e| ClientCoreError::Connect(format!("connect_with({server_addr}, sni={server_name}): {e}")))?;

			match tokio::time::timeout(cfg.connect_timeout, connecting).await {
				Ok(Ok(c)) => {
					conn = Some(c);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!("connect timeout after {:?} (addr={server_addr})", cfg.connect_timeout));
				}
			}
		}

		let conn = conn
			.ok_or_else(|| ClientCoreError::Connect(last_err.unwrap_or_else(|| "no addresses attempted".to_string())))?;

		info!(remote = %conn.remote_address(), "connected");

		let (mut send, recv) = tokio::time::timeout(cfg.connect_timeout, conn.open_bi())
			.await
			.map_err(|_| ClientCoreError::Io("timeout opening session stream".to_string()))?
			.map_err(|e| ClientCoreError::Io(format!("open_bi(session) failed: {e}")))?;

		// The Hello doubles as stream activation so the server observes
		// the stream promptly.
		let hello = Envelope::new(Msg::Hello(wire::Hello {
			client_name: cfg.client_name.clone(),
		}));
		write_envelope(&mut send, &hello, cfg.max_frame_bytes).await?;

		let mut events = SessionEvents {
			recv,
			buf: BytesMut::with_capacity(16 * 1024),
			max_frame_bytes: cfg.max_frame_bytes,
		};

		let first = tokio::time::timeout(cfg.connect_timeout, events.next_event())
			.await
			.map_err(|_| ClientCoreError::Protocol("timeout waiting for Welcome".to_string()))??;

		let welcome = match first {
			Some(Msg::Welcome(w)) => w,
			Some(other) => {
				return Err(ClientCoreError::Protocol(format!("expected Welcome, got {other:?}")));
			}
			None => {
				return Err(ClientCoreError::Protocol("stream closed before Welcome".to_string()));
			}
		};

		debug!(
			conn_id = welcome.conn_id,
			server_name = %welcome.server_name,
			max_frame_bytes = welcome.max_frame_bytes,
			"received Welcome"
		);

		let max_frame_bytes = (welcome.max_frame_bytes as usize).min(cfg.max_frame_bytes);
		events.max_frame_bytes = max_frame_bytes;

		let session = Self {
			conn,
			send,
			max_frame_bytes,
		};

		Ok((session, events, welcome))
	}

	/// Request entry: claim a nickname and join a room.
	///
	/// The outcome (`EntrySuccess` or `Error`) arrives on the events half.
	pub async fn enter(&mut self, user_id: &str, room_id: &str) -> Result<(), ClientCoreError> {
		let env = Envelope::new(Msg::Entry(wire::Entry {
			user_id: user_id.to_string(),
			room_id: room_id.to_string(),
		}));
		write_envelope(&mut self.send, &env, self.max_frame_bytes).await
	}

	/// Broadcast a message to everyone in `room_id`.
	pub async fn send_room_message(&mut self, user_id: &str, room_id: &str, text: &str) -> Result<(), ClientCoreError> {
		let env = Envelope::new(Msg::SendMsg(wire::SendMsg {
			user_id: user_id.to_string(),
			room_id: room_id.to_string(),
			msg: text.to_string(),
			dest: Some(send_msg::Dest::All(true)),
		}));
		write_envelope(&mut self.send, &env, self.max_frame_bytes).await
	}

	/// Send a direct message to one connection; the relay echoes it back.
	pub async fn send_direct_message(
		&mut self,
		user_id: &str,
		room_id: &str,
		target_conn_id: u64,
		text: &str,
	) -> Result<(), ClientCoreError> {
		let env = Envelope::new(Msg::SendMsg(wire::SendMsg {
			user_id: user_id.to_string(),
			room_id: room_id.to_string(),
			msg: text.to_string(),
			dest: Some(send_msg::Dest::ToConn(target_conn_id)),
		}));
		write_envelope(&mut self.send, &env, self.max_frame_bytes).await
	}

	/// Send a keepalive ping; the pong arrives on the events half.
	pub async fn ping(&mut self, client_time_unix_ms: i64) -> Result<(), ClientCoreError> {
		let env = Envelope::new(Msg::Ping(wire::Ping { client_time_unix_ms }));
		write_envelope(&mut self.send, &env, self.max_frame_bytes).await
	}

	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}
}

impl SessionEvents {
	/// Decode the next server event, or `None` on clean stream end.
	pub async fn next_event(&mut self) -> Result<Option<Msg>, ClientCoreError> {
		let mut tmp = [0u8; 8192];

		loop {
			match try_decode_frame::<Envelope>(&mut self.buf, self.max_frame_bytes) {
				Ok(Some(env)) => {
					if let Some(msg) = env.msg {
						return Ok(Some(msg));
					}
					// Empty envelopes are legal; skip them.
					continue;
				}
				Ok(None) => {}
				Err(e) => return Err(ClientCoreError::Framing(e)),
			}

			let n = match self.recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok(None),
				Err(e) => return Err(ClientCoreError::Io(e.to_string())),
			};

			self.buf.extend_from_slice(&tmp[..n]);
		}
	}

	/// Run the events loop until EOF or error.
	pub async fn run_events_loop<F>(&mut self, mut on_event: F) -> Result<(), ClientCoreError>
	where
		F: FnMut(Msg),
	{
		while let Some(msg) = self.next_event().await? {
			on_event(msg);
		}
		info!("session stream closed");
		Ok(())
	}
}

async fn write_envelope(send: &mut quinn::SendStream, env: &Envelope, max_frame_bytes: usize) -> Result<(), ClientCoreError> {
	let frame = encode_frame(env, max_frame_bytes).map_err(ClientCoreError::Framing)?;
	send.write_all(&frame).await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	send.flush().await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	Ok(())
}

fn make_client_endpoint() -> anyhow::Result<Endpoint> {
	let addr: SocketAddr = "0.0.0.0:0".parse().context("parse wildcard addr")?;
	let endpoint = Endpoint::client(addr).context("create client endpoint")?;
	Ok(endpoint)
}

/// Dev-only TLS config that skips server cert validation.
fn make_insecure_client_config() -> anyhow::Result<ClientConfig> {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

	#[derive(Debug)]
	struct NoVerifier;

	impl rustls::client::danger::ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::pki_types::CertificateDer<'_>,
			_intermediates: &[rustls::pki_types::CertificateDer<'_>],
			_server_name: &rustls::pki_types::ServerName<'_>,
			_ocsp_response: &[u8],
			_now: rustls::pki_types::UnixTime,
		) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::danger::ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Err(rustls::Error::General("TLS1.2 not supported".into()))
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
			vec![
				rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
				rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA256,
				rustls::SignatureScheme::RSA_PSS_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA512,
				rustls::SignatureScheme::ED25519,
			]
		}
	}

	let mut tls = rustls::ClientConfig::builder()
		.with_root_certificates(rustls::RootCertStore::empty())
		.with_no_client_auth();

	tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
	tls.alpn_protocols = vec![b"parley-v1".to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;

	let mut cfg = ClientConfig::new(Arc::new(quic_tls));

	let mut transport = TransportConfig::default();
	transport.max_concurrent_bidi_streams(VarInt::from_u32(16));
	cfg.transport_config(Arc::new(transport));

	Ok(cfg)
}

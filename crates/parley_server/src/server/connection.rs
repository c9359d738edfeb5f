#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use bytes::BytesMut;
use parley_domain::{ConnId, Destination};
use parley_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, encode_frame, try_decode_frame};
use parley_protocol::wire::{self, Envelope, code, envelope::Msg, send_msg};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::session::{Inbound, Sessions};
use crate::util::time::unix_ms_now;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	pub server_name: String,

	pub server_instance_id: String,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			server_name: format!("parley-server/{}", env!("CARGO_PKG_VERSION")),
			server_instance_id: "dev-instance".to_string(),
		}
	}
}

/// Accept QUIC connections and hand each to `handle_connection`.
///
/// Runs until the endpoint is closed. Connection ids come from a
/// monotonic counter and are never reused for the lifetime of the
/// process.
pub async fn accept_loop(endpoint: quinn::Endpoint, sessions: Arc<Sessions>, settings: ConnectionSettings) {
	let mut next_conn_id: u64 = 1;

	while let Some(connecting) = endpoint.accept().await {
		let conn_id = ConnId(next_conn_id);
		next_conn_id += 1;
		metrics::counter!("parley_server_connections_total").increment(1);

		let sessions = Arc::clone(&sessions);
		let settings = settings.clone();

		tokio::spawn(async move {
			match connecting.await {
				Ok(connection) => {
					info!(conn_id = %conn_id, remote = %connection.remote_address(), "accepted connection");
					if let Err(e) = handle_connection(conn_id, connection, sessions, settings).await {
						warn!(conn_id = %conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(conn_id = %conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}
}

/// Drive one client session from stream accept to teardown.
pub async fn handle_connection(
	conn_id: ConnId,
	connection: quinn::Connection,
	sessions: Arc<Sessions>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("parley_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("parley_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut session_send, mut session_recv) = connection.accept_bi().await.context("accept session stream")?;

	let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Envelope>();
	let max_frame_bytes = settings.max_frame_bytes;
	let reader_task = tokio::spawn(async move {
		let mut buf = BytesMut::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match session_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("session stream read failed")),
			};

			metrics::counter!("parley_server_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match try_decode_frame::<Envelope>(&mut buf, max_frame_bytes) {
					Ok(Some(env)) => {
						metrics::counter!("parley_server_frames_in_total").increment(1);
						if in_tx.send(env).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("parley_server_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode inbound frame"));
					}
				}
			}
		}
	});

	let hello = wait_for_hello(&mut in_rx).await?;
	info!(conn_id = %conn_id, client_name = %hello.client_name, "received Hello");
	metrics::counter!("parley_server_hello_total").increment(1);

	if let Err(e) = sessions.connect(conn_id).await {
		tracing::error!(conn_id = %conn_id, error = %e, "refusing connection: registry invariant violation");
		let env = Envelope::new(Msg::Error(wire::Error {
			code: code::INVARIANT.to_string(),
			msg: "connection id collision".to_string(),
		}));
		send_envelope(&mut session_send, env, settings.max_frame_bytes).await.ok();
		connection.close(quinn::VarInt::from_u32(1), b"invariant violation");
		return Err(anyhow!(e));
	}

	// Welcome goes out before the writer task takes over the stream, so it
	// is guaranteed to be the first server frame the client sees.
	let welcome = Envelope::new(Msg::Welcome(wire::Welcome {
		conn_id: conn_id.as_u64(),
		server_name: settings.server_name.clone(),
		server_instance_id: settings.server_instance_id.clone(),
		server_time_unix_ms: unix_ms_now(),
		max_frame_bytes: settings.max_frame_bytes as u32,
	}));
	send_envelope(&mut session_send, welcome, settings.max_frame_bytes)
		.await
		.context("send Welcome")?;

	let mut outbox = sessions.hub().attach(conn_id).await;
	let writer_task = tokio::spawn(async move {
		while let Some(env) = outbox.recv().await {
			let frame = match encode_frame(&env, max_frame_bytes) {
				Ok(f) => f,
				Err(e) => return Err(anyhow!(e).context("failed to encode outbound frame")),
			};

			metrics::counter!("parley_server_frames_out_total").increment(1);
			metrics::counter!("parley_server_bytes_out_total").increment(frame.len() as u64);

			if let Err(e) = session_send.write_all(&frame).await {
				return Err(anyhow!(e).context("session stream write failed"));
			}
		}
		Ok::<(), anyhow::Error>(())
	});

	let loop_result = async {
		while let Some(env) = in_rx.recv().await {
			let Some(msg) = env.msg else { continue };

			match msg {
				Msg::Entry(entry) => {
					sessions
						.process(
							conn_id,
							Inbound::Entry {
								user_id: entry.user_id,
								room_id: entry.room_id,
							},
						)
						.await;
				}

				Msg::SendMsg(send) => {
					let dest = match send.dest {
						Some(send_msg::Dest::ToConn(target)) => Destination::Conn(ConnId(target)),
						Some(send_msg::Dest::All(_)) | None => Destination::Room,
					};

					sessions
						.process(
							conn_id,
							Inbound::SendMessage {
								user_id: send.user_id,
								room_id: send.room_id,
								body: send.msg,
								dest,
							},
						)
						.await;
				}

				Msg::Ping(ping) => {
					let pong = Envelope::new(Msg::Pong(wire::Pong {
						client_time_unix_ms: ping.client_time_unix_ms,
						server_time_unix_ms: unix_ms_now(),
					}));
					sessions.hub().send_to(conn_id, pong).await;
				}

				Msg::Hello(_) => {
					debug!(conn_id = %conn_id, "ignoring duplicate Hello");
				}

				other => {
					warn!(conn_id = %conn_id, "unhandled message from client: {:?}", other);
				}
			}
		}
		Ok::<(), anyhow::Error>(())
	}
	.await;

	// Channel close is the only termination path: run the lifecycle
	// transition, then tear the outbox down (ending the writer task).
	sessions.process(conn_id, Inbound::Disconnect).await;
	sessions.hub().detach(conn_id).await;

	let _ = reader_task.await;
	let _ = writer_task.await;

	loop_result
}

async fn wait_for_hello(in_rx: &mut mpsc::UnboundedReceiver<Envelope>) -> anyhow::Result<wire::Hello> {
	while let Some(env) = in_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		if let Msg::Hello(h) = msg {
			return Ok(h);
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

async fn send_envelope(send: &mut quinn::SendStream, env: Envelope, max_frame_bytes: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&env, max_frame_bytes).map_err(|e| anyhow!(e))?;
	metrics::counter!("parley_server_frames_out_total").increment(1);
	metrics::counter!("parley_server_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parley_domain::ConnId;
use parley_protocol::wire::Envelope;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Fan-out hub holding one bounded outbound queue per attached connection.
///
/// Delivery is fire-and-forget: a full or closed queue drops the event.
/// Each connection's writer task drains its queue onto the transport.
#[derive(Debug, Clone)]
pub struct ClientHub {
	inner: Arc<Mutex<Inner>>,
	cfg: ClientHubConfig,
}

/// Configuration for `ClientHub`.
#[derive(Debug, Clone)]
pub struct ClientHubConfig {
	/// Maximum number of queued envelopes per connection.
	pub outbox_capacity: usize,

	pub debug_logs: bool,
}

impl Default for ClientHubConfig {
	fn default() -> Self {
		Self {
			outbox_capacity: 256,
			debug_logs: false,
		}
	}
}

#[derive(Debug, Default)]
struct Inner {
	outboxes: HashMap<ConnId, mpsc::Sender<Envelope>>,
}

impl ClientHub {
	pub fn new(cfg: ClientHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Attach a connection, returning the receiver its writer task drains.
	///
	/// Attaching an id twice replaces the previous outbox; the orphaned
	/// receiver sees its channel close.
	pub async fn attach(&self, conn_id: ConnId) -> mpsc::Receiver<Envelope> {
		let (tx, rx) = mpsc::channel(self.cfg.outbox_capacity);

		let mut inner = self.inner.lock().await;
		inner.outboxes.insert(conn_id, tx);

		if self.cfg.debug_logs {
			debug!(conn_id = %conn_id, attached = inner.outboxes.len(), "hub: attached");
		}

		rx
	}

	/// Drop a connection's outbox.
	pub async fn detach(&self, conn_id: ConnId) {
		let mut inner = self.inner.lock().await;
		inner.outboxes.remove(&conn_id);
	}

	/// Deliver to one connection. Returns false when the event was dropped
	/// (target missing, queue full, or queue closed).
	pub async fn send_to(&self, conn_id: ConnId, env: Envelope) -> bool {
		let mut inner = self.inner.lock().await;
		let Some(tx) = inner.outboxes.get(&conn_id) else {
			count_drop(1);
			return false;
		};

		let result = tx.try_send(env);
		match result {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				count_drop(1);
				if self.cfg.debug_logs {
					debug!(conn_id = %conn_id, "hub: dropped event, outbox full");
				}
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				inner.outboxes.remove(&conn_id);
				count_drop(1);
				false
			}
		}
	}

	/// Deliver a copy of `env` to each listed connection.
	pub async fn send_to_many(&self, targets: &[ConnId], env: &Envelope) {
		let mut inner = self.inner.lock().await;
		let mut closed: Vec<ConnId> = Vec::new();
		let mut dropped = 0u64;

		for conn_id in targets {
			match inner.outboxes.get(conn_id) {
				Some(tx) => match tx.try_send(env.clone()) {
					Ok(()) => {}
					Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
					Err(mpsc::error::TrySendError::Closed(_)) => {
						closed.push(*conn_id);
						dropped += 1;
					}
				},
				None => dropped += 1,
			}
		}

		for conn_id in closed {
			inner.outboxes.remove(&conn_id);
		}

		if dropped > 0 {
			count_drop(dropped);
			if self.cfg.debug_logs {
				debug!(dropped, "hub: dropped events during targeted send");
			}
		}
	}

	/// Deliver a copy of `env` to every attached connection.
	pub async fn send_to_all(&self, env: &Envelope) {
		let mut inner = self.inner.lock().await;
		let mut closed: Vec<ConnId> = Vec::new();
		let mut dropped = 0u64;

		for (conn_id, tx) in inner.outboxes.iter() {
			match tx.try_send(env.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
				Err(mpsc::error::TrySendError::Closed(_)) => {
					closed.push(*conn_id);
					dropped += 1;
				}
			}
		}

		for conn_id in closed {
			inner.outboxes.remove(&conn_id);
		}

		if dropped > 0 {
			count_drop(dropped);
			if self.cfg.debug_logs {
				debug!(dropped, "hub: dropped events during broadcast");
			}
		}
	}

	/// Number of currently attached connections.
	pub async fn attached_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.outboxes.len()
	}
}

fn count_drop(n: u64) {
	metrics::counter!("parley_server_dropped_events_total").increment(n);
}

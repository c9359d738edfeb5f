#![forbid(unsafe_code)]

use parley_domain::{ConnId, Destination, Nickname, RoomId};
use parley_protocol::wire::{self, Envelope, code, envelope::Msg};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::server::hub::ClientHub;
use crate::server::registry::{Registry, RegistryError};
use crate::server::roster;
use crate::server::router::{self, SendRequest};

/// Inbound client events, as processed by the session state machine.
#[derive(Debug, Clone)]
pub enum Inbound {
	Entry {
		user_id: String,
		room_id: String,
	},
	SendMessage {
		user_id: String,
		room_id: String,
		body: String,
		dest: Destination,
	},
	Disconnect,
}

/// Session lifecycle: the single serialization point for presence state.
///
/// Every registry mutation and the roster reads feeding the
/// notifications that follow it happen under the one lock, so no two
/// entries can both pass the nickname uniqueness check and notifications
/// go out in mutation order. Send requests only take the lock to
/// snapshot room membership.
pub struct Sessions {
	registry: Mutex<Registry>,
	hub: ClientHub,
}

impl Sessions {
	pub fn new(hub: ClientHub) -> Self {
		Self {
			registry: Mutex::new(Registry::default()),
			hub,
		}
	}

	pub fn hub(&self) -> &ClientHub {
		&self.hub
	}

	/// Register a newly established connection.
	///
	/// A duplicate id means the connection counter is broken; the caller
	/// logs and refuses the connection.
	pub async fn connect(&self, conn_id: ConnId) -> Result<(), RegistryError> {
		let mut reg = self.registry.lock().await;
		reg.register(conn_id)?;
		metrics::counter!("parley_server_registered_connections_total").increment(1);
		Ok(())
	}

	/// Process one inbound event for `conn_id`.
	pub async fn process(&self, conn_id: ConnId, event: Inbound) {
		match event {
			Inbound::Entry { user_id, room_id } => self.enter(conn_id, user_id, room_id).await,
			Inbound::SendMessage {
				user_id,
				room_id,
				body,
				dest,
			} => self.send_message(conn_id, user_id, room_id, body, dest).await,
			Inbound::Disconnect => self.disconnect(conn_id).await,
		}
	}

	/// Connected -> Active, guarded by nickname uniqueness.
	async fn enter(&self, conn_id: ConnId, user_id: String, room_id: String) {
		let (nickname, room) = match (Nickname::new(user_id), RoomId::new(room_id)) {
			(Ok(nickname), Ok(room)) => (nickname, room),
			_ => {
				metrics::counter!("parley_server_entries_rejected_total").increment(1);
				self.send_error(conn_id, code::INVALID_ENTRY, "nickname and room must be non-empty")
					.await;
				return;
			}
		};

		let mut reg = self.registry.lock().await;
		match reg.set_entry(conn_id, nickname.clone(), room.clone()) {
			Ok(()) => {
				metrics::counter!("parley_server_entries_total").increment(1);
				info!(conn_id = %conn_id, nickname = %nickname, room = %room, "entry accepted");

				let members = reg.members_of(&room);
				self.hub
					.send_to_many(
						&members,
						&Envelope::new(Msg::Notice(wire::Notice {
							msg: format!("{nickname} joined {room}"),
						})),
					)
					.await;

				self.hub
					.send_to(
						conn_id,
						Envelope::new(Msg::EntrySuccess(wire::EntrySuccess {
							user_id: nickname.as_str().to_string(),
						})),
					)
					.await;

				roster::broadcast_roster(&reg, &self.hub).await;
				roster::broadcast_room_roster(&reg, &self.hub, &room).await;
			}
			Err(RegistryError::DuplicateNickname(ref name)) => {
				metrics::counter!("parley_server_entries_rejected_total").increment(1);
				warn!(conn_id = %conn_id, nickname = %name, "entry rejected: duplicate nickname");
				self.send_error(conn_id, code::DUPLICATE_NICKNAME, "that nickname is already taken")
					.await;
			}
			Err(RegistryError::AlreadyEntered(_)) => {
				metrics::counter!("parley_server_entries_rejected_total").increment(1);
				debug!(conn_id = %conn_id, "entry rejected: connection already entered");
				self.send_error(conn_id, code::ALREADY_ENTERED, "entry already completed on this connection")
					.await;
			}
			Err(e) => {
				error!(conn_id = %conn_id, error = %e, "entry failed: registry invariant violation");
				self.send_error(conn_id, code::INVARIANT, "internal registry error").await;
			}
		}
	}

	/// Resolve and deliver a send request. No state mutation.
	async fn send_message(&self, conn_id: ConnId, user_id: String, room_id: String, body: String, dest: Destination) {
		let room_members = match (dest, RoomId::new(room_id)) {
			(Destination::Room, Ok(room)) => {
				let reg = self.registry.lock().await;
				reg.members_of(&room)
			}
			// Direct messages ignore the room; an unusable room id just
			// means an empty broadcast.
			_ => Vec::new(),
		};

		router::route(
			&self.hub,
			&room_members,
			SendRequest {
				sender: conn_id,
				sender_name: user_id,
				body,
				dest,
			},
		)
		.await;
	}

	/// Connected|Active -> Terminated. Idempotent.
	async fn disconnect(&self, conn_id: ConnId) {
		let mut reg = self.registry.lock().await;
		let departure = match reg.remove(conn_id) {
			Ok(d) => d,
			Err(RegistryError::NotRegistered(_)) => {
				debug!(conn_id = %conn_id, "disconnect for unregistered connection; nothing to do");
				return;
			}
			Err(e) => {
				error!(conn_id = %conn_id, error = %e, "disconnect failed");
				return;
			}
		};

		// The room comes from the removed slot itself, never via a
		// nickname lookup after deletion.
		let (Some(nickname), Some(room)) = (departure.nickname, departure.room) else {
			debug!(conn_id = %conn_id, "disconnect before entry; no notices");
			return;
		};

		info!(conn_id = %conn_id, nickname = %nickname, room = %room, "active connection left");

		let members = reg.members_of(&room);
		self.hub
			.send_to_many(
				&members,
				&Envelope::new(Msg::Notice(wire::Notice {
					msg: format!("{nickname} left {room}"),
				})),
			)
			.await;

		roster::broadcast_roster(&reg, &self.hub).await;
		roster::broadcast_room_roster(&reg, &self.hub, &room).await;
	}

	async fn send_error(&self, conn_id: ConnId, code: &str, msg: &str) {
		self.hub
			.send_to(
				conn_id,
				Envelope::new(Msg::Error(wire::Error {
					code: code.to_string(),
					msg: msg.to_string(),
				})),
			)
			.await;
	}
}

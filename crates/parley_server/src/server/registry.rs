#![forbid(unsafe_code)]

use std::collections::HashMap;

use parley_domain::{ConnId, Nickname, RoomId};
use thiserror::Error;

/// Errors from registry mutations.
///
/// `AlreadyRegistered` and `NotRegistered`-on-entry are invariant
/// violations: they mean the connection counter or the caller is broken.
/// Callers log them at error level and reject the operation, never
/// swallow them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
	#[error("connection {0} is already registered")]
	AlreadyRegistered(ConnId),

	#[error("connection {0} is not registered")]
	NotRegistered(ConnId),

	#[error("nickname {0:?} is held by another connection")]
	DuplicateNickname(String),

	#[error("connection {0} already completed entry")]
	AlreadyEntered(ConnId),
}

#[derive(Debug, Default, Clone)]
struct Slot {
	nickname: Option<Nickname>,
	room: Option<RoomId>,
}

/// What `remove` found for a departing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
	pub nickname: Option<Nickname>,
	pub room: Option<RoomId>,
}

impl Departure {
	/// True when the connection had completed entry.
	pub fn was_active(&self) -> bool {
		self.nickname.is_some() && self.room.is_some()
	}
}

/// In-memory connection registry: the single owner of presence state.
///
/// Plain data structure with no interior locking; the session layer
/// serializes every mutation together with the roster reads that feed
/// the notifications which follow it.
#[derive(Debug, Default)]
pub struct Registry {
	conns: HashMap<ConnId, Slot>,
}

impl Registry {
	/// Create an empty slot for a newly established connection.
	pub fn register(&mut self, conn_id: ConnId) -> Result<(), RegistryError> {
		if self.conns.contains_key(&conn_id) {
			return Err(RegistryError::AlreadyRegistered(conn_id));
		}
		self.conns.insert(conn_id, Slot::default());
		Ok(())
	}

	/// Record nickname and room for a connection, both at once.
	///
	/// The uniqueness check and the commit happen under the caller's lock,
	/// so two racing entries for the same nickname cannot both pass.
	pub fn set_entry(&mut self, conn_id: ConnId, nickname: Nickname, room: RoomId) -> Result<(), RegistryError> {
		{
			let slot = self.conns.get(&conn_id).ok_or(RegistryError::NotRegistered(conn_id))?;
			if slot.nickname.is_some() {
				return Err(RegistryError::AlreadyEntered(conn_id));
			}
		}

		if self.nickname_taken(&nickname) {
			return Err(RegistryError::DuplicateNickname(nickname.into_string()));
		}

		let Some(slot) = self.conns.get_mut(&conn_id) else {
			return Err(RegistryError::NotRegistered(conn_id));
		};
		slot.nickname = Some(nickname);
		slot.room = Some(room);
		Ok(())
	}

	/// Delete a connection's slot, returning what it held.
	///
	/// Absent ids report `NotRegistered`; disconnect paths treat that as
	/// an idempotent no-op.
	pub fn remove(&mut self, conn_id: ConnId) -> Result<Departure, RegistryError> {
		match self.conns.remove(&conn_id) {
			Some(slot) => Ok(Departure {
				nickname: slot.nickname,
				room: slot.room,
			}),
			None => Err(RegistryError::NotRegistered(conn_id)),
		}
	}

	/// True if any live connection holds `nickname`.
	pub fn nickname_taken(&self, nickname: &Nickname) -> bool {
		self.conns.values().any(|slot| slot.nickname.as_ref() == Some(nickname))
	}

	/// Full `ConnId -> Nickname` mapping over entered connections.
	pub fn all_identities(&self) -> HashMap<ConnId, Nickname> {
		self.conns
			.iter()
			.filter_map(|(id, slot)| slot.nickname.clone().map(|n| (*id, n)))
			.collect()
	}

	/// The mapping restricted to connections whose room equals `room`.
	pub fn identities_in_room(&self, room: &RoomId) -> HashMap<ConnId, Nickname> {
		self.conns
			.iter()
			.filter(|(_, slot)| slot.room.as_ref() == Some(room))
			.filter_map(|(id, slot)| slot.nickname.clone().map(|n| (*id, n)))
			.collect()
	}

	/// Connection ids currently joined to `room`.
	pub fn members_of(&self, room: &RoomId) -> Vec<ConnId> {
		self.conns
			.iter()
			.filter(|(_, slot)| slot.room.as_ref() == Some(room))
			.map(|(id, _)| *id)
			.collect()
	}

	pub fn contains(&self, conn_id: ConnId) -> bool {
		self.conns.contains_key(&conn_id)
	}

	pub fn len(&self) -> usize {
		self.conns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.conns.is_empty()
	}
}

#![forbid(unsafe_code)]

use std::collections::HashMap;

use parley_domain::{ConnId, Nickname, RoomBucket, RoomId};
use parley_protocol::wire::{self, Envelope, envelope::Msg};

use crate::server::hub::ClientHub;
use crate::server::registry::Registry;

/// Emit the full roster to every attached client.
///
/// Callers invoke this (then `broadcast_room_roster`) while still holding
/// the session lock, so the snapshot is exactly the post-mutation state.
pub async fn broadcast_roster(registry: &Registry, hub: &ClientHub) {
	let env = Envelope::new(Msg::UserList(wire::UserList {
		users: to_wire_users(registry.all_identities()),
	}));
	hub.send_to_all(&env).await;
}

/// Emit the roster of `room`, tagged with its bucket, to every attached
/// client (not just the room's members; clients render whichever room
/// they are viewing).
pub async fn broadcast_room_roster(registry: &Registry, hub: &ClientHub, room: &RoomId) {
	let env = Envelope::new(Msg::RoomRoster(wire::RoomRoster {
		bucket: map_bucket(RoomBucket::classify(room)) as i32,
		users: to_wire_users(registry.identities_in_room(room)),
	}));
	hub.send_to_all(&env).await;
}

fn map_bucket(bucket: RoomBucket) -> wire::RosterBucket {
	match bucket {
		RoomBucket::Front => wire::RosterBucket::Front,
		RoomBucket::Back => wire::RosterBucket::Back,
		RoomBucket::Full => wire::RosterBucket::Full,
	}
}

fn to_wire_users(identities: HashMap<ConnId, Nickname>) -> HashMap<u64, String> {
	identities
		.into_iter()
		.map(|(id, nick)| (id.as_u64(), nick.into_string()))
		.collect()
}

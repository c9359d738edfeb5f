#![forbid(unsafe_code)]

//! Wire message set for the relay protocol (v1).
//!
//! Hand-derived prost messages; the set is small and fixed, so there is
//! no generated code and no protoc step. All traffic on a session stream
//! is `Envelope` frames in both directions.

use std::collections::HashMap;

/// Protocol version written into `Envelope.version`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Stable error codes carried in `Error.code`.
pub mod code {
	/// Entry rejected: nickname held by another live connection.
	pub const DUPLICATE_NICKNAME: &str = "DUPLICATE_NICKNAME";
	/// Entry rejected: this connection already completed entry.
	pub const ALREADY_ENTERED: &str = "ALREADY_ENTERED";
	/// Entry rejected: empty nickname or room id.
	pub const INVALID_ENTRY: &str = "INVALID_ENTRY";
	/// Registry invariant violation; the connection is being refused.
	pub const INVARIANT: &str = "INVARIANT";
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,

	#[prost(oneof = "envelope::Msg", tags = "10, 11, 12, 13, 20, 21, 22, 23, 24, 25, 26, 27")]
	pub msg: Option<envelope::Msg>,
}

impl Envelope {
	/// Wrap a message in a v1 envelope.
	pub fn new(msg: envelope::Msg) -> Self {
		Self {
			version: PROTOCOL_VERSION,
			msg: Some(msg),
		}
	}
}

pub mod envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Msg {
		// client -> server
		#[prost(message, tag = "10")]
		Hello(super::Hello),
		#[prost(message, tag = "11")]
		Entry(super::Entry),
		#[prost(message, tag = "12")]
		SendMsg(super::SendMsg),
		#[prost(message, tag = "13")]
		Ping(super::Ping),

		// server -> client
		#[prost(message, tag = "20")]
		Welcome(super::Welcome),
		#[prost(message, tag = "21")]
		EntrySuccess(super::EntrySuccess),
		#[prost(message, tag = "22")]
		Error(super::Error),
		#[prost(message, tag = "23")]
		Notice(super::Notice),
		#[prost(message, tag = "24")]
		UserList(super::UserList),
		#[prost(message, tag = "25")]
		RoomRoster(super::RoomRoster),
		#[prost(message, tag = "26")]
		Chat(super::Chat),
		#[prost(message, tag = "27")]
		Pong(super::Pong),
	}
}

/// First client frame on a session stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
	#[prost(string, tag = "1")]
	pub client_name: String,
}

/// First server frame on a session stream.
///
/// `conn_id` is what rosters show for this client and what other clients
/// use to address direct messages to it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(uint64, tag = "1")]
	pub conn_id: u64,
	#[prost(string, tag = "2")]
	pub server_name: String,
	#[prost(string, tag = "3")]
	pub server_instance_id: String,
	#[prost(int64, tag = "4")]
	pub server_time_unix_ms: i64,
	#[prost(uint32, tag = "5")]
	pub max_frame_bytes: u32,
}

/// Entry request: claim a nickname and join a room.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Entry {
	#[prost(string, tag = "1")]
	pub user_id: String,
	#[prost(string, tag = "2")]
	pub room_id: String,
}

/// Chat send request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMsg {
	#[prost(string, tag = "1")]
	pub user_id: String,
	#[prost(string, tag = "2")]
	pub room_id: String,
	#[prost(string, tag = "3")]
	pub msg: String,

	#[prost(oneof = "send_msg::Dest", tags = "4, 5")]
	pub dest: Option<send_msg::Dest>,
}

pub mod send_msg {
	#[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
	pub enum Dest {
		/// Broadcast to every connection in `room_id`.
		#[prost(bool, tag = "4")]
		All(bool),
		/// Direct message to one connection; the relay echoes it to the
		/// sender as well.
		#[prost(uint64, tag = "5")]
		ToConn(u64),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ping {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pong {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
}

/// Entry acknowledgment, sent to the requester only.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntrySuccess {
	#[prost(string, tag = "1")]
	pub user_id: String,
}

/// Request failure, sent to the requester only.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	#[prost(string, tag = "1")]
	pub code: String,
	#[prost(string, tag = "2")]
	pub msg: String,
}

/// Human-readable join/leave notice, sent to the affected room.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notice {
	#[prost(string, tag = "1")]
	pub msg: String,
}

/// Full roster: every entered connection, sent to all clients.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserList {
	#[prost(map = "uint64, string", tag = "1")]
	pub users: HashMap<u64, String>,
}

/// Which roster bucket a `RoomRoster` reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RosterBucket {
	Unspecified = 0,
	Front = 1,
	Back = 2,
	Full = 3,
}

/// Room-scoped roster, tagged with its bucket, sent to all clients.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomRoster {
	#[prost(enumeration = "RosterBucket", tag = "1")]
	pub bucket: i32,
	#[prost(map = "uint64, string", tag = "2")]
	pub users: HashMap<u64, String>,
}

/// Relayed chat message. `dm` is set on direct messages (both the copy
/// delivered to the target and the echo to the sender).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Chat {
	#[prost(string, tag = "1")]
	pub user_id: String,
	#[prost(string, tag = "2")]
	pub msg: String,
	#[prost(bool, tag = "3")]
	pub dm: bool,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::framing::{DEFAULT_MAX_FRAME_SIZE, encode_frame, try_decode_frame};
	use bytes::BytesMut;

	#[test]
	fn envelope_roundtrips_a_send_msg() {
		let env = Envelope::new(envelope::Msg::SendMsg(SendMsg {
			user_id: "alice".to_string(),
			room_id: "FRONTEND".to_string(),
			msg: "hi".to_string(),
			dest: Some(send_msg::Dest::ToConn(9)),
		}));

		let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).expect("encode");
		let mut buf = BytesMut::from(&frame[..]);
		let decoded = try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.expect("some");

		assert_eq!(decoded.version, PROTOCOL_VERSION);
		assert_eq!(decoded, env);
	}

	#[test]
	fn roster_bucket_enumeration_is_stable() {
		assert_eq!(RosterBucket::try_from(1), Ok(RosterBucket::Front));
		assert_eq!(RosterBucket::try_from(2), Ok(RosterBucket::Back));
		assert_eq!(RosterBucket::try_from(3), Ok(RosterBucket::Full));
		assert!(RosterBucket::try_from(99).is_err());
	}
}

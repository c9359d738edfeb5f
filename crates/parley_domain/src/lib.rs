#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid connection id: {0}")]
	InvalidConnId(String),
}

/// Server-assigned connection identifier.
///
/// Unique per live channel; assigned from a monotonic counter and never
/// reused while the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

impl ConnId {
	pub const fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ConnId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<u64> for ConnId {
	fn from(id: u64) -> Self {
		Self(id)
	}
}

impl FromStr for ConnId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		s.parse::<u64>()
			.map(Self)
			.map_err(|_| ParseIdError::InvalidConnId(s.to_string()))
	}
}

/// Client-chosen display name, unique among active connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nickname(String);

impl Nickname {
	/// Create a non-empty `Nickname`.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for Nickname {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Nickname {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Nickname::new(s.to_string())
	}
}

/// Room identifier supplied by the client at entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Roster bucket a room id is reported under.
///
/// The two well-known rooms each get a dedicated bucket; every other room
/// id falls into the `Full` catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomBucket {
	Front,
	Back,
	Full,
}

impl RoomBucket {
	/// Well-known room id reported under `Front`.
	pub const FRONT_ROOM: &'static str = "FRONTEND";
	/// Well-known room id reported under `Back`.
	pub const BACK_ROOM: &'static str = "BACKEND";

	/// Classify an arbitrary room id into its bucket.
	pub fn classify(room: &RoomId) -> Self {
		match room.as_str() {
			Self::FRONT_ROOM => RoomBucket::Front,
			Self::BACK_ROOM => RoomBucket::Back,
			_ => RoomBucket::Full,
		}
	}

	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			RoomBucket::Front => "front",
			RoomBucket::Back => "back",
			RoomBucket::Full => "full",
		}
	}
}

impl fmt::Display for RoomBucket {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Where a chat message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
	/// Broadcast to every connection currently joined to the sender's room.
	Room,
	/// Direct message to one connection, echoed back to the sender.
	Conn(ConnId),
}

#![forbid(unsafe_code)]

use parley_domain::{ConnId, Destination};
use parley_protocol::wire::{self, Envelope, code, envelope::Msg};
use tokio::sync::mpsc;

use crate::server::hub::{ClientHub, ClientHubConfig};
use crate::server::session::{Inbound, Sessions};

fn sessions() -> Sessions {
	Sessions::new(ClientHub::new(ClientHubConfig {
		outbox_capacity: 64,
		debug_logs: false,
	}))
}

/// Attach an outbox and register, the way the connection handler does.
async fn join(sessions: &Sessions, id: u64) -> mpsc::Receiver<Envelope> {
	let rx = sessions.hub().attach(ConnId(id)).await;
	sessions.connect(ConnId(id)).await.expect("register");
	rx
}

async fn enter(sessions: &Sessions, id: u64, nickname: &str, room: &str) {
	sessions
		.process(
			ConnId(id),
			Inbound::Entry {
				user_id: nickname.to_string(),
				room_id: room.to_string(),
			},
		)
		.await;
}

async fn send(sessions: &Sessions, id: u64, nickname: &str, room: &str, body: &str, dest: Destination) {
	sessions
		.process(
			ConnId(id),
			Inbound::SendMessage {
				user_id: nickname.to_string(),
				room_id: room.to_string(),
				body: body.to_string(),
				dest,
			},
		)
		.await;
}

/// Everything queued so far; lifecycle processing is sequential, so the
/// queue is settled by the time `process` returns.
fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<Msg> {
	let mut out = Vec::new();
	while let Ok(env) = rx.try_recv() {
		out.push(env.msg.expect("envelope has a message"));
	}
	out
}

fn expect_error(msg: &Msg) -> &wire::Error {
	match msg {
		Msg::Error(e) => e,
		other => panic!("expected Error, got {other:?}"),
	}
}

fn expect_chat(msg: &Msg) -> &wire::Chat {
	match msg {
		Msg::Chat(c) => c,
		other => panic!("expected Chat, got {other:?}"),
	}
}

#[tokio::test]
async fn successful_entry_emits_notice_ack_and_rosters_in_order() {
	let s = sessions();
	let mut rx = join(&s, 1).await;

	enter(&s, 1, "alice", "FRONTEND").await;

	let events = drain(&mut rx);
	assert_eq!(events.len(), 4, "events: {events:?}");

	match &events[0] {
		Msg::Notice(n) => assert_eq!(n.msg, "alice joined FRONTEND"),
		other => panic!("expected Notice first, got {other:?}"),
	}
	match &events[1] {
		Msg::EntrySuccess(ack) => assert_eq!(ack.user_id, "alice"),
		other => panic!("expected EntrySuccess second, got {other:?}"),
	}
	match &events[2] {
		Msg::UserList(list) => {
			assert_eq!(list.users.len(), 1);
			assert_eq!(list.users.get(&1), Some(&"alice".to_string()));
		}
		other => panic!("expected UserList third, got {other:?}"),
	}
	match &events[3] {
		Msg::RoomRoster(roster) => {
			assert_eq!(roster.bucket, wire::RosterBucket::Front as i32);
			assert_eq!(roster.users.get(&1), Some(&"alice".to_string()));
		}
		other => panic!("expected RoomRoster last, got {other:?}"),
	}
}

#[tokio::test]
async fn unknown_room_ids_report_the_catch_all_bucket() {
	let s = sessions();
	let mut rx = join(&s, 1).await;

	enter(&s, 1, "alice", "LOUNGE").await;

	let events = drain(&mut rx);
	let roster = events
		.iter()
		.find_map(|m| match m {
			Msg::RoomRoster(r) => Some(r),
			_ => None,
		})
		.expect("room roster emitted");
	assert_eq!(roster.bucket, wire::RosterBucket::Full as i32);
}

#[tokio::test]
async fn second_entry_with_same_nickname_gets_error_and_no_roster_change() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	drain(&mut rx1);
	drain(&mut rx2);

	enter(&s, 2, "alice", "FRONTEND").await;

	let loser = drain(&mut rx2);
	assert_eq!(loser.len(), 1, "events: {loser:?}");
	let err = expect_error(&loser[0]);
	assert_eq!(err.code, code::DUPLICATE_NICKNAME);

	// The holder saw nothing: no notice, no roster churn.
	assert!(drain(&mut rx1).is_empty());

	// The loser may retry with a fresh nickname.
	enter(&s, 2, "bob", "FRONTEND").await;
	let retry = drain(&mut rx2);
	assert!(
		retry.iter().any(|m| matches!(m, Msg::EntrySuccess(_))),
		"retry events: {retry:?}"
	);
}

#[tokio::test]
async fn reentry_while_active_is_rejected() {
	let s = sessions();
	let mut rx = join(&s, 1).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	drain(&mut rx);

	enter(&s, 1, "alice2", "BACKEND").await;

	let events = drain(&mut rx);
	assert_eq!(events.len(), 1, "events: {events:?}");
	assert_eq!(expect_error(&events[0]).code, code::ALREADY_ENTERED);
}

#[tokio::test]
async fn blank_entry_fields_are_rejected() {
	let s = sessions();
	let mut rx = join(&s, 1).await;

	enter(&s, 1, "   ", "FRONTEND").await;
	let events = drain(&mut rx);
	assert_eq!(events.len(), 1);
	assert_eq!(expect_error(&events[0]).code, code::INVALID_ENTRY);

	enter(&s, 1, "alice", "").await;
	let events = drain(&mut rx);
	assert_eq!(events.len(), 1);
	assert_eq!(expect_error(&events[0]).code, code::INVALID_ENTRY);
}

#[tokio::test]
async fn room_broadcast_is_scoped_to_the_room() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;
	let mut rx3 = join(&s, 3).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	enter(&s, 2, "bob", "FRONTEND").await;
	enter(&s, 3, "carol", "BACKEND").await;
	drain(&mut rx1);
	drain(&mut rx2);
	drain(&mut rx3);

	send(&s, 1, "alice", "FRONTEND", "hi front", Destination::Room).await;

	for rx in [&mut rx1, &mut rx2] {
		let events = drain(rx);
		assert_eq!(events.len(), 1, "events: {events:?}");
		let chat = expect_chat(&events[0]);
		assert_eq!(chat.user_id, "alice");
		assert_eq!(chat.msg, "hi front");
		assert!(!chat.dm);
	}

	assert!(drain(&mut rx3).is_empty(), "other rooms must not see the broadcast");
}

#[tokio::test]
async fn direct_message_round_trip() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;
	let mut rx3 = join(&s, 3).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	enter(&s, 2, "bob", "FRONTEND").await;
	enter(&s, 3, "carol", "BACKEND").await;
	drain(&mut rx1);
	drain(&mut rx2);
	drain(&mut rx3);

	// Direct messages cross rooms; no membership validation applies.
	send(&s, 1, "alice", "FRONTEND", "hi", Destination::Conn(ConnId(3))).await;

	let target = drain(&mut rx3);
	assert_eq!(target.len(), 1);
	let delivered = expect_chat(&target[0]).clone();
	assert!(delivered.dm);
	assert_eq!(delivered.msg, "hi");

	let echo = drain(&mut rx1);
	assert_eq!(echo.len(), 1);
	assert_eq!(expect_chat(&echo[0]), &delivered);

	assert!(drain(&mut rx2).is_empty(), "third parties must not see the DM");
}

#[tokio::test]
async fn disconnect_before_entry_is_silent() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	drain(&mut rx1);
	drain(&mut rx2);

	s.process(ConnId(2), Inbound::Disconnect).await;

	assert!(drain(&mut rx1).is_empty(), "no notice or roster change for a silent leaver");
	assert!(drain(&mut rx2).is_empty());
}

#[tokio::test]
async fn active_disconnect_emits_left_notice_and_fresh_rosters() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	enter(&s, 2, "bob", "FRONTEND").await;
	drain(&mut rx1);
	drain(&mut rx2);

	s.process(ConnId(1), Inbound::Disconnect).await;

	let events = drain(&mut rx2);
	assert_eq!(events.len(), 3, "events: {events:?}");

	match &events[0] {
		Msg::Notice(n) => assert_eq!(n.msg, "alice left FRONTEND"),
		other => panic!("expected Notice first, got {other:?}"),
	}
	match &events[1] {
		Msg::UserList(list) => {
			assert_eq!(list.users.len(), 1);
			assert_eq!(list.users.get(&2), Some(&"bob".to_string()));
		}
		other => panic!("expected UserList second, got {other:?}"),
	}
	match &events[2] {
		Msg::RoomRoster(roster) => {
			assert_eq!(roster.bucket, wire::RosterBucket::Front as i32);
			assert!(!roster.users.contains_key(&1), "leaver must be gone from the room roster");
		}
		other => panic!("expected RoomRoster last, got {other:?}"),
	}
}

#[tokio::test]
async fn repeated_disconnects_are_noops() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;
	let mut rx2 = join(&s, 2).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	enter(&s, 2, "bob", "FRONTEND").await;
	drain(&mut rx1);
	drain(&mut rx2);

	s.process(ConnId(1), Inbound::Disconnect).await;
	drain(&mut rx2);

	s.process(ConnId(1), Inbound::Disconnect).await;
	s.process(ConnId(1), Inbound::Disconnect).await;

	assert!(drain(&mut rx2).is_empty(), "repeated disconnects must stay silent");
}

#[tokio::test]
async fn freed_nickname_is_available_after_disconnect() {
	let s = sessions();
	let mut rx1 = join(&s, 1).await;

	enter(&s, 1, "alice", "FRONTEND").await;
	drain(&mut rx1);
	s.process(ConnId(1), Inbound::Disconnect).await;

	let mut rx2 = join(&s, 2).await;
	enter(&s, 2, "alice", "FRONTEND").await;

	let events = drain(&mut rx2);
	assert!(
		events.iter().any(|m| matches!(m, Msg::EntrySuccess(_))),
		"events: {events:?}"
	);
}

#[tokio::test]
async fn duplicate_connection_id_registration_is_refused() {
	let s = sessions();
	let _rx = join(&s, 1).await;

	let err = s.connect(ConnId(1)).await.unwrap_err();
	assert_eq!(
		err,
		crate::server::registry::RegistryError::AlreadyRegistered(ConnId(1))
	);
}

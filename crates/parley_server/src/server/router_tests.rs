#![forbid(unsafe_code)]

use parley_domain::{ConnId, Destination};
use parley_protocol::wire::{self, Envelope, envelope::Msg};
use tokio::sync::mpsc;

use crate::server::hub::{ClientHub, ClientHubConfig};
use crate::server::router::{SendRequest, route};

async fn hub_with(conns: &[u64]) -> (ClientHub, Vec<mpsc::Receiver<Envelope>>) {
	let hub = ClientHub::new(ClientHubConfig::default());
	let mut receivers = Vec::with_capacity(conns.len());
	for id in conns {
		receivers.push(hub.attach(ConnId(*id)).await);
	}
	(hub, receivers)
}

fn drain_chats(rx: &mut mpsc::Receiver<Envelope>) -> Vec<wire::Chat> {
	let mut out = Vec::new();
	while let Ok(env) = rx.try_recv() {
		match env.msg {
			Some(Msg::Chat(chat)) => out.push(chat),
			other => panic!("expected Chat, got {other:?}"),
		}
	}
	out
}

fn request(sender: u64, dest: Destination, body: &str) -> SendRequest {
	SendRequest {
		sender: ConnId(sender),
		sender_name: "alice".to_string(),
		body: body.to_string(),
		dest,
	}
}

#[tokio::test]
async fn room_broadcast_reaches_the_member_list_only() {
	let (hub, mut rxs) = hub_with(&[1, 2, 3]).await;

	route(&hub, &[ConnId(1), ConnId(2)], request(1, Destination::Room, "hi room")).await;

	let for_1 = drain_chats(&mut rxs[0]);
	assert_eq!(for_1.len(), 1);
	assert_eq!(for_1[0].user_id, "alice");
	assert_eq!(for_1[0].msg, "hi room");
	assert!(!for_1[0].dm);

	assert_eq!(drain_chats(&mut rxs[1]).len(), 1);
	assert!(drain_chats(&mut rxs[2]).is_empty());
}

#[tokio::test]
async fn direct_message_goes_to_target_and_echoes_to_sender() {
	let (hub, mut rxs) = hub_with(&[1, 2, 3]).await;

	route(&hub, &[], request(1, Destination::Conn(ConnId(3)), "psst")).await;

	let target = drain_chats(&mut rxs[2]);
	assert_eq!(target.len(), 1);
	assert!(target[0].dm);
	assert_eq!(target[0].msg, "psst");

	let echo = drain_chats(&mut rxs[0]);
	assert_eq!(echo.len(), 1);
	assert_eq!(echo[0], target[0]);

	assert!(drain_chats(&mut rxs[1]).is_empty());
}

#[tokio::test]
async fn direct_message_to_vanished_target_is_dropped_but_still_echoed() {
	let (hub, mut rxs) = hub_with(&[1]).await;

	route(&hub, &[], request(1, Destination::Conn(ConnId(404)), "anyone there")).await;

	let echo = drain_chats(&mut rxs[0]);
	assert_eq!(echo.len(), 1);
	assert!(echo[0].dm);
}

#![forbid(unsafe_code)]

use parley_domain::{ConnId, Destination};
use parley_protocol::wire::{self, Envelope, envelope::Msg};
use tracing::debug;

use crate::server::hub::ClientHub;

/// A resolved chat send request.
///
/// `sender_name` and `room` are relayed as supplied by the client; the
/// router performs no membership validation and never mutates registry
/// state.
#[derive(Debug, Clone)]
pub struct SendRequest {
	pub sender: ConnId,
	pub sender_name: String,
	pub body: String,
	pub dest: Destination,
}

/// Deliver a send request.
///
/// `room_members` is the membership snapshot for the request's room; it
/// is only consulted for room broadcasts. Direct messages go to the
/// target and are echoed to the sender so the sender's own transcript
/// shows the outgoing message. All delivery is fire-and-forget against
/// currently-open channels.
pub async fn route(hub: &ClientHub, room_members: &[ConnId], req: SendRequest) {
	match req.dest {
		Destination::Room => {
			metrics::counter!("parley_server_room_messages_total").increment(1);
			let env = chat_envelope(&req, false);
			hub.send_to_many(room_members, &env).await;
		}
		Destination::Conn(target) => {
			metrics::counter!("parley_server_direct_messages_total").increment(1);
			let env = chat_envelope(&req, true);

			if !hub.send_to(target, env.clone()).await {
				// Best-effort semantics: a vanished target is not an error.
				metrics::counter!("parley_server_unroutable_messages_total").increment(1);
				debug!(sender = %req.sender, target = %target, "direct message target not attached; dropped");
			}

			hub.send_to(req.sender, env).await;
		}
	}
}

fn chat_envelope(req: &SendRequest, dm: bool) -> Envelope {
	Envelope::new(Msg::Chat(wire::Chat {
		user_id: req.sender_name.clone(),
		msg: req.body.clone(),
		dm,
	}))
}

#![forbid(unsafe_code)]

use parley_client_core::{ClientConfigV1, Session};
use parley_protocol::wire::{self, envelope::Msg};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_client --name nick [--room room] [--connect quic://host:port]\n\
\n\
Options:\n\
\t--name      Nickname to claim at entry (required)\n\
\t--room      Room to join (default: FRONTEND)\n\
\t--connect   Server endpoint (default: quic://127.0.0.1:18400)\n\
\t            Format: quic://host:port\n\
\t--help      Show this help\n\
\n\
Input:\n\
\tplain text          broadcast to the joined room\n\
\t/dm <conn-id> text  direct message to one connection\n\
\t/quit               leave\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> (String, String, String) {
	let mut endpoint = "quic://127.0.0.1:18400".to_string();
	let mut name: Option<String> = None;
	let mut room = "FRONTEND".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				endpoint = v;
			}
			"--name" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--name must be non-empty");
					usage_and_exit();
				}
				name = Some(v);
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--room must be non-empty");
					usage_and_exit();
				}
				room = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(name) = name else {
		eprintln!("--name is required");
		usage_and_exit();
	};

	(endpoint, name, room)
}

fn print_event(msg: Msg) {
	match msg {
		Msg::Notice(n) => println!("* {}", n.msg),
		Msg::EntrySuccess(ack) => println!("* entered as {}", ack.user_id),
		Msg::Error(e) => println!("! {}: {}", e.code, e.msg),
		Msg::Chat(c) => {
			if c.dm {
				println!("[dm] {}: {}", c.user_id, c.msg);
			} else {
				println!("{}: {}", c.user_id, c.msg);
			}
		}
		Msg::UserList(list) => {
			let mut users: Vec<String> = list.users.iter().map(|(id, nick)| format!("{nick}#{id}")).collect();
			users.sort();
			println!("* online: {}", users.join(", "));
		}
		Msg::RoomRoster(roster) => {
			let bucket = wire::RosterBucket::try_from(roster.bucket)
				.map(|b| format!("{b:?}").to_lowercase())
				.unwrap_or_else(|_| "unknown".to_string());
			let mut users: Vec<String> = roster.users.iter().map(|(id, nick)| format!("{nick}#{id}")).collect();
			users.sort();
			println!("* {bucket} room: {}", users.join(", "));
		}
		Msg::Pong(_) => {}
		_ => {}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let (endpoint, name, room) = parse_args();

	let cfg = ClientConfigV1 {
		client_name: format!("parley-client-cli/{}", env!("CARGO_PKG_VERSION")),
		..ClientConfigV1::from_quic_endpoint(&endpoint)?
	};

	info!(endpoint = %endpoint, "connecting");
	let (mut session, mut events, welcome) = Session::connect(cfg).await?;
	println!("* connected to {} as connection {}", welcome.server_name, welcome.conn_id);

	session.enter(&name, &room).await?;

	let printer = tokio::spawn(async move {
		let _ = events.run_events_loop(print_event).await;
	});

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(line) = lines.next_line().await? {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		if line == "/quit" {
			break;
		}

		if let Some(rest) = line.strip_prefix("/dm ") {
			let Some((target, text)) = rest.split_once(' ') else {
				eprintln!("usage: /dm <conn-id> <message>");
				continue;
			};
			match target.trim().parse::<u64>() {
				Ok(conn_id) => session.send_direct_message(&name, &room, conn_id, text.trim()).await?,
				Err(_) => eprintln!("invalid conn id: {target}"),
			}
			continue;
		}

		session.send_room_message(&name, &room, line).await?;
	}

	session.close(0, "bye");
	printer.abort();
	let _ = printer.await;
	Ok(())
}

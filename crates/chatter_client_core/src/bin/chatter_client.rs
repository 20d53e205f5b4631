#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chatter_client_core::store::RoomStore as _;
use chatter_client_core::{
	Attachment, ChatSession, IdentityStore, MemoryStore, RoomView, join, load_client_config, load_client_config_from_path,
};
use chatter_domain::{Message, MessageKind, RoomTarget, UserId};
use chatter_util::data_url;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatter_client [--name NAME] [--room ROOM] [--config PATH]\n\
\n\
Options:\n\
	--name     Display name used when no identity is stored yet\n\
	--room     Room to open (default: math-class)\n\
	           Format: <group-id> | group:<group-id> | user:<user-id>\n\
	--config   Config file (default: ~/.chatter/config.toml)\n\
	--help     Show this help\n\
\n\
Input:\n\
	Each stdin line is sent as a message.\n\
	/attach <path>   send an image, video or audio file\n\
	/quit            leave\n\
\n\
Examples:\n\
	chatter_client --name Alice --room science-club\n\
	chatter_client --room user:user_1700000000000_k3j9x0a\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatter_client_core=debug".to_string());
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

struct Args {
	name: Option<String>,
	room: RoomTarget,
	config: Option<PathBuf>,
}

fn parse_room(v: &str) -> Option<RoomTarget> {
	let v = v.trim();
	if let Some(id) = v.strip_prefix("user:") {
		return UserId::new(id).ok().map(RoomTarget::Direct);
	}
	let id = v.strip_prefix("group:").unwrap_or(v);
	(!id.is_empty()).then(|| RoomTarget::Group(id.to_string()))
}

fn parse_args() -> Args {
	let mut name: Option<String> = None;
	let mut room = RoomTarget::Group("math-class".to_string());
	let mut config: Option<PathBuf> = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
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
				room = parse_room(&v).unwrap_or_else(|| {
					eprintln!("Invalid --room value: {v}");
					usage_and_exit()
				});
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	Args { name, room, config }
}

fn render(message: &Message) -> String {
	match message.kind {
		MessageKind::Text => message.body.clone(),
		kind => match data_url::decode(&message.body) {
			Ok(media) => format!("[{kind}: {}, {} bytes]", media.mime, media.bytes.len()),
			Err(_) => format!("[{kind}]"),
		},
	}
}

#[derive(Default)]
struct Printed {
	messages: usize,
	typing: Option<String>,
	partner_online: Option<bool>,
}

fn print_view(view: &RoomView, printed: &mut Printed) {
	if let Some(partner) = &view.partner {
		if printed.partner_online != Some(partner.online) {
			let status = if partner.online { "online" } else { "offline" };
			println!("  ({} is {status})", partner.name);
			printed.partner_online = Some(partner.online);
		}
	}

	for message in view.messages.iter().skip(printed.messages) {
		println!("{}: {}", message.sender_name, render(message));
	}
	printed.messages = view.messages.len();

	let typing = view.typing_text();
	if typing != printed.typing {
		if let Some(text) = &typing {
			println!("  ({text})");
		}
		printed.typing = typing;
	}
}

async fn print_room(mut rx: watch::Receiver<RoomView>) {
	let mut printed = Printed::default();

	let view = rx.borrow_and_update().clone();
	print_view(&view, &mut printed);

	while rx.changed().await.is_ok() {
		let view = rx.borrow_and_update().clone();
		print_view(&view, &mut printed);
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let cfg = match &args.config {
		Some(path) => load_client_config_from_path(path)?,
		None => load_client_config()?,
	};

	let store = Arc::new(MemoryStore::new());
	let identity = IdentityStore::new(cfg.identity_path.clone());

	let user = match identity.load().context("load identity")? {
		Some(user) => {
			info!(user = %user.user_id, name = %user.name, "resuming stored identity");
			store.put_user(&user, true).await?;
			user
		}
		None => {
			let Some(name) = args.name.as_deref() else {
				eprintln!("No stored identity; pass --name to join.");
				usage_and_exit();
			};
			join(store.as_ref(), &identity, name).await?
		}
	};

	let mut session = ChatSession::start(store.clone(), user, cfg).await?;

	let opened = session
		.open(&args.room)
		.await?
		.map(|open| (open.info.title.clone(), open.sync.watch()));
	let Some((title, view_rx)) = opened else {
		eprintln!("Room not found.");
		session.shutdown().await;
		return Ok(());
	};
	println!("== {title} ==");
	let printer = tokio::spawn(print_room(view_rx));

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		let line = tokio::select! {
			line = lines.next_line() => line.context("read stdin")?,
			_ = tokio::signal::ctrl_c() => None,
		};
		let Some(line) = line else { break };

		let Some(room) = session.room_mut() else { break };
		let line = line.trim();

		if line.is_empty() {
			continue;
		}
		if line == "/quit" {
			break;
		}

		if let Some(path) = line.strip_prefix("/attach ") {
			let sent = match Attachment::from_path(Path::new(path.trim()), room.composer.max_attachment_bytes()).await {
				Ok(attachment) => room.composer.send_attachment(attachment).await,
				Err(e) => Err(e),
			};
			if let Err(e) = sent {
				eprintln!("{e}");
			}
			continue;
		}

		room.composer.input_changed().await;
		if let Err(e) = room.composer.send_text(line).await {
			warn!(error = %e, "send failed");
			eprintln!("{e}");
		}
	}

	session.shutdown().await;
	printer.abort();
	Ok(())
}

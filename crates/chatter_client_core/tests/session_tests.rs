use std::sync::Arc;
use std::time::Duration;

use chatter_client_core::store::PresenceService as _;
use chatter_client_core::{ChatSession, ClientConfig, DisconnectAction, IdentityStore, MemoryStore, RoomView, join};
use chatter_domain::{MessageKind, RoomId, RoomTarget, User};
use tokio::sync::watch;

fn config(dir: &tempfile::TempDir) -> ClientConfig {
	ClientConfig {
		identity_path: dir.path().join("user.json"),
		..ClientConfig::default()
	}
}

async fn joined(store: &MemoryStore, dir: &tempfile::TempDir, name: &str) -> User {
	let ids = IdentityStore::new(dir.path().join(format!("{name}.json")));
	join(store, &ids, name).await.expect("join")
}

async fn wait_room(rx: &mut watch::Receiver<RoomView>, f: impl FnMut(&RoomView) -> bool) {
	tokio::time::timeout(Duration::from_secs(1), rx.wait_for(f))
		.await
		.expect("room update")
		.expect("room open");
}

#[tokio::test]
async fn two_users_chat_in_a_direct_room() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MemoryStore::new());
	let alice = joined(&store, &dir, "Alice").await;
	let bob = joined(&store, &dir, "Bob").await;

	let mut a = ChatSession::start(store.clone(), alice.clone(), config(&dir)).await.unwrap();
	let mut b = ChatSession::start(store.clone(), bob.clone(), config(&dir)).await.unwrap();

	let a_room = a.open(&RoomTarget::Direct(bob.user_id.clone())).await.unwrap().unwrap();
	assert_eq!(a_room.info.title, "Bob");
	let room = a_room.info.room.clone();
	a_room.composer.send_text("hi bob").await.unwrap();

	let b_room = b.open(&RoomTarget::Direct(alice.user_id.clone())).await.unwrap().unwrap();
	assert_eq!(b_room.info.room, room);

	let mut rx = b_room.sync.watch();
	wait_room(&mut rx, |v| v.messages.len() == 1).await;
	let view = rx.borrow().clone();
	assert_eq!(view.messages[0].body, "hi bob");
	assert_eq!(view.messages[0].sender_name, "Alice");
	assert_eq!(view.messages[0].kind, MessageKind::Text);

	b_room.composer.send_text("hey alice").await.unwrap();
	wait_room(&mut rx, |v| v.messages.len() == 2).await;
	let bodies: Vec<_> = rx.borrow().messages.iter().map(|m| m.body.clone()).collect();
	assert_eq!(bodies, vec!["hi bob", "hey alice"]);

	a.shutdown().await;
	b.shutdown().await;
}

#[tokio::test]
async fn typing_is_visible_to_the_other_side_and_cleared_by_send() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MemoryStore::new());
	let alice = joined(&store, &dir, "Alice").await;
	let bob = joined(&store, &dir, "Bob").await;

	let mut a = ChatSession::start(store.clone(), alice.clone(), config(&dir)).await.unwrap();
	let mut b = ChatSession::start(store.clone(), bob.clone(), config(&dir)).await.unwrap();

	let group = RoomTarget::Group("science-club".into());
	let mut b_rx = b.open(&group).await.unwrap().unwrap().sync.watch();

	let a_room = a.open(&group).await.unwrap().unwrap();
	a_room.composer.input_changed().await;
	wait_room(&mut b_rx, |v| v.typing_text().as_deref() == Some("Alice is typing...")).await;

	a_room.composer.send_text("done").await.unwrap();
	wait_room(&mut b_rx, |v| v.typing.is_empty() && v.messages.len() == 1).await;

	// The sender never sees itself typing.
	let own = a.room().unwrap().sync.view();
	assert!(own.typing.is_empty());

	a.shutdown().await;
	b.shutdown().await;
}

#[tokio::test]
async fn unread_flag_follows_the_open_room() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MemoryStore::new());
	let alice = joined(&store, &dir, "Alice").await;
	let bob = joined(&store, &dir, "Bob").await;

	let mut a = ChatSession::start(store.clone(), alice.clone(), config(&dir)).await.unwrap();
	let mut b = ChatSession::start(store.clone(), bob.clone(), config(&dir)).await.unwrap();
	a.open(&RoomTarget::Group("math-class".into())).await.unwrap();

	let direct = RoomId::direct(&alice.user_id, &bob.user_id);
	let mut roster_rx = a.roster().watch();
	tokio::time::timeout(Duration::from_secs(1), roster_rx.wait_for(|v| !v.users.is_empty()))
		.await
		.unwrap()
		.unwrap();

	let b_room = b.open(&RoomTarget::Direct(alice.user_id.clone())).await.unwrap().unwrap();
	b_room.composer.send_text("psst").await.unwrap();

	tokio::time::timeout(Duration::from_secs(1), roster_rx.wait_for(|v| v.is_unread(&direct)))
		.await
		.unwrap()
		.unwrap();

	a.open(&RoomTarget::Direct(bob.user_id.clone())).await.unwrap();
	assert!(!a.roster().is_unread(&direct));
	assert_eq!(a.roster().view().open, Some(direct));

	a.shutdown().await;
	b.shutdown().await;
}

#[tokio::test]
async fn presence_follows_session_lifetime() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MemoryStore::new());
	let alice = joined(&store, &dir, "Alice").await;

	store.mark_offline(&alice.user_id).await.unwrap();
	let session = ChatSession::start(store.clone(), alice.clone(), config(&dir)).await.unwrap();
	assert!(store.user(&alice.user_id).unwrap().online);
	assert_eq!(store.disconnect_rule(&alice.user_id), Some(DisconnectAction::MarkOffline));

	session.shutdown().await;
	let rec = store.user(&alice.user_id).unwrap();
	assert!(!rec.online);
	assert_eq!(store.disconnect_rule(&alice.user_id), None);
}

#[tokio::test]
async fn unknown_room_opens_nothing() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MemoryStore::new());
	let alice = joined(&store, &dir, "Alice").await;

	let mut session = ChatSession::start(store.clone(), alice, config(&dir)).await.unwrap();
	assert!(session.open(&RoomTarget::Group("chess-club".into())).await.unwrap().is_none());
	assert!(session.room().is_none());
	session.shutdown().await;
}

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chatter_domain::{Message, MessageId, NewMessage, RoomId, TypingEntry, TypingMap, User, UserId, UserRecord};
use chatter_util::time::unix_ms_now;
use tokio::sync::watch;
use tracing::debug;

use super::{DisconnectAction, PresenceService, RoomStore, Snapshots, StoreError};

/// In-process realtime store.
///
/// Mirrors the semantics the client relies on from the hosted database:
/// server-assigned message keys and timestamps, write-ordered message lists,
/// snapshot subscriptions, a name-ordered user registry and per-user
/// on-disconnect rules. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
	reachable: bool,
	rooms: HashMap<RoomId, RoomEntry>,
	users: BTreeMap<UserId, UserRecord>,
	roster_tx: watch::Sender<Vec<UserRecord>>,
	user_watchers: HashMap<UserId, watch::Sender<Option<UserRecord>>>,
	disconnect_rules: HashMap<UserId, DisconnectAction>,
}

impl Default for Inner {
	fn default() -> Self {
		Self {
			reachable: true,
			rooms: HashMap::new(),
			users: BTreeMap::new(),
			roster_tx: watch::channel(Vec::new()).0,
			user_watchers: HashMap::new(),
			disconnect_rules: HashMap::new(),
		}
	}
}

#[derive(Debug)]
struct RoomEntry {
	messages: watch::Sender<Vec<Message>>,
	typing: watch::Sender<TypingMap>,
}

impl Default for RoomEntry {
	fn default() -> Self {
		Self {
			messages: watch::channel(Vec::new()).0,
			typing: watch::channel(TypingMap::new()).0,
		}
	}
}

impl Inner {
	fn ensure_reachable(&self) -> Result<(), StoreError> {
		if self.reachable {
			Ok(())
		} else {
			Err(StoreError::Unavailable("memory store is offline".to_string()))
		}
	}

	fn room(&mut self, room: &RoomId) -> &mut RoomEntry {
		self.rooms.entry(room.clone()).or_default()
	}

	fn user_watcher(&mut self, user: &UserId) -> &watch::Sender<Option<UserRecord>> {
		let current = self.users.get(user).cloned();
		self.user_watchers
			.entry(user.clone())
			.or_insert_with(|| watch::channel(current).0)
	}

	/// Write (or delete) a user record and notify roster and user subscribers.
	fn write_user(&mut self, user: &UserId, record: Option<UserRecord>) {
		match &record {
			Some(r) => {
				self.users.insert(user.clone(), r.clone());
			}
			None => {
				self.users.remove(user);
			}
		}

		let mut roster: Vec<UserRecord> = self.users.values().cloned().collect();
		roster.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));
		self.roster_tx.send_replace(roster);

		if let Some(tx) = self.user_watchers.get(user) {
			tx.send_replace(record);
		}
	}

	fn set_offline(&mut self, user: &UserId) {
		if let Some(mut record) = self.users.get(user).cloned() {
			record.online = false;
			record.last_active = Some(unix_ms_now());
			self.write_user(user, Some(record));
		}
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Toggle reachability; while unreachable every operation fails.
	pub fn set_reachable(&self, reachable: bool) {
		self.lock().reachable = reachable;
	}

	/// Simulate `user`'s connection dropping: run and consume its disconnect rule.
	pub fn disconnect(&self, user: &UserId) {
		let mut inner = self.lock();
		let Some(action) = inner.disconnect_rules.remove(user) else {
			debug!(user = %user, "memory store: disconnect without rule");
			return;
		};

		debug!(user = %user, action = %action, "memory store: running disconnect rule");
		match action {
			DisconnectAction::MarkOffline => inner.set_offline(user),
			DisconnectAction::Remove => inner.write_user(user, None),
		}
	}

	/// Registered disconnect rule for `user`, if any.
	pub fn disconnect_rule(&self, user: &UserId) -> Option<DisconnectAction> {
		self.lock().disconnect_rules.get(user).copied()
	}

	/// Current message list of a room.
	pub fn messages(&self, room: &RoomId) -> Vec<Message> {
		self.lock()
			.rooms
			.get(room)
			.map(|r| r.messages.borrow().clone())
			.unwrap_or_default()
	}

	/// Current typing map of a room.
	pub fn typing(&self, room: &RoomId) -> TypingMap {
		self.lock()
			.rooms
			.get(room)
			.map(|r| r.typing.borrow().clone())
			.unwrap_or_default()
	}

	/// Current record of a user.
	pub fn user(&self, user: &UserId) -> Option<UserRecord> {
		self.lock().users.get(user).cloned()
	}
}

#[async_trait]
impl RoomStore for MemoryStore {
	async fn subscribe_messages(&self, room: &RoomId) -> Result<Snapshots<Vec<Message>>, StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		Ok(Snapshots::new(inner.room(room).messages.subscribe()))
	}

	async fn append_message(&self, room: &RoomId, message: NewMessage) -> Result<Message, StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;

		let stored = Message {
			id: MessageId::new_v4(),
			sender_id: message.sender_id,
			sender_name: message.sender_name,
			timestamp: Some(unix_ms_now()),
			kind: message.kind,
			body: message.body,
		};

		let entry = inner.room(room);
		entry.messages.send_modify(|list| list.push(stored.clone()));

		debug!(room = %room, id = %stored.id, kind = %stored.kind, "memory store: appended message");
		Ok(stored)
	}

	async fn subscribe_typing(&self, room: &RoomId) -> Result<Snapshots<TypingMap>, StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		Ok(Snapshots::new(inner.room(room).typing.subscribe()))
	}

	async fn set_typing(&self, room: &RoomId, user: &User) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;

		let entry = TypingEntry { name: user.name.clone() };
		inner.room(room).typing.send_if_modified(|map| {
			if map.get(&user.user_id) == Some(&entry) {
				return false;
			}
			map.insert(user.user_id.clone(), entry);
			true
		});
		Ok(())
	}

	async fn clear_typing(&self, room: &RoomId, user: &UserId) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		inner.room(room).typing.send_if_modified(|map| map.remove(user).is_some());
		Ok(())
	}

	async fn subscribe_roster(&self) -> Result<Snapshots<Vec<UserRecord>>, StoreError> {
		let inner = self.lock();
		inner.ensure_reachable()?;
		Ok(Snapshots::new(inner.roster_tx.subscribe()))
	}

	async fn subscribe_user(&self, user: &UserId) -> Result<Snapshots<Option<UserRecord>>, StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		Ok(Snapshots::new(inner.user_watcher(user).subscribe()))
	}

	async fn put_user(&self, user: &User, online: bool) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;

		let last_active = inner.users.get(&user.user_id).and_then(|r| r.last_active);
		let record = UserRecord {
			user_id: user.user_id.clone(),
			name: user.name.clone(),
			online,
			last_active,
		};
		inner.write_user(&user.user_id, Some(record));
		Ok(())
	}
}

#[async_trait]
impl PresenceService for MemoryStore {
	async fn mark_online(&self, user: &User) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;

		let record = UserRecord {
			user_id: user.user_id.clone(),
			name: user.name.clone(),
			online: true,
			last_active: Some(unix_ms_now()),
		};
		inner.write_user(&user.user_id, Some(record));
		Ok(())
	}

	async fn mark_offline(&self, user: &UserId) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		inner.set_offline(user);
		Ok(())
	}

	async fn remove_user(&self, user: &UserId) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		inner.write_user(user, None);
		Ok(())
	}

	async fn on_disconnect(&self, user: &UserId, action: DisconnectAction) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		inner.disconnect_rules.insert(user.clone(), action);
		Ok(())
	}

	async fn cancel_on_disconnect(&self, user: &UserId) -> Result<(), StoreError> {
		let mut inner = self.lock();
		inner.ensure_reachable()?;
		inner.disconnect_rules.remove(user);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use chatter_domain::MessageKind;

	use super::*;

	fn user(id: &str, name: &str) -> User {
		User::new(name, UserId::new(id).expect("valid UserId"))
	}

	fn room(id: &str) -> RoomId {
		RoomId::new(id).expect("valid RoomId")
	}

	#[tokio::test]
	async fn messages_keep_write_order_and_get_server_fields() {
		let store = MemoryStore::new();
		let alice = user("a", "Alice");
		let r = room("math-class");

		let mut sub = store.subscribe_messages(&r).await.unwrap();
		assert!(sub.current().is_empty());

		for text in ["one", "two", "three"] {
			store
				.append_message(&r, NewMessage::new(&alice, MessageKind::Text, text))
				.await
				.unwrap();
		}

		let list = sub.next().await.unwrap();
		let bodies: Vec<_> = list.iter().map(|m| m.body.as_str()).collect();
		assert_eq!(bodies, vec!["one", "two", "three"]);
		assert!(list.iter().all(|m| m.timestamp.is_some()));
		assert_ne!(list[0].id, list[1].id);
	}

	#[tokio::test]
	async fn roster_is_ordered_by_name() {
		let store = MemoryStore::new();
		store.put_user(&user("z", "Zoe"), true).await.unwrap();
		store.put_user(&user("b", "Adam"), true).await.unwrap();
		store.put_user(&user("m", "Mia"), false).await.unwrap();

		let names: Vec<_> = store
			.subscribe_roster()
			.await
			.unwrap()
			.current()
			.into_iter()
			.map(|r| r.name)
			.collect();
		assert_eq!(names, vec!["Adam", "Mia", "Zoe"]);
	}

	#[tokio::test]
	async fn typing_set_and_clear() {
		let store = MemoryStore::new();
		let alice = user("a", "Alice");
		let r = room("science-club");

		store.set_typing(&r, &alice).await.unwrap();
		assert_eq!(
			store.typing(&r).get(&alice.user_id),
			Some(&TypingEntry { name: "Alice".into() })
		);

		store.clear_typing(&r, &alice.user_id).await.unwrap();
		store.clear_typing(&r, &alice.user_id).await.unwrap();
		assert!(store.typing(&r).is_empty());
	}

	#[tokio::test]
	async fn disconnect_runs_registered_rule_once() {
		let store = MemoryStore::new();
		let alice = user("a", "Alice");

		store.mark_online(&alice).await.unwrap();
		store
			.on_disconnect(&alice.user_id, DisconnectAction::MarkOffline)
			.await
			.unwrap();

		store.disconnect(&alice.user_id);
		let rec = store.user(&alice.user_id).unwrap();
		assert!(!rec.online);
		assert!(rec.last_active.is_some());
		assert_eq!(store.disconnect_rule(&alice.user_id), None);

		store.mark_online(&alice).await.unwrap();
		store.on_disconnect(&alice.user_id, DisconnectAction::Remove).await.unwrap();
		store.disconnect(&alice.user_id);
		assert!(store.user(&alice.user_id).is_none());
	}

	#[tokio::test]
	async fn user_subscription_sees_late_creation() {
		let store = MemoryStore::new();
		let bob = user("b", "Bob");

		let mut sub = store.subscribe_user(&bob.user_id).await.unwrap();
		assert_eq!(sub.current(), None);

		store.put_user(&bob, true).await.unwrap();
		let rec = sub.next().await.unwrap().unwrap();
		assert_eq!(rec.name, "Bob");
	}

	#[tokio::test]
	async fn unreachable_store_rejects_everything() {
		let store = MemoryStore::new();
		let alice = user("a", "Alice");
		store.set_reachable(false);

		assert!(matches!(
			store.append_message(&room("x"), NewMessage::new(&alice, MessageKind::Text, "hi")).await,
			Err(StoreError::Unavailable(_))
		));
		assert!(store.mark_online(&alice).await.is_err());
		assert!(store.subscribe_roster().await.is_err());

		store.set_reachable(true);
		assert!(store.mark_online(&alice).await.is_ok());
	}
}

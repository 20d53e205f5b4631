#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chatter_domain::{GROUPS, GroupDef, Message, MessageId, RoomId, UserId, UserRecord};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{RoomStore, Snapshots, StoreError};

/// Session-scoped unread bookkeeping.
///
/// A room is flagged when a last message not seen before arrives from
/// someone else while the room is not open. Opening the room clears it.
#[derive(Debug, Clone)]
pub struct UnreadTracker {
	me: UserId,
	open: Option<RoomId>,
	last_seen: HashMap<RoomId, MessageId>,
	unread: BTreeSet<RoomId>,
}

impl UnreadTracker {
	pub fn new(me: UserId) -> Self {
		Self {
			me,
			open: None,
			last_seen: HashMap::new(),
			unread: BTreeSet::new(),
		}
	}

	/// Feed the latest message of `room`. Returns true if the unread set changed.
	pub fn observe(&mut self, room: &RoomId, last: Option<&Message>) -> bool {
		let Some(last) = last else {
			return false;
		};
		if self.last_seen.get(room) == Some(&last.id) {
			return false;
		}
		self.last_seen.insert(room.clone(), last.id.clone());

		if self.open.as_ref() == Some(room) || last.is_from(&self.me) {
			return false;
		}
		self.unread.insert(room.clone())
	}

	/// Mark `room` as the open one and clear its flag.
	pub fn open_room(&mut self, room: RoomId) -> bool {
		let cleared = self.unread.remove(&room);
		let moved = self.open.as_ref() != Some(&room);
		self.open = Some(room);
		cleared || moved
	}

	pub fn close_room(&mut self) -> bool {
		self.open.take().is_some()
	}

	pub fn is_unread(&self, room: &RoomId) -> bool {
		self.unread.contains(room)
	}

	pub fn unread(&self) -> &BTreeSet<RoomId> {
		&self.unread
	}

	pub fn open(&self) -> Option<&RoomId> {
		self.open.as_ref()
	}
}

/// Sidebar contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterView {
	/// Everyone but the local user, ordered by name.
	pub users: Vec<UserRecord>,
	pub groups: &'static [GroupDef],
	pub unread: BTreeSet<RoomId>,
	pub open: Option<RoomId>,
}

impl RosterView {
	fn empty() -> Self {
		Self {
			users: Vec::new(),
			groups: GROUPS,
			unread: BTreeSet::new(),
			open: None,
		}
	}

	pub fn is_unread(&self, room: &RoomId) -> bool {
		self.unread.contains(room)
	}
}

struct Shared {
	tracker: Mutex<UnreadTracker>,
	view: watch::Sender<RosterView>,
}

impl Shared {
	fn lock(&self) -> MutexGuard<'_, UnreadTracker> {
		self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn observe(&self, room: &RoomId, last: Option<&Message>) {
		let mut tracker = self.lock();
		if tracker.observe(room, last) {
			debug!(room = %room, "roster: room unread");
			self.publish(&tracker);
		}
	}

	fn update(&self, f: impl FnOnce(&mut UnreadTracker) -> bool) {
		let mut tracker = self.lock();
		if f(&mut tracker) {
			self.publish(&tracker);
		}
	}

	fn publish(&self, tracker: &UnreadTracker) {
		self.view.send_if_modified(|view| {
			if &view.unread == tracker.unread() && view.open.as_ref() == tracker.open() {
				return false;
			}
			view.unread = tracker.unread().clone();
			view.open = tracker.open().cloned();
			true
		});
	}

	fn set_users(&self, users: Vec<UserRecord>) {
		self.view.send_if_modified(|view| {
			if view.users == users {
				return false;
			}
			view.users = users;
			true
		});
	}
}

/// Per-room message watchers feeding the unread tracker.
#[derive(Default)]
struct RoomWatchers {
	tasks: HashMap<RoomId, JoinHandle<()>>,
}

impl RoomWatchers {
	fn sync(&mut self, store: &Arc<dyn RoomStore>, shared: &Arc<Shared>, wanted: HashSet<RoomId>) {
		self.tasks.retain(|room, task| {
			let keep = wanted.contains(room);
			if !keep {
				task.abort();
				debug!(room = %room, "roster: stopped watching room");
			}
			keep
		});

		for room in wanted {
			if self.tasks.contains_key(&room) {
				continue;
			}
			let task = tokio::spawn(watch_room(store.clone(), room.clone(), shared.clone()));
			self.tasks.insert(room, task);
		}
	}
}

impl Drop for RoomWatchers {
	fn drop(&mut self) {
		for task in self.tasks.values() {
			task.abort();
		}
	}
}

async fn watch_room(store: Arc<dyn RoomStore>, room: RoomId, shared: Arc<Shared>) {
	let mut sub = match store.subscribe_messages(&room).await {
		Ok(sub) => sub,
		Err(e) => {
			warn!(room = %room, error = %e, "roster: failed to watch room");
			return;
		}
	};

	let mut list = sub.current();
	loop {
		shared.observe(&room, list.last());
		match sub.next().await {
			Some(next) => list = next,
			None => break,
		}
	}
}

async fn run_roster(store: Arc<dyn RoomStore>, me: UserId, mut roster: Snapshots<Vec<UserRecord>>, shared: Arc<Shared>) {
	let mut watchers = RoomWatchers::default();
	let mut records = roster.current();

	loop {
		let others: Vec<UserRecord> = records.into_iter().filter(|r| r.user_id != me).collect();

		let wanted: HashSet<RoomId> = GROUPS
			.iter()
			.map(RoomId::group)
			.chain(others.iter().map(|r| RoomId::direct(&me, &r.user_id)))
			.collect();
		watchers.sync(&store, &shared, wanted);
		shared.set_users(others);

		match roster.next().await {
			Some(next) => records = next,
			None => break,
		}
	}
	debug!("roster: source closed");
}

/// Live roster with unread flags for every group and direct room.
pub struct RosterSync {
	me: UserId,
	shared: Arc<Shared>,
	rx: watch::Receiver<RosterView>,
	pump: JoinHandle<()>,
}

impl RosterSync {
	pub async fn start(store: Arc<dyn RoomStore>, me: UserId) -> Result<Self, StoreError> {
		let mut roster = store.subscribe_roster().await?;

		let mut initial = RosterView::empty();
		initial.users = roster.current().into_iter().filter(|r| r.user_id != me).collect();
		let (tx, rx) = watch::channel(initial);

		let shared = Arc::new(Shared {
			tracker: Mutex::new(UnreadTracker::new(me.clone())),
			view: tx,
		});

		let pump = tokio::spawn(run_roster(store, me.clone(), roster, shared.clone()));
		Ok(Self { me, shared, rx, pump })
	}

	/// Direct room between the local user and `other`.
	pub fn room_with(&self, other: &UserId) -> RoomId {
		RoomId::direct(&self.me, other)
	}

	pub fn open_room(&self, room: &RoomId) {
		self.shared.update(|t| t.open_room(room.clone()));
	}

	pub fn close_room(&self) {
		self.shared.update(UnreadTracker::close_room);
	}

	pub fn is_unread(&self, room: &RoomId) -> bool {
		self.shared.lock().is_unread(room)
	}

	pub fn view(&self) -> RosterView {
		self.rx.borrow().clone()
	}

	pub fn watch(&self) -> watch::Receiver<RosterView> {
		self.rx.clone()
	}
}

impl Drop for RosterSync {
	fn drop(&mut self) {
		self.pump.abort();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use chatter_domain::{MessageKind, NewMessage, User};
	use proptest::prelude::*;

	use super::*;
	use crate::store::MemoryStore;

	fn uid(s: &str) -> UserId {
		UserId::new(s).unwrap()
	}

	fn msg(id: &str, from: &str) -> Message {
		Message {
			id: MessageId::new(id).unwrap(),
			sender_id: uid(from),
			sender_name: from.to_uppercase(),
			timestamp: Some(1),
			kind: MessageKind::Text,
			body: "hi".into(),
		}
	}

	#[test]
	fn message_from_other_in_closed_room_is_unread_until_opened() {
		let room = RoomId::new("math-class").unwrap();
		let mut t = UnreadTracker::new(uid("me"));

		assert!(t.observe(&room, Some(&msg("m1", "bob"))));
		assert!(t.is_unread(&room));

		assert!(t.open_room(room.clone()));
		assert!(!t.is_unread(&room));
	}

	#[test]
	fn own_messages_and_open_room_are_not_flagged() {
		let room = RoomId::new("math-class").unwrap();
		let other = RoomId::new("science-club").unwrap();
		let mut t = UnreadTracker::new(uid("me"));

		assert!(!t.observe(&room, Some(&msg("m1", "me"))));
		assert!(!t.observe(&room, None));

		t.open_room(other.clone());
		assert!(!t.observe(&other, Some(&msg("m2", "bob"))));
		assert!(t.unread().is_empty());
	}

	#[test]
	fn redelivered_snapshot_does_not_reflag() {
		let room = RoomId::new("history-class").unwrap();
		let mut t = UnreadTracker::new(uid("me"));

		t.observe(&room, Some(&msg("m1", "bob")));
		t.open_room(room.clone());
		t.close_room();

		assert!(!t.observe(&room, Some(&msg("m1", "bob"))));
		assert!(!t.is_unread(&room));

		assert!(t.observe(&room, Some(&msg("m2", "bob"))));
		assert!(t.is_unread(&room));
	}

	proptest! {
		#[test]
		fn open_room_and_own_messages_never_raise_flags(
			events in proptest::collection::vec((0..3usize, any::<bool>(), 0..64u32), 0..48),
		) {
			let rooms = ["math-class", "history-class", "science-club"].map(|r| RoomId::new(r).unwrap());
			let mut t = UnreadTracker::new(uid("me"));
			t.open_room(rooms[0].clone());

			for (idx, mine, n) in events {
				let room = &rooms[idx];
				let before = t.is_unread(room);
				let from = if mine { "me" } else { "bob" };
				t.observe(room, Some(&msg(&format!("m{n}"), from)));

				prop_assert!(!t.is_unread(&rooms[0]));
				if mine {
					prop_assert_eq!(t.is_unread(room), before);
				}
			}
		}
	}

	async fn wait_for(rx: &mut watch::Receiver<RosterView>, f: impl FnMut(&RosterView) -> bool) {
		tokio::time::timeout(Duration::from_secs(1), rx.wait_for(f))
			.await
			.expect("roster update")
			.expect("roster alive");
	}

	#[tokio::test]
	async fn roster_excludes_self_and_orders_by_name() {
		let store = MemoryStore::new();
		let me = User::new("Mallory", uid("me"));
		store.put_user(&me, true).await.unwrap();
		store.put_user(&User::new("Zoe", uid("z")), true).await.unwrap();

		let roster = RosterSync::start(Arc::new(store.clone()), me.user_id.clone()).await.unwrap();
		store.put_user(&User::new("Adam", uid("x")), false).await.unwrap();

		let mut rx = roster.watch();
		wait_for(&mut rx, |v| v.users.len() == 2).await;

		let view = roster.view();
		let names: Vec<_> = view.users.iter().map(|u| u.name.as_str()).collect();
		assert_eq!(names, vec!["Adam", "Zoe"]);
		assert_eq!(view.groups.len(), GROUPS.len());
	}

	#[tokio::test]
	async fn direct_message_flags_room_until_opened() {
		let store = MemoryStore::new();
		let me = User::new("Alice", uid("alice"));
		let bob = User::new("Bob", uid("bob"));
		store.put_user(&me, true).await.unwrap();

		let roster = RosterSync::start(Arc::new(store.clone()), me.user_id.clone()).await.unwrap();
		let mut rx = roster.watch();

		store.put_user(&bob, true).await.unwrap();
		wait_for(&mut rx, |v| !v.users.is_empty()).await;

		let room = roster.room_with(&bob.user_id);
		store
			.append_message(&room, NewMessage::new(&bob, MessageKind::Text, "hey"))
			.await
			.unwrap();
		wait_for(&mut rx, |v| v.is_unread(&room)).await;

		roster.open_room(&room);
		assert!(!roster.view().is_unread(&room));
		assert_eq!(roster.view().open.as_ref(), Some(&room));

		store
			.append_message(&room, NewMessage::new(&bob, MessageKind::Text, "still here"))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!roster.is_unread(&room));
	}

	#[tokio::test]
	async fn own_group_message_is_not_unread() {
		let store = MemoryStore::new();
		let me = User::new("Alice", uid("alice"));
		let carol = User::new("Carol", uid("carol"));
		let group = RoomId::new("literature-corner").unwrap();

		let roster = RosterSync::start(Arc::new(store.clone()), me.user_id.clone()).await.unwrap();
		let mut rx = roster.watch();

		store
			.append_message(&group, NewMessage::new(&me, MessageKind::Text, "mine"))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!roster.is_unread(&group));

		store
			.append_message(&group, NewMessage::new(&carol, MessageKind::Text, "theirs"))
			.await
			.unwrap();
		wait_for(&mut rx, |v| v.is_unread(&group)).await;
	}
}

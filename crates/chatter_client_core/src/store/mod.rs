#![forbid(unsafe_code)]

//! Capabilities the client needs from the backing realtime store.
//!
//! The store owns ordering, timestamps and fan-out. The client only reads
//! live snapshots and issues point writes; every component is written against
//! these traits so it can run over [`MemoryStore`] in tests and demos.

use core::fmt;
use core::str::FromStr;

use async_trait::async_trait;
use chatter_domain::{Message, NewMessage, RoomId, TypingMap, User, UserId, UserRecord};
use tokio::sync::watch;

mod memory;

pub use memory::MemoryStore;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
	/// The store could not be reached.
	#[error("store unavailable: {0}")]
	Unavailable(String),

	/// The write was refused by the store.
	#[error("write rejected: {0}")]
	Rejected(String),
}

/// Live subscription to a data path.
///
/// Every delivered value is a full snapshot that replaces what the consumer
/// held before; there are no deltas.
#[derive(Debug)]
pub struct Snapshots<T> {
	rx: watch::Receiver<T>,
}

impl<T: Clone> Snapshots<T> {
	pub fn new(rx: watch::Receiver<T>) -> Self {
		Self { rx }
	}

	/// Current snapshot; marks it as seen.
	pub fn current(&mut self) -> T {
		self.rx.borrow_and_update().clone()
	}

	/// Wait for the next snapshot. `None` once the source is gone.
	pub async fn next(&mut self) -> Option<T> {
		self.rx.changed().await.ok()?;
		Some(self.rx.borrow_and_update().clone())
	}
}

/// Store-side rule applied when a client's connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisconnectAction {
	/// Keep the record and flip it to `online: false`.
	#[default]
	MarkOffline,
	/// Delete the user record.
	Remove,
}

impl DisconnectAction {
	pub const fn as_str(self) -> &'static str {
		match self {
			DisconnectAction::MarkOffline => "offline",
			DisconnectAction::Remove => "remove",
		}
	}
}

impl fmt::Display for DisconnectAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for DisconnectAction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"offline" | "mark_offline" => Ok(DisconnectAction::MarkOffline),
			"remove" | "delete" => Ok(DisconnectAction::Remove),
			other => Err(format!("unknown disconnect action: {other} (expected offline|remove)")),
		}
	}
}

/// Rooms, typing flags and the user registry.
#[async_trait]
pub trait RoomStore: Send + Sync + 'static {
	/// Live message list of a room, in store write order.
	async fn subscribe_messages(&self, room: &RoomId) -> Result<Snapshots<Vec<Message>>, StoreError>;

	/// Append a message; the store assigns its key and timestamp.
	async fn append_message(&self, room: &RoomId, message: NewMessage) -> Result<Message, StoreError>;

	/// Live typing map of a room.
	async fn subscribe_typing(&self, room: &RoomId) -> Result<Snapshots<TypingMap>, StoreError>;

	/// Set `user`'s typing flag, stamped with their display name.
	async fn set_typing(&self, room: &RoomId, user: &User) -> Result<(), StoreError>;

	/// Remove `user`'s typing flag. Removing an absent flag is not an error.
	async fn clear_typing(&self, room: &RoomId, user: &UserId) -> Result<(), StoreError>;

	/// Live user registry ordered by name.
	async fn subscribe_roster(&self) -> Result<Snapshots<Vec<UserRecord>>, StoreError>;

	/// Live record of a single user (`None` when absent).
	async fn subscribe_user(&self, user: &UserId) -> Result<Snapshots<Option<UserRecord>>, StoreError>;

	/// Create or overwrite a user record.
	async fn put_user(&self, user: &User, online: bool) -> Result<(), StoreError>;
}

/// Presence intents. Other users' presence is only observed through the roster.
#[async_trait]
pub trait PresenceService: Send + Sync + 'static {
	/// Publish `{name, online: true, last_active: now}`.
	async fn mark_online(&self, user: &User) -> Result<(), StoreError>;

	/// Flip the record to `{online: false, last_active: now}`.
	async fn mark_offline(&self, user: &UserId) -> Result<(), StoreError>;

	/// Delete the user record.
	async fn remove_user(&self, user: &UserId) -> Result<(), StoreError>;

	/// Register the rule the store runs if this client disconnects.
	async fn on_disconnect(&self, user: &UserId, action: DisconnectAction) -> Result<(), StoreError>;

	/// Drop a previously registered disconnect rule.
	async fn cancel_on_disconnect(&self, user: &UserId) -> Result<(), StoreError>;
}

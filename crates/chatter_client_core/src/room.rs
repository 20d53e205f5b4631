#![forbid(unsafe_code)]

use std::sync::Arc;

use chatter_domain::{Message, RoomId, RoomTarget, TypingMap, UserId, UserRecord, find_group, typing_names, typing_text};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::{RoomStore, Snapshots, StoreError};

/// What an open room shows: messages in store order plus who else is typing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomView {
	pub messages: Vec<Message>,
	/// Display names of other users typing, ordered by user id.
	pub typing: Vec<String>,
	/// Live record of the other participant of a direct room. Always `None`
	/// for groups, and `None` once the partner's record is removed.
	pub partner: Option<UserRecord>,
}

impl RoomView {
	pub fn typing_text(&self) -> Option<String> {
		typing_text(&self.typing)
	}
}

/// Live mirror of one room.
///
/// Owns the message, typing and (for direct rooms) partner subscriptions
/// through a single pump task.
/// Closing (or dropping) aborts the pump; the view channel then closes and
/// nothing further is delivered.
pub struct RoomSync {
	room: RoomId,
	rx: watch::Receiver<RoomView>,
	pump: JoinHandle<()>,
}

impl RoomSync {
	pub async fn open(store: Arc<dyn RoomStore>, room: RoomId, me: UserId) -> Result<Self, StoreError> {
		let mut messages = store.subscribe_messages(&room).await?;
		let mut typing = store.subscribe_typing(&room).await?;
		let mut partner = match direct_partner(&room, &me) {
			Some(other) => Some(store.subscribe_user(&other).await?),
			None => None,
		};

		let initial = RoomView {
			messages: messages.current(),
			typing: typing_names(&typing.current(), &me),
			partner: partner.as_mut().and_then(Snapshots::current),
		};
		let (tx, rx) = watch::channel(initial);

		let feeds = Feeds {
			messages,
			typing,
			partner,
		};
		let pump = tokio::spawn(run_pump(room.clone(), me, feeds, tx));
		info!(room = %room, "room: opened");

		Ok(Self { room, rx, pump })
	}

	pub fn room(&self) -> &RoomId {
		&self.room
	}

	/// Latest view.
	pub fn view(&self) -> RoomView {
		self.rx.borrow().clone()
	}

	/// Independent receiver of view updates.
	pub fn watch(&self) -> watch::Receiver<RoomView> {
		self.rx.clone()
	}

	/// Wait for the next view. `None` after the pump has stopped.
	pub async fn changed(&mut self) -> Option<RoomView> {
		self.rx.changed().await.ok()?;
		Some(self.rx.borrow_and_update().clone())
	}

	/// Tear down both subscriptions.
	pub fn close(self) {
		drop(self);
	}
}

impl Drop for RoomSync {
	fn drop(&mut self) {
		self.pump.abort();
		debug!(room = %self.room, "room: closed");
	}
}

fn direct_partner(room: &RoomId, me: &UserId) -> Option<UserId> {
	let (a, b) = room.direct_participants()?;
	Some(if &a == me { b } else { a })
}

struct Feeds {
	messages: Snapshots<Vec<Message>>,
	typing: Snapshots<TypingMap>,
	partner: Option<Snapshots<Option<UserRecord>>>,
}

async fn next_partner(partner: &mut Option<Snapshots<Option<UserRecord>>>) -> Option<Option<UserRecord>> {
	match partner {
		Some(sub) => sub.next().await,
		None => std::future::pending().await,
	}
}

async fn run_pump(room: RoomId, me: UserId, feeds: Feeds, tx: watch::Sender<RoomView>) {
	let Feeds {
		mut messages,
		mut typing,
		mut partner,
	} = feeds;

	loop {
		tokio::select! {
			list = messages.next() => {
				let Some(list) = list else { break };
				tx.send_modify(|view| view.messages = list);
			}
			map = typing.next() => {
				let Some(map) = map else { break };
				let names = typing_names(&map, &me);
				tx.send_if_modified(|view| {
					if view.typing == names {
						return false;
					}
					view.typing = names;
					true
				});
			}
			record = next_partner(&mut partner) => {
				let Some(record) = record else {
					// Presence feed gone; messages and typing keep flowing.
					partner = None;
					continue;
				};
				tx.send_if_modified(|view| {
					if view.partner == record {
						return false;
					}
					view.partner = record;
					true
				});
			}
		}
	}
	debug!(room = %room, "room: source closed");
}

/// A navigation target resolved to a concrete room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoom {
	pub room: RoomId,
	pub title: String,
	pub is_group: bool,
	/// The other participant as of resolution, for direct rooms.
	/// [`RoomView::partner`] follows later changes.
	pub partner: Option<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Found(ResolvedRoom),
	NotFound,
}

/// Map a target to its room id and title. Unknown groups and users that are
/// not in the registry resolve to `NotFound`.
pub async fn resolve_room(store: &dyn RoomStore, me: &UserId, target: &RoomTarget) -> Result<Resolution, StoreError> {
	match target {
		RoomTarget::Group(id) => Ok(match find_group(id) {
			Some(group) => Resolution::Found(ResolvedRoom {
				room: RoomId::group(group),
				title: group.name.to_string(),
				is_group: true,
				partner: None,
			}),
			None => {
				debug!(group = %id, "room: unknown group");
				Resolution::NotFound
			}
		}),
		RoomTarget::Direct(other) => {
			let Some(record) = store.subscribe_user(other).await?.current() else {
				debug!(user = %other, "room: unknown user");
				return Ok(Resolution::NotFound);
			};
			Ok(Resolution::Found(ResolvedRoom {
				room: RoomId::direct(me, other),
				title: record.name.clone(),
				is_group: false,
				partner: Some(record),
			}))
		}
	}
}

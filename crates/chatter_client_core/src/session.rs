#![forbid(unsafe_code)]

use std::sync::Arc;

use chatter_domain::{RoomTarget, User};
use tracing::info;

use crate::composer::Composer;
use crate::config::ClientConfig;
use crate::presence::PresenceReporter;
use crate::room::{Resolution, ResolvedRoom, RoomSync, resolve_room};
use crate::roster::RosterSync;
use crate::store::{PresenceService, RoomStore, StoreError};
use crate::typing::TypingDebouncer;

/// The room currently on screen.
pub struct OpenRoom {
	pub info: ResolvedRoom,
	pub sync: RoomSync,
	pub composer: Composer,
}

/// A joined user's live session: presence, roster and at most one open room.
pub struct ChatSession {
	store: Arc<dyn RoomStore>,
	user: User,
	config: ClientConfig,
	presence: PresenceReporter,
	roster: RosterSync,
	open: Option<OpenRoom>,
}

impl ChatSession {
	pub async fn start<S>(store: Arc<S>, user: User, config: ClientConfig) -> Result<Self, StoreError>
	where
		S: RoomStore + PresenceService,
	{
		let presence = PresenceReporter::mount(store.clone(), user.clone(), config.on_disconnect).await;

		let store: Arc<dyn RoomStore> = store;
		let roster = RosterSync::start(store.clone(), user.user_id.clone()).await?;

		info!(user = %user.user_id, name = %user.name, "session: started");
		Ok(Self {
			store,
			user,
			config,
			presence,
			roster,
			open: None,
		})
	}

	pub fn user(&self) -> &User {
		&self.user
	}

	pub fn roster(&self) -> &RosterSync {
		&self.roster
	}

	pub fn room(&self) -> Option<&OpenRoom> {
		self.open.as_ref()
	}

	pub fn room_mut(&mut self) -> Option<&mut OpenRoom> {
		self.open.as_mut()
	}

	/// Switch to `target`. The previous room is torn down first; an unknown
	/// target leaves no room open and returns `None`.
	pub async fn open(&mut self, target: &RoomTarget) -> Result<Option<&mut OpenRoom>, StoreError> {
		self.close_room();

		let info = match resolve_room(self.store.as_ref(), &self.user.user_id, target).await? {
			Resolution::Found(info) => info,
			Resolution::NotFound => return Ok(None),
		};

		let sync = RoomSync::open(self.store.clone(), info.room.clone(), self.user.user_id.clone()).await?;
		let typing = TypingDebouncer::new(
			self.store.clone(),
			info.room.clone(),
			self.user.clone(),
			self.config.typing_idle,
		);
		let composer = Composer::new(
			self.store.clone(),
			info.room.clone(),
			self.user.clone(),
			typing,
			self.config.max_attachment_bytes,
		);

		self.roster.open_room(&info.room);
		Ok(Some(self.open.insert(OpenRoom { info, sync, composer })))
	}

	pub fn close_room(&mut self) {
		if self.open.take().is_some() {
			self.roster.close_room();
		}
	}

	/// Leave: withdraw typing, stop all subscriptions and publish offline.
	pub async fn shutdown(mut self) {
		let room = self.open.take();
		self.roster.close_room();

		let clear_typing = async move {
			if let Some(mut room) = room {
				room.composer.clear_typing().await;
			}
		};
		futures::join!(clear_typing, self.presence.unmount());

		info!(user = %self.user.user_id, "session: ended");
	}
}

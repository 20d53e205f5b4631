#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chatter_domain::{RoomId, User};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::RoomStore;

/// Debounced typing flag for one user in one room.
///
/// `IDLE --keystroke--> TYPING --idle timeout--> IDLE`. Every keystroke
/// rewrites the flag and restarts the single pending clear timer.
pub struct TypingDebouncer {
	store: Arc<dyn RoomStore>,
	room: RoomId,
	user: User,
	idle: Duration,
	pending: Option<JoinHandle<()>>,
}

impl TypingDebouncer {
	pub fn new(store: Arc<dyn RoomStore>, room: RoomId, user: User, idle: Duration) -> Self {
		Self {
			store,
			room,
			user,
			idle,
			pending: None,
		}
	}

	pub fn room(&self) -> &RoomId {
		&self.room
	}

	/// True while a clear timer is armed.
	pub fn is_typing(&self) -> bool {
		self.pending.as_ref().is_some_and(|h| !h.is_finished())
	}

	/// Record a keystroke: write the flag and restart the idle timer.
	///
	/// The old timer is cancelled before the write so it cannot fire while
	/// the store acknowledges the new flag.
	pub async fn keystroke(&mut self) {
		self.cancel_timer();

		if let Err(e) = self.store.set_typing(&self.room, &self.user).await {
			warn!(room = %self.room, error = %e, "typing: failed to set flag");
		}

		let store = self.store.clone();
		let room = self.room.clone();
		let user = self.user.user_id.clone();
		let deadline = Instant::now() + self.idle;
		self.pending = Some(tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			match store.clear_typing(&room, &user).await {
				Ok(()) => debug!(room = %room, "typing: idle, flag cleared"),
				Err(e) => warn!(room = %room, error = %e, "typing: failed to clear flag after idle"),
			}
		}));
	}

	/// Clear the flag now, regardless of timer state.
	pub async fn clear_now(&mut self) {
		self.cancel_timer();
		if let Err(e) = self.store.clear_typing(&self.room, &self.user.user_id).await {
			warn!(room = %self.room, error = %e, "typing: failed to clear flag");
		}
	}

	fn cancel_timer(&mut self) {
		if let Some(handle) = self.pending.take() {
			handle.abort();
		}
	}
}

impl Drop for TypingDebouncer {
	fn drop(&mut self) {
		let Some(handle) = self.pending.take() else {
			return;
		};
		let armed = !handle.is_finished();
		handle.abort();

		if !armed {
			return;
		}

		// Leaving the room: withdraw the flag instead of waiting for the timer.
		if let Ok(rt) = tokio::runtime::Handle::try_current() {
			let store = self.store.clone();
			let room = self.room.clone();
			let user = self.user.user_id.clone();
			rt.spawn(async move {
				if let Err(e) = store.clear_typing(&room, &user).await {
					warn!(room = %room, error = %e, "typing: failed to clear flag on teardown");
				}
			});
		}
	}
}

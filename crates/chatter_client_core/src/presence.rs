#![forbid(unsafe_code)]

use std::sync::Arc;

use chatter_domain::{User, UserId};
use tracing::{debug, info, warn};

use crate::store::{DisconnectAction, PresenceService};

/// Publishes the local user's presence for as long as it is mounted.
///
/// Mounting registers the store-side disconnect rule and marks the user
/// online. Unmounting (explicitly or by drop) runs the same rule eagerly and
/// withdraws it. All writes are best effort: failures are logged and never
/// block the caller.
pub struct PresenceReporter {
	presence: Arc<dyn PresenceService>,
	user: User,
	action: DisconnectAction,
	mounted: bool,
}

impl PresenceReporter {
	pub async fn mount(presence: Arc<dyn PresenceService>, user: User, action: DisconnectAction) -> Self {
		if let Err(e) = presence.on_disconnect(&user.user_id, action).await {
			warn!(user = %user.user_id, error = %e, "presence: failed to register disconnect rule");
		}

		match presence.mark_online(&user).await {
			Ok(()) => info!(user = %user.user_id, action = %action, "presence: online"),
			Err(e) => warn!(user = %user.user_id, error = %e, "presence: failed to mark online"),
		}

		Self {
			presence,
			user,
			action,
			mounted: true,
		}
	}

	pub fn user(&self) -> &User {
		&self.user
	}

	pub fn is_mounted(&self) -> bool {
		self.mounted
	}

	/// Run the disconnect rule now and withdraw it from the store.
	pub async fn unmount(mut self) {
		self.mounted = false;
		teardown(self.presence.as_ref(), &self.user.user_id, self.action).await;
	}
}

async fn teardown(presence: &dyn PresenceService, user: &UserId, action: DisconnectAction) {
	let res = match action {
		DisconnectAction::MarkOffline => presence.mark_offline(user).await,
		DisconnectAction::Remove => presence.remove_user(user).await,
	};
	if let Err(e) = res {
		warn!(user = %user, action = %action, error = %e, "presence: teardown write failed");
	}

	if let Err(e) = presence.cancel_on_disconnect(user).await {
		warn!(user = %user, error = %e, "presence: failed to cancel disconnect rule");
	}

	debug!(user = %user, action = %action, "presence: unmounted");
}

impl Drop for PresenceReporter {
	fn drop(&mut self) {
		if !self.mounted {
			return;
		}

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			debug!(user = %self.user.user_id, "presence: dropped outside runtime; leaving cleanup to the store");
			return;
		};

		let presence = self.presence.clone();
		let user = self.user.user_id.clone();
		let action = self.action;
		handle.spawn(async move {
			teardown(presence.as_ref(), &user, action).await;
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryStore;

	fn alice() -> User {
		User::new("Alice", UserId::new("user_1_alice").unwrap())
	}

	#[tokio::test]
	async fn mount_marks_online_and_registers_rule() {
		let store = MemoryStore::new();
		let user = alice();

		let reporter = PresenceReporter::mount(Arc::new(store.clone()), user.clone(), DisconnectAction::MarkOffline).await;
		assert!(reporter.is_mounted());

		let rec = store.user(&user.user_id).unwrap();
		assert!(rec.online);
		assert!(rec.last_active.is_some());
		assert_eq!(store.disconnect_rule(&user.user_id), Some(DisconnectAction::MarkOffline));

		reporter.unmount().await;
		assert!(!store.user(&user.user_id).unwrap().online);
		assert_eq!(store.disconnect_rule(&user.user_id), None);
	}

	#[tokio::test]
	async fn remove_policy_deletes_on_unmount() {
		let store = MemoryStore::new();
		let user = alice();

		let reporter = PresenceReporter::mount(Arc::new(store.clone()), user.clone(), DisconnectAction::Remove).await;
		reporter.unmount().await;
		assert!(store.user(&user.user_id).is_none());
	}

	#[tokio::test]
	async fn connection_drop_flips_offline() {
		let store = MemoryStore::new();
		let user = alice();

		let _reporter = PresenceReporter::mount(Arc::new(store.clone()), user.clone(), DisconnectAction::MarkOffline).await;
		store.disconnect(&user.user_id);
		assert!(!store.user(&user.user_id).unwrap().online);
	}

	#[tokio::test]
	async fn drop_tears_down_in_background() {
		let store = MemoryStore::new();
		let user = alice();

		let reporter = PresenceReporter::mount(Arc::new(store.clone()), user.clone(), DisconnectAction::MarkOffline).await;
		drop(reporter);

		let mut sub = crate::store::RoomStore::subscribe_user(&store, &user.user_id).await.unwrap();
		let mut rec = sub.current();
		while rec.as_ref().is_some_and(|r| r.online) {
			rec = sub.next().await.unwrap();
		}
		assert_eq!(rec.map(|r| r.online), Some(false));
	}

	#[tokio::test]
	async fn unreachable_store_does_not_block_mount() {
		let store = MemoryStore::new();
		store.set_reachable(false);

		let reporter = PresenceReporter::mount(Arc::new(store.clone()), alice(), DisconnectAction::MarkOffline).await;
		assert!(reporter.is_mounted());
		reporter.unmount().await;
	}
}

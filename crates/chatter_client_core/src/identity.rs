#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chatter_domain::{User, UserId};
use chatter_util::time::unix_ms_now;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::store::{RoomStore, StoreError};

const ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Errors reading or writing the local identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
	#[error("identity io error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("identity file {path} is corrupt: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to encode identity: {0}")]
	Encode(#[source] serde_json::Error),
}

/// Errors from the join flow.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
	#[error("name must not be empty")]
	EmptyName,

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Identity(#[from] IdentityError),
}

pub fn identity_dir() -> PathBuf {
	if let Some(cfg) = dirs::config_dir() {
		let mut dir = cfg;
		dir.push("chatter");
		return dir;
	}

	if let Some(home) = dirs::home_dir() {
		let mut dir = home.join(".config");
		dir.push("chatter");
		return dir;
	}

	let mut dir = PathBuf::from(".");
	dir.push("chatter");
	dir
}

pub fn default_identity_path() -> PathBuf {
	let mut p = identity_dir();
	p.push("user.json");
	p
}

/// Device-local storage for the joined user.
#[derive(Debug, Clone)]
pub struct IdentityStore {
	path: PathBuf,
}

impl IdentityStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Stored identity, or `None` when the user has not joined yet.
	pub fn load(&self) -> Result<Option<User>, IdentityError> {
		let data = match fs::read_to_string(&self.path) {
			Ok(d) => d,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %self.path.display(), "no stored identity");
				return Ok(None);
			}
			Err(source) => {
				return Err(IdentityError::Io {
					path: self.path.clone(),
					source,
				});
			}
		};

		let user = serde_json::from_str::<User>(&data).map_err(|source| IdentityError::Parse {
			path: self.path.clone(),
			source,
		})?;
		Ok(Some(user))
	}

	pub fn save(&self, user: &User) -> Result<(), IdentityError> {
		let io_err = |source: std::io::Error| IdentityError::Io {
			path: self.path.clone(),
			source,
		};

		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent).map_err(io_err)?;
		}

		let data = serde_json::to_string(user).map_err(IdentityError::Encode)?;
		fs::write(&self.path, data).map_err(io_err)?;
		info!(path = %self.path.display(), user = %user.user_id, "stored identity");
		Ok(())
	}

	/// Forget the stored identity. Missing file is fine.
	pub fn clear(&self) -> Result<(), IdentityError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(source) => Err(IdentityError::Io {
				path: self.path.clone(),
				source,
			}),
		}
	}
}

/// New opaque user id: `user_<unix ms>_<7 base36 chars>`.
pub fn generate_user_id() -> UserId {
	let mut rng = rand::rng();
	let suffix: String = (0..ID_SUFFIX_LEN)
		.map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
		.collect();

	UserId::new(format!("user_{}_{suffix}", unix_ms_now())).expect("generated user id is valid")
}

/// Create a user from a display name, register it with the store and persist it locally.
pub async fn join(store: &dyn RoomStore, identity: &IdentityStore, name: &str) -> Result<User, JoinError> {
	let name = name.trim();
	if name.is_empty() {
		return Err(JoinError::EmptyName);
	}

	let user = User::new(name, generate_user_id());

	if let Err(e) = store.put_user(&user, true).await {
		warn!(error = %e, "failed to register user");
		return Err(e.into());
	}

	identity.save(&user)?;
	info!(user = %user.user_id, name = %user.name, "joined");
	Ok(user)
}

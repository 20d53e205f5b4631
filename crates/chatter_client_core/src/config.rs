#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use crate::identity::default_identity_path;
use crate::store::DisconnectAction;

/// Idle interval after which a typing flag is cleared.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(2000);

/// Largest attachment accepted by the composer (20 MiB).
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Default config path: `~/.chatter/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatter").join("config.toml"))
}

/// Load the client config from TOML and env overrides.
pub fn load_client_config() -> anyhow::Result<ClientConfig> {
	let path = default_config_path()?;
	load_client_config_from_path(&path)
}

/// Same as `load_client_config` but with an explicit config path.
pub fn load_client_config_from_path(path: &Path) -> anyhow::Result<ClientConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ClientConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// Typing flag idle timeout.
	pub typing_idle: Duration,
	/// Attachments larger than this are rejected before upload.
	pub max_attachment_bytes: u64,
	/// Where the joined identity is kept between sessions.
	pub identity_path: PathBuf,
	/// Rule registered with the store for a dropped connection.
	pub on_disconnect: DisconnectAction,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			typing_idle: DEFAULT_TYPING_IDLE,
			max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
			identity_path: default_identity_path(),
			on_disconnect: DisconnectAction::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	typing_idle_ms: Option<u64>,
	max_attachment_bytes: Option<u64>,
	identity_path: Option<String>,

	#[serde(default)]
	presence: FilePresenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePresenceSettings {
	on_disconnect: Option<String>,
}

impl ClientConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = Self::default();

		let on_disconnect = match file.presence.on_disconnect.as_deref().map(str::trim) {
			Some(v) if !v.is_empty() => v.parse::<DisconnectAction>().map_err(|e| anyhow!(e))?,
			_ => defaults.on_disconnect,
		};

		Ok(Self {
			typing_idle: file
				.typing_idle_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(defaults.typing_idle),
			max_attachment_bytes: file
				.max_attachment_bytes
				.filter(|b| *b > 0)
				.unwrap_or(defaults.max_attachment_bytes),
			identity_path: file
				.identity_path
				.filter(|s| !s.trim().is_empty())
				.map(PathBuf::from)
				.unwrap_or(defaults.identity_path),
			on_disconnect,
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ClientConfig) {
	if let Ok(v) = std::env::var("CHATTER_TYPING_IDLE_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.typing_idle = Duration::from_millis(ms);
		info!(ms, "client config: typing_idle overridden by env");
	}

	if let Ok(v) = std::env::var("CHATTER_MAX_ATTACHMENT_BYTES")
		&& let Ok(bytes) = v.trim().parse::<u64>()
		&& bytes > 0
	{
		cfg.max_attachment_bytes = bytes;
		info!(bytes, "client config: max_attachment_bytes overridden by env");
	}

	if let Ok(v) = std::env::var("CHATTER_IDENTITY_PATH") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.identity_path = PathBuf::from(v);
			info!("client config: identity_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CHATTER_PRESENCE_ON_DISCONNECT") {
		match v.parse::<DisconnectAction>() {
			Ok(action) => {
				cfg.on_disconnect = action;
				info!(action = %action, "client config: on_disconnect overridden by env");
			}
			Err(e) => warn!(error = %e, "client config: ignoring CHATTER_PRESENCE_ON_DISCONNECT"),
		}
	}
}

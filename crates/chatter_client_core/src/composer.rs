#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use chatter_domain::{Message, MessageKind, NewMessage, RoomId, User};
use chatter_util::data_url::{self, MediaFamily, media_family};
use tracing::{debug, warn};

use crate::recorder::AudioClip;
use crate::store::{RoomStore, StoreError};
use crate::typing::TypingDebouncer;

/// Composer failures. Each one is terminal for that send.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
	#[error("File size should not exceed {}.", format_limit(.limit))]
	AttachmentTooLarge { size: u64, limit: u64 },

	#[error("unsupported attachment type: {0}")]
	UnsupportedMedia(String),

	#[error("could not read attachment: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Store(#[from] StoreError),
}

const MIB: u64 = 1024 * 1024;

fn format_limit(limit: &u64) -> String {
	match *limit {
		l if l >= MIB && l % MIB == 0 => format!("{}MB", l / MIB),
		l if l >= MIB => format!("{:.1}MB", l as f64 / MIB as f64),
		l if l >= 1024 && l % 1024 == 0 => format!("{}KB", l / 1024),
		l => format!("{l} bytes"),
	}
}

/// A picked file, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
	pub name: String,
	pub mime: String,
	pub bytes: Vec<u8>,
}

impl Attachment {
	pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
		Self {
			name: name.into(),
			mime: mime.into(),
			bytes,
		}
	}

	/// Read a media file from disk, refusing it before reading if it exceeds
	/// `limit` or is not an image, video or audio type.
	pub async fn from_path(path: &Path, limit: u64) -> Result<Self, ComposeError> {
		let size = tokio::fs::metadata(path).await?.len();
		check_size(size, limit)?;

		let mime = match mime_from_extension(path) {
			Some(mime) if kind_for_mime(mime).is_some() => mime,
			Some(mime) => return Err(ComposeError::UnsupportedMedia(mime.to_string())),
			None => {
				return Err(ComposeError::UnsupportedMedia(
					path.extension()
						.map(|e| e.to_string_lossy().into_owned())
						.unwrap_or_else(|| "<none>".to_string()),
				));
			}
		};

		let bytes = tokio::fs::read(path).await?;
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();
		Ok(Self::new(name, mime, bytes))
	}
}

fn check_size(size: u64, limit: u64) -> Result<(), ComposeError> {
	if size > limit {
		return Err(ComposeError::AttachmentTooLarge { size, limit });
	}
	Ok(())
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
	mime_guess::from_path(path).first_raw()
}

fn kind_for_mime(mime: &str) -> Option<MessageKind> {
	match media_family(mime) {
		MediaFamily::Image => Some(MessageKind::Image),
		MediaFamily::Video => Some(MessageKind::Video),
		MediaFamily::Audio => Some(MessageKind::Audio),
		MediaFamily::Other => None,
	}
}

/// Outgoing side of an open room.
pub struct Composer {
	store: Arc<dyn RoomStore>,
	room: RoomId,
	user: User,
	typing: TypingDebouncer,
	max_attachment_bytes: u64,
}

impl Composer {
	pub fn new(store: Arc<dyn RoomStore>, room: RoomId, user: User, typing: TypingDebouncer, max_attachment_bytes: u64) -> Self {
		Self {
			store,
			room,
			user,
			typing,
			max_attachment_bytes,
		}
	}

	pub fn room(&self) -> &RoomId {
		&self.room
	}

	pub fn max_attachment_bytes(&self) -> u64 {
		self.max_attachment_bytes
	}

	/// The input changed; signal typing.
	pub async fn input_changed(&mut self) {
		self.typing.keystroke().await;
	}

	/// Withdraw the typing flag without sending.
	pub async fn clear_typing(&mut self) {
		self.typing.clear_now().await;
	}

	/// Send trimmed text. Blank input is a no-op and returns `Ok(None)`.
	pub async fn send_text(&mut self, text: &str) -> Result<Option<Message>, ComposeError> {
		let text = text.trim();
		if text.is_empty() {
			return Ok(None);
		}
		self.send(MessageKind::Text, text.to_string()).await.map(Some)
	}

	/// Send an image, video or audio file inline.
	pub async fn send_attachment(&mut self, attachment: Attachment) -> Result<Message, ComposeError> {
		check_size(attachment.bytes.len() as u64, self.max_attachment_bytes)?;

		let kind = kind_for_mime(&attachment.mime).ok_or_else(|| ComposeError::UnsupportedMedia(attachment.mime.clone()))?;

		debug!(room = %self.room, name = %attachment.name, mime = %attachment.mime, "composer: sending attachment");
		let body = data_url::encode(&attachment.mime, &attachment.bytes);
		self.send(kind, body).await
	}

	/// Send a recorded clip as an audio message.
	pub async fn send_clip(&mut self, clip: AudioClip) -> Result<Message, ComposeError> {
		let body = data_url::encode(&clip.mime, &clip.bytes);
		self.send(MessageKind::Audio, body).await
	}

	async fn send(&mut self, kind: MessageKind, body: String) -> Result<Message, ComposeError> {
		let res = self
			.store
			.append_message(&self.room, NewMessage::new(&self.user, kind, body))
			.await;

		self.typing.clear_now().await;

		match res {
			Ok(message) => Ok(message),
			Err(e) => {
				warn!(room = %self.room, kind = %kind, error = %e, "composer: send failed");
				Err(e.into())
			}
		}
	}
}

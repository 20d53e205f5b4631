#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the two participant ids of a direct room.
pub const DIRECT_ROOM_SEPARATOR: char = ':';

/// Characters the backing store does not accept inside a path segment.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn validate_key(id: &str) -> Result<(), ParseIdError> {
	if id.trim().is_empty() {
		return Err(ParseIdError::Empty);
	}
	if let Some(c) = id.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
		return Err(ParseIdError::InvalidFormat(format!("character {c:?} not allowed in {id:?}")));
	}
	Ok(())
}

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
	/// Create a `UserId`. Rejects empty ids and ids containing the direct-room separator.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		validate_key(&id)?;
		if id.contains(DIRECT_ROOM_SEPARATOR) {
			return Err(ParseIdError::InvalidFormat(format!(
				"user id must not contain {DIRECT_ROOM_SEPARATOR:?}: {id:?}"
			)));
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

impl TryFrom<String> for UserId {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		UserId::new(s)
	}
}

impl From<UserId> for String {
	fn from(id: UserId) -> Self {
		id.0
	}
}

/// The locally joined user, as kept in device storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub name: String,
	pub user_id: UserId,
}

impl User {
	pub fn new(name: impl Into<String>, user_id: UserId) -> Self {
		Self {
			name: name.into(),
			user_id,
		}
	}
}

/// User record as stored in the user registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
	pub user_id: UserId,
	pub name: String,
	pub online: bool,
	/// Server time of the last presence change (unix ms).
	#[serde(default)]
	pub last_active: Option<i64>,
}

/// Conversation channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		validate_key(&id)?;
		Ok(Self(id))
	}

	/// Canonical room for a two-party conversation. `direct(a, b) == direct(b, a)`.
	pub fn direct(a: &UserId, b: &UserId) -> Self {
		let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
		Self(format!("{}{}{}", lo.as_str(), DIRECT_ROOM_SEPARATOR, hi.as_str()))
	}

	/// Room of a registered group.
	pub fn group(group: &GroupDef) -> Self {
		Self(group.id.to_string())
	}

	/// Participants of a direct room, in canonical order.
	pub fn direct_participants(&self) -> Option<(UserId, UserId)> {
		let (a, b) = self.0.split_once(DIRECT_ROOM_SEPARATOR)?;
		Some((UserId::new(a).ok()?, UserId::new(b).ok()?))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Entry of the static group registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDef {
	pub id: &'static str,
	pub name: &'static str,
}

/// Hard-coded group chats, in display order.
pub const GROUPS: &[GroupDef] = &[
	GroupDef {
		id: "math-class",
		name: "Math Class",
	},
	GroupDef {
		id: "history-class",
		name: "History",
	},
	GroupDef {
		id: "science-club",
		name: "Science Club",
	},
	GroupDef {
		id: "literature-corner",
		name: "Literature Corner",
	},
];

/// Look up a group by id.
pub fn find_group(id: &str) -> Option<&'static GroupDef> {
	GROUPS.iter().find(|g| g.id == id)
}

/// Navigation target for opening a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomTarget {
	Direct(UserId),
	Group(String),
}

/// Store-assigned message key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	/// Random message key.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Text,
	Image,
	Video,
	Audio,
}

impl MessageKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageKind::Text => "text",
			MessageKind::Image => "image",
			MessageKind::Video => "video",
			MessageKind::Audio => "audio",
		}
	}

	/// Infer the kind from a body that may hold an inline `data:` URL.
	pub fn infer(body: &str) -> Self {
		if body.starts_with("data:image") {
			MessageKind::Image
		} else if body.starts_with("data:video") {
			MessageKind::Video
		} else if body.starts_with("data:audio") {
			MessageKind::Audio
		} else {
			MessageKind::Text
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A message as stored in a room's message list.
///
/// Records written without a `kind` take the one inferred from their body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredMessage")]
pub struct Message {
	pub id: MessageId,
	pub sender_id: UserId,
	pub sender_name: String,
	/// Server-assigned unix ms; `None` until the store has stamped it.
	pub timestamp: Option<i64>,
	pub kind: MessageKind,
	/// Inline text, or a `data:` URL for media.
	pub body: String,
}

#[derive(Deserialize)]
struct StoredMessage {
	id: MessageId,
	sender_id: UserId,
	sender_name: String,
	#[serde(default)]
	timestamp: Option<i64>,
	#[serde(default)]
	kind: Option<MessageKind>,
	body: String,
}

impl From<StoredMessage> for Message {
	fn from(raw: StoredMessage) -> Self {
		let kind = raw.kind.unwrap_or_else(|| MessageKind::infer(&raw.body));
		Self {
			id: raw.id,
			sender_id: raw.sender_id,
			sender_name: raw.sender_name,
			timestamp: raw.timestamp,
			kind,
			body: raw.body,
		}
	}
}

impl Message {
	pub fn is_from(&self, user: &UserId) -> bool {
		&self.sender_id == user
	}
}

/// Message about to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
	pub sender_id: UserId,
	pub sender_name: String,
	pub kind: MessageKind,
	pub body: String,
}

impl NewMessage {
	pub fn new(sender: &User, kind: MessageKind, body: impl Into<String>) -> Self {
		Self {
			sender_id: sender.user_id.clone(),
			sender_name: sender.name.clone(),
			kind,
			body: body.into(),
		}
	}
}

/// Value of a set typing flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEntry {
	pub name: String,
}

/// Typing flags of a room, keyed by user.
pub type TypingMap = BTreeMap<UserId, TypingEntry>;

/// Names of everyone typing in `map` except `me`.
pub fn typing_names(map: &TypingMap, me: &UserId) -> Vec<String> {
	map.iter()
		.filter(|(id, _)| *id != me)
		.map(|(_, entry)| entry.name.clone())
		.collect()
}

/// Human-readable typing indicator for a list of names.
pub fn typing_text(names: &[String]) -> Option<String> {
	match names {
		[] => None,
		[one] => Some(format!("{one} is typing...")),
		[a, b] => Some(format!("{a} and {b} are typing...")),
		_ => Some("Several people are typing...".to_string()),
	}
}

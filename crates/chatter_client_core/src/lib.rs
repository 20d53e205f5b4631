#![forbid(unsafe_code)]

//! Client core for chatter: identity, presence, room and roster sync, and
//! the composer, all written against an injected realtime store.

pub mod composer;
pub mod config;
pub mod identity;
pub mod presence;
pub mod recorder;
pub mod room;
pub mod roster;
pub mod session;
pub mod store;
pub mod typing;

pub use composer::{Attachment, ComposeError, Composer};
pub use config::{ClientConfig, load_client_config, load_client_config_from_path};
pub use identity::{IdentityError, IdentityStore, JoinError, join};
pub use presence::PresenceReporter;
pub use recorder::{AudioClip, AudioRecorder, CaptureError, CaptureStream, MICROPHONE_ALERT, Microphone};
pub use room::{Resolution, ResolvedRoom, RoomSync, RoomView, resolve_room};
pub use roster::{RosterSync, RosterView, UnreadTracker};
pub use session::{ChatSession, OpenRoom};
pub use store::{DisconnectAction, MemoryStore, PresenceService, RoomStore, Snapshots, StoreError};
pub use typing::TypingDebouncer;

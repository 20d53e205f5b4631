#![forbid(unsafe_code)]

use tracing::{debug, warn};

/// Text shown to the user when the microphone cannot be used.
pub const MICROPHONE_ALERT: &str = "Could not access microphone. Please check permissions.";

/// Microphone capture failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
	#[error("microphone permission denied")]
	PermissionDenied,

	#[error("no microphone available: {0}")]
	Unavailable(String),

	#[error("capture failed: {0}")]
	Capture(String),

	#[error("already recording")]
	AlreadyRecording,

	#[error("not recording")]
	NotRecording,
}

impl CaptureError {
	/// User-facing alert, for errors that come from the device.
	pub fn alert(&self) -> Option<&'static str> {
		match self {
			CaptureError::PermissionDenied | CaptureError::Unavailable(_) | CaptureError::Capture(_) => {
				Some(MICROPHONE_ALERT)
			}
			CaptureError::AlreadyRecording | CaptureError::NotRecording => None,
		}
	}
}

/// Source of audio capture streams (requests access on `open`).
pub trait Microphone: Send + Sync {
	fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live capture. Must be stopped via `finish` or `abort`.
pub trait CaptureStream: Send {
	/// MIME type of the recorded bytes, e.g. `audio/wav`.
	fn mime(&self) -> &str;

	/// Stop capturing and return everything recorded.
	fn finish(&mut self) -> Result<Vec<u8>, CaptureError>;

	/// Stop capturing and discard.
	fn abort(&mut self);
}

/// A finished recording, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
	pub mime: String,
	pub bytes: Vec<u8>,
}

enum RecorderState {
	Idle,
	Recording(Box<dyn CaptureStream>),
	Captured(AudioClip),
}

/// Recording state machine over a [`Microphone`].
pub struct AudioRecorder<M> {
	mic: M,
	state: RecorderState,
}

impl<M: Microphone> AudioRecorder<M> {
	pub fn new(mic: M) -> Self {
		Self {
			mic,
			state: RecorderState::Idle,
		}
	}

	pub fn is_recording(&self) -> bool {
		matches!(self.state, RecorderState::Recording(_))
	}

	pub fn has_clip(&self) -> bool {
		matches!(self.state, RecorderState::Captured(_))
	}

	/// Open the microphone and start recording. On failure the recorder stays idle.
	pub fn start(&mut self) -> Result<(), CaptureError> {
		if self.is_recording() {
			return Err(CaptureError::AlreadyRecording);
		}

		match self.mic.open() {
			Ok(stream) => {
				debug!(mime = stream.mime(), "recorder: started");
				self.state = RecorderState::Recording(stream);
				Ok(())
			}
			Err(e) => {
				warn!(error = %e, "recorder: could not open microphone");
				self.state = RecorderState::Idle;
				Err(e)
			}
		}
	}

	/// Stop recording and keep the clip for review.
	pub fn stop(&mut self) -> Result<(), CaptureError> {
		if !self.is_recording() {
			return Err(CaptureError::NotRecording);
		}
		let RecorderState::Recording(mut stream) = std::mem::replace(&mut self.state, RecorderState::Idle) else {
			return Err(CaptureError::NotRecording);
		};

		match stream.finish() {
			Ok(bytes) => {
				debug!(bytes = bytes.len(), "recorder: stopped");
				self.state = RecorderState::Captured(AudioClip {
					mime: stream.mime().to_string(),
					bytes,
				});
				Ok(())
			}
			Err(e) => {
				warn!(error = %e, "recorder: capture failed");
				stream.abort();
				Err(e)
			}
		}
	}

	/// Throw away the current recording or pending clip.
	pub fn discard(&mut self) {
		if let RecorderState::Recording(mut stream) = std::mem::replace(&mut self.state, RecorderState::Idle) {
			stream.abort();
			debug!("recorder: recording aborted");
		}
	}

	/// Hand the captured clip to the caller, returning to idle.
	pub fn take_clip(&mut self) -> Option<AudioClip> {
		match std::mem::replace(&mut self.state, RecorderState::Idle) {
			RecorderState::Captured(clip) => Some(clip),
			other => {
				self.state = other;
				None
			}
		}
	}
}

impl<M> Drop for AudioRecorder<M> {
	fn drop(&mut self) {
		if let RecorderState::Recording(stream) = &mut self.state {
			stream.abort();
		}
	}
}

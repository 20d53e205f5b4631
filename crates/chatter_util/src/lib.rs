#![forbid(unsafe_code)]

pub mod time {
	use std::time::{Duration, SystemTime, UNIX_EPOCH};

	/// Current Unix time in milliseconds.
	#[inline]
	pub fn unix_ms_now() -> i64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::from_secs(0))
			.as_millis() as i64
	}
}

pub mod data_url {
	use base64::Engine as _;
	use base64::engine::general_purpose::STANDARD;

	/// Decoded `data:<mime>;base64,<payload>` URL.
	#[derive(Debug, Clone, PartialEq, Eq)]
	pub struct DataUrl {
		pub mime: String,
		pub bytes: Vec<u8>,
	}

	/// Top-level media family of a MIME type.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub enum MediaFamily {
		Image,
		Video,
		Audio,
		Other,
	}

	/// Classify a MIME type like `image/png` by its top-level type.
	pub fn media_family(mime: &str) -> MediaFamily {
		let top = mime.split('/').next().unwrap_or_default().trim().to_ascii_lowercase();
		match top.as_str() {
			"image" => MediaFamily::Image,
			"video" => MediaFamily::Video,
			"audio" => MediaFamily::Audio,
			_ => MediaFamily::Other,
		}
	}

	/// Encode bytes as a self-contained base64 data URL.
	pub fn encode(mime: &str, bytes: &[u8]) -> String {
		let mime = mime.trim();
		let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
		format!("data:{mime};base64,{}", STANDARD.encode(bytes))
	}

	/// Parse a base64 data URL produced by [`encode`].
	pub fn decode(s: &str) -> Result<DataUrl, String> {
		let rest = s
			.strip_prefix("data:")
			.ok_or_else(|| "invalid data url (expected data: prefix)".to_string())?;

		let (meta, payload) = rest
			.split_once(',')
			.ok_or_else(|| "invalid data url (missing ',' separator)".to_string())?;

		let mime = meta
			.strip_suffix(";base64")
			.ok_or_else(|| "invalid data url (only base64 payloads are supported)".to_string())?;

		let bytes = STANDARD
			.decode(payload)
			.map_err(|e| format!("invalid data url payload: {e}"))?;

		Ok(DataUrl {
			mime: mime.to_string(),
			bytes,
		})
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn encodes_with_mime_prefix() {
			assert_eq!(encode("image/png", b"hi"), "data:image/png;base64,aGk=");
			assert_eq!(encode("  ", b""), "data:application/octet-stream;base64,");
		}

		#[test]
		fn decodes_encoded_payload() {
			let url = encode("audio/wav", &[0, 1, 2, 255]);
			let d = decode(&url).unwrap();
			assert_eq!(d.mime, "audio/wav");
			assert_eq!(d.bytes, vec![0, 1, 2, 255]);
		}

		#[test]
		fn rejects_malformed_urls() {
			assert!(decode("image/png;base64,aGk=").is_err());
			assert!(decode("data:image/png;base64").is_err());
			assert!(decode("data:text/plain,hello").is_err());
			assert!(decode("data:image/png;base64,@@@").is_err());
		}

		#[test]
		fn classifies_media_family() {
			assert_eq!(media_family("image/jpeg"), MediaFamily::Image);
			assert_eq!(media_family("VIDEO/mp4"), MediaFamily::Video);
			assert_eq!(media_family("audio/webm;codecs=opus"), MediaFamily::Audio);
			assert_eq!(media_family("application/pdf"), MediaFamily::Other);
			assert_eq!(media_family(""), MediaFamily::Other);
		}
	}
}

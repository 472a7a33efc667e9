use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Immutable encoded image: bytes, declared MIME type and a display name.
///
/// Clones share the same buffer, so an entry that moves through the history
/// (append, undo, redo) stays the same blob, observable with [`ImageBlob::ptr_eq`].
#[derive(Clone)]
pub struct ImageBlob {
    inner: Arc<BlobInner>,
}

struct BlobInner {
    bytes: Vec<u8>,
    mime_type: String,
    name: String,
}

impl ImageBlob {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BlobInner {
                bytes,
                mime_type: mime_type.into(),
                name: name.into(),
            }),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = mime_for_path(path)
            .or_else(|| sniff_mime(&bytes))
            .unwrap_or("application/octet-stream");
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self::new(bytes, mime, name))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// True when both handles point at the same underlying buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Short content digest used to label blobs in events.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bytes());
        hex::encode(&hasher.finalize()[..6])
    }

    /// Same bytes under another name, e.g. `photo-edited.png`.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(self.inner.bytes.clone(), self.mime_type(), name)
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.bytes())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl PartialEq for ImageBlob {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.mime_type == other.inner.mime_type
                && self.inner.name == other.inner.name
                && self.inner.bytes == other.inner.bytes)
    }
}

impl Eq for ImageBlob {}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("name", &self.inner.name)
            .field("mime_type", &self.inner.mime_type)
            .field("len", &self.inner.bytes.len())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct BlobWire {
    name: String,
    mime_type: String,
    data: String,
}

impl Serialize for ImageBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BlobWire {
            name: self.inner.name.clone(),
            mime_type: self.inner.mime_type.clone(),
            data: BASE64.encode(self.bytes()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = BlobWire::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(wire.data.as_bytes())
            .map_err(|err| D::Error::custom(format!("image data is not base64: {err}")))?;
        if bytes.is_empty() {
            return Err(D::Error::custom("image data is empty"));
        }
        Ok(Self::new(bytes, wire.mime_type, wire.name))
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "wav" => Some("audio/wav"),
        "webm" => Some("audio/webm"),
        "ogg" => Some("audio/ogg"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        _ => None,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"GIF8") {
        return Some("image/gif");
    }
    None
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

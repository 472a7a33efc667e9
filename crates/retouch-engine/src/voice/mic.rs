use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use retouch_contracts::blob::mime_for_path;

use super::Microphone;

const CHUNK_BYTES: usize = 16 * 1024;

/// Plays back a recorded audio file as if it were live capture.
pub struct FileMicrophone {
    path: PathBuf,
    mime_type: String,
    pending: Option<Vec<u8>>,
}

impl FileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = mime_for_path(&path)
            .filter(|mime| mime.starts_with("audio/"))
            .unwrap_or("audio/webm")
            .to_string();
        Self {
            path,
            mime_type,
            pending: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }
}

impl Microphone for FileMicrophone {
    fn acquire(&mut self) -> Result<()> {
        if !self.path.is_file() {
            bail!("no recording at {}", self.path.display());
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        self.pending = Some(bytes);
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        let Some(bytes) = self.pending.as_mut() else {
            return Vec::new();
        };
        let chunks: Vec<Vec<u8>> = bytes.chunks(CHUNK_BYTES).map(<[u8]>::to_vec).collect();
        bytes.clear();
        chunks
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn release(&mut self) {
        self.pending = None;
    }
}

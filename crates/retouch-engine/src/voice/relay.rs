use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::{AudioClip, Transcriber};
use crate::http::response_json_or_error;

/// Posts recorded audio to a speech-to-text relay as a multipart `audio`
/// part and reads `{"text": ...}` back.
pub struct RelayTranscriber {
    url: String,
    timeout: Duration,
    http: HttpClient,
}

impl RelayTranscriber {
    pub fn new(url: impl Into<String>, timeout_s: f64) -> Self {
        Self {
            url: url.into().trim().to_string(),
            timeout: Duration::from_secs_f64(timeout_s.clamp(5.0, 300.0)),
            http: HttpClient::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transcriber for RelayTranscriber {
    fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        if self.url.is_empty() {
            bail!("no transcription relay configured (set RETOUCH_TRANSCRIBE_URL)");
        }
        let file_name = format!("speech.{}", audio_extension(&clip.mime_type));
        let part = MultipartPart::bytes(clip.bytes.clone())
            .file_name(file_name)
            .mime_str(&clip.mime_type)
            .with_context(|| format!("invalid audio mime '{}'", clip.mime_type))?;
        let form = MultipartForm::new().part("audio", part);
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .with_context(|| format!("transcription request failed ({})", self.url))?;
        let payload = response_json_or_error("Transcription", response)?;
        transcript_from_payload(&payload)
    }
}

fn transcript_from_payload(payload: &Value) -> Result<String> {
    if let Some(message) = payload.get("error").and_then(Value::as_str) {
        bail!("transcription relay error: {message}");
    }
    match payload.get("text") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => bail!("transcription response has no text field"),
        Some(other) => bail!("transcription text is not a string: {other}"),
    }
}

fn audio_extension(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("wav") {
        "wav"
    } else if lowered.contains("ogg") {
        "ogg"
    } else if lowered.contains("mpeg") || lowered.contains("mp3") {
        "mp3"
    } else if lowered.contains("mp4") || lowered.contains("m4a") {
        "m4a"
    } else {
        "webm"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{audio_extension, transcript_from_payload, RelayTranscriber};
    use crate::voice::{AudioClip, Transcriber};

    #[test]
    fn transcript_is_read_from_text() -> anyhow::Result<()> {
        assert_eq!(
            transcript_from_payload(&json!({"text": "make it warmer"}))?,
            "make it warmer"
        );
        assert_eq!(transcript_from_payload(&json!({"text": ""}))?, "");
        Ok(())
    }

    #[test]
    fn relay_errors_surface() {
        let err = transcript_from_payload(&json!({"error": "audio too short"}))
            .expect_err("error body");
        assert!(err.to_string().contains("audio too short"));
        assert!(transcript_from_payload(&json!({"words": []})).is_err());
    }

    #[test]
    fn unconfigured_relay_fails_without_a_request() {
        let relay = RelayTranscriber::new("  ", 30.0);
        let clip = AudioClip {
            bytes: vec![1, 2],
            mime_type: "audio/webm".to_string(),
        };
        assert!(relay.transcribe(&clip).is_err());
    }

    #[test]
    fn extensions_follow_mime() {
        assert_eq!(audio_extension("audio/webm;codecs=opus"), "webm");
        assert_eq!(audio_extension("audio/wav"), "wav");
        assert_eq!(audio_extension("audio/mpeg"), "mp3");
    }
}

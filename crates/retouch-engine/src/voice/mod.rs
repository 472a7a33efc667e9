//! Spoken commands: capture audio, transcribe it, interpret it into a
//! [`VoiceCommand`]. The microphone is released on every exit path.

mod interpret;
mod mic;
mod relay;

use std::fmt;
use std::time::{Duration, Instant};

use retouch_contracts::commands::VoiceCommand;
use retouch_contracts::events::{payload, EventWriter};
use serde_json::json;

use crate::error::error_chain_text;

pub use interpret::{GatewayIntentInterpreter, KeywordInterpreter};
pub use mic::FileMicrophone;
pub use relay::RelayTranscriber;

/// How long an error stays visible before the pipeline returns to idle.
pub const ERROR_DISPLAY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Idle,
    Listening,
    Transcribing,
    Interpreting,
    Error,
}

impl VoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceStatus::Idle => "idle",
            VoiceStatus::Listening => "listening",
            VoiceStatus::Transcribing => "transcribing",
            VoiceStatus::Interpreting => "interpreting",
            VoiceStatus::Error => "error",
        }
    }
}

impl fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("could not interpret the command: {0}")]
    Interpretation(String),
    #[error("voice pipeline is busy ({0})")]
    Busy(VoiceStatus),
    #[error("voice pipeline is not listening ({0})")]
    NotListening(VoiceStatus),
}

/// Recorded audio handed to the transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub trait Microphone {
    /// Starts capture; failing here means permission was refused or no device.
    fn acquire(&mut self) -> anyhow::Result<()>;
    /// Drains the chunks captured since `acquire`.
    fn take_chunks(&mut self) -> Vec<Vec<u8>>;
    fn mime_type(&self) -> &str;
    /// Stops capture. Must be safe to call when not acquired.
    fn release(&mut self);
}

pub trait Transcriber {
    fn transcribe(&self, clip: &AudioClip) -> anyhow::Result<String>;
}

/// Raw interpreter answer, before vocabulary coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIntent {
    pub tool: String,
    pub prompt: String,
}

pub trait IntentInterpreter {
    fn interpret(&self, transcript: &str) -> anyhow::Result<RawIntent>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOutcome {
    Command(VoiceCommand),
    NoSpeech,
}

pub struct VoicePipeline {
    microphone: Box<dyn Microphone>,
    transcriber: Box<dyn Transcriber>,
    interpreter: Box<dyn IntentInterpreter>,
    events: EventWriter,
    status: VoiceStatus,
    error_since: Option<Instant>,
    last_error: Option<String>,
    error_delay: Duration,
}

impl VoicePipeline {
    pub fn new(
        microphone: Box<dyn Microphone>,
        transcriber: Box<dyn Transcriber>,
        interpreter: Box<dyn IntentInterpreter>,
        events: EventWriter,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            interpreter,
            events,
            status: VoiceStatus::Idle,
            error_since: None,
            last_error: None,
            error_delay: ERROR_DISPLAY_DELAY,
        }
    }

    pub fn with_error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Moves `error` back to `idle` once the display delay has passed.
    pub fn poll(&mut self, now: Instant) -> VoiceStatus {
        if self.status == VoiceStatus::Error {
            let elapsed = self
                .error_since
                .map(|since| now.saturating_duration_since(since))
                .unwrap_or(self.error_delay);
            if elapsed >= self.error_delay {
                self.error_since = None;
                self.set_status(VoiceStatus::Idle);
            }
        }
        self.status
    }

    pub fn start(&mut self) -> Result<(), VoiceError> {
        self.poll(Instant::now());
        if self.status != VoiceStatus::Idle {
            return Err(VoiceError::Busy(self.status));
        }
        self.last_error = None;
        if let Err(err) = self.microphone.acquire() {
            self.microphone.release();
            return Err(self.fail(VoiceError::PermissionDenied(error_chain_text(&err, 300))));
        }
        self.set_status(VoiceStatus::Listening);
        Ok(())
    }

    /// Ends capture and runs transcription then interpretation.
    pub fn stop(&mut self) -> Result<VoiceOutcome, VoiceError> {
        if self.status != VoiceStatus::Listening {
            return Err(VoiceError::NotListening(self.status));
        }
        let chunks = self.microphone.take_chunks();
        self.microphone.release();
        let clip = AudioClip {
            bytes: chunks.concat(),
            mime_type: self.microphone.mime_type().to_string(),
        };
        if clip.is_empty() {
            self.set_status(VoiceStatus::Idle);
            return Ok(VoiceOutcome::NoSpeech);
        }

        self.set_status(VoiceStatus::Transcribing);
        let transcript = match self.transcriber.transcribe(&clip) {
            Ok(text) => text,
            Err(err) => {
                return Err(self.fail(VoiceError::Transcription(error_chain_text(&err, 300))))
            }
        };
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            self.set_status(VoiceStatus::Idle);
            return Ok(VoiceOutcome::NoSpeech);
        }

        self.set_status(VoiceStatus::Interpreting);
        let intent = match self.interpreter.interpret(&transcript) {
            Ok(intent) => intent,
            Err(err) => {
                return Err(self.fail(VoiceError::Interpretation(error_chain_text(&err, 300))))
            }
        };
        let command = VoiceCommand::coerce(&intent.tool, &intent.prompt, &transcript);
        self.set_status(VoiceStatus::Idle);
        Ok(VoiceOutcome::Command(command))
    }

    /// Abandons a capture in progress.
    pub fn cancel(&mut self) {
        if self.status == VoiceStatus::Listening {
            let _ = self.microphone.take_chunks();
        }
        self.microphone.release();
        if self.status != VoiceStatus::Idle {
            self.error_since = None;
            self.set_status(VoiceStatus::Idle);
        }
    }

    /// `start` + `stop` for callers whose microphone already holds a
    /// finished recording.
    pub fn capture(&mut self) -> Result<VoiceOutcome, VoiceError> {
        self.start()?;
        self.stop()
    }

    fn fail(&mut self, err: VoiceError) -> VoiceError {
        self.microphone.release();
        self.last_error = Some(err.to_string());
        self.error_since = Some(Instant::now());
        self.set_status(VoiceStatus::Error);
        err
    }

    fn set_status(&mut self, status: VoiceStatus) {
        self.status = status;
        let mut row = json!({ "status": status.as_str() });
        if status == VoiceStatus::Error {
            row["error"] = json!(self.last_error);
        }
        self.events.note("voice_status", payload(row));
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.microphone.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use retouch_contracts::commands::ToolKind;
    use retouch_contracts::events::EventWriter;

    use super::*;
    use crate::testing::{FakeInterpreter, FakeMicrophone, FakeTranscriber};

    fn pipeline(
        mic: &FakeMicrophone,
        transcriber: FakeTranscriber,
        interpreter: &FakeInterpreter,
    ) -> VoicePipeline {
        VoicePipeline::new(
            Box::new(mic.clone()),
            Box::new(transcriber),
            Box::new(interpreter.clone()),
            EventWriter::discard("test"),
        )
    }

    #[test]
    fn spoken_filter_becomes_a_command() -> anyhow::Result<()> {
        let mic = FakeMicrophone::with_audio(b"RIFF....".to_vec());
        let interpreter = FakeInterpreter::answering("filter", "sepia");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("make it sepia"), &interpreter);

        voice.start()?;
        assert_eq!(voice.status(), VoiceStatus::Listening);
        assert!(mic.is_active());
        let outcome = voice.stop()?;
        assert_eq!(
            outcome,
            VoiceOutcome::Command(VoiceCommand {
                tool: ToolKind::Filter,
                prompt: "sepia".to_string(),
                transcript: "make it sepia".to_string(),
            })
        );
        assert_eq!(voice.status(), VoiceStatus::Idle);
        assert!(!mic.is_active());
        Ok(())
    }

    #[test]
    fn blank_transcript_skips_the_interpreter() -> anyhow::Result<()> {
        let mic = FakeMicrophone::with_audio(vec![1, 2, 3]);
        let interpreter = FakeInterpreter::answering("filter", "sepia");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("   \n"), &interpreter);

        assert_eq!(voice.capture()?, VoiceOutcome::NoSpeech);
        assert_eq!(voice.status(), VoiceStatus::Idle);
        assert_eq!(interpreter.calls(), 0);
        assert!(!mic.is_active());
        Ok(())
    }

    #[test]
    fn unknown_tools_keep_the_transcript() -> anyhow::Result<()> {
        let mic = FakeMicrophone::with_audio(vec![1]);
        let interpreter = FakeInterpreter::answering("order_pizza", "pepperoni");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("order me a pizza"), &interpreter);
        let VoiceOutcome::Command(command) = voice.capture()? else {
            panic!("expected a command");
        };
        assert_eq!(command.tool, ToolKind::Unknown);
        assert_eq!(command.prompt, "order me a pizza");
        Ok(())
    }

    #[test]
    fn denied_microphone_is_permission_error() {
        let mic = FakeMicrophone::denied();
        let interpreter = FakeInterpreter::answering("undo", "");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("undo"), &interpreter);
        assert!(matches!(voice.start(), Err(VoiceError::PermissionDenied(_))));
        assert_eq!(voice.status(), VoiceStatus::Error);
        assert!(voice.last_error().is_some());
    }

    #[test]
    fn errors_clear_after_the_display_delay() {
        let mic = FakeMicrophone::with_audio(vec![1]);
        let interpreter = FakeInterpreter::answering("undo", "");
        let mut voice = pipeline(&mic, FakeTranscriber::failing("relay down"), &interpreter)
            .with_error_delay(Duration::from_secs(3));

        assert!(matches!(voice.capture(), Err(VoiceError::Transcription(_))));
        assert!(!mic.is_active());
        let failed_at = Instant::now();
        assert_eq!(voice.poll(failed_at), VoiceStatus::Error);
        assert!(matches!(voice.start(), Err(VoiceError::Busy(VoiceStatus::Error))));
        assert_eq!(
            voice.poll(failed_at + Duration::from_secs(4)),
            VoiceStatus::Idle
        );
        assert_eq!(interpreter.calls(), 0);
    }

    #[test]
    fn interpreter_failure_releases_the_microphone() {
        let mic = FakeMicrophone::with_audio(vec![1]);
        let interpreter = FakeInterpreter::failing("bad json");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("warm it up"), &interpreter);
        assert!(matches!(
            voice.capture(),
            Err(VoiceError::Interpretation(_))
        ));
        assert!(!mic.is_active());
        assert_eq!(voice.status(), VoiceStatus::Error);
    }

    #[test]
    fn stop_requires_listening() {
        let mic = FakeMicrophone::with_audio(vec![1]);
        let interpreter = FakeInterpreter::answering("undo", "");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("undo"), &interpreter);
        assert_eq!(
            voice.stop(),
            Err(VoiceError::NotListening(VoiceStatus::Idle))
        );
    }

    #[test]
    fn cancel_and_drop_release_the_microphone() -> anyhow::Result<()> {
        let mic = FakeMicrophone::with_audio(vec![1]);
        let interpreter = FakeInterpreter::answering("undo", "");
        let mut voice = pipeline(&mic, FakeTranscriber::saying("undo"), &interpreter);
        voice.start()?;
        voice.cancel();
        assert!(!mic.is_active());
        assert_eq!(voice.status(), VoiceStatus::Idle);

        voice.start()?;
        assert!(mic.is_active());
        drop(voice);
        assert!(!mic.is_active());
        Ok(())
    }
}

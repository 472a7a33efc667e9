//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use image::{Rgba, RgbaImage};
use retouch_contracts::ImageBlob;

use crate::compositor::encode_png;
use crate::gateway::{EditProvider, ProviderReply, ProviderRequest};
use crate::voice::{AudioClip, IntentInterpreter, Microphone, RawIntent, Transcriber};

pub(crate) fn png(width: u32, height: u32, color: [u8; 4]) -> ImageBlob {
    let pixels = RgbaImage::from_pixel(width, height, Rgba(color));
    match encode_png(&pixels, "test.png".to_string()) {
        Ok(blob) => blob,
        Err(err) => panic!("test png encode failed: {err}"),
    }
}

enum Scripted {
    Reply(ProviderReply),
    Error(String),
}

/// Provider registered as `dryrun` that answers from a queue and records
/// every request it receives.
#[derive(Clone, Default)]
pub(crate) struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_reply(&self, reply: ProviderReply) {
        self.queue().push_back(Scripted::Reply(reply));
    }

    pub(crate) fn push_image(&self, image: ImageBlob) {
        self.push_reply(ProviderReply {
            images: vec![image],
            finish_reason: Some("STOP".to_string()),
            ..ProviderReply::default()
        });
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.push_reply(ProviderReply {
            text: Some(text.to_string()),
            finish_reason: Some("STOP".to_string()),
            ..ProviderReply::default()
        });
    }

    pub(crate) fn push_error(&self, message: &str) {
        self.queue().push_back(Scripted::Error(message.to_string()));
    }

    pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
        match self.requests.lock() {
            Ok(rows) => rows.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        match self.replies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EditProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> anyhow::Result<ProviderReply> {
        if let Ok(mut rows) = self.requests.lock() {
            rows.push(request.clone());
        }
        match self.queue().pop_front() {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Error(message)) => Err(anyhow!(message)),
            None => bail!("scripted provider has no reply queued"),
        }
    }
}

#[derive(Default)]
struct MicState {
    audio: Vec<u8>,
    denied: bool,
    active: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeMicrophone {
    state: Arc<Mutex<MicState>>,
}

impl FakeMicrophone {
    pub(crate) fn with_audio(audio: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState {
                audio,
                ..MicState::default()
            })),
        }
    }

    pub(crate) fn denied() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState {
                denied: true,
                ..MicState::default()
            })),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().map(|state| state.active).unwrap_or(false)
    }
}

impl Microphone for FakeMicrophone {
    fn acquire(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("mic state poisoned"))?;
        if state.denied {
            bail!("permission denied by user");
        }
        state.active = true;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        match self.state.lock() {
            Ok(state) if state.active && !state.audio.is_empty() => vec![state.audio.clone()],
            _ => Vec::new(),
        }
    }

    fn mime_type(&self) -> &str {
        "audio/webm"
    }

    fn release(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.active = false;
        }
    }
}

pub(crate) enum FakeTranscriber {
    Saying(String),
    Failing(String),
}

impl FakeTranscriber {
    pub(crate) fn saying(text: &str) -> Self {
        Self::Saying(text.to_string())
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::Failing(message.to_string())
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, clip: &AudioClip) -> anyhow::Result<String> {
        if clip.is_empty() {
            bail!("empty clip reached the transcriber");
        }
        match self {
            Self::Saying(text) => Ok(text.clone()),
            Self::Failing(message) => Err(anyhow!(message.clone())),
        }
    }
}

#[derive(Clone)]
pub(crate) struct FakeInterpreter {
    answer: Result<RawIntent, String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeInterpreter {
    pub(crate) fn answering(tool: &str, prompt: &str) -> Self {
        Self {
            answer: Ok(RawIntent {
                tool: tool.to_string(),
                prompt: prompt.to_string(),
            }),
            calls: Arc::default(),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().map(|calls| *calls).unwrap_or(0)
    }
}

impl IntentInterpreter for FakeInterpreter {
    fn interpret(&self, _transcript: &str) -> anyhow::Result<RawIntent> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        self.answer.clone().map_err(|message| anyhow!(message))
    }
}

//! Photo retouching engine: local compositing, the remote edit gateway, the
//! voice command pipeline and the session controller tying them together.

pub mod compositor;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
mod http;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use controller::{
    BatchFailure, BatchReport, EditRequest, SessionController, SessionState, VoiceAction,
};
pub use error::EditorError;
pub use gateway::{EditGateway, EditOperation, GatewayError};
pub use voice::{VoiceError, VoiceOutcome, VoicePipeline, VoiceStatus};

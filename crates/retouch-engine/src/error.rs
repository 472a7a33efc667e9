use retouch_contracts::session::InsufficientCredits;

use crate::gateway::GatewayError;
use crate::voice::VoiceError;

/// Every failure a user action can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InsufficientCredits(#[from] InsufficientCredits),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no image loaded; upload one first")]
    NoSession,
    #[error("request blocked: {0}")]
    UpstreamBlocked(String),
    #[error("generation stopped early: {0}")]
    UpstreamIncomplete(String),
    #[error("no result returned: {0}")]
    UpstreamEmpty(String),
    #[error("unreadable result: {0}")]
    UpstreamMalformed(String),
    #[error("network failure: {0}")]
    Transport(String),
    #[error("image processing failed: {0}")]
    LocalEncodeFailure(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl EditorError {
    /// Stable machine-readable code, used in events.
    pub fn code(&self) -> &'static str {
        match self {
            EditorError::PermissionDenied(_) => "permission_denied",
            EditorError::InsufficientCredits(_) => "insufficient_credits",
            EditorError::InvalidInput(_) => "invalid_input",
            EditorError::NoSession => "no_session",
            EditorError::UpstreamBlocked(_) => "upstream_blocked",
            EditorError::UpstreamIncomplete(_) => "upstream_incomplete",
            EditorError::UpstreamEmpty(_) => "upstream_empty",
            EditorError::UpstreamMalformed(_) => "upstream_malformed",
            EditorError::Transport(_) => "transport",
            EditorError::LocalEncodeFailure(_) => "local_encode_failure",
            EditorError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Errors raised before anything was dispatched or deducted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            EditorError::InvalidInput(_)
                | EditorError::InsufficientCredits(_)
                | EditorError::NoSession
        )
    }
}

impl From<GatewayError> for EditorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidRequest(message) => EditorError::InvalidInput(message),
            GatewayError::Blocked(message) => EditorError::UpstreamBlocked(message),
            GatewayError::IncompleteGeneration(message) => EditorError::UpstreamIncomplete(message),
            GatewayError::NoResult(message) => EditorError::UpstreamEmpty(message),
            GatewayError::MalformedResult(message) => EditorError::UpstreamMalformed(message),
            GatewayError::Transport(message) => EditorError::Transport(message),
            GatewayError::Unavailable(message) => EditorError::Transport(message),
        }
    }
}

impl From<VoiceError> for EditorError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::PermissionDenied(message) => EditorError::PermissionDenied(message),
            VoiceError::Transcription(message) | VoiceError::Interpretation(message) => {
                EditorError::Transport(message)
            }
            VoiceError::Busy(status) => {
                EditorError::InvalidInput(format!("voice pipeline is {status}"))
            }
            VoiceError::NotListening(status) => {
                EditorError::InvalidInput(format!("voice pipeline is {status}, not listening"))
            }
        }
    }
}

/// Flattens an anyhow chain into one line, deduplicating repeated causes.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, EditorError};
    use crate::gateway::GatewayError;

    #[test]
    fn gateway_taxonomy_maps_onto_editor_errors() {
        let mapped: EditorError = GatewayError::Blocked("SAFETY".to_string()).into();
        assert_eq!(mapped.code(), "upstream_blocked");
        let mapped: EditorError = GatewayError::InvalidRequest("empty".to_string()).into();
        assert!(mapped.is_precondition());
    }

    #[test]
    fn chain_text_skips_duplicates() {
        let err = Err::<(), _>(anyhow::anyhow!("socket closed"))
            .context("socket closed")
            .context("Gemini request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: socket closed"
        );
        assert_eq!(error_chain_text(&err, 6), "Gemini…");
    }
}

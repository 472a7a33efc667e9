use serde::{Deserialize, Serialize};

use super::credits::UsageCredits;
use crate::blob::ImageBlob;
use crate::history::EditHistory;

/// Fixed key of the single persisted session.
pub const SESSION_KEY: &str = "current-session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub history: Vec<ImageBlob>,
    pub cursor_index: usize,
    pub credits: UsageCredits,
}

impl SessionRecord {
    pub fn capture(history: &EditHistory, credits: UsageCredits) -> Self {
        Self {
            id: SESSION_KEY.to_string(),
            history: history.entries().to_vec(),
            cursor_index: history.cursor(),
            credits,
        }
    }

    /// Restores history and credits, or `None` when the record is not a valid
    /// session (wrong key, empty history, cursor out of range).
    pub fn restore(self) -> Option<(EditHistory, UsageCredits)> {
        if self.id != SESSION_KEY {
            return None;
        }
        let history = EditHistory::from_parts(self.history, self.cursor_index)?;
        Some((history, self.credits))
    }
}

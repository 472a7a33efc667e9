use serde::{Deserialize, Serialize};

/// Credits granted at session start or refill.
pub const DEFAULT_CREDITS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not enough credits: {required} needed, {available} left")]
pub struct InsufficientCredits {
    pub required: u32,
    pub available: u32,
}

/// Per-session counter of billable remote operations. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageCredits(u32);

impl Default for UsageCredits {
    fn default() -> Self {
        Self(DEFAULT_CREDITS)
    }
}

impl UsageCredits {
    pub fn new(remaining: u32) -> Self {
        Self(remaining)
    }

    pub fn remaining(&self) -> u32 {
        self.0
    }

    pub fn ensure(&self, required: u32) -> Result<(), InsufficientCredits> {
        let required = required.max(1);
        if self.0 < required {
            return Err(InsufficientCredits {
                required,
                available: self.0,
            });
        }
        Ok(())
    }

    /// Checks and deducts `count` in one step; nothing is deducted on failure.
    /// The deduction happens before the billable call is dispatched, so a
    /// failed call still costs its credit.
    pub fn spend(&mut self, count: u32) -> Result<u32, InsufficientCredits> {
        self.ensure(count)?;
        self.0 = self.0.saturating_sub(count.max(1));
        Ok(self.0)
    }

    pub fn refill(&mut self, amount: u32) {
        self.0 = amount;
    }
}

mod batch;
mod credits;
mod record;
mod store;

pub use batch::{BatchItem, BatchRun, BatchStatus};
pub use credits::{InsufficientCredits, UsageCredits, DEFAULT_CREDITS};
pub use record::{SessionRecord, SESSION_KEY};
pub use store::{SessionStore, CREDITS_KEY, STORE_SCHEMA_REVISION};

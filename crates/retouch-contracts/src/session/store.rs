use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use super::credits::UsageCredits;
use super::record::{SessionRecord, SESSION_KEY};

/// Key of the credit balance, kept apart from the session record so that
/// discarding a session does not reset it.
pub const CREDITS_KEY: &str = "usage-credits";

/// Bumped whenever the on-disk shape changes; a file written under another
/// revision is wiped on open.
pub const STORE_SCHEMA_REVISION: u64 = 1;

/// JSON-file key-value store holding the persisted session record.
///
/// File layout: `{"schema_revision": 1, "records": {"current-session": {...},
/// "usage-credits": 12}}`.
/// Writes replace the whole record under its key and keep unrelated keys.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Opens the store, wiping the file when its schema revision does not match.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let store = Self { path: path.into() };
        if let Some(root) = read_json_object(&store.path) {
            let revision = root.get("schema_revision").and_then(Value::as_u64);
            if revision != Some(STORE_SCHEMA_REVISION) {
                std::fs::remove_file(&store.path).with_context(|| {
                    format!("failed to wipe stale store {}", store.path.display())
                })?;
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches the session record. `Ok(None)` when nothing is stored; an error
    /// when the file or the record cannot be read back.
    pub fn load(&self) -> anyhow::Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let root: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", self.path.display()))?;
        let Some(record) = root
            .get("records")
            .and_then(Value::as_object)
            .and_then(|records| records.get(SESSION_KEY))
        else {
            return Ok(None);
        };
        let record = serde_json::from_value::<SessionRecord>(record.clone())
            .context("stored session record is malformed")?;
        Ok(Some(record))
    }

    pub fn save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let mut records = self.records_on_disk();
        records.insert(record.id.clone(), serde_json::to_value(record)?);
        self.write_records(records)
    }

    /// Removes the session record and reports whether anything was removed.
    /// A file that is not a JSON object cannot hold a readable record and is
    /// removed outright.
    pub fn delete(&self) -> anyhow::Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let Some(root) = read_json_object(&self.path) else {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
            return Ok(true);
        };
        let mut records = root
            .get("records")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if records.remove(SESSION_KEY).is_none() {
            return Ok(false);
        }
        self.write_records(records)?;
        Ok(true)
    }

    /// Last saved credit balance; `None` when absent or unreadable.
    pub fn load_credits(&self) -> Option<UsageCredits> {
        let records = self.records_on_disk();
        serde_json::from_value(records.get(CREDITS_KEY)?.clone()).ok()
    }

    pub fn save_credits(&self, credits: UsageCredits) -> anyhow::Result<()> {
        let mut records = self.records_on_disk();
        records.insert(CREDITS_KEY.to_string(), serde_json::to_value(credits)?);
        self.write_records(records)
    }

    fn records_on_disk(&self) -> Map<String, Value> {
        read_json_object(&self.path)
            .and_then(|root| root.get("records").and_then(Value::as_object).cloned())
            .unwrap_or_default()
    }

    fn write_records(&self, records: Map<String, Value>) -> anyhow::Result<()> {
        let mut root = Map::new();
        root.insert(
            "schema_revision".to_string(),
            Value::Number(STORE_SCHEMA_REVISION.into()),
        );
        root.insert("records".to_string(), Value::Object(records));
        write_json_object(&self.path, &root)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string(&Value::Object(payload.clone()))?)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move store into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{SessionStore, CREDITS_KEY, STORE_SCHEMA_REVISION};
    use crate::blob::ImageBlob;
    use crate::history::EditHistory;
    use crate::session::{SessionRecord, UsageCredits};

    fn sample_record() -> SessionRecord {
        let mut history = EditHistory::new(ImageBlob::new(vec![1, 2], "image/png", "a.png"));
        history.append(ImageBlob::new(vec![3, 4], "image/jpeg", "b.jpg"));
        SessionRecord::capture(&history, UsageCredits::new(11))
    }

    #[test]
    fn save_then_reopen_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let record = sample_record();
        SessionStore::open(&path)?.save(&record)?;

        let reloaded = SessionStore::open(&path)?.load()?;
        assert_eq!(reloaded, Some(record));
        Ok(())
    }

    #[test]
    fn missing_file_means_no_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::open(temp.path().join("session.json"))?;
        assert_eq!(store.load()?, None);
        assert!(!store.delete()?);
        Ok(())
    }

    #[test]
    fn delete_removes_only_the_session_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "schema_revision": STORE_SCHEMA_REVISION,
                "records": {"other": {"kept": true}},
            }))?,
        )?;
        let store = SessionStore::open(&path)?;
        store.save(&sample_record())?;
        assert!(store.delete()?);
        assert!(!store.delete()?);
        assert_eq!(store.load()?, None);

        let root: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(root["records"]["other"]["kept"], json!(true));
        Ok(())
    }

    #[test]
    fn stale_revision_is_wiped_on_open() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({"schema_revision": 0, "records": {}}))?,
        )?;
        let store = SessionStore::open(&path)?;
        assert!(!path.exists());
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn malformed_record_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "schema_revision": STORE_SCHEMA_REVISION,
                "records": {"current-session": {"id": "current-session", "history": 3}},
            }))?,
        )?;
        assert!(SessionStore::open(&path)?.load().is_err());
        Ok(())
    }

    #[test]
    fn unparseable_file_is_removed_on_delete() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let store = SessionStore::open(&path)?;
        std::fs::write(&path, "{not json")?;
        assert!(store.load().is_err());

        assert!(store.delete()?);
        assert!(!path.exists());
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn credits_survive_session_delete() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let store = SessionStore::open(&path)?;
        assert_eq!(store.load_credits(), None);

        store.save(&sample_record())?;
        store.save_credits(UsageCredits::new(7))?;
        assert!(store.delete()?);
        assert_eq!(store.load()?, None);
        assert_eq!(store.load_credits(), Some(UsageCredits::new(7)));

        let root: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(root["records"][CREDITS_KEY], json!(7));
        Ok(())
    }
}

use crate::blob::ImageBlob;

/// Linear undo/redo history. `entries[0]` is the original upload and the
/// cursor always points at a valid entry. Appending from the middle of the
/// history discards the redo branch.
#[derive(Debug, Clone, PartialEq)]
pub struct EditHistory {
    entries: Vec<ImageBlob>,
    cursor: usize,
    comparing: bool,
}

impl EditHistory {
    pub fn new(original: ImageBlob) -> Self {
        Self {
            entries: vec![original],
            cursor: 0,
            comparing: false,
        }
    }

    /// Rebuilds a history from persisted parts. Returns `None` when the parts
    /// break the invariants; callers discard such records instead of repairing them.
    pub fn from_parts(entries: Vec<ImageBlob>, cursor: usize) -> Option<Self> {
        if entries.is_empty() || cursor >= entries.len() {
            return None;
        }
        Some(Self {
            entries,
            cursor,
            comparing: false,
        })
    }

    pub fn append(&mut self, image: ImageBlob) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(image);
        self.cursor = self.entries.len() - 1;
        self.comparing = false;
    }

    /// Returns whether the cursor moved.
    pub fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Returns whether the cursor moved.
    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 >= self.entries.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn reset(&mut self, image: ImageBlob) {
        *self = Self::new(image);
    }

    pub fn current(&self) -> &ImageBlob {
        &self.entries[self.cursor]
    }

    pub fn original(&self) -> &ImageBlob {
        &self.entries[0]
    }

    pub fn previous(&self) -> Option<&ImageBlob> {
        self.cursor
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
    }

    /// Image shown on the canvas: the previous state while comparing.
    pub fn displayed(&self) -> &ImageBlob {
        if self.comparing {
            self.previous().unwrap_or_else(|| self.current())
        } else {
            self.current()
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ImageBlob] {
        &self.entries
    }

    pub fn comparing(&self) -> bool {
        self.comparing
    }

    pub fn set_comparing(&mut self, comparing: bool) {
        self.comparing = comparing;
    }
}

#[cfg(test)]
mod tests {
    use super::EditHistory;
    use crate::blob::ImageBlob;

    fn blob(tag: &str) -> ImageBlob {
        ImageBlob::new(tag.as_bytes().to_vec(), "image/png", format!("{tag}.png"))
    }

    #[test]
    fn undo_and_redo_stop_at_the_ends() {
        let mut history = EditHistory::new(blob("a"));
        assert!(!history.undo());
        assert!(!history.redo());

        history.append(blob("b"));
        assert!(!history.redo());
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(history.cursor(), 0);
        assert!(history.redo());
        assert_eq!(history.cursor(), 1);
    }

    #[test]
    fn cursor_stays_in_bounds_for_mixed_sequences() {
        let mut history = EditHistory::new(blob("start"));
        let script = "aaurruuuuarrruaauurrrrr";
        for (idx, step) in script.chars().enumerate() {
            match step {
                'a' => history.append(blob(&format!("e{idx}"))),
                'u' => {
                    history.undo();
                }
                _ => {
                    history.redo();
                }
            }
            assert!(history.cursor() < history.len());
            assert!(!history.is_empty());
        }
    }

    #[test]
    fn append_after_undo_drops_the_redo_branch() {
        let mut history = EditHistory::new(blob("a"));
        let x = blob("x");
        let y = blob("y");
        history.append(x.clone());
        history.undo();
        history.append(y.clone());

        assert!(!history.redo());
        assert!(history.current().ptr_eq(&y));
        assert_eq!(history.len(), 2);
        assert!(!history.entries().iter().any(|entry| entry.ptr_eq(&x)));
    }

    #[test]
    fn redo_restores_the_same_blob() {
        let mut history = EditHistory::new(blob("a"));
        let edited = blob("b");
        history.append(edited.clone());
        history.undo();
        history.redo();
        assert!(history.current().ptr_eq(&edited));
    }

    #[test]
    fn previous_and_original_track_the_cursor() {
        let original = blob("a");
        let mut history = EditHistory::new(original.clone());
        assert!(history.previous().is_none());
        history.append(blob("b"));
        history.append(blob("c"));
        assert_eq!(history.previous().map(ImageBlob::name), Some("b.png"));
        assert!(history.original().ptr_eq(&original));
    }

    #[test]
    fn append_clears_the_compare_flag() {
        let mut history = EditHistory::new(blob("a"));
        history.append(blob("b"));
        history.set_comparing(true);
        assert_eq!(history.displayed().name(), "a.png");
        history.append(blob("c"));
        assert!(!history.comparing());
        assert_eq!(history.displayed().name(), "c.png");
    }

    #[test]
    fn reset_starts_over_with_one_entry() {
        let mut history = EditHistory::new(blob("a"));
        history.append(blob("b"));
        history.reset(blob("fresh"));
        assert_eq!(history.len(), 1);
        assert_eq!(history.cursor(), 0);
        assert_eq!(history.current().name(), "fresh.png");
    }

    #[test]
    fn from_parts_rejects_broken_state() {
        assert!(EditHistory::from_parts(Vec::new(), 0).is_none());
        assert!(EditHistory::from_parts(vec![blob("a")], 1).is_none());
        let restored = EditHistory::from_parts(vec![blob("a"), blob("b")], 1);
        assert_eq!(restored.map(|history| history.cursor()), Some(1));
    }
}

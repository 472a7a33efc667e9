use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob::ImageBlob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Done => "done",
            BatchStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Done | BatchStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub id: String,
    pub original: ImageBlob,
    pub processed: Option<ImageBlob>,
    pub status: BatchStatus,
    pub error: Option<String>,
}

impl BatchItem {
    pub fn new(original: ImageBlob) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            original,
            processed: None,
            status: BatchStatus::Pending,
            error: None,
        }
    }
}

/// Images of one batch session, processed in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchRun {
    items: Vec<BatchItem>,
}

impl BatchRun {
    pub fn new(images: Vec<ImageBlob>) -> Self {
        Self {
            items: images.into_iter().map(BatchItem::new).collect(),
        }
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == BatchStatus::Pending)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn count(&self, status: BatchStatus) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == status)
            .count()
    }

    /// True once no item is waiting or in flight.
    pub fn is_settled(&self) -> bool {
        self.items.iter().all(|item| item.status.is_terminal())
    }

    /// pending -> processing. Returns the image to process, or `None` when the
    /// item is not pending.
    pub fn start(&mut self, index: usize) -> Option<ImageBlob> {
        let item = self.items.get_mut(index)?;
        if item.status != BatchStatus::Pending {
            return None;
        }
        item.status = BatchStatus::Processing;
        Some(item.original.clone())
    }

    /// processing -> done. Ignored for items that are not in flight.
    pub fn complete(&mut self, index: usize, processed: ImageBlob) -> bool {
        let Some(item) = self.in_flight(index) else {
            return false;
        };
        item.status = BatchStatus::Done;
        item.processed = Some(processed);
        item.error = None;
        true
    }

    /// processing -> error. Ignored for items that are not in flight.
    pub fn fail(&mut self, index: usize, message: impl Into<String>) -> bool {
        let Some(item) = self.in_flight(index) else {
            return false;
        };
        item.status = BatchStatus::Error;
        item.processed = None;
        item.error = Some(message.into());
        true
    }

    /// Returns every item to pending so the batch can run with another operation.
    pub fn reset(&mut self) {
        for item in &mut self.items {
            item.status = BatchStatus::Pending;
            item.processed = None;
            item.error = None;
        }
    }

    fn in_flight(&mut self, index: usize) -> Option<&mut BatchItem> {
        self.items
            .get_mut(index)
            .filter(|item| item.status == BatchStatus::Processing)
    }
}

//! Session orchestration: credit checks, dispatch to the compositor or the
//! gateway, history updates, batch runs and persistence.

use std::path::Path;

use image::Rgba;
use retouch_contracts::commands::{split_args, ToolKind, VoiceCommand};
use retouch_contracts::events::{payload, EventWriter};
use retouch_contracts::session::{
    BatchRun, BatchStatus, SessionRecord, SessionStore, UsageCredits,
};
use retouch_contracts::{EditHistory, ImageBlob, Selection};
use serde_json::json;

use crate::compositor::{
    self, image_dimensions, parse_color, CropRect, DisplaySize, ExportFormat, Fill, ShadowSpec,
    TextOverlay,
};
use crate::error::{error_chain_text, EditorError};
use crate::gateway::{EditGateway, EditOperation};

const DEFAULT_UPSCALE_FACTOR: u8 = 2;

/// One edit, carrying exactly the parameters its handler needs.
#[derive(Debug, Clone, PartialEq)]
pub enum EditRequest {
    Remote(EditOperation),
    /// `display: None` reads `rect` in the source image's native pixels, so one
    /// request crops every batch item at its own size.
    Crop {
        rect: CropRect,
        display: Option<DisplaySize>,
    },
    Text {
        crop: Option<(CropRect, DisplaySize)>,
        overlay: TextOverlay,
    },
    Background(Fill),
}

impl EditRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            EditRequest::Remote(operation) => operation.kind(),
            EditRequest::Crop { .. } => "crop",
            EditRequest::Text { .. } => "text",
            EditRequest::Background(_) => "background",
        }
    }

    /// Remote edits cost one credit per image; local compositing is free.
    pub fn is_billable(&self) -> bool {
        matches!(self, EditRequest::Remote(_))
    }
}

/// Mutable state of one editing session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub history: Option<EditHistory>,
    pub credits: UsageCredits,
    pub tool: ToolKind,
    pub selection: Selection,
    pub reference: Option<ImageBlob>,
    pub batch: Option<BatchRun>,
    pub last_error: Option<String>,
}

impl SessionState {
    fn new(credits: UsageCredits) -> Self {
        Self {
            history: None,
            credits,
            tool: ToolKind::Retouch,
            selection: Selection::None,
            reference: None,
            batch: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub index: usize,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
}

/// What a voice command did.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceAction {
    Edited(ImageBlob),
    Moved { moved: bool },
    Download(ImageBlob),
}

pub struct SessionController {
    gateway: EditGateway,
    store: Option<SessionStore>,
    events: EventWriter,
    state: SessionState,
    starting_credits: u32,
}

impl SessionController {
    pub fn new(
        gateway: EditGateway,
        store: Option<SessionStore>,
        events: EventWriter,
        starting_credits: u32,
    ) -> Self {
        Self {
            gateway,
            store,
            events,
            state: SessionState::new(UsageCredits::new(starting_credits)),
            starting_credits,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> Option<&EditHistory> {
        self.state.history.as_ref()
    }

    pub fn credits(&self) -> u32 {
        self.state.credits.remaining()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }

    pub fn batch(&self) -> Option<&BatchRun> {
        self.state.batch.as_ref()
    }

    pub fn gateway(&self) -> &EditGateway {
        &self.gateway
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Image currently shown (the previous entry while comparing).
    pub fn displayed(&self) -> Option<&ImageBlob> {
        self.state.history.as_ref().map(EditHistory::displayed)
    }

    /// Loads the persisted session. Unreadable or invalid records are
    /// discarded and the controller starts empty.
    pub fn restore(&mut self) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let ledger = store.load_credits();
        if let Some(credits) = ledger {
            self.state.credits = credits;
        }
        let loaded = store.load();
        let record = match loaded {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(err) => {
                let reason = error_chain_text(&err, 300);
                self.storage_error("load", &reason);
                self.delete_record(&reason);
                return false;
            }
        };
        let Some((history, credits)) = record.restore() else {
            self.delete_record("record failed validation");
            return false;
        };
        self.events.note(
            "session_loaded",
            payload(json!({
                "entries": history.len(),
                "cursor": history.cursor(),
                "credits": credits.remaining(),
            })),
        );
        self.state.history = Some(history);
        if ledger.is_none() {
            self.state.credits = credits;
        }
        true
    }

    /// Starts a single-image session from `image`, replacing any history.
    pub fn upload(&mut self, image: ImageBlob) -> Result<(), EditorError> {
        if image.is_empty() {
            return Err(self.fail(EditorError::InvalidInput("image is empty".to_string())));
        }
        self.events.note(
            "image_uploaded",
            payload(json!({
                "name": image.name(),
                "mime_type": image.mime_type(),
                "bytes": image.len(),
                "digest": image.digest(),
            })),
        );
        match self.state.history.as_mut() {
            Some(history) => history.reset(image),
            None => self.state.history = Some(EditHistory::new(image)),
        }
        self.state.batch = None;
        self.state.selection = Selection::None;
        self.state.reference = None;
        self.persist();
        Ok(())
    }

    pub fn upload_path(&mut self, path: &Path) -> Result<(), EditorError> {
        let image = ImageBlob::from_path(path)
            .map_err(|err| EditorError::InvalidInput(error_chain_text(&err, 300)));
        match image {
            Ok(image) => self.upload(image),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Picking a tool clears any selection and leaves compare mode.
    pub fn select_tool(&mut self, tool: ToolKind) {
        self.state.tool = tool;
        self.state.selection = Selection::None;
        if let Some(history) = self.state.history.as_mut() {
            history.set_comparing(false);
        }
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.state.selection = selection;
    }

    pub fn set_reference(&mut self, reference: Option<ImageBlob>) {
        self.state.reference = reference;
    }

    /// Builds the request for `tool` from its free-text argument, using the
    /// current selection and reference image.
    pub fn request_for_tool(&self, tool: ToolKind, arg: &str) -> Result<EditRequest, EditorError> {
        let text = arg.trim();
        let optional = || Some(text.to_string()).filter(|value| !value.is_empty());
        let request = match tool {
            ToolKind::Retouch => EditRequest::Remote(EditOperation::Retouch {
                instruction: optional(),
                selection: self.state.selection,
                reference: self.state.reference.clone(),
            }),
            ToolKind::Erase => EditRequest::Remote(EditOperation::Erase {
                instruction: optional(),
                selection: self.state.selection,
            }),
            ToolKind::Filter => EditRequest::Remote(EditOperation::Filter {
                style: text.to_string(),
            }),
            ToolKind::Adjust => EditRequest::Remote(EditOperation::Adjust {
                instruction: text.to_string(),
            }),
            ToolKind::Colorize => EditRequest::Remote(EditOperation::Colorize),
            ToolKind::Repair => EditRequest::Remote(EditOperation::Repair),
            ToolKind::Restore => EditRequest::Remote(EditOperation::Restore),
            ToolKind::RemoveBackground => EditRequest::Remote(EditOperation::RemoveBackground),
            ToolKind::Upscale => {
                let factor = if text.is_empty() {
                    DEFAULT_UPSCALE_FACTOR
                } else {
                    text.trim_end_matches(['x', 'X'])
                        .parse::<u8>()
                        .map_err(|_| {
                            EditorError::InvalidInput(format!(
                                "upscale factor '{text}' is not a number"
                            ))
                        })?
                };
                EditRequest::Remote(EditOperation::Upscale { factor })
            }
            ToolKind::ProductScene => EditRequest::Remote(EditOperation::ProductScene {
                scene: text.to_string(),
            }),
            ToolKind::Crop => {
                let values = parse_numbers(text, 4, "crop needs x y width height")?;
                EditRequest::Crop {
                    rect: CropRect {
                        x: values[0],
                        y: values[1],
                        width: values[2],
                        height: values[3],
                    },
                    display: None,
                }
            }
            ToolKind::Text => EditRequest::Text {
                crop: None,
                overlay: caption_overlay(text),
            },
            ToolKind::Background => EditRequest::Background(parse_fill(text)?),
            ToolKind::Undo | ToolKind::Redo | ToolKind::Download | ToolKind::Unknown => {
                return Err(EditorError::InvalidInput(format!("'{tool}' is not an edit")));
            }
        };
        Ok(request)
    }

    /// Applies one edit to the current image and appends the result.
    pub fn apply(&mut self, request: EditRequest) -> Result<ImageBlob, EditorError> {
        let source = match self.current() {
            Ok(image) => image.clone(),
            Err(err) => return Err(self.fail(err)),
        };
        if let Err(err) = self.charge(&request, 1) {
            return Err(self.fail(err));
        }
        self.events.note(
            "edit_dispatched",
            payload(json!({
                "operation": request.kind(),
                "source": source.digest(),
                "billable": request.is_billable(),
            })),
        );

        match render(&self.gateway, &source, &request) {
            Ok(output) => {
                if let Some(history) = self.state.history.as_mut() {
                    history.append(output.clone());
                    self.events.note(
                        "edit_applied",
                        payload(json!({
                            "operation": request.kind(),
                            "output": output.digest(),
                            "mime_type": output.mime_type(),
                            "cursor": history.cursor(),
                            "entries": history.len(),
                        })),
                    );
                }
                self.persist();
                Ok(output)
            }
            Err(err) => {
                self.events.note(
                    "edit_failed",
                    payload(json!({
                        "operation": request.kind(),
                        "code": err.code(),
                        "message": err.to_string(),
                    })),
                );
                self.persist();
                Err(self.fail(err))
            }
        }
    }

    pub fn apply_tool(&mut self, tool: ToolKind, arg: &str) -> Result<ImageBlob, EditorError> {
        let request = match self.request_for_tool(tool, arg) {
            Ok(request) => request,
            Err(err) => return Err(self.fail(err)),
        };
        self.apply(request)
    }

    pub fn undo(&mut self) -> Result<bool, EditorError> {
        self.move_cursor(EditHistory::undo, "undo")
    }

    pub fn redo(&mut self) -> Result<bool, EditorError> {
        self.move_cursor(EditHistory::redo, "redo")
    }

    /// Toggles showing the previous entry in place of the current one.
    pub fn compare(&mut self, on: bool) -> Result<ImageBlob, EditorError> {
        let Some(history) = self.state.history.as_mut() else {
            return Err(self.fail(EditorError::NoSession));
        };
        history.set_comparing(on);
        Ok(history.displayed().clone())
    }

    /// Billable: asks the text model for up to five titles.
    pub fn suggest_titles(&mut self) -> Result<Vec<String>, EditorError> {
        let source = match self.current() {
            Ok(image) => image.clone(),
            Err(err) => return Err(self.fail(err)),
        };
        if let Err(err) = self.spend(1, "suggest_titles") {
            return Err(self.fail(err));
        }
        let result = self.gateway.suggest_titles(&source).map_err(EditorError::from);
        self.persist();
        result.map_err(|err| self.fail(err))
    }

    pub fn export(&mut self, format: ExportFormat) -> Result<ImageBlob, EditorError> {
        let result = self
            .current()
            .and_then(|image| compositor::export(image, format));
        result.map_err(|err| self.fail(err))
    }

    /// Switches to batch mode. The persisted single-image session is deleted.
    pub fn start_batch(&mut self, images: Vec<ImageBlob>) -> Result<usize, EditorError> {
        if images.is_empty() {
            return Err(self.fail(EditorError::InvalidInput(
                "batch needs at least one image".to_string(),
            )));
        }
        let run = BatchRun::new(images);
        let count = run.len();
        self.state.history = None;
        self.state.selection = Selection::None;
        self.state.batch = Some(run);
        self.delete_record("batch_started");
        self.persist_credits();
        Ok(count)
    }

    /// Applies `request` to every pending item, strictly in order. Billable
    /// runs deduct one credit per pending item up front, all or nothing.
    pub fn run_batch(&mut self, request: EditRequest) -> Result<BatchReport, EditorError> {
        let pending = match self.state.batch.as_ref() {
            Some(batch) => batch.pending_indices(),
            None => {
                return Err(self.fail(EditorError::InvalidInput(
                    "no batch loaded".to_string(),
                )))
            }
        };
        if pending.is_empty() {
            return Err(self.fail(EditorError::InvalidInput(
                "no pending items; reset the batch to run it again".to_string(),
            )));
        }
        let count = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        if let Err(err) = self.charge(&request, count) {
            return Err(self.fail(err));
        }

        let mut failures = Vec::new();
        for index in pending {
            let Some(batch) = self.state.batch.as_mut() else {
                break;
            };
            let Some(source) = batch.start(index) else {
                continue;
            };
            self.note_batch_item(index);

            let outcome = render(&self.gateway, &source, &request);
            let Some(batch) = self.state.batch.as_mut() else {
                break;
            };
            match outcome {
                Ok(output) => {
                    batch.complete(index, output);
                }
                Err(err) => {
                    let message = err.to_string();
                    batch.fail(index, message.clone());
                    let id = batch.items()[index].id.clone();
                    failures.push(BatchFailure { index, id, message });
                }
            }
            self.note_batch_item(index);
        }

        let (total, done, failed) = match self.state.batch.as_ref() {
            Some(batch) => (
                batch.len(),
                batch.count(BatchStatus::Done),
                batch.count(BatchStatus::Error),
            ),
            None => (0, 0, 0),
        };
        self.events.note(
            "batch_finished",
            payload(json!({
                "operation": request.kind(),
                "total": total,
                "done": done,
                "failed": failed,
            })),
        );
        if failed > 0 {
            self.state.last_error = Some(format!("{failed} of {total} images failed"));
        }
        Ok(BatchReport {
            total,
            done,
            failed,
            failures,
        })
    }

    pub fn reset_batch(&mut self) -> Result<(), EditorError> {
        match self.state.batch.as_mut() {
            Some(batch) => {
                batch.reset();
                Ok(())
            }
            None => Err(self.fail(EditorError::InvalidInput("no batch loaded".to_string()))),
        }
    }

    /// Carries out a spoken command: history moves, download, or the
    /// matching edit with the spoken prompt.
    pub fn apply_voice_command(
        &mut self,
        command: &VoiceCommand,
    ) -> Result<VoiceAction, EditorError> {
        match command.tool {
            ToolKind::Undo => self.undo().map(|moved| VoiceAction::Moved { moved }),
            ToolKind::Redo => self.redo().map(|moved| VoiceAction::Moved { moved }),
            ToolKind::Download => self.export(ExportFormat::Png).map(VoiceAction::Download),
            ToolKind::Unknown => Err(self.fail(EditorError::InvalidInput(format!(
                "could not match \"{}\" to a tool",
                command.transcript.trim()
            )))),
            tool => {
                self.select_tool(tool);
                self.apply_tool(tool, &command.prompt).map(VoiceAction::Edited)
            }
        }
    }

    /// Drops the current session and its persisted record. Credits carry over.
    pub fn new_session(&mut self) {
        self.state.history = None;
        self.state.batch = None;
        self.state.selection = Selection::None;
        self.state.reference = None;
        self.state.last_error = None;
        self.delete_record("new_session");
        self.persist_credits();
    }

    pub fn refill_credits(&mut self) -> u32 {
        self.state.credits.refill(self.starting_credits);
        self.note_credits("refill");
        self.persist();
        self.state.credits.remaining()
    }

    pub fn dismiss_error(&mut self) {
        self.state.last_error = None;
    }

    fn current(&self) -> Result<&ImageBlob, EditorError> {
        self.state
            .history
            .as_ref()
            .map(EditHistory::current)
            .ok_or(EditorError::NoSession)
    }

    /// Validates a billable request and deducts `count` credits before dispatch.
    fn charge(&mut self, request: &EditRequest, count: u32) -> Result<(), EditorError> {
        let EditRequest::Remote(operation) = request else {
            return Ok(());
        };
        operation.validate()?;
        self.spend(count, operation.kind())
    }

    fn spend(&mut self, count: u32, operation: &str) -> Result<(), EditorError> {
        self.state.credits.spend(count)?;
        self.note_credits(operation);
        self.persist_credits();
        Ok(())
    }

    fn move_cursor(
        &mut self,
        step: fn(&mut EditHistory) -> bool,
        direction: &str,
    ) -> Result<bool, EditorError> {
        let Some(history) = self.state.history.as_mut() else {
            return Err(self.fail(EditorError::NoSession));
        };
        let moved = step(history);
        self.events.note(
            "history_moved",
            payload(json!({
                "direction": direction,
                "moved": moved,
                "cursor": history.cursor(),
            })),
        );
        if moved {
            self.persist();
        }
        Ok(moved)
    }

    fn fail(&mut self, err: EditorError) -> EditorError {
        self.state.last_error = Some(err.to_string());
        err
    }

    /// Mirrors history and credits to the store. Failures are logged only.
    /// Mirrors credits on their own, so they outlive the session record.
    fn persist_credits(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(err) = store.save_credits(self.state.credits) {
            self.storage_error("save_credits", &error_chain_text(&err, 300));
        }
    }

    fn persist(&self) {
        self.persist_credits();
        let (Some(store), Some(history)) = (self.store.as_ref(), self.state.history.as_ref())
        else {
            return;
        };
        let record = SessionRecord::capture(history, self.state.credits);
        if let Err(err) = store.save(&record) {
            self.storage_error("save", &error_chain_text(&err, 300));
        }
    }

    fn delete_record(&self, reason: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.delete() {
            Ok(true) => self
                .events
                .note("session_discarded", payload(json!({ "reason": reason }))),
            Ok(false) => {}
            Err(err) => self.storage_error("delete", &error_chain_text(&err, 300)),
        }
    }

    fn storage_error(&self, action: &str, message: &str) {
        self.events.note(
            "storage_error",
            payload(json!({
                "action": action,
                "error": EditorError::StorageFailure(message.to_string()).to_string(),
            })),
        );
    }

    fn note_credits(&self, operation: &str) {
        self.events.note(
            "credits_updated",
            payload(json!({
                "operation": operation,
                "remaining": self.state.credits.remaining(),
            })),
        );
    }

    fn note_batch_item(&self, index: usize) {
        let Some(item) = self
            .state
            .batch
            .as_ref()
            .and_then(|batch| batch.items().get(index))
        else {
            return;
        };
        self.events.note(
            "batch_item_updated",
            payload(json!({
                "index": index,
                "id": item.id,
                "status": item.status.as_str(),
                "error": item.error,
            })),
        );
    }
}

/// Produces the edited image for one request.
fn render(
    gateway: &EditGateway,
    source: &ImageBlob,
    request: &EditRequest,
) -> Result<ImageBlob, EditorError> {
    match request {
        EditRequest::Remote(operation) => {
            gateway.apply(source, operation).map_err(EditorError::from)
        }
        EditRequest::Crop { rect, display } => {
            let display = match display {
                Some(display) => *display,
                None => native_display(source)?,
            };
            compositor::crop(source, *rect, display)
        }
        EditRequest::Text { crop, overlay } => compositor::composite_text(source, *crop, overlay),
        EditRequest::Background(fill) => compositor::composite_background(source, fill),
    }
}

fn native_display(image: &ImageBlob) -> Result<DisplaySize, EditorError> {
    let (width, height) = image_dimensions(image).ok_or_else(|| {
        EditorError::LocalEncodeFailure(format!("cannot read the size of {}", image.name()))
    })?;
    Ok(DisplaySize {
        width: f64::from(width),
        height: f64::from(height),
    })
}

fn parse_numbers(text: &str, count: usize, usage: &str) -> Result<Vec<f64>, EditorError> {
    let values: Vec<f64> = split_args(text)
        .iter()
        .map(|value| value.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| EditorError::InvalidInput(usage.to_string()))?;
    if values.len() != count {
        return Err(EditorError::InvalidInput(usage.to_string()));
    }
    Ok(values)
}

/// White caption near the bottom with a black outline.
fn caption_overlay(text: &str) -> TextOverlay {
    TextOverlay {
        text: text.to_string(),
        position_pct: (50.0, 85.0),
        font: "sans-serif".to_string(),
        color: Rgba([255, 255, 255, 255]),
        shadow: ShadowSpec::Outline {
            color: Rgba([0, 0, 0, 255]),
        },
        font_size_pct: 6.0,
    }
}

fn parse_fill(text: &str) -> Result<Fill, EditorError> {
    if text.is_empty() {
        return Err(EditorError::InvalidInput(
            "background needs a colour or an image path".to_string(),
        ));
    }
    if let Some(color) = parse_color(text) {
        return Ok(Fill::Color(color));
    }
    let path = split_args(text).into_iter().next().unwrap_or_default();
    ImageBlob::from_path(Path::new(&path))
        .map(Fill::Image)
        .map_err(|err| EditorError::InvalidInput(error_chain_text(&err, 300)))
}

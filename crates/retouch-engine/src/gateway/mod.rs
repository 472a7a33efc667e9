//! Remote edit gateway: turns one requested operation into exactly one
//! provider request and normalises the reply into an image, a title list or a
//! typed error. No retries happen here; the caller decides whether to resubmit.

mod dryrun;
mod gemini;
mod prompts;

use std::collections::BTreeMap;

use retouch_contracts::blob::extension_for_mime;
use retouch_contracts::events::{payload, EventWriter};
use retouch_contracts::models::{Capability, ModelSelector};
use retouch_contracts::{ImageBlob, Selection};
use serde_json::{json, Map, Value};

use crate::compositor::image_dimensions;
use crate::error::error_chain_text;

pub use dryrun::DryrunProvider;
pub use gemini::{GeminiProvider, DEFAULT_GEMINI_API_BASE};

/// Most titles returned by [`EditGateway::suggest_titles`].
pub const MAX_TITLES: usize = 5;

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("request was blocked ({0}); try a different instruction")]
    Blocked(String),
    #[error("generation stopped before finishing ({0}); you can try again")]
    IncompleteGeneration(String),
    #[error("the model returned no result: {0}")]
    NoResult(String),
    #[error("the model answer could not be read: {0}")]
    MalformedResult(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Unavailable(String),
}

/// One remote operation with exactly the parameters it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOperation {
    Retouch {
        instruction: Option<String>,
        selection: Selection,
        reference: Option<ImageBlob>,
    },
    Erase {
        instruction: Option<String>,
        selection: Selection,
    },
    Filter {
        style: String,
    },
    Adjust {
        instruction: String,
    },
    Colorize,
    Repair,
    /// Colorize and repair in one pass.
    Restore,
    Upscale {
        factor: u8,
    },
    RemoveBackground,
    ProductScene {
        scene: String,
    },
}

impl EditOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            EditOperation::Retouch { .. } => "retouch",
            EditOperation::Erase { .. } => "erase",
            EditOperation::Filter { .. } => "filter",
            EditOperation::Adjust { .. } => "adjust",
            EditOperation::Colorize => "colorize",
            EditOperation::Repair => "repair",
            EditOperation::Restore => "restore",
            EditOperation::Upscale { .. } => "upscale",
            EditOperation::RemoveBackground => "remove_background",
            EditOperation::ProductScene { .. } => "product_scene",
        }
    }

    /// Rejects inputs that cannot produce a meaningful request.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self {
            EditOperation::Retouch {
                instruction,
                reference,
                ..
            } => {
                if is_blank(instruction.as_deref()) && reference.is_none() {
                    return Err(GatewayError::InvalidRequest(
                        "describe the retouch or provide a reference image".to_string(),
                    ));
                }
            }
            EditOperation::Erase {
                instruction,
                selection,
            } => {
                if is_blank(instruction.as_deref()) && selection.is_none() {
                    return Err(GatewayError::InvalidRequest(
                        "select an area or describe what to erase".to_string(),
                    ));
                }
            }
            EditOperation::Filter { style } => require_text(style, "filter style")?,
            EditOperation::Adjust { instruction } => require_text(instruction, "adjustment")?,
            EditOperation::ProductScene { scene } => require_text(scene, "scene description")?,
            EditOperation::Upscale { factor } => {
                if !(2..=4).contains(factor) {
                    return Err(GatewayError::InvalidRequest(format!(
                        "upscale factor must be 2, 3 or 4 (got {factor})"
                    )));
                }
            }
            EditOperation::Colorize
            | EditOperation::Repair
            | EditOperation::Restore
            | EditOperation::RemoveBackground => {}
        }
        Ok(())
    }

    fn selection(&self) -> Selection {
        match self {
            EditOperation::Retouch { selection, .. } | EditOperation::Erase { selection, .. } => {
                *selection
            }
            _ => Selection::None,
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}

fn require_text(value: &str, label: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(format!("{label} is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Image,
    /// Text answer; `json` asks the provider for a JSON-only response.
    Text { json: bool },
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    /// Operation label, for logs and offline providers.
    pub kind: String,
    pub images: Vec<ImageBlob>,
    pub instruction: String,
    pub reply: ReplyKind,
    pub options: Map<String, Value>,
}

/// Raw provider answer before normalisation.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub images: Vec<ImageBlob>,
    pub text: Option<String>,
    pub block_reason: Option<String>,
    pub finish_reason: Option<String>,
    pub warnings: Vec<String>,
}

pub trait EditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ProviderRequest) -> anyhow::Result<ProviderReply>;
}

#[derive(Default)]
pub struct EditProviderRegistry {
    providers: BTreeMap<String, Box<dyn EditProvider>>,
}

impl EditProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: EditProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn EditProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Registry with the offline provider and Gemini.
pub fn default_provider_registry(
    gemini_api_base: Option<String>,
    gemini_api_key: Option<String>,
) -> EditProviderRegistry {
    let mut providers = EditProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(gemini_api_base, gemini_api_key));
    providers
}

pub struct EditGateway {
    providers: EditProviderRegistry,
    selector: ModelSelector,
    image_model: Option<String>,
    text_model: Option<String>,
    options: Map<String, Value>,
    events: EventWriter,
}

impl EditGateway {
    pub fn new(
        providers: EditProviderRegistry,
        image_model: Option<String>,
        text_model: Option<String>,
        events: EventWriter,
    ) -> Self {
        Self {
            providers,
            selector: ModelSelector::default(),
            image_model,
            text_model,
            options: Map::new(),
            events,
        }
    }

    /// Provider options forwarded with every request (timeouts, retries).
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn image_model(&self) -> Option<&str> {
        self.image_model.as_deref()
    }

    pub fn text_model(&self) -> Option<&str> {
        self.text_model.as_deref()
    }

    /// Provider that will serve `capability` with the current model choice.
    pub fn provider_name(&self, capability: Capability) -> Option<String> {
        let requested = match capability {
            Capability::ImageEdit => self.image_model.as_deref(),
            Capability::Text => self.text_model.as_deref(),
        };
        self.selector
            .select(requested, capability)
            .ok()
            .map(|selection| selection.model.provider)
    }

    pub fn apply(
        &self,
        image: &ImageBlob,
        operation: &EditOperation,
    ) -> Result<ImageBlob, GatewayError> {
        operation.validate()?;

        let selection = operation.selection();
        let geometry = if selection.is_none() {
            None
        } else {
            let native = image_dimensions(image);
            let geometry = selection.to_percent(native);
            if geometry.is_none() {
                self.warn(
                    operation.kind(),
                    "image size unknown; selection dropped and the edit applies to the whole image",
                );
            }
            geometry
        };

        let mut images = vec![image.clone()];
        if let EditOperation::Retouch {
            reference: Some(reference),
            ..
        } = operation
        {
            images.push(reference.clone());
        }
        let instruction = prompts::edit_instruction(operation, geometry.as_ref());
        let reply = self.dispatch(
            Capability::ImageEdit,
            operation.kind(),
            images,
            instruction,
            ReplyKind::Image,
        )?;
        let output = normalize_image_reply(reply)?;
        let ext = extension_for_mime(output.mime_type());
        Ok(output.renamed(output_name(image.name(), operation.kind(), ext)))
    }

    pub fn suggest_titles(&self, image: &ImageBlob) -> Result<Vec<String>, GatewayError> {
        let reply = self.dispatch(
            Capability::Text,
            "suggest_titles",
            vec![image.clone()],
            prompts::title_instruction(MAX_TITLES),
            ReplyKind::Text { json: true },
        )?;
        let text = normalize_text_reply(reply)?;
        parse_titles(&text)
    }

    /// Free-form text completion on the text model.
    pub fn complete_text(
        &self,
        kind: &str,
        instruction: String,
        json: bool,
    ) -> Result<String, GatewayError> {
        let reply = self.dispatch(
            Capability::Text,
            kind,
            Vec::new(),
            instruction,
            ReplyKind::Text { json },
        )?;
        normalize_text_reply(reply)
    }

    fn dispatch(
        &self,
        capability: Capability,
        kind: &str,
        images: Vec<ImageBlob>,
        instruction: String,
        reply: ReplyKind,
    ) -> Result<ProviderReply, GatewayError> {
        let requested = match capability {
            Capability::ImageEdit => self.image_model.as_deref(),
            Capability::Text => self.text_model.as_deref(),
        };
        let selection = self
            .selector
            .select(requested, capability)
            .map_err(GatewayError::Unavailable)?;
        if let Some(reason) = selection.fallback_reason.as_deref() {
            if selection.requested.is_some() {
                self.warn(kind, reason);
            }
        }
        let provider = self.providers.get(&selection.model.provider).ok_or_else(|| {
            GatewayError::Unavailable(format!(
                "provider '{}' is not registered (known: {})",
                selection.model.provider,
                self.providers.names().join(", ")
            ))
        })?;

        let request = ProviderRequest {
            model: selection.model.name.clone(),
            kind: kind.to_string(),
            images,
            instruction,
            reply,
            options: self.options.clone(),
        };
        let reply = provider
            .generate(&request)
            .map_err(|err| GatewayError::Transport(error_chain_text(&err, 600)))?;
        for warning in &reply.warnings {
            self.warn(kind, warning);
        }
        Ok(reply)
    }

    fn warn(&self, kind: &str, message: &str) {
        self.events.note(
            "gateway_warning",
            payload(json!({
                "operation": kind,
                "message": message,
            })),
        );
    }
}

fn normalize_image_reply(reply: ProviderReply) -> Result<ImageBlob, GatewayError> {
    if let Some(reason) = reply.block_reason {
        return Err(GatewayError::Blocked(reason));
    }
    if let Some(image) = reply
        .images
        .into_iter()
        .find(|image| !image.is_empty() && image.mime_type().starts_with("image/"))
    {
        return Ok(image);
    }
    finish_failure(reply.finish_reason.as_deref())?;
    let detail = reply
        .text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| format!("model answered with text instead of an image: {text}"))
        .unwrap_or_else(|| "model returned no image".to_string());
    Err(GatewayError::NoResult(detail))
}

fn normalize_text_reply(reply: ProviderReply) -> Result<String, GatewayError> {
    if let Some(reason) = reply.block_reason {
        return Err(GatewayError::Blocked(reason));
    }
    if let Some(text) = reply
        .text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
    {
        return Ok(text);
    }
    finish_failure(reply.finish_reason.as_deref())?;
    Err(GatewayError::NoResult("model returned no text".to_string()))
}

/// Maps a non-`STOP` finish reason to its error.
fn finish_failure(finish_reason: Option<&str>) -> Result<(), GatewayError> {
    let Some(reason) = finish_reason.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(());
    };
    let upper = reason.to_ascii_uppercase();
    if upper == "STOP" || upper == "FINISH_REASON_UNSPECIFIED" {
        return Ok(());
    }
    if SAFETY_FINISH_REASONS.contains(&upper.as_str()) {
        return Err(GatewayError::Blocked(upper));
    }
    Err(GatewayError::IncompleteGeneration(upper))
}

/// Accepts a JSON string array (optionally fenced or wrapped as `{"titles": [...]}`).
fn parse_titles(text: &str) -> Result<Vec<String>, GatewayError> {
    let body = strip_code_fence(text);
    let parsed = serde_json::from_str::<Value>(body)
        .or_else(|_| {
            let start = body.find('[').ok_or(())?;
            let end = body.rfind(']').ok_or(())?;
            if end <= start {
                return Err(());
            }
            serde_json::from_str(&body[start..=end]).map_err(|_| ())
        })
        .map_err(|_| GatewayError::MalformedResult("titles are not a JSON list".to_string()))?;
    let rows = match &parsed {
        Value::Array(rows) => rows,
        Value::Object(map) => map
            .get("titles")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::MalformedResult("missing 'titles' list".to_string()))?,
        _ => {
            return Err(GatewayError::MalformedResult(
                "titles are not a JSON list".to_string(),
            ))
        }
    };
    let mut titles = Vec::new();
    for row in rows {
        let Some(title) = row.as_str() else {
            return Err(GatewayError::MalformedResult(
                "title entries must be strings".to_string(),
            ));
        };
        let title = title.trim();
        if !title.is_empty() && !titles.iter().any(|existing: &String| existing == title) {
            titles.push(title.to_string());
        }
    }
    titles.truncate(MAX_TITLES);
    if titles.is_empty() {
        return Err(GatewayError::NoResult("no titles suggested".to_string()));
    }
    Ok(titles)
}

pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|ch: char| ch.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn output_name(source: &str, kind: &str, ext: &str) -> String {
    let stem = source
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(source);
    format!("{stem}-{kind}.{ext}")
}

#[cfg(test)]
mod tests {
    use retouch_contracts::events::EventWriter;
    use retouch_contracts::{Hotspot, ImageBlob, Selection};
    use serde_json::Value;

    use super::*;
    use crate::testing::{png, ScriptedProvider};

    fn gateway_with(provider: ScriptedProvider) -> EditGateway {
        let mut providers = EditProviderRegistry::new();
        providers.register(provider);
        EditGateway::new(
            providers,
            Some("dryrun-image-1".to_string()),
            Some("dryrun-text-1".to_string()),
            EventWriter::discard("test"),
        )
    }

    #[test]
    fn image_reply_becomes_a_named_blob() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_image(png(8, 8, [1, 2, 3, 255]));
        let gateway = gateway_with(provider.clone());

        let source = png(8, 8, [0, 0, 0, 255]).renamed("photo.png");
        let out = gateway.apply(
            &source,
            &EditOperation::Filter {
                style: "Sepia".to_string(),
            },
        )?;
        assert_eq!(out.mime_type(), "image/png");
        assert_eq!(out.name(), "photo-filter.png");
        assert!(!out.is_empty());

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, "filter");
        assert!(requests[0].instruction.contains("Sepia"));
        Ok(())
    }

    #[test]
    fn hotspot_is_sent_as_percentages() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_image(png(4, 4, [0, 0, 0, 255]));
        let gateway = gateway_with(provider.clone());

        let source = png(200, 100, [0, 0, 0, 255]);
        gateway.apply(
            &source,
            &EditOperation::Retouch {
                instruction: Some("remove the mole".to_string()),
                selection: Selection::Hotspot(Hotspot {
                    x: 50.0,
                    y: 50.0,
                    radius_px: 10.0,
                }),
                reference: None,
            },
        )?;
        let instruction = provider.requests()[0].instruction.clone();
        assert!(instruction.contains("25.0% from the left"));
        assert!(instruction.contains("50.0% from the top"));
        assert!(!instruction.contains("50px"));
        Ok(())
    }

    #[test]
    fn unknown_dimensions_degrade_to_a_global_edit() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_image(png(4, 4, [0, 0, 0, 255]));
        let gateway = gateway_with(provider.clone());

        let opaque = ImageBlob::new(vec![7; 32], "image/heic", "photo.heic");
        gateway.apply(
            &opaque,
            &EditOperation::Erase {
                instruction: None,
                selection: Selection::Hotspot(Hotspot {
                    x: 1.0,
                    y: 1.0,
                    radius_px: 1.0,
                }),
            },
        )?;
        assert!(!provider.requests()[0].instruction.contains("% from the left"));
        Ok(())
    }

    #[test]
    fn reference_image_travels_as_second_image() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_image(png(4, 4, [0, 0, 0, 255]));
        let gateway = gateway_with(provider.clone());
        gateway.apply(
            &png(4, 4, [0, 0, 0, 255]),
            &EditOperation::Retouch {
                instruction: None,
                selection: Selection::None,
                reference: Some(png(2, 2, [9, 9, 9, 255])),
            },
        )?;
        assert_eq!(provider.requests()[0].images.len(), 2);
        Ok(())
    }

    #[test]
    fn invalid_requests_never_reach_the_provider() {
        let provider = ScriptedProvider::new();
        let gateway = gateway_with(provider.clone());
        let image = png(4, 4, [0, 0, 0, 255]);
        for operation in [
            EditOperation::Filter {
                style: "  ".to_string(),
            },
            EditOperation::Erase {
                instruction: None,
                selection: Selection::None,
            },
            EditOperation::Upscale { factor: 8 },
        ] {
            assert!(matches!(
                gateway.apply(&image, &operation),
                Err(GatewayError::InvalidRequest(_))
            ));
        }
        assert!(provider.requests().is_empty());
    }

    #[test]
    fn failure_taxonomy() {
        let blocked = ProviderReply {
            block_reason: Some("SAFETY".to_string()),
            ..ProviderReply::default()
        };
        assert!(matches!(normalize_image_reply(blocked), Err(GatewayError::Blocked(_))));

        let unsafe_finish = ProviderReply {
            finish_reason: Some("IMAGE_SAFETY".to_string()),
            ..ProviderReply::default()
        };
        assert!(matches!(
            normalize_image_reply(unsafe_finish),
            Err(GatewayError::Blocked(_))
        ));

        let cut_off = ProviderReply {
            finish_reason: Some("MAX_TOKENS".to_string()),
            ..ProviderReply::default()
        };
        assert_eq!(
            normalize_image_reply(cut_off).err(),
            Some(GatewayError::IncompleteGeneration("MAX_TOKENS".to_string()))
        );

        let chatty = ProviderReply {
            text: Some("I cannot edit faces".to_string()),
            finish_reason: Some("STOP".to_string()),
            ..ProviderReply::default()
        };
        let Err(GatewayError::NoResult(message)) = normalize_image_reply(chatty) else {
            panic!("expected NoResult");
        };
        assert!(message.contains("I cannot edit faces"));
    }

    #[test]
    fn transport_errors_are_typed() {
        let provider = ScriptedProvider::new();
        provider.push_error("connection reset");
        let gateway = gateway_with(provider);
        let result = gateway.apply(&png(4, 4, [0, 0, 0, 255]), &EditOperation::Colorize);
        assert_eq!(
            result.err(),
            Some(GatewayError::Transport("connection reset".to_string()))
        );
    }

    #[test]
    fn titles_parse_from_fenced_json() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_text(
            "```json\n[\"Golden Hour\", \"Golden Hour\", \" Quiet Harbor \", \"A\", \"B\", \"C\", \"D\"]\n```",
        );
        let gateway = gateway_with(provider.clone());
        let titles = gateway.suggest_titles(&png(4, 4, [0, 0, 0, 255]))?;
        assert_eq!(titles, vec!["Golden Hour", "Quiet Harbor", "A", "B", "C"]);
        assert_eq!(
            provider.requests()[0].reply,
            ReplyKind::Text { json: true }
        );
        Ok(())
    }

    #[test]
    fn malformed_titles_are_reported() {
        assert!(matches!(
            parse_titles("Golden Hour, Quiet Harbor"),
            Err(GatewayError::MalformedResult(_))
        ));
        assert!(matches!(
            parse_titles("[1, 2]"),
            Err(GatewayError::MalformedResult(_))
        ));
        assert_eq!(
            parse_titles("{\"titles\": [\"Dusk\"]}"),
            Ok(vec!["Dusk".to_string()])
        );
        assert!(matches!(parse_titles("[]"), Err(GatewayError::NoResult(_))));
    }

    #[test]
    fn unregistered_provider_is_unavailable() {
        let gateway = EditGateway::new(
            EditProviderRegistry::new(),
            None,
            None,
            EventWriter::discard("test"),
        );
        let result = gateway.apply(&png(4, 4, [0, 0, 0, 255]), &EditOperation::Repair);
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[test]
    fn options_are_forwarded() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new();
        provider.push_image(png(4, 4, [0, 0, 0, 255]));
        let mut options = Map::new();
        options.insert("request_timeout".to_string(), Value::from(30));
        let gateway = gateway_with(provider.clone()).with_options(options);
        gateway.apply(&png(4, 4, [0, 0, 0, 255]), &EditOperation::Upscale { factor: 2 })?;
        assert_eq!(
            provider.requests()[0].options.get("request_timeout"),
            Some(&Value::from(30))
        );
        Ok(())
    }
}

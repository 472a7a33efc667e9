use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use retouch_contracts::ImageBlob;
use serde_json::{json, Map, Value};

use super::{EditProvider, ProviderReply, ProviderRequest, ReplyKind};
use crate::http::{response_json_or_error, value_as_f64};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_base: Option<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &ProviderRequest) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": BASE64.encode(image.bytes()),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.instruction }));

        let mut generation_config = Map::new();
        generation_config.insert("candidateCount".to_string(), Value::from(1));
        match request.reply {
            ReplyKind::Image => {
                generation_config.insert(
                    "responseModalities".to_string(),
                    json!(["IMAGE", "TEXT"]),
                );
            }
            ReplyKind::Text { json } => {
                generation_config.insert("responseModalities".to_string(), json!(["TEXT"]));
                if json {
                    generation_config.insert(
                        "responseMimeType".to_string(),
                        Value::String("application/json".to_string()),
                    );
                }
            }
        }

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        if let Some(safety_settings) = request
            .options
            .get("safety_settings")
            .and_then(Value::as_array)
        {
            payload.insert(
                "safetySettings".to_string(),
                Value::Array(safety_settings.clone()),
            );
        }
        Value::Object(payload)
    }

    fn request_timeout_seconds(request: &ProviderRequest) -> f64 {
        value_as_f64(request.options.get("request_timeout"), 90.0, 15.0, 300.0)
    }

    /// Sends the request exactly once. A timeout may already have reached the
    /// upstream, so transport failures are reported, never re-sent.
    fn post_once(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        timeout_s: f64,
    ) -> Result<HttpResponse> {
        self.http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs_f64(timeout_s))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))
    }

    /// Reads the first candidate's image and text parts plus the block and
    /// finish reasons.
    fn parse_reply(response_payload: &Value) -> Result<ProviderReply> {
        let mut reply = ProviderReply {
            block_reason: response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ..ProviderReply::default()
        };
        let Some(candidate) = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
        else {
            return Ok(reply);
        };
        reply.finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(str::to_string);

        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut texts = Vec::new();
        for part in parts {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text.to_string());
                continue;
            }
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            reply
                .images
                .push(ImageBlob::new(bytes, mime_type, "gemini-output"));
        }
        if !texts.is_empty() {
            reply.text = Some(texts.join("\n"));
        }
        Ok(reply)
    }
}

impl EditProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self.post_once(
            &endpoint,
            api_key,
            &payload,
            Self::request_timeout_seconds(request),
        )?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::parse_reply(&response_payload)
    }
}

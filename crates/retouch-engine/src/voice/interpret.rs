use anyhow::{bail, Context, Result};
use retouch_contracts::commands::{ToolKind, VOICE_TOOLS};
use serde_json::Value;

use super::{IntentInterpreter, RawIntent};
use crate::gateway::{strip_code_fence, EditGateway};

/// Asks the gateway's text model to map a transcript onto a tool.
pub struct GatewayIntentInterpreter {
    gateway: EditGateway,
}

impl GatewayIntentInterpreter {
    pub fn new(gateway: EditGateway) -> Self {
        Self { gateway }
    }
}

impl IntentInterpreter for GatewayIntentInterpreter {
    fn interpret(&self, transcript: &str) -> Result<RawIntent> {
        let text = self
            .gateway
            .complete_text("interpret_voice", intent_instruction(transcript), true)
            .context("intent request failed")?;
        parse_intent(&text)
    }
}

fn intent_instruction(transcript: &str) -> String {
    format!(
        "You map spoken photo-editing requests to one tool.\n\
Tools: {}.\n\
Answer with a JSON object {{\"tool\": <tool>, \"prompt\": <what to do, in the user's words>}}.\n\
Use \"unknown\" when no tool fits.\n\
Request: {transcript}",
        VOICE_TOOLS.join(", ")
    )
}

fn parse_intent(text: &str) -> Result<RawIntent> {
    let parsed: Value = serde_json::from_str(strip_code_fence(text))
        .with_context(|| format!("intent is not JSON: {text}"))?;
    let Some(tool) = parsed.get("tool").and_then(Value::as_str) else {
        bail!("intent has no tool");
    };
    let prompt = parsed
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(RawIntent {
        tool: tool.to_string(),
        prompt: prompt.to_string(),
    })
}

/// Offline interpreter: the first tool name or alias spoken wins and the
/// remaining words become the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordInterpreter;

impl IntentInterpreter for KeywordInterpreter {
    fn interpret(&self, transcript: &str) -> Result<RawIntent> {
        let words: Vec<String> = transcript
            .split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut best: Option<(usize, usize, ToolKind)> = None;
        let candidates = ToolKind::all()
            .filter(|tool| tool.is_voice_tool() && *tool != ToolKind::Unknown);
        for tool in candidates {
            for keyword in tool.keywords() {
                let parts: Vec<&str> = keyword.split('_').collect();
                let Some(pos) = words
                    .windows(parts.len())
                    .position(|window| window.iter().zip(&parts).all(|(a, b)| a == b))
                else {
                    continue;
                };
                let better = match best {
                    None => true,
                    Some((best_pos, best_len, _)) => {
                        pos < best_pos || (pos == best_pos && parts.len() > best_len)
                    }
                };
                if better {
                    best = Some((pos, parts.len(), tool));
                }
            }
        }

        let Some((pos, len, tool)) = best else {
            return Ok(RawIntent {
                tool: ToolKind::Unknown.as_str().to_string(),
                prompt: transcript.trim().to_string(),
            });
        };
        let rest: Vec<&str> = words
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx < pos || *idx >= pos + len)
            .map(|(_, word)| word.as_str())
            .collect();
        Ok(RawIntent {
            tool: tool.as_str().to_string(),
            prompt: rest.join(" "),
        })
    }
}

use anyhow::{Context, Result};
use image::Rgba;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{EditProvider, ProviderReply, ProviderRequest, ReplyKind, MAX_TITLES};
use crate::compositor::{decode, encode_png};

const TITLE_WORDS: &[&str] = &[
    "Golden", "Quiet", "Harbor", "Morning", "Echo", "Velvet", "Drift", "Ember", "Static",
    "Meadow", "Signal", "Hollow", "Lantern", "Tide", "Paper", "Orbit",
];

/// Offline provider: tints the first input with a colour derived from the
/// instruction and answers text requests with deterministic canned replies.
pub struct DryrunProvider;

impl EditProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply> {
        match request.reply {
            ReplyKind::Image => {
                let source = request
                    .images
                    .first()
                    .context("dryrun edit needs an input image")?;
                let mut pixels = decode(source).context("dryrun could not decode input")?;
                let (r, g, b) = color_from_prompt(&request.instruction);
                for pixel in pixels.pixels_mut() {
                    *pixel = tint(*pixel, [r, g, b]);
                }
                let blob = encode_png(&pixels, "dryrun-output.png".to_string())
                    .context("dryrun could not encode output")?;
                Ok(ProviderReply {
                    images: vec![blob],
                    finish_reason: Some("STOP".to_string()),
                    ..ProviderReply::default()
                })
            }
            ReplyKind::Text { .. } => {
                let text = if request.kind == "suggest_titles" {
                    let seed = request
                        .images
                        .first()
                        .map(|image| image.digest())
                        .unwrap_or_default();
                    Value::from(canned_titles(&seed)).to_string()
                } else {
                    request
                        .instruction
                        .lines()
                        .last()
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                };
                Ok(ProviderReply {
                    text: Some(text),
                    finish_reason: Some("STOP".to_string()),
                    ..ProviderReply::default()
                })
            }
        }
    }
}

fn tint(pixel: Rgba<u8>, color: [u8; 3]) -> Rgba<u8> {
    let Rgba([r, g, b, a]) = pixel;
    let mix = |base: u8, over: u8| ((u16::from(base) * 3 + u16::from(over)) / 4) as u8;
    Rgba([mix(r, color[0]), mix(g, color[1]), mix(b, color[2]), a])
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn canned_titles(seed: &str) -> Vec<String> {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    (0..MAX_TITLES)
        .map(|idx| {
            let first = TITLE_WORDS[usize::from(digest[idx * 2]) % TITLE_WORDS.len()];
            let second = TITLE_WORDS[usize::from(digest[idx * 2 + 1]) % TITLE_WORDS.len()];
            format!("{first} {second} {}", idx + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::{color_from_prompt, DryrunProvider};
    use crate::compositor::decode;
    use crate::gateway::{EditProvider, ProviderRequest, ReplyKind};
    use crate::testing::png;

    fn request(kind: &str, instruction: &str, reply: ReplyKind) -> ProviderRequest {
        ProviderRequest {
            model: "dryrun-image-1".to_string(),
            kind: kind.to_string(),
            images: vec![png(4, 4, [200, 200, 200, 255])],
            instruction: instruction.to_string(),
            reply,
            options: Map::new(),
        }
    }

    #[test]
    fn edits_are_deterministic_per_instruction() -> anyhow::Result<()> {
        let provider = DryrunProvider;
        let first = provider.generate(&request("filter", "Sepia", ReplyKind::Image))?;
        let again = provider.generate(&request("filter", "Sepia", ReplyKind::Image))?;
        let other = provider.generate(&request("filter", "Noir", ReplyKind::Image))?;
        assert_eq!(first.images[0].bytes(), again.images[0].bytes());
        assert_ne!(color_from_prompt("Sepia"), color_from_prompt("Noir"));
        assert_ne!(first.images[0].bytes(), other.images[0].bytes());

        let pixels = decode(&first.images[0])?;
        assert_eq!(pixels.dimensions(), (4, 4));
        assert_eq!(pixels.get_pixel(0, 0)[3], 255);
        Ok(())
    }

    #[test]
    fn titles_are_a_json_list() -> anyhow::Result<()> {
        let reply = DryrunProvider.generate(&request(
            "suggest_titles",
            "Suggest titles",
            ReplyKind::Text { json: true },
        ))?;
        let titles: Vec<String> = serde_json::from_str(reply.text.as_deref().unwrap_or("[]"))?;
        assert_eq!(titles.len(), 5);
        Ok(())
    }
}

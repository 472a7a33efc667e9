use retouch_contracts::PercentGeometry;

use super::EditOperation;

const PRESERVE: &str = "Keep everything else in the photo unchanged: framing, identity, lighting and resolution.";

/// Builds the single instruction sent with an image edit.
pub(super) fn edit_instruction(
    operation: &EditOperation,
    geometry: Option<&PercentGeometry>,
) -> String {
    let area = geometry.map(|geometry| format!(" Limit the change to {}.", geometry.describe()));
    let area = area.as_deref().unwrap_or_default();
    match operation {
        EditOperation::Retouch {
            instruction,
            reference,
            ..
        } => {
            let mut out = String::from("Retouch this photo.");
            if let Some(text) = instruction.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                out.push_str(&format!(" Instruction: {text}."));
            }
            if reference.is_some() {
                out.push_str(
                    " The second image is a reference; match its look where the instruction allows.",
                );
            }
            out.push_str(area);
            out.push(' ');
            out.push_str(PRESERVE);
            out
        }
        EditOperation::Erase { instruction, .. } => {
            let target = instruction
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|text| format!("Remove {text} from this photo"))
                .unwrap_or_else(|| "Remove the object in the marked area".to_string());
            format!(
                "{target} and fill the space so it blends naturally with its surroundings.{area} {PRESERVE}"
            )
        }
        EditOperation::Filter { style } => format!(
            "Apply a {} photo filter to the whole image. {PRESERVE}",
            style.trim()
        ),
        EditOperation::Adjust { instruction } => format!(
            "Adjust the photo: {}. Only change tone and colour. {PRESERVE}",
            instruction.trim()
        ),
        EditOperation::Colorize => format!(
            "Colorize this black-and-white photo with natural, period-appropriate colours. {PRESERVE}"
        ),
        EditOperation::Repair => format!(
            "Repair this old photo: remove scratches, dust, tears and fading. {PRESERVE}"
        ),
        EditOperation::Restore => format!(
            "Restore this old photo: repair scratches, dust, tears and fading, then colorize it with natural colours. {PRESERVE}"
        ),
        EditOperation::Upscale { factor } => format!(
            "Upscale this photo {factor}x, recovering fine detail and sharpness without adding new content."
        ),
        EditOperation::RemoveBackground => {
            "Remove the background and return only the main subject on a transparent background.".to_string()
        }
        EditOperation::ProductScene { scene } => format!(
            "Place the product from this photo into the following scene: {}. Keep the product itself exactly as it is.",
            scene.trim()
        ),
    }
}

pub(super) fn title_instruction(count: usize) -> String {
    format!(
        "Suggest {count} short, evocative titles for this photo. \
Answer with a JSON array of strings only, no commentary."
    )
}

use super::registry::ToolKind;

/// Structured command produced from a spoken request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCommand {
    pub tool: ToolKind,
    pub prompt: String,
    pub transcript: String,
}

impl VoiceCommand {
    /// Builds a command from the interpreter's raw answer. A tool name outside
    /// the voice vocabulary becomes `unknown` and keeps the transcript verbatim
    /// as its prompt.
    pub fn coerce(raw_tool: &str, raw_prompt: &str, transcript: &str) -> Self {
        match ToolKind::parse(raw_tool).filter(ToolKind::is_voice_tool) {
            Some(ToolKind::Unknown) | None => Self {
                tool: ToolKind::Unknown,
                prompt: transcript.to_string(),
                transcript: transcript.to_string(),
            },
            Some(tool) => Self {
                tool,
                prompt: raw_prompt.trim().to_string(),
                transcript: transcript.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::VoiceCommand;
    use crate::commands::ToolKind;

    #[test]
    fn known_tools_keep_the_prompt() {
        let command = VoiceCommand::coerce("Filter", " sepia ", "make it sepia");
        assert_eq!(command.tool, ToolKind::Filter);
        assert_eq!(command.prompt, "sepia");
    }

    #[test]
    fn out_of_vocabulary_tools_become_unknown() {
        let transcript = "  Order me a Pizza, please ";
        let command = VoiceCommand::coerce("order_pizza", "pepperoni", transcript);
        assert_eq!(command.tool, ToolKind::Unknown);
        assert_eq!(command.prompt, transcript);
    }

    #[test]
    fn canvas_tools_are_not_voice_commands() {
        let command = VoiceCommand::coerce("crop", "square", "crop it square");
        assert_eq!(command.tool, ToolKind::Unknown);
        assert_eq!(command.prompt, "crop it square");
    }
}

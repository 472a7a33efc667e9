use super::registry::ToolKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Open,
    Batch,
    Voice,
    Hotspot,
    Region,
    ClearSelection,
    Compare,
    Titles,
    Credits,
    Refill,
    New,
    Status,
}

const SESSION_COMMANDS: &[(&str, SessionAction)] = &[
    ("open", SessionAction::Open),
    ("upload", SessionAction::Open),
    ("batch", SessionAction::Batch),
    ("voice", SessionAction::Voice),
    ("hotspot", SessionAction::Hotspot),
    ("region", SessionAction::Region),
    ("clear_selection", SessionAction::ClearSelection),
    ("compare", SessionAction::Compare),
    ("titles", SessionAction::Titles),
    ("credits", SessionAction::Credits),
    ("refill", SessionAction::Refill),
    ("new", SessionAction::New),
    ("status", SessionAction::Status),
];

/// One line typed into the interactive shell.
#[derive(Debug, Clone, PartialEq)]
pub enum LineIntent {
    Noop,
    Help,
    /// A tool with its free-text argument (instruction, style, path...).
    Tool { tool: ToolKind, arg: String },
    Session {
        action: SessionAction,
        args: Vec<String>,
    },
    Unknown { command: String, arg: String },
}

/// Splits arguments shell-style so quoted paths survive; falls back to
/// whitespace splitting on unbalanced quotes.
pub fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Parses `/command args` lines. Plain text is a retouch instruction.
pub fn parse_line(text: &str) -> LineIntent {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LineIntent::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return LineIntent::Tool {
            tool: ToolKind::Retouch,
            arg: trimmed.to_string(),
        };
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return LineIntent::Tool {
            tool: ToolKind::Retouch,
            arg: trimmed.to_string(),
        };
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if command == "help" {
        return LineIntent::Help;
    }
    if let Some((_, action)) = SESSION_COMMANDS.iter().find(|(name, _)| *name == command) {
        return LineIntent::Session {
            action: *action,
            args: split_args(arg),
        };
    }
    match ToolKind::parse(&command) {
        Some(ToolKind::Unknown) | None => LineIntent::Unknown {
            command,
            arg: arg.to_string(),
        },
        Some(tool) => LineIntent::Tool {
            tool,
            arg: arg.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_line, LineIntent, SessionAction};
    use crate::commands::ToolKind;

    #[test]
    fn plain_text_is_a_retouch_instruction() {
        assert_eq!(
            parse_line("  make the sky bluer "),
            LineIntent::Tool {
                tool: ToolKind::Retouch,
                arg: "make the sky bluer".to_string(),
            }
        );
    }

    #[test]
    fn tool_commands_keep_their_raw_argument() {
        assert_eq!(
            parse_line("/filter  Sepia tone "),
            LineIntent::Tool {
                tool: ToolKind::Filter,
                arg: "Sepia tone".to_string(),
            }
        );
        assert_eq!(
            parse_line("/UNDO"),
            LineIntent::Tool {
                tool: ToolKind::Undo,
                arg: String::new(),
            }
        );
    }

    #[test]
    fn session_commands_split_quoted_paths() {
        assert_eq!(
            parse_line("/batch \"my photos/a.png\" b.png"),
            LineIntent::Session {
                action: SessionAction::Batch,
                args: vec!["my photos/a.png".to_string(), "b.png".to_string()],
            }
        );
    }

    #[test]
    fn unbalanced_quotes_fall_back_to_whitespace() {
        assert_eq!(
            parse_line("/open \"a.png"),
            LineIntent::Session {
                action: SessionAction::Open,
                args: vec!["\"a.png".to_string()],
            }
        );
    }

    #[test]
    fn unknown_and_empty_lines() {
        assert_eq!(parse_line("   "), LineIntent::Noop);
        assert_eq!(parse_line("/help"), LineIntent::Help);
        assert_eq!(
            parse_line("/teleport now"),
            LineIntent::Unknown {
                command: "teleport".to_string(),
                arg: "now".to_string(),
            }
        );
        assert!(matches!(parse_line("/unknown"), LineIntent::Unknown { .. }));
    }
}

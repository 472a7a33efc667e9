mod parser;
mod registry;
mod voice;

pub use parser::{parse_line, split_args, LineIntent, SessionAction};
pub use registry::{ToolKind, HELP_COMMANDS, VOICE_TOOLS};
pub use voice::VoiceCommand;

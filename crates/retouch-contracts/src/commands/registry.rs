use std::fmt;

/// Closed set of tools a user (or a voice command) can pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Retouch,
    Erase,
    Filter,
    Adjust,
    Colorize,
    Repair,
    Restore,
    Upscale,
    RemoveBackground,
    ProductScene,
    Crop,
    Text,
    Background,
    Undo,
    Redo,
    Download,
    Unknown,
}

#[derive(Clone, Copy, Debug)]
struct ToolSpec {
    name: &'static str,
    tool: ToolKind,
    aliases: &'static [&'static str],
    billable: bool,
}

const TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "retouch",
        tool: ToolKind::Retouch,
        aliases: &["edit", "fix"],
        billable: true,
    },
    ToolSpec {
        name: "erase",
        tool: ToolKind::Erase,
        aliases: &["remove_object", "eraser"],
        billable: true,
    },
    ToolSpec {
        name: "filter",
        tool: ToolKind::Filter,
        aliases: &["style"],
        billable: true,
    },
    ToolSpec {
        name: "adjust",
        tool: ToolKind::Adjust,
        aliases: &["adjustment"],
        billable: true,
    },
    ToolSpec {
        name: "colorize",
        tool: ToolKind::Colorize,
        aliases: &["colourize", "color"],
        billable: true,
    },
    ToolSpec {
        name: "repair",
        tool: ToolKind::Repair,
        aliases: &["scratches"],
        billable: true,
    },
    ToolSpec {
        name: "restore",
        tool: ToolKind::Restore,
        aliases: &["colorize_repair"],
        billable: true,
    },
    ToolSpec {
        name: "upscale",
        tool: ToolKind::Upscale,
        aliases: &["enhance"],
        billable: true,
    },
    ToolSpec {
        name: "remove_background",
        tool: ToolKind::RemoveBackground,
        aliases: &["transparent", "cutout"],
        billable: true,
    },
    ToolSpec {
        name: "product_scene",
        tool: ToolKind::ProductScene,
        aliases: &["product", "scene"],
        billable: true,
    },
    ToolSpec {
        name: "crop",
        tool: ToolKind::Crop,
        aliases: &[],
        billable: false,
    },
    ToolSpec {
        name: "text",
        tool: ToolKind::Text,
        aliases: &["caption"],
        billable: false,
    },
    ToolSpec {
        name: "background",
        tool: ToolKind::Background,
        aliases: &["backdrop"],
        billable: false,
    },
    ToolSpec {
        name: "undo",
        tool: ToolKind::Undo,
        aliases: &["back"],
        billable: false,
    },
    ToolSpec {
        name: "redo",
        tool: ToolKind::Redo,
        aliases: &["forward"],
        billable: false,
    },
    ToolSpec {
        name: "download",
        tool: ToolKind::Download,
        aliases: &["save", "export"],
        billable: false,
    },
    ToolSpec {
        name: "unknown",
        tool: ToolKind::Unknown,
        aliases: &[],
        billable: false,
    },
];

/// Tool names a voice intent may return.
pub const VOICE_TOOLS: &[&str] = &[
    "retouch",
    "erase",
    "filter",
    "adjust",
    "colorize",
    "repair",
    "restore",
    "upscale",
    "remove_background",
    "product_scene",
    "undo",
    "redo",
    "download",
    "unknown",
];

pub const HELP_COMMANDS: &[&str] = &[
    "/retouch <instruction>",
    "/erase [instruction]",
    "/filter <style>",
    "/adjust <instruction>",
    "/colorize",
    "/repair",
    "/restore",
    "/upscale [2|3|4]",
    "/remove_background",
    "/product_scene <scene>",
    "/crop x y w h",
    "/text <caption>",
    "/background <#rrggbb|path>",
    "/hotspot x y radius",
    "/region x y w h",
    "/clear_selection",
    "/undo",
    "/redo",
    "/compare",
    "/titles",
    "/download <path>",
    "/open <path>",
    "/batch <paths...>",
    "/voice <audio path>",
    "/credits",
    "/refill",
    "/new",
    "/help",
];

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        self.spec().name
    }

    /// Resolves a canonical name or alias, case-insensitively. Spaces and
    /// dashes are treated as underscores.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        if normalized.is_empty() {
            return None;
        }
        TOOL_SPECS
            .iter()
            .find(|spec| spec.name == normalized || spec.aliases.contains(&normalized.as_str()))
            .map(|spec| spec.tool)
    }

    /// Whether the tool dispatches a remote generation and costs a credit.
    pub fn is_billable(&self) -> bool {
        self.spec().billable
    }

    pub fn is_voice_tool(&self) -> bool {
        VOICE_TOOLS.contains(&self.as_str())
    }

    pub fn all() -> impl Iterator<Item = ToolKind> {
        TOOL_SPECS.iter().map(|spec| spec.tool)
    }

    /// Names and aliases, for local keyword matching.
    pub fn keywords(&self) -> Vec<&'static str> {
        let spec = self.spec();
        let mut words = vec![spec.name];
        words.extend(spec.aliases.iter().copied());
        words
    }

    fn spec(&self) -> &'static ToolSpec {
        TOOL_SPECS
            .iter()
            .find(|spec| spec.tool == *self)
            .unwrap_or(&TOOL_SPECS[TOOL_SPECS.len() - 1])
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

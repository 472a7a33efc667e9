use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retouch_contracts::commands::{
    parse_line, LineIntent, SessionAction, ToolKind, HELP_COMMANDS,
};
use retouch_contracts::events::{payload, EventWriter};
use retouch_contracts::models::Capability;
use retouch_contracts::session::{BatchStatus, SessionStore};
use retouch_contracts::{Hotspot, ImageBlob, Region, Selection};
use retouch_engine::compositor::{parse_color, ExportFormat, ShadowSpec, TextOverlay};
use retouch_engine::voice::{
    FileMicrophone, GatewayIntentInterpreter, IntentInterpreter, KeywordInterpreter,
    RelayTranscriber,
};
use retouch_engine::{
    EditRequest, EngineConfig, SessionController, VoiceAction, VoiceOutcome, VoicePipeline,
};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Photo retouching from the terminal")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Directory holding session.json and events.jsonl.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    text_model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new single-image session from a file.
    Open { path: PathBuf },
    /// Apply a tool to the current image.
    Edit(EditArgs),
    /// Draw a caption onto the current image.
    Text(TextArgs),
    Undo,
    Redo,
    Status,
    /// Suggest titles for the current image (costs a credit).
    Titles,
    /// Write the current image to a file (.png or .jpg).
    Export(ExportArgs),
    /// Apply one tool to several images in order.
    Batch(BatchArgs),
    /// Run a recorded voice command.
    Voice { audio: PathBuf },
    /// Discard the current session.
    New,
    Refill,
    /// Interactive session.
    Shell,
}

#[derive(Debug, Args)]
struct EditArgs {
    tool: String,
    /// Instruction, style, factor or colour, depending on the tool.
    arg: Vec<String>,
    /// Limit retouch/erase to a circle: x,y,radius in image pixels.
    #[arg(long, conflicts_with = "region")]
    hotspot: Option<String>,
    /// Limit retouch/erase to a rectangle: x,y,width,height in image pixels.
    #[arg(long)]
    region: Option<String>,
    /// Reference image for retouch.
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Also write the result here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TextArgs {
    text: String,
    #[arg(long, default_value_t = 50.0)]
    x: f64,
    #[arg(long, default_value_t = 85.0)]
    y: f64,
    /// Font size in percent of the image width.
    #[arg(long, default_value_t = 6.0)]
    size: f64,
    #[arg(long, default_value = "#ffffff")]
    color: String,
    /// `none`, `outline [colour]`, or a CSS-like `2px 2px 4px #000`.
    #[arg(long, default_value = "outline")]
    shadow: String,
    #[arg(long, default_value = "sans-serif")]
    font: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    out: PathBuf,
    /// JPEG quality in [0.1, 1.0]; ignored for PNG.
    #[arg(long, default_value_t = 0.92)]
    quality: f32,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long)]
    tool: String,
    #[arg(long, default_value = "")]
    arg: String,
    /// Directory for processed images.
    #[arg(long)]
    out: PathBuf,
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = engine_config(&cli.global);
    let mut session = open_session(&config)?;
    match cli.command {
        Command::Open { path } => {
            session.upload_path(&path)?;
            print_status(&session);
        }
        Command::Edit(args) => run_edit(&mut session, args)?,
        Command::Text(args) => run_text(&mut session, args)?,
        Command::Undo => {
            if !session.undo()? {
                println!("Nothing to undo.");
            }
            print_status(&session);
        }
        Command::Redo => {
            if !session.redo()? {
                println!("Nothing to redo.");
            }
            print_status(&session);
        }
        Command::Status => print_status(&session),
        Command::Titles => {
            for (idx, title) in session.suggest_titles()?.iter().enumerate() {
                println!("{}. {title}", idx + 1);
            }
            println!("Credits: {}", session.credits());
        }
        Command::Export(args) => {
            let written = export_to(&mut session, &args.out, args.quality)?;
            println!("Wrote {}", written.display());
        }
        Command::Batch(args) => return run_batch(&mut session, args),
        Command::Voice { audio } => run_voice(&mut session, &config, &audio)?,
        Command::New => {
            session.new_session();
            println!("Session cleared. Credits: {}", session.credits());
        }
        Command::Refill => println!("Credits: {}", session.refill_credits()),
        Command::Shell => run_shell(&mut session, &config)?,
    }
    Ok(0)
}

fn engine_config(global: &GlobalArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(state_dir) = global.state_dir.clone() {
        config.state_dir = state_dir;
    }
    if global.events.is_some() {
        config.events_path = global.events.clone();
    }
    if global.image_model.is_some() {
        config.image_model = global.image_model.clone();
    }
    if global.text_model.is_some() {
        config.text_model = global.text_model.clone();
    }
    config
}

fn open_session(config: &EngineConfig) -> Result<SessionController> {
    fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let events = EventWriter::new(config.events_path(), format!("cli-{}", std::process::id()));
    let store = match SessionStore::open(config.store_path()) {
        Ok(store) => Some(store),
        Err(err) => {
            events.note(
                "storage_error",
                payload(json!({ "action": "open", "error": format!("{err:#}") })),
            );
            None
        }
    };
    let gateway = config.gateway(events.clone());
    let mut session = SessionController::new(gateway, store, events, config.starting_credits);
    session.restore();
    Ok(session)
}

fn run_edit(session: &mut SessionController, args: EditArgs) -> Result<()> {
    let Some(tool) = ToolKind::parse(&args.tool).filter(|tool| *tool != ToolKind::Unknown) else {
        bail!("unknown tool '{}'", args.tool);
    };
    session.select_tool(tool);
    if let Some(raw) = args.hotspot.as_deref() {
        session.set_selection(hotspot_from(&split_numbers(raw))?);
    }
    if let Some(raw) = args.region.as_deref() {
        session.set_selection(region_from(&split_numbers(raw))?);
    }
    if let Some(path) = args.reference.as_deref() {
        session.set_reference(Some(ImageBlob::from_path(path)?));
    }
    let arg = args.arg.join(" ");
    match tool {
        ToolKind::Undo => {
            session.undo()?;
        }
        ToolKind::Redo => {
            session.redo()?;
        }
        ToolKind::Download => {
            let out = match args.out {
                Some(out) => out,
                None if !arg.trim().is_empty() => PathBuf::from(arg.trim()),
                None => bail!("download needs an output path"),
            };
            let written = export_to(session, &out, 0.92)?;
            println!("Wrote {}", written.display());
            return Ok(());
        }
        _ => {
            let output = session.apply_tool(tool, &arg)?;
            if let Some(out) = args.out.as_deref() {
                output.write_to(out)?;
                println!("Wrote {}", out.display());
            }
        }
    }
    print_status(session);
    Ok(())
}

fn run_text(session: &mut SessionController, args: TextArgs) -> Result<()> {
    let Some(color) = parse_color(&args.color) else {
        bail!("unrecognised colour '{}'", args.color);
    };
    let overlay = TextOverlay {
        text: args.text,
        position_pct: (args.x, args.y),
        font: args.font,
        color,
        shadow: ShadowSpec::parse(&args.shadow),
        font_size_pct: args.size,
    };
    session.select_tool(ToolKind::Text);
    let output = session.apply(EditRequest::Text {
        crop: None,
        overlay,
    })?;
    if let Some(out) = args.out.as_deref() {
        output.write_to(out)?;
        println!("Wrote {}", out.display());
    }
    print_status(session);
    Ok(())
}

fn run_batch(session: &mut SessionController, args: BatchArgs) -> Result<i32> {
    let Some(tool) = ToolKind::parse(&args.tool) else {
        bail!("unknown tool '{}'", args.tool);
    };
    let images = args
        .images
        .iter()
        .map(|path| ImageBlob::from_path(path))
        .collect::<Result<Vec<_>>>()?;
    session.start_batch(images)?;
    let request = session.request_for_tool(tool, &args.arg)?;
    let report = session.run_batch(request)?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    if let Some(batch) = session.batch() {
        for (idx, item) in batch.items().iter().enumerate() {
            match (&item.status, &item.processed) {
                (BatchStatus::Done, Some(processed)) => {
                    let path = args.out.join(format!("{:02}-{}", idx + 1, processed.name()));
                    processed.write_to(&path)?;
                    println!("[done]  {} -> {}", item.original.name(), path.display());
                }
                _ => println!(
                    "[{}] {}: {}",
                    item.status.as_str(),
                    item.original.name(),
                    item.error.as_deref().unwrap_or("-")
                ),
            }
        }
    }
    println!(
        "{} of {} done, {} failed. Credits: {}",
        report.done,
        report.total,
        report.failed,
        session.credits()
    );
    Ok(if report.failed > 0 { 2 } else { 0 })
}

fn voice_pipeline(
    session: &SessionController,
    config: &EngineConfig,
    audio: &Path,
) -> VoicePipeline {
    let events = session.events().clone();
    let transcriber = RelayTranscriber::new(
        config.transcribe_url.clone().unwrap_or_default(),
        config.request_timeout_s.unwrap_or(60.0),
    );
    let interpreter: Box<dyn IntentInterpreter> =
        match session.gateway().provider_name(Capability::Text).as_deref() {
            Some("dryrun") | None => Box::new(KeywordInterpreter),
            Some(_) => Box::new(GatewayIntentInterpreter::new(config.gateway(events.clone()))),
        };
    VoicePipeline::new(
        Box::new(FileMicrophone::new(audio)),
        Box::new(transcriber),
        interpreter,
        events,
    )
    .with_error_delay(config.error_display_delay)
}

fn run_voice(session: &mut SessionController, config: &EngineConfig, audio: &Path) -> Result<()> {
    let mut voice = voice_pipeline(session, config, audio);
    let outcome = voice.capture()?;
    let command = match outcome {
        VoiceOutcome::NoSpeech => {
            println!("No speech detected.");
            return Ok(());
        }
        VoiceOutcome::Command(command) => command,
    };
    println!(
        "Heard \"{}\" -> {} {}",
        command.transcript, command.tool, command.prompt
    );
    match session.apply_voice_command(&command)? {
        VoiceAction::Edited(_) => print_status(session),
        VoiceAction::Moved { moved } => {
            if !moved {
                println!("Nothing to {}.", command.tool);
            }
            print_status(session);
        }
        VoiceAction::Download(blob) => {
            let path = PathBuf::from(blob.name());
            blob.write_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn run_shell(session: &mut SessionController, config: &EngineConfig) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    println!("Retouch shell. Type /help for commands.");
    print_status(session);

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        if matches!(input.trim(), "/quit" | "/exit") {
            break;
        }
        if let Err(err) = handle_line(session, config, input) {
            println!("Error: {err:#}");
        }
    }
    Ok(())
}

fn handle_line(session: &mut SessionController, config: &EngineConfig, input: &str) -> Result<()> {
    match parse_line(input) {
        LineIntent::Noop => {}
        LineIntent::Help => println!("Commands: {}", HELP_COMMANDS.join(" ")),
        LineIntent::Unknown { command, .. } => {
            println!("Unknown command /{command}. Type /help for commands.");
        }
        LineIntent::Tool { tool, arg } => match tool {
            ToolKind::Undo => {
                session.undo()?;
                print_status(session);
            }
            ToolKind::Redo => {
                session.redo()?;
                print_status(session);
            }
            ToolKind::Download => {
                let target = arg.trim();
                if target.is_empty() {
                    bail!("/download needs an output path");
                }
                let written = export_to(session, Path::new(target), 0.92)?;
                println!("Wrote {}", written.display());
            }
            _ if session.history().is_none() && session.batch().is_some() => {
                let request = session.request_for_tool(tool, &arg)?;
                let report = session.run_batch(request)?;
                println!(
                    "Batch: {} of {} done, {} failed. Credits: {}",
                    report.done,
                    report.total,
                    report.failed,
                    session.credits()
                );
            }
            _ => {
                if session.state().tool != tool {
                    session.select_tool(tool);
                }
                session.apply_tool(tool, &arg)?;
                print_status(session);
            }
        },
        LineIntent::Session { action, args } => handle_session(session, config, action, &args)?,
    }
    Ok(())
}

fn handle_session(
    session: &mut SessionController,
    config: &EngineConfig,
    action: SessionAction,
    args: &[String],
) -> Result<()> {
    match action {
        SessionAction::Open => {
            let Some(path) = args.first() else {
                bail!("/open needs a path");
            };
            session.upload_path(Path::new(path))?;
            print_status(session);
        }
        SessionAction::Batch => {
            if args.is_empty() {
                if session.batch().is_some() {
                    session.reset_batch()?;
                    println!("Batch reset; every image is pending again.");
                    return Ok(());
                }
                bail!("/batch needs image paths");
            }
            let images = args
                .iter()
                .map(|path| ImageBlob::from_path(Path::new(path)))
                .collect::<Result<Vec<_>>>()?;
            let count = session.start_batch(images)?;
            println!("Batch of {count} images ready; the next tool command runs on all of them.");
        }
        SessionAction::Voice => {
            let Some(path) = args.first() else {
                bail!("/voice needs a recorded audio file");
            };
            run_voice(session, config, Path::new(path))?;
        }
        SessionAction::Hotspot => {
            session.set_selection(hotspot_from(&numbers_from(args))?);
            println!("Hotspot set.");
        }
        SessionAction::Region => {
            session.set_selection(region_from(&numbers_from(args))?);
            println!("Region set.");
        }
        SessionAction::ClearSelection => {
            session.set_selection(Selection::None);
            println!("Selection cleared.");
        }
        SessionAction::Compare => {
            let comparing = session
                .history()
                .map(|history| !history.comparing())
                .unwrap_or(false);
            let shown = session.compare(comparing)?;
            println!(
                "{} {}",
                if comparing { "Comparing with" } else { "Showing" },
                shown.name()
            );
        }
        SessionAction::Titles => {
            for (idx, title) in session.suggest_titles()?.iter().enumerate() {
                println!("{}. {title}", idx + 1);
            }
        }
        SessionAction::Credits => println!("Credits: {}", session.credits()),
        SessionAction::Refill => println!("Credits: {}", session.refill_credits()),
        SessionAction::New => {
            session.new_session();
            println!("Session cleared.");
        }
        SessionAction::Status => print_status(session),
    }
    Ok(())
}

fn export_to(session: &mut SessionController, out: &Path, quality: f32) -> Result<PathBuf> {
    let ext = out
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let format = match ext.as_str() {
        "jpg" | "jpeg" => ExportFormat::Jpeg { quality },
        _ => ExportFormat::Png,
    };
    let blob = session.export(format)?;
    blob.write_to(out)?;
    Ok(out.to_path_buf())
}

fn split_numbers(raw: &str) -> Vec<String> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn numbers_from(args: &[String]) -> Vec<String> {
    args.iter().flat_map(|arg| split_numbers(arg)).collect()
}

fn parse_floats(values: &[String], count: usize, usage: &str) -> Result<Vec<f64>> {
    let parsed = values
        .iter()
        .map(|value| value.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| usage.to_string())?;
    if parsed.len() != count {
        bail!("{usage}");
    }
    Ok(parsed)
}

fn hotspot_from(values: &[String]) -> Result<Selection> {
    let v = parse_floats(values, 3, "hotspot needs x y radius")?;
    Ok(Selection::Hotspot(Hotspot {
        x: v[0],
        y: v[1],
        radius_px: v[2],
    }))
}

fn region_from(values: &[String]) -> Result<Selection> {
    let v = parse_floats(values, 4, "region needs x y width height")?;
    Ok(Selection::Region(Region {
        x: v[0],
        y: v[1],
        width: v[2],
        height: v[3],
    }))
}

fn print_status(session: &SessionController) {
    match session.history() {
        Some(history) => {
            let shown = history.displayed();
            println!(
                "Image: {} ({}, {} bytes), entry {}/{}{}",
                shown.name(),
                shown.mime_type(),
                shown.len(),
                history.cursor() + 1,
                history.len(),
                if history.comparing() { " [comparing]" } else { "" }
            );
        }
        None => match session.batch() {
            Some(batch) => println!(
                "Batch: {} images ({} pending, {} done, {} failed)",
                batch.len(),
                batch.count(BatchStatus::Pending),
                batch.count(BatchStatus::Done),
                batch.count(BatchStatus::Error)
            ),
            None => println!("No image loaded."),
        },
    }
    let selection = match session.state().selection {
        Selection::None => "none".to_string(),
        Selection::Hotspot(spot) => format!("hotspot {}, {} r{}", spot.x, spot.y, spot.radius_px),
        Selection::Region(region) => format!(
            "region {}, {} {}x{}",
            region.x, region.y, region.width, region.height
        ),
    };
    println!(
        "Tool: {}  Selection: {selection}  Credits: {}",
        session.state().tool,
        session.credits()
    );
    if let Some(message) = session.last_error() {
        println!("Last error: {message}");
    }
}

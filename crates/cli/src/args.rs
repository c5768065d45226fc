use clap::{Parser, Subcommand};
use inference::ExecutionProvider;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about = "Face keypoint pipeline builder and emoji overlay tool")]
pub struct Cli {
    /// Execution provider (cpu or cuda); defaults to EXECUTION_PROVIDER
    #[arg(long, global = true)]
    pub provider: Option<ExecutionProvider>,

    /// ONNX Runtime intra-op threads; defaults to INTRA_THREADS
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Custom operator library to register; defaults to CUSTOM_OPS_LIBRARY
    #[arg(long = "custom-ops", global = true)]
    pub custom_ops: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Wrap a YOLOv8 face model with pre/post-processing and write the manifest
    Augment {
        /// Source model; defaults to MODEL_PATH
        #[arg(long)]
        model: Option<PathBuf>,
        /// Manifest to write; defaults to MANIFEST_PATH
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect faces, print the records and write an annotated image
    Predict {
        image: PathBuf,
        /// Pipeline manifest; defaults to MANIFEST_PATH
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(short, long, default_value = visualize::DEFAULT_OUTPUT)]
        output: PathBuf,
        /// Font for confidence and roll labels
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Cover every detected face with an emoji
    Emojify {
        image: PathBuf,
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(short, long, default_value = "emoji_output.png")]
        output: PathBuf,
        /// Also write the placements as JSON for later editing
        #[arg(long)]
        placements: Option<PathBuf>,
        /// Emoji font; defaults to the one in the settings file
        #[arg(long)]
        font: Option<PathBuf>,
        /// Seed for reproducible emoji choice
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Re-render saved placements onto the source image, optionally edited
    Redraw {
        image: PathBuf,
        placements: PathBuf,
        #[arg(short, long, default_value = "emoji_output.png")]
        output: PathBuf,
        #[arg(long)]
        font: Option<PathBuf>,
        /// Replace the emoji of a placement, as INDEX=EMOJI
        #[arg(long = "set", value_parser = parse_set)]
        set: Vec<(usize, String)>,
        /// Remove a placement by index
        #[arg(long)]
        remove: Vec<usize>,
        /// Add a placement, as X,Y,DIAMETER,ANGLE,EMOJI
        #[arg(long, value_parser = parse_add)]
        add: Vec<visualize::EmojiPlacement>,
        /// Write the edited placements back to the placements file
        #[arg(long)]
        save: bool,
    },
    /// Show or change the emoji list and font
    Emojis {
        #[command(subcommand)]
        action: EmojiAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum EmojiAction {
    Show,
    /// Replace the list; every emoji given becomes one entry, with or
    /// without spaces between them
    Set { emojis: Vec<String> },
    Reset,
    /// Select the font used to draw emojis
    Font {
        path: Option<PathBuf>,
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
}

fn parse_set(value: &str) -> Result<(usize, String), String> {
    let (index, emoji) = value
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=EMOJI, got '{value}'"))?;
    let index = index
        .trim()
        .parse()
        .map_err(|e| format!("invalid index '{index}': {e}"))?;
    Ok((index, emoji.trim().to_string()))
}

fn parse_add(value: &str) -> Result<visualize::EmojiPlacement, String> {
    let parts: Vec<&str> = value.splitn(5, ',').map(str::trim).collect();
    let [x, y, diameter, angle, emoji] = parts.as_slice() else {
        return Err(format!("expected X,Y,DIAMETER,ANGLE,EMOJI, got '{value}'"));
    };
    let number = |s: &str| s.parse::<f32>().map_err(|e| format!("invalid number '{s}': {e}"));
    Ok(visualize::EmojiPlacement {
        x_center: number(x)?,
        y_center: number(y)?,
        diameter: number(diameter)?,
        angle: number(angle)?,
        emoji: emoji.to_string(),
    })
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use overlay_baker::{Command, Config, EngineKind, GenerationParams};

#[derive(Parser, Debug)]
#[command(
    name = "overlay-baker",
    version,
    about = "Generate marketing images and bake text overlays onto them"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings", global = true)]
    settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Generate an image for an item and bake its overlay text
    Generate {
        #[arg(long = "item")]
        item: String,

        #[arg(short = 'p', long = "prompt")]
        prompt: String,

        /// Image backend (primary returns URLs, secondary returns bytes)
        #[arg(short = 'e', long = "engine", default_value = "primary")]
        engine: String,

        /// Overlay text (defaults to the text hint)
        #[arg(short = 't', long = "text")]
        text: Option<String>,

        /// Overlay style as JSON; skips placement analysis
        #[arg(long = "style")]
        style: Option<String>,

        /// Ask for an image without typography and publish it as-is
        #[arg(long = "skip-text")]
        skip_text: bool,

        /// Record text and style without compositing
        #[arg(long = "skip-bake")]
        skip_bake: bool,

        /// Output size, WIDTHxHEIGHT
        #[arg(long = "size")]
        size: Option<String>,

        #[arg(long = "style-hint")]
        style_hint: Option<String>,

        #[arg(long = "mood")]
        mood: Option<String>,

        #[arg(long = "palette")]
        palette: Option<String>,

        /// Directive placed ahead of the prompt
        #[arg(long = "instructions")]
        instructions: Option<String>,

        /// Text the image itself should carry
        #[arg(long = "text-hint")]
        text_hint: Option<String>,
    },
    /// Re-apply text and style to an item's raw image
    Rebake {
        #[arg(long = "item")]
        item: String,

        #[arg(short = 't', long = "text")]
        text: String,

        #[arg(long = "style", default_value = "{}")]
        style: String,
    },
    /// Print a stored item as JSON
    Show {
        #[arg(long = "item")]
        item: String,
    },
    /// Print the computed overlay mask for a canvas size
    Layout {
        #[arg(short = 't', long = "text")]
        text: String,

        #[arg(long = "width")]
        width: u32,

        #[arg(long = "height")]
        height: u32,

        #[arg(long = "style")]
        style: Option<String>,
    },
    /// Start the HTTP server
    Serve {
        #[arg(long = "addr")]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    overlay_baker::logging::init(cli.verbose)?;

    let command = match cli.command {
        CliCommand::Generate {
            item,
            prompt,
            engine,
            text,
            style,
            skip_text,
            skip_bake,
            size,
            style_hint,
            mood,
            palette,
            instructions,
            text_hint,
        } => Command::Generate {
            item,
            prompt,
            params: GenerationParams {
                engine: parse_engine(&engine)?,
                image_size: size,
                style: style_hint,
                mood,
                color_palette: palette,
                master_instructions: instructions,
                overlay_text_hint: text_hint,
                skip_text,
                ..GenerationParams::default()
            },
            custom_text: text,
            style,
            skip_bake,
        },
        CliCommand::Rebake { item, text, style } => Command::Rebake { item, text, style },
        CliCommand::Show { item } => Command::Show { item },
        CliCommand::Layout {
            text,
            width,
            height,
            style,
        } => Command::Layout {
            text,
            width,
            height,
            style,
        },
        CliCommand::Serve { addr } => Command::Serve { addr },
    };

    let output = overlay_baker::run(Config {
        settings_path: cli.settings,
        command,
    })
    .await?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn parse_engine(value: &str) -> Result<EngineKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "primary" => Ok(EngineKind::Primary),
        "secondary" => Ok(EngineKind::Secondary),
        other => Err(anyhow::anyhow!(
            "unknown engine '{}' (expected primary or secondary)",
            other
        )),
    }
}

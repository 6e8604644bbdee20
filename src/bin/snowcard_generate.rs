use anyhow::{Context, Result, anyhow};
use clap::Parser;
use snowcard::compositor::Compositor;
use snowcard::config::setup_logging;
use snowcard::constants::{DEFAULT_ENDPOINT, DEFAULT_MODEL, MAX_SOURCE_IMAGES};
use snowcard::encoding::SourceImage;
use snowcard::fonts::load_fonts;
use snowcard::generation::{CredentialSource, GeminiClient};
use snowcard::pipeline::{Pipeline, PipelineRun};
use snowcard::style::Style;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Turn up to three photos into one vintage New Year postcard.
///
/// Minimal UX:
///   snowcard_generate grandma.jpg
#[derive(Parser, Debug)]
#[command(name = "snowcard_generate")]
#[command(about = "Generate a Soviet-style New Year postcard from one to three photos")]
struct Args {
    /// Source photos; everyone in them ends up on one card
    #[arg(required = true, num_args = 1..=3)]
    photos: Vec<PathBuf>,

    /// Card style
    #[arg(long, short, value_enum, default_value_t = Style::Classic)]
    style: Style,

    /// Gemini API key
    #[arg(required = true, long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Image model
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// API base URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: Url,

    /// Output directory; the card is saved as soviet_postcard_<millis>.png
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Extra font directory, eg one holding Marck Script
    #[arg(long)]
    font_dir: Option<PathBuf>,

    /// If set, raw API responses are written here
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Fixes the paper grain pattern
    #[arg(long)]
    seed: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn read_photo(path: &Path) -> Result<SourceImage> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    SourceImage::from_upload(bytes, None)
        .with_context(|| format!("{} is not a usable photo", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.debug).map_err(|err| anyhow!("Failed to set up logging: {err}"))?;

    if args.photos.len() > MAX_SOURCE_IMAGES {
        return Err(anyhow!("At most {MAX_SOURCE_IMAGES} photos can be used"));
    }
    let sources = args
        .photos
        .iter()
        .map(PathBuf::as_path)
        .map(read_photo)
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let client = GeminiClient::new(
        args.endpoint.clone(),
        &args.model,
        CredentialSource::Fixed(args.api_key.clone()),
    )
    .with_debug_dir(args.debug_dir.clone());
    let compositor = Compositor::new(load_fonts(args.font_dir.as_deref()));
    let pipeline = Pipeline::new(Arc::new(client), Arc::new(compositor), args.style)
        .with_grain_seed(args.seed);

    let mut run = PipelineRun::new();
    let card = pipeline
        .execute(&mut run, &sources)
        .await
        .with_context(|| format!("Pipeline stopped at {}", run.stage()))?;

    let output_filename = args.out_dir.join(card.download_filename());
    if output_filename.exists() {
        return Err(anyhow!(
            "Card already exists: {}",
            output_filename.display()
        ));
    }
    let bytes = card.image().payload_bytes()?;
    fs::write(&output_filename, &bytes)
        .with_context(|| format!("Failed to write {}", output_filename.display()))?;

    if card.is_degraded() {
        eprintln!("The greeting could not be drawn; saved the card without it.");
    }
    eprintln!("Saved: {}", output_filename.display());
    Ok(())
}

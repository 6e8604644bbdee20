//! The postcard pipeline: encode → request → composite.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::ImageFormat;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info, instrument};

use crate::compositor::{CompositeOptions, Compositor};
use crate::constants::DOWNLOAD_PREFIX;
use crate::encoding::{EncodedImage, SourceImage};
use crate::error::SnowcardError;
use crate::generation::{GenerationRequest, ImageGenerator};
use crate::prompt::build_prompt;
use crate::style::Style;

/// Where a pipeline run is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Not started
    Idle,
    /// Turning photos into `data:` strings
    Encoding,
    /// Waiting on the model
    Requesting,
    /// Drawing the title
    Compositing,
    /// Finished with a card
    Done,
    /// Finished without a card
    Failed(String),
}

impl Stage {
    /// `Done` and `Failed` end a run; a new run is needed to try again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::Encoding => write!(f, "encoding"),
            Stage::Requesting => write!(f, "requesting"),
            Stage::Compositing => write!(f, "compositing"),
            Stage::Done => write!(f, "done"),
            Stage::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Stage history of one run.
#[derive(Clone, Debug, Default)]
pub struct PipelineRun {
    history: Vec<Stage>,
}

impl PipelineRun {
    /// A fresh run in [`Stage::Idle`].
    pub fn new() -> Self {
        Self {
            history: vec![Stage::Idle],
        }
    }

    /// Current stage.
    pub fn stage(&self) -> &Stage {
        self.history.last().unwrap_or(&Stage::Idle)
    }

    /// Every stage visited, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn advance(&mut self, next: Stage) -> Result<(), SnowcardError> {
        let current = self.stage();
        let allowed = match (current, &next) {
            (current, _) if current.is_terminal() => false,
            (_, Stage::Failed(_)) => true,
            (Stage::Idle, Stage::Encoding)
            | (Stage::Encoding, Stage::Requesting)
            | (Stage::Requesting, Stage::Compositing)
            | (Stage::Compositing, Stage::Done) => true,
            _ => false,
        };
        if !allowed {
            return Err(SnowcardError::InternalServerError(format!(
                "pipeline cannot move from {current} to {next}"
            )));
        }
        info!("Pipeline stage: {next}");
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, err: &SnowcardError) {
        if !self.stage().is_terminal() {
            error!("Pipeline failed during {}: {}", self.stage(), err);
            self.history.push(Stage::Failed(err.user_message()));
        }
    }
}

/// A finished postcard.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalCard {
    image: EncodedImage,
    degraded: bool,
    created_at: DateTime<Utc>,
}

impl FinalCard {
    /// Wraps a composited image.
    pub fn new(image: EncodedImage, degraded: bool) -> Self {
        Self {
            image,
            degraded,
            created_at: Utc::now(),
        }
    }

    /// The card, PNG unless compositing was degraded.
    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    /// True when the title could not be drawn.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// When the card was made.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `soviet_postcard_<unix millis>.<ext>`, where the extension follows the image's media
    /// type. A composited card is always `.png`; a degraded one keeps the model's format.
    pub fn download_filename(&self) -> String {
        let extension = self
            .image
            .media_type()
            .ok()
            .and_then(ImageFormat::from_mime_type)
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png");
        format!(
            "{DOWNLOAD_PREFIX}_{}.{extension}",
            self.created_at.timestamp_millis()
        )
    }
}

/// Everything needed to turn photos into a card.
pub struct Pipeline {
    generator: Arc<dyn ImageGenerator>,
    compositor: Arc<Compositor>,
    style: Style,
    grain_seed: Option<u64>,
}

impl Pipeline {
    /// A pipeline drawing `style` cards.
    pub fn new(generator: Arc<dyn ImageGenerator>, compositor: Arc<Compositor>, style: Style) -> Self {
        Self {
            generator,
            compositor,
            style,
            grain_seed: None,
        }
    }

    /// Fixes the grain speckle positions.
    pub fn with_grain_seed(mut self, seed: Option<u64>) -> Self {
        self.grain_seed = seed;
        self
    }

    /// Configured style.
    pub fn style(&self) -> Style {
        self.style
    }

    /// Runs the whole pipeline once.
    pub async fn run(&self, sources: &[SourceImage]) -> Result<FinalCard, SnowcardError> {
        let mut run = PipelineRun::new();
        self.execute(&mut run, sources).await
    }

    /// Runs the pipeline, recording stages in `run`.
    #[instrument(skip_all, fields(style = %self.style, photos = sources.len()))]
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        sources: &[SourceImage],
    ) -> Result<FinalCard, SnowcardError> {
        let result = self.stages(run, sources).await;
        if let Err(err) = &result {
            run.fail(err);
        }
        result
    }

    async fn stages(
        &self,
        run: &mut PipelineRun,
        sources: &[SourceImage],
    ) -> Result<FinalCard, SnowcardError> {
        run.advance(Stage::Encoding)?;
        let images: Vec<EncodedImage> = sources.iter().map(SourceImage::encode).collect();
        let prompt = build_prompt(self.style, images.len())?;
        let request = GenerationRequest::new(images, prompt, self.style.aspect_ratio())?;

        run.advance(Stage::Requesting)?;
        let generated = self.generator.generate(&request).await?;

        run.advance(Stage::Compositing)?;
        let compositor = Arc::clone(&self.compositor);
        let options = CompositeOptions::for_style(self.style);
        let seed = self.grain_seed;
        let outcome = tokio::task::spawn_blocking(move || {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            compositor.composite(&generated, &options, &mut rng)
        })
        .await
        .map_err(|err| SnowcardError::InternalServerError(format!("compositor task: {err}")))??;

        let card = FinalCard::new(outcome.image().clone(), outcome.is_degraded());
        run.advance(Stage::Done)?;
        Ok(card)
    }
}

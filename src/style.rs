//! Card styles.
//!
//! Each style bundles everything that used to differ between the hand-copied front-ends:
//! prompt wording, aspect ratio, title palette and geometry, and whether paper grain is laid
//! over the finished card.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::generation::AspectRatio;

/// A postcard style.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    /// 1950s-1970s illustration, gold title with a scarlet outline.
    #[default]
    Classic,
    /// 1960s twilight forest, pale-to-deep gold title with a dark red outline.
    Twilight,
    /// 1980s offset print on rough paper, with grain speckle.
    PaperGrain,
}

/// Drop shadow cast by the title outline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Shadow {
    /// Shadow colour, `#rrggbb`
    pub color: &'static str,
    /// 0.0..=1.0
    pub opacity: f32,
    /// Blur radius in pixels, as a 2D canvas would take it.
    pub blur: f32,
    /// Horizontal offset in pixels
    pub offset_x: f32,
    /// Vertical offset in pixels
    pub offset_y: f32,
}

/// Geometry and palette of the title overlay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TitleStyle {
    /// Font size as a fraction of canvas width.
    pub font_scale: f32,
    /// Baseline position as a fraction of canvas height.
    pub anchor_scale: f32,
    /// Outline colour
    pub stroke_color: &'static str,
    /// Outline width as a fraction of font size.
    pub stroke_scale: f32,
    /// Vertical gradient stops `(offset, colour)`, top to baseline.
    pub gradient: &'static [(f32, &'static str)],
    /// Shadow behind the outline.
    pub shadow: Shadow,
}

/// Paper-grain speckle overlay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrainStyle {
    /// Number of single-pixel speckles.
    pub speckles: u32,
    /// Blend opacity of each speckle.
    pub opacity: f32,
}

const CLASSIC_TITLE: TitleStyle = TitleStyle {
    font_scale: 0.12,
    anchor_scale: 0.12,
    stroke_color: "#c0392b",
    stroke_scale: 0.08,
    gradient: &[(0.0, "#f1c40f"), (1.0, "#f39c12")],
    shadow: Shadow {
        color: "#000000",
        opacity: 0.4,
        blur: 10.0,
        offset_x: 4.0,
        offset_y: 4.0,
    },
};

const TWILIGHT_TITLE: TitleStyle = TitleStyle {
    font_scale: 0.12,
    anchor_scale: 0.14,
    stroke_color: "#8b0000",
    stroke_scale: 0.05,
    gradient: &[(0.0, "#fff3a1"), (0.5, "#ffd700"), (1.0, "#e2b100")],
    shadow: Shadow {
        color: "#000000",
        opacity: 0.5,
        blur: 15.0,
        offset_x: 5.0,
        offset_y: 5.0,
    },
};

const PAPER_GRAIN_TITLE: TitleStyle = TitleStyle {
    font_scale: 0.10,
    anchor_scale: 0.13,
    stroke_color: "#7b1e1e",
    stroke_scale: 0.06,
    gradient: &[(0.0, "#fff8dc"), (0.5, "#f5c542"), (1.0, "#d4a017")],
    shadow: Shadow {
        color: "#000000",
        opacity: 0.45,
        blur: 12.0,
        offset_x: 4.0,
        offset_y: 4.0,
    },
};

impl Style {
    /// All styles, in menu order.
    pub const ALL: [Style; 3] = [Style::Classic, Style::Twilight, Style::PaperGrain];

    /// Stable identifier used on the command line and in forms.
    pub fn slug(self) -> &'static str {
        match self {
            Style::Classic => "classic",
            Style::Twilight => "twilight",
            Style::PaperGrain => "paper-grain",
        }
    }

    /// Parses a slug as produced by [`Style::slug`].
    pub fn from_slug(slug: &str) -> Option<Style> {
        Self::ALL.into_iter().find(|style| style.slug() == slug)
    }

    /// Aspect ratio requested from the model.
    pub fn aspect_ratio(self) -> AspectRatio {
        match self {
            Style::Classic | Style::Twilight => AspectRatio::Portrait9x16,
            Style::PaperGrain => AspectRatio::Portrait3x4,
        }
    }

    /// Title overlay parameters.
    pub fn title(self) -> TitleStyle {
        match self {
            Style::Classic => CLASSIC_TITLE,
            Style::Twilight => TWILIGHT_TITLE,
            Style::PaperGrain => PAPER_GRAIN_TITLE,
        }
    }

    /// Grain overlay, if this style has one.
    pub fn grain(self) -> Option<GrainStyle> {
        match self {
            Style::Classic | Style::Twilight => None,
            Style::PaperGrain => Some(GrainStyle {
                speckles: 4000,
                opacity: 0.08,
            }),
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

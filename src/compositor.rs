//! Postcard compositor: draws the generated picture onto a raster surface, lays the greeting
//! over it, optionally roughens it with paper grain, and re-encodes it as PNG.
//!
//! The title is described as a small SVG document (shadowed outline, then gradient fill) and
//! rasterised with resvg straight onto the surface holding the picture.

use std::sync::Arc;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use rand::Rng;
use resvg::tiny_skia::{ColorU8, Pixmap, Transform};
use tracing::{debug, instrument, warn};
use usvg::fontdb;

use crate::constants::{TITLE_FONT_FAMILY, TITLE_TEXT};
use crate::encoding::{EncodedImage, encode};
use crate::error::SnowcardError;
use crate::fonts::cursive_fallback_resolver;
use crate::style::{GrainStyle, Style, TitleStyle};

/// What to draw over the generated picture.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeOptions {
    /// Greeting text
    pub title: String,
    /// Preferred font family; generic `cursive` is appended as a fallback.
    pub font_family: String,
    /// Title palette and geometry
    pub title_style: TitleStyle,
    /// Paper grain, if any
    pub grain: Option<GrainStyle>,
}

impl CompositeOptions {
    /// The standard greeting in the given style.
    pub fn for_style(style: Style) -> Self {
        Self {
            title: TITLE_TEXT.to_string(),
            font_family: TITLE_FONT_FAMILY.to_string(),
            title_style: style.title(),
            grain: style.grain(),
        }
    }
}

/// Hands out pixel surfaces to draw on.
pub trait Surface: Send + Sync {
    /// A blank surface of exactly `width`×`height`, or `None` if one cannot be had.
    fn acquire(&self, width: u32, height: u32) -> Option<Pixmap>;
}

/// In-memory tiny-skia surfaces.
#[derive(Clone, Copy, Debug, Default)]
pub struct PixmapSurface;

impl Surface for PixmapSurface {
    fn acquire(&self, width: u32, height: u32) -> Option<Pixmap> {
        Pixmap::new(width, height)
    }
}

/// Result of compositing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompositeOutcome {
    /// Title (and grain) drawn, PNG encoded.
    Decorated(EncodedImage),
    /// The title could not be drawn; this is the input, untouched.
    Degraded(EncodedImage),
}

impl CompositeOutcome {
    /// The image to show, decorated or not.
    pub fn image(&self) -> &EncodedImage {
        match self {
            CompositeOutcome::Decorated(image) | CompositeOutcome::Degraded(image) => image,
        }
    }

    /// Consumes the outcome, returning its image.
    pub fn into_image(self) -> EncodedImage {
        match self {
            CompositeOutcome::Decorated(image) | CompositeOutcome::Degraded(image) => image,
        }
    }

    /// True when the title could not be applied.
    pub fn is_degraded(&self) -> bool {
        matches!(self, CompositeOutcome::Degraded(_))
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PixelRect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl PixelRect {
    /// Whether `(x, y)` falls inside.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Where the title goes on a canvas of a given size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TitleLayout {
    /// Canvas width
    pub canvas_width: u32,
    /// Canvas height
    pub canvas_height: u32,
    /// Font size in pixels
    pub font_size: f32,
    /// Horizontal centre of the text
    pub anchor_x: f32,
    /// Baseline
    pub anchor_y: f32,
    /// Outline width
    pub stroke_width: f32,
    /// Shadow reach beyond the glyphs: offset plus three blur deviations
    pub shadow_reach: f32,
}

impl TitleLayout {
    /// Lays out the title for a `width`×`height` canvas.
    pub fn new(width: u32, height: u32, style: &TitleStyle) -> Self {
        let font_size = (width as f32 * style.font_scale).floor();
        let shadow = style.shadow;
        Self {
            canvas_width: width,
            canvas_height: height,
            font_size,
            anchor_x: width as f32 / 2.0,
            anchor_y: height as f32 * style.anchor_scale,
            stroke_width: font_size * style.stroke_scale,
            shadow_reach: shadow.offset_x.abs().max(shadow.offset_y.abs()) + shadow.blur * 1.5,
        }
    }

    /// Conservative band that contains every pixel the title can touch: full width, from well
    /// above the tallest ascender to below the deepest descender plus shadow.
    pub fn bounding_box(&self) -> PixelRect {
        let margin = self.stroke_width + self.shadow_reach;
        let top = (self.anchor_y - self.font_size * 1.5 - margin).floor().max(0.0);
        let bottom = (self.anchor_y + self.font_size * 0.6 + margin)
            .ceil()
            .min(self.canvas_height as f32);
        let top = top as u32;
        let bottom = (bottom as u32).max(top);
        PixelRect {
            x: 0,
            y: top,
            width: self.canvas_width,
            height: bottom - top,
        }
    }
}

/// Title overlay as an SVG document the size of the canvas.
fn title_svg(layout: &TitleLayout, options: &CompositeOptions) -> String {
    let style = &options.title_style;
    let shadow = style.shadow;
    let text = html_escape::encode_text(&options.title);
    let family = html_escape::encode_double_quoted_attribute(&options.font_family);
    let stops: String = style
        .gradient
        .iter()
        .map(|(offset, color)| format!(r#"<stop offset="{offset}" stop-color="{color}"/>"#))
        .collect();
    let width = layout.canvas_width;
    let height = layout.canvas_height;
    let x = layout.anchor_x;
    let y = layout.anchor_y;
    let size = layout.font_size;
    let gradient_top = y - size;

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
  <defs>
    <linearGradient id="title-fill" gradientUnits="userSpaceOnUse" x1="0" y1="{gradient_top}" x2="0" y2="{y}">{stops}</linearGradient>
    <filter id="title-shadow" filterUnits="userSpaceOnUse" x="0" y="0" width="{width}" height="{height}">
      <feDropShadow dx="{dx}" dy="{dy}" stdDeviation="{deviation}" flood-color="{shadow_color}" flood-opacity="{shadow_opacity}"/>
    </filter>
  </defs>
  <text x="{x}" y="{y}" font-family="'{family}', cursive" font-size="{size}" text-anchor="middle" fill="none" stroke="{stroke}" stroke-width="{stroke_width}" stroke-linejoin="round" filter="url(#title-shadow)">{text}</text>
  <text x="{x}" y="{y}" font-family="'{family}', cursive" font-size="{size}" text-anchor="middle" fill="url(#title-fill)">{text}</text>
</svg>"##,
        dx = shadow.offset_x,
        dy = shadow.offset_y,
        deviation = shadow.blur / 2.0,
        shadow_color = shadow.color,
        shadow_opacity = shadow.opacity,
        stroke = style.stroke_color,
        stroke_width = layout.stroke_width,
    )
}

/// Draws titles onto generated pictures.
pub struct Compositor {
    fonts: Arc<fontdb::Database>,
    surface: Box<dyn Surface>,
}

impl Compositor {
    /// Compositor drawing on in-memory surfaces with the given fonts.
    pub fn new(fonts: Arc<fontdb::Database>) -> Self {
        Self {
            fonts,
            surface: Box::new(PixmapSurface),
        }
    }

    /// Replaces the surface provider.
    pub fn with_surface(mut self, surface: impl Surface + 'static) -> Self {
        self.surface = Box::new(surface);
        self
    }

    /// Composites the title (and grain) onto `image`.
    ///
    /// Output has the input's pixel dimensions. When no surface can be acquired, or the overlay
    /// cannot be built, the input is handed back unchanged as [`CompositeOutcome::Degraded`].
    #[instrument(skip_all, fields(title = %options.title, grain = options.grain.is_some()))]
    pub fn composite<R: Rng>(
        &self,
        image: &EncodedImage,
        options: &CompositeOptions,
        rng: &mut R,
    ) -> Result<CompositeOutcome, SnowcardError> {
        let bytes = image.payload_bytes()?;
        let source = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = source.dimensions();

        let Some(mut pixmap) = self
            .surface
            .acquire(width, height)
            .filter(|pixmap| pixmap.width() == width && pixmap.height() == height)
        else {
            warn!("No {width}x{height} surface available, returning the picture without a title");
            return Ok(CompositeOutcome::Degraded(image.clone()));
        };

        draw_source(&mut pixmap, &source);

        let layout = TitleLayout::new(width, height, &options.title_style);
        let svg = title_svg(&layout, options);
        let svg_options = usvg::Options {
            fontdb: Arc::clone(&self.fonts),
            font_resolver: cursive_fallback_resolver(),
            ..usvg::Options::default()
        };
        let tree = match usvg::Tree::from_str(&svg, &svg_options) {
            Ok(tree) => tree,
            Err(err) => {
                warn!("Title overlay rejected ({err}), returning the picture without a title");
                return Ok(CompositeOutcome::Degraded(image.clone()));
            }
        };
        resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());

        let mut canvas = pixmap_to_rgba(&pixmap)?;
        if let Some(grain) = options.grain.as_ref() {
            let speckles = apply_grain(&mut canvas, grain, rng);
            debug!("Applied {speckles} grain speckles");
        }

        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(
            canvas.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(CompositeOutcome::Decorated(encode(&png, "image/png")?))
    }
}

/// Copies the picture onto the surface at the origin, unscaled.
///
/// The surface stores premultiplied 8-bit colour, so translucent pixels come back with their
/// colour channels rounded. Opaque pixels round-trip exactly.
fn draw_source(pixmap: &mut Pixmap, source: &RgbaImage) {
    let mut translucent = 0usize;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(source.pixels()) {
        let [r, g, b, a] = src.0;
        if a < u8::MAX {
            translucent += 1;
        }
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    if translucent > 0 {
        debug!("{translucent} translucent pixels lose colour precision on the surface");
    }
}

fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage, SnowcardError> {
    let mut raw = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        raw.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), raw).ok_or_else(|| {
        SnowcardError::InternalServerError(format!(
            "{}x{} surface did not hold a whole picture",
            pixmap.width(),
            pixmap.height()
        ))
    })
}

/// Overlay-blends `grain.speckles` random single pixels towards white or black at
/// `grain.opacity`. Returns the number of speckles laid down.
pub fn apply_grain<R: Rng>(canvas: &mut RgbaImage, grain: &GrainStyle, rng: &mut R) -> usize {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    for _ in 0..grain.speckles {
        let x = rng.random_range(0..width);
        let y = rng.random_range(0..height);
        let tone = if rng.random_bool(0.5) { 1.0 } else { 0.0 };
        let pixel = canvas.get_pixel_mut(x, y);
        for channel in pixel.0.iter_mut().take(3) {
            *channel = overlay(*channel, tone, grain.opacity);
        }
    }
    grain.speckles as usize
}

fn overlay(base: u8, tone: f32, opacity: f32) -> u8 {
    let b = f32::from(base) / 255.0;
    let blended = if b < 0.5 {
        2.0 * b * tone
    } else {
        1.0 - 2.0 * (1.0 - b) * (1.0 - tone)
    };
    ((b + (blended - b) * opacity) * 255.0).round().clamp(0.0, 255.0) as u8
}

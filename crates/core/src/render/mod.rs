//! Still-frame composition shared by preview and export.
//!
//! Layer order: background (scaled to cover, centre-cropped), darkening
//! overlay, album art, then previous/current/next lyric text. The current
//! line's highlight is a hard left-to-right clip at the reveal fraction.

use std::collections::HashMap;
use std::io::Cursor;

use ab_glyph::{point, Font, FontArc, Glyph, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::assets::AssetStore;
use crate::config::RenderConfig;
use crate::timeline::TimelineState;
use crate::{LyricLine, LyricSyncError, Result};

const MARGIN: u32 = 32;
const LINE_SPACING: f32 = 1.2;

/// Rendering backend abstraction.
pub trait FrameRenderer {
    fn render(&mut self, state: &TimelineState<'_>, assets: &AssetStore) -> Result<RgbaImage>;
}

/// CPU renderer built on `image` and `ab_glyph`.
pub struct CanvasRenderer {
    config: RenderConfig,
    font: Option<FontArc>,
    album_art: Option<String>,
    covers: HashMap<String, RgbaImage>,
    album_thumb: Option<RgbaImage>,
}

impl CanvasRenderer {
    /// Creates a renderer, loading the font named in `config` if any.
    pub fn new(config: RenderConfig) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|err| LyricSyncError::asset(path.display().to_string(), err))?;
                let font = FontArc::try_from_vec(bytes).map_err(|err| {
                    LyricSyncError::asset(path.display().to_string(), err)
                })?;
                Some(font)
            }
            None => {
                tracing::warn!("no font configured, frames will be rendered without lyrics");
                None
            }
        };

        Ok(Self {
            config,
            font,
            album_art: None,
            covers: HashMap::new(),
            album_thumb: None,
        })
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Sets the album art reference, resolved through the asset store.
    pub fn with_album_art(mut self, url: Option<String>) -> Self {
        self.album_art = url;
        self.album_thumb = None;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    fn background_layer(&mut self, url: &str, assets: &AssetStore) -> Result<RgbaImage> {
        if let Some(cover) = self.covers.get(url) {
            return Ok(cover.clone());
        }
        let source = assets.require(url)?;
        let cover = cover_crop(source, self.config.width, self.config.height)
            .ok_or_else(|| LyricSyncError::asset(url, "image has no pixels"))?;
        self.covers.insert(url.to_string(), cover.clone());
        Ok(cover)
    }

    fn draw_album_art(&mut self, canvas: &mut RgbaImage, assets: &AssetStore) -> Result<()> {
        let Some(url) = self.album_art.as_deref() else {
            return Ok(());
        };
        if self.album_thumb.is_none() {
            let size = self.config.album_art_px;
            let thumb = imageops::resize(assets.require(url)?, size, size, FilterType::Triangle);
            self.album_thumb = Some(thumb);
        }
        if let Some(thumb) = &self.album_thumb {
            imageops::overlay(canvas, thumb, i64::from(MARGIN), i64::from(MARGIN));
        }
        Ok(())
    }

    fn draw_lyrics(&self, canvas: &mut RgbaImage, state: &TimelineState<'_>) {
        let Some(font) = &self.font else {
            return;
        };
        let height = self.config.height as f32;

        if let Some(line) = state.previous {
            let block = TextBlock::layout(font, self.config.context_font_px, &line.text);
            block.draw(font, canvas, height * 0.28, self.config.context_color, None);
        }

        if let Some(line) = state.current {
            let block = TextBlock::layout(font, self.config.current_font_px, &line.text);
            let top = height * 0.5 - block.height() / 2.0;
            block.draw(font, canvas, top, self.config.base_color, None);

            let progress = state.progress.unwrap_or(0.0);
            let clip = reveal_clip_x(block.left(canvas.width()), block.width, progress);
            block.draw(font, canvas, top, self.config.highlight_color, Some(clip));
        }

        if let Some(line) = state.next {
            let block = TextBlock::layout(font, self.config.context_font_px, &line.text);
            block.draw(font, canvas, height * 0.68, self.config.context_color, None);
        }
    }
}

impl FrameRenderer for CanvasRenderer {
    fn render(&mut self, state: &TimelineState<'_>, assets: &AssetStore) -> Result<RgbaImage> {
        let mut canvas = self.background_layer(&state.background.url, assets)?;
        darken(&mut canvas, self.config.overlay_opacity);
        self.draw_album_art(&mut canvas, assets)?;
        self.draw_lyrics(&mut canvas, state);
        Ok(canvas)
    }
}

impl std::fmt::Debug for CanvasRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasRenderer")
            .field("config", &self.config)
            .field("has_font", &self.font.is_some())
            .field("album_art", &self.album_art)
            .field("cached_backgrounds", &self.covers.len())
            .finish()
    }
}

/// Right edge of the highlighted region for a block starting at `left`.
pub fn reveal_clip_x(left: f32, width: f32, progress: f64) -> f32 {
    left + width * progress.clamp(0.0, 1.0) as f32
}

/// Scales `source` to cover `width` x `height` and crops the centre.
pub fn cover_crop(source: &RgbaImage, width: u32, height: u32) -> Option<RgbaImage> {
    let (src_w, src_h) = source.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return None;
    }

    let scale = f64::max(
        f64::from(width) / f64::from(src_w),
        f64::from(height) / f64::from(src_h),
    );
    let scaled_w = ((f64::from(src_w) * scale).ceil() as u32).max(width);
    let scaled_h = ((f64::from(src_h) * scale).ceil() as u32).max(height);
    let scaled = imageops::resize(source, scaled_w, scaled_h, FilterType::Triangle);

    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    Some(imageops::crop_imm(&scaled, x, y, width, height).to_image())
}

/// Multiplies colour channels by `1 - opacity`, like a black layer drawn on top.
pub fn darken(canvas: &mut RgbaImage, opacity: f32) {
    let keep = 1.0 - opacity.clamp(0.0, 1.0);
    for pixel in canvas.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = (f32::from(*channel) * keep).round() as u8;
        }
    }
}

/// Blends `color` into the pixel at (`x`, `y`) with glyph `coverage`.
/// Pixels at or beyond `clip` are left untouched.
fn blend_pixel(
    canvas: &mut RgbaImage,
    x: i32,
    y: i32,
    coverage: f32,
    color: [u8; 4],
    clip: Option<f32>,
) {
    if x < 0 || y < 0 || x as u32 >= canvas.width() || y as u32 >= canvas.height() {
        return;
    }
    if clip.is_some_and(|clip| x as f32 >= clip) {
        return;
    }

    let alpha = coverage.clamp(0.0, 1.0) * f32::from(color[3]) / 255.0;
    let Rgba(dst) = canvas.get_pixel_mut(x as u32, y as u32);
    for channel in 0..3 {
        let blended = f32::from(dst[channel]) * (1.0 - alpha) + f32::from(color[channel]) * alpha;
        dst[channel] = blended.round() as u8;
    }
}

/// Laid-out rows of a possibly multi-line lyric, horizontally centred.
struct TextBlock {
    rows: Vec<(Vec<Glyph>, f32)>,
    width: f32,
    row_height: f32,
}

impl TextBlock {
    fn layout(font: &FontArc, px: f32, text: &str) -> Self {
        let scale = PxScale::from(px);
        let scaled = font.as_scaled(scale);
        let mut rows = Vec::new();

        for row in text.lines() {
            let mut glyphs = Vec::new();
            let mut caret = 0.0f32;
            let mut previous = None;
            for c in row.chars() {
                let id = scaled.glyph_id(c);
                if let Some(previous) = previous {
                    caret += scaled.kern(previous, id);
                }
                glyphs.push(id.with_scale_and_position(scale, point(caret, scaled.ascent())));
                caret += scaled.h_advance(id);
                previous = Some(id);
            }
            rows.push((glyphs, caret));
        }

        let width = rows.iter().map(|(_, width)| *width).fold(0.0, f32::max);
        Self {
            rows,
            width,
            row_height: scaled.height() * LINE_SPACING,
        }
    }

    fn height(&self) -> f32 {
        self.rows.len() as f32 * self.row_height
    }

    fn left(&self, canvas_width: u32) -> f32 {
        (canvas_width as f32 - self.width) / 2.0
    }

    fn draw(
        &self,
        font: &FontArc,
        canvas: &mut RgbaImage,
        top: f32,
        color: [u8; 4],
        clip: Option<f32>,
    ) {
        let canvas_width = canvas.width() as f32;
        for (row_index, (glyphs, row_width)) in self.rows.iter().enumerate() {
            let x0 = (canvas_width - row_width) / 2.0;
            let y0 = top + row_index as f32 * self.row_height;
            for glyph in glyphs {
                let mut glyph = glyph.clone();
                glyph.position = point(x0 + glyph.position.x, y0 + glyph.position.y);
                let Some(outlined) = font.outline_glyph(glyph) else {
                    continue;
                };
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let x = bounds.min.x as i32 + gx as i32;
                    let y = bounds.min.y as i32 + gy as i32;
                    blend_pixel(canvas, x, y, coverage, color, clip);
                });
            }
        }
    }
}

/// Encodes a frame as PNG bytes for the encoder.
pub fn encode_png(frame: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    frame.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// One-line textual rendering of a state, used by the terminal preview.
pub fn describe_state(state: &TimelineState<'_>, bar_width: usize) -> String {
    let flatten = |line: Option<&LyricLine>| {
        line.map(|line| line.text.replace('\n', " / "))
            .unwrap_or_default()
    };

    match (state.current, state.progress) {
        (Some(current), Some(progress)) => {
            let filled = (progress * bar_width as f64).floor() as usize;
            format!(
                "[{}{}] {}",
                "#".repeat(filled.min(bar_width)),
                "-".repeat(bar_width - filled.min(bar_width)),
                current.text.replace('\n', " / ")
            )
        }
        _ => format!(
            "[{}] ... {} | next: {}",
            " ".repeat(bar_width),
            flatten(state.previous),
            flatten(state.next)
        ),
    }
}

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::face::FaceRegion;
use crate::pipeline::matcher::{Label, MatchResult};
use crate::pipeline::LastResults;

const MATCHED: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN: Rgb<u8> = Rgb([220, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_HEIGHT: f32 = 18.0;
const LABEL_PAD: u32 = 4;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// What gets drawn for one match result.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub region: FaceRegion,
    pub text: String,
    pub matched: bool,
}

pub fn overlays(results: &[MatchResult]) -> Vec<Overlay> {
    results
        .iter()
        .map(|r| Overlay { region: r.region, text: r.label.to_string(), matched: matches!(r.label, Label::Known(_)) })
        .collect()
}

pub struct FrameRenderer {
    jpeg_quality: u8,
    font: Option<FontVec>,
}

impl FrameRenderer {
    /// Renderer with the bundled DejaVu Sans label font.
    pub fn new(jpeg_quality: u8) -> Self {
        let font = match FontVec::try_from_vec(DEFAULT_FONT.to_vec()) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Bundled label font unusable: {}; labels will not be drawn", e);
                None
            }
        };
        Self { jpeg_quality: jpeg_quality.clamp(1, 100), font }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    /// Replace the bundled font with a TTF/OTF from disk.
    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).context(format!("Failed to read font {:?}", path))?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("Invalid font {:?}: {}", path, e))?;
        info!("Label font loaded from {:?}", path);
        Ok(self.with_font(font))
    }

    /// Draw `last` over a copy of `frame` and encode it as JPEG.
    pub fn render(&self, frame: &RgbImage, last: &LastResults) -> PipelineResult<Bytes> {
        let mut canvas = frame.clone();
        self.annotate(&mut canvas, &last.results);
        let mut buf = Vec::with_capacity(canvas.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
            .encode_image(&canvas)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    pub fn annotate(&self, canvas: &mut RgbImage, results: &[MatchResult]) {
        for overlay in overlays(results) {
            let color = if overlay.matched { MATCHED } else { UNKNOWN };
            let FaceRegion { top, left, .. } = overlay.region;
            let (w, h) = (overlay.region.width().max(1), overlay.region.height().max(1));
            draw_hollow_rect_mut(canvas, Rect::at(left as i32, top as i32).of_size(w, h), color);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(canvas, Rect::at(left as i32 + 1, top as i32 + 1).of_size(w - 2, h - 2), color);
            }

            let Some(font) = &self.font else { continue };
            let scale = PxScale::from(LABEL_HEIGHT);
            let (text_w, _) = text_size(scale, font, &overlay.text);
            let bar_w = (text_w + 2 * LABEL_PAD).max(w);
            let bar_h = LABEL_HEIGHT as u32 + LABEL_PAD;
            let (x, y) = label_origin(overlay.region, bar_w, bar_h, canvas.dimensions());
            draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(bar_w, bar_h), color);
            draw_text_mut(canvas, LABEL_TEXT, x + LABEL_PAD as i32, y + 2, scale, font, &overlay.text);
        }
    }
}

/// Top-left corner of a label bar for `region`. The bar goes below the box,
/// above it when the bottom edge is too close, and never leaves the canvas.
fn label_origin(region: FaceRegion, bar_w: u32, bar_h: u32, (canvas_w, canvas_h): (u32, u32)) -> (i32, i32) {
    let below = region.top + region.height().max(1);
    let y = if below + bar_h <= canvas_h {
        below
    } else if region.top >= bar_h {
        region.top - bar_h
    } else {
        // Frame too short for either; overlap the box
        region.top.min(canvas_h.saturating_sub(bar_h))
    };
    let x = region.left.min(canvas_w.saturating_sub(bar_w));
    (x as i32, y as i32)
}

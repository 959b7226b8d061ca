//! Per-frame overlays: labeled boxes and landmarks.

use ab_glyph::{FontRef, PxScale};
use facegreet_core::session::{FaceReport, FrameReport};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::PathBuf;

/// DejaVu Sans Mono, see `assets/DejaVuSansMono-LICENSE`.
static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

const BOX_LINE_WIDTH: u32 = 2;
const KNOWN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 120, 255]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SCALE: f32 = 14.0;
const LABEL_PADDING: u32 = 2;

/// Receives each processed frame with its match results. Output is never read back.
pub trait OverlayRenderer {
    fn render(&mut self, frame: &RgbImage, report: &FrameReport);
}

/// Logs one line per labeled face.
#[derive(Debug, Default)]
pub struct LogOverlay;

impl OverlayRenderer for LogOverlay {
    fn render(&mut self, _frame: &RgbImage, report: &FrameReport) {
        for face in &report.faces {
            tracing::debug!(
                label = %face.result,
                x = face.bbox.x,
                y = face.bbox.y,
                width = face.bbox.width,
                height = face.bbox.height,
                "face"
            );
        }
    }
}

/// Writes the latest frame that contained faces, annotated, to an image file.
pub struct SnapshotOverlay {
    path: PathBuf,
}

impl SnapshotOverlay {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OverlayRenderer for SnapshotOverlay {
    fn render(&mut self, frame: &RgbImage, report: &FrameReport) {
        if report.faces.is_empty() {
            return;
        }
        let annotated = annotate(frame, report);
        if let Err(e) = annotated.save(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write overlay snapshot");
        }
    }
}

/// Copy of `frame` with a labeled box per face (green if known, red if
/// unknown) and landmark crosses.
///
/// The label is the match result, e.g. `alice (0.42)`, drawn on a strip in the
/// box color above the box, or below it when there is no room above.
pub fn annotate(frame: &RgbImage, report: &FrameReport) -> RgbImage {
    let mut out = frame.clone();
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "overlay font unusable, drawing boxes without labels");
            None
        }
    };

    for face in &report.faces {
        let color = if face.result.label.is_unknown() {
            UNKNOWN_COLOR
        } else {
            KNOWN_COLOR
        };
        let b = &face.bbox;
        let (x, y) = (b.x.round() as i32, b.y.round() as i32);
        let (w, h) = (b.width.round().max(1.0) as u32, b.height.round().max(1.0) as u32);
        for inset in 0..BOX_LINE_WIDTH {
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(
                w.saturating_sub(2 * inset).max(1),
                h.saturating_sub(2 * inset).max(1),
            );
            draw_hollow_rect_mut(&mut out, rect, color);
        }
        for &(lx, ly) in b.landmarks.iter().flatten() {
            draw_cross_mut(&mut out, LANDMARK_COLOR, lx.round() as i32, ly.round() as i32);
        }
        if let Some(font) = &font {
            draw_label(&mut out, font, face, (x, y, h), color);
        }
    }
    out
}

fn draw_label(
    img: &mut RgbImage,
    font: &FontRef<'_>,
    face: &FaceReport,
    (x, y, h): (i32, i32, u32),
    background: Rgb<u8>,
) {
    let text = face.result.to_string();
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, _) = text_size(scale, font, &text);
    let strip_w = text_w + 2 * LABEL_PADDING;
    let strip_h = LABEL_SCALE.ceil() as u32 + 2 * LABEL_PADDING;

    let strip_y = if y >= strip_h as i32 {
        y - strip_h as i32
    } else {
        y + h as i32
    };
    draw_filled_rect_mut(img, Rect::at(x, strip_y).of_size(strip_w, strip_h), background);
    draw_text_mut(
        img,
        LABEL_TEXT_COLOR,
        x + LABEL_PADDING as i32,
        strip_y + LABEL_PADDING as i32,
        scale,
        font,
        &text,
    );
}

//! Preview window with detection overlays, backed by `minifb`.

use crate::frame::Frame;
use ab_glyph::{FontVec, PxScale};
use facereg_core::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use minifb::{Key, Window, WindowOptions};
use std::path::Path;
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 24.0;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("window error: {0}")]
    Window(String),
    #[error("failed to load font {path}: {reason}")]
    Font { path: String, reason: String },
}

/// Something drawn on top of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    /// Outline around a detected face.
    Face(BoundingBox),
    /// Text whose baseline starts at (x, y).
    Text { x: i32, y: i32, text: String, color: [u8; 3] },
}

impl Overlay {
    pub fn text(x: i32, y: i32, text: impl Into<String>) -> Self {
        Overlay::Text { x, y, text: text.into(), color: [255, 255, 255] }
    }

    /// Caption placed just above a face box.
    pub fn caption(face: &BoundingBox, text: impl Into<String>) -> Self {
        Overlay::Text {
            x: face.x as i32,
            y: face.y as i32 - 10,
            text: text.into(),
            color: BOX_COLOR.0,
        }
    }
}

/// Capability: present frames to the user and report a quit request.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), DisplayError>;

    /// True once the user pressed `q` or closed the window.
    fn quit_requested(&self) -> bool;
}

/// Render a grayscale frame as RGB with overlays drawn on it.
///
/// Without a font, text overlays are skipped; the caller decides where the
/// text goes instead.
pub fn render(frame: &Frame, overlays: &[Overlay], font: Option<&FontVec>) -> RgbImage {
    let mut canvas = RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let v = frame.image.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    });

    for overlay in overlays {
        match overlay {
            Overlay::Face(b) => {
                for t in 0..BOX_THICKNESS {
                    if b.width <= 2 * t || b.height <= 2 * t {
                        break;
                    }
                    let rect = Rect::at((b.x + t) as i32, (b.y + t) as i32)
                        .of_size(b.width - 2 * t, b.height - 2 * t);
                    draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
                }
            }
            Overlay::Text { x, y, text, color } => {
                if let Some(font) = font {
                    let top = (*y - TEXT_SCALE as i32).max(0);
                    draw_text_mut(
                        &mut canvas,
                        Rgb(*color),
                        (*x).max(0),
                        top,
                        PxScale::from(TEXT_SCALE),
                        font,
                        text,
                    );
                }
            }
        }
    }

    canvas
}

/// Pack an RGB image into minifb's 0RGB u32 pixels.
fn to_argb(image: &RgbImage) -> Vec<u32> {
    image
        .pixels()
        .map(|p| ((p.0[0] as u32) << 16) | ((p.0[1] as u32) << 8) | p.0[2] as u32)
        .collect()
}

/// Desktop preview window. Closed when dropped.
pub struct Display {
    window: Window,
    title: String,
    font: Option<FontVec>,
}

impl Display {
    /// Open a window sized for `width` x `height` frames.
    ///
    /// `font_path` enables on-frame text; without it, captions are shown in
    /// the window title.
    pub fn open(
        title: &str,
        width: u32,
        height: u32,
        font_path: Option<&Path>,
    ) -> Result<Self, DisplayError> {
        let font = font_path.map(load_font).transpose()?;

        let mut window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions::default(),
        )
        .map_err(|e| DisplayError::Window(e.to_string()))?;
        window.set_target_fps(60);

        tracing::debug!(title, width, height, text = font.is_some(), "opened preview window");

        Ok(Self {
            window,
            title: title.to_string(),
            font,
        })
    }
}

fn load_font(path: &Path) -> Result<FontVec, DisplayError> {
    let err = |reason: String| DisplayError::Font {
        path: path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| err(e.to_string()))?;
    FontVec::try_from_vec(bytes).map_err(|e| err(e.to_string()))
}

impl FrameSink for Display {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), DisplayError> {
        let canvas = render(frame, overlays, self.font.as_ref());

        if self.font.is_none() {
            let captions: Vec<&str> = overlays
                .iter()
                .filter_map(|o| match o {
                    Overlay::Text { text, .. } => Some(text.as_str()),
                    Overlay::Face(_) => None,
                })
                .collect();
            let title = if captions.is_empty() {
                self.title.clone()
            } else {
                format!("{} - {}", self.title, captions.join(" | "))
            };
            self.window.set_title(&title);
        }

        self.window
            .update_with_buffer(
                &to_argb(&canvas),
                canvas.width() as usize,
                canvas.height() as usize,
            )
            .map_err(|e| DisplayError::Window(e.to_string()))
    }

    fn quit_requested(&self) -> bool {
        !self.window.is_open() || self.window.is_key_down(Key::Q)
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        tracing::debug!(title = %self.title, "closing preview window");
    }
}

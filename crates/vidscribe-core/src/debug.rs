use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sampler::EncodedFrame;

const TEXT_SCALE: f32 = 28.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_HEIGHT: u32 = 40;

/// Renders sampled frames, as sent to the model, with a frame/time label.
pub struct DebugRenderer {
    font: Option<FontVec>,
}

impl DebugRenderer {
    /// Without a usable font the frames are still saved, just unlabelled.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(Self::load_font);
        Self { font }
    }

    pub fn save_frame(&self, frame: &EncodedFrame, dir: &Path) -> Result<PathBuf> {
        let mut img = image::load_from_memory(&frame.jpeg)?.into_rgb8();

        self.draw_label(&mut img, frame);

        let path = dir.join(frame_file_name(frame.frame_number));
        img.save(&path)?;

        debug!(?path, frame_number = frame.frame_number, "saved debug frame");
        Ok(path)
    }

    fn draw_label(&self, img: &mut RgbImage, frame: &EncodedFrame) {
        let Some(font) = &self.font else { return };

        let height = LABEL_HEIGHT.min(img.height());
        draw_filled_rect_mut(img, Rect::at(0, 0).of_size(img.width(), height), LABEL_BACKGROUND);

        let text = format!("F:{} T:{:.2}s", frame.frame_number, frame.timestamp_seconds);
        draw_text_mut(img, TEXT_COLOR, 10, 6, PxScale::from(TEXT_SCALE), font, &text);
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded debug font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

fn frame_file_name(frame_number: u32) -> String {
    format!("frame_{frame_number:08}.png")
}

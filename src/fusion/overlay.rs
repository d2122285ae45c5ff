use crate::config::FusionConfig;
use crate::detection::{BoundingBox, Detection};
use crate::stage::{FallSnapshot, ObjectSnapshot, ToddlerSnapshot};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::fs;
use tracing::{debug, warn};

pub const OBJECT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TODDLER_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
pub const FALL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const FALL_BOX_THICKNESS: i32 = 5;
const FALL_CAPTION: &str = "FALL DETECTED";

/// Draws stage results onto frames
///
/// Boxes are always drawn; captions only when a font could be loaded.
pub struct OverlayPainter {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl OverlayPainter {
    pub fn new(font: Option<Font<'static>>, font_size: f32) -> Self {
        Self {
            font,
            scale: Scale::uniform(font_size.max(1.0)),
        }
    }

    /// Load the configured label font, drawing boxes only if that fails
    pub fn from_config(config: &FusionConfig) -> Self {
        let font = config.font_path.as_deref().and_then(|path| {
            let font = fs::read(path)
                .map_err(|e| warn!("Failed to read overlay font '{}': {}", path, e))
                .ok()
                .and_then(Font::try_from_vec);
            match &font {
                Some(_) => debug!("Loaded overlay font '{}'", path),
                None => warn!("Overlay font '{}' unusable, drawing boxes without labels", path),
            }
            font
        });

        Self::new(font, config.font_size)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every stage's latest results onto `image`
    pub fn annotate(
        &self,
        image: &mut RgbImage,
        objects: &ObjectSnapshot,
        toddler: Option<&ToddlerSnapshot>,
        fall: Option<&FallSnapshot>,
    ) {
        for detection in &objects.detections {
            self.draw_detection(image, detection, OBJECT_COLOR);
        }

        let toddler_detections = toddler.map_or(&[][..], |t| t.detections.as_slice());
        for detection in toddler_detections {
            self.draw_detection(image, detection, TODDLER_COLOR);
        }

        if let Some(fallen) = fall.filter(|f| f.fall_present).and_then(FallSnapshot::primary_fall) {
            self.draw_box(
                image,
                &fallen.bbox,
                Some(FALL_CAPTION),
                FALL_COLOR,
                FALL_BOX_THICKNESS,
            );
        }
    }

    pub fn draw_detection(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let caption = detection.caption();
        self.draw_box(image, &detection.bbox, Some(&caption), color, BOX_THICKNESS);
    }

    /// Outline `bbox` with a `thickness`-pixel stroke growing outwards
    pub fn draw_box(
        &self,
        image: &mut RgbImage,
        bbox: &BoundingBox,
        caption: Option<&str>,
        color: Rgb<u8>,
        thickness: i32,
    ) {
        for inset in 0..thickness.max(1) {
            let width = bbox.width() + 2 * inset;
            let height = bbox.height() + 2 * inset;
            let rect = Rect::at(bbox.x1 - inset, bbox.y1 - inset)
                .of_size(width.max(1) as u32, height.max(1) as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        if let (Some(caption), Some(font)) = (caption, self.font.as_ref()) {
            self.draw_caption(image, font, bbox, caption, color);
        }
    }

    fn draw_caption(
        &self,
        image: &mut RgbImage,
        font: &Font<'static>,
        bbox: &BoundingBox,
        caption: &str,
        color: Rgb<u8>,
    ) {
        let (text_width, text_height) = text_size(self.scale, font, caption);
        let background_height = text_height + 10;
        // keep the caption on screen when the box touches the top edge
        let top = (bbox.y1 - background_height).max(0);

        let background = Rect::at(bbox.x1, top).of_size(
            (text_width + 4).max(1) as u32,
            background_height.max(1) as u32,
        );
        draw_filled_rect_mut(image, background, color);
        draw_text_mut(
            image,
            LABEL_TEXT_COLOR,
            bbox.x1 + 2,
            top + 5,
            self.scale,
            font,
            caption,
        );
    }
}

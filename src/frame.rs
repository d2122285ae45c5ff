use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One decoded video frame as produced by the source
///
/// The pixel buffer is shared between every consumer the frame is delivered
/// to; a consumer that wants to draw on it works on its own copy
/// (see [`Frame::to_owned_image`]).
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonically increasing sequence number assigned by the source
    pub seq: u64,
    /// Presentation timestamp relative to the start of the stream
    pub pts: Duration,
    /// Wall-clock time the frame was captured
    pub timestamp: SystemTime,
    /// Decoded RGB pixels
    pub image: Arc<RgbImage>,
}

impl Frame {
    /// Create a new frame
    pub fn new(seq: u64, pts: Duration, timestamp: SystemTime, image: RgbImage) -> Self {
        Self {
            seq,
            pts,
            timestamp,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy the pixels out so they can be mutated (e.g. for overlays)
    pub fn to_owned_image(&self) -> RgbImage {
        self.image.as_ref().clone()
    }

    /// Build a frame that carries new pixels but keeps this frame's timing
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            seq: self.seq,
            pts: self.pts,
            timestamp: self.timestamp,
            image: Arc::new(image),
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(
            7,
            Duration::from_millis(233),
            SystemTime::now(),
            RgbImage::new(64, 48),
        );

        assert_eq!(frame.seq, 7);
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.pts, Duration::from_millis(233));
    }

    #[test]
    fn test_owned_copy_does_not_touch_shared_pixels() {
        let frame = Frame::new(1, Duration::ZERO, SystemTime::now(), RgbImage::new(4, 4));
        let clone = frame.clone();

        let mut copy = frame.to_owned_image();
        copy.put_pixel(0, 0, Rgb([255, 0, 0]));

        assert_eq!(*clone.image.get_pixel(0, 0), Rgb([0, 0, 0]));
        let annotated = frame.with_image(copy);
        assert_eq!(annotated.seq, frame.seq);
        assert_eq!(*annotated.image.get_pixel(0, 0), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_frame_age() {
        let frame = Frame::new(
            1,
            Duration::ZERO,
            SystemTime::now() - Duration::from_millis(100),
            RgbImage::new(1, 1),
        );
        assert!(frame.age_ms() >= 100);
    }
}

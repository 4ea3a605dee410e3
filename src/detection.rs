//! Keep/drop decision for sampled frames.

use image::RgbImage;

use crate::error::Result;
use crate::types::{BoxSpace, Detection, Frame, RawDetection};

/// Confidence threshold used when none is configured.
pub const DEFAULT_CONFIDENCE: f32 = 0.2;

/// A loaded object-detection model.
pub trait Detector {
    /// Detections in `image` scoring at least `confidence`.
    fn predict(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<RawDetection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn predict(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<RawDetection>> {
        (**self).predict(image, confidence)
    }
}

/// Outcome of filtering one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Keep(Vec<Detection>),
    Drop,
}

impl FilterDecision {
    pub fn is_keep(&self) -> bool {
        matches!(self, FilterDecision::Keep(_))
    }
}

/// Runs the detector and turns its output into label-ready detections.
///
/// Never touches the dataset on disk.
pub struct DetectionFilter {
    confidence: f32,
}

impl DetectionFilter {
    pub fn new(confidence: f32) -> Self {
        Self { confidence }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn filter<D: Detector + ?Sized>(
        &self,
        frame: &Frame,
        detector: &mut D,
    ) -> Result<FilterDecision> {
        let raw = detector.predict(&frame.image, self.confidence)?;
        let detections: Vec<Detection> = raw
            .iter()
            .filter(|d| d.confidence >= self.confidence)
            .map(|d| normalize(d, frame.width(), frame.height()))
            .filter(|d| d.width > 0.0 && d.height > 0.0)
            .collect();

        if detections.is_empty() {
            Ok(FilterDecision::Drop)
        } else {
            Ok(FilterDecision::Keep(detections))
        }
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE)
    }
}

/// Express a detector box as fractions of the frame size, clamped to the frame.
///
/// A box lying wholly outside the frame comes back with zero width or height.
pub fn normalize(raw: &RawDetection, frame_width: u32, frame_height: u32) -> Detection {
    let (sx, sy) = match raw.space {
        BoxSpace::Normalized => (1.0, 1.0),
        BoxSpace::Pixel => (frame_width.max(1) as f64, frame_height.max(1) as f64),
    };

    // Clip the box corners to the frame before converting back to center/size.
    let x_min = ((raw.center_x as f64 - raw.width as f64 / 2.0) / sx).clamp(0.0, 1.0);
    let x_max = ((raw.center_x as f64 + raw.width as f64 / 2.0) / sx).clamp(0.0, 1.0);
    let y_min = ((raw.center_y as f64 - raw.height as f64 / 2.0) / sy).clamp(0.0, 1.0);
    let y_max = ((raw.center_y as f64 + raw.height as f64 / 2.0) / sy).clamp(0.0, 1.0);

    Detection {
        class_id: raw.class_id,
        center_x: (x_min + x_max) / 2.0,
        center_y: (y_min + y_max) / 2.0,
        width: x_max - x_min,
        height: y_max - y_min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<RawDetection>);

    impl Detector for Fixed {
        fn predict(&mut self, _image: &RgbImage, _confidence: f32) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            video: "v".into(),
            index: 1,
            timestamp: "t".into(),
            image: RgbImage::new(width, height),
        }
    }

    fn pixel(class_id: usize, cx: f32, cy: f32, w: f32, h: f32, conf: f32) -> RawDetection {
        RawDetection {
            class_id,
            center_x: cx,
            center_y: cy,
            width: w,
            height: h,
            confidence: conf,
            space: BoxSpace::Pixel,
        }
    }

    #[test]
    fn empty_result_drops_frame() {
        let filter = DetectionFilter::default();
        let decision = filter.filter(&frame(10, 10), &mut Fixed(vec![])).unwrap();
        assert_eq!(decision, FilterDecision::Drop);
    }

    #[test]
    fn pixel_boxes_are_normalized() {
        let filter = DetectionFilter::default();
        let mut detector = Fixed(vec![pixel(7, 50.0, 25.0, 20.0, 10.0, 0.9)]);
        let decision = filter.filter(&frame(100, 50), &mut detector).unwrap();
        let FilterDecision::Keep(detections) = decision else {
            panic!("expected keep");
        };
        assert_eq!(detections.len(), 1);
        let d = detections[0];
        assert_eq!(d.class_id, 7);
        assert!((d.center_x - 0.5).abs() < 1e-9);
        assert!((d.center_y - 0.5).abs() < 1e-9);
        assert!((d.width - 0.2).abs() < 1e-9);
        assert!((d.height - 0.2).abs() < 1e-9);
    }

    #[test]
    fn normalized_boxes_pass_through() {
        let raw = RawDetection {
            class_id: 2,
            center_x: 0.25,
            center_y: 0.75,
            width: 0.1,
            height: 0.2,
            confidence: 0.5,
            space: BoxSpace::Normalized,
        };
        let d = normalize(&raw, 640, 480);
        assert!((d.center_x - 0.25).abs() < 1e-6);
        assert!((d.center_y - 0.75).abs() < 1e-6);
        assert!((d.width - 0.1).abs() < 1e-6);
        assert!((d.height - 0.2).abs() < 1e-6);
    }

    #[test]
    fn boxes_overhanging_the_frame_are_clamped() {
        let d = normalize(&pixel(0, 0.0, 100.0, 40.0, 40.0, 0.9), 100, 100);
        for v in [d.center_x, d.center_y, d.width, d.height] {
            assert!((0.0..=1.0).contains(&v), "{} out of range", v);
        }
        assert!((d.width - 0.2).abs() < 1e-9);
        assert!((d.center_x - 0.1).abs() < 1e-9);
    }

    #[test]
    fn boxes_outside_the_frame_are_discarded() {
        let filter = DetectionFilter::default();
        let mut detector = Fixed(vec![
            pixel(0, -50.0, 50.0, 20.0, 10.0, 0.9),
            pixel(1, 50.0, 140.0, 10.0, 20.0, 0.9),
        ]);
        assert_eq!(
            filter.filter(&frame(100, 100), &mut detector).unwrap(),
            FilterDecision::Drop
        );

        detector.0.push(pixel(2, 50.0, 50.0, 10.0, 10.0, 0.9));
        let FilterDecision::Keep(detections) = filter.filter(&frame(100, 100), &mut detector).unwrap()
        else {
            panic!("expected keep");
        };
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 2);
    }

    #[test]
    fn low_confidence_detections_are_discarded() {
        let filter = DetectionFilter::new(0.5);
        let mut detector = Fixed(vec![pixel(1, 5.0, 5.0, 2.0, 2.0, 0.3)]);
        assert_eq!(
            filter.filter(&frame(10, 10), &mut detector).unwrap(),
            FilterDecision::Drop
        );
    }
}

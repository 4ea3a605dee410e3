use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

// Video containers picked up from the downloads folder
pub const VIDEO_FORMATS: &[&str] = &["mp4", "webm", "mkv", "mov", "avi"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Encoding used for kept frames under `images/train`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    pub fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
        }
    }
}

// A sampled frame. Lives for one sampling iteration unless it is kept.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sanitized name of the source video, used to namespace stems.
    pub video: String,
    /// 1-indexed position among all decoded frames of the video.
    pub index: u64,
    /// Capture timestamp shared by every frame of one sampling run.
    pub timestamp: String,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Stem shared by the image and label file of this frame.
    pub fn stem(&self) -> String {
        format!("frame_{}_{}_{}", self.timestamp, self.video, self.index)
    }
}

/// Coordinate space of a box returned by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSpace {
    Pixel,
    Normalized,
}

// What a detector reports for one object: center/size box plus confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub space: BoxSpace,
}

// A detection as persisted in a label file: fractions of the frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone)]
pub struct ProcessingStats {
    pub videos_processed: usize,
    pub videos_failed: usize,
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub frames_kept: u64,
    pub frames_dropped: u64,
    pub detections_written: u64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &ProcessingStats) {
        self.videos_processed += other.videos_processed;
        self.videos_failed += other.videos_failed;
        self.frames_decoded += other.frames_decoded;
        self.frames_sampled += other.frames_sampled;
        self.frames_kept += other.frames_kept;
        self.frames_dropped += other.frames_dropped;
        self.detections_written += other.detections_written;
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Videos processed: {}", self.videos_processed);
        log::info!("Frames decoded: {}", self.frames_decoded);
        log::info!("Frames sampled: {}", self.frames_sampled);
        log::info!("Frames kept: {}", self.frames_kept);
        log::info!("Frames dropped (no detections): {}", self.frames_dropped);
        log::info!("Detections written: {}", self.detections_written);

        if self.videos_failed > 0 {
            log::warn!("Videos that could not be opened: {}", self.videos_failed);
        }
    }
}

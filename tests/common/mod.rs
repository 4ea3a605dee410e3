#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::path::Path;

use video2yolo::types::{BoxSpace, RawDetection};
use video2yolo::{DecoderFactory, Detector, PipelineError, Result, VideoDecoder};

/// Decoder producing `total` small frames whose first pixel encodes the
/// 1-indexed frame position.
pub struct SyntheticVideo {
    pub total: u64,
    pub produced: u64,
}

impl SyntheticVideo {
    pub fn new(total: u64) -> Self {
        Self { total, produced: 0 }
    }
}

pub fn encode_index(index: u64) -> RgbImage {
    let mut image = RgbImage::new(64, 48);
    image.put_pixel(0, 0, Rgb([(index / 256) as u8, (index % 256) as u8, 0]));
    image
}

pub fn decode_index(image: &RgbImage) -> u64 {
    let pixel = image.get_pixel(0, 0);
    pixel[0] as u64 * 256 + pixel[1] as u64
}

impl VideoDecoder for SyntheticVideo {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.produced == self.total {
            return Ok(None);
        }
        self.produced += 1;
        Ok(Some(encode_index(self.produced)))
    }
}

/// Opens every video as a synthetic one; names containing `broken` fail.
pub struct SyntheticFactory {
    pub frames: u64,
}

impl DecoderFactory for SyntheticFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        if path.to_string_lossy().contains("broken") {
            return Err(PipelineError::external("ffprobe", "unreadable"));
        }
        Ok(Box::new(SyntheticVideo::new(self.frames)))
    }
}

/// Fires on the listed frame positions with one box per listed class.
pub struct ScriptedDetector {
    pub hits: Vec<u64>,
    pub classes: Vec<usize>,
    pub calls: u64,
}

impl ScriptedDetector {
    pub fn on(hits: &[u64]) -> Self {
        Self {
            hits: hits.to_vec(),
            classes: vec![0],
            calls: 0,
        }
    }
}

impl Detector for ScriptedDetector {
    fn predict(&mut self, image: &RgbImage, _confidence: f32) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        let index = decode_index(image);
        if !self.hits.contains(&index) {
            return Ok(Vec::new());
        }
        Ok(self
            .classes
            .iter()
            .map(|&class_id| RawDetection {
                class_id,
                center_x: 32.0,
                center_y: 24.0,
                width: 16.0,
                height: 12.0,
                confidence: 0.9,
                space: BoxSpace::Pixel,
            })
            .collect())
    }
}

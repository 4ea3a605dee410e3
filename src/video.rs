//! Video discovery and decoding.
//!
//! Decoding goes through the [`VideoDecoder`] trait so the sampler can be
//! driven by OpenCV in production and by synthetic frames in tests.

use image::RgbImage;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::types::VIDEO_FORMATS;

/// A source of decoded frames, read strictly in order.
pub trait VideoDecoder {
    /// The next decoded frame, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

impl<D: VideoDecoder + ?Sized> VideoDecoder for Box<D> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }
}

/// Opens videos for decoding. Lets the processing stage stay independent of
/// the concrete decoder.
pub trait DecoderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>>;
}

/// List video files directly inside `dir`, sorted by name.
pub fn find_video_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }

    let mut videos: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_FORMATS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    videos.sort();

    info!("Found {} video files in {}", videos.len(), dir.display());
    Ok(videos)
}

/// Decodes a video through OpenCV's `VideoCapture`.
///
/// Frame dimensions are taken from every decoded `Mat`, so rotated or
/// resized streams never reach the detector with a stale size.
#[cfg(feature = "opencv")]
pub struct CaptureDecoder {
    cap: opencv::videoio::VideoCapture,
    decoded: u64,
}

#[cfg(feature = "opencv")]
impl CaptureDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        use opencv::prelude::*;
        use opencv::videoio::{self, VideoCapture, VideoCaptureTraitConst};

        if !path.is_file() {
            return Err(PipelineError::NotFound(path.to_path_buf()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| PipelineError::external("opencv", "video path is not valid UTF-8"))?;

        info!("Opening video: {}", path.display());
        let cap = VideoCapture::from_file(name, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(PipelineError::external(
                "opencv",
                format!("failed to open {}", path.display()),
            ));
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames =
            VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i64;
        debug!(
            "Video properties: {:.1} FPS, {} frames",
            fps, total_frames
        );

        Ok(Self { cap, decoded: 0 })
    }
}

#[cfg(feature = "opencv")]
impl VideoDecoder for CaptureDecoder {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        use opencv::core::Mat;
        use opencv::imgproc;
        use opencv::prelude::*;
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            debug!("End of stream after {} frames", self.decoded);
            return Ok(None);
        }
        self.decoded += 1;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let data = if rgb.is_continuous() {
            rgb.data_bytes()?.to_vec()
        } else {
            rgb.try_clone()?.data_bytes()?.to_vec()
        };

        RgbImage::from_raw(width, height, data)
            .map(Some)
            .ok_or_else(|| PipelineError::external("opencv", "frame buffer size mismatch"))
    }
}

/// Opens every video with [`CaptureDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureDecoderFactory;

impl DecoderFactory for CaptureDecoderFactory {
    #[cfg(feature = "opencv")]
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(CaptureDecoder::open(path)?))
    }

    #[cfg(not(feature = "opencv"))]
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        Err(PipelineError::external(
            "opencv",
            format!(
                "cannot decode {}: built without the `opencv` feature",
                path.display()
            ),
        ))
    }
}

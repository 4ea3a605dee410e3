use log::{info, warn};
use std::path::Path;

use crate::conversion::write_kept_frame;
use crate::detection::{DetectionFilter, Detector, FilterDecision};
use crate::error::{ConfigError, Result};
use crate::io::OutputDirs;
use crate::sampler::FrameSampler;
use crate::types::{ImageFormat, ProcessingStats};
use crate::utils::{capture_timestamp, create_progress_bar, video_namespace};
use crate::video::{find_video_files, DecoderFactory, VideoDecoder};

/// Per-run knobs for turning videos into dataset entries.
#[derive(Debug, Clone, Copy)]
pub struct SamplingSettings {
    pub interval: u64,
    pub image_format: ImageFormat,
}

/// Sample one video, keep frames the detector fires on, write them out.
pub fn process_video<D, M>(
    decoder: D,
    video: &str,
    timestamp: &str,
    settings: SamplingSettings,
    filter: &DetectionFilter,
    detector: &mut M,
    dirs: &OutputDirs,
) -> Result<ProcessingStats>
where
    D: VideoDecoder,
    M: Detector + ?Sized,
{
    let mut stats = ProcessingStats::new();
    let mut sampler = FrameSampler::new(
        decoder,
        settings.interval,
        video.to_string(),
        timestamp.to_string(),
    )
    .ok_or_else(|| {
        ConfigError::Invalid(vec![
            "processing.sample_interval must be greater than 0".to_string(),
        ])
    })?;

    for frame in sampler.by_ref() {
        stats.frames_sampled += 1;
        match filter.filter(&frame, detector)? {
            FilterDecision::Keep(detections) => {
                write_kept_frame(dirs, &frame, &detections, settings.image_format)?;
                stats.frames_kept += 1;
                stats.detections_written += detections.len() as u64;
            }
            FilterDecision::Drop => stats.frames_dropped += 1,
        }
    }

    stats.frames_decoded = sampler.frames_decoded();
    stats.videos_processed = 1;
    Ok(stats)
}

/// Main dataset processing pipeline: every video in `videos_dir`, in name order.
///
/// A video that cannot be opened is logged and skipped; write and inference
/// failures abort the run.
pub fn process_dataset<M: Detector + ?Sized>(
    videos_dir: &Path,
    dirs: &OutputDirs,
    settings: SamplingSettings,
    filter: &DetectionFilter,
    decoders: &dyn DecoderFactory,
    detector: &mut M,
) -> Result<ProcessingStats> {
    let videos = find_video_files(videos_dir)?;
    let mut stats = ProcessingStats::new();

    let pb = create_progress_bar(videos.len() as u64, "Videos");
    for video_path in &videos {
        let decoder = match decoders.open(video_path) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Skipping video {}: {}", video_path.display(), e);
                stats.videos_failed += 1;
                pb.inc(1);
                continue;
            }
        };

        let namespace = video_namespace(video_path);
        let video_stats = process_video(
            decoder,
            &namespace,
            &capture_timestamp(),
            settings,
            filter,
            detector,
            dirs,
        )?;
        info!(
            "{}: kept {} of {} sampled frames",
            video_path.display(),
            video_stats.frames_kept,
            video_stats.frames_sampled
        );
        stats.merge(&video_stats);
        pb.inc(1);
    }
    pb.finish_with_message("Video processing complete");

    stats.print_summary();
    Ok(stats)
}

use glob::glob;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PipelineError, Result};

/// Re-encodes one video file into another pixel format.
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path, pixel_format: &str) -> Result<()>;
}

/// `ffmpeg -y -i <in> -pix_fmt <fmt> <out>`
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTranscoder;

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path, pixel_format: &str) -> Result<()> {
        let result = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-i"])
            .arg(input)
            .args(["-pix_fmt", pixel_format])
            .arg(output)
            .output()
            .map_err(|e| PipelineError::external("ffmpeg", e.to_string()))?;

        if result.status.success() {
            Ok(())
        } else {
            Err(PipelineError::external(
                "ffmpeg",
                format!(
                    "{} ({})",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            ))
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscodeReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

const PROCESSED_PREFIX: &str = "processed_";

/// Output path for a video while it is being re-encoded.
pub fn processed_path(video: &Path) -> PathBuf {
    let name = video
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{}{}", PROCESSED_PREFIX, name))
}

/// Re-encode every `*.<ext>` video in `folder` to `pixel_format`, in place.
///
/// A video that fails to convert keeps its original file; the partial output
/// is removed and the remaining videos are still attempted.
pub fn fix_video_format(
    folder: &Path,
    extensions: &[String],
    pixel_format: &str,
    transcoder: &dyn Transcoder,
) -> Result<TranscodeReport> {
    if !folder.is_dir() {
        return Err(PipelineError::NotFound(folder.to_path_buf()));
    }

    let mut videos = Vec::new();
    for ext in extensions {
        let pattern = folder.join(format!("*.{}", ext.trim_start_matches('.')));
        let entries = glob(&pattern.to_string_lossy())
            .map_err(|e| PipelineError::Io(std::io::Error::other(e.to_string())))?;
        videos.extend(entries.filter_map(|entry| entry.ok()));
    }
    videos.sort();
    videos.dedup();
    videos.retain(|video| {
        let leftover = video
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(PROCESSED_PREFIX))
            .unwrap_or(false);
        if leftover {
            warn!("Skipping leftover output {}", video.display());
        }
        !leftover
    });

    let mut report = TranscodeReport::default();
    for video in videos {
        let output = processed_path(&video);
        info!("Converting {} to {}", video.display(), pixel_format);
        let result = transcoder
            .transcode(&video, &output, pixel_format)
            .and_then(|()| fs::rename(&output, &video).map_err(PipelineError::from));
        match result {
            Ok(()) => report.converted.push(video),
            Err(e) => {
                warn!("Failed to convert {}: {}", video.display(), e);
                if output.exists() {
                    let _ = fs::remove_file(&output);
                }
                report.failed.push(video);
            }
        }
    }

    info!(
        "Converted {} videos in {} ({} failed)",
        report.converted.len(),
        folder.display(),
        report.failed.len()
    );
    Ok(report)
}

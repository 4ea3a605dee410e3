//! The six pipeline stages and their wiring from configuration.
//!
//! Collaborators that need credentials or a model file are connected when
//! their stage starts, so a disabled stage never asks for them and a
//! connection failure is recorded as that stage's failure.

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::archive::{compress_folder, import_labels};
use crate::config::{CvatConfig, PipelineConfig, ProcessingConfig, TranscodeConfig, YoutubeConfig};
use crate::dataset::{process_dataset, SamplingSettings};
use crate::detection::{DetectionFilter, Detector};
use crate::error::{ConfigError, PipelineError, Result};
use crate::io::{prune_manifest, setup_output_directories, OutputDirs};
use crate::orchestrator::{Orchestrator, Stage};
use crate::platform::AnnotationPlatform;
use crate::reconcile::compare_and_remove;
use crate::source::{fetch_videos, VideoSource};
use crate::state::{DownloadLog, StateStore};
use crate::transcode::{fix_video_format, Transcoder};
use crate::types::{get_image_extensions_set, ProcessingStats};
use crate::utils::{ensure_directory, resolve_task_name};
use crate::video::DecoderFactory;

pub const DOWNLOAD_VIDEOS: &str = "download_videos";
pub const FIX_VIDEO_FORMAT: &str = "fix_video_format";
pub const PROCESS_VIDEOS: &str = "process_videos";
pub const DOWNLOAD_LABELS: &str = "download_labels";
pub const CLEAR_EMPTY_LABELS: &str = "clear_empty_labels";
pub const UPLOAD_LABELS: &str = "upload_labels";

/// Stage names in execution order.
pub const STAGE_ORDER: [&str; 6] = [
    DOWNLOAD_VIDEOS,
    FIX_VIDEO_FORMAT,
    PROCESS_VIDEOS,
    DOWNLOAD_LABELS,
    CLEAR_EMPTY_LABELS,
    UPLOAD_LABELS,
];

/// Loads the detection model on demand.
pub type DetectorLoader<'a> = Box<dyn FnMut() -> Result<Box<dyn Detector + 'a>> + 'a>;

/// Opens an annotation platform session on demand. Shared by the two
/// platform stages.
pub type PlatformConnector<'a> = Rc<dyn Fn() -> Result<Box<dyn AnnotationPlatform + 'a>> + 'a>;

pub struct DownloadVideos<'a> {
    pub source: Box<dyn VideoSource + 'a>,
    pub store: &'a dyn StateStore,
    pub youtube: YoutubeConfig,
    pub downloads: PathBuf,
}

impl Stage for DownloadVideos<'_> {
    fn name(&self) -> &str {
        DOWNLOAD_VIDEOS
    }

    fn run(&mut self) -> Result<()> {
        let mut log = DownloadLog::load(self.store)?;
        info!("{} videos already downloaded", log.len());
        for query in self.youtube.queries.iter().filter(|q| !q.trim().is_empty()) {
            fetch_videos(
                self.source.as_mut(),
                &mut log,
                self.store,
                query,
                self.youtube.num_videos,
                self.youtube.resolution,
                &self.downloads,
            )?;
        }
        Ok(())
    }
}

pub struct FixVideoFormat<'a> {
    pub transcoder: Box<dyn Transcoder + 'a>,
    pub transcode: TranscodeConfig,
    pub downloads: PathBuf,
}

impl Stage for FixVideoFormat<'_> {
    fn name(&self) -> &str {
        FIX_VIDEO_FORMAT
    }

    fn run(&mut self) -> Result<()> {
        fix_video_format(
            &self.downloads,
            &self.transcode.extensions,
            &self.transcode.pixel_format,
            self.transcoder.as_ref(),
        )?;
        Ok(())
    }
}

pub struct ProcessVideos<'a> {
    pub decoders: Box<dyn DecoderFactory + 'a>,
    pub detector: DetectorLoader<'a>,
    pub processing: ProcessingConfig,
    pub downloads: PathBuf,
    pub output: PathBuf,
    /// Counters of the last successful run.
    pub stats: ProcessingStats,
}

impl<'a> ProcessVideos<'a> {
    pub fn new(
        decoders: Box<dyn DecoderFactory + 'a>,
        detector: DetectorLoader<'a>,
        processing: ProcessingConfig,
        downloads: &Path,
        output: &Path,
    ) -> Self {
        Self {
            decoders,
            detector,
            processing,
            downloads: downloads.to_path_buf(),
            output: output.to_path_buf(),
            stats: ProcessingStats::new(),
        }
    }
}

impl Stage for ProcessVideos<'_> {
    fn name(&self) -> &str {
        PROCESS_VIDEOS
    }

    fn run(&mut self) -> Result<()> {
        self.processing.validate()?;
        let dirs = setup_output_directories(&self.output, &self.processing.classes)?;
        let mut detector = (self.detector)()?;

        let settings = SamplingSettings {
            interval: self.processing.sample_interval,
            image_format: self.processing.image_format,
        };
        let filter = DetectionFilter::new(self.processing.confidence);
        self.stats = process_dataset(
            &self.downloads,
            &dirs,
            settings,
            &filter,
            self.decoders.as_ref(),
            detector.as_mut(),
        )?;

        compress_folder(&dirs.root, &dirs.labels_archive())?;
        Ok(())
    }
}

pub struct DownloadLabels<'a> {
    pub platform: PlatformConnector<'a>,
    pub cvat: CvatConfig,
    pub output: PathBuf,
    /// Where exported archives are kept, outside the dataset tree.
    pub exports: PathBuf,
}

impl Stage for DownloadLabels<'_> {
    fn name(&self) -> &str {
        DOWNLOAD_LABELS
    }

    fn run(&mut self) -> Result<()> {
        let mut platform = (self.platform)()?;
        let dirs = OutputDirs::new(&self.output);
        ensure_directory(&self.exports)?;

        let tasks = platform.completed_tasks()?;
        info!("{} completed tasks to export", tasks.len());
        for task in tasks {
            let archive = self
                .exports
                .join(format!("{}_{}.zip", sanitize_filename::sanitize(&task.name), task.id));
            platform.export_annotations(task.id, &self.cvat.annotations_format, &archive)?;
            import_labels(&archive, &dirs.train_labels_dir)?;
        }
        Ok(())
    }
}

pub struct ClearEmptyLabels {
    pub output: PathBuf,
}

impl Stage for ClearEmptyLabels {
    fn name(&self) -> &str {
        CLEAR_EMPTY_LABELS
    }

    fn run(&mut self) -> Result<()> {
        let dirs = OutputDirs::new(&self.output);
        let report = compare_and_remove(&dirs.train_images_dir, &dirs.train_labels_dir)?;
        prune_manifest(&dirs, &report.removed)?;
        if !report.is_clean() {
            warn!("{} images could not be removed", report.failed.len());
        }
        Ok(())
    }
}

pub struct UploadLabels<'a> {
    pub platform: PlatformConnector<'a>,
    pub cvat: CvatConfig,
    pub output: PathBuf,
}

/// Image files directly under `dir`, sorted.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }
    let extensions = get_image_extensions_set();
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext.to_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Ok(images)
}

impl Stage for UploadLabels<'_> {
    fn name(&self) -> &str {
        UPLOAD_LABELS
    }

    fn run(&mut self) -> Result<()> {
        let dirs = OutputDirs::new(&self.output);
        let images = list_images(&dirs.train_images_dir)?;
        let archive = dirs.labels_archive();
        if !archive.is_file() {
            return Err(PipelineError::NotFound(archive));
        }
        if images.is_empty() {
            return Err(PipelineError::Platform(format!(
                "no images to upload in {}",
                dirs.train_images_dir.display()
            )));
        }
        let project_id = self.cvat.project_id.ok_or_else(|| {
            ConfigError::Invalid(vec![
                "cvat.project_id is required for uploads (or set CVAT_PROJECT_ID)".to_string(),
            ])
        })?;

        let task_name = resolve_task_name(&self.cvat.task_name);
        let mut platform = (self.platform)()?;
        let task_id = platform.create_task(
            &task_name,
            project_id,
            &images,
            &archive,
            &self.cvat.annotations_format,
        )?;
        info!("Uploaded {} images as task {} ({})", images.len(), task_id, task_name);
        Ok(())
    }
}

/// Collaborators the stages talk to.
pub struct Collaborators<'a> {
    pub source: Box<dyn VideoSource + 'a>,
    pub transcoder: Box<dyn Transcoder + 'a>,
    pub decoders: Box<dyn DecoderFactory + 'a>,
    pub detector: DetectorLoader<'a>,
    pub platform: PlatformConnector<'a>,
}

/// All six stages in order, each enabled according to `config`.
pub fn build_pipeline<'a>(
    config: &PipelineConfig,
    store: &'a dyn StateStore,
    parts: Collaborators<'a>,
) -> Orchestrator<'a> {
    let paths = &config.paths;
    let mut orchestrator = Orchestrator::new(store, config.resume);
    orchestrator
        .add_stage(
            Box::new(DownloadVideos {
                source: parts.source,
                store,
                youtube: config.youtube.clone(),
                downloads: paths.downloads.clone(),
            }),
            config.youtube.enabled,
        )
        .add_stage(
            Box::new(FixVideoFormat {
                transcoder: parts.transcoder,
                transcode: config.transcode.clone(),
                downloads: paths.downloads.clone(),
            }),
            config.transcode.enabled,
        )
        .add_stage(
            Box::new(ProcessVideos::new(
                parts.decoders,
                parts.detector,
                config.processing.clone(),
                &paths.downloads,
                &paths.output,
            )),
            config.processing.enabled,
        )
        .add_stage(
            Box::new(DownloadLabels {
                platform: Rc::clone(&parts.platform),
                cvat: config.cvat.clone(),
                output: paths.output.clone(),
                exports: paths.state_dir.join("exports"),
            }),
            config.cvat.download_enabled,
        )
        .add_stage(
            Box::new(ClearEmptyLabels {
                output: paths.output.clone(),
            }),
            config.reconcile.enabled,
        )
        .add_stage(
            Box::new(UploadLabels {
                platform: parts.platform,
                cvat: config.cvat.clone(),
                output: paths.output.clone(),
            }),
            config.cvat.upload_enabled,
        );
    orchestrator
}

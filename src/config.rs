use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::ImageFormat;

/// Curate a YOLO training dataset from raw video.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Pipeline configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Directory holding the checkpoint and download logs (overrides paths.state_dir)
    #[arg(long = "state_dir")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every enabled stage in order, recording each outcome
    Run,
    /// Sample, filter and write frames for every video in the downloads folder
    Process {
        /// Override processing.confidence
        #[arg(long = "confidence", value_parser = validate_confidence)]
        confidence: Option<f32>,
    },
    /// Create the dataset layout, data.yaml and Train.txt under OUTPUT
    Setup { output: PathBuf },
    /// Re-encode videos in FOLDER to the configured pixel format
    FixFormat { folder: PathBuf },
    /// Delete images under ROOT/images/train that have no non-empty label
    Reconcile { root: PathBuf },
    /// Zip DIR into ARCHIVE
    Archive { dir: PathBuf, archive: PathBuf },
    /// Print the last recorded outcome of every stage
    Status,
}

// Validate that a confidence threshold is within (0.0, 1.0]
fn validate_confidence(s: &str) -> Result<f32, String> {
    match f32::from_str(s) {
        Ok(val) if val > 0.0 && val <= 1.0 => Ok(val),
        _ => Err("CONFIDENCE must be greater than 0.0 and at most 1.0".to_string()),
    }
}

/// Whether stages that already succeeded are run again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Run every enabled stage regardless of earlier outcomes.
    #[default]
    Always,
    /// Skip stages whose last recorded outcome is `success`.
    SkipSucceeded,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub resume: ResumePolicy,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub cvat: CvatConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    pub downloads: PathBuf,
    pub output: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            downloads: PathBuf::from("downloads"),
            output: PathBuf::from("assets/frames"),
            state_dir: PathBuf::from("data"),
        }
    }
}

// A section that is absent from the file is disabled; a section that is
// present is enabled unless it says otherwise.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoutubeConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "default_num_videos")]
    pub num_videos: usize,
    /// Maximum video height; `None` takes the best available.
    #[serde(default)]
    pub resolution: Option<u32>,
}

fn default_num_videos() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscodeConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_transcode_extensions")]
    pub extensions: Vec<String>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pixel_format: default_pixel_format(),
            extensions: default_transcode_extensions(),
        }
    }
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_transcode_extensions() -> Vec<String> {
    vec!["webm".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Keep every Nth decoded frame.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub image_format: ImageFormat,
    /// Class names, indexed by the model's class ids.
    #[serde(default)]
    pub classes: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_interval: default_sample_interval(),
            confidence: default_confidence(),
            model_path: None,
            image_format: ImageFormat::default(),
            classes: Vec::new(),
        }
    }
}

fn default_sample_interval() -> u64 {
    180
}

fn default_confidence() -> f32 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CvatConfig {
    #[serde(default = "default_cvat_host")]
    pub host: String,
    /// Remote task name; `auto` resolves to today's date.
    #[serde(default = "default_task_name")]
    pub task_name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default = "default_annotations_format")]
    pub annotations_format: String,
    #[serde(default = "enabled_by_default")]
    pub download_enabled: bool,
    #[serde(default = "enabled_by_default")]
    pub upload_enabled: bool,
}

impl Default for CvatConfig {
    fn default() -> Self {
        Self {
            host: default_cvat_host(),
            task_name: default_task_name(),
            project_id: None,
            annotations_format: default_annotations_format(),
            download_enabled: false,
            upload_enabled: false,
        }
    }
}

/// Removal of images left without labels after annotations come back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn default_cvat_host() -> String {
    "https://app.cvat.ai".to_string()
}

fn default_task_name() -> String {
    "auto".to_string()
}

fn default_annotations_format() -> String {
    "YOLOv8 Detection 1.0".to_string()
}

impl PipelineConfig {
    /// Read and parse a YAML configuration file. Call [`validate`](Self::validate)
    /// before using the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Fill in the project id from `CVAT_PROJECT_ID` when the file leaves it out.
    pub fn apply_env_overrides(&mut self) {
        if self.cvat.project_id.is_none() {
            if let Ok(value) = std::env::var("CVAT_PROJECT_ID") {
                self.cvat.project_id = value.trim().parse().ok();
            }
        }
    }

    /// Check every enabled section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.youtube.enabled {
            if self.youtube.queries.iter().all(|q| q.trim().is_empty()) {
                problems.push("youtube.queries must list at least one search query".to_string());
            }
            if self.youtube.num_videos == 0 {
                problems.push("youtube.num_videos must be greater than 0".to_string());
            }
        }

        if self.transcode.enabled {
            if self.transcode.pixel_format.trim().is_empty() {
                problems.push("transcode.pixel_format must not be empty".to_string());
            }
            if self.transcode.extensions.is_empty() {
                problems.push("transcode.extensions must list at least one extension".to_string());
            }
        }

        if self.processing.enabled {
            self.processing.collect_problems(&mut problems);
        }

        if self.cvat.download_enabled || self.cvat.upload_enabled {
            if self.cvat.host.trim().is_empty() {
                problems.push("cvat.host must not be empty".to_string());
            }
            if self.cvat.annotations_format.trim().is_empty() {
                problems.push("cvat.annotations_format must not be empty".to_string());
            }
        }
        if self.cvat.upload_enabled {
            if self.cvat.project_id.is_none() {
                problems.push(
                    "cvat.project_id is required for uploads (or set CVAT_PROJECT_ID)".to_string(),
                );
            }
            if self.cvat.task_name.trim().is_empty() {
                problems.push("cvat.task_name must not be empty".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

impl ProcessingConfig {
    /// Validate the processing section on its own, regardless of `enabled`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        self.collect_problems(&mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.sample_interval == 0 {
            problems.push("processing.sample_interval must be greater than 0".to_string());
        }
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            problems.push(format!(
                "processing.confidence must be in (0, 1], got {}",
                self.confidence
            ));
        }
        if self.model_path.is_none() {
            problems.push("processing.model_path is required".to_string());
        }
        if self.classes.is_empty() {
            problems.push("processing.classes must list at least one class name".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_confidence() {
        assert!(validate_confidence("0.2").is_ok());
        assert!(validate_confidence("1.0").is_ok());
        assert!(validate_confidence("0.0").is_err());
        assert!(validate_confidence("1.5").is_err());
        assert!(validate_confidence("abc").is_err());
    }

    #[test]
    fn absent_sections_are_disabled() {
        let config = PipelineConfig::from_yaml("paths:\n  output: out\n").unwrap();
        assert!(!config.youtube.enabled);
        assert!(!config.transcode.enabled);
        assert!(!config.processing.enabled);
        assert!(!config.cvat.upload_enabled);
        assert!(!config.reconcile.enabled);
        assert_eq!(config.paths.output, PathBuf::from("out"));
        assert_eq!(config.resume, ResumePolicy::Always);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn present_sections_default_to_enabled() {
        let yaml = r#"
processing:
  model_path: model.onnx
  classes: [ball]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(config.processing.enabled);
        assert_eq!(config.processing.sample_interval, 180);
        assert_eq!(config.processing.confidence, 0.2);
        assert_eq!(config.processing.image_format, ImageFormat::Jpg);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "processing:\n  framerate: 30\n";
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_aggregates_all_problems() {
        let yaml = r#"
resume: skip_succeeded
youtube:
  queries: []
  num_videos: 0
processing:
  sample_interval: 0
  confidence: 1.5
cvat:
  task_name: auto
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.resume, ResumePolicy::SkipSucceeded);
        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert!(problems.iter().any(|p| p.starts_with("youtube.queries")));
                assert!(problems.iter().any(|p| p.starts_with("youtube.num_videos")));
                assert!(problems.iter().any(|p| p.starts_with("processing.sample_interval")));
                assert!(problems.iter().any(|p| p.starts_with("processing.confidence")));
                assert!(problems.iter().any(|p| p.starts_with("processing.model_path")));
                assert!(problems.iter().any(|p| p.starts_with("processing.classes")));
                assert!(problems.iter().any(|p| p.starts_with("cvat.project_id")));
                assert_eq!(problems.len(), 7);
            }
            other => panic!("expected aggregated error, got {:?}", other),
        }
    }
}

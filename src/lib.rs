//! Video to YOLO dataset curation
//!
//! This library samples frames from videos, keeps the frames an object
//! detector fires on, and writes them out as a YOLO training dataset. The
//! surrounding stages (video download, transcoding, annotation platform
//! round-trip, cleanup) run under a resumable orchestrator.

pub mod archive;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod detection;
pub mod error;
pub mod io;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod orchestrator;
pub mod platform;
pub mod postprocess;
pub mod reconcile;
pub mod sampler;
pub mod source;
pub mod stages;
pub mod state;
pub mod transcode;
pub mod types;
pub mod utils;
pub mod video;

// Re-export commonly used types and functions
pub use archive::{compress_folder, extract_archive, import_labels};
pub use config::{Args, Command, PipelineConfig, ResumePolicy};
pub use dataset::{process_dataset, process_video, SamplingSettings};
pub use detection::{DetectionFilter, Detector, FilterDecision};
pub use error::{ConfigError, PipelineError, Result};
pub use io::{prune_manifest, setup_output_directories, OutputDirs};
pub use orchestrator::{Orchestrator, RunReport, Stage, StageOutcome};
pub use reconcile::{compare_and_remove, ReconcileReport};
pub use sampler::FrameSampler;
pub use state::{CheckpointState, DownloadLog, FileStore, MemoryStore, StateStore, StepStatus};
pub use types::{Detection, Frame, ImageFormat, ProcessingStats, RawDetection};
pub use video::{DecoderFactory, VideoDecoder};

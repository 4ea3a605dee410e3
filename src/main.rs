use clap::Parser;
use log::{error, info, warn};
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

use video2yolo::config::{CvatConfig, ProcessingConfig};
use video2yolo::platform::{AnnotationPlatform, Credentials, CvatClient};
use video2yolo::source::YtDlpSource;
use video2yolo::stages::{
    build_pipeline, Collaborators, DetectorLoader, PlatformConnector, ProcessVideos, STAGE_ORDER,
};
use video2yolo::transcode::{fix_video_format, FfmpegTranscoder};
use video2yolo::video::CaptureDecoderFactory;
use video2yolo::{
    compare_and_remove, compress_folder, prune_manifest, setup_output_directories, Args,
    CheckpointState, Command, Detector, FileStore, Orchestrator, OutputDirs, PipelineConfig,
    ResumePolicy, Result,
};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match execute(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load the configuration file. Commands that only need a few defaults may
/// run without one.
fn load_config(args: &Args, required: bool) -> Result<PipelineConfig> {
    let mut config = if required || args.config.is_file() {
        PipelineConfig::load(&args.config)?
    } else {
        warn!(
            "Configuration {} not found, using defaults",
            args.config.display()
        );
        PipelineConfig::default()
    };
    config.apply_env_overrides();
    if let Some(state_dir) = &args.state_dir {
        config.paths.state_dir = state_dir.clone();
    }
    Ok(config)
}

#[cfg(feature = "onnx")]
fn detector_loader<'a>(processing: &ProcessingConfig) -> DetectorLoader<'a> {
    let model_path = processing.model_path.clone();
    Box::new(move || -> Result<Box<dyn Detector + 'a>> {
        let model_path = model_path.clone().ok_or_else(|| {
            video2yolo::ConfigError::Invalid(vec!["processing.model_path is required".to_string()])
        })?;
        Ok(Box::new(video2yolo::onnx::OnnxDetector::load(&model_path)?))
    })
}

#[cfg(not(feature = "onnx"))]
fn detector_loader<'a>(_processing: &ProcessingConfig) -> DetectorLoader<'a> {
    Box::new(|| -> Result<Box<dyn Detector + 'a>> {
        Err(video2yolo::PipelineError::Inference(
            "built without the `onnx` feature; rebuild with `--features onnx`".to_string(),
        ))
    })
}

fn platform_connector<'a>(cvat: &CvatConfig) -> PlatformConnector<'a> {
    let host = cvat.host.clone();
    Rc::new(move || -> Result<Box<dyn AnnotationPlatform + 'a>> {
        let credentials = Credentials::from_env()?;
        Ok(Box::new(CvatClient::new(&host, credentials)?))
    })
}

fn execute(args: &Args) -> Result<bool> {
    match &args.command {
        Command::Run => {
            let config = load_config(args, true)?;
            config.validate()?;
            let store = FileStore::new(&config.paths.state_dir);

            info!("Starting the pipeline...");
            let mut pipeline = build_pipeline(
                &config,
                &store,
                Collaborators {
                    source: Box::new(YtDlpSource::default()),
                    transcoder: Box::new(FfmpegTranscoder),
                    decoders: Box::new(CaptureDecoderFactory),
                    detector: detector_loader(&config.processing),
                    platform: platform_connector(&config.cvat),
                },
            );
            let report = pipeline.run()?;
            match report.failure() {
                None => {
                    info!("Pipeline completed successfully!");
                    Ok(true)
                }
                Some((stage, _)) => {
                    error!("Pipeline halted at {}", stage);
                    Ok(false)
                }
            }
        }
        Command::Process { confidence } => {
            let mut config = load_config(args, true)?;
            if let Some(confidence) = confidence {
                config.processing.confidence = *confidence;
            }
            config.processing.validate()?;
            let store = FileStore::new(&config.paths.state_dir);

            let mut orchestrator = Orchestrator::new(&store, ResumePolicy::Always);
            orchestrator.add_stage(
                Box::new(ProcessVideos::new(
                    Box::new(CaptureDecoderFactory),
                    detector_loader(&config.processing),
                    config.processing.clone(),
                    &config.paths.downloads,
                    &config.paths.output,
                )),
                true,
            );
            Ok(orchestrator.run()?.succeeded())
        }
        Command::Setup { output } => {
            let config = load_config(args, false)?;
            let dirs = setup_output_directories(output, &config.processing.classes)?;
            info!("Dataset ready at {}", dirs.root.display());
            Ok(true)
        }
        Command::FixFormat { folder } => {
            let config = load_config(args, false)?;
            let report = fix_video_format(
                folder,
                &config.transcode.extensions,
                &config.transcode.pixel_format,
                &FfmpegTranscoder,
            )?;
            Ok(report.failed.is_empty())
        }
        Command::Reconcile { root } => {
            let dirs = OutputDirs::new(root);
            let report = compare_and_remove(&dirs.train_images_dir, &dirs.train_labels_dir)?;
            prune_manifest(&dirs, &report.removed)?;
            Ok(report.is_clean())
        }
        Command::Archive { dir, archive } => {
            compress_folder(dir, archive)?;
            Ok(true)
        }
        Command::Status => {
            let config = load_config(args, false)?;
            let store = FileStore::new(&config.paths.state_dir);
            let state = CheckpointState::load(&store)?;
            print_status(&state, &store.path_for(video2yolo::state::CHECKPOINT_KEY));
            Ok(true)
        }
    }
}

fn print_status(state: &CheckpointState, path: &Path) {
    println!("Checkpoint: {}", path.display());
    println!(
        "Last run:   {}",
        state.last_run.as_deref().unwrap_or("never")
    );
    for stage in STAGE_ORDER {
        let status = match state.status(stage) {
            Some(status) => format!("{:?}", status).to_lowercase(),
            None => "-".to_string(),
        };
        println!("  {:<20} {}", stage, status);
    }
}

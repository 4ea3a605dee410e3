//! Pruning of images that ended up without annotations.

use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::utils::{file_stem_string, is_partial_write};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Image files deleted, sorted.
    pub removed: BTreeSet<PathBuf>,
    /// Unfinished `.part` writes cleared from the images directory.
    pub partials: Vec<PathBuf>,
    /// Images that should have been deleted but could not be.
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn regular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            !path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn partial_writes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_partial_write(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Stems of label files that hold at least one non-whitespace byte.
fn labelled_stems(labels_dir: &Path) -> Result<HashSet<String>> {
    let mut stems = HashSet::new();
    for path in regular_files(labels_dir)? {
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            continue;
        }
        if let Some(stem) = file_stem_string(&path) {
            stems.insert(stem);
        }
    }
    Ok(stems)
}

/// Delete every image in `images_dir` whose stem has no non-empty label in
/// `labels_dir`, along with `.part` leftovers of interrupted writes there.
/// Label files are only read.
pub fn compare_and_remove(images_dir: &Path, labels_dir: &Path) -> Result<ReconcileReport> {
    for dir in [images_dir, labels_dir] {
        if !dir.is_dir() {
            return Err(PipelineError::NotFound(dir.to_path_buf()));
        }
    }

    let labelled = labelled_stems(labels_dir)?;
    let mut report = ReconcileReport::default();

    for partial in partial_writes(images_dir)? {
        match fs::remove_file(&partial) {
            Ok(()) => {
                debug!("Deleted unfinished write {}", partial.display());
                report.partials.push(partial);
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", partial.display(), e);
                report.failed.push((partial, e));
            }
        }
    }

    for image in regular_files(images_dir)? {
        let keep = file_stem_string(&image)
            .map(|stem| labelled.contains(&stem))
            .unwrap_or(false);
        if keep {
            continue;
        }
        match fs::remove_file(&image) {
            Ok(()) => {
                info!("Deleted image without label: {}", image.display());
                report.removed.insert(image);
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", image.display(), e);
                report.failed.push((image, e));
            }
        }
    }

    info!(
        "Reconciled {} against {}: {} removed, {} partial writes cleared, {} failed",
        images_dir.display(),
        labels_dir.display(),
        report.removed.len(),
        report.partials.len(),
        report.failed.len()
    );
    Ok(report)
}

//! Zip packaging of a dataset directory, and the reverse.

use jwalk::WalkDir;
use log::{debug, info};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::utils::{ensure_directory, is_partial_write, temporary_sibling};

/// Archive-relative name with `/` separators.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Compress every file under `dir` into `output_zip`, paths relative to `dir`.
///
/// `output_zip` may live inside `dir`; it is never added to itself, and
/// neither are `.name.part` leftovers of interrupted writes. The
/// archive is written under a temporary name and renamed when complete.
/// Returns the number of files stored.
pub fn compress_folder(dir: &Path, output_zip: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }
    if let Some(parent) = output_zip.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let tmp = temporary_sibling(output_zip);
    let excluded = vec![absolute_target(output_zip)?, absolute_target(&tmp)?];

    let result = write_archive(dir, &tmp, &excluded);
    match result {
        Ok(count) => {
            fs::rename(&tmp, output_zip)?;
            info!(
                "Folder '{}' compressed into '{}' ({} files)",
                dir.display(),
                output_zip.display(),
                count
            );
            Ok(count)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

// Canonical form of a file path whose parent directory exists.
fn absolute_target(path: &Path) -> io::Result<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok(fs::canonicalize(parent)?.join(path.file_name().unwrap_or_default()))
}

fn write_archive(dir: &Path, archive_path: &Path, excluded: &[PathBuf]) -> Result<usize> {
    let root = fs::canonicalize(dir)?;
    let mut zip = ZipWriter::new(BufWriter::new(File::create(archive_path)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(&root).sort(true).skip_hidden(false) {
        let entry = entry.map_err(|e| PipelineError::Io(io::Error::other(e.to_string())))?;
        let path = entry.path();
        if path == root || excluded.contains(&path) {
            continue;
        }
        if entry.file_type().is_file() && is_partial_write(&path) {
            debug!("Skipping unfinished write {}", path.display());
            continue;
        }
        let relative = path.strip_prefix(&root).unwrap_or(&path);
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            debug!("Adding {}", name);
            zip.start_file(name, options)?;
            let mut file = BufReader::new(File::open(&path)?);
            io::copy(&mut file, &mut zip)?;
            count += 1;
        }
    }

    zip.finish()?.flush()?;
    Ok(count)
}

/// Extract every entry of `archive` under `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(PipelineError::NotFound(archive.to_path_buf()));
    }
    ensure_directory(dest)?;
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    zip.extract(dest)?;
    Ok(())
}

/// Copy label files out of an exported annotation archive into `labels_dir`.
///
/// Every `.txt` entry below the archive root is a label file; root-level
/// `.txt` entries are manifests and are skipped. Returns the written paths.
pub fn import_labels(archive: &Path, labels_dir: &Path) -> Result<Vec<PathBuf>> {
    if !archive.is_file() {
        return Err(PipelineError::NotFound(archive.to_path_buf()));
    }
    ensure_directory(labels_dir)?;

    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if !file.is_file() {
            continue;
        }
        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let is_label = name.extension().is_some_and(|ext| ext == "txt")
            && name.components().count() > 1;
        let Some(file_name) = name.file_name() else {
            continue;
        };
        if !is_label {
            continue;
        }

        let target = labels_dir.join(file_name);
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut file, &mut out)?;
        written.push(target);
    }

    info!(
        "Imported {} label files from {} into {}",
        written.len(),
        archive.display(),
        labels_dir.display()
    );
    Ok(written)
}

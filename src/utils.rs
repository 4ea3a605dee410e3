use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Create a directory (and parents) if missing. Existing contents are left alone.
pub fn ensure_directory(path: &Path) -> std::io::Result<PathBuf> {
    if !path.is_dir() {
        log::debug!("Creating directory {}", path.display());
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Write `bytes` to a sibling temporary file, then rename it over `path`.
///
/// Readers never observe a half-written file: either the old content (or no
/// file) or the complete new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temporary_sibling(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// `dir/name.ext` -> `dir/.name.ext.part`
pub fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Longest namespace, in bytes, that goes into a frame stem.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Whether `path` is a `.name.part` leftover of an interrupted [`write_atomic`].
pub fn is_partial_write(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') && n.ends_with(".part")
        })
        .unwrap_or(false)
}

/// Turn a video file name into a stem-safe namespace of at most
/// [`MAX_NAMESPACE_LEN`] bytes.
pub fn video_namespace(video_path: &Path) -> String {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let sanitized = sanitize_filename::sanitize(stem);
    let mut namespace = String::new();
    for c in sanitized
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
    {
        if namespace.len() + c.len_utf8() > MAX_NAMESPACE_LEN {
            break;
        }
        namespace.push(c);
    }
    if namespace.is_empty() {
        "video".to_string()
    } else {
        namespace
    }
}

/// Timestamp shared by every frame sampled in one run, `YYYYmmddHHMMSS`.
pub fn capture_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Resolve the configured task name; `auto` becomes today's date.
pub fn resolve_task_name(configured: &str) -> String {
    if configured == "auto" {
        chrono::Local::now().format("%Y%m%d").to_string()
    } else {
        configured.to_string()
    }
}

/// File stem as an owned string, if the path has one.
pub fn file_stem_string(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

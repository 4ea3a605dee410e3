//! Video acquisition from a search provider.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PipelineError, Result};
use crate::state::{DownloadLog, DownloadRecord, StateStore};
use crate::utils::ensure_directory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVideo {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl From<&RemoteVideo> for DownloadRecord {
    fn from(video: &RemoteVideo) -> Self {
        DownloadRecord {
            id: video.id.clone(),
            title: video.title.clone(),
            url: video.url.clone(),
        }
    }
}

/// Searches for and downloads videos.
pub trait VideoSource {
    /// Up to `limit` results for `query`, best match first.
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteVideo>>;

    /// Fetch `video` into `dest`, returning the local file.
    fn download(
        &mut self,
        video: &RemoteVideo,
        dest: &Path,
        resolution: Option<u32>,
    ) -> Result<PathBuf>;
}

/// Format selector for the best stream at or below `resolution` lines.
pub fn format_selector(resolution: Option<u32>) -> String {
    match resolution {
        Some(height) => format!("bestvideo[height<={}]+bestaudio/best", height),
        None => "bestvideo+bestaudio/best".to_string(),
    }
}

/// Drives the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    program: String,
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
        }
    }
}

impl YtDlpSource {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn run(&self, command: &mut Command) -> Result<String> {
        let output = command
            .output()
            .map_err(|e| PipelineError::external(&self.program, e.to_string()))?;
        if !output.status.success() {
            return Err(PipelineError::external(
                &self.program,
                format!(
                    "{} ({})",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `id<TAB>title<TAB>url` lines printed during a flat search.
fn parse_search_output(text: &str) -> Vec<RemoteVideo> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let id = fields.next()?.trim();
            let title = fields.next()?.trim();
            let url = fields.next()?.trim();
            if id.is_empty() || url.is_empty() {
                return None;
            }
            Some(RemoteVideo {
                id: id.to_string(),
                title: title.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

impl VideoSource for YtDlpSource {
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteVideo>> {
        let stdout = self.run(
            Command::new(&self.program)
                .arg(format!("ytsearch{}:{}", limit, query))
                .args(["--flat-playlist", "--print", "%(id)s\t%(title)s\t%(url)s"]),
        )?;
        let results = parse_search_output(&stdout);
        debug!("Search {:?} returned {} results", query, results.len());
        Ok(results)
    }

    fn download(
        &mut self,
        video: &RemoteVideo,
        dest: &Path,
        resolution: Option<u32>,
    ) -> Result<PathBuf> {
        ensure_directory(dest)?;
        let template = dest.join("%(title)s.%(ext)s");
        let stdout = self.run(
            Command::new(&self.program)
                .args(["-f", &format_selector(resolution)])
                .arg("-o")
                .arg(&template)
                .args(["--no-simulate", "--print", "after_move:filepath"])
                .arg(&video.url),
        )?;
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| PipelineError::external(&self.program, "no output file reported"))
    }
}

/// Download `count` videos for `query` that are not in the download log.
///
/// Results are paged (`count`, `2 * count`, ...) until enough new videos were
/// fetched or a larger page brings no additional results. The log is saved
/// after every successful download. A failed download is logged and not
/// retried.
pub fn fetch_videos(
    source: &mut dyn VideoSource,
    log: &mut DownloadLog,
    store: &dyn StateStore,
    query: &str,
    count: usize,
    resolution: Option<u32>,
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    let mut downloaded = Vec::new();
    let mut attempted: HashSet<String> = HashSet::new();
    let mut page = 1;
    let mut previous_len = 0;

    while downloaded.len() < count {
        let results = source.search(query, count * page)?;
        if page > 1 && results.len() <= previous_len {
            info!("No more search results for {:?}", query);
            break;
        }
        previous_len = results.len();

        let fresh: Vec<RemoteVideo> = results
            .into_iter()
            .filter(|v| !log.contains(&v.id) && !attempted.contains(&v.id))
            .collect();

        for video in fresh {
            if downloaded.len() >= count {
                break;
            }
            attempted.insert(video.id.clone());
            info!("Downloading {} ({})", video.title, video.url);
            match source.download(&video, dest, resolution) {
                Ok(path) => {
                    log.push(DownloadRecord::from(&video));
                    log.save(store)?;
                    downloaded.push(path);
                }
                Err(e) => warn!("Failed to download {}: {}", video.url, e),
            }
        }
        page += 1;
    }

    info!(
        "Downloaded {} of {} requested videos for {:?}",
        downloaded.len(),
        count,
        query
    );
    Ok(downloaded)
}

//! Annotation platform access (CVAT REST API).

use log::{debug, info};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{ConfigError, PipelineError, Result};
use crate::utils::write_atomic;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTask {
    pub id: u64,
    pub name: String,
    pub status: String,
}

impl RemoteTask {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// Remote task store holding images awaiting human review.
pub trait AnnotationPlatform {
    /// Create a task from local images with pre-annotations, returning its id.
    fn create_task(
        &mut self,
        name: &str,
        project_id: u64,
        images: &[PathBuf],
        annotations: &Path,
        format: &str,
    ) -> Result<u64>;

    /// Tasks whose review is complete.
    fn completed_tasks(&mut self) -> Result<Vec<RemoteTask>>;

    /// Save the annotations of `task_id` as a zip at `dest`.
    fn export_annotations(&mut self, task_id: u64, format: &str, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Read `CVAT_USER` and `CVAT_PASSWORD`.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let user = std::env::var("CVAT_USER").ok().filter(|v| !v.is_empty());
        let password = std::env::var("CVAT_PASSWORD").ok().filter(|v| !v.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Self { user, password }),
            (user, password) => {
                let mut problems = Vec::new();
                if user.is_none() {
                    problems.push("CVAT_USER is not set".to_string());
                }
                if password.is_none() {
                    problems.push("CVAT_PASSWORD is not set".to_string());
                }
                Err(ConfigError::Invalid(problems))
            }
        }
    }
}

fn platform_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Platform(e.to_string())
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TaskPage {
    results: Vec<RemoteTask>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataStatus {
    state: String,
    #[serde(default)]
    message: String,
}

pub struct CvatClient {
    client: Client,
    host: String,
    credentials: Credentials,
}

impl CvatClient {
    pub fn new(host: &str, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("video2yolo/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(platform_error)?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.user, Some(&self.credentials.password))
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authed(request).send().map_err(platform_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().unwrap_or_default();
            Err(PipelineError::Platform(format!("{}: {}", status, body.trim())))
        }
    }

    fn upload_images(&self, task_id: u64, images: &[PathBuf]) -> Result<()> {
        let mut form = multipart::Form::new().text("image_quality", "70");
        for (i, image) in images.iter().enumerate() {
            form = form.file(format!("client_files[{}]", i), image)?;
        }
        self.send(
            self.client
                .post(self.url(&format!("tasks/{}/data", task_id)))
                .multipart(form),
        )?;

        loop {
            let status: DataStatus = self
                .send(self.client.get(self.url(&format!("tasks/{}/status", task_id))))?
                .json()
                .map_err(platform_error)?;
            debug!("Task {} data state: {}", task_id, status.state);
            match status.state.as_str() {
                "Finished" => return Ok(()),
                "Failed" => {
                    return Err(PipelineError::Platform(format!(
                        "task {} rejected its data: {}",
                        task_id, status.message
                    )))
                }
                _ => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    fn import_annotations(&self, task_id: u64, annotations: &Path, format: &str) -> Result<()> {
        let url = self.url(&format!("tasks/{}/annotations", task_id));
        // First PUT carries the file; CVAT answers 202 until the import lands.
        let form = multipart::Form::new().file("annotation_file", annotations)?;
        let mut response = self.send(
            self.client
                .put(&url)
                .query(&[("format", format)])
                .multipart(form),
        )?;
        while response.status() == StatusCode::ACCEPTED {
            thread::sleep(POLL_INTERVAL);
            response = self.send(self.client.put(&url).query(&[("format", format)]))?;
        }
        Ok(())
    }
}

impl AnnotationPlatform for CvatClient {
    fn create_task(
        &mut self,
        name: &str,
        project_id: u64,
        images: &[PathBuf],
        annotations: &Path,
        format: &str,
    ) -> Result<u64> {
        if !annotations.is_file() {
            return Err(PipelineError::NotFound(annotations.to_path_buf()));
        }
        let created: CreatedTask = self
            .send(
                self.client
                    .post(self.url("tasks"))
                    .json(&serde_json::json!({ "name": name, "project_id": project_id })),
            )?
            .json()
            .map_err(platform_error)?;
        info!("Created task {} ({:?}) in project {}", created.id, name, project_id);

        self.upload_images(created.id, images)?;
        info!("Uploaded {} images to task {}", images.len(), created.id);
        self.import_annotations(created.id, annotations, format)?;
        info!("Imported {} into task {}", annotations.display(), created.id);
        Ok(created.id)
    }

    fn completed_tasks(&mut self) -> Result<Vec<RemoteTask>> {
        let mut tasks = Vec::new();
        let mut page = 1;
        loop {
            let listing: TaskPage = self
                .send(self.client.get(self.url("tasks")).query(&[
                    ("page", page.to_string()),
                    ("page_size", PAGE_SIZE.to_string()),
                ]))?
                .json()
                .map_err(platform_error)?;
            tasks.extend(listing.results.into_iter().filter(RemoteTask::is_completed));
            if listing.next.is_none() {
                break;
            }
            page += 1;
        }
        Ok(tasks)
    }

    fn export_annotations(&mut self, task_id: u64, format: &str, dest: &Path) -> Result<()> {
        let url = self.url(&format!("tasks/{}/annotations", task_id));
        // 202 while the export is being prepared, 201 once it is ready.
        loop {
            let response = self.send(self.client.get(&url).query(&[("format", format)]))?;
            if response.status() != StatusCode::ACCEPTED {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        let bytes = self
            .send(
                self.client
                    .get(&url)
                    .query(&[("format", format), ("action", "download")]),
            )?
            .bytes()
            .map_err(platform_error)?;
        write_atomic(dest, &bytes)?;
        info!("Exported task {} annotations to {}", task_id, dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_page_parses_cvat_listing() {
        let json = r#"{
            "count": 2,
            "next": null,
            "results": [
                {"id": 7, "name": "20240501", "status": "completed", "size": 12},
                {"id": 8, "name": "20240502", "status": "annotation", "size": 3}
            ]
        }"#;
        let page: TaskPage = serde_json::from_str(json).unwrap();
        let done: Vec<_> = page.results.into_iter().filter(RemoteTask::is_completed).collect();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, 7);
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        let client = CvatClient::new(
            "https://app.cvat.ai/",
            Credentials {
                user: "u".into(),
                password: "p".into(),
            },
        )
        .unwrap();
        assert_eq!(client.url("tasks"), "https://app.cvat.ai/api/tasks");
    }
}

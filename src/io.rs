use log::{info, warn};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::{ensure_directory, write_atomic};

pub const DATA_YAML: &str = "data.yaml";
pub const TRAIN_MANIFEST: &str = "Train.txt";
pub const LABELS_ARCHIVE: &str = "labels.zip";

// Paths of the dataset layout under one output root
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root: PathBuf,
    pub train_images_dir: PathBuf,
    pub train_labels_dir: PathBuf,
}

impl OutputDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            train_images_dir: root.join("images").join("train"),
            train_labels_dir: root.join("labels").join("train"),
        }
    }

    pub fn data_yaml(&self) -> PathBuf {
        self.root.join(DATA_YAML)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(TRAIN_MANIFEST)
    }

    pub fn labels_archive(&self) -> PathBuf {
        self.root.join(LABELS_ARCHIVE)
    }
}

/// Set up the directory structure for the YOLO dataset.
///
/// Safe to call on an existing dataset: missing directories are created,
/// `data.yaml` is rewritten, and `Train.txt` is created only if absent.
pub fn setup_output_directories(root: &Path, classes: &[String]) -> std::io::Result<OutputDirs> {
    let dirs = OutputDirs::new(root);
    ensure_directory(&dirs.root)?;
    ensure_directory(&dirs.train_images_dir)?;
    ensure_directory(&dirs.train_labels_dir)?;

    create_dataset_yaml(&dirs, classes)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dirs.manifest())?;

    info!("Dataset layout ready at {}", dirs.root.display());
    Ok(dirs)
}

/// Render the dataset.yaml content for the given class list.
pub fn dataset_yaml_content(classes: &[String]) -> String {
    let mut yaml_content = String::from("names:\n");
    for (id, label) in classes.iter().enumerate() {
        yaml_content.push_str(&format!("  {}: {}\n", id, label));
    }
    yaml_content.push_str("path: .\n");
    yaml_content.push_str(&format!("train: {}\n", TRAIN_MANIFEST));
    yaml_content
}

/// Create the data.yaml file for YOLO training
pub fn create_dataset_yaml(dirs: &OutputDirs, classes: &[String]) -> std::io::Result<()> {
    write_atomic(&dirs.data_yaml(), dataset_yaml_content(classes).as_bytes())
}

/// Append one image path, relative to the dataset root, to `Train.txt`.
pub fn append_to_manifest(dirs: &OutputDirs, image_path: &Path) -> std::io::Result<()> {
    let relative = image_path.strip_prefix(&dirs.root).unwrap_or(image_path);
    let line = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let mut manifest = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dirs.manifest())?;
    manifest.write_all(format!("{}\n", line).as_bytes())?;
    manifest.flush()
}

/// Entries of `Train.txt`, in append order.
pub fn read_manifest(dirs: &OutputDirs) -> std::io::Result<Vec<String>> {
    let content = match fs::read_to_string(dirs.manifest()) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Rewrite `Train.txt` without entries whose image is in `removed` or no
/// longer exists on disk. Returns the number of entries dropped.
pub fn prune_manifest(dirs: &OutputDirs, removed: &BTreeSet<PathBuf>) -> std::io::Result<usize> {
    let entries = read_manifest(dirs)?;
    let (kept, dropped): (Vec<String>, Vec<String>) = entries.into_iter().partition(|entry| {
        let image = dirs.root.join(entry);
        !removed.contains(&image) && image.is_file()
    });
    if dropped.is_empty() {
        return Ok(0);
    }

    for entry in &dropped {
        warn!("Dropping manifest entry without image: {}", entry);
    }
    let mut content = kept.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    write_atomic(&dirs.manifest(), content.as_bytes())?;
    info!(
        "Pruned {} entries from {}, {} remain",
        dropped.len(),
        dirs.manifest().display(),
        kept.len()
    );
    Ok(dropped.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["corner".to_string(), "goal_up".to_string()]
    }

    #[test]
    fn yaml_lists_classes_and_manifest() {
        let yaml = dataset_yaml_content(&classes());
        assert_eq!(
            yaml,
            "names:\n  0: corner\n  1: goal_up\npath: .\ntrain: Train.txt\n"
        );
    }

    #[test]
    fn setup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = setup_output_directories(dir.path(), &classes()).unwrap();
        fs::write(dirs.train_images_dir.join("kept.jpg"), b"img").unwrap();
        append_to_manifest(&dirs, &dirs.train_images_dir.join("kept.jpg")).unwrap();

        let again = setup_output_directories(dir.path(), &classes()).unwrap();
        assert!(again.train_images_dir.join("kept.jpg").exists());
        assert_eq!(read_manifest(&again).unwrap(), vec!["images/train/kept.jpg"]);
        assert!(again.data_yaml().exists());
    }

    #[test]
    fn manifest_preserves_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = setup_output_directories(dir.path(), &classes()).unwrap();
        for name in ["b.jpg", "a.jpg", "c.jpg"] {
            append_to_manifest(&dirs, &dirs.train_images_dir.join(name)).unwrap();
        }
        assert_eq!(
            read_manifest(&dirs).unwrap(),
            vec!["images/train/b.jpg", "images/train/a.jpg", "images/train/c.jpg"]
        );
    }

    #[test]
    fn prune_drops_removed_and_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = setup_output_directories(dir.path(), &classes()).unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            let image = dirs.train_images_dir.join(name);
            fs::write(&image, b"img").unwrap();
            append_to_manifest(&dirs, &image).unwrap();
        }
        fs::remove_file(dirs.train_images_dir.join("a.jpg")).unwrap();
        let removed: BTreeSet<PathBuf> = [dirs.train_images_dir.join("c.jpg")].into();

        assert_eq!(prune_manifest(&dirs, &removed).unwrap(), 2);
        assert_eq!(read_manifest(&dirs).unwrap(), vec!["images/train/b.jpg"]);
        assert_eq!(prune_manifest(&dirs, &BTreeSet::new()).unwrap(), 0);
    }
}

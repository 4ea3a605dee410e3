use log::debug;
use std::io::Cursor;
use std::path::PathBuf;

use crate::error::Result;
use crate::io::{append_to_manifest, OutputDirs};
use crate::types::{Detection, Frame, ImageFormat};
use crate::utils::write_atomic;

/// Files written for one kept frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub stem: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// Convert detections to YOLO bounding-box label lines
pub fn convert_to_yolo_format(detections: &[Detection]) -> String {
    let mut yolo_data = String::with_capacity(detections.len() * 48);
    for d in detections {
        yolo_data.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            d.class_id, d.center_x, d.center_y, d.width, d.height
        ));
    }
    yolo_data
}

/// Persist a kept frame: image, then label file, then the manifest line.
///
/// The manifest append is the last mutation, so an interrupted write leaves
/// at worst an image (or image and label) without a manifest entry.
pub fn write_kept_frame(
    dirs: &OutputDirs,
    frame: &Frame,
    detections: &[Detection],
    format: ImageFormat,
) -> Result<DatasetEntry> {
    let stem = frame.stem();
    let image_path = dirs
        .train_images_dir
        .join(&stem)
        .with_extension(format.extension());
    let label_path = dirs.train_labels_dir.join(&stem).with_extension("txt");

    let mut encoded = Cursor::new(Vec::new());
    frame.image.write_to(&mut encoded, format.codec())?;
    write_atomic(&image_path, encoded.get_ref())?;

    write_atomic(&label_path, convert_to_yolo_format(detections).as_bytes())?;

    append_to_manifest(dirs, &image_path)?;

    debug!("Kept {} with {} detections", stem, detections.len());
    Ok(DatasetEntry {
        stem,
        image_path,
        label_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_to_yolo_format() {
        let detections = vec![
            Detection {
                class_id: 0,
                center_x: 0.15,
                center_y: 0.15,
                width: 0.1,
                height: 0.1,
            },
            Detection {
                class_id: 11,
                center_x: 0.5,
                center_y: 0.25,
                width: 1.0,
                height: 0.5,
            },
        ];
        assert_eq!(
            convert_to_yolo_format(&detections),
            "0 0.150000 0.150000 0.100000 0.100000\n11 0.500000 0.250000 1.000000 0.500000\n"
        );
    }

    #[test]
    fn no_detections_render_nothing() {
        assert_eq!(convert_to_yolo_format(&[]), "");
    }
}

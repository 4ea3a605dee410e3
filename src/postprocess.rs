//! YOLOv8 output decoding.
//!
//! Turns the raw `[1, 4 + classes, anchors]` tensor of a detection head into
//! pixel boxes on the original frame. Kept free of the runtime so it can be
//! exercised with hand-built tensors.

use crate::error::{PipelineError, Result};
use crate::types::{BoxSpace, RawDetection};

/// Decode a detection head. Each anchor keeps only its best-scoring class.
///
/// `input_size` is the square side the frame was resized to before
/// inference; boxes are scaled back to `frame_width` x `frame_height`.
pub fn decode_output(
    shape: &[i64],
    data: &[f32],
    input_size: u32,
    frame_width: u32,
    frame_height: u32,
    confidence: f32,
) -> Result<Vec<RawDetection>> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 || shape[2] < 0 {
        return Err(PipelineError::Inference(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }
    let rows = shape[1] as usize;
    let anchors = shape[2] as usize;
    if data.len() != rows * anchors {
        return Err(PipelineError::Inference(format!(
            "output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * anchors
        )));
    }

    let scale_x = frame_width as f32 / input_size as f32;
    let scale_y = frame_height as f32 / input_size as f32;

    let mut detections = Vec::new();
    for a in 0..anchors {
        let at = |row: usize| data[row * anchors + a];
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence {
            continue;
        }
        detections.push(RawDetection {
            class_id,
            center_x: at(0) * scale_x,
            center_y: at(1) * scale_y,
            width: at(2) * scale_x,
            height: at(3) * scale_y,
            confidence: score,
            space: BoxSpace::Pixel,
        });
    }
    Ok(detections)
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let (ax0, ay0) = (a.center_x - a.width / 2.0, a.center_y - a.height / 2.0);
    let (ax1, ay1) = (a.center_x + a.width / 2.0, a.center_y + a.height / 2.0);
    let (bx0, by0) = (b.center_x - b.width / 2.0, b.center_y - b.height / 2.0);
    let (bx1, by1) = (b.center_x + b.width / 2.0, b.center_y + b.height / 2.0);

    let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class NMS, highest confidence first.
pub fn non_max_suppression(xs: &mut Vec<RawDetection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id == xs[index].class_id
                && iou(&xs[prev_index], &xs[index]) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

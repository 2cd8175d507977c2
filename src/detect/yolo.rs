//! YOLO-style pre- and post-processing shared by ONNX backends.
//!
//! Detector heads export `[1, 4 + nc, N]` (channels first) or `[1, N, 4 + nc]`
//! with rows `cx, cy, w, h, score_0 … score_{nc-1}` in model input pixels.
//! Detector inputs are letterboxed; classifier inputs are resized on the
//! short side and centre-cropped.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::result::{Classification, RawDetection};

/// Overlap above which a lower-scoring box of the same class is suppressed.
pub(crate) const NMS_IOU_THRESHOLD: f32 = 0.7;
/// Candidates below this score never reach NMS.
pub(crate) const CANDIDATE_FLOOR: f32 = 0.25;
pub(crate) const MAX_DETECTIONS: usize = 300;
/// Grey used for letterbox padding.
pub(crate) const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// Placement of a frame inside a square letterboxed model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Letterbox {
    /// Uniform frame-to-input scale.
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    /// Size of the resized frame inside the input.
    pub inner_width: u32,
    pub inner_height: u32,
}

impl Letterbox {
    /// Fit a `width`x`height` frame into a `size`x`size` input, centred.
    pub(crate) fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let inner_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let inner_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            pad_x: (size - inner_width) / 2,
            pad_y: (size - inner_height) / 2,
            inner_width,
            inner_height,
        }
    }

    /// Map a point in model input pixels back to frame pixels.
    pub(crate) fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Resize `image` preserving aspect ratio and pad it to `size`x`size`.
pub(crate) fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let placement = Letterbox::fit(image.width(), image.height(), size);
    let resized = imageops::resize(
        image,
        placement.inner_width,
        placement.inner_height,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size, size, LETTERBOX_FILL);
    imageops::replace(
        &mut canvas,
        &resized,
        placement.pad_x as i64,
        placement.pad_y as i64,
    );
    (canvas, placement)
}

/// Resize the short side to `size`, then crop the centre `size`x`size`.
pub(crate) fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let scale = (size as f32 / image.width() as f32).max(size as f32 / image.height() as f32);
    let width = ((image.width() as f32 * scale).round() as u32).max(size);
    let height = ((image.height() as f32 * scale).round() as u32).max(size);
    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    imageops::crop_imm(&resized, (width - size) / 2, (height - size) / 2, size, size).to_image()
}

/// Decode raw head output into frame-space detections (pre-NMS).
///
/// `placement` undoes the letterbox applied to the input.
pub(crate) fn decode(
    data: &[f32],
    shape: &[usize],
    num_classes: usize,
    placement: &Letterbox,
    floor: f32,
) -> Result<Vec<RawDetection>> {
    let row_len = 4 + num_classes;
    let (anchors, channels_first) = match shape {
        [1, c, n] if *c == row_len => (*n, true),
        [1, n, c] if *c == row_len => (*n, false),
        _ => {
            return Err(anyhow!(
                "unexpected detector output shape {:?} for {} classes",
                shape,
                num_classes
            ))
        }
    };
    if data.len() != anchors * row_len {
        return Err(anyhow!(
            "detector output has {} values, expected {}",
            data.len(),
            anchors * row_len
        ));
    }

    let at = |anchor: usize, channel: usize| -> f32 {
        if channels_first {
            data[channel * anchors + anchor]
        } else {
            data[anchor * row_len + channel]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(anchor, 4 + class);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < floor {
            continue;
        }
        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        let (x1, y1) = placement.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = placement.to_frame(cx + w / 2.0, cy + h / 2.0);
        candidates.push(RawDetection {
            bbox: [x1, y1, x2, y2],
            confidence: best_score,
            class_index: best_class,
        });
    }
    Ok(candidates)
}

pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]) * (r[3] - r[1]);
    inter / (area(a) + area(b) - inter)
}

/// Greedy class-aware NMS. Output is sorted by descending confidence.
pub(crate) fn nms(mut boxes: Vec<RawDetection>, iou_thresh: f32, max: usize) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..boxes.len() {
            if boxes[j].class_index == boxes[i].class_index
                && iou(&boxes[i].bbox, &boxes[j].bbox) > iou_thresh
            {
                suppressed[j] = true;
            }
        }
        kept.push(boxes[i].clone());
        if kept.len() == max {
            break;
        }
    }

    kept
}

/// Top-1 over classifier scores. Logits are softmaxed; probabilities pass through.
pub(crate) fn top1(scores: &[f32]) -> Option<Classification> {
    let looks_like_probs = scores.iter().all(|s| (0.0..=1.0).contains(s))
        && (scores.iter().sum::<f32>() - 1.0).abs() < 1e-3;
    let probs: Vec<f32> = if looks_like_probs {
        scores.to_vec()
    } else {
        let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    };
    probs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(class_index, confidence)| Classification {
            class_index,
            confidence: *confidence,
        })
}

//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame into the 640×640 model input, decodes the
//! anchor-free score/distance heads of each stride and suppresses
//! overlapping boxes.

use crate::crop::frame_view;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;
use vigil_core::BoundingBox;
use vigil_hw::Frame;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface buffalo_l")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    ModelLayout(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer does not match its dimensions")]
    BadFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    new_w: u32,
    new_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);
        Self {
            scale,
            pad_x: ((INPUT_SIZE as u32 - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE as u32 - new_h) / 2) as f32,
            new_w,
            new_h,
        }
    }

    /// Model input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    stride: usize,
    score: usize,
    bbox: usize,
}

/// SCRFD-based face detector.
pub struct Scrfd {
    session: Session,
    heads: [Head; 3],
}

impl Scrfd {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::ModelLayout(format!(
                "need score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let heads = map_heads(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?heads,
            "SCRFD detector loaded"
        );

        Ok(Self { session, heads })
    }

    /// Detect faces in `frame`, most confident first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for head in &self.heads {
            let (_, scores) = outputs[head.score].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {}: {e}", head.stride))
            })?;
            let (_, distances) = outputs[head.bbox].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {}: {e}", head.stride))
            })?;
            candidates.extend(decode_head(
                scores,
                distances,
                head.stride,
                &letterbox,
                (frame.width, frame.height),
            ));
        }

        Ok(suppress(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Locate each stride's score and bbox outputs by name ("score_8",
/// "bbox_8", ...). Exports with numeric names use the conventional order:
/// scores for strides 8/16/32 first, then bboxes.
fn map_heads(names: &[String]) -> [Head; 3] {
    let position = |kind: &str, stride: usize| {
        let target = format!("{kind}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<Head>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(Head {
                stride,
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
            })
        })
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => std::array::from_fn(|i| Head {
            stride: STRIDES[i],
            score: i,
            bbox: i + STRIDES.len(),
        }),
    }
}

/// Letterbox the grayscale frame into a normalized 1×3×640×640 tensor.
fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let view = frame_view(frame).ok_or(DetectorError::BadFrame)?;
    let letterbox = Letterbox::fit(frame.width, frame.height);
    let resized = imageops::resize(&view, letterbox.new_w, letterbox.new_h, FilterType::Triangle);

    // Zero is the normalized value of the mean-gray padding.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let v = (px.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    Ok((tensor, letterbox))
}

/// Turn one stride's raw outputs into frame-space detections above the
/// score threshold. Boxes are clipped to the frame; empty ones are dropped.
fn decode_head(
    scores: &[f32],
    distances: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    (frame_w, frame_h): (u32, u32),
) -> Vec<Detection> {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > SCORE_THRESHOLD)
        .filter_map(|i| {
            let d = distances.get(i * 4..i * 4 + 4)?;
            let cell = i / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = letterbox.unmap(ax + d[2] * s, ay + d[3] * s);
            let bbox = BoundingBox::new(
                x1.clamp(0.0, frame_w as f32),
                y1.clamp(0.0, frame_h as f32),
                x2.clamp(0.0, frame_w as f32),
                y2.clamp(0.0, frame_h as f32),
            );
            (bbox.area() > 0.0).then_some(Detection {
                bbox,
                score: scores[i],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by descending score.
fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for det in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let inter = overlap.area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            score,
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        // Overlap 5x10 = 50, union 150
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let kept = suppress(
            vec![
                det(5.0, 5.0, 105.0, 105.0, 0.8),
                det(200.0, 200.0, 250.0, 250.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            NMS_IOU_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_suppress_empty() {
        assert!(suppress(vec![], NMS_IOU_THRESHOLD).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let lb = Letterbox::fit(640, 480);
        assert_eq!((lb.new_w, lb.new_h), (640, 480));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 80.0));
        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_upscales_small_frames() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!((lb.new_w, lb.new_h), (640, 480));
    }

    #[test]
    fn test_map_heads_by_name() {
        let names: Vec<String> = ["bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let heads = map_heads(&names);
        assert_eq!(heads[0], Head { stride: 8, score: 2, bbox: 0 });
        assert_eq!(heads[2], Head { stride: 32, score: 8, bbox: 6 });
    }

    #[test]
    fn test_map_heads_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (448 + i).to_string()).collect();
        let heads = map_heads(&names);
        assert_eq!(heads[0], Head { stride: 8, score: 0, bbox: 3 });
        assert_eq!(heads[1], Head { stride: 16, score: 1, bbox: 4 });
        assert_eq!(heads[2], Head { stride: 32, score: 2, bbox: 5 });
    }

    #[test]
    fn test_decode_head_single_anchor() {
        // Stride 32 on a 640x640 frame: grid 20x20, no letterbox offset.
        let lb = Letterbox::fit(640, 640);
        let anchors = 20 * 20 * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut distances = vec![0.0f32; anchors * 4];
        // Cell (x=3, y=2), first anchor
        let idx = (2 * 20 + 3) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        distances[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 3.0]);

        let dets = decode_head(&scores, &distances, 32, &lb, (640, 640));
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        // Anchor at (96, 64)
        assert!((b.x1 - 64.0).abs() < 1e-3);
        assert!((b.y1 - 32.0).abs() < 1e-3);
        assert!((b.x2 - 160.0).abs() < 1e-3);
        assert!((b.y2 - 160.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_head_drops_boxes_outside_frame() {
        let lb = Letterbox::fit(640, 640);
        let anchors = 20 * 20 * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let distances = vec![0.0f32; anchors * 4];
        scores[0] = 0.95; // zero-size box at the origin
        assert!(decode_head(&scores, &distances, 32, &lb, (640, 640)).is_empty());
    }

    #[test]
    fn test_preprocess_padding_is_zero() {
        let frame = Frame::from_gray(vec![255u8; 64 * 32], 64, 32, 0);
        let (tensor, lb) = preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
    }
}

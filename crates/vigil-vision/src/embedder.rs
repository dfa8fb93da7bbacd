//! ArcFace identity embeddings via ONNX Runtime.
//!
//! Crops a square around each detected box, resizes it to 112×112 and
//! runs the w600k_r50 model. The returned vector is raw model output;
//! normalization happens at match time.

use crate::crop::face_crop;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;
use vigil_core::{BoundingBox, Embedding};
use vigil_hw::Frame;

const INPUT_SIZE: u32 = 112;
// ArcFace uses symmetric normalization, unlike SCRFD.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}; download w600k_r50.onnx from insightface buffalo_l")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
pub struct ArcFace {
    session: Session,
}

impl ArcFace {
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "ArcFace embedder loaded");
        Ok(Self { session })
    }

    /// Extract the embedding of the face under `bbox`.
    pub fn embed(&mut self, frame: &Frame, bbox: &BoundingBox) -> Result<Embedding, EmbedderError> {
        let crop = face_crop(frame, bbox, true).ok_or(EmbedderError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::new(raw.to_vec()))
    }
}

/// Resize a face crop to 112×112 and build a normalized 1×3×112×112 tensor.
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let face = imageops::resize(crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in face.enumerate_pixels() {
        let v = (px.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}

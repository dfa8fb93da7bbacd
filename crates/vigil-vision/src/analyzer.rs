//! Detection + embedding in one step, as consumed by the sampling loop.

use crate::detector::{Detection, DetectorError, Scrfd};
use crate::embedder::{ArcFace, EmbedderError};
use crate::{DETECTOR_MODEL_FILE, EMBEDDER_MODEL_FILE};
use std::path::Path;
use thiserror::Error;
use vigil_core::{DetectionError, Face, FaceDetector};
use vigil_hw::Frame;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// SCRFD detector paired with an ArcFace embedder.
pub struct FaceAnalyzer {
    detector: Scrfd,
    embedder: ArcFace,
}

impl FaceAnalyzer {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = Scrfd::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let embedder = ArcFace::load(&model_dir.join(EMBEDDER_MODEL_FILE))?;
        Ok(Self { detector, embedder })
    }

    /// Detect every face in `frame` and extract its embedding.
    ///
    /// A face whose crop is empty is skipped; inference failures abort the
    /// frame.
    pub fn analyze(&mut self, frame: &Frame) -> Result<Vec<Face>, AnalyzerError> {
        let detections = self.detector.detect(frame)?;
        let mut faces = Vec::with_capacity(detections.len());
        for Detection { bbox, score } in detections {
            match self.embedder.embed(frame, &bbox) {
                Ok(embedding) => faces.push(Face {
                    bbox,
                    confidence: score,
                    embedding,
                }),
                Err(EmbedderError::EmptyCrop) => {
                    tracing::warn!(?bbox, "skipping face with empty crop");
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::debug!(
            seq = frame.sequence,
            dark = frame.is_dark,
            faces = faces.len(),
            "frame analyzed"
        );
        Ok(faces)
    }
}

impl FaceDetector<Frame> for FaceAnalyzer {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<Face>, DetectionError> {
        self.analyze(frame).map_err(|e| DetectionError(e.to_string()))
    }
}

//! vigil-vision — Face detection and embedding extraction.
//!
//! SCRFD finds faces, ArcFace turns each face crop into an identity
//! embedding. Both run on ONNX Runtime on the CPU.

pub mod analyzer;
pub mod crop;
pub mod detector;
pub mod embedder;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use detector::{Detection, DetectorError, Scrfd};
pub use embedder::{ArcFace, EmbedderError, ARCFACE_MODEL_VERSION};

/// SCRFD model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace model file name inside the model directory.
pub const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

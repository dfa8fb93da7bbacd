use serde::{Deserialize, Serialize};

/// Axis-aligned face box in frame pixel coordinates (`x2 > x1`, `y2 > y1`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Box area in square pixels. Degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Unit-length copy of this embedding, or `None` when the norm is zero
    /// or not finite.
    pub fn normalized(&self) -> Option<Embedding> {
        let norm = self.norm();
        if norm > 0.0 && norm.is_finite() {
            Some(Embedding {
                values: self.values.iter().map(|v| v / norm).collect(),
            })
        } else {
            None
        }
    }

    /// Dot product. Equals cosine similarity when both sides are unit-length.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// One detection result for a frame. The embedding is raw model output and
/// is not expected to be normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub embedding: Embedding,
}

/// Outcome of comparing one probe embedding against the reference set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub is_match: bool,
    /// `1 - max cosine similarity`, clamped to [0, 2].
    pub distance: f32,
    /// Index of the closest reference vector.
    pub closest: usize,
}

/// Per-face record kept from the most recent detection tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    /// `None` when the face could not be matched (degenerate embedding).
    pub result: Option<MatchResult>,
}

impl FaceReport {
    pub fn is_match(&self) -> bool {
        self.result.map(|r| r.is_match).unwrap_or(false)
    }
}

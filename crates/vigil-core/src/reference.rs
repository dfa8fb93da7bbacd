//! Enrolled reference embeddings.
//!
//! The reference file is JSON written by `vigil enroll`. Vectors are stored
//! raw and normalized once at load; the resulting [`ReferenceSet`] is
//! immutable and can be shared across threads without locking.

use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference file not found: {0}; run `vigil enroll` first")]
    Missing(String),
    #[error("failed to read reference file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse reference file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("reference set is empty")]
    Empty,
    #[error("reference vector {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("reference vector {0} has zero norm")]
    ZeroNorm(usize),
}

/// On-disk reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFile {
    /// Recognition model that produced the embeddings (e.g., "w600k_r50").
    #[serde(default)]
    pub model: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub embeddings: Vec<Vec<f32>>,
}

impl ReferenceFile {
    pub fn new(model: Option<String>, embeddings: Vec<Vec<f32>>) -> Self {
        Self {
            model,
            recorded_at: Utc::now(),
            embeddings,
        }
    }

    pub fn read(path: &Path) -> Result<Self, ReferenceError> {
        if !path.exists() {
            return Err(ReferenceError::Missing(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReferenceError> {
        let io_err = |source| ReferenceError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).map_err(io_err)
    }
}

/// Non-empty, fixed-dimension collection of unit-length reference vectors.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    vectors: Vec<Embedding>,
    dim: usize,
}

impl ReferenceSet {
    /// Build a set from raw vectors, normalizing each one.
    pub fn from_vectors(raw: Vec<Vec<f32>>) -> Result<Self, ReferenceError> {
        let dim = raw.first().map(Vec::len).ok_or(ReferenceError::Empty)?;
        if dim == 0 {
            return Err(ReferenceError::DimensionMismatch {
                index: 0,
                expected: 1,
                actual: 0,
            });
        }

        let mut vectors = Vec::with_capacity(raw.len());
        for (index, values) in raw.into_iter().enumerate() {
            if values.len() != dim {
                return Err(ReferenceError::DimensionMismatch {
                    index,
                    expected: dim,
                    actual: values.len(),
                });
            }
            let unit = Embedding::new(values)
                .normalized()
                .ok_or(ReferenceError::ZeroNorm(index))?;
            vectors.push(unit);
        }

        Ok(Self { vectors, dim })
    }

    /// Load and normalize the reference file at `path`.
    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let file = ReferenceFile::read(path)?;
        let set = Self::from_vectors(file.embeddings)?;
        tracing::info!(
            path = %path.display(),
            count = set.len(),
            dim = set.dim(),
            model = file.model.as_deref().unwrap_or("unknown"),
            "reference set loaded"
        );
        Ok(set)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Embedding> {
        self.vectors.iter()
    }
}

//! Collaborators the sampling loop depends on: frame acquisition, face
//! detection, protective OS actions and the out-of-band interrupt flags.

use crate::types::Face;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("frame acquisition failed: {0}")]
pub struct AcquisitionError(pub String);

#[derive(Error, Debug)]
#[error("face detection failed: {0}")]
pub struct DetectionError(pub String);

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{action}: failed to launch `{program}`: {source}")]
    Spawn {
        action: &'static str,
        program: String,
        source: std::io::Error,
    },
    #[error("{action}: `{program}` exited with {status}")]
    Status {
        action: &'static str,
        program: String,
        status: String,
    },
}

/// Camera or other frame producer.
pub trait FrameSource {
    type Frame;

    fn capture_frame(&mut self) -> Result<Self::Frame, AcquisitionError>;
}

/// Face detection + embedding model. An empty list is a valid result.
pub trait FaceDetector<F> {
    fn detect_faces(&mut self, frame: &F) -> Result<Vec<Face>, DetectionError>;
}

/// OS-level protective actions.
///
/// `display_off`/`display_on` are fire-and-forget. `unmount_secure_volume`
/// must complete before `hibernate_system` is issued.
pub trait ProtectiveActions {
    fn display_off(&mut self) -> Result<(), ActionError>;
    fn display_on(&mut self) -> Result<(), ActionError>;
    fn unmount_secure_volume(&mut self) -> Result<(), ActionError>;
    fn hibernate_system(&mut self) -> Result<(), ActionError>;
}

/// One-shot process-wide termination flag.
///
/// The listener that trips it never touches decision state; the loop only
/// reads it.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    tripped: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// Latched user-interrupt requests (e.g., a key press) consumed by the loop.
#[derive(Debug, Clone, Default)]
pub struct UserInterrupt {
    pending: Arc<AtomicBool>,
}

impl UserInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending interrupt, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

//! vigil-core — Presence decision engine.
//!
//! Matches detected faces against enrolled reference embeddings, debounces
//! the per-tick outcome into a stable presence signal and dispatches the
//! configured protective mode when the authorized face stays absent.

pub mod matcher;
pub mod mode;
pub mod pipeline;
pub mod presence;
pub mod reference;
pub mod sampler;
pub mod types;

pub use matcher::{CosineMatcher, FaceSelection, MatchError, Matcher};
pub use mode::{Mode, ModeController, Transition, WakeReason};
pub use pipeline::{
    AcquisitionError, ActionError, DetectionError, FaceDetector, FrameSource, KillSwitch,
    ProtectiveActions, UserInterrupt,
};
pub use presence::{AbsenceTimer, PresenceDebouncer};
pub use reference::{ReferenceError, ReferenceFile, ReferenceSet};
pub use sampler::{Exit, LoopError, LoopSettings, SamplingLoop, Step};
pub use types::{BoundingBox, Embedding, Face, FaceReport, MatchResult};

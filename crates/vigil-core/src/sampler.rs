//! The sampling loop: frame → detection → matching → debounce → mode.
//!
//! Single-threaded. Detection runs at most once per sampling interval;
//! the timeout, user-interrupt and kill-switch checks run on every cycle.

use crate::matcher::{evaluate_faces, CosineMatcher, FaceSelection};
use crate::mode::{Mode, ModeController, Transition};
use crate::pipeline::{
    AcquisitionError, FaceDetector, FrameSource, KillSwitch, ProtectiveActions, UserInterrupt,
};
use crate::presence::{AbsenceTimer, PresenceDebouncer};
use crate::reference::ReferenceSet;
use crate::types::FaceReport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// Decision thresholds and pacing for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub mode: Mode,
    pub tolerance: f32,
    pub timeout: Duration,
    pub required_consecutive_ok: u32,
    pub selection: FaceSelection,
    pub sampling_interval: Duration,
    /// Sleep between cycles in [`SamplingLoop::run`].
    pub poll_interval: Duration,
}

/// Why the loop stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    KillSwitch,
    LockedDown,
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(Exit),
}

pub struct SamplingLoop<S, D, A> {
    source: S,
    detector: D,
    actions: A,
    reference: Arc<ReferenceSet>,
    settings: LoopSettings,
    debouncer: PresenceDebouncer,
    timer: AbsenceTimer,
    controller: ModeController,
    kill_switch: KillSwitch,
    interrupt: UserInterrupt,
    last_sample: Option<Instant>,
    last_faces: Vec<FaceReport>,
    transitions: Vec<Transition>,
    ticks: u64,
}

impl<S, D, A> SamplingLoop<S, D, A>
where
    S: FrameSource,
    D: FaceDetector<S::Frame>,
    A: ProtectiveActions,
{
    /// Build a loop whose absence clock starts at `started_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        detector: D,
        actions: A,
        reference: Arc<ReferenceSet>,
        settings: LoopSettings,
        kill_switch: KillSwitch,
        interrupt: UserInterrupt,
        started_at: Instant,
    ) -> Self {
        Self {
            debouncer: PresenceDebouncer::new(settings.required_consecutive_ok),
            timer: AbsenceTimer::new(settings.timeout, started_at),
            controller: ModeController::new(settings.mode),
            source,
            detector,
            actions,
            reference,
            settings,
            kill_switch,
            interrupt,
            last_sample: None,
            last_faces: Vec::new(),
            transitions: Vec::new(),
            ticks: 0,
        }
    }

    /// Run until the kill switch trips, lockdown fires or acquisition fails.
    pub fn run(&mut self) -> Result<Exit, LoopError> {
        tracing::info!(
            mode = %self.settings.mode,
            selection = ?self.settings.selection,
            tolerance = self.settings.tolerance,
            timeout_secs = self.settings.timeout.as_secs_f32(),
            required = self.settings.required_consecutive_ok,
            interval_secs = self.settings.sampling_interval.as_secs_f32(),
            "sampling loop started"
        );
        loop {
            match self.step(Instant::now())? {
                Step::Continue => std::thread::sleep(self.settings.poll_interval),
                Step::Exit(exit) => {
                    tracing::info!(?exit, ticks = self.ticks, "sampling loop stopped");
                    return Ok(exit);
                }
            }
        }
    }

    /// Execute one cycle at time `now`.
    pub fn step(&mut self, now: Instant) -> Result<Step, LoopError> {
        self.transitions.clear();
        if self.kill_switch.is_tripped() {
            tracing::warn!("kill switch tripped");
            return Ok(Step::Exit(Exit::KillSwitch));
        }

        if self.sample_due(now) {
            self.last_sample = Some(now);
            self.sample(now)?;
        }

        if self.timer.timed_out(now) {
            if let Some(t) = self.controller.on_timeout(&mut self.actions) {
                self.transitions.push(t);
                match t {
                    // Waking needs a fresh run of positive ticks.
                    Transition::DisplayOff => self.debouncer.reset(),
                    Transition::LockedDown => return Ok(Step::Exit(Exit::LockedDown)),
                    _ => {}
                }
            }
        }

        // Drained every cycle so a stale press cannot wake a later blank.
        if self.interrupt.take() {
            if let Some(t) = self.controller.on_user_interrupt(&mut self.actions) {
                self.transitions.push(t);
                self.timer.confirm(now);
            }
        }

        Ok(Step::Continue)
    }

    fn sample_due(&self, now: Instant) -> bool {
        self.last_sample
            .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.sampling_interval)
    }

    fn sample(&mut self, now: Instant) -> Result<(), LoopError> {
        let frame = self.source.capture_frame()?;
        self.ticks += 1;

        let faces = match self.detector.detect_faces(&frame) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(error = %err, tick = self.ticks, "detection failed; counting tick as negative");
                Vec::new()
            }
        };

        let reports = evaluate_faces(
            &CosineMatcher,
            &faces,
            &self.reference,
            self.settings.tolerance,
        );
        let positive = self.settings.selection.reduce(&reports);
        let confirmed = self.debouncer.observe(positive);

        tracing::debug!(
            tick = self.ticks,
            faces = reports.len(),
            matched = reports.iter().filter(|r| r.is_match()).count(),
            positive,
            consecutive_ok = self.debouncer.consecutive_ok(),
            confirmed,
            display_off = self.controller.is_display_off(),
            "tick"
        );
        self.last_faces = reports;

        if confirmed {
            self.timer.confirm(now);
            if let Some(t) = self.controller.on_presence_confirmed(&mut self.actions) {
                self.transitions.push(t);
            }
        }
        Ok(())
    }

    /// Face reports from the most recent detection tick.
    pub fn last_faces(&self) -> &[FaceReport] {
        &self.last_faces
    }

    /// Transitions performed by the most recent [`step`](Self::step).
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn controller(&self) -> &ModeController {
        &self.controller
    }

    pub fn debouncer(&self) -> &PresenceDebouncer {
        &self.debouncer
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }

    /// Number of detection ticks performed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ActionError, DetectionError};
    use crate::types::{BoundingBox, Embedding, Face};

    struct Frames {
        remaining: usize,
    }

    impl FrameSource for Frames {
        type Frame = ();

        fn capture_frame(&mut self) -> Result<(), AcquisitionError> {
            if self.remaining == 0 {
                return Err(AcquisitionError("no camera output".into()));
            }
            self.remaining -= 1;
            Ok(())
        }
    }

    struct AlwaysFails;

    impl FaceDetector<()> for AlwaysFails {
        fn detect_faces(&mut self, _: &()) -> Result<Vec<Face>, DetectionError> {
            Err(DetectionError("session poisoned".into()))
        }
    }

    struct Owner;

    impl FaceDetector<()> for Owner {
        fn detect_faces(&mut self, _: &()) -> Result<Vec<Face>, DetectionError> {
            Ok(vec![Face {
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                confidence: 0.9,
                embedding: Embedding::new(vec![1.0, 0.0]),
            }])
        }
    }

    #[derive(Default)]
    struct Count(usize);

    impl ProtectiveActions for Count {
        fn display_off(&mut self) -> Result<(), ActionError> {
            self.0 += 1;
            Ok(())
        }
        fn display_on(&mut self) -> Result<(), ActionError> {
            self.0 += 1;
            Ok(())
        }
        fn unmount_secure_volume(&mut self) -> Result<(), ActionError> {
            self.0 += 1;
            Ok(())
        }
        fn hibernate_system(&mut self) -> Result<(), ActionError> {
            self.0 += 1;
            Ok(())
        }
    }

    fn settings(mode: Mode) -> LoopSettings {
        LoopSettings {
            mode,
            tolerance: 0.4,
            timeout: Duration::from_secs(5),
            required_consecutive_ok: 3,
            selection: FaceSelection::AnyMatch,
            sampling_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn reference() -> Arc<ReferenceSet> {
        Arc::new(ReferenceSet::from_vectors(vec![vec![1.0, 0.0]]).unwrap())
    }

    #[test]
    fn test_detection_is_rate_limited() {
        let t0 = Instant::now();
        let mut l = SamplingLoop::new(
            Frames { remaining: 100 },
            Owner,
            Count::default(),
            reference(),
            settings(Mode::Debug),
            KillSwitch::new(),
            UserInterrupt::new(),
            t0,
        );
        for ms in (0..3000).step_by(50) {
            l.step(t0 + Duration::from_millis(ms)).unwrap();
        }
        // Ticks at 0s, 1s, 2s
        assert_eq!(l.ticks(), 3);
        assert_eq!(l.last_faces().len(), 1);
        assert!(l.debouncer().is_confirmed());
    }

    #[test]
    fn test_acquisition_failure_is_fatal() {
        let t0 = Instant::now();
        let mut l = SamplingLoop::new(
            Frames { remaining: 1 },
            Owner,
            Count::default(),
            reference(),
            settings(Mode::Monitor),
            KillSwitch::new(),
            UserInterrupt::new(),
            t0,
        );
        assert_eq!(l.step(t0).unwrap(), Step::Continue);
        let err = l.step(t0 + Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, LoopError::Acquisition(_)));
        assert_eq!(l.actions().0, 0);
    }

    #[test]
    fn test_detection_failure_counts_as_negative() {
        let t0 = Instant::now();
        let mut l = SamplingLoop::new(
            Frames { remaining: 100 },
            AlwaysFails,
            Count::default(),
            reference(),
            settings(Mode::Debug),
            KillSwitch::new(),
            UserInterrupt::new(),
            t0,
        );
        for s in 0..3 {
            assert_eq!(l.step(t0 + Duration::from_secs(s)).unwrap(), Step::Continue);
        }
        assert_eq!(l.debouncer().consecutive_ok(), 0);
        assert!(l.last_faces().is_empty());
    }

    #[test]
    fn test_kill_switch_bypasses_everything() {
        let t0 = Instant::now();
        let ks = KillSwitch::new();
        let mut l = SamplingLoop::new(
            Frames { remaining: 100 },
            Owner,
            Count::default(),
            reference(),
            settings(Mode::Lockdown),
            ks.clone(),
            UserInterrupt::new(),
            t0,
        );
        ks.trip();
        assert_eq!(
            l.step(t0 + Duration::from_secs(60)).unwrap(),
            Step::Exit(Exit::KillSwitch)
        );
        assert_eq!(l.ticks(), 0);
        assert_eq!(l.actions().0, 0);
    }
}

//! Protective mode dispatch.
//!
//! The mode is chosen once at startup. Each variant carries its own latch
//! so that repeated timeout ticks fire the external action only once per
//! transition.

use crate::pipeline::{ActionError, ProtectiveActions};
use serde::{Deserialize, Serialize};

/// Protective behaviour selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Log what would happen, touch nothing.
    #[default]
    Debug,
    /// Power the display off on absence, back on on return.
    Monitor,
    /// Unmount the secure volume and hibernate, then exit.
    Lockdown,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Debug => "debug",
            Mode::Monitor => "monitor",
            Mode::Lockdown => "lockdown",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Mode::Debug),
            "monitor" => Ok(Mode::Monitor),
            "lockdown" => Ok(Mode::Lockdown),
            other => Err(format!(
                "unknown mode '{other}' (expected debug, monitor or lockdown)"
            )),
        }
    }
}

/// Why a blanked display was switched back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Presence,
    UserInterrupt,
}

/// A state change performed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Debug: an action would have fired.
    WouldTrigger,
    /// Debug: the pending action would have been cancelled.
    WouldCancel,
    DisplayOff,
    DisplayOn(WakeReason),
    /// Lockdown sequence issued; the process must terminate.
    LockedDown,
}

/// Per-mode latch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeController {
    Debug { action_pending: bool },
    Monitor { display_off: bool },
    Lockdown,
}

impl ModeController {
    pub fn new(mode: Mode) -> Self {
        match mode {
            Mode::Debug => ModeController::Debug {
                action_pending: false,
            },
            Mode::Monitor => ModeController::Monitor { display_off: false },
            Mode::Lockdown => ModeController::Lockdown,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ModeController::Debug { .. } => Mode::Debug,
            ModeController::Monitor { .. } => Mode::Monitor,
            ModeController::Lockdown => Mode::Lockdown,
        }
    }

    /// Whether the display is currently blanked by this controller.
    pub fn is_display_off(&self) -> bool {
        matches!(self, ModeController::Monitor { display_off: true })
    }

    /// Handle a tick on which presence is confirmed.
    pub fn on_presence_confirmed(
        &mut self,
        actions: &mut dyn ProtectiveActions,
    ) -> Option<Transition> {
        match self {
            ModeController::Debug { action_pending } if *action_pending => {
                *action_pending = false;
                tracing::info!("debug: authorized face back, would cancel action");
                Some(Transition::WouldCancel)
            }
            ModeController::Monitor { display_off } if *display_off => {
                *display_off = false;
                tracing::info!("monitor: authorized face confirmed, turning display on");
                report(actions.display_on());
                Some(Transition::DisplayOn(WakeReason::Presence))
            }
            _ => None,
        }
    }

    /// Handle a tick on which the absence timeout has elapsed.
    ///
    /// A no-op while the mode's latch is already set.
    pub fn on_timeout(&mut self, actions: &mut dyn ProtectiveActions) -> Option<Transition> {
        match self {
            ModeController::Debug { action_pending } if !*action_pending => {
                *action_pending = true;
                tracing::info!("debug: authorized face absent, would trigger action");
                Some(Transition::WouldTrigger)
            }
            ModeController::Monitor { display_off } if !*display_off => {
                // Latched even if the command fails, so a broken command is
                // not re-run every tick.
                *display_off = true;
                tracing::info!("monitor: authorized face absent, turning display off");
                report(actions.display_off());
                Some(Transition::DisplayOff)
            }
            ModeController::Lockdown => {
                tracing::warn!("lockdown: authorized face absent, unmounting secure volume");
                report(actions.unmount_secure_volume());
                tracing::warn!("lockdown: hibernating");
                report(actions.hibernate_system());
                Some(Transition::LockedDown)
            }
            _ => None,
        }
    }

    /// Handle an explicit user interrupt. Only wakes a blanked display.
    pub fn on_user_interrupt(
        &mut self,
        actions: &mut dyn ProtectiveActions,
    ) -> Option<Transition> {
        match self {
            ModeController::Monitor { display_off } if *display_off => {
                *display_off = false;
                tracing::info!("monitor: user interrupt, turning display on");
                report(actions.display_on());
                Some(Transition::DisplayOn(WakeReason::UserInterrupt))
            }
            _ => None,
        }
    }
}

fn report(result: Result<(), ActionError>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "protective action failed");
    }
}

//! vigil-hw — Camera capture and OS-level protective actions.
//!
//! Provides V4L2-based grayscale frame capture and command-backed display
//! power, secure-volume and hibernation control.

pub mod actions;
pub mod camera;
pub mod frame;

pub use actions::{ActionCommands, CommandActions};
pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::{Frame, PixelFormat};

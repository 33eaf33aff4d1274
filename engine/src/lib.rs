//! Gazetrack engine library: gaze acquisition, calibration, hit detection
//! and session recording for gaze-tracking experiments.
//!
//! This library crate exposes the engine's modules for integration
//! testing. The binary entry point lives in `main.rs`.

pub mod backend;
pub mod clock;
pub mod gaze;
pub mod record;
pub mod session;

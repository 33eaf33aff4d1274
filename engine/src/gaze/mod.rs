//! Gaze acquisition, calibration and hit detection.

pub mod calibration;
pub mod hit;
pub mod math;
pub mod provider;
pub mod scene;
pub mod source;

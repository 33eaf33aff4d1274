//! Per-tick gaze acquisition: eye signal with head-direction fallback,
//! sample validation, and the one-shot signal health probe.
//!
//! A sample is only ever marked `Eye` when it is also valid; anything the
//! eye provider cannot deliver cleanly is demoted to a head-gaze sample for
//! that tick.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::math::{Ray, Vec3};
use super::provider::{EyeGazeProvider, EyeReading, HeadPose, HeadPoseProvider};
use crate::clock::Timestamp;

// ── Source kind ─────────────────────────────────────────────

/// Which signal produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Eye tracker.
    Eye,
    /// Head / camera forward direction.
    Head,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eye => "eye",
            Self::Head => "head",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eye" => Some(Self::Eye),
            "head" => Some(Self::Head),
            _ => None,
        }
    }
}

// ── Gaze sample ─────────────────────────────────────────────

/// One tick's gaze estimate. Built once per tick and dropped after it.
#[derive(Debug, Clone, Copy)]
pub struct GazeSample {
    pub origin: Vec3,
    /// Direction as delivered by the source (not re-normalized).
    pub direction: Vec3,
    pub source: SourceKind,
    /// True only for clean eye-tracker samples.
    pub valid: bool,
    /// Head pose at the time of the sample.
    pub head: HeadPose,
    pub timestamp: Timestamp,
}

impl GazeSample {
    pub fn ray(&self) -> Ray {
        Ray::new(self.origin, self.direction)
    }

    /// Eye-sourced and valid: the only samples that may feed calibration.
    pub fn is_valid_eye(&self) -> bool {
        self.valid && self.source == SourceKind::Eye
    }
}

// ── Validator ───────────────────────────────────────────────

/// Configuration for the gaze source.
#[derive(Debug, Clone)]
pub struct GazeSourceConfig {
    /// Never query the eye provider; always use head gaze.
    pub force_head_gaze: bool,
    /// Minimum direction magnitude for an eye reading to count as valid.
    pub min_direction_magnitude: f32,
}

impl Default for GazeSourceConfig {
    fn default() -> Self {
        Self {
            force_head_gaze: false,
            min_direction_magnitude: 0.01,
        }
    }
}

/// Classify a raw eye reading: finite components and a non-degenerate
/// direction.
pub fn is_valid_eye_reading(reading: &EyeReading, min_magnitude: f32) -> bool {
    reading.origin.is_finite()
        && reading.direction.is_finite()
        && reading.direction.length() > min_magnitude
}

// ── Gaze source ─────────────────────────────────────────────

/// Fuses the eye provider and the head pose into one sample per tick.
pub struct GazeSource<E, H> {
    pub config: GazeSourceConfig,
    eye: E,
    head: H,
    /// Eye readings rejected by validation.
    rejected: u64,
    /// Provider faults swallowed into head fallback.
    faults: u64,
}

impl<E: EyeGazeProvider, H: HeadPoseProvider> GazeSource<E, H> {
    pub fn new(config: GazeSourceConfig, eye: E, head: H) -> Self {
        if config.force_head_gaze {
            info!("Gaze source: head gaze forced by configuration");
        } else if !eye.is_available() {
            warn!("Eye gaze provider unavailable, using head gaze");
        } else if !eye.is_enabled() {
            warn!("Eye gaze provider reports tracking disabled, attempting readings anyway");
        }
        Self {
            config,
            eye,
            head,
            rejected: 0,
            faults: 0,
        }
    }

    /// Produce this tick's sample.
    pub fn sample(&mut self, timestamp: Timestamp) -> GazeSample {
        let head = self.head.head_pose();

        if self.config.force_head_gaze || !self.eye.is_available() {
            return head_sample(head, timestamp);
        }

        match self.eye.sample() {
            Ok(reading) if is_valid_eye_reading(&reading, self.config.min_direction_magnitude) => {
                GazeSample {
                    origin: reading.origin,
                    direction: reading.direction,
                    source: SourceKind::Eye,
                    valid: true,
                    head,
                    timestamp,
                }
            }
            Ok(_) => {
                self.rejected += 1;
                head_sample(head, timestamp)
            }
            Err(e) => {
                self.faults += 1;
                if self.faults == 1 {
                    warn!("Eye provider fault, falling back to head gaze: {}", e);
                } else {
                    debug!("Eye provider fault #{}: {}", self.faults, e);
                }
                head_sample(head, timestamp)
            }
        }
    }

    /// Switch to head gaze for the rest of the session.
    pub fn force_head_gaze(&mut self) {
        if !self.config.force_head_gaze {
            self.config.force_head_gaze = true;
            warn!("Gaze source: switching to head gaze for the remainder of the session");
        }
    }

    pub fn is_head_forced(&self) -> bool {
        self.config.force_head_gaze
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    pub fn eye_provider(&self) -> &E {
        &self.eye
    }

    pub fn eye_provider_mut(&mut self) -> &mut E {
        &mut self.eye
    }

    pub fn head_provider_mut(&mut self) -> &mut H {
        &mut self.head
    }
}

/// Head-gaze fallback: camera position, forward ray through the view center.
fn head_sample(head: HeadPose, timestamp: Timestamp) -> GazeSample {
    GazeSample {
        origin: head.position,
        direction: head.forward(),
        source: SourceKind::Head,
        valid: false,
        head,
        timestamp,
    }
}

// ── Signal health probe ─────────────────────────────────────

/// Configuration for the eye signal health probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long to sample.
    pub duration: Duration,
    /// Eye tracking counts as working only above this many valid eye ticks.
    pub min_valid_eye_ticks: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(3),
            min_valid_eye_ticks: 50,
        }
    }
}

/// Outcome of a finished probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub valid_eye_ticks: u32,
    pub total_ticks: u32,
    pub eye_tracking_working: bool,
}

/// Time-boxed count of valid eye ticks.
#[derive(Debug, Clone)]
pub struct SignalProbe {
    config: ProbeConfig,
    started: Instant,
    valid_eye_ticks: u32,
    total_ticks: u32,
}

impl SignalProbe {
    pub fn new(config: ProbeConfig, started: Instant) -> Self {
        info!(
            "Signal probe started ({:.1}s, need > {} valid eye ticks)",
            config.duration.as_secs_f32(),
            config.min_valid_eye_ticks
        );
        Self {
            config,
            started,
            valid_eye_ticks: 0,
            total_ticks: 0,
        }
    }

    /// Feed one tick's sample. Returns the report once the deadline has
    /// passed; samples at or after the deadline are not counted.
    pub fn observe(&mut self, sample: &GazeSample) -> Option<ProbeReport> {
        if sample.timestamp.at.saturating_duration_since(self.started) >= self.config.duration {
            return Some(self.report());
        }
        self.total_ticks += 1;
        if sample.is_valid_eye() {
            self.valid_eye_ticks += 1;
        }
        None
    }

    pub fn report(&self) -> ProbeReport {
        ProbeReport {
            valid_eye_ticks: self.valid_eye_ticks,
            total_ticks: self.total_ticks,
            eye_tracking_working: self.valid_eye_ticks > self.config.min_valid_eye_ticks,
        }
    }
}

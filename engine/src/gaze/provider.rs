//! Raw signal providers behind one capability interface.
//!
//! The host wires concrete implementations in at construction time; the
//! engine never looks a provider up from a global registry. Scripted and
//! simulated providers live here too so tests and offline runs can drive
//! the whole pipeline without hardware.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::math::{Pose, Quat, Vec3};

/// Why an eye provider could not deliver a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("eye gaze provider unavailable")]
    Unavailable,
    #[error("eye gaze provider fault: {0}")]
    Fault(String),
}

/// One raw origin/direction pair from the eye tracker. Not validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeReading {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl EyeReading {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }
}

/// Capability interface of the primary (eye) gaze provider.
pub trait EyeGazeProvider {
    /// Whether the provider exists at all on this host.
    fn is_available(&self) -> bool;
    /// Whether the runtime reports eye tracking as switched on. Informational:
    /// readings are still attempted when this is false.
    fn is_enabled(&self) -> bool;
    /// Fetch the current raw reading.
    fn sample(&mut self) -> Result<EyeReading, ProviderError>;
}

/// Head / camera pose.
pub type HeadPose = Pose;

/// Source of the head (camera) pose used for the fallback ray and logs.
pub trait HeadPoseProvider {
    fn head_pose(&mut self) -> HeadPose;
}

// ── Fixed head pose ─────────────────────────────────────────

/// A head that never moves. Fine for seated experiments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedHeadPose {
    pub pose: HeadPose,
}

impl FixedHeadPose {
    pub fn new(pose: HeadPose) -> Self {
        Self { pose }
    }
}

impl HeadPoseProvider for FixedHeadPose {
    fn head_pose(&mut self) -> HeadPose {
        self.pose
    }
}

// ── Unavailable provider ────────────────────────────────────

/// Eye provider for hosts without an eye tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEyeProvider;

impl EyeGazeProvider for UnavailableEyeProvider {
    fn is_available(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn sample(&mut self) -> Result<EyeReading, ProviderError> {
        Err(ProviderError::Unavailable)
    }
}

// ── Scripted provider ───────────────────────────────────────

/// A scripted eye provider that delivers readings from a pre-defined queue.
/// Once the queue is empty it keeps reporting `Unavailable` faults.
pub struct ScriptedEyeProvider {
    readings: VecDeque<Result<EyeReading, ProviderError>>,
    available: bool,
    served: usize,
}

impl ScriptedEyeProvider {
    /// Create from a vector of readings (or faults).
    pub fn new(readings: Vec<Result<EyeReading, ProviderError>>) -> Self {
        Self {
            readings: VecDeque::from(readings),
            available: true,
            served: 0,
        }
    }

    /// `valid` good readings followed by `invalid` zero-length readings,
    /// repeated in that order. Handy for signal-health scenarios.
    pub fn with_valid_ratio(valid: usize, invalid: usize, reading: EyeReading) -> Self {
        let mut readings = Vec::with_capacity(valid + invalid);
        readings.extend((0..valid).map(|_| Ok(reading)));
        readings.extend((0..invalid).map(|_| Ok(EyeReading::new(reading.origin, Vec3::ZERO))));
        Self::new(readings)
    }

    /// Mark the provider as missing from the host.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Push another reading to the back of the queue.
    pub fn push(&mut self, reading: Result<EyeReading, ProviderError>) {
        self.readings.push_back(reading);
    }

    /// Number of remaining readings.
    pub fn remaining(&self) -> usize {
        self.readings.len()
    }

    /// Number of readings handed out so far.
    pub fn served(&self) -> usize {
        self.served
    }
}

impl EyeGazeProvider for ScriptedEyeProvider {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_enabled(&self) -> bool {
        self.available
    }

    fn sample(&mut self) -> Result<EyeReading, ProviderError> {
        let next = self
            .readings
            .pop_front()
            .unwrap_or(Err(ProviderError::Unavailable));
        self.served += 1;
        next
    }
}

// ── Simulated provider ──────────────────────────────────────

/// Parameters of the simulated eye tracker.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedEyeConfig {
    /// Systematic world-space offset added to the fixation point (meters).
    pub bias: Vec3,
    /// Half-width of the uniform noise added per axis (meters).
    pub noise: f32,
    /// Probability that a reading is dropped (zero-length direction).
    pub dropout: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulatedEyeConfig {
    fn default() -> Self {
        Self {
            bias: Vec3::new(0.04, -0.03, 0.0),
            noise: 0.01,
            dropout: 0.05,
            seed: None,
        }
    }
}

/// Simulated eye tracker: the eyes sit at the head position and look at a
/// fixation point that the host moves around.
pub struct SimulatedEyeProvider {
    pub config: SimulatedEyeConfig,
    pub eye_pose: Pose,
    fixation: Vec3,
    rng: StdRng,
}

impl SimulatedEyeProvider {
    pub fn new(config: SimulatedEyeConfig, eye_pose: Pose) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            eye_pose,
            fixation: eye_pose.to_world(Vec3::new(0.0, 0.0, -2.0)),
            rng,
        }
    }

    /// Point the simulated eyes at a world-space location.
    pub fn set_fixation(&mut self, target: Vec3) {
        self.fixation = target;
    }

    pub fn fixation(&self) -> Vec3 {
        self.fixation
    }

    fn jitter(&mut self) -> f32 {
        if self.config.noise <= 0.0 {
            return 0.0;
        }
        self.rng.random_range(-self.config.noise..=self.config.noise)
    }
}

impl EyeGazeProvider for SimulatedEyeProvider {
    fn is_available(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn sample(&mut self) -> Result<EyeReading, ProviderError> {
        let origin = self.eye_pose.position;
        if self.config.dropout > 0.0 && self.rng.random_bool(self.config.dropout.min(1.0)) {
            return Ok(EyeReading::new(origin, Vec3::ZERO));
        }
        let noise = Vec3::new(self.jitter(), self.jitter(), 0.0);
        let target = self.fixation + self.config.bias + noise;
        Ok(EyeReading::new(origin, (target - origin).normalize()))
    }
}

/// Head pose looking straight down -Z from standing eye height.
pub fn default_head_pose() -> HeadPose {
    Pose::new(Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY)
}

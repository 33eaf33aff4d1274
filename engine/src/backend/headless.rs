//! Headless backend: runs a complete session against a simulated host.
//!
//! The head is fixed at standing eye height, the stimulus display floats
//! in front of it, and the simulated eye tracker fixates whatever the
//! session shows: calibration targets while calibrating, a slow wander
//! over the display while recording.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::{Clock, TestClock};
use crate::gaze::hit::HitResolver;
use crate::gaze::math::{Pose, Quat, Vec2, Vec3};
use crate::gaze::provider::{
    default_head_pose, EyeGazeProvider, FixedHeadPose, SimulatedEyeConfig, SimulatedEyeProvider,
    UnavailableEyeProvider,
};
use crate::gaze::scene::{Collider, DisplaySurface, Scene, TargetId};
use crate::session::{
    SessionConfig, SessionController, SessionEvent, SessionReport, TimedStimulusSequence,
};

/// Exact-size stimulus image, as opposed to its enlarged fallback collider.
pub const STIMULUS_IMAGE: TargetId = TargetId(2);
/// Floor plane under the participant.
pub const FLOOR: TargetId = TargetId(3);

/// Headless host configuration.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub session: SessionConfig,
    /// Stimulus labels in presentation order.
    pub stimuli: Vec<String>,
    pub intro: Duration,
    pub display: Duration,
    pub tail: Duration,
    /// Host frame rate.
    pub tick_rate_hz: u32,
    /// Simulated eye tracker; `None` runs without one.
    pub eye: Option<SimulatedEyeConfig>,
    /// Stop after this much session time even if the session is not done.
    pub exit_after: Option<Duration>,
    /// Distance from the head to the display (meters).
    pub display_distance: f32,
    pub display_width: f32,
    pub display_height: f32,
    /// Period of the wandering gaze pattern during recording.
    pub wander_period: Duration,
    /// Interval between status log lines.
    pub status_interval: Duration,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            stimuli: vec!["Image1".into(), "Image2".into(), "Image3".into()],
            intro: Duration::from_secs(5),
            display: Duration::from_secs(25),
            tail: Duration::from_secs(2),
            tick_rate_hz: 90,
            eye: Some(SimulatedEyeConfig::default()),
            exit_after: None,
            display_distance: 2.0,
            display_width: 1.6,
            display_height: 0.9,
            wander_period: Duration::from_secs(8),
            status_interval: Duration::from_secs(10),
        }
    }
}

impl HeadlessConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

/// How the loop waits between ticks.
pub enum Pacing {
    /// Sleep for the tick period (wall clock).
    Sleep,
    /// Advance a simulated clock by the tick period.
    Advance(Arc<TestClock>),
}

impl Pacing {
    fn wait(&self, period: Duration) {
        match self {
            Self::Sleep => std::thread::sleep(period),
            Self::Advance(clock) => clock.advance(period),
        }
    }
}

/// Eye providers the host can point at a world-space location.
trait Fixate {
    fn fixate(&mut self, _target: Vec3) {}
}

impl Fixate for SimulatedEyeProvider {
    fn fixate(&mut self, target: Vec3) {
        self.set_fixation(target);
    }
}

impl Fixate for UnavailableEyeProvider {}

/// The simulated room: visible stimulus image plus a floor.
pub fn build_scene(display: &DisplaySurface, head: &Pose) -> Scene {
    let mut scene = Scene::new();
    scene.add(display.visible_collider(STIMULUS_IMAGE));
    let floor = Pose::new(
        Vec3::new(head.position.x, 0.0, head.position.z),
        Quat::from_euler(0.0, -std::f32::consts::FRAC_PI_2, 0.0),
    );
    scene.add(Collider::new(FLOOR, floor, 20.0, 20.0));
    scene
}

/// Normalized display point of the wandering gaze at time `t`.
fn wander(t: f32, period: f32) -> Vec2 {
    let phase = TAU * t / period.max(0.1);
    Vec2::new(0.5 + 0.3 * phase.sin(), 0.5 + 0.25 * (2.0 * phase).sin())
}

/// Run one session in headless mode.
pub fn run(
    clock: Arc<dyn Clock>,
    pacing: Pacing,
    config: HeadlessConfig,
) -> anyhow::Result<SessionReport> {
    let head = default_head_pose();
    let display = DisplaySurface::in_front_of(
        &head,
        config.display_distance,
        config.display_width,
        config.display_height,
    );
    info!(
        "Headless host: display {:.2}x{:.2} m at {:.2} m, {} Hz, {} stimuli",
        config.display_width,
        config.display_height,
        config.display_distance,
        config.tick_rate_hz,
        config.stimuli.len()
    );

    match config.eye {
        Some(eye) => {
            let provider = SimulatedEyeProvider::new(eye, head);
            drive(clock, pacing, &config, provider, head, display)
        }
        None => drive(clock, pacing, &config, UnavailableEyeProvider, head, display),
    }
}

fn drive<E: EyeGazeProvider + Fixate>(
    clock: Arc<dyn Clock>,
    pacing: Pacing,
    config: &HeadlessConfig,
    eye: E,
    head: Pose,
    display: DisplaySurface,
) -> anyhow::Result<SessionReport> {
    std::fs::create_dir_all(&config.session.recorder.output_dir)?;

    let resolver = HitResolver::new(build_scene(&display, &head), display);
    let stimuli = TimedStimulusSequence::new(
        config.stimuli.clone(),
        config.intro,
        config.display,
        config.tail,
    );
    let mut session = SessionController::new(
        config.session.clone(),
        clock.clone(),
        eye,
        FixedHeadPose::new(head),
        resolver,
        Box::new(stimuli),
    );

    let period = config.tick_period();
    let wander_period = config.wander_period.as_secs_f32();
    let started = clock.now();
    let mut next_status = started + config.status_interval;
    let mut wandering = false;

    session.start();
    while !session.is_done() {
        let now = clock.now();
        let elapsed = now.saturating_duration_since(started);
        if let Some(limit) = config.exit_after {
            if elapsed >= limit {
                warn!("Headless exit timer fired in phase {}", session.phase().as_str());
                break;
            }
        }
        if now >= next_status {
            info!(
                "Headless status: phase {}, {} rows written",
                session.phase().as_str(),
                session.recorder().rows_written()
            );
            next_status = now + config.status_interval;
        }

        for event in session.tick() {
            match event {
                SessionEvent::TargetShown { position, .. } => session
                    .source_mut()
                    .eye_provider_mut()
                    .fixate(display.to_world(position)),
                SessionEvent::RecordingStarted => wandering = true,
                _ => {}
            }
        }
        if wandering {
            let point = wander(elapsed.as_secs_f32(), wander_period);
            session
                .source_mut()
                .eye_provider_mut()
                .fixate(display.to_world(point));
        }

        pacing.wait(period);
    }

    let report = session.report();
    info!(
        "Headless backend shutting down (session {}, {} rows, {} files)",
        report.session_id, report.rows_written, report.files_opened
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaze::math::Ray;
    use crate::gaze::scene::SceneRaycast;

    #[test]
    fn test_wander_stays_on_display() {
        for i in 0..100 {
            let p = wander(i as f32 * 0.37, 8.0);
            assert!((0.2..=0.8).contains(&p.x), "{:?}", p);
            assert!((0.25..=0.75).contains(&p.y), "{:?}", p);
        }
    }

    #[test]
    fn test_scene_floor_below_head() {
        let head = default_head_pose();
        let display = DisplaySurface::in_front_of(&head, 2.0, 1.6, 0.9);
        let scene = build_scene(&display, &head);
        let down = Ray::new(head.position, Vec3::new(0.0, -1.0, -0.2));
        let hit = scene.raycast(&down, 10.0).unwrap();
        assert_eq!(hit.target, FLOOR);
        assert!(hit.point.y.abs() < 1e-4);

        let ahead = Ray::new(head.position, head.forward());
        assert_eq!(scene.raycast(&ahead, 10.0).unwrap().target, STIMULUS_IMAGE);
    }

    #[test]
    fn test_offline_run_without_eye_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HeadlessConfig {
            stimuli: vec!["only".into()],
            intro: Duration::from_millis(200),
            display: Duration::from_secs(1),
            tail: Duration::from_millis(100),
            eye: None,
            ..Default::default()
        };
        config.session.recorder.output_dir = dir.path().to_path_buf();

        let clock = Arc::new(TestClock::new());
        let report = run(clock.clone(), Pacing::Advance(clock), config).unwrap();
        assert!(!report.eye_tracking_working);
        assert_eq!(report.files_opened, 1);
        assert!(report.rows_written >= 85 && report.rows_written <= 95);
    }
}

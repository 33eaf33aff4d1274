//! Session orchestration: signal check, calibration, then recording.
//!
//! The controller is an explicit state machine stepped once per host tick.
//! Each phase carries a deadline instead of suspending; nothing here blocks
//! or sleeps. Phase order:
//!
//! `Idle → SignalCheck → (Calibrating →  Computing → Announcing →)? Recording → Done`
//!
//! Calibration is skipped when it is disabled or when the signal check
//! forced head-gaze-only mode. No transition is reversible.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::clock::Clock;
use crate::gaze::calibration::{
    calibration_layout, CalibrationError, CalibrationEstimator, CalibrationTransform,
};
use crate::gaze::hit::HitResolver;
use crate::gaze::math::Vec2;
use crate::gaze::provider::{EyeGazeProvider, HeadPoseProvider};
use crate::gaze::scene::SceneRaycast;
use crate::gaze::source::{
    GazeSample, GazeSource, GazeSourceConfig, ProbeConfig, ProbeReport, SignalProbe,
};
use crate::record::calibration_log::write_calibration_log;
use crate::record::recorder::{RecordOutcome, RecorderConfig, RecordingStats, SampleRecorder};
use crate::record::session_id;

// ── Configuration ───────────────────────────────────────────

/// Calibration sequence parameters.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub enabled: bool,
    /// Number of targets. 5 and 9 use fixed layouts; anything else is random.
    pub points: usize,
    /// How long the instructions are shown before the first target.
    pub instructions: Duration,
    /// Delay after a target appears before sampling starts.
    pub settle: Duration,
    /// Sampling window per target.
    pub sample: Duration,
    /// Gap between targets.
    pub pause: Duration,
    /// How long the completion indicator is shown.
    pub completion: Duration,
    /// Fewer valid samples than this and the target gets a synthetic point.
    pub min_valid_samples: usize,
    /// Offset of the synthetic observed point from the reference.
    pub synthetic_offset: Vec2,
    /// Edge margin for random layouts.
    pub random_margin: f32,
    /// Seed for random layouts.
    pub seed: Option<u64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            points: 9,
            instructions: Duration::from_secs(3),
            settle: Duration::from_millis(500),
            sample: Duration::from_secs(2),
            pause: Duration::from_millis(200),
            completion: Duration::from_secs(2),
            min_valid_samples: 10,
            synthetic_offset: Vec2::new(0.05, 0.05),
            random_margin: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub source: GazeSourceConfig,
    pub probe: ProbeConfig,
    pub calibration: CalibrationConfig,
    pub recorder: RecorderConfig,
}

// ── Stimulus sequence ───────────────────────────────────────

/// What the presentation layer is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulusStatus {
    /// Intro text before stimulus `n`; nothing is recorded.
    Intro(usize),
    /// Stimulus `n` is on screen; samples are recorded against it.
    Showing(usize),
    /// All stimuli shown, waiting before shutdown.
    Tail,
    Finished,
}

/// The external stimulus presentation sequence.
pub trait StimulusSequence {
    /// Status at `now`. The first call starts the sequence.
    fn poll(&mut self, now: Instant) -> StimulusStatus;
    /// Label of stimulus `index`, used in log rows and file names.
    fn label(&self, index: usize) -> &str;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reference sequence: intro, display for each label, then a tail wait.
#[derive(Debug, Clone)]
pub struct TimedStimulusSequence {
    labels: Vec<String>,
    pub intro: Duration,
    pub display: Duration,
    pub tail: Duration,
    started: Option<Instant>,
}

impl TimedStimulusSequence {
    pub fn new(labels: Vec<String>, intro: Duration, display: Duration, tail: Duration) -> Self {
        Self {
            labels,
            intro,
            display,
            tail,
            started: None,
        }
    }

    /// Intro 5 s, display 25 s, tail 2 s.
    pub fn with_default_timing(labels: Vec<String>) -> Self {
        Self::new(
            labels,
            Duration::from_secs(5),
            Duration::from_secs(25),
            Duration::from_secs(2),
        )
    }
}

impl StimulusSequence for TimedStimulusSequence {
    fn poll(&mut self, now: Instant) -> StimulusStatus {
        let started = *self.started.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started);
        let per_stimulus = self.intro + self.display;
        let shown = per_stimulus * self.labels.len() as u32;

        if elapsed < shown && !per_stimulus.is_zero() {
            let index = (elapsed.as_nanos() / per_stimulus.as_nanos()) as usize;
            let within = elapsed - per_stimulus * index as u32;
            return if within < self.intro {
                StimulusStatus::Intro(index)
            } else {
                StimulusStatus::Showing(index)
            };
        }
        if elapsed < shown + self.tail {
            StimulusStatus::Tail
        } else {
            StimulusStatus::Finished
        }
    }

    fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("")
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

// ── Phases and events ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    Instructing,
    Settling,
    Sampling,
    Pausing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    SignalCheck,
    Calibrating { index: usize, step: CalibrationStep },
    Computing,
    Announcing,
    Recording,
    Done,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SignalCheck => "signal-check",
            Self::Calibrating { .. } => "calibrating",
            Self::Computing => "computing",
            Self::Announcing => "announcing",
            Self::Recording => "recording",
            Self::Done => "done",
        }
    }
}

/// Something the host may want to react to (show a target, hide text, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignalCheckFinished(ProbeReport),
    /// The probe failed; head gaze is used for the rest of the session.
    HeadGazeForced,
    CalibrationInstructions { points: usize },
    TargetShown { index: usize, position: Vec2 },
    TargetHidden { index: usize, valid_samples: usize, synthetic: bool },
    CalibrationComputed(CalibrationTransform),
    CalibrationFailed(CalibrationError),
    CompletionShown,
    RecordingStarted,
    StimulusIntro { index: usize },
    /// `path` is `None` when the log file could not be opened.
    StimulusOpened { index: usize, label: String, path: Option<PathBuf> },
    StimulusClosed { label: String, stats: RecordingStats },
    Checkpoint(RecordingStats),
    Finished,
}

/// Summary of a finished (or running) session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub eye_tracking_working: bool,
    pub probe: Option<ProbeReport>,
    pub calibration: CalibrationTransform,
    pub synthetic_points: usize,
    pub calibration_log: Option<PathBuf>,
    pub rows_written: u64,
    pub rows_dropped: u64,
    pub files_opened: u32,
    pub rejected_eye_readings: u64,
    pub provider_faults: u64,
}

// ── Controller ──────────────────────────────────────────────

/// Drives one participant session.
pub struct SessionController<E, H, S> {
    pub config: SessionConfig,
    clock: Arc<dyn Clock>,
    source: GazeSource<E, H>,
    resolver: HitResolver<S>,
    stimuli: Box<dyn StimulusSequence>,
    recorder: SampleRecorder,
    estimator: CalibrationEstimator,
    targets: Vec<Vec2>,
    /// Frozen once `Computing` has run.
    calibration: CalibrationTransform,
    phase: SessionPhase,
    deadline: Instant,
    probe: Option<SignalProbe>,
    probe_report: Option<ProbeReport>,
    sample_sum: Vec2,
    sample_count: usize,
    session_id: String,
    calibration_log: Option<PathBuf>,
    current_stimulus: Option<usize>,
    current_label: Option<String>,
    intro_shown: Option<usize>,
}

impl<E, H, S> SessionController<E, H, S>
where
    E: EyeGazeProvider,
    H: HeadPoseProvider,
    S: SceneRaycast,
{
    pub fn new(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        eye: E,
        head: H,
        resolver: HitResolver<S>,
        stimuli: Box<dyn StimulusSequence>,
    ) -> Self {
        let source = GazeSource::new(config.source.clone(), eye, head);
        let recorder = SampleRecorder::new(config.recorder.clone());
        let estimator = CalibrationEstimator::new(config.calibration.points);
        let now = clock.now();
        Self {
            config,
            clock,
            source,
            resolver,
            stimuli,
            recorder,
            estimator,
            targets: Vec::new(),
            calibration: CalibrationTransform::uncalibrated(),
            phase: SessionPhase::Idle,
            deadline: now,
            probe: None,
            probe_report: None,
            sample_sum: Vec2::ZERO,
            sample_count: 0,
            session_id: String::new(),
            calibration_log: None,
            current_stimulus: None,
            current_label: None,
            intro_shown: None,
        }
    }

    /// Leave `Idle` and start the signal check.
    pub fn start(&mut self) {
        if self.phase != SessionPhase::Idle {
            warn!("Session already started (phase {})", self.phase.as_str());
            return;
        }
        let stamp = self.clock.stamp();
        self.session_id = session_id(&stamp);
        self.calibration = CalibrationTransform::uncalibrated();
        let cal = &self.config.calibration;
        self.estimator = CalibrationEstimator::new(cal.points);
        self.targets = calibration_layout(cal.points, cal.random_margin, cal.seed);
        self.probe = Some(SignalProbe::new(self.config.probe.clone(), stamp.at));
        self.phase = SessionPhase::SignalCheck;
        info!("Session {} started", self.session_id);
    }

    /// Advance the session by one tick.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if matches!(self.phase, SessionPhase::Idle | SessionPhase::Done) {
            return events;
        }

        let stamp = self.clock.stamp();
        let sample = self.source.sample(stamp);

        match self.phase {
            SessionPhase::Idle | SessionPhase::Done => {}
            SessionPhase::SignalCheck => self.tick_signal_check(&sample, &mut events),
            SessionPhase::Calibrating { index, step } => {
                self.tick_calibration(index, step, &sample, &mut events)
            }
            SessionPhase::Computing => self.compute_calibration(stamp.at, &mut events),
            SessionPhase::Announcing => {
                if stamp.at >= self.deadline {
                    self.enter_recording(&mut events);
                }
            }
            SessionPhase::Recording => self.tick_recording(&sample, &mut events),
        }
        events
    }

    // ── Signal check ─────────────────────────────────────

    fn tick_signal_check(&mut self, sample: &GazeSample, events: &mut Vec<SessionEvent>) {
        if self.probe.is_none() {
            warn!("Signal check without a probe, skipping to recording");
            self.enter_recording(events);
            return;
        }
        let Some(report) = self.probe.as_mut().and_then(|p| p.observe(sample)) else {
            return;
        };
        self.probe = None;
        self.probe_report = Some(report);

        info!(
            "Signal check finished: {}/{} valid eye ticks, eye tracking working: {}",
            report.valid_eye_ticks, report.total_ticks, report.eye_tracking_working
        );
        events.push(SessionEvent::SignalCheckFinished(report));

        if !report.eye_tracking_working {
            warn!("Eye tracking not working, using head gaze for the rest of the session");
            self.source.force_head_gaze();
            events.push(SessionEvent::HeadGazeForced);
            self.enter_recording(events);
        } else if !self.config.calibration.enabled {
            info!("Calibration disabled");
            self.enter_recording(events);
        } else {
            self.begin_calibration(sample.timestamp.at, events);
        }
    }

    // ── Calibration ──────────────────────────────────────

    fn begin_calibration(&mut self, now: Instant, events: &mut Vec<SessionEvent>) {
        let points = self.targets.len();
        info!("Calibration started ({} points)", points);
        events.push(SessionEvent::CalibrationInstructions { points });
        if points == 0 {
            self.phase = SessionPhase::Computing;
            return;
        }
        self.phase = SessionPhase::Calibrating {
            index: 0,
            step: CalibrationStep::Instructing,
        };
        self.deadline = now + self.config.calibration.instructions;
    }

    fn tick_calibration(
        &mut self,
        index: usize,
        step: CalibrationStep,
        sample: &GazeSample,
        events: &mut Vec<SessionEvent>,
    ) {
        let now = sample.timestamp.at;
        match step {
            CalibrationStep::Instructing => {
                if now >= self.deadline {
                    self.show_target(0, now, events);
                }
            }
            CalibrationStep::Settling => {
                if now >= self.deadline {
                    self.phase = SessionPhase::Calibrating {
                        index,
                        step: CalibrationStep::Sampling,
                    };
                    self.deadline = now + self.config.calibration.sample;
                    self.sample_sum = Vec2::ZERO;
                    self.sample_count = 0;
                }
            }
            CalibrationStep::Sampling => {
                if now >= self.deadline {
                    self.finish_target(index, now, events);
                    return;
                }
                let hit = self.resolver.resolve(sample, &self.calibration);
                if sample.is_valid_eye() && hit.is_hit() {
                    self.sample_sum = self.sample_sum + hit.normalized_point;
                    self.sample_count += 1;
                }
            }
            CalibrationStep::Pausing => {
                if now >= self.deadline {
                    if index + 1 < self.targets.len() {
                        self.show_target(index + 1, now, events);
                    } else {
                        self.phase = SessionPhase::Computing;
                    }
                }
            }
        }
    }

    fn show_target(&mut self, index: usize, now: Instant, events: &mut Vec<SessionEvent>) {
        let position = self.targets[index];
        info!(
            "Calibration point {}/{} at ({:.2}, {:.2})",
            index + 1,
            self.targets.len(),
            position.x,
            position.y
        );
        self.phase = SessionPhase::Calibrating {
            index,
            step: CalibrationStep::Settling,
        };
        self.deadline = now + self.config.calibration.settle;
        events.push(SessionEvent::TargetShown { index, position });
    }

    fn finish_target(&mut self, index: usize, now: Instant, events: &mut Vec<SessionEvent>) {
        let cal = &self.config.calibration;
        let reference = self.targets[index];
        let count = self.sample_count;
        let synthetic = count < cal.min_valid_samples;

        let stored = if synthetic {
            self.estimator
                .add_synthetic_pair(index, reference, cal.synthetic_offset, count)
        } else {
            let observed = self.sample_sum * (1.0 / count as f32);
            self.estimator.add_pair(index, reference, observed, count)
        };
        if let Err(e) = stored {
            warn!("Calibration point {} discarded: {}", index + 1, e);
        }

        events.push(SessionEvent::TargetHidden {
            index,
            valid_samples: count,
            synthetic,
        });
        self.phase = SessionPhase::Calibrating {
            index,
            step: CalibrationStep::Pausing,
        };
        self.deadline = now + self.config.calibration.pause;
    }

    fn compute_calibration(&mut self, now: Instant, events: &mut Vec<SessionEvent>) {
        match self.estimator.compute() {
            Ok(transform) => {
                self.calibration = transform;
                events.push(SessionEvent::CalibrationComputed(transform));
            }
            Err(e) => {
                warn!("Calibration not applied, continuing uncalibrated: {}", e);
                events.push(SessionEvent::CalibrationFailed(e));
            }
        }

        // Logged either way so the observed points survive a failed fit.
        match write_calibration_log(
            &self.config.recorder.output_dir,
            &self.session_id,
            self.clock.stamp().local(),
            self.estimator.pairs(),
            &self.calibration,
        ) {
            Ok(path) => self.calibration_log = Some(path),
            Err(e) => warn!("Failed to write calibration log: {}", e),
        }

        self.phase = SessionPhase::Announcing;
        self.deadline = now + self.config.calibration.completion;
        events.push(SessionEvent::CompletionShown);
    }

    // ── Recording ────────────────────────────────────────

    fn enter_recording(&mut self, events: &mut Vec<SessionEvent>) {
        info!(
            "Recording started ({} stimuli, calibrated: {})",
            self.stimuli.len(),
            self.calibration.calibrated
        );
        self.phase = SessionPhase::Recording;
        events.push(SessionEvent::RecordingStarted);
    }

    fn tick_recording(&mut self, sample: &GazeSample, events: &mut Vec<SessionEvent>) {
        match self.stimuli.poll(sample.timestamp.at) {
            StimulusStatus::Showing(index) => {
                if self.current_stimulus != Some(index) {
                    self.open_stimulus(index, events);
                }
                let hit = self.resolver.resolve(sample, &self.calibration);
                if let RecordOutcome::Checkpoint(stats) =
                    self.recorder.record(sample, &hit, &self.calibration)
                {
                    events.push(SessionEvent::Checkpoint(stats));
                }
            }
            StimulusStatus::Intro(index) => {
                self.close_stimulus(events);
                if self.intro_shown != Some(index) {
                    self.intro_shown = Some(index);
                    info!("Stimulus {} intro", index + 1);
                    events.push(SessionEvent::StimulusIntro { index });
                }
            }
            StimulusStatus::Tail => self.close_stimulus(events),
            StimulusStatus::Finished => {
                self.close_stimulus(events);
                self.phase = SessionPhase::Done;
                let report = self.report();
                info!(
                    "Session {} done: {} rows written, {} dropped, {} files",
                    report.session_id, report.rows_written, report.rows_dropped, report.files_opened
                );
                events.push(SessionEvent::Finished);
            }
        }
    }

    fn open_stimulus(&mut self, index: usize, events: &mut Vec<SessionEvent>) {
        self.close_stimulus(events);
        let label = self.stimuli.label(index).to_string();
        let path = match self
            .recorder
            .begin_stimulus(&label, &self.session_id, &self.calibration)
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to open session log for '{}': {}", label, e);
                None
            }
        };
        self.current_stimulus = Some(index);
        self.current_label = Some(label.clone());
        events.push(SessionEvent::StimulusOpened { index, label, path });
    }

    fn close_stimulus(&mut self, events: &mut Vec<SessionEvent>) {
        if self.current_stimulus.take().is_none() {
            return;
        }
        let label = self.current_label.take().unwrap_or_default();
        if let Some(stats) = self.recorder.finish_stimulus() {
            events.push(SessionEvent::StimulusClosed { label, stats });
        }
    }

    // ── Accessors ────────────────────────────────────────

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == SessionPhase::Done
    }

    /// The session's calibration snapshot (identity until computed).
    pub fn calibration(&self) -> &CalibrationTransform {
        &self.calibration
    }

    pub fn estimator(&self) -> &CalibrationEstimator {
        &self.estimator
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Label of the stimulus currently being recorded.
    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    pub fn source(&self) -> &GazeSource<E, H> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut GazeSource<E, H> {
        &mut self.source
    }

    pub fn recorder(&self) -> &SampleRecorder {
        &self.recorder
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            eye_tracking_working: self
                .probe_report
                .is_some_and(|r| r.eye_tracking_working),
            probe: self.probe_report,
            calibration: self.calibration,
            synthetic_points: self.estimator.synthetic_count(),
            calibration_log: self.calibration_log.clone(),
            rows_written: self.recorder.rows_written(),
            rows_dropped: self.recorder.rows_dropped(),
            files_opened: self.recorder.files_opened(),
            rejected_eye_readings: self.source.rejected_count(),
            provider_faults: self.source.fault_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::gaze::calibration::CalibrationPointPair;
    use crate::gaze::math::Vec3;
    use crate::gaze::provider::{
        default_head_pose, EyeReading, FixedHeadPose, ScriptedEyeProvider,
        UnavailableEyeProvider,
    };
    use crate::gaze::scene::{DisplaySurface, Scene};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Run a calibrating session where target `i` receives exactly
    /// `valid_per_target[i]` valid eye samples that land on the display.
    fn run_calibration(
        dir: &std::path::Path,
        valid_per_target: &[usize],
    ) -> (
        SessionController<ScriptedEyeProvider, FixedHeadPose, Scene>,
        Vec<SessionEvent>,
    ) {
        let clock = Arc::new(TestClock::new());
        let config = SessionConfig {
            probe: ProbeConfig {
                duration: ms(100),
                min_valid_eye_ticks: 5,
            },
            calibration: CalibrationConfig {
                points: valid_per_target.len(),
                instructions: ms(10),
                settle: ms(10),
                sample: ms(150),
                pause: ms(10),
                completion: ms(10),
                seed: Some(11),
                ..Default::default()
            },
            recorder: RecorderConfig {
                output_dir: dir.to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let stimuli = TimedStimulusSequence::new(vec!["img".into()], ms(10), ms(50), ms(10));
        let mut session = SessionController::new(
            config,
            clock.clone(),
            ScriptedEyeProvider::new(Vec::new()),
            FixedHeadPose::new(default_head_pose()),
            HitResolver::new(Scene::new(), DisplaySurface::default()),
            Box::new(stimuli),
        );

        let head = default_head_pose().position;
        let looking = EyeReading::new(head, Vec3::new(0.0, 0.0, -1.0));
        let closed = EyeReading::new(head, Vec3::ZERO);
        let mut fed = vec![0usize; valid_per_target.len()];

        session.start();
        let mut events = Vec::new();
        for _ in 0..1000 {
            let reading = match session.phase() {
                SessionPhase::SignalCheck => looking,
                SessionPhase::Calibrating {
                    index,
                    step: CalibrationStep::Sampling,
                } if fed[index] < valid_per_target[index] => {
                    fed[index] += 1;
                    looking
                }
                _ => closed,
            };
            session.source_mut().eye_provider_mut().push(Ok(reading));
            events.extend(session.tick());
            if session.is_done() {
                break;
            }
            clock.advance(ms(10));
        }
        assert!(session.is_done());
        (session, events)
    }

    fn hidden(events: &[SessionEvent]) -> Vec<(usize, usize, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::TargetHidden {
                    index,
                    valid_samples,
                    synthetic,
                } => Some((*index, *valid_samples, *synthetic)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_timed_sequence_phases() {
        let clock = TestClock::new();
        let mut seq = TimedStimulusSequence::new(
            vec!["a".into(), "b".into()],
            ms(100),
            ms(300),
            ms(50),
        );
        let t0 = clock.now();
        assert_eq!(seq.poll(t0), StimulusStatus::Intro(0));
        assert_eq!(seq.poll(t0 + ms(100)), StimulusStatus::Showing(0));
        assert_eq!(seq.poll(t0 + ms(399)), StimulusStatus::Showing(0));
        assert_eq!(seq.poll(t0 + ms(400)), StimulusStatus::Intro(1));
        assert_eq!(seq.poll(t0 + ms(650)), StimulusStatus::Showing(1));
        assert_eq!(seq.poll(t0 + ms(820)), StimulusStatus::Tail);
        assert_eq!(seq.poll(t0 + ms(850)), StimulusStatus::Finished);
        assert_eq!(seq.label(1), "b");
        assert_eq!(seq.label(7), "");
    }

    #[test]
    fn test_default_timing_sequence() {
        let clock = TestClock::new();
        let mut seq = TimedStimulusSequence::with_default_timing(vec!["only".into()]);
        let t0 = clock.now();
        assert_eq!(seq.poll(t0), StimulusStatus::Intro(0));
        assert_eq!(seq.poll(t0 + ms(5_000)), StimulusStatus::Showing(0));
        assert_eq!(seq.poll(t0 + ms(29_999)), StimulusStatus::Showing(0));
        assert_eq!(seq.poll(t0 + ms(30_000)), StimulusStatus::Tail);
        assert_eq!(seq.poll(t0 + ms(32_000)), StimulusStatus::Finished);
    }

    #[test]
    fn test_empty_sequence_finishes_after_tail() {
        let clock = TestClock::new();
        let mut seq = TimedStimulusSequence::new(Vec::new(), ms(100), ms(100), ms(20));
        let t0 = clock.now();
        assert!(seq.is_empty());
        assert_eq!(seq.poll(t0), StimulusStatus::Tail);
        assert_eq!(seq.poll(t0 + ms(20)), StimulusStatus::Finished);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(SessionPhase::SignalCheck.as_str(), "signal-check");
        let cal = SessionPhase::Calibrating {
            index: 2,
            step: CalibrationStep::Sampling,
        };
        assert_eq!(cal.as_str(), "calibrating");
    }

    #[test]
    fn test_no_eye_tracker_skips_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(TestClock::new());
        let config = SessionConfig {
            recorder: RecorderConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let stimuli = TimedStimulusSequence::new(vec!["img".into()], ms(100), ms(500), ms(100));
        let mut session = SessionController::new(
            config,
            clock.clone(),
            UnavailableEyeProvider,
            FixedHeadPose::new(default_head_pose()),
            HitResolver::new(Scene::new(), DisplaySurface::default()),
            Box::new(stimuli),
        );

        assert!(session.tick().is_empty());
        session.start();
        assert_eq!(session.phase(), SessionPhase::SignalCheck);

        let mut events = Vec::new();
        for _ in 0..2000 {
            let tick = session.tick();
            if tick
                .iter()
                .any(|e| matches!(e, SessionEvent::StimulusOpened { .. }))
            {
                assert_eq!(session.current_label(), Some("img"));
            }
            events.extend(tick);
            if session.is_done() {
                break;
            }
            clock.advance(ms(10));
        }
        assert_eq!(session.current_label(), None);

        assert!(session.is_done());
        assert!(events.contains(&SessionEvent::HeadGazeForced));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::TargetShown { .. })));
        assert!(session.source().is_head_forced());
        assert!(!session.calibration().calibrated);

        let report = session.report();
        assert!(!report.eye_tracking_working);
        assert_eq!(report.files_opened, 1);
        // 500 ms of display at one row per 10 ms tick.
        assert_eq!(report.rows_written, 50);
    }

    #[test]
    fn test_min_valid_samples_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let (session, events) = run_calibration(dir.path(), &[10, 9, 12]);

        assert_eq!(
            hidden(&events),
            vec![(0, 10, false), (1, 9, true), (2, 12, false)]
        );
        let pairs: Vec<&CalibrationPointPair> = session.estimator().pairs().collect();
        assert_eq!(pairs.len(), 3);
        assert!(!pairs[0].synthetic);
        assert!(pairs[1].synthetic);
        let offset = pairs[1].observed - pairs[1].reference;
        assert!((offset.x - 0.05).abs() < 1e-6 && (offset.y - 0.05).abs() < 1e-6);
        assert_eq!(session.estimator().synthetic_count(), 1);
        assert_eq!(session.report().synthetic_points, 1);
        assert!(session.calibration().calibrated);
    }

    #[test]
    fn test_failed_fit_still_logs_observed_points() {
        let dir = tempfile::tempdir().unwrap();
        let (session, events) = run_calibration(dir.path(), &[12, 12]);

        assert!(events.contains(&SessionEvent::CalibrationFailed(
            CalibrationError::NotEnoughPoints(2)
        )));
        assert!(!session.calibration().calibrated);

        let path = session.report().calibration_log.unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[4].ends_with(",12,False"), "{}", lines[4]);
        assert!(lines[5].ends_with(",12,False"), "{}", lines[5]);
        assert_eq!(lines[6], "");
        assert_eq!(lines[8], "OffsetX,0.000000");
        assert_eq!(lines[10], "ScaleX,1.000000");
    }
}

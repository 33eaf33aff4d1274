//! Per-stimulus CSV session logs written at a fixed wall-clock cadence.
//!
//! One file per (stimulus, session). The file starts with a `SessionID,<id>`
//! line and a schema header; calibration columns are part of the schema only
//! when calibration had completed before the file was opened. Rows are
//! flushed as they are written; a row that fails to write is dropped and
//! recording carries on with the next tick.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::gaze::calibration::CalibrationTransform;
use crate::gaze::hit::HitResult;
use crate::gaze::source::{GazeSample, SourceKind};

/// Base schema, in column order.
pub const BASE_COLUMNS: [&str; 20] = [
    "Timestamp",
    "ImageName",
    "EyeOriginX",
    "EyeOriginY",
    "EyeOriginZ",
    "GazeDirectionX",
    "GazeDirectionY",
    "GazeDirectionZ",
    "IsHitting",
    "HitPositionX",
    "HitPositionY",
    "HitPositionZ",
    "IsEyeGazeValid",
    "IsUsingHeadGaze",
    "HeadPositionX",
    "HeadPositionY",
    "HeadPositionZ",
    "HeadRotationX",
    "HeadRotationY",
    "HeadRotationZ",
];

/// Appended when the file was opened after calibration completed.
pub const CALIBRATION_COLUMNS: [&str; 5] = [
    "CalibrationOffsetX",
    "CalibrationOffsetY",
    "CalibrationScaleX",
    "CalibrationScaleY",
    "CalibrationRotation",
];

/// Row timestamp format (local time, millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("session log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("session log CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no session log file is open")]
    NoOpenFile,
}

// ── Configuration ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory the session logs are written into.
    pub output_dir: PathBuf,
    /// Minimum wall-clock time between rows.
    pub interval: Duration,
    /// Log running statistics every N rows of a stimulus file.
    pub checkpoint_every: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("gaze_data"),
            interval: Duration::from_millis(1),
            checkpoint_every: 100,
        }
    }
}

// ── Cadence ─────────────────────────────────────────────────

/// Fixed-interval row scheduler. At most one row per call to `due`.
#[derive(Debug, Clone)]
pub struct RecordCadence {
    interval: Duration,
    next_due: Option<Instant>,
}

impl RecordCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Whether a row is due at `now`. Advances the schedule when it is.
    /// A late tick moves the schedule forward instead of bursting.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(next) if now < next => false,
            Some(next) => {
                let following = next + self.interval;
                self.next_due = Some(if following <= now {
                    now + self.interval
                } else {
                    following
                });
                true
            }
            None => {
                self.next_due = Some(now + self.interval);
                true
            }
        }
    }

    /// Forget the schedule; the next call to `due` fires immediately.
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

// ── Statistics ──────────────────────────────────────────────

/// Counters for the current stimulus file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStats {
    pub total: u64,
    pub valid_eye: u64,
    pub hits: u64,
}

impl RecordingStats {
    pub fn valid_percent(&self) -> f32 {
        percent(self.valid_eye, self.total)
    }

    pub fn hit_percent(&self) -> f32 {
        percent(self.hits, self.total)
    }
}

fn percent(part: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 * 100.0 / total as f32
    }
}

/// What happened to one `record` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Written,
    /// Written, and the row count hit a checkpoint.
    Checkpoint(RecordingStats),
    /// Not due yet.
    Skipped,
    /// Due, but the row could not be written.
    Dropped,
}

// ── Recorder ────────────────────────────────────────────────

struct OpenLog {
    label: String,
    path: PathBuf,
    writer: csv::Writer<File>,
    calibration_columns: bool,
}

/// Owns the session log file handle for the current stimulus.
pub struct SampleRecorder {
    pub config: RecorderConfig,
    cadence: RecordCadence,
    current: Option<OpenLog>,
    stats: RecordingStats,
    rows_written: u64,
    rows_dropped: u64,
    files_opened: u32,
}

impl SampleRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        let cadence = RecordCadence::new(config.interval);
        Self {
            config,
            cadence,
            current: None,
            stats: RecordingStats::default(),
            rows_written: 0,
            rows_dropped: 0,
            files_opened: 0,
        }
    }

    /// Close any open file and open a new one for `label`.
    pub fn begin_stimulus(
        &mut self,
        label: &str,
        session_id: &str,
        transform: &CalibrationTransform,
    ) -> Result<PathBuf, RecordError> {
        self.finish_stimulus();
        self.stats = RecordingStats::default();
        self.cadence.reset();

        fs::create_dir_all(&self.config.output_dir)?;
        let stem = format!("{}_Session_{}", sanitize_label(label), session_id);
        let (path, file) = create_unique(&self.config.output_dir, &stem)?;

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(["SessionID", session_id])?;
        let calibration_columns = transform.calibrated;
        if calibration_columns {
            writer.write_record(BASE_COLUMNS.iter().chain(CALIBRATION_COLUMNS.iter()))?;
        } else {
            writer.write_record(BASE_COLUMNS)?;
        }
        writer.flush()?;

        info!(
            "Session log opened for '{}': {} (calibration columns: {})",
            label,
            path.display(),
            calibration_columns
        );
        self.files_opened += 1;
        self.current = Some(OpenLog {
            label: label.to_string(),
            path: path.clone(),
            writer,
            calibration_columns,
        });
        Ok(path)
    }

    /// Close the current stimulus file, returning its statistics.
    pub fn finish_stimulus(&mut self) -> Option<RecordingStats> {
        let mut log = self.current.take()?;
        if let Err(e) = log.writer.flush() {
            error!("Failed to flush session log {}: {}", log.path.display(), e);
        }
        info!(
            "Stimulus '{}' finished: {} rows, valid {:.1}%, hits {:.1}%",
            log.label,
            self.stats.total,
            self.stats.valid_percent(),
            self.stats.hit_percent()
        );
        Some(self.stats)
    }

    /// Record one fused sample if a row is due. Never fails: write errors
    /// are logged and the row is dropped.
    pub fn record(
        &mut self,
        sample: &GazeSample,
        hit: &HitResult,
        transform: &CalibrationTransform,
    ) -> RecordOutcome {
        if !self.cadence.due(sample.timestamp.at) {
            return RecordOutcome::Skipped;
        }
        match self.write_row(sample, hit, transform) {
            Ok(()) => {}
            Err(RecordError::NoOpenFile) => {
                self.rows_dropped += 1;
                debug!("No session log open, row dropped");
                return RecordOutcome::Dropped;
            }
            Err(e) => {
                self.rows_dropped += 1;
                error!("Failed to write session log row: {}", e);
                return RecordOutcome::Dropped;
            }
        }

        self.rows_written += 1;
        self.stats.total += 1;
        if sample.valid {
            self.stats.valid_eye += 1;
        }
        if hit.is_hit() {
            self.stats.hits += 1;
        }

        let every = self.config.checkpoint_every;
        if every > 0 && self.stats.total % every == 0 {
            info!(
                "Recorded {} rows. Valid: {:.1}%, Hits: {:.1}%",
                self.stats.total,
                self.stats.valid_percent(),
                self.stats.hit_percent()
            );
            return RecordOutcome::Checkpoint(self.stats);
        }
        RecordOutcome::Written
    }

    fn write_row(
        &mut self,
        sample: &GazeSample,
        hit: &HitResult,
        transform: &CalibrationTransform,
    ) -> Result<(), RecordError> {
        let log = self.current.as_mut().ok_or(RecordError::NoOpenFile)?;

        let head_rotation = sample.head.rotation.euler_degrees();
        let mut row = Vec::with_capacity(BASE_COLUMNS.len() + CALIBRATION_COLUMNS.len());
        row.push(sample.timestamp.local().format(TIMESTAMP_FORMAT).to_string());
        row.push(log.label.clone());
        for v in [
            sample.origin.x,
            sample.origin.y,
            sample.origin.z,
            sample.direction.x,
            sample.direction.y,
            sample.direction.z,
        ] {
            row.push(f6(v));
        }
        row.push(flag(hit.is_hit()));
        for v in [hit.world_point.x, hit.world_point.y, hit.world_point.z] {
            row.push(f6(v));
        }
        row.push(flag(sample.valid));
        row.push(flag(sample.source == SourceKind::Head));
        for v in [
            sample.head.position.x,
            sample.head.position.y,
            sample.head.position.z,
            head_rotation.x,
            head_rotation.y,
            head_rotation.z,
        ] {
            row.push(f6(v));
        }
        if log.calibration_columns {
            row.extend(transform.parameters().into_iter().map(f6));
        }

        log.writer.write_record(&row)?;
        log.writer.flush()?;
        Ok(())
    }

    /// Label of the open stimulus file.
    pub fn current_label(&self) -> Option<&str> {
        self.current.as_ref().map(|l| l.label.as_str())
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|l| l.path.as_path())
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Statistics of the current (or last) stimulus file.
    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }

    pub fn files_opened(&self) -> u32 {
        self.files_opened
    }
}

/// Six-decimal float, as every numeric log column is written.
pub(crate) fn f6(v: f32) -> String {
    format!("{:.6}", v)
}

fn flag(b: bool) -> String {
    if b { "True" } else { "False" }.to_string()
}

/// Keep stimulus labels usable as file-name components.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "stimulus".to_string()
    } else {
        cleaned
    }
}

/// Create `<stem>.csv` in `dir`, appending `_<n>` when the name is taken.
pub(crate) fn create_unique(dir: &Path, stem: &str) -> io::Result<(PathBuf, File)> {
    let mut n = 0u32;
    loop {
        let name = if n == 0 {
            format!("{}.csv", stem)
        } else {
            format!("{}_{}.csv", stem, n)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

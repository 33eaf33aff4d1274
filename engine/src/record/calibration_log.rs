//! The per-session calibration CSV: reference/observed pairs and the final
//! five correction parameters.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use super::recorder::{create_unique, f6, RecordError};
use crate::gaze::calibration::{CalibrationPointPair, CalibrationTransform};

pub const PAIR_COLUMNS: [&str; 7] = [
    "PointIndex",
    "RefX",
    "RefY",
    "GazeX",
    "GazeY",
    "ValidSamples",
    "Synthetic",
];

/// Write `Calibration_Session_<id>.csv` into `dir`.
///
/// Layout: `SessionID`, `CalibrationTime`, blank line, one row per point,
/// blank line, `CalibrationParameters` block.
pub fn write_calibration_log<'a>(
    dir: &Path,
    session_id: &str,
    calibrated_at: DateTime<Local>,
    pairs: impl IntoIterator<Item = &'a CalibrationPointPair>,
    transform: &CalibrationTransform,
) -> Result<PathBuf, RecordError> {
    std::fs::create_dir_all(dir)?;
    let (path, mut file) = create_unique(dir, &format!("Calibration_Session_{}", session_id))?;

    let mut header = block_writer(&mut file);
    header.write_record(["SessionID", session_id])?;
    header.write_record([
        "CalibrationTime".to_string(),
        calibrated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ])?;
    header.flush()?;
    drop(header);
    // The csv writer refuses empty records.
    writeln!(file)?;

    let mut points = 0usize;
    let mut table = block_writer(&mut file);
    table.write_record(PAIR_COLUMNS)?;
    for (i, pair) in pairs.into_iter().enumerate() {
        table.write_record([
            i.to_string(),
            f6(pair.reference.x),
            f6(pair.reference.y),
            f6(pair.observed.x),
            f6(pair.observed.y),
            pair.samples.to_string(),
            if pair.synthetic { "True" } else { "False" }.to_string(),
        ])?;
        points += 1;
    }
    table.flush()?;
    drop(table);
    writeln!(file)?;

    let mut params = block_writer(&mut file);
    params.write_record(["CalibrationParameters"])?;
    let names = ["OffsetX", "OffsetY", "ScaleX", "ScaleY", "Rotation"];
    for (name, value) in names.iter().zip(transform.parameters()) {
        params.write_record([name.to_string(), f6(value)])?;
    }
    params.flush()?;

    info!(
        "Calibration log written: {} ({} points)",
        path.display(),
        points
    );
    Ok(path)
}

fn block_writer(file: &mut File) -> csv::Writer<&mut File> {
    csv::WriterBuilder::new().flexible(true).from_writer(file)
}

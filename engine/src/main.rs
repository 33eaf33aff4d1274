//! gazetrack-engine: gaze acquisition, calibration and recording engine.
//!
//! Runs a complete experiment session against the headless host.

use std::path::PathBuf;
use std::time::Duration;

use gazetrack_engine::backend::{self, HeadlessConfig};
use gazetrack_engine::gaze::math::Vec3;
use gazetrack_engine::gaze::provider::SimulatedEyeConfig;

use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gazetrack-engine", about = "Gaze-tracking experiment engine")]
struct Cli {
    /// Backend to use: realtime or offline
    #[arg(long, default_value = "realtime")]
    backend: String,

    /// Directory for session logs
    #[arg(long, default_value = "gaze_data")]
    output_dir: PathBuf,

    /// Stimulus label (repeat for several; default Image1..Image3)
    #[arg(long = "stimulus")]
    stimuli: Vec<String>,

    /// Intro text duration before each stimulus, in seconds
    #[arg(long, default_value = "5")]
    intro_secs: f64,

    /// Display duration per stimulus, in seconds
    #[arg(long, default_value = "25")]
    display_secs: f64,

    /// Wait after the last stimulus, in seconds
    #[arg(long, default_value = "2")]
    tail_secs: f64,

    /// Number of calibration targets (5 and 9 use fixed layouts)
    #[arg(long, default_value = "9")]
    calibration_points: usize,

    /// Skip calibration
    #[arg(long)]
    no_calibration: bool,

    /// Never use the eye tracker; record head gaze only
    #[arg(long)]
    force_head_gaze: bool,

    /// Host tick rate in Hz
    #[arg(long, default_value = "90")]
    tick_hz: u32,

    /// Minimum interval between log rows, in milliseconds
    #[arg(long, default_value = "1")]
    record_interval_ms: u64,

    /// RNG seed for random calibration layouts and the simulated tracker
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated eye tracker horizontal bias (meters)
    #[arg(long, default_value = "0.04", allow_hyphen_values = true)]
    eye_bias_x: f32,

    /// Simulated eye tracker vertical bias (meters)
    #[arg(long, default_value = "-0.03", allow_hyphen_values = true)]
    eye_bias_y: f32,

    /// Simulated eye tracker noise half-width (meters)
    #[arg(long, default_value = "0.01")]
    eye_noise: f32,

    /// Simulated eye tracker dropout probability
    #[arg(long, default_value = "0.05")]
    eye_dropout: f64,

    /// Run without an eye tracker
    #[arg(long)]
    no_eye_tracker: bool,

    /// Exit after N seconds of session time
    #[arg(long)]
    exit_after: Option<u64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn secs(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow::anyhow!("invalid --{} '{}': {}", flag, value, e))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gazetrack-engine {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gazetrack_engine=info".into()),
        )
        .init();

    info!("gazetrack-engine v{} starting", env!("CARGO_PKG_VERSION"));
    info!("backend: {}", cli.backend);

    let backend_type = backend::BackendType::from_str(&cli.backend).ok_or_else(|| {
        anyhow::anyhow!("unknown backend '{}' (expected realtime or offline)", cli.backend)
    })?;
    if !(0.0..=1.0).contains(&cli.eye_dropout) {
        anyhow::bail!("--eye-dropout must be within [0, 1], got {}", cli.eye_dropout);
    }

    let mut config = HeadlessConfig {
        intro: secs(cli.intro_secs, "intro-secs")?,
        display: secs(cli.display_secs, "display-secs")?,
        tail: secs(cli.tail_secs, "tail-secs")?,
        tick_rate_hz: cli.tick_hz,
        exit_after: cli.exit_after.map(Duration::from_secs),
        ..Default::default()
    };
    if !cli.stimuli.is_empty() {
        config.stimuli = cli.stimuli;
    }
    config.eye = (!cli.no_eye_tracker).then_some(SimulatedEyeConfig {
        bias: Vec3::new(cli.eye_bias_x, cli.eye_bias_y, 0.0),
        noise: cli.eye_noise,
        dropout: cli.eye_dropout,
        seed: cli.seed,
    });

    let session = &mut config.session;
    session.source.force_head_gaze = cli.force_head_gaze;
    session.calibration.enabled = !cli.no_calibration;
    session.calibration.points = cli.calibration_points;
    session.calibration.seed = cli.seed;
    session.recorder.output_dir = cli.output_dir;
    session.recorder.interval = Duration::from_millis(cli.record_interval_ms);

    let report = backend::run(backend_type, config)?;

    info!(
        "Session {} complete: eye tracking working: {}, calibrated: {}, synthetic points: {}",
        report.session_id,
        report.eye_tracking_working,
        report.calibration.calibrated,
        report.synthetic_points
    );
    info!(
        "{} rows written, {} dropped, {} files",
        report.rows_written, report.rows_dropped, report.files_opened
    );
    Ok(())
}

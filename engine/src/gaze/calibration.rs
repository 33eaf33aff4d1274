//! Per-session gaze calibration: a per-axis scale + offset matched on
//! centroid and mean absolute deviation of N reference/observed pairs.
//!
//! Not a least-squares affine fit: only first moments and a robust spread
//! statistic are matched, and the result is hard-clamped per axis.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{info, warn};

use super::math::Vec2;

/// Hard bounds on the correction.
pub const SCALE_MIN: f32 = 0.7;
pub const SCALE_MAX: f32 = 1.4;
pub const OFFSET_LIMIT: f32 = 0.3;
/// Floor applied to observed dispersion before dividing.
pub const MIN_DISPERSION: f32 = 0.005;
/// Minimum number of pairs `compute` needs.
pub const MIN_PAIRS: usize = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("need at least 3 calibration pairs, got {0}")]
    NotEnoughPoints(usize),
    #[error("calibration slot {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
    #[error("calibration pair {0} has a non-finite coordinate")]
    NonFinitePoint(usize),
    #[error("calibration fit is not finite on the {0} axis")]
    NonFiniteFit(&'static str),
}

// ── Transform ───────────────────────────────────────────────

/// Per-axis correction from observed to true normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Not estimated; always 0.
    pub rotation: f32,
    pub calibrated: bool,
}

impl Default for CalibrationTransform {
    fn default() -> Self {
        Self::uncalibrated()
    }
}

impl CalibrationTransform {
    /// Identity-like defaults used before calibration completes.
    pub const fn uncalibrated() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            calibrated: false,
        }
    }

    /// Correct an observed normalized point. Identity when uncalibrated.
    pub fn apply(&self, observed: Vec2) -> Vec2 {
        if !self.calibrated {
            return observed;
        }
        Vec2::new(
            observed.x * self.scale_x + self.offset_x,
            observed.y * self.scale_y + self.offset_y,
        )
    }

    /// Within 0.01 of identity on every parameter.
    pub fn is_neutral(&self) -> bool {
        self.offset_x.abs() < 0.01
            && self.offset_y.abs() < 0.01
            && (self.scale_x - 1.0).abs() < 0.01
            && (self.scale_y - 1.0).abs() < 0.01
    }

    /// The five logged parameters in column order.
    pub fn parameters(&self) -> [f32; 5] {
        [
            self.offset_x,
            self.offset_y,
            self.scale_x,
            self.scale_y,
            self.rotation,
        ]
    }
}

// ── Point pairs ─────────────────────────────────────────────

/// One calibration target and where the participant was seen looking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPointPair {
    /// Target position in [0,1]x[0,1].
    pub reference: Vec2,
    /// Mean observed gaze position.
    pub observed: Vec2,
    /// How many valid samples went into `observed`.
    pub samples: usize,
    /// True when `observed` is the synthetic fallback, not a measurement.
    pub synthetic: bool,
}

// ── Estimator ───────────────────────────────────────────────

/// Fixed-size set of calibration pairs for one session.
#[derive(Debug, Clone)]
pub struct CalibrationEstimator {
    pairs: Vec<Option<CalibrationPointPair>>,
    synthetic: usize,
}

impl CalibrationEstimator {
    /// Create an estimator with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: vec![None; capacity],
            synthetic: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pairs.len()
    }

    /// Number of filled slots.
    pub fn filled(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_some()).count()
    }

    /// How many pairs were filled with synthetic observations.
    pub fn synthetic_count(&self) -> usize {
        self.synthetic
    }

    /// Filled pairs in slot order.
    pub fn pairs(&self) -> impl Iterator<Item = &CalibrationPointPair> {
        self.pairs.iter().flatten()
    }

    /// Fill slot `index` with a measured pair.
    pub fn add_pair(
        &mut self,
        index: usize,
        reference: Vec2,
        observed: Vec2,
        samples: usize,
    ) -> Result<(), CalibrationError> {
        self.store(
            index,
            CalibrationPointPair {
                reference,
                observed,
                samples,
                synthetic: false,
            },
        )
    }

    /// Fill slot `index` with the degraded fallback `reference + offset`.
    ///
    /// This is a known-lossy heuristic for targets where too few valid eye
    /// samples arrived; it is counted so callers can tell it happened.
    pub fn add_synthetic_pair(
        &mut self,
        index: usize,
        reference: Vec2,
        offset: Vec2,
        samples: usize,
    ) -> Result<(), CalibrationError> {
        self.store(
            index,
            CalibrationPointPair {
                reference,
                observed: reference + offset,
                samples,
                synthetic: true,
            },
        )?;
        self.synthetic += 1;
        warn!(
            "Calibration point {}: only {} valid samples, using synthetic observation",
            index + 1,
            samples
        );
        Ok(())
    }

    fn store(&mut self, index: usize, pair: CalibrationPointPair) -> Result<(), CalibrationError> {
        let capacity = self.pairs.len();
        let slot = self
            .pairs
            .get_mut(index)
            .ok_or(CalibrationError::IndexOutOfRange { index, capacity })?;
        if !pair.reference.is_finite() || !pair.observed.is_finite() {
            return Err(CalibrationError::NonFinitePoint(index));
        }
        if let Some(old) = slot.replace(pair) {
            if old.synthetic {
                self.synthetic -= 1;
            }
        }
        Ok(())
    }

    /// Derive the correction from the filled pairs.
    pub fn compute(&self) -> Result<CalibrationTransform, CalibrationError> {
        let pairs: Vec<&CalibrationPointPair> = self.pairs().collect();
        let n = pairs.len();
        if n < MIN_PAIRS {
            return Err(CalibrationError::NotEnoughPoints(n));
        }
        if n < self.capacity() {
            warn!(
                "Computing calibration from {} of {} points",
                n,
                self.capacity()
            );
        }

        let axis = |pick: fn(Vec2) -> f32| -> Vec<(f64, f64)> {
            pairs
                .iter()
                .map(|p| (pick(p.reference) as f64, pick(p.observed) as f64))
                .collect()
        };
        let (scale_x, offset_x) =
            fit_axis(&axis(|v| v.x)).ok_or(CalibrationError::NonFiniteFit("x"))?;
        let (scale_y, offset_y) =
            fit_axis(&axis(|v| v.y)).ok_or(CalibrationError::NonFiniteFit("y"))?;

        let offset_limit = OFFSET_LIMIT as f64;
        let (scale_min, scale_max) = (SCALE_MIN as f64, SCALE_MAX as f64);
        let transform = CalibrationTransform {
            offset_x: offset_x.clamp(-offset_limit, offset_limit) as f32,
            offset_y: offset_y.clamp(-offset_limit, offset_limit) as f32,
            scale_x: scale_x.clamp(scale_min, scale_max) as f32,
            scale_y: scale_y.clamp(scale_min, scale_max) as f32,
            rotation: 0.0,
            calibrated: true,
        };

        info!(
            "Calibration computed: offsetX={:.3}, offsetY={:.3}, scaleX={:.3}, scaleY={:.3}, rotation={:.3} ({} points, {} synthetic)",
            transform.offset_x,
            transform.offset_y,
            transform.scale_x,
            transform.scale_y,
            transform.rotation,
            n,
            self.synthetic
        );
        if transform.is_neutral() {
            info!("Calibration correction is neutral");
        }
        Ok(transform)
    }
}

/// Scale and offset for one axis from `(reference, observed)` values.
///
/// Accumulates in f64 so that extreme but finite observations cannot
/// overflow; `None` if anything still ends up non-finite.
fn fit_axis(values: &[(f64, f64)]) -> Option<(f64, f64)> {
    let inv_n = 1.0 / values.len() as f64;
    let ref_c = values.iter().map(|v| v.0).sum::<f64>() * inv_n;
    let obs_c = values.iter().map(|v| v.1).sum::<f64>() * inv_n;
    let ref_d = values.iter().map(|v| (v.0 - ref_c).abs()).sum::<f64>() * inv_n;
    let obs_d = values.iter().map(|v| (v.1 - obs_c).abs()).sum::<f64>() * inv_n;
    if !(ref_c.is_finite() && obs_c.is_finite() && ref_d.is_finite() && obs_d.is_finite()) {
        return None;
    }

    let scale = ref_d / obs_d.max(MIN_DISPERSION as f64);
    let offset = ref_c - obs_c * scale;
    (scale.is_finite() && offset.is_finite()).then_some((scale, offset))
}

// ── Target layouts ──────────────────────────────────────────

/// Normalized target positions for `n` calibration points.
///
/// 9 points: 3x3 grid over {0.2, 0.5, 0.75}, row-major with y outer.
/// 5 points: center plus corners at 0.2 / 0.8.
/// Otherwise: uniform random in [margin, 1 - margin]^2.
pub fn calibration_layout(n: usize, margin: f32, seed: Option<u64>) -> Vec<Vec2> {
    match n {
        9 => {
            let positions = [0.2, 0.5, 0.75];
            positions
                .iter()
                .flat_map(|&y| positions.iter().map(move |&x| Vec2::new(x, y)))
                .collect()
        }
        5 => vec![
            Vec2::new(0.5, 0.5),
            Vec2::new(0.2, 0.2),
            Vec2::new(0.8, 0.2),
            Vec2::new(0.2, 0.8),
            Vec2::new(0.8, 0.8),
        ],
        _ => {
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_os_rng(),
            };
            let margin = margin.clamp(0.0, 0.49);
            (0..n)
                .map(|_| {
                    Vec2::new(
                        rng.random_range(margin..=1.0 - margin),
                        rng.random_range(margin..=1.0 - margin),
                    )
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Vec2> {
        calibration_layout(9, 0.1, None)
    }

    fn estimator_from(refs: &[Vec2], obs: &[Vec2]) -> CalibrationEstimator {
        let mut est = CalibrationEstimator::new(refs.len());
        for (i, (r, o)) in refs.iter().zip(obs).enumerate() {
            est.add_pair(i, *r, *o, 60).unwrap();
        }
        est
    }

    fn assert_transform_in_bounds(t: &CalibrationTransform) {
        assert!(t.scale_x >= SCALE_MIN && t.scale_x <= SCALE_MAX, "{:?}", t);
        assert!(t.scale_y >= SCALE_MIN && t.scale_y <= SCALE_MAX, "{:?}", t);
        assert!(t.offset_x.abs() <= OFFSET_LIMIT, "{:?}", t);
        assert!(t.offset_y.abs() <= OFFSET_LIMIT, "{:?}", t);
    }

    #[test]
    fn test_identity_pairs_yield_identity() {
        let refs = grid();
        let t = estimator_from(&refs, &refs).compute().unwrap();
        assert!(t.calibrated);
        assert!((t.scale_x - 1.0).abs() < 1e-5);
        assert!((t.scale_y - 1.0).abs() < 1e-5);
        assert!(t.offset_x.abs() < 1e-5);
        assert!(t.offset_y.abs() < 1e-5);
        assert!(t.is_neutral());
    }

    #[test]
    fn test_uniform_translation_is_undone() {
        let refs = grid();
        let obs: Vec<Vec2> = refs.iter().map(|r| *r + Vec2::new(0.05, -0.03)).collect();
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert!((t.offset_x + 0.05).abs() < 1e-4, "offset_x={}", t.offset_x);
        assert!((t.offset_y - 0.03).abs() < 1e-4, "offset_y={}", t.offset_y);
        assert!((t.scale_x - 1.0).abs() < 1e-4);
        assert!((t.scale_y - 1.0).abs() < 1e-4);

        for (r, o) in refs.iter().zip(&obs) {
            let corrected = t.apply(*o);
            assert!((corrected.x - r.x).abs() < 1e-4);
            assert!((corrected.y - r.y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_compressed_gaze_is_stretched() {
        let refs = grid();
        // Observed spread is 80% of the reference spread around 0.5.
        let obs: Vec<Vec2> = refs
            .iter()
            .map(|r| Vec2::new(0.5 + (r.x - 0.5) * 0.8, 0.5 + (r.y - 0.5) * 0.8))
            .collect();
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert!((t.scale_x - 1.25).abs() < 1e-3, "scale_x={}", t.scale_x);
        assert!((t.scale_y - 1.25).abs() < 1e-3, "scale_y={}", t.scale_y);
        assert_transform_in_bounds(&t);
    }

    #[test]
    fn test_degenerate_observations_stay_bounded() {
        let refs = grid();
        let obs = vec![Vec2::new(0.5, 0.5); refs.len()];
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert!(t.scale_x.is_finite() && t.scale_y.is_finite());
        assert!(t.offset_x.is_finite() && t.offset_y.is_finite());
        assert_transform_in_bounds(&t);
        assert_eq!(t.scale_x, SCALE_MAX);
    }

    #[test]
    fn test_huge_finite_observations_stay_bounded() {
        let refs = grid();
        let obs: Vec<Vec2> = refs.iter().map(|r| Vec2::new(3.0e38, r.y)).collect();
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert!(t.offset_x.is_finite() && t.offset_y.is_finite(), "{:?}", t);
        assert_transform_in_bounds(&t);
        assert!((t.scale_y - 1.0).abs() < 1e-5);

        let obs: Vec<Vec2> = refs
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let x = if i % 2 == 0 { f32::MAX } else { -f32::MAX };
                Vec2::new(x, x)
            })
            .collect();
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert_transform_in_bounds(&t);
    }

    #[test]
    fn test_fit_axis_rejects_non_finite() {
        assert_eq!(fit_axis(&[(0.2, f64::INFINITY), (0.5, 0.5), (0.8, 0.8)]), None);
        let (scale, offset) = fit_axis(&[(0.2, 0.3), (0.5, 0.6), (0.8, 0.9)]).unwrap();
        assert!((scale - 1.0).abs() < 1e-9);
        assert!((offset + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_offset_is_clamped() {
        let refs = grid();
        let obs: Vec<Vec2> = refs.iter().map(|r| *r + Vec2::new(0.9, -0.9)).collect();
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert_eq!(t.offset_x, -OFFSET_LIMIT);
        assert_eq!(t.offset_y, OFFSET_LIMIT);
    }

    #[test]
    fn test_identical_references_clamp_scale_low() {
        let refs = vec![Vec2::new(0.5, 0.5); 4];
        let obs = vec![
            Vec2::new(0.4, 0.4),
            Vec2::new(0.6, 0.4),
            Vec2::new(0.4, 0.6),
            Vec2::new(0.6, 0.6),
        ];
        let t = estimator_from(&refs, &obs).compute().unwrap();
        assert_eq!(t.scale_x, SCALE_MIN);
        assert_eq!(t.scale_y, SCALE_MIN);
        assert_transform_in_bounds(&t);
    }

    #[test]
    fn test_not_enough_points() {
        let mut est = CalibrationEstimator::new(9);
        est.add_pair(0, Vec2::new(0.2, 0.2), Vec2::new(0.2, 0.2), 30).unwrap();
        est.add_pair(1, Vec2::new(0.5, 0.5), Vec2::new(0.5, 0.5), 30).unwrap();
        assert_eq!(est.compute(), Err(CalibrationError::NotEnoughPoints(2)));
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut est = CalibrationEstimator::new(3);
        let err = est.add_pair(3, Vec2::ZERO, Vec2::ZERO, 0).unwrap_err();
        assert_eq!(
            err,
            CalibrationError::IndexOutOfRange {
                index: 3,
                capacity: 3
            }
        );
    }

    #[test]
    fn test_non_finite_pair_rejected() {
        let mut est = CalibrationEstimator::new(3);
        let err = est
            .add_pair(0, Vec2::new(0.5, 0.5), Vec2::new(f32::NAN, 0.5), 12)
            .unwrap_err();
        assert_eq!(err, CalibrationError::NonFinitePoint(0));
        assert_eq!(est.filled(), 0);
    }

    #[test]
    fn test_synthetic_pairs_are_counted() {
        let mut est = CalibrationEstimator::new(3);
        est.add_synthetic_pair(0, Vec2::new(0.2, 0.2), Vec2::new(0.05, 0.05), 4)
            .unwrap();
        assert_eq!(est.synthetic_count(), 1);
        let pair = est.pairs().next().unwrap();
        assert!(pair.synthetic);
        assert!((pair.observed.x - 0.25).abs() < 1e-6);

        // Overwriting with a measurement un-counts the synthetic pair.
        est.add_pair(0, Vec2::new(0.2, 0.2), Vec2::new(0.21, 0.19), 40)
            .unwrap();
        assert_eq!(est.synthetic_count(), 0);
    }

    #[test]
    fn test_apply_identity_when_uncalibrated() {
        let t = CalibrationTransform {
            offset_x: 0.2,
            scale_x: 1.3,
            ..CalibrationTransform::uncalibrated()
        };
        let p = Vec2::new(0.37, 0.81);
        assert_eq!(t.apply(p), p);
    }

    #[test]
    fn test_layouts() {
        let nine = calibration_layout(9, 0.1, None);
        assert_eq!(nine.len(), 9);
        assert_eq!(nine[0], Vec2::new(0.2, 0.2));
        assert_eq!(nine[1], Vec2::new(0.5, 0.2));
        assert_eq!(nine[8], Vec2::new(0.75, 0.75));

        let five = calibration_layout(5, 0.1, None);
        assert_eq!(five[0], Vec2::new(0.5, 0.5));
        assert_eq!(five.len(), 5);

        let random = calibration_layout(7, 0.1, Some(42));
        assert_eq!(random.len(), 7);
        assert!(random
            .iter()
            .all(|p| (0.1..=0.9).contains(&p.x) && (0.1..=0.9).contains(&p.y)));
        assert_eq!(random, calibration_layout(7, 0.1, Some(42)));
    }
}

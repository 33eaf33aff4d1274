//! Gaze hit resolution: scene raycast, display-collider fallback, and the
//! calibration correction of eye-sourced hits.

use super::calibration::CalibrationTransform;
use super::math::{Vec2, Vec3};
use super::scene::{DisplaySurface, SceneHit, SceneRaycast, TargetId};
use super::source::{GazeSample, SourceKind};

/// Default maximum gaze distance in meters.
pub const MAX_GAZE_DISTANCE: f32 = 10.0;

/// Where this tick's gaze landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    /// `None` when nothing was hit.
    pub target: Option<TargetId>,
    /// Hit position in world space, calibration-adjusted when `corrected`.
    pub world_point: Vec3,
    /// Raw (uncorrected) hit position in the display's normalized frame.
    pub normalized_point: Vec2,
    /// Whether the calibration correction moved `world_point`.
    pub corrected: bool,
}

impl HitResult {
    pub const MISS: Self = Self {
        target: None,
        world_point: Vec3::ZERO,
        normalized_point: Vec2::ZERO,
        corrected: false,
    };

    pub fn is_hit(&self) -> bool {
        self.target.is_some()
    }
}

/// Resolves a gaze sample to a hit, in world and normalized coordinates.
pub struct HitResolver<S> {
    pub scene: S,
    pub display: DisplaySurface,
    pub max_distance: f32,
}

impl<S: SceneRaycast> HitResolver<S> {
    pub fn new(scene: S, display: DisplaySurface) -> Self {
        Self {
            scene,
            display,
            max_distance: MAX_GAZE_DISTANCE,
        }
    }

    /// Scene first, then the enlarged display collider, else no hit.
    pub fn raycast(&self, sample: &GazeSample) -> Option<SceneHit> {
        let ray = sample.ray();
        self.scene
            .raycast(&ray, self.max_distance)
            .or_else(|| self.display.raycast_collider(&ray, self.max_distance))
    }

    /// Resolve this tick's hit. Only eye-sourced hits are corrected, and
    /// only once `transform` is calibrated.
    pub fn resolve(&self, sample: &GazeSample, transform: &CalibrationTransform) -> HitResult {
        let Some(hit) = self.raycast(sample) else {
            return HitResult::MISS;
        };

        let normalized = self.display.to_normalized(hit.point);
        let mut result = HitResult {
            target: Some(hit.target),
            world_point: hit.point,
            normalized_point: normalized,
            corrected: false,
        };

        if sample.source == SourceKind::Eye && transform.calibrated {
            let adjusted = transform.apply(normalized);
            result.world_point = self.display.to_world(adjusted);
            result.corrected = true;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TestClock};
    use crate::gaze::math::Pose;
    use crate::gaze::provider::default_head_pose;
    use crate::gaze::scene::{Collider, Scene};

    fn sample_towards(target: Vec3, source: SourceKind) -> GazeSample {
        let head = default_head_pose();
        GazeSample {
            origin: head.position,
            direction: (target - head.position).normalize(),
            source,
            valid: source == SourceKind::Eye,
            head,
            timestamp: TestClock::new().stamp(),
        }
    }

    fn shifted() -> CalibrationTransform {
        CalibrationTransform {
            offset_x: -0.05,
            offset_y: 0.03,
            calibrated: true,
            ..CalibrationTransform::uncalibrated()
        }
    }

    #[test]
    fn test_miss_everything() {
        let resolver = HitResolver::new(Scene::new(), DisplaySurface::default());
        let sample = sample_towards(Vec3::new(0.0, 1.6, 5.0), SourceKind::Eye);
        let hit = resolver.resolve(&sample, &CalibrationTransform::default());
        assert!(!hit.is_hit());
        assert_eq!(hit, HitResult::MISS);
    }

    #[test]
    fn test_scene_hit_takes_precedence() {
        let mut scene = Scene::new();
        scene.add(Collider::new(TargetId(42), Pose::at(0.0, 1.6, -1.0), 0.5, 0.5));
        let resolver = HitResolver::new(scene, DisplaySurface::default());
        let sample = sample_towards(Vec3::new(0.0, 1.6, -2.0), SourceKind::Head);
        let hit = resolver.resolve(&sample, &CalibrationTransform::default());
        assert_eq!(hit.target, Some(TargetId(42)));
        assert!((hit.world_point.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_eye_hit_corrected_when_calibrated() {
        let display = DisplaySurface::default();
        let resolver = HitResolver::new(Scene::new(), display);
        let aim = display.to_world(Vec2::new(0.6, 0.4));
        let hit = resolver.resolve(&sample_towards(aim, SourceKind::Eye), &shifted());

        assert!(hit.corrected);
        assert!((hit.normalized_point.x - 0.6).abs() < 1e-4);
        let expected = display.to_world(Vec2::new(0.55, 0.43));
        assert!((hit.world_point - expected).length() < 1e-4);
    }

    #[test]
    fn test_head_hit_never_corrected() {
        let display = DisplaySurface::default();
        let resolver = HitResolver::new(Scene::new(), display);
        let aim = display.to_world(Vec2::new(0.6, 0.4));
        let hit = resolver.resolve(&sample_towards(aim, SourceKind::Head), &shifted());
        assert!(!hit.corrected);
        assert!((hit.world_point - aim).length() < 1e-4);
    }

    #[test]
    fn test_uncalibrated_eye_hit_unchanged() {
        let display = DisplaySurface::default();
        let resolver = HitResolver::new(Scene::new(), display);
        let aim = display.to_world(Vec2::new(0.3, 0.7));
        let hit = resolver.resolve(
            &sample_towards(aim, SourceKind::Eye),
            &CalibrationTransform::default(),
        );
        assert!(!hit.corrected);
        assert!((hit.world_point - aim).length() < 1e-4);
    }
}

//! Scene geometry the gaze ray is cast against, and the stimulus display
//! surface that defines the normalized 2D frame used by calibration.
//!
//! All targets are flat rectangles ("quads") placed by a rigid `Pose`. The
//! quad lies in its local XY plane, centered on the pose origin, facing +Z.

use super::math::{Pose, Ray, Vec2, Vec3};

/// Opaque identity of a hittable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl TargetId {
    /// The stimulus display's enlarged fallback collider.
    pub const STIMULUS_DISPLAY: Self = Self(1);
}

/// One ray-geometry intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneHit {
    pub target: TargetId,
    /// World-space intersection point.
    pub point: Vec3,
    /// Distance from the ray origin.
    pub distance: f32,
}

/// Scene-intersection primitive supplied by the host.
pub trait SceneRaycast {
    /// Closest hit along `ray` no farther than `max_distance`.
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<SceneHit>;
}

// ── Ray-quad intersection ────────────────────────────────────

/// Intersect a ray with a `width` x `height` quad placed at `pose`.
///
/// Returns the distance along the ray and the world-space hit point.
/// Rays parallel to the plane or hitting behind the origin miss.
pub fn ray_quad_intersection(
    ray: &Ray,
    pose: &Pose,
    width: f32,
    height: f32,
) -> Option<(f32, Vec3)> {
    // Pose is rigid, so distances are identical in local and world space.
    let local_origin = pose.to_local(ray.origin);
    let local_dir = pose.direction_to_local(ray.direction);

    if local_dir.z.abs() < 1e-8 {
        return None;
    }

    let t = -local_origin.z / local_dir.z;
    if t < 0.0 || !t.is_finite() {
        return None;
    }

    let hit_x = local_origin.x + local_dir.x * t;
    let hit_y = local_origin.y + local_dir.y * t;
    let hw = width * 0.5;
    let hh = height * 0.5;
    if hit_x < -hw || hit_x > hw || hit_y < -hh || hit_y > hh {
        return None;
    }

    Some((t, ray.at(t)))
}

// ── Scene ────────────────────────────────────────────────────

/// A hittable rectangle.
#[derive(Debug, Clone, Copy)]
pub struct Collider {
    pub id: TargetId,
    pub pose: Pose,
    pub width: f32,
    pub height: f32,
}

impl Collider {
    pub fn new(id: TargetId, pose: Pose, width: f32, height: f32) -> Self {
        Self {
            id,
            pose,
            width,
            height,
        }
    }
}

/// Flat list of colliders; the closest hit wins.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub colliders: Vec<Collider>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, collider: Collider) {
        self.colliders.push(collider);
    }

    /// Remove every collider with the given id. Returns how many were removed.
    pub fn remove(&mut self, id: TargetId) -> usize {
        let before = self.colliders.len();
        self.colliders.retain(|c| c.id != id);
        before - self.colliders.len()
    }
}

impl SceneRaycast for Scene {
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<SceneHit> {
        let mut closest: Option<SceneHit> = None;

        for collider in &self.colliders {
            let Some((t, point)) =
                ray_quad_intersection(ray, &collider.pose, collider.width, collider.height)
            else {
                continue;
            };
            if t > max_distance {
                continue;
            }
            let is_closer = closest.as_ref().map_or(true, |c| t < c.distance);
            if is_closer {
                closest = Some(SceneHit {
                    target: collider.id,
                    point,
                    distance: t,
                });
            }
        }

        closest
    }
}

// ── Stimulus display surface ─────────────────────────────────

/// The surface stimuli and calibration targets are shown on.
///
/// Normalized coordinates are y-up with (0.5, 0.5) at the surface center;
/// (0,0) is the bottom-left corner and (1,1) the top-right.
#[derive(Debug, Clone, Copy)]
pub struct DisplaySurface {
    pub pose: Pose,
    /// Visible width in meters.
    pub width: f32,
    /// Visible height in meters.
    pub height: f32,
    /// Size of the fallback collider relative to the visible surface.
    pub collider_scale: f32,
    /// Target id reported for fallback-collider hits.
    pub target: TargetId,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self {
            pose: Pose::at(0.0, 1.6, -2.0),
            width: 1.6,
            height: 0.9,
            collider_scale: 1.5,
            target: TargetId::STIMULUS_DISPLAY,
        }
    }
}

impl DisplaySurface {
    pub fn new(pose: Pose, width: f32, height: f32) -> Self {
        Self {
            pose,
            width,
            height,
            ..Default::default()
        }
    }

    /// Place the surface `distance` meters straight ahead of `head`,
    /// facing it.
    pub fn in_front_of(head: &Pose, distance: f32, width: f32, height: f32) -> Self {
        let position = head.to_world(Vec3::new(0.0, 0.0, -distance));
        Self::new(Pose::new(position, head.rotation), width, height)
    }

    /// Project a world point onto the surface plane and normalize.
    pub fn to_normalized(&self, world: Vec3) -> Vec2 {
        let local = self.pose.to_local(world);
        Vec2::new(local.x / self.width + 0.5, local.y / self.height + 0.5)
    }

    /// World point on the surface plane for a normalized coordinate.
    pub fn to_world(&self, normalized: Vec2) -> Vec3 {
        let local = Vec3::new(
            (normalized.x - 0.5) * self.width,
            (normalized.y - 0.5) * self.height,
            0.0,
        );
        self.pose.to_world(local)
    }

    /// The enlarged fallback collider as a scene collider.
    pub fn collider(&self) -> Collider {
        Collider::new(
            self.target,
            self.pose,
            self.width * self.collider_scale,
            self.height * self.collider_scale,
        )
    }

    /// The visible surface (exact size) as a scene collider.
    pub fn visible_collider(&self, id: TargetId) -> Collider {
        Collider::new(id, self.pose, self.width, self.height)
    }

    /// Cast against the enlarged fallback collider only.
    pub fn raycast_collider(&self, ray: &Ray, max_distance: f32) -> Option<SceneHit> {
        let collider = self.collider();
        let (t, point) =
            ray_quad_intersection(ray, &collider.pose, collider.width, collider.height)?;
        if t > max_distance {
            return None;
        }
        Some(SceneHit {
            target: collider.id,
            point,
            distance: t,
        })
    }
}

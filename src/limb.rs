use std::f32::consts::FRAC_PI_2;

use crate::prelude::*;

/// Snap distance for weight and pelvis-error convergence.
pub(crate) const EPSILON: f32 = 0.005;

/// +90° about the up axis, used to derive the heel/roll probe direction.
pub(crate) const QUAT_90: Quat = Quat::from_xyzw(0.0, core::f32::consts::FRAC_1_SQRT_2, 0.0, core::f32::consts::FRAC_1_SQRT_2);

#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum LimbId {
    LeftFoot,
    RightFoot,
    LeftHand,
    RightHand,
}

impl LimbId {
    pub const ALL: [Self; 4] = [
        Self::LeftFoot,
        Self::RightFoot,
        Self::LeftHand,
        Self::RightHand,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::LeftFoot => 0,
            Self::RightFoot => 1,
            Self::LeftHand => 2,
            Self::RightHand => 3,
        }
    }
}

/// Limb entity → body entity. A body has up to four of these.
#[derive(Component, Clone, Copy, Debug)]
#[relationship(relationship_target = Limbs)]
pub struct LimbOf(pub Entity);

#[derive(Component, Debug)]
#[relationship_target(relationship = LimbOf)]
pub struct Limbs(Vec<Entity>);

impl Limbs {
    pub fn entities(&self) -> &[Entity] {
        &self.0
    }
}

/// Widens the ground probe when the end bone is near stationary, so a resting
/// limb keeps contact across small terrain height changes.
#[derive(Clone, Reflect, Debug)]
pub struct AdaptiveRayDistance {
    /// Bone motion above this (scaled down below 30 fps) counts as "moving".
    pub error_threshold: f32,
    /// Extra probe length while the bone is moving.
    pub min: f32,
    /// Extra probe length while the bone is stationary.
    pub max: f32,
}

impl Default for AdaptiveRayDistance {
    fn default() -> Self {
        Self {
            error_threshold: 0.05,
            min: 0.0,
            max: 2.0,
        }
    }
}

/// Geometry and tuning for one ground-placed limb.
#[derive(Component, Clone, Reflect, Debug)]
#[require(LimbState)]
pub struct Limb {
    pub id: LimbId,
    /// Freeze the limb's world pose once its blend settles on a surface.
    pub plant: bool,
    pub forward: Vec3,
    pub up: Vec3,
    /// Knee/elbow pole offset, rotated by the body yaw each frame.
    pub hint_offset: Vec3,
    /// How far above the animated goal the ground probe starts.
    pub offset_distance: f32,
    pub length: f32,
    pub half_width: f32,
    /// Final goal height above the contact point.
    pub height: f32,
    /// Max implied pitch/roll of the contact rotation, in degrees.
    pub rotation_limit_degrees: f32,
    /// Seconds for the IK weight to ramp between 0 and 1.
    pub transition_time: f32,
    pub extra_ray_distance: f32,
    pub adaptive_extra_ray: Option<AdaptiveRayDistance>,
}

impl Limb {
    pub fn new(id: LimbId) -> Self {
        Self {
            id,
            plant: true,
            forward: Vec3::Z,
            up: Vec3::Y,
            hint_offset: Vec3::ZERO,
            offset_distance: 0.5,
            length: 0.22,
            half_width: 0.05,
            height: 0.1,
            rotation_limit_degrees: 45.0,
            transition_time: 0.2,
            extra_ray_distance: 0.0,
            adaptive_extra_ray: None,
        }
    }
}

/// Live blend and plant state of one limb. Mutated every placement pass.
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
pub struct LimbState {
    pub active: bool,
    pub target_weight: f32,
    pub current_weight: f32,
    pub blend_speed: f32,
    plant_blend: f32,
    plant_blend_speed: f32,
    plant_on_transition: bool,
    pub planted: bool,
    pub planted_position: Vec3,
    pub planted_rotation: Quat,
    pub(crate) rotated_fwd: Vec3,
    pub(crate) rotated_hint: Vec3,
    /// Contact point resolved this frame (world space).
    pub(crate) contact: Vec3,
    /// Toe/heel contacts relative to the main contact.
    pub(crate) toe_offset: Vec3,
    pub(crate) heel_offset: Vec3,
    // Last-known contacts, kept for continuity while probes miss.
    pub(crate) last_contact: Vec3,
    pub(crate) last_toe_offset: Vec3,
    pub(crate) last_heel_offset: Vec3,
    pub(crate) previous_bone_position: Vec3,
    pub(crate) adaptive_ray_distance: f32,
}

impl Default for LimbState {
    fn default() -> Self {
        Self {
            active: true,
            target_weight: 0.0,
            current_weight: 0.0,
            blend_speed: 0.0,
            plant_blend: 0.0,
            plant_blend_speed: 0.0,
            plant_on_transition: false,
            planted: false,
            planted_position: Vec3::ZERO,
            planted_rotation: Quat::IDENTITY,
            rotated_fwd: Vec3::Z,
            rotated_hint: Vec3::ZERO,
            contact: Vec3::ZERO,
            toe_offset: Vec3::ZERO,
            heel_offset: Vec3::ZERO,
            last_contact: Vec3::ZERO,
            last_toe_offset: Vec3::ZERO,
            last_heel_offset: Vec3::ZERO,
            previous_bone_position: Vec3::ZERO,
            adaptive_ray_distance: 0.0,
        }
    }
}

impl LimbState {
    /// Re-enable placement for this limb, resetting blend state so it ramps in
    /// from the raw animated pose instead of snapping.
    pub fn activate(&mut self, cfg: &Limb, bone_position: Vec3) {
        if !self.active {
            self.reset(cfg, bone_position);
        }
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub(crate) fn reset(&mut self, cfg: &Limb, bone_position: Vec3) {
        self.target_weight = 0.0;
        self.current_weight = 0.0;
        self.blend_speed = 0.0;
        self.planted = false;
        self.last_contact = bone_position;
        self.last_toe_offset =
            cfg.up.normalize_or(Vec3::Y) * cfg.offset_distance + self.rotated_fwd * cfg.length;
        self.last_heel_offset = QUAT_90 * self.rotated_fwd * cfg.half_width;
    }

    /// Start ramping the goal weight toward `target` over `transition_time`
    /// seconds. A zero transition time snaps immediately.
    pub fn set_ik_weight(&mut self, target: f32, transition_time: f32) {
        // Only recompute the speed on an actual target change, so the ramp
        // stays linear across frames.
        if (target - self.target_weight).abs() > EPSILON {
            if transition_time != 0.0 {
                self.blend_speed = (target - self.current_weight) / transition_time;
            } else {
                self.blend_speed = 0.1;
                self.current_weight = target;
            }
        }
        self.target_weight = target;
    }

    /// Advance the smoothed weight. Snaps to the target on overshoot or when
    /// within [`EPSILON`]; clamps if numerically out of range.
    pub(crate) fn advance_weight(&mut self, dt: f32) {
        let sign = (self.target_weight - self.current_weight).signum();
        self.current_weight += self.blend_speed * dt;

        if sign * (self.target_weight - self.current_weight).signum() < 1.0
            || (self.current_weight - self.target_weight).abs() < EPSILON
        {
            self.current_weight = self.target_weight;
            return;
        }

        if self.current_weight > 1.0 || self.current_weight < 0.0 {
            self.current_weight = self.target_weight.clamp(0.0, 1.0);
        }
    }

    pub fn plant_blend_factor(&self) -> f32 {
        self.plant_blend
    }

    pub fn set_plant_blend_factor(&mut self, factor: f32) {
        self.plant_blend = factor.clamp(0.0, 1.0);
    }

    pub fn enable_plant_blend(&mut self, blend_speed: f32) {
        self.plant_blend_speed = blend_speed.abs();
        self.plant_on_transition = true;
    }

    pub fn disable_plant_blend(&mut self, blend_speed: f32) {
        self.plant_blend_speed = -blend_speed.abs();
        self.plant_on_transition = true;
    }

    pub fn is_plant_on_transition(&self) -> bool {
        self.plant_on_transition
    }

    pub(crate) fn advance_plant_blend(&mut self, dt: f32) {
        if !self.plant_on_transition {
            return;
        }
        self.plant_blend += self.plant_blend_speed * dt;
        if self.plant_blend_speed > 0.0 {
            if self.plant_blend >= 1.0 {
                self.plant_blend = 1.0;
                self.plant_on_transition = false;
            }
        } else if self.plant_blend <= 0.0 {
            self.plant_blend = 0.0;
            self.plant_on_transition = false;
        }
    }

    /// Recompute the yaw-rotated forward vector and hint offset. While planted
    /// the yaw blends toward the planted yaw by the plant-blend factor.
    pub(crate) fn update_rotated_axes(&mut self, cfg: &Limb, goal_rotation: Quat, body_yaw: Quat) {
        self.rotated_hint = body_yaw * cfg.hint_offset;

        let mut yaw = yaw_rotation(goal_rotation);
        if self.planted && cfg.plant {
            yaw = yaw.slerp(yaw_rotation(self.planted_rotation), self.plant_blend);
        }
        self.rotated_fwd = yaw * cfg.forward.normalize_or(Vec3::Z);
    }

    pub(crate) fn extra_ray(&self, cfg: &Limb) -> f32 {
        if cfg.adaptive_extra_ray.is_some() {
            self.adaptive_ray_distance
        } else {
            cfg.extra_ray_distance
        }
    }
}

/// The yaw-only part of a rotation.
pub(crate) fn yaw_rotation(rotation: Quat) -> Quat {
    let (yaw, _, _) = rotation.to_euler(EulerRot::YXZ);
    Quat::from_rotation_y(yaw)
}

/// Spherical interpolation between two vectors, interpolating direction along
/// the arc and length linearly.
pub(crate) fn slerp_vec3(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let (Some(from), Some(to)) = (a.try_normalize(), b.try_normalize()) else {
        return a.lerp(b, t);
    };
    let dot = from.dot(to).clamp(-1.0, 1.0);
    let theta = dot.acos() * t.clamp(0.0, 1.0);
    let relative = (to - from * dot).normalize_or_zero();
    let direction = from * theta.cos() + relative * theta.sin();
    direction * (a.length() + (b.length() - a.length()) * t)
}

/// Rotation taking `from` onto `to`, identity if either is degenerate.
pub(crate) fn from_to_rotation(from: Vec3, to: Vec3) -> Quat {
    match (Dir3::new(from), Dir3::new(to)) {
        (Ok(from), Ok(to)) => Quat::from_rotation_arc(*from, *to),
        _ => Quat::IDENTITY,
    }
}

/// Clamp the toe/heel offsets so the implied foot pitch and roll stay inside
/// the configured rotation limit.
pub(crate) fn clamp_rotation_limits(cfg: &Limb, state: &mut LimbState, up: Vec3) {
    let limit = cfg.rotation_limit_degrees.to_radians();
    let fwd = state.rotated_fwd;

    // Pitch.
    if fwd.angle_between(state.toe_offset) > limit {
        let mut extra = up * cfg.length * limit.tan();
        if up.angle_between(state.toe_offset) > FRAC_PI_2 {
            extra = -extra;
        }
        state.toe_offset = fwd * cfg.length + extra;
    }

    // Roll.
    let side = QUAT_90 * fwd;
    if side.angle_between(state.heel_offset) > limit {
        let mut extra = up * cfg.half_width * limit.tan();
        if up.angle_between(state.heel_offset) > FRAC_PI_2 {
            extra = -extra;
        }
        state.heel_offset = side * cfg.half_width + extra;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn weight_converges_within_transition_time() {
        let mut state = LimbState::default();
        let dt = 0.02;
        for _ in 0..10 {
            state.set_ik_weight(1.0, 0.2);
            state.advance_weight(dt);
        }
        assert_eq!(state.current_weight, 1.0);
    }

    #[test]
    fn weight_ramp_is_linear() {
        let mut state = LimbState::default();
        state.set_ik_weight(1.0, 0.2);
        state.advance_weight(0.02);
        assert!(approx(state.current_weight, 0.1));
        state.set_ik_weight(1.0, 0.2);
        state.advance_weight(0.02);
        assert!(approx(state.current_weight, 0.2));
    }

    #[test]
    fn zero_transition_time_snaps() {
        let mut state = LimbState::default();
        state.set_ik_weight(1.0, 0.0);
        assert_eq!(state.current_weight, 1.0);
    }

    #[test]
    fn weight_stays_in_unit_range() {
        let mut state = LimbState::default();
        state.set_ik_weight(1.0, 0.01);
        for _ in 0..100 {
            state.advance_weight(0.02);
            assert!((0.0..=1.0).contains(&state.current_weight));
        }
    }

    #[test]
    fn advance_weight_is_idempotent_at_zero_dt() {
        let mut state = LimbState::default();
        state.set_ik_weight(1.0, 0.2);
        state.advance_weight(0.02);
        let before = state.current_weight;
        state.advance_weight(0.0);
        state.advance_weight(0.0);
        assert_eq!(state.current_weight, before);
    }

    #[test]
    fn plant_blend_clamped_and_transition_ends_at_bounds() {
        let mut state = LimbState::default();
        state.enable_plant_blend(5.0);
        assert!(state.is_plant_on_transition());
        for _ in 0..20 {
            state.advance_plant_blend(0.02);
            assert!((0.0..=1.0).contains(&state.plant_blend_factor()));
        }
        assert_eq!(state.plant_blend_factor(), 1.0);
        assert!(!state.is_plant_on_transition());

        state.disable_plant_blend(5.0);
        for _ in 0..20 {
            state.advance_plant_blend(0.02);
        }
        assert_eq!(state.plant_blend_factor(), 0.0);
        assert!(!state.is_plant_on_transition());
    }

    #[test]
    fn set_plant_blend_factor_clamps() {
        let mut state = LimbState::default();
        state.set_plant_blend_factor(2.0);
        assert_eq!(state.plant_blend_factor(), 1.0);
        state.set_plant_blend_factor(-1.0);
        assert_eq!(state.plant_blend_factor(), 0.0);
    }

    #[test]
    fn rotation_limit_clamps_toe_offset() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        state.rotated_fwd = Vec3::Z;
        // Toe contact nearly straight up: way past the 45° limit.
        state.toe_offset = Vec3::new(0.0, 1.0, 0.05);
        state.heel_offset = QUAT_90 * Vec3::Z * cfg.half_width;
        clamp_rotation_limits(&cfg, &mut state, Vec3::Y);
        let angle = state.toe_offset.angle_between(Vec3::Z).to_degrees();
        assert!(angle <= cfg.rotation_limit_degrees + 0.1, "angle was {angle}");
    }

    #[test]
    fn slerp_vec3_endpoints() {
        let a = Vec3::X * 2.0;
        let b = Vec3::Z * 4.0;
        assert!(slerp_vec3(a, b, 0.0).abs_diff_eq(a, 1e-5));
        assert!(slerp_vec3(a, b, 1.0).abs_diff_eq(b, 1e-4));
        let mid = slerp_vec3(a, b, 0.5);
        assert!(approx(mid.length(), 3.0));
    }
}

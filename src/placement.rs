use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::warn;

use crate::{
    BodyIkSystems, PlantedBody,
    limb::{self, AdaptiveRayDistance, EPSILON, Limb, LimbState, Limbs, QUAT_90},
    prelude::*,
    rig::{IkGoals, IkRig, LimbGoal},
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(schedule, place_limbs.in_set(BodyIkSystems::PlaceLimbs));
    }
}

/// Per-frame inputs for one limb solve, sampled from the rig before any goal
/// is overwritten.
#[derive(Debug, Clone, Copy)]
pub struct LimbFrame {
    /// Raw animated goal position for this limb.
    pub goal_position: Vec3,
    /// Raw animated goal rotation for this limb.
    pub goal_rotation: Quat,
    /// Yaw of the whole body, used to rotate the configured hint offset.
    pub body_yaw: Quat,
    /// World position of the mid-limb bone (knee/elbow).
    pub lower_bone_position: Vec3,
    pub dt: f32,
}

/// Solve ground placement for one limb.
///
/// `ray` is a synchronous downward probe `(origin, direction, max_distance) ->
/// hit point`; a miss is the expected "limb in the air" case, not an error.
/// Returns the goal to hand to the IK solver; all blend state lives in
/// `state`.
pub fn place_limb(
    cfg: &Limb,
    state: &mut LimbState,
    frame: &LimbFrame,
    ray: &mut impl FnMut(Vec3, Vec3, f32) -> Option<Vec3>,
) -> LimbGoal {
    let up = cfg.up.normalize_or(Vec3::Y);
    let forward = cfg.forward.normalize_or(Vec3::Z);

    state.update_rotated_axes(cfg, frame.goal_rotation, frame.body_yaw);
    state.contact = frame.goal_position;

    state.advance_plant_blend(frame.dt);
    find_contact_points(cfg, state, frame, up, ray);
    limb::clamp_rotation_limits(cfg, state, up);
    state.advance_weight(frame.dt);

    let rotation = contact_rotation(state, forward);
    let hint_position = state.toe_offset
        + state.contact
        + state.rotated_hint
        + (frame.lower_bone_position - frame.goal_position);
    let position = state.contact + up * cfg.height;

    if state.current_weight <= 0.0 {
        state.planted = false;
    } else if cfg.plant
        && !state.planted
        && (state.target_weight - state.current_weight).abs() < EPSILON
    {
        state.planted_position = position;
        state.planted_rotation = rotation;
        state.planted = true;
    }

    LimbGoal {
        position,
        rotation,
        position_weight: state.current_weight,
        rotation_weight: state.current_weight,
        hint_position,
        hint_weight: state.current_weight,
    }
}

/// Probe the ground under the main contact, the toe, and the heel.
///
/// Each probe keeps its last-known contact for continuity: a miss eases the
/// target back toward the raw animated pose by the current weight. While
/// planted, a second probe from the planted position is blended in by the
/// plant-blend factor so subtle terrain changes under a planted limb don't
/// make it slide.
fn find_contact_points(
    cfg: &Limb,
    state: &mut LimbState,
    frame: &LimbFrame,
    up: Vec3,
    ray: &mut impl FnMut(Vec3, Vec3, f32) -> Option<Vec3>,
) {
    let goal = frame.goal_position;
    let down = -up;
    let extra = state.extra_ray(cfg);
    let main_length = cfg.offset_distance + cfg.height + extra;
    let aux_length = cfg.offset_distance + cfg.length + extra;

    // Main contact.
    let main_probe = up * cfg.offset_distance;
    let contact_detected = if let Some(hit) = ray(goal + main_probe, down, main_length) {
        state.set_ik_weight(1.0, cfg.transition_time);

        let mut result = hit;
        if cfg.plant
            && state.planted
            && let Some(replant) = ray(state.planted_position + main_probe, down, main_length)
        {
            result = result.lerp(replant, state.plant_blend_factor());
        }
        state.contact = result;
        state.last_contact = result;
        true
    } else {
        state.set_ik_weight(0.0, cfg.transition_time);
        state.contact = goal.lerp(state.last_contact, state.current_weight);
        false
    };

    // Toe, for pitch.
    let toe_probe = main_probe + state.rotated_fwd * cfg.length;
    let toe_hit = ray(goal + toe_probe, down, aux_length);
    if contact_detected && let Some(hit) = toe_hit {
        let mut result = hit;
        if cfg.plant
            && state.planted
            && let Some(replant) = ray(state.planted_position + toe_probe, down, aux_length)
        {
            result = result.lerp(replant, state.plant_blend_factor());
        }
        state.toe_offset = result - state.contact;
        state.last_toe_offset = state.toe_offset;
    } else {
        state.toe_offset = limb::slerp_vec3(
            state.rotated_fwd * cfg.length,
            state.last_toe_offset,
            state.current_weight,
        );
    }

    // Heel, rotated 90° about the up axis, for roll.
    let side = (QUAT_90 * state.rotated_fwd).normalize_or_zero();
    let heel_probe = main_probe + side * cfg.half_width;
    let heel_hit = ray(goal + heel_probe, down, aux_length);
    if contact_detected && let Some(hit) = heel_hit {
        let mut result = hit;
        if cfg.plant
            && state.planted
            && let Some(replant) = ray(state.planted_position + heel_probe, down, aux_length)
        {
            result = result.lerp(replant, state.plant_blend_factor());
        }
        state.heel_offset = result - state.contact;
        state.last_heel_offset = state.heel_offset;
    } else {
        state.heel_offset = limb::slerp_vec3(
            QUAT_90 * state.rotated_fwd * cfg.half_width,
            state.last_heel_offset,
            state.current_weight,
        );
    }
}

/// Build the contact rotation: pitch/yaw from the toe offset, roll from the
/// heel offset, with the axes not relevant to each component zeroed out.
fn contact_rotation(state: &LimbState, forward: Vec3) -> Quat {
    let pitch = {
        let q = limb::from_to_rotation(forward, state.toe_offset);
        let (y, x, _) = q.to_euler(EulerRot::YXZ);
        Quat::from_euler(EulerRot::YXZ, y, x, 0.0)
    };

    let side = QUAT_90 * state.rotated_fwd;
    // When the foot yaw faces away from the configured forward, the heel
    // offset winds up on the other side; flip the arc so roll keeps its sign.
    let yaw_angle = state.rotated_fwd.angle_between(forward).to_degrees();
    let roll_arc = if yaw_angle > 90.0 && yaw_angle < 180.0 {
        limb::from_to_rotation(state.heel_offset, side)
    } else {
        limb::from_to_rotation(side, state.heel_offset)
    };
    let (_, _, z) = roll_arc.to_euler(EulerRot::YXZ);

    pitch * Quat::from_euler(EulerRot::YXZ, 0.0, 0.0, z)
}

fn place_limbs(
    mut bodies: Query<(
        &PlantedBody,
        &IkRig,
        &mut IkGoals,
        &Limbs,
        &GlobalTransform,
    )>,
    mut limbs: Query<(&Limb, &mut LimbState)>,
    transforms: Query<&GlobalTransform>,
    spatial: SpatialQuery,
    time: Res<Time>,
) {
    let dt = time.delta_secs();
    for (body, rig, mut goals, body_limbs, body_transform) in &mut bodies {
        let body_yaw = limb::yaw_rotation(body_transform.rotation());

        for &limb_entity in body_limbs.entities() {
            let Ok((cfg, mut state)) = limbs.get_mut(limb_entity) else {
                warn!("limb entity {limb_entity} of a planted body has no Limb component");
                continue;
            };
            if !state.active {
                continue;
            }

            update_adaptive_ray_distance(cfg, &mut state, rig, &transforms, dt);

            let Ok(lower_bone) = transforms.get(rig.lower_bone(cfg.id)) else {
                warn!("missing lower bone transform for limb {:?}", cfg.id);
                continue;
            };
            let goal = *goals.goal(cfg.id);
            let frame = LimbFrame {
                goal_position: goal.position,
                goal_rotation: goal.rotation,
                body_yaw,
                lower_bone_position: lower_bone.translation(),
                dt,
            };

            let mut ray = |origin: Vec3, direction: Vec3, max_distance: f32| {
                let direction = Dir3::new(direction).ok()?;
                spatial
                    .cast_ray(origin, direction, max_distance, true, &body.filter)
                    .map(|hit| origin + direction * hit.distance)
            };

            *goals.goal_mut(cfg.id) = place_limb(cfg, &mut state, &frame, &mut ray);
        }
    }
}

/// Adaptive probe widening: a near-stationary end bone gets the long probe so
/// it stays glued to uneven ground, a fast-moving one gets the short probe.
fn update_adaptive_ray_distance(
    cfg: &Limb,
    state: &mut LimbState,
    rig: &IkRig,
    transforms: &Query<&GlobalTransform>,
    dt: f32,
) {
    let Some(adaptive) = &cfg.adaptive_extra_ray else {
        return;
    };
    let Ok(bone) = transforms.get(rig.end_bone(cfg.id)) else {
        return;
    };
    let position = bone.translation();

    state.adaptive_ray_distance = adaptive_extra_ray(
        adaptive,
        (position - state.previous_bone_position).length(),
        dt,
    );
    state.previous_bone_position = position;
}

/// Extra probe length from end-bone motion since the last frame. Below 1/30 s
/// the motion threshold is scaled down so frame rate doesn't change which
/// motion counts as "stationary".
pub(crate) fn adaptive_extra_ray(
    adaptive: &AdaptiveRayDistance,
    bone_motion: f32,
    dt: f32,
) -> f32 {
    let mut threshold = adaptive.error_threshold;
    if dt < 1.0 / 30.0 {
        threshold = adaptive.error_threshold * 30.0 * dt;
    }

    if bone_motion > threshold {
        adaptive.min
    } else {
        adaptive.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limb::LimbId;

    /// An infinite horizontal plane at `height`.
    fn flat_ground(height: f32) -> impl FnMut(Vec3, Vec3, f32) -> Option<Vec3> {
        move |origin: Vec3, direction: Vec3, max_distance: f32| {
            if direction.y >= 0.0 || origin.y < height {
                return None;
            }
            let t = (origin.y - height) / -direction.y;
            (t <= max_distance).then(|| origin + direction * t)
        }
    }

    fn no_ground() -> impl FnMut(Vec3, Vec3, f32) -> Option<Vec3> {
        |_, _, _| None
    }

    fn frame(goal_position: Vec3, dt: f32) -> LimbFrame {
        LimbFrame {
            goal_position,
            goal_rotation: Quat::IDENTITY,
            body_yaw: Quat::IDENTITY,
            lower_bone_position: goal_position + Vec3::Y * 0.4,
            dt,
        }
    }

    #[test]
    fn constant_hit_converges_to_full_weight_and_contact_height() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        // Probe origin sits 0.3 m above the ground plane at y = 0.
        let goal = Vec3::new(0.0, -0.2, 0.0);
        let mut ray = flat_ground(0.0);

        let mut out = LimbGoal::default();
        for _ in 0..10 {
            out = place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
        }

        assert_eq!(out.position_weight, 1.0);
        assert!((out.position.y - cfg.height).abs() < 1e-4, "{}", out.position.y);
        assert!(state.planted);
    }

    #[test]
    fn miss_every_frame_keeps_weight_zero_and_unplanted() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        let goal = Vec3::new(0.0, 1.0, 0.0);
        let mut ray = no_ground();

        for _ in 0..10 {
            let out = place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
            assert_eq!(out.position_weight, 0.0);
        }
        assert!(!state.planted);
        // With zero weight the contact falls back to the raw animated goal.
        assert!(state.contact.abs_diff_eq(goal, 1e-5));
    }

    #[test]
    fn losing_ground_ramps_weight_back_down() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        let goal = Vec3::new(0.0, -0.2, 0.0);

        let mut ray = flat_ground(0.0);
        for _ in 0..10 {
            place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
        }
        assert!(state.planted);

        let mut ray = no_ground();
        let mut out = LimbGoal::default();
        for _ in 0..11 {
            out = place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
        }
        assert_eq!(out.position_weight, 0.0);
        assert!(!state.planted, "planted must clear once weight reaches 0");
    }

    #[test]
    fn solve_is_idempotent_at_zero_dt() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        let goal = Vec3::new(0.0, -0.2, 0.0);
        let mut ray = flat_ground(0.0);
        for _ in 0..10 {
            place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
        }

        let first = place_limb(&cfg, &mut state, &frame(goal, 0.0), &mut ray);
        let second = place_limb(&cfg, &mut state, &frame(goal, 0.0), &mut ray);
        assert_eq!(first, second);
    }

    #[test]
    fn planted_limb_blends_contact_toward_planted_probe() {
        let cfg = Limb::new(LimbId::LeftFoot);
        let mut state = LimbState::default();
        let goal = Vec3::new(0.0, -0.2, 0.0);
        let mut ray = flat_ground(0.0);
        for _ in 0..10 {
            place_limb(&cfg, &mut state, &frame(goal, 0.02), &mut ray);
        }
        assert!(state.planted);
        let planted_x = state.planted_position.x;

        // Fully planted blend: the contact should stick to the planted probe
        // even when the animated goal drifts sideways.
        state.enable_plant_blend(1000.0);
        state.advance_plant_blend(1.0);
        let drifted = goal + Vec3::X * 0.05;
        place_limb(&cfg, &mut state, &frame(drifted, 0.02), &mut ray);
        assert!(
            (state.contact.x - planted_x).abs() < 1e-4,
            "contact slid to {}",
            state.contact.x
        );
    }

    #[test]
    fn adaptive_probe_widens_only_while_stationary() {
        let adaptive = AdaptiveRayDistance::default();
        let dt = 1.0 / 30.0;

        // Stationary bone gets the long probe, a moving one the short probe.
        assert_eq!(adaptive_extra_ray(&adaptive, 0.01, dt), adaptive.max);
        assert_eq!(adaptive_extra_ray(&adaptive, 0.1, dt), adaptive.min);
    }

    #[test]
    fn adaptive_probe_threshold_scales_below_thirty_fps_frame() {
        let adaptive = AdaptiveRayDistance::default();

        // 0.03 m of motion is under the 0.05 threshold at 30 fps, but at
        // 60 fps the threshold halves to 0.025 and the bone counts as moving.
        assert_eq!(adaptive_extra_ray(&adaptive, 0.03, 1.0 / 30.0), adaptive.max);
        assert_eq!(adaptive_extra_ray(&adaptive, 0.03, 1.0 / 60.0), adaptive.min);
    }

    #[test]
    fn inactive_limb_state_untouched_by_activation_roundtrip() {
        let cfg = Limb::new(LimbId::RightHand);
        let mut state = LimbState::default();
        state.current_weight = 0.7;
        state.target_weight = 1.0;
        state.planted = true;
        state.deactivate();
        assert!(!state.active);
        state.activate(&cfg, Vec3::splat(1.0));
        assert!(state.active);
        assert_eq!(state.current_weight, 0.0);
        assert!(!state.planted);
        assert_eq!(state.last_contact, Vec3::splat(1.0));
    }
}

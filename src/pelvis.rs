use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::warn;

use crate::{
    BodyIkSystems, PlantedBody, PlantedBodyState,
    limb::{EPSILON, Limb, LimbId, Limbs},
    prelude::*,
    rig::{IkGoals, IkRig},
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(schedule, adjust_pelvis.in_set(BodyIkSystems::AdjustPelvis))
            .add_systems(PostUpdate, lower_hips);
    }
}

/// One leg as seen by the pelvis pass: its hip bone, its (already solved) foot
/// goal, and its configured up axis.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LegFrame {
    pub upper: Vec3,
    pub goal: Vec3,
    pub up: Vec3,
}

/// Estimate how far the root must drop so the longer leg stays within
/// `max_leg_length`, backed off so neither leg compresses below
/// `min_leg_length`. Returns the target error and the up axis of the leg that
/// drove it.
pub(crate) fn target_root_error(
    max_leg_length: f32,
    min_leg_length: f32,
    left: LegFrame,
    right: LegFrame,
) -> (f32, Vec3) {
    let (mut leg_length, up) =
        if (left.upper - left.goal).length_squared() > (right.upper - right.goal).length_squared()
        {
            ((left.upper - left.goal).length(), left.up)
        } else {
            ((right.upper - right.goal).length(), right.up)
        };

    if leg_length <= max_leg_length {
        return (0.0, up);
    }

    let mut error = leg_length - max_leg_length;

    // Dropping the goals by the full error may over-compress the other leg;
    // back off by the larger compression violation.
    let mut left_violation = 0.0;
    leg_length = (left.upper - (left.goal + up * error)).length();
    if leg_length < min_leg_length {
        left_violation = min_leg_length - leg_length;
    }
    let mut right_violation = 0.0;
    leg_length = (right.upper - (right.goal + up * error)).length();
    if leg_length < min_leg_length {
        right_violation = min_leg_length - leg_length;
    }
    if left_violation != 0.0 || right_violation != 0.0 {
        error -= left_violation.max(right_violation);
    }

    (error, up)
}

/// Move the smoothed root error toward the target, optionally damping the
/// approach inside the final 30% of the correction.
pub(crate) fn animate_root_error(cfg: &PlantedBody, state: &mut PlantedBodyState, dt: f32) {
    let diff = (state.current_root_error - state.target_root_error).abs();
    if diff < EPSILON {
        state.current_root_error = state.target_root_error;
        state.current_pelvis_speed = 0.0;
        return;
    }

    let sign = (state.target_root_error - state.current_root_error).signum();
    if cfg.damp_pelvis {
        if diff < state.target_root_error * 0.3 {
            state.current_pelvis_speed -= cfg.pelvis_adjustment_speed * dt;
            if state.current_pelvis_speed < cfg.pelvis_adjustment_speed * 0.5 {
                state.current_pelvis_speed = cfg.pelvis_adjustment_speed * 0.5;
            }
            state.current_root_error += sign * state.current_pelvis_speed * dt;
        } else {
            state.current_root_error += sign * cfg.pelvis_adjustment_speed * dt;
        }
    } else {
        state.current_root_error += sign * cfg.pelvis_adjustment_speed * dt;
        state.current_pelvis_speed = 0.0;
    }

    // Overshoot snaps to the target.
    if (state.target_root_error - state.current_root_error).signum() * sign <= 0.0 {
        state.current_root_error = state.target_root_error;
    }
}

/// Runs after all four limbs are placed: estimates leg over-extension and
/// shifts every goal by the smoothed correction this frame. The hip bone
/// itself is lowered later, in [`lower_hips`].
fn adjust_pelvis(
    mut bodies: Query<(
        &PlantedBody,
        &mut PlantedBodyState,
        &IkRig,
        &mut IkGoals,
        &Limbs,
    )>,
    limbs: Query<&Limb>,
    transforms: Query<&GlobalTransform>,
    time: Res<Time>,
) {
    for (body, mut state, rig, mut goals, body_limbs) in &mut bodies {
        animate_root_error(body, &mut state, time.delta_secs());

        if !body.adjust_pelvis {
            state.target_root_error = 0.0;
            state.current_pelvis_speed = 0.0;
            if state.current_root_error.abs() >= EPSILON {
                let offset = state.correction_up * state.current_root_error;
                for id in LimbId::ALL {
                    goals.goal_mut(id).position += offset;
                }
            }
            continue;
        }

        let up_of = |id: LimbId| {
            body_limbs
                .entities()
                .iter()
                .filter_map(|&entity| limbs.get(entity).ok())
                .find(|cfg| cfg.id == id)
                .map(|cfg| cfg.up.normalize_or(Vec3::Y))
        };
        let (Some(left_up), Some(right_up)) = (up_of(LimbId::LeftFoot), up_of(LimbId::RightFoot))
        else {
            warn!("pelvis adjustment needs both foot limbs configured");
            continue;
        };
        let (Ok(left_upper), Ok(right_upper)) = (
            transforms.get(rig.left_upper_leg),
            transforms.get(rig.right_upper_leg),
        ) else {
            warn!("missing upper leg bone transforms for pelvis adjustment");
            continue;
        };

        let left = LegFrame {
            upper: left_upper.translation(),
            goal: goals.goal(LimbId::LeftFoot).position,
            up: left_up,
        };
        let right = LegFrame {
            upper: right_upper.translation(),
            goal: goals.goal(LimbId::RightFoot).position,
            up: right_up,
        };

        let (target, up) = target_root_error(body.max_leg_length, body.min_leg_length, left, right);
        state.target_root_error = target;
        if target == 0.0 {
            state.current_pelvis_speed = 0.0;
        }
        state.correction_up = up;

        let offset = up * state.current_root_error;
        for id in LimbId::ALL {
            goals.goal_mut(id).position += offset;
        }
    }
}

/// Late pass: lower the hip bone by the applied correction so the visual root
/// follows without fighting the animation. Expects the hips entity's parent
/// frame to be world-aligned, matching the original world-space write.
fn lower_hips(
    bodies: Query<(&PlantedBodyState, &IkRig)>,
    mut transforms: Query<&mut Transform>,
) {
    for (state, rig) in &bodies {
        if state.current_root_error == 0.0 {
            continue;
        }
        let Ok(mut hips) = transforms.get_mut(rig.hips) else {
            continue;
        };
        hips.translation -= state.correction_up * state.current_root_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(upper: Vec3, goal: Vec3) -> LegFrame {
        LegFrame {
            upper,
            goal,
            up: Vec3::Y,
        }
    }

    #[test]
    fn no_correction_within_leg_length() {
        let left = leg(Vec3::new(-0.1, 0.9, 0.0), Vec3::new(-0.1, 0.0, 0.0));
        let right = leg(Vec3::new(0.1, 0.9, 0.0), Vec3::new(0.1, 0.0, 0.0));
        let (error, _) = target_root_error(1.0, 0.2, left, right);
        assert_eq!(error, 0.0);
    }

    #[test]
    fn over_extension_yields_difference() {
        let left = leg(Vec3::new(0.0, 1.2, 0.0), Vec3::ZERO);
        let right = leg(Vec3::new(0.0, 0.9, 0.0), Vec3::ZERO);
        let (error, _) = target_root_error(1.0, 0.2, left, right);
        assert!((error - 0.2).abs() < 1e-5, "error was {error}");
    }

    #[test]
    fn min_leg_length_backs_off_correction() {
        // Left leg over-extended by 0.5, but dropping the goals by 0.5 would
        // compress the right leg (0.6 long) below the 0.3 minimum.
        let left = leg(Vec3::new(0.0, 1.5, 0.0), Vec3::ZERO);
        let right = leg(Vec3::new(0.5, 0.6, 0.0), Vec3::new(0.5, 0.0, 0.0));
        let (error, _) = target_root_error(1.0, 0.3, left, right);
        assert!(error < 0.5);
        // After backing off, the right leg must satisfy the minimum.
        let compressed = (right.upper - (right.goal + Vec3::Y * error)).length();
        assert!(compressed >= 0.3 - 1e-4, "compressed to {compressed}");
    }

    #[test]
    fn root_error_converges_without_damping() {
        let cfg = PlantedBody {
            pelvis_adjustment_speed: 1.0,
            ..PlantedBody::default()
        };
        let mut state = PlantedBodyState::default();
        state.target_root_error = 0.1;
        for _ in 0..20 {
            animate_root_error(&cfg, &mut state, 0.01);
        }
        assert_eq!(state.current_root_error, 0.1);
    }

    #[test]
    fn damped_root_error_still_converges() {
        let cfg = PlantedBody {
            pelvis_adjustment_speed: 1.0,
            damp_pelvis: true,
            ..PlantedBody::default()
        };
        let mut state = PlantedBodyState::default();
        state.target_root_error = 0.1;
        for _ in 0..100 {
            animate_root_error(&cfg, &mut state, 0.01);
        }
        assert_eq!(state.current_root_error, 0.1);
    }

    #[test]
    fn root_error_never_overshoots() {
        let cfg = PlantedBody {
            pelvis_adjustment_speed: 10.0,
            ..PlantedBody::default()
        };
        let mut state = PlantedBodyState::default();
        state.target_root_error = 0.05;
        animate_root_error(&cfg, &mut state, 0.1);
        assert_eq!(state.current_root_error, 0.05);
    }
}

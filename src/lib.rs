#![doc = include_str!("../readme.md")]

/// Everything you need to get started with `bevy_body_ik`
pub mod prelude {
    pub(crate) use {
        avian3d::prelude::*,
        bevy_app::prelude::*,
        bevy_derive::{Deref, DerefMut},
        bevy_ecs::prelude::*,
        bevy_enhanced_input::prelude::*,
        bevy_math::prelude::*,
        bevy_reflect::prelude::*,
        bevy_time::prelude::*,
        bevy_transform::prelude::*,
        bevy_utils::prelude::*,
    };

    pub use crate::{
        BodyIkPlugin, BodyIkSystems, PlantedBody, PlantedBodyState,
        grip::{
            ArmIkTarget, GripHand, GripHandOf, GripHands, GripId, GripPose, GripSet,
            HandGripState, Handedness, HeldInteractable, HeldKind, Interactable,
        },
        input::{HandInput, PullTrigger},
        limb::{AdaptiveRayDistance, Limb, LimbId, LimbOf, LimbState, Limbs},
        pickup_glue::BodyIkPickupGluePlugin,
        rig::{AnimatorParams, IkGoals, IkRig, LimbGoal},
        trigger::TriggerCurve,
        two_hand::{TwoHandConfig, TwoHandMode, TwoHandState},
    };
}

use crate::prelude::*;
use bevy_ecs::{
    intern::Interned, lifecycle::HookContext,
    relationship::RelationshipSourceCollection as _, schedule::ScheduleLabel,
    world::DeferredWorld,
};

pub mod grip;
pub mod input;
pub mod limb;
mod pelvis;
pub mod pickup_glue;
pub mod placement;
pub mod rig;
pub mod trigger;
pub mod two_hand;

/// Also requires you to add [`PhysicsPlugins`] and [`EnhancedInputPlugin`] to work properly.
pub struct BodyIkPlugin {
    schedule: Interned<dyn ScheduleLabel>,
}

impl BodyIkPlugin {
    /// Create a new plugin in the given schedule. The default is [`FixedPostUpdate`].
    pub fn new(schedule: impl ScheduleLabel) -> Self {
        Self {
            schedule: schedule.intern(),
        }
    }
}

impl Default for BodyIkPlugin {
    fn default() -> Self {
        Self {
            schedule: FixedPostUpdate.intern(),
        }
    }
}

impl Plugin for BodyIkPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            self.schedule,
            (
                BodyIkSystems::PlaceLimbs,
                BodyIkSystems::AdjustPelvis,
                BodyIkSystems::ClassifyGrips,
            )
                .chain(),
        )
        .add_plugins((
            placement::plugin(self.schedule),
            pelvis::plugin(self.schedule),
            grip::plugin(self.schedule),
            input::plugin,
        ));
    }
}

/// System set used by all systems of `bevy_body_ik`.
#[derive(SystemSet, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum BodyIkSystems {
    /// Ground probing and per-limb goal blending.
    PlaceLimbs,
    /// Leg over-extension correction applied on top of the placed goals.
    AdjustPelvis,
    /// Hand grip classification and IK target switching.
    ClassifyGrips,
}

/// A body whose limb IK goals get placed onto the ground.
///
/// Spawn the limbs as separate entities pointing back here via
/// [`LimbOf`](limb::LimbOf), and the hands via
/// [`GripHandOf`](grip::GripHandOf) when the grip subsystem is used.
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
#[require(PlantedBodyState, IkGoals, AnimatorParams, Transform)]
#[component(on_add = PlantedBody::on_add)]
pub struct PlantedBody {
    /// Filter for the ground probes. The body's own entity is excluded on add.
    pub filter: SpatialQueryFilter,
    /// Lower the goals and hips when a leg would over-extend.
    pub adjust_pelvis: bool,
    /// Slow the pelvis correction as it approaches its target.
    pub damp_pelvis: bool,
    pub max_leg_length: f32,
    pub min_leg_length: f32,
    /// Pelvis correction speed in meters per second.
    pub pelvis_adjustment_speed: f32,
}

impl Default for PlantedBody {
    fn default() -> Self {
        Self {
            filter: SpatialQueryFilter::default(),
            adjust_pelvis: true,
            damp_pelvis: false,
            max_leg_length: 1.0,
            min_leg_length: 0.2,
            pelvis_adjustment_speed: 1.0,
        }
    }
}

impl PlantedBody {
    fn on_add(mut world: DeferredWorld, ctx: HookContext) {
        let Some(mut body) = world.get_mut::<Self>(ctx.entity) else {
            return;
        };
        body.filter.excluded_entities.add(ctx.entity);
    }
}

#[derive(Component, Clone, Copy, Reflect, Debug)]
#[reflect(Component)]
pub struct PlantedBodyState {
    /// Smoothed pelvis correction currently applied, in meters.
    pub current_root_error: f32,
    pub target_root_error: f32,
    /// Correction speed while damping, tracked so the approach can decay.
    pub current_pelvis_speed: f32,
    /// Up axis of the leg that drove the last correction.
    pub correction_up: Vec3,
}

impl Default for PlantedBodyState {
    fn default() -> Self {
        Self {
            current_root_error: 0.0,
            target_root_error: 0.0,
            current_pelvis_speed: 0.0,
            correction_up: Vec3::Y,
        }
    }
}

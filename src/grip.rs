use bevy_ecs::{
    intern::Interned, lifecycle::HookContext, schedule::ScheduleLabel, world::DeferredWorld,
};
use std::collections::HashMap;
use tracing::{debug, error, warn};

use crate::{
    BodyIkSystems,
    input::{FINGER_NAMES, HandInput},
    prelude::*,
    rig::AnimatorParams,
    trigger::TriggerCurve,
    two_hand::{TwoHandConfig, TwoHandState, update_two_hand},
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(schedule, update_grips.in_set(BodyIkSystems::ClassifyGrips));
    }
}

/// Category of a holdable object, as reported by the host's interaction layer.
#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq, Eq)]
pub enum HeldKind {
    Firearm,
    Magazine,
    /// A secondary grip point attached to a firearm (foregrip, handguard).
    ForeGrip,
    /// The pump handle of a tube-fed shotgun. Behaves like a secondary grip
    /// but keeps its own hand pose.
    ShotgunHandle,
    HandgunSlide,
    Round,
    PinnedGrenade,
    TopCover,
    ClosedBoltHandle,
    ClosedBolt,
    BoltActionHandle,
    ChargingHandle,
    /// Anything the hand poses have no special handling for. Reads as an
    /// empty hand.
    #[default]
    Other,
}

/// Symbolic hand pose selected by the classifier. Keys the configured
/// [`GripSet`].
#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum GripId {
    Firearm,
    Magazine,
    /// Gripping a firearm by its handguard or foregrip.
    Handguard,
    Slide,
    Round,
    Grenade,
    TopCover,
    /// The empty hand bracing the other hand's held object.
    TwoHand,
    BoltHandle,
    Bolt,
    BoltActionHandle,
    ChargingHandle,
    ShotgunHandle,
}

/// Marks an entity as holdable and describes how hands should treat it.
///
/// The host's interaction layer owns these: it sets `is_alt_held` while a
/// firearm is carried through its secondary grip and wires up the
/// `primary`/`alt_grip` links between a firearm and its grip points.
#[derive(Component, Clone, Copy, Reflect, Debug, Default)]
#[reflect(Component)]
pub struct Interactable {
    pub kind: HeldKind,
    /// Alignment transform to use instead of the entity's own.
    pub pose_override: Option<Entity>,
    /// For secondary grips, the primary object they are mounted on.
    pub primary: Option<Entity>,
    /// For firearms, their secondary grip entity, if any.
    pub alt_grip: Option<Entity>,
    /// For firearms, whether they are currently carried via the secondary
    /// grip rather than the trigger grip.
    pub is_alt_held: bool,
}

/// What a hand currently holds. `None` while the hand is empty.
///
/// Kept current by [`BodyIkPickupGluePlugin`](crate::pickup_glue::BodyIkPickupGluePlugin)
/// when `avian_pickup` drives the holding, or written directly by the host.
#[derive(Component, Clone, Copy, Reflect, Default, Debug, Deref, DerefMut)]
#[reflect(Component)]
pub struct HeldInteractable(pub Option<Entity>);

/// One configured hand pose: the IK target the arm should track and the
/// animator bool that blends the finger pose in.
#[derive(Clone, Debug)]
pub struct GripPose {
    pub ik_target: Entity,
    pub param: String,
}

/// The grip-to-pose table of one hand.
#[derive(Clone, Debug, Default)]
pub struct GripSet(HashMap<GripId, GripPose>);

impl GripSet {
    pub fn insert(&mut self, id: GripId, pose: GripPose) {
        self.0.insert(id, pose);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, id: GripId, ik_target: Entity, param: impl Into<String>) -> Self {
        self.0.insert(
            id,
            GripPose {
                ik_target,
                param: param.into(),
            },
        );
        self
    }

    pub fn get(&self, id: GripId) -> Option<&GripPose> {
        self.0.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GripId, &GripPose)> {
        self.0.iter()
    }
}

#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Animator parameter prefix for this hand.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

/// Configuration of one hand. Spawn two of these per body, each pointing at
/// the body via [`GripHandOf`].
///
/// `ik_parent` is the common ancestor of this hand's grip IK targets. While a
/// grip is active it is re-aligned onto the held object in world space, which
/// expects its parent frame to be world-aligned; while the hand is empty its
/// captured rest pose is restored.
#[derive(Component, Clone, Debug)]
#[require(HandGripState, TwoHandState, HandInput, HeldInteractable)]
#[component(on_add = GripHand::on_add)]
pub struct GripHand {
    pub side: Handedness,
    pub grips: GripSet,
    /// IK target used while the hand holds nothing.
    pub empty_target: Entity,
    /// Animator float driven by the trigger curve while a firearm is held.
    pub trigger_param: String,
    pub ik_parent: Entity,
    pub two_hand: TwoHandConfig,
    pub trigger: TriggerCurve,
}

impl GripHand {
    pub fn new(side: Handedness, ik_parent: Entity, empty_target: Entity) -> Self {
        Self {
            side,
            grips: GripSet::default(),
            empty_target,
            trigger_param: format!("{} Trigger", side.prefix()),
            ik_parent,
            two_hand: TwoHandConfig::default(),
            trigger: TriggerCurve::default(),
        }
    }

    fn on_add(mut world: DeferredWorld, ctx: HookContext) {
        let (ik_parent, empty_target) = {
            let Some(hand) = world.get::<Self>(ctx.entity) else {
                return;
            };
            (hand.ik_parent, hand.empty_target)
        };
        let rest_pose = world
            .get::<Transform>(ik_parent)
            .map(|transform| (transform.translation, transform.rotation));
        if rest_pose.is_none() {
            warn!("grip hand IK parent has no transform, rest pose unavailable");
        }
        if let Some(mut state) = world.get_mut::<HandGripState>(ctx.entity) {
            state.rest_pose = rest_pose;
        }
        world
            .commands()
            .entity(ctx.entity)
            .insert(ArmIkTarget(empty_target));
    }
}

/// The body this hand belongs to.
#[derive(Component, Clone, Copy, Debug, Deref, PartialEq, Eq)]
#[relationship(relationship_target = GripHands)]
pub struct GripHandOf(pub Entity);

/// All hands of a body. Exactly two are expected.
#[derive(Component, Debug)]
#[relationship_target(relationship = GripHandOf)]
pub struct GripHands(Vec<Entity>);

impl GripHands {
    pub fn entities(&self) -> &[Entity] {
        &self.0
    }
}

/// The IK target the host's arm solver should track this frame. Inserted when
/// [`GripHand`] is added and updated by the classifier.
#[derive(Component, Clone, Copy, Debug, Deref, PartialEq, Eq)]
pub struct ArmIkTarget(pub Entity);

/// Per-hand classifier state, most of it the secondary-grip lock latch.
#[derive(Component, Clone, Copy, Reflect, Default, Debug, PartialEq)]
#[reflect(Component)]
pub struct HandGripState {
    pub locked: bool,
    /// The secondary grip entity the lock latched onto.
    pub locked_grip: Option<Entity>,
    /// The primary object that grip is mounted on. The lock survives the held
    /// reference transferring from the grip to this object.
    pub locked_primary: Option<Entity>,
    /// Alignment transform resolved when the lock engaged.
    pub locked_align: Option<Entity>,
    /// Rest pose of the IK parent, captured when the hand was configured.
    pub rest_pose: Option<(Vec3, Quat)>,
}

impl HandGripState {
    pub fn release_lock(&mut self) {
        self.locked = false;
        self.locked_grip = None;
        self.locked_primary = None;
        self.locked_align = None;
    }
}

/// Everything the classifier sees about one hand for one frame. The peer
/// hand's fields are sampled before either hand updates, so classification
/// reads previous-frame peer state regardless of processing order.
#[derive(Clone, Copy, Debug)]
pub struct HandSnapshot {
    pub held: Option<(Entity, Interactable)>,
    pub other_held: Option<(Entity, Interactable)>,
    pub other_locked: bool,
    pub hand_distance: f32,
    pub trigger_pressed: bool,
}

/// Map what a hand holds to a symbolic grip, advancing the lock latch and the
/// two-hand state machine. Returns `None` for the empty hand pose.
pub fn classify_grip(
    state: &mut HandGripState,
    two_hand: &mut TwoHandState,
    two_hand_cfg: &TwoHandConfig,
    snap: &HandSnapshot,
) -> Option<GripId> {
    if state.locked {
        let held = snap.held.map(|(entity, _)| entity);
        let on_grip = held.is_some() && held == state.locked_grip;
        // The primary transferring into this hand (other hand let go) keeps
        // the lock.
        let on_primary = held.is_some() && held == state.locked_primary;
        if on_grip || on_primary {
            return Some(GripId::Handguard);
        }
        state.release_lock();
    }

    if let Some((entity, held)) = snap.held {
        return match held.kind {
            HeldKind::Firearm if held.is_alt_held => Some(GripId::Handguard),
            HeldKind::Firearm => Some(GripId::Firearm),
            HeldKind::Magazine => Some(GripId::Magazine),
            HeldKind::ForeGrip => {
                try_lock(state, entity, &held, snap.other_held);
                Some(GripId::Handguard)
            }
            HeldKind::ShotgunHandle => {
                try_lock(state, entity, &held, snap.other_held);
                Some(GripId::ShotgunHandle)
            }
            HeldKind::HandgunSlide => Some(GripId::Slide),
            HeldKind::Round => Some(GripId::Round),
            HeldKind::PinnedGrenade => Some(GripId::Grenade),
            HeldKind::TopCover => Some(GripId::TopCover),
            HeldKind::ClosedBoltHandle => Some(GripId::BoltHandle),
            HeldKind::ClosedBolt => Some(GripId::Bolt),
            HeldKind::BoltActionHandle => Some(GripId::BoltActionHandle),
            HeldKind::ChargingHandle => Some(GripId::ChargingHandle),
            HeldKind::Other => None,
        };
    }

    // The distance/trigger heuristic advances every empty-hand frame so the
    // latch stays warm even while the other hand holds nothing.
    let double = update_two_hand(two_hand, two_hand_cfg, snap.hand_distance, snap.trigger_pressed);
    let (_, other) = snap.other_held?;
    let other_via_secondary = other.kind == HeldKind::Firearm && other.is_alt_held;
    if double && !snap.other_locked && !other_via_secondary {
        return Some(GripId::TwoHand);
    }
    None
}

/// Latch the lock when this secondary grip's primary is held by the other
/// hand.
fn try_lock(
    state: &mut HandGripState,
    entity: Entity,
    held: &Interactable,
    other_held: Option<(Entity, Interactable)>,
) {
    let Some(primary) = held.primary else {
        return;
    };
    let other_holds_primary = other_held.is_some_and(|(other, _)| other == primary);
    if other_holds_primary {
        state.locked = true;
        state.locked_grip = Some(entity);
        state.locked_primary = Some(primary);
        state.locked_align = Some(held.pose_override.unwrap_or(entity));
    }
}

/// Look up the configured pose for a classified grip. A grip with no
/// configured pose falls back to the empty hand.
fn effective_pose(grips: &GripSet, grip: Option<GripId>) -> Option<(GripId, &GripPose)> {
    let id = grip?;
    let pose = grips.get(id);
    if pose.is_none() {
        warn!("no pose configured for grip {id:?}, using the empty hand pose");
    }
    pose.map(|pose| (id, pose))
}

/// Set the animator bool of every configured pose, true only for the active
/// grip.
fn apply_pose_params(animator: &mut AnimatorParams, grips: &GripSet, active: Option<GripId>) {
    for (&id, pose) in grips.iter() {
        animator.set_bool(&pose.param, Some(id) == active);
    }
}

/// The entity whose global transform the hand's IK parent aligns to for the
/// given grip.
pub fn resolve_alignment(
    grip: GripId,
    state: &HandGripState,
    snap: &HandSnapshot,
    lookup: impl Fn(Entity) -> Option<Interactable>,
) -> Option<Entity> {
    if grip == GripId::TwoHand {
        let (entity, other) = snap.other_held?;
        return Some(other.pose_override.unwrap_or(entity));
    }
    if state.locked {
        if let Some(align) = state.locked_align {
            return Some(align);
        }
    }
    let (entity, held) = snap.held?;
    if grip == GripId::Handguard && held.kind == HeldKind::Firearm && held.is_alt_held {
        // The firearm is carried by its secondary grip: align to the grip.
        if let Some(alt) = held.alt_grip {
            let pose = lookup(alt).and_then(|alt_item| alt_item.pose_override);
            return Some(pose.unwrap_or(alt));
        }
        debug!("firearm carried via secondary grip has no alt_grip link, aligning to the firearm");
    }
    Some(held.pose_override.unwrap_or(entity))
}

/// Per-frame hand pass: classify both hands, drive the animator parameters,
/// switch arm IK targets, and align the IK parents onto held objects.
///
/// Hands are processed in relationship order; each hand's view of its peer is
/// the pre-update snapshot.
fn update_grips(
    mut bodies: Query<(Entity, &GripHands, &mut AnimatorParams)>,
    mut hands: Query<(
        &GripHand,
        &mut HandGripState,
        &mut TwoHandState,
        &mut ArmIkTarget,
        &HandInput,
        &HeldInteractable,
    )>,
    interactables: Query<&Interactable>,
    globals: Query<&GlobalTransform>,
    mut locals: Query<&mut Transform>,
) {
    for (body, body_hands, mut animator) in &mut bodies {
        let entities = body_hands.entities();
        let [first, second] = entities else {
            error!(
                "body {body} needs exactly two grip hands, found {}",
                entities.len()
            );
            continue;
        };

        let hand_distance = {
            let (Ok(a), Ok(b)) = (globals.get(*first), globals.get(*second)) else {
                warn!("grip hands of {body} are missing global transforms");
                continue;
            };
            a.translation().distance(b.translation())
        };

        let mut snapshots = [(None::<Entity>, false); 2];
        let mut missing = false;
        for (slot, &entity) in snapshots.iter_mut().zip(entities) {
            let Ok((_, state, _, _, _, held)) = hands.get(entity) else {
                missing = true;
                break;
            };
            *slot = (held.0, state.locked);
        }
        if missing {
            warn!("grip hands of {body} are missing their hand components");
            continue;
        }

        for (index, &entity) in entities.iter().enumerate() {
            let (other_held, other_locked) = snapshots[1 - index];
            let Ok((hand, mut state, mut two_hand, mut target, input, held)) =
                hands.get_mut(entity)
            else {
                continue;
            };

            let resolve = |entity: Option<Entity>| {
                entity.and_then(|e| interactables.get(e).ok().map(|held| (e, *held)))
            };
            let snap = HandSnapshot {
                held: resolve(held.0),
                other_held: resolve(other_held),
                other_locked,
                hand_distance,
                trigger_pressed: hand.trigger.pressed(input.trigger),
            };

            let grip = classify_grip(&mut state, &mut two_hand, &hand.two_hand, &snap);
            let pose = effective_pose(&hand.grips, grip);

            let active = pose.as_ref().map(|(id, _)| *id);
            apply_pose_params(&mut animator, &hand.grips, active);
            let pull = if active == Some(GripId::Firearm) {
                hand.trigger.pull_value(input)
            } else {
                0.0
            };
            animator.set_float(&hand.trigger_param, pull);

            match pose {
                Some((id, grip_pose)) => {
                    target.0 = grip_pose.ik_target;

                    let align = resolve_alignment(id, &state, &snap, |entity| {
                        interactables.get(entity).ok().copied()
                    });
                    let (Some(align), Some((rest_pos, rest_rot))) = (align, state.rest_pose)
                    else {
                        continue;
                    };
                    let Ok(align_global) = globals.get(align) else {
                        warn!("grip alignment entity {align} has no global transform");
                        continue;
                    };
                    let Ok(mut parent) = locals.get_mut(hand.ik_parent) else {
                        continue;
                    };
                    parent.translation = align_global.transform_point(rest_pos);
                    parent.rotation = align_global.rotation() * rest_rot;
                }
                None => {
                    target.0 = hand.empty_target;
                    if let Some((rest_pos, rest_rot)) = state.rest_pose {
                        if let Ok(mut parent) = locals.get_mut(hand.ik_parent) {
                            parent.translation = rest_pos;
                            parent.rotation = rest_rot;
                        }
                    }
                    let prefix = hand.side.prefix();
                    for (name, curl) in FINGER_NAMES.iter().zip(input.finger_curls) {
                        animator.set_float(&format!("{prefix} {name}"), curl);
                    }
                }
            }
        }
    }
}

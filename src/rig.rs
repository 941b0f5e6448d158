use crate::{limb::LimbId, prelude::*};

/// Bone entities of the humanoid rig this crate reads from and writes to.
///
/// The bones themselves are owned by the host (animation player, network
/// replication, ...); this crate only samples their [`GlobalTransform`]s and
/// lowers the hips during pelvis correction.
#[derive(Component, Clone, Copy, Debug)]
pub struct IkRig {
    pub hips: Entity,
    pub left_upper_leg: Entity,
    pub right_upper_leg: Entity,
    pub left_lower_leg: Entity,
    pub right_lower_leg: Entity,
    pub left_foot: Entity,
    pub right_foot: Entity,
    pub left_lower_arm: Entity,
    pub right_lower_arm: Entity,
    pub left_hand: Entity,
    pub right_hand: Entity,
}

impl IkRig {
    /// The mid-limb bone used to derive the IK hint (knee/elbow pole) direction.
    pub fn lower_bone(&self, id: LimbId) -> Entity {
        match id {
            LimbId::LeftFoot => self.left_lower_leg,
            LimbId::RightFoot => self.right_lower_leg,
            LimbId::LeftHand => self.left_lower_arm,
            LimbId::RightHand => self.right_lower_arm,
        }
    }

    /// The end-effector bone of a limb.
    pub fn end_bone(&self, id: LimbId) -> Entity {
        match id {
            LimbId::LeftFoot => self.left_foot,
            LimbId::RightFoot => self.right_foot,
            LimbId::LeftHand => self.left_hand,
            LimbId::RightHand => self.right_hand,
        }
    }
}

/// One IK goal as consumed by the host's limb solver.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct LimbGoal {
    pub position: Vec3,
    pub rotation: Quat,
    pub position_weight: f32,
    pub rotation_weight: f32,
    pub hint_position: Vec3,
    pub hint_weight: f32,
}

impl Default for LimbGoal {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            position_weight: 0.0,
            rotation_weight: 0.0,
            hint_position: Vec3::ZERO,
            hint_weight: 0.0,
        }
    }
}

/// The four limb IK goals of a body.
///
/// The host writes the raw animated goal poses here every frame *before*
/// [`BodyIkSystems::PlaceLimbs`](crate::BodyIkSystems) runs; the placement and
/// pelvis systems then overwrite them with the solved values.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct IkGoals {
    goals: [LimbGoal; 4],
}

impl IkGoals {
    pub fn goal(&self, id: LimbId) -> &LimbGoal {
        &self.goals[id.index()]
    }

    pub fn goal_mut(&mut self, id: LimbId) -> &mut LimbGoal {
        &mut self.goals[id.index()]
    }
}

/// Name-keyed animation parameters, the analog of an animator's
/// `SetBool`/`SetFloat` side channel. The host maps these onto its own
/// animation graph.
#[derive(Component, Clone, Default, Debug)]
pub struct AnimatorParams {
    bools: std::collections::HashMap<String, bool>,
    floats: std::collections::HashMap<String, f32>,
}

impl AnimatorParams {
    pub fn set_bool(&mut self, name: &str, value: bool) {
        match self.bools.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.bools.insert(name.to_owned(), value);
            }
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        match self.floats.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.floats.insert(name.to_owned(), value);
            }
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        self.bools.get(name).copied().unwrap_or(false)
    }

    pub fn float(&self, name: &str) -> f32 {
        self.floats.get(name).copied().unwrap_or(0.0)
    }
}

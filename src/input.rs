use crate::prelude::*;

pub(super) fn plugin(app: &mut App) {
    app.add_observer(apply_trigger).add_observer(release_trigger);
}

/// Analog trigger pull for one hand. Bind it to the controller trigger axis.
#[derive(Debug, InputAction)]
#[action_output(f32)]
pub struct PullTrigger;

/// Per-hand controller input consumed by the grip systems.
///
/// The [`PullTrigger`] action keeps `trigger` current. Finger curls and the
/// capacitive touch flag come from hand-tracking runtimes that
/// `bevy_enhanced_input` has no notion of, so hosts with finger tracking write
/// those fields directly.
#[derive(Component, Clone, Copy, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct HandInput {
    /// Raw trigger axis, 0..1.
    pub trigger: f32,
    /// Capacitive touch on the trigger.
    pub trigger_touched: bool,
    /// Curl per finger, in [`FINGER_NAMES`] order.
    pub finger_curls: [f32; 5],
}

/// Animator parameter suffixes for the per-finger curl floats. Each is
/// prefixed with the hand side, e.g. "Left Thumb".
pub const FINGER_NAMES: [&str; 5] = ["Thumb", "Index", "Middle", "Ring", "Pinky"];

fn apply_trigger(pull: On<Fire<PullTrigger>>, mut inputs: Query<&mut HandInput>) {
    if let Ok(mut input) = inputs.get_mut(pull.context) {
        input.trigger = pull.value;
    }
}

fn release_trigger(pull: On<Complete<PullTrigger>>, mut inputs: Query<&mut HandInput>) {
    if let Ok(mut input) = inputs.get_mut(pull.context) {
        input.trigger = 0.0;
    }
}

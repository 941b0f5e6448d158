use avian_pickup::Holding;

use crate::{grip::HeldInteractable, prelude::*};

/// Optional glue keeping [`HeldInteractable`] in sync with `avian_pickup`.
///
/// Add it when the grip hands double as `AvianPickupActor`s; hosts with their
/// own interaction layer write [`HeldInteractable`] themselves instead.
pub struct BodyIkPickupGluePlugin;

impl Plugin for BodyIkPickupGluePlugin {
    fn build(&self, app: &mut App) {
        app.add_observer(track_picked_up_prop)
            .add_observer(track_dropped_prop);
    }
}

fn track_picked_up_prop(
    insert: On<Insert, Holding>,
    holding: Query<&Holding>,
    mut hands: Query<&mut HeldInteractable>,
) {
    let Ok(holding) = holding.get(insert.entity) else {
        return;
    };
    let Ok(mut held) = hands.get_mut(insert.entity) else {
        return;
    };
    held.0 = Some(holding.0);
}

fn track_dropped_prop(replace: On<Replace, Holding>, mut hands: Query<&mut HeldInteractable>) {
    let Ok(mut held) = hands.get_mut(replace.entity) else {
        return;
    };
    held.0 = None;
}

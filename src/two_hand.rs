use crate::prelude::*;

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq, Eq)]
pub enum TwoHandMode {
    /// Two-handed whenever the hands are close enough; hysteretic so the
    /// state doesn't flicker at the boundary.
    #[default]
    Automatic,
    /// A trigger press on the empty hand toggles the hold while the hands are
    /// close; separating the hands force-clears it.
    Toggle,
}

#[derive(Clone, Reflect, Debug)]
pub struct TwoHandConfig {
    pub mode: TwoHandMode,
    /// Inter-hand distance (meters) at or below which the hold can engage.
    pub activation_distance: f32,
    /// Distance above which the hold disengages. Must exceed the activation
    /// distance; the band between the two is the no-flicker zone.
    pub deactivation_distance: f32,
}

impl Default for TwoHandConfig {
    fn default() -> Self {
        Self {
            mode: TwoHandMode::Automatic,
            activation_distance: 0.18,
            deactivation_distance: 0.28,
        }
    }
}

#[derive(Component, Clone, Copy, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct TwoHandState {
    pub holding: bool,
    pub toggle_active: bool,
    pub was_trigger_pressed: bool,
}

/// Advance the two-hand hold state for one hand and report whether the hold
/// is active this frame.
pub fn update_two_hand(
    state: &mut TwoHandState,
    cfg: &TwoHandConfig,
    distance: f32,
    trigger_pressed: bool,
) -> bool {
    match cfg.mode {
        TwoHandMode::Toggle => {
            if distance > cfg.deactivation_distance {
                state.holding = false;
                state.toggle_active = false;
            } else if distance <= cfg.activation_distance
                && trigger_pressed
                && !state.was_trigger_pressed
            {
                state.toggle_active = !state.toggle_active;
                state.holding = state.toggle_active;
            }
            state.was_trigger_pressed = trigger_pressed;
        }
        TwoHandMode::Automatic => {
            if distance <= cfg.activation_distance {
                state.holding = true;
            }
            if distance > cfg.deactivation_distance {
                state.holding = false;
            }
        }
    }
    state.holding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automatic_mode_is_hysteretic() {
        let cfg = TwoHandConfig::default();
        let mut state = TwoHandState::default();

        assert!(!update_two_hand(&mut state, &cfg, 0.30, false));
        assert!(update_two_hand(&mut state, &cfg, 0.15, false));
        // Inside the hysteresis band: stays active.
        assert!(update_two_hand(&mut state, &cfg, 0.20, false));
        assert!(update_two_hand(&mut state, &cfg, 0.28, false));
        // Past deactivation: clears.
        assert!(!update_two_hand(&mut state, &cfg, 0.30, false));
        // Back inside the band without re-activating: stays off.
        assert!(!update_two_hand(&mut state, &cfg, 0.20, false));
    }

    #[test]
    fn toggle_mode_flips_on_rising_edge_only() {
        let cfg = TwoHandConfig {
            mode: TwoHandMode::Toggle,
            ..TwoHandConfig::default()
        };
        let mut state = TwoHandState::default();

        assert!(update_two_hand(&mut state, &cfg, 0.10, true));
        // Held trigger: no further flip.
        assert!(update_two_hand(&mut state, &cfg, 0.10, true));
        // Release and press again: toggles off.
        assert!(update_two_hand(&mut state, &cfg, 0.10, false));
        assert!(!update_two_hand(&mut state, &cfg, 0.10, true));
    }

    #[test]
    fn toggle_mode_force_clears_on_separation() {
        let cfg = TwoHandConfig {
            mode: TwoHandMode::Toggle,
            ..TwoHandConfig::default()
        };
        let mut state = TwoHandState::default();

        assert!(update_two_hand(&mut state, &cfg, 0.10, true));
        assert!(!update_two_hand(&mut state, &cfg, 0.30, true));
        assert!(!state.toggle_active);
        // A continued press after the force-clear is not a rising edge.
        assert!(!update_two_hand(&mut state, &cfg, 0.10, true));
    }

    #[test]
    fn toggle_ignores_press_outside_activation_distance() {
        let cfg = TwoHandConfig {
            mode: TwoHandMode::Toggle,
            ..TwoHandConfig::default()
        };
        let mut state = TwoHandState::default();
        // Inside the band but above activation distance: no toggle.
        assert!(!update_two_hand(&mut state, &cfg, 0.25, true));
    }
}

use crate::{input::HandInput, prelude::*};

/// Maps the raw analog trigger axis to the pull value written to the animator
/// while the primary-weapon grip is held.
#[derive(Clone, Reflect, Debug)]
pub enum TriggerCurve {
    /// Dead zone below `activation`, linear ramp to 1.0 at `full_pull`.
    Ramp { activation: f32, full_pull: f32 },
    /// Three-zone curve: finger off the trigger reads as discipline (0),
    /// touching but below `activation` eases toward `rest_level`, and the
    /// `activation..full_pull` band ramps from `rest_level` to 1.0.
    ThreeZone {
        activation: f32,
        full_pull: f32,
        rest_level: f32,
    },
}

impl Default for TriggerCurve {
    fn default() -> Self {
        Self::Ramp {
            activation: 0.7,
            full_pull: 0.95,
        }
    }
}

impl TriggerCurve {
    /// Whether the trigger counts as pressed for edge detection and the
    /// two-hand toggle.
    pub fn pressed(&self, raw: f32) -> bool {
        let (Self::Ramp { activation, .. } | Self::ThreeZone { activation, .. }) = self;
        raw >= *activation
    }

    pub fn pull_value(&self, input: &HandInput) -> f32 {
        match *self {
            Self::Ramp {
                activation,
                full_pull,
            } => ramp(input.trigger, activation, full_pull),
            Self::ThreeZone {
                activation,
                full_pull,
                rest_level,
            } => {
                if !input.trigger_touched && input.trigger < activation {
                    // Finger indexed along the frame.
                    0.0
                } else if input.trigger < activation {
                    // Resting on the trigger; follow the index curl up to the
                    // rest level so the finger visibly settles.
                    let curl = input.finger_curls[1].clamp(0.0, 1.0);
                    rest_level * curl.max(ramp(input.trigger, 0.0, activation))
                } else {
                    rest_level + (1.0 - rest_level) * ramp(input.trigger, activation, full_pull)
                }
            }
        }
    }
}

fn ramp(raw: f32, activation: f32, full: f32) -> f32 {
    if raw < activation {
        return 0.0;
    }
    let span = (full - activation).max(f32::EPSILON);
    ((raw - activation) / span).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(trigger: f32) -> HandInput {
        HandInput {
            trigger,
            ..HandInput::default()
        }
    }

    #[test]
    fn ramp_dead_zone_and_remap() {
        let curve = TriggerCurve::Ramp {
            activation: 0.7,
            full_pull: 0.95,
        };
        assert_eq!(curve.pull_value(&input(0.5)), 0.0);
        assert!((curve.pull_value(&input(0.825)) - 0.5).abs() < 1e-4);
        assert_eq!(curve.pull_value(&input(0.95)), 1.0);
        assert_eq!(curve.pull_value(&input(1.0)), 1.0);
    }

    #[test]
    fn pressed_threshold() {
        let curve = TriggerCurve::default();
        assert!(!curve.pressed(0.69));
        assert!(curve.pressed(0.7));
    }

    #[test]
    fn three_zone_discipline_rest_and_pull() {
        let curve = TriggerCurve::ThreeZone {
            activation: 0.7,
            full_pull: 0.95,
            rest_level: 0.4,
        };
        // Finger off the trigger.
        assert_eq!(curve.pull_value(&input(0.0)), 0.0);

        // Resting: touched, below activation.
        let mut resting = input(0.3);
        resting.trigger_touched = true;
        resting.finger_curls[1] = 1.0;
        assert!((curve.pull_value(&resting) - 0.4).abs() < 1e-4);

        // Pulling: ramps from rest level to 1.0.
        let mut pulling = input(0.95);
        pulling.trigger_touched = true;
        assert_eq!(curve.pull_value(&pulling), 1.0);
        let mut halfway = input(0.825);
        halfway.trigger_touched = true;
        assert!((curve.pull_value(&halfway) - 0.7).abs() < 1e-4);
    }
}

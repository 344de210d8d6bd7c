//! Coordinated motion for a single segment.
//!
//! We don't do real trajectory planning. Instead, every line gets a velocity
//! limit proportional to how far it has to travel, so that the line with the
//! most travel goes at full (scaled) speed and the others finish at about
//! the same time.

use serde::{Deserialize, Serialize};
use vplot_geom::{Len, UnitConverter};

/// What an actuator is capable of, in steps per second (squared).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub velocity_min: f64,
    pub velocity_max: f64,
    pub acceleration_min: f64,
    pub acceleration_max: f64,
}

impl AxisLimits {
    // Not `f64::clamp`, because that panics on a misconfigured min > max.
    pub fn clamp_velocity(&self, v: f64) -> f64 {
        v.max(self.velocity_min).min(self.velocity_max)
    }

    pub fn clamp_acceleration(&self, a: f64) -> f64 {
        a.max(self.acceleration_min).min(self.acceleration_max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Multipliers {
    pub velocity: f64,
    pub acceleration: f64,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            velocity: 1.0 / 64.0,
            acceleration: 1.0 / 256.0,
        }
    }
}

/// Where one line is and where it should go.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisTravel {
    pub current: Len,
    /// The step position the actuator was last told to go to.
    pub commanded_steps: i64,
    pub target: Len,
    pub limits: AxisLimits,
}

/// A command for one actuator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisMotion {
    pub target_steps: i64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// The fraction of the longest travel that each line needs to cover.
///
/// Returns `None` if nothing needs to move.
pub fn travel_fractions(axes: &[AxisTravel]) -> Option<Vec<f64>> {
    let deltas: Vec<f64> = axes
        .iter()
        .map(|a| (a.target - a.current).get().abs())
        .collect();
    let max_delta = deltas.iter().copied().fold(0.0, f64::max);
    if max_delta <= 0.0 {
        return None;
    }
    Some(deltas.into_iter().map(|d| d / max_delta).collect())
}

/// Commands for each line, or `None` for lines that are already headed where
/// they need to be.
pub fn plan_axis_motions(
    axes: &[AxisTravel],
    units: &(impl UnitConverter + ?Sized),
    multipliers: Multipliers,
) -> Vec<Option<AxisMotion>> {
    let Some(fractions) = travel_fractions(axes) else {
        return vec![None; axes.len()];
    };

    axes.iter()
        .zip(fractions)
        .map(|(axis, fraction)| {
            let target_steps = units.length_to_steps(axis.target);
            (target_steps != axis.commanded_steps).then(|| {
                let limits = &axis.limits;
                AxisMotion {
                    target_steps,
                    velocity: limits
                        .clamp_velocity(limits.velocity_max * fraction * multipliers.velocity),
                    acceleration: limits.clamp_acceleration(
                        limits.acceleration_max * multipliers.acceleration,
                    ),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vplot_geom::{LenExt as _, ReelCalibration};

    impl Arbitrary for AxisLimits {
        type Parameters = ();
        type Strategy = BoxedStrategy<AxisLimits>;

        fn arbitrary_with(_: ()) -> Self::Strategy {
            (1.0..100.0f64, 100.0..100_000.0f64, 1.0..100.0f64, 100.0..1_000_000.0f64)
                .prop_map(|(vmin, vmax, amin, amax)| AxisLimits {
                    velocity_min: vmin,
                    velocity_max: vmax,
                    acceleration_min: amin,
                    acceleration_max: amax,
                })
                .boxed()
        }
    }

    fn limits() -> AxisLimits {
        AxisLimits {
            velocity_min: 0.0,
            velocity_max: 6400.0,
            acceleration_min: 100.0,
            acceleration_max: 256_000.0,
        }
    }

    fn travel(current: f64, target: f64) -> AxisTravel {
        let reel = ReelCalibration::default();
        AxisTravel {
            current: current.mm(),
            commanded_steps: reel.length_to_steps(current.mm()),
            target: target.mm(),
            limits: limits(),
        }
    }

    #[test]
    fn nothing_to_do() {
        let axes = [travel(100.0, 100.0), travel(200.0, 200.0)];
        assert_eq!(travel_fractions(&axes), None);
        assert_eq!(
            plan_axis_motions(&axes, &ReelCalibration::default(), Multipliers::default()),
            vec![None, None]
        );
    }

    #[test]
    fn longest_travel_goes_full_speed() {
        let axes = [travel(100.0, 140.0), travel(200.0, 190.0)];
        let motions = plan_axis_motions(&axes, &ReelCalibration::default(), Multipliers::default());
        let left = motions[0].unwrap();
        let right = motions[1].unwrap();

        assert_eq!(left.velocity, 6400.0 / 64.0);
        assert!((right.velocity - 6400.0 / 64.0 / 4.0).abs() < 1e-9);
        assert_eq!(left.acceleration, 1000.0);
        assert_eq!(left.target_steps, ReelCalibration::default().length_to_steps(140.0.mm()));
    }

    #[test]
    fn unchanged_steps_are_left_alone() {
        // Less than half a step of travel on the right.
        let axes = [travel(100.0, 140.0), travel(200.0, 200.001)];
        let motions = plan_axis_motions(&axes, &ReelCalibration::default(), Multipliers::default());
        assert!(motions[0].is_some());
        assert!(motions[1].is_none());
    }

    #[test]
    fn slow_lines_are_clamped_to_the_floor() {
        let mut axes = [travel(100.0, 200.0), travel(100.0, 100.5)];
        axes[1].limits.velocity_min = 50.0;
        let motions = plan_axis_motions(&axes, &ReelCalibration::default(), Multipliers::default());
        assert_eq!(motions[1].unwrap().velocity, 50.0);
    }

    proptest! {
        #[test]
        fn fractions_are_normalized(
            lines in prop::collection::vec((0.0..2000.0f64, 0.0..2000.0f64, any::<AxisLimits>()), 2..6)
        ) {
            let axes: Vec<_> = lines
                .iter()
                .map(|&(current, target, limits)| AxisTravel {
                    current: current.mm(),
                    commanded_steps: 0,
                    target: target.mm(),
                    limits,
                })
                .collect();
            let deltas: Vec<f64> = lines.iter().map(|(c, t, _)| (t - c).abs()).collect();
            let max = deltas.iter().copied().fold(0.0, f64::max);
            prop_assume!(max > 0.0);

            let fractions = travel_fractions(&axes).unwrap();
            for (f, d) in fractions.iter().zip(&deltas) {
                prop_assert!((0.0..=1.0).contains(f));
                if *d == max {
                    prop_assert_eq!(*f, 1.0);
                }
            }

            let motions = plan_axis_motions(&axes, &ReelCalibration::default(), Multipliers::default());
            for (m, axis) in motions.iter().zip(&axes) {
                if let Some(m) = m {
                    prop_assert!(m.velocity >= axis.limits.velocity_min);
                    prop_assert!(m.velocity <= axis.limits.velocity_max);
                }
            }
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::{Len, LenExt as _};

/// Conversion between line lengths and actuator positions.
pub trait UnitConverter {
    fn length_to_steps(&self, len: Len) -> i64;
    fn steps_to_length(&self, steps: i64) -> Len;
}

/// A reel that winds the line around a spool of fixed radius.
///
/// A step count of zero corresponds to a line length of zero, and increasing
/// step counts correspond to longer lines.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReelCalibration {
    pub spool_radius: Len,
    /// How many steps does it take for the spool to make one revolution?
    pub steps_per_revolution: f64,
}

impl Default for ReelCalibration {
    fn default() -> Self {
        Self {
            spool_radius: 10.0.mm(),
            // 200 full steps at 16x microstepping.
            steps_per_revolution: 3200.0,
        }
    }
}

impl ReelCalibration {
    pub fn spool_circumference(&self) -> Len {
        self.spool_radius * 2.0 * core::f64::consts::PI
    }

    pub fn steps_per_mm(&self) -> f64 {
        self.steps_per_revolution / self.spool_circumference().get()
    }
}

impl UnitConverter for ReelCalibration {
    fn length_to_steps(&self, len: Len) -> i64 {
        (len.get() * self.steps_per_mm()).round() as i64
    }

    fn steps_to_length(&self, steps: i64) -> Len {
        (steps as f64 / self.steps_per_mm()).mm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn one_revolution() {
        let reel = ReelCalibration::default();
        let circ = reel.spool_circumference();
        assert_eq!(reel.length_to_steps(circ), 3200);
        assert!((reel.steps_to_length(3200).get() - circ.get()).abs() < 1e-9);
    }

    proptest! {
        // Steps are integers, so a round trip is only exact to within half a step.
        #[test]
        fn round_trip_within_half_a_step(len in 0.0..5000.0f64, radius in 1.0..50.0f64) {
            let reel = ReelCalibration {
                spool_radius: radius.mm(),
                steps_per_revolution: 3200.0,
            };
            let back = reel.steps_to_length(reel.length_to_steps(len.mm()));
            prop_assert!((back.get() - len).abs() <= 0.5 / reel.steps_per_mm() + 1e-9);
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::{square, AxisConfig, Len, Point, Vector};

// Below this, a line is considered to have no direction.
const MIN_DIRECTION_LEN: f64 = 1e-9;

/// Parameters for the relaxation estimator.
///
/// Larger steps converge faster but can oscillate when the measured lengths
/// disagree with one another by a lot. Sensible values are 32 to 256
/// iterations with a step size between 0.2 and 0.5.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relaxation {
    pub iterations: u32,
    pub step_size: f64,
}

impl Relaxation {
    /// Cheap enough to run on every feedback sample.
    pub const FEEDBACK: Relaxation = Relaxation {
        iterations: 32,
        step_size: 0.2,
    };

    pub const PRECISE: Relaxation = Relaxation {
        iterations: 256,
        step_size: 0.5,
    };
}

impl Default for Relaxation {
    fn default() -> Self {
        Relaxation::FEEDBACK
    }
}

/// Which of the two circle intersections is the physical one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// The larger y coordinate, i.e. hanging below the anchors.
    #[default]
    Below,
    Above,
}

impl Branch {
    pub fn pick(self, p: Point, q: Point) -> Point {
        let p_is_lower = p.y >= q.y;
        match (self, p_is_lower) {
            (Branch::Below, true) | (Branch::Above, false) => p,
            _ => q,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Relaxation(Relaxation),
    /// Circle intersection; only applies to rigs with exactly two lines.
    ClosedForm {
        #[serde(default)]
        branch: Branch,
        #[serde(default)]
        fallback: Relaxation,
    },
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator::Relaxation(Relaxation::default())
    }
}

/// Iteratively nudges `seed` towards the position whose line lengths match
/// `measured`.
///
/// Each pass visits every line in turn, computes the length that line would
/// have at the current estimate, and moves the estimate along the line by
/// `step_size` times the error. This doesn't need the lines to be consistent
/// (or even to have a unique solution), which makes it robust to noisy
/// feedback and to rigs with more than two lines.
pub fn estimate_position(
    axes: &[AxisConfig],
    measured: &[Len],
    seed: Point,
    relax: Relaxation,
) -> Point {
    let mut estimate = seed;
    for _ in 0..relax.iterations {
        for (axis, measured) in axes.iter().zip(measured) {
            let to_anchor = axis.anchor - (estimate + axis.mount);
            let implied = to_anchor.length();
            if implied < MIN_DIRECTION_LEN {
                continue;
            }
            let error = implied - measured.get();
            estimate += to_anchor * (relax.step_size * error / implied);
        }
    }
    estimate
}

/// Intersects two circles, returning both intersection points.
///
/// Returns `None` if the circles are too far apart to meet, if one is
/// strictly inside the other, or if they are concentric.
///
/// Based on <http://paulbourke.net/geometry/circlesphere/>.
pub fn circle_intersection(c0: Point, c1: Point, r0: f64, r1: f64) -> Option<(Point, Point)> {
    let diff = c1 - c0;
    let d = diff.length();

    // Written so that NaN radii fail too.
    let reachable = d <= r0 + r1 && d >= (r0 - r1).abs();
    if !reachable || d < MIN_DIRECTION_LEN {
        return None;
    }

    let a = (square(r0) - square(r1) + square(d)) / (2.0 * d);
    let mid = c0 + diff * (a / d);
    // Can go slightly negative for tangent circles.
    let h = (square(r0) - square(a)).max(0.0).sqrt();
    let offset = Vector::new(-diff.y, diff.x) * (h / d);
    Some((mid + offset, mid - offset))
}

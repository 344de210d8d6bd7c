use std::collections::VecDeque;

use kurbo::{Line, ParamCurve as _, ParamCurveArclen as _};
use serde::{Deserialize, Serialize};
use vplot_geom::{FromKurbo as _, Point, ToKurbo as _};

pub mod velocity;

pub use velocity::{plan_axis_motions, AxisLimits, AxisMotion, AxisTravel, Multipliers};

// Lines have exact arclengths, so this only matters for the trait signature.
const ARCLEN_ACCURACY: f64 = 1e-6;

/// A requested cradle position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Point,
    /// If true, the straight line to this waypoint starts at the end of
    /// whatever is already queued. Otherwise the queue is discarded and the
    /// line starts at the current estimated position.
    #[serde(default)]
    pub append: bool,
}

impl Waypoint {
    pub fn new(position: Point) -> Self {
        Self {
            position,
            append: false,
        }
    }

    pub fn appended(position: Point) -> Self {
        Self {
            position,
            append: true,
        }
    }
}

/// Splits the straight line from `start` to `end` into steps of length
/// `precision`.
///
/// The returned points don't include `start`, and the last one is always
/// exactly `end`. Every gap (including the one from `start`) is at most
/// `precision`; the last gap may be shorter.
pub fn subdivide(start: Point, end: Point, precision: f64) -> Vec<Point> {
    let line = Line::new(start.to_kurbo(), end.to_kurbo());
    let len = line.arclen(ARCLEN_ACCURACY);
    if precision <= 0.0 || !precision.is_finite() || !len.is_finite() {
        return vec![end];
    }

    let steps = (len / precision).ceil() as usize;
    let mut ret = Vec::with_capacity(steps.max(1));
    ret.extend((1..steps).map(|i| Point::from_kurbo(line.eval(i as f64 * precision / len))));
    ret.push(end);
    ret
}

/// Are we close enough to `target` to move on?
pub fn has_arrived(estimate: &Point, target: &Point, precision: f64) -> bool {
    (*estimate - *target).length() < precision * 0.5
}

/// The waypoints of the current motion.
///
/// The front of `pending` is the next waypoint; `active` is the one we're
/// currently driving towards.
#[derive(Clone, Debug)]
pub struct WaypointQueue {
    precision: f64,
    active: Option<Point>,
    pending: VecDeque<Point>,
}

impl WaypointQueue {
    pub fn new(precision: f64) -> Self {
        Self {
            precision,
            active: None,
            pending: VecDeque::new(),
        }
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    pub fn active(&self) -> Option<Point> {
        self.active
    }

    /// Number of waypoints after the active one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }

    /// Where the queued motion ends.
    pub fn tail(&self) -> Option<Point> {
        self.pending.back().copied().or(self.active)
    }

    /// Queues the line to `waypoint`.
    ///
    /// Returns true if there's no longer an active waypoint, in which case
    /// the caller should `advance`.
    pub fn push(&mut self, waypoint: Waypoint, estimate: Point) -> bool {
        let start = if waypoint.append {
            self.tail().unwrap_or(estimate)
        } else {
            self.clear();
            estimate
        };
        self.pending
            .extend(subdivide(start, waypoint.position, self.precision));
        self.active.is_none()
    }

    /// Makes the next waypoint active, returning it.
    ///
    /// Returns `None` once the queue is drained.
    pub fn advance(&mut self) -> Option<Point> {
        self.active = self.pending.pop_front();
        self.active
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.pending.clear();
    }

    pub fn has_arrived(&self, estimate: &Point) -> bool {
        self.active
            .map_or(true, |target| has_arrived(estimate, &target, self.precision))
    }
}

//! Basic geometry of a cable-suspended drawing cradle: the positions of the
//! line feeds (the "anchors" that the cables hang from), the mount points on
//! the cradle, and the conversions between a cradle position and the cable
//! lengths that hold it there.
//!
//! Going from a position to cable lengths (`Rig::line_lengths`) is easy and
//! exact. Going the other way is the interesting direction: the cable lengths
//! we actually know come from incremental stepper feedback, they arrive one
//! axis at a time, and there may be more than two of them. So the general
//! purpose tool is an iterative relaxation (`estimate_position`), with an exact
//! circle-intersection solve available as a fast path for two-line rigs.
//!
//! All lengths are in millimetres. The y axis points down, so "below the
//! anchors" means a larger y coordinate.

use serde::{Deserialize, Serialize};

mod reel;
mod solve;

pub use reel::{ReelCalibration, UnitConverter};
pub use solve::{circle_intersection, estimate_position, Branch, Estimator, Relaxation};

pub struct Mm;

pub type Point = euclid::Point2D<f64, Mm>;
pub type Vector = euclid::Vector2D<f64, Mm>;
pub type Len = euclid::Length<f64, Mm>;

fn square(x: f64) -> f64 {
    x * x
}

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f64 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

pub trait FromKurbo {
    type Input;
    fn from_kurbo(p: Self::Input) -> Self;
}

pub trait ToKurbo {
    type Output;
    fn to_kurbo(&self) -> Self::Output;
}

#[cfg(feature = "kurbo")]
impl FromKurbo for Point {
    type Input = kurbo::Point;
    fn from_kurbo(p: kurbo::Point) -> Self {
        Point::new(p.x, p.y)
    }
}

#[cfg(feature = "kurbo")]
impl ToKurbo for Point {
    type Output = kurbo::Point;
    fn to_kurbo(&self) -> kurbo::Point {
        kurbo::Point::new(self.x, self.y)
    }
}

/// Index of a line within its rig.
///
/// Everything that is stored per line (configuration, measured lengths,
/// actuators) is indexed by this, never by a bare `usize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(pub usize);

impl std::fmt::Display for AxisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}", self.0)
    }
}

/// The identifier (serial number) of the actuator that drives a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorId(pub i32);

impl std::fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Position of the line feed.
    pub anchor: Point,
    /// Where the line attaches to the cradle, relative to the cradle origin.
    pub mount: Vector,
    pub actuator: ActuatorId,
}

impl AxisConfig {
    /// The length of this line when the cradle origin is at `cradle`.
    pub fn line_length(&self, cradle: &Point) -> Len {
        line_length(&self.anchor, &(*cradle + self.mount))
    }
}

/// Extents of the cradle. Only used for display.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CradleGeometry {
    pub width: f64,
    pub height: f64,
}

impl Default for CradleGeometry {
    fn default() -> Self {
        Self {
            width: 150.0,
            height: 75.0,
        }
    }
}

impl CradleGeometry {
    /// Mount points at the two top corners of the cradle, left then right.
    pub fn top_corners(&self) -> [Vector; 2] {
        [
            Vector::new(-self.width / 2.0, -self.height / 2.0),
            Vector::new(self.width / 2.0, -self.height / 2.0),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GeomError {
    #[error("line feed positions and mount points are mismatched ({anchors} feeds, {mounts} mounts)")]
    Mismatched { anchors: usize, mounts: usize },
    #[error("{axes} lines but {actuators} actuators")]
    MissingActuators { axes: usize, actuators: usize },
    #[error("a rig needs at least two lines, got {0}")]
    TooFewAxes(usize),
    #[error("waypoint precision must be positive and finite, got {0}")]
    BadPrecision(f64),
}

pub fn line_length(anchor: &Point, mount_point: &Point) -> Len {
    (*anchor - *mount_point).length().mm()
}

/// Inverse kinematics for loose arrays of anchors and mount points.
///
/// Fails if the two arrays have different lengths.
pub fn line_lengths(anchors: &[Point], mounts: &[Vector], cradle: &Point) -> Result<Vec<Len>, GeomError> {
    if anchors.len() != mounts.len() {
        return Err(GeomError::Mismatched {
            anchors: anchors.len(),
            mounts: mounts.len(),
        });
    }
    Ok(anchors
        .iter()
        .zip(mounts)
        .map(|(anchor, mount)| line_length(anchor, &(*cradle + *mount)))
        .collect())
}

/// The lines of a drawing machine: where they hang from, where they attach
/// to the cradle, and what drives them.
///
/// A `Rig` always has at least two lines, and every line has exactly one
/// anchor, one mount point and one actuator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AxisConfig>", into = "Vec<AxisConfig>")]
pub struct Rig {
    axes: Vec<AxisConfig>,
}

impl TryFrom<Vec<AxisConfig>> for Rig {
    type Error = GeomError;

    fn try_from(axes: Vec<AxisConfig>) -> Result<Self, GeomError> {
        Rig::new(axes)
    }
}

impl From<Rig> for Vec<AxisConfig> {
    fn from(rig: Rig) -> Self {
        rig.axes
    }
}

impl Rig {
    pub fn new(axes: Vec<AxisConfig>) -> Result<Self, GeomError> {
        if axes.len() < 2 {
            return Err(GeomError::TooFewAxes(axes.len()));
        }
        Ok(Rig { axes })
    }

    /// Builds a rig from parallel arrays, which must all have the same length.
    pub fn from_parts(
        anchors: &[Point],
        mounts: &[Vector],
        actuators: &[ActuatorId],
    ) -> Result<Self, GeomError> {
        if anchors.len() != mounts.len() {
            return Err(GeomError::Mismatched {
                anchors: anchors.len(),
                mounts: mounts.len(),
            });
        }
        if anchors.len() != actuators.len() {
            return Err(GeomError::MissingActuators {
                axes: anchors.len(),
                actuators: actuators.len(),
            });
        }
        Rig::new(
            anchors
                .iter()
                .zip(mounts)
                .zip(actuators)
                .map(|((&anchor, &mount), &actuator)| AxisConfig {
                    anchor,
                    mount,
                    actuator,
                })
                .collect(),
        )
    }

    pub fn axes(&self) -> &[AxisConfig] {
        &self.axes
    }

    pub fn axis(&self, id: AxisId) -> Option<&AxisConfig> {
        self.axes.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = AxisId> {
        (0..self.axes.len()).map(AxisId)
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn line_lengths(&self, cradle: &Point) -> Vec<Len> {
        self.axes.iter().map(|a| a.line_length(cradle)).collect()
    }

    /// Exact position for a two-line rig, or `None` if the rig has some other
    /// number of lines or the lengths are inconsistent.
    pub fn solve_two_axis(&self, lengths: &[Len], branch: Branch) -> Option<Point> {
        let [a, b] = self.axes.as_slice() else {
            return None;
        };
        let [la, lb] = lengths else {
            return None;
        };
        // The cradle origin is at distance `l` from `anchor - mount`.
        let (p, q) = circle_intersection(a.anchor - a.mount, b.anchor - b.mount, la.get(), lb.get())?;
        Some(branch.pick(p, q))
    }

    /// Best guess of the cradle position given measured line lengths.
    ///
    /// A closed-form estimator that has no solution falls back to relaxation
    /// starting from `seed`.
    pub fn estimate(&self, measured: &[Len], seed: Point, estimator: &Estimator) -> Point {
        debug_assert_eq!(measured.len(), self.axes.len());
        match *estimator {
            Estimator::Relaxation(relax) => estimate_position(&self.axes, measured, seed, relax),
            Estimator::ClosedForm { branch, fallback } => self
                .solve_two_axis(measured, branch)
                .unwrap_or_else(|| estimate_position(&self.axes, measured, seed, fallback)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub fn whiteboard() -> Rig {
        let [left, right] = CradleGeometry::default().top_corners();
        Rig::from_parts(
            &[Point::new(-500.0, -375.0), Point::new(500.0, -375.0)],
            &[left, right],
            &[ActuatorId(304726), ActuatorId(304740)],
        )
        .unwrap()
    }

    #[test]
    fn mount_offsets_are_included() {
        let rig = whiteboard();
        let lengths = rig.line_lengths(&Point::new(0.0, 0.0));
        // (-500, -375) to (-75, -37.5)
        let expected = (square(425.0) + square(337.5)).sqrt();
        assert!((lengths[0].get() - expected).abs() < 1e-9);
        assert!((lengths[1].get() - expected).abs() < 1e-9);
    }

    #[test]
    fn mismatched_arrays() {
        let anchors = [Point::new(0.0, 0.0), Point::new(1.0, 0.0)];
        let mounts = [Vector::zero()];
        assert_eq!(
            line_lengths(&anchors, &mounts, &Point::origin()),
            Err(GeomError::Mismatched { anchors: 2, mounts: 1 })
        );
        assert_eq!(
            Rig::from_parts(&anchors, &mounts, &[ActuatorId(1), ActuatorId(2)]),
            Err(GeomError::Mismatched { anchors: 2, mounts: 1 })
        );
        assert_eq!(
            Rig::from_parts(&anchors, &[Vector::zero(); 2], &[ActuatorId(1)]),
            Err(GeomError::MissingActuators { axes: 2, actuators: 1 })
        );
    }

    #[test]
    fn one_line_is_not_a_rig() {
        let axis = AxisConfig {
            anchor: Point::origin(),
            mount: Vector::zero(),
            actuator: ActuatorId(1),
        };
        assert_eq!(Rig::new(vec![axis]), Err(GeomError::TooFewAxes(1)));
    }

    #[test]
    fn rig_from_toml() {
        #[derive(Deserialize)]
        struct Machine {
            axis: Rig,
        }

        let machine: Machine = toml::from_str(
            r#"
            [[axis]]
            anchor = [-500.0, -375.0]
            mount = [-75.0, -37.5]
            actuator = 304726

            [[axis]]
            anchor = [500.0, -375.0]
            mount = [75.0, -37.5]
            actuator = 304740
            "#,
        )
        .unwrap();
        assert_eq!(machine.axis, whiteboard());

        let err = toml::from_str::<Machine>(
            r#"
            [[axis]]
            anchor = [-500.0, -375.0]
            mount = [-75.0, -37.5]
            actuator = 304726
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn symmetric_two_axis_solve() {
        let rig = Rig::from_parts(
            &[Point::new(-500.0, -375.0), Point::new(500.0, -375.0)],
            &[Vector::zero(); 2],
            &[ActuatorId(1), ActuatorId(2)],
        )
        .unwrap();
        let p = rig
            .solve_two_axis(&[625.0.mm(), 625.0.mm()], Branch::Below)
            .unwrap();
        assert!(p.x.abs() < 1e-9);
        assert!((p.y - 0.0).abs() < 1e-9);

        let above = rig
            .solve_two_axis(&[625.0.mm(), 625.0.mm()], Branch::Above)
            .unwrap();
        assert!((above.y + 750.0).abs() < 1e-9);
    }

    #[test]
    fn two_axis_solve_needs_two_axes() {
        let axis = |x: f64, id| AxisConfig {
            anchor: Point::new(x, 0.0),
            mount: Vector::zero(),
            actuator: ActuatorId(id),
        };
        let rig = Rig::new(vec![axis(-1.0, 1), axis(0.0, 2), axis(1.0, 3)]).unwrap();
        assert_eq!(
            rig.solve_two_axis(&[1.0.mm(), 1.0.mm(), 1.0.mm()], Branch::Below),
            None
        );
    }

    #[test]
    fn closed_form_falls_back_to_relaxation() {
        let rig = Rig::from_parts(
            &[Point::new(-500.0, 0.0), Point::new(500.0, 0.0)],
            &[Vector::zero(); 2],
            &[ActuatorId(1), ActuatorId(2)],
        )
        .unwrap();
        let measured = [10.0.mm(), 10.0.mm()];
        let seed = Point::new(0.0, 100.0);
        let estimator = Estimator::ClosedForm {
            branch: Branch::Below,
            fallback: Relaxation::default(),
        };

        let p = rig.estimate(&measured, seed, &estimator);
        let relaxed = estimate_position(rig.axes(), &measured, seed, Relaxation::default());
        assert!(p.x.is_finite() && p.y.is_finite());
        assert_eq!(p, relaxed);
    }

    #[test]
    fn closed_form_matches_relaxation() {
        let rig = whiteboard();
        let target = Point::new(120.0, 80.0);
        let measured = rig.line_lengths(&target);

        let exact = rig.solve_two_axis(&measured, Branch::Below).unwrap();
        assert!((exact - target).length() < 1e-6);

        let relaxed = rig.estimate(&measured, Point::origin(), &Estimator::Relaxation(Relaxation::PRECISE));
        assert!((relaxed - target).length() < 1e-3);
    }

    proptest! {
        // Inverse kinematics of the estimate reproduces the measured lengths.
        #[test]
        fn estimate_inverts_line_lengths(x in -300.0..300.0f64, y in -150.0..300.0f64) {
            let rig = whiteboard();
            let p = Point::new(x, y);
            let measured = rig.line_lengths(&p);
            let estimate = estimate_position(rig.axes(), &measured, Point::origin(), Relaxation::PRECISE);
            let lengths = rig.line_lengths(&estimate);

            for (l, m) in lengths.iter().zip(&measured) {
                prop_assert!((l.get() - m.get()).abs() < 1e-3);
            }
            prop_assert!((estimate - p).length() < 1e-2);
        }

        // Two lines and three lines should both find the point.
        #[test]
        fn estimate_with_three_lines(x in -200.0..200.0f64, y in -100.0..200.0f64) {
            let axis = |ax: f64, ay: f64, id| AxisConfig {
                anchor: Point::new(ax, ay),
                mount: Vector::zero(),
                actuator: ActuatorId(id),
            };
            let rig = Rig::new(vec![
                axis(-500.0, -375.0, 1),
                axis(500.0, -375.0, 2),
                axis(0.0, -375.0, 3),
            ]).unwrap();
            let p = Point::new(x, y);
            let measured = rig.line_lengths(&p);
            let estimate = estimate_position(rig.axes(), &measured, Point::origin(), Relaxation::PRECISE);
            prop_assert!((estimate - p).length() < 1e-2);
        }
    }
}

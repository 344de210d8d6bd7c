use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use vplot_geom::{
    ActuatorId, AxisConfig, CradleGeometry, Estimator, GeomError, Point, ReelCalibration, Rig,
    Vector,
};
use vplot_planner::Multipliers;

use crate::DrawerError;

/// The drawing surface, in millimetres.
///
/// Command files use board coordinates, with the origin at the top-left
/// corner of the board. The cradle's coordinates have their origin at the
/// centre of the board.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub width: f64,
    pub height: f64,
}

impl Default for BoardGeometry {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 750.0,
        }
    }
}

impl BoardGeometry {
    pub fn to_cradle(&self, x: f64, y: f64) -> Point {
        Point::new(x - self.width / 2.0, y - self.height / 2.0)
    }
}

/// Where each position estimate starts from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSeed {
    /// The previous estimate. Converges in a few passes while tracking.
    #[default]
    Prior,
    /// The cradle origin, every time.
    Origin,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMotionConfig")]
pub struct MotionConfig {
    /// Waypoint spacing in mm. We consider a waypoint reached once the
    /// estimate is within half of this.
    pub precision: f64,
    /// How often to check whether the cradle has arrived.
    pub poll_interval_ms: u64,
    /// How many times the homing positions are sent to the actuators.
    pub homing_repeats: u32,
    pub seed: EstimateSeed,
    pub multipliers: Multipliers,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            precision: 5.0,
            poll_interval_ms: 20,
            homing_repeats: 4,
            seed: EstimateSeed::default(),
            multipliers: Multipliers::default(),
        }
    }
}

impl MotionConfig {
    /// Fails on a precision that no estimate could ever get within.
    pub fn validate(&self) -> Result<(), GeomError> {
        if self.precision.is_finite() && self.precision > 0.0 {
            Ok(())
        } else {
            Err(GeomError::BadPrecision(self.precision))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A `[motion]` table as written, before validation.
#[derive(Deserialize)]
#[serde(default)]
struct RawMotionConfig {
    precision: f64,
    poll_interval_ms: u64,
    homing_repeats: u32,
    seed: EstimateSeed,
    multipliers: Multipliers,
}

impl Default for RawMotionConfig {
    fn default() -> Self {
        let MotionConfig {
            precision,
            poll_interval_ms,
            homing_repeats,
            seed,
            multipliers,
        } = MotionConfig::default();
        Self {
            precision,
            poll_interval_ms,
            homing_repeats,
            seed,
            multipliers,
        }
    }
}

impl TryFrom<RawMotionConfig> for MotionConfig {
    type Error = GeomError;

    fn try_from(raw: RawMotionConfig) -> Result<Self, GeomError> {
        let motion = MotionConfig {
            precision: raw.precision,
            poll_interval_ms: raw.poll_interval_ms,
            homing_repeats: raw.homing_repeats,
            seed: raw.seed,
            multipliers: raw.multipliers,
        };
        motion.validate()?;
        Ok(motion)
    }
}

/// Everything needed to run a drawer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawerConfig {
    #[serde(rename = "axis")]
    pub rig: Rig,
    #[serde(default)]
    pub cradle: CradleGeometry,
    #[serde(default)]
    pub board: BoardGeometry,
    #[serde(default)]
    pub reel: ReelCalibration,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub estimator: Estimator,
}

impl DrawerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, DrawerError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DrawerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, DrawerError> {
        Ok(toml::to_string(self)?)
    }
}

pub struct ConfigBuilder {
    anchors: Vec<Point>,
    mounts: Option<Vec<Vector>>,
    actuators: Vec<ActuatorId>,
    cradle: CradleGeometry,
    board: BoardGeometry,
    reel: ReelCalibration,
    motion: MotionConfig,
    estimator: Estimator,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            anchors: vec![Point::new(-500.0, -375.0), Point::new(500.0, -375.0)],
            mounts: None,
            actuators: vec![ActuatorId(0), ActuatorId(1)],
            cradle: CradleGeometry::default(),
            board: BoardGeometry::default(),
            reel: ReelCalibration::default(),
            motion: MotionConfig::default(),
            estimator: Estimator::default(),
        }
    }
}

impl ConfigBuilder {
    /// Fails if the anchors, mounts and actuators don't line up, or if the
    /// precision is unusable.
    pub fn build(&self) -> Result<DrawerConfig, GeomError> {
        self.motion.validate()?;
        // Without explicit mounts, the lines attach to the cradle's top corners.
        let corners = self.cradle.top_corners();
        let mounts = self.mounts.as_deref().unwrap_or(&corners);
        Ok(DrawerConfig {
            rig: Rig::from_parts(&self.anchors, mounts, &self.actuators)?,
            cradle: self.cradle,
            board: self.board,
            reel: self.reel,
            motion: self.motion,
            estimator: self.estimator,
        })
    }

    pub fn with_anchors(&mut self, anchors: Vec<Point>) -> &mut Self {
        self.anchors = anchors;
        self
    }

    pub fn with_mounts(&mut self, mounts: Vec<Vector>) -> &mut Self {
        self.mounts = Some(mounts);
        self
    }

    pub fn with_actuators(&mut self, actuators: Vec<ActuatorId>) -> &mut Self {
        self.actuators = actuators;
        self
    }

    pub fn with_axes(&mut self, axes: &[AxisConfig]) -> &mut Self {
        self.anchors = axes.iter().map(|a| a.anchor).collect();
        self.mounts = Some(axes.iter().map(|a| a.mount).collect());
        self.actuators = axes.iter().map(|a| a.actuator).collect();
        self
    }

    pub fn with_cradle(&mut self, cradle: CradleGeometry) -> &mut Self {
        self.cradle = cradle;
        self
    }

    pub fn with_board(&mut self, board: BoardGeometry) -> &mut Self {
        self.board = board;
        self
    }

    pub fn with_reel(&mut self, reel: ReelCalibration) -> &mut Self {
        self.reel = reel;
        self
    }

    pub fn with_motion(&mut self, motion: MotionConfig) -> &mut Self {
        self.motion = motion;
        self
    }

    pub fn with_precision(&mut self, precision: f64) -> &mut Self {
        self.motion.precision = precision;
        self
    }

    pub fn with_multipliers(&mut self, multipliers: Multipliers) -> &mut Self {
        self.motion.multipliers = multipliers;
        self
    }

    pub fn with_estimator(&mut self, estimator: Estimator) -> &mut Self {
        self.estimator = estimator;
        self
    }

    pub fn with_seed(&mut self, seed: EstimateSeed) -> &mut Self {
        self.motion.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vplot_geom::{Branch, Relaxation};

    #[test]
    fn default_is_the_whiteboard() {
        let config = ConfigBuilder::default().build().unwrap();
        let axes = config.rig.axes();
        assert_eq!(axes.len(), 2);
        assert_eq!(axes[0].anchor, Point::new(-500.0, -375.0));
        assert_eq!(axes[0].mount, Vector::new(-75.0, -37.5));
        assert_eq!(axes[1].mount, Vector::new(75.0, -37.5));
        assert_eq!(config.board, BoardGeometry { width: 1000.0, height: 750.0 });
        assert_eq!(config.motion.precision, 5.0);
        assert_eq!(config.motion.homing_repeats, 4);
    }

    #[test]
    fn mismatched_builder() {
        let err = ConfigBuilder::default()
            .with_mounts(vec![Vector::zero()])
            .build()
            .unwrap_err();
        assert_eq!(err, GeomError::Mismatched { anchors: 2, mounts: 1 });

        let err = ConfigBuilder::default()
            .with_actuators(vec![ActuatorId(7)])
            .build()
            .unwrap_err();
        assert_eq!(err, GeomError::MissingActuators { axes: 2, actuators: 1 });
    }

    #[test]
    fn board_translation() {
        let board = BoardGeometry {
            width: 1800.0,
            height: 900.0,
        };
        assert_eq!(board.to_cradle(300.0, 200.0), Point::new(-600.0, -250.0));
        assert_eq!(board.to_cradle(900.0, 450.0), Point::origin());
    }

    #[test]
    fn minimal_toml() {
        let config = DrawerConfig::from_toml_str(
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
        assert_eq!(config.motion, MotionConfig::default());
        assert_eq!(config.estimator, Estimator::default());
        assert_eq!(config.rig.axes()[1].actuator, ActuatorId(304740));
    }

    #[test]
    fn full_toml() {
        let config = DrawerConfig::from_toml_str(
            r#"
            [[axis]]
            anchor = [-900.0, -450.0]
            mount = [-75.0, -37.5]
            actuator = 1

            [[axis]]
            anchor = [900.0, -450.0]
            mount = [75.0, -37.5]
            actuator = 2

            [board]
            width = 1800.0
            height = 900.0

            [reel]
            spool_radius = 12.5
            steps_per_revolution = 1600.0

            [motion]
            precision = 2.0
            poll_interval_ms = 50
            seed = "origin"

            [motion.multipliers]
            velocity = 0.5

            [estimator]
            kind = "closed_form"
            branch = "below"
            "#,
        )
        .unwrap();

        assert_eq!(config.board.width, 1800.0);
        assert_eq!(config.reel.steps_per_revolution, 1600.0);
        assert_eq!(config.motion.precision, 2.0);
        assert_eq!(config.motion.homing_repeats, 4);
        assert_eq!(config.motion.seed, EstimateSeed::Origin);
        assert_eq!(config.motion.multipliers.velocity, 0.5);
        assert_eq!(config.motion.multipliers.acceleration, 1.0 / 256.0);
        assert_eq!(config.motion.poll_interval(), Duration::from_millis(50));
        assert_eq!(
            config.estimator,
            Estimator::ClosedForm {
                branch: Branch::Below,
                fallback: Relaxation::FEEDBACK,
            }
        );
    }

    #[test]
    fn one_axis_is_rejected() {
        let err = DrawerConfig::from_toml_str(
            r#"
            [[axis]]
            anchor = [0.0, 0.0]
            mount = [0.0, 0.0]
            actuator = 1
            "#,
        );
        assert!(matches!(err, Err(DrawerError::Toml(_))));
    }

    #[test]
    fn bad_precision_is_rejected() {
        for precision in [0.0, -1.0, f64::INFINITY] {
            let err = ConfigBuilder::default()
                .with_precision(precision)
                .build()
                .unwrap_err();
            assert_eq!(err, GeomError::BadPrecision(precision));
        }
        assert!(matches!(
            ConfigBuilder::default().with_precision(f64::NAN).build(),
            Err(GeomError::BadPrecision(p)) if p.is_nan()
        ));
    }

    #[test]
    fn bad_precision_in_toml() {
        for precision in ["0.0", "-2.5", "nan"] {
            let text = format!(
                r#"
                [[axis]]
                anchor = [-500.0, -375.0]
                mount = [-75.0, -37.5]
                actuator = 1

                [[axis]]
                anchor = [500.0, -375.0]
                mount = [75.0, -37.5]
                actuator = 2

                [motion]
                precision = {precision}
                "#
            );
            let err = DrawerConfig::from_toml_str(&text);
            assert!(
                matches!(&err, Err(DrawerError::Toml(e)) if e.to_string().contains("precision")),
                "{precision}: {err:?}"
            );
        }
    }

    #[test]
    fn toml_round_trip() {
        let config = ConfigBuilder::default().build().unwrap();
        let text = config.to_toml_string().unwrap();
        assert_eq!(DrawerConfig::from_toml_str(&text).unwrap(), config);
    }
}

//! The drawer's state machine.
//!
//! [`Drawer`] doesn't talk to any hardware itself. Every transition returns
//! a list of [`Effect`]s, which the control task then carries out in order.
//! That keeps all of the decisions in one place, where they can be tested
//! without actuators or a runtime.

use serde::{Deserialize, Serialize};
use vplot_geom::{AxisConfig, AxisId, CradleGeometry, Len, Point, UnitConverter};
use vplot_planner::{plan_axis_motions, AxisLimits, AxisMotion, AxisTravel, Waypoint, WaypointQueue};
use vplot_protocol::DrawerEvent;

use crate::{
    actuator::Feedback,
    config::{DrawerConfig, EstimateSeed},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawerState {
    /// Waiting for actuators to attach.
    Unready,
    /// Homed, and nothing has been asked of us yet.
    Ready,
    Moving,
    /// The last requested motion has finished.
    Idle,
}

impl DrawerState {
    pub fn is_ready(self) -> bool {
        self != DrawerState::Unready
    }
}

/// Something the control task should do on the drawer's behalf.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Effect {
    /// Put a freshly attached actuator into a known state.
    Initialize { axis: AxisId, limits: AxisLimits },
    /// Overwrite an actuator's position without moving it.
    Home { axis: AxisId, steps: i64 },
    Drive { axis: AxisId, motion: AxisMotion },
    Emit(DrawerEvent),
}

#[derive(Clone, Debug)]
pub struct AxisState {
    pub config: AxisConfig,
    /// Line length according to the most recent feedback.
    pub measured: Len,
    /// Step counter according to the most recent feedback.
    pub steps: i64,
    /// The length we last asked for.
    pub target: Len,
    pub attached: bool,
    /// Only known once the actuator has attached.
    pub limits: Option<AxisLimits>,
}

impl AxisState {
    fn new(config: AxisConfig) -> Self {
        Self {
            config,
            measured: Len::new(0.0),
            steps: 0,
            target: Len::new(0.0),
            attached: false,
            limits: None,
        }
    }
}

/// A snapshot of the drawer, for observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawerStatus {
    pub state: DrawerState,
    pub estimate: Point,
    /// The waypoint we're currently driving towards, or the last one if we're
    /// not moving.
    pub target: Point,
    pub arrived: bool,
    /// Waypoints waiting behind the current one.
    pub queued: usize,
    pub lengths: Vec<Len>,
    pub cradle: CradleGeometry,
}

pub struct Drawer {
    config: DrawerConfig,
    units: Box<dyn UnitConverter + Send>,
    axes: Vec<AxisState>,
    queue: WaypointQueue,
    state: DrawerState,
    estimate: Point,
    target: Point,
}

impl Drawer {
    pub fn new(config: DrawerConfig, units: Box<dyn UnitConverter + Send>) -> Self {
        let axes = config.rig.axes().iter().copied().map(AxisState::new).collect();
        Self {
            queue: WaypointQueue::new(config.motion.precision),
            config,
            units,
            axes,
            state: DrawerState::Unready,
            estimate: Point::origin(),
            target: Point::origin(),
        }
    }

    pub fn config(&self) -> &DrawerConfig {
        &self.config
    }

    pub fn state(&self) -> DrawerState {
        self.state
    }

    pub fn estimate(&self) -> Point {
        self.estimate
    }

    pub fn axes(&self) -> &[AxisState] {
        &self.axes
    }

    pub fn measured_lengths(&self) -> Vec<Len> {
        self.axes.iter().map(|a| a.measured).collect()
    }

    pub fn are_we_there_yet(&self) -> bool {
        self.queue.has_arrived(&self.estimate)
    }

    pub fn status(&self) -> DrawerStatus {
        DrawerStatus {
            state: self.state,
            estimate: self.estimate,
            target: self.queue.active().unwrap_or(self.target),
            arrived: self.are_we_there_yet(),
            queued: self.queue.len(),
            lengths: self.measured_lengths(),
            cradle: self.config.cradle,
        }
    }

    pub fn handle_feedback(&mut self, axis: AxisId, feedback: Feedback) -> Vec<Effect> {
        if axis.0 >= self.axes.len() {
            log::warn!("feedback for unknown {axis}");
            return Vec::new();
        }

        match feedback {
            Feedback::Attached(limits) => self.attach(axis, limits),
            Feedback::Detached => {
                self.detach(axis);
                Vec::new()
            }
            Feedback::PositionChanged(steps) => self.position_changed(axis, steps),
        }
    }

    fn attach(&mut self, axis: AxisId, limits: AxisLimits) -> Vec<Effect> {
        log::info!("{axis} attached");
        let state = &mut self.axes[axis.0];
        state.attached = true;
        state.limits = Some(limits);
        state.steps = 0;
        state.measured = self.units.steps_to_length(0);
        state.target = state.measured;

        let mut ret = vec![Effect::Initialize { axis, limits }];
        if self.axes.iter().all(|a| a.attached) {
            // The actuator we just initialized has lost its position, so every
            // line gets homed again, even if we thought we were ready.
            if self.state.is_ready() {
                log::warn!("{axis} attached again while ready, homing again");
            }
            self.target = self.queue.active().unwrap_or(self.target);
            self.queue.clear();
            self.state = DrawerState::Ready;
            log::info!("all lines attached, homing at {:?}", self.target);
            ret.extend(self.home());
            ret.push(Effect::Emit(DrawerEvent::Ready));
        }
        ret
    }

    fn detach(&mut self, axis: AxisId) {
        log::warn!("{axis} detached");
        self.axes[axis.0].attached = false;
        if self.state.is_ready() {
            self.state = DrawerState::Unready;
            // Whatever we were doing, the cradle can't be trusted to follow.
            self.queue.clear();
        }
    }

    fn position_changed(&mut self, axis: AxisId, steps: i64) -> Vec<Effect> {
        let length = self.units.steps_to_length(steps);
        let state = &mut self.axes[axis.0];
        state.steps = steps;
        state.measured = length;

        let seed = match self.config.motion.seed {
            EstimateSeed::Prior => self.estimate,
            EstimateSeed::Origin => Point::origin(),
        };
        let measured = self.measured_lengths();
        self.estimate = self
            .config
            .rig
            .estimate(&measured, seed, &self.config.estimator);

        vec![Effect::Emit(DrawerEvent::LineFeedLengthChanged { axis, length })]
    }

    /// Forces every line to the length it would have at the current target,
    /// and declares that we're there.
    fn home(&mut self) -> Vec<Effect> {
        let lengths = self.config.rig.line_lengths(&self.target);
        let mut homed = Vec::with_capacity(self.axes.len());
        for (idx, (state, len)) in self.axes.iter_mut().zip(lengths).enumerate() {
            let steps = self.units.length_to_steps(len);
            state.steps = steps;
            state.measured = len;
            state.target = len;
            homed.push(Effect::Home {
                axis: AxisId(idx),
                steps,
            });
        }
        self.estimate = self.target;

        // Some drivers drop position writes that arrive too close together.
        let repeats = self.config.motion.homing_repeats.max(1) as usize;
        homed.repeat(repeats)
    }

    /// Re-homes at the current target, abandoning any queued motion.
    pub fn reset(&mut self) -> Vec<Effect> {
        if !self.state.is_ready() {
            log::debug!("ignoring reset while unready");
            return Vec::new();
        }
        self.target = self.queue.active().unwrap_or(self.target);
        self.queue.clear();
        self.state = DrawerState::Ready;
        self.home()
    }

    pub fn move_to(&mut self, waypoint: Waypoint) -> Vec<Effect> {
        if !self.state.is_ready() {
            log::debug!("ignoring move to {:?} while unready", waypoint.position);
            return Vec::new();
        }
        let p = waypoint.position;
        if !p.x.is_finite() || !p.y.is_finite() {
            log::warn!("ignoring move to non-finite position {p:?}");
            return Vec::new();
        }

        self.state = DrawerState::Moving;
        if self.queue.push(waypoint, self.estimate) {
            self.advance()
        } else {
            Vec::new()
        }
    }

    /// Queues a line through each of `points` in turn.
    pub fn follow_path(&mut self, points: &[Point], append: bool) -> Vec<Effect> {
        let mut ret = Vec::new();
        for (idx, &p) in points.iter().enumerate() {
            let waypoint = Waypoint {
                position: p,
                append: append || idx > 0,
            };
            ret.extend(self.move_to(waypoint));
        }
        ret
    }

    /// Called periodically, to move on to the next waypoint when we've reached
    /// the current one.
    pub fn check_arrival(&mut self) -> Vec<Effect> {
        if self.state != DrawerState::Moving || !self.are_we_there_yet() {
            return Vec::new();
        }
        self.advance()
    }

    fn advance(&mut self) -> Vec<Effect> {
        match self.queue.advance() {
            Some(next) => self.drive_to(next),
            None => {
                log::debug!("arrived at {:?}", self.target);
                self.state = DrawerState::Idle;
                vec![Effect::Emit(DrawerEvent::Arrived)]
            }
        }
    }

    fn drive_to(&mut self, target: Point) -> Vec<Effect> {
        self.target = target;
        let lengths = self.config.rig.line_lengths(&target);

        let travels: Option<Vec<AxisTravel>> = self
            .axes
            .iter()
            .zip(&lengths)
            .map(|(a, &target)| {
                Some(AxisTravel {
                    current: a.measured,
                    commanded_steps: self.units.length_to_steps(a.target),
                    target,
                    limits: a.limits?,
                })
            })
            .collect();
        let Some(travels) = travels else {
            log::warn!("not driving to {target:?}: some lines have never attached");
            return Vec::new();
        };

        let motions = plan_axis_motions(&travels, &*self.units, self.config.motion.multipliers);
        for (state, len) in self.axes.iter_mut().zip(lengths) {
            state.target = len;
        }
        motions
            .into_iter()
            .enumerate()
            .filter_map(|(idx, motion)| {
                Some(Effect::Drive {
                    axis: AxisId(idx),
                    motion: motion?,
                })
            })
            .collect()
    }
}

//! The interface to the hardware that winds the lines and lifts the pens.
//!
//! Drivers for real steppers usually report through callbacks on threads
//! of their own, so feedback goes through a [`FeedbackSender`], which can be
//! used from anywhere and never blocks.

use tokio::sync::mpsc;
use vplot_geom::{ActuatorId, AxisId};
use vplot_planner::AxisLimits;

use crate::task::Message;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("couldn't open actuator {id}: {reason}")]
    Open { id: ActuatorId, reason: String },
    #[error("actuator i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Something an actuator tells the drawer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Feedback {
    /// The actuator is connected, with these capabilities.
    Attached(AxisLimits),
    Detached,
    /// The actuator's step counter changed.
    PositionChanged(i64),
}

/// One line's stepper.
///
/// Positions are in steps, velocities in steps per second and accelerations
/// in steps per second squared.
pub trait Actuator: Send {
    /// Starts talking to the actuator with serial number `id`. Everything
    /// it reports should go to `feedback`.
    fn open(&mut self, id: ActuatorId, feedback: FeedbackSender) -> Result<(), ActuatorError>;
    fn attached(&self) -> bool;
    fn current_position(&self) -> i64;
    /// Overwrites the step counter without moving.
    fn set_current_position(&mut self, steps: i64);
    fn set_target_position(&mut self, steps: i64);
    fn set_velocity_limit(&mut self, velocity: f64);
    fn set_acceleration(&mut self, acceleration: f64);
    fn set_engaged(&mut self, engaged: bool);
}

pub trait PenActuator: Send {
    fn activate_pen(&mut self, index: u32);
    fn deactivate_pens(&mut self);
}

/// Reports feedback for a single line.
#[derive(Clone, Debug)]
pub struct FeedbackSender {
    axis: AxisId,
    tx: mpsc::UnboundedSender<Message>,
}

impl FeedbackSender {
    pub(crate) fn new(axis: AxisId, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { axis, tx }
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    /// Returns false if the drawer has shut down, in which case there's no
    /// point in sending anything else.
    pub fn send(&self, feedback: Feedback) -> bool {
        self.tx.send(Message::Feedback(self.axis, feedback)).is_ok()
    }

    pub fn attached(&self, limits: AxisLimits) -> bool {
        self.send(Feedback::Attached(limits))
    }

    pub fn detached(&self) -> bool {
        self.send(Feedback::Detached)
    }

    pub fn position_changed(&self, steps: i64) -> bool {
        self.send(Feedback::PositionChanged(steps))
    }
}
